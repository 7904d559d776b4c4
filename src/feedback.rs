//! Operator feedback events.
//!
//! The engine reports what happened as an abstract [`Event`]; how it is shown
//! (LED pulses on the board, log records on a host) is up to the sink.

use std::cell::RefCell;
use std::rc::Rc;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    /// Boot finished and the command loop is about to start.
    Ready,
    /// A read-only command was answered.
    Info,
    /// A key operation completed.
    Success,
    /// A command was rejected.
    Error,
    /// Waiting on the physical confirmation.
    Pending,
    /// The engine halted.
    Halt,
}

impl Event {
    /// The LED pattern the board firmware uses for this event, as
    /// `(on_ms, off_ms, repetitions)`.
    pub fn blink_pattern(self) -> (u32, u32, u32) {
        match self {
            Event::Ready => (300, 0, 1),
            Event::Info => (150, 150, 2),
            Event::Success => (150, 150, 3),
            Event::Error => (100, 100, 5),
            Event::Pending => (200, 200, 0),
            Event::Halt => (1000, 0, 1),
        }
    }
}

pub trait FeedbackSink {
    fn emit(&mut self, event: Event);
}

/// Renders events as log records.
#[derive(Debug, Default)]
pub struct LogFeedback;

impl FeedbackSink for LogFeedback {
    fn emit(&mut self, event: Event) {
        let (on_ms, off_ms, times) = event.blink_pattern();
        match event {
            Event::Ready | Event::Halt => info!(?event, on_ms, off_ms, times, "feedback"),
            _ => debug!(?event, on_ms, off_ms, times, "feedback"),
        }
    }
}

/// Keeps every event; useful for asserting on feedback in tests.
#[derive(Debug, Default, Clone)]
pub struct RecordingFeedback {
    events: Rc<RefCell<Vec<Event>>>,
}

impl RecordingFeedback {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.borrow().clone()
    }
}

impl FeedbackSink for RecordingFeedback {
    fn emit(&mut self, event: Event) {
        self.events.borrow_mut().push(event);
    }
}
