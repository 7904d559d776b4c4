//! Physical confirmation for signing.
//!
//! The button is wired active-low with a pull-up: the line reads high while
//! released and low while pressed. A confirmation is a released-to-pressed
//! transition observed inside the wait window, so a button that is already
//! held (or stuck) when the request arrives does not count.

use std::fs;
use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};
use tracing::debug;

/// A digital input line.
pub trait InputLine {
    /// `true` while the line is pulled low (button pressed).
    fn is_low(&mut self) -> bool;
}

/// Line level read from a file: contents `0` mean low, anything else (or a
/// missing file) means high. Lets an operator press the "button" with
/// `echo 0 > path`.
#[derive(Debug, Clone)]
pub struct FileLine {
    path: PathBuf,
}

impl FileLine {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl InputLine for FileLine {
    fn is_low(&mut self) -> bool {
        fs::read_to_string(&self.path)
            .map(|level| level.trim() == "0")
            .unwrap_or(false)
    }
}

/// Presses itself on the second poll of every wait. For unattended runs only.
#[derive(Debug, Default)]
pub struct AutoPress {
    polls: u64,
}

impl InputLine for AutoPress {
    fn is_low(&mut self) -> bool {
        self.polls += 1;
        self.polls % 2 == 0
    }
}

/// Never pressed.
#[derive(Debug, Default)]
pub struct Unplugged;

impl InputLine for Unplugged {
    fn is_low(&mut self) -> bool {
        false
    }
}

pub struct ConfirmationGate {
    input: Box<dyn InputLine>,
    poll_interval: Duration,
}

impl ConfirmationGate {
    pub fn new(input: Box<dyn InputLine>, poll_interval: Duration) -> Self {
        Self {
            input,
            poll_interval,
        }
    }

    /// Blocks until a press is detected or `timeout` elapses.
    pub fn await_confirmation(&mut self, timeout: Duration) -> bool {
        let started = Instant::now();
        let mut released = false;
        loop {
            if self.input.is_low() {
                if released {
                    debug!(waited_ms = started.elapsed().as_millis() as u64, "press detected");
                    return true;
                }
            } else {
                released = true;
            }

            let elapsed = started.elapsed();
            if elapsed >= timeout {
                debug!(timeout_ms = timeout.as_millis() as u64, "confirmation window expired");
                return false;
            }
            thread::sleep(self.poll_interval.min(timeout - elapsed));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    /// Plays back a fixed sequence of levels, then holds the last one.
    struct Scripted(VecDeque<bool>, bool);

    impl Scripted {
        fn new(levels: &[bool]) -> Self {
            Self(levels.iter().copied().collect(), false)
        }
    }

    impl InputLine for Scripted {
        fn is_low(&mut self) -> bool {
            if let Some(level) = self.0.pop_front() {
                self.1 = level;
            }
            self.1
        }
    }

    fn gate(input: impl InputLine + 'static) -> ConfirmationGate {
        ConfirmationGate::new(Box::new(input), Duration::from_millis(1))
    }

    #[test]
    fn press_after_release_confirms() {
        let mut gate = gate(Scripted::new(&[false, false, true]));
        assert!(gate.await_confirmation(Duration::from_secs(2)));
    }

    #[test]
    fn held_button_does_not_confirm() {
        let mut gate = gate(Scripted::new(&[true]));
        assert!(!gate.await_confirmation(Duration::from_millis(30)));
    }

    #[test]
    fn idle_line_times_out() {
        let started = Instant::now();
        assert!(!gate(Unplugged).await_confirmation(Duration::from_millis(20)));
        assert!(started.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn auto_press_confirms_every_wait() {
        let mut gate = gate(AutoPress::default());
        assert!(gate.await_confirmation(Duration::from_secs(1)));
        assert!(gate.await_confirmation(Duration::from_secs(1)));
    }

    #[test]
    fn file_line_follows_written_level() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("button");
        fs::write(&path, "1").unwrap();

        let presser = {
            let path = path.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(50));
                fs::write(&path, "0").unwrap();
            })
        };
        let mut gate = gate(FileLine::new(&path));
        assert!(gate.await_confirmation(Duration::from_secs(5)));
        presser.join().unwrap();

        // Still held: the next wait needs a fresh release.
        assert!(!gate.await_confirmation(Duration::from_millis(20)));
    }

    #[test]
    fn missing_file_reads_released() {
        let dir = tempfile::tempdir().unwrap();
        let mut line = FileLine::new(dir.path().join("absent"));
        assert!(!line.is_low());
    }
}
