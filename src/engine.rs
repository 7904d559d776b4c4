//! The command loop.
//!
//! One line in, one line out, strictly in order. The only place the loop
//! blocks on something other than input is the button wait inside `SIGN`;
//! bytes arriving meanwhile stay in the reader until the wait resolves.

use crate::builder::{build_placeholder, info_string};
use crate::config::Config;
use crate::error::{Result, SignerError};
use crate::feedback::{Event, FeedbackSink};
use crate::gate::{ConfirmationGate, InputLine};
use crate::keystore::KeyStore;
use crate::protocol::{Command, Response};
use crate::storage::KeyStorage;
use crate::twofa::{self, Clock, SystemClock};
use base64::Engine;
use std::io::{BufRead, ErrorKind, Write};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Idle,
    ParsingCommand,
    Dispatching,
    AwaitingConfirmation,
    Responding,
    Halted,
}

enum KeySlot {
    Ready(KeyStore),
    /// Key material could not be loaded; key commands fail until restart.
    Faulted(String),
    /// Dropped on shutdown.
    Released,
}

pub struct ProtocolEngine {
    keys: KeySlot,
    storage: Box<dyn KeyStorage>,
    gate: ConfirmationGate,
    feedback: Box<dyn FeedbackSink>,
    clock: Box<dyn Clock>,
    config: Config,
    state: EngineState,
    unlocked_until: u64,
}

enum LineRead {
    Line(Vec<u8>),
    TooLong,
    Eof,
}

/// The line being assembled. Kept across read timeouts so a line that
/// arrives in pieces is still read whole.
#[derive(Default)]
struct PendingLine {
    bytes: Vec<u8>,
    overflow: bool,
}

impl PendingLine {
    fn finish(&mut self) -> LineRead {
        let done = std::mem::take(self);
        if done.overflow {
            LineRead::TooLong
        } else {
            LineRead::Line(done.bytes)
        }
    }
}

/// Reads one newline-terminated line, holding at most `max` bytes of it.
/// An overlong line is consumed up to its newline and reported as such.
fn read_line_bounded<R: BufRead>(
    reader: &mut R,
    pending: &mut PendingLine,
    max: usize,
) -> std::io::Result<LineRead> {
    loop {
        let available = match reader.fill_buf() {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        };
        if available.is_empty() {
            if !pending.overflow && pending.bytes.is_empty() {
                return Ok(LineRead::Eof);
            }
            return Ok(pending.finish());
        }

        let newline = available.iter().position(|b| *b == b'\n');
        let chunk = &available[..newline.unwrap_or(available.len())];
        if !pending.overflow {
            if pending.bytes.len() + chunk.len() > max {
                pending.overflow = true;
                pending.bytes.clear();
            } else {
                pending.bytes.extend_from_slice(chunk);
            }
        }

        let used = newline.map(|i| i + 1).unwrap_or(available.len());
        reader.consume(used);
        if newline.is_some() {
            return Ok(pending.finish());
        }
    }
}

impl ProtocolEngine {
    /// Loads the device key and readies the engine.
    ///
    /// Unusable key material does not stop the device: the engine comes up
    /// with key commands disabled so the host still gets `ERROR:` answers.
    pub fn boot(
        mut storage: Box<dyn KeyStorage>,
        input: Box<dyn InputLine>,
        mut feedback: Box<dyn FeedbackSink>,
        config: Config,
    ) -> Self {
        let keys = match KeyStore::load_or_create(&mut *storage) {
            Ok(keys) => KeySlot::Ready(keys),
            Err(err) => {
                error!(%err, "signing disabled");
                KeySlot::Faulted(match err {
                    SignerError::KeyStoreFault(reason) => reason,
                    other => other.to_string(),
                })
            }
        };

        let gate = ConfirmationGate::new(input, config.poll_interval());
        feedback.emit(Event::Ready);

        Self {
            keys,
            storage,
            gate,
            feedback,
            clock: Box::new(SystemClock),
            config,
            state: EngineState::Idle,
            unlocked_until: 0,
        }
    }

    pub fn with_clock(mut self, clock: Box<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn is_halted(&self) -> bool {
        self.state == EngineState::Halted
    }

    /// `true` when key commands are usable.
    pub fn has_key(&self) -> bool {
        matches!(self.keys, KeySlot::Ready(_))
    }

    fn transition(&mut self, next: EngineState) {
        debug!(from = ?self.state, to = ?next, "state");
        self.state = next;
    }

    fn keys(&self) -> Result<&KeyStore> {
        match &self.keys {
            KeySlot::Ready(keys) => Ok(keys),
            KeySlot::Faulted(reason) => Err(SignerError::KeyStoreFault(reason.clone())),
            KeySlot::Released => Err(SignerError::KeyStoreFault("key released".into())),
        }
    }

    /// Serves the command loop until `SHUTDOWN` or end of input.
    pub fn run<R: BufRead, W: Write>(&mut self, mut reader: R, mut writer: W) -> Result<()> {
        info!("command loop started");
        let mut pending = PendingLine::default();
        while !self.is_halted() {
            let max = self.config.max_line_len;
            let response = match read_line_bounded(&mut reader, &mut pending, max) {
                Ok(LineRead::Eof) => {
                    info!("input closed");
                    break;
                }
                Ok(LineRead::TooLong) => Some(self.reject("<overlong>", SignerError::LineTooLong)),
                Ok(LineRead::Line(bytes)) => match String::from_utf8(bytes) {
                    Ok(line) => self.handle_line(&line),
                    Err(err) => {
                        let raw = String::from_utf8_lossy(err.as_bytes()).into_owned();
                        Some(self.reject("<binary>", SignerError::MalformedCommand(raw)))
                    }
                },
                Err(err)
                    if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) =>
                {
                    continue
                }
                Err(err) => {
                    warn!(%err, "serial read failed");
                    self.feedback.emit(Event::Error);
                    continue;
                }
            };

            if let Some(response) = response {
                if let Err(err) = writeln!(writer, "{response}").and_then(|_| writer.flush()) {
                    warn!(%err, "serial write failed");
                    self.feedback.emit(Event::Error);
                }
            }
        }
        Ok(())
    }

    fn reject(&mut self, what: &str, err: SignerError) -> Response {
        warn!(line = what, %err, "line rejected");
        self.feedback.emit(Event::Error);
        Response::Error(err.to_string())
    }

    /// Handles one request line. Returns `None` for blank lines and for
    /// anything arriving after shutdown.
    pub fn handle_line(&mut self, line: &str) -> Option<Response> {
        if self.is_halted() {
            debug!("halted, ignoring input");
            return None;
        }
        let line = line.trim();
        if line.is_empty() {
            return None;
        }
        if line.len() > self.config.max_line_len {
            return Some(self.reject("<overlong>", SignerError::LineTooLong));
        }

        self.transition(EngineState::ParsingCommand);
        let command = Command::parse(line);
        debug!(command = command.name(), "received");

        self.transition(EngineState::Dispatching);
        let response = match self.dispatch(&command) {
            Ok(response) => response,
            Err(err) => {
                warn!(command = command.name(), %err, "command rejected");
                Response::Error(err.to_string())
            }
        };

        self.transition(EngineState::Responding);
        self.feedback.emit(match &response {
            Response::Error(_) => Event::Error,
            Response::ShutdownOk => Event::Halt,
            Response::Signature(_)
            | Response::Transaction(_)
            | Response::OtpConfirmed
            | Response::UnlockedUntil(_) => Event::Success,
            _ => Event::Info,
        });

        if matches!(response, Response::ShutdownOk) {
            self.keys = KeySlot::Released;
            self.transition(EngineState::Halted);
            info!("halted");
        } else {
            self.transition(EngineState::Idle);
        }
        Some(response)
    }

    fn dispatch(&mut self, command: &Command) -> Result<Response> {
        match command {
            Command::GetPublicKey => Ok(Response::PublicKey(self.keys()?.public_key_base58())),
            Command::Sign(payload) => self.sign(payload),
            Command::CreateTransaction => {
                Ok(Response::Transaction(build_placeholder(self.keys()?)?))
            }
            Command::TransactionInfo => Ok(Response::TxInfo(info_string())),
            Command::Shutdown => Ok(Response::ShutdownOk),
            Command::OtpBegin => {
                self.require_twofa()?;
                Ok(Response::OtpSecret(twofa::begin(&mut *self.storage)?))
            }
            Command::OtpConfirm { code, unix } => {
                self.require_twofa()?;
                let now = unix.unwrap_or_else(|| self.clock.unix_time());
                twofa::confirm(&mut *self.storage, code, now).map_err(bad_code)?;
                Ok(Response::OtpConfirmed)
            }
            Command::OtpUnlock { code, unix } => {
                self.require_twofa()?;
                let now = unix.unwrap_or_else(|| self.clock.unix_time());
                let until = twofa::unlock(&mut *self.storage, code, now, self.config.unlock_secs)
                    .map_err(bad_code)?;
                self.unlocked_until = until;
                info!(until, "signing unlocked");
                Ok(Response::UnlockedUntil(until))
            }
            Command::Unknown(raw) => Err(SignerError::MalformedCommand(raw.clone())),
        }
    }

    fn require_twofa(&self) -> Result<()> {
        if self.config.twofa {
            Ok(())
        } else {
            Err(SignerError::OtpDisabled)
        }
    }

    fn sign(&mut self, payload: &str) -> Result<Response> {
        self.keys()?;
        if self.config.twofa && self.clock.unix_time() > self.unlocked_until {
            return Err(SignerError::Locked);
        }

        let message = base64::engine::general_purpose::STANDARD.decode(payload)?;
        if message.is_empty() {
            return Err(SignerError::EmptyPayload);
        }

        self.transition(EngineState::AwaitingConfirmation);
        self.feedback.emit(Event::Pending);
        info!(len = message.len(), "waiting for button confirmation");
        if !self.gate.await_confirmation(self.config.confirm_timeout()) {
            return Err(SignerError::ConfirmationTimeout);
        }

        let signature = self.keys()?.sign(&message);
        info!(len = message.len(), "message signed");
        Ok(Response::Signature(
            base64::engine::general_purpose::STANDARD.encode(signature),
        ))
    }
}

fn bad_code(err: SignerError) -> SignerError {
    debug!(%err, "otp check failed");
    SignerError::Otp("OTP_BAD_CODE".into())
}
