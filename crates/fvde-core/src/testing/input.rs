//! Scripted password input.

use super::EventLog;
use crate::prompt::{truncate_secret, SecureInputSource};
use std::collections::VecDeque;
use std::io;
use zeroize::Zeroizing;

/// Replays canned answers to password prompts.
///
/// Prompts and notices are recorded in an [`EventLog`] that stays readable
/// after the input has been moved into a session. Once the answers run out
/// every prompt fails with `UnexpectedEof`.
#[derive(Debug, Default)]
pub struct ScriptedInput {
    answers: VecDeque<String>,
    log: EventLog,
}

impl ScriptedInput {
    pub fn new<I, S>(answers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            answers: answers.into_iter().map(Into::into).collect(),
            log: EventLog::new(),
        }
    }

    /// Input with no answers; any prompt fails.
    pub fn silent() -> Self {
        Self::default()
    }

    pub fn log(&self) -> EventLog {
        self.log.clone()
    }
}

impl SecureInputSource for ScriptedInput {
    fn read_secret(&mut self, prompt: &str) -> io::Result<Zeroizing<String>> {
        self.log.push(format!("prompt: {prompt}"));
        self.answers
            .pop_front()
            .map(|answer| truncate_secret(Zeroizing::new(answer)))
            .ok_or_else(|| io::Error::new(io::ErrorKind::UnexpectedEof, "no scripted answer left"))
    }

    fn notify(&mut self, message: &str) {
        self.log.push(format!("notice: {message}"));
    }
}
