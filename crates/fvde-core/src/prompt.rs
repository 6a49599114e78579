//! Interactive password entry.

use std::io;
use zeroize::Zeroizing;

/// Longest password accepted from the prompt, in characters.
pub const MAX_PASSWORD_LENGTH: usize = 64;

/// Source of secrets typed by the user, plus the channel used to tell the
/// user why they are being asked.
pub trait SecureInputSource: Send {
    /// Reads one secret without echoing it.
    fn read_secret(&mut self, prompt: &str) -> io::Result<Zeroizing<String>>;

    /// Shows a message to the user.
    fn notify(&mut self, message: &str);
}

/// Reads from the controlling terminal with echo disabled.
#[derive(Debug, Clone, Copy, Default)]
pub struct TerminalInput;

impl SecureInputSource for TerminalInput {
    fn read_secret(&mut self, prompt: &str) -> io::Result<Zeroizing<String>> {
        let secret = Zeroizing::new(rpassword::prompt_password(prompt)?);
        Ok(truncate_secret(secret))
    }

    fn notify(&mut self, message: &str) {
        eprintln!("{message}");
    }
}

/// Cuts `secret` down to [`MAX_PASSWORD_LENGTH`] characters.
pub fn truncate_secret(mut secret: Zeroizing<String>) -> Zeroizing<String> {
    if let Some((cut, _)) = secret.char_indices().nth(MAX_PASSWORD_LENGTH) {
        secret.truncate(cut);
    }
    secret
}
