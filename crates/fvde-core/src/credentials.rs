//! Unlock credentials supplied up front (command line or environment).

use crate::error::{FvdeError, FvdeResult};
use std::fmt;
use zeroize::Zeroizing;

/// Size of a raw FileVault volume master key in bytes.
pub const KEY_SIZE: usize = 16;

/// Key, password and recovery password for the logical volumes.
///
/// Every credential that is present is applied to every volume before the
/// unlock attempt. All secrets are zeroed on drop.
#[derive(Clone, Default)]
pub struct Credentials {
    key: Option<Zeroizing<Vec<u8>>>,
    password: Option<Zeroizing<String>>,
    recovery_password: Option<Zeroizing<String>>,
}

impl Credentials {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the raw volume master key.
    #[must_use]
    pub fn with_key(mut self, key: impl Into<Vec<u8>>) -> Self {
        self.key = Some(Zeroizing::new(key.into()));
        self
    }

    /// Sets the volume master key from its hexadecimal form.
    pub fn with_hex_key(self, hex_key: &str) -> FvdeResult<Self> {
        Ok(self.with_key(parse_hex_key(hex_key)?.to_vec()))
    }

    #[must_use]
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(Zeroizing::new(password.into()));
        self
    }

    #[must_use]
    pub fn with_recovery_password(mut self, recovery_password: impl Into<String>) -> Self {
        self.recovery_password = Some(Zeroizing::new(recovery_password.into()));
        self
    }

    pub fn key(&self) -> Option<&[u8]> {
        self.key.as_deref().map(Vec::as_slice)
    }

    pub fn password(&self) -> Option<&str> {
        self.password.as_deref().map(String::as_str)
    }

    pub fn recovery_password(&self) -> Option<&str> {
        self.recovery_password.as_deref().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.key.is_none() && self.password.is_none() && self.recovery_password.is_none()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("key", &self.key.as_ref().map(|_| "<redacted>"))
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field(
                "recovery_password",
                &self.recovery_password.as_ref().map(|_| "<redacted>"),
            )
            .finish()
    }
}

/// Decodes a volume master key given as 32 hexadecimal characters.
pub fn parse_hex_key(hex_key: &str) -> FvdeResult<Zeroizing<[u8; KEY_SIZE]>> {
    let invalid = || {
        FvdeError::InvalidArgument(format!(
            "key must be {} hexadecimal characters",
            KEY_SIZE * 2
        ))
    };
    let hex_key = hex_key.trim();
    if hex_key.len() != KEY_SIZE * 2 {
        return Err(invalid());
    }
    let mut key = Zeroizing::new([0u8; KEY_SIZE]);
    hex::decode_to_slice(hex_key, key.as_mut_slice()).map_err(|_| invalid())?;
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_hex_key() {
        let key = parse_hex_key("000102030405060708090a0b0c0d0e0F").unwrap();
        assert_eq!(key[0], 0x00);
        assert_eq!(key[10], 0x0a);
        assert_eq!(key[15], 0x0f);
    }

    #[test]
    fn test_parse_hex_key_rejects_bad_input() {
        assert!(parse_hex_key("0011").is_err(), "too short");
        assert!(parse_hex_key(&"00".repeat(17)).is_err(), "too long");
        assert!(parse_hex_key(&"zz".repeat(16)).is_err(), "not hex");
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let creds = Credentials::new()
            .with_password("hunter2")
            .with_recovery_password("ABCD-EFGH");
        let debug = format!("{creds:?}");
        assert!(!debug.contains("hunter2"));
        assert!(!debug.contains("ABCD"));
        assert!(debug.contains("<redacted>"));
    }

    #[test]
    fn test_accessors() {
        let creds = Credentials::new()
            .with_hex_key("ffeeddccbbaa99887766554433221100")
            .unwrap()
            .with_password("pw");
        assert_eq!(creds.key().map(<[u8]>::len), Some(KEY_SIZE));
        assert_eq!(creds.password(), Some("pw"));
        assert_eq!(creds.recovery_password(), None);
        assert!(!creds.is_empty());
        assert!(Credentials::new().is_empty());
    }
}
