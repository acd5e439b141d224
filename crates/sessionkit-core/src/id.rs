//! Session identifier generation and validation

use rand::TryRngCore;
use rand::rngs::OsRng;

use crate::{Error, Result};

/// Default identifier length in characters
pub const DEFAULT_ID_LENGTH: usize = 32;

const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";

/// Generates and validates fixed-length alphanumeric session identifiers.
///
/// Every store holds one of these so it can reject malformed identifiers
/// before touching its backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdCodec {
    length: usize,
}

impl IdCodec {
    pub fn new(length: usize) -> Self {
        Self { length }
    }

    pub fn length(&self) -> usize {
        self.length
    }

    /// Draw `length` bytes from the OS random source and map each into the
    /// 62-symbol alphabet.
    pub fn generate(&self) -> Result<String> {
        let mut buf = vec![0u8; self.length];
        OsRng
            .try_fill_bytes(&mut buf)
            .map_err(|e| Error::IdGeneration(format!("random source failed: {}", e)))?;

        Ok(buf
            .iter()
            .map(|b| ALPHABET[(*b as usize) % ALPHABET.len()] as char)
            .collect())
    }

    pub fn validate(&self, id: &str) -> bool {
        id.len() == self.length && id.bytes().all(|b| b.is_ascii_alphanumeric())
    }
}

impl Default for IdCodec {
    fn default() -> Self {
        Self::new(DEFAULT_ID_LENGTH)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_default_length() {
        let codec = IdCodec::default();
        let id = codec.generate().unwrap();
        assert_eq!(id.len(), DEFAULT_ID_LENGTH);
        assert!(codec.validate(&id));
    }

    #[test]
    fn test_generate_custom_length() {
        let codec = IdCodec::new(16);
        let id = codec.generate().unwrap();
        assert_eq!(id.len(), 16);
        assert!(id.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn test_generated_ids_differ() {
        let codec = IdCodec::default();
        assert_ne!(codec.generate().unwrap(), codec.generate().unwrap());
    }

    #[test]
    fn test_validate_rejects_bad_ids() {
        let codec = IdCodec::default();
        assert!(!codec.validate("tooshort"));
        assert!(!codec.validate(""));
        assert!(!codec.validate(&"a".repeat(33)));
        assert!(!codec.validate(&format!("{}-", "a".repeat(31))));
        // multi-byte characters must not sneak past the length check
        assert!(!codec.validate(&format!("{}é", "a".repeat(30))));
        assert!(codec.validate(&"aZ9".repeat(10).chars().chain("xy".chars()).collect::<String>()));
    }
}
