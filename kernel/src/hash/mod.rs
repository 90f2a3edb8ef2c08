// Content Identifier
//
// Maps a record's identity and payload to a stable content hash.
// SHA-256 over `uid ‖ parent_uid ‖ version ‖ json` (raw bytes, no
// separators, in that order), rendered through a pluggable encoder.
//
// The hash does not depend on the revision: the same tuple always
// yields the same digest, which is what lets readers detect unchanged
// documents across revisions.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

use crate::config::ConfigError;

/// Encoded digest stored in the `hash` column.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentHash(pub String);

impl ContentHash {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Renders raw digest bytes as text.
///
/// Implementations must be deterministic and must not fail per call;
/// bad settings are rejected when the encoder is built.
pub trait DigestEncoder: Send + Sync {
    fn encode(&self, bytes: &[u8]) -> String;
}

/// Positional base-N encoding over an arbitrary ASCII alphabet.
///
/// Leading zero bytes become leading zero symbols, so digests of
/// equal length never collide through truncation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlphabetEncoder {
    alphabet: Vec<u8>,
}

const BASE62: &str = "0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";

impl AlphabetEncoder {
    pub fn new(alphabet: &str) -> Result<Self, ConfigError> {
        let bytes = alphabet.as_bytes();
        if bytes.len() < 2 {
            return Err(ConfigError("encoder alphabet needs at least two symbols".into()));
        }
        if !alphabet.is_ascii() {
            return Err(ConfigError("encoder alphabet must be ASCII".into()));
        }
        let mut seen = [false; 128];
        for &b in bytes {
            if std::mem::replace(&mut seen[b as usize], true) {
                return Err(ConfigError(format!(
                    "encoder alphabet repeats symbol `{}`",
                    b as char
                )));
            }
        }
        Ok(Self {
            alphabet: bytes.to_vec(),
        })
    }

    /// Digits, upper case, lower case. Output is purely alphanumeric.
    pub fn base62() -> Self {
        Self {
            alphabet: BASE62.as_bytes().to_vec(),
        }
    }

    pub fn base(&self) -> usize {
        self.alphabet.len()
    }
}

impl DigestEncoder for AlphabetEncoder {
    fn encode(&self, bytes: &[u8]) -> String {
        let base = self.alphabet.len() as u32;
        let zeros = bytes.iter().take_while(|b| **b == 0).count();

        // little-endian base-N digits
        let mut digits: Vec<u8> = Vec::with_capacity(bytes.len() * 2);
        for &byte in &bytes[zeros..] {
            let mut carry = byte as u32;
            for digit in digits.iter_mut() {
                carry += (*digit as u32) << 8;
                *digit = (carry % base) as u8;
                carry /= base;
            }
            while carry > 0 {
                digits.push((carry % base) as u8);
                carry /= base;
            }
        }

        let zero = self.alphabet[0] as char;
        std::iter::repeat(zero)
            .take(zeros)
            .chain(digits.iter().rev().map(|d| self.alphabet[*d as usize] as char))
            .collect()
    }
}

/// URL-safe base64 without padding.
#[derive(Debug, Clone, Copy, Default)]
pub struct Base64UrlEncoder;

impl DigestEncoder for Base64UrlEncoder {
    fn encode(&self, bytes: &[u8]) -> String {
        URL_SAFE_NO_PAD.encode(bytes)
    }
}

/// Computes content hashes for stamped records.
pub struct ContentHasher {
    encoder: Box<dyn DigestEncoder>,
}

impl Default for ContentHasher {
    fn default() -> Self {
        Self::new(Box::new(AlphabetEncoder::base62()))
    }
}

impl fmt::Debug for ContentHasher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContentHasher").finish_non_exhaustive()
    }
}

impl ContentHasher {
    pub fn new(encoder: Box<dyn DigestEncoder>) -> Self {
        Self { encoder }
    }

    /// Raw SHA-256 over the fields in hashing order.
    pub fn raw_digest(uid: &str, parent_uid: Option<&str>, version: &str, json: &str) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(uid.as_bytes());
        hasher.update(parent_uid.unwrap_or_default().as_bytes());
        hasher.update(version.as_bytes());
        hasher.update(json.as_bytes());
        hasher.finalize().into()
    }

    pub fn digest(
        &self,
        uid: &str,
        parent_uid: Option<&str>,
        version: &str,
        json: &str,
    ) -> ContentHash {
        let raw = Self::raw_digest(uid, parent_uid, version, json);
        ContentHash(self.encoder.encode(&raw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn digest_is_deterministic() {
        let hasher = ContentHasher::default();
        let a = hasher.digest("k1", None, "1.0.0", r#"{"a":1}"#);
        let b = hasher.digest("k1", None, "1.0.0", r#"{"a":1}"#);
        assert_eq!(a, b);
        assert!(a.as_str().bytes().all(|b| b.is_ascii_alphanumeric()));
    }

    #[test]
    fn missing_parent_hashes_like_empty_parent() {
        let hasher = ContentHasher::default();
        assert_eq!(
            hasher.digest("k1", None, "1.0.0", "{}"),
            hasher.digest("k1", Some(""), "1.0.0", "{}")
        );
    }

    #[test]
    fn field_order_is_the_concatenation_order() {
        let expected: [u8; 32] = Sha256::digest(b"k1p11.0.0{\"a\":1}").into();
        assert_eq!(
            ContentHasher::raw_digest("k1", Some("p1"), "1.0.0", r#"{"a":1}"#),
            expected
        );
    }

    #[test]
    fn distinct_tuples_do_not_collide() {
        let hasher = ContentHasher::default();
        let mut seen = HashSet::new();
        for uid in 0..50 {
            for version in ["1.0.0", "1.0.1", "2.0.0"] {
                let json = format!(r#"{{"n":{uid}}}"#);
                let hash = hasher.digest(&format!("uid-{uid}"), Some("root"), version, &json);
                assert!(seen.insert(hash), "collision for uid-{uid} {version}");
            }
        }
    }

    #[test]
    fn alphabet_encoder_keeps_leading_zero_bytes() {
        let enc = AlphabetEncoder::new("01").unwrap();
        assert_eq!(enc.encode(&[0, 0, 5]), "00101");
        assert_eq!(enc.encode(&[]), "");

        let hex = AlphabetEncoder::new("0123456789abcdef").unwrap();
        assert_eq!(hex.encode(&[0x01, 0xff]), "1ff");
    }

    #[test]
    fn base62_matches_known_values() {
        let enc = AlphabetEncoder::base62();
        assert_eq!(enc.encode(&[61]), "z");
        assert_eq!(enc.encode(&[62]), "10");
        assert_eq!(enc.encode(&[1, 0]), "48");
    }

    #[test]
    fn bad_alphabets_fail_at_construction() {
        assert!(AlphabetEncoder::new("a").is_err());
        assert!(AlphabetEncoder::new("abca").is_err());
        assert!(AlphabetEncoder::new("abcé").is_err());
    }

    #[test]
    fn base64_encoder_is_url_safe() {
        let hasher = ContentHasher::new(Box::new(Base64UrlEncoder));
        let hash = hasher.digest("k1", None, "1.0.0", "{}");
        assert_eq!(hash.as_str().len(), 43);
        assert!(!hash.as_str().contains(['+', '/', '=']));
    }
}
