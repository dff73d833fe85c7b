use std::fmt;

use aes::cipher::{block_padding::NoPadding, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use thiserror::Error;

use crate::config::AppConfig;

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

/// Number of digest applications in [`secure_hash`].
pub const HASH_ITERATIONS: u32 = 10_000;

/// Decimal ids are padded to this many characters before encryption; two AES
/// blocks, so every token has the same length regardless of the id.
const ID_BLOCK_SIZE: usize = 32;
const ID_PADDING_CHAR: char = '*';

/// Iterated unsalted SHA-256 over its own hex output. Deterministic across
/// installations; the iteration count is the brute-force cost knob. Unsalted
/// on purpose so stored hashes stay comparable between deployments.
pub fn secure_hash(plaintext: &str) -> String {
    let mut digest = hex::encode(Sha256::digest(plaintext.as_bytes()));
    for _ in 1..HASH_ITERATIONS {
        digest = hex::encode(Sha256::digest(digest.as_bytes()));
    }
    digest
}

/// Constant-time equality for digests, API keys, and deactivation tokens.
pub fn digests_match(a: &str, b: &str) -> bool {
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum IdCodecError {
    #[error("id must be a positive integer")]
    NotPositive,
    #[error("the encrypted id is not valid")]
    InvalidEncoding,
}

/// External representation of an internal id. `Plain` covers both the
/// unobfuscated configuration and the documented best-effort fallback when
/// encoding fails, so callers always have something to display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdRepr {
    Encoded(String),
    Plain(String),
}

impl IdRepr {
    pub fn as_str(&self) -> &str {
        match self {
            IdRepr::Encoded(token) | IdRepr::Plain(token) => token,
        }
    }

    pub fn into_string(self) -> String {
        match self {
            IdRepr::Encoded(token) | IdRepr::Plain(token) => token,
        }
    }
}

impl fmt::Display for IdRepr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reversible mapping between sequential internal ids and opaque URL-safe
/// tokens, so external clients cannot enumerate pastes by incrementing ids.
/// Constructed from [`AppConfig`]; there is no global cipher state.
#[derive(Clone)]
pub struct IdCodec {
    key: [u8; 32],
    iv: [u8; 16],
    encrypted_ids: bool,
}

impl IdCodec {
    pub fn new(config: &AppConfig) -> Self {
        // Key material is digest-derived so any configured string works.
        let key: [u8; 32] = Sha256::digest(config.id_encryption_key.as_bytes()).into();
        let mut iv = [0u8; 16];
        iv.copy_from_slice(&Sha256::digest(config.id_encryption_iv.as_bytes())[..16]);
        Self {
            key,
            iv,
            encrypted_ids: config.use_encrypted_ids,
        }
    }

    /// Encrypts a positive id into a URL-safe token. The base64 alphabet's
    /// `/` and `+` become `-` and `~`; trailing `=` padding is stripped.
    pub fn encode(&self, id: i64) -> Result<String, IdCodecError> {
        if id <= 0 {
            return Err(IdCodecError::NotPositive);
        }
        let mut padded = id.to_string();
        while padded.len() % ID_BLOCK_SIZE != 0 {
            padded.push(ID_PADDING_CHAR);
        }
        let ciphertext = Aes256CbcEnc::new(&self.key.into(), &self.iv.into())
            .encrypt_padded_vec_mut::<NoPadding>(padded.as_bytes());
        let token = BASE64_STANDARD
            .encode(ciphertext)
            .replace('/', "-")
            .replace('+', "~");
        Ok(token.trim_end_matches('=').to_string())
    }

    /// Decodes an external token back to the internal id.
    ///
    /// When ids are configured unobfuscated, a token that already parses as a
    /// positive integer passes straight through without touching the cipher;
    /// anything else fails unless `force` requests a decryption attempt
    /// anyway.
    pub fn decode(&self, token: &str, force: bool) -> Result<i64, IdCodecError> {
        if let Ok(id) = token.parse::<i64>() {
            if id > 0 && !self.encrypted_ids {
                return Ok(id);
            }
        }
        if !self.encrypted_ids && !force {
            return Err(IdCodecError::InvalidEncoding);
        }

        let mut restored: String = token
            .chars()
            .map(|c| match c {
                '-' => '/',
                '~' => '+',
                c => c,
            })
            .collect();
        while restored.len() % 4 != 0 {
            restored.push('=');
        }
        let ciphertext = BASE64_STANDARD
            .decode(restored)
            .map_err(|_| IdCodecError::InvalidEncoding)?;
        let plaintext = Aes256CbcDec::new(&self.key.into(), &self.iv.into())
            .decrypt_padded_vec_mut::<NoPadding>(&ciphertext)
            .map_err(|_| IdCodecError::InvalidEncoding)?;
        let decoded = String::from_utf8(plaintext).map_err(|_| IdCodecError::InvalidEncoding)?;
        let id: i64 = decoded
            .trim_end_matches(ID_PADDING_CHAR)
            .parse()
            .map_err(|_| IdCodecError::InvalidEncoding)?;
        if id <= 0 {
            return Err(IdCodecError::InvalidEncoding);
        }
        Ok(id)
    }

    /// The single outbound conversion: honors the configured mode, and on an
    /// encoding failure deliberately falls back to the raw decimal id rather
    /// than propagating the error. The fallback is visible in the return
    /// type, not hidden behind a blanket catch.
    pub fn represent(&self, id: i64) -> IdRepr {
        if !self.encrypted_ids {
            return IdRepr::Plain(id.to_string());
        }
        match self.encode(id) {
            Ok(token) => IdRepr::Encoded(token),
            Err(err) => {
                log::warn!("id {id} could not be encoded ({err}); emitting raw id");
                IdRepr::Plain(id.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn codec(encrypted: bool) -> IdCodec {
        IdCodec::new(&AppConfig {
            use_encrypted_ids: encrypted,
            id_encryption_key: "unit-test-key".into(),
            id_encryption_iv: "unit-test-iv".into(),
            ..AppConfig::default()
        })
    }

    #[test]
    fn secure_hash_is_deterministic_hex() {
        let digest = secure_hash("hunter2");
        assert_eq!(digest, secure_hash("hunter2"));
        assert_eq!(digest.len(), 64);
        assert!(digest.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(digest, secure_hash("hunter3"));
    }

    #[test]
    fn secure_hash_is_iterated() {
        // One plain application of SHA-256 must not match.
        let single = hex::encode(Sha256::digest("hunter2".as_bytes()));
        assert_ne!(single, secure_hash("hunter2"));
    }

    #[test]
    fn encode_rejects_non_positive_ids() {
        let codec = codec(true);
        assert_eq!(codec.encode(0), Err(IdCodecError::NotPositive));
        assert_eq!(codec.encode(-3), Err(IdCodecError::NotPositive));
    }

    #[test]
    fn decode_rejects_garbage() {
        let codec = codec(true);
        assert!(codec.decode("definitely not a token", false).is_err());
        assert!(codec.decode("AAAA", false).is_err());
        assert!(codec.decode("", false).is_err());
    }

    #[test]
    fn plain_mode_passes_integers_through() {
        let codec = codec(false);
        assert_eq!(codec.decode("15", false), Ok(15));
        assert_eq!(codec.represent(15), IdRepr::Plain("15".into()));
        assert!(codec.decode("abc", false).is_err());
    }

    #[test]
    fn plain_mode_force_still_decrypts() {
        let encrypting = codec(true);
        let plain = codec(false);
        let token = encrypting.encode(42).unwrap();
        assert!(plain.decode(&token, false).is_err());
        assert_eq!(plain.decode(&token, true), Ok(42));
    }

    #[test]
    fn represent_matches_encode_in_encrypted_mode() {
        let codec = codec(true);
        let repr = codec.represent(7);
        assert_eq!(repr, IdRepr::Encoded(codec.encode(7).unwrap()));
        assert_eq!(codec.decode(repr.as_str(), false), Ok(7));
    }

    #[test]
    fn digests_match_requires_equality() {
        assert!(digests_match("abcdef", "abcdef"));
        assert!(!digests_match("abcdef", "abcdeg"));
        assert!(!digests_match("abc", "abcdef"));
    }
}
