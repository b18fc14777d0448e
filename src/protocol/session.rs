use std::time::Instant;

use crate::crypto::{adler32, XteaKey};
use crate::error::{Error, Result};

/// Which listener this session came in on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionRole {
    Login,
    Game,
}

/// Per-connection cryptographic state plus life-cycle timestamps.
///
/// Decrypt/encrypt are pure functions of the captured XTEA key; calling
/// either without a key is a programmer error surfaced as `NotKeyed`.
#[derive(Debug)]
pub struct Session {
    role: SessionRole,
    key: Option<XteaKey>,
    logged_in: bool,
    pub ts_created: Instant,
    pub ts_client_connected: Option<Instant>,
    pub ts_server_connected: Option<Instant>,
    pub ts_key_captured: Option<Instant>,
    pub ts_logged_in: Option<Instant>,
}

impl Session {
    pub fn new(role: SessionRole) -> Self {
        Self {
            role,
            key: None,
            logged_in: false,
            ts_created: Instant::now(),
            ts_client_connected: None,
            ts_server_connected: None,
            ts_key_captured: None,
            ts_logged_in: None,
        }
    }

    pub fn role(&self) -> SessionRole {
        self.role
    }

    pub fn key(&self) -> Option<XteaKey> {
        self.key
    }

    pub fn has_key(&self) -> bool {
        self.key.is_some()
    }

    pub fn set_key(&mut self, key: XteaKey) {
        self.key = Some(key);
        self.ts_key_captured = Some(Instant::now());
    }

    pub fn logged_in(&self) -> bool {
        self.logged_in
    }

    pub fn mark_logged_in(&mut self) {
        self.logged_in = true;
        self.ts_logged_in = Some(Instant::now());
    }

    /// Reset crypto state for a fresh client connection on this listener.
    pub fn reset(&mut self) {
        self.key = None;
        self.logged_in = false;
        self.ts_client_connected = Some(Instant::now());
        self.ts_server_connected = None;
        self.ts_key_captured = None;
        self.ts_logged_in = None;
    }

    /// Decrypt a raw frame body: strip the optional Adler-32 prefix,
    /// XTEA-decrypt, validate the inner length, return the inner bytes.
    /// Any inconsistency yields `Ok(None)` — a malformed frame is dropped,
    /// never a session error.
    pub fn decrypt_frame(&self, raw: &[u8]) -> Result<Option<Vec<u8>>> {
        let key = self.key.ok_or(Error::NotKeyed)?;

        let encrypted = strip_checksum(raw);
        if encrypted.is_empty() || encrypted.len() % 8 != 0 {
            return Ok(None);
        }

        let decrypted = match key.decrypt(encrypted) {
            Ok(d) => d,
            Err(_) => return Ok(None),
        };
        if decrypted.len() < 2 {
            return Ok(None);
        }
        let inner_len = u16::from_le_bytes([decrypted[0], decrypted[1]]) as usize;
        if inner_len > decrypted.len() - 2 {
            return Ok(None);
        }
        Ok(Some(decrypted[2..2 + inner_len].to_vec()))
    }

    /// Seal a payload for the wire: `adler32 || xtea(u16 len || payload || pad)`.
    pub fn encrypt_payload(&self, payload: &[u8]) -> Result<Vec<u8>> {
        let key = self.key.ok_or(Error::NotKeyed)?;

        let mut inner = Vec::with_capacity(payload.len() + 2);
        inner.extend_from_slice(&(payload.len() as u16).to_le_bytes());
        inner.extend_from_slice(payload);

        let encrypted = key.encrypt(&inner);
        let checksum = adler32(&encrypted);

        let mut out = Vec::with_capacity(encrypted.len() + 4);
        out.extend_from_slice(&checksum.to_le_bytes());
        out.extend_from_slice(&encrypted);
        Ok(out)
    }
}

/// Detect and strip the optional 4-byte Adler-32 prefix. The checksum is
/// recognized only when it verifies against the rest of the frame.
pub fn strip_checksum(raw: &[u8]) -> &[u8] {
    if raw.len() > 4 {
        let prefix = u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]);
        if prefix == adler32(&raw[4..]) {
            return &raw[4..];
        }
    }
    raw
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keyed_session() -> Session {
        let mut session = Session::new(SessionRole::Game);
        session.set_key(XteaKey::from_words([0xBABE_FECA, 0xEFBE_ADDE, 0x6745_2301, 0]));
        session
    }

    #[test]
    fn test_unkeyed_session_errors() {
        let session = Session::new(SessionRole::Game);
        assert!(matches!(session.decrypt_frame(&[0u8; 16]), Err(Error::NotKeyed)));
        assert!(matches!(session.encrypt_payload(b"x"), Err(Error::NotKeyed)));
    }

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let session = keyed_session();
        let payload = [0xA0u8, 1, 2, 3, 4, 5];
        let frame = session.encrypt_payload(&payload).unwrap();
        // Checksum prefix present and ciphertext aligned.
        assert_eq!((frame.len() - 4) % 8, 0);
        let inner = session.decrypt_frame(&frame).unwrap().unwrap();
        assert_eq!(inner, payload);
    }

    #[test]
    fn test_decrypt_without_checksum() {
        let session = keyed_session();
        let frame = session.encrypt_payload(b"hello").unwrap();
        // Drop the checksum; detection must still cope.
        let inner = session.decrypt_frame(&frame[4..]).unwrap().unwrap();
        assert_eq!(inner, b"hello");
    }

    #[test]
    fn test_decrypt_garbage_is_none() {
        let session = keyed_session();
        assert!(session.decrypt_frame(&[1, 2, 3]).unwrap().is_none());
        // Aligned garbage decrypts to an implausible inner length.
        assert!(session.decrypt_frame(&[0xFF; 8]).unwrap().is_none());
    }

    #[test]
    fn test_strip_checksum_only_when_valid() {
        let body = [9u8, 8, 7, 6, 5];
        let mut framed = adler32(&body).to_le_bytes().to_vec();
        framed.extend_from_slice(&body);
        assert_eq!(strip_checksum(&framed), &body);

        // Corrupt checksum: frame passes through untouched.
        framed[0] ^= 0xFF;
        assert_eq!(strip_checksum(&framed), &framed[..]);
    }

    #[test]
    fn test_session_lifecycle_flags() {
        let mut session = Session::new(SessionRole::Game);
        assert!(!session.logged_in());
        session.set_key(XteaKey::from_words([1, 2, 3, 4]));
        session.mark_logged_in();
        assert!(session.logged_in());
        session.reset();
        assert!(!session.logged_in());
        assert!(!session.has_key());
    }
}
