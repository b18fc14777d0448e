//! Login interception: pulls the XTEA key out of the client's
//! RSA-encrypted login block and rewrites the game-server address in the
//! character-list reply so the client reconnects through the proxy.

use std::net::Ipv4Addr;

use tracing::{debug, info, warn};

use crate::crypto::rsa::RSA_BLOCK_BYTES;
use crate::crypto::{adler32, RsaKey, XteaKey};
use crate::protocol::session::strip_checksum;

/// Minimum frame size that can carry an RSA block: protocol byte plus
/// some header fields in front of the 128-byte block.
const MIN_LOGIN_FRAME: usize = RSA_BLOCK_BYTES + 5;

/// Try to capture the XTEA key from a client login frame.
///
/// The RSA block position varies by client build, so we trial-decrypt:
/// the last 128 bytes first (the common layout), then every earlier
/// offset. A decryption is accepted when the leading sentinel byte is
/// `0x00`; bytes 1..17 are then the four little-endian key words. The
/// frame itself is always forwarded unchanged — the upstream server
/// holds the same RSA key.
pub fn capture_xtea_key(frame: &[u8], keys: &[&RsaKey]) -> Option<XteaKey> {
    let body = strip_checksum(frame);
    if body.len() < MIN_LOGIN_FRAME {
        debug!(len = body.len(), "frame too small for an RSA block");
        return None;
    }

    let last_offset = body.len() - RSA_BLOCK_BYTES;
    let offsets = std::iter::once(last_offset).chain((1..last_offset).rev());

    for (key_idx, key) in keys.iter().enumerate() {
        for offset in offsets.clone() {
            let block = &body[offset..offset + RSA_BLOCK_BYTES];
            let Ok(decrypted) = key.decrypt(block) else {
                continue;
            };
            if decrypted[0] != 0x00 {
                continue;
            }
            let mut key_bytes = [0u8; 16];
            key_bytes.copy_from_slice(&decrypted[1..17]);
            let xtea = XteaKey::from_bytes(key_bytes);
            info!(
                offset,
                key = if key_idx == 0 { "default" } else { "fallback" },
                "RSA block found, XTEA key captured"
            );
            return Some(xtea);
        }
    }

    warn!("no RSA block yielded the 0x00 sentinel; forwarding login frame as-is");
    None
}

/// Rewrite the character-list reply so every occurrence of the game
/// server's address — packed 4-byte and ASCII-decimal — points at
/// loopback. Returns the re-sealed frame body, or `None` when the reply
/// cannot be decrypted (it is then forwarded unmodified).
pub fn rewrite_character_list(frame: &[u8], key: &XteaKey, server_ip: Ipv4Addr) -> Option<Vec<u8>> {
    let had_checksum = frame.len() != strip_checksum(frame).len();
    let encrypted = strip_checksum(frame);
    if encrypted.len() % 8 != 0 {
        warn!(len = encrypted.len(), "login reply not 8-byte aligned");
        return None;
    }

    let decrypted = key.decrypt(encrypted).ok()?;
    if decrypted.len() < 2 {
        return None;
    }
    let inner_len = u16::from_le_bytes([decrypted[0], decrypted[1]]) as usize;
    if inner_len > decrypted.len() - 2 {
        return None;
    }

    let mut payload = decrypted[2..2 + inner_len].to_vec();
    let mut replaced = 0usize;
    replaced += replace_all(&mut payload, &server_ip.octets(), &[127, 0, 0, 1]);

    let ip_str = server_ip.to_string().into_bytes();
    let mut loopback_str = b"127.0.0.1".to_vec();
    loopback_str.resize(ip_str.len().max(9), 0);
    replaced += replace_all(&mut payload, &ip_str, &loopback_str[..ip_str.len()]);

    if replaced == 0 {
        warn!(%server_ip, "no server address found in character list");
    } else {
        info!(replaced, "rewrote game server address to loopback");
    }

    // Rebuild the inner buffer with the original padding tail so the
    // ciphertext length is unchanged.
    let mut inner = Vec::with_capacity(decrypted.len());
    inner.extend_from_slice(&(payload.len() as u16).to_le_bytes());
    inner.extend_from_slice(&payload);
    inner.extend_from_slice(&decrypted[inner.len()..]);

    let sealed = key.encrypt(&inner);
    if had_checksum {
        let mut out = Vec::with_capacity(sealed.len() + 4);
        out.extend_from_slice(&adler32(&sealed).to_le_bytes());
        out.extend_from_slice(&sealed);
        Some(out)
    } else {
        Some(sealed)
    }
}

/// Replace every occurrence of `needle`, zero-padding in place so the
/// payload length is preserved. Returns the replacement count.
fn replace_all(haystack: &mut [u8], needle: &[u8], replacement: &[u8]) -> usize {
    debug_assert!(replacement.len() <= needle.len());
    if needle.is_empty() || haystack.len() < needle.len() {
        return 0;
    }
    let mut count = 0;
    let mut i = 0;
    while i + needle.len() <= haystack.len() {
        if &haystack[i..i + needle.len()] == needle {
            haystack[i..i + replacement.len()].copy_from_slice(replacement);
            for byte in &mut haystack[i + replacement.len()..i + needle.len()] {
                *byte = 0;
            }
            count += 1;
            i += needle.len();
        } else {
            i += 1;
        }
    }
    count
}
