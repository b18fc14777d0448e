use num_bigint::BigUint;
use num_traits::Num;

use crate::error::{Error, Result};

/// RSA block size for the 1024-bit OTClient key.
pub const RSA_BLOCK_BYTES: usize = 128;

// Default OTClient RSA key, shared by most OTS servers. The client
// encrypts its login block with this public key, so knowing d lets the
// proxy read the XTEA key without patching the client.
const DEFAULT_RSA_N: &str = "109120132967399429278860960508995541528237502902798129123468757937266291492576446330739696001110603907230888610072655818825358503429057592827629436413108566029093628212635953836686562675849720620786279431090218017681061521755056710823876476444260558147179707119674283982419152118103759076030616683978566631413";
const DEFAULT_RSA_E: &str = "65537";
const DEFAULT_RSA_D: &str = "46730330223584118622160180015036832148732986808519344675210555262940258739805766860224610646919605860206328024326703361630109888417839241959507572247284807035235569619173792292786907845791904955103601652822519121908367187885509270025388641700821735345222087940578381210879116823013776808975766851829020659073";

/// Raw (textbook) RSA key — OT clients use plain modular exponentiation
/// with no padding scheme.
#[derive(Debug, Clone)]
pub struct RsaKey {
    n: BigUint,
    e: BigUint,
    d: BigUint,
}

impl RsaKey {
    pub fn new(n: BigUint, e: BigUint, d: BigUint) -> Self {
        Self { n, e, d }
    }

    /// The well-known default OTClient key.
    pub fn default_client_key() -> Result<Self> {
        let parse = |s: &str| {
            BigUint::from_str_radix(s, 10)
                .map_err(|e| Error::Setup(format!("bad RSA constant: {e}")))
        };
        Ok(Self {
            n: parse(DEFAULT_RSA_N)?,
            e: parse(DEFAULT_RSA_E)?,
            d: parse(DEFAULT_RSA_D)?,
        })
    }

    /// Decrypt a 128-byte block: `m = c^d mod n`, big-endian.
    pub fn decrypt(&self, block: &[u8]) -> Result<[u8; RSA_BLOCK_BYTES]> {
        self.modpow(block, &self.d)
    }

    /// Encrypt a block of at most 128 bytes: `c = m^e mod n`, big-endian.
    pub fn encrypt(&self, block: &[u8]) -> Result<[u8; RSA_BLOCK_BYTES]> {
        self.modpow(block, &self.e)
    }

    fn modpow(&self, block: &[u8], exponent: &BigUint) -> Result<[u8; RSA_BLOCK_BYTES]> {
        if block.len() > RSA_BLOCK_BYTES {
            return Err(Error::InvalidPacket(format!(
                "RSA block too large: {} bytes",
                block.len()
            )));
        }
        let value = BigUint::from_bytes_be(block);
        let result = value.modpow(exponent, &self.n);
        let bytes = result.to_bytes_be();

        // Left-pad to exactly 128 bytes.
        let mut out = [0u8; RSA_BLOCK_BYTES];
        out[RSA_BLOCK_BYTES - bytes.len()..].copy_from_slice(&bytes);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip_sentinel_block() {
        // Login block layout: 0x00 sentinel, then 16 bytes of XTEA key.
        let key = RsaKey::default_client_key().unwrap();
        let mut block = [0u8; RSA_BLOCK_BYTES];
        block[1..17].copy_from_slice(&[
            0xCA, 0xFE, 0xBA, 0xBE, 0xDE, 0xAD, 0xBE, 0xEF, 0x01, 0x23, 0x45, 0x67, 0x00, 0x00,
            0x00, 0x00,
        ]);
        let encrypted = key.encrypt(&block).unwrap();
        let decrypted = key.decrypt(&encrypted).unwrap();
        assert_eq!(decrypted[0], 0x00);
        assert_eq!(decrypted[1..17], block[1..17]);
        assert_eq!(decrypted, block);
    }

    #[test]
    fn test_output_is_always_128_bytes() {
        let key = RsaKey::default_client_key().unwrap();
        let encrypted = key.encrypt(&[0x01]).unwrap();
        assert_eq!(encrypted.len(), RSA_BLOCK_BYTES);
        let decrypted = key.decrypt(&encrypted).unwrap();
        assert_eq!(decrypted[RSA_BLOCK_BYTES - 1], 0x01);
        assert!(decrypted[..RSA_BLOCK_BYTES - 1].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_oversized_block_rejected() {
        let key = RsaKey::default_client_key().unwrap();
        assert!(key.encrypt(&[0u8; 129]).is_err());
    }
}
