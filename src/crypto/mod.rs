//! Cryptographic primitives for the OT wire protocol: XTEA session
//! encryption, raw RSA for the login key exchange, and Adler-32 frame
//! checksums.

pub mod checksum;
pub mod rsa;
pub mod xtea;

pub use checksum::adler32;
pub use rsa::RsaKey;
pub use xtea::XteaKey;
