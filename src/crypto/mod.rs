pub mod cbc;
pub mod gcm;
pub mod hkdf;
pub mod key_pair;
pub mod xed25519;
