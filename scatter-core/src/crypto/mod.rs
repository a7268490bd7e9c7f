pub mod aead;
pub mod keywrap;

pub use aead::{CipherEngine, FileKey, checksum};
