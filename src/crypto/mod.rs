pub mod kdf;
pub mod signature;

pub use self::kdf::{Argon2Params, PinKdf};
