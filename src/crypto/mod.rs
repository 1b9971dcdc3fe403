pub mod jwt;
pub mod password;

pub use jwt::*;
pub use password::*;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("Malformed password hash")]
    MalformedHash,

    #[error("Invalid token")]
    InvalidToken,

    #[error("Token expired")]
    TokenExpired,

    #[error("Invalid signing key")]
    InvalidKey,

    #[error("Token lifetime out of range")]
    LifetimeOutOfRange,
}
