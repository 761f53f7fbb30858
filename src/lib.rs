pub mod auth;
pub mod cache;
pub mod config;
pub mod error;
pub mod lease;
pub mod manifest;
pub mod media;
pub mod persist;
pub mod proxy;
pub mod server;
pub mod sync;
pub mod token;

pub use error::Error;
pub type Result<T> = std::result::Result<T, Error>;
