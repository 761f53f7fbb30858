pub mod path;
pub mod stream;
