pub mod codec;
pub mod error;
pub mod paths;
pub mod types;

pub use error::*;
pub use types::*;
