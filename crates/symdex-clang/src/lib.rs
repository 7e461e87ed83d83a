pub mod parser;
pub mod scripted;

#[cfg(feature = "libclang")]
pub mod libclang;

pub use parser::*;
