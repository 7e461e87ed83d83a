//! Value codec for the four on-disk tables. Everything stored in the KV
//! databases goes through these two helpers so the wire format stays in one
//! place: bincode's standard configuration over the derive impls on the
//! core types.

use crate::error::{Result, SymdexError};

pub fn to_bytes<T: bincode::Encode>(value: &T) -> Result<Vec<u8>> {
    bincode::encode_to_vec(value, bincode::config::standard())
        .map_err(|e| SymdexError::Serialization(e.to_string()))
}

pub fn from_bytes<T: bincode::Decode<()>>(bytes: &[u8]) -> Result<T> {
    bincode::decode_from_slice(bytes, bincode::config::standard())
        .map(|(value, _)| value)
        .map_err(|e| SymdexError::Serialization(e.to_string()))
}
