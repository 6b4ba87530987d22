//! CLI command implementations.

pub mod keygen;
pub mod replay;
pub mod seal;
