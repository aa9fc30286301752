//! Shared types and wire codec for the Peach mining worker.
//!
//! This crate has no GPU or network dependency: it is the common vocabulary
//! `peach-device` and `peach-stratum` both build on.

pub mod error;
pub mod trailer;

pub use error::{Error, Result};
pub use trailer::{BTrailer, Difficulty, BTRAILER_LEN};
