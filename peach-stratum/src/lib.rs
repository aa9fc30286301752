//! Line-oriented Stratum v1 client: connect, authorize, receive jobs, and
//! submit shares, without blocking the cooperative mining loop for more
//! than a single bounded socket read per tick.

pub mod client;
pub mod job;
pub mod wire;

pub use client::{StratumClient, StratumConfig, State};
pub use job::StratumJob;
