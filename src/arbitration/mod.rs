//! Split-brain arbitration
//!
//! - `wire`: the JSON claim and verdict exchanged with the referee
//! - `ArbitratorTransport`: how the claim travels (`HttpArbitratorTransport`)
//! - `ArbitratorClient`: when to ask, and what the verdict does to the cluster
//!
//! Losing never moves the leader role. The monitor goes standby, which the
//! precondition gate reads on the next tick.

mod client;
mod errors;
mod transport;
mod wire;

pub use client::{ArbitrationOutcome, ArbitratorClient, MAX_ATTEMPTS};
pub use errors::{ArbitrationError, ArbitrationResult};
pub use transport::{ArbitratorTransport, HttpArbitratorTransport};
pub use wire::{ArbitrationRequest, ArbitrationResponse, WINNER};
