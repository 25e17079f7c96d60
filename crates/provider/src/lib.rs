//! Control-plane seam for the foundation orchestrator.
//!
//! Every phase reaches the cloud through [`CloudProvider`]. Two
//! implementations ship here: [`MemoryProvider`], a deterministic simulated
//! control plane (optionally persisted to a local state file), and
//! `GatewayProvider`, which forwards each call to an HTTP control-plane
//! gateway. The [`conformance`] module checks any implementation against the
//! behaviors the phases depend on.

pub mod conformance;
mod error;
#[cfg(feature = "gateway")]
mod gateway;
mod memory;
mod operation;
mod records;
mod traits;

pub use error::ProviderError;
#[cfg(feature = "gateway")]
pub use gateway::GatewayProvider;
pub use memory::{Call, Fault, MemoryProvider};
pub use operation::Operation;
pub use records::*;
pub use traits::CloudProvider;
