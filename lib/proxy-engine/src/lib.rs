//! Rule synchronization engine
//!
//! This library provides:
//! - A bounded-frequency runner that turns bursts of change notifications
//!   into spaced sync ticks
//! - NAT rule synthesis for tenant router namespaces
//! - The `Proxier`, which owns canonical state and drives each tick

pub mod error;
pub mod metrics;
pub mod proxier;
pub mod rules;
pub mod runner;

pub use error::SyncError;
pub use metrics::SyncMetrics;
pub use proxier::{NamespaceSync, Proxier, ProxierConfig};
pub use rules::{build_nat_script, router_netns_name, NatScript, STACKUBE_PREROUTING_CHAIN};
pub use runner::BoundedFrequencyRunner;
