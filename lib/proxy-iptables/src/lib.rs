//! Namespace-scoped iptables programming
//!
//! This library provides:
//! - A `CommandRunner` seam over subprocess execution, with a timeout-bounded
//!   `tokio::process` implementation
//! - Idempotent chain/rule primitives and atomic `iptables-restore` inside a
//!   target network namespace

pub mod error;
pub mod exec;
pub mod iptables;

pub use error::{IptablesError, Result};
pub use exec::{CommandOutput, CommandRunner, ExecRunner};
pub use iptables::{Iptables, CHAIN_PREROUTING, TABLE_NAT};
