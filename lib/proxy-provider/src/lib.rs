//! Tenant network provider integration
pub mod driver;
pub mod error;
pub mod neutron;
pub mod resolver;

pub use driver::{Network, NetworkDriver, Port};
pub use error::{ProviderError, Result};
pub use neutron::NeutronClient;
pub use resolver::{network_name, RouterResolver};
