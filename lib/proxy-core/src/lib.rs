//! Core state tracking for the tenant service proxy
//!
//! This library provides:
//! - Service-port, endpoint and namespace snapshots translated from API objects
//! - Change trackers that coalesce watch notifications between syncs
//! - The canonical proxy state and its merge logic

pub mod change_tracker;
pub mod endpoint;
pub mod event;
pub mod namespace;
pub mod service;
pub mod state;

pub use change_tracker::{
    Change, ChangeTracker, Changes, EndpointsChangeTracker, NamespaceChangeTracker,
    ServiceChangeTracker,
};
pub use endpoint::{EndpointInfo, EndpointsMap};
pub use event::WatchEvent;
pub use namespace::NamespaceInfo;
pub use service::{ServiceInfo, ServiceMap, ServicePortName, ServiceType};
pub use state::{NamespaceServices, ProxyState};
