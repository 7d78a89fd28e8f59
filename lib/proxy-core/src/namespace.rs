//! Namespace metadata and its resolved router

use k8s_openapi::api::core::v1::Namespace;
use kube::ResourceExt;

/// Namespace name plus the provider router it routes through.
///
/// The router is resolved lazily and, once known, kept until the namespace
/// is deleted.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NamespaceInfo {
    pub name: String,
    pub router: Option<String>,
}

impl NamespaceInfo {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            router: None,
        }
    }

    pub fn with_router(mut self, router: impl Into<String>) -> Self {
        self.router = Some(router.into());
        self
    }
}

/// Translate a Namespace object. The router is never known at this point.
pub fn namespace_to_namespace_info(namespace: Option<&Namespace>) -> Option<NamespaceInfo> {
    namespace.map(|ns| NamespaceInfo::new(ns.name_any()))
}
