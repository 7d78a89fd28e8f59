use proxy_iptables::IptablesError;
use thiserror::Error;

/// Why one namespace's sync was aborted
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("failed to ensure chain {chain} in {netns}: {source}")]
    EnsureChain {
        netns: String,
        chain: String,
        #[source]
        source: IptablesError,
    },

    #[error("failed to link chain {chain} from {from} in {netns}: {source}")]
    LinkChain {
        netns: String,
        chain: String,
        from: String,
        #[source]
        source: IptablesError,
    },

    #[error("failed to restore rules in {netns}: {source}")]
    Restore {
        netns: String,
        #[source]
        source: IptablesError,
    },
}

impl SyncError {
    /// Short stage label, used for metrics
    pub fn stage(&self) -> &'static str {
        match self {
            SyncError::EnsureChain { .. } => "ensure_chain",
            SyncError::LinkChain { .. } => "link_chain",
            SyncError::Restore { .. } => "restore",
        }
    }
}
