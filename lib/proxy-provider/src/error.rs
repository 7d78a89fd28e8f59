use thiserror::Error;

pub type Result<T> = std::result::Result<T, ProviderError>;

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("Network not found: {0}")]
    NetworkNotFound(String),

    #[error("No router attached to network {0}")]
    RouterNotFound(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Networking API returned {status}: {body}")]
    Api { status: u16, body: String },

    #[error("Invalid provider configuration: {0}")]
    InvalidConfiguration(String),
}

impl ProviderError {
    /// Missing network or router: the tenant is simply not provisioned yet
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            ProviderError::NetworkNotFound(_) | ProviderError::RouterNotFound(_)
        )
    }
}
