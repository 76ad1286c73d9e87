use async_trait::async_trait;
use bytes::Bytes;
use mockall::automock;
use thiserror::Error;

use crate::value_objects::enums::signer_roles::SignerRole;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SigningProviderError {
    #[error("signing provider unreachable: {0}")]
    Transport(String),
    #[error("signing provider returned status {code}")]
    Status { code: u16 },
    #[error("unexpected signing provider response: {0}")]
    Decode(String),
}

impl SigningProviderError {
    /// Network failures and 5xx answers are worth another attempt.
    pub fn is_transient(&self) -> bool {
        match self {
            SigningProviderError::Transport(_) => true,
            SigningProviderError::Status { code } => *code >= 500,
            SigningProviderError::Decode(_) => false,
        }
    }
}

pub type SigningProviderResult<T> = std::result::Result<T, SigningProviderError>;

#[async_trait]
#[automock]
pub trait SigningProvider {
    /// Returns the one-time signing URL, or `None` when the provider answered without one.
    async fn create_signing_session(
        &self,
        contract_number: &str,
        role: SignerRole,
        return_url: &str,
    ) -> SigningProviderResult<Option<String>>;

    /// Asks the provider to refresh its view of the envelope server-side.
    async fn refresh_status(&self, contract_number: &str) -> SigningProviderResult<()>;

    async fn download_combined(&self, contract_number: &str) -> SigningProviderResult<Bytes>;
}
