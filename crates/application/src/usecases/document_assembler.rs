use std::{fmt::Display, io::Write, path::Path, str::FromStr, sync::Arc};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use domain::repositories::signing_provider::SigningProvider;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, error, info};

use crate::usecases::contract_envelopes::ContractEnvelopeStore;

/// When the combined document may be downloaded.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DocumentPolicy {
    /// Any existing envelope, so a partially executed contract can be previewed.
    #[default]
    AllowPartial,
    RequireBothSigned,
}

impl DocumentPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentPolicy::AllowPartial => "allow_partial",
            DocumentPolicy::RequireBothSigned => "require_both_signed",
        }
    }
}

impl Display for DocumentPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DocumentPolicy {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "allow_partial" | "partial" => Ok(DocumentPolicy::AllowPartial),
            "require_both_signed" | "both_signed" => Ok(DocumentPolicy::RequireBothSigned),
            other => Err(format!("unknown document policy: {other}")),
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DocumentError {
    /// Expected while the envelope is missing or not signed enough for the policy.
    #[error("signed document is not available yet: {0}")]
    DocumentUnavailable(&'static str),
    #[error("failed to fetch signed document: {0}")]
    FetchFailed(String),
}

impl DocumentError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, DocumentError::FetchFailed(_))
    }
}

/// Locally held copy of the combined PDF. The backing temp file is removed
/// when the artifact is dropped.
#[derive(Debug)]
pub struct SignedDocumentArtifact {
    contract_number: String,
    file: NamedTempFile,
    size: usize,
    fetched_at: DateTime<Utc>,
}

impl SignedDocumentArtifact {
    pub fn contract_number(&self) -> &str {
        &self.contract_number
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn fetched_at(&self) -> DateTime<Utc> {
        self.fetched_at
    }

    pub async fn read(&self) -> std::io::Result<Bytes> {
        tokio::fs::read(self.path()).await.map(Bytes::from)
    }
}

impl Drop for SignedDocumentArtifact {
    fn drop(&mut self) {
        debug!(
            contract_number = %self.contract_number,
            path = %self.file.path().display(),
            "document_assembler: artifact released"
        );
    }
}

/// Holds at most one artifact. Replacing or clearing releases the previous one first.
#[derive(Debug, Default)]
pub struct ArtifactSlot {
    current: Mutex<Option<SignedDocumentArtifact>>,
}

impl ArtifactSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn replace(&self, artifact: SignedDocumentArtifact) {
        let mut current = self.current.lock().await;
        if let Some(previous) = current.take() {
            drop(previous);
        }
        *current = Some(artifact);
    }

    pub async fn clear(&self) {
        self.current.lock().await.take();
    }

    pub async fn is_loaded(&self) -> bool {
        self.current.lock().await.is_some()
    }

    pub async fn contract_number(&self) -> Option<String> {
        self.current
            .lock()
            .await
            .as_ref()
            .map(|artifact| artifact.contract_number().to_string())
    }

    /// Reads the held artifact, if any, while keeping it alive.
    pub async fn read(&self) -> Option<std::io::Result<Bytes>> {
        let current = self.current.lock().await;
        match current.as_ref() {
            Some(artifact) => Some(artifact.read().await),
            None => None,
        }
    }
}

pub struct DocumentAssembler<S>
where
    S: SigningProvider + Send + Sync + 'static,
{
    signing_provider: Arc<S>,
    store: Arc<ContractEnvelopeStore>,
    policy: DocumentPolicy,
}

impl<S> DocumentAssembler<S>
where
    S: SigningProvider + Send + Sync + 'static,
{
    pub fn new(
        signing_provider: Arc<S>,
        store: Arc<ContractEnvelopeStore>,
        policy: DocumentPolicy,
    ) -> Self {
        Self {
            signing_provider,
            store,
            policy,
        }
    }

    pub fn policy(&self) -> DocumentPolicy {
        self.policy
    }

    /// Whether a fetch would be attempted for this booking right now.
    pub fn is_ready(&self, booking_id: i64) -> bool {
        self.readiness(booking_id).is_ok()
    }

    pub async fn fetch_combined(
        &self,
        booking_id: i64,
    ) -> Result<SignedDocumentArtifact, DocumentError> {
        let contract_number = self.readiness(booking_id)?;

        info!(
            booking_id,
            contract_number,
            policy = %self.policy,
            "document_assembler: downloading combined document"
        );

        let payload = self
            .signing_provider
            .download_combined(&contract_number)
            .await
            .map_err(|err| {
                error!(
                    booking_id,
                    contract_number,
                    provider_error = ?err,
                    "document_assembler: download failed"
                );
                DocumentError::FetchFailed(err.to_string())
            })?;

        if payload.is_empty() {
            error!(
                booking_id,
                contract_number, "document_assembler: provider returned an empty document"
            );
            return Err(DocumentError::FetchFailed("empty document".to_string()));
        }

        let size = payload.len();
        let file = tokio::task::spawn_blocking(move || -> std::io::Result<NamedTempFile> {
            let mut file = tempfile::Builder::new()
                .prefix("contract-")
                .suffix(".pdf")
                .tempfile()?;
            file.write_all(&payload)?;
            file.flush()?;
            Ok(file)
        })
        .await
        .map_err(|err| DocumentError::FetchFailed(format!("artifact writer panicked: {err}")))?
        .map_err(|err| {
            error!(
                booking_id,
                io_error = ?err,
                "document_assembler: failed to store artifact locally"
            );
            DocumentError::FetchFailed(err.to_string())
        })?;

        debug!(booking_id, size, "document_assembler: artifact stored");

        Ok(SignedDocumentArtifact {
            contract_number,
            file,
            size,
            fetched_at: Utc::now(),
        })
    }

    fn readiness(&self, booking_id: i64) -> Result<String, DocumentError> {
        let envelope = self.store.envelope(booking_id);
        let contract_number = envelope
            .contract_number()
            .ok_or(DocumentError::DocumentUnavailable("no contract envelope yet"))?;

        if self.policy == DocumentPolicy::RequireBothSigned && !envelope.both_signed() {
            return Err(DocumentError::DocumentUnavailable(
                "waiting for both parties to sign",
            ));
        }

        Ok(contract_number.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::{
        repositories::signing_provider::{MockSigningProvider, SigningProviderError},
        value_objects::{
            contracts::{ContractEnvelope, EnvelopeSnapshot, Signature},
            enums::booking_statuses::BookingStatus,
        },
    };

    const BOOKING_ID: i64 = 5;

    fn store_with(envelope: ContractEnvelope) -> Arc<ContractEnvelopeStore> {
        let store = Arc::new(ContractEnvelopeStore::new());
        store.apply_snapshot(EnvelopeSnapshot {
            booking_id: BOOKING_ID,
            booking_status: BookingStatus::DepositPaid,
            envelope,
            fetched_at: Utc::now(),
        });
        store
    }

    fn half_signed() -> ContractEnvelope {
        ContractEnvelope::new(
            "ENV-9",
            Signature::Signed { at: None },
            Signature::Unsigned,
        )
    }

    #[tokio::test]
    async fn no_envelope_means_unavailable_without_network() {
        let mut provider = MockSigningProvider::new();
        provider.expect_download_combined().times(0);

        let assembler = DocumentAssembler::new(
            Arc::new(provider),
            store_with(ContractEnvelope::NoEnvelope),
            DocumentPolicy::AllowPartial,
        );

        let err = assembler.fetch_combined(BOOKING_ID).await.unwrap_err();
        assert!(matches!(err, DocumentError::DocumentUnavailable(_)));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn strict_policy_waits_for_both_signatures() {
        let mut provider = MockSigningProvider::new();
        provider.expect_download_combined().times(0);

        let assembler = DocumentAssembler::new(
            Arc::new(provider),
            store_with(half_signed()),
            DocumentPolicy::RequireBothSigned,
        );

        assert!(!assembler.is_ready(BOOKING_ID));
        let err = assembler.fetch_combined(BOOKING_ID).await.unwrap_err();
        assert_eq!(
            err,
            DocumentError::DocumentUnavailable("waiting for both parties to sign")
        );
    }

    #[tokio::test]
    async fn partial_policy_downloads_into_a_temp_file() {
        let mut provider = MockSigningProvider::new();
        provider
            .expect_download_combined()
            .withf(|contract| contract == "ENV-9")
            .times(1)
            .returning(|_| Box::pin(async { Ok(Bytes::from_static(b"%PDF-1.7 test")) }));

        let assembler = DocumentAssembler::new(
            Arc::new(provider),
            store_with(half_signed()),
            DocumentPolicy::AllowPartial,
        );

        let artifact = assembler.fetch_combined(BOOKING_ID).await.unwrap();
        assert_eq!(artifact.contract_number(), "ENV-9");
        assert_eq!(artifact.size(), 13);
        assert_eq!(artifact.read().await.unwrap(), Bytes::from_static(b"%PDF-1.7 test"));
    }

    #[tokio::test]
    async fn provider_failure_is_retryable() {
        let mut provider = MockSigningProvider::new();
        provider.expect_download_combined().times(1).returning(|_| {
            Box::pin(async { Err(SigningProviderError::Status { code: 503 }) })
        });

        let assembler = DocumentAssembler::new(
            Arc::new(provider),
            store_with(half_signed()),
            DocumentPolicy::AllowPartial,
        );

        let err = assembler.fetch_combined(BOOKING_ID).await.unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn replacing_the_slot_releases_the_previous_file() {
        let mut provider = MockSigningProvider::new();
        provider
            .expect_download_combined()
            .times(2)
            .returning(|_| Box::pin(async { Ok(Bytes::from_static(b"%PDF")) }));

        let assembler = DocumentAssembler::new(
            Arc::new(provider),
            store_with(half_signed()),
            DocumentPolicy::AllowPartial,
        );
        let slot = ArtifactSlot::new();

        let first = assembler.fetch_combined(BOOKING_ID).await.unwrap();
        let first_path = first.path().to_path_buf();
        slot.replace(first).await;
        assert!(first_path.exists());

        let second = assembler.fetch_combined(BOOKING_ID).await.unwrap();
        let second_path = second.path().to_path_buf();
        slot.replace(second).await;
        assert!(!first_path.exists());
        assert!(second_path.exists());

        slot.clear().await;
        assert!(!second_path.exists());
        assert!(!slot.is_loaded().await);
    }

    #[test]
    fn parses_policy_names() {
        assert_eq!(
            "partial".parse::<DocumentPolicy>(),
            Ok(DocumentPolicy::AllowPartial)
        );
        assert_eq!(
            "require_both_signed".parse::<DocumentPolicy>(),
            Ok(DocumentPolicy::RequireBothSigned)
        );
        assert!("eventually".parse::<DocumentPolicy>().is_err());
    }
}
