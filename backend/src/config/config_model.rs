use std::time::Duration;

use application::usecases::{document_assembler::DocumentPolicy, status_reconciler::RetryPolicy};
use url::Url;

#[derive(Debug, Clone)]
pub struct DotEnvyConfig {
    pub backend_server: BackendServer,
    pub booking_service: UpstreamApi,
    pub signing_provider: UpstreamApi,
    pub contract_view: ContractViewConfig,
    pub reconcile: Reconcile,
    pub document: Document,
}

#[derive(Debug, Clone)]
pub struct BackendServer {
    pub port: u16,
    pub body_limit: u64,
    pub timeout: u64,
}

#[derive(Debug, Clone)]
pub struct UpstreamApi {
    pub url: Url,
    pub token: Option<String>,
    pub timeout: u64,
}

#[derive(Debug, Clone)]
pub struct ContractViewConfig {
    /// Base of the default signing return url, `{base}/bookings/{id}/contract`.
    pub base_url: Url,
    /// Seconds a view may go unused before it is torn down.
    pub idle_ttl: u64,
}

impl ContractViewConfig {
    pub fn idle_ttl(&self) -> Duration {
        Duration::from_secs(self.idle_ttl.max(1))
    }
}

#[derive(Debug, Clone)]
pub struct Reconcile {
    pub max_attempts: u32,
    pub backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Reconcile {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts.max(1),
            initial_backoff: Duration::from_millis(self.backoff_ms),
            max_backoff: Duration::from_millis(self.max_backoff_ms.max(self.backoff_ms)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Document {
    pub policy: DocumentPolicy,
}
