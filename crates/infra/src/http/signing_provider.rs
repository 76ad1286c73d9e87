use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use domain::{
    repositories::signing_provider::{
        SigningProvider, SigningProviderError, SigningProviderResult,
    },
    value_objects::enums::signer_roles::SignerRole,
};
use reqwest::Method;
use serde::Deserialize;
use tracing::{debug, error, info};

use crate::http::api_client::{ApiClient, ApiClientConfig};

#[derive(Debug, Deserialize)]
struct SigningUrlResponse {
    url: Option<String>,
}

pub struct SigningProviderClient {
    api: ApiClient,
}

impl SigningProviderClient {
    pub fn new(config: ApiClientConfig) -> Result<Self> {
        Ok(Self {
            api: ApiClient::new(config)?,
        })
    }

    async fn get(
        &self,
        url: url::Url,
        contract_number: &str,
        context: &str,
    ) -> SigningProviderResult<reqwest::Response> {
        let resp = self
            .api
            .request(Method::GET, url)
            .send()
            .await
            .map_err(|err| {
                error!(
                    contract_number,
                    context,
                    error = %err,
                    "signing_provider: request failed"
                );
                SigningProviderError::Transport(err.to_string())
            })?;

        ApiClient::ensure_success(resp, context)
            .await
            .map_err(|failure| SigningProviderError::Status {
                code: failure.status.as_u16(),
            })
    }
}

#[async_trait]
impl SigningProvider for SigningProviderClient {
    async fn create_signing_session(
        &self,
        contract_number: &str,
        role: SignerRole,
        return_url: &str,
    ) -> SigningProviderResult<Option<String>> {
        let mut url = self.api.endpoint(&["sign", contract_number]);
        url.query_pairs_mut()
            .append_pair("role", role.as_str())
            .append_pair("returnUrl", return_url);

        info!(contract_number, %role, "signing_provider: creating signing session");

        let resp = self
            .get(url, contract_number, "create signing session")
            .await?;
        let body: SigningUrlResponse = resp
            .json()
            .await
            .map_err(|err| SigningProviderError::Decode(err.to_string()))?;

        Ok(body.url.filter(|url| !url.trim().is_empty()))
    }

    async fn refresh_status(&self, contract_number: &str) -> SigningProviderResult<()> {
        let url = self.api.endpoint(&["status", contract_number]);
        debug!(contract_number, "signing_provider: refreshing envelope status");

        self.get(url, contract_number, "refresh status").await?;
        Ok(())
    }

    async fn download_combined(&self, contract_number: &str) -> SigningProviderResult<Bytes> {
        let url = self
            .api
            .endpoint(&["documents", contract_number, "combined"]);

        let resp = self
            .get(url, contract_number, "download combined document")
            .await?;

        resp.bytes()
            .await
            .map_err(|err| SigningProviderError::Transport(err.to_string()))
    }
}
