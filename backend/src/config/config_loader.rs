use std::str::FromStr;

use anyhow::{Context, Result, anyhow};
use application::usecases::document_assembler::DocumentPolicy;
use url::Url;

use super::config_model::{
    BackendServer, ContractViewConfig, Document, DotEnvyConfig, Reconcile, UpstreamApi,
};

pub fn load() -> Result<DotEnvyConfig> {
    dotenvy::dotenv().ok();

    from_lookup(|key| std::env::var(key).ok())
}

pub(crate) fn from_lookup<F>(lookup: F) -> Result<DotEnvyConfig>
where
    F: Fn(&str) -> Option<String>,
{
    let env = Env(lookup);

    let backend_server = BackendServer {
        port: env.required("SERVER_PORT_BACKEND")?,
        body_limit: env.optional("SERVER_BODY_LIMIT", 10)?,
        timeout: env.optional("SERVER_TIMEOUT", 30)?,
    };

    let booking_service = UpstreamApi {
        url: env.required_url("BOOKING_SERVICE_URL")?,
        token: env.string("BOOKING_SERVICE_TOKEN"),
        timeout: env.optional("BOOKING_SERVICE_TIMEOUT", 15)?,
    };

    let signing_provider = UpstreamApi {
        url: env.required_url("SIGNING_PROVIDER_URL")?,
        token: env.string("SIGNING_PROVIDER_TOKEN"),
        timeout: env.optional("SIGNING_PROVIDER_TIMEOUT", 30)?,
    };

    let contract_view = ContractViewConfig {
        base_url: env.required_url("CONTRACT_VIEW_BASE_URL")?,
        idle_ttl: env.optional("CONTRACT_VIEW_IDLE_TTL", 900)?,
    };

    let reconcile = Reconcile {
        max_attempts: env.optional("RECONCILE_MAX_ATTEMPTS", 3)?,
        backoff_ms: env.optional("RECONCILE_BACKOFF_MS", 250)?,
        max_backoff_ms: env.optional("RECONCILE_MAX_BACKOFF_MS", 2_000)?,
    };

    let document = Document {
        policy: env.optional("DOCUMENT_POLICY", DocumentPolicy::AllowPartial)?,
    };

    Ok(DotEnvyConfig {
        backend_server,
        booking_service,
        signing_provider,
        contract_view,
        reconcile,
        document,
    })
}

struct Env<F>(F);

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn string(&self, key: &str) -> Option<String> {
        (self.0)(key)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    }

    fn required<T>(&self, key: &str) -> Result<T>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        let raw = self
            .string(key)
            .ok_or_else(|| anyhow!("{key} is not set"))?;
        raw.parse::<T>()
            .map_err(|err| anyhow!("{key} is invalid: {err}"))
    }

    fn optional<T>(&self, key: &str, default: T) -> Result<T>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.string(key) {
            Some(raw) => raw
                .parse::<T>()
                .map_err(|err| anyhow!("{key} is invalid: {err}")),
            None => Ok(default),
        }
    }

    fn required_url(&self, key: &str) -> Result<Url> {
        let raw = self
            .string(key)
            .ok_or_else(|| anyhow!("{key} is not set"))?;
        Url::parse(&raw).with_context(|| format!("{key} is not a valid url"))
    }
}
