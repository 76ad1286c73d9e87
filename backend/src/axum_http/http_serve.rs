use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Result;
use application::usecases::{
    booking_actions::BookingActionGateway,
    contract_envelopes::ContractEnvelopeStore,
    contract_view::ContractServices,
    document_assembler::DocumentAssembler,
    status_reconciler::StatusReconciler,
};
use axum::{
    Router,
    http::{
        Method,
        header::{AUTHORIZATION, CONTENT_TYPE},
    },
    routing::get,
};
use domain::repositories::{
    booking_service::BookingService, envelope_status::EnvelopeStatusSource,
    signing_provider::SigningProvider,
};
use infra::http::{
    api_client::ApiClientConfig, booking_service::BookingServiceClient,
    envelope_status::ProviderEnvelopeStatusSource, signing_provider::SigningProviderClient,
};
use tokio::net::TcpListener;
use tower_http::{
    cors::{Any, CorsLayer},
    limit::RequestBodyLimitLayer,
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::{error, info};

use crate::{
    axum_http::{default_routers, routers},
    config::config_model::{DotEnvyConfig, UpstreamApi},
    usecases::contract_views::ContractViewRegistry,
};

pub fn router<B, S, E>(
    gateway: Arc<BookingActionGateway<B>>,
    registry: Arc<ContractViewRegistry<S, E>>,
) -> Router
where
    B: BookingService + Send + Sync + 'static,
    S: SigningProvider + Send + Sync + 'static,
    E: EnvelopeStatusSource + Send + Sync + 'static,
{
    Router::new()
        .fallback(default_routers::not_found)
        .nest(
            "/api/v1/bookings",
            routers::bookings::routes(gateway).merge(routers::contracts::routes(registry)),
        )
        .route("/api/v1/health-check", get(default_routers::health_check))
}

pub async fn start(config: Arc<DotEnvyConfig>) -> Result<()> {
    let booking_service = Arc::new(BookingServiceClient::new(client_config(
        &config.booking_service,
    ))?);
    let signing_provider = Arc::new(SigningProviderClient::new(client_config(
        &config.signing_provider,
    ))?);
    let status_source = Arc::new(ProviderEnvelopeStatusSource::new(
        Arc::clone(&booking_service),
        Arc::clone(&signing_provider),
    ));

    let store = Arc::new(ContractEnvelopeStore::new());
    let services = ContractServices {
        signing_provider: Arc::clone(&signing_provider),
        reconciler: Arc::new(StatusReconciler::new(
            status_source,
            Arc::clone(&store),
            config.reconcile.retry_policy(),
        )),
        assembler: Arc::new(DocumentAssembler::new(
            signing_provider,
            store,
            config.document.policy,
        )),
    };

    let gateway = Arc::new(BookingActionGateway::new(booking_service));
    let registry = Arc::new(ContractViewRegistry::new(
        services,
        config.contract_view.base_url.clone(),
        config.contract_view.idle_ttl(),
    ));
    registry.spawn_idle_sweeper(config.contract_view.idle_ttl() / 2);

    info!(
        document_policy = %config.document.policy,
        reconcile_attempts = config.reconcile.max_attempts,
        view_idle_ttl_secs = config.contract_view.idle_ttl().as_secs(),
        "http_serve: use cases wired"
    );

    let app = router(gateway, registry)
        .layer(TimeoutLayer::new(Duration::from_secs(
            config.backend_server.timeout,
        )))
        .layer(RequestBodyLimitLayer::new(
            (config.backend_server.body_limit * 1024 * 1024).try_into()?,
        ))
        .layer(
            CorsLayer::new()
                .allow_methods([
                    Method::GET,
                    Method::POST,
                    Method::PATCH,
                    Method::DELETE,
                ])
                .allow_headers([AUTHORIZATION, CONTENT_TYPE])
                .allow_origin(Any),
        )
        .layer(TraceLayer::new_for_http());

    let addr = SocketAddr::from(([0, 0, 0, 0], config.backend_server.port));
    let listener = TcpListener::bind(addr).await?;

    info!("Server is running on port {}", config.backend_server.port);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

fn client_config(api: &UpstreamApi) -> ApiClientConfig {
    ApiClientConfig {
        base_url: api.url.clone(),
        token: api.token.clone(),
        timeout: Duration::from_secs(api.timeout),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = %err, "Failed to install CTRL+C signal handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                error!(error = %err, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received ctrl+C signal"),
        _ = terminate => info!("Received terminate signal"),
    }
}
