use std::sync::Arc;

use application::usecases::{
    contract_view::ContractViewState, status_reconciler::ReconcileError,
};
use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::{
        StatusCode,
        header::{CONTENT_DISPOSITION, CONTENT_TYPE},
    },
    response::IntoResponse,
    routing::{get, post},
};
use domain::{
    repositories::{envelope_status::EnvelopeStatusSource, signing_provider::SigningProvider},
    value_objects::enums::signer_roles::SignerRole,
};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{axum_http::error_responses::AppError, usecases::contract_views::ContractViewRegistry};

#[derive(Debug, Deserialize)]
pub struct SignRequest {
    pub role: SignerRole,
    pub return_url: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SignResponse {
    pub role: SignerRole,
    pub signing_url: String,
    pub return_url: String,
}

#[derive(Debug, Serialize)]
pub struct ReturnResponse {
    /// False when the query carried no provider markers. A pass that ran but
    /// failed is reported through `contract.sync_error`.
    pub reconciled: bool,
    pub contract: ContractViewState,
}

pub fn routes<S, E>(registry: Arc<ContractViewRegistry<S, E>>) -> Router
where
    S: SigningProvider + Send + Sync + 'static,
    E: EnvelopeStatusSource + Send + Sync + 'static,
{
    Router::new()
        .route(
            "/:booking_id/contract",
            get(open::<S, E>).delete(close::<S, E>),
        )
        .route("/:booking_id/contract/refresh", post(refresh::<S, E>))
        .route("/:booking_id/contract/sign", post(sign::<S, E>))
        .route(
            "/:booking_id/contract/surface-closed",
            post(surface_closed::<S, E>),
        )
        .route("/:booking_id/contract/return", get(signing_return::<S, E>))
        .route("/:booking_id/contract/document", get(document::<S, E>))
        .with_state(registry)
}

pub async fn open<S, E>(
    State(registry): State<Arc<ContractViewRegistry<S, E>>>,
    Path(booking_id): Path<i64>,
) -> Result<impl IntoResponse, AppError>
where
    S: SigningProvider + Send + Sync + 'static,
    E: EnvelopeStatusSource + Send + Sync + 'static,
{
    info!(booking_id, "contracts: view requested");
    let view = registry.open(booking_id).await?;
    Ok(Json(view.state().await))
}

pub async fn close<S, E>(
    State(registry): State<Arc<ContractViewRegistry<S, E>>>,
    Path(booking_id): Path<i64>,
) -> impl IntoResponse
where
    S: SigningProvider + Send + Sync + 'static,
    E: EnvelopeStatusSource + Send + Sync + 'static,
{
    registry.close(booking_id).await;
    StatusCode::NO_CONTENT
}

pub async fn refresh<S, E>(
    State(registry): State<Arc<ContractViewRegistry<S, E>>>,
    Path(booking_id): Path<i64>,
) -> Result<impl IntoResponse, AppError>
where
    S: SigningProvider + Send + Sync + 'static,
    E: EnvelopeStatusSource + Send + Sync + 'static,
{
    info!(booking_id, "contracts: manual refresh requested");
    let view = registry.open(booking_id).await?;
    // A failed pass shows up as `sync_error` next to the last known flags.
    if let Err(ReconcileError::BookingNotFound(_)) = view.refresh().await {
        registry.close(booking_id).await;
        return Err(ReconcileError::BookingNotFound(booking_id).into());
    }
    Ok(Json(view.state().await))
}

pub async fn sign<S, E>(
    State(registry): State<Arc<ContractViewRegistry<S, E>>>,
    Path(booking_id): Path<i64>,
    Json(request): Json<SignRequest>,
) -> Result<impl IntoResponse, AppError>
where
    S: SigningProvider + Send + Sync + 'static,
    E: EnvelopeStatusSource + Send + Sync + 'static,
{
    info!(booking_id, role = %request.role, "contracts: signing requested");
    let return_url = request
        .return_url
        .filter(|url| !url.trim().is_empty())
        .unwrap_or_else(|| registry.default_return_url(booking_id));

    let view = registry.open(booking_id).await?;
    let session = view.sign(request.role, &return_url).await?;

    Ok(Json(SignResponse {
        role: session.role,
        signing_url: session.signing_url,
        return_url: session.return_url,
    }))
}

pub async fn surface_closed<S, E>(
    State(registry): State<Arc<ContractViewRegistry<S, E>>>,
    Path(booking_id): Path<i64>,
) -> Result<impl IntoResponse, AppError>
where
    S: SigningProvider + Send + Sync + 'static,
    E: EnvelopeStatusSource + Send + Sync + 'static,
{
    let view = registry.open(booking_id).await?;
    view.surface_closed()?;
    Ok(Json(view.state().await))
}

pub async fn signing_return<S, E>(
    State(registry): State<Arc<ContractViewRegistry<S, E>>>,
    Path(booking_id): Path<i64>,
    Query(query): Query<Vec<(String, String)>>,
) -> Result<impl IntoResponse, AppError>
where
    S: SigningProvider + Send + Sync + 'static,
    E: EnvelopeStatusSource + Send + Sync + 'static,
{
    let view = registry.open(booking_id).await?;
    // Failures land in `sync_error`; the flags shown stay the last known ones.
    let reconciled = view
        .handle_return(query.iter().map(|(key, value)| (key.as_str(), value.as_str())))
        .await
        .is_some();

    Ok(Json(ReturnResponse {
        reconciled,
        contract: view.state().await,
    }))
}

pub async fn document<S, E>(
    State(registry): State<Arc<ContractViewRegistry<S, E>>>,
    Path(booking_id): Path<i64>,
) -> Result<impl IntoResponse, AppError>
where
    S: SigningProvider + Send + Sync + 'static,
    E: EnvelopeStatusSource + Send + Sync + 'static,
{
    let view = registry.open(booking_id).await?;
    let bytes = view.document().await?;

    Ok((
        [
            (CONTENT_TYPE, "application/pdf".to_string()),
            (
                CONTENT_DISPOSITION,
                format!("inline; filename=\"contract-{booking_id}.pdf\""),
            ),
        ],
        bytes,
    ))
}
