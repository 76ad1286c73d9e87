use std::sync::Arc;

use application::usecases::booking_actions::{BookingActionGateway, RejectionReason};
use axum::{
    Json, Router,
    extract::{Path, State},
    response::IntoResponse,
    routing::{get, patch},
};
use domain::repositories::booking_service::BookingService;
use serde::Deserialize;
use tracing::info;

use crate::axum_http::error_responses::AppError;

#[derive(Debug, Default, Deserialize)]
pub struct RejectBookingRequest {
    pub reason: Option<String>,
    /// Required to reject with an empty reason.
    #[serde(default)]
    pub confirm_empty: bool,
}

pub fn routes<B>(gateway: Arc<BookingActionGateway<B>>) -> Router
where
    B: BookingService + Send + Sync + 'static,
{
    Router::new()
        .route("/:booking_id", get(detail::<B>))
        .route("/:booking_id/accept", patch(accept::<B>))
        .route("/:booking_id/reject", patch(reject::<B>))
        .with_state(gateway)
}

pub async fn detail<B>(
    State(gateway): State<Arc<BookingActionGateway<B>>>,
    Path(booking_id): Path<i64>,
) -> Result<impl IntoResponse, AppError>
where
    B: BookingService + Send + Sync + 'static,
{
    let booking = gateway.booking(booking_id).await?;
    Ok(Json(booking))
}

pub async fn accept<B>(
    State(gateway): State<Arc<BookingActionGateway<B>>>,
    Path(booking_id): Path<i64>,
) -> Result<impl IntoResponse, AppError>
where
    B: BookingService + Send + Sync + 'static,
{
    info!(booking_id, "bookings: accept request received");
    let outcome = gateway.approve(booking_id).await?;
    Ok(Json(outcome))
}

pub async fn reject<B>(
    State(gateway): State<Arc<BookingActionGateway<B>>>,
    Path(booking_id): Path<i64>,
    body: Option<Json<RejectBookingRequest>>,
) -> Result<impl IntoResponse, AppError>
where
    B: BookingService + Send + Sync + 'static,
{
    info!(booking_id, "bookings: reject request received");
    let body = body.map(|Json(body)| body).unwrap_or_default();

    let reason = RejectionReason::from_input(body.reason.as_deref(), body.confirm_empty)?;
    let outcome = gateway.reject(booking_id, reason).await?;
    Ok(Json(outcome))
}
