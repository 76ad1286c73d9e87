use anyhow::Result;
use async_trait::async_trait;
use domain::{
    entities::bookings::{ActionAckEntity, BookingEntity, RejectBookingEntity},
    repositories::booking_service::{BookingService, BookingServiceError, BookingServiceResult},
    value_objects::bookings::{ActionAckModel, BookingDetailModel},
};
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use tracing::{debug, error};

use crate::http::api_client::{ApiClient, ApiClientConfig, FailedResponse};

pub struct BookingServiceClient {
    api: ApiClient,
}

impl BookingServiceClient {
    pub fn new(config: ApiClientConfig) -> Result<Self> {
        Ok(Self {
            api: ApiClient::new(config)?,
        })
    }

    async fn send<T>(
        &self,
        booking_id: i64,
        request: reqwest::RequestBuilder,
        context: &str,
    ) -> BookingServiceResult<T>
    where
        T: DeserializeOwned,
    {
        let resp = request.send().await.map_err(|err| {
            error!(booking_id, context, error = %err, "booking_service: request failed");
            BookingServiceError::Transport(err.to_string())
        })?;

        let resp = ApiClient::ensure_success(resp, context)
            .await
            .map_err(|failure| map_failure(booking_id, failure))?;

        resp.json::<T>().await.map_err(|err| {
            error!(booking_id, context, error = %err, "booking_service: undecodable response");
            BookingServiceError::Decode(err.to_string())
        })
    }
}

#[async_trait]
impl BookingService for BookingServiceClient {
    async fn get_booking(&self, booking_id: i64) -> BookingServiceResult<BookingDetailModel> {
        let url = self.api.endpoint(&["bookings", &booking_id.to_string()]);
        debug!(booking_id, "booking_service: fetching booking");

        let entity: BookingEntity = self
            .send(booking_id, self.api.request(Method::GET, url), "get booking")
            .await?;

        BookingDetailModel::try_from(entity)
            .map_err(|err| BookingServiceError::Decode(err.to_string()))
    }

    async fn accept(&self, booking_id: i64) -> BookingServiceResult<ActionAckModel> {
        let url = self
            .api
            .endpoint(&["bookings", &booking_id.to_string(), "accept"]);

        let ack: ActionAckEntity = self
            .send(booking_id, self.api.request(Method::PATCH, url), "accept booking")
            .await?;

        Ok(ack.into())
    }

    async fn reject(
        &self,
        booking_id: i64,
        reason: Option<String>,
    ) -> BookingServiceResult<ActionAckModel> {
        let url = self
            .api
            .endpoint(&["bookings", &booking_id.to_string(), "reject"]);
        let request = self
            .api
            .request(Method::PATCH, url)
            .json(&RejectBookingEntity { reason });

        let ack: ActionAckEntity = self.send(booking_id, request, "reject booking").await?;

        Ok(ack.into())
    }
}

fn map_failure(booking_id: i64, failure: FailedResponse) -> BookingServiceError {
    match failure.status {
        StatusCode::NOT_FOUND => BookingServiceError::NotFound(booking_id),
        StatusCode::CONFLICT | StatusCode::UNPROCESSABLE_ENTITY => {
            BookingServiceError::Rejected(failure.message())
        }
        status if status.is_server_error() => {
            BookingServiceError::Transport(format!("booking service returned {status}"))
        }
        status => BookingServiceError::Decode(format!(
            "booking service returned {status}: {}",
            failure.message()
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failure(status: StatusCode, body: &str) -> FailedResponse {
        FailedResponse {
            status,
            body: body.to_string(),
        }
    }

    #[test]
    fn maps_state_conflicts_to_rejected() {
        assert_eq!(
            map_failure(3, failure(StatusCode::CONFLICT, r#"{"message":"already confirmed"}"#)),
            BookingServiceError::Rejected("already confirmed".to_string())
        );
        assert!(matches!(
            map_failure(3, failure(StatusCode::UNPROCESSABLE_ENTITY, "")),
            BookingServiceError::Rejected(_)
        ));
    }

    #[test]
    fn maps_missing_booking_and_outages() {
        assert_eq!(
            map_failure(3, failure(StatusCode::NOT_FOUND, "")),
            BookingServiceError::NotFound(3)
        );
        assert!(matches!(
            map_failure(3, failure(StatusCode::BAD_GATEWAY, "")),
            BookingServiceError::Transport(_)
        ));
        assert!(matches!(
            map_failure(3, failure(StatusCode::UNAUTHORIZED, "")),
            BookingServiceError::Decode(_)
        ));
    }

    #[test]
    fn decodes_booking_payload_with_boolean_signatures() {
        let payload = r#"{
            "id": 12,
            "status": "deposit_paid",
            "renter": { "id": 4, "full_name": "Sam Lee", "email": null, "phone": null },
            "vehicle": null,
            "created_at": "2024-05-01T10:00:00Z",
            "start_date": "2024-05-10",
            "start_time": "09:00",
            "end_date": "2024-05-12",
            "end_time": null,
            "contract": {
                "contract_number": "ENV-12",
                "owner_signed_at": "2024-05-02T08:00:00Z",
                "renter_signed_at": null,
                "owner_signed": null,
                "renter_signed": true
            }
        }"#;

        let entity: BookingEntity = serde_json::from_str(payload).unwrap();
        let booking = BookingDetailModel::try_from(entity).unwrap();

        assert!(booking.envelope.both_signed());
        assert_eq!(booking.envelope.contract_number(), Some("ENV-12"));
    }
}
