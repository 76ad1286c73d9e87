use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use domain::{
    repositories::{
        booking_service::BookingService,
        envelope_status::{EnvelopeStatusError, EnvelopeStatusSource},
        signing_provider::SigningProvider,
    },
    value_objects::contracts::EnvelopeSnapshot,
};
use tracing::{debug, warn};

/// Builds one snapshot out of the booking service and the signing provider:
/// read the booking, ask the provider to refresh the envelope, read the booking again.
pub struct ProviderEnvelopeStatusSource<B, S>
where
    B: BookingService + Send + Sync + 'static,
    S: SigningProvider + Send + Sync + 'static,
{
    booking_service: Arc<B>,
    signing_provider: Arc<S>,
}

impl<B, S> ProviderEnvelopeStatusSource<B, S>
where
    B: BookingService + Send + Sync + 'static,
    S: SigningProvider + Send + Sync + 'static,
{
    pub fn new(booking_service: Arc<B>, signing_provider: Arc<S>) -> Self {
        Self {
            booking_service,
            signing_provider,
        }
    }
}

#[async_trait]
impl<B, S> EnvelopeStatusSource for ProviderEnvelopeStatusSource<B, S>
where
    B: BookingService + Send + Sync + 'static,
    S: SigningProvider + Send + Sync + 'static,
{
    async fn fetch_snapshot(
        &self,
        booking_id: i64,
    ) -> Result<EnvelopeSnapshot, EnvelopeStatusError> {
        let booking = self.booking_service.get_booking(booking_id).await?;

        let booking = match booking.envelope.contract_number().map(str::to_owned) {
            None => booking,
            Some(contract_number) => {
                match self.signing_provider.refresh_status(&contract_number).await {
                    Ok(()) => self.booking_service.get_booking(booking_id).await?,
                    Err(err) if err.is_transient() => return Err(err.into()),
                    Err(err) => {
                        // The booking read above is still the newest thing we know.
                        warn!(
                            booking_id,
                            %contract_number,
                            error = %err,
                            "envelope_status: provider refused status refresh"
                        );
                        booking
                    }
                }
            }
        };

        debug!(
            booking_id,
            status = %booking.status,
            has_envelope = booking.envelope.has_envelope(),
            "envelope_status: snapshot fetched"
        );

        Ok(EnvelopeSnapshot {
            booking_id: booking.id,
            booking_status: booking.status,
            envelope: booking.envelope,
            fetched_at: Utc::now(),
        })
    }
}
