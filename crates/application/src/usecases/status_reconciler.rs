use std::{collections::HashMap, sync::Arc, time::Duration};

use domain::{
    repositories::{
        booking_service::BookingServiceError,
        envelope_status::{EnvelopeStatusError, EnvelopeStatusSource},
    },
    value_objects::reconciliation::ReconcileTrigger,
};
use thiserror::Error;
use tokio::sync::{Mutex, watch};
use tracing::{debug, info, warn};

use crate::usecases::contract_envelopes::{ContractEnvelopeStore, EnvelopeChange, EnvelopeRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(250),
            max_backoff: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay before the attempt following `attempt` (1-based), doubling each time.
    pub fn backoff_after(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    Applied {
        record: EnvelopeRecord,
        change: EnvelopeChange,
    },
    /// Nobody observes the booking anymore, so the snapshot was dropped.
    Discarded,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ReconcileError {
    #[error("envelope status unavailable after {attempts} attempt(s): {reason}")]
    Unavailable { attempts: u32, reason: String },
    #[error("booking {0} not found")]
    BookingNotFound(i64),
    #[error("reconciliation pass ended without a result")]
    Aborted,
}

pub type ReconcileResult = std::result::Result<ReconcileOutcome, ReconcileError>;

type PassReceiver = watch::Receiver<Option<ReconcileResult>>;

/// Pulls authoritative envelope state into the [`ContractEnvelopeStore`].
///
/// At most one pass per booking is in flight; callers arriving while a pass
/// runs wait for that pass instead of issuing another fetch.
pub struct StatusReconciler<E>
where
    E: EnvelopeStatusSource + Send + Sync + 'static,
{
    status_source: Arc<E>,
    store: Arc<ContractEnvelopeStore>,
    retry_policy: RetryPolicy,
    in_flight: Mutex<HashMap<i64, PassReceiver>>,
}

impl<E> StatusReconciler<E>
where
    E: EnvelopeStatusSource + Send + Sync + 'static,
{
    pub fn new(
        status_source: Arc<E>,
        store: Arc<ContractEnvelopeStore>,
        retry_policy: RetryPolicy,
    ) -> Self {
        Self {
            status_source,
            store,
            retry_policy,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &Arc<ContractEnvelopeStore> {
        &self.store
    }

    pub async fn reconcile(
        self: &Arc<Self>,
        booking_id: i64,
        trigger: ReconcileTrigger,
    ) -> ReconcileResult {
        let mut pass = {
            let mut in_flight = self.in_flight.lock().await;
            match in_flight.get(&booking_id) {
                Some(existing) => {
                    debug!(
                        booking_id,
                        trigger = trigger.as_str(),
                        "status_reconciler: joining in-flight pass"
                    );
                    existing.clone()
                }
                None => {
                    let (sender, receiver) = watch::channel(None);
                    in_flight.insert(booking_id, receiver.clone());

                    // The pass runs detached so that a caller going away does not
                    // leave a dangling in-flight entry behind.
                    let this = Arc::clone(self);
                    tokio::spawn(async move {
                        let result = this.run_pass(booking_id, &trigger).await;
                        let mut in_flight = this.in_flight.lock().await;
                        in_flight.remove(&booking_id);
                        sender.send_replace(Some(result));
                    });

                    receiver
                }
            }
        };

        let finished = pass
            .wait_for(Option::is_some)
            .await
            .map(|result| result.clone());
        match finished {
            Ok(Some(result)) => result,
            _ => Err(ReconcileError::Aborted),
        }
    }

    async fn run_pass(&self, booking_id: i64, trigger: &ReconcileTrigger) -> ReconcileResult {
        info!(
            booking_id,
            trigger = trigger.as_str(),
            "status_reconciler: pass started"
        );

        let max_attempts = self.retry_policy.max_attempts.max(1);
        let mut attempt = 0;
        let snapshot = loop {
            attempt += 1;
            match self.status_source.fetch_snapshot(booking_id).await {
                Ok(snapshot) => break snapshot,
                Err(err) if attempt < max_attempts && is_retryable(&err) => {
                    let backoff = self.retry_policy.backoff_after(attempt);
                    warn!(
                        booking_id,
                        attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %err,
                        "status_reconciler: fetch failed, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                }
                Err(EnvelopeStatusError::Booking(BookingServiceError::NotFound(_))) => {
                    warn!(booking_id, "status_reconciler: booking not found");
                    return Err(ReconcileError::BookingNotFound(booking_id));
                }
                Err(err) => {
                    warn!(
                        booking_id,
                        attempt,
                        error = %err,
                        "status_reconciler: fetch failed, keeping last known flags"
                    );
                    return Err(ReconcileError::Unavailable {
                        attempts: attempt,
                        reason: err.to_string(),
                    });
                }
            }
        };

        if snapshot.booking_id != booking_id {
            warn!(
                booking_id,
                snapshot_booking_id = snapshot.booking_id,
                "status_reconciler: snapshot belongs to another booking, ignoring"
            );
            return Err(ReconcileError::Unavailable {
                attempts: attempt,
                reason: "snapshot booking id mismatch".to_string(),
            });
        }

        if !self.store.has_observers(booking_id) {
            debug!(
                booking_id,
                "status_reconciler: no active observer, discarding snapshot"
            );
            return Ok(ReconcileOutcome::Discarded);
        }

        let change = self.store.apply_snapshot(snapshot);
        let record = self
            .store
            .record(booking_id)
            .ok_or(ReconcileError::Aborted)?;

        info!(
            booking_id,
            status = %record.booking_status,
            has_envelope = record.envelope.has_envelope(),
            both_signed = record.envelope.both_signed(),
            appeared = change.appeared,
            "status_reconciler: pass applied"
        );

        Ok(ReconcileOutcome::Applied { record, change })
    }
}

fn is_retryable(err: &EnvelopeStatusError) -> bool {
    match err {
        EnvelopeStatusError::Booking(BookingServiceError::Transport(_)) => true,
        EnvelopeStatusError::Booking(_) => false,
        EnvelopeStatusError::Provider(err) => err.is_transient(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use domain::{
        repositories::{
            envelope_status::MockEnvelopeStatusSource, signing_provider::SigningProviderError,
        },
        value_objects::{
            contracts::{ContractEnvelope, EnvelopeSnapshot, Signature},
            enums::{booking_statuses::BookingStatus, signer_roles::SignerRole},
            reconciliation::ReturnMarkers,
        },
    };

    const BOOKING_ID: i64 = 42;

    fn snapshot(owner_signed: bool, renter_signed: bool) -> EnvelopeSnapshot {
        let mark = |signed: bool| {
            if signed {
                Signature::Signed { at: Some(Utc::now()) }
            } else {
                Signature::Unsigned
            }
        };
        EnvelopeSnapshot {
            booking_id: BOOKING_ID,
            booking_status: BookingStatus::DepositPaid,
            envelope: ContractEnvelope::new("ENV-1", mark(owner_signed), mark(renter_signed)),
            fetched_at: Utc::now(),
        }
    }

    fn reconciler(
        source: MockEnvelopeStatusSource,
    ) -> Arc<StatusReconciler<MockEnvelopeStatusSource>> {
        Arc::new(StatusReconciler::new(
            Arc::new(source),
            Arc::new(ContractEnvelopeStore::new()),
            RetryPolicy {
                max_attempts: 2,
                initial_backoff: Duration::from_millis(1),
                max_backoff: Duration::from_millis(1),
            },
        ))
    }

    #[tokio::test]
    async fn redirect_return_updates_only_the_owner_flag() {
        let mut source = MockEnvelopeStatusSource::new();
        let mut first = true;
        source.expect_fetch_snapshot().times(2).returning(move |_| {
            let snap = if first { snapshot(false, false) } else { snapshot(true, false) };
            first = false;
            Box::pin(async move { Ok(snap) })
        });

        let reconciler = reconciler(source);
        let store = Arc::clone(reconciler.store());
        let _guard = store.observe(BOOKING_ID);

        reconciler
            .reconcile(BOOKING_ID, ReconcileTrigger::Mount)
            .await
            .unwrap();
        assert!(store.party_needs_to_sign(BOOKING_ID, SignerRole::Owner));

        let markers = ReturnMarkers::from_query([("event", "completed")]).unwrap();
        reconciler
            .reconcile(BOOKING_ID, ReconcileTrigger::RedirectReturn(markers))
            .await
            .unwrap();

        assert!(!store.party_needs_to_sign(BOOKING_ID, SignerRole::Owner));
        assert!(store.party_needs_to_sign(BOOKING_ID, SignerRole::Renter));
    }

    #[tokio::test]
    async fn failed_fetch_keeps_signed_flags() {
        let mut source = MockEnvelopeStatusSource::new();
        let mut calls = 0;
        source.expect_fetch_snapshot().times(3).returning(move |_| {
            calls += 1;
            let result = if calls == 1 {
                Ok(snapshot(true, true))
            } else {
                Err(EnvelopeStatusError::Provider(SigningProviderError::Transport(
                    "connection reset".to_string(),
                )))
            };
            Box::pin(async move { result })
        });

        let reconciler = reconciler(source);
        let store = Arc::clone(reconciler.store());
        let _guard = store.observe(BOOKING_ID);

        reconciler
            .reconcile(BOOKING_ID, ReconcileTrigger::Mount)
            .await
            .unwrap();
        assert!(store.both_signed(BOOKING_ID));

        let err = reconciler
            .reconcile(BOOKING_ID, ReconcileTrigger::ManualRefresh)
            .await
            .unwrap_err();

        assert_eq!(
            err,
            ReconcileError::Unavailable {
                attempts: 2,
                reason: "signing provider unreachable: connection reset".to_string(),
            }
        );
        let envelope = store.envelope(BOOKING_ID);
        assert!(envelope.is_signed_by(SignerRole::Owner));
        assert!(envelope.is_signed_by(SignerRole::Renter));
    }

    #[tokio::test]
    async fn non_retryable_errors_fail_on_first_attempt() {
        let mut source = MockEnvelopeStatusSource::new();
        source.expect_fetch_snapshot().times(1).returning(|id| {
            Box::pin(async move {
                Err(EnvelopeStatusError::Booking(BookingServiceError::NotFound(id)))
            })
        });

        let reconciler = reconciler(source);
        let _guard = reconciler.store().observe(BOOKING_ID);

        let err = reconciler
            .reconcile(BOOKING_ID, ReconcileTrigger::ManualRefresh)
            .await
            .unwrap_err();
        assert!(matches!(err, ReconcileError::Unavailable { attempts: 1, .. }));
    }

    #[tokio::test]
    async fn overlapping_triggers_share_one_fetch() {
        let mut source = MockEnvelopeStatusSource::new();
        source.expect_fetch_snapshot().times(1).returning(|_| {
            let snap = snapshot(true, false);
            Box::pin(async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                Ok(snap)
            })
        });

        let reconciler = reconciler(source);
        let _guard = reconciler.store().observe(BOOKING_ID);
        let markers = ReturnMarkers::from_query([("source", "embedded")]).unwrap();

        let (mount, redirect) = tokio::join!(
            reconciler.reconcile(BOOKING_ID, ReconcileTrigger::Mount),
            reconciler.reconcile(BOOKING_ID, ReconcileTrigger::RedirectReturn(markers)),
        );

        assert_eq!(mount.unwrap(), redirect.unwrap());
    }

    #[tokio::test]
    async fn result_is_discarded_once_the_view_is_gone() {
        let mut source = MockEnvelopeStatusSource::new();
        source.expect_fetch_snapshot().times(1).returning(|_| {
            let snap = snapshot(true, true);
            Box::pin(async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                Ok(snap)
            })
        });

        let reconciler = reconciler(source);
        let store = Arc::clone(reconciler.store());
        let guard = store.observe(BOOKING_ID);

        let pass = {
            let reconciler = Arc::clone(&reconciler);
            tokio::spawn(async move {
                reconciler
                    .reconcile(BOOKING_ID, ReconcileTrigger::Mount)
                    .await
            })
        };
        drop(guard);

        assert_eq!(pass.await.unwrap(), Ok(ReconcileOutcome::Discarded));
        assert!(store.record(BOOKING_ID).is_none());
    }

    #[test]
    fn backoff_doubles_up_to_the_cap() {
        let policy = RetryPolicy {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(300),
        };
        assert_eq!(policy.backoff_after(1), Duration::from_millis(100));
        assert_eq!(policy.backoff_after(2), Duration::from_millis(200));
        assert_eq!(policy.backoff_after(3), Duration::from_millis(300));
    }

    #[tokio::test]
    async fn unknown_booking_is_not_retried() {
        let mut source = MockEnvelopeStatusSource::new();
        source.expect_fetch_snapshot().times(1).returning(|booking_id| {
            Box::pin(async move {
                Err(EnvelopeStatusError::Booking(BookingServiceError::NotFound(
                    booking_id,
                )))
            })
        });

        let reconciler = reconciler(source);
        let _guard = reconciler.store().observe(BOOKING_ID);

        assert_eq!(
            reconciler.reconcile(BOOKING_ID, ReconcileTrigger::Mount).await,
            Err(ReconcileError::BookingNotFound(BOOKING_ID))
        );
        assert!(reconciler.store().record(BOOKING_ID).is_none());
    }
}
