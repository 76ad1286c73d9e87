use std::sync::{Arc, Mutex, PoisonError};

use domain::{
    repositories::{envelope_status::EnvelopeStatusSource, signing_provider::SigningProvider},
    value_objects::{enums::signer_roles::SignerRole, reconciliation::ReconcileTrigger},
};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::usecases::{
    contract_envelopes::ContractEnvelopeStore,
    status_reconciler::{ReconcileResult, StatusReconciler},
};

/// One-time, role-scoped signing session. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SigningSession {
    pub role: SignerRole,
    pub envelope_id: String,
    pub signing_url: String,
    pub return_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SigningState {
    Idle,
    RequestingSession { role: SignerRole },
    SessionActive { session: SigningSession },
    AwaitingReturn { session: SigningSession },
    Reconciling { role: Option<SignerRole> },
}

impl SigningState {
    pub fn name(&self) -> &'static str {
        match self {
            SigningState::Idle => "idle",
            SigningState::RequestingSession { .. } => "requesting_session",
            SigningState::SessionActive { .. } => "session_active",
            SigningState::AwaitingReturn { .. } => "awaiting_return",
            SigningState::Reconciling { .. } => "reconciling",
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SigningError {
    #[error("{role} has nothing to sign for booking {booking_id}")]
    NothingToSign { booking_id: i64, role: SignerRole },
    #[error("signing is already in progress ({0})")]
    SessionBusy(&'static str),
    #[error("invalid return url: {0}")]
    InvalidReturnUrl(String),
    #[error("signing session could not be created: {0}")]
    SessionCreationFailed(String),
    #[error("no signing session is active")]
    NoActiveSession,
}

/// Drives one party's signing attempt for a booking:
/// `Idle -> RequestingSession -> SessionActive -> AwaitingReturn -> Reconciling -> Idle`.
///
/// Completion of the embedded surface is never trusted on its own; signed flags
/// only change through the reconciler.
pub struct SigningSessionCoordinator<S, E>
where
    S: SigningProvider + Send + Sync + 'static,
    E: EnvelopeStatusSource + Send + Sync + 'static,
{
    booking_id: i64,
    signing_provider: Arc<S>,
    store: Arc<ContractEnvelopeStore>,
    reconciler: Arc<StatusReconciler<E>>,
    state: Mutex<SigningState>,
}

impl<S, E> SigningSessionCoordinator<S, E>
where
    S: SigningProvider + Send + Sync + 'static,
    E: EnvelopeStatusSource + Send + Sync + 'static,
{
    pub fn new(
        booking_id: i64,
        signing_provider: Arc<S>,
        reconciler: Arc<StatusReconciler<E>>,
    ) -> Self {
        Self {
            booking_id,
            signing_provider,
            store: Arc::clone(reconciler.store()),
            reconciler,
            state: Mutex::new(SigningState::Idle),
        }
    }

    pub fn state(&self) -> SigningState {
        self.lock_state().clone()
    }

    pub fn active_session(&self) -> Option<SigningSession> {
        match &*self.lock_state() {
            SigningState::SessionActive { session } | SigningState::AwaitingReturn { session } => {
                Some(session.clone())
            }
            _ => None,
        }
    }

    pub async fn begin(
        &self,
        role: SignerRole,
        return_url: &str,
    ) -> Result<SigningSession, SigningError> {
        let booking_id = self.booking_id;
        let return_url = Url::parse(return_url)
            .map_err(|err| SigningError::InvalidReturnUrl(err.to_string()))?;

        let contract_number = {
            let mut state = self.lock_state();
            if *state != SigningState::Idle {
                warn!(
                    booking_id,
                    role = %role,
                    state = state.name(),
                    "signing_session: begin rejected, attempt already running"
                );
                return Err(SigningError::SessionBusy(state.name()));
            }

            let envelope = self.store.envelope(booking_id);
            let contract_number = match envelope.contract_number() {
                Some(number) if self.store.signing_enabled(booking_id, role) => number.to_string(),
                _ => return Err(SigningError::NothingToSign { booking_id, role }),
            };

            *state = SigningState::RequestingSession { role };
            contract_number
        };
        let reset = IdleOnDrop::arm(&self.state, booking_id);

        info!(
            booking_id,
            role = %role,
            contract_number,
            "signing_session: requesting signing session"
        );

        let requested = self
            .signing_provider
            .create_signing_session(&contract_number, role, return_url.as_str())
            .await;

        let signing_url = match requested {
            Ok(Some(url)) if Url::parse(&url).is_ok() => url,
            Ok(other) => {
                warn!(
                    booking_id,
                    role = %role,
                    returned = ?other,
                    "signing_session: provider returned no usable signing url"
                );
                return Err(SigningError::SessionCreationFailed(
                    "provider returned no signing url".to_string(),
                ));
            }
            Err(err) => {
                error!(
                    booking_id,
                    role = %role,
                    provider_error = ?err,
                    "signing_session: failed to create signing session"
                );
                return Err(SigningError::SessionCreationFailed(err.to_string()));
            }
        };

        let session = SigningSession {
            role,
            envelope_id: contract_number,
            signing_url,
            return_url: return_url.to_string(),
        };
        self.set_state(SigningState::SessionActive {
            session: session.clone(),
        });
        reset.disarm();

        info!(booking_id, role = %role, "signing_session: session active");
        Ok(session)
    }

    /// The embedded surface went away. Nothing is assumed about the outcome.
    pub fn surface_closed(&self) -> Result<(), SigningError> {
        let mut state = self.lock_state();
        let session = match &*state {
            SigningState::SessionActive { session } => session.clone(),
            SigningState::AwaitingReturn { .. } => return Ok(()),
            _ => return Err(SigningError::NoActiveSession),
        };

        info!(
            booking_id = self.booking_id,
            role = %session.role,
            "signing_session: surface closed, awaiting return signal"
        );
        *state = SigningState::AwaitingReturn { session };
        Ok(())
    }

    /// Handles the return signal: re-reads the authoritative status and clears
    /// the session whatever the reconciliation outcome.
    pub async fn complete(&self, trigger: ReconcileTrigger) -> ReconcileResult {
        let booking_id = self.booking_id;
        let role = {
            let mut state = self.lock_state();
            let role = match &*state {
                SigningState::SessionActive { session }
                | SigningState::AwaitingReturn { session } => Some(session.role),
                _ => None,
            };
            if role.is_none() {
                info!(
                    booking_id,
                    trigger = trigger.as_str(),
                    "signing_session: return without a tracked session, reconciling anyway"
                );
            }
            *state = SigningState::Reconciling { role };
            role
        };
        let reset = IdleOnDrop::arm(&self.state, booking_id);

        let result = self.reconciler.reconcile(booking_id, trigger).await;
        drop(reset);

        match &result {
            Ok(_) => info!(
                booking_id,
                role = ?role,
                "signing_session: reconciliation finished, session cleared"
            ),
            Err(err) => warn!(
                booking_id,
                role = ?role,
                error = %err,
                "signing_session: reconciliation failed, session cleared"
            ),
        }

        result
    }

    fn set_state(&self, next: SigningState) {
        *self.lock_state() = next;
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, SigningState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Puts the state back to `Idle` when dropped while armed, so a caller that
/// goes away mid-await cannot leave the coordinator stuck in a busy state.
struct IdleOnDrop<'a> {
    state: &'a Mutex<SigningState>,
    booking_id: i64,
    armed: bool,
}

impl<'a> IdleOnDrop<'a> {
    fn arm(state: &'a Mutex<SigningState>, booking_id: i64) -> Self {
        Self {
            state,
            booking_id,
            armed: true,
        }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for IdleOnDrop<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }

        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if *state != SigningState::Idle {
            debug!(
                booking_id = self.booking_id,
                state = state.name(),
                "signing_session: attempt ended, back to idle"
            );
            *state = SigningState::Idle;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::usecases::status_reconciler::RetryPolicy;
    use chrono::Utc;
    use std::time::Duration;
    use domain::{
        repositories::{
            envelope_status::{EnvelopeStatusError, MockEnvelopeStatusSource},
            signing_provider::{MockSigningProvider, SigningProviderError},
        },
        value_objects::{
            contracts::{ContractEnvelope, EnvelopeSnapshot, Signature},
            enums::booking_statuses::BookingStatus,
            reconciliation::ReturnMarkers,
        },
    };

    const BOOKING_ID: i64 = 11;
    const RETURN_URL: &str = "https://app.example.com/bookings/11/contract";

    fn snapshot(owner_signed: bool) -> EnvelopeSnapshot {
        let owner = if owner_signed {
            Signature::Signed { at: Some(Utc::now()) }
        } else {
            Signature::Unsigned
        };
        EnvelopeSnapshot {
            booking_id: BOOKING_ID,
            booking_status: BookingStatus::DepositPaid,
            envelope: ContractEnvelope::new("ENV-1", owner, Signature::Unsigned),
            fetched_at: Utc::now(),
        }
    }

    async fn coordinator(
        provider: MockSigningProvider,
        mut source: MockEnvelopeStatusSource,
        snapshots: Vec<EnvelopeSnapshot>,
    ) -> (
        SigningSessionCoordinator<MockSigningProvider, MockEnvelopeStatusSource>,
        Arc<ContractEnvelopeStore>,
        crate::usecases::contract_envelopes::ObserverGuard,
    ) {
        let mut snapshots = snapshots.into_iter();
        source.expect_fetch_snapshot().returning(move |_| {
            let next = snapshots.next();
            Box::pin(async move {
                next.ok_or_else(|| {
                    EnvelopeStatusError::Provider(SigningProviderError::Transport(
                        "no more snapshots".to_string(),
                    ))
                })
            })
        });

        let store = Arc::new(ContractEnvelopeStore::new());
        let reconciler = Arc::new(StatusReconciler::new(
            Arc::new(source),
            Arc::clone(&store),
            RetryPolicy::no_retry(),
        ));
        let guard = store.observe(BOOKING_ID);
        reconciler
            .reconcile(BOOKING_ID, ReconcileTrigger::Mount)
            .await
            .unwrap();

        (
            SigningSessionCoordinator::new(BOOKING_ID, Arc::new(provider), reconciler),
            store,
            guard,
        )
    }

    #[tokio::test]
    async fn owner_signs_and_redirect_reconciles() {
        let mut provider = MockSigningProvider::new();
        provider
            .expect_create_signing_session()
            .withf(|contract, role, return_url| {
                contract == "ENV-1" && *role == SignerRole::Owner && return_url == RETURN_URL
            })
            .times(1)
            .returning(|_, _, _| {
                Box::pin(async { Ok(Some("https://sign.example.com/s/abc".to_string())) })
            });

        let (coordinator, store, _guard) = coordinator(
            provider,
            MockEnvelopeStatusSource::new(),
            vec![snapshot(false), snapshot(true)],
        )
        .await;

        let session = coordinator.begin(SignerRole::Owner, RETURN_URL).await.unwrap();
        assert_eq!(session.envelope_id, "ENV-1");
        assert_eq!(coordinator.state().name(), "session_active");

        coordinator.surface_closed().unwrap();
        assert_eq!(coordinator.state().name(), "awaiting_return");
        assert!(store.party_needs_to_sign(BOOKING_ID, SignerRole::Owner));

        let markers = ReturnMarkers::from_query([("event", "completed")]).unwrap();
        coordinator
            .complete(ReconcileTrigger::RedirectReturn(markers))
            .await
            .unwrap();

        assert_eq!(coordinator.state(), SigningState::Idle);
        assert!(coordinator.active_session().is_none());
        assert!(!store.party_needs_to_sign(BOOKING_ID, SignerRole::Owner));
        assert!(store.party_needs_to_sign(BOOKING_ID, SignerRole::Renter));
    }

    #[tokio::test]
    async fn missing_url_returns_to_idle() {
        let mut provider = MockSigningProvider::new();
        provider
            .expect_create_signing_session()
            .times(1)
            .returning(|_, _, _| Box::pin(async { Ok(None) }));

        let (coordinator, _store, _guard) =
            coordinator(provider, MockEnvelopeStatusSource::new(), vec![snapshot(false)]).await;

        let err = coordinator.begin(SignerRole::Renter, RETURN_URL).await.unwrap_err();
        assert!(matches!(err, SigningError::SessionCreationFailed(_)));
        assert_eq!(coordinator.state(), SigningState::Idle);
    }

    #[tokio::test]
    async fn transport_error_surfaces_as_session_creation_failure() {
        let mut provider = MockSigningProvider::new();
        provider
            .expect_create_signing_session()
            .times(1)
            .returning(|_, _, _| {
                Box::pin(async { Err(SigningProviderError::Transport("timeout".to_string())) })
            });

        let (coordinator, _store, _guard) =
            coordinator(provider, MockEnvelopeStatusSource::new(), vec![snapshot(false)]).await;

        let err = coordinator.begin(SignerRole::Owner, RETURN_URL).await.unwrap_err();
        assert!(matches!(err, SigningError::SessionCreationFailed(_)));
        assert_eq!(coordinator.state(), SigningState::Idle);
    }

    #[tokio::test]
    async fn party_that_already_signed_cannot_start_a_session() {
        let mut provider = MockSigningProvider::new();
        provider.expect_create_signing_session().times(0);

        let (coordinator, _store, _guard) =
            coordinator(provider, MockEnvelopeStatusSource::new(), vec![snapshot(true)]).await;

        let err = coordinator.begin(SignerRole::Owner, RETURN_URL).await.unwrap_err();
        assert_eq!(
            err,
            SigningError::NothingToSign {
                booking_id: BOOKING_ID,
                role: SignerRole::Owner,
            }
        );
    }

    #[tokio::test]
    async fn second_begin_while_active_is_busy() {
        let mut provider = MockSigningProvider::new();
        provider
            .expect_create_signing_session()
            .times(1)
            .returning(|_, _, _| {
                Box::pin(async { Ok(Some("https://sign.example.com/s/xyz".to_string())) })
            });

        let (coordinator, _store, _guard) =
            coordinator(provider, MockEnvelopeStatusSource::new(), vec![snapshot(false)]).await;

        coordinator.begin(SignerRole::Renter, RETURN_URL).await.unwrap();
        let err = coordinator.begin(SignerRole::Renter, RETURN_URL).await.unwrap_err();
        assert_eq!(err, SigningError::SessionBusy("session_active"));
    }

    #[tokio::test]
    async fn failed_reconciliation_still_clears_the_session() {
        let mut provider = MockSigningProvider::new();
        provider
            .expect_create_signing_session()
            .times(1)
            .returning(|_, _, _| {
                Box::pin(async { Ok(Some("https://sign.example.com/s/1".to_string())) })
            });

        let (coordinator, store, _guard) =
            coordinator(provider, MockEnvelopeStatusSource::new(), vec![snapshot(false)]).await;

        coordinator.begin(SignerRole::Owner, RETURN_URL).await.unwrap();
        let result = coordinator.complete(ReconcileTrigger::ManualRefresh).await;

        assert!(result.is_err());
        assert_eq!(coordinator.state(), SigningState::Idle);
        assert!(store.party_needs_to_sign(BOOKING_ID, SignerRole::Owner));
    }

    #[tokio::test]
    async fn abandoned_begin_does_not_leave_the_coordinator_busy() {
        let mut provider = MockSigningProvider::new();
        let mut calls = 0;
        provider
            .expect_create_signing_session()
            .times(2)
            .returning(move |_, _, _| {
                calls += 1;
                let slow = calls == 1;
                Box::pin(async move {
                    if slow {
                        tokio::time::sleep(Duration::from_secs(5)).await;
                    }
                    Ok(Some("https://sign.example.com/s/late".to_string()))
                })
            });

        let (coordinator, _store, _guard) =
            coordinator(provider, MockEnvelopeStatusSource::new(), vec![snapshot(false)]).await;

        let abandoned = tokio::time::timeout(
            Duration::from_millis(20),
            coordinator.begin(SignerRole::Owner, RETURN_URL),
        )
        .await;
        assert!(abandoned.is_err());
        assert_eq!(coordinator.state(), SigningState::Idle);

        let session = coordinator.begin(SignerRole::Owner, RETURN_URL).await.unwrap();
        assert_eq!(session.signing_url, "https://sign.example.com/s/late");
    }

    #[tokio::test]
    async fn abandoned_return_still_clears_the_session() {
        let mut provider = MockSigningProvider::new();
        provider
            .expect_create_signing_session()
            .times(2)
            .returning(|_, _, _| {
                Box::pin(async { Ok(Some("https://sign.example.com/s/2".to_string())) })
            });

        let mut source = MockEnvelopeStatusSource::new();
        let mut calls = 0;
        source.expect_fetch_snapshot().returning(move |_| {
            calls += 1;
            let slow = calls > 1;
            Box::pin(async move {
                if slow {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                }
                Ok(snapshot(false))
            })
        });

        let store = Arc::new(ContractEnvelopeStore::new());
        let reconciler = Arc::new(StatusReconciler::new(
            Arc::new(source),
            Arc::clone(&store),
            RetryPolicy::no_retry(),
        ));
        let _guard = store.observe(BOOKING_ID);
        reconciler
            .reconcile(BOOKING_ID, ReconcileTrigger::Mount)
            .await
            .unwrap();
        let coordinator = SigningSessionCoordinator::new(BOOKING_ID, Arc::new(provider), reconciler);

        coordinator.begin(SignerRole::Renter, RETURN_URL).await.unwrap();
        let markers = ReturnMarkers::from_query([("event", "completed")]).unwrap();
        let abandoned = tokio::time::timeout(
            Duration::from_millis(20),
            coordinator.complete(ReconcileTrigger::RedirectReturn(markers)),
        )
        .await;

        assert!(abandoned.is_err());
        assert_eq!(coordinator.state(), SigningState::Idle);
        coordinator.begin(SignerRole::Renter, RETURN_URL).await.unwrap();
    }
}
