use std::sync::{
    Arc, Mutex, PoisonError,
    atomic::{AtomicBool, Ordering},
};

use bytes::Bytes;
use domain::{
    repositories::{envelope_status::EnvelopeStatusSource, signing_provider::SigningProvider},
    value_objects::{
        contracts::ContractEnvelope,
        enums::{booking_statuses::BookingStatus, signer_roles::SignerRole},
        reconciliation::{ReconcileTrigger, ReturnMarkers},
    },
};
use serde::Serialize;
use tokio::{sync::broadcast::error::RecvError, task::JoinHandle};
use tracing::{debug, info, warn};

use crate::usecases::{
    contract_envelopes::{ContractEnvelopeStore, ObserverGuard},
    document_assembler::{ArtifactSlot, DocumentAssembler, DocumentError},
    signing_session::{SigningError, SigningSession, SigningSessionCoordinator, SigningState},
    status_reconciler::{ReconcileError, ReconcileResult, StatusReconciler},
};

/// Shared collaborators every contract view is built from.
pub struct ContractServices<S, E>
where
    S: SigningProvider + Send + Sync + 'static,
    E: EnvelopeStatusSource + Send + Sync + 'static,
{
    pub signing_provider: Arc<S>,
    pub reconciler: Arc<StatusReconciler<E>>,
    pub assembler: Arc<DocumentAssembler<S>>,
}

impl<S, E> Clone for ContractServices<S, E>
where
    S: SigningProvider + Send + Sync + 'static,
    E: EnvelopeStatusSource + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            signing_provider: Arc::clone(&self.signing_provider),
            reconciler: Arc::clone(&self.reconciler),
            assembler: Arc::clone(&self.assembler),
        }
    }
}

impl<S, E> ContractServices<S, E>
where
    S: SigningProvider + Send + Sync + 'static,
    E: EnvelopeStatusSource + Send + Sync + 'static,
{
    pub fn store(&self) -> &Arc<ContractEnvelopeStore> {
        self.reconciler.store()
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ContractViewState {
    pub booking_id: i64,
    pub booking_status: Option<BookingStatus>,
    pub status_label: Option<&'static str>,
    pub envelope: ContractEnvelope,
    pub owner_can_sign: bool,
    pub renter_can_sign: bool,
    pub both_signed: bool,
    pub signing: SigningState,
    pub document_loaded: bool,
    /// Set when the last reconciliation failed; the flags shown are the last known ones.
    pub sync_error: Option<String>,
}

/// One open contract screen for a booking.
///
/// While mounted the booking is observed, so reconciliation results are
/// applied; after [`ContractView::teardown`] late results are dropped and the
/// held document is released.
pub struct ContractView<S, E>
where
    S: SigningProvider + Send + Sync + 'static,
    E: EnvelopeStatusSource + Send + Sync + 'static,
{
    booking_id: i64,
    services: ContractServices<S, E>,
    coordinator: SigningSessionCoordinator<S, E>,
    artifact: Arc<ArtifactSlot>,
    active: Arc<AtomicBool>,
    booking_missing: AtomicBool,
    observer: Mutex<Option<ObserverGuard>>,
    watcher: Mutex<Option<JoinHandle<()>>>,
    sync_error: Mutex<Option<String>>,
}

impl<S, E> ContractView<S, E>
where
    S: SigningProvider + Send + Sync + 'static,
    E: EnvelopeStatusSource + Send + Sync + 'static,
{
    pub async fn mount(booking_id: i64, services: ContractServices<S, E>) -> Arc<Self> {
        let observer = services.store().observe(booking_id);
        let coordinator = SigningSessionCoordinator::new(
            booking_id,
            Arc::clone(&services.signing_provider),
            Arc::clone(&services.reconciler),
        );

        let view = Arc::new(Self {
            booking_id,
            services,
            coordinator,
            artifact: Arc::new(ArtifactSlot::new()),
            active: Arc::new(AtomicBool::new(true)),
            booking_missing: AtomicBool::new(false),
            observer: Mutex::new(Some(observer)),
            watcher: Mutex::new(None),
            sync_error: Mutex::new(None),
        });

        view.spawn_envelope_watcher();
        info!(booking_id, "contract_view: mounted");

        let result = view
            .services
            .reconciler
            .reconcile(booking_id, ReconcileTrigger::Mount)
            .await;
        view.note_reconcile(&result);
        view.load_document_quietly().await;

        view
    }

    pub fn booking_id(&self) -> i64 {
        self.booking_id
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// The booking service answered the last pass with "not found".
    pub fn booking_missing(&self) -> bool {
        self.booking_missing.load(Ordering::SeqCst)
    }

    pub async fn state(&self) -> ContractViewState {
        let document_loaded = self.artifact.is_loaded().await;
        let sync_error = self
            .sync_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let store = self.services.store();
        let record = store.record(self.booking_id);

        ContractViewState {
            booking_id: self.booking_id,
            booking_status: record.as_ref().map(|record| record.booking_status),
            status_label: record.as_ref().map(|record| record.booking_status.label()),
            envelope: record.map(|record| record.envelope).unwrap_or_default(),
            owner_can_sign: store.signing_enabled(self.booking_id, SignerRole::Owner),
            renter_can_sign: store.signing_enabled(self.booking_id, SignerRole::Renter),
            both_signed: store.both_signed(self.booking_id),
            signing: self.coordinator.state(),
            document_loaded,
            sync_error,
        }
    }

    /// Redirect back from the provider. Without marker parameters nothing is forced.
    pub async fn handle_return<'a, I>(&self, query: I) -> Option<ReconcileResult>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let Some(markers) = ReturnMarkers::from_query(query) else {
            debug!(
                booking_id = self.booking_id,
                "contract_view: return without markers, no reconciliation forced"
            );
            return None;
        };

        info!(
            booking_id = self.booking_id,
            event = ?markers.event(),
            "contract_view: signing return detected"
        );

        let result = self
            .coordinator
            .complete(ReconcileTrigger::RedirectReturn(markers))
            .await;
        self.note_reconcile(&result);
        self.load_document_quietly().await;

        Some(result)
    }

    pub async fn refresh(&self) -> ReconcileResult {
        let result = self
            .services
            .reconciler
            .reconcile(self.booking_id, ReconcileTrigger::ManualRefresh)
            .await;
        self.note_reconcile(&result);
        self.load_document_quietly().await;
        result
    }

    pub async fn sign(
        &self,
        role: SignerRole,
        return_url: &str,
    ) -> Result<SigningSession, SigningError> {
        self.coordinator.begin(role, return_url).await
    }

    pub fn surface_closed(&self) -> Result<(), SigningError> {
        self.coordinator.surface_closed()
    }

    /// Bytes of the combined document. The held artifact is reused only while
    /// it belongs to the envelope currently in the store.
    pub async fn document(&self) -> Result<Bytes, DocumentError> {
        let current = self
            .services
            .store()
            .envelope(self.booking_id)
            .contract_number()
            .map(str::to_owned);
        let held = self.artifact.contract_number().await;

        if held.is_some() && held == current {
            if let Some(read) = self.artifact.read().await {
                return read.map_err(|err| DocumentError::FetchFailed(err.to_string()));
            }
        } else if held.is_some() {
            debug!(
                booking_id = self.booking_id,
                held = ?held,
                current = ?current,
                "contract_view: held document belongs to another envelope, refetching"
            );
            self.artifact.clear().await;
        }

        let artifact = self
            .services
            .assembler
            .fetch_combined(self.booking_id)
            .await?;
        let bytes = artifact
            .read()
            .await
            .map_err(|err| DocumentError::FetchFailed(err.to_string()))?;

        if self.is_active() {
            self.artifact.replace(artifact).await;
        }

        Ok(bytes)
    }

    pub async fn teardown(&self) {
        if !self.active.swap(false, Ordering::SeqCst) {
            return;
        }

        let watcher = self
            .watcher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(watcher) = watcher {
            watcher.abort();
        }
        let observer = self
            .observer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        drop(observer);
        self.artifact.clear().await;

        info!(booking_id = self.booking_id, "contract_view: torn down");
    }

    fn note_reconcile(&self, result: &ReconcileResult) {
        let mut sync_error = self
            .sync_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        self.booking_missing.store(
            matches!(result, Err(ReconcileError::BookingNotFound(_))),
            Ordering::SeqCst,
        );
        match result {
            Ok(_) => *sync_error = None,
            Err(err) => {
                warn!(
                    booking_id = self.booking_id,
                    error = %err,
                    "contract_view: reconciliation failed, showing last known flags"
                );
                *sync_error = Some(err.to_string());
            }
        }
    }

    async fn load_document_quietly(&self) {
        fetch_into_slot(
            self.booking_id,
            &self.services.assembler,
            &self.artifact,
            &self.active,
        )
        .await;
    }

    fn spawn_envelope_watcher(&self) {
        let booking_id = self.booking_id;
        let mut changes = self.services.store().subscribe();
        let reconciler = Arc::clone(&self.services.reconciler);
        let assembler = Arc::clone(&self.services.assembler);
        let artifact = Arc::clone(&self.artifact);
        let active = Arc::clone(&self.active);

        let handle = tokio::spawn(async move {
            loop {
                match changes.recv().await {
                    Ok(change) if change.booking_id == booking_id && change.appeared => {
                        info!(booking_id, "contract_view: envelope appeared");
                        if let Err(err) = reconciler
                            .reconcile(booking_id, ReconcileTrigger::EnvelopeAppeared)
                            .await
                        {
                            log_watcher_error(booking_id, &err);
                        }
                        fetch_into_slot(booking_id, &assembler, &artifact, &active).await;
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        debug!(booking_id, skipped, "contract_view: watcher lagged");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });

        *self.watcher.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
    }
}

impl<S, E> Drop for ContractView<S, E>
where
    S: SigningProvider + Send + Sync + 'static,
    E: EnvelopeStatusSource + Send + Sync + 'static,
{
    fn drop(&mut self) {
        if let Some(watcher) = self
            .watcher
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            watcher.abort();
        }
    }
}

async fn fetch_into_slot<S>(
    booking_id: i64,
    assembler: &DocumentAssembler<S>,
    slot: &ArtifactSlot,
    active: &AtomicBool,
) where
    S: SigningProvider + Send + Sync + 'static,
{
    if !assembler.is_ready(booking_id) {
        return;
    }

    match assembler.fetch_combined(booking_id).await {
        Ok(artifact) if active.load(Ordering::SeqCst) => slot.replace(artifact).await,
        Ok(_) => debug!(booking_id, "contract_view: view closed, dropping fetched document"),
        Err(err) => warn!(
            booking_id,
            error = %err,
            retryable = err.is_retryable(),
            "contract_view: document fetch failed"
        ),
    }
}

fn log_watcher_error(booking_id: i64, err: &ReconcileError) {
    warn!(
        booking_id,
        error = %err,
        "contract_view: reconciliation after envelope appearance failed"
    );
}
