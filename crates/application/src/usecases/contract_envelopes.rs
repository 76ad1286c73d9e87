use std::{
    collections::HashMap,
    sync::{Arc, Mutex, PoisonError, RwLock},
};

use chrono::{DateTime, Utc};
use domain::value_objects::{
    contracts::{ContractEnvelope, EnvelopeSnapshot},
    enums::{booking_statuses::BookingStatus, signer_roles::SignerRole},
};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

const CHANGE_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct EnvelopeRecord {
    pub booking_status: BookingStatus,
    pub envelope: ContractEnvelope,
    pub synced_at: DateTime<Utc>,
}

/// Emitted whenever a reconciliation write changes a booking's record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvelopeChange {
    pub booking_id: i64,
    /// `has_envelope` went from false to true.
    pub appeared: bool,
    /// Parties whose signature the provider no longer reports.
    pub regressed: Vec<SignerRole>,
}

/// Last known envelope state per booking.
///
/// Everything outside this crate reads; the only write path is
/// [`ContractEnvelopeStore::apply_snapshot`], called by the status reconciler.
pub struct ContractEnvelopeStore {
    records: RwLock<HashMap<i64, EnvelopeRecord>>,
    observers: Mutex<HashMap<i64, usize>>,
    changes: broadcast::Sender<EnvelopeChange>,
}

impl Default for ContractEnvelopeStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ContractEnvelopeStore {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            records: RwLock::new(HashMap::new()),
            observers: Mutex::new(HashMap::new()),
            changes,
        }
    }

    pub fn record(&self, booking_id: i64) -> Option<EnvelopeRecord> {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&booking_id)
            .cloned()
    }

    pub fn envelope(&self, booking_id: i64) -> ContractEnvelope {
        self.record(booking_id)
            .map(|record| record.envelope)
            .unwrap_or_default()
    }

    pub fn has_envelope(&self, booking_id: i64) -> bool {
        self.envelope(booking_id).has_envelope()
    }

    pub fn party_needs_to_sign(&self, booking_id: i64, role: SignerRole) -> bool {
        let envelope = self.envelope(booking_id);
        envelope.has_envelope() && !envelope.is_signed_by(role)
    }

    pub fn both_signed(&self, booking_id: i64) -> bool {
        self.envelope(booking_id).both_signed()
    }

    /// Whether the sign control should be enabled: the party still has to sign
    /// and the booking has not been canceled or closed since the envelope was issued.
    pub fn signing_enabled(&self, booking_id: i64, role: SignerRole) -> bool {
        self.record(booking_id).is_some_and(|record| {
            record.booking_status.permits_signing()
                && record.envelope.has_envelope()
                && !record.envelope.is_signed_by(role)
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EnvelopeChange> {
        self.changes.subscribe()
    }

    pub fn observe(self: &Arc<Self>, booking_id: i64) -> ObserverGuard {
        let mut observers = self.observers.lock().unwrap_or_else(PoisonError::into_inner);
        *observers.entry(booking_id).or_insert(0) += 1;
        debug!(booking_id, "contract_envelopes: observer attached");

        ObserverGuard {
            store: Arc::clone(self),
            booking_id,
        }
    }

    pub fn has_observers(&self, booking_id: i64) -> bool {
        self.observers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&booking_id)
            .is_some_and(|count| *count > 0)
    }

    /// Overwrites both signature flags with the provider's snapshot.
    pub(crate) fn apply_snapshot(&self, snapshot: EnvelopeSnapshot) -> EnvelopeChange {
        let booking_id = snapshot.booking_id;
        let next = EnvelopeRecord {
            booking_status: snapshot.booking_status,
            envelope: snapshot.envelope,
            synced_at: snapshot.fetched_at,
        };

        let previous = {
            let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
            records.insert(booking_id, next.clone())
        };

        let appeared = previous
            .as_ref()
            .is_some_and(|record| !record.envelope.has_envelope())
            && next.envelope.has_envelope();

        let regressed: Vec<SignerRole> = match &previous {
            Some(record)
                if record.envelope.contract_number() == next.envelope.contract_number() =>
            {
                [SignerRole::Owner, SignerRole::Renter]
                    .into_iter()
                    .filter(|role| {
                        record.envelope.is_signed_by(*role) && !next.envelope.is_signed_by(*role)
                    })
                    .collect()
            }
            _ => Vec::new(),
        };

        if let Some(record) = &previous {
            if record.envelope.has_envelope()
                && record.envelope.contract_number() != next.envelope.contract_number()
            {
                info!(
                    booking_id,
                    previous = ?record.envelope.contract_number(),
                    current = ?next.envelope.contract_number(),
                    "contract_envelopes: envelope superseded"
                );
            }
        }

        for role in &regressed {
            warn!(
                booking_id,
                role = %role,
                "contract_envelopes: provider no longer reports signature, accepting authoritative snapshot"
            );
        }

        let change = EnvelopeChange {
            booking_id,
            appeared,
            regressed,
        };

        let changed = previous.as_ref().is_none_or(|record| {
            record.booking_status != next.booking_status || record.envelope != next.envelope
        });
        if changed {
            debug!(
                booking_id,
                status = %next.booking_status,
                appeared,
                "contract_envelopes: record updated"
            );
            // No subscribers is fine.
            let _ = self.changes.send(change.clone());
        }

        change
    }

    fn release_observer(&self, booking_id: i64) {
        let mut observers = self.observers.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(count) = observers.get_mut(&booking_id) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                observers.remove(&booking_id);
            }
        }
        debug!(booking_id, "contract_envelopes: observer released");
    }
}

/// Keeps a booking "observed" while alive. Reconciliation results for
/// bookings without observers are discarded.
pub struct ObserverGuard {
    store: Arc<ContractEnvelopeStore>,
    booking_id: i64,
}

impl ObserverGuard {
    pub fn booking_id(&self) -> i64 {
        self.booking_id
    }
}

impl Drop for ObserverGuard {
    fn drop(&mut self) {
        self.store.release_observer(self.booking_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::value_objects::contracts::Signature;

    fn snapshot(envelope: ContractEnvelope) -> EnvelopeSnapshot {
        EnvelopeSnapshot {
            booking_id: 7,
            booking_status: BookingStatus::DepositPaid,
            envelope,
            fetched_at: Utc::now(),
        }
    }

    fn pending(owner: bool, renter: bool) -> ContractEnvelope {
        let mark = |signed: bool| {
            if signed {
                Signature::Signed { at: None }
            } else {
                Signature::Unsigned
            }
        };
        ContractEnvelope::new("ENV-1", mark(owner), mark(renter))
    }

    #[test]
    fn no_party_needs_to_sign_without_an_envelope() {
        let store = ContractEnvelopeStore::new();
        assert!(!store.party_needs_to_sign(7, SignerRole::Owner));
        assert!(!store.party_needs_to_sign(7, SignerRole::Renter));

        store.apply_snapshot(snapshot(ContractEnvelope::NoEnvelope));
        assert!(!store.has_envelope(7));
        assert!(!store.party_needs_to_sign(7, SignerRole::Owner));
        assert!(!store.party_needs_to_sign(7, SignerRole::Renter));
    }

    #[test]
    fn applying_the_same_snapshot_twice_is_idempotent() {
        let store = ContractEnvelopeStore::new();
        let snap = snapshot(pending(true, false));

        store.apply_snapshot(snap.clone());
        let once = store.record(7);
        let change = store.apply_snapshot(snap);

        assert_eq!(store.record(7), once);
        assert!(!change.appeared);
        assert!(change.regressed.is_empty());
    }

    #[test]
    fn reports_envelope_appearance_only_after_a_known_absence() {
        let store = ContractEnvelopeStore::new();
        let first = store.apply_snapshot(snapshot(pending(false, false)));
        assert!(!first.appeared);

        let store = ContractEnvelopeStore::new();
        store.apply_snapshot(snapshot(ContractEnvelope::NoEnvelope));
        let change = store.apply_snapshot(snapshot(pending(false, false)));
        assert!(change.appeared);
        assert!(store.party_needs_to_sign(7, SignerRole::Owner));
    }

    #[test]
    fn canceled_booking_disables_signing_but_keeps_flags() {
        let store = ContractEnvelopeStore::new();
        let mut snap = snapshot(pending(false, false));
        snap.booking_status = BookingStatus::Canceled;
        store.apply_snapshot(snap);

        assert!(store.party_needs_to_sign(7, SignerRole::Renter));
        assert!(!store.signing_enabled(7, SignerRole::Renter));
    }

    #[test]
    fn records_regressions_reported_by_the_provider() {
        let store = ContractEnvelopeStore::new();
        store.apply_snapshot(snapshot(pending(true, false)));
        let change = store.apply_snapshot(snapshot(pending(false, false)));

        assert_eq!(change.regressed, vec![SignerRole::Owner]);
    }

    #[test]
    fn observer_guard_tracks_liveness() {
        let store = Arc::new(ContractEnvelopeStore::new());
        let first = store.observe(7);
        let second = store.observe(7);
        assert!(store.has_observers(7));

        drop(first);
        assert!(store.has_observers(7));
        drop(second);
        assert!(!store.has_observers(7));
    }

    #[tokio::test]
    async fn broadcasts_changes_to_subscribers() {
        let store = ContractEnvelopeStore::new();
        let mut changes = store.subscribe();

        store.apply_snapshot(snapshot(ContractEnvelope::NoEnvelope));
        store.apply_snapshot(snapshot(pending(false, false)));

        assert!(!changes.recv().await.unwrap().appeared);
        assert!(changes.recv().await.unwrap().appeared);
    }
}
