use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::entities::bookings::ContractEntity;
use crate::value_objects::enums::{booking_statuses::BookingStatus, signer_roles::SignerRole};

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, Default)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Signature {
    #[default]
    Unsigned,
    /// Some providers only report a boolean, so the timestamp is optional.
    Signed { at: Option<DateTime<Utc>> },
}

impl Signature {
    pub fn from_wire(signed_at: Option<DateTime<Utc>>, signed: Option<bool>) -> Self {
        match (signed_at, signed) {
            (Some(at), _) => Signature::Signed { at: Some(at) },
            (None, Some(true)) => Signature::Signed { at: None },
            _ => Signature::Unsigned,
        }
    }

    pub fn is_signed(&self) -> bool {
        matches!(self, Signature::Signed { .. })
    }

    pub fn signed_at(&self) -> Option<DateTime<Utc>> {
        match self {
            Signature::Signed { at } => *at,
            Signature::Unsigned => None,
        }
    }
}

/// The rental contract envelope attached to a booking.
#[derive(Debug, Clone, Serialize, PartialEq, Eq, Default)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ContractEnvelope {
    #[default]
    NoEnvelope,
    Pending {
        contract_number: String,
        owner: Signature,
        renter: Signature,
    },
    Executed {
        contract_number: String,
        owner_signed_at: Option<DateTime<Utc>>,
        renter_signed_at: Option<DateTime<Utc>>,
    },
}

impl ContractEnvelope {
    pub fn new(contract_number: impl Into<String>, owner: Signature, renter: Signature) -> Self {
        let contract_number = contract_number.into();
        if contract_number.trim().is_empty() {
            return ContractEnvelope::NoEnvelope;
        }

        if owner.is_signed() && renter.is_signed() {
            ContractEnvelope::Executed {
                contract_number,
                owner_signed_at: owner.signed_at(),
                renter_signed_at: renter.signed_at(),
            }
        } else {
            ContractEnvelope::Pending {
                contract_number,
                owner,
                renter,
            }
        }
    }

    pub fn has_envelope(&self) -> bool {
        !matches!(self, ContractEnvelope::NoEnvelope)
    }

    pub fn contract_number(&self) -> Option<&str> {
        match self {
            ContractEnvelope::NoEnvelope => None,
            ContractEnvelope::Pending {
                contract_number, ..
            }
            | ContractEnvelope::Executed {
                contract_number, ..
            } => Some(contract_number),
        }
    }

    pub fn signature(&self, role: SignerRole) -> Signature {
        match self {
            ContractEnvelope::NoEnvelope => Signature::Unsigned,
            ContractEnvelope::Pending { owner, renter, .. } => match role {
                SignerRole::Owner => *owner,
                SignerRole::Renter => *renter,
            },
            ContractEnvelope::Executed {
                owner_signed_at,
                renter_signed_at,
                ..
            } => Signature::Signed {
                at: match role {
                    SignerRole::Owner => *owner_signed_at,
                    SignerRole::Renter => *renter_signed_at,
                },
            },
        }
    }

    pub fn is_signed_by(&self, role: SignerRole) -> bool {
        self.signature(role).is_signed()
    }

    pub fn both_signed(&self) -> bool {
        matches!(self, ContractEnvelope::Executed { .. })
    }
}

impl From<ContractEntity> for ContractEnvelope {
    fn from(value: ContractEntity) -> Self {
        let Some(contract_number) = value.contract_number else {
            return ContractEnvelope::NoEnvelope;
        };

        ContractEnvelope::new(
            contract_number,
            Signature::from_wire(value.owner_signed_at, value.owner_signed),
            Signature::from_wire(value.renter_signed_at, value.renter_signed),
        )
    }
}

impl From<Option<ContractEntity>> for ContractEnvelope {
    fn from(value: Option<ContractEntity>) -> Self {
        value.map(ContractEnvelope::from).unwrap_or_default()
    }
}

/// Authoritative view of one booking's envelope at `fetched_at`.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct EnvelopeSnapshot {
    pub booking_id: i64,
    pub booking_status: BookingStatus,
    pub envelope: ContractEnvelope,
    pub fetched_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 9, 30, 0).unwrap()
    }

    #[test]
    fn missing_or_blank_contract_number_means_no_envelope() {
        assert_eq!(
            ContractEnvelope::from(ContractEntity::default()),
            ContractEnvelope::NoEnvelope
        );
        let blank = ContractEntity {
            contract_number: Some("  ".to_string()),
            owner_signed: Some(true),
            ..Default::default()
        };
        assert!(!ContractEnvelope::from(blank).has_envelope());
        assert!(!ContractEnvelope::from(None).has_envelope());
    }

    #[test]
    fn timestamp_or_boolean_marks_a_party_as_signed() {
        let envelope = ContractEnvelope::from(ContractEntity {
            contract_number: Some("ENV-1".to_string()),
            owner_signed_at: Some(ts()),
            renter_signed: Some(false),
            ..Default::default()
        });

        assert!(envelope.is_signed_by(SignerRole::Owner));
        assert!(!envelope.is_signed_by(SignerRole::Renter));
        assert!(!envelope.both_signed());
        assert_eq!(envelope.contract_number(), Some("ENV-1"));
    }

    #[test]
    fn both_signatures_make_the_envelope_executed() {
        let envelope = ContractEnvelope::from(ContractEntity {
            contract_number: Some("ENV-2".to_string()),
            owner_signed: Some(true),
            renter_signed_at: Some(ts()),
            ..Default::default()
        });

        assert_eq!(
            envelope,
            ContractEnvelope::Executed {
                contract_number: "ENV-2".to_string(),
                owner_signed_at: None,
                renter_signed_at: Some(ts()),
            }
        );
        assert!(envelope.both_signed());
        assert_eq!(envelope.signature(SignerRole::Renter).signed_at(), Some(ts()));
    }
}
