use ulid::Ulid;

use crate::model::{AppointmentStatus, Ms};

#[derive(Debug)]
pub enum EngineError {
    /// The slot bucket has no remaining capacity.
    SlotUnavailable,
    /// The date (or the specific time on it) is blocked tenant-wide.
    DateBlocked,
    /// The citizen is under a cancellation-throttle block.
    CpfBlocked { blocked_until: Ms, reason: String },
    InvalidTransition {
        from: AppointmentStatus,
        to: AppointmentStatus,
    },
    RescheduleLimitExceeded,
    NotFound(Ulid),
    AlreadyExists(Ulid),
    /// The entity belongs to a different tenant than the engine.
    TenantMismatch { expected: String, found: String },
    /// Field validation or a hard limit.
    InvalidField(&'static str),
    /// WAL failure. Logged in full; surfaced without business wording.
    Storage(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::SlotUnavailable => write!(f, "slot has no remaining capacity"),
            EngineError::DateBlocked => write!(f, "date is blocked for booking"),
            EngineError::CpfBlocked { blocked_until, reason } => {
                write!(f, "cpf blocked until {blocked_until}: {reason}")
            }
            EngineError::InvalidTransition { from, to } => {
                write!(f, "invalid transition: {from} -> {to}")
            }
            EngineError::RescheduleLimitExceeded => {
                write!(f, "reschedule limit exceeded for this cpf")
            }
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::TenantMismatch { expected, found } => {
                write!(f, "tenant mismatch: expected {expected}, found {found}")
            }
            EngineError::InvalidField(msg) => write!(f, "invalid field: {msg}"),
            EngineError::Storage(_) => write!(f, "internal storage error"),
        }
    }
}

impl std::error::Error for EngineError {}

impl EngineError {
    /// True for rule rejections a caller can present to the citizen.
    /// `Storage` is deliberately excluded.
    pub fn is_business_rule(&self) -> bool {
        !matches!(self, EngineError::Storage(_))
    }
}
