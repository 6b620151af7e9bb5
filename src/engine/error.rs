use ulid::Ulid;

use crate::model::{BookingStatus, MonthKey};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    NotFound(Ulid),
    AlreadyExists(Ulid),
    /// Debit rejected; nothing was written.
    InsufficientBalance {
        available: u32,
        requested: u32,
    },
    /// Check-in quota already consumed for this client and month.
    AlreadyUsed {
        client_id: Ulid,
        month: MonthKey,
    },
    InvalidSlot(&'static str),
    InvalidRequest(&'static str),
    InvalidTransition {
        id: Ulid,
        status: BookingStatus,
    },
    PackageExpired(Ulid),
    SubscriptionInactive(Ulid),
    /// Online-only subscriptions carry no countable balance.
    NotMetered(Ulid),
    /// Credit source belongs to a different client or coach than the booking.
    CreditMismatch(Ulid),
    InvariantViolation(String),
    LimitExceeded(&'static str),
    WalError(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::InsufficientBalance { available, requested } => write!(
                f,
                "insufficient balance: {requested} requested, {available} available"
            ),
            EngineError::AlreadyUsed { client_id, month } => write!(
                f,
                "check-in already used by client {client_id} for {}",
                month.format("%Y-%m")
            ),
            EngineError::InvalidSlot(msg) => write!(f, "invalid slot: {msg}"),
            EngineError::InvalidRequest(msg) => write!(f, "invalid request: {msg}"),
            EngineError::InvalidTransition { id, status } => write!(
                f,
                "booking {id} is {}, expected confirmed",
                status.as_str()
            ),
            EngineError::PackageExpired(id) => write!(f, "package expired: {id}"),
            EngineError::SubscriptionInactive(id) => write!(f, "subscription inactive: {id}"),
            EngineError::NotMetered(id) => {
                write!(f, "subscription {id} is online-only and has no session balance")
            }
            EngineError::CreditMismatch(id) => {
                write!(f, "credit source {id} does not belong to this client and coach")
            }
            EngineError::InvariantViolation(msg) => write!(f, "invariant violation: {msg}"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
