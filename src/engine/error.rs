use ulid::Ulid;

use crate::model::LessonStatus;

#[derive(Debug)]
pub enum EngineError {
    /// Requested interval has `start >= end`.
    InvalidInterval,
    /// Lesson would start sooner than the minimum booking notice.
    InsufficientNotice,
    /// Lesson would start beyond the advance-booking window.
    TooFarInAdvance,
    /// Lesson start falls outside the configured business hours.
    OutsideBusinessHours,
    /// Interval overlaps an active lesson of the same teacher.
    SlotConflict(Ulid),
    NotFound(Ulid),
    InvalidTransition {
        from: LessonStatus,
        op: &'static str,
    },
    CapacityExceeded(u32),
    AlreadyExists(Ulid),
    /// Student is already enrolled in the lesson.
    AlreadyBooked(Ulid),
    /// Payment gateway answered, but the payment is not confirmed.
    PaymentNotConfirmed(Ulid),
    /// Payment gateway itself failed; the lesson stays pending.
    PaymentGateway(String),
    LimitExceeded(&'static str),
    WalError(String),
}

impl EngineError {
    /// Stable machine-readable label, used in API error bodies and tests.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::InvalidInterval => "invalid_interval",
            EngineError::InsufficientNotice => "insufficient_notice",
            EngineError::TooFarInAdvance => "too_far_in_advance",
            EngineError::OutsideBusinessHours => "outside_business_hours",
            EngineError::SlotConflict(_) => "slot_conflict",
            EngineError::NotFound(_) => "not_found",
            EngineError::InvalidTransition { .. } => "invalid_transition",
            EngineError::CapacityExceeded(_) => "capacity_exceeded",
            EngineError::AlreadyExists(_) => "already_exists",
            EngineError::AlreadyBooked(_) => "already_booked",
            EngineError::PaymentNotConfirmed(_) => "payment_not_confirmed",
            EngineError::PaymentGateway(_) => "payment_gateway",
            EngineError::LimitExceeded(_) => "limit_exceeded",
            EngineError::WalError(_) => "wal_error",
        }
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::InvalidInterval => write!(f, "interval start must be before end"),
            EngineError::InsufficientNotice => write!(f, "insufficient booking notice"),
            EngineError::TooFarInAdvance => write!(f, "lesson is too far in advance"),
            EngineError::OutsideBusinessHours => write!(f, "lesson starts outside business hours"),
            EngineError::SlotConflict(id) => write!(f, "slot unavailable: conflicts with lesson {id}"),
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::InvalidTransition { from, op } => {
                write!(f, "invalid transition: cannot {op} a {from} lesson")
            }
            EngineError::CapacityExceeded(max) => {
                write!(f, "lesson is full: {max} participants")
            }
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::AlreadyBooked(id) => write!(f, "student {id} is already enrolled"),
            EngineError::PaymentNotConfirmed(id) => {
                write!(f, "payment for lesson {id} is not confirmed")
            }
            EngineError::PaymentGateway(e) => write!(f, "payment gateway error: {e}"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "journal error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
