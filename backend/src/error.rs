use thiserror::Error;

use crate::crm::CrmError;

/// Terminal error kinds surfaced by the booking engine.
///
/// The host maps these onto its transport (HTTP status, outcome records).
/// Stable string codes are exposed through [`EngineError::code`].
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("exam not found: {0}")]
    ExamNotFound(String),

    #[error("contact not found: {0}")]
    ContactNotFound(String),

    #[error("booking not found: {0}")]
    BookingNotFound(String),

    #[error("exam {0} is not active")]
    ExamNotActive(String),

    #[error("exam {0} is fully booked")]
    ExamFull(String),

    #[error("insufficient credits for {0}")]
    InsufficientCredits(String),

    #[error("duplicate active booking: {0}")]
    DuplicateBooking(String),

    #[error("booking {0} is cancelled")]
    BookingCancelled(String),

    #[error("exam type mismatch: booking is {booked}, target session is {target}")]
    ExamTypeMismatch { booked: String, target: String },

    #[error("exam date {0} is in the past")]
    ExamPastDate(String),

    #[error("could not acquire {0} lock")]
    LockAcquisitionFailed(String),

    #[error("crm unavailable: {0}")]
    CrmUnavailable(#[source] CrmError),

    #[error("cleanup of partially created booking failed: {0}")]
    CleanupFailed(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl EngineError {
    /// Stable machine-readable code for outcome records.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::Unauthorized(_) => "UNAUTHORIZED",
            Self::ExamNotFound(_) => "EXAM_NOT_FOUND",
            Self::ContactNotFound(_) => "CONTACT_NOT_FOUND",
            Self::BookingNotFound(_) => "BOOKING_NOT_FOUND",
            Self::ExamNotActive(_) => "EXAM_NOT_ACTIVE",
            Self::ExamFull(_) => "EXAM_FULL",
            Self::InsufficientCredits(_) => "INSUFFICIENT_CREDITS",
            Self::DuplicateBooking(_) => "DUPLICATE_BOOKING",
            Self::BookingCancelled(_) => "BOOKING_CANCELLED",
            Self::ExamTypeMismatch { .. } => "EXAM_TYPE_MISMATCH",
            Self::ExamPastDate(_) => "EXAM_PAST_DATE",
            Self::LockAcquisitionFailed(_) => "LOCK_ACQUISITION_FAILED",
            Self::CrmUnavailable(_) => "CRM_UNAVAILABLE",
            Self::CleanupFailed(_) => "CLEANUP_FAILED",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Transient errors are safe to retry end-to-end; terminal ones are not.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::LockAcquisitionFailed(_) | Self::CrmUnavailable(_))
    }
}

impl From<CrmError> for EngineError {
    fn from(e: CrmError) -> Self {
        Self::CrmUnavailable(e)
    }
}

/// Non-fatal conditions attached to successful outcomes.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize)]
pub struct Warning {
    pub code: &'static str,
    pub detail: String,
}

impl Warning {
    pub fn association_failed(detail: impl Into<String>) -> Self {
        Self {
            code: "ASSOCIATION_FAILED",
            detail: detail.into(),
        }
    }

    pub fn credit_refund_failed(detail: impl Into<String>) -> Self {
        Self {
            code: "CREDIT_REFUND_FAILED",
            detail: detail.into(),
        }
    }

    pub fn projection_failed(detail: impl Into<String>) -> Self {
        Self {
            code: "PROJECTION_FAILED",
            detail: detail.into(),
        }
    }

    pub fn counter_fallback(detail: impl Into<String>) -> Self {
        Self {
            code: "COUNTER_FALLBACK",
            detail: detail.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(EngineError::ExamFull("x".into()).code(), "EXAM_FULL");
        assert_eq!(
            EngineError::LockAcquisitionFailed("session".into()).code(),
            "LOCK_ACQUISITION_FAILED"
        );
        assert_eq!(
            EngineError::InsufficientCredits("sjmini".into()).code(),
            "INSUFFICIENT_CREDITS"
        );
    }

    #[test]
    fn transient_split() {
        assert!(EngineError::LockAcquisitionFailed("contact".into()).is_transient());
        assert!(!EngineError::ExamFull("x".into()).is_transient());
    }
}
