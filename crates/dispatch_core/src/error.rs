//! Error vocabulary shared by the engine and the HTTP surface.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("Validation failed: {0}")]
    Validation(String),
    #[error("Idempotency-Key header is required")]
    MissingIdempotencyKey,
    #[error("Idempotency key reused with a different request body")]
    IdempotencyConflict,
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Offer is not valid for this response: {0}")]
    OfferInvalid(String),
    #[error("Offer has expired")]
    OfferExpired,
    #[error("Ride is being processed by another request")]
    RideBusy,
    #[error("Rate limited")]
    RateLimited,
    #[error("Service unavailable: {0}")]
    Unavailable(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl DispatchError {
    /// Stable machine-readable code surfaced in error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            DispatchError::Validation(_) => "VALIDATION_ERROR",
            DispatchError::MissingIdempotencyKey => "MISSING_IDEMPOTENCY_KEY",
            DispatchError::IdempotencyConflict => "IDEMPOTENCY_CONFLICT",
            DispatchError::NotFound(_) => "NOT_FOUND",
            DispatchError::OfferInvalid(_) => "OFFER_INVALID",
            DispatchError::OfferExpired => "OFFER_EXPIRED",
            DispatchError::RideBusy => "RIDE_BUSY",
            DispatchError::RateLimited => "RATE_LIMITED",
            DispatchError::Unavailable(_) => "SERVICE_UNAVAILABLE",
            DispatchError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// HTTP status the error maps to.
    pub fn http_status(&self) -> u16 {
        match self {
            DispatchError::Validation(_) => 400,
            DispatchError::MissingIdempotencyKey => 400,
            DispatchError::IdempotencyConflict => 422,
            DispatchError::NotFound(_) => 404,
            DispatchError::OfferInvalid(_) => 400,
            DispatchError::OfferExpired => 400,
            DispatchError::RideBusy => 409,
            DispatchError::RateLimited => 429,
            DispatchError::Unavailable(_) => 503,
            DispatchError::Internal(_) => 500,
        }
    }
}

pub type DispatchResult<T> = Result<T, DispatchError>;
