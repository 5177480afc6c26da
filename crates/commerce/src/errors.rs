use domain::DomainError;
use persistence::StoreError;
use read_model::SearchError;
use thiserror::Error;

/// Service-level error taxonomy shared by every catalog and order operation
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("{0}")]
    NotFound(String),

    #[error("Downstream unavailable: {0}")]
    DownstreamUnavailable(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<StoreError> for ServiceError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { entity, id } => {
                ServiceError::NotFound(format!("{} not found: {}", entity, id))
            }
            StoreError::Conflict(msg) => ServiceError::Validation(msg),
            other if other.is_connectivity() => {
                ServiceError::DownstreamUnavailable(other.to_string())
            }
            other => ServiceError::Internal(other.to_string()),
        }
    }
}

impl From<DomainError> for ServiceError {
    fn from(err: DomainError) -> Self {
        match err {
            DomainError::ValidationError(msg) => ServiceError::Validation(msg),
            other => ServiceError::Validation(other.to_string()),
        }
    }
}

impl From<SearchError> for ServiceError {
    fn from(err: SearchError) -> Self {
        ServiceError::DownstreamUnavailable(err.to_string())
    }
}
