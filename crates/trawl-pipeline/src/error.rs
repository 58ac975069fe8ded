use thiserror::Error;
use trawl_client::ApiError;
use trawl_db::DbError;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// Storage could not be reached. Aborts the current cycle.
    #[error("storage unavailable: {0}")]
    StorageUnavailable(#[source] DbError),

    #[error("storage error: {0}")]
    Store(#[source] DbError),

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error("a collection cycle is already running")]
    Busy,

    #[error("collection scheduler is stopping")]
    Stopped,

    #[error("malformed item: {0}")]
    Malformed(String),
}

impl PipelineError {
    /// Fatal errors abort the whole cycle instead of one item or topic.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, PipelineError::StorageUnavailable(_))
    }
}

impl From<DbError> for PipelineError {
    fn from(err: DbError) -> Self {
        if err.is_unavailable() {
            PipelineError::StorageUnavailable(err)
        } else {
            PipelineError::Store(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unreachable_storage_is_fatal() {
        let err = PipelineError::from(DbError::Sqlx(sqlx::Error::PoolClosed));
        assert!(err.is_fatal());
        assert!(matches!(err, PipelineError::StorageUnavailable(_)));
    }

    #[test]
    fn query_failures_are_not_fatal() {
        let err = PipelineError::from(DbError::NotFound);
        assert!(!err.is_fatal());
        assert!(!PipelineError::Malformed("missing id".to_owned()).is_fatal());
        assert!(!PipelineError::Api(ApiError::Cancelled).is_fatal());
    }
}
