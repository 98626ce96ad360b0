//! Error types for datakit

use thiserror::Error;

/// Result type alias for datakit operations
pub type Result<T> = std::result::Result<T, DataKitError>;

/// Unified error type for all datakit operations
#[derive(Error, Debug, Clone)]
pub enum DataKitError {
    #[error("MongoDB error: {0}")]
    MongoDb(String),

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Query error: {0}")]
    Query(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl DataKitError {
    /// Returns true if this error is potentially retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DataKitError::Timeout(_) | DataKitError::Connection(_)
        )
    }

    /// Returns true if the caller supplied invalid input
    pub fn is_validation(&self) -> bool {
        matches!(self, DataKitError::Validation(_))
    }
}

impl From<serde_json::Error> for DataKitError {
    fn from(err: serde_json::Error) -> Self {
        DataKitError::Serialization(err.to_string())
    }
}

// MongoDB-specific error conversions (when mongodb-errors feature is enabled)
#[cfg(feature = "mongodb-errors")]
impl From<mongodb::error::Error> for DataKitError {
    fn from(err: mongodb::error::Error) -> Self {
        use mongodb::error::ErrorKind;
        match *err.kind {
            ErrorKind::ServerSelection { .. } | ErrorKind::DnsResolve { .. } => {
                DataKitError::Connection(err.to_string())
            }
            ErrorKind::Io(_) => DataKitError::Connection(err.to_string()),
            ErrorKind::InvalidArgument { .. } => DataKitError::Validation(err.to_string()),
            _ => DataKitError::MongoDb(err.to_string()),
        }
    }
}

#[cfg(feature = "mongodb-errors")]
impl From<bson::ser::Error> for DataKitError {
    fn from(err: bson::ser::Error) -> Self {
        DataKitError::Serialization(format!("BSON serialization error: {}", err))
    }
}

#[cfg(feature = "mongodb-errors")]
impl From<bson::de::Error> for DataKitError {
    fn from(err: bson::de::Error) -> Self {
        DataKitError::Deserialization(format!("BSON deserialization error: {}", err))
    }
}

// Redis-specific error conversions (when redis-errors feature is enabled)
#[cfg(feature = "redis-errors")]
impl From<redis::RedisError> for DataKitError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_timeout() {
            DataKitError::Timeout(err.to_string())
        } else if err.is_connection_refusal() || err.is_connection_dropped() {
            DataKitError::Connection(err.to_string())
        } else {
            DataKitError::Cache(err.to_string())
        }
    }
}

#[cfg(feature = "redis-errors")]
impl From<deadpool_redis::PoolError> for DataKitError {
    fn from(err: deadpool_redis::PoolError) -> Self {
        match err {
            deadpool_redis::PoolError::Timeout(_) => DataKitError::Timeout(err.to_string()),
            deadpool_redis::PoolError::Backend(inner) => inner.into(),
            _ => DataKitError::Connection(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_mongodb() {
        let err = DataKitError::MongoDb("connection refused".to_string());
        assert_eq!(err.to_string(), "MongoDB error: connection refused");
    }

    #[test]
    fn test_error_display_cache() {
        let err = DataKitError::Cache("WRONGTYPE".to_string());
        assert_eq!(err.to_string(), "Cache error: WRONGTYPE");
    }

    #[test]
    fn test_error_display_serialization() {
        let err = DataKitError::Serialization("invalid JSON".to_string());
        assert_eq!(err.to_string(), "Serialization error: invalid JSON");
    }

    #[test]
    fn test_error_display_validation() {
        let err = DataKitError::Validation("page size must be positive".to_string());
        assert_eq!(
            err.to_string(),
            "Validation error: page size must be positive"
        );
    }

    #[test]
    fn test_error_display_query() {
        let err = DataKitError::Query("invalid operator".to_string());
        assert_eq!(err.to_string(), "Query error: invalid operator");
    }

    #[test]
    fn test_from_serde_json_error() {
        let json_err = serde_json::from_str::<String>("invalid").unwrap_err();
        let err: DataKitError = json_err.into();
        assert!(matches!(err, DataKitError::Serialization(_)));
    }

    #[test]
    fn test_is_retryable() {
        assert!(DataKitError::Timeout("test".to_string()).is_retryable());
        assert!(DataKitError::Connection("test".to_string()).is_retryable());
        assert!(!DataKitError::Validation("test".to_string()).is_retryable());
        assert!(!DataKitError::Query("test".to_string()).is_retryable());
    }

    #[test]
    fn test_is_validation() {
        assert!(DataKitError::Validation("test".to_string()).is_validation());
        assert!(!DataKitError::Internal("test".to_string()).is_validation());
    }

    #[test]
    fn test_result_type() {
        let ok: Result<i32> = Ok(42);
        assert_eq!(ok.unwrap(), 42);

        let err: Result<i32> = Err(DataKitError::Query("failed".to_string()));
        assert!(err.is_err());
    }
}
