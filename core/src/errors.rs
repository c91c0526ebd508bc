//! Error types for sidewinder

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("Could not find app by key {0}")]
    AppKeyNotFound(String),

    #[error("Application is over the limit of number of connections.")]
    OverConnectionLimit,

    #[error("Invalid JSON")]
    InvalidJson,

    #[error("{0}")]
    InvalidSignature(String),

    #[error("Channel not found: {0}")]
    ChannelNotFound(String),

    #[error("Subscription error: {0}")]
    SubscriptionError(String),

    #[error("Counter store error: {0}")]
    StoreError(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl BrokerError {
    /// Protocol error code carried in `pusher:error` frames.
    ///
    /// `4001` app key not found, `4004` over connection limit,
    /// `5001` invalid JSON, `500` anything else.
    pub fn code(&self) -> u16 {
        match self {
            BrokerError::AppKeyNotFound(_) => 4001,
            BrokerError::OverConnectionLimit => 4004,
            BrokerError::InvalidJson => 5001,
            _ => 500,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(BrokerError::AppKeyNotFound("k".into()).code(), 4001);
        assert_eq!(BrokerError::OverConnectionLimit.code(), 4004);
        assert_eq!(BrokerError::InvalidJson.code(), 5001);
        assert_eq!(BrokerError::InternalError("boom".into()).code(), 500);
    }

    #[test]
    fn test_app_key_not_found_message() {
        let err = BrokerError::AppKeyNotFound("765ec374ae0a69f4ce44".into());
        assert_eq!(
            err.to_string(),
            "Could not find app by key 765ec374ae0a69f4ce44"
        );
    }
}
