use thiserror::Error;

pub type Result<T> = std::result::Result<T, ResolveError>;

/// Errors reported by a naming registry client.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NamingError {
    #[error("Registry unavailable: {0}")]
    Unavailable(String),

    #[error("Subscription not found: {0}")]
    SubscriptionNotFound(String),

    #[error("Registry error: {0}")]
    Other(String),
}

/// Status-like classification of a [`ResolveError`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Code {
    InvalidArgument,
    NotFound,
    Unavailable,
    Internal,
}

#[derive(Error, Debug, Clone)]
pub enum ResolveError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Failed to list instances of {service}: {source}")]
    Lookup {
        service: String,
        #[source]
        source: NamingError,
    },

    #[error("No healthy instance found for {0}")]
    NoInstances(String),

    #[error("Subscription to {service} failed: {source}")]
    Subscription {
        service: String,
        #[source]
        source: NamingError,
    },

    #[error("Naming source for {0} stopped unexpectedly")]
    SourceClosed(String),

    #[error("Failed to open watch channel: {0}")]
    WatchChannel(#[source] Box<ResolveError>),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ResolveError {
    pub fn code(&self) -> Code {
        match self {
            ResolveError::InvalidArgument(_) => Code::InvalidArgument,
            ResolveError::NoInstances(_) => Code::NotFound,
            ResolveError::Lookup { .. }
            | ResolveError::Subscription { .. }
            | ResolveError::SourceClosed(_) => Code::Unavailable,
            ResolveError::WatchChannel(_) | ResolveError::Internal(_) => Code::Internal,
        }
    }

    /// The innermost error, looking through watch channel wrapping.
    pub fn cause(&self) -> &ResolveError {
        match self {
            ResolveError::WatchChannel(inner) => inner.cause(),
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes() {
        assert_eq!(
            ResolveError::InvalidArgument("empty target".into()).code(),
            Code::InvalidArgument
        );
        assert_eq!(ResolveError::NoInstances("orders".into()).code(), Code::NotFound);
        let lookup = ResolveError::Lookup {
            service: "orders".into(),
            source: NamingError::Unavailable("connection refused".into()),
        };
        assert_eq!(lookup.code(), Code::Unavailable);
    }

    #[test]
    fn test_watch_channel_wrapping() {
        let err = ResolveError::WatchChannel(Box::new(ResolveError::NoInstances("orders".into())));
        assert_eq!(err.code(), Code::Internal);
        assert!(matches!(err.cause(), ResolveError::NoInstances(s) if s == "orders"));
        assert_eq!(
            err.to_string(),
            "Failed to open watch channel: No healthy instance found for orders"
        );
    }
}
