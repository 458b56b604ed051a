use thiserror::Error;

/// Failure reported by a source or a sink.
///
/// The executor decides what a failure means from where it happened (init is
/// fatal, produce and consume count against the budget, close is logged).
#[derive(Error, Debug)]
pub enum ComponentError {
    /// Failed to read a file from disk.
    #[error("Failed to read file {path}")]
    FileRead {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Data was found but did not match the expected layout.
    #[error("Failed to parse {what} from {location}: {reason}")]
    Parse {
        what: String,
        location: String,
        reason: String,
    },

    /// The component cannot run on this platform.
    #[error("Unsupported on this platform: {0}")]
    Unsupported(String),

    /// Called before `init` or after `close`.
    #[error("{0} is not initialized")]
    NotInitialized(&'static str),

    /// Sample could not be converted to JSON.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Delivery to an external system failed.
    #[error("Transport error: {0}")]
    Transport(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl ComponentError {
    pub fn transport<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        ComponentError::Transport(Box::new(err))
    }
}

pub type ComponentResult<T> = Result<T, ComponentError>;

/// Fatal executor outcome.
#[derive(Error, Debug)]
pub enum ExecutorError {
    /// A component failed to initialize; nothing was produced.
    #[error("Failed to initialize {kind}: {source}")]
    Init {
        kind: &'static str,
        #[source]
        source: ComponentError,
    },

    /// `run` was called on an executor that already ran.
    #[error("Executor already started")]
    AlreadyStarted,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_error_names_component() {
        let err = ExecutorError::Init {
            kind: "mqtt",
            source: ComponentError::Other("broker refused".into()),
        };
        assert_eq!(err.to_string(), "Failed to initialize mqtt: broker refused");
    }

    #[test]
    fn test_transport_wraps_source() {
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe closed");
        let err = ComponentError::transport(io);
        assert!(err.to_string().contains("pipe closed"));
        assert!(std::error::Error::source(&err).is_some());
    }
}
