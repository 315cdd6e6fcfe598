//! Error taxonomy for the publishing pipeline.
//!
//! Fatal conditions abort the whole invocation; recoverable ones
//! (empty slug titles, missing geometry, missing backing files) are handled
//! where they occur and only logged.

use std::path::PathBuf;

/// Errors raised by the pipeline.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Input that cannot be turned into a publishable value.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// A graph definition file is missing or has an ill-shaped `graph` array.
    #[error("Invalid graph file {path}: {reason}")]
    MalformedGraph {
        /// File that failed validation.
        path: PathBuf,
        /// What was wrong with it.
        reason: String,
    },

    /// A resolved output path escapes its base directory.
    #[error("Path traversal detected: {path} is outside {base}")]
    PathTraversal {
        /// Offending path.
        path: PathBuf,
        /// Directory the path had to stay within.
        base: PathBuf,
    },

    /// A resource identifier could not be resolved against its model.
    #[error("Could not load resource {resource_id} of graph {graph_id}: {reason}")]
    LookupFailure {
        /// Graph the resource was requested from.
        graph_id: String,
        /// Requested resource identifier.
        resource_id: String,
        /// Underlying failure.
        reason: String,
    },

    /// Required policy or graph configuration is absent.
    #[error("Missing configuration: {0}")]
    MissingConfiguration(String),

    /// Filesystem error with the path that caused it.
    #[error("I/O error on {path}: {source}")]
    Io {
        /// Path being read or written.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// JSON that could not be parsed or produced.
    #[error("Failed to parse JSON in {context}: {source}")]
    Json {
        /// Where the JSON came from.
        context: String,
        /// Underlying error.
        #[source]
        source: serde_json::Error,
    },

    /// Failure reported by an external collaborator (graph client, search
    /// indexer, spatial codec).
    #[error("{collaborator} error: {message}")]
    Collaborator {
        /// Which collaborator failed.
        collaborator: &'static str,
        /// Its error message.
        message: String,
    },

    /// The global tracing subscriber could not be installed.
    #[error("Failed to install tracing subscriber: {0}")]
    Logging(#[from] tracing_subscriber::util::TryInitError),
}

impl PipelineError {
    /// Wrap an error coming out of an external collaborator.
    pub fn from_collaborator<E: std::error::Error>(collaborator: &'static str, e: E) -> Self {
        Self::Collaborator {
            collaborator,
            message: e.to_string(),
        }
    }

    /// Attach a path to an I/O error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Attach a context description to a JSON error.
    pub fn json(context: impl Into<String>, source: serde_json::Error) -> Self {
        Self::Json {
            context: context.into(),
            source,
        }
    }

    /// Whether this error must abort the run rather than be recovered locally.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::InvalidInput(_))
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_input_is_recoverable() {
        assert!(!PipelineError::InvalidInput("empty".into()).is_fatal());
        assert!(PipelineError::PathTraversal {
            path: "../x".into(),
            base: "docs".into(),
        }
        .is_fatal());
    }

    #[test]
    fn test_collaborator_message() {
        let err = PipelineError::from_collaborator(
            "search indexer",
            std::io::Error::new(std::io::ErrorKind::Other, "flush failed"),
        );
        assert_eq!(err.to_string(), "search indexer error: flush failed");
    }
}
