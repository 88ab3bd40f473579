//! Error types for Drover.
//!
//! Errors fall into three families:
//!
//! - **Execution errors**: a command or resource operation failed on a target.
//!   These are absorbed (and logged) at the hooked-task boundary so the rest
//!   of a cohort keeps running.
//! - **Ambiguous resources**: reconciliation found more than one resource for
//!   a declarative identity. Always surfaced to the caller.
//! - **Configuration errors**: missing credentials or invalid settings, raised
//!   eagerly when a client or context is constructed.
//!
//! Everything else propagates unmodified and aborts the remaining cohort.

use thiserror::Error;

/// Result type alias for Drover operations.
pub type Result<T> = std::result::Result<T, Error>;

/// The main error type for Drover.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Execution Errors
    // ========================================================================
    /// A command or resource operation failed on a target.
    #[error("{target}: failed to run '{command}' (retcode:{exit_code}): '{output}'")]
    Execution {
        /// Target the command ran against
        target: String,
        /// Command or operation text
        command: String,
        /// Exit code reported by the runner
        exit_code: i32,
        /// Captured output
        output: String,
    },

    /// A task body asked to terminate. Swallowed by the hook wrapper.
    #[error("Task '{0}' terminated")]
    Terminated(String),

    // ========================================================================
    // Resource Errors
    // ========================================================================
    /// More than one resource matched a declarative identity.
    #[error("Ambiguous {kind} for identity {identity}: {matches} resources match")]
    AmbiguousResource {
        /// Resource kind (instance, security group, ...)
        kind: String,
        /// Rendered identity
        identity: String,
        /// Number of matching resources
        matches: usize,
    },

    /// The resource client reported a failure.
    #[error("{kind} operation '{operation}' failed: {message}")]
    ResourceClient {
        /// Resource kind
        kind: String,
        /// Operation name (find, create, tag, wait)
        operation: String,
        /// Error message
        message: String,
    },

    // ========================================================================
    // Connection Errors
    // ========================================================================
    /// The command runner could not reach the target.
    #[error("Failed to connect to '{host}': {message}")]
    ConnectionFailed {
        /// Target host
        host: String,
        /// Error message
        message: String,
    },

    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid configuration value.
    #[error("Invalid configuration value for '{key}': {message}")]
    InvalidConfig {
        /// Configuration key
        key: String,
        /// Error message
        message: String,
    },

    // ========================================================================
    // IO Errors
    // ========================================================================
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // ========================================================================
    // Other Errors
    // ========================================================================
    /// A spawned unit of work panicked or was cancelled.
    #[error("Task '{task}' could not be joined: {message}")]
    Join {
        /// Task name
        task: String,
        /// Error message
        message: String,
    },

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),

    /// Generic error with source.
    #[error("{message}")]
    Other {
        /// Error message
        message: String,
        /// Source error
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl Error {
    /// Creates a new execution error.
    pub fn execution(
        target: impl Into<String>,
        command: impl Into<String>,
        exit_code: i32,
        output: impl Into<String>,
    ) -> Self {
        Self::Execution {
            target: target.into(),
            command: command.into(),
            exit_code,
            output: output.into(),
        }
    }

    /// Creates a new ambiguous resource error.
    pub fn ambiguous(kind: impl Into<String>, identity: impl Into<String>, matches: usize) -> Self {
        Self::AmbiguousResource {
            kind: kind.into(),
            identity: identity.into(),
            matches,
        }
    }

    /// Creates a new resource client error.
    pub fn resource_client(
        kind: impl Into<String>,
        operation: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::ResourceClient {
            kind: kind.into(),
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Creates a new connection failed error.
    pub fn connection_failed(host: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ConnectionFailed {
            host: host.into(),
            message: message.into(),
        }
    }

    /// Returns true if this error is absorbed at the hooked-task boundary.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Error::Execution { .. } | Error::Terminated(_))
    }

    /// Returns true for execution errors.
    pub fn is_execution(&self) -> bool {
        matches!(self, Error::Execution { .. })
    }

    /// Returns the exit status a front end should report for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::Execution { .. } => 2,
            Error::ConnectionFailed { .. } => 3,
            Error::AmbiguousResource { .. } | Error::ResourceClient { .. } => 4,
            Error::Config(_) | Error::InvalidConfig { .. } => 5,
            _ => 1,
        }
    }
}

/// Extension trait for adding context to errors.
pub trait ErrorContext<T> {
    /// Adds context to an error.
    fn context(self, message: impl Into<String>) -> Result<T>;

    /// Adds context with a closure that is only evaluated on error.
    fn with_context<F, S>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> S,
        S: Into<String>;
}

impl<T, E> ErrorContext<T> for std::result::Result<T, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn context(self, message: impl Into<String>) -> Result<T> {
        self.map_err(|e| Error::Other {
            message: message.into(),
            source: Some(Box::new(e)),
        })
    }

    fn with_context<F, S>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> S,
        S: Into<String>,
    {
        self.map_err(|e| Error::Other {
            message: f().into(),
            source: Some(Box::new(e)),
        })
    }
}
