//! Error types for Kestrel

use thiserror::Error;

/// Result type alias using Kestrel's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Classification of an error, stable across variants.
///
/// Tool results and user-visible messages carry a kind rather than the full
/// error so they can be serialized and inspected without downcasting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    /// Invalid input to `run` or a tool entry point
    Validation,
    /// Tool or plan missing
    NotFound,
    /// Registry name/alias collision
    AlreadyRegistered,
    /// Malformed tool arguments (not a mapping, not parseable)
    ArgumentParse,
    /// Arguments parsed but failed schema validation
    InvalidArgument,
    /// Tool raised during execution
    Execution,
    /// Tool or LLM timeout
    Timeout,
    /// Safety gate rejected a command
    PolicyBlocked,
    /// Loop detector terminated the run
    Loop,
    /// Network failure talking to the LLM endpoint
    LlmConnection,
    /// External cancellation signal
    Cancelled,
    /// Plan persistence I/O failure
    Io,
    /// Configuration error
    Config,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorKind::Validation => "validation",
            ErrorKind::NotFound => "not-found",
            ErrorKind::AlreadyRegistered => "already-registered",
            ErrorKind::ArgumentParse => "argument-parse",
            ErrorKind::InvalidArgument => "invalid-argument",
            ErrorKind::Execution => "execution",
            ErrorKind::Timeout => "timeout",
            ErrorKind::PolicyBlocked => "policy-blocked",
            ErrorKind::Loop => "loop",
            ErrorKind::LlmConnection => "llm-connection",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Io => "io",
            ErrorKind::Config => "config",
        };
        write!(f, "{}", s)
    }
}

/// Main error type for Kestrel
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid input at an entry point
    #[error("Validation error: {0}")]
    Validation(String),

    /// Tool or plan not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Registry collision
    #[error("Already registered: {0}")]
    AlreadyRegistered(String),

    /// Tool arguments could not be parsed into a mapping
    #[error("Argument parse error: {0}")]
    ArgumentParse(String),

    /// Tool arguments failed schema validation
    #[error("Invalid argument '{argument}': {reason}")]
    InvalidArgument { argument: String, reason: String },

    /// Tool raised during execution
    #[error("Tool execution error: {0}")]
    Execution(String),

    /// Tool or LLM timed out
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Safety gate rejected a command before execution
    #[error("Blocked by safety policy: {0}")]
    PolicyBlocked(String),

    /// Loop detector fired twice
    #[error("Loop detected: {0}")]
    Loop(String),

    /// LLM endpoint unreachable or persistently failing
    #[error("LLM connection error: {0}")]
    LlmConnection(String),

    /// External cancellation signal
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// HTTP request error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Classify this error into a stable kind.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Validation(_) => ErrorKind::Validation,
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::AlreadyRegistered(_) => ErrorKind::AlreadyRegistered,
            Error::ArgumentParse(_) => ErrorKind::ArgumentParse,
            Error::InvalidArgument { .. } => ErrorKind::InvalidArgument,
            Error::Execution(_) => ErrorKind::Execution,
            Error::Timeout(_) => ErrorKind::Timeout,
            Error::PolicyBlocked(_) => ErrorKind::PolicyBlocked,
            Error::Loop(_) => ErrorKind::Loop,
            Error::LlmConnection(_) | Error::Http(_) => ErrorKind::LlmConnection,
            Error::Cancelled(_) => ErrorKind::Cancelled,
            Error::Config(_) => ErrorKind::Config,
            Error::Json(_) => ErrorKind::ArgumentParse,
            Error::Io(_) => ErrorKind::Io,
        }
    }

    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Http(_) | Error::LlmConnection(_) | Error::Timeout(_)
        )
    }

    /// Check if error is a client error (caller's fault)
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Error::Validation(_)
                | Error::NotFound(_)
                | Error::ArgumentParse(_)
                | Error::InvalidArgument { .. }
        )
    }

    /// One-sentence, stacktrace-free explanation with a suggested next action.
    ///
    /// Shown to the user when the error is terminal; the full error goes to
    /// the logs.
    pub fn user_message(&self) -> String {
        match self.kind() {
            ErrorKind::Validation => format!(
                "The request was invalid ({}); please correct it and try again.",
                self
            ),
            ErrorKind::NotFound => format!("{}; check the name and try again.", self),
            ErrorKind::AlreadyRegistered => format!(
                "{}; unregister the existing tool first or pick another name.",
                self
            ),
            ErrorKind::Loop => {
                "The agent kept repeating the same action without progress; \
                 try rephrasing the request or narrowing it down."
                    .to_string()
            }
            ErrorKind::LlmConnection => {
                "The language model endpoint could not be reached after several \
                 attempts; check the endpoint URL and that the server is running."
                    .to_string()
            }
            ErrorKind::Cancelled => "The run was cancelled before completion.".to_string(),
            ErrorKind::Timeout => {
                "The operation timed out; try again or increase the timeout.".to_string()
            }
            ErrorKind::Io => format!(
                "A storage operation failed ({}); check the plans directory is writable.",
                self
            ),
            _ => format!("{}", self),
        }
    }
}

impl From<config::ConfigError> for Error {
    fn from(err: config::ConfigError) -> Self {
        Error::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_are_stable() {
        assert_eq!(Error::Validation("x".into()).kind(), ErrorKind::Validation);
        assert_eq!(
            Error::InvalidArgument {
                argument: "command".into(),
                reason: "expected string".into()
            }
            .kind(),
            ErrorKind::InvalidArgument
        );
        assert_eq!(Error::Loop("x".into()).kind(), ErrorKind::Loop);
    }

    #[test]
    fn kind_serializes_kebab_case() {
        let s = serde_json::to_string(&ErrorKind::PolicyBlocked).unwrap();
        assert_eq!(s, "\"policy-blocked\"");
        assert_eq!(ErrorKind::AlreadyRegistered.to_string(), "already-registered");
    }

    #[test]
    fn retryable_classification() {
        assert!(Error::LlmConnection("down".into()).is_retryable());
        assert!(Error::Timeout("slow".into()).is_retryable());
        assert!(!Error::Validation("bad".into()).is_retryable());
    }

    #[test]
    fn user_message_has_no_debug_noise() {
        let msg = Error::Loop("web_search".into()).user_message();
        assert!(!msg.contains("Error"));
        assert!(msg.ends_with('.'));
    }
}
