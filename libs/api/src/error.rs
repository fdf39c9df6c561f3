/// Category of a boundary error. Lets the pipeline decide whether a failure
/// is local to one record or means the collaborator is unusable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Invalid configuration. Permanent, fail at startup.
    Config,
    /// Connection to the broker/backend is unusable. Fatal for the pipeline.
    Connection,
    /// A single request was rejected. Skip and continue.
    Request,
    /// Data format/parse error. Bad input, skip record.
    Format,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::Config => f.write_str("config"),
            ErrorKind::Connection => f.write_str("connection"),
            ErrorKind::Request => f.write_str("request"),
            ErrorKind::Format => f.write_str("format"),
        }
    }
}

/// Unified error type for the transport and storage boundary traits.
///
/// Carries an `ErrorKind` for categorization and a human-readable message.
/// Plugins pick the kind explicitly at the point of failure.
#[derive(Clone)]
pub struct BridgeError {
    kind: ErrorKind,
    message: String,
}

impl BridgeError {
    /// Configuration error. Permanent, fail at startup.
    pub fn config(msg: impl Into<String>) -> Self {
        Self { kind: ErrorKind::Config, message: msg.into() }
    }

    /// Connection lost or refused.
    pub fn connection(msg: impl Into<String>) -> Self {
        Self { kind: ErrorKind::Connection, message: msg.into() }
    }

    /// Request rejected by the remote side.
    pub fn request(msg: impl Into<String>) -> Self {
        Self { kind: ErrorKind::Request, message: msg.into() }
    }

    /// Format/parse error.
    pub fn format_err(msg: impl Into<String>) -> Self {
        Self { kind: ErrorKind::Format, message: msg.into() }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn is_connection(&self) -> bool {
        self.kind == ErrorKind::Connection
    }
}

impl std::fmt::Debug for BridgeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.kind, self.message)
    }
}

impl std::fmt::Display for BridgeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for BridgeError {}
