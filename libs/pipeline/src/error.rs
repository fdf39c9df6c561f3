use bridge_api::{BridgeError, QoS};

/// Ошибка нормализации одного сообщения. Всегда локальна:
/// сообщение логируется и отбрасывается, цикл подписки продолжается.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("malformed topic '{0}': expected <database>/<table>")]
    MalformedTopic(String),

    #[error("field '{key}' has unsupported type {kind}")]
    UnsupportedFieldType { key: String, kind: &'static str },

    #[error("field '{key}' contains a line break")]
    LineBreak { key: String },

    #[error("row value length does not match header length: header {header}, row {row}")]
    RowLengthMismatch { header: usize, row: usize },

    #[error("delimited payload has a header but no data row")]
    MissingDataRow,

    #[error("delimited payload has {count} data rows, expected exactly one")]
    UnexpectedDataRows { count: usize },

    #[error("timestamp '{value}': {reason}")]
    TimestampParse { value: String, reason: String },

    #[error("invalid JSON payload: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("payload is not valid UTF-8: {0}")]
    InvalidUtf8(#[from] std::str::Utf8Error),
}

/// Ошибки subscription loop и write pipeline.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("transport handshake rejected (reason code {reason_code}): {reason}")]
    TransportHandshake { reason_code: u8, reason: String },

    #[error("subscription to '{topic}' rejected: requested qos {requested}, broker answered {granted:#04x}")]
    SubscriptionRejected { topic: String, requested: QoS, granted: u8 },

    #[error("transport: {0}")]
    Transport(BridgeError),

    #[error("create database '{database}': {source}")]
    DatabaseProvision { database: String, source: BridgeError },

    #[error("use database '{database}': {source}")]
    DatabaseSelect { database: String, source: BridgeError },

    #[error("insert into '{database}': {source}")]
    BackendWrite { database: String, source: BridgeError },

    #[error("backend connection lost: {0}")]
    BackendConnectionLost(BridgeError),
}

impl PipelineError {
    /// Фатальные ошибки останавливают весь процесс; остальные касаются
    /// одной записи.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            PipelineError::TransportHandshake { .. }
                | PipelineError::SubscriptionRejected { .. }
                | PipelineError::Transport(_)
                | PipelineError::BackendConnectionLost(_)
        )
    }
}
