#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("config ({context}): {detail}")]
    Config { context: &'static str, detail: String },

    #[error("missing required settings: {}", .0.join(", "))]
    MissingSettings(Vec<&'static str>),

    #[error("backend: {0}")]
    Backend(#[from] bridge_api::BridgeError),

    #[error("{0}")]
    Pipeline(#[from] pipeline::PipelineError),

    #[error("signal: {0}")]
    Signal(#[from] std::io::Error),
}
