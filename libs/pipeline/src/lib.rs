//! Нормализация телеметрии и запись в хранилище.
//!
//! Subscription loop принимает сообщения транспорта, превращает их в
//! [`bridge_api::NormalizedRecord`] и передаёт через bounded канал в
//! write pipeline, который создаёт базы по требованию и пишет line protocol.

pub mod classify;
pub mod config;
pub mod decode;
pub mod error;
pub mod line;
mod normalize;
mod sink;
mod source;
pub mod timestamp;
pub mod topic;

use bridge_api::Precision;

/// Точность временных меток на всём пути: усечение при разборе,
/// рендер строки и параметр записи в backend.
pub const PRECISION: Precision = Precision::Seconds;

pub use config::PipelineConfig;
pub use error::{DecodeError, PipelineError};
pub use normalize::{normalize, normalize_at};
pub use sink::{WritePipeline, spawn_writer};
pub use source::{SessionState, SubscriptionLoop, spawn_subscription};
