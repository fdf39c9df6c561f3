use std::time::Duration;

use serde::Deserialize;

/// Параметры связки subscription loop → write pipeline.
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    /// Ёмкость канала между подпиской и записью. При заполнении
    /// subscription loop ждёт (back-pressure).
    #[serde(default = "default_buffer")]
    pub buffer: usize,
    /// Сколько ждать завершения задач после отмены.
    #[serde(default = "default_drain_timeout_secs")]
    pub drain_timeout_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            buffer: default_buffer(),
            drain_timeout_secs: default_drain_timeout_secs(),
        }
    }
}

impl PipelineConfig {
    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.drain_timeout_secs)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.buffer == 0 {
            return Err("pipeline.buffer must be greater than zero".into());
        }
        Ok(())
    }
}

fn default_buffer() -> usize {
    10
}

fn default_drain_timeout_secs() -> u64 {
    5
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_to_missing_keys() {
        let cfg: PipelineConfig = serde_json::from_str(r#"{"buffer": 64}"#).unwrap();
        assert_eq!(cfg.buffer, 64);
        assert_eq!(cfg.drain_timeout(), Duration::from_secs(5));
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn zero_buffer_is_rejected() {
        let cfg = PipelineConfig { buffer: 0, ..PipelineConfig::default() };
        assert!(cfg.validate().is_err());
    }
}
