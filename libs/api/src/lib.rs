pub mod error;

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

pub use error::{BridgeError, ErrorKind};

// ════════════════════════════════════════════════════════════════
//  Quality of Service
// ════════════════════════════════════════════════════════════════

/// Уровень гарантии доставки, согласуемый с брокером при подписке.
///
/// В конфиге задаётся числом 0..=2.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum QoS {
    AtMostOnce,
    AtLeastOnce,
    ExactlyOnce,
}

impl QoS {
    pub fn level(self) -> u8 {
        match self {
            QoS::AtMostOnce => 0,
            QoS::AtLeastOnce => 1,
            QoS::ExactlyOnce => 2,
        }
    }
}

impl TryFrom<u8> for QoS {
    type Error = String;

    fn try_from(level: u8) -> Result<Self, Self::Error> {
        match level {
            0 => Ok(QoS::AtMostOnce),
            1 => Ok(QoS::AtLeastOnce),
            2 => Ok(QoS::ExactlyOnce),
            other => Err(format!("qos must be 0, 1 or 2, got {other}")),
        }
    }
}

impl From<QoS> for u8 {
    fn from(qos: QoS) -> u8 {
        qos.level()
    }
}

impl std::fmt::Display for QoS {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.level())
    }
}

// ════════════════════════════════════════════════════════════════
//  Timestamp precision
// ════════════════════════════════════════════════════════════════

/// Единица времени, в которой timestamp уходит в backend.
///
/// Резолвер таймстемпов и вызов batch-insert обязаны использовать
/// одну и ту же единицу на протяжении всего процесса.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Precision {
    Seconds,
    Milliseconds,
}

impl Precision {
    /// Значение параметра `precision` для line-protocol endpoint'а.
    pub fn as_str(self) -> &'static str {
        match self {
            Precision::Seconds => "s",
            Precision::Milliseconds => "ms",
        }
    }

    /// Отбросить всё, что мельче единицы.
    pub fn truncate(self, ts: DateTime<Utc>) -> DateTime<Utc> {
        let truncated = match self {
            Precision::Seconds => Utc.timestamp_opt(ts.timestamp(), 0).single(),
            Precision::Milliseconds => Utc.timestamp_millis_opt(ts.timestamp_millis()).single(),
        };
        truncated.unwrap_or(ts)
    }

    /// Unix epoch в этой единице.
    pub fn epoch(self, ts: &DateTime<Utc>) -> i64 {
        match self {
            Precision::Seconds => ts.timestamp(),
            Precision::Milliseconds => ts.timestamp_millis(),
        }
    }
}

impl std::fmt::Display for Precision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ════════════════════════════════════════════════════════════════
//  Records
// ════════════════════════════════════════════════════════════════

/// Сообщение, полученное от pub/sub транспорта.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InboundMessage {
    /// Routing string, по соглашению `<database>/<table>`.
    pub topic: String,
    /// Сырое тело сообщения.
    pub payload: Vec<u8>,
    /// User properties из метаданных сообщения (порядок сохранён).
    pub properties: Vec<(String, String)>,
}

impl InboundMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            properties: Vec::new(),
        }
    }

    /// Добавить user property.
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.push((key.into(), value.into()));
        self
    }

    /// Первое значение user property с данным ключом.
    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// Нормализованная time-series запись, которая пишется в backend.
///
/// `metrics` и `tags` никогда не бывают пустыми: классификатор подставляет
/// sentinel-пары до того, как запись попадёт в канал.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedRecord {
    pub metrics: HashMap<String, f64>,
    pub tags: HashMap<String, String>,
    pub timestamp: DateTime<Utc>,
    pub database: String,
    pub table: String,
}

// ════════════════════════════════════════════════════════════════
//  Handshake acknowledgements
// ════════════════════════════════════════════════════════════════

/// Ответ брокера на connect. `reason_code == 0` означает успех.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnAck {
    pub reason_code: u8,
    pub reason: Option<String>,
}

impl ConnAck {
    pub fn success() -> Self {
        Self { reason_code: 0, reason: None }
    }

    pub fn is_success(&self) -> bool {
        self.reason_code == 0
    }
}

/// Ответ брокера на subscribe: выданный уровень QoS или код отказа.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubAck {
    pub reason_code: u8,
}

impl SubAck {
    pub fn granted(qos: QoS) -> Self {
        Self { reason_code: qos.level() }
    }

    /// Выданный QoS; None если брокер отказал в подписке.
    pub fn granted_qos(&self) -> Option<QoS> {
        QoS::try_from(self.reason_code).ok()
    }
}

// ════════════════════════════════════════════════════════════════
//  Readiness
// ════════════════════════════════════════════════════════════════

/// Флаг готовности для liveness probe. Выставляется write pipeline'ом
/// после первого успешного обращения к backend; обратно не сбрасывается.
#[derive(Debug, Clone, Default)]
pub struct Readiness(Arc<AtomicBool>);

impl Readiness {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_ready(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_ready(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

// ════════════════════════════════════════════════════════════════
//  Boundary Traits
// ════════════════════════════════════════════════════════════════

/// Inbound транспорт: одна pub/sub сессия.
///
/// Переподключение и keep-alive на стороне реализации.
/// Решения по reason code'ам принимает subscription loop.
pub trait MessageTransport: Send {
    /// Открыть соединение и выполнить handshake.
    fn connect(&mut self) -> Pin<Box<dyn Future<Output = Result<ConnAck, BridgeError>> + Send + '_>>;

    /// Подписаться на topic filter с заданным QoS.
    fn subscribe(
        &mut self,
        filter: &str,
        qos: QoS,
    ) -> Pin<Box<dyn Future<Output = Result<SubAck, BridgeError>> + Send + '_>>;

    /// Следующее входящее сообщение. None = сессия закрыта.
    fn next_message(
        &mut self,
    ) -> Pin<Box<dyn Future<Output = Result<Option<InboundMessage>, BridgeError>> + Send + '_>>;

    /// Закрыть сессию.
    fn disconnect(&mut self) -> Pin<Box<dyn Future<Output = Result<(), BridgeError>> + Send + '_>>;
}

/// Outbound time-series backend.
pub trait StorageBackend: Send {
    /// `CREATE DATABASE IF NOT EXISTS`.
    fn create_database(&mut self, name: &str) -> Pin<Box<dyn Future<Output = Result<(), BridgeError>> + Send + '_>>;

    /// Сделать базу активной для последующих insert'ов.
    fn use_database(&mut self, name: &str) -> Pin<Box<dyn Future<Output = Result<(), BridgeError>> + Send + '_>>;

    /// Batch insert строк line protocol в активную базу.
    fn insert_lines(
        &mut self,
        lines: &[String],
        precision: Precision,
    ) -> Pin<Box<dyn Future<Output = Result<(), BridgeError>> + Send + '_>>;
}
