use chrono::{DateTime, TimeZone, Utc};

use bridge_api::InboundMessage;

use crate::decode::RawTimestamp;
use crate::error::DecodeError;
use crate::PRECISION;

/// Зарезервированное имя поля/колонки/user property с временем измерения.
pub const TIMESTAMP_FIELD: &str = "timestamp";

/// Определить время записи. Первый найденный источник выигрывает:
///
/// 1. `timestamp` из тела сообщения, Unix epoch (целое, дробное или строка);
/// 2. user property `timestamp` сообщения в RFC 3339;
/// 3. `now()`.
///
/// Непарсящееся значение на шаге 1 или 2 считается ошибкой всего сообщения,
/// следующий шаг не пробуется. Результат усечён до [`PRECISION`].
pub fn resolve(
    embedded: Option<&RawTimestamp>,
    message: &InboundMessage,
    now: impl FnOnce() -> DateTime<Utc>,
) -> Result<DateTime<Utc>, DecodeError> {
    let resolved = match (embedded, message.property(TIMESTAMP_FIELD)) {
        (Some(raw), _) => from_raw(raw)?,
        (None, Some(property)) => from_rfc3339(property)?,
        (None, None) => now(),
    };
    Ok(PRECISION.truncate(resolved))
}

fn from_raw(raw: &RawTimestamp) -> Result<DateTime<Utc>, DecodeError> {
    match raw {
        RawTimestamp::Integer(secs) => from_epoch(*secs, &secs.to_string()),
        RawTimestamp::Float(secs) => from_epoch_float(*secs, &secs.to_string()),
        RawTimestamp::Text(text) => {
            let trimmed = text.trim();
            if let Ok(secs) = trimmed.parse::<i64>() {
                from_epoch(secs, text)
            } else if let Ok(secs) = trimmed.parse::<f64>() {
                from_epoch_float(secs, text)
            } else {
                Err(parse_error(text, "not a Unix epoch value"))
            }
        }
        RawTimestamp::Invalid(value) => Err(parse_error(value, "unsupported timestamp type")),
    }
}

fn from_epoch_float(secs: f64, raw: &str) -> Result<DateTime<Utc>, DecodeError> {
    // i64::MAX as f64 округляется вверх, поэтому строгое сравнение
    if !secs.is_finite() || secs.abs() >= i64::MAX as f64 {
        return Err(parse_error(raw, "epoch out of range"));
    }
    from_epoch(secs.trunc() as i64, raw)
}

fn from_epoch(secs: i64, raw: &str) -> Result<DateTime<Utc>, DecodeError> {
    Utc.timestamp_opt(secs, 0)
        .single()
        .ok_or_else(|| parse_error(raw, "epoch out of range"))
}

fn from_rfc3339(value: &str) -> Result<DateTime<Utc>, DecodeError> {
    DateTime::parse_from_rfc3339(value)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| parse_error(value, &e.to_string()))
}

fn parse_error(value: &str, reason: &str) -> DecodeError {
    DecodeError::TimestampParse {
        value: value.to_string(),
        reason: reason.to_string(),
    }
}
