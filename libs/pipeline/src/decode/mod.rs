//! Payload decoder: сырое тело сообщения → набор типизированных полей.
//!
//! Формат определяется по содержимому: наличие байта `{` означает JSON
//! объект, иначе текст с разделителем `;` (заголовок + одна строка данных).
//! Никакого I/O и разделяемого состояния.

mod csv;
mod json;

use crate::error::DecodeError;

/// Значение поля после декодирования.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Number(f64),
    Text(String),
    /// Тип, который нельзя положить ни в metric, ни в tag.
    Unsupported(&'static str),
}

impl FieldValue {
    fn from_json(value: serde_json::Value) -> Self {
        use serde_json::Value;
        match value {
            Value::Number(n) => n
                .as_f64()
                .map(FieldValue::Number)
                .unwrap_or(FieldValue::Unsupported("number")),
            Value::String(s) => FieldValue::Text(s),
            Value::Bool(_) => FieldValue::Unsupported("boolean"),
            Value::Null => FieldValue::Unsupported("null"),
            Value::Array(_) => FieldValue::Unsupported("array"),
            Value::Object(_) => FieldValue::Unsupported("object"),
        }
    }

    /// Текстовое значение: конечное число → Number, иначе литерал.
    fn from_text(value: &str) -> Self {
        match value.trim().parse::<f64>() {
            Ok(v) if v.is_finite() => FieldValue::Number(v),
            _ => FieldValue::Text(value.to_string()),
        }
    }
}

/// Timestamp в том виде, в каком он пришёл в теле сообщения.
#[derive(Debug, Clone, PartialEq)]
pub enum RawTimestamp {
    Integer(i64),
    Float(f64),
    Text(String),
    /// Значение не-числового и не-строкового JSON типа.
    Invalid(String),
}

impl RawTimestamp {
    fn from_json(value: serde_json::Value) -> Self {
        use serde_json::Value;
        match value {
            Value::Number(n) => match (n.as_i64(), n.as_f64()) {
                (Some(i), _) => RawTimestamp::Integer(i),
                (None, Some(f)) => RawTimestamp::Float(f),
                (None, None) => RawTimestamp::Invalid(n.to_string()),
            },
            Value::String(s) => RawTimestamp::Text(s),
            other => RawTimestamp::Invalid(other.to_string()),
        }
    }
}

/// Результат декодирования: поля в порядке появления + embedded timestamp.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecodedPayload {
    pub fields: Vec<(String, FieldValue)>,
    pub timestamp: Option<RawTimestamp>,
}

/// Декодировать тело сообщения, выбрав формат по содержимому.
pub fn decode(body: &[u8]) -> Result<DecodedPayload, DecodeError> {
    if body.contains(&b'{') {
        json::decode_json(body)
    } else {
        csv::decode_delimited(body)
    }
}
