use std::collections::HashMap;

use crate::decode::FieldValue;
use crate::error::DecodeError;

/// Подставляется, если в сообщении нет ни одного числового поля.
pub const NULL_METRIC: (&str, f64) = ("nullVal", 0.0);

/// Подставляется, если в сообщении нет ни одного текстового поля.
pub const NULL_TAG: (&str, &str) = ("nullTag", "null");

/// Поля, разложенные на metrics и tags. Обе карты непустые.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Classified {
    pub metrics: HashMap<String, f64>,
    pub tags: HashMap<String, String>,
}

/// Number → metric, Text → tag, Unsupported → ошибка сообщения.
///
/// Пустые текстовые значения отбрасываются до подстановки `NULL_TAG`.
/// Перевод строки в ключе или значении не выражается в line protocol,
/// такое сообщение отклоняется целиком.
pub fn classify(fields: Vec<(String, FieldValue)>) -> Result<Classified, DecodeError> {
    let mut classified = Classified::default();

    for (key, value) in fields {
        if has_line_break(&key) {
            return Err(DecodeError::LineBreak { key });
        }
        match value {
            FieldValue::Number(v) => {
                classified.metrics.insert(key, v);
            }
            FieldValue::Text(v) if v.is_empty() => {
                tracing::debug!(%key, "skipping empty tag value");
            }
            FieldValue::Text(v) => {
                if has_line_break(&v) {
                    return Err(DecodeError::LineBreak { key });
                }
                classified.tags.insert(key, v);
            }
            FieldValue::Unsupported(kind) => {
                return Err(DecodeError::UnsupportedFieldType { key, kind });
            }
        }
    }

    if classified.metrics.is_empty() {
        classified.metrics.insert(NULL_METRIC.0.to_string(), NULL_METRIC.1);
    }
    if classified.tags.is_empty() {
        classified.tags.insert(NULL_TAG.0.to_string(), NULL_TAG.1.to_string());
    }

    Ok(classified)
}

fn has_line_break(s: &str) -> bool {
    s.contains(['\n', '\r'])
}
