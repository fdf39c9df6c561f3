use crate::error::DecodeError;
use crate::timestamp::TIMESTAMP_FIELD;

use super::{DecodedPayload, FieldValue, RawTimestamp};

/// Плоский JSON объект: ключ → число | строка.
pub(super) fn decode_json(body: &[u8]) -> Result<DecodedPayload, DecodeError> {
    let object: serde_json::Map<String, serde_json::Value> = serde_json::from_slice(body)?;

    let mut decoded = DecodedPayload {
        fields: Vec::with_capacity(object.len()),
        timestamp: None,
    };
    for (key, value) in object {
        if key == TIMESTAMP_FIELD {
            decoded.timestamp = Some(RawTimestamp::from_json(value));
            continue;
        }
        decoded.fields.push((key, FieldValue::from_json(value)));
    }

    Ok(decoded)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field<'a>(decoded: &'a DecodedPayload, key: &str) -> Option<&'a FieldValue> {
        decoded.fields.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    #[test]
    fn all_fields_present() {
        let decoded = decode_json(
            br#"{"timestamp":1257894000,"name":"test_name","tag":"test_tag","temp":12.34,"preassure":10.23,"count":9}"#,
        )
        .unwrap();

        assert_eq!(decoded.timestamp, Some(RawTimestamp::Integer(1257894000)));
        assert_eq!(decoded.fields.len(), 5);
        assert_eq!(field(&decoded, "temp"), Some(&FieldValue::Number(12.34)));
        assert_eq!(field(&decoded, "count"), Some(&FieldValue::Number(9.0)));
        assert_eq!(field(&decoded, "name"), Some(&FieldValue::Text("test_name".into())));
        assert_eq!(field(&decoded, "timestamp"), None);
    }

    #[test]
    fn timestamp_forms() {
        let float = decode_json(br#"{"timestamp":1257894000.9}"#).unwrap();
        assert_eq!(float.timestamp, Some(RawTimestamp::Float(1257894000.9)));

        let text = decode_json(br#"{"timestamp":"1257894000"}"#).unwrap();
        assert_eq!(text.timestamp, Some(RawTimestamp::Text("1257894000".into())));

        let invalid = decode_json(br#"{"timestamp":true}"#).unwrap();
        assert_eq!(invalid.timestamp, Some(RawTimestamp::Invalid("true".into())));
    }

    #[test]
    fn unsupported_values_are_kept_for_classification() {
        let decoded = decode_json(br#"{"nested":{"a":1},"list":[1],"flag":true,"none":null}"#).unwrap();
        assert_eq!(field(&decoded, "nested"), Some(&FieldValue::Unsupported("object")));
        assert_eq!(field(&decoded, "list"), Some(&FieldValue::Unsupported("array")));
        assert_eq!(field(&decoded, "flag"), Some(&FieldValue::Unsupported("boolean")));
        assert_eq!(field(&decoded, "none"), Some(&FieldValue::Unsupported("null")));
    }

    #[test]
    fn invalid_json_fails() {
        assert!(matches!(decode_json(br#"{"invalid_field":0x88}"#), Err(DecodeError::InvalidJson(_))));
        assert!(matches!(decode_json(br#"[{"a":1}]"#), Err(DecodeError::InvalidJson(_))));
    }
}
