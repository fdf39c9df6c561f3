use chrono::{DateTime, Utc};

use bridge_api::{InboundMessage, NormalizedRecord};

use crate::classify::{classify, Classified};
use crate::decode::decode;
use crate::error::DecodeError;
use crate::timestamp;
use crate::topic::route;

/// Topic router → decoder → timestamp resolver → classifier.
pub fn normalize(message: &InboundMessage) -> Result<NormalizedRecord, DecodeError> {
    normalize_at(message, Utc::now)
}

/// То же, что [`normalize`], с явным источником текущего времени.
pub fn normalize_at(
    message: &InboundMessage,
    now: impl FnOnce() -> DateTime<Utc>,
) -> Result<NormalizedRecord, DecodeError> {
    let destination = route(&message.topic)?;
    let decoded = decode(&message.payload)?;
    let timestamp = timestamp::resolve(decoded.timestamp.as_ref(), message, now)?;
    let Classified { metrics, tags } = classify(decoded.fields)?;

    Ok(NormalizedRecord {
        metrics,
        tags,
        timestamp,
        database: destination.database,
        table: destination.table,
    })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use chrono::TimeZone;

    use super::*;

    fn expected_room1() -> NormalizedRecord {
        NormalizedRecord {
            metrics: HashMap::from([("temp".to_string(), 12.34)]),
            tags: HashMap::from([("nullTag".to_string(), "null".to_string())]),
            timestamp: Utc.timestamp_opt(1_257_894_000, 0).unwrap(),
            database: "sensors".into(),
            table: "room1".into(),
        }
    }

    #[test]
    fn json_scenario() {
        let msg = InboundMessage::new("sensors/room1", br#"{"timestamp":1257894000,"temp":12.34}"#.to_vec());
        assert_eq!(normalize(&msg).unwrap(), expected_room1());
    }

    #[test]
    fn delimited_scenario_matches_json() {
        let msg = InboundMessage::new("sensors/room1", b"timestamp;temp\n1257894000;12.34".to_vec());
        assert_eq!(normalize(&msg).unwrap(), expected_room1());
    }

    #[test]
    fn missing_timestamp_resolves_to_now() {
        let msg = InboundMessage::new("sensors/room1", br#"{"temp":12.34}"#.to_vec());
        let before = Utc::now();
        let record = normalize(&msg).unwrap();
        let after = Utc::now();

        // усечение до секунд может увести назад не больше чем на секунду
        assert!(record.timestamp >= before - chrono::Duration::seconds(1));
        assert!(record.timestamp <= after);
    }

    #[test]
    fn property_timestamp_is_used() {
        let msg = InboundMessage::new("sensors/room1", b"temp\n12.34".to_vec())
            .with_property("timestamp", "2009-11-10T23:00:00Z");
        assert_eq!(normalize(&msg).unwrap(), expected_room1());
    }

    #[test]
    fn topic_is_checked_first() {
        let msg = InboundMessage::new("sensors", b"not even parsed".to_vec());
        assert!(matches!(normalize(&msg), Err(DecodeError::MalformedTopic(_))));
    }

    #[test]
    fn unsupported_field_rejects_message() {
        let msg = InboundMessage::new("sensors/room1", br#"{"temp":1,"ok":true}"#.to_vec());
        assert!(matches!(
            normalize(&msg),
            Err(DecodeError::UnsupportedFieldType { ref key, kind: "boolean" }) if key == "ok"
        ));
    }

    #[test]
    fn empty_cell_falls_back_to_sentinel_tag() {
        let msg = InboundMessage::new("sensors/room1", b"timestamp;temp;name\n1257894000;12.34;".to_vec());
        assert_eq!(normalize(&msg).unwrap(), expected_room1());

        let msg = InboundMessage::new("sensors/room1", br#"{"timestamp":1257894000,"temp":12.34,"name":""}"#.to_vec());
        assert_eq!(normalize(&msg).unwrap(), expected_room1());
    }

    #[test]
    fn multiline_json_string_rejects_message() {
        let msg = InboundMessage::new("sensors/room1", br#"{"temp":1,"note":"a\nb"}"#.to_vec());
        assert!(matches!(normalize(&msg), Err(DecodeError::LineBreak { ref key }) if key == "note"));
    }
}
