use crate::error::DecodeError;

/// Куда писать запись: база и таблица (measurement).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destination {
    pub database: String,
    pub table: String,
}

/// Разобрать topic вида `<database>/<table>`.
///
/// Берутся первые два сегмента, остальные игнорируются. Сегменты не
/// экранируются.
pub fn route(topic: &str) -> Result<Destination, DecodeError> {
    let mut segments = topic.split('/');
    match (segments.next(), segments.next()) {
        (Some(database), Some(table)) if !database.is_empty() && !table.is_empty() => Ok(Destination {
            database: database.to_string(),
            table: table.to_string(),
        }),
        _ => Err(DecodeError::MalformedTopic(topic.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_database_and_table() {
        let dest = route("sensors/room1").unwrap();
        assert_eq!(dest.database, "sensors");
        assert_eq!(dest.table, "room1");
    }

    #[test]
    fn extra_segments_are_ignored() {
        let dest = route("sensors/room1/probe/7").unwrap();
        assert_eq!(dest, Destination { database: "sensors".into(), table: "room1".into() });
    }

    #[test]
    fn single_segment_is_malformed() {
        assert!(matches!(route("sensors"), Err(DecodeError::MalformedTopic(t)) if t == "sensors"));
        assert!(matches!(route(""), Err(DecodeError::MalformedTopic(_))));
    }

    #[test]
    fn empty_segment_is_malformed() {
        assert!(route("sensors/").is_err());
        assert!(route("/room1").is_err());
    }
}
