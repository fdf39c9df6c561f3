use crate::error::DecodeError;
use crate::timestamp::TIMESTAMP_FIELD;

use super::{DecodedPayload, FieldValue, RawTimestamp};

/// Разделитель полей внутри строки. Строки разделяются `\n`.
pub(super) const FIELD_DELIMITER: char = ';';

/// Разбить одну строку на поля. Quoting не поддерживается.
fn split_fields(line: &str) -> Vec<&str> {
    line.split(FIELD_DELIMITER).collect()
}

/// Строка заголовка + ровно одна строка значений.
pub(super) fn decode_delimited(body: &[u8]) -> Result<DecodedPayload, DecodeError> {
    let text = std::str::from_utf8(body)?;
    let mut rows = text
        .split('\n')
        .map(|row| row.strip_suffix('\r').unwrap_or(row));

    let header: Vec<&str> = split_fields(rows.next().unwrap_or_default())
        .into_iter()
        .map(str::trim)
        .collect();

    let data: Vec<&str> = rows.filter(|row| !row.trim().is_empty()).collect();
    let row = match data.as_slice() {
        [] => return Err(DecodeError::MissingDataRow),
        [row] => *row,
        more => return Err(DecodeError::UnexpectedDataRows { count: more.len() }),
    };

    let values = split_fields(row);
    if values.len() != header.len() {
        return Err(DecodeError::RowLengthMismatch {
            header: header.len(),
            row: values.len(),
        });
    }

    let mut decoded = DecodedPayload {
        fields: Vec::with_capacity(header.len()),
        timestamp: None,
    };
    for (name, value) in header.into_iter().zip(values) {
        if name == TIMESTAMP_FIELD {
            decoded.timestamp = Some(RawTimestamp::Text(value.trim().to_string()));
            continue;
        }
        decoded.fields.push((name.to_string(), FieldValue::from_text(value)));
    }

    Ok(decoded)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_fields_present() {
        let decoded = decode_delimited(
            b"timestamp;name;tag;temp;preassure;count\n1257894000;test_name;test_tag;12.34;10.23;9",
        )
        .unwrap();

        assert_eq!(decoded.timestamp, Some(RawTimestamp::Text("1257894000".into())));
        assert_eq!(
            decoded.fields,
            vec![
                ("name".to_string(), FieldValue::Text("test_name".into())),
                ("tag".to_string(), FieldValue::Text("test_tag".into())),
                ("temp".to_string(), FieldValue::Number(12.34)),
                ("preassure".to_string(), FieldValue::Number(10.23)),
                ("count".to_string(), FieldValue::Number(9.0)),
            ]
        );
    }

    #[test]
    fn hex_value_is_a_tag() {
        let decoded = decode_delimited(b"invalid_field\n0x88").unwrap();
        assert_eq!(decoded.fields, vec![("invalid_field".to_string(), FieldValue::Text("0x88".into()))]);
    }

    #[test]
    fn crlf_and_trailing_newline() {
        let decoded = decode_delimited(b"temp;site\r\n21.5;north\r\n").unwrap();
        assert_eq!(
            decoded.fields,
            vec![
                ("temp".to_string(), FieldValue::Number(21.5)),
                ("site".to_string(), FieldValue::Text("north".into())),
            ]
        );
    }

    #[test]
    fn headers_only() {
        assert!(matches!(
            decode_delimited(b"timestamp;name;tag;temp;preassure;count"),
            Err(DecodeError::MissingDataRow)
        ));
        assert!(matches!(decode_delimited(b"this is not CSV"), Err(DecodeError::MissingDataRow)));
    }

    #[test]
    fn row_length_mismatch() {
        let greater = decode_delimited(
            b"timestamp;name;tag;temp;preassure;count\n1257894000;test_name;test_tag;12.34;10.23;9;666",
        );
        assert!(matches!(greater, Err(DecodeError::RowLengthMismatch { header: 6, row: 7 })));

        let lesser = decode_delimited(
            b"timestamp;name;tag;temp;preassure;count\n1257894000;test_name;test_tag;12.34;10.23",
        );
        assert!(matches!(lesser, Err(DecodeError::RowLengthMismatch { header: 6, row: 5 })));
    }

    #[test]
    fn more_than_one_data_row() {
        assert!(matches!(
            decode_delimited(b"temp\n1\n2"),
            Err(DecodeError::UnexpectedDataRows { count: 2 })
        ));
    }
}
