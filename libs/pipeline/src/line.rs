//! Line protocol rendering:
//!
//! ```text
//! <table>,<tag>=<value>,... <metric>=<value>,... <timestamp>
//! ```
//!
//! Пары сортируются по ключу: для backend'а порядок не важен, а
//! детерминированная строка удобнее в логах. Имя таблицы выводится как есть.

use std::fmt::Write;

use bridge_api::{NormalizedRecord, Precision};

/// Отрендерить одну запись в строку line protocol.
pub fn render(record: &NormalizedRecord, precision: Precision) -> String {
    let mut line = record.table.clone();

    let mut tags: Vec<_> = record.tags.iter().collect();
    tags.sort_by(|a, b| a.0.cmp(b.0));
    for (key, value) in tags {
        line.push(',');
        line.push_str(&escape(key));
        line.push('=');
        line.push_str(&escape(value));
    }

    line.push(' ');

    let mut metrics: Vec<_> = record.metrics.iter().collect();
    metrics.sort_by(|a, b| a.0.cmp(b.0));
    for (i, (key, value)) in metrics.into_iter().enumerate() {
        if i > 0 {
            line.push(',');
        }
        let _ = write!(line, "{}={}", escape(key), value);
    }

    let _ = write!(line, " {}", precision.epoch(&record.timestamp));
    line
}

/// Commas, equals signs and spaces must be escaped in tag keys, tag values
/// and field keys. Backslash goes first so the added escapes stay intact.
fn escape(s: &str) -> String {
    s.replace('\\', "\\\\")
        .replace(',', "\\,")
        .replace('=', "\\=")
        .replace(' ', "\\ ")
}
