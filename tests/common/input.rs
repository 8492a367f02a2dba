//! Input line builders

use serde_json::{json, Value};

/// One `RECORD` line for `stream`.
pub fn record_line(stream: &str, data: Value) -> String {
    json!({
        "type": "RECORD",
        "record": {"stream": stream, "data": data, "emitted_at": 1_700_000_000_000i64}
    })
    .to_string()
}

/// One `STATE` line carrying a cursor.
pub fn checkpoint_line(cursor: u64) -> String {
    json!({"type": "STATE", "state": {"cursor": cursor}}).to_string()
}

/// Join lines into one newline-delimited input.
pub fn input_of(lines: &[String]) -> String {
    let mut input = lines.join("\n");
    input.push('\n');
    input
}
