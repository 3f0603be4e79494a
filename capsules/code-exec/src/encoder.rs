//! Newline-delimited JSON encoding of execution events.
//!
//! Each event becomes one self-describing JSON object on its own line. The
//! `type` field is `progress` for intermediate records and `result` for the
//! terminal record, so consumers never need to count lines.

use futures_util::{Stream, StreamExt};

use crate::event::ExecEvent;

pub const CONTENT_TYPE: &str = "application/x-ndjson";

/// Encode a single event as one NDJSON line, trailing newline included.
pub fn encode(event: &ExecEvent) -> Result<String, serde_json::Error> {
    let mut line = serde_json::to_string(event)?;
    line.push('\n');
    Ok(line)
}

pub fn decode(line: &str) -> Result<ExecEvent, serde_json::Error> {
    serde_json::from_str(line.trim_end())
}

/// Decode a complete NDJSON body, skipping blank lines.
pub fn decode_all(body: &str) -> Result<Vec<ExecEvent>, serde_json::Error> {
    body.lines()
        .filter(|line| !line.trim().is_empty())
        .map(decode)
        .collect()
}

/// Encode events lazily; each line is yielded as soon as its event arrives.
pub fn ndjson_stream<S>(events: S) -> impl Stream<Item = Result<String, serde_json::Error>>
where
    S: Stream<Item = ExecEvent>,
{
    events.map(|event| encode(&event))
}
