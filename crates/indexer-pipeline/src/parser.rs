//! Spool file parsing.
//!
//! A spool file holds either one JSON array of events or one event object
//! per line. Bad lines and incomplete events are logged and skipped; only
//! an unreadable file is an error.

use std::collections::BTreeMap;
use std::path::Path;

use serde_json::Value;
use tracing::{debug, info, warn};

use indexer_types::{Event, HostSlice};

use crate::error::PipelineError;

/// Events of one spool file grouped by host.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ParsedEvents {
    /// Page ids per host, in file order
    pub by_host: BTreeMap<String, Vec<u64>>,
    /// Non-blank lines in the file
    pub line_count: usize,
    /// Valid events accepted
    pub event_count: usize,
}

impl ParsedEvents {
    /// Whether no valid event was found.
    pub fn is_empty(&self) -> bool {
        self.by_host.is_empty()
    }

    /// Request-sized slices for every host.
    pub fn slices(&self) -> Vec<HostSlice> {
        self.by_host
            .iter()
            .flat_map(|(host, ids)| HostSlice::split(host, ids))
            .collect()
    }

    fn push(&mut self, event: Event) {
        self.by_host
            .entry(event.server_name)
            .or_default()
            .push(event.page_id);
        self.event_count += 1;
    }
}

/// Read and parse a spool file.
pub fn parse_event_file(path: &Path) -> Result<ParsedEvents, PipelineError> {
    let content = std::fs::read(path)?;
    Ok(parse_event_bytes(&content, &path.display().to_string()))
}

/// Parse spool file content. `source` only labels log lines.
pub fn parse_events(content: &str, source: &str) -> ParsedEvents {
    parse_event_bytes(content.as_bytes(), source)
}

/// Parse raw spool file bytes.
///
/// A line that is not valid UTF-8 is skipped like any other undecodable
/// line.
pub fn parse_event_bytes(content: &[u8], source: &str) -> ParsedEvents {
    let lines: Vec<&[u8]> = content
        .split(|b| *b == b'\n')
        .map(trim_line)
        .filter(|line| !line.is_empty())
        .collect();

    let mut parsed = ParsedEvents {
        line_count: lines.len(),
        ..Default::default()
    };

    match decode_as_array(content, &lines) {
        Some(values) => {
            debug!(file = %source, count = values.len(), "Decoded spool file as a single batch");
            for (index, value) in values.iter().enumerate() {
                accept(&mut parsed, value, index, source);
            }
        }
        None => {
            for (index, line) in lines.iter().enumerate() {
                match decode_line(line) {
                    Ok(value) => accept(&mut parsed, &value, index, source),
                    Err(e) => {
                        warn!(
                            file = %source,
                            line_number = index,
                            data = %String::from_utf8_lossy(line),
                            error = %e,
                            "Could not decode event"
                        );
                    }
                }
            }
        }
    }

    parsed
}

fn decode_line(line: &[u8]) -> Result<Value, String> {
    let text = std::str::from_utf8(line).map_err(|e| e.to_string())?;
    serde_json::from_str(text).map_err(|e| e.to_string())
}

fn trim_line(line: &[u8]) -> &[u8] {
    let start = line
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(line.len());
    let end = line
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map_or(start, |i| i + 1);
    &line[start..end]
}

/// Try the whole file as a JSON array, then as newline-delimited objects
/// joined into one array.
fn decode_as_array(content: &[u8], lines: &[&[u8]]) -> Option<Vec<Value>> {
    if let Ok(values) = serde_json::from_slice::<Vec<Value>>(content) {
        return Some(values);
    }
    let mut joined = Vec::with_capacity(content.len() + 2);
    joined.push(b'[');
    joined.extend_from_slice(&lines.join(&b","[..]));
    joined.push(b']');
    serde_json::from_slice::<Vec<Value>>(&joined).ok()
}

fn accept(parsed: &mut ParsedEvents, value: &Value, index: usize, source: &str) {
    match Event::from_value(value) {
        Some(event) => parsed.push(event),
        None => {
            info!(
                file = %source,
                line_number = index,
                data = %value,
                "Event is malformed"
            );
        }
    }
}
