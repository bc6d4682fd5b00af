//! VEVENT extraction and dedup keys.

use chrono::{DateTime, Utc};
use log::warn;
use serde::Serialize;
use std::fmt;

use super::codec::{is_property, property_value, unfold};

/// Raw ICS text exactly as one source delivered it.
#[derive(Debug, Clone)]
pub struct RawDocument {
    pub origin: String,
    pub bytes: Vec<u8>,
    pub fetched_at: DateTime<Utc>,
}

impl RawDocument {
    pub fn new(origin: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self { origin: origin.into(), bytes, fetched_at: Utc::now() }
    }

    /// Body decoded as UTF-8, replacing invalid sequences.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.bytes).into_owned()
    }

    /// Cheap shape check: starts with `BEGIN:VCALENDAR` and contains `END:VCALENDAR`.
    pub fn looks_like_calendar(&self) -> bool {
        let text = self.text();
        let trimmed = text.trim_start_matches('\u{feff}').trim();
        let upper_start = trimmed.get(..15).map(str::to_ascii_uppercase);
        upper_start.as_deref() == Some("BEGIN:VCALENDAR")
            && trimmed.to_ascii_uppercase().contains("END:VCALENDAR")
    }
}

/// One VEVENT block: its unfolded lines from `BEGIN:VEVENT` to `END:VEVENT` inclusive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub origin: String,
    pub lines: Vec<String>,
    pub uid: Option<String>,
    pub dtstart: Option<String>,
    pub summary: Option<String>,
}

impl Event {
    /// Build an event from a complete block of lines, deriving the key fields.
    pub fn from_lines(origin: &str, lines: Vec<String>) -> Self {
        let uid = first_value(&lines, "UID");
        let dtstart = first_value(&lines, "DTSTART");
        let summary = first_value(&lines, "SUMMARY");
        Self { origin: origin.to_string(), lines, uid, dtstart, summary }
    }

    pub fn key(&self) -> DedupKey {
        key_for(self)
    }

    /// True when the event carries none of UID, DTSTART or SUMMARY.
    pub fn is_malformed(&self) -> bool {
        blank(&self.uid) && blank(&self.dtstart) && blank(&self.summary)
    }
}

fn blank(value: &Option<String>) -> bool {
    value.as_deref().map_or(true, |v| v.trim().is_empty())
}

fn first_value(lines: &[String], name: &str) -> Option<String> {
    lines.iter().find_map(|line| property_value(line, name)).map(str::to_string)
}

/// Identity used to recognise the same booking across sources.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum DedupKey {
    Uid(String),
    Composite { dtstart: String, summary: String },
}

impl fmt::Display for DedupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DedupKey::Uid(uid) => write!(f, "UID::{}", uid),
            DedupKey::Composite { dtstart, summary } => write!(f, "DS::{}::SM::{}", dtstart, summary),
        }
    }
}

/// Collapse whitespace runs to one space and trim.
fn normalize(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Dedup key of an event: the trimmed UID when present and non-empty, else
/// the normalised DTSTART and SUMMARY values (empty when missing).
///
/// Two UID-less events with equal start and summary collide, including the
/// degenerate case where both are empty.
pub fn key_for(event: &Event) -> DedupKey {
    if let Some(uid) = event.uid.as_deref().map(str::trim).filter(|uid| !uid.is_empty()) {
        return DedupKey::Uid(uid.to_string());
    }
    DedupKey::Composite {
        dtstart: event.dtstart.as_deref().map(normalize).unwrap_or_default(),
        summary: event.summary.as_deref().map(normalize).unwrap_or_default(),
    }
}

/// Events found in one document plus the count of blocks that never closed.
#[derive(Debug, Default)]
pub struct Extraction {
    pub events: Vec<Event>,
    pub unterminated: usize,
}

/// Scan unfolded lines and collect every complete VEVENT block.
///
/// Lines outside a block are ignored. A block still open at end of input is
/// discarded and counted in [`Extraction::unterminated`].
pub fn scan_events<S: AsRef<str>>(lines: &[S], origin: &str) -> Extraction {
    let mut extraction = Extraction::default();
    let mut current: Option<Vec<String>> = None;

    for line in lines {
        let line = line.as_ref();
        match current.as_mut() {
            None => {
                if line.eq_ignore_ascii_case("BEGIN:VEVENT") {
                    current = Some(vec![line.to_string()]);
                }
            }
            Some(buffer) => {
                buffer.push(line.to_string());
                if line.eq_ignore_ascii_case("END:VEVENT") {
                    if let Some(block) = current.take() {
                        extraction.events.push(Event::from_lines(origin, block));
                    }
                }
            }
        }
    }

    if let Some(open) = current {
        warn!(
            "Dropping unterminated VEVENT from source '{}' ({} lines buffered)",
            origin,
            open.len()
        );
        extraction.unterminated += 1;
    }

    extraction
}

/// Complete VEVENT blocks in document order, tagged with `origin`.
pub fn extract_events<S: AsRef<str>>(lines: &[S], origin: &str) -> Vec<Event> {
    scan_events(lines, origin).events
}

/// Unfold raw ICS text and extract its events.
pub fn events_from_text(raw: &str, origin: &str) -> Extraction {
    scan_events(&unfold(raw), origin)
}

/// Whether the line is a SUMMARY property.
pub fn is_summary(line: &str) -> bool {
    is_property(line, "SUMMARY")
}
