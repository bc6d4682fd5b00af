//! Merge of labelled ICS sources into one deduplicated calendar.

use log::{debug, info};
use serde::Serialize;
use std::collections::HashMap;

use crate::ics::{events_from_text, fold_lines, DedupKey, Event, DEFAULT_FOLD_LIMIT};

pub const DEFAULT_PRODID: &str = "-//ICS Fusion//Calendar Sync//EN";

/// ICS text from one source, tagged with its origin.
#[derive(Debug, Clone)]
pub struct LabeledSource {
    pub origin: String,
    pub text: String,
}

impl LabeledSource {
    pub fn new(origin: impl Into<String>, text: impl Into<String>) -> Self {
        Self { origin: origin.into(), text: text.into() }
    }
}

/// Calendar-level properties written around the merged events.
#[derive(Debug, Clone)]
pub struct CalendarHeader {
    pub prodid: String,
    pub calendar_name: Option<String>,
}

impl Default for CalendarHeader {
    fn default() -> Self {
        Self { prodid: DEFAULT_PRODID.to_string(), calendar_name: None }
    }
}

impl CalendarHeader {
    pub fn lines(&self) -> Vec<String> {
        let mut lines = vec![
            "BEGIN:VCALENDAR".to_string(),
            "VERSION:2.0".to_string(),
            format!("PRODID:{}", self.prodid),
            "CALSCALE:GREGORIAN".to_string(),
        ];
        if let Some(name) = &self.calendar_name {
            lines.push(format!("X-WR-CALNAME:{}", name));
        }
        lines
    }
}

/// Per-origin extraction counts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OriginStats {
    pub origin: String,
    pub events: usize,
    pub unterminated: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MergeStats {
    pub per_origin: Vec<OriginStats>,
    /// Events seen across all sources, before dedup.
    pub events_seen: usize,
    /// Events without UID, DTSTART and SUMMARY; merged under the empty composite key.
    pub malformed_events: usize,
    /// VEVENT blocks left open at end of input and dropped.
    pub unterminated_events: usize,
    /// Existing winners displaced by a primary-origin event.
    pub primary_overrides: usize,
}

impl MergeStats {
    pub fn events_for(&self, origin: &str) -> usize {
        self.per_origin.iter().filter(|s| s.origin == origin).map(|s| s.events).sum()
    }
}

/// Result of one merge: header, surviving events in first-seen order, footer.
#[derive(Debug, Clone)]
pub struct MergedDocument {
    pub header: CalendarHeader,
    pub events: Vec<Event>,
    pub stats: MergeStats,
}

impl MergedDocument {
    /// Unfolded logical lines of the whole calendar.
    pub fn lines(&self) -> Vec<String> {
        let mut lines = self.header.lines();
        for event in &self.events {
            lines.extend(event.lines.iter().cloned());
        }
        lines.push("END:VCALENDAR".to_string());
        lines
    }

    /// Folded ICS text with CRLF line endings and a trailing line break.
    pub fn to_ics(&self) -> String {
        fold_lines(&self.lines(), DEFAULT_FOLD_LIMIT)
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

/// Merges sources, letting events from `primary_origin` win key conflicts.
#[derive(Debug, Clone)]
pub struct MergeEngine {
    primary_origin: String,
    header: CalendarHeader,
}

impl MergeEngine {
    pub fn new(primary_origin: impl Into<String>) -> Self {
        Self { primary_origin: primary_origin.into(), header: CalendarHeader::default() }
    }

    pub fn with_header(mut self, header: CalendarHeader) -> Self {
        self.header = header;
        self
    }

    pub fn primary_origin(&self) -> &str {
        &self.primary_origin
    }

    /// Merge sources in the given order.
    ///
    /// First-seen wins among equal-priority origins; an event from the primary
    /// origin replaces a non-primary winner in place, so output order is the
    /// order in which each key was first seen. Empty sources contribute nothing.
    pub fn merge(&self, sources: &[LabeledSource]) -> MergedDocument {
        let mut winners: Vec<Event> = Vec::new();
        let mut slots: HashMap<DedupKey, usize> = HashMap::new();
        let mut stats = MergeStats::default();

        for source in sources {
            let extraction = events_from_text(&source.text, &source.origin);
            stats.per_origin.push(OriginStats {
                origin: source.origin.clone(),
                events: extraction.events.len(),
                unterminated: extraction.unterminated,
            });
            stats.unterminated_events += extraction.unterminated;

            for event in extraction.events {
                stats.events_seen += 1;
                if event.is_malformed() {
                    stats.malformed_events += 1;
                    debug!(
                        "Event from '{}' has no UID, DTSTART or SUMMARY; merging under empty key",
                        event.origin
                    );
                }

                let key = event.key();
                match slots.get(&key) {
                    None => {
                        slots.insert(key, winners.len());
                        winners.push(event);
                    }
                    Some(&slot) => {
                        let current = &winners[slot];
                        if current.origin != self.primary_origin && event.origin == self.primary_origin {
                            debug!(
                                "Primary origin '{}' overrides '{}' for {}",
                                event.origin, current.origin, key
                            );
                            winners[slot] = event;
                            stats.primary_overrides += 1;
                        }
                    }
                }
            }
        }

        info!(
            "Merged {} events from {} sources into {} unique events",
            stats.events_seen,
            sources.len(),
            winners.len()
        );

        MergedDocument { header: self.header.clone(), events: winners, stats }
    }
}

/// Merge with `primary` as the authoritative origin and the default header.
pub fn merge(sources: &[LabeledSource], primary: &str) -> MergedDocument {
    MergeEngine::new(primary).merge(sources)
}
