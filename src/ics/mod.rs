//! Line-level iCalendar handling: folding codec and VEVENT extraction.
//
// Nothing here builds a full component tree; events are kept as their ordered
// unfolded lines so untouched properties round-trip exactly.

pub mod codec;
pub mod event;

pub use codec::{fold, fold_lines, split_property, unfold, CRLF, DEFAULT_FOLD_LIMIT};
pub use event::{
    events_from_text, extract_events, key_for, scan_events, DedupKey, Event, Extraction,
    RawDocument,
};
