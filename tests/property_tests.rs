//! Property-based tests for line folding and event extraction.

use icsfusion::ics::{events_from_text, fold, fold_lines, unfold, DEFAULT_FOLD_LIMIT};
use icsfusion::{merge, LabeledSource};
use proptest::prelude::*;

// Logical lines: never empty, never starting with a continuation marker.
fn logical_lines() -> impl Strategy<Value = Vec<String>> {
    prop::collection::vec(r"[^ \t\r\n][^\r\n]{0,200}", 0..8)
}

/// Property: folding then unfolding restores the logical lines
#[test]
fn proptest_fold_unfold_roundtrip() {
    proptest!(|(lines in logical_lines())| {
        let folded = fold_lines(&lines, DEFAULT_FOLD_LIMIT);
        prop_assert_eq!(unfold(&folded), lines);
    });
}

/// Property: unfold(fold(unfold(x))) == unfold(x) for arbitrary folded input
#[test]
fn proptest_unfold_is_stable_under_refold() {
    proptest!(|(raw in r"[^\r]{0,400}")| {
        let logical = unfold(&raw);
        let refolded = fold(&logical.join("\n"), DEFAULT_FOLD_LIMIT);
        let relogical = unfold(&refolded);
        // Empty logical lines vanish from a joined document only at the end
        let trimmed: Vec<&String> = logical.iter().rev().skip_while(|l| l.is_empty()).collect();
        let retrimmed: Vec<&String> = relogical.iter().rev().skip_while(|l| l.is_empty()).collect();
        prop_assert_eq!(retrimmed, trimmed);
    });
}

// Physical lines as raw bytes, split on CRLF only.
fn physical_lines(bytes: &[u8]) -> Vec<&[u8]> {
    let mut out = Vec::new();
    let mut start = 0;
    let mut i = 0;
    while i + 1 < bytes.len() {
        if bytes[i] == b'\r' && bytes[i + 1] == b'\n' {
            out.push(&bytes[start..i]);
            i += 2;
            start = i;
        } else {
            i += 1;
        }
    }
    out.push(&bytes[start..]);
    out
}

/// Property: no physical line exceeds the limit and every one decodes on its own
#[test]
fn proptest_fold_respects_limit() {
    proptest!(|(lines in logical_lines(), limit in 8usize..100)| {
        let folded = fold_lines(&lines, limit);
        prop_assert!(folded.is_empty() || folded.ends_with("\r\n"));
        for physical in physical_lines(folded.as_bytes()) {
            prop_assert!(physical.len() <= limit, "{} > {}", physical.len(), limit);
            prop_assert!(std::str::from_utf8(physical).is_ok(), "split code point: {:?}", physical);
        }
    });
}

/// Property: multibyte characters straddling the fold point are moved whole
#[test]
fn proptest_fold_never_splits_code_point_at_boundary() {
    proptest!(|(pad in "[a-z]{60,80}", wide in "[é日🏠]{1,40}")| {
        let line = format!("SUMMARY:{}{}", pad, wide);
        let folded = fold_lines(&[line.as_str()], DEFAULT_FOLD_LIMIT);
        for physical in physical_lines(folded.as_bytes()) {
            prop_assert!(physical.len() <= DEFAULT_FOLD_LIMIT);
            prop_assert!(std::str::from_utf8(physical).is_ok(), "split code point: {:?}", physical);
        }
        prop_assert_eq!(unfold(&folded), vec![line]);
    });
}

/// Property: multibyte summaries survive fold and merge intact
#[test]
fn proptest_multibyte_summary_survives_merge() {
    proptest!(|(summary in r"[éàü日本語🏠a-z]{1,120}")| {
        let source = format!("BEGIN:VEVENT\r\nUID:x\r\nSUMMARY:{}\r\nEND:VEVENT\r\n", summary);
        let merged = merge(&[LabeledSource::new("a", source)], "a");
        let reparsed = events_from_text(&merged.to_ics(), "a");
        prop_assert_eq!(reparsed.events.len(), 1);
        prop_assert_eq!(reparsed.events[0].summary.as_deref(), Some(summary.as_str()));
    });
}

/// Property: merging never panics and never yields more events than it saw
#[test]
fn proptest_merge_no_panic() {
    proptest!(|(a in "\\PC{0,300}", b in "\\PC{0,300}")| {
        let merged = merge(&[LabeledSource::new("a", a), LabeledSource::new("b", b)], "a");
        prop_assert!(merged.len() <= merged.stats.events_seen);
    });
}
