//! SUMMARY-only phrase translation over ICS documents.

use log::debug;
use regex::{Captures, Regex};
use std::collections::{BTreeMap, HashMap};

use crate::ics::codec::{fold_lines, split_property, unfold, DEFAULT_FOLD_LIMIT};
use crate::ics::event::is_summary;
use crate::merge::MergedDocument;

/// English booking-platform phrases to French labels.
pub fn default_dictionary() -> BTreeMap<String, String> {
    [
        ("Reserved", "Réservé"),
        ("Booked", "Réservé"),
        ("Confirmed", "Confirmé"),
        ("Check-in", "Arrivée"),
        ("Check-out", "Départ"),
        ("Blocked", "Bloqué"),
        ("Not available", "Indisponible"),
    ]
    .into_iter()
    .map(|(from, to)| (from.to_string(), to.to_string()))
    .collect()
}

/// Rewrites SUMMARY values through a fixed phrase dictionary.
///
/// Matching is whole-word and case-insensitive, in a single pass with longer
/// phrases preferred, so a replaced phrase is never translated twice.
#[derive(Debug, Clone)]
pub struct TranslationOverlay {
    pattern: Option<Regex>,
    targets: HashMap<String, String>,
    origin_labels: HashMap<String, String>,
}

impl TranslationOverlay {
    pub fn new<I, K, V>(dictionary: I) -> Result<Self, regex::Error>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut targets = HashMap::new();
        let mut phrases = Vec::new();
        for (from, to) in dictionary {
            let from = from.as_ref().trim();
            if from.is_empty() {
                continue;
            }
            if targets.insert(from.to_lowercase(), to.into()).is_none() {
                phrases.push(from.to_string());
            }
        }
        phrases.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));

        let pattern = if phrases.is_empty() {
            None
        } else {
            let alternation = phrases.iter().map(|p| bounded(p)).collect::<Vec<_>>().join("|");
            Some(Regex::new(&format!(r"(?i)(?:{})", alternation))?)
        };

        Ok(Self { pattern, targets, origin_labels: HashMap::new() })
    }

    /// Display labels per origin, used by [`translate_document`](Self::translate_document).
    pub fn with_origin_labels(mut self, labels: HashMap<String, String>) -> Self {
        self.origin_labels = labels;
        self
    }

    /// Translate one text value; unknown phrases pass through.
    pub fn translate_text(&self, text: &str) -> String {
        let Some(pattern) = &self.pattern else {
            return text.to_string();
        };
        pattern
            .replace_all(text, |caps: &Captures| {
                let matched = &caps[0];
                self.targets
                    .get(&matched.to_lowercase())
                    .cloned()
                    .unwrap_or_else(|| matched.to_string())
            })
            .into_owned()
    }

    /// Translate a SUMMARY content line, keeping its name and parameters verbatim.
    pub fn translate_line(&self, line: &str) -> String {
        if !is_summary(line) {
            return line.to_string();
        }
        match split_property(line) {
            Some((head, value)) => format!("{}:{}", head, self.translate_text(value)),
            None => line.to_string(),
        }
    }

    /// Translate every SUMMARY value of an ICS document and refold it.
    pub fn translate(&self, document: &str) -> String {
        let lines: Vec<String> = unfold(document).iter().map(|l| self.translate_line(l)).collect();
        fold_lines(&lines, DEFAULT_FOLD_LIMIT)
    }

    /// Translated variant of a merged calendar, prefixing each SUMMARY with
    /// its origin label when one is configured: `<label> (<translated>)`.
    pub fn translate_document(&self, document: &MergedDocument) -> String {
        let mut lines = document.header.lines();
        for event in &document.events {
            let label = self.origin_labels.get(&event.origin);
            for line in &event.lines {
                lines.push(self.annotate_line(line, label.map(String::as_str)));
            }
        }
        lines.push("END:VCALENDAR".to_string());
        debug!("Translated {} events", document.events.len());
        fold_lines(&lines, DEFAULT_FOLD_LIMIT)
    }

    fn annotate_line(&self, line: &str, label: Option<&str>) -> String {
        if !is_summary(line) {
            return line.to_string();
        }
        match (split_property(line), label) {
            (Some((head, value)), Some(label)) => {
                format!("{}:{} ({})", head, label, self.translate_text(value.trim()))
            }
            _ => self.translate_line(line),
        }
    }
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

// Whole-word anchors only on sides where the phrase has a word character;
// `\b` next to punctuation would demand a word character outside the phrase.
fn bounded(phrase: &str) -> String {
    let lead = if phrase.chars().next().is_some_and(is_word_char) { r"\b" } else { "" };
    let trail = if phrase.chars().next_back().is_some_and(is_word_char) { r"\b" } else { "" };
    format!("{}{}{}", lead, regex::escape(phrase), trail)
}

/// Translate `document` with `dictionary`.
pub fn translate<K, V>(document: &str, dictionary: &BTreeMap<K, V>) -> Result<String, regex::Error>
where
    K: AsRef<str>,
    V: AsRef<str>,
{
    let overlay = TranslationOverlay::new(dictionary.iter().map(|(k, v)| (k, v.as_ref().to_string())))?;
    Ok(overlay.translate(document))
}
