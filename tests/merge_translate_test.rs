use anyhow::Result;
use icsfusion::translate::default_dictionary;
use icsfusion::{merge, translate, LabeledSource, MergeEngine, TranslationOverlay};
use pretty_assertions::assert_eq;
use std::collections::{BTreeMap, HashMap};
use std::io::BufReader;

const AIRBNB: &str = "BEGIN:VCALENDAR\r
VERSION:2.0\r
PRODID:-//Airbnb Inc//Hosting Calendar 0.8.8//EN\r
BEGIN:VEVENT\r
DTSTART;VALUE=DATE:20250601\r
DTEND;VALUE=DATE:20250605\r
UID:1418fb94e984-2b5d9ecd5d3e2b1c@airbnb.com\r
SUMMARY:Reserved\r
DESCRIPTION:Reservation URL: https://www.airbnb.com/hosting/reservations/details/HMABCDEF12 and a long\r
  tail that had to be folded\r
END:VEVENT\r
BEGIN:VEVENT\r
DTSTART;VALUE=DATE:20250710\r
DTEND;VALUE=DATE:20250712\r
UID:77aa1c2b-airbnb\r
SUMMARY:Airbnb (Not available)\r
END:VEVENT\r
END:VCALENDAR\r
";

const BOOKING: &str = "BEGIN:VCALENDAR\r
VERSION:2.0\r
BEGIN:VEVENT\r
DTSTART;VALUE=DATE:20250601\r
DTEND;VALUE=DATE:20250605\r
UID:1418fb94e984-2b5d9ecd5d3e2b1c@airbnb.com\r
SUMMARY:CLOSED - Not available\r
END:VEVENT\r
BEGIN:VEVENT\r
DTSTART;VALUE=DATE:20250801\r
DTEND;VALUE=DATE:20250803\r
SUMMARY:Booked\r
END:VEVENT\r
END:VCALENDAR\r
";

/// Parse with an independent iCalendar reader and return every event's SUMMARY.
fn summaries(ics: &str) -> Vec<String> {
    let parser = ical::IcalParser::new(BufReader::new(ics.as_bytes()));
    let mut out = Vec::new();
    for calendar in parser {
        let calendar = calendar.expect("merged output should parse");
        for event in calendar.events {
            for property in event.properties {
                if property.name == "SUMMARY" {
                    out.push(property.value.unwrap_or_default());
                }
            }
        }
    }
    out
}

#[test]
fn test_merged_output_is_valid_calendar() {
    let merged = merge(
        &[LabeledSource::new("airbnb", AIRBNB), LabeledSource::new("booking", BOOKING)],
        "airbnb",
    );

    assert_eq!(merged.len(), 3);
    assert_eq!(merged.stats.primary_overrides, 0);
    assert_eq!(
        summaries(&merged.to_ics()),
        vec!["Reserved", "Airbnb (Not available)", "Booked"]
    );
}

#[test]
fn test_primary_wins_regardless_of_order() {
    let merged = merge(
        &[LabeledSource::new("booking", BOOKING), LabeledSource::new("airbnb", AIRBNB)],
        "airbnb",
    );

    assert_eq!(merged.stats.primary_overrides, 1);
    // Replacement keeps the displaced event's position
    assert_eq!(
        summaries(&merged.to_ics()),
        vec!["Reserved", "Booked", "Airbnb (Not available)"]
    );
    assert_eq!(merged.events[0].origin, "airbnb");
}

#[test]
fn test_folded_description_survives_merge() {
    let merged = MergeEngine::new("airbnb").merge(&[LabeledSource::new("airbnb", AIRBNB)]);
    let description = merged
        .events[0]
        .lines
        .iter()
        .find(|line| line.starts_with("DESCRIPTION:"))
        .cloned()
        .unwrap_or_default();
    assert!(description.ends_with("and a long tail that had to be folded"));

    for physical in merged.to_ics().split("\r\n") {
        assert!(physical.len() <= 75, "line too long: {:?}", physical);
    }
}

#[test]
fn test_translate_merged_calendar() -> Result<()> {
    let merged = merge(
        &[LabeledSource::new("airbnb", AIRBNB), LabeledSource::new("booking", BOOKING)],
        "airbnb",
    );

    let translated = translate(&merged.to_ics(), &default_dictionary())?;
    assert_eq!(
        summaries(&translated),
        vec!["Réservé", "Airbnb (Indisponible)", "Réservé"]
    );
    // Only SUMMARY lines change
    assert!(translated.contains("DESCRIPTION:Reservation URL"));
    Ok(())
}

#[test]
fn test_translate_with_origin_labels() -> Result<()> {
    let merged = merge(
        &[LabeledSource::new("airbnb", AIRBNB), LabeledSource::new("booking", BOOKING)],
        "airbnb",
    );
    let labels = HashMap::from([("booking".to_string(), "Booking.com".to_string())]);
    let overlay = TranslationOverlay::new(default_dictionary())?.with_origin_labels(labels);

    let summaries = summaries(&overlay.translate_document(&merged));
    assert_eq!(summaries[0], "Réservé");
    assert_eq!(summaries[2], "Booking.com (Réservé)");
    Ok(())
}

#[test]
fn test_translation_leaves_description_alone() -> Result<()> {
    let dictionary = BTreeMap::from([("Reserved", "Réservé")]);
    let input = "BEGIN:VEVENT\r\nSUMMARY:Reserved\r\nDESCRIPTION:Reserved\r\nEND:VEVENT\r\n";

    let output = translate(input, &dictionary)?;
    assert_eq!(output, "BEGIN:VEVENT\r\nSUMMARY:Réservé\r\nDESCRIPTION:Reserved\r\nEND:VEVENT\r\n");
    Ok(())
}
