//! RFC 5545 §3.1 content line unfolding and folding.
//
// Unfolding turns physical lines into logical lines; folding does the reverse
// on byte offsets, never splitting a UTF-8 code point.

use log::debug;

/// Maximum physical line length in octets, excluding the line break.
pub const DEFAULT_FOLD_LIMIT: usize = 75;

/// Line break emitted on output.
pub const CRLF: &str = "\r\n";

/// Join continuation lines onto the logical line they belong to.
///
/// Accepts CRLF or LF line endings. A physical line starting with a single
/// space or horizontal tab continues the previous logical line: the marker is
/// removed and the rest appended verbatim. A continuation with nothing before
/// it is dropped.
pub fn unfold(raw: &str) -> Vec<String> {
    let mut logical: Vec<String> = Vec::new();

    for physical in raw.lines() {
        let physical = physical.strip_suffix('\r').unwrap_or(physical);

        if let Some(rest) = physical.strip_prefix([' ', '\t']) {
            match logical.last_mut() {
                Some(previous) => previous.push_str(rest),
                None => debug!("Dropping leading continuation line with no logical line to extend"),
            }
        } else {
            logical.push(physical.to_string());
        }
    }

    logical
}

/// Fold every logical line of `document` so no physical line exceeds `limit` bytes.
///
/// Output uses CRLF line endings and always ends with a line break (an empty
/// document stays empty).
pub fn fold(document: &str, limit: usize) -> String {
    let mut out = String::with_capacity(document.len() + document.len() / limit.max(1) * 3);
    for line in document.lines() {
        let line = line.strip_suffix('\r').unwrap_or(line);
        fold_line_into(line, limit, &mut out);
    }
    out
}

/// Fold already-unfolded logical lines and join them into one document.
pub fn fold_lines<S: AsRef<str>>(lines: &[S], limit: usize) -> String {
    let mut out = String::new();
    for line in lines {
        fold_line_into(line.as_ref(), limit, &mut out);
    }
    out
}

fn fold_line_into(line: &str, limit: usize, out: &mut String) {
    if line.len() <= limit {
        out.push_str(line);
        out.push_str(CRLF);
        return;
    }

    let mut pos = 0;
    let mut first = true;
    while pos < line.len() {
        // The leading space of a continuation counts toward the limit.
        let room = if first { limit } else { limit.saturating_sub(1) }.max(1);
        let mut end = (pos + room).min(line.len());
        while end > pos && !line.is_char_boundary(end) {
            end -= 1;
        }
        if end == pos {
            // A single code point wider than the room left; emit it whole.
            end = pos + line[pos..].chars().next().map_or(1, char::len_utf8);
        }

        if !first {
            out.push(' ');
        }
        out.push_str(&line[pos..end]);
        out.push_str(CRLF);

        pos = end;
        first = false;
    }
}

/// Split a content line into its head (name plus parameters) and value.
///
/// The separator is the first `:` outside a double-quoted parameter value.
/// Returns `None` when the line has no separator.
pub fn split_property(line: &str) -> Option<(&str, &str)> {
    let mut quoted = false;
    for (idx, ch) in line.char_indices() {
        match ch {
            '"' => quoted = !quoted,
            ':' if !quoted => return Some((&line[..idx], &line[idx + 1..])),
            _ => {}
        }
    }
    None
}

/// Property name of a content line: everything before the first `;` or `:`.
pub fn property_name(line: &str) -> &str {
    let end = line.find([';', ':']).unwrap_or(line.len());
    &line[..end]
}

/// ASCII case-insensitive property name match.
pub fn is_property(line: &str, name: &str) -> bool {
    property_name(line).eq_ignore_ascii_case(name)
}

/// Value of the line if its property name is `name`.
pub fn property_value<'a>(line: &'a str, name: &str) -> Option<&'a str> {
    if !is_property(line, name) {
        return None;
    }
    split_property(line).map(|(_, value)| value)
}
