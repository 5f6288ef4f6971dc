//! ASS script parsing and serialization.
//!
//! Line-oriented: sections are delimited by `[Script Info]`, `[V4+
//! Styles]`, `[Events]`; any other `[...]` section is preserved verbatim in
//! its original position. `Format:` lines are skipped on read and
//! regenerated canonically on write. Events are written back out in
//! `source_index` order regardless of how the in-memory list was sorted by
//! the engine.

use crate::error::SushiError;
use crate::events::ScriptEvent;

#[derive(Debug, Clone)]
struct AssEventFields {
    kind: String,
    layer: String,
    name: String,
    margin_left: String,
    margin_right: String,
    margin_vertical: String,
    effect: String,
}

#[derive(Debug, Clone)]
enum Section {
    ScriptInfo(Vec<String>),
    Styles(Vec<String>),
    Events,
    Other { name: String, lines: Vec<String> },
}

/// Opaque presentation state needed to serialize events back out: section
/// order/content plus the per-event fields `ScriptEvent` doesn't carry.
#[derive(Debug, Clone)]
pub struct AssDocument {
    sections: Vec<Section>,
    fields: Vec<AssEventFields>,
}

fn bad_ass(detail: &str) -> SushiError {
    SushiError::BadFormat {
        path: "<ass>".to_string(),
        detail: detail.to_string(),
    }
}

fn parse_ass_time(s: &str) -> Result<f64, SushiError> {
    let parts: Vec<&str> = s.split(':').collect();
    if parts.len() != 3 {
        return Err(bad_ass(&format!("bad ASS timestamp: {s}")));
    }
    let hours: f64 = parts[0].parse().map_err(|_| bad_ass(&format!("bad ASS timestamp: {s}")))?;
    let minutes: f64 = parts[1].parse().map_err(|_| bad_ass(&format!("bad ASS timestamp: {s}")))?;
    let seconds: f64 = parts[2].parse().map_err(|_| bad_ass(&format!("bad ASS timestamp: {s}")))?;
    Ok(hours * 3600.0 + minutes * 60.0 + seconds)
}

/// Format seconds as `H:MM:SS.cc`, rounding to the nearest centisecond —
/// matches the original tool's `format_time` exactly (round-half-up via
/// integer centisecond arithmetic, not truncation).
pub fn format_ass_time(seconds: f64) -> String {
    let cs = (seconds * 100.0).round() as i64;
    format!("{}:{:02}:{:02}.{:02}", cs / 360000, (cs / 6000) % 60, (cs / 100) % 60, cs % 100)
}

fn parse_event_line(line: &str, source_index: usize) -> Result<(ScriptEvent, AssEventFields), SushiError> {
    let (kind, rest) = line.split_once(':').ok_or_else(|| bad_ass("event line missing ':'"))?;
    let parts: Vec<&str> = rest.splitn(10, ',').map(|s| s.trim()).collect();
    if parts.len() != 10 {
        return Err(bad_ass("event line does not have 10 comma-separated fields"));
    }
    let start = parse_ass_time(parts[1])?;
    let end = parse_ass_time(parts[2])?;
    let kind = kind.trim().to_string();
    let is_comment = kind.eq_ignore_ascii_case("comment");
    let event = ScriptEvent::new(start, end, parts[3].to_string(), parts[9].to_string(), is_comment, source_index);
    let fields = AssEventFields {
        kind,
        layer: parts[0].to_string(),
        name: parts[4].to_string(),
        margin_left: parts[5].to_string(),
        margin_right: parts[6].to_string(),
        margin_vertical: parts[7].to_string(),
        effect: parts[8].to_string(),
    };
    Ok((event, fields))
}

pub fn parse_ass(text: &str) -> Result<(AssDocument, Vec<ScriptEvent>), SushiError> {
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);

    #[derive(Clone, Copy, PartialEq)]
    enum Current {
        None,
        ScriptInfo,
        Styles,
        Events,
        Other(usize),
    }

    let mut sections: Vec<Section> = Vec::new();
    let mut fields: Vec<AssEventFields> = Vec::new();
    let mut events: Vec<ScriptEvent> = Vec::new();
    let mut current = Current::None;

    for raw_line in text.lines() {
        let line = raw_line.trim();
        if line.is_empty() {
            continue;
        }
        let lower = line.to_ascii_lowercase();

        if lower == "[script info]" {
            sections.push(Section::ScriptInfo(Vec::new()));
            current = Current::ScriptInfo;
            continue;
        }
        if lower == "[v4+ styles]" || lower == "[v4 styles]" {
            sections.push(Section::Styles(Vec::new()));
            current = Current::Styles;
            continue;
        }
        if lower == "[events]" {
            sections.push(Section::Events);
            current = Current::Events;
            continue;
        }
        if line.starts_with('[') && line.ends_with(']') {
            sections.push(Section::Other {
                name: line.to_string(),
                lines: Vec::new(),
            });
            current = Current::Other(sections.len() - 1);
            continue;
        }
        if lower.starts_with("format:") {
            continue;
        }

        match current {
            Current::ScriptInfo => {
                if let Some(Section::ScriptInfo(lines)) = sections.last_mut() {
                    lines.push(line.to_string());
                }
            }
            Current::Styles => {
                if let Some(Section::Styles(lines)) = sections.last_mut() {
                    lines.push(line.to_string());
                }
            }
            Current::Events => {
                let (event, field) = parse_event_line(line, events.len())?;
                events.push(event);
                fields.push(field);
            }
            Current::Other(i) => {
                if let Section::Other { lines, .. } = &mut sections[i] {
                    lines.push(line.to_string());
                }
            }
            Current::None => return Err(bad_ass("content before any section header")),
        }
    }

    Ok((AssDocument { sections, fields }, events))
}

pub fn serialize_ass(doc: &AssDocument, events: &[ScriptEvent]) -> String {
    let mut ordered: Vec<&ScriptEvent> = events.iter().collect();
    ordered.sort_by_key(|e| e.source_index);

    let mut out: Vec<String> = Vec::new();
    for section in &doc.sections {
        match section {
            Section::ScriptInfo(lines) => {
                out.push("[Script Info]".to_string());
                out.extend(lines.iter().cloned());
                out.push(String::new());
            }
            Section::Styles(lines) => {
                out.push("[V4+ Styles]".to_string());
                out.push(
                    "Format: Name, Fontname, Fontsize, PrimaryColour, SecondaryColour, OutlineColour, BackColour, \
                     Bold, Italic, Underline, StrikeOut, ScaleX, ScaleY, Spacing, Angle, BorderStyle, Outline, \
                     Shadow, Alignment, MarginL, MarginR, MarginV, Encoding"
                        .to_string(),
                );
                out.extend(lines.iter().cloned());
                out.push(String::new());
            }
            Section::Events => {
                out.push("[Events]".to_string());
                out.push("Format: Layer, Start, End, Style, Name, MarginL, MarginR, MarginV, Effect, Text".to_string());
                for ev in &ordered {
                    let fields = &doc.fields[ev.source_index];
                    out.push(format!(
                        "{}: {},{},{},{},{},{},{},{},{},{}",
                        fields.kind,
                        fields.layer,
                        format_ass_time(ev.start),
                        format_ass_time(ev.end),
                        ev.style,
                        fields.name,
                        fields.margin_left,
                        fields.margin_right,
                        fields.margin_vertical,
                        fields.effect,
                        ev.text,
                    ));
                }
            }
            Section::Other { name, lines } => {
                out.push(name.clone());
                out.extend(lines.iter().cloned());
                out.push(String::new());
            }
        }
    }
    out.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "[Script Info]\n\
                           Title: Test\n\
                           \n\
                           [V4+ Styles]\n\
                           Format: Name, Fontname\n\
                           Style: Default,Arial\n\
                           \n\
                           [Events]\n\
                           Format: Layer, Start, End, Style, Name, MarginL, MarginR, MarginV, Effect, Text\n\
                           Dialogue: 0,0:00:01.00,0:00:02.50,Default,,0,0,0,,Hello, world\n\
                           Comment: 0,0:00:02.50,0:00:03.00,Default,,0,0,0,,note";

    #[test]
    fn parses_events_and_preserves_sections() {
        let (doc, events) = parse_ass(SAMPLE).unwrap();
        assert_eq!(events.len(), 2);
        assert!((events[0].start - 1.0).abs() < 1e-9);
        assert!((events[0].end - 2.5).abs() < 1e-9);
        assert_eq!(events[0].text, "Hello, world");
        assert!(!events[0].is_comment);
        assert!(events[1].is_comment);
        assert_eq!(doc.sections.len(), 3);
    }

    #[test]
    fn round_trips_through_serialize() {
        let (doc, events) = parse_ass(SAMPLE).unwrap();
        let out = serialize_ass(&doc, &events);
        let (_, reparsed) = parse_ass(&out).unwrap();
        assert_eq!(reparsed.len(), events.len());
        for (a, b) in events.iter().zip(reparsed.iter()) {
            assert!((a.start - b.start).abs() < 1e-9);
            assert!((a.end - b.end).abs() < 1e-9);
            assert_eq!(a.text, b.text);
        }
    }

    #[test]
    fn output_follows_source_index_regardless_of_sort() {
        let (doc, mut events) = parse_ass(SAMPLE).unwrap();
        events.reverse();
        let out = serialize_ass(&doc, &events);
        let events_section = out.split("[Events]").nth(1).unwrap();
        let first_event_line = events_section.lines().filter(|l| !l.trim().is_empty()).nth(1).unwrap();
        assert!(first_event_line.starts_with("Dialogue:"));
    }

    #[test]
    fn format_ass_time_rounds_to_centisecond() {
        assert_eq!(format_ass_time(17.017), "0:00:17.02");
        assert_eq!(format_ass_time(0.0), "0:00:00.00");
    }

    #[test]
    fn preserves_unknown_sections() {
        let text = "[Script Info]\nTitle: x\n\n[Aegisub Project Garbage]\nAudio File: foo.wav\n\n[Events]\n\
                     Format: Layer, Start, End, Style, Name, MarginL, MarginR, MarginV, Effect, Text\n\
                     Dialogue: 0,0:00:00.00,0:00:01.00,Default,,0,0,0,,hi";
        let (doc, events) = parse_ass(text).unwrap();
        let out = serialize_ass(&doc, &events);
        assert!(out.contains("[Aegisub Project Garbage]"));
        assert!(out.contains("Audio File: foo.wav"));
    }
}
