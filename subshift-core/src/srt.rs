//! SRT script parsing and serialization.
//!
//! Blocks are separated by a blank line: an index line, a `-->` time line,
//! then free-form text running to the next blank line. Output renumbers
//! blocks 1..n in `source_index` order — SRT carries no other place to keep
//! authoring order.

use crate::error::SushiError;
use crate::events::ScriptEvent;

fn bad_srt(detail: &str) -> SushiError {
    SushiError::BadFormat {
        path: "<srt>".to_string(),
        detail: detail.to_string(),
    }
}

fn parse_srt_time(s: &str) -> Result<f64, SushiError> {
    let s = s.trim().replace(',', ".");
    let parts: Vec<&str> = s.split(':').collect();
    if parts.len() != 3 {
        return Err(bad_srt(&format!("bad SRT timestamp: {s}")));
    }
    let hours: f64 = parts[0].parse().map_err(|_| bad_srt(&format!("bad SRT timestamp: {s}")))?;
    let minutes: f64 = parts[1].parse().map_err(|_| bad_srt(&format!("bad SRT timestamp: {s}")))?;
    let seconds: f64 = parts[2].parse().map_err(|_| bad_srt(&format!("bad SRT timestamp: {s}")))?;
    Ok(hours * 3600.0 + minutes * 60.0 + seconds)
}

/// Format seconds as `HH:MM:SS,mmm`, rounding to the nearest millisecond.
pub fn format_srt_time(seconds: f64) -> String {
    let ms = (seconds * 1000.0).round() as i64;
    format!("{:02}:{:02}:{:02},{:03}", ms / 3_600_000, (ms / 60_000) % 60, (ms / 1000) % 60, ms % 1000)
}

pub fn parse_srt(text: &str) -> Result<Vec<ScriptEvent>, SushiError> {
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    let normalized = text.replace("\r\n", "\n");
    let mut events = Vec::new();

    for block in normalized.split("\n\n") {
        let block = block.trim();
        if block.is_empty() {
            continue;
        }
        let mut lines = block.splitn(3, '\n');
        lines.next().ok_or_else(|| bad_srt("missing index line"))?;
        let time_line = lines.next().ok_or_else(|| bad_srt("missing time line"))?;
        let text_part = lines.next().unwrap_or("").trim_end().to_string();

        let mut parts = time_line.split("-->");
        let start_s = parts.next().ok_or_else(|| bad_srt("missing start time"))?;
        let end_s = parts.next().ok_or_else(|| bad_srt("missing end time"))?;
        let start = parse_srt_time(start_s)?;
        let end = parse_srt_time(end_s)?;

        let source_index = events.len();
        events.push(ScriptEvent::new(start, end, "Default".to_string(), text_part, false, source_index));
    }

    Ok(events)
}

pub fn serialize_srt(events: &[ScriptEvent]) -> String {
    let mut ordered: Vec<&ScriptEvent> = events.iter().collect();
    ordered.sort_by_key(|e| e.source_index);

    ordered
        .iter()
        .enumerate()
        .map(|(i, e)| format!("{}\n{} --> {}\n{}", i + 1, format_srt_time(e.start), format_srt_time(e.end), e.text))
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "1\n00:00:01,000 --> 00:00:02,500\nHello\nworld\n\n2\n00:00:02,500 --> 00:00:03,000\nBye";

    #[test]
    fn parses_blocks_and_multiline_text() {
        let events = parse_srt(SAMPLE).unwrap();
        assert_eq!(events.len(), 2);
        assert!((events[0].start - 1.0).abs() < 1e-9);
        assert!((events[0].end - 2.5).abs() < 1e-9);
        assert_eq!(events[0].text, "Hello\nworld");
        assert_eq!(events[1].text, "Bye");
    }

    #[test]
    fn round_trips_through_serialize() {
        let events = parse_srt(SAMPLE).unwrap();
        let out = serialize_srt(&events);
        let reparsed = parse_srt(&out).unwrap();
        assert_eq!(reparsed.len(), events.len());
        for (a, b) in events.iter().zip(reparsed.iter()) {
            assert!((a.start - b.start).abs() < 1e-9);
            assert!((a.end - b.end).abs() < 1e-9);
            assert_eq!(a.text, b.text);
        }
    }

    #[test]
    fn format_srt_time_rounds_to_millisecond() {
        assert_eq!(format_srt_time(3661.1234), "01:01:01,123");
        assert_eq!(format_srt_time(0.0), "00:00:00,000");
    }

    #[test]
    fn output_renumbers_in_source_index_order() {
        let mut events = parse_srt(SAMPLE).unwrap();
        events.reverse();
        let out = serialize_srt(&events);
        let first_line = out.lines().next().unwrap();
        assert_eq!(first_line, "1");
        assert!(out.contains("Hello\nworld"));
    }

    #[test]
    fn rejects_malformed_time_line() {
        let bad = "1\nnot a time\ntext";
        assert!(parse_srt(bad).is_err());
    }
}
