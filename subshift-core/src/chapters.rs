//! Chapter file parsing — matroska-style XML and OGM text, both reduced to
//! an ascending list of start times in seconds.

use regex::Regex;

fn parse_chapter_time(text: &str) -> Option<f64> {
    let parts: Vec<&str> = text.split(':').collect();
    if parts.len() != 3 {
        return None;
    }
    let hours: f64 = parts[0].parse().ok()?;
    let minutes: f64 = parts[1].parse().ok()?;
    let seconds: f64 = parts[2].parse().ok()?;
    Some(hours * 3600.0 + minutes * 60.0 + seconds)
}

fn get_xml_start_times(text: &str) -> Vec<f64> {
    let re = Regex::new(r"<ChapterTimeStart>(\d+:\d+:\d+\.\d+)</ChapterTimeStart>").unwrap();
    re.captures_iter(text)
        .filter_map(|c| parse_chapter_time(&c[1]))
        .collect()
}

fn get_ogm_start_times(text: &str) -> Vec<f64> {
    let re = Regex::new(r"(?i)CHAPTER\d+=(\d+:\d+:\d+\.\d+)").unwrap();
    re.captures_iter(text)
        .filter_map(|c| parse_chapter_time(&c[1]))
        .collect()
}

/// Sort the parsed times and prepend `0` if the earliest one isn't already
/// zero — a program always starts at zero even if no chapter marks it.
fn finalize_times(mut times: Vec<f64>) -> Vec<f64> {
    times.sort_by(|a, b| a.partial_cmp(b).unwrap());
    if times.first().map(|&t| t.abs() > 1e-9).unwrap_or(true) {
        times.insert(0, 0.0);
    }
    times
}

pub fn parse_chapters(text: &str) -> Vec<f64> {
    let times = if text.contains("<ChapterTimeStart>") {
        get_xml_start_times(text)
    } else {
        get_ogm_start_times(text)
    };
    finalize_times(times)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn xml_chapter_times_parse() {
        let text = "<ChapterAtom><ChapterTimeStart>0:00:17.017000000</ChapterTimeStart></ChapterAtom>\
                    <ChapterAtom><ChapterTimeStart>0:01:47.023000000</ChapterTimeStart></ChapterAtom>";
        let times = parse_chapters(text);
        assert_eq!(times[0], 0.0);
        assert!((times[1] - 17.017).abs() < 1e-9);
        assert!((times[2] - 107.023).abs() < 1e-9);
    }

    #[test]
    fn ogm_chapter_times_parse() {
        let text = "CHAPTER01=00:00:00.000\nCHAPTER01NAME=Intro\nCHAPTER02=00:05:00.500\nCHAPTER02NAME=Part 2";
        let times = parse_chapters(text);
        assert_eq!(times.len(), 2);
        assert_eq!(times[0], 0.0);
        assert!((times[1] - 300.5).abs() < 1e-9);
    }

    #[test]
    fn prepends_zero_when_missing() {
        let text = "CHAPTER01=00:00:05.000";
        let times = parse_chapters(text);
        assert_eq!(times[0], 0.0);
        assert_eq!(times.len(), 2);
    }
}
