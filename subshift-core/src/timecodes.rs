//! Frame-number ↔ time mapping for constant and variable frame rate video.
//!
//! A `Timecodes` value is built once (from an fps, or from a timecode file)
//! and is read-only thereafter. V1 tables (a default fps plus per-range fps
//! overrides) are converted to V2 (explicit per-frame start times) at
//! construction time so that frame lookups are always a single code path.

use crate::error::SushiError;

/// One V1 fps override: frames `[start_frame, end_frame]` run at `fps`.
#[derive(Debug, Clone, Copy)]
pub struct FpsOverride {
    pub start_frame: u64,
    pub end_frame: u64,
    pub fps: f64,
}

#[derive(Debug, Clone)]
pub enum Timecodes {
    Cfr(f64),
    V2 {
        times: Vec<f64>,
        default_duration: f64,
    },
}

impl Timecodes {
    pub fn cfr(fps: f64) -> Self {
        Timecodes::Cfr(fps)
    }

    pub fn from_v2(times: Vec<f64>, default_duration: f64) -> Self {
        Timecodes::V2 {
            times,
            default_duration,
        }
    }

    /// Build a V2 table from a default fps and a set of per-range overrides.
    pub fn from_v1(default_fps: f64, overrides: &[FpsOverride]) -> Self {
        let default_duration = 1.0 / default_fps;
        let max_frame = overrides.iter().map(|o| o.end_frame).max();
        let frame_count = max_frame.map(|m| m + 1).unwrap_or(1) as usize;

        let mut fps_table = vec![default_fps; frame_count];
        for ov in overrides {
            let end = (ov.end_frame as usize).min(frame_count - 1);
            for slot in fps_table.iter_mut().take(end + 1).skip(ov.start_frame as usize) {
                *slot = ov.fps;
            }
        }

        let mut times = Vec::with_capacity(frame_count);
        let mut acc = 0.0;
        for &fps in &fps_table {
            times.push(acc);
            acc += 1.0 / fps;
        }

        Timecodes::V2 {
            times,
            default_duration,
        }
    }

    /// Parse a `# timecode format v1` or `# timecode format v2` file.
    pub fn parse(text: &str) -> Result<Self, SushiError> {
        let mut lines = text.lines();
        let header = lines
            .next()
            .ok_or_else(|| bad_timecodes("empty timecode file"))?
            .trim()
            .to_lowercase();

        if header == "# timecode format v2" {
            let mut times_ms = Vec::new();
            for line in lines {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                let ms: f64 = line
                    .parse()
                    .map_err(|_| bad_timecodes(&format!("bad v2 timecode line: {line}")))?;
                times_ms.push(ms / 1000.0);
            }
            let default_duration = if times_ms.len() >= 2 {
                times_ms[times_ms.len() - 1] - times_ms[times_ms.len() - 2]
            } else {
                0.0
            };
            return Ok(Timecodes::V2 {
                times: times_ms,
                default_duration,
            });
        }

        if header == "# timecode format v1" {
            let mut default_fps = None;
            let mut overrides = Vec::new();
            for line in lines {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                if let Some(rest) = line.strip_prefix("Assume ").or_else(|| line.strip_prefix("assume ")) {
                    default_fps = Some(
                        rest.trim()
                            .parse::<f64>()
                            .map_err(|_| bad_timecodes(&format!("bad Assume line: {line}")))?,
                    );
                    continue;
                }
                let parts: Vec<&str> = line.split(',').collect();
                if parts.len() != 3 {
                    return Err(bad_timecodes(&format!("bad v1 override line: {line}")));
                }
                let start_frame: u64 = parts[0]
                    .trim()
                    .parse()
                    .map_err(|_| bad_timecodes(&format!("bad v1 override line: {line}")))?;
                let end_frame: u64 = parts[1]
                    .trim()
                    .parse()
                    .map_err(|_| bad_timecodes(&format!("bad v1 override line: {line}")))?;
                let fps: f64 = parts[2]
                    .trim()
                    .parse()
                    .map_err(|_| bad_timecodes(&format!("bad v1 override line: {line}")))?;
                overrides.push(FpsOverride {
                    start_frame,
                    end_frame,
                    fps,
                });
            }
            let default_fps = default_fps.ok_or_else(|| bad_timecodes("v1 file missing Assume line"))?;
            return Ok(Timecodes::from_v1(default_fps, &overrides));
        }

        Err(bad_timecodes("unrecognized timecode format header"))
    }

    pub fn get_frame_time(&self, n: u64) -> f64 {
        match self {
            Timecodes::Cfr(fps) => n as f64 / fps,
            Timecodes::V2 {
                times,
                default_duration,
            } => {
                if (n as usize) < times.len() {
                    times[n as usize]
                } else {
                    let last_idx = times.len() - 1;
                    times[last_idx] + (n as i64 - last_idx as i64) as f64 * default_duration
                }
            }
        }
    }

    pub fn get_frame_size(&self, t: f64) -> f64 {
        match self {
            Timecodes::Cfr(fps) => 1.0 / fps,
            Timecodes::V2 {
                times,
                default_duration,
            } => {
                if times.is_empty() {
                    return *default_duration;
                }
                let last = *times.last().unwrap();
                if times.len() == 1 || t > last + 1e-9 {
                    return *default_duration;
                }
                let idx = times.partition_point(|&x| x < t - 1e-9).min(times.len() - 1);
                if idx == times.len() - 1 {
                    times[idx] - times[idx - 1]
                } else {
                    times[idx + 1] - times[idx]
                }
            }
        }
    }

    pub fn get_frame_number(&self, t: f64) -> u64 {
        match self {
            Timecodes::Cfr(fps) => ((t * fps + 1e-9).floor().max(0.0)) as u64,
            Timecodes::V2 {
                times,
                default_duration,
            } => {
                if times.is_empty() {
                    return 0;
                }
                let last = *times.last().unwrap();
                if t > last + 1e-9 {
                    let extra = ((t - last) / default_duration + 1e-9).floor().max(0.0);
                    return (times.len() - 1) as u64 + extra as u64;
                }
                let boundary = times.partition_point(|&x| x <= t + 1e-9);
                boundary.saturating_sub(1) as u64
            }
        }
    }
}

fn bad_timecodes(detail: &str) -> SushiError {
    SushiError::BadFormat {
        path: "<timecodes>".to_string(),
        detail: detail.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cfr_frame_time_and_size() {
        let tc = Timecodes::cfr(23.976);
        assert_eq!(tc.get_frame_time(0), 0.0);
        assert!((tc.get_frame_time(10) - 10.0 / 23.976).abs() < 1e-9);
        assert!((tc.get_frame_time(100_000) - 100_000.0 / 23.976).abs() < 1e-6);
        assert!((tc.get_frame_size(0.0) - 1.0 / 23.976).abs() < 1e-9);
        assert!((tc.get_frame_size(1000.0) - 1.0 / 23.976).abs() < 1e-9);
    }

    #[test]
    fn cfr_frame_number() {
        let tc = Timecodes::cfr(24000.0 / 1001.0);
        assert_eq!(tc.get_frame_number(0.0), 0);
        assert_eq!(tc.get_frame_number(1145.353), 27461);
        assert_eq!(tc.get_frame_number(1001.0 / 24000.0 * 1_234_567.0), 1_234_567);
    }

    #[test]
    fn v2_table_behaves_like_cfr() {
        let times: Vec<f64> = (0..30_000).map(|x| 1000.0 * x as f64 / 23.976 / 1000.0).collect();
        let tc = Timecodes::from_v2(times, 1.0 / 23.976);
        assert!((tc.get_frame_size(0.0) - 1.0 / 23.976).abs() < 1e-6);
        assert!((tc.get_frame_size(25.0) - 1.0 / 23.976).abs() < 1e-6);
        assert!((tc.get_frame_time(100) - 1.0 / 23.976 * 100.0).abs() < 1e-6);
        assert_eq!(tc.get_frame_time(0), 0.0);
        assert_eq!(tc.get_frame_number(0.0), 0);
        assert_eq!(tc.get_frame_number(1145.353), 27461);
    }

    #[test]
    fn v1_without_overrides_matches_cfr() {
        let tc = Timecodes::from_v1(23.976024, &[]);
        assert!((tc.get_frame_size(0.0) - 1.0 / 23.976024).abs() < 1e-6);
        assert!((tc.get_frame_size(25.0) - 1.0 / 23.976024).abs() < 1e-6);
        assert!((tc.get_frame_time(100) - 1.0 / 23.976024 * 100.0).abs() < 1e-6);
        assert_eq!(tc.get_frame_time(0), 0.0);
        assert_eq!(tc.get_frame_number(0.0), 0);
    }

    #[test]
    fn v1_with_overrides_frame_size() {
        let overrides = [
            FpsOverride { start_frame: 0, end_frame: 2000, fps: 29.97 },
            FpsOverride { start_frame: 3000, end_frame: 4000, fps: 59.94 },
        ];
        let tc = Timecodes::from_v1(23.976, &overrides);
        assert!((tc.get_frame_size(0.0) - 1.0 / 29.97).abs() < 1e-4);
        assert!((tc.get_frame_size(49.983) - 1.0 / 29.97).abs() < 1e-3);
        assert!((tc.get_frame_size(87.496) - 1.0 / 23.976).abs() < 1e-3);
        assert!((tc.get_frame_size(5000.0) - 1.0 / 23.976).abs() < 1e-9);
    }

    #[test]
    fn v1_with_overrides_frame_time() {
        let overrides = [
            FpsOverride { start_frame: 0, end_frame: 2000, fps: 29.97 },
            FpsOverride { start_frame: 3000, end_frame: 4000, fps: 59.94 },
        ];
        let tc = Timecodes::from_v1(23.976, &overrides);
        assert_eq!(tc.get_frame_time(0), 0.0);
        assert!((tc.get_frame_time(1500) - 50.05).abs() < 1e-2);
        assert!((tc.get_frame_time(2500) - 87.579).abs() < 1e-2);
    }

    #[test]
    fn parse_v2_text() {
        let text = format!(
            "# timecode format v2\n{}",
            (0..100).map(|x| (1000.0 * x as f64 / 23.976).to_string()).collect::<Vec<_>>().join("\n")
        );
        let tc = Timecodes::parse(&text).unwrap();
        assert_eq!(tc.get_frame_time(0), 0.0);
    }

    #[test]
    fn parse_v1_text() {
        let text = "# timecode format v1\nAssume 23.976000\n0,2000,23.976000\n3000,5000,23.976000";
        let tc = Timecodes::parse(text).unwrap();
        assert!((tc.get_frame_size(0.0) - 1.0 / 23.976).abs() < 1e-6);
    }
}
