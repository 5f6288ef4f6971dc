//! Keyframe file parsing (SCXviD stats text) and Keytimes construction.

use crate::timecodes::Timecodes;

/// Parse an SCXviD stats file: lines whose first character is `i` mark a
/// keyframe at `line_index - 3` (a 3-line header precedes the frame data).
/// Frame `0` is always present in the result even if the file omits it.
pub fn parse_scxvid_keyframes(text: &str) -> Vec<u64> {
    let mut frames: Vec<u64> = text
        .lines()
        .enumerate()
        .filter(|(_, line)| line.starts_with('i'))
        .filter_map(|(idx, _)| idx.checked_sub(3).map(|f| f as u64))
        .collect();
    if frames.first() != Some(&0) {
        frames.insert(0, 0);
    }
    frames
}

/// Map keyframe numbers through `Timecodes` to produce an ascending list
/// of wall-clock keyframe times.
pub fn build_keytimes(frames: &[u64], tc: &Timecodes) -> Vec<f64> {
    frames.iter().map(|&f| tc.get_frame_time(f)).collect()
}

/// Signed distance from `t` to the nearest keyframe, clamped at both ends
/// of the array. Positive means the keyframe is ahead of `t`.
pub fn get_distance_to_closest_kf(t: f64, keytimes: &[f64]) -> f64 {
    if keytimes.is_empty() {
        return 0.0;
    }
    let idx = keytimes.partition_point(|&x| x < t);
    if idx == 0 {
        return keytimes[0] - t;
    }
    if idx >= keytimes.len() {
        return keytimes[keytimes.len() - 1] - t;
    }
    let before = keytimes[idx - 1] - t;
    let after = keytimes[idx] - t;
    if before.abs() <= after.abs() {
        before
    } else {
        after
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_scxvid_header_and_offsets() {
        let text = "# XviD 2pass stat file\nheader2\nheader3\ni|0\np|1\ni|2";
        let frames = parse_scxvid_keyframes(text);
        assert_eq!(frames, vec![0, 2]);
    }

    #[test]
    fn inserts_zero_if_missing() {
        let text = "h1\nh2\nh3\np|0\np|1\ni|2";
        let frames = parse_scxvid_keyframes(text);
        assert_eq!(frames[0], 0);
    }

    #[test]
    fn distance_to_closest_keyframe() {
        let keytimes: Vec<f64> = (0..=100).step_by(10).map(|x| x as f64).collect();
        assert_eq!(get_distance_to_closest_kf(36.0, &keytimes), 4.0);
        assert_eq!(get_distance_to_closest_kf(63.0, &keytimes), -3.0);
        assert_eq!(get_distance_to_closest_kf(105.0, &keytimes), -5.0);
        assert_eq!(get_distance_to_closest_kf(0.0, &keytimes), 0.0);
    }
}
