//! Top-level pipeline: wires `AudioStream`, `Timecodes`, `EventList`,
//! grouping, the shift engine, and keyframe snapping into the single
//! ordered sequence described by the engine's design notes.

use std::path::Path;

use crate::audio::{AudioStream, SampleType};
use crate::diagnostics::DiagSink;
use crate::events::EventList;
use crate::grouping::{detect_groups, groups_from_chapters, split_broken_groups, Group};
use crate::keyframe_snap::{snap_groups_to_keyframes, KfMode};
use crate::shift_engine::{calculate_shifts, prepare_search_groups};
use crate::smoothing::{fix_near_borders, smooth_events};
use crate::timecodes::Timecodes;

/// Engine-wide tunables. Mirrors the spec's GLOSSARY constants and the
/// defaults `sushi.py`'s argument parser ships.
#[derive(Debug, Clone)]
pub struct SyncParams {
    pub max_ts_duration: f64,
    pub max_ts_distance: f64,
    pub normal_window: f64,
    pub max_window: f64,
    pub rewind_thresh: usize,
    pub min_group_size: usize,
    pub smooth_radius: usize,
    pub grouping_enabled: bool,
    pub fast_skip: bool,
    pub max_kf_distance: f64,
    pub kf_mode: KfMode,
}

impl Default for SyncParams {
    fn default() -> Self {
        SyncParams {
            max_ts_duration: 0.4,
            max_ts_distance: 0.5,
            normal_window: 5.0,
            max_window: 30.0,
            rewind_thresh: 3,
            min_group_size: 1,
            smooth_radius: 0,
            grouping_enabled: true,
            fast_skip: true,
            max_kf_distance: 2.0,
            kf_mode: KfMode::All,
        }
    }
}

/// Audio side: either a pre-extracted WAV path, or samples supplied in
/// memory (used by tests).
pub struct AudioInput {
    pub stream: AudioStream,
}

impl AudioInput {
    pub fn load(path: &Path, sample_rate: u32, sample_type: SampleType, diag: &Option<DiagSink>) -> Result<Self, crate::error::SushiError> {
        Ok(AudioInput {
            stream: AudioStream::load(path, sample_rate, sample_type, diag)?,
        })
    }
}

/// Keyframe side: timecodes plus the derived keytimes for one stream.
/// `None` when keyframes were not supplied for that side.
pub struct KeyframeInput {
    pub timecodes: Timecodes,
    pub keytimes: Vec<f64>,
}

/// Run the full retiming pipeline on an already-parsed event list.
///
/// Steps follow the engine's ordered pipeline: build search groups and
/// assign audio-derived shifts, group (chapter-seeded or automatic) and
/// repair borders/smooth within each group, average each group's shift,
/// optionally snap to keyframes, then apply every event's final shift.
#[allow(clippy::too_many_arguments)]
pub fn run_pipeline(
    list: &mut EventList,
    src: &AudioStream,
    dst: &AudioStream,
    chapters: &[f64],
    keyframes: Option<(&KeyframeInput, &KeyframeInput)>,
    params: &SyncParams,
    diag: &Option<DiagSink>,
) {
    list.sort_by_start();

    let groups = prepare_search_groups(
        list,
        src.duration(),
        chapters,
        params.max_ts_duration,
        params.max_ts_distance,
        params.fast_skip,
    );
    calculate_shifts(list, src, dst, &groups, params.normal_window, params.max_window, params.rewind_thresh, diag);

    let independent: Vec<usize> = (0..list.events.len()).filter(|&i| !list.events[i].linked()).collect();

    let final_groups: Vec<Group> = if params.grouping_enabled && !chapters.is_empty() {
        let chapter_groups = groups_from_chapters(list, &independent, chapters);
        let mut fixed = Vec::with_capacity(chapter_groups.len());
        for group in chapter_groups {
            let members: Vec<usize> = group.members.iter().copied().filter(|&i| !list.events[i].linked()).collect();
            fix_near_borders(list, &members, diag);
            smooth_events(list, &members, params.smooth_radius);
            fixed.push(Group { members: group.members, broken: group.broken });
        }
        split_broken_groups(list, fixed, params.min_group_size, diag)
    } else {
        fix_near_borders(list, &independent, diag);
        smooth_events(list, &independent, params.smooth_radius);
        detect_groups(list, &independent, params.min_group_size)
    };

    for group in &final_groups {
        average_shifts(list, &group.members);
    }

    if let Some((src_kf, dst_kf)) = keyframes {
        list.resolve_all_links();
        snap_groups_to_keyframes(
            list,
            &final_groups,
            chapters,
            &src_kf.keytimes,
            &dst_kf.keytimes,
            &src_kf.timecodes,
            &dst_kf.timecodes,
            params.max_kf_distance,
            params.kf_mode,
            params.max_ts_duration,
            params.max_ts_distance,
            diag,
        );
    }

    for idx in 0..list.events.len() {
        list.apply_shift(idx);
    }
}

/// Weighted mean of a group's member shifts, weights `1 - diff`, written
/// back to every member. Linked members are skipped — they will pick up
/// the averaged value through their chain once it's set on the chain end.
fn average_shifts(list: &mut EventList, members: &[usize]) {
    let independent: Vec<usize> = members.iter().copied().filter(|&i| !list.events[i].linked()).collect();
    if independent.is_empty() {
        return;
    }

    let mut weighted_sum = 0.0;
    let mut weight_total = 0.0;
    for &idx in &independent {
        let weight = (1.0 - list.diff(idx)).max(0.0);
        weighted_sum += weight * list.shift(idx);
        weight_total += weight;
    }

    let avg_shift = if weight_total > 1e-12 {
        weighted_sum / weight_total
    } else {
        independent.iter().map(|&i| list.shift(i)).sum::<f64>() / independent.len() as f64
    };

    for &idx in &independent {
        let diff = list.diff(idx);
        list.set_shift(idx, avg_shift, diff);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::ScriptEvent;

    fn sine(freq: f64, sr: u32, duration: f64) -> Vec<f32> {
        let n = (sr as f64 * duration) as usize;
        (0..n)
            .map(|i| ((i as f64 / sr as f64) * freq * std::f64::consts::TAU).sin() as f32)
            .collect()
    }

    fn ev(start: f64, end: f64, idx: usize) -> ScriptEvent {
        ScriptEvent::new(start, end, "Default".into(), "x".into(), false, idx)
    }

    #[test]
    fn uniform_offset_shifts_every_event() {
        let sr = 1000u32;
        let base = sine(3.0, sr, 120.0);
        let mut shifted = vec![0.0f32; base.len() + 3000];
        shifted[3000..].copy_from_slice(&base);
        let src = AudioStream::from_samples(sr, base);
        let dst = AudioStream::from_samples(sr, shifted);

        let evs: Vec<ScriptEvent> = (0..20).map(|i| ev(i as f64 * 5.0, i as f64 * 5.0 + 3.0, i)).collect();
        let mut list = EventList::new(evs);
        let params = SyncParams::default();

        run_pipeline(&mut list, &src, &dst, &[], None, &params, &None);

        for ev in &list.events {
            let shifted_start = ev.start - (ev.source_index as f64 * 5.0);
            assert!((shifted_start - 3.0).abs() < 0.05, "event {} shifted by {}", ev.source_index, shifted_start);
        }
    }

    #[test]
    fn average_shifts_collapses_group_to_weighted_mean() {
        let evs: Vec<ScriptEvent> = (0..3).map(|i| ev(i as f64, i as f64 + 1.0, i)).collect();
        let mut list = EventList::new(evs);
        list.set_shift(0, 1.0, 0.0);
        list.set_shift(1, 2.0, 0.0);
        list.set_shift(2, 3.0, 1.0);
        average_shifts(&mut list, &[0, 1, 2]);
        assert!((list.shift(0) - 1.5).abs() < 1e-9);
        assert_eq!(list.shift(0), list.shift(1));
        assert_eq!(list.shift(1), list.shift(2));
    }
}
