//! Keyframe-based correction of the audio-derived shifts: whole-group
//! alignment toward the nearest keyframe, plus per-boundary snapping for
//! single-event groups.

use crate::diagnostics::{emit, DiagRecord, DiagSink};
use crate::events::EventList;
use crate::grouping::Group;
use crate::keyframes::get_distance_to_closest_kf;
use crate::shift_engine::merge_short_lines_into_groups;
use crate::smoothing::interpolate_nones;
use crate::timecodes::Timecodes;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KfMode {
    Shift,
    Snap,
    All,
}

/// Tentative additional shift for one boundary: `None` when either distance
/// (or their difference) exceeds `max_kf_distance * frame_size`.
pub fn find_keyframe_shift(
    t: f64,
    shift: f64,
    src_keytimes: &[f64],
    dst_keytimes: &[f64],
    src_frame_size: f64,
    dst_frame_size: f64,
    max_kf_distance: f64,
) -> Option<f64> {
    let src_dist = get_distance_to_closest_kf(t, src_keytimes);
    if src_dist.abs() > max_kf_distance * src_frame_size {
        return None;
    }
    let dst_dist = get_distance_to_closest_kf(t + shift, dst_keytimes);
    if dst_dist.abs() > max_kf_distance * dst_frame_size {
        return None;
    }
    let adjust = dst_dist - src_dist;
    if adjust.abs() > max_kf_distance * src_frame_size.max(dst_frame_size) {
        return None;
    }
    Some(adjust)
}

/// Per-boundary snap distance: the dst-minus-src keyframe distance, or 0
/// when either distance or their difference falls outside the tolerance.
pub fn find_keyframes_distance(
    t: f64,
    shift: f64,
    src_keytimes: &[f64],
    dst_keytimes: &[f64],
    frame_size: f64,
    max_kf_distance: f64,
) -> f64 {
    let limit = max_kf_distance * frame_size;
    let src_dist = get_distance_to_closest_kf(t, src_keytimes);
    let dst_dist = get_distance_to_closest_kf(t + shift, dst_keytimes);
    let adjust = dst_dist - src_dist;
    if src_dist.abs() <= limit && dst_dist.abs() <= limit && adjust.abs() <= limit {
        adjust
    } else {
        0.0
    }
}

#[allow(clippy::too_many_arguments)]
fn apply_whole_group_shift(
    list: &mut EventList,
    kf_groups: &[crate::shift_engine::SearchGroup],
    src_keytimes: &[f64],
    dst_keytimes: &[f64],
    src_tc: &Timecodes,
    dst_tc: &Timecodes,
    max_kf_distance: f64,
    diag: &Option<DiagSink>,
) {
    let mut start_candidates = Vec::with_capacity(kf_groups.len());
    let mut end_candidates = Vec::with_capacity(kf_groups.len());
    let mut xs = Vec::with_capacity(kf_groups.len());

    for g in kf_groups {
        let first = g.members[0];
        let last = *g.members.last().unwrap();
        let shift = list.shift(first);
        let start_t = list.events[first].start;
        let end_t = list.events[last].end;
        let sfs = src_tc.get_frame_size(start_t);
        let dfs = dst_tc.get_frame_size(start_t + shift);
        let efs_src = src_tc.get_frame_size(end_t);
        let efs_dst = dst_tc.get_frame_size(end_t + shift);

        start_candidates.push(find_keyframe_shift(start_t, shift, src_keytimes, dst_keytimes, sfs, dfs, max_kf_distance));
        end_candidates.push(find_keyframe_shift(
            end_t,
            shift,
            src_keytimes,
            dst_keytimes,
            efs_src,
            efs_dst,
            max_kf_distance,
        ));
        xs.push(start_t);
    }

    if start_candidates.iter().all(Option::is_none) && end_candidates.iter().all(Option::is_none) {
        return;
    }

    let starts = interpolate_nones(&start_candidates, &xs);
    let ends = interpolate_nones(&end_candidates, &xs);
    if starts.is_empty() || ends.is_empty() {
        return;
    }

    for (i, g) in kf_groups.iter().enumerate() {
        let first = g.members[0];
        let last = *g.members.last().unwrap();
        let start_adjust = starts[i];
        let end_adjust = ends[i];

        if g.members.len() < 2 {
            let avg = (start_adjust + end_adjust) / 2.0;
            list.adjust_additional_shifts(first, avg, avg);
            continue;
        }

        if (start_adjust - end_adjust).abs() > 0.001 {
            let mean = (start_adjust + end_adjust) / 2.0;
            let chosen = if (start_adjust - mean).abs() <= (end_adjust - mean).abs() {
                start_adjust
            } else {
                end_adjust
            };
            emit(
                diag,
                DiagRecord::Info {
                    message: format!(
                        "inconsistent keyframe adjust at group [{:.3}, {:.3}]: start={:.4} end={:.4}, using {:.4}",
                        list.events[first].start, list.events[last].end, start_adjust, end_adjust, chosen
                    ),
                },
            );
            list.adjust_additional_shifts(first, chosen, 0.0);
            list.adjust_additional_shifts(last, 0.0, chosen);
        } else {
            list.adjust_additional_shifts(first, start_adjust, 0.0);
            list.adjust_additional_shifts(last, 0.0, end_adjust);
        }
    }
}

fn apply_boundary_snap(
    list: &mut EventList,
    kf_groups: &[crate::shift_engine::SearchGroup],
    src_keytimes: &[f64],
    dst_keytimes: &[f64],
    dst_tc: &Timecodes,
    max_kf_distance: f64,
) {
    for g in kf_groups {
        if g.members.len() > 1 {
            continue;
        }
        let member = g.members[0];
        let shift = list.shift(member);
        let start_t = list.events[member].start;
        let end_t = list.events[member].end;
        let start_fs = dst_tc.get_frame_size(start_t + shift);
        let end_fs = dst_tc.get_frame_size(end_t + shift);

        let start_dist = find_keyframes_distance(start_t, shift, src_keytimes, dst_keytimes, start_fs, max_kf_distance);
        let end_dist = find_keyframes_distance(end_t, shift, src_keytimes, dst_keytimes, end_fs, max_kf_distance);

        if start_dist.abs() > 0.01 || end_dist.abs() > 0.01 {
            list.adjust_additional_shifts(member, start_dist, end_dist);
        }
    }
}

/// Entry point: re-clump the working set into typesetting-aware groups,
/// then apply whole-group shift correction and/or per-boundary snapping
/// depending on `mode`.
#[allow(clippy::too_many_arguments)]
pub fn snap_groups_to_keyframes(
    list: &mut EventList,
    groups: &[Group],
    chapters: &[f64],
    src_keytimes: &[f64],
    dst_keytimes: &[f64],
    src_tc: &Timecodes,
    dst_tc: &Timecodes,
    max_kf_distance: f64,
    mode: KfMode,
    max_ts_duration: f64,
    max_ts_distance: f64,
    diag: &Option<DiagSink>,
) {
    let mut all_members: Vec<usize> = groups.iter().flat_map(|g| g.members.iter().copied()).collect();
    all_members.sort_by(|&a, &b| list.events[a].start.partial_cmp(&list.events[b].start).unwrap());

    let kf_groups = merge_short_lines_into_groups(list, &all_members, chapters, max_ts_duration, max_ts_distance);
    if kf_groups.is_empty() {
        return;
    }

    if matches!(mode, KfMode::Shift | KfMode::All) {
        apply_whole_group_shift(list, &kf_groups, src_keytimes, dst_keytimes, src_tc, dst_tc, max_kf_distance, diag);
    }
    if matches!(mode, KfMode::Snap | KfMode::All) {
        apply_boundary_snap(list, &kf_groups, src_keytimes, dst_keytimes, dst_tc, max_kf_distance);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::ScriptEvent;

    #[test]
    fn find_keyframe_shift_none_when_src_too_far() {
        let src_kts = vec![0.0, 10.0, 20.0];
        let dst_kts = vec![0.0, 10.0, 20.0];
        let result = find_keyframe_shift(5.0, 0.0, &src_kts, &dst_kts, 1.0 / 24.0, 1.0 / 24.0, 2.0);
        assert!(result.is_none());
    }

    #[test]
    fn find_keyframe_shift_reports_adjust_within_tolerance() {
        let src_kts = vec![0.0, 10.0, 20.0];
        let dst_kts = vec![0.0, 10.05, 20.0];
        let result = find_keyframe_shift(10.0, 0.0, &src_kts, &dst_kts, 1.0 / 24.0, 1.0 / 24.0, 5.0);
        assert!(result.is_some());
        assert!((result.unwrap() - 0.05).abs() < 1e-9);
    }

    #[test]
    fn find_keyframes_distance_zero_outside_tolerance() {
        let src_kts = vec![0.0, 10.0];
        let dst_kts = vec![0.0, 15.0];
        let dist = find_keyframes_distance(10.0, 0.0, &src_kts, &dst_kts, 1.0 / 24.0, 2.0);
        assert_eq!(dist, 0.0);
    }

    #[test]
    fn snap_groups_to_keyframes_snaps_single_event_group() {
        let evs = vec![ScriptEvent::new(10.02, 10.02, "Default".into(), "x".into(), false, 0)];
        let mut list = EventList::new(evs);
        list.set_shift(0, 0.0, 0.1);
        let groups = vec![Group {
            members: vec![0],
            broken: false,
        }];
        let src_kts = vec![10.0];
        let dst_kts = vec![10.0];
        snap_groups_to_keyframes(
            &mut list,
            &groups,
            &[],
            &src_kts,
            &dst_kts,
            &Timecodes::cfr(24.0),
            &Timecodes::cfr(24.0),
            2.0,
            KfMode::Snap,
            0.4,
            0.5,
            &None,
        );
    }
}
