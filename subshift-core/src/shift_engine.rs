//! Per-group audio search: building search groups out of the raw event
//! list, then the window-escalation/rewind state machine that assigns each
//! group a shift and match score.

use crate::audio::AudioStream;
use crate::diagnostics::{emit, DiagRecord, DiagSink};
use crate::events::{EventIndex, EventList};
use crate::grouping::ALLOWED_ERROR;

const SMALL_WINDOW: f64 = 1.5;

/// A contiguous run of independent events searched together as one pattern.
#[derive(Debug, Clone)]
pub struct SearchGroup {
    pub members: Vec<EventIndex>,
}

fn next_chapter_after(t: f64, chapters: &[f64]) -> f64 {
    chapters.iter().copied().find(|&c| c > t).unwrap_or(f64::INFINITY)
}

/// Link comments, past-source-duration events, zero-duration events, and
/// duplicate (start, end) pairs to a neighbor, then clump the remaining
/// independent events into search groups.
pub fn prepare_search_groups(
    list: &mut EventList,
    source_duration: f64,
    chapters: &[f64],
    max_ts_duration: f64,
    max_ts_distance: f64,
    fast_skip: bool,
) -> Vec<SearchGroup> {
    let n = list.events.len();
    let mut last_unlinked: Option<EventIndex> = None;

    for idx in 0..n {
        if list.events[idx].linked() {
            continue;
        }
        let is_comment = list.events[idx].is_comment;
        let start = list.events[idx].start;
        let duration = list.events[idx].duration();

        if is_comment {
            if idx + 1 < n {
                list.link_event(idx, idx + 1);
            } else if let Some(prev) = last_unlinked {
                list.link_event(idx, prev);
            }
            continue;
        }

        if start + duration / 2.0 > source_duration {
            if let Some(prev) = last_unlinked {
                list.link_event(idx, prev);
            }
            continue;
        }

        if duration == 0.0 {
            if idx + 1 < n {
                list.link_event(idx, idx + 1);
            } else if let Some(prev) = last_unlinked {
                list.link_event(idx, prev);
            }
            continue;
        }

        if fast_skip {
            let end = list.events[idx].end;
            let duplicate_of = (0..idx).find(|&earlier| {
                !list.events[earlier].linked() && list.events[earlier].start == start && list.events[earlier].end == end
            });
            if let Some(target) = duplicate_of {
                list.link_event(idx, target);
                continue;
            }
        }

        last_unlinked = Some(idx);
    }

    let independent: Vec<EventIndex> = (0..n).filter(|&i| !list.events[i].linked()).collect();
    let groups = merge_short_lines_into_groups(list, &independent, chapters, max_ts_duration, max_ts_distance);
    drop_contained_groups(list, groups)
}

pub(crate) fn merge_short_lines_into_groups(
    list: &EventList,
    independent: &[EventIndex],
    chapters: &[f64],
    max_ts_duration: f64,
    max_ts_distance: f64,
) -> Vec<SearchGroup> {
    let mut groups = Vec::new();
    let mut i = 0;
    while i < independent.len() {
        let idx = independent[i];
        let ev = &list.events[idx];
        if ev.duration() > max_ts_duration {
            groups.push(SearchGroup { members: vec![idx] });
            i += 1;
            continue;
        }

        let mut members = vec![idx];
        let mut group_end = ev.end;
        let next_boundary = next_chapter_after(ev.end, chapters);
        let mut j = i + 1;
        while j < independent.len() {
            let next_idx = independent[j];
            let next = &list.events[next_idx];
            if (group_end - next.start).abs() < max_ts_distance
                && next.duration() <= max_ts_duration
                && next.end < next_boundary
            {
                members.push(next_idx);
                group_end = next.end;
                j += 1;
            } else {
                break;
            }
        }
        groups.push(SearchGroup { members });
        i = j;
    }
    groups
}

/// Search groups should already partition the independent events disjointly,
/// but a pathological chapter/ts-distance combination can produce a group
/// whose span sits strictly inside another's; fold it into the outer group.
fn drop_contained_groups(list: &mut EventList, groups: Vec<SearchGroup>) -> Vec<SearchGroup> {
    let bounds: Vec<(f64, f64)> = groups
        .iter()
        .map(|g| (list.events[g.members[0]].start, list.events[*g.members.last().unwrap()].end))
        .collect();

    let mut outer_of: Vec<Option<usize>> = vec![None; groups.len()];
    for i in 0..groups.len() {
        let (si, ei) = bounds[i];
        for j in 0..groups.len() {
            if i == j {
                continue;
            }
            let (sj, ej) = bounds[j];
            if sj <= si && ei <= ej && (sj < si || ei < ej) {
                outer_of[i] = Some(j);
                break;
            }
        }
    }

    for (i, group) in groups.iter().enumerate() {
        if let Some(outer_idx) = outer_of[i] {
            let target = groups[outer_idx].members[0];
            for &member in &group.members {
                if member != target && !list.events[member].linked() {
                    list.link_event(member, target);
                }
            }
        }
    }

    groups
        .into_iter()
        .enumerate()
        .filter(|(i, _)| outer_of[*i].is_none())
        .map(|(_, g)| g)
        .collect()
}

#[derive(Debug, Clone, Copy)]
enum GroupState {
    Null { start_time: f64, end_time: f64 },
    Found { start_time: f64, end_time: f64, shift: f64, diff: f64 },
}

impl GroupState {
    fn shift(&self) -> Option<f64> {
        match self {
            GroupState::Found { shift, .. } => Some(*shift),
            GroupState::Null { .. } => None,
        }
    }

    fn span(&self) -> (f64, f64) {
        match self {
            GroupState::Found { start_time, end_time, .. } => (*start_time, *end_time),
            GroupState::Null { start_time, end_time } => (*start_time, *end_time),
        }
    }
}

/// Assign a shift and match score to every search group, escalating the
/// search window and rewinding past a broken passage when matches refuse to
/// agree. Determinism: purely a function of `src`/`dst`/`groups` and the
/// parameters — no randomness, no iteration-order dependence.
pub fn calculate_shifts(
    list: &mut EventList,
    src: &AudioStream,
    dst: &AudioStream,
    groups: &[SearchGroup],
    normal_window: f64,
    max_window: f64,
    rewind_thresh: usize,
    diag: &Option<DiagSink>,
) {
    let mut committed: Vec<GroupState> = Vec::new();
    let mut uncommitted: Vec<GroupState> = Vec::new();
    let mut window = normal_window;
    let mut idx = 0usize;

    while idx < groups.len() {
        let group = &groups[idx];
        let first = group.members[0];
        let last = *group.members.last().unwrap();
        let pattern_start = list.events[first].start;
        let pattern_end = list.events[last].end;
        let origin = pattern_start;
        let pattern = src.get_substream(pattern_start, pattern_end);

        let last_shift = committed.last().and_then(GroupState::shift).unwrap_or(0.0);

        if origin + last_shift > dst.duration() {
            committed.push(GroupState::Null {
                start_time: pattern_start,
                end_time: pattern_end,
            });
            idx += 1;
            continue;
        }

        if uncommitted.is_empty() && SMALL_WINDOW < window {
            let (diff, time) = dst.find_substream(&pattern, origin + last_shift, SMALL_WINDOW);
            if ((time - origin) - last_shift).abs() <= ALLOWED_ERROR {
                committed.push(GroupState::Found {
                    start_time: pattern_start,
                    end_time: pattern_end,
                    shift: time - origin,
                    diff,
                });
                window = normal_window;
                idx += 1;
                continue;
            }
        }

        let half_point = (pattern_start + pattern_end) / 2.0;
        let half_duration = half_point - pattern_start;
        let first_half = src.get_substream(pattern_start, half_point);
        let second_half = src.get_substream(half_point, pattern_end);

        let try_terminate = |center: f64| -> Option<(f64, f64)> {
            let (whole_diff, whole_time) = dst.find_substream(&pattern, center, window);
            let (_, left_time) = dst.find_substream(&first_half, center, window);
            let (_, right_time_raw) = dst.find_substream(&second_half, center + half_duration, window);
            let right_time = right_time_raw - half_duration;
            if (whole_time - left_time).abs() <= ALLOWED_ERROR && (whole_time - right_time).abs() <= ALLOWED_ERROR {
                Some((whole_time, whole_diff))
            } else {
                None
            }
        };

        let mut result = try_terminate(origin + last_shift);
        if result.is_none() {
            if let Some(prev_shift) = uncommitted.last().and_then(GroupState::shift) {
                result = try_terminate(origin + prev_shift);
            }
        }

        if let Some((time, diff)) = result {
            let shift = time - origin;
            if !uncommitted.is_empty() {
                let (first_un_start, _) = uncommitted[0].span();
                let (_, last_un_end) = uncommitted.last().unwrap().span();
                emit(
                    diag,
                    DiagRecord::GroupShift {
                        start: first_un_start,
                        end: last_un_end,
                        shift,
                        diff,
                    },
                );
                for state in uncommitted.drain(..) {
                    let (s, e) = state.span();
                    committed.push(GroupState::Found {
                        start_time: s,
                        end_time: e,
                        shift,
                        diff,
                    });
                }
            }
            committed.push(GroupState::Found {
                start_time: pattern_start,
                end_time: pattern_end,
                shift,
                diff,
            });
            idx += 1;
        } else {
            let (tentative_diff, tentative_time) = dst.find_substream(&pattern, origin + last_shift, window);
            let tentative_shift = tentative_time - origin;
            uncommitted.push(GroupState::Found {
                start_time: pattern_start,
                end_time: pattern_end,
                shift: tentative_shift,
                diff: tentative_diff,
            });
            idx += 1;

            if uncommitted.len() == rewind_thresh && window < max_window {
                window = max_window;
                let (earliest_start, _) = uncommitted[0].span();
                emit(diag, DiagRecord::Rewind { at: earliest_start, window });
                idx = committed.len();
                uncommitted.clear();
            }
        }
    }

    for state in uncommitted.drain(..) {
        let (s, e) = state.span();
        committed.push(GroupState::Null { start_time: s, end_time: e });
    }

    let mut last_good_target: Option<EventIndex> = None;
    for (i, state) in committed.iter().enumerate() {
        match state {
            GroupState::Found { shift, diff, .. } => {
                for &member in &groups[i].members {
                    if !list.events[member].linked() {
                        list.set_shift(member, *shift, *diff);
                    }
                }
                last_good_target = Some(groups[i].members[0]);
            }
            GroupState::Null { .. } => {
                if let Some(target) = last_good_target {
                    for &member in &groups[i].members {
                        if member != target && !list.events[member].linked() {
                            list.link_event(member, target);
                        }
                    }
                }
            }
        }
    }
}
