//! Chapter-seeded and automatic grouping of shift-bearing events, with
//! small-group merging and broken-chapter-group re-splitting.

use std::collections::{BTreeMap, HashMap};

use crate::diagnostics::{emit, DiagRecord, DiagSink};
use crate::events::EventList;

/// Bucket width for deciding two shifts are "the same".
pub const ALLOWED_ERROR: f64 = 0.01;
/// Within-group shift standard deviation above which a chapter-seeded
/// group is judged "broken".
pub const MAX_GROUP_STD: f64 = 0.025;

#[derive(Debug, Clone)]
pub struct Group {
    /// Event indices, ordered by start time.
    pub members: Vec<usize>,
    pub broken: bool,
}

fn initial_group_bounds(shifts: &[f64]) -> Vec<(usize, usize)> {
    if shifts.is_empty() {
        return Vec::new();
    }
    let mut groups = Vec::new();
    let mut start = 0;
    for i in 1..shifts.len() {
        if (shifts[i] - shifts[i - 1]).abs() > ALLOWED_ERROR {
            groups.push((start, i));
            start = i;
        }
    }
    groups.push((start, shifts.len()));
    groups
}

fn merge_small_groups(shifts: &[f64], mut groups: Vec<(usize, usize)>, min_group_size: usize) -> Vec<(usize, usize)> {
    loop {
        let Some(run_start) = groups.iter().position(|&(s, e)| e - s < min_group_size) else {
            break;
        };
        let mut run_end = run_start + 1;
        while run_end < groups.len() && groups[run_end].1 - groups[run_end].0 < min_group_size {
            run_end += 1;
        }

        let has_prev = run_start > 0;
        let has_next = run_end < groups.len();

        if !has_prev && !has_next {
            break;
        }

        let merge_into_next = if !has_prev {
            true
        } else if !has_next {
            false
        } else {
            let small_last_shift = shifts[groups[run_end - 1].1 - 1];
            let next_first_shift = shifts[groups[run_end].0];
            let prev_last_shift = shifts[groups[run_start - 1].1 - 1];
            let small_first_shift = shifts[groups[run_start].0];
            (small_last_shift - next_first_shift).abs() <= (prev_last_shift - small_first_shift).abs()
        };

        if merge_into_next {
            let merged = (groups[run_start].0, groups[run_end].1);
            groups.splice(run_start..=run_end, std::iter::once(merged));
        } else {
            let merged = (groups[run_start - 1].0, groups[run_end - 1].1);
            groups.splice((run_start - 1)..run_end, std::iter::once(merged));
        }
    }
    groups
}

/// Pure function over shift values: group sizes after automatic grouping
/// plus min-group-size merging. Exposed directly for testing against the
/// documented examples.
pub fn detect_group_sizes(shifts: &[f64], min_group_size: usize) -> Vec<usize> {
    if shifts.is_empty() {
        return Vec::new();
    }
    let groups = initial_group_bounds(shifts);
    let groups = if groups.iter().any(|&(s, e)| e - s >= min_group_size) {
        merge_small_groups(shifts, groups, min_group_size)
    } else {
        groups
    };
    groups.into_iter().map(|(s, e)| e - s).collect()
}

fn population_std(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64;
    var.sqrt()
}

/// Automatic grouping of an ordered, non-linked event index list.
pub fn detect_groups(list: &EventList, event_indices: &[usize], min_group_size: usize) -> Vec<Group> {
    let shifts: Vec<f64> = event_indices.iter().map(|&i| list.shift(i)).collect();
    let sizes = detect_group_sizes(&shifts, min_group_size);
    let mut groups = Vec::new();
    let mut offset = 0;
    for size in sizes {
        groups.push(Group {
            members: event_indices[offset..offset + size].to_vec(),
            broken: false,
        });
        offset += size;
    }
    groups
}

/// Chapter-seeded grouping. `event_indices` should include every event
/// (linked and non-linked) in the current working set; linked events are
/// routed to whichever chapter their chain-end landed in rather than
/// bucketed by their own (possibly comment-only) end time.
pub fn groups_from_chapters(list: &EventList, event_indices: &[usize], chapters: &[f64]) -> Vec<Group> {
    let mut effective_chapters: Vec<f64> = if chapters.is_empty() {
        vec![0.0]
    } else {
        chapters.to_vec()
    };
    effective_chapters.push(f64::INFINITY);

    let mut buckets: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    let mut chapter_of: HashMap<usize, usize> = HashMap::new();

    for &idx in event_indices {
        if list.events[idx].linked() {
            continue;
        }
        let end = list.events[idx].end;
        let count = effective_chapters.partition_point(|&c| c <= end);
        let chapter_idx = count.saturating_sub(1);
        buckets.entry(chapter_idx).or_default().push(idx);
        chapter_of.insert(idx, chapter_idx);
    }

    for &idx in event_indices {
        if !list.events[idx].linked() {
            continue;
        }
        let end_idx = list.chain_end(idx);
        if let Some(&chapter_idx) = chapter_of.get(&end_idx) {
            buckets.entry(chapter_idx).or_default().push(idx);
        }
    }

    let mut groups: Vec<Group> = buckets
        .into_values()
        .filter(|members| !members.is_empty())
        .map(|mut members| {
            members.sort_by(|&a, &b| list.events[a].start.partial_cmp(&list.events[b].start).unwrap());
            Group {
                members,
                broken: false,
            }
        })
        .collect();
    groups.sort_by(|a, b| {
        list.events[a.members[0]]
            .start
            .partial_cmp(&list.events[b.members[0]].start)
            .unwrap()
    });
    groups
}

/// Detect chapter-seeded groups whose shift standard deviation exceeds
/// `MAX_GROUP_STD` (the chapter boundary was wrong), re-group that span
/// automatically, then coalesce adjacent groups whose shifts agree and
/// whose combined standard deviation stays under the threshold.
pub fn split_broken_groups(
    list: &EventList,
    groups: Vec<Group>,
    min_group_size: usize,
    diag: &Option<DiagSink>,
) -> Vec<Group> {
    let mut result: Vec<Group> = Vec::new();
    for group in groups {
        let shifts: Vec<f64> = group.members.iter().map(|&i| list.shift(i)).collect();
        let std = population_std(&shifts);
        if std > MAX_GROUP_STD {
            emit(
                diag,
                DiagRecord::BrokenGroupSplit {
                    start: list.events[group.members[0]].start,
                    end: list.events[*group.members.last().unwrap()].end,
                    std,
                },
            );
            let sizes = detect_group_sizes(&shifts, min_group_size);
            let mut offset = 0;
            for size in sizes {
                let members = group.members[offset..offset + size].to_vec();
                result.push(Group {
                    members,
                    broken: true,
                });
                offset += size;
            }
        } else {
            result.push(group);
        }
    }

    result.sort_by(|a, b| {
        list.events[a.members[0]]
            .start
            .partial_cmp(&list.events[b.members[0]].start)
            .unwrap()
    });

    coalesce_compatible_neighbors(list, result)
}

fn coalesce_compatible_neighbors(list: &EventList, groups: Vec<Group>) -> Vec<Group> {
    let mut out: Vec<Group> = Vec::new();
    for group in groups {
        let mut merged_in = false;
        if let Some(last) = out.last() {
            let last_shift = list.shift(*last.members.last().unwrap());
            let first_shift = list.shift(group.members[0]);
            if (last_shift - first_shift).abs() < ALLOWED_ERROR {
                let mut combined_members = last.members.clone();
                combined_members.extend(group.members.iter().copied());
                let combined_shifts: Vec<f64> = combined_members.iter().map(|&i| list.shift(i)).collect();
                if population_std(&combined_shifts) < MAX_GROUP_STD {
                    out.last_mut().unwrap().members = combined_members;
                    merged_in = true;
                }
            }
        }
        if !merged_in {
            out.push(group);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::ScriptEvent;

    #[test]
    fn detect_group_sizes_simple_runs() {
        let mut shifts = vec![0.5; 3];
        shifts.extend(vec![1.0; 10]);
        shifts.extend(vec![0.5; 5]);
        assert_eq!(detect_group_sizes(&shifts, 1), vec![3, 10, 5]);
    }

    #[test]
    fn detect_group_sizes_merges_small_run() {
        let mut shifts = vec![0.5; 10];
        shifts.push(0.8);
        shifts.extend(vec![1.0; 10]);
        assert_eq!(detect_group_sizes(&shifts, 5), vec![10, 11]);
    }

    fn ev(start: f64, end: f64, idx: usize) -> ScriptEvent {
        ScriptEvent::new(start, end, "Default".into(), "x".into(), false, idx)
    }

    #[test]
    fn groups_from_chapters_single_group_without_chapters() {
        let evs: Vec<ScriptEvent> = (0..5).map(|i| ev(i as f64, i as f64 + 1.0, i)).collect();
        let mut list = EventList::new(evs);
        for i in 0..5 {
            list.set_shift(i, 1.0, 0.1);
        }
        let indices: Vec<usize> = (0..5).collect();
        let groups = groups_from_chapters(&list, &indices, &[]);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].members.len(), 5);
    }

    #[test]
    fn groups_from_chapters_splits_by_chapter() {
        let evs: Vec<ScriptEvent> = (0..10).map(|i| ev(i as f64, i as f64 + 1.0, i)).collect();
        let mut list = EventList::new(evs);
        for i in 0..10 {
            list.set_shift(i, 1.0, 0.1);
        }
        let indices: Vec<usize> = (0..10).collect();
        let groups = groups_from_chapters(&list, &indices, &[0.0, 5.0]);
        assert_eq!(groups.len(), 2);
    }

    #[test]
    fn linked_event_joins_chain_ends_chapter() {
        let evs: Vec<ScriptEvent> = (0..4).map(|i| ev(i as f64, i as f64 + 0.5, i)).collect();
        let mut list = EventList::new(evs);
        list.set_shift(0, 1.0, 0.1);
        list.link_event(1, 0);
        list.set_shift(2, 1.0, 0.1);
        list.set_shift(3, 1.0, 0.1);
        let indices: Vec<usize> = (0..4).collect();
        let groups = groups_from_chapters(&list, &indices, &[]);
        assert_eq!(groups.len(), 1);
        assert!(groups[0].members.contains(&1));
    }

    #[test]
    fn split_broken_groups_leaves_tight_group_alone() {
        let evs: Vec<ScriptEvent> = (0..5).map(|i| ev(i as f64, i as f64 + 1.0, i)).collect();
        let mut list = EventList::new(evs);
        for i in 0..5 {
            list.set_shift(i, 1.0, 0.1);
        }
        let groups = vec![Group {
            members: (0..5).collect(),
            broken: false,
        }];
        let out = split_broken_groups(&list, groups, 1, &None);
        assert_eq!(out.len(), 1);
        assert!(!out[0].broken);
    }

    #[test]
    fn split_broken_groups_splits_high_variance_group() {
        let evs: Vec<ScriptEvent> = (0..10).map(|i| ev(i as f64, i as f64 + 1.0, i)).collect();
        let mut list = EventList::new(evs);
        for i in 0..5 {
            list.set_shift(i, 1.0, 0.1);
        }
        for i in 5..10 {
            list.set_shift(i, 4.0, 0.1);
        }
        let groups = vec![Group {
            members: (0..10).collect(),
            broken: false,
        }];
        let out = split_broken_groups(&list, groups, 1, &None);
        assert_eq!(out.len(), 2);
        assert!(out.iter().all(|g| g.broken));
    }
}
