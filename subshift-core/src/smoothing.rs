//! Running median, border-outlier repair, and missing-value interpolation.

use crate::diagnostics::{emit, DiagRecord, DiagSink};
use crate::events::EventList;

/// Median of `values[i-r..=i+r]` where `r = min(window/2, i, n-i-1)` — the
/// window shrinks near the array's edges rather than reading out of bounds.
pub fn running_median(values: &[f64], window_size: usize) -> Vec<f64> {
    assert!(window_size % 2 == 1, "window_size must be odd");
    let n = values.len();
    let half = window_size / 2;
    let mut out = Vec::with_capacity(n);
    for i in 0..n {
        let r = half.min(i).min(n - i - 1);
        let mut window: Vec<f64> = values[i - r..=i + r].to_vec();
        window.sort_by(|a, b| a.partial_cmp(b).unwrap());
        let mid = window.len() / 2;
        let median = if window.len() % 2 == 0 {
            (window[mid - 1] + window[mid]) / 2.0
        } else {
            window[mid]
        };
        out.push(median);
    }
    out
}

/// Replace each non-linked event's shift with the running median over a
/// `2*radius+1` window. `diff` is left untouched.
pub fn smooth_events(list: &mut EventList, indices: &[usize], radius: usize) {
    if radius == 0 || indices.is_empty() {
        return;
    }
    let shifts: Vec<f64> = indices.iter().map(|&i| list.shift(i)).collect();
    let smoothed = running_median(&shifts, 2 * radius + 1);
    for (&idx, &new_shift) in indices.iter().zip(smoothed.iter()) {
        let diff = list.diff(idx);
        list.set_shift(idx, new_shift, diff);
    }
}

/// Walk from each end of `indices`, linking every event whose
/// `diff / median_diff` falls outside `[0.2, 5.0]` to the first event that
/// satisfies the band. Cold-opens and missing credits otherwise poison the
/// very first/last matches with a neighbor's shift instead of garbage.
pub fn fix_near_borders(list: &mut EventList, indices: &[usize], diag: &Option<DiagSink>) -> usize {
    if indices.is_empty() {
        return 0;
    }
    let diffs: Vec<f64> = indices.iter().map(|&i| list.diff(i)).collect();
    let mut sorted = diffs.clone();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let mid = sorted.len() / 2;
    let median_diff = if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    };
    if median_diff.abs() < 1e-12 {
        return 0;
    }

    let in_band = |diff: f64| -> bool {
        let ratio = diff / median_diff;
        (0.2..=5.0).contains(&ratio)
    };

    let mut linked_count = 0;

    let mut first_good = None;
    for (pos, &idx) in indices.iter().enumerate() {
        if in_band(list.diff(idx)) {
            first_good = Some(pos);
            break;
        }
    }
    if let Some(first_good_pos) = first_good {
        for &idx in &indices[..first_good_pos] {
            list.link_event(idx, indices[first_good_pos]);
            linked_count += 1;
        }
    }

    let mut last_good = None;
    for (pos, &idx) in indices.iter().enumerate().rev() {
        if in_band(list.diff(idx)) {
            last_good = Some(pos);
            break;
        }
    }
    if let Some(last_good_pos) = last_good {
        for &idx in &indices[last_good_pos + 1..] {
            if !list.events[idx].linked() {
                list.link_event(idx, indices[last_good_pos]);
                linked_count += 1;
            }
        }
    }

    if linked_count > 0 {
        let first_good_index = first_good.map(|p| indices[p]).unwrap_or(indices[0]);
        emit(diag, DiagRecord::BorderFix { first_good_index, linked_count });
    }

    linked_count
}

/// Linearly interpolate `None` entries from known neighbors keyed by the
/// parallel `xs` array. Entries before the first known value or after the
/// last take the nearest known boundary value. All-`None` input returns
/// empty.
pub fn interpolate_nones(values: &[Option<f64>], xs: &[f64]) -> Vec<f64> {
    assert_eq!(values.len(), xs.len());
    if values.is_empty() || values.iter().all(|v| v.is_none()) {
        return Vec::new();
    }

    let mut out = vec![0.0; values.len()];
    let known_indices: Vec<usize> = (0..values.len()).filter(|&i| values[i].is_some()).collect();

    for &i in &known_indices {
        out[i] = values[i].unwrap();
    }

    let first_known = known_indices[0];
    for i in 0..first_known {
        out[i] = values[first_known].unwrap();
    }
    let last_known = *known_indices.last().unwrap();
    for i in (last_known + 1)..values.len() {
        out[i] = values[last_known].unwrap();
    }

    for w in known_indices.windows(2) {
        let (a, b) = (w[0], w[1]);
        if b == a + 1 {
            continue;
        }
        let (xa, xb) = (xs[a], xs[b]);
        let (va, vb) = (values[a].unwrap(), values[b].unwrap());
        for i in (a + 1)..b {
            let t = (xs[i] - xa) / (xb - xa);
            out[i] = va + t * (vb - va);
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn running_median_preserves_constant_sequence() {
        let values = vec![5.0; 11];
        let out = running_median(&values, 5);
        assert_eq!(out, values);
    }

    #[test]
    fn running_median_removes_spike() {
        let mut values = vec![1.0; 11];
        values[5] = 100.0;
        let out = running_median(&values, 5);
        assert_eq!(out[5], 1.0);
    }

    #[test]
    fn running_median_shrinks_at_edges() {
        let values = vec![1.0, 2.0, 3.0, 4.0, 5.0];
        let out = running_median(&values, 5);
        // at i=0, r=min(2,0,4)=0 -> median of [1.0] == 1.0
        assert_eq!(out[0], 1.0);
        // at i=1, r=min(2,1,3)=1 -> median of [1,2,3] == 2.0
        assert_eq!(out[1], 2.0);
    }

    #[test]
    fn interpolate_nones_fills_gaps() {
        let values = vec![Some(1.0), None, Some(3.0), None, Some(5.0)];
        let xs = vec![1.0, 2.0, 3.0, 4.0, 5.0];
        let out = interpolate_nones(&values, &xs);
        assert_eq!(out, vec![1.0, 2.0, 3.0, 4.0, 5.0]);
    }

    #[test]
    fn interpolate_nones_all_none_is_empty() {
        let values = vec![None, None, None];
        let xs = vec![1.0, 2.0, 3.0];
        assert!(interpolate_nones(&values, &xs).is_empty());
    }

    #[test]
    fn interpolate_nones_single_known_propagates() {
        let values = vec![None, Some(7.0), None];
        let xs = vec![1.0, 2.0, 3.0];
        let out = interpolate_nones(&values, &xs);
        assert_eq!(out, vec![7.0, 7.0, 7.0]);
    }

    #[test]
    fn interpolate_nones_distinguishes_zero_from_missing() {
        let values = vec![Some(0.0), Some(0.0), Some(0.0)];
        let xs = vec![1.0, 2.0, 3.0];
        let out = interpolate_nones(&values, &xs);
        assert_eq!(out, vec![0.0, 0.0, 0.0]);
    }

    #[test]
    fn fix_near_borders_links_outlier_edges() {
        let evs = (0..10)
            .map(|i| crate::events::ScriptEvent::new(i as f64, i as f64 + 1.0, "Default".into(), "x".into(), false, i))
            .collect();
        let mut list = EventList::new(evs);
        for i in 0..10 {
            let diff = if i < 2 { 0.9 } else { 0.1 };
            list.set_shift(i, 1.0, diff);
        }
        let indices: Vec<usize> = (0..10).collect();
        let linked = fix_near_borders(&mut list, &indices, &None);
        assert_eq!(linked, 2);
        assert!(list.events[0].linked());
        assert!(list.events[1].linked());
        assert!(!list.events[2].linked());
    }
}
