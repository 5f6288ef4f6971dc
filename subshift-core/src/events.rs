//! Subtitle event model: shift/diff state, link chains, and boundary
//! refinements.
//!
//! Events live in a flat `Vec<ScriptEvent>`; links are indices into that
//! vector rather than back-references, per the design notes — readers walk
//! forward only, and a cycle is rejected at `link_event` time by walking the
//! candidate chain.

/// Index of an event within the owning script's event vector.
pub type EventIndex = usize;

#[derive(Debug, Clone)]
pub struct ScriptEvent {
    pub start: f64,
    pub end: f64,

    pub style: String,
    pub text: String,
    pub is_comment: bool,

    /// Stable original ordering key, used to restore authoring order on
    /// output regardless of how the in-memory vector gets sorted.
    pub source_index: usize,

    shift: f64,
    diff: f64,
    start_shift: f64,
    end_shift: f64,
    pub broken: bool,

    linked_to: Option<EventIndex>,

    pub group: Option<usize>,
    prev_keyframe: Option<f64>,
    next_keyframe: Option<f64>,
}

impl ScriptEvent {
    pub fn new(start: f64, end: f64, style: String, text: String, is_comment: bool, source_index: usize) -> Self {
        ScriptEvent {
            start,
            end,
            style,
            text,
            is_comment,
            source_index,
            shift: 0.0,
            diff: 1.0,
            start_shift: 0.0,
            end_shift: 0.0,
            broken: false,
            linked_to: None,
            group: None,
            prev_keyframe: None,
            next_keyframe: None,
        }
    }

    pub fn duration(&self) -> f64 {
        self.end - self.start
    }

    pub fn linked(&self) -> bool {
        self.linked_to.is_some()
    }

    pub fn linked_to(&self) -> Option<EventIndex> {
        self.linked_to
    }
}

/// Owns the full event list and provides link-aware accessors. Links are
/// resolved by walking `linked_to` chains through this container rather
/// than through the event struct itself, since a struct cannot see its
/// siblings.
#[derive(Debug, Clone, Default)]
pub struct EventList {
    pub events: Vec<ScriptEvent>,
}

impl EventList {
    pub fn new(events: Vec<ScriptEvent>) -> Self {
        EventList { events }
    }

    pub fn sort_by_start(&mut self) {
        self.events.sort_by(|a, b| a.start.partial_cmp(&b.start).unwrap());
    }

    pub fn chain_end(&self, idx: EventIndex) -> EventIndex {
        let mut cur = idx;
        loop {
            match self.events[cur].linked_to {
                Some(next) => cur = next,
                None => return cur,
            }
        }
    }

    pub fn shift(&self, idx: EventIndex) -> f64 {
        self.events[self.chain_end(idx)].shift
    }

    pub fn diff(&self, idx: EventIndex) -> f64 {
        self.events[self.chain_end(idx)].diff
    }

    /// `link_event(idx, target)`: fails with a panic (a programmer bug, per
    /// spec) if following `target`'s chain would reach back to `idx`.
    pub fn link_event(&mut self, idx: EventIndex, target: EventIndex) {
        let mut cur = target;
        loop {
            if cur == idx {
                panic!("circular link: event {idx} would link back to itself through {target}");
            }
            match self.events[cur].linked_to {
                Some(next) => cur = next,
                None => break,
            }
        }
        self.events[idx].linked_to = Some(target);
    }

    /// Set the shift/diff of an independent event. Panics if called on a
    /// linked event — callers must `resolve_link` first.
    pub fn set_shift(&mut self, idx: EventIndex, shift: f64, diff: f64) {
        if self.events[idx].linked() {
            panic!("set_shift called on linked event {idx}; resolve_link first");
        }
        self.events[idx].shift = shift;
        self.events[idx].diff = diff;
    }

    pub fn adjust_shift(&mut self, idx: EventIndex, delta: f64) {
        if self.events[idx].linked() {
            panic!("adjust_shift called on linked event {idx}; resolve_link first");
        }
        self.events[idx].shift += delta;
    }

    /// Copies the chain-end's shift/diff/broken state into `idx` and clears
    /// its link, making it independent.
    pub fn resolve_link(&mut self, idx: EventIndex) {
        if !self.events[idx].linked() {
            return;
        }
        let end = self.chain_end(idx);
        let shift = self.events[end].shift;
        let diff = self.events[end].diff;
        let broken = self.events[end].broken;
        let ev = &mut self.events[idx];
        ev.shift = shift;
        ev.diff = diff;
        ev.broken = broken;
        ev.linked_to = None;
    }

    pub fn resolve_all_links(&mut self) {
        for idx in 0..self.events.len() {
            self.resolve_link(idx);
        }
    }

    pub fn set_additional_shifts(&mut self, idx: EventIndex, start_shift: f64, end_shift: f64) {
        if self.events[idx].linked() {
            panic!("adjust_additional_shifts called on linked event {idx}; resolve_link first");
        }
        self.events[idx].start_shift = start_shift;
        self.events[idx].end_shift = end_shift;
    }

    pub fn adjust_additional_shifts(&mut self, idx: EventIndex, start_delta: f64, end_delta: f64) {
        if self.events[idx].linked() {
            panic!("adjust_additional_shifts called on linked event {idx}; resolve_link first");
        }
        self.events[idx].start_shift += start_delta;
        self.events[idx].end_shift += end_delta;
    }

    pub fn set_keyframes(&mut self, idx: EventIndex, prev: Option<f64>, next: Option<f64>) {
        self.events[idx].prev_keyframe = prev;
        self.events[idx].next_keyframe = next;
    }

    /// `(start_distance, end_distance)`: signed distance from this event's
    /// shifted boundary to the nearest keyframe on each side, if one was
    /// recorded via `set_keyframes`.
    pub fn keyframe_distances(&self, idx: EventIndex) -> (Option<f64>, Option<f64>) {
        let ev = &self.events[idx];
        let shift = self.shift(idx);
        let start = ev.prev_keyframe.map(|kf| kf - (ev.start + shift));
        let end = ev.next_keyframe.map(|kf| kf - (ev.end + shift));
        (start, end)
    }

    /// `start <- start + shift + start_shift`, `end <- end + shift +
    /// end_shift`. Must only be called once per event, and only after
    /// `resolve_link` has been called on every linked event (otherwise a
    /// linked event applies through its chain, which is fine as long as the
    /// chain end itself is not re-applied afterward).
    pub fn apply_shift(&mut self, idx: EventIndex) {
        let shift = self.shift(idx);
        let diff_unused = self.diff(idx);
        let _ = diff_unused;
        let (start_shift, end_shift) = {
            let end = self.chain_end(idx);
            (self.events[end].start_shift, self.events[end].end_shift)
        };
        let ev = &mut self.events[idx];
        ev.start += shift + start_shift;
        ev.end += shift + end_shift;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ev(start: f64, end: f64) -> ScriptEvent {
        ScriptEvent::new(start, end, "Default".into(), "text".into(), false, 0)
    }

    #[test]
    fn linked_event_reads_through_chain() {
        let mut list = EventList::new(vec![ev(0.0, 1.0), ev(1.0, 2.0)]);
        list.set_shift(1, 3.0, 0.1);
        list.link_event(0, 1);
        assert_eq!(list.shift(0), 3.0);
        assert_eq!(list.diff(0), 0.1);
    }

    #[test]
    #[should_panic(expected = "circular link")]
    fn circular_link_panics() {
        let mut list = EventList::new(vec![ev(0.0, 1.0), ev(1.0, 2.0)]);
        list.link_event(0, 1);
        list.link_event(1, 0);
    }

    #[test]
    #[should_panic(expected = "set_shift called on linked event")]
    fn set_shift_on_linked_panics() {
        let mut list = EventList::new(vec![ev(0.0, 1.0), ev(1.0, 2.0)]);
        list.link_event(0, 1);
        list.set_shift(0, 1.0, 0.1);
    }

    #[test]
    fn resolve_link_makes_independent() {
        let mut list = EventList::new(vec![ev(0.0, 1.0), ev(1.0, 2.0)]);
        list.set_shift(1, 2.5, 0.2);
        list.link_event(0, 1);
        list.resolve_link(0);
        assert!(!list.events[0].linked());
        assert_eq!(list.shift(0), 2.5);
        list.set_shift(0, 9.0, 0.3);
        assert_eq!(list.shift(0), 9.0);
        assert_eq!(list.shift(1), 2.5);
    }

    #[test]
    fn apply_shift_is_noop_after_zero_shift() {
        let mut list = EventList::new(vec![ev(5.0, 6.0)]);
        list.set_shift(0, 0.0, 0.5);
        list.apply_shift(0);
        assert_eq!(list.events[0].start, 5.0);
        assert_eq!(list.events[0].end, 6.0);
    }

    #[test]
    fn apply_shift_moves_boundaries() {
        let mut list = EventList::new(vec![ev(5.0, 6.0)]);
        list.set_shift(0, 2.0, 0.1);
        list.set_additional_shifts(0, 0.1, -0.1);
        list.apply_shift(0);
        assert!((list.events[0].start - 7.1).abs() < 1e-9);
        assert!((list.events[0].end - 7.9).abs() < 1e-9);
    }
}
