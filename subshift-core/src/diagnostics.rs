//! Diagnostic sink — structured progress/warning records handed to a
//! caller-supplied callback instead of a process-wide logger.
//!
//! The engine never calls `log::` itself; it only ever calls the sink.
//! The CLI binary is the one place that bridges these records to `log`.

use serde::Serialize;

/// One structured diagnostic emitted during the pipeline.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind")]
pub enum DiagRecord {
    /// A group's final averaged shift.
    GroupShift {
        start: f64,
        end: f64,
        shift: f64,
        diff: f64,
    },
    /// The shift engine enlarged its window and rewound the cursor.
    Rewind { at: f64, window: f64 },
    /// Border events were linked to a neighbor by `fix_near_borders`.
    BorderFix {
        first_good_index: usize,
        linked_count: usize,
    },
    /// A chapter-seeded group's standard deviation exceeded the broken
    /// threshold and was re-grouped.
    BrokenGroupSplit { start: f64, end: f64, std: f64 },
    /// Downmix channel-length mismatch was tolerated rather than aborted.
    ChannelLengthMismatch { path: String, diff_samples: usize },
    /// Generic informational message (file loaded, counts, etc).
    Info { message: String },
}

/// Diagnostic sink type: a callback invoked once per structured record.
pub type DiagSink = Box<dyn Fn(DiagRecord) + Send + Sync>;

pub(crate) fn emit(sink: &Option<DiagSink>, record: DiagRecord) {
    if let Some(cb) = sink {
        cb(record);
    }
}
