//! subshift-core — audio-driven subtitle retiming engine.
//!
//! This crate provides:
//! - **audio**: WAV loading, downmix/downsample/normalize, cross-correlation search.
//! - **timecodes**: CFR/VFR frame-number <-> time mapping.
//! - **events**: the subtitle event model, including link chains.
//! - **chapters** / **keyframes**: matroska/OGM chapter and SCXviD keyframe parsing.
//! - **smoothing**: running median, border repair, gap interpolation.
//! - **grouping**: chapter-seeded and automatic grouping of shift-bearing events.
//! - **shift_engine**: search-group construction and the window-escalation/rewind
//!   state machine that assigns each group a shift.
//! - **keyframe_snap**: keyframe-based correction of audio-derived shifts.
//! - **ass** / **srt**: subtitle script parsing and serialization.
//! - **orchestrator**: the ordered pipeline tying all of the above together.
//! - **diagnostics**: the structured sink the engine reports progress through.
//! - **error**: the user-facing failure taxonomy.

pub mod ass;
pub mod audio;
pub mod chapters;
pub mod diagnostics;
pub mod error;
pub mod events;
pub mod grouping;
pub mod keyframe_snap;
pub mod keyframes;
pub mod orchestrator;
pub mod shift_engine;
pub mod smoothing;
pub mod srt;
pub mod timecodes;
