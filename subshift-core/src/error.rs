//! Error taxonomy for the retiming engine.
//!
//! User-facing failures are all represented by [`SushiError`] so the CLI can
//! print a single stable message and exit. Programmer-bug conditions
//! (circular links, mutation of a linked event, an even median window) are
//! not part of this enum — they panic, since they indicate a defect in the
//! engine itself rather than bad input.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SushiError {
    #[error("{title}: file not found: {path}")]
    FileMissing { path: String, title: String },

    #[error("{path}: {detail}")]
    BadFormat { path: String, detail: String },

    #[error("{detail}")]
    BadArgs { detail: String },
}

pub type Result<T> = std::result::Result<T, SushiError>;
