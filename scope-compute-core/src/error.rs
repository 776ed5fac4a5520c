//! Error taxonomy (spec.md §7).
//!
//! Categories 1-3 (configuration, capability, bad-data) never cross a
//! `refresh` call boundary: they accumulate on the node as an [`ErrorState`].
//! Category 4 (resource failure) is the only case that propagates as a
//! `Result`/panic, via [`FatalError`]. Category 5 (bounded-drift warning) is
//! just a `log::warn!` call at the call site, there is no dedicated type.

use thiserror::Error;

/// Unrecoverable failures (spec.md §7.4). These should never occur in a
/// correctly configured system; callers are expected to log and abort
/// rather than attempt recovery.
#[derive(Debug, Error)]
pub enum FatalError {
    #[error("allocation failed for {bytes} bytes ({context})")]
    AllocationFailed { bytes: usize, context: String },

    #[error("element type is not trivially copyable but device access was requested")]
    NonCopyableDeviceAccess,

    #[error("file mapping failed for {path}: {source}")]
    FileMappingFailed {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("zero-size allocation requested for {context}")]
    ZeroSizeAllocation { context: String },
}

/// A node-local, non-fatal error (spec.md §7.1-§7.3). Carried as the content
/// of a node's [`ErrorState`]; never returned from `refresh`.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum NodeError {
    #[error("{input} expects {expected} but got {actual}")]
    WrongStreamType {
        input: String,
        expected: String,
        actual: String,
    },

    #[error("{input} expects unit {expected} but got {actual}")]
    WrongUnit {
        input: String,
        expected: String,
        actual: String,
    },

    #[error("Missing GPU support")]
    MissingGpuSupport,

    #[error("{0}")]
    BadData(String),

    #[error("input {0} is not connected")]
    MissingInput(String),
}

/// `(title, log)` pair retrievable from a node (spec.md §7, §6).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ErrorState {
    entry: Option<(String, String)>,
}

impl ErrorState {
    pub fn clear(&mut self) {
        self.entry = None;
    }

    pub fn set(&mut self, title: impl Into<String>, err: &NodeError) {
        self.entry = Some((title.into(), err.to_string()));
    }

    pub fn is_set(&self) -> bool {
        self.entry.is_some()
    }

    pub fn title(&self) -> Option<&str> {
        self.entry.as_ref().map(|(t, _)| t.as_str())
    }

    pub fn log(&self) -> Option<&str> {
        self.entry.as_ref().map(|(_, l)| l.as_str())
    }
}
