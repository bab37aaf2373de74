//src/error.rs

use std::path::PathBuf;
use thiserror::Error;

use crate::types::SourceKind;

/// Every failure the pipeline can report.
#[derive(Debug, Error)]
pub enum ReportError {
    /// Raw source could not be read at all. Fatal.
    #[error("cannot read {kind} input {}: {source}", path.display())]
    Io {
        kind: SourceKind,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Content decodes but violates the expected encoding (bad JSON,
    /// non-numeric count, ...).
    #[error("{kind} input is malformed: {message}")]
    Format { kind: SourceKind, message: String },

    /// Content is not in the expected shape for this source kind
    /// (missing column, missing section, ...).
    #[error("{kind} input has unexpected structure: {message}")]
    Parse { kind: SourceKind, message: String },

    /// Parsed table breaks a semantic invariant. Never downgraded.
    #[error("{kind} data failed validation: {message}")]
    Validation { kind: SourceKind, message: String },

    #[error("invalid configuration: {0}")]
    Config(String),

    /// An intermediate section does not match its source's contract.
    #[error("malformed report section: {0}")]
    Composition(String),
}

impl ReportError {
    /// Format and parse errors may be downgraded to an absent section in
    /// partial-failure mode; everything else aborts generation.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, ReportError::Format { .. } | ReportError::Parse { .. })
    }

    pub fn source_kind(&self) -> Option<SourceKind> {
        match self {
            ReportError::Io { kind, .. }
            | ReportError::Format { kind, .. }
            | ReportError::Parse { kind, .. }
            | ReportError::Validation { kind, .. } => Some(*kind),
            ReportError::Config(_) | ReportError::Composition(_) => None,
        }
    }

    pub(crate) fn format(kind: SourceKind, message: impl Into<String>) -> Self {
        ReportError::Format {
            kind,
            message: message.into(),
        }
    }

    pub(crate) fn parse(kind: SourceKind, message: impl Into<String>) -> Self {
        ReportError::Parse {
            kind,
            message: message.into(),
        }
    }

    pub(crate) fn validation(kind: SourceKind, message: impl Into<String>) -> Self {
        ReportError::Validation {
            kind,
            message: message.into(),
        }
    }
}

/// Aggregated result of a failed generation call: every fatal error seen.
#[derive(Debug, Error)]
#[error("report generation failed with {} error(s): {}", errors.len(), summarize(errors))]
pub struct GenerationFailure {
    pub errors: Vec<ReportError>,
}

impl GenerationFailure {
    pub fn new(errors: Vec<ReportError>) -> Self {
        Self { errors }
    }
}

impl From<ReportError> for GenerationFailure {
    fn from(err: ReportError) -> Self {
        Self { errors: vec![err] }
    }
}

fn summarize(errors: &[ReportError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}
