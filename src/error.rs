// src/error.rs

use serde::Serialize;
use std::{fmt, time::Duration};
use thiserror::Error;

/// Conditions that stop a run.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("licence category {choice:?} is not offered; choose one of: {}", available.join(", "))]
    InvalidCategory {
        choice: String,
        available: Vec<String>,
    },

    #[error("there are no active licences in category {0:?}")]
    NoRecords(String),

    #[error("search outcome undetermined after {waited:?}: neither an error banner nor a result listing appeared")]
    AmbiguousSearch { waited: Duration },

    #[error("schema mismatch in the document for {0}")]
    SchemaMismatch(Box<RecordError>),

    #[error(transparent)]
    Session(#[from] anyhow::Error),
}

/// Which step of a record's processing failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Population,
    Document,
    Normalize,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::Population => "population",
            Stage::Document => "document",
            Stage::Normalize => "normalize",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Error, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RecordFailure {
    #[error("{what} did not appear within {waited_ms} ms ({attempts} attempt(s))")]
    Unavailable {
        what: String,
        waited_ms: u64,
        attempts: u32,
    },

    #[error("cannot parse {value:?} as {expected}")]
    Parse { value: String, expected: String },

    #[error("unexpected table layout: {detail}")]
    Layout { detail: String },

    #[error("headers differ from the established schema: expected {expected:?}, found {found:?}")]
    SchemaMismatch {
        expected: Vec<String>,
        found: Vec<String>,
    },

    #[error("table extraction failed: {detail}")]
    Extraction { detail: String },

    #[error("browser step failed: {detail}")]
    Session { detail: String },
}

impl RecordFailure {
    pub fn unavailable(what: impl fmt::Display, waited: Duration, attempts: u32) -> Self {
        RecordFailure::Unavailable {
            what: what.to_string(),
            waited_ms: waited.as_millis() as u64,
            attempts,
        }
    }

    pub fn parse(value: impl Into<String>, expected: impl Into<String>) -> Self {
        RecordFailure::Parse {
            value: value.into(),
            expected: expected.into(),
        }
    }

    pub fn layout(detail: impl Into<String>) -> Self {
        RecordFailure::Layout {
            detail: detail.into(),
        }
    }

    pub fn session(err: &anyhow::Error) -> Self {
        RecordFailure::Session {
            detail: format!("{err:#}"),
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            RecordFailure::Unavailable { .. } | RecordFailure::Session { .. }
        )
    }
}

/// A failure confined to one licence; the run carries on without it.
#[derive(Debug, Clone, PartialEq, Error, Serialize)]
#[error("{authorization_number} [{stage}]: {failure}")]
pub struct RecordError {
    pub authorization_number: String,
    pub stage: Stage,
    pub failure: RecordFailure,
}

impl RecordError {
    pub fn new(authorization_number: impl Into<String>, stage: Stage, failure: RecordFailure) -> Self {
        Self {
            authorization_number: authorization_number.into(),
            stage,
            failure,
        }
    }
}
