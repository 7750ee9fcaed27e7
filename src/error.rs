//! Errors raised while declaring or evaluating a study.
use std::path::PathBuf;
use thiserror::Error;

use crate::{query::Type, ArcStr};

/// Everything that can go wrong before or during a measures run.
///
/// All of these are fatal. Odd data values (a negative IMD, a missing date of birth) are not
/// errors: they land in the `"unknown"`/`"missing"` buckets of the relevant column.
#[derive(Debug, Error)]
pub enum StudyError {
    #[error("codelist file \"{path}\" could not be read")]
    CodelistRead {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("column \"{column}\" not found in codelist \"{path}\"")]
    CodelistColumn { column: String, path: PathBuf },

    #[error("invalid study configuration: {0}")]
    Config(String),

    #[error("no dataset column called \"{0}\"")]
    UndefinedColumn(ArcStr),

    #[error("dataset column \"{0}\" is defined twice")]
    DuplicateColumn(ArcStr),

    #[error("measure \"{0}\" is defined twice")]
    DuplicateMeasure(ArcStr),

    #[error("measure \"{0}\" has no intervals and no defaults were set")]
    NoIntervals(ArcStr),

    #[error("type mismatch in {context}: expected {expected}, found {found}")]
    TypeMismatch {
        context: &'static str,
        expected: Type,
        found: Type,
    },

    #[error("date arithmetic out of range starting from {0}")]
    DateOutOfRange(chrono::NaiveDate),

    #[error("unsupported expression: {0}")]
    Query(String),
}

/// The broad class of a [`StudyError`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad codelists, arguments, or references to columns that don't exist.
    Configuration,
    /// An expression that can't be evaluated (types don't line up, dates overflow).
    Query,
}

impl StudyError {
    pub fn kind(&self) -> ErrorKind {
        use StudyError::*;
        match self {
            CodelistRead { .. }
            | CodelistColumn { .. }
            | Config(_)
            | UndefinedColumn(_)
            | DuplicateColumn(_)
            | DuplicateMeasure(_)
            | NoIntervals(_) => ErrorKind::Configuration,
            TypeMismatch { .. } | DateOutOfRange(_) | Query(_) => ErrorKind::Query,
        }
    }
}
