//! The crate-wide error currency.
//!
//! A `Pull` program carries a single error type through every `Fail`
//! terminal, every finalizer, and every scope close. User errors raised via
//! `raise_error`/`attempt_eval` are wrapped in [`Error::Raised`]; everything
//! else names a specific internal failure mode.

use std::fmt;

/// Errors produced by the interpreter, the scope tree, or user code.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// An error raised by user code: `raiseError`, a failed `attemptEval`,
    /// a panicking bind continuation, or a release action.
    #[error(transparent)]
    Raised(#[from] anyhow::Error),

    /// Two or more errors occurred together and neither should be dropped:
    /// a deferred interruption error composed with a finalizer failure, or
    /// two stacked bracket releases both failing.
    #[error("{}", format_composite(.0))]
    Composite(Vec<Error>),

    /// `CloseScope` or `findInLineage` was asked to operate on a scope that
    /// is not (or is no longer) in the interpreter's lineage.
    #[error("scope {0:?} is not open")]
    ScopeNotOpen(crate::scope::ScopeId),

    /// An attempt was made to close the root scope directly; only the
    /// interpreter's top-level teardown may do that.
    #[error("cannot close the root scope")]
    CloseRoot,

    /// `Scope::lease` was called on a scope that has already been closed.
    #[error("scope {0:?} is already closed")]
    LeaseOnClosedScope(crate::scope::ScopeId),

    /// The interpreter reached a state the algebra should make unreachable
    /// (e.g. a `StepLeg` whose target scope vanished without a close
    /// having run). Surfacing this as an error rather than panicking keeps
    /// `compile` total.
    #[error("interpreter invariant violated: {0}")]
    Invariant(String),
}

impl Error {
    /// Compose two possibly-absent errors, preferring a flat result when
    /// only one side is present. Used to merge a deferred interruption
    /// error with a finalizer failure, per spec §7.
    pub fn compose(a: Option<Error>, b: Option<Error>) -> Option<Error> {
        match (a, b) {
            (None, None) => None,
            (Some(a), None) => Some(a),
            (None, Some(b)) => Some(b),
            (Some(a), Some(b)) => Some(Error::Composite(flatten(a, b))),
        }
    }

    pub fn invariant(msg: impl Into<String>) -> Error {
        Error::Invariant(msg.into())
    }
}

fn flatten(a: Error, b: Error) -> Vec<Error> {
    let mut out = Vec::new();
    match a {
        Error::Composite(xs) => out.extend(xs),
        other => out.push(other),
    }
    match b {
        Error::Composite(xs) => out.extend(xs),
        other => out.push(other),
    }
    out
}

fn format_composite(errs: &[Error]) -> String {
    errs.iter().map(|e| e.to_string()).collect::<Vec<_>>().join("\n")
}

pub type Result<T> = std::result::Result<T, Error>;
