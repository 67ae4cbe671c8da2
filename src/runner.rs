//! The `Runner` trait: what the trampoline in `interpret.rs` does once it
//! has reduced the algebra down to an `Output`, a finished `Result`, a
//! failure, or an interruption.
//!
//! Every caller of the interpreter — the top-level fold driving
//! `compile`, the public `uncons`, and the internal single-step used to
//! interpret `MapOutput`/`FlatMapOutput`/`Translate`/`StepLeg` — wants
//! different things to happen at those four junctures. Factoring them out
//! as a trait keeps the tree-walking logic in one place and the
//! per-context behavior in another, the same separation `StackInterpreter`
//! draws between "what instruction is this" and "what does the caller do
//! with its result".

use crate::algebra::{Erased, Repr};
use crate::chunk::Chunk;
use crate::error::Error;
use crate::scope::{Scope, ScopeId};
use std::sync::Arc;

/// What the trampoline does next after a `Runner` hook returns.
pub(crate) enum Step<T> {
    /// Keep interpreting `repr` in `scope`.
    Continue(Repr, Scope),
    /// Stop; this is the runner's final answer.
    Done(T),
}

pub(crate) trait Runner {
    type Output;

    fn done(&mut self, scope: Scope, result: Erased) -> Step<Self::Output>;
    fn out(&mut self, chunk: Chunk<Erased>, scope: Scope, tail: Repr) -> Step<Self::Output>;
    fn interrupted(&mut self, scope: ScopeId, deferred: Option<Arc<Error>>) -> Step<Self::Output>;
    fn fail(&mut self, err: Error) -> Step<Self::Output>;
}

/// What driving a `Pull` to completion via [`FoldRunner`] produced: either
/// an ordinary finish (with the carry value still erased, to be downcast
/// by the caller) or an interruption with no deferred error to surface —
/// distinguished from [`crate::error::Error`] because per spec §8
/// ("Interruption scenario") compiling an interrupted pull with no
/// deferred error is not itself a failure; it just means less output than
/// a full run would have produced.
pub(crate) enum FoldOutcome<Acc> {
    Completed(Acc, Erased),
    Interrupted(Acc),
}

/// Drives a `Pull` all the way to its final result, folding every output
/// chunk into an accumulator as it goes. Used by `compile`.
pub(crate) struct FoldRunner<Acc, F> {
    pub(crate) acc: Acc,
    pub(crate) fold: F,
}

impl<Acc, F> Runner for FoldRunner<Acc, F>
where
    Acc: Default,
    F: FnMut(&mut Acc, Chunk<Erased>),
{
    type Output = crate::error::Result<FoldOutcome<Acc>>;

    fn done(&mut self, _scope: Scope, result: Erased) -> Step<Self::Output> {
        Step::Done(Ok(FoldOutcome::Completed(std::mem::take(&mut self.acc), result)))
    }

    fn out(&mut self, chunk: Chunk<Erased>, scope: Scope, tail: Repr) -> Step<Self::Output> {
        (self.fold)(&mut self.acc, chunk);
        Step::Continue(tail, scope)
    }

    fn interrupted(&mut self, _scope: ScopeId, deferred: Option<Arc<Error>>) -> Step<Self::Output> {
        Step::Done(match deferred {
            Some(e) => Err(Arc::try_unwrap(e).unwrap_or_else(|e| Error::invariant(e.to_string()))),
            None => Ok(FoldOutcome::Interrupted(std::mem::take(&mut self.acc))),
        })
    }

    fn fail(&mut self, err: Error) -> Step<Self::Output> {
        Step::Done(Err(err))
    }
}

/// What stepping a source once for `uncons`/`stepLeg`/`flatMapOutput`
/// produced. Unlike a plain `Result`, interruption and failure are kept as
/// distinct cases rather than folded into "no more chunks": per spec
/// §4.3 ("Uncons... on interrupted/fail: forward to outer"), those must
/// terminate the *enclosing* pull rather than being handed to the
/// continuation as an ordinary `Option`/`Result` value.
pub(crate) enum UnconsOutcome {
    Some(Chunk<Erased>, Repr, Scope),
    None(Scope),
    Fail(Error),
    Interrupted(ScopeId, Option<Arc<Error>>),
}

/// Pulls exactly one chunk (or observes end-of-input) from a `Pull`
/// without otherwise consuming it further. The original result value is
/// not part of `uncons`'s own result type, so it's dropped when the
/// source is exhausted — the same way fs2's `uncons` does.
pub(crate) struct UnconsRunner;

impl Runner for UnconsRunner {
    type Output = UnconsOutcome;

    fn done(&mut self, scope: Scope, _result: Erased) -> Step<Self::Output> {
        Step::Done(UnconsOutcome::None(scope))
    }

    fn out(&mut self, chunk: Chunk<Erased>, scope: Scope, tail: Repr) -> Step<Self::Output> {
        Step::Done(UnconsOutcome::Some(chunk, tail, scope))
    }

    fn interrupted(&mut self, scope: ScopeId, deferred: Option<Arc<Error>>) -> Step<Self::Output> {
        Step::Done(UnconsOutcome::Interrupted(scope, deferred))
    }

    fn fail(&mut self, err: Error) -> Step<Self::Output> {
        Step::Done(UnconsOutcome::Fail(err))
    }
}

/// What a single internal step of a source pull produced. Unlike
/// [`UnconsRunner`], this preserves the source's eventual final result —
/// needed by `MapOutput`/`FlatMapOutput`/`Translate`, whose own result
/// type is the same as their source's.
pub(crate) enum StepOutcome {
    Output(Chunk<Erased>, Repr, Scope),
    Done(Erased, Scope),
    Fail(Error),
    Interrupted(ScopeId, Option<Arc<Error>>),
}

pub(crate) struct StepRunner;

impl Runner for StepRunner {
    type Output = StepOutcome;

    fn done(&mut self, scope: Scope, result: Erased) -> Step<Self::Output> {
        Step::Done(StepOutcome::Done(result, scope))
    }

    fn out(&mut self, chunk: Chunk<Erased>, scope: Scope, tail: Repr) -> Step<Self::Output> {
        Step::Done(StepOutcome::Output(chunk, tail, scope))
    }

    fn interrupted(&mut self, scope: ScopeId, deferred: Option<Arc<Error>>) -> Step<Self::Output> {
        Step::Done(StepOutcome::Interrupted(scope, deferred))
    }

    fn fail(&mut self, err: Error) -> Step<Self::Output> {
        Step::Done(StepOutcome::Fail(err))
    }
}
