//! The public algebra: `Pull<O, C>`, a typed façade over the erased
//! `Repr` tree in `algebra.rs`.
//!
//! Every constructor here either builds a bare `Repr` directly (when the
//! interpreter already produces exactly the erased shape the typed
//! signature promises, e.g. `output1`) or wraps the raw `Action` in one
//! `Bind` whose continuation downcasts the interpreter's erased result
//! and re-erases the typed one (`bridge`, below) — the single seam where
//! `Box<dyn Any>` erasure is bridged back to `O`/`C` (SPEC_FULL §0). User
//! code never sees `Erased` or `Repr`.

use crate::algebra::{
    downcast, downcast_arc, erase, erase_arc, Action, Erased, ErasedArc, ErasedFlatMap, ErasedMap,
    ErasedTranslate, Repr, Terminal,
};
use crate::chunk::Chunk;
use crate::error::{Error, Result};
use crate::fuse;
use crate::future::BoxFuture;
use crate::interpret::{go, ExtendCtl, Translators};
use crate::runner::{FoldOutcome, FoldRunner};
use crate::scope::{ExitCase, Scope, ScopeId};
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

/// A streaming computation: emits chunks of `O` as it runs, and finally
/// produces a `C`. Compiling a `Pull` (`compile`) drives it to completion
/// in a fresh or caller-supplied scope; `stream`/`stream_no_scope` are the
/// entry points a higher-level stream type would build on.
pub struct Pull<O, C> {
    pub(crate) repr: Repr,
    _marker: PhantomData<fn() -> (O, C)>,
}

/// What [`Pull::loop_`]'s step function returns: either another seed to
/// keep going with, or the final result.
pub enum LoopAction<S, C> {
    Continue(S),
    Done(C),
}

/// A uniform effect adapter, applied to every `Eval`/`Acquire` future
/// reached while interpreting beneath a [`Pull::translate`] (spec §4.3
/// `Translate`). Generic over the future's output type so one adapter
/// value works for every node it passes through, the Rust-native
/// realization of the source spec's `G ~> F` natural transformation
/// (SPEC_FULL §0: "transforms futures of the same shape").
pub trait Translate: Send + Sync + 'static {
    fn adapt<T: Send + 'static>(
        &self,
        fut: BoxFuture<'static, Result<T>>,
    ) -> BoxFuture<'static, Result<T>>;
}

/// Wraps one `Action` in a `Bind` whose continuation downcasts the
/// interpreter's erased result as `A` and re-erases it as `B` — the
/// bridge between the type-erased `Repr` tree and a typed `Pull<_, B>`.
fn bridge<A, B>(action: Action, f: impl FnOnce(A) -> B + Send + 'static) -> Repr
where
    A: Send + 'static,
    B: Send + 'static,
{
    Repr::Bind(
        Box::new(Repr::Action(action)),
        Box::new(move |t: Terminal| match t {
            Terminal::Succeeded(v) => Terminal::Succeeded(erase(f(downcast::<A>(v)))).into_repr(),
            other => other.into_repr(),
        }),
    )
}

impl<O, C> Pull<O, C> {
    pub(crate) fn from_repr(repr: Repr) -> Pull<O, C> {
        Pull { repr, _marker: PhantomData }
    }

    pub(crate) fn into_repr(self) -> Repr {
        self.repr
    }

    // ---- Construction (spec §6) ----

    /// A pull that emits nothing and succeeds with `c`.
    pub fn pure(c: C) -> Pull<O, C>
    where
        C: Send + 'static,
    {
        Pull::from_repr(Repr::succeeded(erase(c)))
    }

    /// Runs `fa` in the ambient effect; a failure surfaces as `Fail`.
    pub fn eval(fa: impl Future<Output = Result<C>> + Send + 'static) -> Pull<O, C>
    where
        C: Send + 'static,
    {
        let fut: BoxFuture<'static, Result<Erased>> = Box::pin(async move { fa.await.map(erase) });
        Pull::from_repr(bridge::<C, C>(Action::Eval(fut), |c| c))
    }

    /// Like [`Pull::eval`], but a failure is carried as `Err` in the
    /// result rather than failing the pull (spec §6, `attemptEval`).
    pub fn attempt_eval(
        fa: impl Future<Output = Result<C>> + Send + 'static,
    ) -> Pull<O, std::result::Result<C, Error>>
    where
        C: Send + 'static,
    {
        let fut: BoxFuture<'static, Result<Erased>> = Box::pin(async move { Ok(erase(fa.await)) });
        Pull::from_repr(bridge::<std::result::Result<C, Error>, std::result::Result<C, Error>>(
            Action::Eval(fut),
            |r| r,
        ))
    }

    /// Immediately fails with `err`.
    pub fn raise_error(err: impl Into<Error>) -> Pull<O, C> {
        Pull::from_repr(Repr::fail(err.into()))
    }

    /// Runs `acquire` then hands its resource to `use_`, running `release`
    /// with the resulting exit case either way (spec §6, `bracketCase`).
    pub fn bracket_case<R, AcqFut, Use, Rel>(acquire: AcqFut, use_: Use, release: Rel) -> Pull<O, C>
    where
        R: Send + Sync + 'static,
        AcqFut: Future<Output = Result<R>> + Send + 'static,
        Use: FnOnce(Arc<R>) -> Pull<O, C> + Send + 'static,
        Rel: Fn(Arc<R>, ExitCase) -> BoxFuture<'static, Result<()>> + Send + Sync + 'static,
        O: Send + 'static,
        C: Send + 'static,
    {
        Pull::acquire(acquire, release).flat_map(use_)
    }

    /// Defers building the returned pull until interpretation reaches this
    /// point, so side effects in `thunk` run at interpretation time rather
    /// than construction time.
    pub fn suspend(thunk: impl FnOnce() -> Pull<O, C> + Send + 'static) -> Pull<O, C>
    where
        C: Send + 'static,
    {
        Pull::<O, ()>::pure(()).flat_map(move |_| thunk())
    }

    /// `Ok(c) => pure(c)`, `Err(e) => raise_error(e)`.
    pub fn from_either(res: std::result::Result<C, Error>) -> Pull<O, C>
    where
        C: Send + 'static,
    {
        match res {
            Ok(c) => Pull::pure(c),
            Err(e) => Pull::raise_error(e),
        }
    }

    /// Repeatedly calls `f` on a running seed until it returns `Done`
    /// (SPEC_FULL §11: built from `flat_map`, not a new algebra node).
    pub fn loop_<S>(seed: S, f: impl Fn(S) -> Pull<O, LoopAction<S, C>> + Send + Sync + 'static) -> Pull<O, C>
    where
        S: Send + 'static,
        O: Send + 'static,
        C: Send + 'static,
    {
        fn step<O, S, C>(
            seed: S,
            f: Arc<dyn Fn(S) -> Pull<O, LoopAction<S, C>> + Send + Sync>,
        ) -> Pull<O, C>
        where
            O: Send + 'static,
            S: Send + 'static,
            C: Send + 'static,
        {
            let f2 = f.clone();
            f(seed).flat_map(move |action| match action {
                LoopAction::Continue(next) => step(next, f2),
                LoopAction::Done(c) => Pull::pure(c),
            })
        }
        step(seed, Arc::new(f))
    }

    /// Wraps `self` in a fresh child scope, for use as the top of a
    /// freshly-minted stream (spec §6, "wraps the pull in a fresh ...
    /// scope"). The scope is interruptible, since a top-level stream is
    /// exactly what `Stream::interruptWhen` targets.
    pub fn stream(self) -> Pull<O, C>
    where
        O: Send + 'static,
        C: Send + 'static,
    {
        Pull::from_repr(Repr::Action(Action::InScope { body: Box::new(self.repr), use_interruption: true }))
    }

    /// Like [`Pull::stream`], for the case where the caller already
    /// introduced a scope of its own.
    pub fn stream_no_scope(self) -> Pull<O, C> {
        self
    }

    /// Opens a scope around `self` the same way [`Pull::stream`] does;
    /// whether it is closed normally or held open past this `compile` call
    /// is controlled entirely by the `extend_last_top_level_scope` flag
    /// passed to [`Pull::compile`] (spec §9 "Extended top-level scope" —
    /// see `DESIGN.md` for why this needs no separate algebra node).
    pub fn extend_scope_to(self) -> Pull<O, C>
    where
        O: Send + 'static,
        C: Send + 'static,
    {
        self.stream()
    }

    /// Opens an interruptible scope around `self`, for `Stream::interruptWhen`
    /// to target with [`Pull::interrupt_when`].
    pub fn interrupt_scope(self) -> Pull<O, C>
    where
        O: Send + 'static,
        C: Send + 'static,
    {
        self.stream()
    }

    // ---- Combinators (spec §6) ----

    /// Sequences `self` then `f`'s result, threading `self`'s carry value;
    /// a `Fail`/`Interrupted` from `self` short-circuits without running
    /// `f` (the continuation only ever fires on `Succeeded` — see
    /// `algebra::Continuation`'s doc comment).
    pub fn flat_map<D>(self, f: impl FnOnce(C) -> Pull<O, D> + Send + 'static) -> Pull<O, D>
    where
        C: Send + 'static,
        D: Send + 'static,
    {
        let repr = Repr::Bind(
            Box::new(self.repr),
            Box::new(move |t: Terminal| match t {
                Terminal::Succeeded(v) => f(downcast::<C>(v)).repr,
                other => other.into_repr(),
            }),
        );
        Pull::from_repr(repr)
    }

    pub fn map<D>(self, f: impl FnOnce(C) -> D + Send + 'static) -> Pull<O, D>
    where
        C: Send + 'static,
        D: Send + 'static,
    {
        self.flat_map(move |c| Pull::pure(f(c)))
    }

    /// Discards `self`'s carry in favor of `value`.
    pub fn as_<D>(self, value: D) -> Pull<O, D>
    where
        C: Send + 'static,
        D: Send + 'static,
    {
        self.map(move |_| value)
    }

    pub fn void(self) -> Pull<O, ()>
    where
        C: Send + 'static,
    {
        self.as_(())
    }

    /// Sequential composition, discarding `self`'s carry — `self`'s
    /// `Fail`/`Interrupted` still short-circuits `next` (spec §6, `>>`).
    pub fn then<D>(self, next: Pull<O, D>) -> Pull<O, D>
    where
        C: Send + 'static,
        D: Send + 'static,
    {
        self.flat_map(move |_| next)
    }

    /// `Fail` is caught and reported as `Err`; `Interrupted` is not caught
    /// (spec §7, `attempt` "never fails").
    pub fn attempt(self) -> Pull<O, std::result::Result<C, Error>>
    where
        C: Send + 'static,
    {
        let repr = Repr::Bind(
            Box::new(self.repr),
            Box::new(|t: Terminal| match t {
                Terminal::Succeeded(v) => Terminal::Succeeded(erase(Ok(downcast::<C>(v)))).into_repr(),
                Terminal::Fail(e) => Terminal::Succeeded(erase(Err(e))).into_repr(),
                other @ Terminal::Interrupted { .. } => other.into_repr(),
            }),
        );
        Pull::from_repr(repr)
    }

    /// Catches `Fail` (not `Interrupted`) and recovers via `h` (spec §7).
    pub fn handle_error_with(self, h: impl FnOnce(Error) -> Pull<O, C> + Send + 'static) -> Pull<O, C> {
        let repr = Repr::Bind(
            Box::new(self.repr),
            Box::new(move |t: Terminal| match t {
                Terminal::Fail(e) => h(e).repr,
                other => other.into_repr(),
            }),
        );
        Pull::from_repr(repr)
    }

    /// Runs `next` after `self` terminates, whichever way that happened,
    /// then resumes `self`'s original outcome — composing `next`'s own
    /// failure in rather than letting it silently replace or get dropped
    /// (spec §7, "errors ... never dropped").
    pub fn on_complete(self, next: impl FnOnce() -> Pull<O, ()> + Send + 'static) -> Pull<O, C>
    where
        C: Send + 'static,
    {
        let repr = Repr::Bind(
            Box::new(self.repr),
            Box::new(move |original: Terminal| {
                let tail = next().repr;
                Repr::Bind(
                    Box::new(tail),
                    Box::new(move |after: Terminal| resume_after(original, after)),
                )
            }),
        );
        Pull::from_repr(repr)
    }

    // ---- Stepping (spec §6) ----

    /// Steps one chunk (or observes end-of-input) off `self` without
    /// closing its scope.
    pub fn uncons(self) -> Pull<O, Option<(Chunk<O>, Pull<O, C>)>>
    where
        O: Send + 'static,
        C: Send + 'static,
    {
        let action = Action::Uncons { source: Box::new(self.repr) };
        Pull::from_repr(bridge::<Option<(Chunk<Erased>, Repr)>, Option<(Chunk<O>, Pull<O, C>)>>(
            action,
            |opt| opt.map(|(chunk, tail)| (chunk.map_owned(downcast::<O>), Pull::from_repr(tail))),
        ))
    }

    /// Like [`Pull::uncons`], but splits the returned chunk to at most `n`
    /// elements, pushing the remainder back in front of the tail
    /// (SPEC_FULL §11, `unconsLimit`).
    pub fn uncons_limit(self, n: usize) -> Pull<O, Option<(Chunk<O>, Pull<O, C>)>>
    where
        O: Clone + Send + 'static,
        C: Send + 'static,
    {
        self.uncons().map(move |opt| {
            opt.map(|(chunk, tail)| {
                if chunk.len() > n {
                    let (head, rest) = chunk.split_at(n);
                    let tail = match rest {
                        Some(r) => Pull::output(r).then(tail),
                        None => tail,
                    };
                    (head, tail)
                } else {
                    (chunk, tail)
                }
            })
        })
    }

    /// Steps one chunk off `self` while it is an open "leg" rooted at
    /// `scope`, resuming the *caller's* scope afterward rather than the
    /// one the chunk was produced in (spec §4.3, `stepLeg`).
    pub fn step_leg(self, scope: Scope) -> Pull<O, Option<(Chunk<O>, ScopeId, Pull<O, C>)>>
    where
        O: Send + 'static,
        C: Send + 'static,
    {
        let action = Action::StepLeg { leg: Box::new(self.repr), scope };
        Pull::from_repr(bridge::<Option<(Chunk<Erased>, ScopeId, Repr)>, Option<(Chunk<O>, ScopeId, Pull<O, C>)>>(
            action,
            |opt| opt.map(|(chunk, sid, tail)| (chunk.map_owned(downcast::<O>), sid, Pull::from_repr(tail))),
        ))
    }

    // ---- Output fusion (spec §4.4) ----

    /// Maps every emitted element through `f`, fusing with an adjacent
    /// `map_output`/`translate` at construction time where possible.
    pub fn map_output<P>(self, f: impl Fn(O) -> P + Send + Sync + 'static) -> Pull<P, C>
    where
        O: Send + 'static,
        P: Send + 'static,
    {
        let erased_f: ErasedMap = Arc::new(move |e: Erased| erase(f(downcast::<O>(e))));
        Pull::from_repr(fuse::map_output(self.repr, erased_f))
    }

    /// Replaces every emitted element with the (unit-carry) sub-pull `f`
    /// produces for it, concatenating their outputs (spec §4.3,
    /// `FlatMapOutput`, including the bounded-stack singleton fast path).
    pub fn flat_map_output<P>(self, f: impl Fn(O) -> Pull<P, ()> + Send + Sync + 'static) -> Pull<P, C>
    where
        O: Send + 'static,
        P: Send + 'static,
    {
        let erased_f: ErasedFlatMap = Arc::new(move |e: Erased| f(downcast::<O>(e)).repr);
        Pull::from_repr(fuse::flat_map_output(self.repr, erased_f))
    }

    /// Reinterprets every `Eval`/`Acquire` effect reached while
    /// interpreting `self` through `adapter` (spec §4.3, `Translate`).
    pub fn translate<A: Translate>(self, adapter: A) -> Pull<O, C> {
        let adapter = Arc::new(adapter);
        let erased_adapt: ErasedTranslate = Arc::new(move |fut| adapter.adapt::<Erased>(fut));
        Pull::from_repr(fuse::translate(self.repr, erased_adapt))
    }

    // ---- Interpretation (spec §4.5, §6) ----

    /// Drives `self` to completion in `init_scope`, folding each emitted
    /// chunk into `init` via `fold`. If `extend_last_top_level_scope` is
    /// set and `self` ends by closing a direct child of the root (as
    /// `stream`/`extend_scope_to` open), that child is left open instead
    /// of closed — the caller is responsible for eventually closing it
    /// (see `DESIGN.md`, "extend_last_top_level_scope").
    pub async fn compile<Acc>(
        self,
        init_scope: Scope,
        extend_last_top_level_scope: bool,
        init: Acc,
        mut fold: impl FnMut(&mut Acc, Chunk<O>) + Send + 'static,
    ) -> Result<Acc>
    where
        O: Send + 'static,
        C: Send + 'static,
        Acc: Send + 'static,
    {
        let extend = ExtendCtl::new(extend_last_top_level_scope);
        let mut runner = FoldRunner {
            acc: init,
            fold: move |acc: &mut Acc, chunk: Chunk<Erased>| {
                fold(acc, chunk.map_owned(downcast::<O>));
            },
        };
        let outcome = go(self.repr, init_scope.clone(), Translators::default(), extend.clone(), &mut runner).await;
        let held = extend.into_held();

        let close_if_needed = |exit: ExitCase| {
            let init_scope = init_scope.clone();
            async move {
                if held.is_some() {
                    return Ok(());
                }
                if init_scope.is_root() {
                    init_scope.close_root(exit).await
                } else {
                    init_scope.close(exit).await
                }
            }
        };

        match outcome {
            Ok(FoldOutcome::Completed(acc, carry)) => {
                let _: C = downcast(carry);
                close_if_needed(ExitCase::Succeeded).await?;
                Ok(acc)
            }
            Ok(FoldOutcome::Interrupted(acc)) => {
                close_if_needed(ExitCase::Canceled).await?;
                Ok(acc)
            }
            Err(e) => {
                let close_err = close_if_needed(ExitCase::Errored(Arc::new(Error::invariant(e.to_string())))).await.err();
                match Error::compose(Some(e), close_err) {
                    Some(composed) => Err(composed),
                    None => unreachable!("the original error is always `Some`"),
                }
            }
        }
    }
}

/// Constructors whose result type doesn't depend on a caller-chosen `C` —
/// kept in a narrower `impl` block keyed to `Pull<O, ()>` so `C` is never
/// left unconstrained at a call site like `Pull::done()` (only `O` needs
/// inferring, same as for any of these). An inherent `impl` block's
/// functions may return any type regardless of the block's own
/// parameters, so this is just a matter of which block a function lives
/// in, not a change to what any of them do.
impl<O> Pull<O, ()> {
    /// A pull that emits nothing and succeeds with `()`.
    pub fn done() -> Pull<O, ()> {
        Pull::from_repr(Repr::succeeded(erase(())))
    }

    /// Emits a single value as a one-element chunk.
    pub fn output1(o: O) -> Pull<O, ()>
    where
        O: Send + 'static,
    {
        Pull::from_repr(Repr::Action(Action::Output(Chunk::singleton(erase(o)))))
    }

    /// Emits `chunk` as a single unit.
    pub fn output(chunk: Chunk<O>) -> Pull<O, ()>
    where
        O: Send + 'static,
    {
        Pull::from_repr(Repr::Action(Action::Output(chunk.map_owned(erase))))
    }

    /// Discards `fa`'s result on success; used for fire-and-forget effects
    /// (SPEC_FULL §11, `eval_`).
    pub fn eval_<T>(fa: impl Future<Output = Result<T>> + Send + 'static) -> Pull<O, ()>
    where
        T: Send + 'static,
    {
        Pull::<O, T>::eval(fa).void()
    }

    /// Runs `acquire` (cancellable by the ambient effect if it hasn't yet
    /// registered its finalizer), and registers `release` as a finalizer
    /// on the current scope if it succeeds.
    pub fn acquire_cancelable<R, AcqFut, Rel>(acquire: AcqFut, release: Rel) -> Pull<O, Arc<R>>
    where
        R: Send + Sync + 'static,
        AcqFut: Future<Output = Result<R>> + Send + 'static,
        Rel: Fn(Arc<R>, ExitCase) -> BoxFuture<'static, Result<()>> + Send + Sync + 'static,
    {
        Pull::<O, ()>::acquire_impl(acquire, release, true)
    }

    /// Like [`Pull::acquire_cancelable`], but `acquire` runs under the
    /// ambient effect's uncancellable mask.
    pub fn acquire<R, AcqFut, Rel>(acquire: AcqFut, release: Rel) -> Pull<O, Arc<R>>
    where
        R: Send + Sync + 'static,
        AcqFut: Future<Output = Result<R>> + Send + 'static,
        Rel: Fn(Arc<R>, ExitCase) -> BoxFuture<'static, Result<()>> + Send + Sync + 'static,
    {
        Pull::<O, ()>::acquire_impl(acquire, release, false)
    }

    fn acquire_impl<R, AcqFut, Rel>(acquire: AcqFut, release: Rel, cancelable: bool) -> Pull<O, Arc<R>>
    where
        R: Send + Sync + 'static,
        AcqFut: Future<Output = Result<R>> + Send + 'static,
        Rel: Fn(Arc<R>, ExitCase) -> BoxFuture<'static, Result<()>> + Send + Sync + 'static,
    {
        let acquire_erased: BoxFuture<'static, Result<ErasedArc>> =
            Box::pin(async move { acquire.await.map(erase_arc) });
        let release_erased: crate::algebra::ErasedRelease =
            Arc::new(move |arc: ErasedArc, exit: ExitCase| release(downcast_arc::<R>(arc), exit));
        let action = Action::Acquire { acquire: acquire_erased, release: release_erased, cancelable };
        Pull::from_repr(bridge::<ErasedArc, Arc<R>>(action, downcast_arc::<R>))
    }

    /// The current innermost scope of interpretation.
    pub fn get_scope() -> Pull<O, Scope> {
        Pull::from_repr(bridge::<Scope, Scope>(Action::GetScope, |s| s))
    }

    /// Registers a watcher that interrupts the current scope once `signal`
    /// resolves; the returned handle is joined (or simply dropped) by
    /// whichever scope eventually closes it.
    pub fn interrupt_when(
        signal: impl Future<Output = Result<()>> + Send + 'static,
    ) -> Pull<O, tokio::task::JoinHandle<()>> {
        let action = Action::InterruptWhen { signal: Box::pin(signal) };
        Pull::from_repr(bridge::<tokio::task::JoinHandle<()>, tokio::task::JoinHandle<()>>(action, |h| h))
    }

    /// Wraps `self` as a [`crate::TimedPull`], the entry point for
    /// resettable-timeout chunk-by-chunk stepping (spec §6, "Timed
    /// pulling").
    pub fn timed(self, scope: Scope) -> crate::timed::TimedPull<O>
    where
        O: Send + 'static,
    {
        crate::timed::TimedPull::new(self, scope)
    }
}

/// Resumes `original` after a `next`/finalizer-style tail ran, composing
/// in a failure from that tail rather than letting it replace or vanish.
fn resume_after(original: Terminal, after: Terminal) -> Repr {
    match (original, after) {
        (Terminal::Fail(e1), Terminal::Fail(e2)) => Repr::fail(Error::Composite(vec![e1, e2])),
        (Terminal::Fail(e1), _) => Repr::fail(e1),
        (original, Terminal::Fail(e2)) => {
            let _ = original;
            Repr::fail(e2)
        }
        (original, _) => original.into_repr(),
    }
}

impl<O, C, D> std::ops::Shr<Pull<O, D>> for Pull<O, C>
where
    O: Send + 'static,
    C: Send + 'static,
    D: Send + 'static,
{
    type Output = Pull<O, D>;

    fn shr(self, rhs: Pull<O, D>) -> Pull<O, D> {
        self.then(rhs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scope::Scope;

    async fn collect<C: Send + 'static>(p: Pull<i32, C>) -> Vec<i32> {
        p.compile(Scope::root(), false, Vec::new(), |acc: &mut Vec<i32>, c| acc.extend(c.to_vec()))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn left_identity() {
        let direct: Pull<i32, i32> = Pull::pure(42);
        let via_bind = Pull::<i32, i32>::pure(41).flat_map(|n| Pull::pure(n + 1));
        assert_eq!(collect(direct.flat_map(Pull::output1)).await, collect(via_bind.flat_map(Pull::output1)).await);
    }

    #[tokio::test]
    async fn right_identity() {
        let p = Pull::<i32, i32>::pure(9).flat_map(Pull::pure);
        assert_eq!(collect(p.flat_map(Pull::output1)).await, vec![9]);
    }

    #[tokio::test]
    async fn chunked_emission_sums_or_concatenates() {
        let p = Pull::<i32, ()>::output(Chunk::from_vec(vec![1, 2, 3]).unwrap())
            .then(Pull::output(Chunk::from_vec(vec![4, 5]).unwrap()));
        let total = p.compile(Scope::root(), false, 0usize, |acc, c| *acc += c.len()).await.unwrap();
        assert_eq!(total, 5);

        let p2 = Pull::<i32, ()>::output(Chunk::from_vec(vec![1, 2, 3]).unwrap())
            .then(Pull::output(Chunk::from_vec(vec![4, 5]).unwrap()));
        assert_eq!(collect(p2).await, vec![1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn error_is_caught_by_handle_error_with() {
        let p: Pull<i32, ()> =
            Pull::<i32, ()>::raise_error(Error::invariant("boom")).handle_error_with(|_e| Pull::output1(42));
        assert_eq!(collect(p).await, vec![42]);
    }

    #[tokio::test]
    async fn map_output_doubles_every_element() {
        let p = Pull::<i32, ()>::output(Chunk::from_vec(vec![1, 2, 3]).unwrap()).map_output(|n| n * 2);
        assert_eq!(collect(p).await, vec![2, 4, 6]);
    }
}
