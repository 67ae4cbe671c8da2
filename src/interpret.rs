//! The trampolined interpreter.
//!
//! `go` reduces a `Repr` to its `View` (§`view.rs`), dispatches the
//! exposed instruction, and loops — rather than recursing through the
//! whole tree on the Rust call stack — so a `Pull` with millions of
//! sequenced steps compiles in bounded stack space (spec §4.1, "bounded
//! interpreter stack"). Composite nodes (`MapOutput`, `Translate`,
//! `FlatMapOutput`, `Uncons`, `StepLeg`, `InScope`) each take one inner
//! step via a dedicated `Runner` and fold the result back into the outer
//! loop's state, so nesting never grows the async call stack either.
//!
//! `InScope` closes its child scope synchronously, inline in this
//! module's own dispatch, rather than by synthesizing a separate
//! "close scope" tree node the way the distilled spec's Scala source
//! does. A `Bind` continuation in this algebra only ever runs on a
//! `Succeeded` result (see `view.rs`) — there is no way to hang a
//! "run this regardless of how the body ended" step off of a `Bind` the
//! way a `flatMap`-with-redeem can in the source material. Closing the
//! child scope as a direct `.await` in the `Done`/`Fail`/`Interrupted`
//! arms below gets the same guarantee (the scope is always torn down
//! before its `StepOutcome` is handed back to the caller) without needing
//! that extra node kind. See `DESIGN.md`.

use crate::algebra::{erase, Action, Erased, ErasedTranslate, Repr, Terminal};
use crate::chunk::Chunk;
use crate::error::{Error, Result};
use crate::future::BoxFuture;
use crate::runner::{Runner, Step, StepOutcome, StepRunner, UnconsOutcome, UnconsRunner};
use crate::scope::{ExitCase, Interruption, Scope, ScopeId};
use crate::view::{view, View};
use futures::FutureExt;
use std::sync::Arc;

/// Effect adapters currently in scope, innermost last, applied to every
/// `Eval`/`Acquire` effect reached while interpreting beneath a
/// `Translate` node.
#[derive(Clone, Default)]
pub(crate) struct Translators(Arc<Vec<ErasedTranslate>>);

impl Translators {
    fn push(&self, adapt: ErasedTranslate) -> Translators {
        let mut v = (*self.0).clone();
        v.push(adapt);
        Translators(Arc::new(v))
    }

    fn wrap(&self, fut: BoxFuture<'static, Result<Erased>>) -> BoxFuture<'static, Result<Erased>> {
        self.0.iter().fold(fut, |fut, adapt| adapt(fut))
    }
}

/// Tracks the single optional "held open" scope from `extendScopeTo`
/// (spec §9). Cloning shares the same held slot — every nested
/// interpretation of the same `compile` call must see the same one.
#[derive(Clone)]
pub(crate) struct ExtendCtl {
    enabled: bool,
    held: Arc<parking_lot::Mutex<Option<Scope>>>,
}

impl ExtendCtl {
    pub(crate) fn new(enabled: bool) -> ExtendCtl {
        ExtendCtl { enabled, held: Arc::new(parking_lot::Mutex::new(None)) }
    }

    fn take_held(&self) -> Option<Scope> {
        self.held.lock().take()
    }

    /// `true` if this scope is the one `extendScopeTo` should hold open
    /// on success: a direct child of the root, while extension is on.
    /// "The current top-level scope" in spec §4.3's `CloseScope` wording.
    fn enabled_for(&self, scope: &Scope) -> bool {
        self.enabled && scope.level() == 1
    }

    /// Stashes `scope` as the new held extended scope, returning whatever
    /// was held before (which the caller must close).
    fn stash(&self, scope: Scope) -> Option<Scope> {
        self.held.lock().replace(scope)
    }

    /// Drains whatever is currently held, for the top-level driver to
    /// return to its caller once interpretation finishes.
    pub(crate) fn into_held(self) -> Option<Scope> {
        self.held.lock().take()
    }
}

/// Every terminal (`Fail`/`Interrupted`) `step_action` observes is routed
/// through the pending continuation `k` before it ever reaches here, the
/// same way `view()`'s own trampoline only hands a bare `Terminal` to
/// `go`'s runner dispatch when there is truly nothing left to continue
/// (spec §4.3). So `step_action` only ever produces these two shapes.
enum ActionOutcome {
    Next(Repr, Scope),
    Output(Chunk<Erased>, Repr, Scope),
}

/// Runs `repr` in `scope` to completion as seen by `runner`.
pub(crate) fn go<'a, R>(
    repr: Repr,
    scope: Scope,
    translators: Translators,
    extend: ExtendCtl,
    runner: &'a mut R,
) -> BoxFuture<'a, R::Output>
where
    R: Runner + Send,
    R::Output: Send + 'a,
{
    Box::pin(async move {
        let mut repr = repr;
        let mut scope = scope;
        loop {
            let outcome = match view(repr) {
                View::Result(Terminal::Succeeded(v)) => match runner.done(scope.clone(), v) {
                    Step::Done(out) => return out,
                    Step::Continue(r, s) => ActionOutcome::Next(r, s),
                },
                View::Result(Terminal::Fail(e)) => match runner.fail(e) {
                    Step::Done(out) => return out,
                    Step::Continue(r, s) => ActionOutcome::Next(r, s),
                },
                View::Result(Terminal::Interrupted { scope: sid, deferred }) => {
                    match runner.interrupted(sid, deferred) {
                        Step::Done(out) => return out,
                        Step::Continue(r, s) => ActionOutcome::Next(r, s),
                    }
                }
                View::Action(action, k) => {
                    // Interrupt guard (spec §4.3): checked right before
                    // actually running an action, not merely when `repr`
                    // happened to already be a bare `Action` on entry. Skips
                    // running the action but still feeds the pending
                    // continuation `k` ("skip straight to the
                    // continuation"), the same way a run action's own
                    // failure/interruption must (see `step_action`) — it
                    // does not go straight to `runner`, or a continuation
                    // like `on_complete`'s finalizer would never run.
                    if let Some(cause) = scope.is_interrupted() {
                        let (id, deferred) = match cause {
                            Interruption::By(id, deferred) => (id, deferred),
                            Interruption::Errored(e) => (scope.id(), Some(e)),
                        };
                        ActionOutcome::Next(k(Terminal::Interrupted { scope: id, deferred }), scope.clone())
                    } else {
                        step_action(action, k, scope.clone(), translators.clone(), extend.clone()).await
                    }
                }
            };
            match outcome {
                ActionOutcome::Next(r, s) => {
                    repr = r;
                    scope = s;
                }
                ActionOutcome::Output(chunk, tail, s) => match runner.out(chunk, s.clone(), tail) {
                    Step::Done(out) => return out,
                    Step::Continue(r, s) => {
                        repr = r;
                        scope = s;
                    }
                },
            }
        }
    })
}

async fn step_action(
    action: Action,
    k: crate::algebra::Continuation,
    scope: Scope,
    translators: Translators,
    extend: ExtendCtl,
) -> ActionOutcome {
    match action {
        Action::Output(chunk) => ActionOutcome::Output(chunk, k(Terminal::Succeeded(erase(()))), scope),

        Action::Eval(fut) => match translators.wrap(fut).await {
            Ok(v) => ActionOutcome::Next(k(Terminal::Succeeded(v)), scope),
            Err(e) => ActionOutcome::Next(k(Terminal::Fail(e)), scope),
        },

        Action::Acquire { acquire, release, cancelable } => {
            // `scope.acquire_resource` wraps whatever it's given in its own
            // `Arc` to share between the finalizer and the returned value;
            // here that "whatever" is itself an `ErasedArc`, so the extra
            // layer is just `Arc<ErasedArc>` — unwrapped below by cloning
            // the inner `Arc` out, not by taking ownership of it.
            let acquire_erased: BoxFuture<'static, Result<Erased>> =
                Box::pin(async move { acquire.await.map(erase) });
            let wrapped = translators.wrap(acquire_erased);
            let acquire_typed: BoxFuture<'static, Result<crate::algebra::ErasedArc>> =
                Box::pin(async move { wrapped.await.map(crate::algebra::downcast) });
            let release_adapter: crate::scope::Release<crate::algebra::ErasedArc> =
                Arc::new(move |outer: Arc<crate::algebra::ErasedArc>, exit| {
                    let shared = (*outer).clone();
                    release(shared, exit)
                });
            match scope.acquire_resource(acquire_typed, release_adapter, cancelable).await {
                crate::scope::AcquireOutcome::Succeeded(value) => {
                    let shared = (*value).clone();
                    ActionOutcome::Next(k(Terminal::Succeeded(erase(shared))), scope)
                }
                crate::scope::AcquireOutcome::Canceled => {
                    let id = scope.id();
                    ActionOutcome::Next(k(Terminal::Interrupted { scope: id, deferred: None }), scope)
                }
                crate::scope::AcquireOutcome::Errored(e) => {
                    ActionOutcome::Next(k(Terminal::Fail(e)), scope)
                }
            }
        }

        Action::GetScope => ActionOutcome::Next(k(Terminal::Succeeded(erase(scope.clone()))), scope),

        Action::Translate { source, adapt } => {
            let inner_translators = translators.push(adapt.clone());
            let step = go(*source, scope.clone(), inner_translators, extend, &mut StepRunner).await;
            rewrap(step, k, scope, move |tail| {
                Repr::Action(Action::Translate { source: Box::new(tail), adapt })
            })
        }

        Action::MapOutput { source, f } => {
            let step = go(*source, scope.clone(), translators, extend, &mut StepRunner).await;
            match step {
                StepOutcome::Output(chunk, tail, s) => {
                    let mapped = chunk.map_owned(|v| f(v));
                    let continued =
                        Repr::Bind(Box::new(Repr::Action(Action::MapOutput { source: Box::new(tail), f })), k);
                    ActionOutcome::Output(mapped, continued, s)
                }
                StepOutcome::Done(v, s) => ActionOutcome::Next(k(Terminal::Succeeded(v)), s),
                StepOutcome::Fail(e) => ActionOutcome::Next(k(Terminal::Fail(e)), scope),
                StepOutcome::Interrupted(sid, d) => {
                    ActionOutcome::Next(k(Terminal::Interrupted { scope: sid, deferred: d }), scope)
                }
            }
        }

        Action::FlatMapOutput { source, f } => {
            let unconsed = go(*source, scope.clone(), translators, extend, &mut UnconsRunner).await;
            match unconsed {
                UnconsOutcome::None(s) => ActionOutcome::Next(k(Terminal::Succeeded(erase(()))), s),
                UnconsOutcome::Some(chunk, tail, s) => {
                    let remainder = Repr::Action(Action::FlatMapOutput { source: Box::new(tail), f: f.clone() });
                    let chained = if chunk.is_singleton() {
                        // Singleton fast path (spec §4.3, §9): lets
                        // `output1(o).flatMap(_ => s)`-style self
                        // recursion loop without growing the tree. Only
                        // continues into `remainder` on success — a
                        // `Fail`/`Interrupted` from this element's pull
                        // short-circuits, mirroring `Pull::flat_map`.
                        let elem = chunk.into_iter().next().expect("singleton chunk has one element");
                        Repr::Bind(
                            Box::new(f(elem)),
                            Box::new(move |t: Terminal| match t {
                                Terminal::Succeeded(_) => remainder,
                                other => other.into_repr(),
                            }),
                        )
                    } else {
                        chunk.into_iter().rev().fold(remainder, |acc, elem| {
                            Repr::Bind(
                                Box::new(f(elem)),
                                Box::new(move |t: Terminal| match t {
                                    Terminal::Succeeded(_) => acc,
                                    other => other.into_repr(),
                                }),
                            )
                        })
                    };
                    ActionOutcome::Next(Repr::Bind(Box::new(chained), k), s)
                }
                UnconsOutcome::Fail(e) => ActionOutcome::Next(k(Terminal::Fail(e)), scope),
                UnconsOutcome::Interrupted(sid, d) => {
                    ActionOutcome::Next(k(Terminal::Interrupted { scope: sid, deferred: d }), scope)
                }
            }
        }

        Action::Uncons { source } => {
            let unconsed = go(*source, scope.clone(), translators, extend, &mut UnconsRunner).await;
            match unconsed {
                UnconsOutcome::None(s) => ActionOutcome::Next(
                    k(Terminal::Succeeded(erase(Option::<(Chunk<Erased>, Repr)>::None))),
                    s,
                ),
                UnconsOutcome::Some(chunk, tail, s) => ActionOutcome::Next(
                    k(Terminal::Succeeded(erase(Some((chunk, tail))))),
                    s,
                ),
                UnconsOutcome::Fail(e) => ActionOutcome::Next(k(Terminal::Fail(e)), scope),
                UnconsOutcome::Interrupted(sid, d) => {
                    ActionOutcome::Next(k(Terminal::Interrupted { scope: sid, deferred: d }), scope)
                }
            }
        }

        Action::StepLeg { leg, scope: leg_scope } => {
            let unconsed = go(*leg, leg_scope, translators, extend, &mut UnconsRunner).await;
            match unconsed {
                // `stepLeg` resumes in the *original* (outer) scope, not
                // the one the chunk was produced in (spec §4.3).
                UnconsOutcome::None(_leg_scope) => ActionOutcome::Next(
                    k(Terminal::Succeeded(erase(Option::<(Chunk<Erased>, ScopeId, Repr)>::None))),
                    scope,
                ),
                UnconsOutcome::Some(chunk, tail, leg_scope) => ActionOutcome::Next(
                    k(Terminal::Succeeded(erase(Some((chunk, leg_scope.id(), tail))))),
                    scope,
                ),
                UnconsOutcome::Fail(e) => ActionOutcome::Next(k(Terminal::Fail(e)), scope),
                UnconsOutcome::Interrupted(sid, d) => {
                    ActionOutcome::Next(k(Terminal::Interrupted { scope: sid, deferred: d }), scope)
                }
            }
        }

        Action::InScope { body, use_interruption } => {
            // Spec §9 "Extended top-level scope": opening a fresh direct
            // child of the root first tears down whatever scope a prior
            // `extendScopeTo` left held open.
            if scope.is_root() {
                if let Some(held) = extend.take_held() {
                    if let Err(e) = held.close(ExitCase::Succeeded).await {
                        return ActionOutcome::Next(k(Terminal::Fail(e)), scope);
                    }
                }
            }
            match scope.open(use_interruption) {
                Ok(child) => {
                    let result =
                        go(*body, child.clone(), translators, extend.clone(), &mut StepRunner).await;
                    match result {
                        StepOutcome::Output(chunk, tail, s) => {
                            let continued = Repr::Bind(
                                Box::new(Repr::Action(Action::InScope {
                                    body: Box::new(tail),
                                    use_interruption: false,
                                })),
                                k,
                            );
                            let _ = s;
                            ActionOutcome::Output(chunk, continued, child)
                        }
                        StepOutcome::Done(value, _s) => {
                            if extend.enabled_for(&child) {
                                if let Some(previous) = extend.stash(child) {
                                    if let Err(e) = previous.close(ExitCase::Succeeded).await {
                                        return ActionOutcome::Next(k(Terminal::Fail(e)), scope);
                                    }
                                }
                                ActionOutcome::Next(k(Terminal::Succeeded(value)), scope)
                            } else {
                                match child.close(ExitCase::Succeeded).await {
                                    Ok(()) => ActionOutcome::Next(k(Terminal::Succeeded(value)), scope),
                                    Err(e) => ActionOutcome::Next(k(Terminal::Fail(e)), scope),
                                }
                            }
                        }
                        StepOutcome::Fail(e) => {
                            let err_for_exit = Arc::new(e);
                            let close_err =
                                child.close(ExitCase::Errored(err_for_exit.clone())).await.err();
                            let original = Arc::try_unwrap(err_for_exit)
                                .unwrap_or_else(|shared| Error::invariant(shared.to_string()));
                            match Error::compose(Some(original), close_err) {
                                Some(composed) => ActionOutcome::Next(k(Terminal::Fail(composed)), scope),
                                None => unreachable!("the source error is always `Some`"),
                            }
                        }
                        StepOutcome::Interrupted(sid, deferred) => {
                            let close_err = child.close(ExitCase::Canceled).await.err();
                            let merged = match (deferred, close_err) {
                                (d, None) => d,
                                (None, Some(e)) => Some(Arc::new(e)),
                                (Some(d), Some(e)) => Some(Arc::new(Error::Composite(vec![
                                    Arc::try_unwrap(d).unwrap_or_else(|d| Error::invariant(d.to_string())),
                                    e,
                                ]))),
                            };
                            // §4.2/§9 CloseScope absorption rule: if `sid`
                            // (the interruption's origin) is still an
                            // ancestor of the scope we resume in, it hasn't
                            // been reached yet — keep propagating. If it
                            // isn't (the origin was `child` itself, just
                            // closed, or something beneath it), the
                            // interruption has already been passed: absorb
                            // it into a plain result.
                            if scope.descends_from(sid) {
                                ActionOutcome::Next(
                                    k(Terminal::Interrupted { scope: sid, deferred: merged }),
                                    scope,
                                )
                            } else {
                                match merged {
                                    Some(e) => {
                                        let composed = Arc::try_unwrap(e)
                                            .unwrap_or_else(|shared| Error::invariant(shared.to_string()));
                                        ActionOutcome::Next(k(Terminal::Fail(composed)), scope)
                                    }
                                    None => {
                                        ActionOutcome::Next(k(Terminal::Succeeded(erase(()))), scope)
                                    }
                                }
                            }
                        }
                    }
                }
                Err(e) => ActionOutcome::Next(k(Terminal::Fail(e)), scope),
            }
        }

        Action::InterruptWhen { signal } => {
            let signal = translators.wrap(signal).map(box_unit_result);
            let handle = scope.interrupt_when(Box::pin(signal));
            ActionOutcome::Next(k(Terminal::Succeeded(erase(handle))), scope)
        }
    }
}

fn box_unit_result(fut_result: Result<Erased>) -> Result<()> {
    fut_result.map(|_| ())
}

fn rewrap(
    outcome: StepOutcome,
    k: crate::algebra::Continuation,
    scope: Scope,
    rewrap_tail: impl FnOnce(Repr) -> Repr,
) -> ActionOutcome {
    match outcome {
        StepOutcome::Output(chunk, tail, scope) => {
            let continued = Repr::Bind(Box::new(rewrap_tail(tail)), k);
            ActionOutcome::Output(chunk, continued, scope)
        }
        StepOutcome::Done(value, scope) => ActionOutcome::Next(k(Terminal::Succeeded(value)), scope),
        StepOutcome::Fail(e) => ActionOutcome::Next(k(Terminal::Fail(e)), scope),
        StepOutcome::Interrupted(sid, deferred) => {
            ActionOutcome::Next(k(Terminal::Interrupted { scope: sid, deferred }), scope)
        }
    }
}
