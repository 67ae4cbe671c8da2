//! The internal, type-erased free algebra every `Pull` compiles to.
//!
//! The public API (`src/pull.rs`) is generic over an output element type
//! `O` and a result type `C`. The algebra tree underneath is not: Rust has
//! no GADTs, so a `Bind` node whose continuation's input type differs from
//! its neighbor's can't be expressed as one statically-typed recursive
//! enum. Instead every per-node payload — a bind continuation's argument,
//! an `Eval`'s result, an `Acquire`'s resource, an `Output`'s chunk — is
//! boxed as `Box<dyn Any + Send>` and downcast back to its real type at
//! the one place that originally knew it (a `Bind` continuation, the
//! `MapOutput`/`FlatMapOutput` closures, or `compile`'s top-level
//! consumption loop). `Pull<O, C>` itself stays fully typed; the erasure
//! is invisible at the public boundary. See `SPEC_FULL.md` §0.
//!
//! This mirrors the uniform dynamic value carried through a single
//! generic-error-type interpreter loop rather than a family of
//! per-instruction types — the same trick `StackInterpreter` and
//! `ContComputation` use to fit a heterogeneous instruction stream into
//! one Rust enum.

use crate::chunk::Chunk;
use crate::error::Error;
use crate::future::BoxFuture;
use crate::scope::{ExitCase, Scope, ScopeId};
use std::any::Any;
use std::sync::Arc;

pub(crate) type Erased = Box<dyn Any + Send>;

pub(crate) fn downcast<T: 'static>(value: Erased) -> T {
    match value.downcast::<T>() {
        Ok(boxed) => *boxed,
        Err(_) => panic!("pull-core: erased value downcast mismatch, interpreter invariant broken"),
    }
}

pub(crate) fn erase<T: Send + 'static>(value: T) -> Erased {
    Box::new(value)
}

/// An erased, already-shared value: used for `Acquire`'s resource instead
/// of plain [`Erased`] because the same allocation is read from two
/// places that don't have a natural owner/borrower relationship — the
/// continuation the resource is handed to, and the finalizer that runs
/// `release` on it later. `Arc<dyn Any>::downcast` reinterprets the
/// pointer in place, so recovering the concrete `Arc<R>` never requires
/// unique ownership the way unboxing a plain `Erased` would.
pub(crate) type ErasedArc = Arc<dyn Any + Send + Sync>;

pub(crate) fn erase_arc<T: Send + Sync + 'static>(value: T) -> ErasedArc {
    Arc::new(value)
}

pub(crate) fn downcast_arc<T: Send + Sync + 'static>(value: ErasedArc) -> Arc<T> {
    value.downcast::<T>().unwrap_or_else(|_| {
        panic!("pull-core: erased arc downcast mismatch, interpreter invariant broken")
    })
}

/// A node's terminal state: the three leaves of the algebra (spec §3).
pub(crate) enum Terminal {
    Succeeded(Erased),
    Fail(Error),
    Interrupted { scope: ScopeId, deferred: Option<Arc<Error>> },
}

/// A `Bind`'s continuation: takes the *full* terminal the prior step
/// ended in (spec §4.1: "if step is a Result r, replace P with k(r)") and
/// produces the next step of the tree. An ordinary `flatMap` continuation
/// passes `Fail`/`Interrupted` through unchanged; `handleErrorWith`'s
/// continuation is what actually inspects `Fail` and recovers from it.
/// This is the one place recovery from an error can hook in at all.
pub(crate) type Continuation = Box<dyn FnOnce(Terminal) -> Repr + Send>;

pub(crate) type ErasedMap = Arc<dyn Fn(Erased) -> Erased + Send + Sync>;
pub(crate) type ErasedFlatMap = Arc<dyn Fn(Erased) -> Repr + Send + Sync>;
pub(crate) type ErasedRelease =
    Arc<dyn Fn(ErasedArc, ExitCase) -> BoxFuture<'static, crate::error::Result<()>> + Send + Sync>;
pub(crate) type ErasedTranslate = Arc<
    dyn Fn(BoxFuture<'static, crate::error::Result<Erased>>) -> BoxFuture<'static, crate::error::Result<Erased>>
        + Send
        + Sync,
>;

/// One instruction of the algebra (spec §3/§4).
pub(crate) enum Action {
    /// Emits one chunk of (erased) output elements.
    Output(Chunk<Erased>),
    /// Runs an effect, producing an erased result.
    Eval(BoxFuture<'static, crate::error::Result<Erased>>),
    /// Acquires a resource on the innermost scope, registering `release`
    /// as a finalizer on success.
    Acquire {
        acquire: BoxFuture<'static, crate::error::Result<ErasedArc>>,
        release: ErasedRelease,
        cancelable: bool,
    },
    /// Reads the innermost scope of the current interpretation.
    GetScope,
    /// Wraps every effect run while interpreting `source` with `adapt`.
    Translate { source: Box<Repr>, adapt: ErasedTranslate },
    /// Maps every output element of `source` through `f`.
    MapOutput { source: Box<Repr>, f: ErasedMap },
    /// Replaces every output element of `source` with the pull `f`
    /// produces for it, interleaving their outputs.
    FlatMapOutput { source: Box<Repr>, f: ErasedFlatMap },
    /// Pulls one chunk (or `None` at end of input) off `source`, without
    /// closing `source`'s scope.
    Uncons { source: Box<Repr> },
    /// Steps one chunk off an open "leg" of a pull, threading its scope
    /// explicitly rather than nesting it (spec §4.3 `stepLeg`).
    StepLeg { leg: Box<Repr>, scope: Scope },
    /// Opens a fresh child scope, interprets `body` within it, and closes
    /// it (with the body's exit case) before producing a result. The
    /// closing happens synchronously inside the interpreter's own
    /// dispatch for this node rather than via a separately-synthesized
    /// "close scope" tree node — see `DESIGN.md` for why.
    InScope { body: Box<Repr>, use_interruption: bool },
    /// Registers a watcher that interrupts the current scope when
    /// `signal` resolves.
    InterruptWhen { signal: BoxFuture<'static, crate::error::Result<()>> },
}

/// The algebra tree: `Result` leaves, `Action` instructions, and `Bind`
/// nodes composing them monadically.
pub(crate) enum Repr {
    Result(Terminal),
    Action(Action),
    Bind(Box<Repr>, Continuation),
}

impl Terminal {
    /// `Fail`/`Interrupted` pass through unchanged; used to build ordinary
    /// (non-catching) continuations.
    pub(crate) fn into_repr(self) -> Repr {
        Repr::Result(self)
    }
}

impl Repr {
    pub(crate) fn succeeded(value: Erased) -> Repr {
        Repr::Result(Terminal::Succeeded(value))
    }

    pub(crate) fn fail(err: Error) -> Repr {
        Repr::Result(Terminal::Fail(err))
    }

    pub(crate) fn interrupted(scope: ScopeId, deferred: Option<Arc<Error>>) -> Repr {
        Repr::Result(Terminal::Interrupted { scope, deferred })
    }
}
