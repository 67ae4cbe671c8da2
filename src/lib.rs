//! A pull-based effectful streaming engine.
//!
//! `Pull<O, C>` is a free-algebra description of a computation that, when
//! compiled, emits a sequence of output chunks of type `O` and finally
//! produces a result of type `C`. Compiling a `Pull` walks the algebra
//! tree with a trampolined interpreter, opening and closing scopes as it
//! goes so that resources acquired along the way are always released,
//! exactly once, in reverse acquisition order — even under errors or
//! cooperative interruption.

mod algebra;
mod chunk;
mod error;
mod fuse;
mod future;
mod interpret;
mod pull;
mod runner;
mod scope;
mod timed;
mod view;

pub use chunk::Chunk;
pub use error::{Error, Result};
pub use pull::{LoopAction, Pull, Translate};
pub use scope::{AcquireOutcome, ExitCase, Interruption, Lease, Scope, ScopeId};
pub use timed::{Timed, TimedPull};
