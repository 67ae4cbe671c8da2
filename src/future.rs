//! The fixed ambient effect.
//!
//! The algebra is written against one concrete effect rather than a
//! generic `F[_]`: every `Eval`/`Acquire`/release/interrupt-signal action
//! carries a boxed, pinned, `Send` future. This is the Rust-native
//! realization of spec §0's "ambient effect" — see `SPEC_FULL.md` §0 for
//! the rationale.

use std::future::Future;
use std::pin::Pin;

/// A boxed future, the currency every effectful action in this crate is
/// expressed in.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
