//! Resettable, timeout-aware stepping over a `Pull<O, ()>` (spec §6,
//! "Timed pulling"). This is deliberately not a new algebra node: the core
//! has no scheduler or `race` primitive of its own (spec §1, "no
//! scheduler of its own"), so `TimedPull` is a small capability object
//! built *on top of* `uncons`, the same way the (out-of-scope) high-level
//! stream surface is expected to build its own combinators out of the
//! primitives this crate exposes.
//!
//! A step is run as a background task rather than raced-and-dropped: if
//! the timeout wins, the in-flight step keeps running so its progress
//! (and any resources it acquired along the way) isn't lost, and the next
//! `uncons` call picks up by waiting on the same task instead of starting
//! a fresh one.

use crate::chunk::Chunk;
use crate::error::{Error, Result};
use crate::pull::Pull;
use crate::runner::{UnconsOutcome, UnconsRunner};
use crate::scope::Scope;
use std::time::Duration;

/// What one [`TimedPull::uncons`] produced.
pub enum Timed<O> {
    Chunk(Chunk<O>, TimedPull<O>),
    Timeout(TimedPull<O>),
    Done,
}

enum Pending<O> {
    Fresh(Pull<O, ()>),
    InFlight(tokio::task::JoinHandle<UnconsOutcome>),
}

/// A capability for stepping a `Pull<O, ()>` chunk-by-chunk with an
/// optional, resettable inactivity timeout.
pub struct TimedPull<O> {
    pending: Pending<O>,
    scope: Scope,
    duration: Option<Duration>,
}

impl<O: Send + 'static> TimedPull<O> {
    pub(crate) fn new(pull: Pull<O, ()>, scope: Scope) -> TimedPull<O> {
        TimedPull { pending: Pending::Fresh(pull), scope, duration: None }
    }

    /// Arms (or re-arms) the timeout used by subsequent [`TimedPull::uncons`]
    /// calls. A zero duration cancels any timeout without starting a new
    /// one. Setting a timeout here never retroactively affects a step
    /// already in flight — the very first timeout only takes effect on
    /// the *next* `uncons` call (spec §6).
    pub fn timeout(&mut self, duration: Duration) {
        self.duration = if duration.is_zero() { None } else { Some(duration) };
    }

    /// Steps one chunk (or observes completion), racing whatever timeout
    /// is currently armed. If the timeout fires first, the step keeps
    /// running in the background and is resumed by the next call.
    pub async fn uncons(self) -> Result<Timed<O>> {
        let TimedPull { pending, scope, duration } = self;
        let handle = match pending {
            Pending::InFlight(handle) => handle,
            Pending::Fresh(pull) => {
                let repr = pull.into_repr();
                let scope = scope.clone();
                tokio::spawn(async move {
                    let mut runner = UnconsRunner;
                    crate::interpret::go(
                        repr,
                        scope,
                        crate::interpret::Translators::default(),
                        crate::interpret::ExtendCtl::new(false),
                        &mut runner,
                    )
                    .await
                })
            }
        };

        let stepped = match duration {
            Some(d) => {
                let mut handle = handle;
                tokio::select! {
                    biased;
                    out = &mut handle => Ok(out),
                    _ = tokio::time::sleep(d) => Err(handle),
                }
            }
            None => Ok(handle.await),
        };

        match stepped {
            Err(handle) => Ok(Timed::Timeout(TimedPull { pending: Pending::InFlight(handle), scope, duration })),
            Ok(join_result) => {
                let outcome = join_result
                    .map_err(|e| Error::invariant(format!("timed pull's background step panicked: {e}")))?;
                match outcome {
                    UnconsOutcome::None(_scope) => Ok(Timed::Done),
                    UnconsOutcome::Some(chunk, tail, next_scope) => {
                        let chunk = chunk.map_owned(crate::algebra::downcast::<O>);
                        let tail_pull: Pull<O, ()> = Pull::from_repr(tail);
                        Ok(Timed::Chunk(
                            chunk,
                            TimedPull { pending: Pending::Fresh(tail_pull), scope: next_scope, duration },
                        ))
                    }
                    UnconsOutcome::Fail(e) => Err(e),
                    UnconsOutcome::Interrupted(scope, deferred) => Err(match deferred {
                        Some(e) => std::sync::Arc::try_unwrap(e).unwrap_or_else(|e| Error::invariant(e.to_string())),
                        None => Error::invariant(format!("timed pull interrupted by scope {scope:?}")),
                    }),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn uncons_without_a_timeout_just_steps() {
        let pull = Pull::<i32, ()>::output1(7);
        let timed = TimedPull::new(pull, Scope::root());
        match timed.uncons().await.unwrap() {
            Timed::Chunk(chunk, rest) => {
                assert_eq!(chunk.to_vec(), vec![7]);
                match rest.uncons().await.unwrap() {
                    Timed::Done => {}
                    _ => panic!("expected end of input"),
                }
            }
            _ => panic!("expected a chunk"),
        }
    }

    #[tokio::test]
    async fn a_short_timeout_fires_before_a_slow_step() {
        let pull: Pull<i32, ()> = Pull::eval_(async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok(())
        });
        let mut timed = TimedPull::new(pull, Scope::root());
        timed.timeout(Duration::from_millis(10));
        match timed.uncons().await.unwrap() {
            Timed::Timeout(_resumed) => {}
            _ => panic!("expected a timeout"),
        }
    }
}
