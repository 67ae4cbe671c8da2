//! Left-biased rebalancing of chained `Bind` nodes.
//!
//! A computation built as `a.flat_map(f).flat_map(g).flat_map(h)...` nests
//! `Bind` on the left: `Bind(Bind(Bind(a, f), g), h)`. Stepping that tree
//! as written would need as much interpreter stack as there are chained
//! binds. `view` rewrites `Bind(Bind(a, k1), k2)` to
//! `Bind(a, r => Bind(k1(r), k2))` until the left child is no longer a
//! `Bind`, exposing the next actual instruction (a `Result` leaf or an
//! `Action`) together with one composed continuation. The rewrite runs in
//! a loop, not by recursing into the tree, so a chain of a million binds
//! costs one bounded interpreter frame, not a million (spec §4.1,
//! "Evaluation order").

use crate::algebra::{Action, Continuation, Repr, Terminal};

/// The next thing the interpreter actually has to do, plus (for an
/// `Action`) the continuation to resume with once it completes.
pub(crate) enum View {
    Result(Terminal),
    Action(Action, Continuation),
}

fn identity_continuation() -> Continuation {
    Box::new(Terminal::into_repr)
}

/// Computes the `View` of `repr`: repeatedly rotates left-nested binds,
/// resolves any fully-reduced `Result` leaf it exposes along the way by
/// handing it to the pending continuation — whatever that continuation
/// does with a `Fail`/`Interrupted` (pass through, or recover, for
/// `handleErrorWith`) is up to how it was built, not to `view` itself —
/// and returns as soon as it reaches an `Action`, or a terminal with no
/// continuation left to feed it to.
pub(crate) fn view(mut repr: Repr) -> View {
    loop {
        match repr {
            Repr::Result(terminal) => return View::Result(terminal),
            Repr::Action(action) => return View::Action(action, identity_continuation()),
            Repr::Bind(step, k) => match *step {
                Repr::Bind(inner_step, inner_k) => {
                    // Bind(Bind(a, k1), k2) -> Bind(a, r => Bind(k1(r), k2))
                    let rotated: Continuation =
                        Box::new(move |r: Terminal| Repr::Bind(Box::new(inner_k(r)), k));
                    repr = Repr::Bind(inner_step, rotated);
                }
                Repr::Result(terminal) => {
                    repr = k(terminal);
                }
                Repr::Action(action) => return View::Action(action, k),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algebra::erase;

    fn pure(n: i32) -> Repr {
        Repr::succeeded(erase(n))
    }

    /// A `flatMap`-shaped continuation: runs `f` on success, passes
    /// `Fail`/`Interrupted` through untouched.
    fn bind(r: Repr, f: impl Fn(i32) -> Repr + Send + 'static) -> Repr {
        Repr::Bind(
            Box::new(r),
            Box::new(move |t: Terminal| match t {
                Terminal::Succeeded(v) => f(crate::algebra::downcast::<i32>(v)),
                other => other.into_repr(),
            }),
        )
    }

    #[test]
    fn deeply_left_nested_pure_binds_resolve_without_recursion() {
        let mut r = pure(0);
        for _ in 1..=10_000 {
            r = bind(r, |n| pure(n + 1));
        }
        match view(r) {
            View::Result(Terminal::Succeeded(v)) => {
                assert_eq!(crate::algebra::downcast::<i32>(v), 10_000);
            }
            _ => panic!("expected a resolved pure result"),
        }
    }

    #[test]
    fn an_action_stops_the_view_with_its_continuation() {
        use crate::algebra::{erase, Action};
        use crate::chunk::Chunk;
        let out = Repr::Action(Action::Output(Chunk::singleton(erase(7))));
        let r = bind(out, |_| pure(1));
        match view(r) {
            View::Action(Action::Output(_), _) => {}
            _ => panic!("expected the Output action to surface"),
        }
    }

    #[test]
    fn a_failure_short_circuits_and_drops_the_continuation() {
        let failed = Repr::fail(crate::error::Error::invariant("boom"));
        let ran = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
        let ran2 = ran.clone();
        let r = bind(failed, move |n| {
            ran2.store(true, std::sync::atomic::Ordering::SeqCst);
            pure(n)
        });
        match view(r) {
            View::Result(Terminal::Fail(_)) => {}
            _ => panic!("expected the failure to surface"),
        }
        assert!(!ran.load(std::sync::atomic::Ordering::SeqCst));
    }
}
