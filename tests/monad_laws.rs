//! Spec §8: the algebraic laws a `Pull` must satisfy, checked end to end
//! through `compile` rather than by inspecting the `Repr` tree directly.

mod common;

use pretty_assertions::assert_eq;
use pull_core::{Chunk, Error, Pull, Scope};

async fn collect<C: Send + 'static>(p: Pull<i32, C>) -> Vec<i32> {
    p.compile(Scope::root(), false, Vec::new(), |acc: &mut Vec<i32>, c| acc.extend(c.to_vec()))
        .await
        .unwrap()
}

#[tokio::test]
async fn left_identity_pure_then_flat_map_equals_f() {
    let f = |n: i32| Pull::<i32, i32>::pure(n * 2);
    let via_pure = Pull::<i32, i32>::pure(21).flat_map(f);
    let direct = f(21);
    assert_eq!(
        collect(via_pure.flat_map(Pull::output1)).await,
        collect(direct.flat_map(Pull::output1)).await
    );
}

#[tokio::test]
async fn right_identity_flat_map_pure_is_noop() {
    let m = Pull::<i32, i32>::pure(7).flat_map(|n| Pull::output1(n).as_(n));
    let round_tripped = Pull::<i32, i32>::pure(7).flat_map(|n| Pull::output1(n).as_(n)).flat_map(Pull::pure);
    assert_eq!(collect(m).await, collect(round_tripped).await);
}

#[tokio::test]
async fn associativity_of_flat_map() {
    let m = || Pull::<i32, i32>::pure(1);
    let f = |n: i32| Pull::output1(n).as_(n + 1);
    let g = |n: i32| Pull::output1(n).as_(n + 10);

    let left = m().flat_map(f).flat_map(g);
    let right = m().flat_map(move |x| f(x).flat_map(g));

    assert_eq!(collect(left).await, collect(right).await);
}

#[tokio::test]
async fn map_equals_flat_map_pure_compose() {
    let p = || Pull::<i32, i32>::output1(5).as_(5);
    let via_map = p().map(|n| n * 3);
    let via_flat_map = p().flat_map(|n| Pull::pure(n * 3));
    assert_eq!(collect(via_map.flat_map(Pull::output1)).await, collect(via_flat_map.flat_map(Pull::output1)).await);
}

#[tokio::test]
async fn handle_error_with_raise_error_calls_handler_with_the_error() {
    common::init_test_logger();
    let p: Pull<i32, ()> = Pull::<i32, ()>::raise_error(Error::invariant("deliberate"))
        .handle_error_with(|e| Pull::output1(if matches!(e, Error::Invariant(_)) { 1 } else { 0 }));
    assert_eq!(collect(p).await, vec![1]);
}

/// `raise_error` is a bare `Repr::Result(Fail)` that `view()` itself
/// rebalances into `handle_error_with`'s continuation without ever
/// touching `step_action`. An `eval`-originated failure is different: it
/// only becomes a `Fail` after `step_action` runs the future, so this
/// checks the same law holds when the failure comes from there instead.
#[tokio::test]
async fn handle_error_with_recovers_from_an_eval_originated_failure() {
    common::init_test_logger();
    let p: Pull<i32, ()> = Pull::<i32, ()>::eval_(async { Err::<(), Error>(Error::invariant("eval boom")) })
        .handle_error_with(|e| Pull::output1(if matches!(e, Error::Invariant(_)) { 1 } else { 0 }));
    assert_eq!(collect(p).await, vec![1]);
}

#[tokio::test]
async fn attempt_never_fails_even_over_a_raised_error() {
    let p = Pull::<i32, ()>::raise_error(Error::invariant("boom")).attempt();
    let outcome = p
        .compile(Scope::root(), false, (), |_acc: &mut (), _c: Chunk<i32>| {})
        .await;
    assert!(outcome.is_ok(), "attempt() must surface the failure as a value, never as a compile error");
}

#[tokio::test]
async fn attempt_carries_the_success_value_through() {
    let p = Pull::<i32, i32>::pure(9).attempt().flat_map(|r| match r {
        Ok(n) => Pull::output1(n),
        Err(_) => Pull::output1(-1),
    });
    assert_eq!(collect(p).await, vec![9]);
}

#[tokio::test]
async fn output_of_a_chunk_then_done_concatenates_in_order() {
    let p = Pull::<i32, ()>::output(Chunk::from_vec(vec![1, 2, 3]).unwrap()).then(Pull::done());
    assert_eq!(collect(p).await, vec![1, 2, 3]);
}
