//! Spec §8: the bounded-stack property — a long left-associated chain of
//! binds, and a self-recursive `flat_map_output` stream, both compile (or
//! step) without overflowing the native stack, because `view.rs` rebalances
//! left-nested `Bind`s and `flat_map_output`'s singleton fast path avoids
//! growing the `Repr` tree on every recursive step.

mod common;

use pretty_assertions::assert_eq;
use pull_core::{Chunk, Pull, Scope};

async fn collect_ints(p: Pull<i32, ()>) -> Vec<i32> {
    p.compile(Scope::root(), false, Vec::new(), |acc: &mut Vec<i32>, c: Chunk<i32>| acc.extend(c.to_vec()))
        .await
        .unwrap()
}

#[tokio::test]
async fn a_long_chain_of_left_associated_flat_maps_preserves_the_final_value() {
    let mut p: Pull<i32, i32> = Pull::pure(0);
    for _ in 0..200_000 {
        p = p.flat_map(|n| Pull::pure(n + 1));
    }
    let out = collect_ints(p.flat_map(Pull::output1)).await;
    assert_eq!(out, vec![200_000]);
}

/// A self-recursive stream built with `flat_map_output`'s singleton fast
/// path: each element replaces itself with "itself again", so naively this
/// never terminates. `take` steps it with `uncons` and stops after `n`
/// chunks, the way any bounded combinator built on these primitives would —
/// the recursive calls happen lazily, one per interpreter step, never
/// nesting on the native call stack the way a naive eager recursion would.
#[tokio::test]
async fn flat_map_output_singleton_fast_path_supports_unbounded_self_recursion() {
    common::init_test_logger();
    fn counting_up(from: i32) -> Pull<i32, ()> {
        Pull::output1(from).flat_map_output(move |_| counting_up(from + 1))
    }

    fn take(n: usize, p: Pull<i32, ()>) -> Pull<i32, ()> {
        if n == 0 {
            return Pull::done();
        }
        p.uncons().flat_map(move |opt| match opt {
            Some((chunk, tail)) => Pull::output(chunk).then(take(n - 1, tail)),
            None => Pull::done(),
        })
    }

    let out = collect_ints(take(5_000, counting_up(0))).await;
    assert_eq!(out.len(), 5_000);
    assert_eq!(out[0], 0);
    assert_eq!(out[4_999], 4_999);
}
