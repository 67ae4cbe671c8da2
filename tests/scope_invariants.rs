//! Spec §8: scope/resource invariants — finalizers run exactly once, in
//! LIFO acquisition order, and see the right `ExitCase`.

mod common;

use assert_matches::assert_matches;
use pretty_assertions::assert_eq;
use pull_core::{Chunk, ExitCase, Pull, Scope};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

fn release_counting(
    calls: Arc<AtomicUsize>,
    exits: Arc<Mutex<Vec<&'static str>>>,
    label: &'static str,
) -> impl Fn(Arc<()>, ExitCase) -> Pin<Box<dyn Future<Output = pull_core::Result<()>> + Send>> + Send + Sync + 'static
{
    move |_res, exit| {
        calls.fetch_add(1, Ordering::SeqCst);
        exits.lock().unwrap().push(label);
        let _ = &exit;
        Box::pin(async { Ok(()) })
    }
}

#[tokio::test]
async fn finalizer_runs_exactly_once_on_success() {
    let calls = Arc::new(AtomicUsize::new(0));
    let exits: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));
    let p: Pull<i32, ()> = Pull::acquire(async { Ok::<(), pull_core::Error>(()) }, release_counting(calls.clone(), exits.clone(), "r"))
        .flat_map(|_r| Pull::output1(1));

    let out = p.compile(Scope::root(), false, Vec::new(), |acc: &mut Vec<i32>, c: Chunk<i32>| acc.extend(c.to_vec())).await.unwrap();

    assert_eq!(out, vec![1]);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(*exits.lock().unwrap(), vec!["r"]);
}

#[tokio::test]
async fn bracket_on_success_records_succeeded_exit() {
    let exits: Arc<Mutex<Vec<ExitCase>>> = Arc::new(Mutex::new(Vec::new()));
    let exits2 = exits.clone();
    let p: Pull<i32, ()> = Pull::bracket_case(
        async { Ok::<(), pull_core::Error>(()) },
        |_r| Pull::output1(1),
        move |_r, exit| {
            exits2.lock().unwrap().push(exit.clone());
            Box::pin(async { Ok(()) })
        },
    );

    let out = p.compile(Scope::root(), false, Vec::new(), |acc: &mut Vec<i32>, c: Chunk<i32>| acc.extend(c.to_vec())).await.unwrap();
    assert_eq!(out, vec![1]);
    let recorded = exits.lock().unwrap();
    assert_eq!(recorded.len(), 1);
    assert_matches!(recorded[0], ExitCase::Succeeded);
}

#[tokio::test]
async fn bracket_on_error_surfaces_it_and_records_errored_exit() {
    let exits: Arc<Mutex<Vec<ExitCase>>> = Arc::new(Mutex::new(Vec::new()));
    let exits2 = exits.clone();
    let p: Pull<i32, ()> = Pull::bracket_case(
        async { Ok::<(), pull_core::Error>(()) },
        |_r| Pull::<i32, ()>::raise_error(pull_core::Error::invariant("use failed")),
        move |_r, exit| {
            exits2.lock().unwrap().push(exit.clone());
            Box::pin(async { Ok(()) })
        },
    );

    let result = p.compile(Scope::root(), false, Vec::new(), |acc: &mut Vec<i32>, c: Chunk<i32>| acc.extend(c.to_vec())).await;
    assert!(result.is_err());
    let recorded = exits.lock().unwrap();
    assert_eq!(recorded.len(), 1);
    assert_matches!(recorded[0], ExitCase::Errored(_));
}

#[tokio::test]
async fn lifo_finalizer_order_across_two_acquires_in_one_scope() {
    let order: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));
    let o1 = order.clone();
    let o2 = order.clone();
    let p: Pull<i32, ()> = Pull::acquire(async { Ok::<(), pull_core::Error>(()) }, move |_r, _exit| {
        let o1 = o1.clone();
        Box::pin(async move {
            o1.lock().unwrap().push("first");
            Ok(())
        })
    })
    .flat_map(move |_| {
        Pull::acquire(async { Ok::<(), pull_core::Error>(()) }, move |_r, _exit| {
            let o2 = o2.clone();
            Box::pin(async move {
                o2.lock().unwrap().push("second");
                Ok(())
            })
        })
    })
    .void();

    p.compile(Scope::root(), false, (), |_acc: &mut (), _c: Chunk<i32>| {}).await.unwrap();
    assert_eq!(*order.lock().unwrap(), vec!["second", "first"]);
}

#[tokio::test]
async fn composite_error_from_a_failing_use_and_a_failing_release_keeps_both() {
    // Two stacked brackets: the inner `use` fails with E1, and the outer
    // bracket's `release` independently fails with E2. Both must survive
    // in the composed error rather than one silently winning.
    let p: Pull<i32, ()> = Pull::bracket_case(
        async { Ok::<(), pull_core::Error>(()) },
        |_outer| {
            Pull::bracket_case(
                async { Ok::<(), pull_core::Error>(()) },
                |_inner| Pull::<i32, ()>::raise_error(pull_core::Error::invariant("E1: inner use failed")),
                |_r, _exit| Box::pin(async { Ok(()) }),
            )
        },
        |_r, _exit| Box::pin(async { Err(pull_core::Error::invariant("E2: outer release failed")) }),
    );

    let err = p
        .compile(Scope::root(), false, (), |_acc: &mut (), _c: Chunk<i32>| {})
        .await
        .expect_err("both failures must surface");
    let rendered = err.to_string();
    assert!(rendered.contains("E1"), "rendered error missing E1: {rendered}");
    assert!(rendered.contains("E2"), "rendered error missing E2: {rendered}");
}

#[tokio::test]
async fn interruption_yields_partial_output_with_no_surfaced_error_and_canceled_finalizer() {
    common::init_test_logger();
    let finalized_with: Arc<Mutex<Option<&'static str>>> = Arc::new(Mutex::new(None));
    let finalized = finalized_with.clone();

    let p: Pull<i32, ()> = Pull::acquire(async { Ok::<(), pull_core::Error>(()) }, move |_r, exit| {
        let finalized = finalized.clone();
        Box::pin(async move {
            *finalized.lock().unwrap() = Some(match exit {
                ExitCase::Succeeded => "succeeded",
                ExitCase::Errored(_) => "errored",
                ExitCase::Canceled => "canceled",
            });
            Ok(())
        })
    })
    .flat_map(|_r| {
        Pull::<i32, ()>::interrupt_when(Box::pin(async { Ok(()) }))
            .void()
            .then(Pull::output1(1))
            .then(Pull::eval_(async {
                tokio::time::sleep(std::time::Duration::from_millis(20)).await;
                Ok(())
            }))
            .then(Pull::output1(2))
    });

    let out = p
        .compile(Scope::root(), false, Vec::new(), |acc: &mut Vec<i32>, c: Chunk<i32>| acc.extend(c.to_vec()))
        .await
        .expect("interruption with no deferred error must not surface as a compile error");

    assert_eq!(out, vec![1], "only the output produced before interruption should survive");
    assert_eq!(*finalized_with.lock().unwrap(), Some("canceled"));
}

/// Unlike the test above, the interruption here originates *inside* an
/// `interrupt_scope()`-wrapped sub-pull, with a plain `.then(after)`
/// sequenced strictly outside it. `after` must still run: once the
/// interrupted scope closes, its own interruption has been "passed", so
/// the outer continuation resumes normally rather than staying
/// interrupted all the way up to `compile` (spec §4.2/§9, "CloseScope").
#[tokio::test]
async fn interrupt_scope_absorbs_its_own_interruption_so_the_next_step_runs() {
    common::init_test_logger();
    let inner: Pull<i32, ()> = Pull::<i32, ()>::interrupt_when(Box::pin(async { Ok(()) }))
        .void()
        .then(Pull::output1(1))
        .then(Pull::eval_(async {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            Ok(())
        }))
        .then(Pull::output1(2));

    let p: Pull<i32, ()> = inner.interrupt_scope().then(Pull::output1(3));

    let out = p
        .compile(Scope::root(), false, Vec::new(), |acc: &mut Vec<i32>, c: Chunk<i32>| acc.extend(c.to_vec()))
        .await
        .expect("interruption absorbed at its own scope's close must not surface as an error");

    assert_eq!(
        out,
        vec![1, 3],
        "output1(2) never runs (interrupted first), but the step after interrupt_scope() must"
    );
}
