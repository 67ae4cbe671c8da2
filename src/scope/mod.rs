//! The scope tree: a mutable tree of nested resource scopes with
//! deterministic finalization, lease-based lifetime extension, and
//! cooperative interruption.
//!
//! Modeled after the parent-chain cancellation propagation in
//! `ctx::MutableContext::done` (a context walks its `parent` chain looking
//! for a cancelled/timed-out ancestor) and the scope/service lifetime
//! management in `concurrency::scope` (a scope's children complete before
//! the scope itself is considered terminated). Neither teacher module
//! tracks registered finalizers the way `Pull`'s `Scope` must, so the
//! finalizer bookkeeping here is new, grounded directly on spec §3/§4.2.

mod token;
pub use token::ScopeId;

use crate::error::{Error, Result};
use crate::future::BoxFuture;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// How long `close` waits for outstanding leases before finalizing anyway.
/// See spec §9 "Lease cancellation ordering" and SPEC_FULL §10.3.
pub const DEFAULT_LEASE_GRACE: Duration = Duration::from_secs(5);

/// The cause passed to finalizers when a scope closes.
#[derive(Clone, Debug)]
pub enum ExitCase {
    Succeeded,
    Errored(Arc<Error>),
    Canceled,
}

/// The result of [`Scope::acquire_resource`].
pub enum AcquireOutcome<T> {
    Succeeded(T),
    /// The acquire action was cancelled while the scope was being
    /// interrupted; no finalizer was registered.
    Canceled,
    Errored(Error),
}

/// Why a scope is interrupted: either a cooperative signal rooted at a
/// specific scope (carrying a possibly-deferred error), or an outright
/// error from the interrupt source itself.
#[derive(Clone)]
pub enum Interruption {
    By(ScopeId, Option<Arc<Error>>),
    Errored(Arc<Error>),
}

type Finalizer = Box<dyn FnOnce(ExitCase) -> BoxFuture<'static, Result<()>> + Send>;
pub(crate) type Release<T> = Arc<dyn Fn(Arc<T>, ExitCase) -> BoxFuture<'static, Result<()>> + Send + Sync>;

struct State {
    finalizers: Vec<Finalizer>,
    children: Vec<Weak<Inner>>,
    interruption: Option<Interruption>,
    lease_count: usize,
    closed: bool,
}

struct Inner {
    id: ScopeId,
    parent: Option<Scope>,
    level: usize,
    is_root: bool,
    cancel_token: Option<CancellationToken>,
    state: parking_lot::Mutex<State>,
}

/// A node in the scope tree. Cheap to clone (an `Arc` handle).
#[derive(Clone)]
pub struct Scope(Arc<Inner>);

impl Scope {
    /// Creates the single root scope of a `compile` invocation.
    pub fn root() -> Scope {
        Scope(Arc::new(Inner {
            id: ScopeId::fresh(),
            parent: None,
            level: 0,
            is_root: true,
            cancel_token: Some(CancellationToken::new()),
            state: parking_lot::Mutex::new(State {
                finalizers: Vec::new(),
                children: Vec::new(),
                interruption: None,
                lease_count: 0,
                closed: false,
            }),
        }))
    }

    pub fn id(&self) -> ScopeId {
        self.0.id
    }

    pub fn level(&self) -> usize {
        self.0.level
    }

    pub fn is_root(&self) -> bool {
        self.0.is_root
    }

    /// Opens a fresh child scope under `self`. Fails if `self` is already
    /// closed (spec §4.2, `open`).
    pub fn open(&self, use_interruption: bool) -> Result<Scope> {
        let mut state = self.0.state.lock();
        if state.closed {
            return Err(Error::ScopeNotOpen(self.0.id));
        }
        let child = Arc::new(Inner {
            id: ScopeId::fresh(),
            parent: Some(self.clone()),
            level: self.0.level + 1,
            is_root: false,
            cancel_token: if use_interruption {
                Some(match &self.0.cancel_token {
                    Some(parent) => parent.child_token(),
                    None => CancellationToken::new(),
                })
            } else {
                None
            },
            state: parking_lot::Mutex::new(State {
                finalizers: Vec::new(),
                children: Vec::new(),
                interruption: None,
                lease_count: 0,
                closed: false,
            }),
        });
        state.children.push(Arc::downgrade(&child));
        tracing::trace!(target: "pull_core::scope", child = ?child.id, parent = ?self.0.id, "open");
        Ok(Scope(child))
    }

    /// Runs `acquire` (masked per `cancelable`), registers `release` as a
    /// finalizer iff it succeeded, and reports the outcome (spec §4.2).
    pub async fn acquire_resource<T>(
        &self,
        acquire: BoxFuture<'static, Result<T>>,
        release: Release<T>,
        cancelable: bool,
    ) -> AcquireOutcome<Arc<T>>
    where
        T: Send + Sync + 'static,
    {
        let outcome = if cancelable {
            match &self.0.cancel_token {
                Some(token) => {
                    tokio::select! {
                        biased;
                        _ = token.cancelled() => None,
                        res = acquire => Some(res),
                    }
                }
                None => Some(acquire.await),
            }
        } else {
            Some(acquire.await)
        };
        match outcome {
            None => AcquireOutcome::Canceled,
            Some(Err(e)) => AcquireOutcome::Errored(e),
            Some(Ok(value)) => {
                let value = Arc::new(value);
                let registered = {
                    let mut state = self.0.state.lock();
                    if state.closed {
                        false
                    } else {
                        let value_for_release = value.clone();
                        let release = release.clone();
                        state.finalizers.push(Box::new(move |exit| release(value_for_release, exit)));
                        true
                    }
                };
                if !registered {
                    // The scope closed between acquire completing and us
                    // taking the lock: run release immediately so it still
                    // happens exactly once, per spec invariant.
                    if let Err(e) = release(value.clone(), ExitCase::Canceled).await {
                        return AcquireOutcome::Errored(e);
                    }
                }
                AcquireOutcome::Succeeded(value)
            }
        }
    }

    /// Registers a watcher task that marks this scope interrupted when
    /// `signal` resolves (spec §4.2, `interruptWhen`).
    pub fn interrupt_when(
        &self,
        signal: BoxFuture<'static, Result<()>>,
    ) -> tokio::task::JoinHandle<()> {
        let scope = self.clone();
        tokio::spawn(async move {
            let interruption = match signal.await {
                Ok(()) => Interruption::By(scope.0.id, None),
                Err(e) => Interruption::Errored(Arc::new(e)),
            };
            scope.mark_interrupted(interruption);
        })
    }

    fn mark_interrupted(&self, cause: Interruption) {
        let mut state = self.0.state.lock();
        if state.interruption.is_none() {
            state.interruption = Some(cause);
            if let Some(token) = &self.0.cancel_token {
                token.cancel();
            }
            tracing::debug!(target: "pull_core::scope", scope = ?self.0.id, "interrupted");
        }
    }

    /// Non-blocking check, walking this scope's ancestor chain (the same
    /// shape as `MutableContext::done`) for the nearest interruption.
    pub fn is_interrupted(&self) -> Option<Interruption> {
        let mut cur = Some(self.clone());
        while let Some(scope) = cur {
            if let Some(i) = scope.0.state.lock().interruption.clone() {
                return Some(i);
            }
            cur = scope.0.parent.clone();
        }
        None
    }

    /// Walks ancestors and `self` for the scope identified by `token`.
    pub fn find_in_lineage(&self, token: ScopeId) -> Option<Scope> {
        let mut cur = Some(self.clone());
        while let Some(scope) = cur {
            if scope.0.id == token {
                return Some(scope);
            }
            cur = scope.0.parent.clone();
        }
        None
    }

    /// `true` if any strict ancestor or `self` has `token`.
    pub fn descends_from(&self, token: ScopeId) -> bool {
        self.find_in_lineage(token).is_some()
    }

    /// Nearest still-open ancestor (or `self` if it is open), used to
    /// resume in after a scope closes.
    pub fn open_ancestor(&self) -> Scope {
        let mut cur = self.clone();
        loop {
            if !cur.0.state.lock().closed {
                return cur;
            }
            match cur.0.parent.clone() {
                Some(parent) => cur = parent,
                None => return cur,
            }
        }
    }

    /// Increments the lease counter, deferring finalization of this scope
    /// (and transitively its ancestors, per `close`'s wait) until
    /// cancelled. Fails if the scope is already closed.
    pub fn lease(&self) -> Result<Lease> {
        let mut state = self.0.state.lock();
        if state.closed {
            return Err(Error::LeaseOnClosedScope(self.0.id));
        }
        state.lease_count += 1;
        Ok(Lease { scope: self.clone(), released: std::sync::atomic::AtomicBool::new(false) })
    }

    fn lease_count(&self) -> usize {
        self.0.state.lock().lease_count
    }

    fn release_lease(&self) {
        let mut state = self.0.state.lock();
        state.lease_count = state.lease_count.saturating_sub(1);
    }

    /// Closes this scope and all transitively open descendants, running
    /// finalizers in LIFO acquisition order, descendants before ancestors.
    /// Waits (bounded by [`DEFAULT_LEASE_GRACE`]) for outstanding leases.
    ///
    /// Refuses the root scope: a `CloseScope` node in the algebra should
    /// never target it (spec §7, "trying to close the root via
    /// `CloseScope` ... must fail fast"). The compile driver's own
    /// top-level teardown, which is not a `CloseScope` action, uses
    /// [`Scope::close_root`] instead.
    pub async fn close(&self, exit: ExitCase) -> Result<()> {
        if self.0.is_root {
            return Err(Error::CloseRoot);
        }
        self.close_any(exit).await
    }

    /// Closes the root scope at the end of a `compile` call, running its
    /// finalizers the same way [`Scope::close`] does for any other scope.
    pub(crate) async fn close_root(&self, exit: ExitCase) -> Result<()> {
        debug_assert!(self.0.is_root, "close_root called on a non-root scope");
        self.close_any(exit).await
    }

    async fn close_any(&self, exit: ExitCase) -> Result<()> {
        self.wait_for_leases().await;

        let (children, finalizers, already_closed) = {
            let mut state = self.0.state.lock();
            if state.closed {
                (Vec::new(), Vec::new(), true)
            } else {
                state.closed = true;
                (
                    std::mem::take(&mut state.children),
                    std::mem::take(&mut state.finalizers),
                    false,
                )
            }
        };
        if already_closed {
            return Ok(());
        }

        let mut errors = Vec::new();
        for weak_child in children.into_iter().rev() {
            if let Some(child_inner) = weak_child.upgrade() {
                let child = Scope(child_inner);
                if let Err(e) = Box::pin(child.close(exit.clone())).await {
                    errors.push(e);
                }
            }
        }
        for finalizer in finalizers.into_iter().rev() {
            if let Err(e) = finalizer(exit.clone()).await {
                errors.push(e);
            }
        }
        self.detach_from_parent();
        tracing::trace!(target: "pull_core::scope", scope = ?self.0.id, "closed");

        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.pop().unwrap()),
            _ => Err(Error::Composite(errors)),
        }
    }

    fn detach_from_parent(&self) {
        if let Some(parent) = &self.0.parent {
            let mut state = parent.0.state.lock();
            state.children.retain(|w| w.upgrade().map(|c| c.id != self.0.id).unwrap_or(false));
        }
    }

    async fn wait_for_leases(&self) {
        if self.lease_count() == 0 {
            return;
        }
        let deadline = tokio::time::Instant::now() + DEFAULT_LEASE_GRACE;
        while self.lease_count() > 0 {
            if tokio::time::Instant::now() >= deadline {
                tracing::debug!(
                    target: "pull_core::scope",
                    scope = ?self.0.id,
                    "lease grace period elapsed; finalizing with leases still outstanding"
                );
                break;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }
}

impl std::fmt::Debug for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scope").field("id", &self.0.id).field("level", &self.0.level).finish()
    }
}

/// A token that defers its scope's finalization until [`Lease::cancel`] is
/// called (or the lease is dropped, as a defensive fallback — an
/// uncancelled lease would otherwise deadlock `close` until the grace
/// period elapses).
pub struct Lease {
    scope: Scope,
    released: std::sync::atomic::AtomicBool,
}

impl Lease {
    pub fn cancel(self) -> Result<()> {
        self.released.store(true, std::sync::atomic::Ordering::SeqCst);
        self.scope.release_lease();
        Ok(())
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        if !self.released.swap(true, std::sync::atomic::Ordering::SeqCst) {
            self.scope.release_lease();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn child_finalizers_run_before_parent() {
        let root = Scope::root();
        let child = root.open(false).unwrap();
        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));

        let o1 = order.clone();
        let AcquireOutcome::Succeeded(_) = child
            .acquire_resource(
                Box::pin(async { Ok(()) }),
                Arc::new(move |_: Arc<()>, _| {
                    let o1 = o1.clone();
                    Box::pin(async move {
                        o1.lock().push("child");
                        Ok(())
                    })
                }),
                true,
            )
            .await
        else {
            panic!("expected success")
        };

        let o2 = order.clone();
        let AcquireOutcome::Succeeded(_) = root
            .acquire_resource(
                Box::pin(async { Ok(()) }),
                Arc::new(move |_: Arc<()>, _| {
                    let o2 = o2.clone();
                    Box::pin(async move {
                        o2.lock().push("root");
                        Ok(())
                    })
                }),
                true,
            )
            .await
        else {
            panic!("expected success")
        };

        child.close(ExitCase::Succeeded).await.unwrap();
        root.close(ExitCase::Succeeded).await.unwrap();
        assert_eq!(*order.lock(), vec!["child", "root"]);
    }

    #[tokio::test]
    async fn lifo_finalizer_order_within_one_scope() {
        let root = Scope::root();
        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));
        for label in ["A", "B", "C"] {
            let o = order.clone();
            root.acquire_resource(
                Box::pin(async { Ok(()) }),
                Arc::new(move |_: Arc<()>, _| {
                    let o = o.clone();
                    Box::pin(async move {
                        o.lock().push(label);
                        Ok(())
                    })
                }),
                true,
            )
            .await;
        }
        root.close(ExitCase::Succeeded).await.unwrap();
        assert_eq!(*order.lock(), vec!["C", "B", "A"]);
    }

    #[tokio::test]
    async fn interruption_is_visible_on_descendants() {
        let root = Scope::root();
        let child = root.open(true).unwrap();
        let grandchild = child.open(true).unwrap();
        assert!(grandchild.is_interrupted().is_none());
        child.interrupt_when(Box::pin(async { Ok(()) })).await.unwrap();
        // give the spawned watcher a chance to run
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(grandchild.is_interrupted().is_some());
        assert!(root.is_interrupted().is_none());
        grandchild.close(ExitCase::Canceled).await.unwrap();
        child.close(ExitCase::Canceled).await.unwrap();
    }

    #[tokio::test]
    async fn lease_defers_close() {
        let root = Scope::root();
        let child = root.open(false).unwrap();
        let lease = child.lease().unwrap();
        let closed = Arc::new(AtomicUsize::new(0));
        let c = closed.clone();
        let child2 = child.clone();
        let handle = tokio::spawn(async move {
            child2.close(ExitCase::Succeeded).await.unwrap();
            c.fetch_add(1, Ordering::SeqCst);
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(closed.load(Ordering::SeqCst), 0);
        lease.cancel().unwrap();
        handle.await.unwrap();
        assert_eq!(closed.load(Ordering::SeqCst), 1);
    }
}
