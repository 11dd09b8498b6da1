//! Apply → call → commit-or-rollback, shared by every optimistic mutation.
//!
//! State lives in a `watch` channel so readers always see whole snapshots.
//! Every change made through this module bumps the state's mutation epoch; an
//! authoritative read that started under an older epoch is stale and is
//! dropped by [`reconcile`].

use std::future::Future;

use tokio::sync::watch;

use crate::remote::RemoteError;

/// State that can be reconciled against authoritative reads.
pub trait Reconcilable {
    /// Counter bumped on every optimistic apply, commit and rollback.
    fn epoch(&self) -> u64;

    fn bump_epoch(&mut self);

    /// Whether authoritative reads must be held back entirely right now.
    fn holds_reads(&self) -> bool {
        false
    }
}

type Revert<'s, S, U> = Box<dyn FnOnce(&mut S, U) + Send + 's>;

/// An optimistic change that has been applied locally and awaits the remote
/// verdict.
///
/// Dropping it without calling [`commit`](Self::commit) or
/// [`rollback`](Self::rollback) (e.g. the caller's future was cancelled)
/// runs the revert so no guard is left set.
pub struct OptimisticMutation<'s, S: Reconcilable, U> {
    store: &'s watch::Sender<S>,
    label: &'static str,
    undo: Option<U>,
    revert: Option<Revert<'s, S, U>>,
}

impl<'s, S: Reconcilable, U> OptimisticMutation<'s, S, U> {
    /// Apply `apply` to the current state.
    ///
    /// `apply` returns the undo token, or `None` to refuse (busy, already in
    /// the target state), in which case nothing changes and `None` is
    /// returned.
    pub fn apply<A, R>(
        store: &'s watch::Sender<S>,
        label: &'static str,
        apply: A,
        revert: R,
    ) -> Option<Self>
    where
        A: FnOnce(&mut S) -> Option<U>,
        R: FnOnce(&mut S, U) + Send + 's,
    {
        let mut undo = None;
        store.send_if_modified(|state| match apply(state) {
            Some(token) => {
                state.bump_epoch();
                undo = Some(token);
                true
            }
            None => false,
        });

        let undo = undo?;
        tracing::debug!(mutation = label, "optimistic change applied");
        Some(Self {
            store,
            label,
            undo: Some(undo),
            revert: Some(Box::new(revert)),
        })
    }

    /// Replace the optimistic change with the confirmed outcome.
    pub fn commit<F>(mut self, confirm: F)
    where
        F: FnOnce(&mut S, U),
    {
        self.revert.take();
        if let Some(undo) = self.undo.take() {
            self.store.send_modify(|state| {
                confirm(state, undo);
                state.bump_epoch();
            });
            tracing::debug!(mutation = self.label, "optimistic change confirmed");
        }
    }

    /// Undo the optimistic change.
    pub fn rollback(mut self) {
        self.run_revert();
    }

    /// Await `call`, then commit with `confirm` on success or roll back on
    /// failure. The remote result is passed through.
    pub async fn settle<T, Fut, F>(self, call: Fut, confirm: F) -> Result<T, RemoteError>
    where
        Fut: Future<Output = Result<T, RemoteError>>,
        F: FnOnce(&mut S, U, &T),
    {
        match call.await {
            Ok(confirmed) => {
                self.commit(|state, undo| confirm(state, undo, &confirmed));
                Ok(confirmed)
            }
            Err(err) => {
                tracing::warn!(
                    mutation = self.label,
                    error = %err,
                    "remote rejected optimistic change, rolling back"
                );
                self.rollback();
                Err(err)
            }
        }
    }

    fn run_revert(&mut self) {
        if let (Some(undo), Some(revert)) = (self.undo.take(), self.revert.take()) {
            self.store.send_modify(|state| {
                revert(state, undo);
                state.bump_epoch();
            });
        }
    }
}

impl<S: Reconcilable, U> Drop for OptimisticMutation<'_, S, U> {
    fn drop(&mut self) {
        if self.undo.is_some() {
            tracing::warn!(
                mutation = self.label,
                "optimistic change abandoned before settling, reverting"
            );
            self.run_revert();
        }
    }
}

/// Apply an authoritative read taken at `seen_epoch`.
///
/// Returns `false` (and leaves state untouched) when a mutation started or
/// settled since the read was issued, or one is still in flight.
pub fn reconcile<S, F>(store: &watch::Sender<S>, seen_epoch: u64, apply: F) -> bool
where
    S: Reconcilable,
    F: FnOnce(&mut S),
{
    store.send_if_modified(|state| {
        if state.epoch() != seen_epoch || state.holds_reads() {
            return false;
        }
        apply(state);
        true
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Default, Clone, PartialEq)]
    struct Counter {
        value: i32,
        busy: bool,
        epoch: u64,
    }

    impl Reconcilable for Counter {
        fn epoch(&self) -> u64 {
            self.epoch
        }

        fn bump_epoch(&mut self) {
            self.epoch += 1;
        }

        fn holds_reads(&self) -> bool {
            self.busy
        }
    }

    fn increment(store: &watch::Sender<Counter>) -> Option<OptimisticMutation<'_, Counter, i32>> {
        OptimisticMutation::apply(
            store,
            "increment",
            |c| {
                if c.busy {
                    return None;
                }
                let before = c.value;
                c.value += 1;
                c.busy = true;
                Some(before)
            },
            |c, before| {
                c.value = before;
                c.busy = false;
            },
        )
    }

    #[tokio::test]
    async fn rollback_restores_previous_state() {
        let (store, _rx) = watch::channel(Counter::default());
        let m = increment(&store).unwrap();
        assert_eq!(store.borrow().value, 1);

        let result: Result<(), _> = m
            .settle(async { Err(RemoteError::Network("down".into())) }, |_, _, _| {})
            .await;

        assert!(result.is_err());
        assert_eq!(store.borrow().value, 0);
        assert!(!store.borrow().busy);
    }

    #[tokio::test]
    async fn commit_applies_confirmed_value() {
        let (store, _rx) = watch::channel(Counter::default());
        let m = increment(&store).unwrap();

        let result = m
            .settle(async { Ok(10) }, |c, _, confirmed| {
                c.value = *confirmed;
                c.busy = false;
            })
            .await;

        assert_eq!(result, Ok(10));
        assert_eq!(store.borrow().value, 10);
    }

    #[test]
    fn guard_refusal_changes_nothing() {
        let (store, _rx) = watch::channel(Counter::default());
        let first = increment(&store).unwrap();
        let epoch = store.borrow().epoch;

        assert!(increment(&store).is_none());
        assert_eq!(store.borrow().epoch, epoch);
        assert_eq!(store.borrow().value, 1);

        first.rollback();
    }

    #[test]
    fn dropping_unsettled_mutation_reverts() {
        let (store, _rx) = watch::channel(Counter::default());
        drop(increment(&store).unwrap());
        assert_eq!(*store.borrow(), Counter { value: 0, busy: false, epoch: 2 });
    }

    #[test]
    fn reconcile_skips_stale_and_in_flight_reads() {
        let (store, _rx) = watch::channel(Counter::default());

        let seen = store.borrow().epoch;
        let m = increment(&store).unwrap();
        let during = store.borrow().epoch;
        assert!(!reconcile(&store, during, |c| c.value = 99));
        m.commit(|c, _| c.busy = false);
        assert!(!reconcile(&store, seen, |c| c.value = 99));

        let fresh = store.borrow().epoch;
        assert!(reconcile(&store, fresh, |c| c.value = 99));
        assert_eq!(store.borrow().value, 99);
    }
}
