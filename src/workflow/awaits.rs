//! Condition groups created by `await`.
//!
//! Every call registers its still-false predicates as one group. Predicates are re-evaluated
//! each time the run is driven; the first one found true resolves the call and removes the whole
//! group, so no sibling entry outlives it.

use crate::{
    errors::WorkflowError,
    promise::{any, race, CompletableResult, Deferred},
    workflow::scope::ScopeKey,
};
use itertools::{Either, Itertools};
use std::{
    cell::RefCell,
    fmt::{Debug, Formatter},
    rc::{Rc, Weak},
};
use uuid::Uuid;

type Predicate = Box<dyn FnMut() -> bool>;

/// Something a workflow can wait on
pub enum AwaitCondition {
    /// Satisfied once the closure returns true
    Predicate(Predicate),
    /// Satisfied once the result fulfills
    Promise(CompletableResult<()>),
}

impl AwaitCondition {
    pub fn predicate(f: impl FnMut() -> bool + 'static) -> Self {
        Self::Predicate(Box::new(f))
    }

    pub fn promise<T: Clone + 'static>(p: &CompletableResult<T>) -> Self {
        Self::Promise(p.map(|_| ()))
    }
}

impl<T: Clone + 'static> From<CompletableResult<T>> for AwaitCondition {
    fn from(p: CompletableResult<T>) -> Self {
        Self::promise(&p)
    }
}

impl Debug for AwaitCondition {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            AwaitCondition::Predicate(_) => f.write_str("Predicate"),
            AwaitCondition::Promise(p) => write!(f, "Promise({p:?})"),
        }
    }
}

struct ConditionGroup {
    id: Uuid,
    scope: ScopeKey,
    entries: Vec<(Predicate, Deferred<()>)>,
    abort: Deferred<()>,
}

/// Pending condition groups of one run, in creation order
#[derive(Default)]
pub(crate) struct AwaitResolver {
    groups: Rc<RefCell<Vec<ConditionGroup>>>,
}

impl AwaitResolver {
    /// Wait until any condition is met. Resolves to `true` right away, without registering
    /// anything, if a predicate is already satisfied.
    pub(crate) fn await_any(
        &self,
        scope: ScopeKey,
        conditions: Vec<AwaitCondition>,
    ) -> CompletableResult<bool> {
        let (mut predicates, promises): (Vec<Predicate>, Vec<CompletableResult<()>>) = conditions
            .into_iter()
            .partition_map(|c| match c {
                AwaitCondition::Predicate(p) => Either::Left(p),
                AwaitCondition::Promise(p) => Either::Right(p),
            });
        if predicates.is_empty() && promises.is_empty() {
            return CompletableResult::rejected(WorkflowError::InvalidArgument(
                "At least one condition must be provided to await".to_string(),
            ));
        }
        if predicates.iter_mut().any(|p| p()) {
            return CompletableResult::resolved(true);
        }

        let id = Uuid::new_v4();
        let entries: Vec<_> = predicates
            .into_iter()
            .map(|p| (p, Deferred::new()))
            .collect();
        let candidates = entries
            .iter()
            .map(|(_, d)| d.promise())
            .chain(promises)
            .collect_vec();
        let abort = Deferred::new();
        let result = race([any(candidates), abort.promise()]);
        self.groups.borrow_mut().push(ConditionGroup {
            id,
            scope,
            entries,
            abort,
        });
        trace!(group = %id, "Registered await condition group");

        let groups = Rc::downgrade(&self.groups);
        result.on_settled(move |_| remove_group(&groups, id));
        result.map(|_| true)
    }

    /// Evaluate every pending predicate. Groups with a satisfied predicate are removed first and
    /// resolved afterwards, so resolution handlers observe the group already gone.
    pub(crate) fn evaluate(&self) {
        let satisfied = {
            let mut groups = self.groups.borrow_mut();
            let mut satisfied = vec![];
            groups.retain_mut(|g| {
                let hit = g
                    .entries
                    .iter_mut()
                    .find_map(|(pred, d)| pred().then(|| d.clone()));
                match hit {
                    Some(d) => {
                        satisfied.push(d);
                        false
                    }
                    None => true,
                }
            });
            satisfied
        };
        for d in satisfied {
            d.resolve(());
        }
    }

    /// Reject every group created in one of the given scopes
    pub(crate) fn reject_scopes(&self, scopes: &[ScopeKey]) {
        let aborts: Vec<_> = self
            .groups
            .borrow()
            .iter()
            .filter(|g| scopes.contains(&g.scope))
            .map(|g| g.abort.clone())
            .collect();
        for a in aborts {
            a.reject(WorkflowError::cancelled("Await was cancelled with its scope"));
        }
    }

    /// Number of predicates still waiting across all groups
    #[cfg(test)]
    pub(crate) fn pending_entries(&self) -> usize {
        self.groups.borrow().iter().map(|g| g.entries.len()).sum()
    }

    #[cfg(test)]
    pub(crate) fn group_count(&self) -> usize {
        self.groups.borrow().len()
    }

    /// Drop every group without settling it
    pub(crate) fn destroy(&self) {
        let dropped = std::mem::take(&mut *self.groups.borrow_mut());
        drop(dropped);
    }
}

fn remove_group(groups: &Weak<RefCell<Vec<ConditionGroup>>>, id: Uuid) {
    if let Some(groups) = groups.upgrade() {
        let removed = {
            let mut g = groups.borrow_mut();
            g.iter().position(|g| g.id == id).map(|pos| g.remove(pos))
        };
        drop(removed);
    }
}
