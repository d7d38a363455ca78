//! The cancellation scope tree of a single workflow run.
//!
//! Each scope owns the coroutine running inside it along with the ids of the cancellable requests
//! it has in flight. Cancellation walks the tree depth first and skips detached subtrees.

use crate::protocol::commands::CommandName;
use futures_util::{future::LocalBoxFuture, task::ArcWake};
use slotmap::SlotMap;
use std::{
    collections::{BTreeSet, HashMap},
    panic::Location,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

slotmap::new_key_type! {
    /// Identifies a scope within a run
    pub struct ScopeKey;
}

/// Marks a scope as needing to be polled again. Scopes start out woken so they are polled at
/// least once.
pub(crate) struct ScopeWaker {
    woken: AtomicBool,
}

impl ScopeWaker {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            woken: AtomicBool::new(true),
        })
    }

    pub(crate) fn take_woken(&self) -> bool {
        self.woken.swap(false, Ordering::AcqRel)
    }
}

impl ArcWake for ScopeWaker {
    fn wake_by_ref(arc_self: &Arc<Self>) {
        arc_self.woken.store(true, Ordering::Release);
    }
}

/// The last request issued from a scope, kept for stack trace queries
#[derive(Debug, Clone, Copy)]
pub(crate) struct Trace {
    pub(crate) command: CommandName,
    pub(crate) location: &'static Location<'static>,
}

pub(crate) struct ScopeNode {
    pub(crate) parent: Option<ScopeKey>,
    pub(crate) children: Vec<ScopeKey>,
    pub(crate) requests: BTreeSet<u64>,
    pub(crate) cancelled: bool,
    pub(crate) detached: bool,
    pub(crate) coroutine: Option<LocalBoxFuture<'static, ()>>,
    pub(crate) waker: Arc<ScopeWaker>,
    pub(crate) on_cancel: Vec<Box<dyn FnOnce()>>,
    pub(crate) last_trace: Option<Trace>,
    /// Order of creation within the run, used to name the scope
    pub(crate) seq: u32,
}

/// Everything a cancellation touched
#[derive(Default)]
pub(crate) struct Cancellation {
    pub(crate) scopes: Vec<ScopeKey>,
    pub(crate) requests: Vec<u64>,
    pub(crate) handlers: Vec<Box<dyn FnOnce()>>,
}

#[derive(Default)]
pub(crate) struct ScopeTree {
    nodes: SlotMap<ScopeKey, ScopeNode>,
    /// Finished scopes: the parent they had and whether they ended cancelled
    retired: HashMap<ScopeKey, (Option<ScopeKey>, bool)>,
    root: Option<ScopeKey>,
    next_seq: u32,
}

impl ScopeTree {
    /// Insert a scope. Scopes created inside a cancelled, non-detached parent start cancelled.
    /// A finished parent is substituted by its closest live ancestor.
    pub(crate) fn insert(&mut self, parent: Option<ScopeKey>, detached: bool) -> ScopeKey {
        let parent = parent.and_then(|p| self.live(p));
        let cancelled = !detached
            && parent
                .and_then(|p| self.nodes.get(p))
                .is_some_and(|p| p.cancelled);
        let seq = self.next_seq;
        self.next_seq += 1;
        let key = self.nodes.insert(ScopeNode {
            parent,
            children: vec![],
            requests: BTreeSet::new(),
            cancelled,
            detached,
            coroutine: None,
            waker: ScopeWaker::new(),
            on_cancel: vec![],
            last_trace: None,
            seq,
        });
        match parent.and_then(|p| self.nodes.get_mut(p)) {
            Some(p) => p.children.push(key),
            None => {
                if self.root.is_none() {
                    self.root = Some(key);
                }
            }
        }
        key
    }

    pub(crate) fn root(&self) -> Option<ScopeKey> {
        self.root
    }

    pub(crate) fn get(&self, key: ScopeKey) -> Option<&ScopeNode> {
        self.nodes.get(key)
    }

    pub(crate) fn get_mut(&mut self, key: ScopeKey) -> Option<&mut ScopeNode> {
        self.nodes.get_mut(key)
    }

    /// The scope itself if it is still running, otherwise its closest running ancestor
    pub(crate) fn live(&self, mut key: ScopeKey) -> Option<ScopeKey> {
        loop {
            if self.nodes.contains_key(key) {
                return Some(key);
            }
            match self.retired.get(&key) {
                Some((Some(parent), _)) => key = *parent,
                _ => return None,
            }
        }
    }

    /// True if the scope was cancelled. Finished scopes report the state they finished in and
    /// unknown scopes count as cancelled.
    pub(crate) fn is_cancelled(&self, key: ScopeKey) -> bool {
        match self.nodes.get(key) {
            Some(n) => n.cancelled,
            None => self.retired.get(&key).map_or(true, |(_, c)| *c),
        }
    }

    /// Remove a finished scope. Its children are handed to its parent so cancellation still
    /// reaches them.
    pub(crate) fn remove(&mut self, key: ScopeKey) -> Option<ScopeNode> {
        let node = self.nodes.remove(key)?;
        self.retired.insert(key, (node.parent, node.cancelled));
        if let Some(parent) = node.parent.and_then(|p| self.nodes.get_mut(p)) {
            parent.children.retain(|c| *c != key);
            parent.children.extend(node.children.iter().copied());
        }
        for child in &node.children {
            if let Some(c) = self.nodes.get_mut(*child) {
                c.parent = node.parent;
            }
        }
        if self.root == Some(key) {
            self.root = None;
        }
        Some(node)
    }

    /// Mark `key` and every non-detached descendant cancelled, depth first. Returns what must be
    /// cancelled outside the tree: in-flight requests, scope level await groups and handlers.
    pub(crate) fn cancel(&mut self, key: ScopeKey) -> Cancellation {
        let mut out = Cancellation::default();
        self.cancel_rec(key, &mut out);
        out
    }

    fn cancel_rec(&mut self, key: ScopeKey, out: &mut Cancellation) {
        let Some(node) = self.nodes.get_mut(key) else {
            return;
        };
        if !node.cancelled {
            node.cancelled = true;
            out.scopes.push(key);
            out.requests.extend(std::mem::take(&mut node.requests));
            out.handlers.append(&mut node.on_cancel);
        }
        let children: Vec<_> = node.children.clone();
        for child in children {
            if self.nodes.get(child).is_some_and(|c| !c.detached) {
                self.cancel_rec(child, out);
            }
        }
    }

    /// Every scope in depth first order starting at the root
    pub(crate) fn dfs(&self) -> Vec<ScopeKey> {
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut stack: Vec<ScopeKey> = self.root.into_iter().collect();
        while let Some(k) = stack.pop() {
            if let Some(n) = self.nodes.get(k) {
                order.push(k);
                stack.extend(n.children.iter().rev().copied());
            }
        }
        order
    }

    /// Remove every scope, returning the nodes so they can be dropped outside any borrow
    pub(crate) fn drain(&mut self) -> Vec<ScopeNode> {
        self.root = None;
        self.retired.clear();
        self.nodes.drain().map(|(_, n)| n).collect()
    }
}
