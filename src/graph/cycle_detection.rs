use crate::core::wallet::WalletId;
use crate::graph::scc::ComponentIndex;
use crate::graph::want_graph::WantGraph;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

/// A simple directed cycle of wallets in want-direction.
///
/// `wallets[i]` wants an item owned by `wallets[i + 1]`, and the last wallet
/// wants from the first. Always stored in canonical rotation: the smallest
/// wallet identifier first. The reverse direction is a different cycle.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WalletCycle {
    wallets: Vec<WalletId>,
}

impl WalletCycle {
    /// Build a cycle from any rotation of its wallets.
    pub fn canonical(mut wallets: Vec<WalletId>) -> Self {
        if let Some(start) = wallets
            .iter()
            .enumerate()
            .min_by(|a, b| a.1.cmp(b.1))
            .map(|(i, _)| i)
        {
            wallets.rotate_left(start);
        }
        Self { wallets }
    }

    pub fn wallets(&self) -> &[WalletId] {
        &self.wallets
    }

    /// Number of wallets (and want-edges) in the cycle.
    pub fn len(&self) -> usize {
        self.wallets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.wallets.is_empty()
    }

    pub fn contains(&self, wallet: &WalletId) -> bool {
        self.wallets.contains(wallet)
    }
}

/// How a cycle search ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SearchOutcome {
    /// Every path up to the length bound was explored.
    Complete,
    /// The explored-path or time budget ran out; results are partial.
    BudgetExceeded,
    /// The abort predicate fired.
    Cancelled,
}

/// Limits on a single search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchBudget {
    pub max_explored_paths: usize,
    pub time_budget: Option<Duration>,
}

impl SearchBudget {
    pub fn unbounded() -> Self {
        Self {
            max_explored_paths: usize::MAX,
            time_budget: None,
        }
    }

    pub fn paths(max_explored_paths: usize) -> Self {
        Self {
            max_explored_paths,
            time_budget: None,
        }
    }
}

impl Default for SearchBudget {
    fn default() -> Self {
        Self::unbounded()
    }
}

const RUNNING: u8 = 0;
const OVER_BUDGET: u8 = 1;
const CANCELLED: u8 = 2;

/// Progress meter shared by every worker of one search.
///
/// Each path extension calls [`SearchGuard::step`]; once the budget is spent
/// or the abort predicate returns true, all workers stop at their next step.
pub struct SearchGuard<'a> {
    budget: SearchBudget,
    started: Instant,
    explored: AtomicUsize,
    state: AtomicU8,
    abort: Option<&'a (dyn Fn() -> bool + Sync)>,
}

impl<'a> SearchGuard<'a> {
    pub fn new(budget: SearchBudget) -> Self {
        Self {
            budget,
            started: Instant::now(),
            explored: AtomicUsize::new(0),
            state: AtomicU8::new(RUNNING),
            abort: None,
        }
    }

    /// Install a cooperative cancellation check.
    pub fn with_abort(mut self, abort: &'a (dyn Fn() -> bool + Sync)) -> Self {
        self.abort = Some(abort);
        self
    }

    /// Account for one explored path. Returns false when the search must stop.
    pub fn step(&self) -> bool {
        if self.state.load(Ordering::Relaxed) != RUNNING {
            return false;
        }
        let explored = self.explored.fetch_add(1, Ordering::Relaxed) + 1;
        if explored > self.budget.max_explored_paths {
            return self.stop(OVER_BUDGET);
        }
        if self.abort.is_some_and(|abort| abort()) {
            return self.stop(CANCELLED);
        }
        if explored % 64 == 0 {
            if let Some(limit) = self.budget.time_budget {
                if self.started.elapsed() > limit {
                    return self.stop(OVER_BUDGET);
                }
            }
        }
        true
    }

    fn stop(&self, reason: u8) -> bool {
        // first reason wins
        let _ = self
            .state
            .compare_exchange(RUNNING, reason, Ordering::AcqRel, Ordering::Relaxed);
        false
    }

    pub fn explored(&self) -> usize {
        self.explored
            .load(Ordering::Relaxed)
            .min(self.budget.max_explored_paths)
    }

    pub fn outcome(&self) -> SearchOutcome {
        match self.state.load(Ordering::Acquire) {
            RUNNING => SearchOutcome::Complete,
            OVER_BUDGET => SearchOutcome::BudgetExceeded,
            _ => SearchOutcome::Cancelled,
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

/// Result of a collected search.
#[derive(Debug, Clone)]
pub struct CycleSearch {
    pub cycles: Vec<WalletCycle>,
    pub outcome: SearchOutcome,
    pub explored_paths: usize,
}

impl CycleSearch {
    pub fn is_partial(&self) -> bool {
        self.outcome != SearchOutcome::Complete
    }
}

/// Enumerates simple cycles of a want graph up to a maximum length.
///
/// # Algorithm
///
/// Depth-first search from each start wallet, extending the path only to
/// wallets not already on it. A branch ends when it returns to the start (a
/// cycle), when it would exceed `max_length` wallets, or when it runs out of
/// unvisited successors. Found cycles are rotated to canonical form and
/// emitted only the first time that form is seen, so each cycle appears
/// once regardless of which of its wallets the search started from.
///
/// Searches stay inside strongly connected components, which prunes every
/// wallet that cannot take part in any loop.
///
/// # Examples
///
/// ```
/// use tradeloop_engine::prelude::*;
/// use tradeloop_engine::graph::cycle_detection::{CycleEnumerator, SearchBudget, SearchGuard};
/// use std::collections::HashMap;
///
/// let store = PreferenceStore::new();
/// store.upsert_preference(WalletPreference::new("A", ["a"], ["b"]).unwrap()).unwrap();
/// store.upsert_preference(WalletPreference::new("B", ["b"], ["c"]).unwrap()).unwrap();
/// store.upsert_preference(WalletPreference::new("C", ["c"], ["a"]).unwrap()).unwrap();
///
/// let graph = WantGraph::build(&store.snapshot(), &HashMap::new());
/// let guard = SearchGuard::new(SearchBudget::unbounded());
/// let cycles: Vec<_> = CycleEnumerator::new(&graph, 5).iter(&guard).collect();
///
/// assert_eq!(cycles.len(), 1);
/// assert_eq!(cycles[0].len(), 3);
/// ```
pub struct CycleEnumerator<'g> {
    graph: &'g WantGraph,
    index: ComponentIndex,
    max_length: usize,
    focus: Option<WalletId>,
}

impl<'g> CycleEnumerator<'g> {
    pub fn new(graph: &'g WantGraph, max_length: usize) -> Self {
        Self {
            graph,
            index: ComponentIndex::build(graph),
            max_length,
            focus: None,
        }
    }

    /// Only report cycles through this wallet.
    ///
    /// Every cycle containing the wallet is found by a search rooted at it,
    /// so the other start wallets are skipped entirely.
    pub fn focus(mut self, wallet: WalletId) -> Self {
        self.focus = Some(wallet);
        self
    }

    /// Start wallets of the search, in order.
    pub fn roots(&self) -> Vec<&WalletId> {
        match &self.focus {
            Some(wallet) if self.index.is_tradeable(wallet) => vec![wallet],
            Some(_) => Vec::new(),
            None => self.index.tradeable_wallets(),
        }
    }

    /// Lazily enumerate cycles, deduplicated for the lifetime of the iterator.
    pub fn iter<'a>(&'a self, guard: &'a SearchGuard<'a>) -> Cycles<'a> {
        Cycles {
            graph: self.graph,
            index: &self.index,
            guard,
            max_length: self.max_length,
            roots: self.roots(),
            next_root: 0,
            stack: Vec::new(),
            on_path: HashSet::new(),
            seen: HashSet::new(),
            finished: self.max_length < 2,
        }
    }

    /// Collect all cycles on the calling thread.
    pub fn collect(&self, guard: &SearchGuard<'_>) -> CycleSearch {
        let cycles: Vec<WalletCycle> = self.iter(guard).collect();
        CycleSearch {
            cycles,
            outcome: guard.outcome(),
            explored_paths: guard.explored(),
        }
    }

    /// Collect all cycles, one rayon task per start wallet.
    ///
    /// Workers share the guard, so budget and cancellation apply to the
    /// search as a whole. Their raw cycles pass through a single dedup step
    /// in start-wallet order, which makes a complete parallel search return
    /// exactly what [`CycleEnumerator::collect`] returns.
    pub fn collect_parallel(&self, guard: &SearchGuard<'_>) -> CycleSearch {
        let roots = self.roots();
        let per_root: Vec<Vec<WalletCycle>> = roots
            .par_iter()
            .map(|root| {
                let mut rooted = self.iter(guard);
                rooted.roots = vec![*root];
                rooted.collect()
            })
            .collect();

        let mut seen = HashSet::new();
        let cycles = per_root
            .into_iter()
            .flatten()
            .filter(|cycle| seen.insert(cycle.clone()))
            .collect();
        CycleSearch {
            cycles,
            outcome: guard.outcome(),
            explored_paths: guard.explored(),
        }
    }
}

struct Frame<'a> {
    wallet: &'a WalletId,
    successors: Vec<&'a WalletId>,
    next: usize,
}

/// Lazy cycle iterator returned by [`CycleEnumerator::iter`].
///
/// Stops early, without error, when the guard says so; check
/// [`SearchGuard::outcome`] afterwards to tell a complete search from a
/// partial one.
pub struct Cycles<'a> {
    graph: &'a WantGraph,
    index: &'a ComponentIndex,
    guard: &'a SearchGuard<'a>,
    max_length: usize,
    roots: Vec<&'a WalletId>,
    next_root: usize,
    stack: Vec<Frame<'a>>,
    on_path: HashSet<&'a WalletId>,
    seen: HashSet<WalletCycle>,
    finished: bool,
}

impl<'a> Cycles<'a> {
    fn push(&mut self, wallet: &'a WalletId, root: &'a WalletId) {
        let successors = self
            .graph
            .successors(wallet)
            .into_iter()
            .filter(|next| self.index.same_component(root, next))
            .collect();
        self.on_path.insert(wallet);
        self.stack.push(Frame {
            wallet,
            successors,
            next: 0,
        });
    }

    fn halt(&mut self) {
        self.finished = true;
        self.stack.clear();
        self.on_path.clear();
    }
}

impl<'a> Iterator for Cycles<'a> {
    type Item = WalletCycle;

    fn next(&mut self) -> Option<WalletCycle> {
        while !self.finished {
            let Some(top) = self.stack.last_mut() else {
                match self.roots.get(self.next_root).copied() {
                    Some(root) => {
                        self.next_root += 1;
                        self.push(root, root);
                    }
                    None => self.finished = true,
                }
                continue;
            };

            let Some(&next) = top.successors.get(top.next) else {
                let done = top.wallet;
                self.stack.pop();
                self.on_path.remove(done);
                continue;
            };
            top.next += 1;

            if !self.guard.step() {
                self.halt();
                break;
            }

            let root = self.stack[0].wallet;
            let depth = self.stack.len();
            if next == root {
                if depth >= 2 {
                    let path = self.stack.iter().map(|f| f.wallet.clone()).collect();
                    let cycle = WalletCycle::canonical(path);
                    if self.seen.insert(cycle.clone()) {
                        return Some(cycle);
                    }
                }
            } else if depth < self.max_length && !self.on_path.contains(next) {
                self.push(next, root);
            }
        }
        None
    }
}

/// Find every cycle up to `max_length` on the calling thread.
pub fn find_cycles(graph: &WantGraph, max_length: usize, guard: &SearchGuard<'_>) -> CycleSearch {
    CycleEnumerator::new(graph, max_length).collect(guard)
}

/// Find every cycle up to `max_length` using the rayon thread pool.
pub fn find_cycles_parallel(
    graph: &WantGraph,
    max_length: usize,
    guard: &SearchGuard<'_>,
) -> CycleSearch {
    CycleEnumerator::new(graph, max_length).collect_parallel(guard)
}
