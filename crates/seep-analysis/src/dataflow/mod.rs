//! Worklist-driven fixpoint dataflow over a [`Cfg`].
//!
//! The driver is generic over the analysis: per-block state comes from
//! a join-semilattice, the transfer runs per edge of interest so a
//! branch can push different states down its True and False edges.
//! Pending blocks are ordered by reverse-postorder rank so forward
//! analyses tend to see predecessor state before successor state.
//!
//! Termination needs monotone transfers over a finite-height lattice;
//! the driver additionally enforces the caller-supplied step budget and
//! reports non-convergence instead of looping forever.

use std::collections::BTreeSet;

use petgraph::stable_graph::{EdgeIndex, NodeIndex};
use seep_core::types::collections::{FxHashMap, FxHashSet};
use tracing::warn;

use crate::cfg::graph::EdgeList;
use crate::cfg::{Cfg, CfgEdge};

/// Iteration order over the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Backward,
}

impl Direction {
    /// Blocks the traversal starts from: the root going forward, the
    /// leaves going backward.
    pub fn start_blocks(self, cfg: &Cfg) -> Vec<NodeIndex> {
        match self {
            Direction::Forward => vec![cfg.root],
            Direction::Backward => cfg.leaves(),
        }
    }

    /// Edges leaving `block` in traversal direction, paired with the
    /// endpoint of interest (the block state flows into).
    pub fn edges_out(self, cfg: &Cfg, block: NodeIndex) -> EdgeList {
        match self {
            Direction::Forward => cfg.successors_ordered(block),
            Direction::Backward => cfg.predecessors_ordered(block),
        }
    }

    /// Edges arriving at `block` in traversal direction.
    pub fn edges_in(self, cfg: &Cfg, block: NodeIndex) -> EdgeList {
        match self {
            Direction::Forward => cfg.predecessors_ordered(block),
            Direction::Backward => cfg.successors_ordered(block),
        }
    }
}

/// A dataflow analysis plugged into [`run_fixpoint`].
pub trait Analysis {
    /// Per-edge state. Must form a join-semilattice under
    /// [`join`](Self::join) for the fixpoint to make sense.
    type State: Clone + PartialEq;

    fn direction(&self) -> Direction {
        Direction::Forward
    }

    fn join(&self, a: &Self::State, b: &Self::State) -> Self::State;

    /// Apply `block`'s effect to `state`, producing the state flowing
    /// down `edge`. `edge` is `None` when the block has no edges in
    /// traversal direction (a leaf) — the analysis can still observe
    /// the block's effect, the result is discarded.
    fn transfer(
        &mut self,
        cfg: &Cfg,
        block: NodeIndex,
        edge: Option<(NodeIndex, &CfgEdge)>,
        state: &Self::State,
    ) -> Self::State;
}

/// Outcome of a fixpoint run.
#[derive(Debug)]
pub struct FixpointResult<S> {
    /// Joined incoming state per visited block.
    pub block_in: FxHashMap<NodeIndex, S>,
    /// False when the step budget ran out first.
    pub converged: bool,
    pub steps: usize,
}

impl<S> FixpointResult<S> {
    pub fn state_at(&self, block: NodeIndex) -> Option<&S> {
        self.block_in.get(&block)
    }
}

/// Drive `analysis` over `cfg` to a fixpoint, seeding start blocks with
/// `boundary`.
pub fn run_fixpoint<A: Analysis>(
    cfg: &Cfg,
    analysis: &mut A,
    boundary: A::State,
    max_steps: usize,
) -> FixpointResult<A::State> {
    let direction = analysis.direction();
    let ranks = rpo_ranks(cfg, direction);
    let starts = direction.start_blocks(cfg);
    let start_set: FxHashSet<NodeIndex> = starts.iter().copied().collect();

    let mut edge_out: FxHashMap<EdgeIndex, A::State> = FxHashMap::default();
    let mut block_in: FxHashMap<NodeIndex, A::State> = FxHashMap::default();
    let mut visited: FxHashSet<NodeIndex> = FxHashSet::default();
    let mut worklist: BTreeSet<(usize, NodeIndex)> = starts
        .iter()
        .map(|&b| (rank_of(&ranks, b), b))
        .collect();

    let mut steps = 0usize;
    let mut converged = true;

    while let Some(&entry) = worklist.iter().next() {
        worklist.remove(&entry);
        let (_, block) = entry;
        steps += 1;
        if steps > max_steps {
            warn!(steps, "dataflow did not converge within its step budget");
            converged = false;
            break;
        }

        // Join whatever incoming edge states are known so far; start
        // blocks fold in the boundary state.
        let mut in_state: Option<A::State> =
            start_set.contains(&block).then(|| boundary.clone());
        for (edge, _) in direction.edges_in(cfg, block) {
            if let Some(s) = edge_out.get(&edge) {
                in_state = Some(match in_state {
                    Some(cur) => analysis.join(&cur, s),
                    None => s.clone(),
                });
            }
        }
        let in_state = match in_state {
            Some(s) => s,
            // Only reachable-from-start blocks are enqueued, so some
            // incoming state always exists; keep a safe fallback.
            None => boundary.clone(),
        };

        visited.insert(block);
        let outs = direction.edges_out(cfg, block);
        if outs.is_empty() {
            let _ = analysis.transfer(cfg, block, None, &in_state);
        }
        for (edge, next) in outs {
            let out = analysis.transfer(cfg, block, Some((next, &cfg.graph[edge])), &in_state);
            let changed = edge_out.get(&edge) != Some(&out);
            if changed {
                edge_out.insert(edge, out);
            }
            if changed || !visited.contains(&next) {
                worklist.insert((rank_of(&ranks, next), next));
            }
        }
        block_in.insert(block, in_state);
    }

    FixpointResult { block_in, converged, steps }
}

fn rank_of(ranks: &FxHashMap<NodeIndex, usize>, block: NodeIndex) -> usize {
    ranks.get(&block).copied().unwrap_or(usize::MAX)
}

/// Reverse-postorder ranks: one depth-first pass numbering postorder,
/// reversed. Children are visited in the graph's deterministic edge
/// order, so ranks are reproducible run to run.
fn rpo_ranks(cfg: &Cfg, direction: Direction) -> FxHashMap<NodeIndex, usize> {
    let mut postorder: Vec<NodeIndex> = Vec::with_capacity(cfg.block_count());
    let mut discovered: FxHashSet<NodeIndex> = FxHashSet::default();
    let mut finished: FxHashSet<NodeIndex> = FxHashSet::default();

    for start in direction.start_blocks(cfg) {
        if discovered.contains(&start) {
            continue;
        }
        let mut stack: Vec<(NodeIndex, Vec<NodeIndex>, usize)> = Vec::new();
        discovered.insert(start);
        let children: Vec<NodeIndex> = direction
            .edges_out(cfg, start)
            .into_iter()
            .map(|(_, n)| n)
            .collect();
        stack.push((start, children, 0));

        while let Some((node, children, cursor)) = stack.last_mut() {
            if *cursor < children.len() {
                let child = children[*cursor];
                *cursor += 1;
                if discovered.insert(child) {
                    let grand: Vec<NodeIndex> = direction
                        .edges_out(cfg, child)
                        .into_iter()
                        .map(|(_, n)| n)
                        .collect();
                    stack.push((child, grand, 0));
                }
            } else {
                let node = *node;
                stack.pop();
                if finished.insert(node) {
                    postorder.push(node);
                }
            }
        }
    }

    postorder.reverse();
    postorder.into_iter().enumerate().map(|(rank, n)| (n, rank)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cfg::build_cfg;
    use crate::testutil::*;
    use std::collections::BTreeSet as OrderedSet;

    /// Toy forward analysis: the set of source lines of anchored
    /// statements seen on any path into an edge. Set union is a finite
    /// join-semilattice over a fixed program, so this converges.
    struct LinesSeen {
        direction: Direction,
    }

    impl Analysis for LinesSeen {
        type State = OrderedSet<u32>;

        fn direction(&self) -> Direction {
            self.direction
        }

        fn join(&self, a: &Self::State, b: &Self::State) -> Self::State {
            a.union(b).copied().collect()
        }

        fn transfer(
            &mut self,
            cfg: &Cfg,
            block: NodeIndex,
            _edge: Option<(NodeIndex, &CfgEdge)>,
            state: &Self::State,
        ) -> Self::State {
            let mut out = state.clone();
            if let Some(anchor) = &cfg.graph[block].anchor {
                out.insert(anchor.lines().start);
            }
            out
        }
    }

    #[test]
    fn forward_fixpoint_reaches_exit_with_all_lines() {
        // line 1: $a = 1; line 2: while (c) { line 3: $b = 2; }
        let stmts = vec![
            arc(assign_at(1, var("a"), lit_int(1))),
            arc(while_at(2, var_at(2, "c"), vec![assign_at(3, var("b"), lit_int(2))])),
        ];
        let cfg = build_cfg(&stmts).unwrap();
        let mut analysis = LinesSeen { direction: Direction::Forward };
        let result = run_fixpoint(&cfg, &mut analysis, OrderedSet::new(), 10_000);
        assert!(result.converged);
        let at_exit = result.state_at(cfg.exit).unwrap();
        assert_eq!(at_exit.iter().copied().collect::<Vec<_>>(), vec![1, 2, 3]);
    }

    #[test]
    fn backward_fixpoint_reaches_root() {
        let stmts = vec![
            arc(assign_at(1, var("a"), lit_int(1))),
            arc(assign_at(2, var("b"), lit_int(2))),
        ];
        let cfg = build_cfg(&stmts).unwrap();
        let mut analysis = LinesSeen { direction: Direction::Backward };
        let result = run_fixpoint(&cfg, &mut analysis, OrderedSet::new(), 10_000);
        assert!(result.converged);
        let at_root = result.state_at(cfg.root).unwrap();
        assert_eq!(at_root.iter().copied().collect::<Vec<_>>(), vec![1, 2]);
    }

    #[test]
    fn deterministic_step_counts() {
        let stmts = vec![arc(if_stmt(
            var("c"),
            vec![assign(var("a"), lit_int(1))],
            vec![assign(var("b"), lit_int(2))],
        ))];
        let cfg = build_cfg(&stmts).unwrap();
        let steps: Vec<usize> = (0..3)
            .map(|_| {
                let mut analysis = LinesSeen { direction: Direction::Forward };
                run_fixpoint(&cfg, &mut analysis, OrderedSet::new(), 10_000).steps
            })
            .collect();
        assert_eq!(steps[0], steps[1]);
        assert_eq!(steps[1], steps[2]);
    }

    /// A deliberately non-monotone analysis that flips a bit forever.
    struct Oscillator;

    impl Analysis for Oscillator {
        type State = bool;

        fn join(&self, a: &bool, b: &bool) -> bool {
            *a || *b
        }

        fn transfer(
            &mut self,
            _cfg: &Cfg,
            _block: NodeIndex,
            _edge: Option<(NodeIndex, &CfgEdge)>,
            state: &bool,
        ) -> bool {
            !*state
        }
    }

    #[test]
    fn step_budget_reports_non_convergence() {
        let stmts = vec![arc(while_stmt(var("c"), vec![assign(var("a"), lit_int(1))]))];
        let cfg = build_cfg(&stmts).unwrap();
        let result = run_fixpoint(&cfg, &mut Oscillator, false, 50);
        assert!(!result.converged);
    }
}
