//! CFG construction.
//!
//! One pass over a statement list. Every statement or condition gets its
//! own anchored block; joins and loop headers start as empty blocks the
//! pruner later splices out when they end up on straight-line chains.
//!
//! Structural errors (`break 3` with two loops open, a `goto` with no
//! matching label) abort construction of this one graph and surface as
//! [`CfgError`]; callers skip the offending subroutine and keep going.

use std::sync::Arc;

use petgraph::stable_graph::{NodeIndex, StableDiGraph};
use seep_core::ast::{Node, NodeKind};
use seep_core::errors::CfgError;
use seep_core::types::collections::{FxHashMap, FxHashSet};

use super::graph::{Block, Cfg, CfgEdge, EdgeKind};
use super::scope::{IfScope, LoopScope, Scope, ScopeStack, SwitchScope};

/// Build the control-flow graph of a subroutine or top-level body.
pub fn build_cfg(stmts: &[Arc<Node>]) -> Result<Cfg, CfgError> {
    let mut builder = Builder::new();
    let tail = builder.emit_stmts(builder.root, stmts)?;
    builder.connect(tail, builder.exit, CfgEdge::normal());
    builder.finish()
}

struct Builder {
    graph: StableDiGraph<Block, CfgEdge>,
    root: NodeIndex,
    exit: NodeIndex,
    scopes: ScopeStack,
    /// Label name -> label block, created on first `goto` or label.
    labels: FxHashMap<String, NodeIndex>,
    defined_labels: FxHashSet<String>,
}

impl Builder {
    fn new() -> Self {
        let mut graph = StableDiGraph::new();
        let root = graph.add_node(Block { is_root: true, ..Block::special() });
        let exit = graph.add_node(Block { is_leaf: true, ..Block::special() });
        Self {
            graph,
            root,
            exit,
            scopes: ScopeStack::new(),
            labels: FxHashMap::default(),
            defined_labels: FxHashSet::default(),
        }
    }

    fn finish(mut self) -> Result<Cfg, CfgError> {
        let mut undefined: Vec<&String> = self
            .labels
            .keys()
            .filter(|name| !self.defined_labels.contains(*name))
            .collect();
        undefined.sort();
        if let Some(label) = undefined.first() {
            return Err(CfgError::LabelNotFound { label: (*label).clone() });
        }
        // Jumps and dangling blocks can leave stale leaf flags;
        // recompute from the final shape.
        let indices: Vec<NodeIndex> = self.graph.node_indices().collect();
        for idx in indices {
            let is_leaf = self
                .graph
                .edges_directed(idx, petgraph::Direction::Outgoing)
                .next()
                .is_none();
            self.graph[idx].is_leaf = is_leaf;
        }
        Ok(Cfg { graph: self.graph, root: self.root, exit: self.exit })
    }

    fn add(&mut self, block: Block) -> NodeIndex {
        self.graph.add_node(block)
    }

    fn empty(&mut self) -> NodeIndex {
        self.add(Block::empty())
    }

    fn anchored(&mut self, node: &Arc<Node>) -> NodeIndex {
        self.add(Block::anchored(Arc::clone(node)))
    }

    fn connect(&mut self, from: NodeIndex, to: NodeIndex, edge: CfgEdge) {
        self.graph.add_edge(from, to, edge);
    }

    /// Emit a statement list starting from `current`; returns the tail
    /// block the next statement should chain from.
    fn emit_stmts(
        &mut self,
        mut current: NodeIndex,
        stmts: &[Arc<Node>],
    ) -> Result<NodeIndex, CfgError> {
        for stmt in stmts {
            current = self.emit_stmt(current, stmt)?;
        }
        Ok(current)
    }

    fn emit_stmt(&mut self, current: NodeIndex, stmt: &Arc<Node>) -> Result<NodeIndex, CfgError> {
        match stmt.kind() {
            NodeKind::StmtList => self.emit_stmts(current, stmt.field_list("stmts")),
            NodeKind::If => self.emit_if(current, stmt),
            NodeKind::While => self.emit_while(current, stmt),
            NodeKind::DoWhile => self.emit_do_while(current, stmt),
            NodeKind::For => self.emit_for(current, stmt),
            NodeKind::Foreach => self.emit_foreach(current, stmt),
            NodeKind::Switch => self.emit_switch(current, stmt),
            NodeKind::Break | NodeKind::Continue => self.emit_jump(current, stmt),
            NodeKind::Return | NodeKind::Throw => {
                let block = self.anchored(stmt);
                self.graph[block].breaks_out_of_scope = true;
                self.connect(current, block, CfgEdge::normal());
                self.connect(block, self.exit, CfgEdge::normal());
                Ok(self.empty())
            }
            NodeKind::Goto => {
                let label = stmt.field_str("label").unwrap_or_default().to_string();
                let target = self.label_block(&label);
                self.connect(current, target, CfgEdge::normal());
                Ok(self.empty())
            }
            NodeKind::Label => {
                let name = stmt.field_str("name").unwrap_or_default().to_string();
                let block = self.label_block(&name);
                self.defined_labels.insert(name);
                self.connect(current, block, CfgEdge::normal());
                Ok(block)
            }
            // Declarations are hoisted by the extraction pass; they do
            // not take part in control flow.
            NodeKind::FunctionDecl | NodeKind::ClassDecl | NodeKind::InterfaceDecl => Ok(current),
            // Everything else executes as one straight-line statement.
            _ => {
                let block = self.anchored(stmt);
                self.connect(current, block, CfgEdge::normal());
                Ok(block)
            }
        }
    }

    fn label_block(&mut self, name: &str) -> NodeIndex {
        if let Some(&block) = self.labels.get(name) {
            return block;
        }
        let block = self.empty();
        self.labels.insert(name.to_string(), block);
        block
    }

    /// Open a branch off `src` and emit `stmts` into it.
    fn emit_branch(
        &mut self,
        src: NodeIndex,
        edge: CfgEdge,
        stmts: &[Arc<Node>],
    ) -> Result<NodeIndex, CfgError> {
        let entry = self.empty();
        self.connect(src, entry, edge);
        self.emit_stmts(entry, stmts)
    }

    fn require_field<'n>(
        &self,
        node: &'n Arc<Node>,
        field: &'static str,
    ) -> Result<&'n Arc<Node>, CfgError> {
        node.field(field).ok_or(CfgError::MissingField {
            kind: node.kind(),
            field,
            line: node.lines().start,
        })
    }

    fn emit_if(&mut self, current: NodeIndex, stmt: &Arc<Node>) -> Result<NodeIndex, CfgError> {
        let cond_expr = self.require_field(stmt, "cond")?;
        let cond = self.anchored(cond_expr);
        self.connect(current, cond, CfgEdge::normal());
        let end = self.empty();
        self.scopes.push(Scope::If(IfScope { cond, end }));

        let then_tail = self.emit_branch(cond, CfgEdge::new(EdgeKind::True), stmt.field_list("then"))?;
        self.connect(then_tail, end, CfgEdge::normal());

        // Chain elseif conditions off the false edges.
        let mut false_src = cond;
        for elseif in stmt.field_list("elseifs") {
            let ei_cond_expr = self.require_field(elseif, "cond")?;
            let ei_cond = self.anchored(ei_cond_expr);
            self.connect(false_src, ei_cond, CfgEdge::new(EdgeKind::False));
            let ei_tail =
                self.emit_branch(ei_cond, CfgEdge::new(EdgeKind::True), elseif.field_list("then"))?;
            self.connect(ei_tail, end, CfgEdge::normal());
            false_src = ei_cond;
        }

        let else_stmts = stmt.field_list("else");
        if else_stmts.is_empty() {
            self.connect(false_src, end, CfgEdge::new(EdgeKind::False));
        } else {
            let else_tail = self.emit_branch(false_src, CfgEdge::new(EdgeKind::False), else_stmts)?;
            self.connect(else_tail, end, CfgEdge::normal());
        }

        self.scopes.pop();
        Ok(end)
    }

    fn emit_while(&mut self, current: NodeIndex, stmt: &Arc<Node>) -> Result<NodeIndex, CfgError> {
        let cond_expr = self.require_field(stmt, "cond")?;
        let cond = self.anchored(cond_expr);
        self.connect(current, cond, CfgEdge::normal());
        let end = self.empty();
        let body_start = self.empty();
        self.connect(cond, body_start, CfgEdge::new(EdgeKind::True));
        self.connect(cond, end, CfgEdge::new(EdgeKind::False));

        self.scopes.push(Scope::Loop(LoopScope {
            header: cond,
            body_start,
            continue_target: cond,
            end,
        }));
        let body_tail = self.emit_stmts(body_start, stmt.field_list("body"))?;
        self.connect(body_tail, cond, CfgEdge::normal());
        self.scopes.pop();
        Ok(end)
    }

    fn emit_do_while(&mut self, current: NodeIndex, stmt: &Arc<Node>) -> Result<NodeIndex, CfgError> {
        let cond_expr = self.require_field(stmt, "cond")?;
        let body_start = self.empty();
        self.connect(current, body_start, CfgEdge::normal());
        let cond = self.anchored(cond_expr);
        let end = self.empty();

        self.scopes.push(Scope::Loop(LoopScope {
            header: body_start,
            body_start,
            continue_target: cond,
            end,
        }));
        let body_tail = self.emit_stmts(body_start, stmt.field_list("body"))?;
        self.connect(body_tail, cond, CfgEdge::normal());
        self.connect(cond, body_start, CfgEdge::new(EdgeKind::True));
        self.connect(cond, end, CfgEdge::new(EdgeKind::False));
        self.scopes.pop();
        Ok(end)
    }

    fn emit_for(&mut self, current: NodeIndex, stmt: &Arc<Node>) -> Result<NodeIndex, CfgError> {
        let current = self.emit_stmts(current, stmt.field_list("init"))?;

        let header = match stmt.field("cond") {
            Some(cond_expr) => self.anchored(cond_expr),
            None => self.empty(),
        };
        self.connect(current, header, CfgEdge::normal());
        let end = self.empty();
        let body_start = self.empty();
        if stmt.field("cond").is_some() {
            self.connect(header, body_start, CfgEdge::new(EdgeKind::True));
            self.connect(header, end, CfgEdge::new(EdgeKind::False));
        } else {
            // No condition: the loop only exits through break.
            self.connect(header, body_start, CfgEdge::normal());
        }
        let update_entry = self.empty();

        self.scopes.push(Scope::Loop(LoopScope {
            header,
            body_start,
            continue_target: update_entry,
            end,
        }));
        let body_tail = self.emit_stmts(body_start, stmt.field_list("body"))?;
        self.connect(body_tail, update_entry, CfgEdge::normal());
        let update_tail = self.emit_stmts(update_entry, stmt.field_list("update"))?;
        self.connect(update_tail, header, CfgEdge::normal());
        self.scopes.pop();
        Ok(end)
    }

    fn emit_foreach(&mut self, current: NodeIndex, stmt: &Arc<Node>) -> Result<NodeIndex, CfgError> {
        // The foreach statement itself anchors the iteration header: the
        // transfer function reads subject/key/value bindings off it.
        let header = self.anchored(stmt);
        self.connect(current, header, CfgEdge::normal());
        let end = self.empty();
        let body_start = self.empty();
        self.connect(header, body_start, CfgEdge::new(EdgeKind::True));
        self.connect(header, end, CfgEdge::new(EdgeKind::False));

        self.scopes.push(Scope::Loop(LoopScope {
            header,
            body_start,
            continue_target: header,
            end,
        }));
        let body_tail = self.emit_stmts(body_start, stmt.field_list("body"))?;
        self.connect(body_tail, header, CfgEdge::normal());
        self.scopes.pop();
        Ok(end)
    }

    fn emit_switch(&mut self, current: NodeIndex, stmt: &Arc<Node>) -> Result<NodeIndex, CfgError> {
        let subject_expr = self.require_field(stmt, "subject")?;
        let subject = self.anchored(subject_expr);
        self.connect(current, subject, CfgEdge::normal());
        let end = self.empty();

        self.scopes.push(Scope::Switch(SwitchScope { subject, default: None, end }));

        // Case tests chain off each other's false edges; case bodies
        // fall through to the next body unless they break out.
        let mut test_src = subject;
        let mut test_edge = EdgeKind::Normal;
        let mut prev_body_tail: Option<NodeIndex> = None;
        let mut default_entry: Option<NodeIndex> = None;

        for case in stmt.field_list("cases") {
            let body_entry = self.empty();
            if let Some(pt) = prev_body_tail {
                self.connect(pt, body_entry, CfgEdge::normal());
            }
            match case.field("cond") {
                Some(case_cond) => {
                    let test = self.anchored(case_cond);
                    self.connect(test_src, test, CfgEdge::new(test_edge));
                    self.connect(
                        test,
                        body_entry,
                        CfgEdge::with_case_label(EdgeKind::True, Arc::clone(case_cond)),
                    );
                    test_src = test;
                    test_edge = EdgeKind::False;
                }
                None => {
                    default_entry = Some(body_entry);
                    if let Some(Scope::Switch(s)) = self.scopes.last_mut() {
                        s.default = Some(body_entry);
                    }
                }
            }
            let body_tail = self.emit_stmts(body_entry, case.field_list("body"))?;
            prev_body_tail = Some(body_tail);
        }

        // No case matched: dispatch to default, or straight out.
        self.connect(test_src, default_entry.unwrap_or(end), CfgEdge::new(test_edge));
        if let Some(pt) = prev_body_tail {
            self.connect(pt, end, CfgEdge::normal());
        }

        self.scopes.pop();
        Ok(end)
    }

    fn emit_jump(&mut self, current: NodeIndex, stmt: &Arc<Node>) -> Result<NodeIndex, CfgError> {
        let level = stmt.field_int("level").unwrap_or(1);
        let target = match stmt.kind() {
            NodeKind::Break => self.scopes.break_target(level),
            _ => self.scopes.continue_target(level),
        };
        let target = target.ok_or(CfgError::BreakLevelOutOfRange {
            level,
            depth: self.scopes.breakable_depth(),
            line: stmt.lines().start,
        })?;

        let block = self.anchored(stmt);
        self.graph[block].breaks_out_of_scope = true;
        self.connect(current, block, CfgEdge::normal());
        self.connect(block, target, CfgEdge::normal());
        // Anything following the jump in this branch is unreachable;
        // give it a dangling block for the pruner to sweep away.
        Ok(self.empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::*;
    use petgraph::visit::EdgeRef;
    use petgraph::visit::IntoEdgeReferences;
    use petgraph::Direction;

    fn graph_invariants(cfg: &Cfg) {
        let roots: Vec<_> = cfg
            .graph
            .node_indices()
            .filter(|&n| cfg.graph[n].is_root)
            .collect();
        assert_eq!(roots.len(), 1, "exactly one root block");
        assert!(!cfg.leaves().is_empty(), "at least one leaf block");
        for edge in cfg.graph.edge_references() {
            assert!(cfg.graph.node_weight(edge.source()).is_some());
            assert!(cfg.graph.node_weight(edge.target()).is_some());
        }
    }

    #[test]
    fn straight_line_chains_blocks() {
        let stmts = vec![
            arc(assign(var("a"), lit_int(1))),
            arc(assign(var("b"), lit_int(2))),
        ];
        let cfg = build_cfg(&stmts).unwrap();
        graph_invariants(&cfg);
        // root -> a -> b -> exit
        assert_eq!(cfg.block_count(), 4);
        assert_eq!(cfg.edge_count(), 3);
    }

    #[test]
    fn if_produces_true_false_pair() {
        let stmts = vec![arc(if_stmt(
            var("c"),
            vec![assign(var("a"), lit_int(1))],
            vec![],
        ))];
        let cfg = build_cfg(&stmts).unwrap();
        graph_invariants(&cfg);
        let cond = cfg
            .graph
            .node_indices()
            .find(|&n| {
                cfg.graph[n]
                    .anchor
                    .as_ref()
                    .is_some_and(|a| a.is(seep_core::ast::NodeKind::Var))
            })
            .expect("condition block");
        let kinds: Vec<EdgeKind> = cfg
            .graph
            .edges_directed(cond, Direction::Outgoing)
            .map(|e| e.weight().kind)
            .collect();
        assert!(kinds.contains(&EdgeKind::True));
        assert!(kinds.contains(&EdgeKind::False));
    }

    #[test]
    fn while_has_back_edge() {
        let stmts = vec![arc(while_stmt(var("c"), vec![assign(var("a"), lit_int(1))]))];
        let cfg = build_cfg(&stmts).unwrap();
        graph_invariants(&cfg);
        // One cycle: body tail back to the condition.
        assert!(petgraph::algo::is_cyclic_directed(&cfg.graph));
    }

    #[test]
    fn break_two_targets_outer_loop() {
        // while (c) { while (d) { break 2; } $x = 1; }
        let inner = while_stmt(var("d"), vec![break_stmt(2)]);
        let outer = while_stmt(var("c"), vec![inner, assign(var("x"), lit_int(1))]);
        let cfg = build_cfg(&[arc(outer)]).unwrap();
        graph_invariants(&cfg);

        let break_block = cfg
            .graph
            .node_indices()
            .find(|&n| cfg.graph[n].breaks_out_of_scope)
            .expect("break block");
        let (_, target) = cfg.successors_ordered(break_block)[0];
        // The outer loop's end block chains to the function exit, not
        // back to the inner condition. Walk one Normal hop and require
        // we reach the exit without passing a condition block again.
        let mut seen_conditions = 0;
        let mut at = target;
        for _ in 0..10 {
            if at == cfg.exit {
                break;
            }
            if cfg.graph[at].anchor.is_some() {
                seen_conditions += 1;
            }
            match cfg.successors_ordered(at).first() {
                Some(&(_, next)) => at = next,
                None => break,
            }
        }
        assert_eq!(at, cfg.exit, "break 2 escapes both loops");
        assert_eq!(seen_conditions, 0, "no condition between break target and exit");
    }

    #[test]
    fn break_level_out_of_range_is_build_error() {
        let stmts = vec![arc(while_stmt(var("c"), vec![break_stmt(2)]))];
        let err = build_cfg(&stmts).unwrap_err();
        assert!(matches!(err, CfgError::BreakLevelOutOfRange { level: 2, depth: 1, .. }));
    }

    #[test]
    fn unresolved_goto_label_is_build_error() {
        let stmts = vec![arc(goto_stmt("missing"))];
        let err = build_cfg(&stmts).unwrap_err();
        assert!(matches!(err, CfgError::LabelNotFound { label } if label == "missing"));
    }

    #[test]
    fn goto_forward_wires_to_label() {
        let stmts = vec![
            arc(goto_stmt("skip")),
            arc(assign(var("dead"), lit_int(1))),
            arc(label_stmt("skip")),
            arc(assign(var("live"), lit_int(2))),
        ];
        let cfg = build_cfg(&stmts).unwrap();
        graph_invariants(&cfg);
    }

    #[test]
    fn switch_cases_chain_false_edges_and_fall_through() {
        let sw = switch_stmt(
            var("s"),
            vec![
                case(Some(lit_str("a")), vec![assign(var("x"), lit_int(1))]),
                case(Some(lit_str("b")), vec![assign(var("y"), lit_int(2)), break_stmt(1)]),
                case(None, vec![assign(var("z"), lit_int(3))]),
            ],
        );
        let cfg = build_cfg(&[arc(sw)]).unwrap();
        graph_invariants(&cfg);
        // Two case tests carry a case label on their True edge.
        let labeled = cfg
            .graph
            .edge_references()
            .filter(|e| e.weight().case_label.is_some())
            .count();
        assert_eq!(labeled, 2);
    }
}
