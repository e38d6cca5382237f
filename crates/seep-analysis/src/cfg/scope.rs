//! Construction-time scope tracking.
//!
//! While the builder descends into compound statements it pushes a
//! scope per if/loop/switch so that `break N`, `continue N`, and the
//! pending end-of-scope edges can be wired to the right blocks. Loops
//! and switches additionally form the break-target stack consulted with
//! a "levels to skip" count.

use petgraph::stable_graph::NodeIndex;

/// An `if`/`elseif`/`else` ladder under construction.
#[derive(Debug, Clone)]
pub struct IfScope {
    /// First condition block.
    pub cond: NodeIndex,
    /// Join block every branch tail connects to.
    pub end: NodeIndex,
}

/// A loop under construction (`while`, `do-while`, `for`, `foreach`).
#[derive(Debug, Clone)]
pub struct LoopScope {
    /// Loop header: the condition block, or the body start for
    /// `do-while`.
    pub header: NodeIndex,
    /// First block of the body.
    pub body_start: NodeIndex,
    /// Where `continue` jumps: the condition, the `for` update chain,
    /// or the `foreach` iteration header.
    pub continue_target: NodeIndex,
    /// Loop exit; where `break` jumps.
    pub end: NodeIndex,
}

/// A `switch` under construction.
#[derive(Debug, Clone)]
pub struct SwitchScope {
    /// Subject evaluation block.
    pub subject: NodeIndex,
    /// Entry block of the `default` arm, once seen.
    pub default: Option<NodeIndex>,
    /// Switch exit; where `break` (and `continue`, which the original
    /// language treats identically inside `switch`) jumps.
    pub end: NodeIndex,
}

/// One entry of the scope stack.
#[derive(Debug, Clone)]
pub enum Scope {
    If(IfScope),
    Loop(LoopScope),
    Switch(SwitchScope),
}

impl Scope {
    pub fn end(&self) -> NodeIndex {
        match self {
            Scope::If(s) => s.end,
            Scope::Loop(s) => s.end,
            Scope::Switch(s) => s.end,
        }
    }

    fn is_breakable(&self) -> bool {
        matches!(self, Scope::Loop(_) | Scope::Switch(_))
    }
}

/// Nesting order of open scopes, innermost last.
#[derive(Debug, Default)]
pub struct ScopeStack {
    scopes: Vec<Scope>,
}

impl ScopeStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, scope: Scope) {
        self.scopes.push(scope);
    }

    pub fn pop(&mut self) -> Option<Scope> {
        self.scopes.pop()
    }

    pub fn last_mut(&mut self) -> Option<&mut Scope> {
        self.scopes.last_mut()
    }

    /// Number of scopes `break`/`continue` can target.
    pub fn breakable_depth(&self) -> usize {
        self.scopes.iter().filter(|s| s.is_breakable()).count()
    }

    /// The scope a `break N`/`continue N` addresses: the breakable scope
    /// `level - 1` entries below the innermost one. `None` when `level`
    /// is out of range.
    fn breakable_at(&self, level: i64) -> Option<&Scope> {
        if level < 1 {
            return None;
        }
        self.scopes
            .iter()
            .rev()
            .filter(|s| s.is_breakable())
            .nth(level as usize - 1)
    }

    /// Jump target of `break N`.
    pub fn break_target(&self, level: i64) -> Option<NodeIndex> {
        self.breakable_at(level).map(Scope::end)
    }

    /// Jump target of `continue N`. Inside a `switch`, `continue`
    /// behaves as `break`.
    pub fn continue_target(&self, level: i64) -> Option<NodeIndex> {
        self.breakable_at(level).map(|scope| match scope {
            Scope::Loop(s) => s.continue_target,
            other => other.end(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn idx(i: u32) -> NodeIndex {
        NodeIndex::new(i as usize)
    }

    fn loop_scope(base: u32) -> Scope {
        Scope::Loop(LoopScope {
            header: idx(base),
            body_start: idx(base + 1),
            continue_target: idx(base),
            end: idx(base + 2),
        })
    }

    #[test]
    fn break_levels_skip_if_scopes() {
        let mut stack = ScopeStack::new();
        stack.push(loop_scope(0));
        stack.push(Scope::If(IfScope { cond: idx(10), end: idx(11) }));
        stack.push(loop_scope(20));

        // level 1 targets the inner loop, level 2 the outer one; the if
        // scope in between is not breakable.
        assert_eq!(stack.break_target(1), Some(idx(22)));
        assert_eq!(stack.break_target(2), Some(idx(2)));
        assert_eq!(stack.break_target(3), None);
        assert_eq!(stack.break_target(0), None);
    }

    #[test]
    fn continue_in_switch_behaves_as_break() {
        let mut stack = ScopeStack::new();
        stack.push(Scope::Switch(SwitchScope {
            subject: idx(0),
            default: None,
            end: idx(1),
        }));
        assert_eq!(stack.continue_target(1), Some(idx(1)));
        assert_eq!(stack.break_target(1), Some(idx(1)));
    }
}
