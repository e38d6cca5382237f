//! The per-block taint transfer function.
//!
//! One [`TaintFlow`] instance drives one file's traversal (and,
//! reentrantly, the traversals of called subroutines and included
//! files). The dataflow state is a [`TaintEnv`]: variable identity to
//! expression info. Snapshots at merge points are plain clones; variable
//! identity lives in the shared arena and never forks.

use std::sync::{Arc, Mutex};

use seep_core::ast::{Node, NodeKind};
use seep_core::config::AnalysisConfig;
use seep_core::types::collections::{FxHashMap, FxHashSet};
use tracing::{debug, warn};

use super::condition;
use super::types::{
    ExpressionInfo, ScalarValue, StoredTaint, TaintKind, TaintLevel, TaintSets,
};
use crate::catalog::{FunctionCatalog, FunctionSpec};
use crate::cfg::{build_cfg, prune, Cfg, CfgEdge, EdgeKind};
use crate::dataflow::{run_fixpoint, Analysis, Direction};
use crate::extension::Extensions;
use crate::extract::{DeclRef, File, ProgramRegistry};
use crate::includes::resolve_include;
use crate::report::{Finding, Reporter, VulnKind};
use crate::stored::{StoredCorrelator, StoredReadInfo, StoredVulnerabilityInfo};
use crate::vars::{VarId, VarScope, VarStorage};

/// The dataflow state: what each resolved variable currently holds.
///
/// Missing entries mean "never written on this path"; reads then fall
/// back to the variable's default taint (super-global seeding).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaintEnv {
    map: FxHashMap<VarId, ExpressionInfo>,
}

impl TaintEnv {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: VarId) -> Option<&ExpressionInfo> {
        self.map.get(&id)
    }

    pub fn set(&mut self, id: VarId, info: ExpressionInfo) {
        self.map.insert(id, info);
    }

    pub fn iter(&self) -> impl Iterator<Item = (VarId, &ExpressionInfo)> + '_ {
        self.map.iter().map(|(&id, info)| (id, info))
    }

    /// Merge-point join: union of keys, per-variable info merge.
    pub fn join(&self, other: &TaintEnv) -> TaintEnv {
        let mut map = self.map.clone();
        for (&id, info) in &other.map {
            match map.get_mut(&id) {
                Some(existing) => *existing = existing.merge(info),
                None => {
                    map.insert(id, info.clone());
                }
            }
        }
        TaintEnv { map }
    }
}

/// Function/method call being analyzed, for recursion detection and
/// diagnostics.
#[derive(Debug, Clone)]
pub struct CallFrame {
    pub name: String,
    pub line: u32,
    /// Resolved `file:function` candidates of this call.
    pub candidates: Vec<String>,
}

/// The include stack and call stack active during a traversal.
#[derive(Debug, Default)]
pub struct AnalysisStacks {
    pub includes: Vec<String>,
    pub calls: Vec<CallFrame>,
}

impl AnalysisStacks {
    fn call_strings(&self) -> Vec<String> {
        self.calls.iter().map(|f| format!("{}:{}", f.name, f.line)).collect()
    }

    fn in_call(&self, name: &str) -> bool {
        self.calls.iter().any(|f| f.name.eq_ignore_ascii_case(name))
    }
}

/// Shared, read-mostly context for one whole analysis run.
pub struct RunContext<'a> {
    pub catalog: &'a FunctionCatalog,
    pub program: &'a ProgramRegistry,
    pub config: &'a AnalysisConfig,
    pub extensions: &'a Extensions,
    pub reporter: &'a dyn Reporter,
    pub stored: &'a StoredCorrelator,
    /// Declarations already analyzed somewhere, keyed by node address.
    /// Consulted by scan-all mode.
    pub visited: &'a Mutex<FxHashSet<usize>>,
}

/// Analyze one file's top-level body. Returns false when some traversal
/// hit its step budget (results are then partial but usable).
pub fn analyze_file(cx: &RunContext<'_>, file: &File) -> bool {
    let Some(cfg) = &file.cfg else {
        return true;
    };
    let mut flow = TaintFlow::new(cx, &file.path);
    let result = run_fixpoint(cfg, &mut flow, TaintEnv::new(), step_budget(cx.config, cfg));
    if !result.converged {
        warn!(path = %file.path, "taint traversal stopped at step budget");
    }
    result.converged
}

/// Analyze one subroutine with maximally tainted parameters. Used by
/// scan-all mode to surface sinks in code no observed call site
/// reaches; only the findings matter, the return taint is discarded.
pub fn analyze_subroutine_default(cx: &RunContext<'_>, decl: &DeclRef) {
    let path = cx.program.file(decl.file).path.clone();
    let name = decl.node.field_str("name").unwrap_or("{closure}").to_string();
    let mut flow = TaintFlow::new(cx, &path);
    flow.mark_visited(&decl.node);

    let cfg = match build_cfg(decl.node.field_list("body")) {
        Ok(mut cfg) => {
            prune(&mut cfg);
            cfg
        }
        Err(err) => {
            warn!(subroutine = %name, %err, "skipping subroutine: CFG construction failed");
            return;
        }
    };

    flow.stacks.calls.push(CallFrame {
        name: name.clone(),
        line: decl.node.lines().start,
        candidates: vec![format!("{path}:{name}")],
    });
    flow.storage.push_frame();
    let mut boundary = TaintEnv::new();
    for param in decl.node.field_list("params") {
        if let Some(pname) = param.field_str("name") {
            let resolved = flow.storage.resolve_name(pname);
            boundary.set(resolved.id, ExpressionInfo::opaque());
        }
    }
    flow.return_taints.push(TaintSets::empty());
    let result = run_fixpoint(&cfg, &mut flow, boundary, step_budget(cx.config, &cfg));
    if !result.converged {
        warn!(subroutine = %name, "scan-all traversal stopped at step budget");
    }
}

fn step_budget(config: &AnalysisConfig, cfg: &Cfg) -> usize {
    cfg.block_count().saturating_mul(config.max_passes_per_block).max(64)
}

/// The taint transfer plugged into the worklist driver.
pub struct TaintFlow<'a> {
    cx: &'a RunContext<'a>,
    entry_path: String,
    storage: VarStorage,
    stacks: AnalysisStacks,
    /// Accumulated return taint per active callee traversal.
    return_taints: Vec<TaintSets>,
    /// Findings already emitted this traversal (fixpoint re-visits must
    /// not duplicate them).
    reported: FxHashSet<(String, u32, TaintKind)>,
}

impl<'a> TaintFlow<'a> {
    pub fn new(cx: &'a RunContext<'a>, entry_path: &str) -> Self {
        let mut flow = Self {
            cx,
            entry_path: entry_path.to_string(),
            storage: VarStorage::new(),
            stacks: AnalysisStacks::default(),
            return_taints: Vec::new(),
            reported: FxHashSet::default(),
        };
        flow.stacks.includes.push(entry_path.to_string());
        flow
    }

    fn current_file(&self) -> &str {
        self.stacks.includes.last().map(String::as_str).unwrap_or(&self.entry_path)
    }

    fn mark_visited(&self, decl: &Arc<Node>) {
        self.cx
            .visited
            .lock()
            .expect("visited mutex poisoned")
            .insert(Arc::as_ptr(decl) as usize);
    }

    // ---- statement dispatch ------------------------------------------------

    fn apply_statement(&mut self, node: &Arc<Node>, env: &mut TaintEnv) {
        let info = match node.kind() {
            NodeKind::Assign => {
                self.eval_assign(node, env);
                return;
            }
            NodeKind::Echo => {
                let mut merged = ExpressionInfo::empty();
                for expr in node.field_list("exprs") {
                    let info = self.eval(expr, env);
                    self.check_sink_value(TaintKind::Xss, "echo", node, &info);
                    merged = merged.merge(&info);
                }
                merged
            }
            NodeKind::ExprStmt => match node.field("expr") {
                Some(expr) => self.eval(expr, env),
                None => ExpressionInfo::empty(),
            },
            NodeKind::Global => {
                for var in node.field_list("vars") {
                    if let Some(name) = var.field_str("name") {
                        self.storage.import_global(name);
                    }
                }
                ExpressionInfo::empty()
            }
            NodeKind::Include => {
                self.apply_include(node, env);
                ExpressionInfo::empty()
            }
            NodeKind::Return => {
                let info = match node.field("value") {
                    Some(value) => self.eval(value, env),
                    None => ExpressionInfo::empty(),
                };
                if let Some(top) = self.return_taints.last_mut() {
                    *top = top.merge(&info.taints);
                }
                info
            }
            NodeKind::Foreach => {
                self.apply_foreach(node, env);
                ExpressionInfo::empty()
            }
            NodeKind::Throw => match node.field("value") {
                Some(value) => self.eval(value, env),
                None => ExpressionInfo::empty(),
            },
            NodeKind::Break | NodeKind::Continue => ExpressionInfo::empty(),
            // Condition anchors and expression statements land here.
            _ => self.eval(node, env),
        };
        self.run_block_analyzers(node, info);
    }

    fn run_block_analyzers(&mut self, node: &Arc<Node>, mut info: ExpressionInfo) -> ExpressionInfo {
        let cx = self.cx;
        for analyzer in &cx.extensions.block_analyzers {
            info = analyzer.analyze(node, info, &self.storage, cx.reporter);
        }
        info
    }

    fn eval_assign(&mut self, node: &Arc<Node>, env: &mut TaintEnv) -> ExpressionInfo {
        let (Some(target), Some(value)) = (node.field("target"), node.field("value")) else {
            return ExpressionInfo::empty();
        };
        let mut info = self.eval(value, env);
        // Compound assignment (`.=`, `+=`) keeps the old taint.
        if node.field_str("op").is_some() {
            let old = self.read_target(target, env);
            info = old.merge(&info);
            info.value = None;
        }
        let info = self.run_block_analyzers(node, info);
        self.commit(target, info.clone(), env);
        info
    }

    fn read_target(&mut self, target: &Arc<Node>, env: &TaintEnv) -> ExpressionInfo {
        match self.resolve_seeded(target) {
            Ok(id) => self.read_var(id, env),
            Err(_) => ExpressionInfo::empty(),
        }
    }

    /// Write `info` into the resolved target. Reassignment replaces the
    /// old taint. A target with no static identity conservatively
    /// taints the root of its chain instead of being dropped.
    fn commit(&mut self, target: &Arc<Node>, info: ExpressionInfo, env: &mut TaintEnv) {
        match self.resolve_seeded(target) {
            Ok(id) => {
                if !info.classes.is_empty() {
                    self.storage.var_mut(id).class_hints = info.classes.clone();
                }
                env.set(id, info);
            }
            Err(err) => {
                debug!(%err, "opaque assignment target");
                if let Some(root) = self.storage.resolve_root(target) {
                    let merged = self.read_var(root.id, env).merge(&info);
                    env.set(root.id, merged);
                }
            }
        }
    }

    fn apply_foreach(&mut self, node: &Arc<Node>, env: &mut TaintEnv) {
        let Some(subject) = node.field("subject") else { return };
        let subject_info = self.eval(subject, env);
        // Elements (and keys) of a tainted collection are tainted.
        let element = ExpressionInfo::with_taints(subject_info.taints.clone());
        if let Some(value) = node.field("value") {
            self.commit(value, element.clone(), env);
        }
        if let Some(key) = node.field("key") {
            self.commit(key, element, env);
        }
    }

    fn apply_include(&mut self, node: &Arc<Node>, env: &mut TaintEnv) {
        let Some(expr) = node.field("expr") else { return };
        self.eval(expr, env);
        let current = self.current_file().to_string();
        let Some(target) = resolve_include(expr, &current, self.cx.program) else {
            debug!(file = %current, line = node.lines().start, "include target unknown");
            return;
        };
        let file = self.cx.program.file(target);
        if self.stacks.includes.contains(&file.path) {
            debug!(path = %file.path, "include cycle skipped");
            return;
        }
        let Some(cfg) = &file.cfg else { return };
        // Included code runs at the include site, sharing the current
        // variable environment.
        self.stacks.includes.push(file.path.clone());
        let budget = step_budget(self.cx.config, cfg);
        let result = run_fixpoint(cfg, self, env.clone(), budget);
        if let Some(exit_env) = result.state_at(cfg.exit) {
            *env = exit_env.clone();
        }
        self.stacks.includes.pop();
    }

    // ---- expression evaluation ---------------------------------------------

    fn eval(&mut self, node: &Arc<Node>, env: &mut TaintEnv) -> ExpressionInfo {
        match node.kind() {
            NodeKind::LiteralStr => match node.field_str("value") {
                Some(s) => ExpressionInfo::literal(ScalarValue::Str(s.to_string())),
                None => ExpressionInfo::empty(),
            },
            NodeKind::LiteralInt => match node.field_int("value") {
                Some(i) => ExpressionInfo::literal(ScalarValue::Int(i)),
                None => ExpressionInfo::empty(),
            },
            NodeKind::LiteralBool => match node.field_bool("value") {
                Some(b) => ExpressionInfo::literal(ScalarValue::Bool(b)),
                None => ExpressionInfo::empty(),
            },
            NodeKind::LiteralFloat | NodeKind::LiteralNull => ExpressionInfo::empty(),
            NodeKind::MagicFile => {
                ExpressionInfo::literal(ScalarValue::Str(self.current_file().to_string()))
            }
            NodeKind::MagicDir => {
                let dir = match self.current_file().rfind('/') {
                    Some(pos) => self.current_file()[..pos].to_string(),
                    None => ".".to_string(),
                };
                ExpressionInfo::literal(ScalarValue::Str(dir))
            }
            NodeKind::Var | NodeKind::ArrayDim | NodeKind::PropFetch
            | NodeKind::StaticPropFetch => match self.resolve_seeded(node) {
                Ok(id) => self.read_var(id, env),
                Err(err) => {
                    debug!(%err, "opaque variable read");
                    ExpressionInfo::opaque()
                }
            },
            NodeKind::Assign => self.eval_assign(node, env),
            NodeKind::Concat => self.eval_concat(node, env),
            NodeKind::Binary => {
                if node.field_str("op") == Some(".") {
                    return self.eval_concat(node, env);
                }
                let mut out = ExpressionInfo::empty();
                if let Some(left) = node.field("left") {
                    out = out.merge(&self.eval(left, env));
                }
                if let Some(right) = node.field("right") {
                    out = out.merge(&self.eval(right, env));
                }
                out.value = None;
                out.stored = None;
                out
            }
            NodeKind::Unary => match node.field("expr") {
                Some(expr) => {
                    let mut out = self.eval(expr, env);
                    out.value = None;
                    out
                }
                None => ExpressionInfo::empty(),
            },
            NodeKind::Ternary => {
                if let Some(cond) = node.field("cond") {
                    self.eval(cond, env);
                }
                let then = match node.field("then") {
                    Some(then) => self.eval(then, env),
                    // `$c ?: $e` reuses the condition value; treat as
                    // opaque rather than re-evaluating for effects.
                    None => ExpressionInfo::opaque(),
                };
                match node.field("else") {
                    Some(els) => then.merge(&self.eval(els, env)),
                    None => then,
                }
            }
            NodeKind::Encaps => {
                let mut out = ExpressionInfo::empty();
                for part in node.field_list("parts") {
                    out = out.merge(&self.eval(part, env));
                }
                out.value = None;
                out
            }
            NodeKind::Cast => {
                let inner = match node.field("expr") {
                    Some(expr) => self.eval(expr, env),
                    None => ExpressionInfo::empty(),
                };
                match node.field_str("to") {
                    Some("int" | "integer" | "float" | "double" | "bool" | "boolean") => {
                        ExpressionInfo::empty()
                    }
                    _ => inner,
                }
            }
            NodeKind::ArrayLit => {
                let mut out = ExpressionInfo::empty();
                for item in node.field_list("items") {
                    if let Some(value) = item.field("value") {
                        out = out.merge(&self.eval(value, env));
                    }
                }
                out.value = None;
                out
            }
            NodeKind::Isset => {
                for var in node.field_list("vars") {
                    let _ = self.resolve_seeded(var);
                }
                ExpressionInfo::empty()
            }
            NodeKind::FunctionCall => self.eval_function_call(node, env),
            NodeKind::MethodCall => self.eval_method_call(node, env),
            NodeKind::StaticCall => self.eval_static_call(node, env),
            NodeKind::New => {
                self.eval_args(node, env);
                let mut out = ExpressionInfo::empty();
                if let Some(class) = node.field_str("class") {
                    out.classes = vec![class.to_lowercase()];
                }
                out
            }
            NodeKind::Closure => ExpressionInfo::empty(),
            // Unknown expression shapes stay opaque.
            _ => ExpressionInfo::opaque(),
        }
    }

    fn eval_concat(&mut self, node: &Arc<Node>, env: &mut TaintEnv) -> ExpressionInfo {
        let left = match node.field("left") {
            Some(left) => self.eval(left, env),
            None => ExpressionInfo::empty(),
        };
        let right = match node.field("right") {
            Some(right) => self.eval(right, env),
            None => ExpressionInfo::empty(),
        };
        let mut out = left.merge(&right);
        out.value = concat_values(&left.value, &right.value);
        out.stored = None;
        out
    }

    fn eval_args(&mut self, node: &Arc<Node>, env: &mut TaintEnv) -> Vec<ExpressionInfo> {
        node.field_list("args")
            .iter()
            .map(|arg| self.eval(arg, env))
            .collect()
    }

    fn eval_function_call(&mut self, node: &Arc<Node>, env: &mut TaintEnv) -> ExpressionInfo {
        let Some(name) = node.field_str("name").map(str::to_string) else {
            // Dynamic callee: evaluate arguments, assume the worst.
            self.eval_args(node, env);
            return ExpressionInfo::opaque();
        };
        let args = self.eval_args(node, env);

        let cx = self.cx;
        if let Some(spec) = cx.catalog.lookup(&name) {
            let spec = Arc::clone(spec);
            return self.eval_known_call(&spec, &name, node, &args);
        }

        let decls = cx.program.functions_named(&name);
        if !decls.is_empty() {
            if cx.config.function_summaries {
                let ret = self.analyze_callees(&name, decls, &args, None, node, env);
                return ExpressionInfo::with_taints(ret);
            }
            return ExpressionInfo::opaque();
        }

        debug!(function = %name, "unknown function, conservative taint");
        ExpressionInfo::opaque()
    }

    fn eval_method_call(&mut self, node: &Arc<Node>, env: &mut TaintEnv) -> ExpressionInfo {
        let Some(name) = node.field_str("name").map(str::to_string) else {
            self.eval_args(node, env);
            return ExpressionInfo::opaque();
        };
        let mut hints: Vec<String> = Vec::new();
        if let Some(base) = node.field("base") {
            let base_info = self.eval(base, env);
            hints = base_info.classes;
            if hints.is_empty() {
                if let Ok(resolved) = self.storage.resolve(base) {
                    hints = self.storage.var(resolved.id).class_hints.clone();
                }
            }
        }
        let args = self.eval_args(node, env);
        self.dispatch_method(&name, &hints, node, &args, env)
    }

    fn eval_static_call(&mut self, node: &Arc<Node>, env: &mut TaintEnv) -> ExpressionInfo {
        let Some(name) = node.field_str("name").map(str::to_string) else {
            self.eval_args(node, env);
            return ExpressionInfo::opaque();
        };
        let hints: Vec<String> = node
            .field_str("class")
            .map(|c| vec![c.to_lowercase()])
            .unwrap_or_default();
        let args = self.eval_args(node, env);
        self.dispatch_method(&name, &hints, node, &args, env)
    }

    fn dispatch_method(
        &mut self,
        name: &str,
        hints: &[String],
        node: &Arc<Node>,
        args: &[ExpressionInfo],
        env: &mut TaintEnv,
    ) -> ExpressionInfo {
        let cx = self.cx;
        for class in hints {
            if let Some(spec) = cx.catalog.lookup_method(class, name) {
                let spec = Arc::clone(spec);
                let qualified = format!("{class}::{name}");
                return self.eval_known_call(&spec, &qualified, node, args);
            }
        }
        if cx.config.function_summaries {
            let mut decls: Vec<DeclRef> = Vec::new();
            for class in hints {
                decls.extend(cx.program.methods_named(class, name));
            }
            if !decls.is_empty() {
                let ret = self.analyze_callees(name, &decls, args, Some(hints), node, env);
                return ExpressionInfo::with_taints(ret);
            }
        }
        debug!(method = %name, "unresolved method call, conservative taint");
        ExpressionInfo::opaque()
    }

    // ---- catalog-classified calls ------------------------------------------

    fn eval_known_call(
        &mut self,
        spec: &FunctionSpec,
        name: &str,
        node: &Arc<Node>,
        args: &[ExpressionInfo],
    ) -> ExpressionInfo {
        if spec.is_sink() {
            self.check_sink_call(spec, node, args);
        }

        if let Some(read) = spec.store_read {
            let channel = args
                .get(read.channel_param.saturating_sub(1))
                .and_then(|a| a.value.as_ref())
                .and_then(ScalarValue::as_str);
            return match channel {
                Some(channel) => ExpressionInfo {
                    stored: Some(StoredTaint {
                        channel: channel.to_string(),
                        origin: spec.name.clone(),
                    }),
                    ..ExpressionInfo::empty()
                },
                None => {
                    debug!(function = %name, "storage read with dynamic channel");
                    ExpressionInfo::empty()
                }
            };
        }

        if let Some(write) = spec.store_write {
            self.record_store_write(spec, write, node, args);
            return ExpressionInfo::empty();
        }

        if !spec.sources.is_empty() {
            let mut taints = TaintSets::empty();
            for &kind in &spec.sources {
                taints = taints.merge(&match kind {
                    TaintKind::Sql => TaintSets {
                        sql: crate::taint::types::TaintSet::tainted(),
                        ..TaintSets::empty()
                    },
                    TaintKind::Xss => TaintSets {
                        xss: crate::taint::types::TaintSet::tainted(),
                        ..TaintSets::empty()
                    },
                });
            }
            return ExpressionInfo::with_taints(taints);
        }

        if spec.is_sanitizer() {
            let mut merged = ExpressionInfo::empty();
            for (i, arg) in args.iter().enumerate() {
                let sanitized_here = TaintKind::ALL
                    .iter()
                    .any(|&kind| spec.sanitize.matches(kind, i));
                if sanitized_here {
                    merged = merged.merge(arg);
                }
            }
            let mut taints = merged.taints;
            for kind in TaintKind::ALL {
                if spec.sanitize.get(kind).is_empty() {
                    continue;
                }
                taints = if spec.partial {
                    taints.capped(kind, TaintLevel::PartiallyQuoted)
                } else {
                    taints.sanitized(kind)
                };
            }
            if spec.returns_clean() {
                return ExpressionInfo::empty();
            }
            return ExpressionInfo::with_taints(taints);
        }

        if spec.returns_clean() || spec.is_sink() {
            return ExpressionInfo::empty();
        }

        // Known, unclassified function: taint passes through.
        let mut out = ExpressionInfo::empty();
        for arg in args {
            out.taints = out.taints.merge(&arg.taints);
        }
        out
    }

    fn check_sink_call(&mut self, spec: &FunctionSpec, node: &Arc<Node>, args: &[ExpressionInfo]) {
        for kind in TaintKind::ALL {
            if spec.sink.get(kind).is_empty() {
                continue;
            }
            for (i, arg) in args.iter().enumerate() {
                if spec.sink.matches(kind, i) {
                    self.check_sink_value(kind, &spec.name, node, arg);
                }
            }
        }
    }

    /// One sensitive value reaching a sink: report direct taint, record
    /// storage-backed reads for later correlation.
    fn check_sink_value(
        &mut self,
        kind: TaintKind,
        sink_name: &str,
        node: &Arc<Node>,
        info: &ExpressionInfo,
    ) {
        if let Some(stored) = &info.stored {
            self.cx.stored.record_read(StoredReadInfo {
                channel: stored.channel.clone(),
                origin: stored.origin.clone(),
                sink_kind: kind,
                file: self.current_file().to_string(),
                line: node.lines().start,
                include_stack: self.stacks.includes.clone(),
                call_stack: self.stacks.call_strings(),
            });
        }
        if info.taints.get(kind).is_tainted() {
            debug!(
                origins = ?info.taints.get(kind).origins(),
                sink = %sink_name,
                "tainted value reached sink"
            );
            self.report_finding(kind, sink_name, node);
        }
    }

    fn report_finding(&mut self, kind: TaintKind, sink_name: &str, node: &Arc<Node>) {
        let file = self.current_file().to_string();
        let line = node.lines().start;
        if !self.reported.insert((file.clone(), line, kind)) {
            return;
        }
        debug!(%kind, sink = %sink_name, %file, line, "vulnerability found");
        let candidates = self
            .stacks
            .calls
            .last()
            .map(|f| f.candidates.clone())
            .unwrap_or_default();
        self.cx.reporter.report(Finding {
            kind: VulnKind::direct(kind),
            message: format!("{kind} vulnerability found"),
            file,
            line,
            include_stack: self.stacks.includes.clone(),
            call_stack: self.stacks.call_strings(),
            candidates,
        });
    }

    fn record_store_write(
        &mut self,
        spec: &FunctionSpec,
        write: crate::catalog::StoreWriteSpec,
        node: &Arc<Node>,
        args: &[ExpressionInfo],
    ) {
        let channel = args
            .get(write.channel_param.saturating_sub(1))
            .and_then(|a| a.value.as_ref())
            .and_then(ScalarValue::as_str);
        let Some(channel) = channel else {
            debug!(function = %spec.name, "storage write with dynamic channel");
            return;
        };
        let value = args
            .get(write.value_param.saturating_sub(1))
            .cloned()
            .unwrap_or_default();
        self.cx.stored.record_write(StoredVulnerabilityInfo {
            channel: channel.to_string(),
            origin: spec.name.clone(),
            taints: value.taints,
            file: self.current_file().to_string(),
            line: node.lines().start,
            include_stack: self.stacks.includes.clone(),
            call_stack: self.stacks.call_strings(),
            read_back: false,
        });
    }

    // ---- user-declared callees ---------------------------------------------

    /// Analyze the candidate declarations of a call with the caller's
    /// argument taints, merging their return taints. Recursive calls
    /// contribute nothing further.
    fn analyze_callees(
        &mut self,
        name: &str,
        decls: &[DeclRef],
        args: &[ExpressionInfo],
        receiver_classes: Option<&[String]>,
        call_node: &Arc<Node>,
        env: &mut TaintEnv,
    ) -> TaintSets {
        if self.stacks.in_call(name) {
            debug!(function = %name, "recursive call, no additional taint");
            return TaintSets::empty();
        }

        let candidates: Vec<String> = decls
            .iter()
            .map(|d| format!("{}:{}", self.cx.program.file(d.file).path, name))
            .collect();

        let mut out = TaintSets::empty();
        let mut merged_exit: Option<TaintEnv> = None;

        for decl in decls {
            self.mark_visited(&decl.node);
            let cfg = match build_cfg(decl.node.field_list("body")) {
                Ok(mut cfg) => {
                    prune(&mut cfg);
                    cfg
                }
                Err(err) => {
                    warn!(subroutine = %name, %err, "skipping subroutine: CFG construction failed");
                    continue;
                }
            };

            self.stacks.calls.push(CallFrame {
                name: name.to_string(),
                line: call_node.lines().start,
                candidates: candidates.clone(),
            });
            self.storage.push_frame();

            let mut boundary = env.clone();
            if let Some(classes) = receiver_classes {
                let this = self.storage.resolve_name("this");
                self.storage.var_mut(this.id).class_hints = classes.to_vec();
            }
            for (i, param) in decl.node.field_list("params").iter().enumerate() {
                let Some(pname) = param.field_str("name") else { continue };
                let resolved = self.storage.resolve_name(pname);
                let info = match args.get(i) {
                    Some(info) => info.clone(),
                    None => match param.field("default") {
                        Some(default) => self.eval(default, &mut boundary),
                        None => ExpressionInfo::empty(),
                    },
                };
                boundary.set(resolved.id, info);
            }

            self.return_taints.push(TaintSets::empty());
            let budget = step_budget(self.cx.config, &cfg);
            let result = run_fixpoint(&cfg, self, boundary, budget);
            let ret = self.return_taints.pop().unwrap_or_default();

            self.storage.pop_frame();
            self.stacks.calls.pop();

            if let Some(exit_env) = result.state_at(cfg.exit) {
                merged_exit = Some(match merged_exit {
                    Some(m) => m.join(exit_env),
                    None => exit_env.clone(),
                });
            }
            out = out.merge(&ret);
        }

        // Effects on globals, super-globals, and members persist past
        // the call. Callee-local ids are fresh per invocation and must
        // not leak into the caller state, or a call site inside a loop
        // would never reach a fixpoint.
        if let Some(exit) = merged_exit {
            let mut next = env.clone();
            for (id, info) in exit.iter() {
                if env.get(id).is_some() || self.storage.var(id).scope != VarScope::Function {
                    next.set(id, info.clone());
                }
            }
            *env = next;
        }
        out
    }

    // ---- variable access ---------------------------------------------------

    /// Resolve a variable-shaped node, seeding the root variable's
    /// default taint the first time its name is seen.
    fn resolve_seeded(
        &mut self,
        node: &Arc<Node>,
    ) -> Result<VarId, seep_core::errors::ResolveError> {
        if let Some(root) = self.storage.resolve_root(node) {
            if root.is_new {
                self.seed_root(root.id);
            }
        }
        self.storage.resolve(node).map(|r| r.id)
    }

    fn seed_root(&mut self, id: VarId) {
        let var = self.storage.var(id);
        if var.default_taint.is_some() {
            return;
        }
        let bare = var.name.trim_start_matches('$').to_string();
        let scope = var.scope;
        let seeded = self
            .cx
            .extensions
            .taint_seeder
            .as_ref()
            .and_then(|s| s.default_taint(scope, &bare))
            .or_else(|| builtin_default_taint(scope, &bare));
        if let Some(taints) = seeded {
            let var = self.storage.var_mut(id);
            var.default_taint = Some(taints.clone());
            var.default_child_taint = Some(taints);
        }
    }

    /// Read a resolved variable: current env value, else its default.
    /// A tainted read records the variable itself as provenance.
    fn read_var(&mut self, id: VarId, env: &TaintEnv) -> ExpressionInfo {
        if let Some(info) = env.get(id) {
            let mut out = info.clone();
            if !out.taints.is_empty() {
                let name = self.storage.var(id).name.clone();
                out.taints = out.taints.attributed_to(&name);
            }
            return out;
        }
        let var = self.storage.var(id);
        match &var.default_taint {
            Some(taints) if !taints.is_empty() => {
                let name = var.name.clone();
                let taints = taints.clone();
                ExpressionInfo::with_taints(taints.attributed_to(&name))
            }
            _ => ExpressionInfo::empty(),
        }
    }
}

/// Request super-globals are attacker-controlled by default; the host
/// can override via a [`crate::extension::TaintSeeder`].
fn builtin_default_taint(scope: VarScope, name: &str) -> Option<TaintSets> {
    if scope != VarScope::SuperGlobal {
        return None;
    }
    match name {
        "_GET" | "_POST" | "_REQUEST" | "_COOKIE" | "_SERVER" | "_FILES" => {
            Some(TaintSets::tainted())
        }
        _ => None,
    }
}

fn concat_values(left: &Option<ScalarValue>, right: &Option<ScalarValue>) -> Option<ScalarValue> {
    let render = |v: &ScalarValue| match v {
        ScalarValue::Str(s) => Some(s.clone()),
        ScalarValue::Int(i) => Some(i.to_string()),
        ScalarValue::Bool(_) => None,
    };
    match (left, right) {
        (Some(l), Some(r)) => Some(ScalarValue::Str(format!("{}{}", render(l)?, render(r)?))),
        _ => None,
    }
}

impl<'a> Analysis for TaintFlow<'a> {
    type State = TaintEnv;

    fn direction(&self) -> Direction {
        Direction::Forward
    }

    fn join(&self, a: &TaintEnv, b: &TaintEnv) -> TaintEnv {
        a.join(b)
    }

    fn transfer(
        &mut self,
        cfg: &Cfg,
        block: petgraph::stable_graph::NodeIndex,
        edge: Option<(petgraph::stable_graph::NodeIndex, &CfgEdge)>,
        state: &TaintEnv,
    ) -> TaintEnv {
        let mut env = state.clone();
        if let Some(anchor) = cfg.graph[block].anchor.as_ref().map(Arc::clone) {
            self.apply_statement(&anchor, &mut env);
            if let Some((_, cfg_edge)) = edge {
                match cfg_edge.kind {
                    EdgeKind::True => condition::narrow(&mut self.storage, &anchor, true, &mut env),
                    EdgeKind::False => {
                        condition::narrow(&mut self.storage, &anchor, false, &mut env)
                    }
                    EdgeKind::Normal => {}
                }
            }
        }
        env
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::taint::types::TaintSet;

    #[test]
    fn env_join_unions_and_merges() {
        let mut storage = VarStorage::new();
        let x = storage.resolve_name("x");
        let y = storage.resolve_name("y");

        let mut a = TaintEnv::new();
        a.set(x.id, ExpressionInfo::with_taints(TaintSets::tainted()));
        let mut b = TaintEnv::new();
        b.set(y.id, ExpressionInfo::with_taints(TaintSets {
            xss: TaintSet::tainted(),
            ..TaintSets::empty()
        }));

        let joined = a.join(&b);
        assert!(joined.get(x.id).unwrap().taints.sql.is_tainted());
        assert!(joined.get(y.id).unwrap().taints.xss.is_tainted());
        assert!(!joined.get(y.id).unwrap().taints.sql.is_tainted());
        assert_eq!(a.join(&b), b.join(&a));
    }

    #[test]
    fn env_join_is_idempotent() {
        let mut storage = VarStorage::new();
        let x = storage.resolve_name("x");
        let mut a = TaintEnv::new();
        a.set(x.id, ExpressionInfo::with_taints(TaintSets::tainted()));
        assert_eq!(a.join(&a), a);
    }
}
