//! CFG build/prune and end-to-end taint throughput on synthetic files.

use std::sync::Arc;

use criterion::{criterion_group, criterion_main, Criterion};
use seep_analysis::catalog::FunctionCatalog;
use seep_analysis::cfg::{build_cfg, prune};
use seep_analysis::engine::Engine;
use seep_analysis::extract::SourceFile;
use seep_analysis::report::CollectingReporter;
use seep_core::ast::{LineSpan, Node, NodeKind};
use seep_core::config::AnalysisConfig;

fn var(line: u32, name: &str) -> Node {
    Node::new(NodeKind::Var, LineSpan::line(line)).with_str("name", name)
}

fn get(line: u32, key: &str) -> Node {
    Node::new(NodeKind::ArrayDim, LineSpan::line(line))
        .with_node("base", var(line, "_GET"))
        .with_node(
            "dim",
            Node::new(NodeKind::LiteralStr, LineSpan::line(line)).with_str("value", key),
        )
}

/// A repetitive but branchy body: assignments from request input,
/// guards, loops, and echo sinks.
fn sample_body(blocks: usize) -> Vec<Arc<Node>> {
    let mut stmts = Vec::with_capacity(blocks);
    let mut line = 1u32;
    for i in 0..blocks {
        let name = format!("v{i}");
        stmts.push(Arc::new(
            Node::new(NodeKind::Assign, LineSpan::line(line))
                .with_node("target", var(line, &name))
                .with_node("value", get(line, &name)),
        ));
        line += 1;
        let guard = Node::new(NodeKind::FunctionCall, LineSpan::line(line))
            .with_str("name", "is_numeric")
            .with_nodes("args", vec![var(line, &name)]);
        let safe_echo = Node::new(NodeKind::Echo, LineSpan::line(line + 1))
            .with_nodes("exprs", vec![var(line + 1, &name)]);
        let raw_echo = Node::new(NodeKind::Echo, LineSpan::line(line + 2))
            .with_nodes("exprs", vec![var(line + 2, &name)]);
        stmts.push(Arc::new(
            Node::new(NodeKind::If, LineSpan::line(line))
                .with_node("cond", guard)
                .with_nodes("then", vec![safe_echo])
                .with_nodes("else", vec![raw_echo]),
        ));
        line += 3;
        let body_assign = Node::new(NodeKind::Assign, LineSpan::line(line + 1))
            .with_node("target", var(line + 1, "acc"))
            .with_node(
                "value",
                Node::new(NodeKind::Concat, LineSpan::line(line + 1))
                    .with_node("left", var(line + 1, "acc"))
                    .with_node("right", var(line + 1, &name)),
            );
        stmts.push(Arc::new(
            Node::new(NodeKind::While, LineSpan::line(line))
                .with_node("cond", var(line, "more"))
                .with_nodes("body", vec![body_assign]),
        ));
        line += 2;
    }
    stmts
}

fn bench_build_prune(c: &mut Criterion) {
    let body = sample_body(100);
    c.bench_function("cfg_build_prune_100", |b| {
        b.iter(|| {
            let mut cfg = build_cfg(std::hint::black_box(&body)).unwrap();
            prune(&mut cfg);
            std::hint::black_box(cfg.block_count())
        })
    });
}

fn bench_analyze(c: &mut Criterion) {
    let engine = Engine::new(FunctionCatalog::with_defaults(), AnalysisConfig::default());
    c.bench_function("taint_analyze_50", |b| {
        b.iter(|| {
            let reporter = CollectingReporter::new();
            let stats = engine.analyze(
                vec![SourceFile { path: "bench.php".into(), body: sample_body(50) }],
                &reporter,
            );
            std::hint::black_box(stats.findings)
        })
    });
}

criterion_group!(benches, bench_build_prune, bench_analyze);
criterion_main!(benches);
