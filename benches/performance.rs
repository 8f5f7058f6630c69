//! Criterion benchmarks for the execution core.
//!
//! Run with: `cargo bench --bench performance`
//!
//! Results are saved to `target/criterion/` with HTML reports.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use gongdb_exec::{
    BinaryOperator, Column, DataType, EngineConfig, Expr, Function, JoinInfo, JoinKind,
    LockManager, Query, QueryEngine, StorageEngine, TableMeta, TableRef, Value,
};

type Engine = QueryEngine<StorageEngine, LockManager>;

/// `t1(id, val)` and `t2(id, val)`, `val` cycling through 100 values.
fn setup(size: i64) -> Engine {
    let mut engine = QueryEngine::new(
        StorageEngine::new_in_memory(),
        LockManager::new(),
        EngineConfig::default().with_query_timeout(None),
    );
    for table in ["t1", "t2"] {
        let storage = engine.catalog_mut();
        storage
            .create_table(TableMeta::new(
                table,
                vec![
                    Column::new("id", DataType::Integer),
                    Column::new("val", DataType::Integer),
                ],
            ))
            .unwrap();
        for i in 0..size {
            storage
                .insert_row(table, &[Value::Integer(i), Value::Integer(i % 100)])
                .unwrap();
        }
    }
    engine
}

fn tables() -> Vec<TableRef> {
    vec![TableRef::new("t1"), TableRef::new("t2")]
}

fn ids() -> Vec<Expr> {
    vec![Expr::column("t1", "id"), Expr::column("t2", "id")]
}

fn bench_select_where(c: &mut Criterion) {
    let engine = setup(10_000);
    c.bench_function("select_where", |b| {
        b.iter(|| {
            let query = Query::new(
                vec![TableRef::new("t1")],
                vec![Expr::column("t1", "id")].into_iter().collect(),
            )
            .with_selection(Expr::binary(
                BinaryOperator::Eq,
                Expr::column("t1", "val"),
                Expr::value(50),
            ));
            black_box(engine.execute(1, black_box(query)).unwrap());
        });
    });
}

fn bench_inner_join(c: &mut Criterion) {
    let mut group = c.benchmark_group("inner_join");
    for size in [100, 1000, 10_000] {
        let engine = setup(size);
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
            b.iter(|| {
                let on = Expr::binary(
                    BinaryOperator::Eq,
                    Expr::column("t1", "id"),
                    Expr::column("t2", "id"),
                );
                let query = Query::new(tables(), ids().into_iter().collect()).with_join(
                    JoinInfo::new(TableRef::new("t1"), TableRef::new("t2"), JoinKind::Inner, Some(on)),
                );
                black_box(engine.execute(1, black_box(query)).unwrap());
            });
        });
    }
    group.finish();
}

fn bench_cross_join(c: &mut Criterion) {
    let mut group = c.benchmark_group("cross_join");
    for size in [10, 100, 300] {
        let engine = setup(size);
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
            b.iter(|| {
                let query = Query::new(tables(), ids().into_iter().collect());
                black_box(engine.execute(1, black_box(query)).unwrap());
            });
        });
    }
    group.finish();
}

fn bench_group_by(c: &mut Criterion) {
    let engine = setup(10_000);
    c.bench_function("group_by_val", |b| {
        b.iter(|| {
            let query = Query::new(
                vec![TableRef::new("t1")],
                vec![
                    Expr::column("t1", "val"),
                    Expr::count(),
                    Expr::function(Function::Sum, Some(Expr::column("t1", "id"))),
                    Expr::function(Function::Avg, Some(Expr::column("t1", "id"))),
                ]
                .into_iter()
                .collect(),
            )
            .with_group_by(vec![Expr::column("t1", "val")]);
            black_box(engine.execute(1, black_box(query)).unwrap());
        });
    });
}

criterion_group!(
    benches,
    bench_select_where,
    bench_inner_join,
    bench_cross_join,
    bench_group_by
);
criterion_main!(benches);
