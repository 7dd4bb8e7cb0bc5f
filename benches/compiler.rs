//! Compiler benchmarks
//!
//! Run with: cargo bench --bench compiler

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use jscomp::ast::*;
use jscomp::compile_script;

/// Deeply nested binary expression tree.
fn binary_tree(depth: usize) -> Expression {
    if depth == 0 {
        Expression::Number(NumberLiteral {
            idx: 1,
            literal: "1".to_string(),
            value: NumberValue::Int(1),
        })
    } else {
        Expression::Binary(BinaryExpression {
            idx: 1,
            operator: BinaryOp::Add,
            left: Box::new(binary_tree(depth - 1)),
            right: Box::new(binary_tree(depth - 1)),
        })
    }
}

/// A function literal with defaulted parameters and a destructuring body.
fn function_heavy(n: usize) -> Script {
    let params = (0..n)
        .map(|i| BindingElement {
            idx: 1,
            target: Expression::Identifier(Identifier {
                idx: 1,
                name: format!("p{}", i).into(),
            }),
            initializer: Some(Expression::Number(NumberLiteral {
                idx: 1,
                literal: i.to_string(),
                value: NumberValue::Int(i as i64),
            })),
        })
        .collect();
    let body = (0..n)
        .map(|i| {
            Statement::Expression(ExpressionStatement {
                expression: Expression::Identifier(Identifier {
                    idx: 1,
                    name: format!("p{}", i).into(),
                }),
            })
        })
        .collect();
    Script {
        body: vec![Statement::Expression(ExpressionStatement {
            expression: Expression::Function(FunctionLiteral {
                idx: 1,
                name: None,
                parameter_list: ParameterList {
                    list: params,
                    rest: None,
                },
                body,
                source: String::new(),
            }),
        })],
    }
}

fn bench_binary_folding(c: &mut Criterion) {
    let mut group = c.benchmark_group("fold");
    for depth in [8, 12] {
        let script = Script {
            body: vec![Statement::Expression(ExpressionStatement {
                expression: binary_tree(depth),
            })],
        };
        group.bench_with_input(BenchmarkId::from_parameter(depth), &script, |b, script| {
            b.iter(|| compile_script(black_box(script), false).unwrap());
        });
    }
    group.finish();
}

fn bench_function_preamble(c: &mut Criterion) {
    let mut group = c.benchmark_group("preamble");
    for n in [4usize, 16] {
        let script = function_heavy(n);
        group.bench_with_input(BenchmarkId::from_parameter(n), &script, |b, script| {
            b.iter(|| compile_script(black_box(script), false).unwrap());
        });
    }
    group.finish();
}

criterion_group!(benches, bench_binary_folding, bench_function_preamble);
criterion_main!(benches);
