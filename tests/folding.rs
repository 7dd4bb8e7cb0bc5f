//! Tests for compile-time constant folding and typed-exception
//! re-emission.

use num_bigint::BigInt;
use std::rc::Rc;

use jscomp::ast::*;
use jscomp::{compile_script, JsValue, Op, PrgRef};

fn num(v: i64) -> Expression {
    Expression::Number(NumberLiteral {
        idx: 1,
        literal: v.to_string(),
        value: NumberValue::Int(v),
    })
}

fn flt(v: f64) -> Expression {
    Expression::Number(NumberLiteral {
        idx: 1,
        literal: v.to_string(),
        value: NumberValue::Float(v),
    })
}

fn bigint(v: i64) -> Expression {
    Expression::BigInt(BigIntLiteral {
        idx: 1,
        literal: format!("{}n", v),
        value: BigInt::from(v),
    })
}

fn str_lit(s: &str) -> Expression {
    Expression::String(StringLiteral {
        idx: 1,
        value: s.into(),
    })
}

fn boolean(v: bool) -> Expression {
    Expression::Boolean(BooleanLiteral { idx: 1, value: v })
}

fn ident(name: &str) -> Expression {
    Expression::Identifier(Identifier {
        idx: 1,
        name: name.into(),
    })
}

fn bin(op: BinaryOp, left: Expression, right: Expression) -> Expression {
    Expression::Binary(BinaryExpression {
        idx: 1,
        operator: op,
        left: Box::new(left),
        right: Box::new(right),
    })
}

fn un(op: UnaryOp, operand: Expression) -> Expression {
    Expression::Unary(UnaryExpression {
        idx: 1,
        operator: op,
        postfix: false,
        operand: Box::new(operand),
    })
}

fn compile_expr(e: Expression) -> PrgRef {
    let script = Script {
        body: vec![Statement::Expression(ExpressionStatement { expression: e })],
    };
    compile_script(&script, false).expect("compile failed")
}

/// The folded value: the program must consist of exactly the prologue, a
/// single literal load and Halt.
fn folded(e: Expression) -> JsValue {
    let prg = compile_expr(e);
    let prg = prg.borrow();
    match &prg.code[..] {
        [Op::EnterFuncBody { .. }, Op::LoadVal(idx), Op::Halt] => {
            prg.literals[*idx as usize].clone()
        }
        other => panic!("expression did not fold: {:?}", other),
    }
}

/// The re-emitted exception (error name, message) of a folded throw.
fn folded_throw(e: Expression) -> (String, JsValue) {
    let prg = compile_expr(e);
    let prg = prg.borrow();
    match &prg.code[..] {
        [Op::EnterFuncBody { .. }, Op::LoadDynamic(name), Op::LoadVal(msg), Op::New(1), Op::Throw, Op::Halt] => {
            (name.as_str().to_string(), prg.literals[*msg as usize].clone())
        }
        other => panic!("expression did not fold to a throw: {:?}", other),
    }
}

// ── arithmetic ──────────────────────────────────────────────────────────────

#[test]
fn arithmetic_folds() {
    assert_eq!(folded(bin(BinaryOp::Add, num(2), num(3))), JsValue::Number(5.0));
    assert_eq!(folded(bin(BinaryOp::Mul, num(6), num(7))), JsValue::Number(42.0));
    assert_eq!(folded(bin(BinaryOp::Mod, num(5), num(2))), JsValue::Number(1.0));
}

#[test]
fn nested_constants_fold_once() {
    // (1 + 2) * 3 folds to a single literal.
    let expr = bin(BinaryOp::Mul, bin(BinaryOp::Add, num(1), num(2)), num(3));
    assert_eq!(folded(expr), JsValue::Number(9.0));
}

#[test]
fn division_by_zero_folds_to_infinity() {
    assert_eq!(
        folded(bin(BinaryOp::Div, num(1), num(0))),
        JsValue::Number(f64::INFINITY)
    );
}

#[test]
fn string_concatenation_folds() {
    assert_eq!(
        folded(bin(BinaryOp::Add, str_lit("foo"), str_lit("bar"))),
        JsValue::from("foobar")
    );
    assert_eq!(
        folded(bin(BinaryOp::Add, str_lit("n="), num(1))),
        JsValue::from("n=1")
    );
}

#[test]
fn string_coercion_in_arithmetic() {
    assert_eq!(
        folded(bin(BinaryOp::Sub, str_lit("10"), str_lit("4"))),
        JsValue::Number(6.0)
    );
    assert!(
        matches!(folded(bin(BinaryOp::Mul, str_lit("x"), num(2))), JsValue::Number(n) if n.is_nan())
    );
}

#[test]
fn comparison_and_equality_fold() {
    assert_eq!(
        folded(bin(BinaryOp::Lt, num(1), num(2))),
        JsValue::Boolean(true)
    );
    assert_eq!(
        folded(bin(BinaryOp::Eq, str_lit("1"), num(1))),
        JsValue::Boolean(true)
    );
    assert_eq!(
        folded(bin(BinaryOp::StrictEq, str_lit("1"), num(1))),
        JsValue::Boolean(false)
    );
    assert_eq!(
        folded(bin(BinaryOp::Gt, str_lit("b"), str_lit("a"))),
        JsValue::Boolean(true)
    );
}

#[test]
fn bitwise_and_shifts_fold() {
    assert_eq!(folded(bin(BinaryOp::Or, num(5), num(2))), JsValue::Number(7.0));
    assert_eq!(folded(bin(BinaryOp::Sal, num(1), num(4))), JsValue::Number(16.0));
    assert_eq!(
        folded(bin(BinaryOp::Sar, num(-8), num(1))),
        JsValue::Number(-4.0)
    );
    assert_eq!(
        folded(bin(BinaryOp::Shr, num(-1), num(28))),
        JsValue::Number(15.0)
    );
}

// ── unary ───────────────────────────────────────────────────────────────────

#[test]
fn unary_folds() {
    assert_eq!(folded(un(UnaryOp::Minus, num(3))), JsValue::Number(-3.0));
    assert_eq!(folded(un(UnaryOp::Plus, str_lit("3"))), JsValue::Number(3.0));
    assert_eq!(folded(un(UnaryOp::Not, num(0))), JsValue::Boolean(true));
    assert_eq!(folded(un(UnaryOp::BitNot, num(0))), JsValue::Number(-1.0));
    assert_eq!(folded(un(UnaryOp::TypeOf, num(1))), JsValue::from("number"));
    assert_eq!(
        folded(un(UnaryOp::TypeOf, bigint(1))),
        JsValue::from("bigint")
    );
}

// ── short-circuit operators ─────────────────────────────────────────────────

#[test]
fn constant_or_elides_the_right_side() {
    // true || x never evaluates x.
    let prg = compile_expr(bin(BinaryOp::LogicalOr, boolean(true), ident("x")));
    assert!(!prg
        .borrow()
        .code
        .iter()
        .any(|op| matches!(op, Op::LoadDynamic(_))));
    assert_eq!(
        folded(bin(BinaryOp::LogicalOr, boolean(true), ident("x"))),
        JsValue::Boolean(true)
    );
}

#[test]
fn constant_falsy_or_takes_the_right_side() {
    let prg = compile_expr(bin(BinaryOp::LogicalOr, num(0), ident("x")));
    assert!(prg
        .borrow()
        .code
        .iter()
        .any(|op| matches!(op, Op::LoadDynamic(n) if n == "x")));
    // No jump needed: the decision happened at compile time.
    assert!(!prg.borrow().code.iter().any(|op| matches!(op, Op::Jeq1(_))));
}

#[test]
fn constant_and_folds_both_sides() {
    assert_eq!(
        folded(bin(BinaryOp::LogicalAnd, num(1), num(2))),
        JsValue::Number(2.0)
    );
    assert_eq!(
        folded(bin(BinaryOp::LogicalAnd, num(0), ident("x"))),
        JsValue::Number(0.0)
    );
}

// ── bigint ──────────────────────────────────────────────────────────────────

#[test]
fn bigint_arithmetic_folds() {
    assert_eq!(
        folded(bin(BinaryOp::Add, bigint(2), bigint(3))),
        JsValue::BigInt(Rc::new(BigInt::from(5)))
    );
    assert_eq!(
        folded(bin(BinaryOp::Div, bigint(7), bigint(2))),
        JsValue::BigInt(Rc::new(BigInt::from(3)))
    );
}

#[test]
fn bigint_string_concatenation_is_allowed() {
    assert_eq!(
        folded(bin(BinaryOp::Add, str_lit("v"), bigint(1))),
        JsValue::from("v1")
    );
}

// ── typed exceptions ────────────────────────────────────────────────────────

#[test]
fn mixing_bigint_and_number_rethrows_a_type_error() {
    let (name, msg) = folded_throw(bin(BinaryOp::Add, bigint(1), num(1)));
    assert_eq!(name, "TypeError");
    assert_eq!(
        msg,
        JsValue::from("Cannot mix BigInt and other types, use explicit conversions")
    );
}

#[test]
fn bigint_division_by_zero_rethrows_a_range_error() {
    let (name, msg) = folded_throw(bin(BinaryOp::Div, bigint(1), bigint(0)));
    assert_eq!(name, "RangeError");
    assert_eq!(msg, JsValue::from("Division by zero"));
}

#[test]
fn unsigned_shift_of_bigint_rethrows() {
    let (name, _) = folded_throw(bin(BinaryOp::Shr, bigint(1), bigint(1)));
    assert_eq!(name, "TypeError");
}

#[test]
fn constant_in_operator_rethrows_a_type_error() {
    let (name, _) = folded_throw(bin(BinaryOp::In, str_lit("a"), str_lit("b")));
    assert_eq!(name, "TypeError");
}

#[test]
fn plus_on_bigint_rethrows() {
    let (name, msg) = folded_throw(un(UnaryOp::Plus, bigint(1)));
    assert_eq!(name, "TypeError");
    assert_eq!(
        msg,
        JsValue::from("Cannot convert a BigInt value to a number")
    );
}

#[test]
fn exception_inside_a_wider_constant_rethrows() {
    // 1 + (1n + 1): the inner fold raises; the outer expression still
    // compiles to the same throw.
    let (name, _) = folded_throw(bin(
        BinaryOp::Add,
        num(1),
        bin(BinaryOp::Add, bigint(1), num(1)),
    ));
    assert_eq!(name, "TypeError");
}

// ── folding vs. emission ────────────────────────────────────────────────────

#[test]
fn folded_constants_are_elided_when_unused() {
    // A pure constant statement in non-final position emits nothing.
    let script = Script {
        body: vec![
            Statement::Expression(ExpressionStatement {
                expression: bin(BinaryOp::Add, num(1), num(2)),
            }),
            Statement::Expression(ExpressionStatement {
                expression: ident("x"),
            }),
        ],
    };
    let prg = compile_script(&script, false).expect("compile failed");
    let code = prg.borrow().code.clone();
    assert!(matches!(
        &code[..],
        [Op::EnterFuncBody { .. }, Op::LoadDynamic(_), Op::Halt]
    ));
}

#[test]
fn non_constant_operands_are_not_folded() {
    let prg = compile_expr(bin(BinaryOp::Add, num(1), ident("x")));
    let code = prg.borrow().code.clone();
    assert!(code.iter().any(|op| matches!(op, Op::Add)));
    assert!(code.iter().any(|op| matches!(op, Op::LoadDynamic(_))));
}

#[test]
fn negative_zero_folds_intact() {
    let v = folded(un(UnaryOp::Minus, flt(0.0)));
    match v {
        JsValue::Number(n) => assert!(n == 0.0 && n.is_sign_negative()),
        other => panic!("expected -0, got {:?}", other),
    }
}
