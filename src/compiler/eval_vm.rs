//! Embedded constant-evaluation VM.
//!
//! When an expression is provably constant, the compiler emits it into a
//! scratch program and runs it on this tiny stack machine instead of
//! emitting it. Exceptions raised here are typed values; the caller
//! re-emits them as runtime throws at the original position, so folding
//! never changes observable behaviour.
//!
//! Each fold allocates its own scratch program, so a fold triggered while
//! another fold is emitting simply nests.

use std::cell::RefCell;
use std::cmp::Ordering;
use std::mem;
use std::rc::Rc;

use num_bigint::BigInt;

use crate::compiler::bytecode::{Op, Program};
use crate::compiler::compile_expr::{CompiledExpr, ExprKind};
use crate::compiler::Compiler;
use crate::error::JsError;
use crate::value::{
    self, JsValue, NativeError, NativeErrorKind,
};

impl Compiler {
    /// Emit an expression, folding it when constant.
    pub(crate) fn emit_expr(
        &mut self,
        expr: &CompiledExpr<'_>,
        put_on_stack: bool,
    ) -> Result<(), JsError> {
        if expr.constant(self) {
            self.emit_const(expr, put_on_stack)
        } else {
            expr.emit_getter(self, put_on_stack)
        }
    }

    pub(crate) fn emit_const(
        &mut self,
        expr: &CompiledExpr<'_>,
        put_on_stack: bool,
    ) -> Result<(), JsError> {
        match self.eval_const(expr)? {
            Ok(v) => {
                if put_on_stack {
                    let idx = self.define_literal(&v);
                    self.emit(Op::LoadVal(idx));
                }
            }
            Err(ex) => self.emit_throw(&ex),
        }
        Ok(())
    }

    /// Evaluate a constant node at compile time. The outer error means
    /// the node failed to compile at all; the inner result carries the
    /// value or the typed exception evaluation raised.
    pub(crate) fn eval_const(
        &mut self,
        expr: &CompiledExpr<'_>,
    ) -> Result<Result<JsValue, NativeError>, JsError> {
        if let ExprKind::Literal(v) = &expr.kind {
            return Ok(Ok(v.clone()));
        }
        let src = self.p.borrow().src.clone();
        let scratch = Rc::new(RefCell::new(Program::new(src)));
        let saved = mem::replace(&mut self.p, scratch);
        let emitted = expr.emit_getter(self, true).map(|()| {
            self.emit(Op::Halt);
        });
        let scratch = mem::replace(&mut self.p, saved);
        emitted?;
        let borrowed = scratch.borrow();
        run_fold(&borrowed)
    }

    /// Re-emit a folded exception as a runtime throw of the same type
    /// and message.
    pub(crate) fn emit_throw(&mut self, ex: &NativeError) {
        self.emit(Op::LoadDynamic(ex.kind.name().into()));
        let idx = self.define_literal(&JsValue::from(ex.message.as_str()));
        self.emit(Op::LoadVal(idx));
        self.emit(Op::New(1));
        self.emit(Op::Throw);
    }
}

/// A fold-VM stack entry. Error constructors and instances only show up
/// when a nested fold re-emitted an exception.
enum FoldVal {
    Val(JsValue),
    ErrorCtor(NativeErrorKind),
    ErrorObj(NativeError),
}

fn run_fold(prg: &Program) -> Result<Result<JsValue, NativeError>, JsError> {
    let mut stack: Vec<FoldVal> = Vec::new();
    let mut pc = 0usize;

    macro_rules! pop_val {
        () => {
            match stack.pop() {
                Some(FoldVal::Val(v)) => v,
                _ => return Err(JsError::internal_error("constant evaluator stack underflow")),
            }
        };
    }
    macro_rules! binop {
        ($f:expr) => {{
            let b = pop_val!();
            let a = pop_val!();
            match $f(&a, &b) {
                Ok(v) => stack.push(FoldVal::Val(v)),
                Err(ex) => return Ok(Err(ex)),
            }
        }};
    }

    loop {
        let op = prg
            .code
            .get(pc)
            .ok_or_else(|| JsError::internal_error("constant evaluator ran off the end"))?;
        pc += 1;
        match op {
            Op::LoadVal(idx) => {
                let v = prg
                    .literals
                    .get(*idx as usize)
                    .cloned()
                    .ok_or_else(|| JsError::internal_error("bad literal index"))?;
                stack.push(FoldVal::Val(v));
            }
            Op::LoadUndef => stack.push(FoldVal::Val(JsValue::Undefined)),
            Op::Pop => {
                stack.pop();
            }
            Op::Halt => {
                return Ok(Ok(pop_val!()));
            }

            Op::Add => binop!(op_add),
            Op::Sub => binop!(|a, b| op_arith(a, b, ArithOp::Sub)),
            Op::Mul => binop!(|a, b| op_arith(a, b, ArithOp::Mul)),
            Op::Div => binop!(|a, b| op_arith(a, b, ArithOp::Div)),
            Op::Mod => binop!(|a, b| op_arith(a, b, ArithOp::Mod)),
            Op::Or => binop!(|a, b| op_bitwise(a, b, BitOp::Or)),
            Op::And => binop!(|a, b| op_bitwise(a, b, BitOp::And)),
            Op::Xor => binop!(|a, b| op_bitwise(a, b, BitOp::Xor)),
            Op::Sal => binop!(op_shl),
            Op::Sar => binop!(op_sar),
            Op::Shr => binop!(op_shr),
            Op::Lt => binop!(|a, b| op_compare(a, b, &[Ordering::Less])),
            Op::Gt => binop!(|a, b| op_compare(a, b, &[Ordering::Greater])),
            Op::Lte => binop!(|a, b| op_compare(a, b, &[Ordering::Less, Ordering::Equal])),
            Op::Gte => binop!(|a, b| op_compare(a, b, &[Ordering::Greater, Ordering::Equal])),
            Op::Eq => binop!(|a: &JsValue, b: &JsValue| Ok(JsValue::Boolean(a.loose_equals(b)))),
            Op::Neq => binop!(|a: &JsValue, b: &JsValue| Ok(JsValue::Boolean(!a.loose_equals(b)))),
            Op::StrictEq => {
                binop!(|a: &JsValue, b: &JsValue| Ok(JsValue::Boolean(a.strict_equals(b))))
            }
            Op::StrictNeq => {
                binop!(|a: &JsValue, b: &JsValue| Ok(JsValue::Boolean(!a.strict_equals(b))))
            }
            Op::In => binop!(|a: &JsValue, b: &JsValue| -> Result<JsValue, NativeError> {
                Err(NativeError::type_error(format!(
                    "Cannot use 'in' operator to search for '{}' in {}",
                    a.to_string_value(),
                    b.to_string_value()
                )))
            }),
            Op::InstanceOf => binop!(|_a: &JsValue, _b: &JsValue| -> Result<JsValue, NativeError> {
                Err(NativeError::type_error(
                    "Right-hand side of 'instanceof' is not an object",
                ))
            }),

            Op::Not => {
                let a = pop_val!();
                stack.push(FoldVal::Val(JsValue::Boolean(!a.to_boolean())));
            }
            Op::BNot => {
                let a = pop_val!();
                match op_bnot(&a) {
                    Ok(v) => stack.push(FoldVal::Val(v)),
                    Err(ex) => return Ok(Err(ex)),
                }
            }
            Op::Neg => {
                let a = pop_val!();
                match op_neg(&a) {
                    Ok(v) => stack.push(FoldVal::Val(v)),
                    Err(ex) => return Ok(Err(ex)),
                }
            }
            Op::Plus => {
                let a = pop_val!();
                match a.to_number() {
                    Ok(n) => stack.push(FoldVal::Val(JsValue::Number(n))),
                    Err(ex) => return Ok(Err(ex)),
                }
            }
            Op::TypeOf => {
                let a = pop_val!();
                stack.push(FoldVal::Val(JsValue::from(a.type_of())));
            }

            // A nested fold re-emitted an exception: reconstruct and
            // raise it.
            Op::LoadDynamic(name) => {
                let kind = match name.as_str() {
                    "TypeError" => NativeErrorKind::TypeError,
                    "RangeError" => NativeErrorKind::RangeError,
                    _ => {
                        return Err(JsError::internal_error(
                            "non-constant instruction in constant expression",
                        ))
                    }
                };
                stack.push(FoldVal::ErrorCtor(kind));
            }
            Op::New(argc) => {
                let argc = *argc as usize;
                if stack.len() < argc + 1 {
                    return Err(JsError::internal_error("constant evaluator stack underflow"));
                }
                let args: Vec<FoldVal> = stack.split_off(stack.len() - argc);
                match stack.pop() {
                    Some(FoldVal::ErrorCtor(kind)) => {
                        let message = match args.first() {
                            Some(FoldVal::Val(v)) => v.to_string_value().as_str().to_string(),
                            _ => String::new(),
                        };
                        stack.push(FoldVal::ErrorObj(NativeError { kind, message }));
                    }
                    _ => {
                        return Err(JsError::internal_error(
                            "non-constant instruction in constant expression",
                        ))
                    }
                }
            }
            Op::Throw => match stack.pop() {
                Some(FoldVal::ErrorObj(e)) => return Ok(Err(e)),
                _ => {
                    return Err(JsError::internal_error(
                        "non-constant instruction in constant expression",
                    ))
                }
            },

            _ => {
                return Err(JsError::internal_error(
                    "non-constant instruction in constant expression",
                ))
            }
        }
    }
}

// ─── operator semantics over primitives ──────────────────────────────────────

fn mix_error() -> NativeError {
    NativeError::type_error("Cannot mix BigInt and other types, use explicit conversions")
}

fn op_add(a: &JsValue, b: &JsValue) -> Result<JsValue, NativeError> {
    match (a, b) {
        (JsValue::String(_), _) | (_, JsValue::String(_)) => {
            let mut s = a.to_string_value().as_str().to_string();
            s.push_str(b.to_string_value().as_str());
            Ok(JsValue::from(s.as_str()))
        }
        (JsValue::BigInt(x), JsValue::BigInt(y)) => {
            Ok(JsValue::BigInt(Rc::new(&**x + &**y)))
        }
        (JsValue::BigInt(_), _) | (_, JsValue::BigInt(_)) => Err(mix_error()),
        _ => Ok(JsValue::Number(a.to_number()? + b.to_number()?)),
    }
}

#[derive(Clone, Copy)]
enum ArithOp {
    Sub,
    Mul,
    Div,
    Mod,
}

fn op_arith(a: &JsValue, b: &JsValue, op: ArithOp) -> Result<JsValue, NativeError> {
    match (a, b) {
        (JsValue::BigInt(x), JsValue::BigInt(y)) => {
            let (x, y) = (&**x, &**y);
            let r = match op {
                ArithOp::Sub => x - y,
                ArithOp::Mul => x * y,
                ArithOp::Div => {
                    if *y == BigInt::ZERO {
                        return Err(NativeError::range_error("Division by zero"));
                    }
                    x / y
                }
                ArithOp::Mod => {
                    if *y == BigInt::ZERO {
                        return Err(NativeError::range_error("Division by zero"));
                    }
                    x % y
                }
            };
            Ok(JsValue::BigInt(Rc::new(r)))
        }
        (JsValue::BigInt(_), _) | (_, JsValue::BigInt(_)) => Err(mix_error()),
        _ => {
            let (x, y) = (a.to_number()?, b.to_number()?);
            Ok(JsValue::Number(match op {
                ArithOp::Sub => x - y,
                ArithOp::Mul => x * y,
                ArithOp::Div => x / y,
                ArithOp::Mod => x % y,
            }))
        }
    }
}

#[derive(Clone, Copy)]
enum BitOp {
    Or,
    And,
    Xor,
}

fn op_bitwise(a: &JsValue, b: &JsValue, op: BitOp) -> Result<JsValue, NativeError> {
    match (a, b) {
        (JsValue::BigInt(x), JsValue::BigInt(y)) => {
            let (x, y) = (&**x, &**y);
            let r = match op {
                BitOp::Or => x | y,
                BitOp::And => x & y,
                BitOp::Xor => x ^ y,
            };
            Ok(JsValue::BigInt(Rc::new(r)))
        }
        (JsValue::BigInt(_), _) | (_, JsValue::BigInt(_)) => Err(mix_error()),
        _ => {
            let x = value::to_int32(a.to_number()?);
            let y = value::to_int32(b.to_number()?);
            Ok(JsValue::Number(match op {
                BitOp::Or => (x | y) as f64,
                BitOp::And => (x & y) as f64,
                BitOp::Xor => (x ^ y) as f64,
            }))
        }
    }
}

fn bigint_shift_amount(y: &BigInt) -> Result<i64, NativeError> {
    i64::try_from(y).map_err(|_| NativeError::range_error("Maximum BigInt size exceeded"))
}

fn op_shl(a: &JsValue, b: &JsValue) -> Result<JsValue, NativeError> {
    match (a, b) {
        (JsValue::BigInt(x), JsValue::BigInt(y)) => {
            let n = bigint_shift_amount(y)?;
            if n.unsigned_abs() > 1_000_000 {
                return Err(NativeError::range_error("Maximum BigInt size exceeded"));
            }
            let r = if n >= 0 {
                &**x << n as usize
            } else {
                &**x >> (-n) as usize
            };
            Ok(JsValue::BigInt(Rc::new(r)))
        }
        (JsValue::BigInt(_), _) | (_, JsValue::BigInt(_)) => Err(mix_error()),
        _ => {
            let x = value::to_int32(a.to_number()?);
            let y = value::to_uint32(b.to_number()?) & 31;
            Ok(JsValue::Number((x << y) as f64))
        }
    }
}

fn op_sar(a: &JsValue, b: &JsValue) -> Result<JsValue, NativeError> {
    match (a, b) {
        (JsValue::BigInt(x), JsValue::BigInt(y)) => {
            let n = bigint_shift_amount(y)?;
            if n.unsigned_abs() > 1_000_000 {
                return Err(NativeError::range_error("Maximum BigInt size exceeded"));
            }
            let r = if n >= 0 {
                &**x >> n as usize
            } else {
                &**x << (-n) as usize
            };
            Ok(JsValue::BigInt(Rc::new(r)))
        }
        (JsValue::BigInt(_), _) | (_, JsValue::BigInt(_)) => Err(mix_error()),
        _ => {
            let x = value::to_int32(a.to_number()?);
            let y = value::to_uint32(b.to_number()?) & 31;
            Ok(JsValue::Number((x >> y) as f64))
        }
    }
}

fn op_shr(a: &JsValue, b: &JsValue) -> Result<JsValue, NativeError> {
    match (a, b) {
        (JsValue::BigInt(_), JsValue::BigInt(_)) => Err(NativeError::type_error(
            "BigInts have no unsigned right shift, use >> instead",
        )),
        (JsValue::BigInt(_), _) | (_, JsValue::BigInt(_)) => Err(mix_error()),
        _ => {
            let x = value::to_uint32(a.to_number()?);
            let y = value::to_uint32(b.to_number()?) & 31;
            Ok(JsValue::Number((x >> y) as f64))
        }
    }
}

fn op_compare(a: &JsValue, b: &JsValue, accept: &[Ordering]) -> Result<JsValue, NativeError> {
    let ord = match (a, b) {
        (JsValue::String(x), JsValue::String(y)) => Some(x.as_str().cmp(y.as_str())),
        (JsValue::BigInt(x), JsValue::BigInt(y)) => Some(x.cmp(y)),
        (JsValue::BigInt(x), _) => cmp_bigint_number(x, b.to_number()?),
        (_, JsValue::BigInt(y)) => cmp_bigint_number(y, a.to_number()?).map(Ordering::reverse),
        _ => a.to_number()?.partial_cmp(&b.to_number()?),
    };
    Ok(JsValue::Boolean(match ord {
        Some(ord) => accept.contains(&ord),
        None => false,
    }))
}

fn cmp_bigint_number(x: &BigInt, n: f64) -> Option<Ordering> {
    if n.is_nan() {
        return None;
    }
    if n == f64::INFINITY {
        return Some(Ordering::Less);
    }
    if n == f64::NEG_INFINITY {
        return Some(Ordering::Greater);
    }
    let t = n.trunc();
    let tb = BigInt::parse_bytes(format!("{:.0}", t).as_bytes(), 10)?;
    let ord = x.cmp(&tb);
    if ord == Ordering::Equal && n.fract() != 0.0 {
        // x == trunc(n) but n has a fraction: n is further from zero on
        // the positive side only.
        return Some(if n > 0.0 {
            Ordering::Less
        } else {
            Ordering::Greater
        });
    }
    Some(ord)
}

fn op_bnot(a: &JsValue) -> Result<JsValue, NativeError> {
    match a {
        JsValue::BigInt(x) => Ok(JsValue::BigInt(Rc::new(!&**x))),
        _ => Ok(JsValue::Number(!value::to_int32(a.to_number()?) as f64)),
    }
}

fn op_neg(a: &JsValue) -> Result<JsValue, NativeError> {
    match a {
        JsValue::BigInt(x) => Ok(JsValue::BigInt(Rc::new(-&**x))),
        _ => Ok(JsValue::Number(-a.to_number()?)),
    }
}
