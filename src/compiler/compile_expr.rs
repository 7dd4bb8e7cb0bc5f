//! Compiled-expression nodes.
//!
//! `compile_expression` builds a tree of plans mirroring the AST; emission
//! happens later, when the statement layer (or an enclosing node) asks for
//! a getter, setter, reference, deletion or in-place update. Scope lookups
//! run at emission time, after every binding the preamble machinery
//! creates already exists.

use std::rc::Rc;

use crate::ast::{
    self, ArrowBody, AssignOp, BinaryOp, Expression, Identifier, ParameterList, PropertyKind,
    Statement, TemplateElement, UnaryOp,
};
use crate::compiler::bytecode::Op;
use crate::compiler::{hoist, Compiler};
use crate::error::JsError;
use crate::value::{float_to_value, int_to_value, CheapClone, JsString, JsValue};

/// A compiled expression: a plan that emits instructions on demand.
pub(crate) struct CompiledExpr<'a> {
    /// 0-based source offset; negative when unknown.
    pub offset: i32,
    pub kind: ExprKind<'a>,
}

pub(crate) enum ExprKind<'a> {
    /// A literal value; foldable.
    Literal(JsValue),
    Ident {
        name: JsString,
    },
    This,
    NewTarget,
    Dot {
        left: Box<CompiledExpr<'a>>,
        name: JsString,
    },
    Bracket {
        left: Box<CompiledExpr<'a>>,
        member: Box<CompiledExpr<'a>>,
    },
    Call {
        callee: Box<CompiledExpr<'a>>,
        args: Vec<CompiledExpr<'a>>,
        variadic: bool,
    },
    New {
        callee: Box<CompiledExpr<'a>>,
        args: Vec<CompiledExpr<'a>>,
        variadic: bool,
    },
    Unary {
        operand: Box<CompiledExpr<'a>>,
        op: UnaryOp,
        postfix: bool,
    },
    Binary {
        left: Box<CompiledExpr<'a>>,
        right: Box<CompiledExpr<'a>>,
        op: BinaryOp,
    },
    LogicalAnd {
        left: Box<CompiledExpr<'a>>,
        right: Box<CompiledExpr<'a>>,
    },
    LogicalOr {
        left: Box<CompiledExpr<'a>>,
        right: Box<CompiledExpr<'a>>,
    },
    Conditional {
        test: Box<CompiledExpr<'a>>,
        consequent: Box<CompiledExpr<'a>>,
        alternate: Box<CompiledExpr<'a>>,
    },
    Sequence {
        sequence: Vec<CompiledExpr<'a>>,
    },
    Assign {
        left: Box<CompiledExpr<'a>>,
        right: Box<CompiledExpr<'a>>,
        op: AssignOp,
    },
    Object(&'a ast::ObjectLiteral),
    Array(&'a ast::ArrayLiteral),
    Regexp(&'a ast::RegExpLiteral),
    Template {
        tag: Option<Box<CompiledExpr<'a>>>,
        elements: &'a [TemplateElement],
        expressions: Vec<CompiledExpr<'a>>,
    },
    Function(Box<FunctionLit<'a>>),
    ObjectPattern(&'a ast::ObjectPattern),
    ArrayPattern(&'a ast::ArrayPattern),
    /// A spread argument of a call.
    SpreadArg {
        expr: Box<CompiledExpr<'a>>,
    },
    /// Destructuring slot: a source emitter plus an optional default that
    /// kicks in when the source produced `undefined`.
    PatternInit {
        src: SrcEmitter,
        default: Option<Box<CompiledExpr<'a>>>,
    },
    /// A bare source emitter (rest elements, iterator reads).
    Emitter {
        src: SrcEmitter,
    },
}

/// The plan for a function or arrow literal. Emission is in
/// `compile_func.rs`.
pub(crate) struct FunctionLit<'a> {
    pub name: Option<&'a Identifier>,
    pub params: &'a ParameterList,
    pub body: FuncBody<'a>,
    pub source: &'a str,
    /// Name inherited from the assignment target or property key when the
    /// literal itself is anonymous.
    pub lhs_name: Option<JsString>,
    /// Offset of a `"use strict"` directive in the body.
    pub strict_directive: Option<ast::Idx>,
    pub is_expr: bool,
    pub is_arrow: bool,
    pub is_method: bool,
}

pub(crate) enum FuncBody<'a> {
    Block(&'a [Statement]),
    /// Concise arrow body, compiled as a single implicit return.
    Concise(&'a Expression),
}

/// The small set of value sources destructuring wires to defaults.
pub(crate) enum SrcEmitter {
    /// `GetProp(name)` — shorthand object pattern slot.
    Prop(JsString),
    /// `GetKey` — keyed object pattern slot.
    Key,
    /// `IterGetNextOrUndef` — array pattern slot.
    IterNext,
    /// `CopyRest` — object pattern rest.
    CopyRest,
    /// `NewArrayFromIter` — array pattern rest.
    ArrayFromIter,
    /// Rest-arguments array; recorded for the stash patch.
    ArgsRest { count: usize },
    /// Parameter `index` during preamble generation.
    Param { index: usize },
}

impl SrcEmitter {
    fn emit(&self, c: &mut Compiler) -> Result<(), JsError> {
        match self {
            SrcEmitter::Prop(name) => {
                c.emit(Op::GetProp(name.cheap_clone()));
            }
            SrcEmitter::Key => {
                c.emit(Op::GetKey);
            }
            SrcEmitter::IterNext => {
                c.emit(Op::IterGetNextOrUndef);
            }
            SrcEmitter::CopyRest => {
                c.emit(Op::CopyRest);
            }
            SrcEmitter::ArrayFromIter => {
                c.emit(Op::NewArrayFromIter);
            }
            SrcEmitter::ArgsRest { count } => {
                let mark = c.emit(Op::CreateArgsRestStack(*count as u32));
                c.fn_ctx.args_rest_mark = Some(mark);
            }
            SrcEmitter::Param { index } => {
                if c.fn_ctx.first_forward_ref.is_none() {
                    let b = crate::compiler::scope::BindingRef {
                        scope: c.fn_ctx.fn_scope,
                        index: *index,
                    };
                    c.b_emit_get(b);
                } else {
                    c.emit(Op::LoadStackLex(-(*index as i32) - 1));
                }
            }
        }
        Ok(())
    }
}

/// The node `delete` lowers its operand to.
pub(crate) enum DeleteExpr<'s, 'a> {
    DeleteGlobal {
        name: JsString,
    },
    DeleteVar {
        name: JsString,
    },
    DeleteProp {
        left: &'s CompiledExpr<'a>,
        name: JsString,
    },
    DeleteElem {
        left: &'s CompiledExpr<'a>,
        member: &'s CompiledExpr<'a>,
    },
    /// Evaluate the operand for side effects, push `true`.
    DefaultDelete {
        expr: &'s CompiledExpr<'a>,
    },
    Constant {
        val: JsValue,
    },
}

impl DeleteExpr<'_, '_> {
    pub(crate) fn emit_getter(&self, c: &mut Compiler, put_on_stack: bool) -> Result<(), JsError> {
        match self {
            DeleteExpr::DeleteGlobal { name } => {
                c.emit(Op::DeleteGlobal(name.cheap_clone()));
                if !put_on_stack {
                    c.emit(Op::Pop);
                }
            }
            DeleteExpr::DeleteVar { name } => {
                c.emit(Op::DeleteVar(name.cheap_clone()));
                if !put_on_stack {
                    c.emit(Op::Pop);
                }
            }
            DeleteExpr::DeleteProp { left, name } => {
                left.emit_getter(c, true)?;
                if c.scope().strict {
                    c.emit(Op::DeletePropStrict(name.cheap_clone()));
                } else {
                    c.emit(Op::DeleteProp(name.cheap_clone()));
                }
                if !put_on_stack {
                    c.emit(Op::Pop);
                }
            }
            DeleteExpr::DeleteElem { left, member } => {
                left.emit_getter(c, true)?;
                member.emit_getter(c, true)?;
                if c.scope().strict {
                    c.emit(Op::DeleteElemStrict);
                } else {
                    c.emit(Op::DeleteElem);
                }
                if !put_on_stack {
                    c.emit(Op::Pop);
                }
            }
            DeleteExpr::DefaultDelete { expr } => {
                expr.emit_getter(c, false)?;
                if put_on_stack {
                    let idx = c.define_literal(&JsValue::Boolean(true));
                    c.emit(Op::LoadVal(idx));
                }
            }
            DeleteExpr::Constant { val } => {
                if put_on_stack {
                    let idx = c.define_literal(&val.clone());
                    c.emit(Op::LoadVal(idx));
                }
            }
        }
        Ok(())
    }
}

// ─── dispatch ────────────────────────────────────────────────────────────────

impl Compiler {
    pub(crate) fn compile_expression<'a>(
        &mut self,
        v: &'a Expression,
    ) -> Result<CompiledExpr<'a>, JsError> {
        match v {
            Expression::Assign(v) => self.compile_assign_expression(v),
            Expression::Number(v) => self.compile_number_literal(v),
            Expression::BigInt(v) => self.compile_bigint_literal(v),
            Expression::String(v) => Ok(CompiledExpr {
                offset: v.idx as i32 - 1,
                kind: ExprKind::Literal(JsValue::String(v.value.cheap_clone())),
            }),
            Expression::Template(v) => self.compile_template_literal(v),
            Expression::Boolean(v) => Ok(CompiledExpr {
                offset: v.idx as i32 - 1,
                kind: ExprKind::Literal(JsValue::Boolean(v.value)),
            }),
            Expression::Null(v) => Ok(CompiledExpr {
                offset: v.idx as i32 - 1,
                kind: ExprKind::Literal(JsValue::Null),
            }),
            Expression::Identifier(v) => self.compile_identifier_expression(v),
            Expression::Call(v) => self.compile_call_expression(v),
            Expression::Object(v) => Ok(CompiledExpr {
                offset: v.idx as i32 - 1,
                kind: ExprKind::Object(v),
            }),
            Expression::Array(v) => Ok(CompiledExpr {
                offset: v.idx as i32 - 1,
                kind: ExprKind::Array(v),
            }),
            Expression::RegExp(v) => Ok(CompiledExpr {
                offset: v.idx as i32 - 1,
                kind: ExprKind::Regexp(v),
            }),
            Expression::Binary(v) => self.compile_binary_expression(v),
            Expression::Unary(v) => self.compile_unary_expression(v),
            Expression::Conditional(v) => self.compile_conditional_expression(v),
            Expression::Function(v) => self.compile_function_literal(v, true),
            Expression::Arrow(v) => self.compile_arrow_function_literal(v),
            Expression::Dot(v) => {
                let left = self.compile_expression(&v.left)?;
                Ok(CompiledExpr {
                    offset: v.idx as i32 - 1,
                    kind: ExprKind::Dot {
                        left: Box::new(left),
                        name: v.identifier.name.cheap_clone(),
                    },
                })
            }
            Expression::Bracket(v) => {
                let left = self.compile_expression(&v.left)?;
                let member = self.compile_expression(&v.member)?;
                Ok(CompiledExpr {
                    offset: v.idx as i32 - 1,
                    kind: ExprKind::Bracket {
                        left: Box::new(left),
                        member: Box::new(member),
                    },
                })
            }
            Expression::This(v) => Ok(CompiledExpr {
                offset: v.idx as i32 - 1,
                kind: ExprKind::This,
            }),
            Expression::Sequence(v) => self.compile_sequence_expression(v),
            Expression::New(v) => self.compile_new_expression(v),
            Expression::MetaProperty(v) => self.compile_meta_property(v),
            Expression::ObjectPattern(v) => Ok(CompiledExpr {
                offset: v.idx as i32 - 1,
                kind: ExprKind::ObjectPattern(v),
            }),
            Expression::ArrayPattern(v) => Ok(CompiledExpr {
                offset: v.idx as i32 - 1,
                kind: ExprKind::ArrayPattern(v),
            }),
            Expression::Spread(v) => Err(JsError::syntax_error(
                "Unexpected spread element",
                v.idx as i32 - 1,
            )),
        }
    }

    fn compile_number_literal(
        &mut self,
        v: &ast::NumberLiteral,
    ) -> Result<CompiledExpr<'static>, JsError> {
        self.check_octal_literal(&v.literal, v.idx as i32 - 1)?;
        let val = match v.value {
            ast::NumberValue::Int(n) => int_to_value(n),
            ast::NumberValue::Float(n) => float_to_value(n),
        };
        Ok(CompiledExpr {
            offset: v.idx as i32 - 1,
            kind: ExprKind::Literal(val),
        })
    }

    fn compile_bigint_literal(
        &mut self,
        v: &ast::BigIntLiteral,
    ) -> Result<CompiledExpr<'static>, JsError> {
        self.check_octal_literal(&v.literal, v.idx as i32 - 1)?;
        Ok(CompiledExpr {
            offset: v.idx as i32 - 1,
            kind: ExprKind::Literal(JsValue::BigInt(Rc::new(v.value.clone()))),
        })
    }

    fn check_octal_literal(&self, literal: &str, offset: i32) -> Result<(), JsError> {
        let b = literal.as_bytes();
        if self.scope().strict && b.len() > 1 && b[0] == b'0' && b[1].is_ascii_digit() && b[1] <= b'7'
        {
            return Err(JsError::syntax_error(
                "Octal literals are not allowed in strict mode",
                offset,
            ));
        }
        Ok(())
    }

    pub(crate) fn compile_identifier_expression(
        &mut self,
        v: &Identifier,
    ) -> Result<CompiledExpr<'static>, JsError> {
        if self.scope().strict {
            self.check_identifier_name(&v.name, v.idx as i32 - 1)?;
        }
        Ok(CompiledExpr {
            offset: v.idx as i32 - 1,
            kind: ExprKind::Ident {
                name: v.name.cheap_clone(),
            },
        })
    }

    fn compile_template_literal<'a>(
        &mut self,
        v: &'a ast::TemplateLiteral,
    ) -> Result<CompiledExpr<'a>, JsError> {
        let tag = match &v.tag {
            Some(tag) => Some(Box::new(self.compile_expression(tag)?)),
            None => None,
        };
        let mut expressions = Vec::with_capacity(v.expressions.len());
        for expr in &v.expressions {
            expressions.push(self.compile_expression(expr)?);
        }
        Ok(CompiledExpr {
            offset: v.idx as i32 - 1,
            kind: ExprKind::Template {
                tag,
                elements: &v.elements,
                expressions,
            },
        })
    }

    fn compile_assign_expression<'a>(
        &mut self,
        v: &'a ast::AssignExpression,
    ) -> Result<CompiledExpr<'a>, JsError> {
        let left = self.compile_expression(&v.left)?;
        let mut right = self.compile_expression(&v.right)?;
        if v.operator == AssignOp::Assign {
            if let ExprKind::Ident { name } = &left.kind {
                name_anonymous_function(&mut right, name);
            }
        }
        Ok(CompiledExpr {
            offset: v.idx as i32 - 1,
            kind: ExprKind::Assign {
                left: Box::new(left),
                right: Box::new(right),
                op: v.operator,
            },
        })
    }

    fn compile_unary_expression<'a>(
        &mut self,
        v: &'a ast::UnaryExpression,
    ) -> Result<CompiledExpr<'a>, JsError> {
        let operand = self.compile_expression(&v.operand)?;
        Ok(CompiledExpr {
            offset: v.idx as i32 - 1,
            kind: ExprKind::Unary {
                operand: Box::new(operand),
                op: v.operator,
                postfix: v.postfix,
            },
        })
    }

    fn compile_binary_expression<'a>(
        &mut self,
        v: &'a ast::BinaryExpression,
    ) -> Result<CompiledExpr<'a>, JsError> {
        let left = Box::new(self.compile_expression(&v.left)?);
        let right = Box::new(self.compile_expression(&v.right)?);
        let kind = match v.operator {
            BinaryOp::LogicalOr => ExprKind::LogicalOr { left, right },
            BinaryOp::LogicalAnd => ExprKind::LogicalAnd { left, right },
            op => ExprKind::Binary { left, right, op },
        };
        Ok(CompiledExpr {
            offset: v.idx as i32 - 1,
            kind,
        })
    }

    fn compile_conditional_expression<'a>(
        &mut self,
        v: &'a ast::ConditionalExpression,
    ) -> Result<CompiledExpr<'a>, JsError> {
        Ok(CompiledExpr {
            offset: v.idx as i32 - 1,
            kind: ExprKind::Conditional {
                test: Box::new(self.compile_expression(&v.test)?),
                consequent: Box::new(self.compile_expression(&v.consequent)?),
                alternate: Box::new(self.compile_expression(&v.alternate)?),
            },
        })
    }

    fn compile_sequence_expression<'a>(
        &mut self,
        v: &'a ast::SequenceExpression,
    ) -> Result<CompiledExpr<'a>, JsError> {
        let mut sequence = Vec::with_capacity(v.sequence.len());
        for expr in &v.sequence {
            sequence.push(self.compile_expression(expr)?);
        }
        Ok(CompiledExpr {
            offset: if v.sequence.is_empty() {
                -1
            } else {
                v.idx as i32 - 1
            },
            kind: ExprKind::Sequence { sequence },
        })
    }

    fn compile_call_args<'a>(
        &mut self,
        list: &'a [Expression],
    ) -> Result<(Vec<CompiledExpr<'a>>, bool), JsError> {
        let mut args = Vec::with_capacity(list.len());
        let mut variadic = false;
        for arg in list {
            if let Expression::Spread(spread) = arg {
                variadic = true;
                let expr = self.compile_expression(&spread.expression)?;
                args.push(CompiledExpr {
                    offset: spread.idx as i32 - 1,
                    kind: ExprKind::SpreadArg {
                        expr: Box::new(expr),
                    },
                });
            } else {
                args.push(self.compile_expression(arg)?);
            }
        }
        Ok((args, variadic))
    }

    fn compile_call_expression<'a>(
        &mut self,
        v: &'a ast::CallExpression,
    ) -> Result<CompiledExpr<'a>, JsError> {
        let (args, variadic) = self.compile_call_args(&v.arguments)?;
        let callee = Box::new(self.compile_expression(&v.callee)?);
        Ok(CompiledExpr {
            offset: v.idx as i32 - 1,
            kind: ExprKind::Call {
                callee,
                args,
                variadic,
            },
        })
    }

    fn compile_new_expression<'a>(
        &mut self,
        v: &'a ast::NewExpression,
    ) -> Result<CompiledExpr<'a>, JsError> {
        let (args, variadic) = self.compile_call_args(&v.arguments)?;
        let callee = Box::new(self.compile_expression(&v.callee)?);
        Ok(CompiledExpr {
            offset: v.idx as i32 - 1,
            kind: ExprKind::New {
                callee,
                args,
                variadic,
            },
        })
    }

    fn compile_meta_property(
        &mut self,
        v: &ast::MetaProperty,
    ) -> Result<CompiledExpr<'static>, JsError> {
        if v.meta.name == "new" && v.property.name == "target" {
            return Ok(CompiledExpr {
                offset: v.idx as i32 - 1,
                kind: ExprKind::NewTarget,
            });
        }
        Err(JsError::syntax_error(
            format!(
                "Unsupported meta property: {}.{}",
                v.meta.name, v.property.name
            ),
            v.idx as i32 - 1,
        ))
    }

    pub(crate) fn compile_function_literal<'a>(
        &mut self,
        v: &'a ast::FunctionLiteral,
        is_expr: bool,
    ) -> Result<CompiledExpr<'a>, JsError> {
        let strict_directive = hoist::strict_directive(&v.body);
        if let Some(name) = &v.name {
            if self.scope().strict || strict_directive.is_some() {
                self.check_identifier_lname(&name.name, name.idx as i32 - 1)?;
            }
        }
        Ok(CompiledExpr {
            offset: v.idx as i32 - 1,
            kind: ExprKind::Function(Box::new(FunctionLit {
                name: v.name.as_ref(),
                params: &v.parameter_list,
                body: FuncBody::Block(&v.body),
                source: &v.source,
                lhs_name: None,
                strict_directive,
                is_expr,
                is_arrow: false,
                is_method: false,
            })),
        })
    }

    fn compile_arrow_function_literal<'a>(
        &mut self,
        v: &'a ast::ArrowFunctionLiteral,
    ) -> Result<CompiledExpr<'a>, JsError> {
        let (body, strict_directive) = match &v.body {
            ArrowBody::Block(stmts) => (FuncBody::Block(&stmts[..]), hoist::strict_directive(stmts)),
            ArrowBody::Expression(expr) => (FuncBody::Concise(expr.as_ref()), None),
        };
        Ok(CompiledExpr {
            offset: v.idx as i32 - 1,
            kind: ExprKind::Function(Box::new(FunctionLit {
                name: None,
                params: &v.parameter_list,
                body,
                source: &v.source,
                lhs_name: None,
                strict_directive,
                is_expr: true,
                is_arrow: true,
                is_method: false,
            })),
        })
    }
}

/// Give an anonymous function literal the name of its assignment target.
pub(crate) fn name_anonymous_function(expr: &mut CompiledExpr<'_>, name: &JsString) {
    if let ExprKind::Function(f) = &mut expr.kind {
        if f.name.is_none() && f.lhs_name.is_none() {
            f.lhs_name = Some(name.cheap_clone());
        }
    }
}

// ─── emission ────────────────────────────────────────────────────────────────

impl<'a> CompiledExpr<'a> {
    pub(crate) fn add_src_map(&self, c: &mut Compiler) {
        c.add_src_map(self.offset);
    }

    /// True when the compiler may evaluate this node at compile time.
    pub(crate) fn constant(&self, c: &mut Compiler) -> bool {
        match &self.kind {
            ExprKind::Literal(_) => true,
            ExprKind::Unary { operand, .. } => operand.constant(c),
            ExprKind::Binary { left, right, .. } => left.constant(c) && right.constant(c),
            ExprKind::LogicalOr { left, right } => {
                if left.constant(c) {
                    match c.eval_const(left) {
                        Ok(Ok(v)) => v.to_boolean() || right.constant(c),
                        Ok(Err(_)) => true,
                        Err(_) => false,
                    }
                } else {
                    false
                }
            }
            ExprKind::LogicalAnd { left, right } => {
                if left.constant(c) {
                    match c.eval_const(left) {
                        Ok(Ok(v)) => !v.to_boolean() || right.constant(c),
                        Ok(Err(_)) => true,
                        Err(_) => false,
                    }
                } else {
                    false
                }
            }
            _ => false,
        }
    }

    /// Emit code leaving the node's value on the stack iff `put_on_stack`.
    pub(crate) fn emit_getter(&self, c: &mut Compiler, put_on_stack: bool) -> Result<(), JsError> {
        match &self.kind {
            ExprKind::Literal(val) => {
                if put_on_stack {
                    self.add_src_map(c);
                    let idx = c.define_literal(val);
                    c.emit(Op::LoadVal(idx));
                }
            }
            ExprKind::Ident { name } => {
                self.add_src_map(c);
                let (b, no_dynamics) = c.lookup_name(name);
                if no_dynamics {
                    match b {
                        Some(b) => {
                            if put_on_stack {
                                c.b_emit_get(b);
                            } else {
                                c.b_emit_get_p(b);
                            }
                        }
                        None => {
                            return Err(JsError::internal_error(
                                "identifier lookup: no dynamics and not found",
                            ))
                        }
                    }
                } else {
                    match b {
                        Some(b) => c.b_emit_get_var(b, false),
                        None => {
                            c.emit(Op::LoadDynamic(name.cheap_clone()));
                        }
                    }
                    if !put_on_stack {
                        c.emit(Op::Pop);
                    }
                }
            }
            ExprKind::This => {
                if put_on_stack {
                    self.add_src_map(c);
                    let mut cur = Some(c.scope);
                    while let Some(id) = cur {
                        let s = &c.scopes[id];
                        if s.arrow || (!s.function && !s.eval) {
                            cur = s.outer;
                        } else {
                            break;
                        }
                    }
                    match cur {
                        Some(id) => {
                            c.scopes[id].this_needed = true;
                            c.emit(Op::LoadStack(0));
                        }
                        None => {
                            c.emit(Op::LoadGlobalObject);
                        }
                    }
                }
            }
            ExprKind::NewTarget => {
                if put_on_stack {
                    self.add_src_map(c);
                    c.emit(Op::LoadNewTarget);
                }
            }
            ExprKind::Dot { left, name } => {
                left.emit_getter(c, true)?;
                self.add_src_map(c);
                c.emit(Op::GetProp(name.cheap_clone()));
                if !put_on_stack {
                    c.emit(Op::Pop);
                }
            }
            ExprKind::Bracket { left, member } => {
                left.emit_getter(c, true)?;
                member.emit_getter(c, true)?;
                self.add_src_map(c);
                c.emit(Op::GetElem);
                if !put_on_stack {
                    c.emit(Op::Pop);
                }
            }
            ExprKind::Call {
                callee,
                args,
                variadic,
            } => self.emit_call(c, callee, args, *variadic, put_on_stack)?,
            ExprKind::New {
                callee,
                args,
                variadic,
            } => {
                if *variadic {
                    c.emit(Op::StartVariadic);
                }
                callee.emit_getter(c, true)?;
                for arg in args {
                    arg.emit_getter(c, true)?;
                }
                self.add_src_map(c);
                if *variadic {
                    c.emit(Op::NewVariadic);
                    c.emit(Op::EndVariadic);
                } else {
                    c.emit(Op::New(args.len() as u32));
                }
                if !put_on_stack {
                    c.emit(Op::Pop);
                }
            }
            ExprKind::Unary {
                operand,
                op,
                postfix,
            } => self.emit_unary_getter(c, operand, *op, *postfix, put_on_stack)?,
            ExprKind::Binary { left, right, op } => {
                c.emit_expr(left, true)?;
                c.emit_expr(right, true)?;
                self.add_src_map(c);
                c.emit(binary_op(*op)?);
                if !put_on_stack {
                    c.emit(Op::Pop);
                }
            }
            ExprKind::LogicalOr { left, right } => {
                if left.constant(c) {
                    match c.eval_const(left)? {
                        Ok(v) => {
                            if !v.to_boolean() {
                                c.emit_expr(right, put_on_stack)?;
                            } else if put_on_stack {
                                let idx = c.define_literal(&v);
                                c.emit(Op::LoadVal(idx));
                            }
                        }
                        Err(ex) => c.emit_throw(&ex),
                    }
                    return Ok(());
                }
                c.emit_expr(left, true)?;
                let j = c.code_len();
                self.add_src_map(c);
                c.emit(Op::Nop);
                c.emit(Op::Pop);
                c.emit_expr(right, true)?;
                let off = c.jump_offset(j);
                c.patch(j, Op::Jeq1(off));
                if !put_on_stack {
                    c.emit(Op::Pop);
                }
            }
            ExprKind::LogicalAnd { left, right } => {
                if left.constant(c) {
                    match c.eval_const(left)? {
                        Ok(v) => {
                            if !v.to_boolean() {
                                if put_on_stack {
                                    let idx = c.define_literal(&v);
                                    c.emit(Op::LoadVal(idx));
                                }
                            } else {
                                c.emit_expr(right, put_on_stack)?;
                            }
                        }
                        Err(ex) => c.emit_throw(&ex),
                    }
                    return Ok(());
                }
                c.emit_expr(left, true)?;
                let j = c.code_len();
                self.add_src_map(c);
                c.emit(Op::Nop);
                c.emit(Op::Pop);
                c.emit_expr(right, true)?;
                let off = c.jump_offset(j);
                c.patch(j, Op::Jneq1(off));
                if !put_on_stack {
                    c.emit(Op::Pop);
                }
            }
            ExprKind::Conditional {
                test,
                consequent,
                alternate,
            } => {
                test.emit_getter(c, true)?;
                let j = c.code_len();
                c.emit(Op::Nop);
                consequent.emit_getter(c, put_on_stack)?;
                let j1 = c.code_len();
                c.emit(Op::Nop);
                let off = c.jump_offset(j);
                c.patch(j, Op::Jne(off));
                alternate.emit_getter(c, put_on_stack)?;
                let off = c.jump_offset(j1);
                c.patch(j1, Op::Jump(off));
            }
            ExprKind::Sequence { sequence } => {
                if let Some((last, init)) = sequence.split_last() {
                    for expr in init {
                        expr.emit_getter(c, false)?;
                    }
                    last.emit_getter(c, put_on_stack)?;
                }
            }
            ExprKind::Assign { left, right, op } => {
                self.add_src_map(c);
                match op {
                    AssignOp::Assign => left.emit_setter(c, right, put_on_stack)?,
                    compound => {
                        let op = compound_op(*compound)?;
                        left.emit_unary(
                            c,
                            false,
                            &|c| {
                                right.emit_getter(c, true)?;
                                c.emit(op.clone());
                                Ok(())
                            },
                            false,
                            put_on_stack,
                        )?;
                    }
                }
            }
            ExprKind::Object(expr) => self.emit_object_literal(c, expr, put_on_stack)?,
            ExprKind::Array(expr) => self.emit_array_literal(c, expr, put_on_stack)?,
            ExprKind::Regexp(expr) => {
                if put_on_stack {
                    if let Err(msg) = validate_regexp(&expr.pattern, &expr.flags) {
                        return Err(JsError::syntax_error(msg, self.offset));
                    }
                    c.emit(Op::NewRegexp {
                        pattern: expr.pattern.as_str().into(),
                        flags: expr.flags.as_str().into(),
                    });
                }
            }
            ExprKind::Template {
                tag,
                elements,
                expressions,
            } => self.emit_template(c, tag.as_deref(), elements, expressions, put_on_stack)?,
            ExprKind::Function(f) => c.emit_function(f, None, put_on_stack)?,
            ExprKind::ObjectPattern(_) | ExprKind::ArrayPattern(_) => {
                if put_on_stack {
                    c.emit(Op::LoadUndef);
                }
            }
            ExprKind::SpreadArg { expr } => {
                expr.emit_getter(c, put_on_stack)?;
                if put_on_stack {
                    c.emit(Op::PushSpread);
                }
            }
            ExprKind::PatternInit { src, default } => {
                if !put_on_stack {
                    return Ok(());
                }
                src.emit(c)?;
                if let Some(def) = default {
                    let mark = c.code_len();
                    c.emit(Op::Nop);
                    def.emit_getter(c, true)?;
                    let off = c.jump_offset(mark);
                    c.patch(mark, Op::Jdef(off));
                }
            }
            ExprKind::Emitter { src } => {
                src.emit(c)?;
                if !put_on_stack {
                    c.emit(Op::Pop);
                }
            }
        }
        Ok(())
    }

    /// As `emit_getter`, but a free name pushes a reference instead of
    /// throwing (used by `typeof`).
    pub(crate) fn emit_getter_or_ref(&self, c: &mut Compiler) -> Result<(), JsError> {
        if let ExprKind::Ident { name } = &self.kind {
            self.add_src_map(c);
            let (b, no_dynamics) = c.lookup_name(name);
            if no_dynamics {
                match b {
                    Some(b) => c.b_emit_get(b),
                    None => {
                        return Err(JsError::internal_error(
                            "identifier lookup: no dynamics and not found",
                        ))
                    }
                }
            } else {
                match b {
                    Some(b) => c.b_emit_get_var(b, false),
                    None => {
                        c.emit(Op::LoadDynamicRef(name.cheap_clone()));
                    }
                }
            }
            return Ok(());
        }
        self.emit_getter(c, true)
    }

    /// Leave `(this, callee)` on the stack for a call through this name.
    fn emit_getter_and_callee(&self, c: &mut Compiler, name: &JsString) -> Result<(), JsError> {
        self.add_src_map(c);
        let (b, no_dynamics) = c.lookup_name(name);
        if no_dynamics {
            match b {
                Some(b) => {
                    c.emit(Op::LoadUndef);
                    c.b_emit_get(b);
                }
                None => {
                    return Err(JsError::internal_error(
                        "identifier lookup: no dynamics and not found",
                    ))
                }
            }
        } else {
            match b {
                Some(b) => c.b_emit_get_var(b, true),
                None => {
                    c.emit(Op::LoadDynamicCallee(name.cheap_clone()));
                }
            }
        }
        Ok(())
    }

    /// Emit code writing `value` into this expression.
    pub(crate) fn emit_setter(
        &self,
        c: &mut Compiler,
        value: &CompiledExpr<'a>,
        put_on_stack: bool,
    ) -> Result<(), JsError> {
        match &self.kind {
            ExprKind::Ident { name } => {
                c.emit_var_setter1(name, self.offset, put_on_stack, &|c, _is_ref| {
                    c.emit_expr(value, true)
                })
            }
            ExprKind::Dot { left, name } => {
                left.emit_getter(c, true)?;
                value.emit_getter(c, true)?;
                let op = match (c.scope().strict, put_on_stack) {
                    (true, true) => Op::SetPropStrict(name.cheap_clone()),
                    (true, false) => Op::SetPropStrictP(name.cheap_clone()),
                    (false, true) => Op::SetProp(name.cheap_clone()),
                    (false, false) => Op::SetPropP(name.cheap_clone()),
                };
                c.emit(op);
                Ok(())
            }
            ExprKind::Bracket { left, member } => {
                left.emit_getter(c, true)?;
                member.emit_getter(c, true)?;
                value.emit_getter(c, true)?;
                let op = match (c.scope().strict, put_on_stack) {
                    (true, true) => Op::SetElemStrict,
                    (true, false) => Op::SetElemStrictP,
                    (false, true) => Op::SetElem,
                    (false, false) => Op::SetElemP,
                };
                c.emit(op);
                Ok(())
            }
            ExprKind::ObjectPattern(pattern) => {
                value.emit_getter(c, true)?;
                c.emit_object_pattern_assign(pattern, put_on_stack)
            }
            ExprKind::ArrayPattern(pattern) => {
                value.emit_getter(c, true)?;
                c.emit_array_pattern_assign(pattern, put_on_stack)
            }
            _ => Err(JsError::syntax_error(
                "Not a valid left-value expression",
                self.offset,
            )),
        }
    }

    /// Push a reference to this expression. The statement compiler drives
    /// this for for-in/for-of heads; within this crate the identifier
    /// path is reached through the variable setters.
    #[allow(dead_code)]
    pub(crate) fn emit_ref(&self, c: &mut Compiler) -> Result<(), JsError> {
        match &self.kind {
            ExprKind::Ident { name } => c.emit_var_ref(name, self.offset),
            ExprKind::Dot { left, name } => {
                left.emit_getter(c, true)?;
                if c.scope().strict {
                    c.emit(Op::GetPropRefStrict(name.cheap_clone()));
                } else {
                    c.emit(Op::GetPropRef(name.cheap_clone()));
                }
                Ok(())
            }
            ExprKind::Bracket { left, member } => {
                left.emit_getter(c, true)?;
                member.emit_getter(c, true)?;
                if c.scope().strict {
                    c.emit(Op::GetElemRefStrict);
                } else {
                    c.emit(Op::GetElemRef);
                }
                Ok(())
            }
            _ => Err(JsError::syntax_error(
                "Cannot emit reference for this type of expression",
                self.offset,
            )),
        }
    }

    /// In-place update: read, transform with `body`, write back. With
    /// `postfix` the pre-update value is the result.
    pub(crate) fn emit_unary(
        &self,
        c: &mut Compiler,
        to_number: bool,
        body: &dyn Fn(&mut Compiler) -> Result<(), JsError>,
        postfix: bool,
        put_on_stack: bool,
    ) -> Result<(), JsError> {
        match &self.kind {
            ExprKind::Ident { name } => {
                if put_on_stack {
                    c.emit_var_setter1(name, self.offset, true, &|c, is_ref| {
                        c.emit(Op::LoadUndef);
                        if is_ref {
                            c.emit(Op::GetValue);
                        } else {
                            self.emit_getter(c, true)?;
                        }
                        if to_number {
                            c.emit(Op::ToNumber);
                        }
                        if !postfix {
                            body(c)?;
                        }
                        c.emit(Op::RDupN(1));
                        if postfix {
                            body(c)?;
                        }
                        Ok(())
                    })?;
                    c.emit(Op::Pop);
                } else {
                    c.emit_var_setter1(name, self.offset, false, &|c, is_ref| {
                        if is_ref {
                            c.emit(Op::GetValue);
                        } else {
                            self.emit_getter(c, true)?;
                        }
                        body(c)
                    })?;
                }
                Ok(())
            }
            ExprKind::Dot { left, name } => {
                let strict = c.scope().strict;
                if !put_on_stack {
                    left.emit_getter(c, true)?;
                    c.emit(Op::Dup);
                    c.emit(Op::GetProp(name.cheap_clone()));
                    body(c)?;
                    c.emit(set_prop(name, strict));
                    c.emit(Op::Pop);
                } else if !postfix {
                    left.emit_getter(c, true)?;
                    c.emit(Op::Dup);
                    c.emit(Op::GetProp(name.cheap_clone()));
                    if to_number {
                        c.emit(Op::ToNumber);
                    }
                    body(c)?;
                    c.emit(set_prop(name, strict));
                } else {
                    c.emit(Op::LoadUndef);
                    left.emit_getter(c, true)?;
                    c.emit(Op::Dup);
                    c.emit(Op::GetProp(name.cheap_clone()));
                    if to_number {
                        c.emit(Op::ToNumber);
                    }
                    c.emit(Op::RDupN(2));
                    body(c)?;
                    c.emit(set_prop(name, strict));
                    c.emit(Op::Pop);
                }
                Ok(())
            }
            ExprKind::Bracket { left, member } => {
                let strict = c.scope().strict;
                if !put_on_stack {
                    left.emit_getter(c, true)?;
                    member.emit_getter(c, true)?;
                    c.emit(Op::DupN(1));
                    c.emit(Op::DupN(1));
                    c.emit(Op::GetElem);
                    body(c)?;
                    c.emit(set_elem(strict));
                    c.emit(Op::Pop);
                } else if !postfix {
                    left.emit_getter(c, true)?;
                    member.emit_getter(c, true)?;
                    c.emit(Op::DupN(1));
                    c.emit(Op::DupN(1));
                    c.emit(Op::GetElem);
                    if to_number {
                        c.emit(Op::ToNumber);
                    }
                    body(c)?;
                    c.emit(set_elem(strict));
                } else {
                    c.emit(Op::LoadUndef);
                    left.emit_getter(c, true)?;
                    member.emit_getter(c, true)?;
                    c.emit(Op::DupN(1));
                    c.emit(Op::DupN(1));
                    c.emit(Op::GetElem);
                    if to_number {
                        c.emit(Op::ToNumber);
                    }
                    c.emit(Op::RDupN(3));
                    body(c)?;
                    c.emit(set_elem(strict));
                    c.emit(Op::Pop);
                }
                Ok(())
            }
            _ => Err(JsError::syntax_error(
                "Not a valid left-value expression",
                self.offset,
            )),
        }
    }

    /// Lower a `delete` of this expression.
    pub(crate) fn delete_expr<'s>(
        &'s self,
        c: &mut Compiler,
    ) -> Result<DeleteExpr<'s, 'a>, JsError> {
        match &self.kind {
            ExprKind::Ident { name } => {
                if c.scope().strict {
                    return Err(JsError::syntax_error(
                        "Delete of an unqualified identifier in strict mode",
                        self.offset,
                    ));
                }
                let (b, no_dynamics) = c.lookup_name(name);
                match b {
                    None if no_dynamics => Ok(DeleteExpr::DeleteGlobal {
                        name: name.cheap_clone(),
                    }),
                    None => Ok(DeleteExpr::DeleteVar {
                        name: name.cheap_clone(),
                    }),
                    // Local bindings are non-configurable.
                    Some(_) => Ok(DeleteExpr::Constant {
                        val: JsValue::Boolean(false),
                    }),
                }
            }
            ExprKind::Dot { left, name } => Ok(DeleteExpr::DeleteProp {
                left: left.as_ref(),
                name: name.cheap_clone(),
            }),
            ExprKind::Bracket { left, member } => Ok(DeleteExpr::DeleteElem {
                left: left.as_ref(),
                member: member.as_ref(),
            }),
            _ => Ok(DeleteExpr::DefaultDelete { expr: self }),
        }
    }

    /// Emit this expression's value while giving an anonymous function
    /// literal a name.
    pub(crate) fn emit_named(&self, c: &mut Compiler, name: &JsString) -> Result<(), JsError> {
        match &self.kind {
            ExprKind::Function(f) => c.emit_function(f, Some(name.cheap_clone()), true),
            ExprKind::PatternInit { src, default } => {
                src.emit(c)?;
                if let Some(def) = default {
                    let mark = c.code_len();
                    c.emit(Op::Nop);
                    def.emit_named(c, name)?;
                    let off = c.jump_offset(mark);
                    c.patch(mark, Op::Jdef(off));
                }
                Ok(())
            }
            ExprKind::Emitter { src } => src.emit(c),
            _ => self.emit_getter(c, true),
        }
    }

    // ── helpers ─────────────────────────────────────────────────────────

    fn emit_call(
        &self,
        c: &mut Compiler,
        callee: &CompiledExpr<'a>,
        args: &[CompiledExpr<'a>],
        variadic: bool,
        put_on_stack: bool,
    ) -> Result<(), JsError> {
        if variadic {
            c.emit(Op::StartVariadic);
        }
        let callee_name = c.emit_callee(callee)?;

        for arg in args {
            arg.emit_getter(c, true)?;
        }

        self.add_src_map(c);
        if callee_name.as_ref().map(JsString::as_str) == Some("eval") {
            c.mark_direct_eval();
            let strict = c.scope().strict;
            let op = match (strict, variadic) {
                (true, true) => Op::CallEvalVariadicStrict,
                (true, false) => Op::CallEvalStrict(args.len() as u32),
                (false, true) => Op::CallEvalVariadic,
                (false, false) => Op::CallEval(args.len() as u32),
            };
            c.emit(op);
        } else if variadic {
            c.emit(Op::CallVariadic);
        } else {
            c.emit(Op::Call(args.len() as u32));
        }
        if variadic {
            c.emit(Op::EndVariadic);
        }
        if !put_on_stack {
            c.emit(Op::Pop);
        }
        Ok(())
    }

    fn emit_unary_getter(
        &self,
        c: &mut Compiler,
        operand: &CompiledExpr<'a>,
        op: UnaryOp,
        postfix: bool,
        put_on_stack: bool,
    ) -> Result<(), JsError> {
        match op {
            UnaryOp::Not => {
                operand.emit_getter(c, true)?;
                c.emit(Op::Not);
            }
            UnaryOp::BitNot => {
                operand.emit_getter(c, true)?;
                c.emit(Op::BNot);
            }
            UnaryOp::TypeOf => {
                operand.emit_getter_or_ref(c)?;
                c.emit(Op::TypeOf);
            }
            UnaryOp::Delete => {
                return operand.delete_expr(c)?.emit_getter(c, put_on_stack);
            }
            UnaryOp::Minus => {
                c.emit_expr(operand, true)?;
                c.emit(Op::Neg);
            }
            UnaryOp::Plus => {
                c.emit_expr(operand, true)?;
                c.emit(Op::Plus);
            }
            UnaryOp::Void => {
                c.emit_expr(operand, false)?;
                if put_on_stack {
                    c.emit(Op::LoadUndef);
                }
                return Ok(());
            }
            UnaryOp::Inc => {
                return operand.emit_unary(
                    c,
                    true,
                    &|c| {
                        c.emit(Op::Inc);
                        Ok(())
                    },
                    postfix,
                    put_on_stack,
                );
            }
            UnaryOp::Dec => {
                return operand.emit_unary(
                    c,
                    true,
                    &|c| {
                        c.emit(Op::Dec);
                        Ok(())
                    },
                    postfix,
                    put_on_stack,
                );
            }
        }
        if !put_on_stack {
            c.emit(Op::Pop);
        }
        Ok(())
    }

    fn emit_object_literal(
        &self,
        c: &mut Compiler,
        expr: &'a ast::ObjectLiteral,
        put_on_stack: bool,
    ) -> Result<(), JsError> {
        self.add_src_map(c);
        c.emit(Op::NewObject);
        let mut has_proto = false;
        for prop in &expr.properties {
            match prop {
                ast::Property::Keyed(prop) => {
                    let key_expr = c.compile_expression(&prop.key)?;
                    let lit_key = match &key_expr.kind {
                        ExprKind::Literal(v) => Some(v.to_string_value()),
                        _ => None,
                    };
                    if lit_key.is_none() {
                        key_expr.emit_getter(c, true)?;
                    }
                    let mut value_expr = c.compile_expression(&prop.value)?;
                    let mut anon_fn = false;
                    if let ExprKind::Function(f) = &mut value_expr.kind {
                        anon_fn = f.name.is_none();
                        if matches!(
                            prop.kind,
                            PropertyKind::Method | PropertyKind::Get | PropertyKind::Set
                        ) {
                            f.is_method = true;
                        }
                    }
                    match lit_key {
                        None => {
                            c.emit(Op::ToPropertyKey);
                            value_expr.emit_getter(c, true)?;
                            let op = match prop.kind {
                                PropertyKind::Value | PropertyKind::Method => {
                                    if anon_fn {
                                        Op::SetElem1Named
                                    } else {
                                        Op::SetElem1
                                    }
                                }
                                PropertyKind::Get => Op::SetPropGetter1,
                                PropertyKind::Set => Op::SetPropSetter1,
                            };
                            c.emit(op);
                        }
                        Some(key) => {
                            let is_proto = key == "__proto__" && !prop.computed;
                            if is_proto {
                                if has_proto {
                                    return Err(JsError::syntax_error(
                                        "Duplicate __proto__ fields are not allowed in object literals",
                                        prop.idx as i32 - 1,
                                    ));
                                }
                                has_proto = true;
                            }
                            if anon_fn && !is_proto {
                                name_anonymous_function(&mut value_expr, &key);
                            }
                            value_expr.emit_getter(c, true)?;
                            let op = match prop.kind {
                                PropertyKind::Value => {
                                    if is_proto {
                                        Op::SetProto
                                    } else {
                                        Op::SetProp1(key)
                                    }
                                }
                                PropertyKind::Method => Op::SetProp1(key),
                                PropertyKind::Get => Op::SetPropGetter(key),
                                PropertyKind::Set => Op::SetPropSetter(key),
                            };
                            c.emit(op);
                        }
                    }
                }
                ast::Property::Short(prop) => {
                    let key = prop.name.name.cheap_clone();
                    if let Some(init) = &prop.initializer {
                        return Err(JsError::syntax_error(
                            "Invalid shorthand property initializer",
                            init.idx0() as i32 - 1,
                        ));
                    }
                    if c.scope().strict && key == "let" {
                        return Err(JsError::syntax_error(
                            "'let' cannot be used as a shorthand property in strict mode",
                            self.offset,
                        ));
                    }
                    c.compile_identifier_expression(&prop.name)?
                        .emit_getter(c, true)?;
                    c.emit(Op::SetProp1(key));
                }
                ast::Property::Spread(spread) => {
                    c.compile_expression(&spread.expression)?
                        .emit_getter(c, true)?;
                    c.emit(Op::CopySpread);
                }
            }
        }
        if !put_on_stack {
            c.emit(Op::Pop);
        }
        Ok(())
    }

    fn emit_array_literal(
        &self,
        c: &mut Compiler,
        expr: &'a ast::ArrayLiteral,
        put_on_stack: bool,
    ) -> Result<(), JsError> {
        self.add_src_map(c);
        let mark = c.emit(Op::Nop);
        let mut has_spread = false;
        for v in &expr.elements {
            match v {
                Some(Expression::Spread(spread)) => {
                    has_spread = true;
                    c.compile_expression(&spread.expression)?
                        .emit_getter(c, true)?;
                    c.emit(Op::PushArraySpread);
                }
                Some(v) => {
                    c.compile_expression(&v)?.emit_getter(c, true)?;
                    c.emit(Op::PushArrayItem);
                }
                None => {
                    c.emit(Op::LoadNil);
                    c.emit(Op::PushArrayItem);
                }
            }
        }
        let count = if has_spread {
            0
        } else {
            expr.elements.len() as u32
        };
        c.patch(mark, Op::NewArray(count));
        if !put_on_stack {
            c.emit(Op::Pop);
        }
        Ok(())
    }

    fn emit_template(
        &self,
        c: &mut Compiler,
        tag: Option<&CompiledExpr<'a>>,
        elements: &[TemplateElement],
        expressions: &[CompiledExpr<'a>],
        put_on_stack: bool,
    ) -> Result<(), JsError> {
        match tag {
            None => {
                if elements.is_empty() {
                    let idx = c.define_literal(&JsValue::from(""));
                    c.emit(Op::LoadVal(idx));
                } else if elements.len() == 1 {
                    let idx =
                        c.define_literal(&JsValue::String(elements[0].parsed.cheap_clone()));
                    c.emit(Op::LoadVal(idx));
                } else {
                    let mut string_count = 0u32;
                    let head = &elements[0].parsed;
                    if !head.is_empty() {
                        let idx = c.define_literal(&JsValue::String(head.cheap_clone()));
                        c.emit(Op::LoadVal(idx));
                        string_count += 1;
                    }
                    for (i, expr) in expressions.iter().enumerate() {
                        if i > 0 {
                            let elt = &elements[i].parsed;
                            if !elt.is_empty() {
                                let idx = c.define_literal(&JsValue::String(elt.cheap_clone()));
                                c.emit(Op::LoadVal(idx));
                                string_count += 1;
                            }
                        }
                        expr.emit_getter(c, true)?;
                        c.emit(Op::ToString);
                        string_count += 1;
                    }
                    let tail = &elements[elements.len() - 1].parsed;
                    if !tail.is_empty() {
                        let idx = c.define_literal(&JsValue::String(tail.cheap_clone()));
                        c.emit(Op::LoadVal(idx));
                        string_count += 1;
                    }
                    c.emit(Op::ConcatStrings(string_count));
                }
            }
            Some(tag) => {
                let mut raw = Vec::with_capacity(elements.len());
                let mut cooked = Vec::with_capacity(elements.len());
                for elt in elements {
                    raw.push(JsValue::String(elt.literal.cheap_clone()));
                    cooked.push(if elt.valid {
                        JsValue::String(elt.parsed.cheap_clone())
                    } else {
                        JsValue::Undefined
                    });
                }
                c.emit_callee(tag)?;
                c.emit(Op::GetTaggedTmplObject {
                    raw: raw.into(),
                    cooked: cooked.into(),
                });
                for expr in expressions {
                    expr.emit_getter(c, true)?;
                }
                c.emit(Op::Call(expressions.len() as u32 + 1));
            }
        }
        if !put_on_stack {
            c.emit(Op::Pop);
        }
        Ok(())
    }
}

impl Compiler {
    /// Emit the callee of a call, leaving `(this, fn)` on the stack.
    /// Returns the callee's name when it is a plain identifier, so the
    /// call site can detect direct `eval`.
    pub(crate) fn emit_callee(&mut self, callee: &CompiledExpr<'_>) -> Result<Option<JsString>, JsError> {
        match &callee.kind {
            ExprKind::Dot { left, name } => {
                left.emit_getter(self, true)?;
                self.emit(Op::Dup);
                self.emit(Op::GetPropCallee(name.cheap_clone()));
                Ok(None)
            }
            ExprKind::Bracket { left, member } => {
                left.emit_getter(self, true)?;
                self.emit(Op::Dup);
                member.emit_getter(self, true)?;
                self.emit(Op::GetElemCallee);
                Ok(None)
            }
            ExprKind::Ident { name } => {
                let name = name.cheap_clone();
                callee.emit_getter_and_callee(self, &name)?;
                Ok(Some(name))
            }
            _ => {
                self.emit(Op::LoadUndef);
                callee.emit_getter(self, true)?;
                Ok(None)
            }
        }
    }

    /// Direct `eval` may introduce bindings into the calling scope chain:
    /// conservatively force runtime name resolution along it.
    pub(crate) fn mark_direct_eval(&mut self) {
        let mut found_func = false;
        let mut found_var = false;
        let mut cur = Some(self.scope);
        while let Some(id) = cur {
            let s = &mut self.scopes[id];
            if !found_func && s.function && !s.arrow {
                found_func = true;
                s.this_needed = true;
                s.args_needed = true;
            }
            if !found_var && (s.variable || s.function) {
                found_var = true;
                if !s.strict {
                    s.dynamic = true;
                }
            }
            s.dyn_lookup = true;
            cur = s.outer;
        }
    }

    /// Emit a write of `emit_right`'s value into the name, routing through
    /// a reference when the name may resolve dynamically. `emit_right`
    /// receives whether a reference is below the value.
    pub(crate) fn emit_var_setter1(
        &mut self,
        name: &JsString,
        offset: i32,
        put_on_stack: bool,
        emit_right: &dyn Fn(&mut Compiler, bool) -> Result<(), JsError>,
    ) -> Result<(), JsError> {
        if self.scope().strict {
            self.check_identifier_lname(name, offset)?;
        }

        let (b, no_dynamics) = self.lookup_name(name);
        if no_dynamics {
            emit_right(self, false)?;
            match b {
                Some(b) => {
                    if put_on_stack {
                        self.b_emit_set(b);
                    } else {
                        self.b_emit_set_p(b);
                    }
                }
                None => {
                    if self.scope().strict {
                        self.emit(Op::SetGlobalStrict(name.cheap_clone()));
                    } else {
                        self.emit(Op::SetGlobal(name.cheap_clone()));
                    }
                    if !put_on_stack {
                        self.emit(Op::Pop);
                    }
                }
            }
        } else {
            let strict = self.scope().strict;
            match b {
                Some(b) => self.b_emit_resolve_var(b, strict),
                None => {
                    if strict {
                        self.emit(Op::ResolveVar1Strict(name.cheap_clone()));
                    } else {
                        self.emit(Op::ResolveVar1(name.cheap_clone()));
                    }
                }
            }
            emit_right(self, true)?;
            if put_on_stack {
                self.emit(Op::PutValue);
            } else {
                self.emit(Op::PutValueP);
            }
        }
        Ok(())
    }

    /// Assign a compiled value to a name, naming anonymous functions.
    pub(crate) fn emit_var_assign(
        &mut self,
        name: &JsString,
        offset: i32,
        init: &CompiledExpr<'_>,
    ) -> Result<(), JsError> {
        self.emit_var_setter1(name, offset, false, &|c, _is_ref| init.emit_named(c, name))
    }

    /// Push a reference to a name.
    pub(crate) fn emit_var_ref(&mut self, name: &JsString, offset: i32) -> Result<(), JsError> {
        if self.scope().strict {
            self.check_identifier_lname(name, offset)?;
        }
        let (b, _) = self.lookup_name(name);
        let strict = self.scope().strict;
        match b {
            Some(b) => self.b_emit_resolve_var(b, strict),
            None => {
                if strict {
                    self.emit(Op::ResolveVar1Strict(name.cheap_clone()));
                } else {
                    self.emit(Op::ResolveVar1(name.cheap_clone()));
                }
            }
        }
        Ok(())
    }
}

fn set_prop(name: &JsString, strict: bool) -> Op {
    if strict {
        Op::SetPropStrict(name.cheap_clone())
    } else {
        Op::SetProp(name.cheap_clone())
    }
}

fn set_elem(strict: bool) -> Op {
    if strict {
        Op::SetElemStrict
    } else {
        Op::SetElem
    }
}

fn binary_op(op: BinaryOp) -> Result<Op, JsError> {
    Ok(match op {
        BinaryOp::Lt => Op::Lt,
        BinaryOp::Gt => Op::Gt,
        BinaryOp::LtEq => Op::Lte,
        BinaryOp::GtEq => Op::Gte,
        BinaryOp::Eq => Op::Eq,
        BinaryOp::NotEq => Op::Neq,
        BinaryOp::StrictEq => Op::StrictEq,
        BinaryOp::StrictNotEq => Op::StrictNeq,
        BinaryOp::Add => Op::Add,
        BinaryOp::Sub => Op::Sub,
        BinaryOp::Mul => Op::Mul,
        BinaryOp::Div => Op::Div,
        BinaryOp::Mod => Op::Mod,
        BinaryOp::And => Op::And,
        BinaryOp::Or => Op::Or,
        BinaryOp::Xor => Op::Xor,
        BinaryOp::InstanceOf => Op::InstanceOf,
        BinaryOp::In => Op::In,
        BinaryOp::Sal => Op::Sal,
        BinaryOp::Sar => Op::Sar,
        BinaryOp::Shr => Op::Shr,
        BinaryOp::LogicalOr | BinaryOp::LogicalAnd => {
            return Err(JsError::internal_error(
                "logical operator reached binary emission",
            ))
        }
    })
}

fn compound_op(op: AssignOp) -> Result<Op, JsError> {
    Ok(match op {
        AssignOp::Add => Op::Add,
        AssignOp::Sub => Op::Sub,
        AssignOp::Mul => Op::Mul,
        AssignOp::Div => Op::Div,
        AssignOp::Mod => Op::Mod,
        AssignOp::Or => Op::Or,
        AssignOp::And => Op::And,
        AssignOp::Xor => Op::Xor,
        AssignOp::Sal => Op::Sal,
        AssignOp::Sar => Op::Sar,
        AssignOp::Shr => Op::Shr,
        AssignOp::Assign => {
            return Err(JsError::internal_error(
                "plain assignment reached compound emission",
            ))
        }
    })
}

/// Compile-time validation of a regexp literal: flag set and structural
/// pattern checks. Full pattern compilation belongs to the regexp engine.
fn validate_regexp(pattern: &str, flags: &str) -> Result<(), String> {
    let mut seen = [false; 7];
    const FLAGS: &[u8] = b"dgimsuy";
    for f in flags.bytes() {
        match FLAGS.iter().position(|&k| k == f) {
            Some(i) if !seen[i] => seen[i] = true,
            _ => {
                return Err(format!(
                    "Invalid regular expression flags: '{}'",
                    flags
                ))
            }
        }
    }
    let mut depth = 0i32;
    let mut in_class = false;
    let mut bytes = pattern.bytes();
    while let Some(b) = bytes.next() {
        match b {
            b'\\' => {
                if bytes.next().is_none() {
                    return Err(format!("Invalid regular expression: {}: \\ at end of pattern", pattern));
                }
            }
            b'[' => in_class = true,
            b']' => in_class = false,
            b'(' if !in_class => depth += 1,
            b')' if !in_class => {
                depth -= 1;
                if depth < 0 {
                    return Err(format!("Invalid regular expression: {}: Unmatched ')'", pattern));
                }
            }
            _ => {}
        }
    }
    if depth != 0 {
        return Err(format!("Invalid regular expression: {}: Unterminated group", pattern));
    }
    if in_class {
        return Err(format!("Invalid regular expression: {}: Unterminated character class", pattern));
    }
    Ok(())
}
