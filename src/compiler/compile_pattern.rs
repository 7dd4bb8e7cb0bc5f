//! Destructuring patterns.
//!
//! Object and array patterns share one emission routine parameterised by
//! the assignment kind: plain assignment targets, lexical declaration
//! slots, or `var` writes. Each consumed slot wires its source (property
//! read, iterator step, rest collector) to an optional default through a
//! `PatternInit` node.

use crate::ast::{self, AssignOp, Expression, Property};
use crate::compiler::bytecode::Op;
use crate::compiler::compile_expr::{CompiledExpr, ExprKind, SrcEmitter};
use crate::compiler::scope::BindingRef;
use crate::compiler::Compiler;
use crate::error::JsError;
use crate::value::{CheapClone, JsString};

/// How a pattern writes its targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AssignKind {
    /// `var` semantics: write through the variable setter.
    Var,
    /// Initialise a lexical binding in the current scope.
    Lexical,
    /// Plain assignment: route through the target's setter.
    Plain,
}

impl Compiler {
    /// Assign `init` to `target`, which may be a nested pattern.
    pub(crate) fn emit_assign<'a>(
        &mut self,
        target: &'a Expression,
        init: CompiledExpr<'a>,
        kind: AssignKind,
    ) -> Result<(), JsError> {
        match target {
            Expression::ObjectPattern(p) => {
                init.emit_getter(self, true)?;
                self.emit_object_pattern(p, kind, false)
            }
            Expression::ArrayPattern(p) => {
                init.emit_getter(self, true)?;
                self.emit_array_pattern(p, kind, false)
            }
            _ => {
                let target = self.compile_expression(target)?;
                self.emit_assign_simple(&target, &init, kind)
            }
        }
    }

    fn emit_assign_simple(
        &mut self,
        target: &CompiledExpr<'_>,
        init: &CompiledExpr<'_>,
        kind: AssignKind,
    ) -> Result<(), JsError> {
        match kind {
            AssignKind::Plain => {
                if let ExprKind::Ident { name } = &target.kind {
                    let name = name.cheap_clone();
                    self.emit_var_setter1(&name, target.offset, false, &|c, _is_ref| {
                        init.emit_named(c, &name)
                    })
                } else {
                    target.emit_setter(self, init, false)
                }
            }
            AssignKind::Lexical => match &target.kind {
                ExprKind::Ident { name } => {
                    let b = self.lexical_binding(name, target.offset)?;
                    init.emit_named(self, name)?;
                    self.b_emit_init(b);
                    Ok(())
                }
                _ => Err(JsError::syntax_error(
                    "Invalid destructuring assignment target",
                    target.offset,
                )),
            },
            AssignKind::Var => match &target.kind {
                ExprKind::Ident { name } => self.emit_var_assign(name, target.offset, init),
                _ => Err(JsError::syntax_error(
                    "Invalid destructuring assignment target",
                    target.offset,
                )),
            },
        }
    }

    /// The binding a lexical declaration target resolves to; it was
    /// created by the declaration prepass over the current scope.
    pub(crate) fn lexical_binding(
        &mut self,
        name: &JsString,
        offset: i32,
    ) -> Result<BindingRef, JsError> {
        match self.scope().bound_names.get(name.as_str()) {
            Some(&index) => Ok(BindingRef {
                scope: self.scope,
                index,
            }),
            None => Err(JsError::syntax_error(
                format!("Undeclared lexical binding '{}'", name),
                offset,
            )),
        }
    }

    /// Dispatch to the object or array pattern emitter.
    pub(crate) fn emit_pattern<'a>(
        &mut self,
        pattern: &'a Expression,
        kind: AssignKind,
        put_on_stack: bool,
    ) -> Result<(), JsError> {
        match pattern {
            Expression::ObjectPattern(p) => self.emit_object_pattern(p, kind, put_on_stack),
            Expression::ArrayPattern(p) => self.emit_array_pattern(p, kind, put_on_stack),
            _ => Err(JsError::internal_error("not a pattern")),
        }
    }

    /// Destructure the object on top of the stack.
    pub(crate) fn emit_object_pattern<'a>(
        &mut self,
        pattern: &'a ast::ObjectPattern,
        kind: AssignKind,
        put_on_stack: bool,
    ) -> Result<(), JsError> {
        if pattern.rest.is_some() {
            // The wrapper records consumed keys for the rest collector.
            self.emit(Op::CreateDestructSrc);
        } else {
            self.emit(Op::CheckObjectCoercible);
        }
        for prop in &pattern.properties {
            match prop {
                Property::Short(prop) => {
                    self.emit(Op::Dup);
                    let target = self.compile_identifier_expression(&prop.name)?;
                    let default = match &prop.initializer {
                        Some(init) => Some(Box::new(self.compile_expression(init)?)),
                        None => None,
                    };
                    let init = CompiledExpr {
                        offset: prop.idx as i32 - 1,
                        kind: ExprKind::PatternInit {
                            src: SrcEmitter::Prop(prop.name.name.cheap_clone()),
                            default,
                        },
                    };
                    self.emit_assign_simple(&target, &init, kind)?;
                }
                Property::Keyed(prop) => {
                    self.emit(Op::Dup);
                    self.compile_expression(&prop.key)?.emit_getter(self, true)?;
                    self.emit(Op::ToPropertyKey);
                    let (target, initializer) = split_default(&prop.value);
                    let default = match initializer {
                        Some(init) => Some(Box::new(self.compile_expression(init)?)),
                        None => None,
                    };
                    let init = CompiledExpr {
                        offset: prop.idx as i32 - 1,
                        kind: ExprKind::PatternInit {
                            src: SrcEmitter::Key,
                            default,
                        },
                    };
                    self.emit_assign(target, init, kind)?;
                }
                Property::Spread(spread) => {
                    return Err(JsError::syntax_error(
                        "Unexpected spread property in pattern",
                        spread.idx as i32 - 1,
                    ));
                }
            }
        }
        if let Some(rest) = &pattern.rest {
            let init = CompiledExpr {
                offset: rest.idx0() as i32 - 1,
                kind: ExprKind::Emitter {
                    src: SrcEmitter::CopyRest,
                },
            };
            self.emit_assign(rest, init, kind)?;
            self.emit(Op::Pop);
        }
        if !put_on_stack {
            self.emit(Op::Pop);
        }
        Ok(())
    }

    /// Destructure the iterable on top of the stack.
    pub(crate) fn emit_array_pattern<'a>(
        &mut self,
        pattern: &'a ast::ArrayPattern,
        kind: AssignKind,
        put_on_stack: bool,
    ) -> Result<(), JsError> {
        self.emit(Op::Iterate);
        for elt in &pattern.elements {
            match elt {
                None => {
                    // Elision drains one iterator step.
                    self.emit(Op::IterGetNextOrUndef);
                    self.emit(Op::Pop);
                }
                Some(Expression::Assign(e)) if e.operator == AssignOp::Assign => {
                    let default = Some(Box::new(self.compile_expression(&e.right)?));
                    let init = CompiledExpr {
                        offset: e.idx as i32 - 1,
                        kind: ExprKind::PatternInit {
                            src: SrcEmitter::IterNext,
                            default,
                        },
                    };
                    self.emit_assign(&e.left, init, kind)?;
                }
                Some(elt) => {
                    let init = CompiledExpr {
                        offset: elt.idx0() as i32 - 1,
                        kind: ExprKind::Emitter {
                            src: SrcEmitter::IterNext,
                        },
                    };
                    self.emit_assign(elt, init, kind)?;
                }
            }
        }
        if let Some(rest) = &pattern.rest {
            let init = CompiledExpr {
                offset: rest.idx0() as i32 - 1,
                kind: ExprKind::Emitter {
                    src: SrcEmitter::ArrayFromIter,
                },
            };
            self.emit_assign(rest, init, kind)?;
        } else {
            self.emit(Op::EnumPopClose);
        }
        if !put_on_stack {
            self.emit(Op::Pop);
        }
        Ok(())
    }

    /// Assignment-expression entry (`[a, b] = rhs` / `({a} = rhs)`).
    pub(crate) fn emit_object_pattern_assign<'a>(
        &mut self,
        pattern: &'a ast::ObjectPattern,
        put_on_stack: bool,
    ) -> Result<(), JsError> {
        self.emit_object_pattern(pattern, AssignKind::Plain, put_on_stack)
    }

    pub(crate) fn emit_array_pattern_assign<'a>(
        &mut self,
        pattern: &'a ast::ArrayPattern,
        put_on_stack: bool,
    ) -> Result<(), JsError> {
        self.emit_array_pattern(pattern, AssignKind::Plain, put_on_stack)
    }

    /// Walk a binding target, invoking `bind` for every bound identifier.
    pub(crate) fn create_bindings(
        &mut self,
        target: &Expression,
        bind: &mut dyn FnMut(&mut Compiler, &JsString, i32) -> Result<(), JsError>,
    ) -> Result<(), JsError> {
        match target {
            Expression::Identifier(id) => bind(self, &id.name, id.idx as i32 - 1),
            Expression::ObjectPattern(p) => {
                for prop in &p.properties {
                    match prop {
                        Property::Short(prop) => {
                            bind(self, &prop.name.name, prop.name.idx as i32 - 1)?;
                        }
                        Property::Keyed(prop) => {
                            let (target, _) = split_default(&prop.value);
                            self.create_bindings(target, bind)?;
                        }
                        Property::Spread(spread) => {
                            return Err(JsError::syntax_error(
                                "Unexpected spread property in pattern",
                                spread.idx as i32 - 1,
                            ));
                        }
                    }
                }
                if let Some(rest) = &p.rest {
                    self.create_bindings(rest, bind)?;
                }
                Ok(())
            }
            Expression::ArrayPattern(p) => {
                for elt in p.elements.iter().flatten() {
                    let (target, _) = split_default(elt);
                    self.create_bindings(target, bind)?;
                }
                if let Some(rest) = &p.rest {
                    self.create_bindings(rest, bind)?;
                }
                Ok(())
            }
            Expression::Assign(e) if e.operator == AssignOp::Assign => {
                self.create_bindings(&e.left, bind)
            }
            other => Err(JsError::syntax_error(
                "Unsupported binding target",
                other.idx0() as i32 - 1,
            )),
        }
    }
}

/// Split a `target = default` value into its parts.
fn split_default(e: &Expression) -> (&Expression, Option<&Expression>) {
    match e {
        Expression::Assign(a) if a.operator == AssignOp::Assign => (&a.left, Some(&a.right)),
        e => (e, None),
    }
}
