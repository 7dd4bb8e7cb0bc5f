//! Function and arrow literal emission.
//!
//! The most intricate emitter: binds formal parameters, compiles pattern
//! and default initialisers, detects forward references between
//! parameters, lays out the stash, materialises `arguments`, and patches
//! the reserved preamble (`enter`, `boxThis`, `createArgs`, `storeArgs`)
//! once the body has been compiled and the scope finalised.

use std::cell::RefCell;
use std::mem;
use std::rc::Rc;

use crate::ast::{Expression, Statement};
use crate::compiler::bytecode::{NewFuncData, Op, Program};
use crate::compiler::compile_expr::{CompiledExpr, ExprKind, FuncBody, FunctionLit, SrcEmitter};
use crate::compiler::compile_pattern::AssignKind;
use crate::compiler::scope::{BindingRef, ScopeId};
use crate::compiler::{hoist, Block, BlockType, Compiler, FnCtx};
use crate::error::JsError;
use crate::value::{CheapClone, JsString};

impl Compiler {
    /// Emit a function literal, leaving the function object on the stack
    /// iff `put_on_stack`. `lhs_name` overrides the inherited name for
    /// anonymous literals (destructuring defaults, property values).
    pub(crate) fn emit_function(
        &mut self,
        f: &FunctionLit<'_>,
        lhs_name: Option<JsString>,
        put_on_stack: bool,
    ) -> Result<(), JsError> {
        let name: JsString = match f.name {
            Some(id) => id.name.cheap_clone(),
            None => lhs_name
                .or_else(|| f.lhs_name.as_ref().map(CheapClone::cheap_clone))
                .unwrap_or_default(),
        };

        // Fresh program; the enclosing one is restored at the end.
        let src = self.p.borrow().src.clone();
        let saved_prg = mem::replace(&mut self.p, Rc::new(RefCell::new(Program::new(src))));
        if !name.is_empty() {
            self.p.borrow_mut().func_name = name.cheap_clone();
        }

        let fn_scope = self.new_scope();
        {
            let s = self.scope_mut();
            s.function = true;
            s.arrow = f.is_arrow;
            if !s.strict {
                s.strict = f.strict_directive.is_some();
            }
        }
        let saved_block = self.block.take();
        self.block = Some(Box::new(Block {
            typ: BlockType::Scope,
            outer: None,
        }));
        let saved_fn_ctx = mem::replace(
            &mut self.fn_ctx,
            FnCtx {
                fn_scope,
                first_forward_ref: None,
                args_rest_mark: None,
            },
        );

        let result = self.emit_function_body(f, fn_scope, &name, put_on_stack, saved_prg);

        self.block = saved_block;
        self.fn_ctx = saved_fn_ctx;
        result
    }

    fn emit_function_body(
        &mut self,
        f: &FunctionLit<'_>,
        fn_scope: ScopeId,
        name: &JsString,
        put_on_stack: bool,
        saved_prg: crate::compiler::PrgRef,
    ) -> Result<(), JsError> {
        let mut has_patterns = false;
        let mut has_inits = false;
        let mut first_dup: Option<i32> = None;
        let mut length = 0u32;

        if f.params.rest.is_some() {
            // Not a pattern as such, but it activates all the checks.
            has_patterns = true;
        }

        // Formal parameters first: their bindings must be the first in
        // the scope, matching argument positions.
        for item in &f.params.list {
            match &item.target {
                Expression::Identifier(id) => {
                    let offset = id.idx as i32 - 1;
                    let (b, unique) = self.compile_parameter_binding_identifier(&id.name, offset)?;
                    if !unique && first_dup.is_none() {
                        first_dup = Some(offset);
                    }
                    self.binding_mut(b).is_arg = true;
                }
                t if t.is_pattern() => {
                    let b = self.add_binding();
                    self.binding_mut(b).is_arg = true;
                    has_patterns = true;
                }
                other => {
                    return Err(JsError::syntax_error(
                        "Unsupported binding element in formal parameter list",
                        other.idx0() as i32 - 1,
                    ))
                }
            }
            if item.initializer.is_some() {
                has_inits = true;
            }
            if let Some(dup) = first_dup {
                if has_patterns || has_inits || self.scope().strict || f.is_arrow || f.is_method {
                    return Err(JsError::syntax_error(
                        "Duplicate parameter name not allowed in this context",
                        dup,
                    ));
                }
            }
            if has_patterns || has_inits {
                if let Some(idx) = f.strict_directive {
                    return Err(JsError::syntax_error(
                        "Illegal 'use strict' directive in function with non-simple parameter list",
                        idx as i32 - 1,
                    ));
                }
            }
            if !has_inits {
                length += 1;
            }
        }

        if has_patterns {
            for item in &f.params.list {
                if item.target.is_pattern() {
                    self.compile_parameter_pattern_binding(&item.target)?;
                }
            }
            if let Some(rest) = &f.params.rest {
                self.compile_parameter_pattern_binding(rest)?;
            }
        }

        let params_count = f.params.list.len();
        self.scopes[fn_scope].num_args = params_count;

        let body: &[Statement] = match &f.body {
            FuncBody::Block(stmts) => stmts,
            FuncBody::Concise(_) => &[],
        };
        let funcs = hoist::extract_functions(body);

        // Reserve the preamble: enter, boxThis, createArgs, storeArgs.
        let mut preamble_len = 4usize;
        for _ in 0..4 {
            self.emit(Op::Nop);
        }

        let mut callee_binding: Option<BindingRef> = None;
        let mut enter_func_body_mark: Option<usize> = None;
        let mut var_scope: Option<ScopeId> = None;

        if has_patterns || has_inits {
            if f.is_expr {
                if let Some(id) = f.name {
                    let (b, created) = self.bind_name_lexical(&id.name, false, 0)?;
                    if created {
                        self.binding_mut(b).is_const = true;
                        callee_binding = Some(b);
                    }
                }
            }
            if let Some(cb) = callee_binding {
                self.emit(Op::LoadCallee);
                self.b_emit_init(cb);
            }

            for (i, item) in f.params.list.iter().enumerate() {
                let b = BindingRef {
                    scope: fn_scope,
                    index: i,
                };
                if item.target.is_pattern() {
                    let default = match &item.initializer {
                        Some(e) => Some(Box::new(self.compile_expression(e)?)),
                        None => None,
                    };
                    let init = CompiledExpr {
                        offset: item.target.idx0() as i32 - 1,
                        kind: ExprKind::PatternInit {
                            src: SrcEmitter::Param { index: i },
                            default,
                        },
                    };
                    init.emit_getter(self, true)?;
                    self.emit_pattern(&item.target, AssignKind::Lexical, false)?;
                } else if let Some(init_expr) = &item.initializer {
                    let mark_get = self.emit(Op::Nop);
                    let mark = self.emit(Op::Nop);
                    self.compile_expression(init_expr)?.emit_getter(self, true)?;
                    // A use count here means an earlier default referenced
                    // this parameter before its initialisation.
                    if self.fn_ctx.first_forward_ref.is_none()
                        && (self.scopes[fn_scope].is_dynamic() || self.binding(b).use_count() > 0)
                    {
                        self.fn_ctx.first_forward_ref = Some(i);
                    }
                    if self.fn_ctx.first_forward_ref.is_none() {
                        self.b_emit_get_at(b, mark_get);
                    } else {
                        self.patch(mark_get, Op::LoadStackLex(-(i as i32) - 1));
                    }
                    self.b_emit_init(b);
                    let off = self.jump_offset(mark);
                    self.patch(mark, Op::JdefP(off));
                } else {
                    if self.fn_ctx.first_forward_ref.is_none() && self.binding(b).use_count() > 0 {
                        self.fn_ctx.first_forward_ref = Some(i);
                    }
                    if self.fn_ctx.first_forward_ref.is_some() {
                        self.emit(Op::LoadStackLex(-(i as i32) - 1));
                        self.b_emit_init(b);
                    }
                }
            }
            if let Some(rest) = &f.params.rest {
                let init = CompiledExpr {
                    offset: rest.idx0() as i32 - 1,
                    kind: ExprKind::Emitter {
                        src: SrcEmitter::ArgsRest {
                            count: params_count,
                        },
                    },
                };
                self.emit_assign(rest, init, AssignKind::Lexical)?;
            }
            if self.fn_ctx.first_forward_ref.is_some() {
                for binding in &mut self.scopes[fn_scope].bindings {
                    binding.in_stash = true;
                }
                let s = &mut self.scopes[fn_scope];
                s.args_in_stash = true;
                s.need_stash = true;
            }

            // The body's variable environment is distinct from the
            // parameter scope.
            let vs = self.new_block_scope();
            var_scope = Some(vs);
            self.scope_mut().variable = true;
            enter_func_body_mark = Some(self.emit(Op::Nop));
            self.create_var_bindings(body)?;
            self.create_function_bindings(&funcs)?;
            self.create_lexical_bindings(body)?;
            // Writes to a parameter-named var must reach the parameter.
            for index in 0..self.scopes[vs].bindings.len() {
                let binding = &self.scopes[vs].bindings[index];
                if !binding.is_var || binding.dead {
                    continue;
                }
                let bname = binding.name.cheap_clone();
                let p_index = self.scopes[fn_scope]
                    .bound_names
                    .get(bname.as_str())
                    .copied();
                if let Some(p_index) = p_index {
                    let pb = BindingRef {
                        scope: fn_scope,
                        index: p_index,
                    };
                    if Some(pb) != callee_binding {
                        self.b_emit_get(pb);
                        self.b_emit_set_p(BindingRef { scope: vs, index });
                    }
                }
            }
        } else {
            // Parameters read through as vars so a binding introduced by
            // sloppy direct eval does not conflict.
            for index in 0..params_count {
                self.scopes[fn_scope].bindings[index].is_var = true;
            }
            self.create_var_bindings(body)?;
            self.create_function_bindings(&funcs)?;
            self.create_lexical_bindings(body)?;
            if f.is_expr {
                if let Some(id) = f.name {
                    let (b, created) = self.bind_name_lexical(&id.name, false, 0)?;
                    if created {
                        self.binding_mut(b).is_const = true;
                        callee_binding = Some(b);
                    }
                }
            }
            if let Some(cb) = callee_binding {
                self.emit(Op::LoadCallee);
                self.b_emit_init(cb);
            }
        }

        self.compile_functions(&funcs)?;
        let ends_with_ret = match &f.body {
            FuncBody::Block(stmts) => {
                self.compile_statements(stmts, false)?;
                matches!(stmts.last(), Some(Statement::Return(_)))
            }
            FuncBody::Concise(expr) => {
                let e = self.compile_expression(expr)?;
                self.emit_expr(&e, true)?;
                self.emit(Op::Ret);
                true
            }
        };
        if !ends_with_ret {
            self.emit(Op::LoadUndef);
            self.emit(Op::Ret);
        }

        // ── finalisation ────────────────────────────────────────────────

        // A function-expression self-name only read by its own init can
        // be elided together with its two preamble instructions.
        if let Some(cb) = callee_binding {
            if !self.scopes[fn_scope].is_dynamic() && self.binding(cb).use_count() == 1 {
                self.delete_binding(cb);
                preamble_len += 2;
            }
        }

        if !self.scopes[fn_scope].args_in_stash
            && (self.scopes[fn_scope].args_needed || self.scopes[fn_scope].is_dynamic())
        {
            self.move_args_to_stash(fn_scope);
        }

        let mut delta = 0usize;
        if self.scopes[fn_scope].args_needed {
            let args_name: JsString = "arguments".into();
            let (b, created) = self.bind_name_lexical_in(fn_scope, &args_name, false, 0)?;
            if !created && !self.binding(b).is_var {
                // Explicitly declared lexical `arguments` shadows the
                // implicit object.
                self.scopes[fn_scope].args_needed = false;
            } else {
                let strict = self.scopes[fn_scope].strict;
                {
                    let binding = self.binding_mut(b);
                    if strict {
                        binding.is_const = true;
                    } else {
                        binding.is_var = true;
                    }
                    binding.in_stash = true;
                }
                self.scopes[fn_scope].need_stash = true;
                let pos = preamble_len - 2;
                delta += 2;
                let create = if strict || has_patterns || has_inits {
                    Op::CreateArgsUnmapped(params_count as u32)
                } else {
                    Op::CreateArgsMapped(params_count as u32)
                };
                self.patch(pos, create);
                self.mark_access_point_at_scope(b, fn_scope, pos + 1);
                self.patch(pos + 1, Op::StoreStashP(0));
            }
        }

        let (stash_size, stack_size) = self.finalise_var_alloc(fn_scope, 0)?;

        if !self.scopes[fn_scope].strict && self.scopes[fn_scope].this_needed {
            delta += 1;
            self.patch(preamble_len - delta, Op::BoxThis);
        }
        delta += 1;
        let slice_at = preamble_len - delta;

        let body_enter = match (enter_func_body_mark, var_scope) {
            (Some(mark), Some(vs)) => {
                let (body_stash, body_stack) = self.finalise_var_alloc(vs, stack_size)?;
                let extensible = self.scopes[vs].dynamic;
                let names = if self.scopes[vs].is_dynamic() {
                    Some(Rc::new(self.make_names_map(vs)))
                } else {
                    None
                };
                Some((mark, body_stash, body_stack, extensible, names))
            }
            _ => None,
        };

        let args_in_stash = self.scopes[fn_scope].args_in_stash;
        let extensible = self.scopes[fn_scope].dynamic;
        let dynamic = self.scopes[fn_scope].is_dynamic();
        let num_args = self.scopes[fn_scope].num_args as u32;
        let first_forward_ref = self.fn_ctx.first_forward_ref;
        let enter = if stash_size > 0 || args_in_stash {
            let names = if dynamic {
                Some(Rc::new(self.make_names_map(fn_scope)))
            } else {
                None
            };
            match first_forward_ref {
                Some(ffr) => Op::EnterFunc1 {
                    stash_size,
                    num_args,
                    args_to_copy: ffr as u32,
                    extensible,
                    names,
                },
                None => Op::EnterFunc {
                    num_args,
                    args_to_stash: args_in_stash,
                    stash_size,
                    stack_size,
                    extensible,
                    names,
                },
            }
        } else {
            Op::EnterFuncStashless {
                stack_size,
                args: num_args,
            }
        };
        self.patch(slice_at, enter);
        if let Some((mark, body_stash, body_stack, ext, names)) = body_enter {
            self.patch(
                mark,
                Op::EnterFuncBody {
                    stash_size: body_stash,
                    stack_size: body_stack,
                    adjust_stack: first_forward_ref.is_some(),
                    extensible: ext,
                    names,
                },
            );
        }
        if let Some(mark) = self.fn_ctx.args_rest_mark {
            if args_in_stash {
                self.patch(mark, Op::CreateArgsRestStash);
            }
        }

        if slice_at != 0 {
            {
                let mut p = self.p.borrow_mut();
                p.code.drain(..slice_at);
                for item in &mut p.src_map {
                    item.pc = item.pc.saturating_sub(slice_at);
                }
            }
            // Access points recorded in this program shift with the code;
            // outer scopes patch them later.
            let in_this_prg: Vec<bool> = self
                .scopes
                .iter()
                .map(|s| Rc::ptr_eq(&s.prg, &self.p))
                .collect();
            for scope in &mut self.scopes {
                for binding in &mut scope.bindings {
                    for ap in &mut binding.access_points {
                        if in_this_prg[ap.scope] {
                            ap.pc = ap.pc.saturating_sub(slice_at);
                        }
                    }
                }
            }
        }

        if enter_func_body_mark.is_some() {
            self.pop_scope();
        }
        let strict = self.scopes[fn_scope].strict;
        self.pop_scope();
        let prg = mem::replace(&mut self.p, saved_prg);

        let data = Rc::new(NewFuncData {
            prg,
            length,
            name: name.cheap_clone(),
            source: f.source.to_string(),
            strict,
        });
        if f.is_arrow {
            self.emit(Op::NewArrowFunc(data));
        } else if f.is_method {
            self.emit(Op::NewMethod(data));
        } else {
            self.emit(Op::NewFunc(data));
        }
        if !put_on_stack {
            self.emit(Op::Pop);
        }
        Ok(())
    }

    fn compile_parameter_binding_identifier(
        &mut self,
        name: &JsString,
        offset: i32,
    ) -> Result<(BindingRef, bool), JsError> {
        if self.scope().strict {
            self.check_identifier_name(name, offset)?;
            self.check_identifier_lname(name, offset)?;
        }
        Ok(self.bind_name_shadow(name))
    }

    fn compile_parameter_pattern_binding(&mut self, target: &Expression) -> Result<(), JsError> {
        self.create_bindings(target, &mut |c, name, offset| {
            let (_, unique) = c.compile_parameter_binding_identifier(name, offset)?;
            if !unique {
                return Err(JsError::syntax_error(
                    "Duplicate parameter name not allowed in this context",
                    offset,
                ));
            }
            Ok(())
        })
    }
}
