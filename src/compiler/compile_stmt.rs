//! Minimal statement layer.
//!
//! Only what function-body and script compilation need: expression
//! statements, variable declarations, hoisted function declarations and
//! `return`. Everything else belongs to the statement compiler proper.

use crate::ast::{DeclKind, Expression, FunctionLiteral, Statement, VariableDeclaration};
use crate::compiler::bytecode::Op;
use crate::compiler::compile_pattern::AssignKind;
use crate::compiler::{hoist, Compiler};
use crate::error::JsError;

impl Compiler {
    /// Compile a statement list. With `need_result`, the completion value
    /// (the last expression statement's value, else `undefined`) is left
    /// on the stack.
    pub(crate) fn compile_statements<'a>(
        &mut self,
        stmts: &'a [Statement],
        need_result: bool,
    ) -> Result<(), JsError> {
        if let Some((last, init)) = stmts.split_last() {
            for stmt in init {
                self.compile_statement(stmt, false)?;
            }
            self.compile_statement(last, need_result)?;
            if need_result && !matches!(last, Statement::Expression(_)) {
                self.emit(Op::LoadUndef);
            }
        } else if need_result {
            self.emit(Op::LoadUndef);
        }
        Ok(())
    }

    pub(crate) fn compile_statement<'a>(
        &mut self,
        stmt: &'a Statement,
        need_result: bool,
    ) -> Result<(), JsError> {
        match stmt {
            Statement::Expression(e) => {
                let expr = self.compile_expression(&e.expression)?;
                self.emit_expr(&expr, need_result)
            }
            Statement::VariableDeclaration(d) => self.compile_variable_declaration(d),
            // Emitted by the hoisting pass before the body.
            Statement::FunctionDeclaration(_) => Ok(()),
            Statement::Return(r) => {
                match &r.argument {
                    Some(arg) => {
                        let expr = self.compile_expression(arg)?;
                        self.emit_expr(&expr, true)?;
                    }
                    None => {
                        self.emit(Op::LoadUndef);
                    }
                }
                self.emit(Op::Ret);
                Ok(())
            }
        }
    }

    fn compile_variable_declaration<'a>(
        &mut self,
        d: &'a VariableDeclaration,
    ) -> Result<(), JsError> {
        for decl in &d.list {
            match d.kind {
                DeclKind::Var => {
                    // The binding itself was hoisted; only initialisers
                    // produce code.
                    if let Some(init) = &decl.initializer {
                        let init = self.compile_expression(init)?;
                        self.emit_assign(&decl.target, init, AssignKind::Var)?;
                    }
                }
                DeclKind::Let | DeclKind::Const => {
                    if let Some(init) = &decl.initializer {
                        let init = self.compile_expression(init)?;
                        self.emit_assign(&decl.target, init, AssignKind::Lexical)?;
                    } else if let Expression::Identifier(id) = &decl.target {
                        let b = self.lexical_binding(&id.name, id.idx as i32 - 1)?;
                        self.emit(Op::LoadUndef);
                        self.b_emit_init(b);
                    }
                }
            }
        }
        Ok(())
    }

    // ── declaration prepasses ───────────────────────────────────────────

    /// Create the hoisted bindings for function declarations.
    pub(crate) fn create_function_bindings(
        &mut self,
        funcs: &[&FunctionLiteral],
    ) -> Result<(), JsError> {
        for f in funcs {
            match &f.name {
                Some(name) => {
                    if self.scope().strict {
                        self.check_identifier_lname(&name.name, name.idx as i32 - 1)?;
                    }
                    self.bind_name(&name.name);
                }
                None => {
                    return Err(JsError::syntax_error(
                        "Function statements require a function name",
                        f.idx as i32 - 1,
                    ))
                }
            }
        }
        Ok(())
    }

    /// Create the hoisted `var` bindings of a body.
    pub(crate) fn create_var_bindings(&mut self, body: &[Statement]) -> Result<(), JsError> {
        for (name, idx) in hoist::collect_var_names(body) {
            if self.scope().strict {
                self.check_identifier_lname(&name, idx as i32 - 1)?;
            }
            self.bind_name(&name);
        }
        Ok(())
    }

    /// Create the lexical (`let`/`const`) bindings of a body in the
    /// current scope.
    pub(crate) fn create_lexical_bindings(&mut self, body: &[Statement]) -> Result<(), JsError> {
        for stmt in body {
            if let Statement::VariableDeclaration(d) = stmt {
                if d.kind != DeclKind::Var {
                    let is_const = d.kind == DeclKind::Const;
                    let strict = self.scope().strict;
                    for decl in &d.list {
                        self.create_bindings(&decl.target, &mut |c, name, offset| {
                            if strict {
                                c.check_identifier_lname(name, offset)?;
                            }
                            let (b, _) = c.bind_name_lexical(name, true, offset)?;
                            if is_const {
                                c.binding_mut(b).is_const = true;
                            }
                            Ok(())
                        })?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Emit hoisted function declarations into their bindings.
    pub(crate) fn compile_functions<'a>(
        &mut self,
        funcs: &[&'a FunctionLiteral],
    ) -> Result<(), JsError> {
        for f in funcs {
            let name = match &f.name {
                Some(name) => name,
                None => {
                    return Err(JsError::syntax_error(
                        "Function statements require a function name",
                        f.idx as i32 - 1,
                    ))
                }
            };
            let expr = self.compile_function_literal(f, false)?;
            self.emit_var_assign(&name.name, name.idx as i32 - 1, &expr)?;
        }
        Ok(())
    }
}
