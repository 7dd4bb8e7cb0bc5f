//! Bytecode compiler for ECMAScript expressions.
//!
//! Lowers a parsed AST into a linear stream of stack-based VM
//! instructions, resolving identifier bindings, enforcing strict-mode
//! rules, handling destructuring patterns and folding constant sub-trees
//! at compile time.
//!
//! Compilation is a recursive descent over compiled-expression nodes: the
//! dispatcher builds a node tree mirroring the AST, and the statement
//! layer asks nodes to emit their getter/setter/reference forms into the
//! current [`Program`].

mod bytecode;
mod compile_expr;
mod compile_func;
mod compile_pattern;
mod compile_stmt;
mod eval_vm;
mod hoist;
mod scope;

pub use bytecode::{
    stash_idx, stash_level, stash_ref, NamesMap, NewFuncData, Op, PrgRef, Program, SrcMapItem,
    StashRef,
};

use std::cell::RefCell;
use std::rc::Rc;

use crate::ast::Script;
use crate::error::JsError;
use crate::value::{JsString, JsValue};
use scope::{Scope, ScopeId};

/// Compiler state: the program being emitted into, the scope tree, and
/// the lexical block chain.
pub struct Compiler {
    pub(crate) p: PrgRef,
    pub(crate) scopes: Vec<Scope>,
    /// Cursor into `scopes`.
    pub(crate) scope: ScopeId,
    pub(crate) block: Option<Box<Block>>,
    /// Emission state of the function literal currently being finalised.
    pub(crate) fn_ctx: FnCtx,
}

/// A lexical block on the compile-time chain.
#[derive(Debug)]
#[allow(dead_code)]
pub(crate) struct Block {
    pub typ: BlockType,
    pub outer: Option<Box<Block>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BlockType {
    Scope,
}

/// Per-function-literal emission state, saved and restored around nested
/// function emission.
#[derive(Debug, Default)]
pub(crate) struct FnCtx {
    /// The function scope parameters were bound in.
    pub fn_scope: ScopeId,
    /// First parameter referenced before its own initialisation.
    pub first_forward_ref: Option<usize>,
    /// Position of the `CreateArgsRestStack` instruction, patched to the
    /// stash form when the arguments end up there.
    pub args_rest_mark: Option<usize>,
}

impl Compiler {
    pub fn new() -> Self {
        Self::with_source("")
    }

    pub fn with_source(src: impl Into<Rc<str>>) -> Self {
        let p = Rc::new(RefCell::new(Program::new(src.into())));
        let root = Compiler::root_scope(p.clone());
        Compiler {
            p,
            scopes: vec![root],
            scope: 0,
            block: None,
            fn_ctx: FnCtx::default(),
        }
    }

    /// Compile a script. The root scope is backed by the global object,
    /// so free names resolve dynamically at runtime. The value of the
    /// final expression statement is left on the stack as the completion
    /// value when `Halt` is reached.
    pub fn compile_script(script: &Script, strict: bool) -> Result<PrgRef, JsError> {
        Compiler::new().compile_script_impl(script, strict)
    }

    /// As [`Compiler::compile_script`], carrying the source text for
    /// diagnostics and function sources.
    pub fn compile_script_with_source(
        script: &Script,
        src: &str,
        strict: bool,
    ) -> Result<PrgRef, JsError> {
        Compiler::with_source(src).compile_script_impl(script, strict)
    }

    fn compile_script_impl(mut self, script: &Script, strict: bool) -> Result<PrgRef, JsError> {
        let strict = strict || hoist::strict_directive(&script.body).is_some();
        self.scopes[0].strict = strict;

        let script_scope = self.new_block_scope();
        self.scope_mut().variable = true;
        let prologue = self.emit(Op::Nop);

        let funcs = hoist::extract_functions(&script.body);
        self.create_function_bindings(&funcs)?;
        self.create_var_bindings(&script.body)?;
        self.create_lexical_bindings(&script.body)?;
        self.compile_functions(&funcs)?;
        self.compile_statements(&script.body, true)?;
        self.emit(Op::Halt);

        let (stash_size, stack_size) = self.finalise_var_alloc(script_scope, 0)?;
        let extensible = self.scope().dynamic;
        let names = if self.scope().is_dynamic() {
            Some(Rc::new(self.make_names_map(script_scope)))
        } else {
            None
        };
        self.patch(
            prologue,
            Op::EnterFuncBody {
                stash_size,
                stack_size,
                adjust_stack: false,
                extensible,
                names,
            },
        );
        self.pop_scope();
        Ok(self.p)
    }

    // ── emission ────────────────────────────────────────────────────────

    /// Append an instruction, returning its index.
    pub(crate) fn emit(&mut self, op: Op) -> usize {
        let mut p = self.p.borrow_mut();
        let pc = p.code.len();
        p.code.push(op);
        pc
    }

    pub(crate) fn code_len(&self) -> usize {
        self.p.borrow().code.len()
    }

    pub(crate) fn patch(&mut self, pc: usize, op: Op) {
        self.p.borrow_mut().code[pc] = op;
    }

    /// Relative offset from the instruction at `from` to the current end
    /// of code, for jump operands.
    pub(crate) fn jump_offset(&self, from: usize) -> i32 {
        (self.code_len() - from) as i32
    }

    /// Record a source-map entry at the current pc.
    pub(crate) fn add_src_map(&mut self, offset: i32) {
        if offset > 0 {
            let mut p = self.p.borrow_mut();
            let pc = p.code.len();
            p.src_map.push(SrcMapItem {
                pc,
                src_pos: offset as usize,
            });
        }
    }

    pub(crate) fn define_literal(&mut self, v: &JsValue) -> u32 {
        self.p.borrow_mut().define_literal_value(v)
    }

    // ── strict-mode identifier checks ───────────────────────────────────

    /// Reject strict-mode reserved words used as identifiers.
    pub(crate) fn check_identifier_name(&self, name: &JsString, offset: i32) -> Result<(), JsError> {
        match name.as_str() {
            "implements" | "interface" | "let" | "package" | "private" | "protected"
            | "public" | "static" | "yield" => Err(JsError::syntax_error(
                format!("Unexpected strict mode reserved word '{}'", name),
                offset,
            )),
            _ => Ok(()),
        }
    }

    /// Reject `eval`/`arguments` as assignment or binding targets in
    /// strict mode.
    pub(crate) fn check_identifier_lname(
        &self,
        name: &JsString,
        offset: i32,
    ) -> Result<(), JsError> {
        match name.as_str() {
            "eval" | "arguments" => Err(JsError::syntax_error(
                format!("Assignment to {} is not allowed in strict mode", name),
                offset,
            )),
            _ => Ok(()),
        }
    }
}

impl Default for Compiler {
    fn default() -> Self {
        Self::new()
    }
}

/// Compile a script with default settings.
pub fn compile_script(script: &Script, strict: bool) -> Result<PrgRef, JsError> {
    Compiler::compile_script(script, strict)
}
