//! Lexical scopes and bindings.
//!
//! Scopes form a tree held in an arena owned by the compiler; the cursor
//! is an index and popping a scope only moves the cursor, so finished
//! scopes remain addressable when an enclosing function later computes
//! stash levels for closure captures.
//!
//! Binding accesses are emitted as placeholder instructions and recorded
//! as `(scope, pc)` access points. `finalise_var_alloc` assigns every
//! binding its final home (argument stack slot, local lexical slot, or
//! stash index) and rewrites the recorded instructions in place — possibly
//! inside the programs of inner functions that closed over the binding.

use crate::compiler::bytecode::{stash_ref, NamesMap, Op, PrgRef};
use crate::compiler::Compiler;
use crate::error::JsError;
use crate::value::{CheapClone, JsString};
use rustc_hash::FxHashMap;

pub(crate) type ScopeId = usize;

/// Handle to a binding: owning scope plus index into its binding list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct BindingRef {
    pub scope: ScopeId,
    pub index: usize,
}

/// A recorded binding access: the scope that was current when the
/// placeholder instruction was emitted, and its absolute pc in that
/// scope's program.
#[derive(Debug, Clone, Copy)]
pub(crate) struct AccessPoint {
    pub scope: ScopeId,
    pub pc: usize,
}

#[derive(Debug)]
pub(crate) struct Binding {
    pub name: JsString,
    pub is_arg: bool,
    /// Consumed by the statement compiler's const-assignment diagnostics.
    #[allow(dead_code)]
    pub is_const: bool,
    pub is_var: bool,
    pub in_stash: bool,
    /// Set when the binding is elided (single-use function self-name).
    pub dead: bool,
    /// Final stash index; valid after the owning scope finalises.
    pub stash_idx: u32,
    pub access_points: Vec<AccessPoint>,
}

impl Binding {
    fn new(name: JsString) -> Self {
        Binding {
            name,
            is_arg: false,
            is_const: false,
            is_var: false,
            in_stash: false,
            dead: false,
            stash_idx: 0,
            access_points: Vec::new(),
        }
    }

    pub fn use_count(&self) -> usize {
        self.access_points.len()
    }
}

#[derive(Debug)]
pub(crate) struct Scope {
    pub outer: Option<ScopeId>,
    /// The program this scope's code is emitted into.
    pub prg: PrgRef,
    pub bindings: Vec<Binding>,
    pub bound_names: FxHashMap<JsString, usize>,

    pub strict: bool,
    /// Set for the scope of a function literal (arrow or not).
    pub function: bool,
    pub arrow: bool,
    /// Set for the variable scope a non-simple parameter list opens.
    pub variable: bool,
    pub eval: bool,
    /// Content may be observed or mutated at runtime (`with`, sloppy
    /// direct eval); names resolve dynamically from here on.
    pub dynamic: bool,
    /// An inner direct eval may look names up through this scope.
    pub dyn_lookup: bool,

    pub this_needed: bool,
    pub args_needed: bool,
    pub args_in_stash: bool,
    pub need_stash: bool,
    pub num_args: usize,
}

impl Scope {
    fn new(outer: Option<ScopeId>, prg: PrgRef, strict: bool) -> Self {
        Scope {
            outer,
            prg,
            bindings: Vec::new(),
            bound_names: FxHashMap::default(),
            strict,
            function: false,
            arrow: false,
            variable: false,
            eval: false,
            dynamic: false,
            dyn_lookup: false,
            this_needed: false,
            args_needed: false,
            args_in_stash: false,
            need_stash: false,
            num_args: 0,
        }
    }

    pub fn is_dynamic(&self) -> bool {
        self.dynamic || self.dyn_lookup
    }
}

/// Where a binding ended up after allocation.
#[derive(Debug, Clone, Copy)]
enum Slot {
    Stash(u32),
    Arg(u32),
    Lex(u32),
    /// Elided binding; must have no live access points.
    None,
}

impl Compiler {
    pub(crate) fn root_scope(prg: PrgRef) -> Scope {
        let mut s = Scope::new(None, prg, false);
        s.dynamic = true;
        s
    }

    pub(crate) fn scope(&self) -> &Scope {
        &self.scopes[self.scope]
    }

    pub(crate) fn scope_mut(&mut self) -> &mut Scope {
        let cur = self.scope;
        &mut self.scopes[cur]
    }

    pub(crate) fn new_scope(&mut self) -> ScopeId {
        let strict = self.scope().strict;
        let id = self.scopes.len();
        self.scopes
            .push(Scope::new(Some(self.scope), self.p.clone(), strict));
        self.scope = id;
        id
    }

    /// A scope for a lexical block inside the same program (the variable
    /// scope of a complex-parameter function body, the script body scope).
    pub(crate) fn new_block_scope(&mut self) -> ScopeId {
        self.new_scope()
    }

    pub(crate) fn pop_scope(&mut self) {
        if let Some(outer) = self.scopes[self.scope].outer {
            self.scope = outer;
        }
    }

    pub(crate) fn binding(&self, b: BindingRef) -> &Binding {
        &self.scopes[b.scope].bindings[b.index]
    }

    pub(crate) fn binding_mut(&mut self, b: BindingRef) -> &mut Binding {
        &mut self.scopes[b.scope].bindings[b.index]
    }

    // ── name binding ────────────────────────────────────────────────────

    fn push_binding(&mut self, scope: ScopeId, name: JsString, map: bool) -> BindingRef {
        let index = self.scopes[scope].bindings.len();
        if map {
            self.scopes[scope]
                .bound_names
                .insert(name.cheap_clone(), index);
        }
        self.scopes[scope].bindings.push(Binding::new(name));
        BindingRef { scope, index }
    }

    /// Create (or find) a `var`-style binding: walks out to the nearest
    /// function or variable scope. Returns `None` at script level, where
    /// no such scope exists above the statement being compiled.
    pub(crate) fn bind_name(&mut self, name: &JsString) -> Option<(BindingRef, bool)> {
        let mut cur = self.scope;
        loop {
            let (outer, is_var_scope, found) = {
                let s = &self.scopes[cur];
                (
                    s.outer,
                    s.function || s.variable,
                    s.bound_names.get(name).copied(),
                )
            };
            if is_var_scope {
                if let Some(index) = found {
                    return Some((BindingRef { scope: cur, index }, false));
                }
                let b = self.push_binding(cur, name.cheap_clone(), true);
                self.binding_mut(b).is_var = true;
                return Some((b, true));
            }
            cur = outer?;
        }
    }

    /// Create a lexical binding in the current scope. With `unique`, an
    /// existing binding of the same name is a syntax error; otherwise it
    /// is returned with `created = false`.
    pub(crate) fn bind_name_lexical(
        &mut self,
        name: &JsString,
        unique: bool,
        offset: i32,
    ) -> Result<(BindingRef, bool), JsError> {
        self.bind_name_lexical_in(self.scope, name, unique, offset)
    }

    pub(crate) fn bind_name_lexical_in(
        &mut self,
        scope: ScopeId,
        name: &JsString,
        unique: bool,
        offset: i32,
    ) -> Result<(BindingRef, bool), JsError> {
        if let Some(&index) = self.scopes[scope].bound_names.get(name) {
            if unique {
                return Err(JsError::syntax_error(
                    format!("Identifier '{}' has already been declared", name),
                    offset,
                ));
            }
            return Ok((BindingRef { scope, index }, false));
        }
        Ok((self.push_binding(scope, name.cheap_clone(), true), true))
    }

    /// Parameter binding: duplicates are permitted and shadow the earlier
    /// binding, which stays allocated (it still occupies its argument
    /// slot) but loses its name.
    pub(crate) fn bind_name_shadow(&mut self, name: &JsString) -> (BindingRef, bool) {
        let scope = self.scope;
        let unique = !self.scopes[scope].bound_names.contains_key(name);
        let b = self.push_binding(scope, name.cheap_clone(), true);
        (b, unique)
    }

    /// An unnamed stack-slot binding (pattern parameters).
    pub(crate) fn add_binding(&mut self) -> BindingRef {
        self.push_binding(self.scope, JsString::default(), false)
    }

    pub(crate) fn delete_binding(&mut self, b: BindingRef) {
        let name = self.binding(b).name.cheap_clone();
        if self.scopes[b.scope].bound_names.get(name.as_str()) == Some(&b.index) {
            self.scopes[b.scope].bound_names.remove(name.as_str());
        }
        let binding = self.binding_mut(b);
        binding.dead = true;
        binding.access_points.clear();
    }

    // ── name resolution ─────────────────────────────────────────────────

    /// Resolve `name` from the current scope outwards.
    ///
    /// The second result is `no_dynamics`: true when no dynamic scope can
    /// intercept the resolution, i.e. the answer is final at compile time.
    /// Crossing a function boundary forces the found binding into the
    /// stash (closure capture); an unshadowed `arguments` inside a
    /// non-arrow function binds implicitly and marks the scope.
    pub(crate) fn lookup_name(&mut self, name: &JsString) -> (Option<BindingRef>, bool) {
        let mut no_dynamics = true;
        let mut to_stash = false;
        let mut cur = self.scope;
        loop {
            let (outer, dynamic, function, arrow, found) = {
                let s = &self.scopes[cur];
                (
                    s.outer,
                    s.dynamic,
                    s.function,
                    s.arrow,
                    s.bound_names.get(name).copied(),
                )
            };
            let outer = match outer {
                Some(outer) => outer,
                // The root scope is backed by the global object; nothing
                // binds there at compile time.
                None => return (None, false),
            };
            if let Some(index) = found {
                let b = BindingRef { scope: cur, index };
                if to_stash && !self.binding(b).in_stash {
                    self.move_to_stash(b);
                }
                return (Some(b), no_dynamics);
            }
            if dynamic {
                no_dynamics = false;
            }
            if name.as_str() == "arguments" && function && !arrow {
                self.scopes[cur].args_needed = true;
                let b = self.push_binding(cur, name.cheap_clone(), true);
                self.binding_mut(b).is_var = true;
                if to_stash {
                    self.move_to_stash(b);
                }
                return (Some(b), no_dynamics);
            }
            if function {
                to_stash = true;
            }
            cur = outer;
        }
    }

    pub(crate) fn move_to_stash(&mut self, b: BindingRef) {
        let binding = self.binding_mut(b);
        if !binding.in_stash {
            binding.in_stash = true;
            self.scopes[b.scope].need_stash = true;
        }
    }

    pub(crate) fn move_args_to_stash(&mut self, scope: ScopeId) {
        for binding in &mut self.scopes[scope].bindings {
            if binding.is_arg {
                binding.in_stash = true;
            }
        }
        let s = &mut self.scopes[scope];
        s.args_in_stash = true;
        s.need_stash = true;
    }

    // ── binding access emission ─────────────────────────────────────────

    pub(crate) fn mark_access_point(&mut self, b: BindingRef) {
        let pc = self.code_len();
        let scope = self.scope;
        self.binding_mut(b).access_points.push(AccessPoint { scope, pc });
    }

    pub(crate) fn mark_access_point_at_scope(&mut self, b: BindingRef, scope: ScopeId, pc: usize) {
        self.binding_mut(b).access_points.push(AccessPoint { scope, pc });
    }

    /// Emit code pushing the binding's value.
    pub(crate) fn b_emit_get(&mut self, b: BindingRef) {
        self.mark_access_point(b);
        self.emit(Op::LoadStack(0));
    }

    /// As `b_emit_get` but leaves the stack balanced.
    pub(crate) fn b_emit_get_p(&mut self, b: BindingRef) {
        self.mark_access_point(b);
        self.emit(Op::LoadStack(0));
        self.emit(Op::Pop);
    }

    /// Rewrite the reserved instruction at `pc` into a get of the binding.
    pub(crate) fn b_emit_get_at(&mut self, b: BindingRef, pc: usize) {
        let scope = self.scope;
        self.mark_access_point_at_scope(b, scope, pc);
        self.patch(pc, Op::LoadStack(0));
    }

    /// Store the top of stack into the binding, keeping the value.
    pub(crate) fn b_emit_set(&mut self, b: BindingRef) {
        self.mark_access_point(b);
        self.emit(Op::StoreStack(0));
    }

    /// Store the top of stack into the binding, popping it.
    pub(crate) fn b_emit_set_p(&mut self, b: BindingRef) {
        self.mark_access_point(b);
        self.emit(Op::StoreStackP(0));
    }

    /// Initialise the binding from the top of stack (pops).
    pub(crate) fn b_emit_init(&mut self, b: BindingRef) {
        self.mark_access_point(b);
        self.emit(Op::InitStash(0));
    }

    /// Push a resolvable reference to the binding (dynamic scopes).
    pub(crate) fn b_emit_resolve_var(&mut self, b: BindingRef, strict: bool) {
        self.move_to_stash(b);
        self.mark_access_point(b);
        let name = self.binding(b).name.cheap_clone();
        self.emit(Op::ResolveMixed {
            name,
            idx: 0,
            strict,
        });
    }

    /// Name-first load through a possibly-dynamic environment, with the
    /// binding as the compile-time fallback. With `for_call`, leaves
    /// `(this, callee)`.
    pub(crate) fn b_emit_get_var(&mut self, b: BindingRef, for_call: bool) {
        self.move_to_stash(b);
        self.mark_access_point(b);
        let name = self.binding(b).name.cheap_clone();
        self.emit(Op::LoadMixed {
            name,
            idx: 0,
            callee: for_call,
        });
    }

    // ── allocation ──────────────────────────────────────────────────────

    /// Assign every binding of `scope` its final slot and rewrite all
    /// recorded access points. Returns `(stash_size, stack_size)`; the
    /// stack size counts local lexical slots above `stack_offset`.
    pub(crate) fn finalise_var_alloc(
        &mut self,
        scope: ScopeId,
        stack_offset: u32,
    ) -> Result<(u32, u32), JsError> {
        if self.scopes[scope].is_dynamic() {
            // Runtime name resolution may observe any of them.
            let any = !self.scopes[scope].bindings.is_empty();
            for binding in &mut self.scopes[scope].bindings {
                if !binding.dead {
                    binding.in_stash = true;
                }
            }
            if any {
                self.scopes[scope].need_stash = true;
            }
        }

        let args_in_stash = self.scopes[scope].args_in_stash;
        let mut stash_size = 0u32;
        let mut stack_size = 0u32;
        let mut arg_pos = 0u32;
        let mut slots = Vec::with_capacity(self.scopes[scope].bindings.len());
        for binding in &mut self.scopes[scope].bindings {
            let is_arg = binding.is_arg;
            let slot = if binding.dead {
                Slot::None
            } else if binding.in_stash {
                binding.stash_idx = stash_size;
                stash_size += 1;
                Slot::Stash(binding.stash_idx)
            } else if is_arg && !args_in_stash {
                Slot::Arg(arg_pos)
            } else {
                let k = stack_offset + stack_size;
                stack_size += 1;
                Slot::Lex(k)
            };
            if is_arg {
                arg_pos += 1;
            }
            slots.push(slot);
        }

        for index in 0..slots.len() {
            let slot = slots[index];
            let points = std::mem::take(
                &mut self.scopes[scope].bindings[index].access_points,
            );
            for ap in &points {
                let level = self.stash_level_between(ap.scope, scope)?;
                let prg = self.scopes[ap.scope].prg.clone();
                let mut prg = prg.borrow_mut();
                let old = prg
                    .code
                    .get(ap.pc)
                    .cloned()
                    .ok_or_else(|| JsError::internal_error("binding access point out of range"))?;
                prg.code[ap.pc] = rewrite_access(&old, slot, level)?;
            }
            self.scopes[scope].bindings[index].access_points = points;
        }

        Ok((stash_size, stack_size))
    }

    /// Number of stashes on the runtime chain between an access scope and
    /// the scope owning the binding (exclusive).
    fn stash_level_between(&self, from: ScopeId, to: ScopeId) -> Result<u32, JsError> {
        let mut level = 0;
        let mut cur = from;
        while cur != to {
            let s = &self.scopes[cur];
            if s.need_stash || s.is_dynamic() {
                level += 1;
            }
            cur = s.outer.ok_or_else(|| {
                JsError::internal_error("access scope is not inside the binding scope")
            })?;
        }
        Ok(level)
    }

    /// Ordered name → stash index map for dynamic scopes; valid after
    /// `finalise_var_alloc`.
    pub(crate) fn make_names_map(&self, scope: ScopeId) -> NamesMap {
        let mut names = NamesMap::default();
        for binding in &self.scopes[scope].bindings {
            if !binding.dead && binding.in_stash && !binding.name.is_empty() {
                names.insert(binding.name.cheap_clone(), binding.stash_idx);
            }
        }
        names
    }
}

/// Rewrite a placeholder access instruction for its final slot.
fn rewrite_access(op: &Op, slot: Slot, level: u32) -> Result<Op, JsError> {
    let err = || JsError::internal_error("unexpected instruction at binding access point");
    Ok(match op {
        Op::LoadStack(_) | Op::LoadStackLex(_) | Op::LoadStash(_) => match slot {
            Slot::Stash(i) => Op::LoadStash(stash_ref(level, i)),
            Slot::Arg(p) => Op::LoadStack(p as i32 + 1),
            Slot::Lex(k) => Op::LoadStackLex(k as i32 + 1),
            Slot::None => return Err(err()),
        },
        Op::StoreStack(_) | Op::StoreStackLex(_) | Op::StoreStash(_) => match slot {
            Slot::Stash(i) => Op::StoreStash(stash_ref(level, i)),
            Slot::Arg(p) => Op::StoreStack(p as i32 + 1),
            Slot::Lex(k) => Op::StoreStackLex(k as i32 + 1),
            Slot::None => return Err(err()),
        },
        Op::StoreStackP(_) | Op::StoreStackLexP(_) | Op::StoreStashP(_) => match slot {
            Slot::Stash(i) => Op::StoreStashP(stash_ref(level, i)),
            Slot::Arg(p) => Op::StoreStackP(p as i32 + 1),
            Slot::Lex(k) => Op::StoreStackLexP(k as i32 + 1),
            Slot::None => return Err(err()),
        },
        Op::InitStash(_) => match slot {
            Slot::Stash(i) => Op::InitStash(stash_ref(level, i)),
            Slot::Arg(p) => Op::StoreStackP(p as i32 + 1),
            Slot::Lex(k) => Op::StoreStackLexP(k as i32 + 1),
            Slot::None => return Err(err()),
        },
        Op::ResolveMixed { name, strict, .. } => match slot {
            Slot::Stash(i) => Op::ResolveMixed {
                name: name.cheap_clone(),
                idx: stash_ref(level, i),
                strict: *strict,
            },
            _ => return Err(err()),
        },
        Op::LoadMixed { name, callee, .. } => match slot {
            Slot::Stash(i) => Op::LoadMixed {
                name: name.cheap_clone(),
                idx: stash_ref(level, i),
                callee: *callee,
            },
            _ => return Err(err()),
        },
        _ => return Err(err()),
    })
}
