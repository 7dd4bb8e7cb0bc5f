//! Instruction set and program format.
//!
//! The VM is stack-based. Instructions append to a growing `Vec<Op>`; jump
//! operands are relative instruction offsets. Binding-access instructions
//! are emitted as placeholders and rewritten in place once the owning scope
//! finalises its variable allocation.
//!
//! Stack frame conventions: `LoadStack(0)` is `this`, `LoadStack(n)` with
//! n ≥ 1 is argument n−1. `LoadStackLex(n)` with n ≥ 1 is local lexical
//! slot n−1; negative n reads argument −n−1 before the stash copy has run
//! (the forward-reference parameter path). Stash references pack
//! `level << 24 | idx`, where `level` counts intervening stashes on the
//! runtime chain.

use std::cell::RefCell;
use std::hash::BuildHasherDefault;
use std::rc::Rc;

use rustc_hash::{FxHashMap, FxHasher};

use crate::value::{CheapClone, JsString, JsValue};

/// A packed stash reference: `level << 24 | idx`.
pub type StashRef = u32;

pub const fn stash_ref(level: u32, idx: u32) -> StashRef {
    (level << 24) | idx
}

pub const fn stash_level(r: StashRef) -> u32 {
    r >> 24
}

pub const fn stash_idx(r: StashRef) -> u32 {
    r & 0x00ff_ffff
}

/// Insertion-ordered name → stash index map attached to the enter
/// instructions of dynamic scopes.
pub type NamesMap = indexmap::IndexMap<JsString, u32, BuildHasherDefault<FxHasher>>;

/// A program under construction is shared: an outer function's variable
/// allocation patches binding accesses inside already-emitted inner
/// programs. After the top-level compile entry point returns no further
/// mutation occurs.
pub type PrgRef = Rc<RefCell<Program>>;

/// Payload of the function-constructor instructions.
#[derive(Debug)]
pub struct NewFuncData {
    pub prg: PrgRef,
    pub length: u32,
    pub name: JsString,
    pub source: String,
    pub strict: bool,
}

/// A single VM instruction.
#[derive(Debug, Clone)]
pub enum Op {
    // ── literals & loads ────────────────────────────────────────────────
    /// Push literal pool entry.
    LoadVal(u32),
    LoadUndef,
    /// Push the array-elision hole marker.
    LoadNil,
    LoadGlobalObject,
    LoadStack(i32),
    LoadStackLex(i32),
    LoadStash(StashRef),
    LoadCallee,
    LoadNewTarget,
    /// Runtime name lookup; throws ReferenceError when absent.
    LoadDynamic(JsString),
    /// Runtime name lookup that pushes a reference instead of throwing
    /// (`typeof` on a free name).
    LoadDynamicRef(JsString),
    /// Runtime name lookup leaving `(this, callee)` for a call.
    LoadDynamicCallee(JsString),
    /// Lookup by name with a compile-time fallback slot, for scopes whose
    /// name set may change at runtime.
    LoadMixed {
        name: JsString,
        idx: StashRef,
        callee: bool,
    },
    ResolveMixed {
        name: JsString,
        idx: StashRef,
        strict: bool,
    },
    ResolveVar1(JsString),
    ResolveVar1Strict(JsString),

    // ── binding stores ──────────────────────────────────────────────────
    StoreStack(i32),
    StoreStackP(i32),
    StoreStackLex(i32),
    StoreStackLexP(i32),
    StoreStash(StashRef),
    StoreStashP(StashRef),
    InitStash(StashRef),

    // ── properties & references ─────────────────────────────────────────
    GetProp(JsString),
    GetPropRef(JsString),
    GetPropRefStrict(JsString),
    GetPropCallee(JsString),
    GetElem,
    GetElemRef,
    GetElemRefStrict,
    GetElemCallee,
    /// Read a property by the key below the destructuring source.
    GetKey,
    GetValue,
    PutValue,
    PutValueP,
    SetGlobal(JsString),
    SetGlobalStrict(JsString),
    SetProp(JsString),
    SetPropStrict(JsString),
    SetPropP(JsString),
    SetPropStrictP(JsString),
    /// Object-literal fast path: define own property on the object below.
    SetProp1(JsString),
    SetElem,
    SetElemStrict,
    SetElemP,
    SetElemStrictP,
    SetElem1,
    /// As `SetElem1`, also naming an anonymous function value.
    SetElem1Named,
    SetPropGetter(JsString),
    SetPropGetter1,
    SetPropSetter(JsString),
    SetPropSetter1,
    SetProto,
    DeleteProp(JsString),
    DeletePropStrict(JsString),
    DeleteElem,
    DeleteElemStrict,
    DeleteVar(JsString),
    DeleteGlobal(JsString),

    // ── operators ───────────────────────────────────────────────────────
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Or,
    And,
    Xor,
    Sal,
    Sar,
    Shr,
    Lt,
    Gt,
    Lte,
    Gte,
    Eq,
    Neq,
    StrictEq,
    StrictNeq,
    In,
    InstanceOf,
    Not,
    BNot,
    Neg,
    Plus,
    Inc,
    Dec,
    TypeOf,
    ToNumber,
    ToString,
    ToPropertyKey,

    // ── objects, arrays, iteration ──────────────────────────────────────
    NewObject,
    /// Operand is the element count, or 0 when the literal contains a
    /// spread (elements arrive via the push instructions either way).
    NewArray(u32),
    PushArrayItem,
    PushArraySpread,
    CopySpread,
    CopyRest,
    CheckObjectCoercible,
    CreateDestructSrc,
    Iterate,
    IterGetNextOrUndef,
    EnumPopClose,
    NewArrayFromIter,
    EnumGet,
    NewRegexp {
        pattern: JsString,
        flags: JsString,
    },
    ConcatStrings(u32),
    GetTaggedTmplObject {
        raw: Rc<[JsValue]>,
        cooked: Rc<[JsValue]>,
    },

    // ── calls ───────────────────────────────────────────────────────────
    Call(u32),
    CallVariadic,
    CallEval(u32),
    CallEvalStrict(u32),
    CallEvalVariadic,
    CallEvalVariadicStrict,
    StartVariadic,
    EndVariadic,
    PushSpread,
    New(u32),
    NewVariadic,
    NewFunc(Rc<NewFuncData>),
    NewMethod(Rc<NewFuncData>),
    NewArrowFunc(Rc<NewFuncData>),

    // ── function frames ─────────────────────────────────────────────────
    EnterFunc {
        num_args: u32,
        args_to_stash: bool,
        stash_size: u32,
        stack_size: u32,
        extensible: bool,
        names: Option<Rc<NamesMap>>,
    },
    /// Enter for the forward-reference parameter layout: only the first
    /// `args_to_copy` arguments are copied to the stack before parameter
    /// initialisation runs.
    EnterFunc1 {
        stash_size: u32,
        num_args: u32,
        args_to_copy: u32,
        extensible: bool,
        names: Option<Rc<NamesMap>>,
    },
    EnterFuncStashless {
        stack_size: u32,
        args: u32,
    },
    /// Enter the variable scope of a function body with a non-simple
    /// parameter list (also used as the script prologue).
    EnterFuncBody {
        stash_size: u32,
        stack_size: u32,
        adjust_stack: bool,
        extensible: bool,
        names: Option<Rc<NamesMap>>,
    },
    BoxThis,
    CreateArgsMapped(u32),
    CreateArgsUnmapped(u32),
    CreateArgsRestStack(u32),
    CreateArgsRestStash,

    // ── stack & control flow ────────────────────────────────────────────
    Dup,
    /// Push a copy of the value `n` slots below the top.
    DupN(u32),
    /// Copy the top of stack into the slot `n` below it.
    RDupN(u32),
    Pop,
    Jump(i32),
    /// Jump when the popped test is falsy.
    Jne(i32),
    /// Jump keeping the top of stack when it is truthy, pop otherwise.
    Jeq1(i32),
    /// Jump keeping the top of stack when it is falsy, pop otherwise.
    Jneq1(i32),
    /// Jump when the top of stack is not `undefined`; pops it otherwise.
    Jdef(i32),
    /// As `Jdef`, also popping on the jumping path.
    JdefP(i32),
    /// Placeholder; replaced before the program is finished.
    Nop,
    Halt,
    Ret,
    Throw,
}

/// An entry of the source map: instruction index → source byte offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SrcMapItem {
    pub pc: usize,
    pub src_pos: usize,
}

/// A compiled program: the instruction stream of one callable.
#[derive(Debug)]
pub struct Program {
    pub code: Vec<Op>,
    pub literals: Vec<JsValue>,
    pub src_map: Vec<SrcMapItem>,
    pub func_name: JsString,
    pub src: Rc<str>,

    lit_index: FxHashMap<LitKey, u32>,
}

/// Interning key for literal pool entries. Numbers key on their bit
/// pattern so `0.0` and `-0.0` intern separately.
#[derive(Debug, PartialEq, Eq, Hash)]
enum LitKey {
    Undefined,
    Null,
    Bool(bool),
    Num(u64),
    Str(JsString),
    BigInt(String),
}

impl Program {
    pub fn new(src: Rc<str>) -> Self {
        Program {
            code: Vec::new(),
            literals: Vec::new(),
            src_map: Vec::new(),
            func_name: JsString::default(),
            src,
            lit_index: FxHashMap::default(),
        }
    }

    /// Intern a literal value, returning its pool index.
    pub fn define_literal_value(&mut self, v: &JsValue) -> u32 {
        let key = match v {
            JsValue::Undefined => LitKey::Undefined,
            JsValue::Null => LitKey::Null,
            JsValue::Boolean(b) => LitKey::Bool(*b),
            JsValue::Number(n) => LitKey::Num(n.to_bits()),
            JsValue::String(s) => LitKey::Str(s.cheap_clone()),
            JsValue::BigInt(b) => LitKey::BigInt(b.to_string()),
        };
        if let Some(&idx) = self.lit_index.get(&key) {
            return idx;
        }
        let idx = self.literals.len() as u32;
        self.literals.push(v.clone());
        self.lit_index.insert(key, idx);
        idx
    }

    pub fn get(&self, pc: usize) -> Option<&Op> {
        self.code.get(pc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_pool_interns() {
        let mut p = Program::new("".into());
        let a = p.define_literal_value(&JsValue::Number(1.0));
        let b = p.define_literal_value(&JsValue::from("x"));
        let c = p.define_literal_value(&JsValue::Number(1.0));
        assert_eq!(a, c);
        assert_ne!(a, b);
        assert_eq!(p.literals.len(), 2);
    }

    #[test]
    fn negative_zero_interns_separately() {
        let mut p = Program::new("".into());
        let a = p.define_literal_value(&JsValue::Number(0.0));
        let b = p.define_literal_value(&JsValue::Number(-0.0));
        assert_ne!(a, b);
    }

    #[test]
    fn stash_ref_packing() {
        let r = stash_ref(3, 17);
        assert_eq!(stash_level(r), 3);
        assert_eq!(stash_idx(r), 17);
    }
}
