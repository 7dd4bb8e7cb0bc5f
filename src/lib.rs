//! Expression compiler for ECMAScript.
//!
//! Lowers a parsed AST of expressions into a linear stream of stack-based
//! VM instructions, resolving identifier bindings, enforcing strict-mode
//! rules, handling destructuring patterns and folding constant sub-trees
//! at compile time. Lexing/parsing and the executing VM are external:
//! the [`ast`] module is the input interface and [`Program`] the output.
//!
//! # Example
//!
//! ```
//! use jscomp::ast::{Expression, ExpressionStatement, NumberLiteral, NumberValue, Script, Statement};
//! use jscomp::{compile_script, Op};
//!
//! let script = Script {
//!     body: vec![Statement::Expression(ExpressionStatement {
//!         expression: Expression::Number(NumberLiteral {
//!             idx: 1,
//!             literal: "42".to_string(),
//!             value: NumberValue::Int(42),
//!         }),
//!     })],
//! };
//! let prg = compile_script(&script, false).unwrap();
//! assert!(matches!(prg.borrow().code.last(), Some(Op::Halt)));
//! ```

pub mod ast;
pub mod compiler;
pub mod error;
pub mod value;

pub use compiler::{
    compile_script, Compiler, NamesMap, NewFuncData, Op, PrgRef, Program, SrcMapItem,
};
pub use error::JsError;
pub use value::{CheapClone, JsString, JsValue, NativeError, NativeErrorKind};
