//! Declaration hoisting: directive-prologue scan and collection of `var`
//! and function declarations from a statement list. Nested function
//! bodies hoist for themselves.

use crate::ast::{
    AssignOp, DeclKind, Expression, FunctionLiteral, Idx, Property, Statement,
};
use crate::value::{CheapClone, JsString};

/// Offset of a `"use strict"` directive in the prologue, if present.
pub(crate) fn strict_directive(body: &[Statement]) -> Option<Idx> {
    for stmt in body {
        match stmt {
            Statement::Expression(e) => match &e.expression {
                Expression::String(s) => {
                    if s.value == "use strict" {
                        return Some(s.idx);
                    }
                    // Another directive; keep scanning the prologue.
                }
                _ => return None,
            },
            _ => return None,
        }
    }
    None
}

/// Hoisted function declarations of a body, in source order.
pub(crate) fn extract_functions(body: &[Statement]) -> Vec<&FunctionLiteral> {
    body.iter()
        .filter_map(|stmt| match stmt {
            Statement::FunctionDeclaration(d) => Some(&d.function),
            _ => None,
        })
        .collect()
}

/// All names bound by `var` declarations of a body.
pub(crate) fn collect_var_names(body: &[Statement]) -> Vec<(JsString, Idx)> {
    let mut out = Vec::new();
    for stmt in body {
        if let Statement::VariableDeclaration(d) = stmt {
            if d.kind == DeclKind::Var {
                for decl in &d.list {
                    pattern_idents(&decl.target, &mut out);
                }
            }
        }
    }
    out
}

fn pattern_idents(target: &Expression, out: &mut Vec<(JsString, Idx)>) {
    match target {
        Expression::Identifier(id) => out.push((id.name.cheap_clone(), id.idx)),
        Expression::ObjectPattern(p) => {
            for prop in &p.properties {
                match prop {
                    Property::Short(prop) => {
                        out.push((prop.name.name.cheap_clone(), prop.name.idx))
                    }
                    Property::Keyed(prop) => pattern_idents(strip_default(&prop.value), out),
                    Property::Spread(_) => {}
                }
            }
            if let Some(rest) = &p.rest {
                pattern_idents(rest, out);
            }
        }
        Expression::ArrayPattern(p) => {
            for elt in p.elements.iter().flatten() {
                pattern_idents(strip_default(elt), out);
            }
            if let Some(rest) = &p.rest {
                pattern_idents(rest, out);
            }
        }
        Expression::Assign(e) if e.operator == AssignOp::Assign => pattern_idents(&e.left, out),
        _ => {}
    }
}

fn strip_default(e: &Expression) -> &Expression {
    match e {
        Expression::Assign(a) if a.operator == AssignOp::Assign => &a.left,
        e => e,
    }
}
