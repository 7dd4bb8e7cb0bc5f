//! Tests for expression lowering.
//!
//! These tests hand-build AST nodes (the parser is an external
//! collaborator) and assert on the emitted instruction stream.

use jscomp::ast::*;
use jscomp::{compile_script, JsError, JsValue, Op, PrgRef};

// ── builders ────────────────────────────────────────────────────────────────

fn id(name: &str) -> Identifier {
    Identifier {
        idx: 1,
        name: name.into(),
    }
}

fn ident(name: &str) -> Expression {
    Expression::Identifier(id(name))
}

fn num(v: i64) -> Expression {
    Expression::Number(NumberLiteral {
        idx: 1,
        literal: v.to_string(),
        value: NumberValue::Int(v),
    })
}

fn str_lit(s: &str) -> Expression {
    Expression::String(StringLiteral {
        idx: 1,
        value: s.into(),
    })
}

fn bin(op: BinaryOp, left: Expression, right: Expression) -> Expression {
    Expression::Binary(BinaryExpression {
        idx: 1,
        operator: op,
        left: Box::new(left),
        right: Box::new(right),
    })
}

fn un(op: UnaryOp, operand: Expression) -> Expression {
    Expression::Unary(UnaryExpression {
        idx: 1,
        operator: op,
        postfix: false,
        operand: Box::new(operand),
    })
}

fn assign(op: AssignOp, left: Expression, right: Expression) -> Expression {
    Expression::Assign(AssignExpression {
        idx: 1,
        operator: op,
        left: Box::new(left),
        right: Box::new(right),
    })
}

fn dot(left: Expression, name: &str) -> Expression {
    Expression::Dot(DotExpression {
        idx: 1,
        left: Box::new(left),
        identifier: id(name),
    })
}

fn call(callee: Expression, args: Vec<Expression>) -> Expression {
    Expression::Call(CallExpression {
        idx: 1,
        callee: Box::new(callee),
        arguments: args,
    })
}

fn stmt(e: Expression) -> Statement {
    Statement::Expression(ExpressionStatement { expression: e })
}

fn script(body: Vec<Statement>) -> Script {
    Script { body }
}

fn compile(body: Vec<Statement>) -> PrgRef {
    compile_script(&script(body), false).expect("compile failed")
}

fn compile_strict(body: Vec<Statement>) -> PrgRef {
    compile_script(&script(body), true).expect("compile failed")
}

fn compile_err(body: Vec<Statement>, strict: bool) -> JsError {
    compile_script(&script(body), strict).expect_err("expected compile error")
}

fn code(prg: &PrgRef) -> Vec<Op> {
    prg.borrow().code.clone()
}

fn contains_op<F: Fn(&Op) -> bool>(prg: &PrgRef, predicate: F) -> bool {
    prg.borrow().code.iter().any(predicate)
}

fn pool_contains(prg: &PrgRef, v: &JsValue) -> bool {
    prg.borrow().literals.iter().any(|l| l == v)
}

// ── literals & basics ───────────────────────────────────────────────────────

#[test]
fn number_literal_interns_and_halts() {
    let prg = compile(vec![stmt(num(42))]);
    assert!(pool_contains(&prg, &JsValue::Number(42.0)));
    assert!(
        matches!(prg.borrow().code.last(), Some(Op::Halt)),
        "expected Halt at end, got {:?}",
        prg.borrow().code.last()
    );
}

#[test]
fn script_prologue_is_enter_func_body() {
    let prg = compile(vec![stmt(num(1))]);
    assert!(
        matches!(prg.borrow().code.first(), Some(Op::EnterFuncBody { .. })),
        "got {:?}",
        code(&prg)
    );
}

#[test]
fn completion_value_is_kept_only_for_the_last_statement() {
    let prg = compile(vec![stmt(ident("a")), stmt(ident("b"))]);
    let ops = code(&prg);
    // `a` is dropped, `b` feeds Halt.
    assert!(matches!(
        &ops[..],
        [
            Op::EnterFuncBody { .. },
            Op::LoadDynamic(a),
            Op::Pop,
            Op::LoadDynamic(b),
            Op::Halt
        ] if a == "a" && b == "b"
    ));
}

#[test]
fn strict_octal_literal_is_rejected() {
    let body = vec![stmt(Expression::Number(NumberLiteral {
        idx: 1,
        literal: "0644".to_string(),
        value: NumberValue::Int(420),
    }))];
    let err = compile_err(body, true);
    assert!(err.message().contains("Octal literals"));
}

// ── identifiers ─────────────────────────────────────────────────────────────

#[test]
fn free_name_loads_dynamically() {
    let prg = compile(vec![stmt(ident("x"))]);
    assert!(contains_op(&prg, |op| matches!(op, Op::LoadDynamic(n) if n == "x")));
}

#[test]
fn global_assignment_compiles_in_strict_mode() {
    // `x = 1` at script scope resolves through a reference.
    let prg = compile_script(
        &script(vec![stmt(assign(AssignOp::Assign, ident("x"), num(1)))]),
        true,
    )
    .expect("strict global assignment must compile");
    assert!(contains_op(&prg, |op| matches!(op, Op::ResolveVar1Strict(n) if n == "x")));
    assert!(contains_op(&prg, |op| matches!(op, Op::PutValue)));
}

#[test]
fn sloppy_assignment_uses_unstrict_resolver() {
    let prg = compile(vec![stmt(assign(AssignOp::Assign, ident("x"), num(1)))]);
    assert!(contains_op(&prg, |op| matches!(op, Op::ResolveVar1(n) if n == "x")));
}

#[test]
fn strict_assignment_to_eval_is_rejected() {
    let err = compile_err(
        vec![stmt(assign(AssignOp::Assign, ident("eval"), num(1)))],
        true,
    );
    assert!(err.message().contains("eval"));
}

#[test]
fn strict_reserved_word_is_rejected() {
    let err = compile_err(vec![stmt(ident("interface"))], true);
    assert!(err.message().contains("reserved word"));
}

#[test]
fn lexical_binding_resolves_statically() {
    let prg = compile(vec![
        Statement::VariableDeclaration(VariableDeclaration {
            idx: 1,
            kind: DeclKind::Let,
            list: vec![VariableDeclarator {
                idx: 1,
                target: ident("x"),
                initializer: Some(num(42)),
            }],
        }),
        stmt(ident("x")),
    ]);
    // Initialisation goes to a local slot, the read comes back from it.
    assert!(contains_op(&prg, |op| matches!(op, Op::StoreStackLexP(1))));
    assert!(contains_op(&prg, |op| matches!(op, Op::LoadStackLex(1))));
    assert!(!contains_op(&prg, |op| matches!(op, Op::LoadDynamic(_))));
    assert!(
        matches!(prg.borrow().code.first(), Some(Op::EnterFuncBody { stack_size: 1, .. })),
        "got {:?}",
        code(&prg)
    );
}

// ── operators ───────────────────────────────────────────────────────────────

#[test]
fn binary_operators_emit_their_instruction() {
    let cases = [
        (BinaryOp::Sub, "Sub"),
        (BinaryOp::Mul, "Mul"),
        (BinaryOp::Div, "Div"),
        (BinaryOp::Mod, "Mod"),
        (BinaryOp::Eq, "Eq"),
        (BinaryOp::StrictEq, "StrictEq"),
        (BinaryOp::Lt, "Lt"),
        (BinaryOp::GtEq, "Gte"),
        (BinaryOp::And, "And"),
        (BinaryOp::Xor, "Xor"),
        (BinaryOp::Sal, "Sal"),
        (BinaryOp::Shr, "Shr"),
        (BinaryOp::In, "In"),
        (BinaryOp::InstanceOf, "InstanceOf"),
    ];
    for (op, name) in cases {
        let prg = compile(vec![stmt(bin(op, ident("a"), ident("b")))]);
        let found = prg
            .borrow()
            .code
            .iter()
            .any(|op| format!("{:?}", op) == name);
        assert!(found, "expected {} in {:?}", name, code(&prg));
    }
}

#[test]
fn logical_or_short_circuits_keeping_the_left_value() {
    let prg = compile(vec![stmt(bin(BinaryOp::LogicalOr, ident("a"), ident("b")))]);
    let ops = code(&prg);
    let jeq = ops
        .iter()
        .position(|op| matches!(op, Op::Jeq1(_)))
        .expect("expected Jeq1");
    assert!(matches!(ops[jeq + 1], Op::Pop));
}

#[test]
fn logical_and_uses_jneq1() {
    let prg = compile(vec![stmt(bin(
        BinaryOp::LogicalAnd,
        ident("a"),
        ident("b"),
    ))]);
    assert!(contains_op(&prg, |op| matches!(op, Op::Jneq1(_))));
}

#[test]
fn conditional_emits_branch_and_join() {
    let prg = compile(vec![stmt(Expression::Conditional(ConditionalExpression {
        idx: 1,
        test: Box::new(ident("a")),
        consequent: Box::new(ident("b")),
        alternate: Box::new(ident("c")),
    }))]);
    assert!(contains_op(&prg, |op| matches!(op, Op::Jne(_))));
    assert!(contains_op(&prg, |op| matches!(op, Op::Jump(_))));
}

#[test]
fn sequence_drops_all_but_the_last_value() {
    let prg = compile(vec![stmt(Expression::Sequence(SequenceExpression {
        idx: 1,
        sequence: vec![ident("a"), ident("b")],
    }))]);
    let ops = code(&prg);
    assert!(matches!(
        &ops[1..4],
        [Op::LoadDynamic(_), Op::Pop, Op::LoadDynamic(_)]
    ));
}

#[test]
fn typeof_free_name_uses_the_ref_load() {
    let prg = compile(vec![stmt(un(UnaryOp::TypeOf, ident("undeclaredX")))]);
    assert!(contains_op(
        &prg,
        |op| matches!(op, Op::LoadDynamicRef(n) if n == "undeclaredX")
    ));
    assert!(contains_op(&prg, |op| matches!(op, Op::TypeOf)));
}

#[test]
fn void_discards_and_pushes_undefined() {
    let prg = compile(vec![stmt(un(UnaryOp::Void, ident("a")))]);
    let ops = code(&prg);
    let load = ops
        .iter()
        .position(|op| matches!(op, Op::LoadDynamic(_)))
        .expect("operand load");
    assert!(matches!(ops[load + 1], Op::Pop));
    assert!(matches!(ops[load + 2], Op::LoadUndef));
}

#[test]
fn prefix_increment_fuses_read_modify_write() {
    let prg = compile(vec![stmt(un(UnaryOp::Inc, ident("x")))]);
    assert!(contains_op(&prg, |op| matches!(op, Op::ToNumber)));
    assert!(contains_op(&prg, |op| matches!(op, Op::Inc)));
    assert!(contains_op(&prg, |op| matches!(op, Op::RDupN(1))));
}

#[test]
fn compound_member_assignment_duplicates_the_base() {
    let prg = compile(vec![stmt(assign(
        AssignOp::Add,
        dot(ident("o"), "p"),
        num(1),
    ))]);
    assert!(contains_op(&prg, |op| matches!(op, Op::Dup)));
    assert!(contains_op(&prg, |op| matches!(op, Op::GetProp(n) if n == "p")));
    assert!(contains_op(&prg, |op| matches!(op, Op::Add)));
    assert!(contains_op(&prg, |op| matches!(op, Op::SetProp(n) if n == "p")));
}

#[test]
fn invalid_assignment_target_is_a_syntax_error() {
    let err = compile_err(vec![stmt(assign(AssignOp::Assign, num(1), num(2)))], false);
    assert_eq!(err.message(), "Not a valid left-value expression");
}

// ── delete ──────────────────────────────────────────────────────────────────

#[test]
fn delete_free_name_in_sloppy_mode() {
    let prg = compile(vec![stmt(un(UnaryOp::Delete, ident("x")))]);
    assert!(contains_op(&prg, |op| matches!(op, Op::DeleteVar(n) if n == "x")));
}

#[test]
fn delete_unqualified_identifier_is_rejected_in_strict_mode() {
    let err = compile_err(vec![stmt(un(UnaryOp::Delete, ident("y")))], true);
    assert!(err
        .message()
        .contains("Delete of an unqualified identifier in strict mode"));
}

#[test]
fn delete_local_binding_folds_to_false() {
    let prg = compile(vec![
        Statement::VariableDeclaration(VariableDeclaration {
            idx: 1,
            kind: DeclKind::Let,
            list: vec![VariableDeclarator {
                idx: 1,
                target: ident("x"),
                initializer: Some(num(1)),
            }],
        }),
        stmt(un(UnaryOp::Delete, ident("x"))),
    ]);
    assert!(pool_contains(&prg, &JsValue::Boolean(false)));
    assert!(!contains_op(&prg, |op| matches!(op, Op::DeleteVar(_))));
}

#[test]
fn delete_property_emits_strictness_variant() {
    let sloppy = compile(vec![stmt(un(UnaryOp::Delete, dot(ident("o"), "p")))]);
    assert!(contains_op(&sloppy, |op| matches!(op, Op::DeleteProp(n) if n == "p")));

    let strict = compile_strict(vec![stmt(un(UnaryOp::Delete, dot(ident("o"), "p")))]);
    assert!(contains_op(
        &strict,
        |op| matches!(op, Op::DeletePropStrict(n) if n == "p")
    ));
}

#[test]
fn delete_non_reference_evaluates_and_pushes_true() {
    let prg = compile(vec![stmt(un(
        UnaryOp::Delete,
        call(ident("f"), vec![]),
    ))]);
    assert!(contains_op(&prg, |op| matches!(op, Op::Call(0))));
    assert!(pool_contains(&prg, &JsValue::Boolean(true)));
}

// ── calls ───────────────────────────────────────────────────────────────────

#[test]
fn identifier_call_leaves_this_and_callee() {
    let prg = compile(vec![stmt(call(ident("f"), vec![num(1), num(2)]))]);
    assert!(contains_op(&prg, |op| matches!(op, Op::LoadDynamicCallee(n) if n == "f")));
    assert!(contains_op(&prg, |op| matches!(op, Op::Call(2))));
}

#[test]
fn method_call_duplicates_the_receiver() {
    let prg = compile(vec![stmt(call(dot(ident("o"), "m"), vec![]))]);
    let ops = code(&prg);
    let dup = ops.iter().position(|op| matches!(op, Op::Dup)).expect("dup");
    assert!(matches!(&ops[dup + 1], Op::GetPropCallee(n) if n == "m"));
}

#[test]
fn other_callees_get_undefined_this() {
    let prg = compile(vec![stmt(call(
        Expression::Sequence(SequenceExpression {
            idx: 1,
            sequence: vec![ident("f")],
        }),
        vec![],
    ))]);
    let ops = code(&prg);
    let undef = ops
        .iter()
        .position(|op| matches!(op, Op::LoadUndef))
        .expect("undef this");
    assert!(matches!(ops[undef + 1], Op::LoadDynamic(_)));
}

#[test]
fn spread_argument_makes_the_call_variadic() {
    let prg = compile(vec![stmt(call(
        ident("f"),
        vec![Expression::Spread(SpreadElement {
            idx: 1,
            expression: Box::new(ident("xs")),
        })],
    ))]);
    let ops = code(&prg);
    let start = ops
        .iter()
        .position(|op| matches!(op, Op::StartVariadic))
        .expect("StartVariadic");
    assert!(contains_op(&prg, |op| matches!(op, Op::PushSpread)));
    let end = ops
        .iter()
        .position(|op| matches!(op, Op::EndVariadic))
        .expect("EndVariadic");
    assert!(start < end);
    assert!(contains_op(&prg, |op| matches!(op, Op::CallVariadic)));
}

#[test]
fn direct_eval_uses_the_eval_call_instruction() {
    let sloppy = compile(vec![stmt(call(ident("eval"), vec![ident("src")]))]);
    assert!(contains_op(&sloppy, |op| matches!(op, Op::CallEval(1))));

    let strict = compile_strict(vec![stmt(call(ident("eval"), vec![ident("src")]))]);
    assert!(contains_op(&strict, |op| matches!(op, Op::CallEvalStrict(1))));
}

#[test]
fn computed_eval_is_an_ordinary_call() {
    // eval detection is compile-time only: obj["eval"]() stays a Call.
    let prg = compile(vec![stmt(call(
        Expression::Bracket(BracketExpression {
            idx: 1,
            left: Box::new(ident("o")),
            member: Box::new(str_lit("eval")),
        }),
        vec![],
    ))]);
    assert!(contains_op(&prg, |op| matches!(op, Op::Call(0))));
    assert!(!contains_op(&prg, |op| matches!(op, Op::CallEval(_))));
}

#[test]
fn new_expression_emits_new() {
    let prg = compile(vec![stmt(Expression::New(NewExpression {
        idx: 1,
        callee: Box::new(ident("F")),
        arguments: vec![num(1)],
    }))]);
    assert!(contains_op(&prg, |op| matches!(op, Op::New(1))));
}

// ── object & array literals ─────────────────────────────────────────────────

fn keyed(key: Expression, value: Expression, kind: PropertyKind, computed: bool) -> Property {
    Property::Keyed(PropertyKeyed {
        idx: 1,
        key: Box::new(key),
        value: Box::new(value),
        kind,
        computed,
    })
}

fn object(props: Vec<Property>) -> Expression {
    Expression::Object(ObjectLiteral {
        idx: 1,
        properties: props,
    })
}

#[test]
fn object_literal_uses_the_keyed_fast_path() {
    let prg = compile(vec![stmt(object(vec![keyed(
        str_lit("a"),
        num(1),
        PropertyKind::Value,
        false,
    )]))]);
    assert!(contains_op(&prg, |op| matches!(op, Op::NewObject)));
    assert!(contains_op(&prg, |op| matches!(op, Op::SetProp1(n) if n == "a")));
}

#[test]
fn computed_keys_go_through_to_property_key() {
    let prg = compile(vec![stmt(object(vec![keyed(
        ident("k"),
        num(1),
        PropertyKind::Value,
        true,
    )]))]);
    assert!(contains_op(&prg, |op| matches!(op, Op::ToPropertyKey)));
    assert!(contains_op(&prg, |op| matches!(op, Op::SetElem1)));
}

#[test]
fn getters_and_setters_use_accessor_instructions() {
    let getter = Expression::Function(FunctionLiteral {
        idx: 1,
        name: None,
        parameter_list: ParameterList::default(),
        body: vec![],
        source: String::new(),
    });
    let prg = compile(vec![stmt(object(vec![keyed(
        str_lit("a"),
        getter,
        PropertyKind::Get,
        false,
    )]))]);
    assert!(contains_op(&prg, |op| matches!(op, Op::SetPropGetter(n) if n == "a")));
    // Accessors are methods.
    assert!(contains_op(&prg, |op| matches!(op, Op::NewMethod(_))));
}

#[test]
fn duplicate_proto_is_rejected() {
    let err = compile_err(
        vec![stmt(object(vec![
            keyed(str_lit("__proto__"), ident("a"), PropertyKind::Value, false),
            keyed(str_lit("__proto__"), ident("b"), PropertyKind::Value, false),
        ]))],
        false,
    );
    assert!(err.message().contains("__proto__"));
}

#[test]
fn computed_proto_does_not_count_as_proto() {
    // ({["__proto__"]: a, __proto__: b}) is fine: the first key is computed.
    let prg = compile(vec![stmt(object(vec![
        keyed(str_lit("__proto__"), ident("a"), PropertyKind::Value, true),
        keyed(str_lit("__proto__"), ident("b"), PropertyKind::Value, false),
    ]))]);
    assert!(contains_op(&prg, |op| matches!(op, Op::SetProto)));
    assert!(contains_op(&prg, |op| matches!(op, Op::SetProp1(n) if n == "__proto__")));
}

#[test]
fn shorthand_initializer_outside_pattern_is_rejected() {
    let err = compile_err(
        vec![stmt(object(vec![Property::Short(PropertyShort {
            idx: 1,
            name: id("x"),
            initializer: Some(num(1)),
        })]))],
        false,
    );
    assert_eq!(err.message(), "Invalid shorthand property initializer");
}

#[test]
fn object_spread_copies_properties() {
    let prg = compile(vec![stmt(object(vec![Property::Spread(SpreadElement {
        idx: 1,
        expression: Box::new(ident("src")),
    })]))]);
    assert!(contains_op(&prg, |op| matches!(op, Op::CopySpread)));
}

#[test]
fn array_literal_counts_non_spread_elements() {
    let prg = compile(vec![stmt(Expression::Array(ArrayLiteral {
        idx: 1,
        elements: vec![Some(num(1)), None, Some(num(2))],
    }))]);
    assert!(contains_op(&prg, |op| matches!(op, Op::NewArray(3))));
    assert!(contains_op(&prg, |op| matches!(op, Op::LoadNil)));
}

#[test]
fn array_spread_resets_the_count() {
    let prg = compile(vec![stmt(Expression::Array(ArrayLiteral {
        idx: 1,
        elements: vec![
            Some(num(1)),
            Some(Expression::Spread(SpreadElement {
                idx: 1,
                expression: Box::new(ident("xs")),
            })),
        ],
    }))]);
    assert!(contains_op(&prg, |op| matches!(op, Op::NewArray(0))));
    assert!(contains_op(&prg, |op| matches!(op, Op::PushArraySpread)));
}

// ── templates & regexp ──────────────────────────────────────────────────────

fn tmpl_element(raw: &str) -> TemplateElement {
    TemplateElement {
        idx: 1,
        literal: raw.into(),
        parsed: raw.into(),
        valid: true,
    }
}

#[test]
fn untagged_template_concatenates_coerced_parts() {
    let prg = compile(vec![stmt(Expression::Template(TemplateLiteral {
        idx: 1,
        tag: None,
        elements: vec![tmpl_element("a"), tmpl_element("c")],
        expressions: vec![ident("b")],
    }))]);
    assert!(contains_op(&prg, |op| matches!(op, Op::ToString)));
    assert!(contains_op(&prg, |op| matches!(op, Op::ConcatStrings(3))));
}

#[test]
fn single_part_template_is_a_plain_string() {
    let prg = compile(vec![stmt(Expression::Template(TemplateLiteral {
        idx: 1,
        tag: None,
        elements: vec![tmpl_element("hello")],
        expressions: vec![],
    }))]);
    assert!(pool_contains(&prg, &JsValue::from("hello")));
    assert!(!contains_op(&prg, |op| matches!(op, Op::ConcatStrings(_))));
}

#[test]
fn tagged_template_calls_with_the_template_object() {
    let prg = compile(vec![stmt(Expression::Template(TemplateLiteral {
        idx: 1,
        tag: Some(Box::new(ident("tag"))),
        elements: vec![tmpl_element("x"), tmpl_element("")],
        expressions: vec![ident("y")],
    }))]);
    assert!(contains_op(&prg, |op| matches!(op, Op::LoadDynamicCallee(n) if n == "tag")));
    assert!(contains_op(
        &prg,
        |op| matches!(op, Op::GetTaggedTmplObject { raw, cooked } if raw.len() == 2 && cooked.len() == 2)
    ));
    assert!(contains_op(&prg, |op| matches!(op, Op::Call(2))));
}

#[test]
fn invalid_cooked_value_becomes_undefined() {
    let prg = compile(vec![stmt(Expression::Template(TemplateLiteral {
        idx: 1,
        tag: Some(Box::new(ident("tag"))),
        elements: vec![TemplateElement {
            idx: 1,
            literal: "\\u{bad}".into(),
            parsed: "".into(),
            valid: false,
        }],
        expressions: vec![],
    }))]);
    assert!(contains_op(
        &prg,
        |op| matches!(op, Op::GetTaggedTmplObject { cooked, .. } if cooked[0] == JsValue::Undefined)
    ));
}

#[test]
fn regexp_literal_compiles_once() {
    let prg = compile(vec![stmt(Expression::RegExp(RegExpLiteral {
        idx: 1,
        pattern: "ab(c)".to_string(),
        flags: "gi".to_string(),
        literal: "/ab(c)/gi".to_string(),
    }))]);
    assert!(contains_op(
        &prg,
        |op| matches!(op, Op::NewRegexp { pattern, flags } if pattern == "ab(c)" && flags == "gi")
    ));
}

#[test]
fn invalid_regexp_is_a_compile_error() {
    let err = compile_err(
        vec![stmt(Expression::RegExp(RegExpLiteral {
            idx: 1,
            pattern: "(".to_string(),
            flags: String::new(),
            literal: "/(/".to_string(),
        }))],
        false,
    );
    assert!(err.message().contains("Invalid regular expression"));

    let err = compile_err(
        vec![stmt(Expression::RegExp(RegExpLiteral {
            idx: 1,
            pattern: "a".to_string(),
            flags: "gg".to_string(),
            literal: "/a/gg".to_string(),
        }))],
        false,
    );
    assert!(err.message().contains("flags"));
}

// ── this & new.target ───────────────────────────────────────────────────────

#[test]
fn this_at_script_level_is_the_global_object() {
    let prg = compile(vec![stmt(Expression::This(ThisExpression { idx: 1 }))]);
    assert!(contains_op(&prg, |op| matches!(op, Op::LoadGlobalObject)));
}

#[test]
fn new_target_meta_property() {
    let prg = compile(vec![stmt(Expression::MetaProperty(MetaProperty {
        idx: 1,
        meta: id("new"),
        property: id("target"),
    }))]);
    assert!(contains_op(&prg, |op| matches!(op, Op::LoadNewTarget)));
}

#[test]
fn unknown_meta_property_is_rejected() {
    let err = compile_err(
        vec![stmt(Expression::MetaProperty(MetaProperty {
            idx: 1,
            meta: id("import"),
            property: id("meta"),
        }))],
        false,
    );
    assert!(err.message().contains("Unsupported meta property"));
}

// ── source map ──────────────────────────────────────────────────────────────

#[test]
fn source_map_records_offsets_in_pc_order() {
    let expr = Expression::Binary(BinaryExpression {
        idx: 5,
        operator: BinaryOp::Add,
        left: Box::new(Expression::Identifier(Identifier {
            idx: 5,
            name: "x".into(),
        })),
        right: Box::new(Expression::Identifier(Identifier {
            idx: 9,
            name: "y".into(),
        })),
    });
    let prg = compile(vec![stmt(expr)]);
    let map = prg.borrow().src_map.clone();
    assert!(!map.is_empty(), "expected source map entries");
    assert!(
        map.windows(2).all(|w| w[0].pc <= w[1].pc),
        "source map not monotonic: {:?}",
        map
    );
    assert!(map.iter().any(|item| item.src_pos == 4));
}
