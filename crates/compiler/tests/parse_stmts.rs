//! Statement parsing: declarations, imports, exec statements, error
//! locality.

use novc::node::Node;
use novc::parse;

fn single_stmt(source: &str) -> Node {
    let mut stmts = parse(source);
    assert_eq!(stmts.len(), 1, "source {source:?} gave {stmts:?}");
    stmts.remove(0)
}

#[test]
fn func_decl_prints_its_signature() {
    let stmt = single_stmt("fun a(int x, int y) -> int x * y");
    assert!(matches!(stmt, Node::FuncDeclStmt { .. }));
    assert_eq!(stmt.to_string(), "fun-a(int-x,int-y)->int");
}

#[test]
fn func_decl_without_args_or_return_type() {
    let stmt = single_stmt("fun main() 42");
    assert_eq!(stmt.to_string(), "fun-main()->infer");
}

#[test]
fn func_decl_with_type_substitutions() {
    let stmt = single_stmt("fun id{T}(T x) -> T x");
    assert!(matches!(stmt, Node::FuncDeclStmt { .. }));
    assert_eq!(stmt.to_string(), "fun-id{T}(T-x)->T");
}

#[test]
fn operator_overload_decl() {
    let stmt = single_stmt("fun +(int a, int b) -> int 1");
    assert!(matches!(stmt, Node::FuncDeclStmt { .. }));
    assert_eq!(stmt.to_string(), "fun-op-plus(int-a,int-b)->int");
}

#[test]
fn action_decl_parses_like_fun() {
    let stmt = single_stmt("act main() 0");
    assert!(matches!(stmt, Node::FuncDeclStmt { .. }));
}

#[test]
fn struct_decl_with_fields() {
    let stmt = single_stmt("struct pair = int a, int b");
    match &stmt {
        Node::StructDeclStmt { fields, commas, .. } => {
            assert_eq!(fields.len(), 2);
            assert_eq!(commas.len(), 1);
        }
        other => panic!("expected struct decl, got {other:?}"),
    }
    assert_eq!(stmt.to_string(), "struct-pair");
}

#[test]
fn empty_struct_decl() {
    let stmt = single_stmt("struct unit");
    assert!(matches!(
        stmt,
        Node::StructDeclStmt { ref fields, ref eq, .. } if fields.is_empty() && eq.is_none()
    ));
}

#[test]
fn union_decl_requires_two_types() {
    let stmt = single_stmt("union num = int, float");
    match &stmt {
        Node::UnionDeclStmt { types, .. } => assert_eq!(types.len(), 2),
        other => panic!("expected union decl, got {other:?}"),
    }

    // One type is not a union.
    assert!(single_stmt("union num = int").is_error());
}

#[test]
fn enum_decl_with_explicit_values() {
    let stmt = single_stmt("enum color = red, green : 2, blue : -1");
    match &stmt {
        Node::EnumDeclStmt { entries, .. } => {
            assert_eq!(entries.len(), 3);
            assert!(entries[0].value.is_none());
            assert!(entries[1].value.is_some());
            assert!(entries[2].minus.is_some());
        }
        other => panic!("expected enum decl, got {other:?}"),
    }
}

#[test]
fn import_statement() {
    let stmt = single_stmt("import \"std.nov\"");
    assert!(matches!(stmt, Node::ImportStmt { .. }));
    assert!(single_stmt("import 42").is_error());
}

#[test]
fn exec_statement() {
    let stmt = single_stmt("print(1, 2)");
    match &stmt {
        Node::ExecStmt { action, args, .. } => {
            assert_eq!(action.identifier(), Some("print"));
            assert_eq!(args.len(), 2);
        }
        other => panic!("expected exec stmt, got {other:?}"),
    }
    assert!(matches!(
        single_stmt("main()"),
        Node::ExecStmt { ref args, .. } if args.is_empty()
    ));
}

#[test]
fn comments_are_statements() {
    let stmts = parse("// leading note\nmain()");
    assert_eq!(stmts.len(), 2);
    assert!(matches!(stmts[0], Node::Comment { .. }));
    assert!(matches!(stmts[1], Node::ExecStmt { .. }));
}

#[test]
fn one_bad_token_stays_inside_its_statement() {
    let stmts = parse("foo(1) bar(,) baz(2)");
    assert_eq!(stmts.len(), 3);

    // The surrounding statements parse unchanged.
    assert!(matches!(&stmts[0], Node::ExecStmt { args, .. } if args.len() == 1));
    assert!(matches!(&stmts[2], Node::ExecStmt { args, .. } if args.len() == 1));

    // The malformed one carries exactly one error, inside its own span.
    assert_eq!(stmts[0].error_count(), 0);
    assert_eq!(stmts[1].error_count(), 1);
    assert_eq!(stmts[2].error_count(), 0);

    let stmt_span = stmts[1].span();
    let mut error_span = None;
    stmts[1].for_each_child(|child| {
        if child.is_error() {
            error_span = Some(child.span());
        }
    });
    let error_span = error_span.expect("error child exists");
    assert!(error_span.start >= stmt_span.start && error_span.end <= stmt_span.end);
}

#[test]
fn multiple_statements_parse_in_order() {
    let stmts = parse("import \"std.nov\" fun f() 1 struct s main() union u = int, float");
    assert_eq!(stmts.len(), 5);
    assert!(matches!(stmts[0], Node::ImportStmt { .. }));
    assert!(matches!(stmts[1], Node::FuncDeclStmt { .. }));
    assert!(matches!(stmts[2], Node::StructDeclStmt { .. }));
    assert!(matches!(stmts[3], Node::ExecStmt { .. }));
    assert!(matches!(stmts[4], Node::UnionDeclStmt { .. }));
}

#[test]
fn parse_always_terminates_on_garbage() {
    for source in [")", "} ] )", "fun", "struct = =", "union u =", "((((", "= = ="] {
        let stmts = parse(source);
        assert!(!stmts.is_empty(), "source {source:?}");
    }
}
