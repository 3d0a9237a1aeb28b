//! Pattern matching: match statements, inplace pattern assignment, object
//! patterns, and the match-friendly Null policy for out-of-range reads.

mod common;

use common::*;
use pretty_assertions::assert_eq;
use weft::ast::{Expr, Identifier, Literal, MatchArm, Operator, Pattern, Stmt};
use weft::{Engine, ErrorCode, Value};

fn var_pattern(name: &str) -> Pattern {
    Pattern::Variable(Identifier::plain(name, pos()))
}

// =============================================================================
// 1. Match statement
// =============================================================================

/// `match v { [a, b, _] => … }` destructures and the bindings are visible
/// to later statements in the enclosing scope.
#[test]
fn match_array_pattern_binds_and_extracts() {
    let mut engine = Engine::new_in_memory();
    let output = engine
        .execute(&program(vec![
            qassign("py", "v", array(vec![int(10), int(20), int(30)])),
            stmt(Stmt::Match {
                value: qident("py", "v"),
                arms: vec![MatchArm {
                    pattern: Pattern::Array(vec![var_pattern("a"), var_pattern("b"), Pattern::Wildcard]),
                    body: vec![call_stmt(
                        "lua",
                        "print",
                        vec![binary(ident("a"), Operator::Add, ident("b"))],
                    )],
                }],
            }),
        ]))
        .unwrap();
    assert_eq!(output, "30");
    // Bindings are copied up to the enclosing scope on successful arm exit.
    assert_eq!(engine.get_variable(None, "a"), Some(Value::Int(10)));
    assert_eq!(engine.get_variable(None, "b"), Some(Value::Int(20)));
}

/// Arms are tried in order; the first match wins.
#[test]
fn match_tries_arms_in_order() {
    let mut engine = Engine::new_in_memory();
    let output = engine
        .execute(&program(vec![stmt(Stmt::Match {
            value: int(2),
            arms: vec![
                MatchArm {
                    pattern: Pattern::Literal(Literal::Int(1)),
                    body: vec![call_stmt("lua", "print", vec![string("one")])],
                },
                MatchArm {
                    pattern: Pattern::Literal(Literal::Int(2)),
                    body: vec![call_stmt("lua", "print", vec![string("two")])],
                },
                MatchArm {
                    pattern: Pattern::Wildcard,
                    body: vec![call_stmt("lua", "print", vec![string("any")])],
                },
            ],
        })]))
        .unwrap();
    assert_eq!(output, "two");
}

/// No matching arm raises NO_PATTERN_MATCH.
#[test]
fn match_without_matching_arm_errors() {
    let mut engine = Engine::new_in_memory();
    let err = engine
        .execute(&program(vec![stmt(Stmt::Match {
            value: int(9),
            arms: vec![MatchArm {
                pattern: Pattern::Literal(Literal::Int(1)),
                body: vec![],
            }],
        })]))
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::NoPatternMatch);
}

/// Literal patterns use the value model's coercion: 1 matches 1.0.
#[test]
fn literal_pattern_uses_numeric_coercion() {
    let mut engine = Engine::new_in_memory();
    let output = engine
        .execute(&program(vec![stmt(Stmt::Match {
            value: loc(Expr::Literal(Literal::Float(1.0))),
            arms: vec![MatchArm {
                pattern: Pattern::Literal(Literal::Int(1)),
                body: vec![call_stmt("lua", "print", vec![string("coerced")])],
            }],
        })]))
        .unwrap();
    assert_eq!(output, "coerced");
}

// =============================================================================
// 2. Object patterns
// =============================================================================

/// An empty object pattern matches only an empty map.
#[test]
fn empty_object_pattern_requires_empty_map() {
    let mut engine = Engine::new_in_memory();
    let err = engine
        .execute(&program(vec![stmt(Stmt::Match {
            value: object(vec![("k", int(1))]),
            arms: vec![MatchArm {
                pattern: Pattern::Object(vec![]),
                body: vec![],
            }],
        })]))
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::NoPatternMatch);

    let output = engine
        .execute(&program(vec![stmt(Stmt::Match {
            value: object(vec![]),
            arms: vec![MatchArm {
                pattern: Pattern::Object(vec![]),
                body: vec![call_stmt("lua", "print", vec![string("empty")])],
            }],
        })]))
        .unwrap();
    assert_eq!(output, "empty");
}

/// Normal keys require presence and a recursive match.
#[test]
fn object_pattern_matches_keys_recursively() {
    let mut engine = Engine::new_in_memory();
    let output = engine
        .execute(&program(vec![stmt(Stmt::Match {
            value: object(vec![("user", object(vec![("name", string("ada"))]))]),
            arms: vec![MatchArm {
                pattern: Pattern::Object(vec![(
                    "user".to_owned(),
                    Pattern::Object(vec![("name".to_owned(), var_pattern("who"))]),
                )]),
                body: vec![call_stmt("lua", "print", vec![ident("who")])],
            }],
        })]))
        .unwrap();
    assert_eq!(output, "ada");
}

/// The `_` key means "some value in the map matches this sub-pattern".
#[test]
fn object_pattern_underscore_key_is_existential() {
    let mut engine = Engine::new_in_memory();
    let output = engine
        .execute(&program(vec![stmt(Stmt::Match {
            value: object(vec![("a", int(1)), ("b", int(42))]),
            arms: vec![MatchArm {
                pattern: Pattern::Object(vec![("_".to_owned(), Pattern::Literal(Literal::Int(42)))]),
                body: vec![call_stmt("lua", "print", vec![string("found")])],
            }],
        })]))
        .unwrap();
    assert_eq!(output, "found");
}

// =============================================================================
// 3. Inplace pattern assignment
// =============================================================================

/// `pattern = value` in expression position yields a Bool and binds on
/// success.
#[test]
fn inplace_pattern_assignment_yields_bool() {
    let mut engine = Engine::new_in_memory();
    let matched = engine
        .eval_expression(&loc(Expr::PatternMatch {
            pattern: Pattern::Array(vec![var_pattern("x"), var_pattern("y")]),
            value: Box::new(array(vec![int(1), int(2)])),
        }))
        .unwrap();
    assert_eq!(matched, Value::Bool(true));
    assert_eq!(engine.get_variable(None, "x"), Some(Value::Int(1)));
    assert_eq!(engine.get_variable(None, "y"), Some(Value::Int(2)));

    let unmatched = engine
        .eval_expression(&loc(Expr::PatternMatch {
            pattern: Pattern::Array(vec![var_pattern("x")]),
            value: Box::new(array(vec![int(1), int(2)])),
        }))
        .unwrap();
    assert_eq!(unmatched, Value::Bool(false));
}

/// Qualified pattern variables bind through the shared store.
#[test]
fn qualified_pattern_binding_goes_to_shared_store() {
    let mut engine = Engine::new_in_memory();
    let matched = engine
        .eval_expression(&loc(Expr::PatternMatch {
            pattern: Pattern::Variable(Identifier::qualified("py", "captured", pos())),
            value: Box::new(int(7)),
        }))
        .unwrap();
    assert_eq!(matched, Value::Bool(true));
    assert_eq!(engine.get_variable(Some("python"), "captured"), Some(Value::Int(7)));
}

/// A repeated name in one pattern keeps the later binding.
#[test]
fn repeated_binding_overwrites() {
    let mut engine = Engine::new_in_memory();
    engine
        .eval_expression(&loc(Expr::PatternMatch {
            pattern: Pattern::Array(vec![var_pattern("x"), var_pattern("x")]),
            value: Box::new(array(vec![int(1), int(2)])),
        }))
        .unwrap();
    assert_eq!(engine.get_variable(None, "x"), Some(Value::Int(2)));
}

// =============================================================================
// 4. Null fall-through
// =============================================================================

/// An out-of-range list read yields Null, so a wildcard pattern succeeds.
#[test]
fn out_of_range_read_feeds_wildcard() {
    let mut engine = Engine::new_in_memory();
    engine
        .execute(&program(vec![qassign("py", "xs", array(vec![int(1)]))]))
        .unwrap();
    let output = engine
        .execute(&program(vec![stmt(Stmt::Match {
            value: index(qident("py", "xs"), int(9)),
            arms: vec![
                MatchArm {
                    pattern: Pattern::Literal(Literal::Int(1)),
                    body: vec![call_stmt("lua", "print", vec![string("one")])],
                },
                MatchArm {
                    pattern: Pattern::Wildcard,
                    body: vec![call_stmt("lua", "print", vec![string("fell through")])],
                },
            ],
        })]))
        .unwrap();
    assert_eq!(output, "fell through");
}

/// Matching is side-effect free: a failed arm leaves no bindings behind.
#[test]
fn failed_arm_leaves_no_bindings() {
    let mut engine = Engine::new_in_memory();
    engine
        .execute(&program(vec![stmt(Stmt::Match {
            value: array(vec![int(1), int(2)]),
            arms: vec![
                MatchArm {
                    // Binds `tmp` but then fails on the literal.
                    pattern: Pattern::Array(vec![var_pattern("tmp"), Pattern::Literal(Literal::Int(99))]),
                    body: vec![],
                },
                MatchArm {
                    pattern: Pattern::Wildcard,
                    body: vec![],
                },
            ],
        })]))
        .unwrap();
    assert_eq!(engine.get_variable(None, "tmp"), None);
}
