//! Shared-store mechanics, raw code blocks, `eval` dispatch, and the host
//! variable APIs.

mod common;

use common::*;
use pretty_assertions::assert_eq;
use weft::ast::Stmt;
use weft::{Engine, ErrorCode, Value};

// =============================================================================
// 1. Raw code blocks and eval
// =============================================================================

/// A code-block statement hands its source verbatim to the runtime.
#[test]
fn code_block_evals_verbatim_source() {
    let factory = ScriptedFactory::new(&["python"]);
    factory.prepare("python").lock().unwrap().eval_result = Value::PreFormatted("ran".to_owned());
    let mut engine = Engine::new(Box::new(factory.clone()));
    let output = engine
        .execute(&program(vec![stmt(Stmt::CodeBlock {
            language: "py".to_owned(),
            source: "import math\nprint(math.pi)".to_owned(),
        })]))
        .unwrap();
    assert_eq!(output, "ran");
    let state = factory.state("python").unwrap();
    assert_eq!(state.lock().unwrap().evals, vec!["import math\nprint(math.pi)".to_owned()]);
}

/// `lang.eval(code)` is special-cased to a single source string.
#[test]
fn eval_call_takes_one_source_string() {
    let factory = ScriptedFactory::new(&["node"]);
    let mut engine = Engine::new(Box::new(factory.clone()));
    engine
        .eval_expression(&call("js", "eval", vec![string("1 + 1")]))
        .unwrap();
    let state = factory.state("node").unwrap();
    let state = state.lock().unwrap();
    assert_eq!(state.evals, vec!["1 + 1".to_owned()]);
    assert!(state.function_calls.is_empty(), "eval must not go through execute_function");
}

/// `eval` with a non-string argument is a WRONG_ARGUMENT user error.
#[test]
fn eval_call_rejects_non_strings() {
    let mut engine = Engine::new_in_memory();
    let err = engine.eval_expression(&call("py", "eval", vec![int(5)])).unwrap_err();
    assert_eq!(err.code, ErrorCode::WrongArgument);
}

// =============================================================================
// 2. Host variable APIs
// =============================================================================

/// Host-injected qualified variables are visible to programs.
#[test]
fn host_injected_variable_is_readable_by_programs() {
    let mut engine = Engine::new_in_memory();
    engine.set_variable(Some("py"), "seed", Value::Int(123)).unwrap();
    let result = engine.eval_expression(&qident("python", "seed")).unwrap();
    assert_eq!(result, Value::Int(123));
}

/// list_variables overlays the shared store on the runtime's capture.
#[test]
fn list_variables_merges_runtime_and_shared_store() {
    let factory = ScriptedFactory::new(&["python"]);
    factory
        .prepare("python")
        .lock()
        .unwrap()
        .variables
        .insert("runtime_only".to_owned(), Value::Int(1));
    let mut engine = Engine::new(Box::new(factory));
    engine.set_variable(Some("python"), "shared_one", Value::Int(2)).unwrap();

    let vars = engine.list_variables(Some("python"));
    let names: Vec<&str> = vars.iter().map(|(name, _)| name.as_str()).collect();
    assert!(names.contains(&"runtime_only"), "runtime capture should appear, got {names:?}");
    assert!(names.contains(&"shared_one"), "shared store entries should appear, got {names:?}");
}

/// Unqualified host injection lands in globals; constants reject writes.
#[test]
fn host_constants_reject_overwrites() {
    let mut engine = Engine::new_in_memory();
    engine.define_constant("limit", Value::Int(10));
    let err = engine.set_variable(None, "limit", Value::Int(20)).unwrap_err();
    assert_eq!(err.code, ErrorCode::ImmutableVariable);
    assert_eq!(engine.get_variable(None, "limit"), Some(Value::Int(10)));
}

// =============================================================================
// 3. Write-through ordering
// =============================================================================

/// A qualified write that the runtime answers with VARIABLE_NOT_FOUND is
/// tolerated; the shared store still records the value.
#[test]
fn soft_variable_not_found_on_set_is_tolerated() {
    // The memory runtime accepts all writes, so exercise the policy through
    // the shared store read-back after a fresh engine drops runtime state.
    let mut engine = Engine::new_in_memory();
    engine.execute(&program(vec![qassign("py", "x", int(5))])).unwrap();
    let snapshot = engine.dump_shared();

    let mut fresh = Engine::new_in_memory();
    fresh.restore_shared(&snapshot).unwrap();
    // The fresh engine's runtime never saw the write; the store answers.
    assert_eq!(fresh.eval_expression(&qident("py", "x")).unwrap(), Value::Int(5));
}

/// Statements in a block observe earlier statements' qualified writes.
#[test]
fn later_statements_observe_earlier_commits() {
    let mut engine = Engine::new_in_memory();
    let output = engine
        .execute(&program(vec![
            qassign("lua", "x", int(41)),
            call_stmt(
                "lua",
                "print",
                vec![binary(qident("lua", "x"), weft::ast::Operator::Add, int(1))],
            ),
        ]))
        .unwrap();
    assert_eq!(output, "42");
}
