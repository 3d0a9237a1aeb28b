//! The Python transpilation path: whole-block execution, variable capture,
//! and fallback to per-statement execution.

mod common;

use common::*;
use pretty_assertions::assert_eq;
use weft::{Engine, Value};

// =============================================================================
// 1. Whole-block execution
// =============================================================================

/// A homogeneous Python block is issued as a single eval.
#[test]
fn homogeneous_block_runs_as_one_eval() {
    let factory = ScriptedFactory::new(&["python"]);
    let mut engine = Engine::new(Box::new(factory.clone()));
    engine
        .execute(&program(vec![
            qassign("py", "x", int(1)),
            qassign("py", "y", binary(qident("py", "x"), weft::ast::Operator::Add, int(1))),
        ]))
        .unwrap();

    let state = factory.state("python").unwrap();
    let state = state.lock().unwrap();
    assert_eq!(
        state.evals,
        vec!["x = 1\ny = (x + 1)\n".to_owned()],
        "the block should arrive as one source unit"
    );
    assert!(
        state.function_calls.is_empty() && !state.variables.contains_key("x"),
        "per-statement dispatch must not run when the block is batched"
    );
}

/// After whole-block execution the runtime's variables are captured into
/// the shared store.
#[test]
fn capture_mirrors_runtime_variables_to_shared_store() {
    let factory = ScriptedFactory::new(&["python"]);
    // Seed the runtime as if the block had created variables.
    factory
        .prepare("python")
        .lock()
        .unwrap()
        .variables
        .insert("computed".to_owned(), Value::Int(99));
    let mut engine = Engine::new(Box::new(factory));
    engine
        .execute(&program(vec![
            qassign("py", "a", int(1)),
            qassign("py", "b", int(2)),
        ]))
        .unwrap();

    assert_eq!(engine.get_variable(Some("python"), "computed"), Some(Value::Int(99)));
}

// =============================================================================
// 2. Gate conditions
// =============================================================================

/// A statement addressing another runtime forces per-statement execution.
#[test]
fn mixed_languages_run_per_statement() {
    let factory = ScriptedFactory::new(&["python", "lua"]);
    let mut engine = Engine::new(Box::new(factory.clone()));
    engine
        .execute(&program(vec![
            qassign("py", "x", int(1)),
            qassign("lua", "y", int(2)),
        ]))
        .unwrap();

    let python = factory.state("python").unwrap();
    assert!(
        python.lock().unwrap().evals.is_empty(),
        "a mixed block must not be batched"
    );
    assert_eq!(python.lock().unwrap().variables.get("x"), Some(&Value::Int(1)));
    let lua = factory.state("lua").unwrap();
    assert_eq!(lua.lock().unwrap().variables.get("y"), Some(&Value::Int(2)));
}

/// Background calls stay on the per-statement path.
#[test]
fn background_calls_are_not_batched() {
    let factory = ScriptedFactory::new(&["python"]);
    let mut engine = Engine::new(Box::new(factory.clone()));
    engine
        .execute(&program(vec![
            qassign("py", "x", int(1)),
            background_call_stmt("py", "notify", vec![int(1)]),
        ]))
        .unwrap();
    let state = factory.state("python").unwrap();
    let state = state.lock().unwrap();
    assert!(state.evals.is_empty());
    assert_eq!(state.variables.get("x"), Some(&Value::Int(1)));
    assert_eq!(state.function_calls.len(), 1, "the background call still runs");
}

// =============================================================================
// 3. Fallback
// =============================================================================

/// When whole-block eval fails, the engine falls back to per-statement
/// execution with the same net effect.
#[test]
fn failed_block_eval_falls_back_to_statements() {
    let factory = ScriptedFactory::new(&["python"]);
    factory.prepare("python").lock().unwrap().fail_eval = true;
    let mut engine = Engine::new(Box::new(factory.clone()));
    engine
        .execute(&program(vec![
            qassign("py", "x", int(1)),
            qassign("py", "y", int(2)),
        ]))
        .unwrap();

    let state = factory.state("python").unwrap();
    let state = state.lock().unwrap();
    assert_eq!(state.variables.get("x"), Some(&Value::Int(1)));
    assert_eq!(state.variables.get("y"), Some(&Value::Int(2)));
    assert_eq!(engine.get_variable(Some("python"), "x"), Some(Value::Int(1)));
}

/// An engine with no Python backend at all still executes the block.
#[test]
fn missing_python_runtime_falls_back() {
    let factory = ScriptedFactory::new(&["lua"]);
    let mut engine = Engine::new(Box::new(factory));
    // Both statements are python-shaped, but no python runtime exists; the
    // per-statement path then reports the missing runtime.
    let err = engine
        .execute(&program(vec![
            qassign("py", "x", int(1)),
            qassign("py", "y", int(2)),
        ]))
        .unwrap_err();
    assert_eq!(err.code, weft::ErrorCode::RuntimeUnavailable);
}
