//! Shared builders and runtime doubles for the integration tests.
//!
//! Programs are assembled directly as syntax-tree nodes (the parser is an
//! external collaborator), so these helpers keep the tests readable.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use indexmap::IndexMap;
use weft::ast::{
    Argument, BitstringSegment, CodeRange, Expr, ExprLoc, Identifier, Literal, Operator, Program, SegmentSpecifiers,
    SegmentType, Stmt, StmtLoc,
};
use weft::{Runtime, RuntimeError, RuntimeFactory, Value};

pub fn pos() -> CodeRange {
    CodeRange::at(1, 1)
}

pub fn loc(expr: Expr) -> ExprLoc {
    ExprLoc::new(expr, pos())
}

pub fn stmt(stmt: Stmt) -> StmtLoc {
    StmtLoc::new(stmt, pos())
}

pub fn program(statements: Vec<StmtLoc>) -> Program {
    Program::new(statements)
}

pub fn int(i: i64) -> ExprLoc {
    loc(Expr::Literal(Literal::Int(i)))
}

pub fn string(s: &str) -> ExprLoc {
    loc(Expr::Literal(Literal::Str(s.to_owned())))
}

pub fn boolean(b: bool) -> ExprLoc {
    loc(Expr::Literal(Literal::Bool(b)))
}

pub fn ident(name: &str) -> ExprLoc {
    loc(Expr::Identifier(Identifier::plain(name, pos())))
}

pub fn qident(language: &str, name: &str) -> ExprLoc {
    loc(Expr::Identifier(Identifier::qualified(language, name, pos())))
}

pub fn binary(left: ExprLoc, op: Operator, right: ExprLoc) -> ExprLoc {
    loc(Expr::Binary {
        left: Box::new(left),
        op,
        right: Box::new(right),
    })
}

pub fn index(object: ExprLoc, idx: ExprLoc) -> ExprLoc {
    loc(Expr::Index {
        object: Box::new(object),
        index: Box::new(idx),
    })
}

pub fn object(entries: Vec<(&str, ExprLoc)>) -> ExprLoc {
    loc(Expr::Object(
        entries.into_iter().map(|(k, v)| (k.to_owned(), v)).collect(),
    ))
}

pub fn array(items: Vec<ExprLoc>) -> ExprLoc {
    loc(Expr::Array(items))
}

pub fn assign(name: &str, value: ExprLoc) -> StmtLoc {
    stmt(Stmt::Assignment {
        target: Identifier::plain(name, pos()),
        value,
        constant: false,
    })
}

pub fn qassign(language: &str, name: &str, value: ExprLoc) -> StmtLoc {
    stmt(Stmt::Assignment {
        target: Identifier::qualified(language, name, pos()),
        value,
        constant: false,
    })
}

pub fn index_assign(target: ExprLoc, value: ExprLoc) -> StmtLoc {
    stmt(Stmt::IndexAssignment { target, value })
}

pub fn call(language: &str, function: &str, args: Vec<ExprLoc>) -> ExprLoc {
    loc(Expr::LanguageCall {
        language: language.to_owned(),
        function: function.to_owned(),
        args: args.into_iter().map(Argument::positional).collect(),
    })
}

pub fn call_stmt(language: &str, function: &str, args: Vec<ExprLoc>) -> StmtLoc {
    stmt(Stmt::LanguageCall {
        call: call(language, function, args),
        background: false,
    })
}

pub fn background_call_stmt(language: &str, function: &str, args: Vec<ExprLoc>) -> StmtLoc {
    stmt(Stmt::LanguageCall {
        call: call(language, function, args),
        background: true,
    })
}

/// An integer segment of the given size in bits.
pub fn int_segment(value: ExprLoc, size: u64) -> BitstringSegment {
    BitstringSegment {
        value,
        size: Some(size),
        size_expression: None,
        dynamic_size: false,
        specifiers: SegmentSpecifiers::default(),
    }
}

/// A terminal `rest/binary` style segment with no size.
pub fn rest_binary_segment(value: ExprLoc) -> BitstringSegment {
    BitstringSegment {
        value,
        size: None,
        size_expression: None,
        dynamic_size: false,
        specifiers: SegmentSpecifiers {
            segment_type: SegmentType::Binary,
            ..SegmentSpecifiers::default()
        },
    }
}

/// A binary segment whose size comes from an expression.
pub fn sized_binary_segment(value: ExprLoc, size_expression: ExprLoc) -> BitstringSegment {
    BitstringSegment {
        value,
        size: None,
        size_expression: Some(Box::new(size_expression)),
        dynamic_size: true,
        specifiers: SegmentSpecifiers {
            segment_type: SegmentType::Binary,
            ..SegmentSpecifiers::default()
        },
    }
}

/// Observable state of a [`ScriptedRuntime`], shared with the test.
#[derive(Debug)]
pub struct ScriptedState {
    pub evals: Vec<String>,
    pub function_calls: Vec<(String, Vec<Value>)>,
    pub variables: IndexMap<String, Value>,
    /// When true, every `eval` fails (forcing transpilation fallback).
    pub fail_eval: bool,
    /// Returned for non-capture evals.
    pub eval_result: Value,
}

impl Default for ScriptedState {
    fn default() -> Self {
        Self {
            evals: vec![],
            function_calls: vec![],
            variables: IndexMap::new(),
            fail_eval: false,
            eval_result: Value::Null,
        }
    }
}

/// A scripted runtime double whose state the test can inspect.
pub struct ScriptedRuntime {
    pub state: Arc<Mutex<ScriptedState>>,
    ready: bool,
}

impl Runtime for ScriptedRuntime {
    fn is_ready(&self) -> bool {
        self.ready
    }

    fn initialize(&mut self) -> Result<(), RuntimeError> {
        self.ready = true;
        Ok(())
    }

    fn eval(&mut self, code: &str) -> Result<Value, RuntimeError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_eval {
            return Err(RuntimeError::Failed("eval disabled".to_owned()));
        }
        // The engine's capture helper is a globals() comprehension; answer
        // it with the current variable table.
        if code.starts_with("{__k") {
            return Ok(Value::Map(state.variables.clone()));
        }
        state.evals.push(code.to_owned());
        Ok(state.eval_result.clone())
    }

    fn execute_function(&mut self, name: &str, args: Vec<Value>) -> Result<Value, RuntimeError> {
        let mut state = self.state.lock().unwrap();
        state.function_calls.push((name.to_owned(), args.clone()));
        match name {
            "print" => {
                let rendered: Vec<String> = args.iter().map(Value::display_string).collect();
                Ok(Value::PreFormatted(rendered.join(" ")))
            }
            _ => Ok(Value::Null),
        }
    }

    fn get_variable(&mut self, name: &str) -> Result<Value, RuntimeError> {
        self.state
            .lock()
            .unwrap()
            .variables
            .get(name)
            .cloned()
            .ok_or_else(|| RuntimeError::VariableNotFound(name.to_owned()))
    }

    fn set_variable(&mut self, name: &str, value: Value) -> Result<(), RuntimeError> {
        self.state.lock().unwrap().variables.insert(name.to_owned(), value);
        Ok(())
    }

    fn get_all_variables(&mut self) -> Option<IndexMap<String, Value>> {
        Some(self.state.lock().unwrap().variables.clone())
    }
}

/// Tracer whose event log is shared with the test through an `Arc`.
#[derive(Clone, Default)]
pub struct SharedTracer {
    pub events: Arc<Mutex<Vec<weft::TraceEvent>>>,
}

impl weft::EngineTracer for SharedTracer {
    fn record(&mut self, event: weft::TraceEvent) {
        self.events.lock().unwrap().push(event);
    }
}

#[derive(Default)]
struct FactoryState {
    states: Mutex<IndexMap<String, Arc<Mutex<ScriptedState>>>>,
    languages: Vec<String>,
}

/// Factory producing one shared [`ScriptedRuntime`] per language.
///
/// Clones share state, so a test keeps one clone to inspect runtimes after
/// handing the other to the engine.
#[derive(Clone, Default)]
pub struct ScriptedFactory {
    inner: Arc<FactoryState>,
}

impl ScriptedFactory {
    pub fn new(languages: &[&str]) -> Self {
        Self {
            inner: Arc::new(FactoryState {
                states: Mutex::new(IndexMap::new()),
                languages: languages.iter().map(|l| (*l).to_owned()).collect(),
            }),
        }
    }

    /// The observable state for a canonical language, once created.
    pub fn state(&self, language: &str) -> Option<Arc<Mutex<ScriptedState>>> {
        self.inner.states.lock().unwrap().get(language).cloned()
    }

    /// Pre-creates the state so tests can configure it before first use.
    pub fn prepare(&self, language: &str) -> Arc<Mutex<ScriptedState>> {
        self.inner
            .states
            .lock()
            .unwrap()
            .entry(language.to_owned())
            .or_default()
            .clone()
    }
}

impl RuntimeFactory for ScriptedFactory {
    fn create(&self, language: &str) -> Option<Box<dyn Runtime>> {
        if !self.supports(language) {
            return None;
        }
        let state = self.prepare(language);
        Some(Box::new(ScriptedRuntime { state, ready: false }))
    }

    fn supports(&self, language: &str) -> bool {
        self.inner.languages.iter().any(|l| l == language)
    }
}
