//! Public interface for running weft programs.

use std::sync::Arc;

use indexmap::IndexMap;

use crate::ast::{ExprLoc, Program};
use crate::error::{EngineError, RunResult};
use crate::jobs::{JobManager, ThreadJobManager};
use crate::resource::{CancelToken, ResourceLimits};
use crate::runtime::{MemoryFactory, RuntimeError, RuntimeFactory, RuntimeRegistry, canonical_language};
use crate::scope::ScopeStack;
use crate::shared::{GlobalVariables, SharedVariables};
use crate::tracer::{EngineTracer, NoopTracer};
use crate::value::Value;

/// The tree-walking execution engine.
///
/// An `Engine` owns the scope stack, the global and shared variable tables,
/// the runtime registry, and the background job manager. Statements execute
/// sequentially on the caller's thread; only background language calls
/// leave it.
///
/// # Example
/// ```
/// use weft::ast::{CodeRange, Expr, ExprLoc, Identifier, Literal, Program, Stmt, StmtLoc};
/// use weft::{Engine, Value};
///
/// let mut engine = Engine::new_in_memory();
/// let pos = CodeRange::at(1, 1);
/// let program = Program::new(vec![StmtLoc::new(
///     Stmt::Assignment {
///         target: Identifier::qualified("py", "x", pos),
///         value: ExprLoc::new(Expr::Literal(Literal::Int(41)), pos),
///         constant: false,
///     },
///     pos,
/// )]);
/// engine.execute(&program).unwrap();
/// assert_eq!(engine.get_variable(Some("python"), "x"), Some(Value::Int(41)));
/// ```
pub struct Engine {
    pub(crate) scopes: ScopeStack,
    pub(crate) globals: GlobalVariables,
    pub(crate) shared: SharedVariables,
    pub(crate) registry: RuntimeRegistry,
    pub(crate) jobs: Arc<dyn JobManager>,
    pub(crate) tracer: Box<dyn EngineTracer>,
    pub(crate) limits: ResourceLimits,
    pub(crate) cancel: CancelToken,
    /// Canonical language inferred for the innermost running loop, consulted
    /// ahead of the general runtime scan when resolving unqualified names.
    pub(crate) loop_language: Option<String>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("registry", &self.registry)
            .field("scope_depth", &self.scopes.depth())
            .finish()
    }
}

impl Engine {
    /// Creates an engine backed by the given runtime factory.
    #[must_use]
    pub fn new(factory: Box<dyn RuntimeFactory>) -> Self {
        Self {
            scopes: ScopeStack::new(),
            globals: GlobalVariables::new(),
            shared: SharedVariables::new(),
            registry: RuntimeRegistry::new(factory),
            jobs: Arc::new(ThreadJobManager::new()),
            tracer: Box::new(NoopTracer),
            limits: ResourceLimits::default(),
            cancel: CancelToken::new(),
            loop_language: None,
        }
    }

    /// Creates an engine with in-memory fallback runtimes for the default
    /// languages - the configuration the CLI and most tests use.
    #[must_use]
    pub fn new_in_memory() -> Self {
        Self::new(Box::new(MemoryFactory::new()))
    }

    /// Replaces the resource limits.
    #[must_use]
    pub fn with_limits(mut self, limits: ResourceLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Installs a tracer, returning the previous one.
    pub fn replace_tracer(&mut self, tracer: Box<dyn EngineTracer>) -> Box<dyn EngineTracer> {
        std::mem::replace(&mut self.tracer, tracer)
    }

    /// Installs a job manager (the default spawns one thread per job).
    pub fn set_job_manager(&mut self, jobs: Arc<dyn JobManager>) {
        self.jobs = jobs;
    }

    /// A clone of the cancellation token observed at loop boundaries.
    #[must_use]
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Current scope stack depth, root included. Well-formed programs leave
    /// this unchanged across `execute`.
    #[must_use]
    pub fn scope_depth(&self) -> usize {
        self.scopes.depth()
    }

    /// Executes a program and returns its cleaned, newline-joined output.
    ///
    /// # Errors
    /// Returns the first error raised by any statement; execution stops at
    /// that statement.
    pub fn execute(&mut self, program: &Program) -> RunResult<String> {
        let result = self.exec_block(&program.statements);
        match result {
            Ok(value) => Ok(match value {
                Value::PreFormatted(out) | Value::Str(out) => crate::block::clean_output(&out),
                _ => String::new(),
            }),
            Err(exec_error) => {
                let error = exec_error.into_engine_error();
                self.tracer.record(crate::tracer::error_event(&error));
                Err(error)
            }
        }
    }

    /// Evaluates a single expression against the current engine state.
    pub fn eval_expression(&mut self, expr: &ExprLoc) -> RunResult<Value> {
        self.eval_expr(expr).map_err(crate::error::ExecError::into_engine_error)
    }

    /// Injects a variable from the host side.
    ///
    /// With a language the write goes through the qualified channel
    /// (runtime plus shared store); without one it lands in the global
    /// table.
    pub fn set_variable(&mut self, language: Option<&str>, name: &str, value: Value) -> RunResult<()> {
        match language {
            Some(language) => {
                let canonical = canonical_language(language).to_owned();
                let handle = self.registry.get_or_create(&canonical)?;
                match handle.set_variable(name, value.clone()) {
                    Ok(()) | Err(RuntimeError::VariableNotFound(_)) => {}
                    Err(e) => return Err(e.into_engine_error(&canonical)),
                }
                self.shared.set(&canonical, name, value);
                Ok(())
            }
            None => {
                if self.globals.set(name, value) {
                    Ok(())
                } else {
                    Err(EngineError::user(
                        crate::error::ErrorCode::ImmutableVariable,
                        format!("cannot assign to immutable variable '{name}'"),
                    ))
                }
            }
        }
    }

    /// Defines an immutable unqualified global.
    pub fn define_constant(&mut self, name: &str, value: Value) {
        self.globals.set_with_mutability(name, value, false);
    }

    /// Reads a variable: qualified reads prefer the shared store, then the
    /// runtime; unqualified reads walk scopes, then globals.
    #[must_use]
    pub fn get_variable(&mut self, language: Option<&str>, name: &str) -> Option<Value> {
        match language {
            Some(language) => {
                let canonical = canonical_language(language);
                if let Some(value) = self.shared.get(canonical, name) {
                    return Some(value);
                }
                let handle = self.registry.get_or_create(canonical).ok()?;
                handle.get_variable(name).ok()
            }
            None => {
                if let Some(info) = self.scopes.get(name) {
                    return Some(info.value.clone());
                }
                self.globals.get(name).map(|info| info.value)
            }
        }
    }

    /// Lists visible variables for a language (runtime capture overlaid
    /// with the shared store) or the unqualified globals.
    #[must_use]
    pub fn list_variables(&mut self, language: Option<&str>) -> Vec<(String, Value)> {
        match language {
            Some(language) => {
                let canonical = canonical_language(language);
                let mut merged: IndexMap<String, Value> = IndexMap::new();
                if let Ok(handle) = self.registry.get_or_create(canonical)
                    && let Some(vars) = handle.get_all_variables()
                {
                    merged.extend(vars);
                }
                for (name, value) in self.shared.get_all(canonical) {
                    merged.insert(name, value);
                }
                merged.into_iter().collect()
            }
            None => {
                let mut merged: IndexMap<String, Value> = self
                    .globals
                    .names()
                    .into_iter()
                    .filter_map(|name| self.globals.get(&name).map(|info| (name, info.value)))
                    .collect();
                // Top-level locals (e.g. match bindings) overlay the globals.
                for (name, info) in self.scopes.get_all_local() {
                    merged.insert(name, info.value);
                }
                merged.into_iter().collect()
            }
        }
    }

    /// Serializes the shared variable store for host-side persistence.
    #[must_use]
    pub fn dump_shared(&self) -> Vec<u8> {
        self.shared.dump()
    }

    /// Restores the shared variable store from a `dump_shared` snapshot.
    pub fn restore_shared(&mut self, bytes: &[u8]) -> RunResult<()> {
        self.shared.restore(bytes).map_err(|e| {
            EngineError::system(crate::error::ErrorCode::Internal, format!("snapshot restore failed: {e}"))
        })
    }
}
