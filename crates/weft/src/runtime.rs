//! Language runtimes: canonicalization, the handle protocol, and the cache.
//!
//! Concrete runtimes live outside the engine; they plug in through the
//! [`Runtime`] trait, a capability set rather than a class hierarchy. The
//! registry lazily creates and initializes a runtime on first reference and
//! keeps the handle for the engine's lifetime. Handles are mutex-serialized
//! so background jobs cannot re-enter a runtime concurrently.

use std::sync::{Arc, Mutex, RwLock};

use ahash::AHashMap;
use indexmap::IndexMap;

use crate::error::{EngineError, ErrorCode, RunResult};
use crate::value::Value;

/// Maps language aliases to canonical names: `py → python`, `js → node`,
/// everything else passes through.
#[must_use]
pub fn canonical_language(name: &str) -> &str {
    match name {
        "py" => "python",
        "js" => "node",
        other => other,
    }
}

/// Failures reported by runtime operations.
///
/// `NotReady` and `Unavailable` are system errors; the rest are user
/// errors originating in the executed program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeError {
    NotReady,
    Unavailable(String),
    VariableNotFound(String),
    FunctionNotFound(String),
    WrongArgument(String),
    Failed(String),
}

impl RuntimeError {
    /// True for failures of the host environment rather than the program.
    #[must_use]
    pub fn is_system(&self) -> bool {
        matches!(self, Self::NotReady | Self::Unavailable(_))
    }

    /// Converts to a positioned-later engine error for language `language`.
    #[must_use]
    pub fn into_engine_error(self, language: &str) -> EngineError {
        match self {
            Self::NotReady => {
                EngineError::system(ErrorCode::RuntimeNotReady, format!("runtime '{language}' is not ready"))
            }
            Self::Unavailable(message) => EngineError::system(
                ErrorCode::RuntimeUnavailable,
                format!("runtime '{language}' is unavailable: {message}"),
            ),
            Self::VariableNotFound(name) => EngineError::user(
                ErrorCode::VariableNotFound,
                format!("variable '{name}' not found in runtime '{language}'"),
            ),
            Self::FunctionNotFound(name) => EngineError::user(
                ErrorCode::FunctionNotFound,
                format!("function '{name}' not found in runtime '{language}'"),
            ),
            Self::WrongArgument(message) => EngineError::user(ErrorCode::WrongArgument, message),
            Self::Failed(message) => {
                EngineError::user(ErrorCode::Runtime, format!("runtime '{language}': {message}"))
            }
        }
    }
}

/// The capability set every embedded runtime exposes to the engine.
///
/// Runtimes are assumed internally single-threaded; the engine serializes
/// calls through the handle lock.
pub trait Runtime: Send {
    /// Whether the runtime finished initialization and accepts calls.
    fn is_ready(&self) -> bool;

    /// One-time setup, run by the registry before the handle is published.
    fn initialize(&mut self) -> Result<(), RuntimeError>;

    /// Evaluates raw source and returns its result.
    fn eval(&mut self, code: &str) -> Result<Value, RuntimeError>;

    /// Calls a named function with positional arguments.
    fn execute_function(&mut self, name: &str, args: Vec<Value>) -> Result<Value, RuntimeError>;

    /// Reads a variable from the runtime's namespace.
    fn get_variable(&mut self, name: &str) -> Result<Value, RuntimeError>;

    /// Writes a variable into the runtime's namespace.
    ///
    /// `VariableNotFound` is a soft error here: the engine tolerates it
    /// because the variable may be created later by the runtime itself.
    fn set_variable(&mut self, name: &str, value: Value) -> Result<(), RuntimeError>;

    /// Top-level variables for post-execution capture, when the runtime can
    /// enumerate them.
    fn get_all_variables(&mut self) -> Option<IndexMap<String, Value>> {
        None
    }
}

/// A shared, lock-serialized reference to one runtime.
#[derive(Clone)]
pub struct RuntimeHandle {
    language: Arc<str>,
    inner: Arc<Mutex<Box<dyn Runtime>>>,
}

impl std::fmt::Debug for RuntimeHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeHandle").field("language", &self.language).finish()
    }
}

impl RuntimeHandle {
    fn new(language: &str, runtime: Box<dyn Runtime>) -> Self {
        Self {
            language: Arc::from(language),
            inner: Arc::new(Mutex::new(runtime)),
        }
    }

    /// Canonical language this handle serves.
    #[must_use]
    pub fn language(&self) -> &str {
        &self.language
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.inner.lock().expect("runtime lock poisoned").is_ready()
    }

    pub fn eval(&self, code: &str) -> Result<Value, RuntimeError> {
        self.inner.lock().expect("runtime lock poisoned").eval(code)
    }

    pub fn execute_function(&self, name: &str, args: Vec<Value>) -> Result<Value, RuntimeError> {
        self.inner.lock().expect("runtime lock poisoned").execute_function(name, args)
    }

    pub fn get_variable(&self, name: &str) -> Result<Value, RuntimeError> {
        self.inner.lock().expect("runtime lock poisoned").get_variable(name)
    }

    pub fn set_variable(&self, name: &str, value: Value) -> Result<(), RuntimeError> {
        self.inner.lock().expect("runtime lock poisoned").set_variable(name, value)
    }

    pub fn get_all_variables(&self) -> Option<IndexMap<String, Value>> {
        self.inner.lock().expect("runtime lock poisoned").get_all_variables()
    }
}

/// Creates runtimes on demand for the registry.
pub trait RuntimeFactory: Send + Sync {
    /// Builds an uninitialized runtime for a canonical language name, or
    /// `None` when the language is unknown.
    fn create(&self, language: &str) -> Option<Box<dyn Runtime>>;

    /// Whether the factory recognizes the (canonical) language name.
    ///
    /// Used by the evaluator to decide if a bare identifier denotes a
    /// language rather than a variable.
    fn supports(&self, language: &str) -> bool;
}

/// Lazily-populated cache of initialized runtime handles.
///
/// Creation uses double-checked locking: a read-locked lookup, then a
/// re-check under the write lock before the factory runs. Handles live for
/// the registry's lifetime; the engine never destroys them implicitly.
pub struct RuntimeRegistry {
    factory: Box<dyn RuntimeFactory>,
    cache: RwLock<AHashMap<String, RuntimeHandle>>,
}

impl std::fmt::Debug for RuntimeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let cache = self.cache.read().expect("runtime cache lock poisoned");
        f.debug_struct("RuntimeRegistry")
            .field("languages", &cache.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl RuntimeRegistry {
    #[must_use]
    pub fn new(factory: Box<dyn RuntimeFactory>) -> Self {
        Self {
            factory,
            cache: RwLock::new(AHashMap::new()),
        }
    }

    /// Whether `name` (alias or canonical) denotes a known language.
    #[must_use]
    pub fn is_language(&self, name: &str) -> bool {
        let canonical = canonical_language(name);
        if self.factory.supports(canonical) {
            return true;
        }
        let cache = self.cache.read().expect("runtime cache lock poisoned");
        cache.contains_key(canonical)
    }

    /// Returns the handle for a language, creating and initializing the
    /// runtime on first reference.
    pub fn get_or_create(&self, language: &str) -> RunResult<RuntimeHandle> {
        let canonical = canonical_language(language);
        {
            let cache = self.cache.read().expect("runtime cache lock poisoned");
            if let Some(handle) = cache.get(canonical) {
                return Ok(handle.clone());
            }
        }
        let mut cache = self.cache.write().expect("runtime cache lock poisoned");
        // Re-check: another thread may have created it between the locks.
        if let Some(handle) = cache.get(canonical) {
            return Ok(handle.clone());
        }
        let mut runtime = self.factory.create(canonical).ok_or_else(|| {
            EngineError::system(
                ErrorCode::RuntimeUnavailable,
                format!("no runtime available for language '{canonical}'"),
            )
        })?;
        runtime
            .initialize()
            .map_err(|e| e.into_engine_error(canonical))?;
        let handle = RuntimeHandle::new(canonical, runtime);
        cache.insert(canonical.to_owned(), handle.clone());
        Ok(handle)
    }

    /// Already-created handles that report ready, for the unqualified
    /// variable scan. Ordered by language name so the scan is
    /// deterministic.
    #[must_use]
    pub fn ready_handles(&self) -> Vec<RuntimeHandle> {
        let cache = self.cache.read().expect("runtime cache lock poisoned");
        let mut handles: Vec<RuntimeHandle> = cache.values().filter(|h| h.is_ready()).cloned().collect();
        handles.sort_by(|a, b| a.language().cmp(b.language()));
        handles
    }
}

/// In-process fallback runtime: a plain variable table plus a few
/// print-like built-ins.
///
/// Serves as the default backend for languages without a real embedding
/// (and as the test double). It cannot evaluate source, so code blocks and
/// the transpilation path fall back cleanly when they land here.
#[derive(Debug, Default)]
pub struct MemoryRuntime {
    variables: IndexMap<String, Value>,
    ready: bool,
}

impl MemoryRuntime {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Runtime for MemoryRuntime {
    fn is_ready(&self) -> bool {
        self.ready
    }

    fn initialize(&mut self) -> Result<(), RuntimeError> {
        self.ready = true;
        Ok(())
    }

    fn eval(&mut self, _code: &str) -> Result<Value, RuntimeError> {
        Err(RuntimeError::Failed("memory runtime cannot evaluate source".to_owned()))
    }

    fn execute_function(&mut self, name: &str, args: Vec<Value>) -> Result<Value, RuntimeError> {
        match name {
            "print" | "echo" => {
                let rendered: Vec<String> = args.iter().map(Value::display_string).collect();
                Ok(Value::PreFormatted(rendered.join(" ")))
            }
            "len" => match args.as_slice() {
                [Value::Str(s) | Value::PreFormatted(s)] => Ok(Value::Int(s.chars().count() as i64)),
                [Value::List(items)] => Ok(Value::Int(items.len() as i64)),
                [Value::Map(map)] => Ok(Value::Int(map.len() as i64)),
                [Value::Bytes(bytes)] => Ok(Value::Int(bytes.len() as i64)),
                [other] => Err(RuntimeError::WrongArgument(format!(
                    "len() does not support {}",
                    other.type_name()
                ))),
                _ => Err(RuntimeError::WrongArgument(format!(
                    "len() takes exactly 1 argument, got {}",
                    args.len()
                ))),
            },
            _ => Err(RuntimeError::FunctionNotFound(name.to_owned())),
        }
    }

    fn get_variable(&mut self, name: &str) -> Result<Value, RuntimeError> {
        self.variables
            .get(name)
            .cloned()
            .ok_or_else(|| RuntimeError::VariableNotFound(name.to_owned()))
    }

    fn set_variable(&mut self, name: &str, value: Value) -> Result<(), RuntimeError> {
        self.variables.insert(name.to_owned(), value);
        Ok(())
    }

    fn get_all_variables(&mut self) -> Option<IndexMap<String, Value>> {
        Some(self.variables.clone())
    }
}

/// Factory handing out [`MemoryRuntime`]s for a fixed set of languages.
#[derive(Debug)]
pub struct MemoryFactory {
    languages: Vec<String>,
}

impl MemoryFactory {
    /// Supports the three canonical languages of the orchestrator.
    #[must_use]
    pub fn new() -> Self {
        Self::with_languages(&["python", "node", "lua"])
    }

    #[must_use]
    pub fn with_languages(languages: &[&str]) -> Self {
        Self {
            languages: languages.iter().map(|l| canonical_language(l).to_owned()).collect(),
        }
    }
}

impl Default for MemoryFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl RuntimeFactory for MemoryFactory {
    fn create(&self, language: &str) -> Option<Box<dyn Runtime>> {
        self.supports(language).then(|| Box::new(MemoryRuntime::new()) as Box<dyn Runtime>)
    }

    fn supports(&self, language: &str) -> bool {
        self.languages.iter().any(|l| l == language)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aliases_canonicalize() {
        assert_eq!(canonical_language("py"), "python");
        assert_eq!(canonical_language("js"), "node");
        assert_eq!(canonical_language("lua"), "lua");
        assert_eq!(canonical_language("python"), "python");
    }

    #[test]
    fn registry_creates_once_and_reuses() {
        let registry = RuntimeRegistry::new(Box::new(MemoryFactory::new()));
        let first = registry.get_or_create("py").unwrap();
        first.set_variable("x", Value::Int(7)).unwrap();
        // Alias and canonical name resolve to the same initialized handle.
        let second = registry.get_or_create("python").unwrap();
        assert_eq!(second.get_variable("x").unwrap(), Value::Int(7));
        assert!(second.is_ready());
    }

    #[test]
    fn unknown_language_is_a_system_error() {
        let registry = RuntimeRegistry::new(Box::new(MemoryFactory::new()));
        let err = registry.get_or_create("cobol").unwrap_err();
        assert_eq!(err.code, ErrorCode::RuntimeUnavailable);
        assert!(!err.is_user());
    }

    #[test]
    fn memory_runtime_print_preformats() {
        let mut runtime = MemoryRuntime::new();
        runtime.initialize().unwrap();
        let out = runtime
            .execute_function("print", vec![Value::Int(1), Value::Str("a".into())])
            .unwrap();
        assert_eq!(out, Value::PreFormatted("1 a".into()));
    }
}
