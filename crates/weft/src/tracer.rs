//! Execution tracing hooks.
//!
//! The engine emits trace events at statement boundaries, runtime
//! dispatches, background submissions, and errors. Hosts choose a tracer:
//! [`NoopTracer`] for production, [`RecordingTracer`] for tests and
//! inspection, [`StderrTracer`] for quick diagnostics.

use crate::ast::CodeRange;
use crate::error::EngineError;

/// One observed execution event.
#[derive(Debug, Clone, PartialEq)]
pub enum TraceEvent {
    /// A statement began executing.
    Statement { kind: &'static str, position: CodeRange },
    /// A call was dispatched to a runtime.
    Dispatch { language: String, function: String },
    /// A background call was handed to the job manager.
    BackgroundSubmit { language: String, function: String },
    /// A whole block was transpiled and executed in one runtime call.
    TranspiledBlock { language: String, statements: usize },
    /// An error was raised (before any enclosing handler sees it).
    Error { code: String, message: String },
}

/// Receives trace events during execution.
pub trait EngineTracer: Send {
    fn record(&mut self, event: TraceEvent);
}

/// Discards all events. The default.
#[derive(Debug, Default)]
pub struct NoopTracer;

impl EngineTracer for NoopTracer {
    fn record(&mut self, _event: TraceEvent) {}
}

/// Keeps every event in memory for later inspection.
#[derive(Debug, Default)]
pub struct RecordingTracer {
    events: Vec<TraceEvent>,
}

impl RecordingTracer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn events(&self) -> &[TraceEvent] {
        &self.events
    }

    #[must_use]
    pub fn into_events(self) -> Vec<TraceEvent> {
        self.events
    }
}

impl EngineTracer for RecordingTracer {
    fn record(&mut self, event: TraceEvent) {
        self.events.push(event);
    }
}

/// Prints each event to stderr as it happens.
#[derive(Debug, Default)]
pub struct StderrTracer;

impl EngineTracer for StderrTracer {
    fn record(&mut self, event: TraceEvent) {
        match event {
            TraceEvent::Statement { kind, position } => eprintln!("[weft] stmt {kind} at {position}"),
            TraceEvent::Dispatch { language, function } => eprintln!("[weft] call {language}.{function}"),
            TraceEvent::BackgroundSubmit { language, function } => {
                eprintln!("[weft] background {language}.{function}");
            }
            TraceEvent::TranspiledBlock { language, statements } => {
                eprintln!("[weft] transpiled {statements} statements to {language}");
            }
            TraceEvent::Error { code, message } => eprintln!("[weft] error {code}: {message}"),
        }
    }
}

/// Builds the error event the engine records when a raise is observed.
pub(crate) fn error_event(error: &EngineError) -> TraceEvent {
    TraceEvent::Error {
        code: error.code.to_string(),
        message: error.message.clone(),
    }
}
