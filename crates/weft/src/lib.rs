#![doc = include_str!("../../../README.md")]

pub mod ast;

mod assign;
mod bitstring;
mod block;
mod control;
mod error;
mod eval;
mod jobs;
mod pattern;
mod resource;
mod run;
mod runtime;
mod scope;
mod shared;
mod tracer;
mod transpile;
mod value;

pub use crate::{
    bitstring::{Bitstring, BitstringBuilder},
    error::{EngineError, ErrorCode, ErrorKind, RunResult},
    jobs::{JobId, JobManager, ThreadJobManager},
    resource::{CancelToken, ResourceLimits},
    run::Engine,
    runtime::{
        MemoryFactory, MemoryRuntime, Runtime, RuntimeError, RuntimeFactory, RuntimeHandle, RuntimeRegistry,
        canonical_language,
    },
    scope::VariableInfo,
    shared::{GlobalVariables, SharedVariables},
    tracer::{EngineTracer, NoopTracer, RecordingTracer, StderrTracer, TraceEvent},
    value::Value,
};
