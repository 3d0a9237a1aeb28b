//! Lexical scope tree.
//!
//! Scopes form a stack of frames: the root frame is created with the engine
//! and never popped, every block/loop/arm pushes a child and pops it on all
//! exit paths. Each name carries its value plus a mutability flag.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::value::Value;

/// A named slot: the value and whether later writes are allowed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableInfo {
    pub value: Value,
    pub is_mutable: bool,
}

impl VariableInfo {
    #[must_use]
    pub fn mutable(value: Value) -> Self {
        Self { value, is_mutable: true }
    }

    #[must_use]
    pub fn immutable(value: Value) -> Self {
        Self { value, is_mutable: false }
    }
}

/// One frame of the scope stack, with insertion-ordered names.
#[derive(Debug, Default)]
struct Frame {
    vars: IndexMap<String, VariableInfo>,
}

/// The scope stack. Frame 0 is the root; the top frame is the current leaf
/// all lookups originate from.
#[derive(Debug)]
pub(crate) struct ScopeStack {
    frames: Vec<Frame>,
}

impl ScopeStack {
    /// Creates the stack with the root frame in place.
    pub fn new() -> Self {
        Self {
            frames: vec![Frame::default()],
        }
    }

    /// Current depth, root included.
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Pushes a child frame.
    pub fn push(&mut self) {
        self.frames.push(Frame::default());
    }

    /// Pops the current leaf.
    ///
    /// # Panics
    /// Panics when asked to pop the root frame; the executors pair every
    /// push with exactly one pop.
    pub fn pop(&mut self) {
        assert!(self.frames.len() > 1, "scope stack: attempted to pop the root frame");
        self.frames.pop();
    }

    /// Recursive lookup from the leaf toward the root.
    pub fn get(&self, name: &str) -> Option<&VariableInfo> {
        self.frames.iter().rev().find_map(|frame| frame.vars.get(name))
    }

    /// Leaf-only lookup.
    pub fn get_local(&self, name: &str) -> Option<&VariableInfo> {
        self.frames.last().and_then(|frame| frame.vars.get(name))
    }

    /// True when any frame defines the name.
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Writes to the nearest frame already defining `name`, creating the
    /// slot in the current leaf otherwise. Returns `false` when the target
    /// slot is immutable (and leaves it untouched).
    pub fn set(&mut self, name: &str, value: Value) -> bool {
        for frame in self.frames.iter_mut().rev() {
            if let Some(info) = frame.vars.get_mut(name) {
                if !info.is_mutable {
                    return false;
                }
                info.value = value;
                return true;
            }
        }
        self.set_local(name, VariableInfo::mutable(value));
        true
    }

    /// Creates or overwrites a slot in the current leaf with explicit
    /// mutability, shadowing any outer definition.
    pub fn set_local(&mut self, name: &str, info: VariableInfo) {
        if let Some(frame) = self.frames.last_mut() {
            frame.vars.insert(name.to_owned(), info);
        }
    }

    /// Clones the leaf frame's bindings in insertion order.
    pub fn get_all_local(&self) -> IndexMap<String, VariableInfo> {
        self.frames.last().map(|frame| frame.vars.clone()).unwrap_or_default()
    }
}
