//! The assignment engine.
//!
//! Three shapes: qualified simple writes, single-level indexed writes, and
//! deep nested indexed writes. Indexed writes never partially commit - the
//! root value is rebuilt copy-on-write and replaces the variable atomically,
//! or nothing happens. Missing intermediate containers are materialized
//! from the shape of the next path segment (string key makes a map, numeric
//! index makes a list), and lists auto-expand with `Null` fill.

use indexmap::IndexMap;

use crate::ast::{CodeRange, Expr, ExprLoc, Identifier};
use crate::error::{EngineError, ErrorCode, ExecError, ExecResult};
use crate::run::Engine;
use crate::scope::VariableInfo;
use crate::value::{Numeric, Value};

/// One evaluated step of an index/field chain.
#[derive(Debug, Clone)]
enum PathStep {
    Key(String),
    Index(usize),
}

/// Where an unqualified root variable lives, so the rebuilt value can be
/// written back through the same channel it was read from.
enum RootSlot {
    Scope,
    Global,
    /// The variable does not exist yet; create it here on commit.
    NewGlobal,
    NewLocal,
}

impl Engine {
    /// `target = value`, including `lang.target = value`.
    ///
    /// Qualified writes go to the runtime (tolerating its soft
    /// `VARIABLE_NOT_FOUND`) and are mirrored to the shared store.
    /// Unqualified top-level writes land in the global table; writes inside
    /// a block stay in scope. Returns the assigned value.
    pub(crate) fn exec_assignment(
        &mut self,
        target: &Identifier,
        value_expr: &ExprLoc,
        constant: bool,
        position: CodeRange,
    ) -> ExecResult<Value> {
        let value = self.eval_expr(value_expr)?;
        if target.qualified {
            let Some(language) = target.language.as_deref() else {
                return Err(EngineError::system(
                    ErrorCode::Internal,
                    format!("qualified target '{}' carries no language", target.name),
                )
                .at(position)
                .into());
            };
            let language = language.to_owned();
            self.write_qualified(&language, &target.name, &value, position)?;
            return Ok(value);
        }

        if constant {
            if self.scopes.depth() == 1 {
                self.globals.set_with_mutability(&target.name, value.clone(), false);
            } else {
                self.scopes.set_local(&target.name, VariableInfo::immutable(value.clone()));
            }
            return Ok(value);
        }

        if self.scopes.contains(&target.name) {
            if !self.scopes.set(&target.name, value.clone()) {
                return Err(immutable_error(&target.name, position));
            }
        } else if self.globals.get(&target.name).is_some() || self.scopes.depth() == 1 {
            if !self.globals.set(&target.name, value.clone()) {
                return Err(immutable_error(&target.name, position));
            }
        } else {
            self.scopes.set(&target.name, value.clone());
        }
        Ok(value)
    }

    /// Indexed assignment: `a[i] = v`, `a.f[j].k = v`, and deeper.
    ///
    /// The chain of index operands and the root variable are extracted
    /// without pre-evaluating intermediate objects, so writes can create
    /// missing intermediates.
    pub(crate) fn exec_index_assignment(
        &mut self,
        target: &ExprLoc,
        value_expr: &ExprLoc,
        position: CodeRange,
    ) -> ExecResult<Value> {
        let (root, steps) = self.extract_chain(target)?;
        if steps.is_empty() {
            return Err(EngineError::user(
                ErrorCode::IndexedAssignment,
                "assignment target has no index path",
            )
            .at(position)
            .into());
        }
        let value = self.eval_expr(value_expr)?;

        if root.qualified {
            let Some(language) = root.language.clone() else {
                return Err(EngineError::system(
                    ErrorCode::Internal,
                    format!("qualified target '{}' carries no language", root.name),
                )
                .at(position)
                .into());
            };
            // Qualified roots that do not exist yet are materialized from
            // the first path step, matching intermediate materialization.
            let current = self.read_qualified(&language, &root.name, position).ok();
            let rebuilt = write_path(current, &steps, value.clone(), position)?;
            self.write_qualified(&language, &root.name, &rebuilt, position)?;
            return Ok(value);
        }

        let (current, slot) = self.read_unqualified_root(&root, position)?;
        let rebuilt = write_path(current, &steps, value.clone(), position)?;
        match slot {
            RootSlot::Scope => {
                if !self.scopes.set(&root.name, rebuilt) {
                    return Err(immutable_error(&root.name, position));
                }
            }
            RootSlot::Global | RootSlot::NewGlobal => {
                if !self.globals.set(&root.name, rebuilt) {
                    return Err(immutable_error(&root.name, position));
                }
            }
            RootSlot::NewLocal => {
                self.scopes.set(&root.name, rebuilt);
            }
        }
        Ok(value)
    }

    /// Reads an unqualified root for indexed assignment, enforcing
    /// mutability before any side effect.
    fn read_unqualified_root(
        &mut self,
        root: &Identifier,
        position: CodeRange,
    ) -> ExecResult<(Option<Value>, RootSlot)> {
        if let Some(info) = self.scopes.get(&root.name) {
            if !info.is_mutable {
                return Err(immutable_error(&root.name, position));
            }
            return Ok((Some(info.value.clone()), RootSlot::Scope));
        }
        if let Some(info) = self.globals.get(&root.name) {
            if !info.is_mutable {
                return Err(immutable_error(&root.name, position));
            }
            return Ok((Some(info.value), RootSlot::Global));
        }
        if self.scopes.depth() == 1 {
            Ok((None, RootSlot::NewGlobal))
        } else {
            Ok((None, RootSlot::NewLocal))
        }
    }

    /// Walks an index/field chain down to its root identifier, evaluating
    /// the index operands (outermost last) but not the containers.
    fn extract_chain(&mut self, target: &ExprLoc) -> ExecResult<(Identifier, Vec<PathStep>)> {
        let mut reversed: Vec<PathStep> = vec![];
        let mut current = target;
        loop {
            match &current.expr {
                Expr::Index { object, index } => {
                    let index_value = self.eval_expr(index)?;
                    reversed.push(index_step(&index_value, index.position)?);
                    current = object;
                }
                Expr::FieldAccess { object, field } => {
                    reversed.push(PathStep::Key(field.clone()));
                    current = object;
                }
                Expr::Identifier(identifier) => {
                    let mut identifier = identifier.clone();
                    // Multi-segment qualifiers fold their path into the
                    // chain: `py.d.users[0]` roots at `py.d`.
                    if identifier.qualified && !identifier.path.is_empty() {
                        let mut segments = std::mem::take(&mut identifier.path);
                        reversed.push(PathStep::Key(std::mem::replace(
                            &mut identifier.name,
                            segments.remove(0),
                        )));
                        for segment in segments.into_iter().rev() {
                            reversed.push(PathStep::Key(segment));
                        }
                    }
                    reversed.reverse();
                    return Ok((identifier, reversed));
                }
                _ => {
                    return Err(EngineError::user(
                        ErrorCode::IndexedAssignment,
                        "assignment target must be a variable with index or field accesses",
                    )
                    .at(current.position)
                    .into());
                }
            }
        }
    }
}

fn immutable_error(name: &str, position: CodeRange) -> ExecError {
    EngineError::user(
        ErrorCode::ImmutableVariable,
        format!("cannot assign to immutable variable '{name}'"),
    )
    .at(position)
    .into()
}

/// Converts an evaluated index operand to a path step: strings key into
/// maps, non-negative integers index into lists.
fn index_step(index: &Value, position: CodeRange) -> ExecResult<PathStep> {
    match index {
        Value::Str(key) | Value::PreFormatted(key) => Ok(PathStep::Key(key.clone())),
        other => match other.as_numeric() {
            Some(Numeric::Int(i)) if i >= 0 => Ok(PathStep::Index(i as usize)),
            Some(Numeric::Int(i)) => Err(EngineError::user(
                ErrorCode::IndexedAssignment,
                format!("negative index {i} in assignment target"),
            )
            .at(position)
            .into()),
            _ => Err(EngineError::user(
                ErrorCode::IndexedAssignment,
                format!("index must be a string or integer, got {}", other.type_name()),
            )
            .at(position)
            .into()),
        },
    }
}

/// Rebuilds a value along the path, copy-on-write.
///
/// `current` of `None` (or `Null`) materializes a container matching the
/// step type. The rebuilt value is returned; nothing is written anywhere
/// until the whole path succeeds.
fn write_path(current: Option<Value>, steps: &[PathStep], leaf: Value, position: CodeRange) -> ExecResult<Value> {
    let Some((step, rest)) = steps.split_first() else {
        return Ok(leaf);
    };
    match step {
        PathStep::Key(key) => {
            let mut map = match current {
                None | Some(Value::Null) => IndexMap::new(),
                Some(Value::Map(map)) => map,
                Some(other) => {
                    return Err(EngineError::user(
                        ErrorCode::IndexedAssignment,
                        format!("cannot write key '{key}' into {}", other.type_name()),
                    )
                    .at(position)
                    .into());
                }
            };
            let child = map.get(key).cloned();
            let rebuilt = write_path(child, rest, leaf, position)?;
            map.insert(key.clone(), rebuilt);
            Ok(Value::Map(map))
        }
        PathStep::Index(index) => {
            let mut list = match current {
                None | Some(Value::Null) => vec![],
                Some(Value::List(list)) => list,
                Some(other) => {
                    return Err(EngineError::user(
                        ErrorCode::IndexedAssignment,
                        format!("cannot write index {index} into {}", other.type_name()),
                    )
                    .at(position)
                    .into());
                }
            };
            if *index >= list.len() {
                list.resize(*index + 1, Value::Null);
            }
            let child = std::mem::replace(&mut list[*index], Value::Null);
            let existing = if child == Value::Null { None } else { Some(child) };
            let rebuilt = write_path(existing, rest, leaf, position)?;
            list[*index] = rebuilt;
            Ok(Value::List(list))
        }
    }
}
