//! Pattern matching over values.
//!
//! Matching is side-effect free: a successful match returns the bindings it
//! would create, and the caller decides where they land (scope, runtime,
//! shared store). Later bindings of a repeated name overwrite earlier ones.

use indexmap::IndexMap;

use crate::ast::{BitstringSegment, CodeRange, Expr, MatchArm, Pattern, SegmentType};
use crate::bitstring::Bitstring;
use crate::error::{EngineError, ErrorCode, ExecResult};
use crate::eval::literal_value;
use crate::run::Engine;
use crate::scope::VariableInfo;
use crate::value::Value;

/// One bound name, keeping the qualifier so the caller can route the write.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Binding {
    pub language: Option<String>,
    pub value: Value,
}

/// Ordered name-to-binding map collected during a match.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct Bindings {
    entries: IndexMap<String, Binding>,
}

impl Bindings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a binding; a repeated name overwrites.
    pub fn insert(&mut self, name: &str, language: Option<String>, value: Value) {
        self.entries.insert(name.to_owned(), Binding { language, value });
    }

    pub fn merge(&mut self, other: Self) {
        self.entries.extend(other.entries);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Binding)> {
        self.entries.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Engine {
    /// Matches a pattern against a value.
    ///
    /// Returns `Some(bindings)` on success, `None` on mismatch. Only size
    /// expressions inside bitstring patterns evaluate code; everything else
    /// is a pure structural walk.
    pub(crate) fn match_pattern(&mut self, pattern: &Pattern, value: &Value) -> ExecResult<Option<Bindings>> {
        match pattern {
            Pattern::Literal(literal) => {
                let expected = literal_value(literal);
                Ok(expected.loose_eq(value).then(Bindings::new))
            }
            Pattern::Wildcard => Ok(Some(Bindings::new())),
            Pattern::Variable(identifier) => {
                let mut bindings = Bindings::new();
                let language = identifier.qualified.then(|| identifier.language.clone()).flatten();
                bindings.insert(&identifier.name, language, value.clone());
                Ok(Some(bindings))
            }
            Pattern::Array(patterns) => {
                let Value::List(items) = value else {
                    return Ok(None);
                };
                if items.len() != patterns.len() {
                    return Ok(None);
                }
                let mut bindings = Bindings::new();
                for (pattern, item) in patterns.iter().zip(items) {
                    match self.match_pattern(pattern, item)? {
                        Some(inner) => bindings.merge(inner),
                        None => return Ok(None),
                    }
                }
                Ok(Some(bindings))
            }
            Pattern::Object(entries) => {
                let Value::Map(map) = value else {
                    return Ok(None);
                };
                if entries.is_empty() {
                    // An empty object pattern matches only empty maps.
                    return Ok(map.is_empty().then(Bindings::new));
                }
                let mut bindings = Bindings::new();
                for (key, sub_pattern) in entries {
                    if key == "_" {
                        // Existential key: some value in the map matches.
                        let mut found = false;
                        for candidate in map.values() {
                            if let Some(inner) = self.match_pattern(sub_pattern, candidate)? {
                                bindings.merge(inner);
                                found = true;
                                break;
                            }
                        }
                        if !found {
                            return Ok(None);
                        }
                    } else {
                        let Some(candidate) = map.get(key) else {
                            return Ok(None);
                        };
                        match self.match_pattern(sub_pattern, candidate)? {
                            Some(inner) => bindings.merge(inner),
                            None => return Ok(None),
                        }
                    }
                }
                Ok(Some(bindings))
            }
            Pattern::Bitstring(segments) => self.match_bitstring(segments, value),
        }
    }

    /// Matches a bitstring pattern, consuming the bit sequence left to
    /// right.
    ///
    /// Sizes come from segment literals or from size expressions evaluated
    /// in the current scope; expressions may reference variables bound by
    /// earlier segments of the same pattern. An unsized terminal
    /// binary/bits segment consumes the rest. Over- or under-consumption is
    /// a mismatch, not an error.
    pub(crate) fn match_bitstring(&mut self, segments: &[BitstringSegment], value: &Value) -> ExecResult<Option<Bindings>> {
        let Some(bits) = Bitstring::coerce(value) else {
            return Ok(None);
        };
        let mut bindings = Bindings::new();
        let mut offset = 0usize;
        for (i, segment) in segments.iter().enumerate() {
            let is_terminal = i + 1 == segments.len();
            let size_bits = self.resolve_pattern_size(segment, &bindings)?;
            let size_bits = match size_bits {
                Some(n) => n,
                None => {
                    let segment_type = segment.specifiers.segment_type;
                    if is_terminal && (segment_type.is_binary() || segment_type.is_bits()) {
                        let remaining = bits.bit_len() - offset;
                        if segment_type.is_binary() && remaining % 8 != 0 {
                            return Ok(None);
                        }
                        remaining
                    } else if segment_type == SegmentType::Float {
                        64
                    } else {
                        (8 * segment.specifiers.effective_unit()) as usize
                    }
                }
            };
            let decoded = bits.read_typed(
                offset,
                size_bits,
                segment.specifiers.segment_type,
                segment.specifiers.endianness,
                segment.specifiers.signedness,
            );
            let Ok((decoded, new_offset)) = decoded else {
                return Ok(None);
            };
            offset = new_offset;
            match &segment.value.expr {
                Expr::Identifier(identifier) if !is_ignored(&identifier.name) => {
                    let language = identifier.qualified.then(|| identifier.language.clone()).flatten();
                    bindings.insert(&identifier.name, language, decoded);
                }
                Expr::Identifier(_) => {}
                _ => {
                    // Literal (or computed) segment: compare for equality.
                    let expected = self.eval_expr(&segment.value)?;
                    if !expected.loose_eq(&decoded) {
                        return Ok(None);
                    }
                }
            }
        }
        if offset != bits.bit_len() {
            return Ok(None);
        }
        Ok(Some(bindings))
    }

    /// Resolves a pattern segment's size with earlier bindings visible to
    /// the size expression.
    fn resolve_pattern_size(&mut self, segment: &BitstringSegment, bindings: &Bindings) -> ExecResult<Option<usize>> {
        if segment.size.is_none() && segment.size_expression.is_some() && !bindings.is_empty() {
            self.scopes.push();
            for (name, binding) in bindings.iter() {
                self.scopes.set_local(name, VariableInfo::mutable(binding.value.clone()));
            }
            let result = self.resolve_segment_size(segment);
            self.scopes.pop();
            return result;
        }
        self.resolve_segment_size(segment)
    }

    /// Installs bindings: qualified names go to the owning runtime and the
    /// shared store, unqualified names to the current scope.
    pub(crate) fn apply_bindings(&mut self, bindings: &Bindings, position: CodeRange) -> ExecResult<()> {
        for (name, binding) in bindings.iter() {
            match &binding.language {
                Some(language) => self.write_qualified(language, name, &binding.value, position)?,
                None => self.scopes.set_local(name, VariableInfo::mutable(binding.value.clone())),
            }
        }
        Ok(())
    }

    /// Executes a `match` statement: first matching arm wins, its body runs
    /// in a fresh child scope holding the bindings, and the bindings are
    /// copied up to the enclosing scope on successful exit.
    pub(crate) fn exec_match(&mut self, value: &crate::ast::ExprLoc, arms: &[MatchArm], position: CodeRange) -> ExecResult<Value> {
        let subject = self.eval_expr(value)?;
        for arm in arms {
            let Some(bindings) = self.match_pattern(&arm.pattern, &subject)? else {
                continue;
            };
            self.push_scope(position)?;
            let result = self
                .apply_bindings(&bindings, position)
                .and_then(|()| self.exec_body(&arm.body));
            self.scopes.pop();
            let result = result?;
            // Later statements observe the arm's bindings; an immutable
            // local of the same name is left alone.
            for (name, binding) in bindings.iter() {
                if binding.language.is_none()
                    && self.scopes.get_local(name).is_none_or(|info| info.is_mutable)
                {
                    self.scopes.set_local(name, VariableInfo::mutable(binding.value.clone()));
                }
            }
            return Ok(result);
        }
        Err(EngineError::user(
            ErrorCode::NoPatternMatch,
            format!("no pattern matched {}", subject.repr()),
        )
        .at(position)
        .into())
    }
}

/// Wildcard-style names that match without binding.
fn is_ignored(name: &str) -> bool {
    name == "_"
}
