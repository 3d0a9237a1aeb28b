//! Expression evaluation.
//!
//! Converts syntax-tree expressions into values against the current scope
//! chain, the global table, the shared store, and the runtime registry.
//! Every failure is positioned at the offending node.

use indexmap::IndexMap;
use num_bigint::BigInt;
use num_integer::Integer;
use num_traits::{ToPrimitive, Zero};
use smallvec::SmallVec;

use crate::ast::{Argument, BitstringSegment, CodeRange, Expr, ExprLoc, Identifier, Literal, Operator, UnaryOperator};
use crate::bitstring::BitstringBuilder;
use crate::error::{EngineError, ErrorCode, ExecError, ExecResult};
use crate::run::Engine;
use crate::runtime::{RuntimeError, canonical_language};
use crate::tracer::TraceEvent;
use crate::value::{Numeric, Value};

impl Engine {
    /// Evaluates an expression to a value.
    pub(crate) fn eval_expr(&mut self, expr: &ExprLoc) -> ExecResult<Value> {
        let position = expr.position;
        match &expr.expr {
            Expr::Literal(literal) => Ok(literal_value(literal)),
            Expr::Identifier(identifier) => self.eval_identifier(identifier),
            Expr::FieldAccess { object, field } => self.eval_field_access(object, field, position),
            Expr::Index { object, index } => {
                let object = self.eval_expr(object)?;
                let index = self.eval_expr(index)?;
                self.index_value(&object, &index, position)
            }
            Expr::Unary { op, operand } => {
                let value = self.eval_expr(operand)?;
                eval_unary(*op, &value, position)
            }
            Expr::Binary { left, op, right } => self.eval_binary(left, *op, right, position),
            Expr::Elvis { value, fallback } => {
                let value = self.eval_expr(value)?;
                if value.is_truthy() { Ok(value) } else { self.eval_expr(fallback) }
            }
            Expr::Ternary {
                condition,
                truthy,
                falsy,
            } => {
                let condition = self.eval_expr(condition)?;
                if condition.is_truthy() {
                    self.eval_expr(truthy)
                } else {
                    self.eval_expr(falsy)
                }
            }
            Expr::Pipe { value, call } => {
                let piped = self.eval_expr(value)?;
                let Expr::LanguageCall { language, function, args } = &call.expr else {
                    return Err(EngineError::user(
                        ErrorCode::Type,
                        "right-hand side of |> must be a language call",
                    )
                    .at(call.position)
                    .into());
                };
                self.eval_language_call(language, function, args, Some(piped), call.position)
            }
            Expr::LanguageCall { language, function, args } => {
                self.eval_language_call(language, function, args, None, position)
            }
            Expr::Array(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    out.push(self.eval_expr(item)?);
                }
                Ok(Value::List(out))
            }
            Expr::Object(entries) => {
                let mut out = IndexMap::with_capacity(entries.len());
                for (key, value) in entries {
                    out.insert(key.clone(), self.eval_expr(value)?);
                }
                Ok(Value::Map(out))
            }
            Expr::Bitstring(segments) => self.build_bitstring(segments),
            Expr::PatternMatch { pattern, value } => {
                let value = self.eval_expr(value)?;
                match self.match_pattern(pattern, &value)? {
                    Some(bindings) => {
                        self.apply_bindings(&bindings, position)?;
                        Ok(Value::Bool(true))
                    }
                    None => Ok(Value::Bool(false)),
                }
            }
        }
    }

    /// Resolves an identifier per the lookup rules: scope chain, globals,
    /// loop-language runtime, then any ready runtime for unqualified names;
    /// shared store then owning runtime for qualified ones.
    pub(crate) fn eval_identifier(&mut self, identifier: &Identifier) -> ExecResult<Value> {
        let position = identifier.position;
        if identifier.qualified {
            let Some(language) = identifier.language.as_deref() else {
                return Err(EngineError::system(
                    ErrorCode::Internal,
                    format!("qualified identifier '{}' carries no language", identifier.name),
                )
                .at(position)
                .into());
            };
            // `py.data.users` reads `data` from the runtime, then walks the
            // remaining segments as map fields.
            let (root, fields) = match identifier.path.split_first() {
                Some((root, rest)) => {
                    let mut fields: Vec<&str> = rest.iter().map(String::as_str).collect();
                    fields.push(&identifier.name);
                    (root.as_str(), fields)
                }
                None => (identifier.name.as_str(), vec![]),
            };
            let mut value = self.read_qualified(language, root, position)?;
            for field in fields {
                value = map_field(&value, field, position)?;
            }
            Ok(value)
        } else {
            self.resolve_unqualified(&identifier.name, position)
        }
    }

    fn resolve_unqualified(&mut self, name: &str, position: CodeRange) -> ExecResult<Value> {
        if let Some(info) = self.scopes.get(name) {
            return Ok(info.value.clone());
        }
        if let Some(info) = self.globals.get(name) {
            return Ok(info.value);
        }
        // The current loop's language gets first shot at the name before the
        // general scan over ready runtimes.
        if let Some(language) = self.loop_language.clone()
            && let Ok(handle) = self.registry.get_or_create(&language)
            && let Ok(value) = handle.get_variable(name)
        {
            return Ok(value);
        }
        for handle in self.registry.ready_handles() {
            if let Ok(value) = handle.get_variable(name) {
                return Ok(value);
            }
        }
        Err(EngineError::user(ErrorCode::VariableNotFound, format!("variable '{name}' not found"))
            .at(position)
            .into())
    }

    /// Qualified read: shared store first, then the runtime handle.
    pub(crate) fn read_qualified(&mut self, language: &str, name: &str, position: CodeRange) -> ExecResult<Value> {
        let canonical = canonical_language(language);
        if let Some(value) = self.shared.get(canonical, name) {
            return Ok(value);
        }
        let handle = self
            .registry
            .get_or_create(canonical)
            .map_err(|e| ExecError::Raise(e.at(position)))?;
        match handle.get_variable(name) {
            Ok(value) => Ok(value),
            Err(e) if e.is_system() => Err(ExecError::Raise(e.into_engine_error(canonical).at(position))),
            Err(_) => Err(EngineError::user(
                ErrorCode::VariableNotFound,
                format!("variable '{canonical}.{name}' not found"),
            )
            .at(position)
            .into()),
        }
    }

    /// Qualified write: the runtime first (tolerating its soft
    /// `VARIABLE_NOT_FOUND`), then the shared store mirror.
    pub(crate) fn write_qualified(
        &mut self,
        language: &str,
        name: &str,
        value: &Value,
        position: CodeRange,
    ) -> ExecResult<()> {
        let canonical = canonical_language(language).to_owned();
        let handle = self
            .registry
            .get_or_create(&canonical)
            .map_err(|e| ExecError::Raise(e.at(position)))?;
        match handle.set_variable(name, value.clone()) {
            Ok(()) | Err(RuntimeError::VariableNotFound(_)) => {}
            Err(e) => return Err(ExecError::Raise(e.into_engine_error(&canonical).at(position))),
        }
        self.shared.set(&canonical, name, value.clone());
        Ok(())
    }

    fn eval_field_access(&mut self, object: &ExprLoc, field: &str, position: CodeRange) -> ExecResult<Value> {
        // A bare identifier naming a language turns `lang.f` into a
        // qualified variable read.
        if let Expr::Identifier(identifier) = &object.expr
            && !identifier.qualified
            && identifier.path.is_empty()
            && self.registry.is_language(&identifier.name)
        {
            return self.read_qualified(&identifier.name, field, position);
        }
        let value = self.eval_expr(object)?;
        map_field(&value, field, position)
    }

    /// Index access with the match-friendly out-of-range policy.
    pub(crate) fn index_value(&mut self, object: &Value, index: &Value, position: CodeRange) -> ExecResult<Value> {
        match object {
            Value::Map(map) => match index {
                Value::Str(key) | Value::PreFormatted(key) => map.get(key).cloned().ok_or_else(|| {
                    EngineError::user(ErrorCode::Index, format!("key '{key}' not found in map"))
                        .at(position)
                        .into()
                }),
                other => Err(EngineError::user(
                    ErrorCode::Index,
                    format!("map index must be a string, got {}", other.type_name()),
                )
                .at(position)
                .into()),
            },
            Value::List(items) => {
                let i = integer_index(index, position)?;
                Ok(items.get(i).cloned().unwrap_or(Value::Null))
            }
            Value::Bytes(bytes) => {
                let i = integer_index(index, position)?;
                Ok(bytes.get(i).map_or(Value::Null, |b| Value::Int(i64::from(*b))))
            }
            Value::Bitstring(bits) => {
                let i = integer_index(index, position)?;
                Ok(bits.byte_at(i).map_or(Value::Null, |b| Value::Int(i64::from(b))))
            }
            other => Err(EngineError::user(
                ErrorCode::Type,
                format!("{} is not indexable", other.type_name()),
            )
            .at(position)
            .into()),
        }
    }

    fn eval_binary(&mut self, left: &ExprLoc, op: Operator, right: &ExprLoc, position: CodeRange) -> ExecResult<Value> {
        match op {
            Operator::And => {
                let left = self.eval_expr(left)?;
                if left.is_truthy() { self.eval_expr(right) } else { Ok(left) }
            }
            Operator::Or => {
                let left = self.eval_expr(left)?;
                if left.is_truthy() { Ok(left) } else { self.eval_expr(right) }
            }
            Operator::Assign | Operator::AssignDeclare => Err(EngineError::user(
                ErrorCode::Type,
                "assignment is not valid in expression position",
            )
            .at(position)
            .into()),
            _ => {
                let left = self.eval_expr(left)?;
                let right = self.eval_expr(right)?;
                binary_op(&left, op, &right, position)
            }
        }
    }

    /// Dispatches a function call to a language runtime.
    ///
    /// `eval` is special-cased to take a single source string. When any
    /// argument is named, the whole argument set is packaged as one
    /// `{positional, keyword}` composite value.
    pub(crate) fn eval_language_call(
        &mut self,
        language: &str,
        function: &str,
        args: &[Argument],
        piped: Option<Value>,
        position: CodeRange,
    ) -> ExecResult<Value> {
        let canonical = canonical_language(language).to_owned();
        let handle = self
            .registry
            .get_or_create(&canonical)
            .map_err(|e| ExecError::Raise(e.at(position)))?;
        if !handle.is_ready() {
            return Err(
                EngineError::system(ErrorCode::RuntimeNotReady, format!("runtime '{canonical}' is not ready"))
                    .at(position)
                    .into(),
            );
        }
        self.tracer.record(TraceEvent::Dispatch {
            language: canonical.clone(),
            function: function.to_owned(),
        });

        if function == "eval" {
            let [argument] = args else {
                return Err(EngineError::user(
                    ErrorCode::WrongArgument,
                    format!("{canonical}.eval takes exactly 1 argument, got {}", args.len()),
                )
                .at(position)
                .into());
            };
            let code = match self.eval_expr(&argument.value)? {
                Value::Str(code) | Value::PreFormatted(code) => code,
                other => {
                    return Err(EngineError::user(
                        ErrorCode::WrongArgument,
                        format!("{canonical}.eval requires a string, got {}", other.type_name()),
                    )
                    .at(position)
                    .into());
                }
            };
            return handle
                .eval(&code)
                .map_err(|e| ExecError::Raise(e.into_engine_error(&canonical).at(position)));
        }

        let call_args = self.convert_arguments(args, piped)?;
        handle
            .execute_function(function, call_args)
            .map_err(|e| ExecError::Raise(e.into_engine_error(&canonical).at(position)))
    }

    fn convert_arguments(&mut self, args: &[Argument], piped: Option<Value>) -> ExecResult<Vec<Value>> {
        let has_named = args.iter().any(|a| a.name.is_some());
        let mut positional: SmallVec<[Value; 4]> = SmallVec::new();
        if let Some(piped) = piped {
            positional.push(piped);
        }
        if !has_named {
            for argument in args {
                positional.push(self.eval_expr(&argument.value)?);
            }
            return Ok(positional.into_vec());
        }
        let mut keyword = IndexMap::new();
        for argument in args {
            let value = self.eval_expr(&argument.value)?;
            match &argument.name {
                Some(name) => {
                    keyword.insert(name.clone(), value);
                }
                None => positional.push(value),
            }
        }
        let mut composite = IndexMap::with_capacity(2);
        composite.insert("positional".to_owned(), Value::List(positional.into_vec()));
        composite.insert("keyword".to_owned(), Value::Map(keyword));
        Ok(vec![Value::Map(composite)])
    }

    /// Evaluates a bitstring construction expression through the codec.
    pub(crate) fn build_bitstring(&mut self, segments: &[BitstringSegment]) -> ExecResult<Value> {
        let mut builder = BitstringBuilder::new();
        for segment in segments {
            let position = segment.value.position;
            let value = self.eval_expr(&segment.value)?;
            let size_bits = self.resolve_segment_size(segment)?;
            builder
                .push_segment(
                    &value,
                    size_bits,
                    segment.specifiers.segment_type,
                    segment.specifiers.endianness,
                )
                .map_err(|message| EngineError::user(ErrorCode::Bitstring, message).at(position))?;
        }
        Ok(Value::Bitstring(builder.finish()))
    }

    /// Resolves a segment's size in bits, from its literal size or its size
    /// expression; `None` means unspecified.
    pub(crate) fn resolve_segment_size(&mut self, segment: &BitstringSegment) -> ExecResult<Option<usize>> {
        let unit = segment.specifiers.effective_unit();
        if let Some(size) = segment.size {
            return Ok(Some((size * unit) as usize));
        }
        let Some(size_expression) = &segment.size_expression else {
            return Ok(None);
        };
        let position = size_expression.position;
        let value = self.eval_expr(size_expression)?;
        let size = match value.as_numeric() {
            Some(Numeric::Int(i)) if i >= 0 => i as u64,
            Some(Numeric::Big(b)) => b.to_u64().ok_or_else(|| {
                ExecError::from(
                    EngineError::user(ErrorCode::Bitstring, "segment size is out of range").at(position),
                )
            })?,
            _ => {
                return Err(EngineError::user(
                    ErrorCode::Bitstring,
                    format!("segment size must be a non-negative integer, got {}", value.type_name()),
                )
                .at(position)
                .into());
            }
        };
        Ok(Some((size * unit) as usize))
    }
}

/// Converts a literal node to its value.
pub(crate) fn literal_value(literal: &Literal) -> Value {
    match literal {
        Literal::Null => Value::Null,
        Literal::Bool(b) => Value::Bool(*b),
        Literal::Int(i) => Value::Int(*i),
        Literal::BigInt(b) => normalize_bigint(b.clone()),
        Literal::Float(f) => Value::Float(*f),
        Literal::Str(s) => Value::Str(s.clone()),
    }
}

/// Shrinks a `BigInt` back to `Int` when it fits.
pub(crate) fn normalize_bigint(value: BigInt) -> Value {
    value.to_i64().map_or(Value::BigInt(value), Value::Int)
}

fn map_field(value: &Value, field: &str, position: CodeRange) -> ExecResult<Value> {
    match value {
        Value::Map(map) => map.get(field).cloned().ok_or_else(|| {
            EngineError::user(ErrorCode::FieldAccess, format!("field '{field}' not found"))
                .at(position)
                .into()
        }),
        other => Err(EngineError::user(
            ErrorCode::FieldAccess,
            format!("cannot access field '{field}' on {}", other.type_name()),
        )
        .at(position)
        .into()),
    }
}

/// Coerces an index value to a non-negative element index.
fn integer_index(index: &Value, position: CodeRange) -> ExecResult<usize> {
    let failure = |detail: String| -> ExecError {
        EngineError::user(ErrorCode::Index, detail).at(position).into()
    };
    let i = match index.as_numeric() {
        Some(Numeric::Int(i)) => i,
        Some(Numeric::Big(b)) => b
            .to_i64()
            .ok_or_else(|| failure("index out of representable range".to_owned()))?,
        Some(Numeric::Float(f)) if f.fract() == 0.0 => f as i64,
        _ => return Err(failure(format!("index must be an integer, got {}", index.type_name()))),
    };
    usize::try_from(i).map_err(|_| failure(format!("negative index {i}")))
}

fn eval_unary(op: UnaryOperator, value: &Value, position: CodeRange) -> ExecResult<Value> {
    match op {
        UnaryOperator::Not => Ok(Value::Bool(!value.is_truthy())),
        UnaryOperator::Neg => match value.as_numeric() {
            Some(Numeric::Int(i)) => Ok(i.checked_neg().map_or_else(
                || normalize_bigint(-BigInt::from(i)),
                Value::Int,
            )),
            Some(Numeric::Big(b)) => Ok(normalize_bigint(-b)),
            Some(Numeric::Float(f)) => Ok(Value::Float(-f)),
            None => Err(EngineError::user(
                ErrorCode::Type,
                format!("cannot negate {}", value.type_name()),
            )
            .at(position)
            .into()),
        },
    }
}

/// Applies a non-short-circuiting binary operator.
pub(crate) fn binary_op(left: &Value, op: Operator, right: &Value, position: CodeRange) -> ExecResult<Value> {
    let type_error = |detail: String| -> ExecError {
        EngineError::user(ErrorCode::Type, detail).at(position).into()
    };
    match op {
        Operator::Eq => return Ok(Value::Bool(left.loose_eq(right))),
        Operator::NotEq => return Ok(Value::Bool(!left.loose_eq(right))),
        Operator::Lt | Operator::LtEq | Operator::Gt | Operator::GtEq => {
            let Some(ordering) = left.compare(right) else {
                return Err(type_error(format!(
                    "cannot compare {} with {}",
                    left.type_name(),
                    right.type_name()
                )));
            };
            let result = match op {
                Operator::Lt => ordering.is_lt(),
                Operator::LtEq => ordering.is_le(),
                Operator::Gt => ordering.is_gt(),
                Operator::GtEq => ordering.is_ge(),
                _ => unreachable!("filtered above"),
            };
            return Ok(Value::Bool(result));
        }
        _ => {}
    }

    // Non-numeric forms of `+` first: concatenation.
    if op == Operator::Add {
        match (left, right) {
            (Value::Str(a), Value::Str(b)) => return Ok(Value::Str(format!("{a}{b}"))),
            (Value::List(a), Value::List(b)) => {
                let mut out = a.clone();
                out.extend(b.iter().cloned());
                return Ok(Value::List(out));
            }
            (Value::Bytes(a), Value::Bytes(b)) => {
                let mut out = a.clone();
                out.extend_from_slice(b);
                return Ok(Value::Bytes(out));
            }
            _ => {}
        }
    }

    let (Some(a), Some(b)) = (left.as_numeric(), right.as_numeric()) else {
        return Err(type_error(format!(
            "unsupported operand types {} and {}",
            left.type_name(),
            right.type_name()
        )));
    };
    match op {
        Operator::Add => Ok(numeric_add(a, b)),
        Operator::Sub => Ok(numeric_sub(a, b)),
        Operator::Mul => Ok(numeric_mul(a, b)),
        Operator::Div => {
            let denominator = numeric_to_f64(&b);
            if denominator == 0.0 {
                return Err(type_error("division by zero".to_owned()));
            }
            Ok(Value::Float(numeric_to_f64(&a) / denominator))
        }
        Operator::Mod => numeric_mod(a, b).map_err(type_error),
        _ => unreachable!("comparison and logical operators handled above"),
    }
}

fn numeric_to_f64(n: &Numeric) -> f64 {
    match n {
        Numeric::Int(i) => *i as f64,
        Numeric::Big(b) => b.to_f64().unwrap_or(f64::NAN),
        Numeric::Float(f) => *f,
    }
}

fn numeric_add(a: Numeric, b: Numeric) -> Value {
    match (a, b) {
        (Numeric::Int(a), Numeric::Int(b)) => a
            .checked_add(b)
            .map_or_else(|| normalize_bigint(BigInt::from(a) + BigInt::from(b)), Value::Int),
        (Numeric::Float(a), b) => Value::Float(a + numeric_to_f64(&b)),
        (a, Numeric::Float(b)) => Value::Float(numeric_to_f64(&a) + b),
        (a, b) => normalize_bigint(numeric_to_big(a) + numeric_to_big(b)),
    }
}

fn numeric_sub(a: Numeric, b: Numeric) -> Value {
    match (a, b) {
        (Numeric::Int(a), Numeric::Int(b)) => a
            .checked_sub(b)
            .map_or_else(|| normalize_bigint(BigInt::from(a) - BigInt::from(b)), Value::Int),
        (Numeric::Float(a), b) => Value::Float(a - numeric_to_f64(&b)),
        (a, Numeric::Float(b)) => Value::Float(numeric_to_f64(&a) - b),
        (a, b) => normalize_bigint(numeric_to_big(a) - numeric_to_big(b)),
    }
}

fn numeric_mul(a: Numeric, b: Numeric) -> Value {
    match (a, b) {
        (Numeric::Int(a), Numeric::Int(b)) => a
            .checked_mul(b)
            .map_or_else(|| normalize_bigint(BigInt::from(a) * BigInt::from(b)), Value::Int),
        (Numeric::Float(a), b) => Value::Float(a * numeric_to_f64(&b)),
        (a, Numeric::Float(b)) => Value::Float(numeric_to_f64(&a) * b),
        (a, b) => normalize_bigint(numeric_to_big(a) * numeric_to_big(b)),
    }
}

/// Floored modulo on integers, `%` on floats.
fn numeric_mod(a: Numeric, b: Numeric) -> Result<Value, String> {
    if matches!(a, Numeric::Float(_)) || matches!(b, Numeric::Float(_)) {
        let divisor = numeric_to_f64(&b);
        if divisor == 0.0 {
            return Err("modulo by zero".to_owned());
        }
        return Ok(Value::Float(numeric_to_f64(&a) % divisor));
    }
    let (a, b) = (numeric_to_big(a), numeric_to_big(b));
    if b.is_zero() {
        return Err("modulo by zero".to_owned());
    }
    Ok(normalize_bigint(a.mod_floor(&b)))
}

fn numeric_to_big(n: Numeric) -> BigInt {
    match n {
        Numeric::Int(i) => BigInt::from(i),
        Numeric::Big(b) => b,
        Numeric::Float(f) => BigInt::from(f as i64),
    }
}
