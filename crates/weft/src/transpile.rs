//! Python emission for homogeneous statement runs.
//!
//! When every statement in a block targets the Python runtime (and no
//! control flow beyond if/else appears), the block is emitted as Python
//! source and executed in a single `eval`, preserving the runtime's local
//! namespace and avoiding per-statement round-trips. Emission is strictly
//! conservative: anything without an exact source equivalent - a foreign
//! qualifier, an `eval` call, a loop - inhibits the path entirely, and the
//! caller falls back to per-statement execution.

use std::fmt::Write as _;

use crate::ast::{Argument, Expr, ExprLoc, Literal, Operator, Stmt, StmtLoc, UnaryOperator};
use crate::runtime::canonical_language;

/// Expression evaluated inside the Python runtime after a transpiled block
/// to capture its top-level variables: enumerates globals, filters system
/// and non-serializable entries, and returns them as a map.
pub(crate) const CAPTURE_HELPER: &str = "{__k: __v for __k, __v in globals().items() \
if not __k.startswith('_') \
and type(__v).__name__ in ('int', 'float', 'str', 'bool', 'list', 'dict', 'bytes', 'NoneType')}";

/// Names the evaluator treats as language designators in field position.
fn is_language_name(name: &str) -> bool {
    matches!(name, "py" | "python" | "js" | "node" | "lua")
}

fn is_python(language: &str) -> bool {
    canonical_language(language) == "python"
}

/// Emits Python source for the block, or `None` when any statement falls
/// outside the transpilation gate.
pub(crate) fn python_block_source(statements: &[StmtLoc]) -> Option<String> {
    // A single statement costs one round-trip either way; batching only
    // pays off from two statements up.
    if statements.len() < 2 {
        return None;
    }
    let mut out = String::new();
    for stmt in statements {
        let mut targets_python = false;
        emit_stmt(&mut out, stmt, 0, &mut targets_python)?;
        // Every statement must actually address the Python runtime; a
        // statement touching no runtime has no business being batched.
        if !targets_python {
            return None;
        }
    }
    Some(out)
}

fn emit_stmt(out: &mut String, stmt: &StmtLoc, indent: usize, targets_python: &mut bool) -> Option<()> {
    match &stmt.stmt {
        Stmt::Assignment { target, value, .. } => {
            if !target.qualified || !target.path.is_empty() {
                return None;
            }
            if !is_python(target.language.as_deref()?) {
                return None;
            }
            *targets_python = true;
            let value = emit_expr(value, targets_python)?;
            push_line(out, indent, &format!("{} = {value}", target.name));
            Some(())
        }
        Stmt::IndexAssignment { target, value } => {
            let target = emit_expr(target, targets_python)?;
            if !*targets_python {
                return None;
            }
            let value = emit_expr(value, targets_python)?;
            push_line(out, indent, &format!("{target} = {value}"));
            Some(())
        }
        Stmt::LanguageCall { call, background } => {
            if *background {
                return None;
            }
            let call = emit_expr(call, targets_python)?;
            push_line(out, indent, &call);
            Some(())
        }
        Stmt::Expression(expr) => {
            let expr = emit_expr(expr, targets_python)?;
            push_line(out, indent, &expr);
            Some(())
        }
        Stmt::If {
            condition,
            then_block,
            else_block,
        } => {
            let condition = emit_expr(condition, targets_python)?;
            push_line(out, indent, &format!("if {condition}:"));
            emit_block(out, then_block, indent + 1, targets_python)?;
            if let Some(else_block) = else_block {
                push_line(out, indent, "else:");
                emit_block(out, else_block, indent + 1, targets_python)?;
            }
            Some(())
        }
        // Any other statement kind - loops, match, break, code blocks -
        // inhibits whole-block execution.
        _ => None,
    }
}

fn emit_block(out: &mut String, statements: &[StmtLoc], indent: usize, targets_python: &mut bool) -> Option<()> {
    if statements.is_empty() {
        push_line(out, indent, "pass");
        return Some(());
    }
    for stmt in statements {
        emit_stmt(out, stmt, indent, targets_python)?;
    }
    Some(())
}

fn emit_expr(expr: &ExprLoc, targets_python: &mut bool) -> Option<String> {
    match &expr.expr {
        Expr::Literal(literal) => Some(emit_literal(literal)),
        Expr::Identifier(identifier) => {
            if identifier.qualified {
                if !identifier.path.is_empty() {
                    return None;
                }
                if !is_python(identifier.language.as_deref()?) {
                    return None;
                }
                *targets_python = true;
            }
            // Qualified-to-target identifiers lose their prefix.
            Some(identifier.name.clone())
        }
        Expr::FieldAccess { object, field } => {
            if let Expr::Identifier(identifier) = &object.expr
                && !identifier.qualified
                && identifier.path.is_empty()
                && is_language_name(&identifier.name)
            {
                if !is_python(&identifier.name) {
                    return None;
                }
                *targets_python = true;
                return Some(field.clone());
            }
            let object = emit_expr(object, targets_python)?;
            Some(format!("{object}[{}]", python_string(field)))
        }
        Expr::Index { object, index } => {
            let object = emit_expr(object, targets_python)?;
            let index = emit_expr(index, targets_python)?;
            Some(format!("{object}[{index}]"))
        }
        Expr::Unary { op, operand } => {
            let operand = emit_expr(operand, targets_python)?;
            Some(match op {
                UnaryOperator::Neg => format!("(-{operand})"),
                UnaryOperator::Not => format!("(not {operand})"),
            })
        }
        Expr::Binary { left, op, right } => {
            let op = python_operator(*op)?;
            let left = emit_expr(left, targets_python)?;
            let right = emit_expr(right, targets_python)?;
            Some(format!("({left} {op} {right})"))
        }
        Expr::Elvis { value, fallback } => {
            let value = emit_expr(value, targets_python)?;
            let fallback = emit_expr(fallback, targets_python)?;
            Some(format!("({value} or {fallback})"))
        }
        Expr::Ternary {
            condition,
            truthy,
            falsy,
        } => {
            let condition = emit_expr(condition, targets_python)?;
            let truthy = emit_expr(truthy, targets_python)?;
            let falsy = emit_expr(falsy, targets_python)?;
            Some(format!("({truthy} if {condition} else {falsy})"))
        }
        Expr::Pipe { value, call } => {
            let Expr::LanguageCall { language, function, args } = &call.expr else {
                return None;
            };
            let piped = emit_expr(value, targets_python)?;
            emit_call(language, function, args, Some(piped), targets_python)
        }
        Expr::LanguageCall { language, function, args } => {
            emit_call(language, function, args, None, targets_python)
        }
        Expr::Array(items) => {
            let items: Option<Vec<String>> = items.iter().map(|item| emit_expr(item, targets_python)).collect();
            Some(format!("[{}]", items?.join(", ")))
        }
        Expr::Object(entries) => {
            let mut parts = Vec::with_capacity(entries.len());
            for (key, value) in entries {
                let value = emit_expr(value, targets_python)?;
                parts.push(format!("{}: {value}", python_string(key)));
            }
            Some(format!("{{{}}}", parts.join(", ")))
        }
        Expr::Bitstring(_) | Expr::PatternMatch { .. } => None,
    }
}

fn emit_call(
    language: &str,
    function: &str,
    args: &[Argument],
    piped: Option<String>,
    targets_python: &mut bool,
) -> Option<String> {
    if !is_python(language) {
        return None;
    }
    // `eval` has engine-level semantics (a single source string); keep it
    // on the per-statement path.
    if function == "eval" {
        return None;
    }
    *targets_python = true;
    let mut rendered: Vec<String> = vec![];
    if let Some(piped) = piped {
        rendered.push(piped);
    }
    for argument in args {
        let value = emit_expr(&argument.value, targets_python)?;
        match &argument.name {
            Some(name) => rendered.push(format!("{name}={value}")),
            None => rendered.push(value),
        }
    }
    Some(format!("{function}({})", rendered.join(", ")))
}

fn emit_literal(literal: &Literal) -> String {
    match literal {
        Literal::Null => "None".to_owned(),
        Literal::Bool(true) => "True".to_owned(),
        Literal::Bool(false) => "False".to_owned(),
        Literal::Int(i) => i.to_string(),
        Literal::BigInt(b) => b.to_string(),
        Literal::Float(f) => {
            if f.is_finite() {
                ryu::Buffer::new().format(*f).to_owned()
            } else if f.is_nan() {
                "float('nan')".to_owned()
            } else if *f > 0.0 {
                "float('inf')".to_owned()
            } else {
                "float('-inf')".to_owned()
            }
        }
        Literal::Str(s) => python_string(s),
    }
}

/// Renders a double-quoted Python string literal.
fn python_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for ch in s.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            other => out.push(other),
        }
    }
    out.push('"');
    out
}

fn python_operator(op: Operator) -> Option<&'static str> {
    match op {
        Operator::Add => Some("+"),
        Operator::Sub => Some("-"),
        Operator::Mul => Some("*"),
        Operator::Div => Some("/"),
        Operator::Mod => Some("%"),
        Operator::Eq => Some("=="),
        Operator::NotEq => Some("!="),
        Operator::Lt => Some("<"),
        Operator::LtEq => Some("<="),
        Operator::Gt => Some(">"),
        Operator::GtEq => Some(">="),
        Operator::And => Some("and"),
        Operator::Or => Some("or"),
        Operator::Assign | Operator::AssignDeclare => None,
    }
}

fn push_line(out: &mut String, indent: usize, line: &str) {
    for _ in 0..indent {
        out.push_str("    ");
    }
    let _ = writeln!(out, "{line}");
}
