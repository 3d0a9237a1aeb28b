//! Block execution and output collection.
//!
//! A block's output is the newline-joined contributions of its statements:
//! `PreFormatted` results always contribute, non-empty strings contribute,
//! and pure assignments, expression-assignments, and background language
//! calls never do. Background job output is appended at the end-of-block
//! barrier, after all foreground output. The final program output passes
//! through a cleaner that drops noise lines and normalizes tabs.

use std::sync::OnceLock;

use regex::Regex;

use crate::ast::{CodeRange, Expr, Stmt, StmtLoc};
use crate::error::{EngineError, ErrorCode, ExecError, ExecResult};
use crate::run::Engine;
use crate::runtime::canonical_language;
use crate::tracer::TraceEvent;
use crate::value::Value;

impl Engine {
    /// Executes a block of statements with the full block discipline:
    /// transpilation gate, per-statement fallback, and the background
    /// barrier.
    pub(crate) fn exec_block(&mut self, statements: &[StmtLoc]) -> ExecResult<Value> {
        if let Some(source) = crate::transpile::python_block_source(statements)
            && let Some(value) = self.run_python_block(&source, statements.len())
        {
            return Ok(value);
        }

        let mut outputs: Vec<String> = vec![];
        for stmt in statements {
            let value = self.exec_stmt(stmt)?;
            collect_statement_output(&mut outputs, &stmt.stmt, &value);
        }
        if self.jobs.pending() > 0 {
            // Barrier: background output follows all foreground output.
            for output in self.jobs.wait_all() {
                if !output.is_empty() {
                    outputs.push(output);
                }
            }
        }
        Ok(join_block_outputs(outputs))
    }

    /// Executes a nested statement body (branch or loop pass) with the
    /// same collection policy but no transpilation gate or barrier.
    pub(crate) fn exec_body(&mut self, statements: &[StmtLoc]) -> ExecResult<Value> {
        let mut outputs: Vec<String> = vec![];
        for stmt in statements {
            let value = self.exec_stmt(stmt)?;
            collect_statement_output(&mut outputs, &stmt.stmt, &value);
        }
        Ok(join_block_outputs(outputs))
    }

    /// Executes one statement and returns its result value.
    pub(crate) fn exec_stmt(&mut self, stmt: &StmtLoc) -> ExecResult<Value> {
        let position = stmt.position;
        self.tracer.record(TraceEvent::Statement {
            kind: statement_kind(&stmt.stmt),
            position,
        });
        match &stmt.stmt {
            Stmt::Assignment { target, value, constant } => self.exec_assignment(target, value, *constant, position),
            Stmt::IndexAssignment { target, value } => self.exec_index_assignment(target, value, position),
            Stmt::LanguageCall { call, background } => {
                if *background {
                    self.submit_background_call(call, position)?;
                    Ok(Value::Null)
                } else {
                    self.eval_expr(call)
                }
            }
            Stmt::Expression(expr) => self.eval_expr(expr),
            Stmt::If {
                condition,
                then_block,
                else_block,
            } => self.exec_if(condition, then_block, else_block.as_deref(), position),
            Stmt::While { condition, body } => self.exec_while(condition, body, position),
            Stmt::ForIn {
                variable,
                iterable,
                body,
            } => self.exec_for_in(variable, iterable, body, position),
            Stmt::NumericFor {
                variable,
                start,
                end,
                step,
                body,
            } => self.exec_numeric_for(variable, start, end, step.as_ref(), body, position),
            Stmt::CStyleFor {
                init,
                condition,
                increment,
                body,
            } => self.exec_c_style_for(
                init.as_deref(),
                condition.as_ref(),
                increment.as_deref(),
                body,
                position,
            ),
            Stmt::Break => Err(ExecError::Break(position)),
            Stmt::Continue => Err(ExecError::Continue(position)),
            Stmt::Block(statements) => {
                self.push_scope(position)?;
                let result = self.exec_block(statements);
                self.scopes.pop();
                result
            }
            Stmt::Match { value, arms } => self.exec_match(value, arms, position),
            Stmt::BitstringPatternAssignment { segments, value } => {
                let subject = self.eval_expr(value)?;
                match self.match_bitstring(segments, &subject)? {
                    Some(bindings) => {
                        self.apply_bindings(&bindings, position)?;
                        Ok(Value::Bool(true))
                    }
                    None => Err(EngineError::user(
                        ErrorCode::NoPatternMatch,
                        format!("bitstring pattern did not match {}", subject.repr()),
                    )
                    .at(position)
                    .into()),
                }
            }
            Stmt::CodeBlock { language, source } => {
                let canonical = canonical_language(language).to_owned();
                let handle = self
                    .registry
                    .get_or_create(&canonical)
                    .map_err(|e| ExecError::Raise(e.at(position)))?;
                handle
                    .eval(source)
                    .map_err(|e| ExecError::Raise(e.into_engine_error(&canonical).at(position)))
            }
        }
    }

    /// Pushes a scope frame, enforcing the depth limit before allocating.
    pub(crate) fn push_scope(&mut self, position: CodeRange) -> ExecResult<()> {
        if self.scopes.depth() >= self.limits.max_scope_depth {
            return Err(EngineError::system(
                ErrorCode::Internal,
                format!("scope depth limit {} exceeded", self.limits.max_scope_depth),
            )
            .at(position)
            .into());
        }
        self.scopes.push();
        Ok(())
    }

    /// Offloads a background language call to the job manager.
    ///
    /// Arguments are evaluated in the foreground; the job only performs the
    /// dispatch, through the same handle lock foreground calls use, and
    /// reports its printable output.
    fn submit_background_call(&mut self, call: &crate::ast::ExprLoc, position: CodeRange) -> ExecResult<()> {
        let Expr::LanguageCall { language, function, args } = &call.expr else {
            return Err(EngineError::user(
                ErrorCode::Type,
                "background statement must be a language call",
            )
            .at(call.position)
            .into());
        };
        let canonical = canonical_language(language).to_owned();
        let handle = self
            .registry
            .get_or_create(&canonical)
            .map_err(|e| ExecError::Raise(e.at(position)))?;
        let mut call_args = Vec::with_capacity(args.len());
        for argument in args {
            call_args.push(self.eval_expr(&argument.value)?);
        }
        self.tracer.record(TraceEvent::BackgroundSubmit {
            language: canonical.clone(),
            function: function.clone(),
        });
        let function = function.clone();
        self.jobs.submit(Box::new(move || {
            match handle.execute_function(&function, call_args) {
                Ok(Value::PreFormatted(out)) => out,
                Ok(Value::Str(out)) => out,
                Ok(_) => String::new(),
                Err(error) => error.into_engine_error(&canonical).to_string(),
            }
        }));
        Ok(())
    }

    /// Runs a transpiled Python block: whole-block eval plus variable
    /// capture. `None` means "fall back to per-statement execution".
    fn run_python_block(&mut self, source: &str, statements: usize) -> Option<Value> {
        let handle = self.registry.get_or_create("python").ok()?;
        if !handle.is_ready() {
            return None;
        }
        let result = handle.eval(source).ok()?;
        self.tracer.record(TraceEvent::TranspiledBlock {
            language: "python".to_owned(),
            statements,
        });
        // Capture the runtime's top-level variables back into the shared
        // store; the in-runtime helper is preferred, the handle-level
        // enumeration is the fallback.
        let captured = handle
            .eval(crate::transpile::CAPTURE_HELPER)
            .ok()
            .and_then(|value| match value {
                Value::Map(map) => Some(map),
                _ => None,
            })
            .or_else(|| handle.get_all_variables());
        if let Some(captured) = captured {
            for (name, value) in captured {
                self.shared.set("python", &name, value);
            }
        }
        match result {
            Value::PreFormatted(_) | Value::Str(_) => Some(result),
            _ => Some(Value::Null),
        }
    }
}

/// Whether a statement's result may contribute to block output.
fn statement_contributes(stmt: &Stmt) -> bool {
    !matches!(
        stmt,
        Stmt::Assignment { .. }
            | Stmt::IndexAssignment { .. }
            | Stmt::BitstringPatternAssignment { .. }
            | Stmt::LanguageCall { background: true, .. }
    )
}

fn collect_statement_output(outputs: &mut Vec<String>, stmt: &Stmt, value: &Value) {
    if !statement_contributes(stmt) {
        return;
    }
    match value {
        Value::PreFormatted(s) => outputs.push(s.clone()),
        Value::Str(s) if !s.is_empty() => outputs.push(s.clone()),
        _ => {}
    }
}

fn join_block_outputs(outputs: Vec<String>) -> Value {
    if outputs.is_empty() {
        Value::Null
    } else {
        Value::PreFormatted(outputs.join("\n"))
    }
}

fn statement_kind(stmt: &Stmt) -> &'static str {
    match stmt {
        Stmt::Assignment { .. } => "assignment",
        Stmt::IndexAssignment { .. } => "index-assignment",
        Stmt::LanguageCall { .. } => "language-call",
        Stmt::Expression(_) => "expression",
        Stmt::If { .. } => "if",
        Stmt::While { .. } => "while",
        Stmt::ForIn { .. } => "for-in",
        Stmt::NumericFor { .. } => "numeric-for",
        Stmt::CStyleFor { .. } => "c-style-for",
        Stmt::Break => "break",
        Stmt::Continue => "continue",
        Stmt::Block(_) => "block",
        Stmt::Match { .. } => "match",
        Stmt::BitstringPatternAssignment { .. } => "bitstring-assignment",
        Stmt::CodeBlock { .. } => "code-block",
    }
}

static NOISE_LINE: OnceLock<Regex> = OnceLock::new();

/// Drops empty lines, `undefined` tokens, and function-reference
/// diagnostics; tabs become four spaces.
pub(crate) fn clean_output(raw: &str) -> String {
    let noise = NOISE_LINE.get_or_init(|| {
        Regex::new(r"^(<function\b.*>|\[Function:?[^\]]*\]|function: 0x[0-9a-fA-F]+)$")
            .expect("noise pattern is valid")
    });
    raw.lines()
        .map(|line| line.replace('\t', "    "))
        .filter(|line| {
            let trimmed = line.trim();
            !trimmed.is_empty() && trimmed != "undefined" && !noise.is_match(trimmed)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cleaner_drops_noise_and_normalizes_tabs() {
        let raw = "a\n\nundefined\n<function foo at 0x7f>\n[Function: bar]\n\tb";
        assert_eq!(clean_output(raw), "a\n    b");
    }

    #[test]
    fn assignments_do_not_contribute_output() {
        let assignment = Stmt::Assignment {
            target: crate::ast::Identifier::plain("x", crate::ast::CodeRange::default()),
            value: crate::ast::ExprLoc::new(
                Expr::Literal(crate::ast::Literal::Int(1)),
                crate::ast::CodeRange::default(),
            ),
            constant: false,
        };
        assert!(!statement_contributes(&assignment));
    }
}
