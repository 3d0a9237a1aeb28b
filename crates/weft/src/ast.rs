//! Syntax tree consumed by the execution engine.
//!
//! The parser is an external collaborator: it produces these nodes (usually
//! shipped serialized, see `weft-cli`) and the engine walks them. Every node
//! carries a [`CodeRange`] so runtime errors can point at the offending
//! source location.

use num_bigint::BigInt;
use serde::{Deserialize, Serialize};

/// A half-open span of source code, tracked as start/end line and column.
///
/// Lines and columns are 1-indexed, matching what editors display. The
/// parser attaches a range to every node; the engine only ever reads them
/// for error reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CodeRange {
    pub start_line: u32,
    pub start_column: u32,
    pub end_line: u32,
    pub end_column: u32,
}

impl CodeRange {
    #[must_use]
    pub const fn new(start_line: u32, start_column: u32, end_line: u32, end_column: u32) -> Self {
        Self {
            start_line,
            start_column,
            end_line,
            end_column,
        }
    }

    /// A single-point range, handy for tests and synthesized nodes.
    #[must_use]
    pub const fn at(line: u32, column: u32) -> Self {
        Self::new(line, column, line, column)
    }
}

impl std::fmt::Display for CodeRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.start_line, self.start_column)
    }
}

/// An identifier, possibly qualified with a language tag.
///
/// `py.data.users` is emitted by the parser as `language = Some("py")`,
/// `path = ["data"]`, `name = "users"`: the first path segment is the
/// variable read from the runtime, the remaining segments plus `name` are
/// field accesses on the result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identifier {
    pub name: String,
    /// Language tag for qualified identifiers. Always non-empty when
    /// `qualified` is true.
    pub language: Option<String>,
    pub qualified: bool,
    /// Outer qualifier segments between the language and the final name.
    #[serde(default)]
    pub path: Vec<String>,
    #[serde(default)]
    pub position: CodeRange,
}

impl Identifier {
    /// An unqualified name.
    #[must_use]
    pub fn plain(name: impl Into<String>, position: CodeRange) -> Self {
        Self {
            name: name.into(),
            language: None,
            qualified: false,
            path: vec![],
            position,
        }
    }

    /// A language-qualified name with no intermediate path.
    #[must_use]
    pub fn qualified(language: impl Into<String>, name: impl Into<String>, position: CodeRange) -> Self {
        Self {
            name: name.into(),
            language: Some(language.into()),
            qualified: true,
            path: vec![],
            position,
        }
    }
}

/// A literal constant as written in source.
///
/// Numbers keep their int-vs-float distinction from the parser; integers
/// that do not fit `i64` arrive as `BigInt`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Literal {
    Null,
    Bool(bool),
    Int(i64),
    BigInt(BigInt),
    Float(f64),
    Str(String),
}

/// Binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operator {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    And,
    Or,
    /// `=` appearing in expression position (C-style for increments).
    Assign,
    /// `:=` appearing in expression position (C-style for increments).
    AssignDeclare,
}

/// Unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnaryOperator {
    Neg,
    Not,
}

/// A call argument, optionally named.
///
/// When any argument of a call is named, the evaluator packages the whole
/// argument set as a single `{positional, keyword}` composite before
/// dispatching to the runtime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Argument {
    #[serde(default)]
    pub name: Option<String>,
    pub value: ExprLoc,
}

impl Argument {
    #[must_use]
    pub fn positional(value: ExprLoc) -> Self {
        Self { name: None, value }
    }
}

/// An expression paired with its source location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExprLoc {
    pub expr: Expr,
    #[serde(default)]
    pub position: CodeRange,
}

impl ExprLoc {
    #[must_use]
    pub fn new(expr: Expr, position: CodeRange) -> Self {
        Self { expr, position }
    }
}

/// An expression in the syntax tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    Literal(Literal),
    Identifier(Identifier),
    /// Field access `obj.field`.
    ///
    /// When `object` is a bare identifier naming a known language, the
    /// evaluator treats the whole expression as a qualified variable read.
    FieldAccess {
        object: Box<ExprLoc>,
        field: String,
    },
    /// Index access `obj[index]`.
    Index {
        object: Box<ExprLoc>,
        index: Box<ExprLoc>,
    },
    Unary {
        op: UnaryOperator,
        operand: Box<ExprLoc>,
    },
    Binary {
        left: Box<ExprLoc>,
        op: Operator,
        right: Box<ExprLoc>,
    },
    /// Elvis operator `a ?: b` - yields `a` when truthy, else `b`.
    Elvis {
        value: Box<ExprLoc>,
        fallback: Box<ExprLoc>,
    },
    /// Ternary `cond ? a : b`.
    Ternary {
        condition: Box<ExprLoc>,
        truthy: Box<ExprLoc>,
        falsy: Box<ExprLoc>,
    },
    /// Pipe `value |> lang.fn(args)` - the piped value is prepended to the
    /// call's arguments.
    Pipe {
        value: Box<ExprLoc>,
        call: Box<ExprLoc>,
    },
    /// A function call dispatched to a language runtime: `lang.fn(args…)`.
    LanguageCall {
        language: String,
        function: String,
        args: Vec<Argument>,
    },
    /// Array literal `[a, b, c]`.
    Array(Vec<ExprLoc>),
    /// Object literal `{"k": v, …}`; insertion order is preserved.
    Object(Vec<(String, ExprLoc)>),
    /// Bitstring construction `<<seg, seg, …>>`.
    Bitstring(Vec<BitstringSegment>),
    /// Inplace pattern assignment `pattern = value`, yielding a Bool.
    ///
    /// On success the pattern's variables are bound: qualified names go to
    /// the owning runtime and the shared store, unqualified names to the
    /// current scope.
    PatternMatch {
        pattern: Pattern,
        value: Box<ExprLoc>,
    },
}

/// A statement paired with its source location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StmtLoc {
    pub stmt: Stmt,
    #[serde(default)]
    pub position: CodeRange,
}

impl StmtLoc {
    #[must_use]
    pub fn new(stmt: Stmt, position: CodeRange) -> Self {
        Self { stmt, position }
    }
}

/// A statement in the syntax tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Stmt {
    /// `target = value`, or `lang.target = value` for qualified targets.
    ///
    /// `constant` marks an immutable declaration; later writes through any
    /// path fail with `IMMUTABLE_VARIABLE_ERROR`.
    Assignment {
        target: Identifier,
        value: ExprLoc,
        #[serde(default)]
        constant: bool,
    },
    /// Assignment whose left-hand side is an index or field chain,
    /// e.g. `x.users[0].name = v`.
    IndexAssignment {
        target: ExprLoc,
        value: ExprLoc,
    },
    /// A language call in statement position. Background calls are
    /// offloaded to the job manager and contribute no foreground output.
    LanguageCall {
        call: ExprLoc,
        #[serde(default)]
        background: bool,
    },
    /// A bare expression evaluated for its value/output.
    Expression(ExprLoc),
    If {
        condition: ExprLoc,
        then_block: Vec<StmtLoc>,
        #[serde(default)]
        else_block: Option<Vec<StmtLoc>>,
    },
    While {
        condition: ExprLoc,
        body: Vec<StmtLoc>,
    },
    /// `for x in iterable { … }` - lists iterate items, maps iterate keys.
    ForIn {
        variable: Identifier,
        iterable: ExprLoc,
        body: Vec<StmtLoc>,
    },
    /// `for i in start..end [step s] { … }` - half-open bounds.
    NumericFor {
        variable: Identifier,
        start: ExprLoc,
        end: ExprLoc,
        #[serde(default)]
        step: Option<ExprLoc>,
        body: Vec<StmtLoc>,
    },
    /// `for (init; condition; increment) { … }`.
    CStyleFor {
        #[serde(default)]
        init: Option<Box<StmtLoc>>,
        #[serde(default)]
        condition: Option<ExprLoc>,
        #[serde(default)]
        increment: Option<Box<StmtLoc>>,
        body: Vec<StmtLoc>,
    },
    Break,
    Continue,
    Block(Vec<StmtLoc>),
    Match {
        value: ExprLoc,
        arms: Vec<MatchArm>,
    },
    /// `<<pattern>> = value` in statement position.
    BitstringPatternAssignment {
        segments: Vec<BitstringSegment>,
        value: ExprLoc,
    },
    /// Embedded raw source for a runtime, executed verbatim via `eval`.
    CodeBlock {
        language: String,
        source: String,
    },
}

/// One arm of a `match` statement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchArm {
    pub pattern: Pattern,
    pub body: Vec<StmtLoc>,
}

/// A pattern, used by `match`, inplace pattern assignment, and pattern
/// conditions in `if`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Pattern {
    /// Matches when the value equals the literal under the value model's
    /// coercion rules.
    Literal(Literal),
    /// Unconditionally matches and binds the value.
    Variable(Identifier),
    /// `_` - unconditionally matches, binds nothing.
    Wildcard,
    /// `[p1, …, pn]` - a list of exactly n elements, matched element-wise.
    Array(Vec<Pattern>),
    /// `{k: p, …}` - a map with the given keys present and matching.
    ///
    /// The special key `_` means "some value in the map matches this
    /// sub-pattern". An empty object pattern matches only empty maps.
    Object(Vec<(String, Pattern)>),
    /// `<<seg, …>>` - delegated to the bitstring codec.
    Bitstring(Vec<BitstringSegment>),
}

/// Segment type specifier for bitstring construction and matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SegmentType {
    #[default]
    Integer,
    Float,
    Binary,
    Bytes,
    Utf8,
    Utf16,
    Utf32,
    Bits,
    Bitstring,
}

impl SegmentType {
    /// Bits per size unit when no explicit `unit` specifier is given.
    #[must_use]
    pub fn default_unit(self) -> u64 {
        match self {
            Self::Binary | Self::Bytes => 8,
            _ => 1,
        }
    }

    /// Whether this type consumes whole bytes (`binary`/`bytes`).
    #[must_use]
    pub fn is_binary(self) -> bool {
        matches!(self, Self::Binary | Self::Bytes)
    }

    /// Whether this type is a sub-byte bit sequence (`bits`/`bitstring`).
    #[must_use]
    pub fn is_bits(self) -> bool {
        matches!(self, Self::Bits | Self::Bitstring)
    }
}

/// Signedness specifier for integer segments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Signedness {
    Signed,
    #[default]
    Unsigned,
}

/// Endianness specifier for integer/float segments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Endianness {
    #[default]
    Big,
    Little,
    Native,
}

impl Endianness {
    /// Resolves `native` to the platform byte order.
    #[must_use]
    pub fn resolve(self) -> Self {
        if self == Self::Native {
            if cfg!(target_endian = "little") {
                Self::Little
            } else {
                Self::Big
            }
        } else {
            self
        }
    }
}

/// Parsed specifiers of one bitstring segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SegmentSpecifiers {
    #[serde(default)]
    pub segment_type: SegmentType,
    #[serde(default)]
    pub signedness: Signedness,
    #[serde(default)]
    pub endianness: Endianness,
    /// Bits per size unit; `None` means the type's default.
    #[serde(default)]
    pub unit: Option<u64>,
}

impl SegmentSpecifiers {
    /// The effective bits-per-unit multiplier.
    #[must_use]
    pub fn effective_unit(&self) -> u64 {
        self.unit.unwrap_or_else(|| self.segment_type.default_unit())
    }
}

/// One segment of a bitstring expression or pattern.
///
/// In construction context `value` is evaluated and encoded. In pattern
/// context a literal `value` is compared against the decoded bits and an
/// identifier `value` binds the decoded value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BitstringSegment {
    pub value: ExprLoc,
    /// Literal size in units, when written as a number.
    #[serde(default)]
    pub size: Option<u64>,
    /// Size expression, evaluated in the current scope (pattern sizes may
    /// reference variables bound by earlier segments).
    #[serde(default)]
    pub size_expression: Option<Box<ExprLoc>>,
    /// True when the size came from an expression rather than a literal.
    #[serde(default)]
    pub dynamic_size: bool,
    #[serde(default)]
    pub specifiers: SegmentSpecifiers,
}

impl BitstringSegment {
    /// A segment with only a value and default specifiers.
    #[must_use]
    pub fn plain(value: ExprLoc) -> Self {
        Self {
            value,
            size: None,
            size_expression: None,
            dynamic_size: false,
            specifiers: SegmentSpecifiers::default(),
        }
    }
}

/// A complete parsed program: the top-level statement block.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Program {
    pub statements: Vec<StmtLoc>,
}

impl Program {
    #[must_use]
    pub fn new(statements: Vec<StmtLoc>) -> Self {
        Self { statements }
    }
}
