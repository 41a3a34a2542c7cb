//! Sandboxed evaluation of transfer equations.
//!
//! Formulas are tokenized, parsed into a tagged AST, and evaluated against a set of
//! numeric bindings. The only reachable names are bound variables and the
//! [`Function`] whitelist; there is no assignment, attribute access, or I/O in the
//! grammar at all.

mod lexer;
mod parser;

use std::{collections::HashMap, fmt, hash::BuildHasher, str::FromStr};

use indexmap::{IndexMap, IndexSet};
use thiserror::Error;

use self::parser::Parser;

/// Deepest nesting a formula may reach, counting signs, parentheses, operators,
/// and calls. Deeper formulas fail with [`EvaluationError::NestingTooDeep`].
pub const MAX_DEPTH: usize = 256;

/// Errors raised while compiling or evaluating a formula.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvaluationError {
    /// The formula has no tokens.
    #[error("formula is empty")]
    EmptyFormula,
    /// A character outside the formula language.
    #[error("unexpected character `{found}` at offset {position}")]
    UnexpectedCharacter {
        /// Byte offset.
        position: usize,
        /// Offending character.
        found: char,
    },
    /// A malformed numeric literal.
    #[error("invalid number `{literal}` at offset {position}")]
    InvalidNumber {
        /// Byte offset.
        position: usize,
        /// Literal text.
        literal: String,
    },
    /// A token in the wrong place.
    #[error("unexpected {found} at offset {position}, expected {expected}")]
    UnexpectedToken {
        /// Byte offset.
        position: usize,
        /// Description of the token found.
        found: String,
        /// What the parser needed.
        expected: &'static str,
    },
    /// The formula ended early.
    #[error("formula ended early, expected {expected}")]
    UnexpectedEnd {
        /// What the parser needed.
        expected: &'static str,
    },
    /// The formula nests deeper than [`MAX_DEPTH`].
    #[error("formula nests deeper than {limit} levels at offset {position}", limit = MAX_DEPTH)]
    NestingTooDeep {
        /// Byte offset where the limit was crossed.
        position: usize,
    },
    /// A call to a function outside the whitelist.
    #[error("function `{0}` is not allowed")]
    UnknownFunction(String),
    /// A whitelisted function called with the wrong number of arguments.
    #[error("`{function}` takes {expected} argument(s), got {found}")]
    Arity {
        /// Function name.
        function: &'static str,
        /// Accepted argument counts.
        expected: &'static str,
        /// Supplied argument count.
        found: usize,
    },
    /// A name with no binding.
    #[error("name `{0}` is not bound")]
    UnboundVariable(String),
    /// Division (or a negative power) with a zero denominator.
    #[error("division by zero")]
    DivisionByZero,
    /// An operation produced a non-finite value.
    #[error("`{operation}` produced a non-finite result")]
    Numeric {
        /// Operator or function name.
        operation: &'static str,
    },
}

/// Unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    /// `-x`
    Neg,
    /// `+x`
    Pos,
}

/// Binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    /// `+`
    Add,
    /// `-`
    Sub,
    /// `*`
    Mul,
    /// `/`
    Div,
    /// `**` or `^`
    Pow,
}

impl BinaryOp {
    const fn symbol(self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::Pow => "**",
        }
    }
}

/// Whitelisted pure numeric functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Function {
    /// Absolute value.
    Abs,
    /// Square root.
    Sqrt,
    /// `e^x`.
    Exp,
    /// Natural log, or `log(x, base)`.
    Log,
    /// Base-10 log.
    Log10,
    /// Smallest argument.
    Min,
    /// Largest argument.
    Max,
    /// `pow(base, exponent)`.
    Pow,
    /// Round toward negative infinity.
    Floor,
    /// Round toward positive infinity.
    Ceil,
    /// Round half to even.
    Round,
    /// Sine (radians).
    Sin,
    /// Cosine (radians).
    Cos,
    /// Tangent (radians).
    Tan,
}

impl Function {
    /// Every whitelisted function.
    pub const ALL: [Self; 14] = [
        Self::Abs,
        Self::Sqrt,
        Self::Exp,
        Self::Log,
        Self::Log10,
        Self::Min,
        Self::Max,
        Self::Pow,
        Self::Floor,
        Self::Ceil,
        Self::Round,
        Self::Sin,
        Self::Cos,
        Self::Tan,
    ];

    /// Name used in formulas.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Abs => "abs",
            Self::Sqrt => "sqrt",
            Self::Exp => "exp",
            Self::Log => "log",
            Self::Log10 => "log10",
            Self::Min => "min",
            Self::Max => "max",
            Self::Pow => "pow",
            Self::Floor => "floor",
            Self::Ceil => "ceil",
            Self::Round => "round",
            Self::Sin => "sin",
            Self::Cos => "cos",
            Self::Tan => "tan",
        }
    }

    /// Looks a function up by formula name.
    #[must_use]
    pub fn lookup(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|function| function.name() == name)
    }

    fn check_arity(self, found: usize) -> Result<(), EvaluationError> {
        let (ok, expected) = match self {
            Self::Min | Self::Max => (found >= 1, "at least 1"),
            Self::Log => ((1..=2).contains(&found), "1 or 2"),
            Self::Pow => (found == 2, "2"),
            _ => (found == 1, "1"),
        };
        if ok {
            Ok(())
        } else {
            Err(EvaluationError::Arity {
                function: self.name(),
                expected,
                found,
            })
        }
    }

    fn apply(self, args: &[f64]) -> Result<f64, EvaluationError> {
        let x = args.first().copied().unwrap_or(f64::NAN);
        let value = match self {
            Self::Abs => x.abs(),
            Self::Sqrt => x.sqrt(),
            Self::Exp => x.exp(),
            Self::Log => match args.get(1) {
                Some(base) => {
                    let denominator = base.ln();
                    if denominator == 0.0 {
                        return Err(EvaluationError::DivisionByZero);
                    }
                    x.ln() / denominator
                }
                None => x.ln(),
            },
            Self::Log10 => x.log10(),
            Self::Min => args.iter().copied().fold(f64::INFINITY, f64::min),
            Self::Max => args.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            Self::Pow => return power(x, args.get(1).copied().unwrap_or(f64::NAN), self.name()),
            Self::Floor => x.floor(),
            Self::Ceil => x.ceil(),
            Self::Round => x.round_ties_even(),
            Self::Sin => x.sin(),
            Self::Cos => x.cos(),
            Self::Tan => x.tan(),
        };
        finite(value, self.name())
    }
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Tagged syntax tree of a formula.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Numeric literal.
    Number(f64),
    /// Reference to a bound variable.
    Variable(String),
    /// Unary operation.
    Unary {
        /// Operator.
        op: UnaryOp,
        /// Operand.
        operand: Box<Expr>,
    },
    /// Binary operation.
    Binary {
        /// Operator.
        op: BinaryOp,
        /// Left operand.
        left: Box<Expr>,
        /// Right operand.
        right: Box<Expr>,
    },
    /// Call of a whitelisted function with a checked argument count.
    Call {
        /// Function.
        function: Function,
        /// Arguments.
        args: Vec<Expr>,
    },
}

impl Expr {
    fn binary(op: BinaryOp, left: Self, right: Self) -> Self {
        Self::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    fn collect_variables(&self, into: &mut IndexSet<String>) {
        match self {
            Self::Number(_) => {}
            Self::Variable(name) => {
                into.insert(name.clone());
            }
            Self::Unary { operand, .. } => operand.collect_variables(into),
            Self::Binary { left, right, .. } => {
                left.collect_variables(into);
                right.collect_variables(into);
            }
            Self::Call { args, .. } => {
                for arg in args {
                    arg.collect_variables(into);
                }
            }
        }
    }

    fn eval<B: Bindings + ?Sized>(&self, bindings: &B) -> Result<f64, EvaluationError> {
        match self {
            Self::Number(value) => finite(*value, "literal"),
            Self::Variable(name) => {
                let value = bindings
                    .value(name)
                    .ok_or_else(|| EvaluationError::UnboundVariable(name.clone()))?;
                finite(value, "binding")
            }
            Self::Unary { op, operand } => {
                let value = operand.eval(bindings)?;
                Ok(match op {
                    UnaryOp::Neg => -value,
                    UnaryOp::Pos => value,
                })
            }
            Self::Binary { op, left, right } => {
                let lhs = left.eval(bindings)?;
                let rhs = right.eval(bindings)?;
                match op {
                    BinaryOp::Add => finite(lhs + rhs, op.symbol()),
                    BinaryOp::Sub => finite(lhs - rhs, op.symbol()),
                    BinaryOp::Mul => finite(lhs * rhs, op.symbol()),
                    BinaryOp::Div => {
                        if rhs == 0.0 {
                            return Err(EvaluationError::DivisionByZero);
                        }
                        finite(lhs / rhs, op.symbol())
                    }
                    BinaryOp::Pow => power(lhs, rhs, op.symbol()),
                }
            }
            Self::Call { function, args } => {
                let values = args
                    .iter()
                    .map(|arg| arg.eval(bindings))
                    .collect::<Result<Vec<_>, _>>()?;
                function.apply(&values)
            }
        }
    }
}

fn power(base: f64, exponent: f64, operation: &'static str) -> Result<f64, EvaluationError> {
    if base == 0.0 && exponent < 0.0 {
        return Err(EvaluationError::DivisionByZero);
    }
    finite(base.powf(exponent), operation)
}

fn finite(value: f64, operation: &'static str) -> Result<f64, EvaluationError> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(EvaluationError::Numeric { operation })
    }
}

/// Read-only variable lookup used during evaluation.
pub trait Bindings {
    /// Value bound to `name`, if any.
    fn value(&self, name: &str) -> Option<f64>;
}

impl<S: BuildHasher> Bindings for IndexMap<String, f64, S> {
    fn value(&self, name: &str) -> Option<f64> {
        self.get(name).copied()
    }
}

impl<S: BuildHasher> Bindings for HashMap<String, f64, S> {
    fn value(&self, name: &str) -> Option<f64> {
        self.get(name).copied()
    }
}

impl Bindings for [(&str, f64)] {
    fn value(&self, name: &str) -> Option<f64> {
        self.iter()
            .find_map(|(key, value)| (*key == name).then_some(*value))
    }
}

/// Compiled formula, parsed once and evaluated many times.
#[derive(Debug, Clone, PartialEq)]
pub struct Expression {
    source: String,
    root: Expr,
    variables: IndexSet<String>,
}

impl Expression {
    /// Parses `formula`, resolving every call against the whitelist.
    ///
    /// # Errors
    ///
    /// Returns a lexical, syntax, whitelist, arity, or nesting error.
    pub fn compile(formula: &str) -> Result<Self, EvaluationError> {
        let tokens = lexer::tokenize(formula)?;
        let root = Parser::new(tokens).parse()?;
        let mut variables = IndexSet::new();
        root.collect_variables(&mut variables);
        Ok(Self {
            source: formula.to_string(),
            root,
            variables,
        })
    }

    /// Original formula text.
    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Syntax tree.
    #[must_use]
    pub const fn root(&self) -> &Expr {
        &self.root
    }

    /// Names referenced by the formula, in order of first appearance.
    #[must_use]
    pub const fn variables(&self) -> &IndexSet<String> {
        &self.variables
    }

    /// Evaluates against `bindings`.
    ///
    /// # Errors
    ///
    /// Returns [`EvaluationError::UnboundVariable`] for missing names and numeric errors
    /// for division by zero or non-finite results.
    pub fn eval<B: Bindings + ?Sized>(&self, bindings: &B) -> Result<f64, EvaluationError> {
        self.root.eval(bindings)
    }
}

impl FromStr for Expression {
    type Err = EvaluationError;

    fn from_str(formula: &str) -> Result<Self, Self::Err> {
        Self::compile(formula)
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

/// Compiles and evaluates `formula` in one step.
///
/// # Errors
///
/// Any error from [`Expression::compile`] or [`Expression::eval`].
pub fn evaluate<B: Bindings + ?Sized>(formula: &str, bindings: &B) -> Result<f64, EvaluationError> {
    Expression::compile(formula)?.eval(bindings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexmap::indexmap;

    fn eval(formula: &str, bindings: &[(&str, f64)]) -> Result<f64, EvaluationError> {
        evaluate(formula, bindings)
    }

    #[test]
    fn evaluates_arithmetic_with_precedence() {
        assert!((eval("1 + 2 * 3", &[]).unwrap() - 7.0).abs() < 1e-12);
        assert!((eval("(1 + 2) * 3", &[]).unwrap() - 9.0).abs() < 1e-12);
        assert!((eval("2 ** 3 ** 2", &[]).unwrap() - 512.0).abs() < 1e-9);
        assert!((eval("-3 ^ 2", &[]).unwrap() + 9.0).abs() < 1e-12);
        assert!((eval("2 ** -1", &[]).unwrap() - 0.5).abs() < 1e-12);
        assert!((eval("10 / 4 - 1", &[]).unwrap() - 1.5).abs() < 1e-12);
    }

    #[test]
    fn reads_bound_variables() {
        let bindings = indexmap! {
            "unit_cost_km".to_string() => 1000.0,
            "total_road_length".to_string() => 50.0,
        };
        let value = evaluate("unit_cost_km * total_road_length", &bindings).unwrap();
        assert!((value - 50_000.0).abs() < 1e-9);
    }

    #[test]
    fn calls_whitelisted_functions() {
        let bindings = [("a", -4.0), ("b", 9.0)];
        let cases = [
            ("abs(a)", 4.0),
            ("sqrt(b)", 3.0),
            ("min(a, b, 0)", -4.0),
            ("max(a, b)", 9.0),
            ("log(exp(2))", 2.0),
            ("log(8, 2)", 3.0),
            ("log10(1000)", 3.0),
            ("pow(2, 10)", 1024.0),
            ("floor(2.7) + ceil(2.1)", 5.0),
            ("round(2.5) + round(3.5)", 6.0),
            ("sin(0) + cos(0) + tan(0)", 1.0),
        ];
        for (formula, expected) in cases {
            let value = eval(formula, &bindings).unwrap();
            assert!((value - expected).abs() < 1e-9, "{formula} = {value}");
        }
    }

    #[test]
    fn unbound_names_are_rejected() {
        assert_eq!(
            eval("a + c", &[("a", 1.0)]).unwrap_err(),
            EvaluationError::UnboundVariable("c".into())
        );
    }

    #[test]
    fn disallowed_constructs_never_run() {
        for formula in [
            "__import__('os').system('true')",
            "open('x')",
            "a.real",
            "a = 1",
            "lambda: 1",
            "[a]",
            "a if a else 1",
        ] {
            assert!(eval(formula, &[("a", 1.0)]).is_err(), "{formula} accepted");
        }
    }

    #[test]
    fn numeric_failures_surface() {
        assert_eq!(eval("1 / 0", &[]).unwrap_err(), EvaluationError::DivisionByZero);
        assert_eq!(eval("0 ** -1", &[]).unwrap_err(), EvaluationError::DivisionByZero);
        assert_eq!(
            eval("sqrt(-1)", &[]).unwrap_err(),
            EvaluationError::Numeric { operation: "sqrt" }
        );
        assert_eq!(
            eval("log(0)", &[]).unwrap_err(),
            EvaluationError::Numeric { operation: "log" }
        );
        assert_eq!(
            eval("10 ** 400", &[]).unwrap_err(),
            EvaluationError::Numeric { operation: "**" }
        );
    }

    #[test]
    fn non_finite_inputs_are_rejected() {
        assert!(matches!(
            eval("1e400", &[]),
            Err(EvaluationError::InvalidNumber { position: 0, .. })
        ));
        assert_eq!(
            eval("x + 1", &[("x", f64::INFINITY)]).unwrap_err(),
            EvaluationError::Numeric { operation: "binding" }
        );
        assert_eq!(
            eval("x", &[("x", f64::NAN)]).unwrap_err(),
            EvaluationError::Numeric { operation: "binding" }
        );
    }

    #[test]
    fn pathological_nesting_fails_cleanly() {
        let bindings = [("x", 1.0)];
        let parens = format!("{}x{}", "(".repeat(5000), ")".repeat(5000));
        let signs = format!("{}x", "-".repeat(20_000));
        let chain = vec!["x"; 200_000].join("+");
        for formula in [parens, signs, chain] {
            assert!(matches!(
                eval(&formula, &bindings),
                Err(EvaluationError::NestingTooDeep { .. })
            ));
        }
        let deepest = vec!["x"; MAX_DEPTH].join("+");
        assert!((eval(&deepest, &bindings).unwrap() - 256.0).abs() < 1e-9);
    }

    #[test]
    fn lists_referenced_variables_once() {
        let expression: Expression = "x * y + max(x, z)".parse().unwrap();
        let names: Vec<_> = expression.variables().iter().cloned().collect();
        assert_eq!(names, vec!["x", "y", "z"]);
        assert_eq!(expression.to_string(), "x * y + max(x, z)");
    }

    #[test]
    fn function_names_may_be_bound_as_variables() {
        assert!((eval("abs + 1", &[("abs", 2.0)]).unwrap() - 3.0).abs() < 1e-12);
    }
}
