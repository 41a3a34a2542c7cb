//! Recursive-descent parser over the restricted arithmetic grammar.
//!
//! ```text
//! expr    := term (('+' | '-') term)*
//! term    := unary (('*' | '/') unary)*
//! unary   := ('+' | '-') unary | power
//! power   := primary (('**' | '^') unary)?
//! primary := NUMBER | IDENT | IDENT '(' args ')' | '(' expr ')'
//! args    := expr (',' expr)*
//! ```
//!
//! Exponentiation is right associative and binds tighter than a unary sign on its
//! left, so `-x ** 2` parses as `-(x ** 2)` while `2 ** -1` is accepted.

use super::{
    lexer::{Spanned, Token},
    BinaryOp, EvaluationError, Expr, Function, UnaryOp, MAX_DEPTH,
};

/// Subtree paired with its height, so nesting is bounded while the tree is built.
struct Node {
    expr: Expr,
    height: usize,
}

impl Node {
    const fn leaf(expr: Expr) -> Self {
        Self { expr, height: 1 }
    }
}

pub(crate) struct Parser {
    tokens: Vec<Spanned>,
    pos: usize,
    depth: usize,
}

impl Parser {
    pub(crate) fn new(tokens: Vec<Spanned>) -> Self {
        Self {
            tokens,
            pos: 0,
            depth: 0,
        }
    }

    pub(crate) fn parse(mut self) -> Result<Expr, EvaluationError> {
        if self.tokens.is_empty() {
            return Err(EvaluationError::EmptyFormula);
        }
        let node = self.expr()?;
        match self.tokens.get(self.pos) {
            None => Ok(node.expr),
            Some(spanned) => Err(unexpected(spanned, "end of formula")),
        }
    }

    fn expr(&mut self) -> Result<Node, EvaluationError> {
        let mut left = self.term()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinaryOp::Add,
                Some(Token::Minus) => BinaryOp::Sub,
                _ => break,
            };
            let position = self.position();
            self.pos += 1;
            let right = self.term()?;
            left = binary(op, left, right, position)?;
        }
        Ok(left)
    }

    fn term(&mut self) -> Result<Node, EvaluationError> {
        let mut left = self.unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinaryOp::Mul,
                Some(Token::Slash) => BinaryOp::Div,
                _ => break,
            };
            let position = self.position();
            self.pos += 1;
            let right = self.unary()?;
            left = binary(op, left, right, position)?;
        }
        Ok(left)
    }

    /// Every recursive path (signs, parentheses, exponents, call arguments) passes
    /// through here, so the depth counter bounds the parser's own stack use.
    fn unary(&mut self) -> Result<Node, EvaluationError> {
        let position = self.position();
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(EvaluationError::NestingTooDeep { position });
        }
        let node = self.signed(position);
        self.depth -= 1;
        node
    }

    fn signed(&mut self, position: usize) -> Result<Node, EvaluationError> {
        let op = match self.peek() {
            Some(Token::Minus) => UnaryOp::Neg,
            Some(Token::Plus) => UnaryOp::Pos,
            _ => return self.power(),
        };
        self.pos += 1;
        let operand = self.unary()?;
        let height = checked_height(operand.height, position)?;
        Ok(Node {
            expr: Expr::Unary {
                op,
                operand: Box::new(operand.expr),
            },
            height,
        })
    }

    fn power(&mut self) -> Result<Node, EvaluationError> {
        let base = self.primary()?;
        if matches!(self.peek(), Some(Token::Power)) {
            let position = self.position();
            self.pos += 1;
            let exponent = self.unary()?;
            return binary(BinaryOp::Pow, base, exponent, position);
        }
        Ok(base)
    }

    fn primary(&mut self) -> Result<Node, EvaluationError> {
        let Some(spanned) = self.tokens.get(self.pos).cloned() else {
            return Err(EvaluationError::UnexpectedEnd {
                expected: "a number, name, or `(`",
            });
        };
        self.pos += 1;
        match spanned.token {
            Token::Number(value) => Ok(Node::leaf(Expr::Number(value))),
            Token::Ident(name) => {
                if !matches!(self.peek(), Some(Token::LParen)) {
                    return Ok(Node::leaf(Expr::Variable(name)));
                }
                let function = Function::lookup(&name)
                    .ok_or(EvaluationError::UnknownFunction(name))?;
                self.pos += 1;
                let args = self.args()?;
                self.expect_close()?;
                function.check_arity(args.len())?;
                let tallest = args.iter().map(|arg| arg.height).max().unwrap_or(0);
                Ok(Node {
                    height: checked_height(tallest, spanned.position)?,
                    expr: Expr::Call {
                        function,
                        args: args.into_iter().map(|arg| arg.expr).collect(),
                    },
                })
            }
            Token::LParen => {
                let inner = self.expr()?;
                self.expect_close()?;
                Ok(inner)
            }
            _ => Err(unexpected(&spanned, "a number, name, or `(`")),
        }
    }

    fn args(&mut self) -> Result<Vec<Node>, EvaluationError> {
        let mut args = Vec::new();
        if matches!(self.peek(), Some(Token::RParen)) {
            return Ok(args);
        }
        args.push(self.expr()?);
        while matches!(self.peek(), Some(Token::Comma)) {
            self.pos += 1;
            args.push(self.expr()?);
        }
        Ok(args)
    }

    fn expect_close(&mut self) -> Result<(), EvaluationError> {
        match self.tokens.get(self.pos) {
            Some(Spanned {
                token: Token::RParen,
                ..
            }) => {
                self.pos += 1;
                Ok(())
            }
            Some(spanned) => Err(unexpected(spanned, "`)`")),
            None => Err(EvaluationError::UnexpectedEnd { expected: "`)`" }),
        }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|spanned| &spanned.token)
    }

    /// Byte offset of the current token, or of the last one at end of input.
    fn position(&self) -> usize {
        self.tokens
            .get(self.pos)
            .or_else(|| self.tokens.last())
            .map_or(0, |spanned| spanned.position)
    }
}

fn binary(op: BinaryOp, left: Node, right: Node, position: usize) -> Result<Node, EvaluationError> {
    let height = checked_height(left.height.max(right.height), position)?;
    Ok(Node {
        expr: Expr::binary(op, left.expr, right.expr),
        height,
    })
}

/// Height of a node over children of height `child`; trees taller than
/// [`MAX_DEPTH`] are rejected so evaluation and drop stay shallow.
fn checked_height(child: usize, position: usize) -> Result<usize, EvaluationError> {
    let height = child + 1;
    if height > MAX_DEPTH {
        Err(EvaluationError::NestingTooDeep { position })
    } else {
        Ok(height)
    }
}

fn unexpected(spanned: &Spanned, expected: &'static str) -> EvaluationError {
    EvaluationError::UnexpectedToken {
        position: spanned.position,
        found: spanned.token.describe(),
        expected,
    }
}
