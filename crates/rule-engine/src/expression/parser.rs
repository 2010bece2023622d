use serde_json::Value;

use super::functions;
use super::lexer::{tokenize, Spanned, Token};
use super::ExprError;

/// Maximum nesting of sub-expressions. Applies both while parsing
/// (parentheses, unary operators, calls) and to the finished tree, where
/// member chains and operator chains nest one level per step.
pub(crate) const MAX_DEPTH: usize = 64;

/// Parsed form of a rule expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    Ident(String),
    Member {
        object: Box<Expr>,
        property: String,
    },
    Index {
        object: Box<Expr>,
        index: Box<Expr>,
    },
    Method {
        receiver: Box<Expr>,
        name: String,
        args: Vec<Expr>,
    },
    Function {
        name: String,
        args: Vec<Expr>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Logical {
        op: LogicalOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Conditional {
        test: Box<Expr>,
        consequent: Box<Expr>,
        alternate: Box<Expr>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    NotEq,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOp {
    And,
    Or,
}

/// Parse a complete expression. Trailing tokens are an error.
pub(crate) fn parse(source: &str) -> Result<Expr, ExprError> {
    let tokens = tokenize(source)?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        depth: 0,
    };
    let expr = parser.expression()?;
    parser.expect(Token::Eof, "end of expression")?;
    if exceeds_depth(&expr, MAX_DEPTH) {
        return Err(ExprError::TooDeep { limit: MAX_DEPTH });
    }
    Ok(expr)
}

/// Whether any path from `root` to a leaf is longer than `limit` nodes.
/// Walks with an explicit stack so that checking a deep tree cannot itself
/// overflow.
fn exceeds_depth(root: &Expr, limit: usize) -> bool {
    let mut pending = vec![(root, 1)];
    while let Some((expr, depth)) = pending.pop() {
        if depth > limit {
            return true;
        }
        let next = depth + 1;
        match expr {
            Expr::Literal(_) | Expr::Ident(_) => {}
            Expr::Member { object, .. } => pending.push((object, next)),
            Expr::Index { object, index } => {
                pending.push((object, next));
                pending.push((index, next));
            }
            Expr::Method { receiver, args, .. } => {
                pending.push((receiver, next));
                pending.extend(args.iter().map(|arg| (arg, next)));
            }
            Expr::Function { args, .. } => pending.extend(args.iter().map(|arg| (arg, next))),
            Expr::Unary { operand, .. } => pending.push((operand, next)),
            Expr::Binary { left, right, .. } | Expr::Logical { left, right, .. } => {
                pending.push((left, next));
                pending.push((right, next));
            }
            Expr::Conditional {
                test,
                consequent,
                alternate,
            } => {
                pending.push((test, next));
                pending.push((consequent, next));
                pending.push((alternate, next));
            }
        }
    }
    false
}

// Precedence, loosest first:
//   conditional  a ? b : c
//   or           ||
//   and          &&
//   equality     == != === !==
//   comparison   < <= > >=
//   additive     + -
//   multiplicative * / %
//   unary        ! -
//   postfix      .name  [expr]  .method(args)
//   primary
struct Parser {
    tokens: Vec<Spanned>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn expression(&mut self) -> Result<Expr, ExprError> {
        self.enter()?;
        let expr = self.conditional();
        self.depth -= 1;
        expr
    }

    fn conditional(&mut self) -> Result<Expr, ExprError> {
        let test = self.or()?;
        if !self.eat(&Token::Question) {
            return Ok(test);
        }
        let consequent = self.expression()?;
        self.expect(Token::Colon, "':'")?;
        let alternate = self.expression()?;
        Ok(Expr::Conditional {
            test: Box::new(test),
            consequent: Box::new(consequent),
            alternate: Box::new(alternate),
        })
    }

    fn or(&mut self) -> Result<Expr, ExprError> {
        let mut left = self.and()?;
        while self.eat(&Token::OrOr) {
            let right = self.and()?;
            left = Expr::Logical {
                op: LogicalOp::Or,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn and(&mut self) -> Result<Expr, ExprError> {
        let mut left = self.equality()?;
        while self.eat(&Token::AndAnd) {
            let right = self.equality()?;
            left = Expr::Logical {
                op: LogicalOp::And,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn equality(&mut self) -> Result<Expr, ExprError> {
        let mut left = self.comparison()?;
        loop {
            let op = match self.peek() {
                Token::Eq => BinaryOp::Eq,
                Token::NotEq => BinaryOp::NotEq,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.comparison()?;
            left = binary(op, left, right);
        }
    }

    fn comparison(&mut self) -> Result<Expr, ExprError> {
        let mut left = self.additive()?;
        loop {
            let op = match self.peek() {
                Token::Lt => BinaryOp::Lt,
                Token::Le => BinaryOp::Le,
                Token::Gt => BinaryOp::Gt,
                Token::Ge => BinaryOp::Ge,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.additive()?;
            left = binary(op, left, right);
        }
    }

    fn additive(&mut self) -> Result<Expr, ExprError> {
        let mut left = self.multiplicative()?;
        loop {
            let op = match self.peek() {
                Token::Plus => BinaryOp::Add,
                Token::Minus => BinaryOp::Sub,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.multiplicative()?;
            left = binary(op, left, right);
        }
    }

    fn multiplicative(&mut self) -> Result<Expr, ExprError> {
        let mut left = self.unary()?;
        loop {
            let op = match self.peek() {
                Token::Star => BinaryOp::Mul,
                Token::Slash => BinaryOp::Div,
                Token::Percent => BinaryOp::Rem,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.unary()?;
            left = binary(op, left, right);
        }
    }

    fn unary(&mut self) -> Result<Expr, ExprError> {
        let op = match self.peek() {
            Token::Bang => UnaryOp::Not,
            Token::Minus => UnaryOp::Neg,
            _ => return self.postfix(),
        };
        self.advance();
        self.enter()?;
        let operand = self.unary();
        self.depth -= 1;
        Ok(Expr::Unary {
            op,
            operand: Box::new(operand?),
        })
    }

    fn postfix(&mut self) -> Result<Expr, ExprError> {
        let mut expr = self.primary()?;
        loop {
            match self.peek() {
                Token::Dot => {
                    self.advance();
                    let name = self.identifier("property name after '.'")?;
                    if self.peek() == &Token::LParen {
                        if !functions::is_method(&name) {
                            return Err(ExprError::UnknownFunction { name });
                        }
                        let args = self.arguments()?;
                        expr = Expr::Method {
                            receiver: Box::new(expr),
                            name,
                            args,
                        };
                    } else {
                        expr = Expr::Member {
                            object: Box::new(expr),
                            property: name,
                        };
                    }
                }
                Token::LBracket => {
                    self.advance();
                    let index = self.expression()?;
                    self.expect(Token::RBracket, "']'")?;
                    expr = Expr::Index {
                        object: Box::new(expr),
                        index: Box::new(index),
                    };
                }
                _ => return Ok(expr),
            }
        }
    }

    fn primary(&mut self) -> Result<Expr, ExprError> {
        let Spanned { token, offset } = self.tokens[self.pos].clone();
        match token {
            Token::Number(n) => {
                self.advance();
                Ok(Expr::Literal(Value::Number(n)))
            }
            Token::Str(s) => {
                self.advance();
                Ok(Expr::Literal(Value::String(s)))
            }
            Token::Ident(name) => {
                self.advance();
                match name.as_str() {
                    "null" | "undefined" => Ok(Expr::Literal(Value::Null)),
                    "true" => Ok(Expr::Literal(Value::Bool(true))),
                    "false" => Ok(Expr::Literal(Value::Bool(false))),
                    _ if self.peek() == &Token::LParen => {
                        if !functions::is_function(&name) {
                            return Err(ExprError::UnknownFunction { name });
                        }
                        let args = self.arguments()?;
                        Ok(Expr::Function { name, args })
                    }
                    _ => Ok(Expr::Ident(name)),
                }
            }
            Token::LParen => {
                self.advance();
                let inner = self.expression()?;
                self.expect(Token::RParen, "')'")?;
                Ok(inner)
            }
            Token::LBracket => {
                self.advance();
                self.list_literal()
            }
            other => Err(ExprError::Expected {
                expected: "a value",
                found: other.describe(),
                offset,
            }),
        }
    }

    /// Array literal `[a, b, c]`; the opening bracket is already consumed.
    /// Only literal elements are accepted so that a list is a constant.
    fn list_literal(&mut self) -> Result<Expr, ExprError> {
        let mut items = Vec::new();
        if self.eat(&Token::RBracket) {
            return Ok(Expr::Literal(Value::Array(items)));
        }
        loop {
            let Spanned { token, offset } = self.tokens[self.pos].clone();
            let item = match token {
                Token::Number(n) => Value::Number(n),
                Token::Minus => match self.tokens[self.pos + 1].token.clone() {
                    Token::Number(n) => {
                        self.advance();
                        negate(&n).ok_or(ExprError::InvalidNumber { offset })?
                    }
                    other => {
                        return Err(ExprError::Expected {
                            expected: "a number after '-'",
                            found: other.describe(),
                            offset,
                        })
                    }
                },
                Token::Str(s) => Value::String(s),
                Token::Ident(name) if name == "true" => Value::Bool(true),
                Token::Ident(name) if name == "false" => Value::Bool(false),
                Token::Ident(name) if name == "null" => Value::Null,
                other => {
                    return Err(ExprError::Expected {
                        expected: "a literal list element",
                        found: other.describe(),
                        offset,
                    })
                }
            };
            self.advance();
            items.push(item);
            if self.eat(&Token::RBracket) {
                return Ok(Expr::Literal(Value::Array(items)));
            }
            self.expect(Token::Comma, "',' or ']'")?;
        }
    }

    fn arguments(&mut self) -> Result<Vec<Expr>, ExprError> {
        self.expect(Token::LParen, "'('")?;
        let mut args = Vec::new();
        if self.eat(&Token::RParen) {
            return Ok(args);
        }
        loop {
            args.push(self.expression()?);
            if self.eat(&Token::RParen) {
                return Ok(args);
            }
            self.expect(Token::Comma, "',' or ')'")?;
        }
    }

    fn identifier(&mut self, expected: &'static str) -> Result<String, ExprError> {
        let Spanned { token, offset } = &self.tokens[self.pos];
        match token {
            Token::Ident(name) => {
                let name = name.clone();
                self.advance();
                Ok(name)
            }
            other => Err(ExprError::Expected {
                expected,
                found: other.describe(),
                offset: *offset,
            }),
        }
    }

    fn enter(&mut self) -> Result<(), ExprError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(ExprError::TooDeep { limit: MAX_DEPTH });
        }
        Ok(())
    }

    fn expect(&mut self, token: Token, expected: &'static str) -> Result<(), ExprError> {
        if self.eat(&token) {
            return Ok(());
        }
        let Spanned { token, offset } = &self.tokens[self.pos];
        Err(ExprError::Expected {
            expected,
            found: token.describe(),
            offset: *offset,
        })
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.peek() == token {
            self.advance();
            true
        } else {
            false
        }
    }

    fn peek(&self) -> &Token {
        &self.tokens[self.pos].token
    }

    // Never steps past the trailing Eof.
    fn advance(&mut self) {
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
    }
}

fn negate(n: &serde_json::Number) -> Option<Value> {
    if let Some(i) = n.as_i64() {
        return Some(Value::from(i.checked_neg()?));
    }
    serde_json::Number::from_f64(-n.as_f64()?).map(Value::Number)
}

fn binary(op: BinaryOp, left: Expr, right: Expr) -> Expr {
    Expr::Binary {
        op,
        left: Box::new(left),
        right: Box::new(right),
    }
}
