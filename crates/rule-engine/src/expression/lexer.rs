use serde_json::Number;

use super::ExprError;

/// Upper bound on tokens produced for a single expression.
const MAX_TOKENS: usize = 1024;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Token {
    Number(Number),
    Str(String),
    Ident(String),
    LParen,
    RParen,
    LBracket,
    RBracket,
    Dot,
    Comma,
    Question,
    Colon,
    Bang,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Lt,
    Le,
    Gt,
    Ge,
    /// `==` or `===`; both compare without coercion.
    Eq,
    /// `!=` or `!==`.
    NotEq,
    AndAnd,
    OrOr,
    Eof,
}

impl Token {
    /// Short human-readable form used in parse errors.
    pub(crate) fn describe(&self) -> String {
        match self {
            Token::Number(n) => format!("number {n}"),
            Token::Str(s) => format!("string {s:?}"),
            Token::Ident(name) => format!("identifier '{name}'"),
            Token::Eof => "end of expression".to_string(),
            other => format!("'{}'", other.symbol()),
        }
    }

    fn symbol(&self) -> &'static str {
        match self {
            Token::LParen => "(",
            Token::RParen => ")",
            Token::LBracket => "[",
            Token::RBracket => "]",
            Token::Dot => ".",
            Token::Comma => ",",
            Token::Question => "?",
            Token::Colon => ":",
            Token::Bang => "!",
            Token::Plus => "+",
            Token::Minus => "-",
            Token::Star => "*",
            Token::Slash => "/",
            Token::Percent => "%",
            Token::Lt => "<",
            Token::Le => "<=",
            Token::Gt => ">",
            Token::Ge => ">=",
            Token::Eq => "==",
            Token::NotEq => "!=",
            Token::AndAnd => "&&",
            Token::OrOr => "||",
            Token::Number(_) | Token::Str(_) | Token::Ident(_) | Token::Eof => "",
        }
    }
}

/// A token together with the byte offset it starts at.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Spanned {
    pub token: Token,
    pub offset: usize,
}

/// Split `source` into tokens. The returned list always ends with
/// [`Token::Eof`].
pub(crate) fn tokenize(source: &str) -> Result<Vec<Spanned>, ExprError> {
    let mut lexer = Lexer {
        source,
        input: source.as_bytes(),
        cursor: 0,
    };
    let mut tokens = Vec::new();
    loop {
        let spanned = lexer.next_token()?;
        let done = spanned.token == Token::Eof;
        tokens.push(spanned);
        if done {
            return Ok(tokens);
        }
        if tokens.len() > MAX_TOKENS {
            return Err(ExprError::TooManyTokens { limit: MAX_TOKENS });
        }
    }
}

struct Lexer<'a> {
    source: &'a str,
    input: &'a [u8],
    cursor: usize,
}

impl<'a> Lexer<'a> {
    fn next_token(&mut self) -> Result<Spanned, ExprError> {
        self.skip_whitespace();
        let offset = self.cursor;
        let Some(byte) = self.peek() else {
            return Ok(Spanned {
                token: Token::Eof,
                offset,
            });
        };

        let token = match byte {
            b'0'..=b'9' => self.number()?,
            b'"' | b'\'' => self.string(byte)?,
            b if is_ident_start(b) => self.ident(),
            _ => self.punct()?,
        };
        Ok(Spanned { token, offset })
    }

    fn punct(&mut self) -> Result<Token, ExprError> {
        let offset = self.cursor;
        let byte = self.bump();
        let token = match byte {
            b'(' => Token::LParen,
            b')' => Token::RParen,
            b'[' => Token::LBracket,
            b']' => Token::RBracket,
            b'.' => Token::Dot,
            b',' => Token::Comma,
            b'?' => Token::Question,
            b':' => Token::Colon,
            b'+' => Token::Plus,
            b'-' => Token::Minus,
            b'*' => Token::Star,
            b'/' => Token::Slash,
            b'%' => Token::Percent,
            b'<' => {
                if self.eat(b'=') {
                    Token::Le
                } else {
                    Token::Lt
                }
            }
            b'>' => {
                if self.eat(b'=') {
                    Token::Ge
                } else {
                    Token::Gt
                }
            }
            b'!' => {
                if self.eat(b'=') {
                    self.eat(b'=');
                    Token::NotEq
                } else {
                    Token::Bang
                }
            }
            b'=' if self.eat(b'=') => {
                self.eat(b'=');
                Token::Eq
            }
            b'&' if self.eat(b'&') => Token::AndAnd,
            b'|' if self.eat(b'|') => Token::OrOr,
            _ => {
                let ch = self.source[offset..].chars().next().unwrap_or('\u{fffd}');
                return Err(ExprError::UnexpectedChar { ch, offset });
            }
        };
        Ok(token)
    }

    fn number(&mut self) -> Result<Token, ExprError> {
        let start = self.cursor;
        let mut is_float = false;
        self.digits();
        if self.peek() == Some(b'.') && self.peek_at(1).is_some_and(|b| b.is_ascii_digit()) {
            is_float = true;
            self.cursor += 1;
            self.digits();
        }
        if matches!(self.peek(), Some(b'e' | b'E')) {
            is_float = true;
            self.cursor += 1;
            if matches!(self.peek(), Some(b'+' | b'-')) {
                self.cursor += 1;
            }
            if !self.peek().is_some_and(|b| b.is_ascii_digit()) {
                return Err(ExprError::InvalidNumber { offset: start });
            }
            self.digits();
        }
        if self.peek().is_some_and(is_ident_start) {
            return Err(ExprError::InvalidNumber { offset: start });
        }

        let text = &self.source[start..self.cursor];
        if !is_float {
            if let Ok(int) = text.parse::<i64>() {
                return Ok(Token::Number(int.into()));
            }
        }
        text.parse::<f64>()
            .ok()
            .and_then(Number::from_f64)
            .map(Token::Number)
            .ok_or(ExprError::InvalidNumber { offset: start })
    }

    fn string(&mut self, quote: u8) -> Result<Token, ExprError> {
        let start = self.cursor;
        self.cursor += 1;
        let mut out = String::new();
        loop {
            let rest = &self.source[self.cursor..];
            let Some(ch) = rest.chars().next() else {
                return Err(ExprError::UnterminatedString { offset: start });
            };
            self.cursor += ch.len_utf8();
            match ch {
                c if c as u32 == quote as u32 => break,
                '\\' => {
                    let escape_at = self.cursor - 1;
                    let Some(escaped) = self.peek() else {
                        return Err(ExprError::UnterminatedString { offset: start });
                    };
                    self.cursor += 1;
                    let translated = match escaped {
                        b'\\' => '\\',
                        b'\'' => '\'',
                        b'"' => '"',
                        b'n' => '\n',
                        b'r' => '\r',
                        b't' => '\t',
                        b'u' => self.unicode_escape(escape_at)?,
                        _ => return Err(ExprError::InvalidEscape { offset: escape_at }),
                    };
                    out.push(translated);
                }
                c => out.push(c),
            }
        }
        Ok(Token::Str(out))
    }

    fn unicode_escape(&mut self, escape_at: usize) -> Result<char, ExprError> {
        let hex = self
            .source
            .get(self.cursor..self.cursor + 4)
            .ok_or(ExprError::InvalidEscape { offset: escape_at })?;
        let code = u32::from_str_radix(hex, 16)
            .map_err(|_| ExprError::InvalidEscape { offset: escape_at })?;
        self.cursor += 4;
        char::from_u32(code).ok_or(ExprError::InvalidEscape { offset: escape_at })
    }

    fn ident(&mut self) -> Token {
        let start = self.cursor;
        while self.peek().is_some_and(is_ident_continue) {
            self.cursor += 1;
        }
        Token::Ident(self.source[start..self.cursor].to_string())
    }

    fn digits(&mut self) {
        while self.peek().is_some_and(|b| b.is_ascii_digit()) {
            self.cursor += 1;
        }
    }

    fn skip_whitespace(&mut self) {
        while self.peek().is_some_and(|b| b.is_ascii_whitespace()) {
            self.cursor += 1;
        }
    }

    fn eat(&mut self, expected: u8) -> bool {
        if self.peek() == Some(expected) {
            self.cursor += 1;
            true
        } else {
            false
        }
    }

    fn bump(&mut self) -> u8 {
        let byte = self.input[self.cursor];
        self.cursor += 1;
        byte
    }

    fn peek(&self) -> Option<u8> {
        self.input.get(self.cursor).copied()
    }

    fn peek_at(&self, ahead: usize) -> Option<u8> {
        self.input.get(self.cursor + ahead).copied()
    }
}

fn is_ident_start(byte: u8) -> bool {
    byte.is_ascii_alphabetic() || byte == b'_' || byte == b'$'
}

fn is_ident_continue(byte: u8) -> bool {
    is_ident_start(byte) || byte.is_ascii_digit()
}
