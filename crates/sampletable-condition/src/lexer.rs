//! Tokenizer for condition strings

use crate::error::ConditionError;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Token<'a> {
    Ident(&'a str),
    Number(&'a str),
    Str(String),
    True,
    False,
    Null,
    And,
    Or,
    Not,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Minus,
    LParen,
    RParen,
    Eof,
}

impl Token<'_> {
    pub(crate) fn describe(&self) -> String {
        match self {
            Self::Ident(s) | Self::Number(s) => (*s).to_string(),
            Self::Str(s) => format!("{s:?}"),
            Self::True => "true".to_string(),
            Self::False => "false".to_string(),
            Self::Null => "null".to_string(),
            Self::And => "and".to_string(),
            Self::Or => "or".to_string(),
            Self::Not => "not".to_string(),
            Self::Eq => "==".to_string(),
            Self::Ne => "!=".to_string(),
            Self::Lt => "<".to_string(),
            Self::Le => "<=".to_string(),
            Self::Gt => ">".to_string(),
            Self::Ge => ">=".to_string(),
            Self::Minus => "-".to_string(),
            Self::LParen => "(".to_string(),
            Self::RParen => ")".to_string(),
            Self::Eof => "end of input".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct SpannedToken<'a> {
    pub token: Token<'a>,
    pub position: usize,
}

pub(crate) struct Lexer<'a> {
    input: &'a str,
    offset: usize,
}

impl<'a> Lexer<'a> {
    pub(crate) const fn new(input: &'a str) -> Self {
        Self { input, offset: 0 }
    }

    pub(crate) fn lex(mut self) -> Result<Vec<SpannedToken<'a>>, ConditionError> {
        let mut tokens = Vec::new();
        let bytes = self.input.as_bytes();

        while let Some(&ch) = bytes.get(self.offset) {
            let start = self.offset;
            let token = match ch {
                b' ' | b'\t' | b'\n' | b'\r' => {
                    self.offset += 1;
                    continue;
                }
                b'(' => self.single(Token::LParen),
                b')' => self.single(Token::RParen),
                b'-' => self.single(Token::Minus),
                b'=' => {
                    // both `=` and `==` mean equality
                    self.offset += if self.peek(bytes) == Some(b'=') { 2 } else { 1 };
                    Token::Eq
                }
                b'!' => self.with_optional_eq(bytes, Token::Ne, Token::Not),
                b'<' => self.with_optional_eq(bytes, Token::Le, Token::Lt),
                b'>' => self.with_optional_eq(bytes, Token::Ge, Token::Gt),
                b'&' => self.doubled(bytes, b'&', Token::And, "&&")?,
                b'|' => self.doubled(bytes, b'|', Token::Or, "||")?,
                b'\'' | b'"' => self.string(ch)?,
                b'0'..=b'9' | b'.' => self.number(bytes),
                b'a'..=b'z' | b'A'..=b'Z' | b'_' => {
                    self.consume_while(bytes, |b| b.is_ascii_alphanumeric() || b == b'_');
                    keyword_or_ident(&self.input[start..self.offset])
                }
                _ => {
                    let found = self.input[start..].chars().next().map_or_else(String::new, String::from);
                    return Err(ConditionError::UnexpectedToken {
                        expected: "column, literal or operator",
                        found,
                        position: start,
                    });
                }
            };
            tokens.push(SpannedToken { token, position: start });
        }

        if tokens.is_empty() {
            return Err(ConditionError::EmptyInput);
        }
        tokens.push(SpannedToken {
            token: Token::Eof,
            position: self.offset,
        });
        Ok(tokens)
    }

    fn single(&mut self, token: Token<'a>) -> Token<'a> {
        self.offset += 1;
        token
    }

    fn with_optional_eq(&mut self, bytes: &[u8], with_eq: Token<'a>, without: Token<'a>) -> Token<'a> {
        if self.peek(bytes) == Some(b'=') {
            self.offset += 2;
            with_eq
        } else {
            self.offset += 1;
            without
        }
    }

    fn doubled(
        &mut self,
        bytes: &[u8],
        ch: u8,
        token: Token<'a>,
        expected: &'static str,
    ) -> Result<Token<'a>, ConditionError> {
        if self.peek(bytes) == Some(ch) {
            self.offset += 2;
            Ok(token)
        } else {
            Err(ConditionError::UnexpectedToken {
                expected,
                found: char::from(ch).to_string(),
                position: self.offset,
            })
        }
    }

    fn number(&mut self, bytes: &[u8]) -> Token<'a> {
        let start = self.offset;
        self.consume_while(bytes, |b| b.is_ascii_digit() || b == b'.');
        if matches!(bytes.get(self.offset), Some(b'e' | b'E')) {
            self.offset += 1;
            if matches!(bytes.get(self.offset), Some(b'+' | b'-')) {
                self.offset += 1;
            }
            self.consume_while(bytes, |b| b.is_ascii_digit());
        }
        Token::Number(&self.input[start..self.offset])
    }

    fn string(&mut self, quote: u8) -> Result<Token<'a>, ConditionError> {
        let start = self.offset;
        self.offset += 1;
        let mut out = String::new();
        let mut chars = self.input[self.offset..].char_indices();
        while let Some((i, c)) = chars.next() {
            match c {
                '\\' => {
                    let Some((_, escaped)) = chars.next() else { break };
                    out.push(match escaped {
                        'n' => '\n',
                        't' => '\t',
                        'r' => '\r',
                        other => other,
                    });
                }
                c if c == char::from(quote) => {
                    self.offset += i + 1;
                    return Ok(Token::Str(out));
                }
                c => out.push(c),
            }
        }
        Err(ConditionError::UnterminatedString { position: start })
    }

    fn peek(&self, bytes: &[u8]) -> Option<u8> {
        bytes.get(self.offset + 1).copied()
    }

    fn consume_while(&mut self, bytes: &[u8], condition: impl Fn(u8) -> bool) {
        while let Some(&b) = bytes.get(self.offset) {
            if !condition(b) {
                break;
            }
            self.offset += 1;
        }
    }
}

fn keyword_or_ident(slice: &str) -> Token<'_> {
    match slice {
        "and" | "AND" => Token::And,
        "or" | "OR" => Token::Or,
        "not" | "NOT" => Token::Not,
        "true" | "True" | "TRUE" => Token::True,
        "false" | "False" | "FALSE" => Token::False,
        "null" | "None" | "NULL" => Token::Null,
        _ => Token::Ident(slice),
    }
}
