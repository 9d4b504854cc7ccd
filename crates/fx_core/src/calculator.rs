//! Arithmetic evaluator for the amount calculator.
//!
//! Accepts decimal literals and the four operators `+ - * /` only. `*` and
//! `/` bind tighter than `+` and `-`; all operators are left-associative.
//! A minus directly before a number (at the start or after an operator) is a
//! sign. Evaluation uses `Decimal` so `0.1 + 0.2` is exactly `0.3`.

use std::{iter::Peekable, str::CharIndices, str::FromStr};

use rust_decimal::Decimal;

use crate::errors::ExpressionError;

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(Decimal),
    Plus,
    Minus,
    Star,
    Slash,
}

struct Lexer<'a> {
    source: &'a str,
    chars: Peekable<CharIndices<'a>>,
}

impl<'a> Lexer<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            source,
            chars: source.char_indices().peekable(),
        }
    }

    /// Tokens paired with their byte offset, for error positions.
    fn tokenize(mut self) -> Result<Vec<(usize, Token)>, ExpressionError> {
        let mut tokens = Vec::new();
        while let Some(&(position, ch)) = self.chars.peek() {
            let token = match ch {
                c if c.is_whitespace() => {
                    self.chars.next();
                    continue;
                }
                '0'..='9' | '.' => self.number(position)?,
                '+' => self.single(Token::Plus),
                '-' => self.single(Token::Minus),
                '*' => self.single(Token::Star),
                '/' => self.single(Token::Slash),
                other => {
                    return Err(ExpressionError::UnexpectedChar {
                        ch: other,
                        position,
                    })
                }
            };
            tokens.push((position, token));
        }
        Ok(tokens)
    }

    fn single(&mut self, token: Token) -> Token {
        self.chars.next();
        token
    }

    fn number(&mut self, start: usize) -> Result<Token, ExpressionError> {
        let mut end = start;
        let mut dots = 0;
        while let Some(&(position, ch)) = self.chars.peek() {
            match ch {
                '0'..='9' => {}
                '.' => dots += 1,
                _ => break,
            }
            end = position + ch.len_utf8();
            self.chars.next();
        }

        let literal = &self.source[start..end];
        if dots > 1 || literal == "." {
            return Err(ExpressionError::MalformedNumber(literal.to_string()));
        }
        Decimal::from_str(literal)
            .map(Token::Number)
            .map_err(|_| ExpressionError::MalformedNumber(literal.to_string()))
    }
}

struct Parser {
    tokens: Vec<(usize, Token)>,
    cursor: usize,
    end: usize,
}

impl Parser {
    // expr := term (('+' | '-') term)*
    fn expression(&mut self) -> Result<Decimal, ExpressionError> {
        let mut value = self.term()?;
        while let Some(token) = self.peek() {
            let op = match token {
                Token::Plus => Decimal::checked_add,
                Token::Minus => Decimal::checked_sub,
                _ => break,
            };
            self.cursor += 1;
            let rhs = self.term()?;
            value = op(value, rhs).ok_or(ExpressionError::Overflow)?;
        }
        Ok(value)
    }

    // term := factor (('*' | '/') factor)*
    fn term(&mut self) -> Result<Decimal, ExpressionError> {
        let mut value = self.factor()?;
        while let Some(token) = self.peek() {
            let divide = match token {
                Token::Star => false,
                Token::Slash => true,
                _ => break,
            };
            self.cursor += 1;
            let rhs = self.factor()?;
            value = if divide {
                if rhs.is_zero() {
                    return Err(ExpressionError::DivisionByZero);
                }
                value.checked_div(rhs)
            } else {
                value.checked_mul(rhs)
            }
            .ok_or(ExpressionError::Overflow)?;
        }
        Ok(value)
    }

    // factor := '-'* number
    fn factor(&mut self) -> Result<Decimal, ExpressionError> {
        let mut negate = false;
        while let Some(Token::Minus) = self.peek() {
            negate = !negate;
            self.cursor += 1;
        }

        let position = self.position();
        match self.peek() {
            Some(Token::Number(value)) => {
                let value = *value;
                self.cursor += 1;
                Ok(if negate { -value } else { value })
            }
            _ => Err(ExpressionError::ExpectedOperand(position)),
        }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.cursor).map(|(_, token)| token)
    }

    fn position(&self) -> usize {
        self.tokens
            .get(self.cursor)
            .map(|(position, _)| *position)
            .unwrap_or(self.end)
    }
}

/// Evaluates `source` and returns the normalized result.
pub fn evaluate(source: &str) -> Result<Decimal, ExpressionError> {
    if source.trim().is_empty() {
        return Err(ExpressionError::Empty);
    }

    let tokens = Lexer::new(source).tokenize()?;
    let mut parser = Parser {
        tokens,
        cursor: 0,
        end: source.len(),
    };
    let value = parser.expression()?;
    if parser.cursor < parser.tokens.len() {
        return Err(ExpressionError::ExpectedOperand(parser.position()));
    }
    Ok(value.normalize())
}
