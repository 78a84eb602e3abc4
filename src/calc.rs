//! Arithmetic expression evaluator.
//!
//! Grammar:
//!
//! ```text
//! expr   := term (('+' | '-') term)*
//! term   := factor (('*' | '/') factor)*
//! factor := '-' factor | '+' factor | number | '(' expr ')'
//! number := digits ['.' digits] | '.' digits
//! ```
//!
//! Anything else, including identifiers and exponent notation, is a parse
//! error. Nothing is ever executed. Parentheses and unary signs nest at most
//! [`MAX_DEPTH`] levels.

use thiserror::Error;

pub const MAX_DEPTH: usize = 256;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CalcError {
    #[error("empty expression")]
    Empty,
    #[error("unexpected character '{ch}' at position {pos}")]
    UnexpectedChar { ch: char, pos: usize },
    #[error("unexpected end of expression")]
    UnexpectedEnd,
    #[error("invalid number '{0}'")]
    InvalidNumber(String),
    #[error("division by zero")]
    DivisionByZero,
    #[error("result is not a finite number")]
    NonFinite,
    #[error("expression nested deeper than {0} levels")]
    TooDeep(usize),
}

/// Evaluates `input` and returns the result.
pub fn evaluate(input: &str) -> Result<f64, CalcError> {
    let mut parser = Parser {
        chars: input.chars().collect(),
        pos: 0,
        depth: 0,
    };
    parser.skip_ws();
    if parser.peek().is_none() {
        return Err(CalcError::Empty);
    }
    let value = parser.expr()?;
    parser.skip_ws();
    if let Some(ch) = parser.peek() {
        return Err(CalcError::UnexpectedChar {
            ch,
            pos: parser.pos,
        });
    }
    if !value.is_finite() {
        return Err(CalcError::NonFinite);
    }
    Ok(value)
}

/// Formats a result without a trailing `.0` for whole numbers.
pub fn format_result(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{}", value)
    }
}

struct Parser {
    chars: Vec<char>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn skip_ws(&mut self) {
        while matches!(self.peek(), Some(c) if c.is_whitespace()) {
            self.pos += 1;
        }
    }

    fn eat(&mut self, expected: char) -> bool {
        self.skip_ws();
        if self.peek() == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expr(&mut self) -> Result<f64, CalcError> {
        let mut value = self.term()?;
        loop {
            if self.eat('+') {
                value += self.term()?;
            } else if self.eat('-') {
                value -= self.term()?;
            } else {
                return Ok(value);
            }
        }
    }

    fn term(&mut self) -> Result<f64, CalcError> {
        let mut value = self.factor()?;
        loop {
            if self.eat('*') {
                value *= self.factor()?;
            } else if self.eat('/') {
                let divisor = self.factor()?;
                if divisor == 0.0 {
                    return Err(CalcError::DivisionByZero);
                }
                value /= divisor;
            } else {
                return Ok(value);
            }
        }
    }

    fn factor(&mut self) -> Result<f64, CalcError> {
        self.skip_ws();
        match self.peek() {
            None => Err(CalcError::UnexpectedEnd),
            Some(c @ ('-' | '+' | '(')) => {
                self.pos += 1;
                self.depth += 1;
                if self.depth > MAX_DEPTH {
                    return Err(CalcError::TooDeep(MAX_DEPTH));
                }
                let value = match c {
                    '-' => self.factor().map(|v| -v),
                    '+' => self.factor(),
                    _ => self.group(),
                };
                self.depth -= 1;
                value
            }
            Some(c) if c.is_ascii_digit() || c == '.' => self.number(),
            Some(ch) => Err(CalcError::UnexpectedChar { ch, pos: self.pos }),
        }
    }

    /// The rest of a parenthesized group, after its '('.
    fn group(&mut self) -> Result<f64, CalcError> {
        let value = self.expr()?;
        if self.eat(')') {
            return Ok(value);
        }
        self.skip_ws();
        match self.peek() {
            Some(ch) => Err(CalcError::UnexpectedChar { ch, pos: self.pos }),
            None => Err(CalcError::UnexpectedEnd),
        }
    }

    fn number(&mut self) -> Result<f64, CalcError> {
        let start = self.pos;
        while matches!(self.peek(), Some(c) if c.is_ascii_digit() || c == '.') {
            self.pos += 1;
        }
        let text: String = self.chars[start..self.pos].iter().collect();
        if text == "." || text.matches('.').count() > 1 {
            return Err(CalcError::InvalidNumber(text));
        }
        text.parse::<f64>()
            .map_err(|_| CalcError::InvalidNumber(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_precedence_and_parentheses() {
        assert_eq!(evaluate("2 + 3 * 4").unwrap(), 14.0);
        assert_eq!(evaluate("(2 + 3) * 4").unwrap(), 20.0);
        assert_eq!(evaluate("10 - 4 - 3").unwrap(), 3.0);
        assert_eq!(evaluate("8 / 4 / 2").unwrap(), 1.0);
    }

    #[test]
    fn test_unary_minus_and_decimals() {
        assert_eq!(evaluate("-3 + 5").unwrap(), 2.0);
        assert_eq!(evaluate("-(2 * -3)").unwrap(), 6.0);
        assert_eq!(evaluate("1.5 * .5").unwrap(), 0.75);
    }

    #[test]
    fn test_division_by_zero() {
        assert_eq!(evaluate("1 / 0"), Err(CalcError::DivisionByZero));
        assert_eq!(evaluate("1 / (2 - 2)"), Err(CalcError::DivisionByZero));
    }

    #[test]
    fn test_rejects_non_arithmetic_input() {
        assert!(matches!(
            evaluate("__import__('os')"),
            Err(CalcError::UnexpectedChar { ch: '_', .. })
        ));
        assert!(evaluate("2 ** 3").is_err());
        assert!(evaluate("1e3").is_err());
        assert_eq!(evaluate("1.2.3"), Err(CalcError::InvalidNumber("1.2.3".into())));
        assert_eq!(evaluate("(1 + 2"), Err(CalcError::UnexpectedEnd));
        assert_eq!(evaluate("   "), Err(CalcError::Empty));
        assert_eq!(evaluate("2 +"), Err(CalcError::UnexpectedEnd));
    }

    #[test]
    fn test_deep_nesting_is_rejected() {
        let parens = format!("{}1{}", "(".repeat(200_000), ")".repeat(200_000));
        assert_eq!(evaluate(&parens), Err(CalcError::TooDeep(MAX_DEPTH)));
        assert_eq!(
            evaluate(&format!("{}1", "-".repeat(200_000))),
            Err(CalcError::TooDeep(MAX_DEPTH))
        );

        let moderate = format!("{}7{}", "(".repeat(50), ")".repeat(50));
        assert_eq!(evaluate(&moderate).unwrap(), 7.0);
        assert_eq!(evaluate(&format!("{}1", "-".repeat(MAX_DEPTH))).unwrap(), 1.0);
        assert_eq!(evaluate("(1 + 2) * (3 + (4 - -1))").unwrap(), 24.0);
    }

    #[test]
    fn test_format_result() {
        assert_eq!(format_result(14.0), "14");
        assert_eq!(format_result(-2.0), "-2");
        assert_eq!(format_result(0.75), "0.75");
    }
}
