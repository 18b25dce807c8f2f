use std::fmt;

use super::ActError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    Ident(String),
    Number(u64),
    /// Value and the text as written.
    Hex(u64, String),
    /// `=`: assignment at the start of a statement, equality elsewhere.
    Assign,
    /// `==`
    Equal,
    /// `!=`
    NotEqual,
    /// `||`
    OrOr,
    /// `&&`
    AndAnd,
    /// `|`
    Or,
    /// `&`
    And,
    LParen,
    RParen,
    /// `;` or a line break.
    Separator,
    Eof,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Ident(x) => write!(f, "`{}`", x),
            Token::Number(x) => write!(f, "`{}`", x),
            Token::Hex(_, text) => write!(f, "`{}`", text),
            Token::Assign => f.write_str("`=`"),
            Token::Equal => f.write_str("`==`"),
            Token::NotEqual => f.write_str("`!=`"),
            Token::OrOr => f.write_str("`||`"),
            Token::AndAnd => f.write_str("`&&`"),
            Token::Or => f.write_str("`|`"),
            Token::And => f.write_str("`&`"),
            Token::LParen => f.write_str("`(`"),
            Token::RParen => f.write_str("`)`"),
            Token::Separator => f.write_str("end of statement"),
            Token::Eof => f.write_str("end of input"),
        }
    }
}

/// 1-based position of a token in the source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Position {
    pub line: usize,
    pub column: usize,
}

/// Splits rule text into tokens. `#` starts a comment running to the end of
/// the line.
pub struct Scanner<'a> {
    chars: std::iter::Peekable<std::str::CharIndices<'a>>,
    text: &'a str,
    line: usize,
    column: usize,
}

impl<'a> Scanner<'a> {
    pub fn new(text: &'a str) -> Scanner<'a> {
        Scanner {
            chars: text.char_indices().peekable(),
            text,
            line: 1,
            column: 1,
        }
    }

    #[inline(always)]
    fn position(&self) -> Position {
        Position {
            line: self.line,
            column: self.column,
        }
    }

    fn bump(&mut self) -> Option<(usize, char)> {
        let next = self.chars.next();
        if let Some((_, c)) = next {
            if c == '\n' {
                self.line += 1;
                self.column = 1;
            } else {
                self.column += 1;
            }
        }
        next
    }

    fn peek(&mut self) -> Option<char> {
        self.chars.peek().map(|(_, c)| *c)
    }

    fn error<S: Into<String>>(&self, at: Position, message: S) -> ActError {
        ActError::Syntax {
            line: at.line,
            column: at.column,
            message: message.into(),
        }
    }

    /// Consume a run of characters matching `pred`. The slice runs from
    /// `start`, which may lie before characters already consumed.
    fn take_while<F: Fn(char) -> bool>(&mut self, start: usize, pred: F) -> &'a str {
        while let Some(c) = self.peek() {
            if !pred(c) {
                break;
            }
            self.bump();
        }
        let end = self
            .chars
            .peek()
            .map(|(i, _)| *i)
            .unwrap_or_else(|| self.text.len());
        &self.text[start..end]
    }

    /// Next token and where it started.
    pub fn next_token(&mut self) -> Result<(Token, Position), ActError> {
        loop {
            match self.peek() {
                Some('#') => {
                    while let Some(c) = self.peek() {
                        if c == '\n' {
                            break;
                        }
                        self.bump();
                    }
                }
                Some(c) if c != '\n' && c.is_whitespace() => {
                    self.bump();
                }
                _ => break,
            }
        }

        let at = self.position();
        let (start, c) = match self.bump() {
            Some(x) => x,
            None => return Ok((Token::Eof, at)),
        };

        let token = match c {
            '\n' | ';' => Token::Separator,
            '(' => Token::LParen,
            ')' => Token::RParen,
            '=' => {
                if self.peek() == Some('=') {
                    self.bump();
                    Token::Equal
                } else {
                    Token::Assign
                }
            }
            '!' => {
                if self.peek() == Some('=') {
                    self.bump();
                    Token::NotEqual
                } else {
                    return Err(self.error(at, "expected `!=`"));
                }
            }
            '|' => {
                if self.peek() == Some('|') {
                    self.bump();
                    Token::OrOr
                } else {
                    Token::Or
                }
            }
            '&' => {
                if self.peek() == Some('&') {
                    self.bump();
                    Token::AndAnd
                } else {
                    Token::And
                }
            }
            '0' if matches!(self.peek(), Some('x') | Some('X')) => {
                self.bump();
                let digits = self.take_while(start + 2, |c| c.is_ascii_hexdigit());
                if digits.is_empty() {
                    return Err(self.error(at, "hex literal has no digits"));
                }
                let value = u64::from_str_radix(digits, 16)
                    .map_err(|_| self.error(at, "hex literal does not fit in 64 bits"))?;
                Token::Hex(value, format!("0x{}", digits))
            }
            c if c.is_ascii_digit() => {
                let digits = self.take_while(start, |c| c.is_ascii_digit());
                let value = digits
                    .parse::<u64>()
                    .map_err(|_| self.error(at, "number does not fit in 64 bits"))?;
                Token::Number(value)
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let ident = self.take_while(start, |c| c.is_ascii_alphanumeric() || c == '_');
                Token::Ident(ident.to_string())
            }
            c => return Err(self.error(at, format!("unexpected character `{}`", c))),
        };

        // A literal running straight into a letter, e.g. `12ab`.
        if matches!(token, Token::Number(_) | Token::Hex(..)) {
            if let Some(c) = self.peek() {
                if c.is_ascii_alphabetic() || c == '_' {
                    return Err(self.error(at, "malformed number"));
                }
            }
        }

        Ok((token, at))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(text: &str) -> Vec<Token> {
        let mut scanner = Scanner::new(text);
        let mut out = vec![];
        loop {
            let (token, _) = scanner.next_token().unwrap();
            if token == Token::Eof {
                break;
            }
            out.push(token);
        }
        out
    }

    #[test]
    fn scans_operators_and_literals() {
        assert_eq!(
            tokens("r = (user_id == 0x1F) || role & 4 != 0"),
            vec![
                Token::Ident("r".into()),
                Token::Assign,
                Token::LParen,
                Token::Ident("user_id".into()),
                Token::Equal,
                Token::Hex(31, "0x1F".into()),
                Token::RParen,
                Token::OrOr,
                Token::Ident("role".into()),
                Token::And,
                Token::Number(4),
                Token::NotEqual,
                Token::Number(0),
            ]
        );
    }

    #[test]
    fn comments_and_separators() {
        assert_eq!(
            tokens("r = 1 # anyone\nw = 0;"),
            vec![
                Token::Ident("r".into()),
                Token::Assign,
                Token::Number(1),
                Token::Separator,
                Token::Ident("w".into()),
                Token::Assign,
                Token::Number(0),
                Token::Separator,
            ]
        );
    }

    #[test]
    fn reports_positions() {
        let mut scanner = Scanner::new("r = 1\nw = $");
        let err = loop {
            match scanner.next_token() {
                Ok((Token::Eof, _)) => panic!("expected an error"),
                Ok(_) => continue,
                Err(e) => break e,
            }
        };
        assert_eq!(
            err,
            ActError::Syntax {
                line: 2,
                column: 5,
                message: "unexpected character `$`".into()
            }
        );
    }

    #[test]
    fn single_character_tokens() {
        assert_eq!(
            tokens("r = 1"),
            vec![Token::Ident("r".into()), Token::Assign, Token::Number(1)]
        );
        assert_eq!(tokens("7"), vec![Token::Number(7)]);
        assert_eq!(tokens("x"), vec![Token::Ident("x".into())]);
        assert_eq!(tokens("0x1"), vec![Token::Hex(1, "0x1".into())]);
        assert_eq!(
            tokens("a&b"),
            vec![Token::Ident("a".into()), Token::And, Token::Ident("b".into())]
        );
    }

    #[test]
    fn rejects_bad_literals() {
        assert!(Scanner::new("0x").next_token().is_err());
        assert!(Scanner::new("12ab").next_token().is_err());
        assert!(Scanner::new("99999999999999999999").next_token().is_err());
        assert!(Scanner::new("!").next_token().is_err());
    }
}
