//! Recursive descent over rule statements.
//!
//! ```text
//! program   := statement? (SEP statement?)*
//! statement := IDENT '=' or
//! or        := and ('||' and)*
//! and       := bitor ('&&' bitor)*
//! bitor     := bitand ('|' bitand)*
//! bitand    := equality ('&' equality)*
//! equality  := primary (('=' | '==' | '!=') primary)*
//! primary   := NUMBER | HEX | IDENT | '(' or ')'
//! ```
//!
//! Binary operators associate to the left. Parentheses may nest at most
//! [`MAX_DEPTH`] levels and no expression tree may grow deeper than that.

use super::scanner::{Position, Scanner, Token};
use super::tree::{NodeId, Operator, Tree};
use super::ActError;

/// Deepest nesting a rule may use.
pub const MAX_DEPTH: usize = 256;

/// Parse `text` into `tree`, pushing one root per statement.
pub fn parse(text: &str, tree: &mut Tree) -> Result<(), ActError> {
    let mut parser = Parser::new(text, tree)?;
    parser.program()
}

struct Parser<'a, 't> {
    scanner: Scanner<'a>,
    tree: &'t mut Tree,
    current: Token,
    at: Position,
    nesting: usize,
}

/// A parsed subexpression and the depth of its tree.
type Parsed = (NodeId, usize);

impl<'a, 't> Parser<'a, 't> {
    fn new(text: &'a str, tree: &'t mut Tree) -> Result<Self, ActError> {
        let mut scanner = Scanner::new(text);
        let (current, at) = scanner.next_token()?;
        Ok(Parser {
            scanner,
            tree,
            current,
            at,
            nesting: 0,
        })
    }

    fn advance(&mut self) -> Result<Token, ActError> {
        let (next, at) = self.scanner.next_token()?;
        self.at = at;
        Ok(std::mem::replace(&mut self.current, next))
    }

    fn too_deep(&self) -> ActError {
        ActError::Syntax {
            line: self.at.line,
            column: self.at.column,
            message: format!("rule nests deeper than {} levels", MAX_DEPTH),
        }
    }

    fn unexpected(&self, expected: &str) -> ActError {
        ActError::Syntax {
            line: self.at.line,
            column: self.at.column,
            message: format!("expected {}, found {}", expected, self.current),
        }
    }

    fn program(&mut self) -> Result<(), ActError> {
        loop {
            match self.current {
                Token::Eof => return Ok(()),
                Token::Separator => {
                    self.advance()?;
                }
                _ => {
                    self.statement()?;
                    match self.current {
                        Token::Separator | Token::Eof => {}
                        _ => return Err(self.unexpected("end of statement")),
                    }
                }
            }
        }
    }

    fn statement(&mut self) -> Result<(), ActError> {
        let root = match &self.current {
            Token::Ident(name) => name.clone(),
            _ => return Err(self.unexpected("a rule name")),
        };
        self.advance()?;

        if self.current != Token::Assign {
            return Err(self.unexpected("`=`"));
        }
        self.advance()?;

        let (node, _) = self.or()?;
        self.tree.push(root, node);
        Ok(())
    }

    /// One left-associative precedence level.
    fn level<F>(
        &mut self,
        ops: &[(Token, Operator)],
        mut next: F,
    ) -> Result<Parsed, ActError>
    where
        F: FnMut(&mut Self) -> Result<Parsed, ActError>,
    {
        let (mut left, mut depth) = next(self)?;
        while let Some(op) = ops
            .iter()
            .find(|(token, _)| *token == self.current)
            .map(|(_, op)| *op)
        {
            self.advance()?;
            let (right, right_depth) = next(self)?;
            depth = depth.max(right_depth) + 1;
            if depth > MAX_DEPTH {
                return Err(self.too_deep());
            }
            left = self.tree.add_expression(op, left, right);
        }
        Ok((left, depth))
    }

    fn or(&mut self) -> Result<Parsed, ActError> {
        self.level(&[(Token::OrOr, Operator::LogicalOr)], Self::and)
    }

    fn and(&mut self) -> Result<Parsed, ActError> {
        self.level(&[(Token::AndAnd, Operator::LogicalAnd)], Self::bitor)
    }

    fn bitor(&mut self) -> Result<Parsed, ActError> {
        self.level(&[(Token::Or, Operator::BitwiseOr)], Self::bitand)
    }

    fn bitand(&mut self) -> Result<Parsed, ActError> {
        self.level(&[(Token::And, Operator::BitwiseAnd)], Self::equality)
    }

    fn equality(&mut self) -> Result<Parsed, ActError> {
        self.level(
            &[
                (Token::Assign, Operator::RelationalEqual),
                (Token::Equal, Operator::RelationalEqual),
                (Token::NotEqual, Operator::RelationalNotEqual),
            ],
            Self::primary,
        )
    }

    fn primary(&mut self) -> Result<Parsed, ActError> {
        let node = match &self.current {
            Token::Number(value) => (self.tree.add_value(*value, false), 0),
            Token::Hex(value, text) => (self.tree.add_hex(*value, text.clone()), 0),
            Token::Ident(name) => (self.tree.add_variable(name.clone()), 0),
            Token::LParen => {
                if self.nesting == MAX_DEPTH {
                    return Err(self.too_deep());
                }
                self.nesting += 1;
                self.advance()?;
                let inner = self.or()?;
                if self.current != Token::RParen {
                    return Err(self.unexpected("`)`"));
                }
                self.nesting -= 1;
                inner
            }
            _ => return Err(self.unexpected("a value")),
        };
        self.advance()?;
        Ok(node)
    }
}
