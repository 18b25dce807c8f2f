use super::parser::MAX_DEPTH;
use super::tree::Operator;
use super::ActError;

/// Evaluate canonical rule text such as `RelationalEqual(user_id,1)`.
///
/// Variables are looked up through `resolve`. Both operands of every
/// operator are evaluated, left first, before the operator is applied.
pub fn evaluate<F>(text: &str, mut resolve: F) -> Result<u64, ActError>
where
    F: FnMut(&str) -> Result<u64, ActError>,
{
    let mut cursor = Cursor {
        text,
        pos: 0,
        depth: 0,
    };
    let value = cursor.expression(&mut resolve)?;
    if cursor.pos != text.len() {
        return Err(cursor.malformed("trailing input"));
    }
    Ok(value)
}

struct Cursor<'a> {
    text: &'a str,
    pos: usize,
    depth: usize,
}

impl<'a> Cursor<'a> {
    fn malformed(&self, what: &str) -> ActError {
        ActError::Malformed(format!("{} at offset {} in `{}`", what, self.pos, self.text))
    }

    fn peek(&self) -> Option<u8> {
        self.text.as_bytes().get(self.pos).copied()
    }

    fn expect(&mut self, byte: u8) -> Result<(), ActError> {
        if self.peek() == Some(byte) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.malformed(&format!("expected `{}`", byte as char)))
        }
    }

    fn word(&mut self) -> &'a str {
        let start = self.pos;
        while let Some(b) = self.peek() {
            if b == b'(' || b == b',' || b == b')' {
                break;
            }
            self.pos += 1;
        }
        &self.text[start..self.pos]
    }

    fn expression<F>(&mut self, resolve: &mut F) -> Result<u64, ActError>
    where
        F: FnMut(&str) -> Result<u64, ActError>,
    {
        let word = self.word();
        if word.is_empty() {
            return Err(self.malformed("expected a value"));
        }

        if self.peek() == Some(b'(') {
            let op = Operator::from_name(word)
                .ok_or_else(|| ActError::UnknownOperator(word.to_string()))?;
            if self.depth == MAX_DEPTH {
                return Err(self.malformed("expression nests too deeply"));
            }
            self.depth += 1;
            self.pos += 1;
            let left = self.expression(resolve)?;
            self.expect(b',')?;
            let right = self.expression(resolve)?;
            self.expect(b')')?;
            self.depth -= 1;
            return Ok(op.apply(left, right));
        }

        leaf(word, resolve).map_err(|e| match e {
            ActError::Malformed(_) => self.malformed(&format!("bad operand `{}`", word)),
            e => e,
        })
    }
}

fn leaf<F>(word: &str, resolve: &mut F) -> Result<u64, ActError>
where
    F: FnMut(&str) -> Result<u64, ActError>,
{
    let bytes = word.as_bytes();

    if let Some(hex) = word.strip_prefix("0x").or_else(|| word.strip_prefix("0X")) {
        return u64::from_str_radix(hex, 16).map_err(|_| ActError::Malformed(word.into()));
    }

    if bytes[0].is_ascii_digit() {
        return word.parse::<u64>().map_err(|_| ActError::Malformed(word.into()));
    }

    if (bytes[0].is_ascii_alphabetic() || bytes[0] == b'_')
        && bytes.iter().all(|b| b.is_ascii_alphanumeric() || *b == b'_')
    {
        return resolve(word);
    }

    Err(ActError::Malformed(word.into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::act::tree::Tree;

    fn vars(name: &str) -> Result<u64, ActError> {
        match name {
            "user_id" => Ok(1),
            "role" => Ok(0b0110),
            _ => Err(ActError::UndefinedVariable(name.into())),
        }
    }

    #[test]
    fn evaluates_canonical_text() {
        assert_eq!(evaluate("RelationalEqual(user_id,1)", vars).unwrap(), 1);
        assert_eq!(evaluate("RelationalEqual(user_id,2)", vars).unwrap(), 0);
        assert_eq!(evaluate("BitwiseAnd(role,0x4)", vars).unwrap(), 4);
        assert_eq!(evaluate("BitwiseOr(role,1)", vars).unwrap(), 7);
        assert_eq!(evaluate("LogicalAnd(role,0)", vars).unwrap(), 0);
        assert_eq!(evaluate("LogicalOr(0,role)", vars).unwrap(), 1);
        assert_eq!(evaluate("RelationalNotEqual(role,6)", vars).unwrap(), 0);
        assert_eq!(evaluate("42", vars).unwrap(), 42);
    }

    #[test]
    fn both_operands_are_resolved() {
        let mut seen = vec![];
        let value = evaluate("LogicalOr(a,b)", |name| {
            seen.push(name.to_string());
            Ok(1)
        })
        .unwrap();
        assert_eq!(value, 1);
        assert_eq!(seen, vec!["a", "b"]);
    }

    #[test]
    fn undefined_variables_fail_the_whole_evaluation() {
        let err = evaluate("LogicalOr(1,missing)", vars).unwrap_err();
        assert_eq!(err, ActError::UndefinedVariable("missing".into()));
    }

    #[test]
    fn malformed_text() {
        for bad in &[
            "",
            "RelationalEqual(1,2",
            "RelationalEqual(1)",
            "RelationalEqual(1,2)x",
            "1a",
            "0xZZ",
            "(1,2)",
        ] {
            let err = evaluate(bad, vars).unwrap_err();
            assert!(matches!(err, ActError::Malformed(_)), "{}: {:?}", bad, err);
        }
        assert_eq!(
            evaluate("Xor(1,2)", vars).unwrap_err(),
            ActError::UnknownOperator("Xor".into())
        );
    }

    #[test]
    fn deep_text_is_rejected() {
        let deep = format!("{}1{}", "LogicalOr(".repeat(4000), ",0)".repeat(4000));
        let err = evaluate(&deep, vars).unwrap_err();
        assert!(matches!(err, ActError::Malformed(_)), "{:?}", err);
    }

    #[test]
    fn compiled_text_matches_direct_evaluation() {
        let cases: &[(&str, u64)] = &[
            ("r = user_id = 1", 1),
            ("r = user_id != 1 || role & 0x2", 1),
            ("r = (role & 0x8) != 0 && user_id", 0),
            ("r = role | 0x1 = 7", 6),
            ("r = user_id && role && 0", 0),
        ];

        for (text, expected) in cases {
            let mut tree = Tree::new();
            let mut compiled = String::new();
            tree.compile(text, |_, s| compiled = s.to_string()).unwrap();
            assert_eq!(evaluate(&compiled, vars).unwrap(), *expected, "{}", text);
        }
    }
}
