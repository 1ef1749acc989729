//! Compiles a normalized WHERE predicate into reverse Polish notation.
//!
//! Operands are whole comparisons (`column OP literal` or `column IS NULL`) kept as text;
//! operators are the connectives. NOT binds tighter than AND, which binds tighter than
//! OR. Operators of equal precedence associate to the left.

use std::fmt;

use crate::error::{Error, Result};
use crate::parser::ParserState;
use crate::tokenizer::{Token, TokenKind, Tokenizer};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RpnToken {
    Comparison(String),
    And,
    Or,
    Not,
}

impl fmt::Display for RpnToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RpnToken::Comparison(text) => f.write_str(text),
            RpnToken::And => f.write_str("AND"),
            RpnToken::Or => f.write_str("OR"),
            RpnToken::Not => f.write_str("NOT"),
        }
    }
}

/// Renders RPN as space-separated tokens, e.g. `a=1 b=2 c=3 AND OR`.
pub fn render(rpn: &[RpnToken]) -> String {
    rpn.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" ")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pending {
    Op(Connective),
    OpenParen(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Connective {
    And,
    Or,
    Not,
}

impl Connective {
    fn precedence(self) -> u8 {
        match self {
            Connective::Not => 3,
            Connective::And => 2,
            Connective::Or => 1,
        }
    }

    fn into_rpn(self) -> RpnToken {
        match self {
            Connective::And => RpnToken::And,
            Connective::Or => RpnToken::Or,
            Connective::Not => RpnToken::Not,
        }
    }

    fn from_token(token: &Token) -> Option<Self> {
        if token.is_keyword("AND") {
            Some(Connective::And)
        } else if token.is_keyword("OR") {
            Some(Connective::Or)
        } else if token.is_keyword("NOT") {
            Some(Connective::Not)
        } else {
            None
        }
    }
}

struct Compiler<'a> {
    tokenizer: Tokenizer<'a>,
}

impl<'a> Compiler<'a> {
    fn error(&self, token: &Token, message: impl Into<String>) -> Error {
        Error::Parse {
            statement: "WHERE",
            state: ParserState::Where,
            token: token.to_string(),
            position: token.position,
            message: message.into(),
        }
    }

    fn next(&mut self) -> Result<Token> {
        self.tokenizer.next_token().map_err(|e| Error::Parse {
            statement: "WHERE",
            state: ParserState::Where,
            token: e.text,
            position: e.position,
            message: e.message.to_string(),
        })
    }

    fn peek_is_symbol(&mut self, symbol: char) -> Result<bool> {
        match self.tokenizer.peek() {
            Ok(token) => Ok(token.is_symbol(symbol)),
            Err(_) => Ok(false),
        }
    }

    /// Reads the rest of a comparison whose column token has already been consumed.
    fn comparison(&mut self, column: Token) -> Result<String> {
        let op_token = self.next()?;
        let op = if op_token.is_keyword("IS") {
            let null = self.next()?;
            if !null.is_keyword("NULL") {
                return Err(self.error(&null, "expected NULL after IS"));
            }
            return Ok(format!("{} IS NULL", column.value));
        } else if op_token.is_symbol('=') {
            "="
        } else if op_token.is_symbol('!') {
            let eq = self.next()?;
            if !eq.is_symbol('=') {
                return Err(self.error(&eq, "expected '=' after '!'"));
            }
            "!="
        } else if op_token.is_symbol('<') || op_token.is_symbol('>') {
            let or_equal = self.peek_is_symbol('=')?;
            match (op_token.is_symbol('<'), or_equal) {
                (true, true) => "<=",
                (true, false) => "<",
                (false, true) => ">=",
                (false, false) => ">",
            }
        } else {
            return Err(self.error(&op_token, "expected comparison operator"));
        };
        if op.len() == 2 && op != "!=" {
            self.next()?;
        }

        let literal = self.next()?;
        if literal.is_keyword("NULL") {
            return Err(self.error(&literal, "NULL is not a value; use IS NULL"));
        }
        match literal.kind {
            TokenKind::Number | TokenKind::StringLiteral => {}
            TokenKind::Identifier if Connective::from_token(&literal).is_none() => {}
            _ => return Err(self.error(&literal, "expected literal")),
        }
        Ok(format!("{}{}{}", column.value, op, literal.value))
    }
}

/// Shunting-yard over the predicate text.
pub fn compile(predicate: &str) -> Result<Vec<RpnToken>> {
    let mut compiler = Compiler {
        tokenizer: Tokenizer::qualified(predicate),
    };
    let mut output = Vec::new();
    let mut pending: Vec<Pending> = Vec::new();
    let mut expect_operand = true;

    loop {
        let token = compiler.next()?;
        if token.is_eof() {
            if expect_operand {
                return Err(compiler.error(&token, "incomplete predicate"));
            }
            break;
        }

        if let Some(connective) = Connective::from_token(&token) {
            match connective {
                Connective::Not => {
                    if !expect_operand {
                        return Err(compiler.error(&token, "NOT must precede an operand"));
                    }
                }
                Connective::And | Connective::Or => {
                    if expect_operand {
                        return Err(compiler.error(&token, "expected comparison"));
                    }
                    while let Some(Pending::Op(top)) = pending.last().copied() {
                        if top.precedence() < connective.precedence() {
                            break;
                        }
                        output.push(top.into_rpn());
                        pending.pop();
                    }
                    expect_operand = true;
                }
            }
            pending.push(Pending::Op(connective));
        } else if token.is_symbol('(') {
            if !expect_operand {
                return Err(compiler.error(&token, "unexpected '('"));
            }
            pending.push(Pending::OpenParen(token.position));
        } else if token.is_symbol(')') {
            if expect_operand {
                return Err(compiler.error(&token, "unexpected ')'"));
            }
            loop {
                match pending.pop() {
                    Some(Pending::Op(op)) => output.push(op.into_rpn()),
                    Some(Pending::OpenParen(_)) => break,
                    None => return Err(compiler.error(&token, "mismatched parentheses")),
                }
            }
        } else if token.kind == TokenKind::Identifier {
            if !expect_operand {
                return Err(compiler.error(&token, "expected AND or OR"));
            }
            output.push(RpnToken::Comparison(compiler.comparison(token)?));
            expect_operand = false;
        } else {
            return Err(compiler.error(&token, "expected column name"));
        }
    }

    while let Some(entry) = pending.pop() {
        match entry {
            Pending::Op(op) => output.push(op.into_rpn()),
            Pending::OpenParen(position) => {
                return Err(Error::Parse {
                    statement: "WHERE",
                    state: ParserState::Where,
                    token: "(".to_string(),
                    position,
                    message: "mismatched parentheses".to_string(),
                })
            }
        }
    }

    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compiled(predicate: &str) -> String {
        render(&compile(predicate).unwrap())
    }

    #[test]
    fn test_and_binds_tighter_than_or() {
        assert_eq!(compiled("a=1 OR b=2 AND c=3"), "a=1 b=2 c=3 AND OR");
        assert_eq!(compiled("a=1 AND b=2 OR c=3"), "a=1 b=2 AND c=3 OR");
    }

    #[test]
    fn test_left_associativity() {
        assert_eq!(compiled("a=1 OR b=2 OR c=3"), "a=1 b=2 OR c=3 OR");
        assert_eq!(compiled("a=1 AND b=2 AND c=3"), "a=1 b=2 AND c=3 AND");
    }

    #[test]
    fn test_parentheses_override_precedence() {
        assert_eq!(compiled("(a=1 OR b=2) AND c=3"), "a=1 b=2 OR c=3 AND");
    }

    #[test]
    fn test_not_binds_tightest() {
        assert_eq!(compiled("NOT a=1 AND b=2"), "a=1 NOT b=2 AND");
    }

    #[test]
    fn test_operators_and_literals() {
        assert_eq!(compiled("t.name!='x y'"), "t.name!='x y'");
        assert_eq!(compiled("n<=-3"), "n<=-3");
        assert_eq!(compiled("n>=3"), "n>=3");
        assert_eq!(compiled("n<3"), "n<3");
        assert_eq!(compiled("c IS NULL OR d>2"), "c IS NULL d>2 OR");
    }

    #[test]
    fn test_single_comparison() {
        assert_eq!(
            compile("id=7").unwrap(),
            vec![RpnToken::Comparison("id=7".to_string())]
        );
    }

    #[test]
    fn test_mismatched_parentheses() {
        assert!(compile("(a=1 OR b=2").unwrap_err().is_parse());
        assert!(compile("a=1) OR b=2").unwrap_err().is_parse());
    }

    #[test]
    fn test_malformed_predicates() {
        assert!(compile("a=1 b=2").unwrap_err().is_parse());
        assert!(compile("a=1 AND").unwrap_err().is_parse());
        assert!(compile("a 1").unwrap_err().is_parse());
        assert!(compile("a IS 1").unwrap_err().is_parse());
        assert!(compile("").unwrap_err().is_parse());
    }

    #[test]
    fn test_null_literal_requires_is_null() {
        for predicate in ["a=NULL", "a!=NULL", "t.a<NULL"] {
            match compile(predicate) {
                Err(Error::Parse { token, .. }) => assert_eq!(token, "NULL"),
                other => panic!("expected a parse error, got {:?}", other),
            }
        }
        assert_eq!(compiled("a IS NULL"), "a IS NULL");
    }
}
