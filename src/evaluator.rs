//! Evaluates compiled WHERE predicates against rows on disk.

use std::cmp::Ordering;

use lazy_static::lazy_static;
use regex::Regex;
use tracing::debug;

use crate::error::{Error, Result};
use crate::storage::{parse_leading_integer, RowPaths, Storage};
use crate::where_clause::{compile, RpnToken};

lazy_static! {
    static ref COMPARISON: Regex = Regex::new(
        r"^(?P<column>[A-Za-z_][A-Za-z0-9_]*(?:\.[A-Za-z_][A-Za-z0-9_]*)?)(?: IS NULL|(?P<op>!=|<=|>=|=|<|>)(?P<literal>.+))$"
    )
    .unwrap();
}

/// Outcome of evaluating a predicate against one row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Evaluation {
    True,
    False,
    /// A column file was missing; the row is mid-creation or mid-deletion.
    Stale,
}

impl Evaluation {
    fn from_bool(value: bool) -> Self {
        if value {
            Evaluation::True
        } else {
            Evaluation::False
        }
    }

    pub fn is_match(self) -> bool {
        self == Evaluation::True
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    IsNull,
}

impl Op {
    fn parse(op: &str) -> Option<Self> {
        match op {
            "=" => Some(Op::Eq),
            "!=" => Some(Op::Ne),
            "<" => Some(Op::Lt),
            "<=" => Some(Op::Le),
            ">" => Some(Op::Gt),
            ">=" => Some(Op::Ge),
            _ => None,
        }
    }

    fn holds(self, ordering: Ordering) -> bool {
        match self {
            Op::Eq => ordering == Ordering::Equal,
            Op::Ne => ordering != Ordering::Equal,
            Op::Lt => ordering == Ordering::Less,
            Op::Le => ordering != Ordering::Greater,
            Op::Gt => ordering == Ordering::Greater,
            Op::Ge => ordering != Ordering::Less,
            Op::IsNull => ordering == Ordering::Equal,
        }
    }
}

/// One parsed `column OP literal` comparison.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Comparison<'a> {
    /// The column reference as written, possibly qualified.
    pub column: &'a str,
    op: Op,
    literal: &'a str,
}

impl<'a> Comparison<'a> {
    pub fn parse(text: &'a str) -> Result<Self> {
        let caps = COMPARISON
            .captures(text)
            .ok_or_else(|| Error::Internal(format!("malformed comparison {:?}", text)))?;
        let column = caps.name("column").map_or("", |m| m.as_str());
        let comparison = match (caps.name("op"), caps.name("literal")) {
            (Some(op), Some(literal)) => Comparison {
                column,
                op: Op::parse(op.as_str())
                    .ok_or_else(|| Error::Internal(format!("unknown operator in {:?}", text)))?,
                literal: literal.as_str(),
            },
            _ => Comparison {
                column,
                op: Op::IsNull,
                literal: "NULL",
            },
        };
        Ok(comparison)
    }

    /// Splits the column reference into its table (or `default_table`) and column.
    pub fn target<'b>(&self, default_table: &'b str) -> (&'b str, &'a str)
    where
        'a: 'b,
    {
        match self.column.split_once('.') {
            Some((table, column)) => (table, column),
            None => (default_table, self.column),
        }
    }

    /// The column name without its `table.` qualifier.
    fn bare_column(&self) -> &'a str {
        self.column.split_once('.').map_or(self.column, |(_, column)| column)
    }

    /// Compares a stored value with the literal. String literals are compared as text;
    /// anything else as a leading integer. Ordering on strings looks at as many leading
    /// bytes as the bare column name is long.
    fn matches(&self, stored: &str) -> bool {
        if self.op == Op::IsNull {
            return stored == "NULL";
        }
        if self.literal.starts_with('\'') {
            match self.op {
                Op::Eq | Op::Ne => self.op.holds(stored.cmp(self.literal)),
                _ => self.op.holds(prefix_cmp(stored, self.literal, self.bare_column().len())),
            }
        } else {
            let stored = parse_leading_integer(stored);
            let literal = parse_leading_integer(self.literal);
            self.op.holds(stored.cmp(&literal))
        }
    }
}

/// Case-insensitive comparison of at most the first `n` bytes of each side.
fn prefix_cmp(stored: &str, literal: &str, n: usize) -> Ordering {
    let a = stored.bytes().take(n).map(|b| b.to_ascii_lowercase());
    let b = literal.bytes().take(n).map(|b| b.to_ascii_lowercase());
    a.cmp(b)
}

enum Operand<'a> {
    Expression(&'a str),
    Result(bool),
}

/// A compiled WHERE predicate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Predicate {
    rpn: Vec<RpnToken>,
}

impl Predicate {
    pub fn compile(text: &str) -> Result<Self> {
        Ok(Self { rpn: compile(text)? })
    }

    pub fn from_rpn(rpn: Vec<RpnToken>) -> Self {
        Self { rpn }
    }

    pub fn comparisons(&self) -> impl Iterator<Item = Result<Comparison<'_>>> {
        self.rpn.iter().filter_map(|token| match token {
            RpnToken::Comparison(text) => Some(Comparison::parse(text)),
            _ => None,
        })
    }

    /// Evaluates against the rows bound in `rows`; unqualified columns belong to
    /// `default_table`.
    pub fn evaluate(
        &self,
        storage: &Storage,
        rows: &RowPaths,
        default_table: &str,
    ) -> Result<Evaluation> {
        let mut stack: Vec<Operand<'_>> = Vec::new();

        for token in &self.rpn {
            let connective = match token {
                RpnToken::Comparison(text) => {
                    stack.push(Operand::Expression(text.as_str()));
                    continue;
                }
                RpnToken::Not => return Err(Error::UnimplementedOperator("NOT".to_string())),
                RpnToken::And | RpnToken::Or => token,
            };

            let (Some(right), Some(left)) = (stack.pop(), stack.pop()) else {
                return Err(Error::Internal(format!("{} is missing an operand", connective)));
            };
            let left = match self.resolve(storage, rows, default_table, left)? {
                Some(value) => value,
                None => return Ok(Evaluation::Stale),
            };
            let right = match self.resolve(storage, rows, default_table, right)? {
                Some(value) => value,
                None => return Ok(Evaluation::Stale),
            };
            let combined = match connective {
                RpnToken::And => left && right,
                _ => left || right,
            };
            stack.push(Operand::Result(combined));
        }

        if stack.len() != 1 {
            return Err(Error::Internal(format!(
                "predicate left {} operands on the stack",
                stack.len()
            )));
        }
        match stack.pop() {
            Some(operand) => Ok(self
                .resolve(storage, rows, default_table, operand)?
                .map_or(Evaluation::Stale, Evaluation::from_bool)),
            None => Err(Error::Internal("empty predicate".to_string())),
        }
    }

    /// Reduces an operand to a boolean, reading storage for comparisons. `None` means a
    /// column file was missing.
    fn resolve(
        &self,
        storage: &Storage,
        rows: &RowPaths,
        default_table: &str,
        operand: Operand<'_>,
    ) -> Result<Option<bool>> {
        let text = match operand {
            Operand::Result(value) => return Ok(Some(value)),
            Operand::Expression(text) => text,
        };
        let comparison = Comparison::parse(text)?;
        let (table, column) = comparison.target(default_table);
        let row = rows.get(table).ok_or_else(|| {
            Error::schema(format!("table '{}' is not part of this statement", table))
        })?;
        match storage.read_column(row, column)? {
            Some(stored) => Ok(Some(comparison.matches(&stored))),
            None => {
                debug!(row = %row.display(), column, "stale read during evaluation");
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::CreateStatement;
    use crate::config::Config;
    use std::fs;
    use tempfile::TempDir;

    fn comparison_holds(text: &str, stored: &str) -> bool {
        Comparison::parse(text).unwrap().matches(stored)
    }

    #[test]
    fn test_parse_comparison() {
        let c = Comparison::parse("album.id>=5").unwrap();
        assert_eq!(c.column, "album.id");
        assert_eq!(c.target("track"), ("album", "id"));
        assert_eq!(Comparison::parse("id=5").unwrap().target("track"), ("track", "id"));
        assert!(Comparison::parse("c IS NULL").is_ok());
        assert!(Comparison::parse("not a comparison").is_err());
    }

    #[test]
    fn test_integer_comparisons() {
        assert!(comparison_holds("n=5", "5"));
        assert!(comparison_holds("n!=5", "6"));
        assert!(comparison_holds("n<10", "9"));
        assert!(comparison_holds("n<=9", "9"));
        assert!(comparison_holds("n>-1", "0"));
        assert!(!comparison_holds("n>=10", "9"));
        assert!(comparison_holds("n=0", "'text'"));
    }

    #[test]
    fn test_string_equality_includes_quotes() {
        assert!(comparison_holds("name='a'", "'a'"));
        assert!(!comparison_holds("name='a'", "a"));
        assert!(!comparison_holds("name='a'", "'A'"));
        assert!(comparison_holds("name!='a'", "'b'"));
    }

    #[test]
    fn test_string_ordering_uses_column_name_length() {
        // "nm" is two bytes long, so only "'b" and "'c" are compared.
        assert!(comparison_holds("nm<'cz'", "'bz'"));
        assert!(comparison_holds("nm>='ca'", "'cz'"));
        assert!(!comparison_holds("nm>'ca'", "'cz'"));
        assert!(comparison_holds("nm<='CA'", "'cb'"));
    }

    #[test]
    fn test_string_ordering_ignores_qualifier() {
        assert!(comparison_holds("nm<='bc'", "'bz'"));
        assert!(comparison_holds("t.nm<='bc'", "'bz'"));
        assert!(!comparison_holds("t.nm>'bc'", "'bz'"));
    }

    #[test]
    fn test_is_null() {
        assert!(comparison_holds("c IS NULL", "NULL"));
        assert!(!comparison_holds("c IS NULL", "'NULL'"));
    }

    struct Fixture {
        _dir: TempDir,
        storage: Storage,
        rows: RowPaths,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let storage = Storage::new(Config::new(dir.path()));
        storage.bootstrap().unwrap();
        storage
            .create_table(&CreateStatement {
                table: "t".to_string(),
                columns: vec![
                    ("a".to_string(), "integer".to_string()),
                    ("b".to_string(), "integer".to_string()),
                    ("c".to_string(), "text".to_string()),
                ],
            })
            .unwrap();
        let schema = storage.load_schema("t").unwrap();
        let columns = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let values = vec!["1".to_string(), "2".to_string(), "'x'".to_string()];
        let roid = storage.insert_row(&schema, &columns, &values).unwrap();
        let mut rows = RowPaths::new();
        rows.insert("t".to_string(), storage.row_path("t", roid));
        Fixture {
            _dir: dir,
            storage,
            rows,
        }
    }

    fn eval(f: &Fixture, predicate: &str) -> Result<Evaluation> {
        Predicate::compile(predicate)?.evaluate(&f.storage, &f.rows, "t")
    }

    #[test]
    fn test_evaluate_connectives() {
        let f = fixture();
        assert_eq!(eval(&f, "a=1").unwrap(), Evaluation::True);
        assert_eq!(eval(&f, "a=2").unwrap(), Evaluation::False);
        assert_eq!(eval(&f, "a=1 AND b=2").unwrap(), Evaluation::True);
        assert_eq!(eval(&f, "a=1 AND b=3").unwrap(), Evaluation::False);
        assert_eq!(eval(&f, "a=9 OR b=3 OR t.c='x'").unwrap(), Evaluation::True);
        assert_eq!(eval(&f, "(a=9 OR b=2) AND c='x'").unwrap(), Evaluation::True);
        assert_eq!(eval(&f, "a=1 OR b=2 AND c='y'").unwrap(), Evaluation::True);
    }

    #[test]
    fn test_not_is_unimplemented() {
        let f = fixture();
        assert!(matches!(
            eval(&f, "NOT a=1"),
            Err(Error::UnimplementedOperator(_))
        ));
    }

    #[test]
    fn test_unknown_qualifier_is_schema_error() {
        let f = fixture();
        assert!(eval(&f, "other.a=1").unwrap_err().is_schema());
    }

    #[test]
    fn test_missing_file_makes_row_stale() {
        let f = fixture();
        fs::remove_file(f.rows["t"].join("b")).unwrap();
        assert_eq!(eval(&f, "b=2").unwrap(), Evaluation::Stale);
        assert_eq!(eval(&f, "a=1 AND b=2").unwrap(), Evaluation::Stale);
        assert_eq!(eval(&f, "a=1").unwrap(), Evaluation::True);
    }

    #[test]
    fn test_malformed_rpn_is_internal_error() {
        let f = fixture();
        let predicate = Predicate::from_rpn(vec![
            RpnToken::Comparison("a=1".to_string()),
            RpnToken::Comparison("b=2".to_string()),
        ]);
        assert!(matches!(
            predicate.evaluate(&f.storage, &f.rows, "t"),
            Err(Error::Internal(_))
        ));

        let predicate =
            Predicate::from_rpn(vec![RpnToken::Comparison("a=1".to_string()), RpnToken::And]);
        assert!(matches!(
            predicate.evaluate(&f.storage, &f.rows, "t"),
            Err(Error::Internal(_))
        ));
    }
}
