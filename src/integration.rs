use tracing::debug;

use crate::error::Result;
use crate::executor::{Database, QueryResult};
use crate::parser::parse_sql;

/// Runs one statement end to end: tokenize and parse, then execute against `db`.
pub fn process_query(db: &Database, query: &str) -> Result<QueryResult> {
    let statement = parse_sql(query)?;
    debug!(kind = statement.kind(), table = statement.table(), "parsed statement");
    db.execute(statement)
}
