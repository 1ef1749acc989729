//! Nested-loop equality join.
//!
//! For each candidate row of the FROM table every INNER JOIN clause is resolved in
//! order by scanning the joined table until the first row whose key equals the left
//! key. A row with no match for any clause is dropped.

use std::collections::HashMap;

use tracing::debug;

use crate::ast::{split_column_ref, ColumnType, JoinClause, TableSchema, TypedValue};
use crate::error::{Error, Result};
use crate::storage::{RowPaths, Storage};

/// The two sides of a join condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JoinKeys<'a> {
    pub left_table: &'a str,
    pub left_column: &'a str,
    pub right_column: &'a str,
}

/// Picks the right key as the side qualified with the joined table, `on_right` when
/// neither or both are. Unqualified left keys belong to the FROM table.
pub fn join_keys<'a>(join: &'a JoinClause, from_table: &'a str) -> JoinKeys<'a> {
    let left_names_join = qualifier(&join.on_left) == Some(join.table.as_str());
    let right_names_join = qualifier(&join.on_right) == Some(join.table.as_str());

    let (left, right) = if left_names_join && !right_names_join {
        (&join.on_right, &join.on_left)
    } else {
        (&join.on_left, &join.on_right)
    };
    let (left_table, left_column) = split_column_ref(left, from_table);
    let (_, right_column) = split_column_ref(right, &join.table);
    JoinKeys {
        left_table,
        left_column,
        right_column,
    }
}

fn qualifier(reference: &str) -> Option<&str> {
    reference.split_once('.').map(|(table, _)| table)
}

/// Checks that each clause's keys name known columns and that the left key only refers
/// to the FROM table or a table joined earlier.
pub fn validate_joins(
    joins: &[JoinClause],
    from_table: &str,
    schemas: &HashMap<String, TableSchema>,
) -> Result<()> {
    let mut bound = vec![from_table];
    for join in joins {
        if bound.contains(&join.table.as_str()) {
            return Err(Error::schema(format!(
                "table '{}' appears more than once",
                join.table
            )));
        }
        let keys = join_keys(join, from_table);
        if !bound.contains(&keys.left_table) {
            return Err(Error::schema(format!(
                "join key {} must refer to {} or an earlier joined table",
                join.on_left, from_table
            )));
        }
        column_type(schemas, keys.left_table, keys.left_column)?;
        column_type(schemas, &join.table, keys.right_column)?;
        bound.push(&join.table);
    }
    Ok(())
}

fn column_type(
    schemas: &HashMap<String, TableSchema>,
    table: &str,
    column: &str,
) -> Result<ColumnType> {
    let schema = schemas
        .get(table)
        .ok_or_else(|| Error::schema(format!("table '{}' does not exist", table)))?;
    schema
        .column_type(column)
        .ok_or_else(|| Error::schema(format!("column '{}.{}' does not exist", table, column)))
}

/// Integers match by value and text by exact equality. Mixed kinds compare their
/// rendered text.
fn values_match(left: &TypedValue, right: &TypedValue) -> bool {
    match (left, right) {
        (TypedValue::Integer(a), TypedValue::Integer(b)) => a == b,
        (TypedValue::Text(a), TypedValue::Text(b)) => a == b,
        (TypedValue::Stale, _) | (_, TypedValue::Stale) => false,
        (a, b) => a.to_string() == b.to_string(),
    }
}

/// Extends `rows` (which holds the FROM row) with one matching row per join clause.
/// Returns `None` when some clause finds no match or the left key is stale.
pub fn resolve_joins(
    storage: &Storage,
    joins: &[JoinClause],
    from_table: &str,
    schemas: &HashMap<String, TableSchema>,
    mut rows: RowPaths,
) -> Result<Option<RowPaths>> {
    for join in joins {
        let keys = join_keys(join, from_table);
        let left_row = rows.get(keys.left_table).ok_or_else(|| {
            Error::schema(format!("table '{}' is not bound in this join", keys.left_table))
        })?;
        let left_type = column_type(schemas, keys.left_table, keys.left_column)?;
        let left_value = storage.load_value(left_row, keys.left_column, left_type)?;
        if left_value.is_stale() {
            debug!(row = %left_row.display(), column = keys.left_column, "stale join key");
            return Ok(None);
        }

        let right_type = column_type(schemas, &join.table, keys.right_column)?;
        let mut matched = None;
        for entry in storage.scan(&join.table) {
            let entry = entry?;
            let candidate = storage.load_value(&entry.path, keys.right_column, right_type)?;
            if values_match(&left_value, &candidate) {
                matched = Some(entry.path);
                break;
            }
        }

        match matched {
            Some(path) => {
                rows.insert(join.table.clone(), path);
            }
            None => return Ok(None),
        }
    }
    Ok(Some(rows))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{CreateStatement, JoinType};
    use crate::config::Config;
    use tempfile::TempDir;

    fn clause(table: &str, on_left: &str, on_right: &str) -> JoinClause {
        JoinClause {
            join_type: JoinType::Inner,
            table: table.to_string(),
            on_left: on_left.to_string(),
            on_right: on_right.to_string(),
        }
    }

    #[test]
    fn test_join_keys_follow_the_joined_table() {
        let join = clause("album", "track.album_id", "album.id");
        assert_eq!(
            join_keys(&join, "track"),
            JoinKeys {
                left_table: "track",
                left_column: "album_id",
                right_column: "id",
            }
        );

        let swapped = clause("album", "album.id", "track.album_id");
        assert_eq!(join_keys(&swapped, "track"), join_keys(&join, "track"));

        let bare = clause("album", "album_id", "id");
        assert_eq!(join_keys(&bare, "track"), join_keys(&join, "track"));
    }

    #[test]
    fn test_values_match() {
        assert!(values_match(&TypedValue::Integer(5), &TypedValue::Integer(5)));
        assert!(!values_match(&TypedValue::Integer(5), &TypedValue::Integer(6)));
        assert!(values_match(
            &TypedValue::Text("a".to_string()),
            &TypedValue::Text("a".to_string())
        ));
        assert!(!values_match(
            &TypedValue::Text("a".to_string()),
            &TypedValue::Text("A".to_string())
        ));
        assert!(values_match(&TypedValue::Integer(5), &TypedValue::Text("5".to_string())));
        assert!(!values_match(&TypedValue::Stale, &TypedValue::Stale));
    }

    struct Music {
        _dir: TempDir,
        storage: Storage,
        schemas: HashMap<String, TableSchema>,
    }

    fn music() -> Music {
        let dir = TempDir::new().unwrap();
        let storage = Storage::new(Config::new(dir.path()));
        storage.bootstrap().unwrap();
        let mut schemas = HashMap::new();
        for (table, columns) in [
            ("album", vec![("id", "integer"), ("title", "text")]),
            ("track", vec![("album_id", "integer"), ("name", "text")]),
        ] {
            storage
                .create_table(&CreateStatement {
                    table: table.to_string(),
                    columns: columns
                        .iter()
                        .map(|(c, t)| (c.to_string(), t.to_string()))
                        .collect(),
                })
                .unwrap();
            schemas.insert(table.to_string(), storage.load_schema(table).unwrap());
        }
        Music {
            _dir: dir,
            storage,
            schemas,
        }
    }

    fn insert(m: &Music, table: &str, columns: &[&str], values: &[&str]) -> u64 {
        let columns: Vec<String> = columns.iter().map(|s| s.to_string()).collect();
        let values: Vec<String> = values.iter().map(|s| s.to_string()).collect();
        m.storage
            .insert_row(&m.schemas[table], &columns, &values)
            .unwrap()
    }

    fn bind(m: &Music, table: &str, roid: u64) -> RowPaths {
        let mut rows = RowPaths::new();
        rows.insert(table.to_string(), m.storage.row_path(table, roid));
        rows
    }

    #[test]
    fn test_resolve_finds_first_match() {
        let m = music();
        insert(&m, "album", &["id", "title"], &["4", "'Four'"]);
        let five = insert(&m, "album", &["id", "title"], &["5", "'Five'"]);
        insert(&m, "album", &["id", "title"], &["5", "'Five again'"]);
        let track = insert(&m, "track", &["album_id", "name"], &["5", "'intro'"]);

        let joins = vec![clause("album", "track.album_id", "album.id")];
        validate_joins(&joins, "track", &m.schemas).unwrap();
        let rows = resolve_joins(&m.storage, &joins, "track", &m.schemas, bind(&m, "track", track))
            .unwrap()
            .unwrap();
        assert_eq!(rows["album"], m.storage.row_path("album", five));
    }

    #[test]
    fn test_unmatched_row_is_excluded() {
        let m = music();
        insert(&m, "album", &["id", "title"], &["5", "'Five'"]);
        let track = insert(&m, "track", &["album_id", "name"], &["6", "'lost'"]);

        let joins = vec![clause("album", "track.album_id", "album.id")];
        let rows =
            resolve_joins(&m.storage, &joins, "track", &m.schemas, bind(&m, "track", track)).unwrap();
        assert!(rows.is_none());
    }

    #[test]
    fn test_stale_candidates_are_skipped() {
        let m = music();
        let stale = insert(&m, "album", &["id", "title"], &["5", "'Five'"]);
        let live = insert(&m, "album", &["id", "title"], &["5", "'Five live'"]);
        std::fs::remove_file(m.storage.row_path("album", stale).join("id")).unwrap();
        let track = insert(&m, "track", &["album_id", "name"], &["5", "'intro'"]);

        let joins = vec![clause("album", "album.id", "track.album_id")];
        let rows = resolve_joins(&m.storage, &joins, "track", &m.schemas, bind(&m, "track", track))
            .unwrap()
            .unwrap();
        assert_eq!(rows["album"], m.storage.row_path("album", live));
    }

    #[test]
    fn test_validate_rejects_unknown_columns_and_tables() {
        let m = music();
        let bad_column = vec![clause("album", "track.album_id", "album.nope")];
        assert!(validate_joins(&bad_column, "track", &m.schemas).unwrap_err().is_schema());

        let unbound_left = vec![clause("album", "other.x", "album.id")];
        assert!(validate_joins(&unbound_left, "track", &m.schemas).unwrap_err().is_schema());

        let self_join = vec![clause("track", "track.album_id", "track.album_id")];
        assert!(validate_joins(&self_join, "track", &m.schemas).unwrap_err().is_schema());
    }
}
