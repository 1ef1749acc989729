use std::collections::{BTreeSet, HashMap};

use serde::Serialize;
use tracing::{debug, info};

use crate::ast::{
    split_column_ref, ColumnType, CreateStatement, DeleteStatement, InsertStatement,
    ParsedStatement, SelectStatement, TableSchema, TypedValue, UpdateStatement,
};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::evaluator::{Evaluation, Predicate};
use crate::join::{resolve_joins, validate_joins};
use crate::storage::{RowPaths, Storage};

/// What a statement produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum QueryResult {
    Created { table: String },
    Inserted { table: String, roid: u64 },
    Rows { columns: Vec<String>, rows: Vec<Vec<String>> },
    Updated { table: String, count: usize },
    Deleted { table: String, count: usize },
}

impl QueryResult {
    /// Tab-separated header and rows, one line each. Empty for statements without rows.
    pub fn to_tsv(&self) -> String {
        let QueryResult::Rows { columns, rows } = self else {
            return String::new();
        };
        let mut out = columns.join("\t");
        out.push('\n');
        for row in rows {
            out.push_str(&row.join("\t"));
            out.push('\n');
        }
        out
    }
}

/// A resolved output column of a SELECT.
#[derive(Debug)]
struct Projection {
    table: String,
    column: String,
    ty: ColumnType,
}

#[derive(Debug)]
pub struct Database {
    storage: Storage,
}

impl Database {
    /// Opens the database rooted at `config.root`, creating the directory skeleton if
    /// needed.
    pub fn open(config: Config) -> Result<Self> {
        config.validate()?;
        let storage = Storage::new(config);
        storage.bootstrap()?;
        Ok(Self { storage })
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    pub fn execute(&self, stmt: ParsedStatement) -> Result<QueryResult> {
        match stmt {
            ParsedStatement::Create(s) => self.execute_create(s),
            ParsedStatement::Insert(s) => self.execute_insert(s),
            ParsedStatement::Select(s) => self.execute_select(&s),
            ParsedStatement::Delete(s) => self.execute_delete(s),
            ParsedStatement::Update(s) => self.execute_update(s),
        }
    }

    fn execute_create(&self, stmt: CreateStatement) -> Result<QueryResult> {
        self.storage.create_table(&stmt)?;
        Ok(QueryResult::Created { table: stmt.table })
    }

    fn execute_insert(&self, stmt: InsertStatement) -> Result<QueryResult> {
        let schema = self.storage.load_schema(&stmt.table)?;
        if stmt.columns.len() != stmt.values.len() {
            return Err(Error::schema(format!(
                "{} columns but {} values for table '{}'",
                stmt.columns.len(),
                stmt.values.len(),
                stmt.table
            )));
        }
        let mut seen = BTreeSet::new();
        for column in &stmt.columns {
            if !schema.has_column(column) {
                return Err(Error::schema(format!(
                    "column '{}' does not exist in table '{}'",
                    column, stmt.table
                )));
            }
            if !seen.insert(column.as_str()) {
                return Err(Error::schema(format!("column '{}' given twice", column)));
            }
        }

        let roid = self.storage.insert_row(&schema, &stmt.columns, &stmt.values)?;
        info!(table = %stmt.table, roid, "inserted row");
        Ok(QueryResult::Inserted {
            table: stmt.table,
            roid,
        })
    }

    fn execute_select(&self, stmt: &SelectStatement) -> Result<QueryResult> {
        let mut schemas = HashMap::new();
        schemas.insert(stmt.table.clone(), self.storage.load_schema(&stmt.table)?);
        for join in &stmt.joins {
            if !schemas.contains_key(&join.table) {
                schemas.insert(join.table.clone(), self.storage.load_schema(&join.table)?);
            }
        }
        validate_joins(&stmt.joins, &stmt.table, &schemas)?;

        let (header, projection) = if stmt.columns.len() == 1 && stmt.columns[0] == "*" {
            let schema = &schemas[&stmt.table];
            let header: Vec<String> = schema.column_names().map(str::to_string).collect();
            let projection: Vec<Projection> = schema
                .columns
                .iter()
                .map(|(column, ty)| Projection {
                    table: stmt.table.clone(),
                    column: column.clone(),
                    ty: *ty,
                })
                .collect();
            (header, projection)
        } else {
            let mut projection = Vec::with_capacity(stmt.columns.len());
            for reference in &stmt.columns {
                let (table, column) = split_column_ref(reference, &stmt.table);
                let ty = resolve_column(&schemas, table, column)?;
                projection.push(Projection {
                    table: table.to_string(),
                    column: column.to_string(),
                    ty,
                });
            }
            (stmt.columns.clone(), projection)
        };

        let predicate = compile_predicate(stmt.where_clause.as_deref(), &stmt.table, &schemas)?;

        let mut rows = Vec::new();
        for entry in self.storage.scan(&stmt.table) {
            let entry = entry?;
            let mut bound = RowPaths::new();
            bound.insert(stmt.table.clone(), entry.path);
            let Some(bound) =
                resolve_joins(&self.storage, &stmt.joins, &stmt.table, &schemas, bound)?
            else {
                continue;
            };
            if !self.row_matches(predicate.as_ref(), &bound, &stmt.table)? {
                continue;
            }
            if let Some(values) = self.project(&projection, &bound)? {
                rows.push(values);
            } else {
                debug!(roid = entry.roid, "stale row skipped in projection");
            }
        }

        info!(table = %stmt.table, rows = rows.len(), "selected rows");
        Ok(QueryResult::Rows {
            columns: header,
            rows,
        })
    }

    fn project(&self, projection: &[Projection], bound: &RowPaths) -> Result<Option<Vec<String>>> {
        let mut values = Vec::with_capacity(projection.len());
        for p in projection {
            let row = bound.get(&p.table).ok_or_else(|| {
                Error::Internal(format!("table '{}' has no bound row", p.table))
            })?;
            match self.storage.load_value(row, &p.column, p.ty)? {
                TypedValue::Stale => return Ok(None),
                value => values.push(value.to_string()),
            }
        }
        Ok(Some(values))
    }

    fn row_matches(
        &self,
        predicate: Option<&Predicate>,
        bound: &RowPaths,
        default_table: &str,
    ) -> Result<bool> {
        let Some(predicate) = predicate else {
            return Ok(true);
        };
        let evaluation = predicate.evaluate(&self.storage, bound, default_table)?;
        if evaluation == Evaluation::Stale {
            debug!(table = default_table, "stale row excluded by WHERE");
        }
        Ok(evaluation.is_match())
    }

    fn execute_delete(&self, stmt: DeleteStatement) -> Result<QueryResult> {
        let schema = self.storage.load_schema(&stmt.table)?;
        let schemas = single_schema(schema);
        let predicate = compile_predicate(stmt.where_clause.as_deref(), &stmt.table, &schemas)?;

        let mut staged = Vec::new();
        for entry in self.storage.scan(&stmt.table) {
            let entry = entry?;
            let mut bound = RowPaths::new();
            bound.insert(stmt.table.clone(), entry.path.clone());
            if !self.row_matches(predicate.as_ref(), &bound, &stmt.table)? {
                continue;
            }
            if let Some(path) = self.storage.soft_delete(&stmt.table, &entry)? {
                staged.push(path);
            }
        }

        let count = self.storage.reap(&schemas[&stmt.table], &staged)?;
        info!(table = %stmt.table, count, "deleted rows");
        Ok(QueryResult::Deleted {
            table: stmt.table,
            count,
        })
    }

    fn execute_update(&self, stmt: UpdateStatement) -> Result<QueryResult> {
        let schema = self.storage.load_schema(&stmt.table)?;
        for (column, _) in &stmt.assignments {
            if !schema.has_column(column) {
                return Err(Error::schema(format!(
                    "column '{}' does not exist in table '{}'",
                    column, stmt.table
                )));
            }
        }
        let schemas = single_schema(schema);
        let predicate = compile_predicate(stmt.where_clause.as_deref(), &stmt.table, &schemas)?;

        let mut count = 0;
        for entry in self.storage.scan(&stmt.table) {
            let entry = entry?;
            let mut bound = RowPaths::new();
            bound.insert(stmt.table.clone(), entry.path.clone());
            if !self.row_matches(predicate.as_ref(), &bound, &stmt.table)? {
                continue;
            }

            let mut written = true;
            for (column, value) in &stmt.assignments {
                if !self.storage.write_column(&entry.path, column, value)? {
                    debug!(roid = entry.roid, column = %column, "stale row skipped in update");
                    written = false;
                    break;
                }
            }
            if written {
                count += 1;
            }
        }

        info!(table = %stmt.table, count, "updated rows");
        Ok(QueryResult::Updated {
            table: stmt.table,
            count,
        })
    }
}

fn single_schema(schema: TableSchema) -> HashMap<String, TableSchema> {
    let mut schemas = HashMap::new();
    schemas.insert(schema.name.clone(), schema);
    schemas
}

fn resolve_column(
    schemas: &HashMap<String, TableSchema>,
    table: &str,
    column: &str,
) -> Result<ColumnType> {
    let schema = schemas.get(table).ok_or_else(|| {
        Error::schema(format!("table '{}' is not named in FROM or JOIN", table))
    })?;
    schema.column_type(column).ok_or_else(|| {
        Error::schema(format!(
            "column '{}' does not exist in table '{}'",
            column, table
        ))
    })
}

/// Compiles the WHERE text, if any, and checks every column it references.
fn compile_predicate(
    text: Option<&str>,
    default_table: &str,
    schemas: &HashMap<String, TableSchema>,
) -> Result<Option<Predicate>> {
    let Some(text) = text else {
        return Ok(None);
    };
    let predicate = Predicate::compile(text)?;
    for comparison in predicate.comparisons() {
        let comparison = comparison?;
        let (table, column) = comparison.target(default_table);
        resolve_column(schemas, table, column)?;
    }
    Ok(Some(predicate))
}
