use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum ParsedStatement {
    Create(CreateStatement),
    Insert(InsertStatement),
    Select(SelectStatement),
    Delete(DeleteStatement),
    Update(UpdateStatement),
}

impl ParsedStatement {
    pub fn kind(&self) -> &'static str {
        match self {
            ParsedStatement::Create(_) => "CREATE",
            ParsedStatement::Insert(_) => "INSERT",
            ParsedStatement::Select(_) => "SELECT",
            ParsedStatement::Delete(_) => "DELETE",
            ParsedStatement::Update(_) => "UPDATE",
        }
    }

    pub fn table(&self) -> &str {
        match self {
            ParsedStatement::Create(s) => &s.table,
            ParsedStatement::Insert(s) => &s.table,
            ParsedStatement::Select(s) => &s.table,
            ParsedStatement::Delete(s) => &s.table,
            ParsedStatement::Update(s) => &s.table,
        }
    }
}

/// Column definitions in declaration order; the type text is kept as written.
#[derive(Debug, Clone, PartialEq)]
pub struct CreateStatement {
    pub table: String,
    pub columns: Vec<(String, String)>,
}

/// `values[i]` is the literal text for `columns[i]`.
#[derive(Debug, Clone, PartialEq)]
pub struct InsertStatement {
    pub table: String,
    pub columns: Vec<String>,
    pub values: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SelectStatement {
    /// Column references as written, possibly `table.column`. A lone `*` selects every
    /// column of the FROM table.
    pub columns: Vec<String>,
    pub table: String,
    pub joins: Vec<JoinClause>,
    /// Normalized predicate text, compiled at execution time.
    pub where_clause: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeleteStatement {
    pub table: String,
    pub where_clause: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UpdateStatement {
    pub table: String,
    pub assignments: Vec<(String, String)>,
    pub where_clause: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinType {
    Inner,
}

#[derive(Debug, Clone, PartialEq)]
pub struct JoinClause {
    pub join_type: JoinType,
    pub table: String,
    pub on_left: String,
    pub on_right: String,
}

/// Splits `table.column` into its parts; a bare column belongs to `default_table`.
pub fn split_column_ref<'a>(reference: &'a str, default_table: &'a str) -> (&'a str, &'a str) {
    reference
        .split_once('.')
        .unwrap_or((default_table, reference))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Serial,
    Integer,
    Text,
}

impl ColumnType {
    /// Classifies raw type text by case-insensitive prefix. Anything that is neither
    /// serial nor integer is treated as text.
    pub fn classify(type_text: &str) -> Self {
        let lower = type_text.trim_start().to_ascii_lowercase();
        if lower.starts_with("serial") {
            ColumnType::Serial
        } else if lower.starts_with("integer") {
            ColumnType::Integer
        } else {
            ColumnType::Text
        }
    }

    pub fn is_numeric(self) -> bool {
        matches!(self, ColumnType::Serial | ColumnType::Integer)
    }
}

/// Column name to type for one table, ordered by column name.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TableSchema {
    pub name: String,
    pub columns: BTreeMap<String, ColumnType>,
}

impl TableSchema {
    pub fn column_type(&self, column: &str) -> Option<ColumnType> {
        self.columns.get(column).copied()
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.columns.contains_key(column)
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.keys().map(String::as_str)
    }
}

/// A column value as read from a row. `Stale` means the backing file was absent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypedValue {
    Text(String),
    Integer(i64),
    Stale,
}

impl TypedValue {
    pub fn is_stale(&self) -> bool {
        matches!(self, TypedValue::Stale)
    }
}

impl fmt::Display for TypedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypedValue::Text(s) => f.write_str(s),
            TypedValue::Integer(i) => write!(f, "{}", i),
            TypedValue::Stale => Ok(()),
        }
    }
}
