pub mod ast;
pub mod config;
pub mod error;
pub mod evaluator;
pub mod executor;
pub mod integration;
pub mod join;
pub mod lock;
pub mod parser;
pub mod storage;
pub mod tokenizer;
pub mod where_clause;

pub use ast::*;
pub use config::Config;
pub use error::{Error, Result};
pub use executor::{Database, QueryResult};
pub use integration::process_query;
pub use parser::{parse_sql, ParserState};
