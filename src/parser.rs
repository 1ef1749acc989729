use crate::ast::{
    CreateStatement, DeleteStatement, InsertStatement, JoinClause, JoinType, ParsedStatement,
    SelectStatement, UpdateStatement,
};
use crate::error::{Error, Result};
use crate::tokenizer::{LexError, Token, TokenKind, Tokenizer};

/// States shared by the statement parsers. Each parser walks a subset of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParserState {
    Start,
    TableName,
    StartColumns,
    ProcessColumns,
    EndColumns,
    Values,
    ProcessValues,
    From,
    InnerJoin,
    Set,
    Where,
    End,
}

struct Parser<'a> {
    tokenizer: Tokenizer<'a>,
    statement: &'static str,
    state: ParserState,
}

impl<'a> Parser<'a> {
    fn new(tokenizer: Tokenizer<'a>, statement: &'static str) -> Self {
        Self {
            tokenizer,
            statement,
            state: ParserState::Start,
        }
    }

    fn advance(&mut self) -> Result<Token> {
        let token = self.tokenizer.next_token().map_err(|e| self.lex_error(e))?;
        Ok(token)
    }

    fn peek(&mut self) -> Result<Token> {
        let statement = self.statement;
        let state = self.state;
        match self.tokenizer.peek() {
            Ok(token) => Ok(token.clone()),
            Err(e) => Err(lex_to_parse_error(statement, state, e)),
        }
    }

    fn lex_error(&self, e: LexError) -> Error {
        lex_to_parse_error(self.statement, self.state, e)
    }

    fn unexpected(&self, token: &Token, message: impl Into<String>) -> Error {
        Error::Parse {
            statement: self.statement,
            state: self.state,
            token: token.to_string(),
            position: token.position,
            message: message.into(),
        }
    }

    fn expect_keyword(&mut self, keyword: &str) -> Result<()> {
        let token = self.advance()?;
        if token.is_keyword(keyword) {
            Ok(())
        } else {
            Err(self.unexpected(&token, format!("expected {}", keyword)))
        }
    }

    fn expect_symbol(&mut self, symbol: char) -> Result<()> {
        let token = self.advance()?;
        if token.is_symbol(symbol) {
            Ok(())
        } else {
            Err(self.unexpected(&token, format!("expected '{}'", symbol)))
        }
    }

    fn expect_identifier(&mut self, what: &str) -> Result<String> {
        let token = self.advance()?;
        if token.kind == TokenKind::Identifier {
            Ok(token.value)
        } else {
            Err(self.unexpected(&token, format!("expected {}", what)))
        }
    }

    /// An identifier without a `table.` qualifier.
    fn expect_name(&mut self, what: &str) -> Result<String> {
        let token = self.advance()?;
        if token.kind == TokenKind::Identifier && !token.value.contains('.') {
            Ok(token.value)
        } else {
            Err(self.unexpected(&token, format!("expected {}", what)))
        }
    }

    /// Consumes an optional `;` followed by the end of input.
    fn finish(&mut self) -> Result<()> {
        self.state = ParserState::End;
        let mut token = self.advance()?;
        if token.is_symbol(';') {
            token = self.advance()?;
        }
        if token.is_eof() {
            Ok(())
        } else {
            Err(self.unexpected(&token, "expected end of statement"))
        }
    }

    fn at_statement_end(&mut self) -> Result<bool> {
        let token = self.peek()?;
        Ok(token.is_symbol(';') || token.is_eof())
    }

    /// Reads one literal for INSERT or UPDATE, stopping before a top-level `,`, `)` or
    /// `;`, or before `WHERE`. Numbers are rendered in decimal and may only start a
    /// value. Strings keep their quotes and identifiers are appended verbatim.
    fn parse_literal(&mut self) -> Result<String> {
        let mut literal = String::new();
        loop {
            let token = self.peek()?;
            let stop = token.is_eof()
                || token.is_symbol(',')
                || token.is_symbol(')')
                || token.is_symbol(';')
                || token.is_keyword("WHERE");
            if stop {
                if literal.is_empty() {
                    return Err(self.unexpected(&token, "expected a value"));
                }
                return Ok(literal);
            }
            self.advance()?;
            match token.kind {
                TokenKind::Number if !literal.is_empty() => {
                    return Err(self.unexpected(&token, "expected ',' between values"));
                }
                TokenKind::Number => {
                    let n: i64 = token
                        .value
                        .parse()
                        .map_err(|_| self.unexpected(&token, "integer out of range"))?;
                    literal.push_str(&n.to_string());
                }
                TokenKind::StringLiteral | TokenKind::Identifier => literal.push_str(&token.value),
                _ => return Err(self.unexpected(&token, "expected a value")),
            }
        }
    }

    /// Collects the predicate after WHERE up to the end of the statement.
    fn parse_where(&mut self) -> Result<String> {
        self.state = ParserState::Where;
        self.expect_keyword("WHERE")?;
        let mut predicate = String::new();
        loop {
            let token = self.peek()?;
            if token.is_symbol(';') || token.is_eof() {
                if predicate.is_empty() {
                    return Err(self.unexpected(&token, "expected a predicate"));
                }
                return Ok(predicate.trim_end().to_string());
            }
            self.advance()?;
            append_predicate_token(&mut predicate, &token);
        }
    }
}

fn lex_to_parse_error(statement: &'static str, state: ParserState, e: LexError) -> Error {
    Error::Parse {
        statement,
        state,
        token: e.text,
        position: e.position,
        message: e.message.to_string(),
    }
}

/// Appends one token to a normalized predicate: comparisons are packed without
/// whitespace, connectives get single spaces on both sides, IS and NULL are upper-cased
/// and preceded by a space.
fn append_predicate_token(predicate: &mut String, token: &Token) {
    let keyword = ["AND", "OR", "NOT"]
        .into_iter()
        .find(|kw| token.is_keyword(kw));
    if let Some(kw) = keyword {
        if !predicate.is_empty() && !predicate.ends_with(' ') {
            predicate.push(' ');
        }
        predicate.push_str(kw);
        predicate.push(' ');
    } else if token.is_keyword("IS") || token.is_keyword("NULL") {
        if !predicate.is_empty() && !predicate.ends_with(' ') {
            predicate.push(' ');
        }
        predicate.push_str(&token.value.to_ascii_uppercase());
    } else {
        predicate.push_str(&token.value);
    }
}

/// Parses one statement, dispatching on its leading keyword.
pub fn parse_sql(text: &str) -> Result<ParsedStatement> {
    let mut lead = Tokenizer::new(text);
    let first = lead
        .next_token()
        .map_err(|e| lex_to_parse_error("statement", ParserState::Start, e))?;

    let parse: fn(&str) -> Result<ParsedStatement> = if first.is_keyword("CREATE") {
        parse_create
    } else if first.is_keyword("INSERT") {
        parse_insert
    } else if first.is_keyword("SELECT") {
        parse_select
    } else if first.is_keyword("DELETE") {
        parse_delete
    } else if first.is_keyword("UPDATE") {
        parse_update
    } else {
        return Err(Error::Parse {
            statement: "statement",
            state: ParserState::Start,
            token: first.to_string(),
            position: first.position,
            message: "expected CREATE, INSERT, SELECT, DELETE or UPDATE".to_string(),
        });
    };
    parse(text)
}

/// `CREATE TABLE <name> ( <column> <type>, ... ) ;`
pub fn parse_create(text: &str) -> Result<ParsedStatement> {
    let mut p = Parser::new(Tokenizer::new(text), "CREATE");
    let mut table = String::new();
    let mut columns = Vec::new();

    loop {
        match p.state {
            ParserState::Start => {
                p.expect_keyword("CREATE")?;
                p.expect_keyword("TABLE")?;
                p.state = ParserState::TableName;
            }
            ParserState::TableName => {
                table = p.expect_name("table name")?;
                p.state = ParserState::StartColumns;
            }
            ParserState::StartColumns => {
                p.expect_symbol('(')?;
                p.state = ParserState::ProcessColumns;
            }
            ParserState::ProcessColumns => {
                let column = p.expect_name("column name")?;
                let (type_text, closed) = parse_type_text(&mut p)?;
                columns.push((column, type_text));
                if closed {
                    p.state = ParserState::EndColumns;
                }
            }
            ParserState::EndColumns => {
                p.finish()?;
            }
            ParserState::End => {
                return Ok(ParsedStatement::Create(CreateStatement { table, columns }));
            }
            other => {
                return Err(Error::Internal(format!("CREATE parser reached {:?}", other)));
            }
        }
    }
}

/// Reads a column's type text verbatim from the source. Returns the text and whether
/// the column list was closed.
fn parse_type_text(p: &mut Parser<'_>) -> Result<(String, bool)> {
    let mut span: Option<(usize, usize)> = None;
    let mut nested = false;
    loop {
        let token = p.advance()?;
        if token.is_eof() {
            return Err(p.unexpected(&token, "unterminated column list"));
        }
        let terminator = !nested && (token.is_symbol(',') || token.is_symbol(')'));
        if terminator {
            let Some((start, end)) = span else {
                return Err(p.unexpected(&token, "expected column type"));
            };
            let type_text = p.tokenizer.source()[start..end].to_string();
            return Ok((type_text, token.is_symbol(')')));
        }
        if token.is_symbol('(') {
            if nested {
                return Err(p.unexpected(&token, "nested parentheses in column type"));
            }
            nested = true;
        } else if token.is_symbol(')') {
            nested = false;
        } else if token.kind == TokenKind::Symbol && !nested {
            return Err(p.unexpected(&token, "unexpected symbol in column type"));
        }
        let end = token.position + token.value.len();
        span = Some(span.map_or((token.position, end), |(start, _)| (start, end)));
    }
}

/// `INSERT INTO <name> ( <column>, ... ) VALUES ( <value>, ... ) ;`
pub fn parse_insert(text: &str) -> Result<ParsedStatement> {
    let mut p = Parser::new(Tokenizer::new(text), "INSERT");
    let mut table = String::new();
    let mut columns = Vec::new();
    let mut values = Vec::new();

    loop {
        match p.state {
            ParserState::Start => {
                p.expect_keyword("INSERT")?;
                p.expect_keyword("INTO")?;
                p.state = ParserState::TableName;
            }
            ParserState::TableName => {
                table = p.expect_name("table name")?;
                p.state = ParserState::StartColumns;
            }
            ParserState::StartColumns => {
                p.expect_symbol('(')?;
                p.state = ParserState::ProcessColumns;
            }
            ParserState::ProcessColumns => {
                columns.push(p.expect_name("column name")?);
                let token = p.advance()?;
                if token.is_symbol(')') {
                    p.state = ParserState::EndColumns;
                } else if !token.is_symbol(',') {
                    return Err(p.unexpected(&token, "expected ',' or ')'"));
                }
            }
            ParserState::EndColumns => {
                p.expect_keyword("VALUES")?;
                p.state = ParserState::Values;
            }
            ParserState::Values => {
                p.expect_symbol('(')?;
                p.state = ParserState::ProcessValues;
            }
            ParserState::ProcessValues => {
                values.push(p.parse_literal()?);
                let token = p.advance()?;
                if token.is_symbol(')') {
                    p.finish()?;
                } else if !token.is_symbol(',') {
                    return Err(p.unexpected(&token, "expected ',' or ')'"));
                }
            }
            ParserState::End => {
                return Ok(ParsedStatement::Insert(InsertStatement {
                    table,
                    columns,
                    values,
                }));
            }
            other => {
                return Err(Error::Internal(format!("INSERT parser reached {:?}", other)));
            }
        }
    }
}

/// `SELECT ( * | <column>, ... ) FROM <name> ( INNER JOIN <name> ON <a> = <b> )* ( WHERE ... )? ;`
pub fn parse_select(text: &str) -> Result<ParsedStatement> {
    let mut p = Parser::new(Tokenizer::qualified(text), "SELECT");
    let mut columns: Vec<String> = Vec::new();
    let mut table = String::new();
    let mut joins = Vec::new();
    let mut where_clause = None;

    loop {
        match p.state {
            ParserState::Start => {
                p.expect_keyword("SELECT")?;
                p.state = ParserState::StartColumns;
            }
            ParserState::StartColumns => {
                if p.peek()?.is_symbol('*') {
                    p.advance()?;
                    columns.push("*".to_string());
                    p.state = ParserState::From;
                } else {
                    p.state = ParserState::ProcessColumns;
                }
            }
            ParserState::ProcessColumns => {
                columns.push(p.expect_identifier("column name")?);
                if p.peek()?.is_symbol(',') {
                    p.advance()?;
                } else {
                    p.state = ParserState::From;
                }
            }
            ParserState::From => {
                p.expect_keyword("FROM")?;
                p.state = ParserState::TableName;
            }
            ParserState::TableName => {
                table = p.expect_name("table name")?;
                let next = p.peek()?;
                p.state = if next.is_keyword("INNER") {
                    ParserState::InnerJoin
                } else if next.is_keyword("WHERE") {
                    ParserState::Where
                } else if next.is_symbol(';') || next.is_eof() {
                    ParserState::EndColumns
                } else {
                    return Err(p.unexpected(&next, "expected INNER JOIN, WHERE or ';'"));
                };
            }
            ParserState::InnerJoin => {
                p.expect_keyword("INNER")?;
                p.expect_keyword("JOIN")?;
                let join_table = p.expect_name("join table name")?;
                p.expect_keyword("ON")?;
                let on_left = p.expect_identifier("join key")?;
                p.expect_symbol('=')?;
                let on_right = p.expect_identifier("join key")?;
                joins.push(JoinClause {
                    join_type: JoinType::Inner,
                    table: join_table,
                    on_left,
                    on_right,
                });
                let next = p.peek()?;
                p.state = if next.is_keyword("INNER") {
                    ParserState::InnerJoin
                } else if next.is_keyword("WHERE") {
                    ParserState::Where
                } else {
                    ParserState::EndColumns
                };
            }
            ParserState::Where => {
                where_clause = Some(p.parse_where()?);
                p.state = ParserState::EndColumns;
            }
            ParserState::EndColumns => {
                p.finish()?;
            }
            ParserState::End => {
                return Ok(ParsedStatement::Select(SelectStatement {
                    columns,
                    table,
                    joins,
                    where_clause,
                }));
            }
            other => {
                return Err(Error::Internal(format!("SELECT parser reached {:?}", other)));
            }
        }
    }
}

/// `DELETE FROM <name> ( WHERE ... )? ;`
pub fn parse_delete(text: &str) -> Result<ParsedStatement> {
    let mut p = Parser::new(Tokenizer::qualified(text), "DELETE");
    let mut table = String::new();
    let mut where_clause = None;

    loop {
        match p.state {
            ParserState::Start => {
                p.expect_keyword("DELETE")?;
                p.state = ParserState::From;
            }
            ParserState::From => {
                p.expect_keyword("FROM")?;
                p.state = ParserState::TableName;
            }
            ParserState::TableName => {
                table = p.expect_name("table name")?;
                if p.peek()?.is_keyword("WHERE") {
                    p.state = ParserState::Where;
                } else {
                    p.finish()?;
                }
            }
            ParserState::Where => {
                where_clause = Some(p.parse_where()?);
                p.finish()?;
            }
            ParserState::End => {
                return Ok(ParsedStatement::Delete(DeleteStatement {
                    table,
                    where_clause,
                }));
            }
            other => {
                return Err(Error::Internal(format!("DELETE parser reached {:?}", other)));
            }
        }
    }
}

/// `UPDATE <name> SET <column> = <value>, ... ( WHERE ... )? ;`
pub fn parse_update(text: &str) -> Result<ParsedStatement> {
    let mut p = Parser::new(Tokenizer::qualified(text), "UPDATE");
    let mut table = String::new();
    let mut assignments = Vec::new();
    let mut where_clause = None;

    loop {
        match p.state {
            ParserState::Start => {
                p.expect_keyword("UPDATE")?;
                p.state = ParserState::TableName;
            }
            ParserState::TableName => {
                table = p.expect_name("table name")?;
                p.expect_keyword("SET")?;
                p.state = ParserState::Set;
            }
            ParserState::Set => {
                let column = p.expect_name("column name")?;
                p.expect_symbol('=')?;
                let mut value = p.parse_literal()?;
                if value.eq_ignore_ascii_case("null") {
                    value = "NULL".to_string();
                }
                assignments.push((column, value));

                if p.peek()?.is_symbol(',') {
                    p.advance()?;
                } else if p.peek()?.is_keyword("WHERE") {
                    p.state = ParserState::Where;
                } else if p.at_statement_end()? {
                    p.finish()?;
                } else {
                    let token = p.peek()?;
                    return Err(p.unexpected(&token, "expected ',', WHERE or ';'"));
                }
            }
            ParserState::Where => {
                where_clause = Some(p.parse_where()?);
                p.finish()?;
            }
            ParserState::End => {
                return Ok(ParsedStatement::Update(UpdateStatement {
                    table,
                    assignments,
                    where_clause,
                }));
            }
            other => {
                return Err(Error::Internal(format!("UPDATE parser reached {:?}", other)));
            }
        }
    }
}
