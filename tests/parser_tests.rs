#[cfg(test)]
mod tests {
    use multidb::ast::{
        CreateStatement, DeleteStatement, InsertStatement, JoinClause, JoinType,
        ParsedStatement, SelectStatement, UpdateStatement,
    };
    use multidb::parser::{parse_sql, ParserState};
    use multidb::tokenizer::{tokenize, TokenKind};
    use multidb::where_clause::{compile, render};
    use multidb::Error;

    #[test]
    fn test_parse_create() {
        let expected = ParsedStatement::Create(CreateStatement {
            table: "users".to_string(),
            columns: vec![
                ("id".to_string(), "serial".to_string()),
                ("name".to_string(), "text".to_string()),
                ("age".to_string(), "integer".to_string()),
            ],
        });
        let result = parse_sql("CREATE TABLE users (id serial, name text, age integer);").unwrap();
        assert_eq!(result, expected);
    }

    #[test]
    fn test_parse_insert() {
        let expected = ParsedStatement::Insert(InsertStatement {
            table: "users".to_string(),
            columns: vec!["id".to_string(), "name".to_string(), "age".to_string()],
            values: vec!["0".to_string(), "'Alice'".to_string(), "25".to_string()],
        });
        let result = parse_sql("INSERT INTO users (id, name, age) VALUES (0, 'Alice', 25);").unwrap();
        assert_eq!(result, expected);
    }

    #[test]
    fn test_parse_select() {
        let expected = ParsedStatement::Select(SelectStatement {
            columns: vec!["name".to_string(), "age".to_string()],
            table: "users".to_string(),
            joins: vec![],
            where_clause: Some("age>30".to_string()),
        });
        let result = parse_sql("SELECT name, age FROM users WHERE age > 30;").unwrap();
        assert_eq!(result, expected);
    }

    #[test]
    fn test_table_alias_is_rejected() {
        let result = parse_sql(
            "SELECT track.name FROM track tr \
             INNER JOIN album ON track.album_id = album.id;",
        );
        assert!(matches!(
            result,
            Err(Error::Parse {
                state: ParserState::TableName,
                ..
            })
        ));
    }

    #[test]
    fn test_parse_select_with_two_joins() {
        let result = parse_sql(
            "SELECT track.name FROM track \
             INNER JOIN album ON track.album_id = album.id \
             INNER JOIN artist ON album.artist_id = artist.id;",
        )
        .unwrap();
        let ParsedStatement::Select(select) = result else {
            panic!("expected SELECT");
        };
        assert_eq!(
            select.joins,
            vec![
                JoinClause {
                    join_type: JoinType::Inner,
                    table: "album".to_string(),
                    on_left: "track.album_id".to_string(),
                    on_right: "album.id".to_string(),
                },
                JoinClause {
                    join_type: JoinType::Inner,
                    table: "artist".to_string(),
                    on_left: "album.artist_id".to_string(),
                    on_right: "artist.id".to_string(),
                },
            ]
        );
    }

    #[test]
    fn test_parse_update() {
        let expected = ParsedStatement::Update(UpdateStatement {
            table: "users".to_string(),
            assignments: vec![("age".to_string(), "26".to_string())],
            where_clause: Some("name='Alice'".to_string()),
        });
        let result = parse_sql("UPDATE users SET age = 26 WHERE name = 'Alice';").unwrap();
        assert_eq!(result, expected);
    }

    #[test]
    fn test_parse_delete() {
        let expected = ParsedStatement::Delete(DeleteStatement {
            table: "users".to_string(),
            where_clause: Some("name='Bob' OR age<18".to_string()),
        });
        let result = parse_sql("DELETE FROM users WHERE name = 'Bob' OR age < 18;").unwrap();
        assert_eq!(result, expected);
    }

    #[test]
    fn test_keywords_are_case_insensitive() {
        let upper = parse_sql("SELECT * FROM t WHERE a = 1 AND b = 2;").unwrap();
        let lower = parse_sql("select * from t where a = 1 and b = 2;").unwrap();
        assert_eq!(upper, lower);
    }

    #[test]
    fn test_parse_error_carries_position() {
        match parse_sql("INSERT INTO users VALUES (1);") {
            Err(Error::Parse {
                statement,
                state,
                token,
                position,
                ..
            }) => {
                assert_eq!(statement, "INSERT");
                assert_eq!(state, ParserState::StartColumns);
                assert_eq!(token, "VALUES");
                assert_eq!(position, 18);
            }
            other => panic!("expected a parse error, got {:?}", other),
        }
    }

    #[test]
    fn test_where_compiles_to_rpn() {
        let ParsedStatement::Select(select) =
            parse_sql("SELECT * FROM t WHERE a = 1 OR b = 2 AND c = 3;").unwrap()
        else {
            panic!("expected SELECT");
        };
        let rpn = compile(select.where_clause.as_deref().unwrap()).unwrap();
        assert_eq!(render(&rpn), "a=1 b=2 c=3 AND OR");
    }

    #[test]
    fn test_tokenize_ends_with_eof() {
        let tokens = tokenize("DELETE FROM t;").unwrap();
        assert_eq!(tokens.last().map(|t| t.kind), Some(TokenKind::Eof));
        assert_eq!(tokens.len(), 5);
    }
}
