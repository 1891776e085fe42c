//! Parser for the small SQL dialect the reference server executes.
//!
//! Supported statements:
//!
//! - `CREATE DATABASE [IF NOT EXISTS] db`
//! - `DROP DATABASE [IF EXISTS] db [CASCADE]`
//! - `USE db`
//! - `CREATE TABLE [IF NOT EXISTS] [db.]t (col type [COMMENT '...'], ...)`
//! - `DROP TABLE [IF EXISTS] [db.]t`
//! - `INSERT INTO [db.]t VALUES (...), (...)`
//! - `SELECT * | col, ... FROM [db.]t`
//! - `SHOW DATABASES`, `SHOW TABLES [IN db]`
//!
//! Identifiers are case-insensitive and stored lowercase.
use std::{fmt, iter::Peekable, str::Chars};

use thiserror::Error;

use crate::types::ColumnType;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("syntax error: {0}")]
pub struct ParseError(String);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableName {
    pub database: Option<String>,
    pub name: String,
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.database {
            Some(db) => write!(f, "{db}.{}", self.name),
            None => f.write_str(&self.name),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDef {
    pub name: String,
    pub column_type: ColumnType,
    pub comment: Option<String>,
}

impl ColumnDef {
    pub fn new(name: &str, column_type: ColumnType) -> Self {
        Self {
            name: name.to_string(),
            column_type,
            comment: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Null,
    Bool(bool),
    /// Numeric literal kept as written, sign included.
    Number(String),
    String(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Projection {
    All,
    Columns(Vec<String>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    CreateDatabase {
        name: String,
        if_not_exists: bool,
    },
    DropDatabase {
        name: String,
        if_exists: bool,
        cascade: bool,
    },
    Use {
        database: String,
    },
    CreateTable {
        table: TableName,
        columns: Vec<ColumnDef>,
        if_not_exists: bool,
    },
    DropTable {
        table: TableName,
        if_exists: bool,
    },
    Insert {
        table: TableName,
        rows: Vec<Vec<Literal>>,
    },
    Select {
        table: TableName,
        projection: Projection,
    },
    ShowDatabases,
    ShowTables {
        database: Option<String>,
    },
}

impl Statement {
    pub fn has_result_set(&self) -> bool {
        matches!(
            self,
            Statement::Select { .. } | Statement::ShowDatabases | Statement::ShowTables { .. }
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Word(String),
    Quoted(String),
    Number(String),
    Str(String),
    Symbol(char),
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Word(w) | Token::Number(w) => f.write_str(w),
            Token::Quoted(w) => write!(f, "`{w}`"),
            Token::Str(s) => write!(f, "'{s}'"),
            Token::Symbol(c) => write!(f, "{c}"),
        }
    }
}

fn tokenize(input: &str) -> Result<Vec<Token>, ParseError> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();

    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
        } else if c.is_ascii_alphabetic() || c == '_' {
            let word = take_while(&mut chars, |c| c.is_ascii_alphanumeric() || c == '_');
            tokens.push(Token::Word(word));
        } else if c.is_ascii_digit() || c == '.' {
            let number = take_while(&mut chars, |c| c.is_ascii_digit() || c == '.');
            tokens.push(Token::Number(number));
        } else if c == '\'' {
            chars.next();
            tokens.push(Token::Str(take_quoted(&mut chars, '\'')?));
        } else if c == '`' {
            chars.next();
            tokens.push(Token::Quoted(take_quoted(&mut chars, '`')?));
        } else if "(),;*-+".contains(c) {
            chars.next();
            tokens.push(Token::Symbol(c));
        } else {
            return Err(ParseError(format!("unexpected character '{c}'")));
        }
    }
    Ok(tokens)
}

fn take_while(chars: &mut Peekable<Chars<'_>>, pred: impl Fn(char) -> bool) -> String {
    let mut out = String::new();
    while let Some(&c) = chars.peek() {
        if !pred(c) {
            break;
        }
        out.push(c);
        chars.next();
    }
    out
}

/// Reads up to the closing `quote`; a doubled quote stands for itself.
fn take_quoted(chars: &mut Peekable<Chars<'_>>, quote: char) -> Result<String, ParseError> {
    let mut out = String::new();
    loop {
        match chars.next() {
            Some(c) if c == quote => {
                if chars.peek() == Some(&quote) {
                    chars.next();
                    out.push(quote);
                } else {
                    return Ok(out);
                }
            }
            Some(c) => out.push(c),
            None => return Err(ParseError(format!("unterminated {quote}-quoted text"))),
        }
    }
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

pub fn parse(sql: &str) -> Result<Statement, ParseError> {
    let mut parser = Parser {
        tokens: tokenize(sql)?,
        pos: 0,
    };
    let statement = parser.statement()?;
    parser.eat_symbol(';');
    match parser.peek() {
        None => Ok(statement),
        Some(token) => Err(ParseError(format!("unexpected '{token}' after statement"))),
    }
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Result<Token, ParseError> {
        let token = self
            .tokens
            .get(self.pos)
            .cloned()
            .ok_or_else(|| ParseError("unexpected end of statement".into()))?;
        self.pos += 1;
        Ok(token)
    }

    fn peek_keyword(&self, keyword: &str) -> bool {
        matches!(self.peek(), Some(Token::Word(w)) if w.eq_ignore_ascii_case(keyword))
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        if self.peek_keyword(keyword) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_keyword(&mut self, keyword: &str) -> Result<(), ParseError> {
        if self.eat_keyword(keyword) {
            return Ok(());
        }
        match self.peek() {
            Some(token) => Err(ParseError(format!("expected {keyword}, found '{token}'"))),
            None => Err(ParseError(format!("expected {keyword}"))),
        }
    }

    fn eat_symbol(&mut self, symbol: char) -> bool {
        if self.peek() == Some(&Token::Symbol(symbol)) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_symbol(&mut self, symbol: char) -> Result<(), ParseError> {
        if self.eat_symbol(symbol) {
            return Ok(());
        }
        match self.peek() {
            Some(token) => Err(ParseError(format!("expected '{symbol}', found '{token}'"))),
            None => Err(ParseError(format!("expected '{symbol}'"))),
        }
    }

    fn identifier(&mut self) -> Result<String, ParseError> {
        match self.next()? {
            Token::Word(w) | Token::Quoted(w) => Ok(w.to_ascii_lowercase()),
            token => Err(ParseError(format!("expected identifier, found '{token}'"))),
        }
    }

    /// `name` or `db.name`; the dot lexes as part of a number token or on its own.
    fn table_name(&mut self) -> Result<TableName, ParseError> {
        let first = self.identifier()?;
        if self.peek() == Some(&Token::Number(".".into())) {
            self.pos += 1;
            let name = self.identifier()?;
            return Ok(TableName {
                database: Some(first),
                name,
            });
        }
        Ok(TableName {
            database: None,
            name: first,
        })
    }

    fn statement(&mut self) -> Result<Statement, ParseError> {
        let Token::Word(word) = self.next()? else {
            return Err(ParseError("expected a statement keyword".into()));
        };
        match word.to_ascii_uppercase().as_str() {
            "CREATE" => self.create(),
            "DROP" => self.drop(),
            "USE" => Ok(Statement::Use {
                database: self.identifier()?,
            }),
            "INSERT" => self.insert(),
            "SELECT" => self.select(),
            "SHOW" => self.show(),
            other => Err(ParseError(format!("unsupported statement '{other}'"))),
        }
    }

    fn create(&mut self) -> Result<Statement, ParseError> {
        if self.eat_keyword("DATABASE") || self.eat_keyword("SCHEMA") {
            let if_not_exists = self.if_not_exists()?;
            return Ok(Statement::CreateDatabase {
                name: self.identifier()?,
                if_not_exists,
            });
        }
        self.expect_keyword("TABLE")?;
        let if_not_exists = self.if_not_exists()?;
        let table = self.table_name()?;

        self.expect_symbol('(')?;
        let mut columns = Vec::new();
        loop {
            columns.push(self.column_def()?);
            if !self.eat_symbol(',') {
                break;
            }
        }
        self.expect_symbol(')')?;

        Ok(Statement::CreateTable {
            table,
            columns,
            if_not_exists,
        })
    }

    fn if_not_exists(&mut self) -> Result<bool, ParseError> {
        if !self.eat_keyword("IF") {
            return Ok(false);
        }
        self.expect_keyword("NOT")?;
        self.expect_keyword("EXISTS")?;
        Ok(true)
    }

    fn if_exists(&mut self) -> Result<bool, ParseError> {
        if !self.eat_keyword("IF") {
            return Ok(false);
        }
        self.expect_keyword("EXISTS")?;
        Ok(true)
    }

    fn column_def(&mut self) -> Result<ColumnDef, ParseError> {
        let name = self.identifier()?;

        let mut type_text = self.identifier()?;
        if self.eat_symbol('(') {
            type_text.push('(');
            loop {
                match self.next()? {
                    Token::Symbol(')') => break,
                    Token::Symbol(',') => type_text.push(','),
                    Token::Number(n) => type_text.push_str(&n),
                    token => {
                        return Err(ParseError(format!("unexpected '{token}' in type of {name}")));
                    }
                }
            }
            type_text.push(')');
        }
        let column_type = type_text
            .parse::<ColumnType>()
            .map_err(|e| ParseError(format!("column {name}: {e}")))?;

        let comment = if self.eat_keyword("COMMENT") {
            match self.next()? {
                Token::Str(s) => Some(s),
                token => return Err(ParseError(format!("expected comment string, found '{token}'"))),
            }
        } else {
            None
        };

        Ok(ColumnDef {
            name,
            column_type,
            comment,
        })
    }

    fn drop(&mut self) -> Result<Statement, ParseError> {
        if self.eat_keyword("DATABASE") || self.eat_keyword("SCHEMA") {
            let if_exists = self.if_exists()?;
            let name = self.identifier()?;
            let cascade = self.eat_keyword("CASCADE");
            return Ok(Statement::DropDatabase {
                name,
                if_exists,
                cascade,
            });
        }
        self.expect_keyword("TABLE")?;
        let if_exists = self.if_exists()?;
        Ok(Statement::DropTable {
            table: self.table_name()?,
            if_exists,
        })
    }

    fn insert(&mut self) -> Result<Statement, ParseError> {
        self.expect_keyword("INTO")?;
        self.eat_keyword("TABLE");
        let table = self.table_name()?;
        self.expect_keyword("VALUES")?;

        let mut rows = Vec::new();
        loop {
            self.expect_symbol('(')?;
            let mut row = Vec::new();
            loop {
                row.push(self.literal()?);
                if !self.eat_symbol(',') {
                    break;
                }
            }
            self.expect_symbol(')')?;
            rows.push(row);
            if !self.eat_symbol(',') {
                break;
            }
        }
        Ok(Statement::Insert { table, rows })
    }

    fn literal(&mut self) -> Result<Literal, ParseError> {
        match self.next()? {
            Token::Str(s) => Ok(Literal::String(s)),
            Token::Number(n) => Ok(Literal::Number(n)),
            Token::Symbol(sign @ ('-' | '+')) => match self.next()? {
                Token::Number(n) if sign == '-' => Ok(Literal::Number(format!("-{n}"))),
                Token::Number(n) => Ok(Literal::Number(n)),
                token => Err(ParseError(format!("expected number after '{sign}', found '{token}'"))),
            },
            Token::Word(w) if w.eq_ignore_ascii_case("NULL") => Ok(Literal::Null),
            Token::Word(w) if w.eq_ignore_ascii_case("TRUE") => Ok(Literal::Bool(true)),
            Token::Word(w) if w.eq_ignore_ascii_case("FALSE") => Ok(Literal::Bool(false)),
            token => Err(ParseError(format!("expected literal, found '{token}'"))),
        }
    }

    fn select(&mut self) -> Result<Statement, ParseError> {
        let projection = if self.eat_symbol('*') {
            Projection::All
        } else {
            let mut columns = vec![self.identifier()?];
            while self.eat_symbol(',') {
                columns.push(self.identifier()?);
            }
            Projection::Columns(columns)
        };
        self.expect_keyword("FROM")?;
        Ok(Statement::Select {
            table: self.table_name()?,
            projection,
        })
    }

    fn show(&mut self) -> Result<Statement, ParseError> {
        if self.eat_keyword("DATABASES") || self.eat_keyword("SCHEMAS") {
            return Ok(Statement::ShowDatabases);
        }
        self.expect_keyword("TABLES")?;
        let database = if self.eat_keyword("IN") || self.eat_keyword("FROM") {
            Some(self.identifier()?)
        } else {
            None
        };
        Ok(Statement::ShowTables { database })
    }
}
