//! In-memory databases, tables and row storage for the reference server.
use std::collections::BTreeMap;

use thiserror::Error;

use crate::{
    protocol::{ColumnData, RowSet, WireTag, response::pack_nulls},
    server::sql::{ColumnDef, Literal, Projection, Statement, TableName},
    types::{ColumnType, Decimal, PrimitiveType, Timestamp},
};

pub const DEFAULT_DATABASE: &str = "default";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CatalogError {
    #[error("database '{0}' does not exist")]
    DatabaseNotFound(String),
    #[error("database '{0}' already exists")]
    DatabaseExists(String),
    #[error("database '{0}' is not empty")]
    DatabaseNotEmpty(String),
    #[error("cannot drop the default database")]
    DropDefault,
    #[error("table '{0}' does not exist")]
    TableNotFound(String),
    #[error("table '{0}' already exists")]
    TableExists(String),
    #[error("column '{0}' does not exist")]
    ColumnNotFound(String),
    #[error("duplicate column '{0}'")]
    DuplicateColumn(String),
    #[error("row {row}: expected {expected} values, got {found}")]
    Arity {
        row: usize,
        expected: usize,
        found: usize,
    },
    #[error("row {row}, column {column}: {message}")]
    Value {
        row: usize,
        column: String,
        message: String,
    },
}

/// One stored value. Each column only ever holds the kind its type maps to.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Null,
    Bool(bool),
    Int(i64),
    Double(f64),
    Text(String),
}

/// Columns plus rows produced by a statement or catalog call.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ResultSet {
    pub columns: Vec<ColumnDef>,
    pub rows: Vec<Vec<Cell>>,
}

impl ResultSet {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Encodes up to `max_rows` rows starting at `offset` into wire columns.
    pub fn row_set(&self, offset: usize, max_rows: usize) -> RowSet {
        let start = offset.min(self.rows.len());
        let end = start.saturating_add(max_rows).min(self.rows.len());
        let rows = &self.rows[start..end];

        let columns = self
            .columns
            .iter()
            .enumerate()
            .map(|(index, column)| {
                encode_column(&column.column_type, rows.iter().map(|row| &row[index]))
            })
            .collect();

        RowSet {
            start_row_offset: start as u64,
            columns,
        }
    }
}

fn encode_column<'a>(
    column_type: &ColumnType,
    cells: impl Iterator<Item = &'a Cell> + Clone,
) -> ColumnData {
    let nulls = pack_nulls(cells.clone().map(|c| *c == Cell::Null));
    match column_type.wire_tag() {
        WireTag::Bool => ColumnData::Bool {
            values: cells.map(|c| matches!(c, Cell::Bool(true))).collect(),
            nulls,
        },
        WireTag::Byte => ColumnData::Byte {
            values: cells.map(|c| c.as_i64() as i8).collect(),
            nulls,
        },
        WireTag::I16 => ColumnData::I16 {
            values: cells.map(|c| c.as_i64() as i16).collect(),
            nulls,
        },
        WireTag::I32 => ColumnData::I32 {
            values: cells.map(|c| c.as_i64() as i32).collect(),
            nulls,
        },
        WireTag::I64 => ColumnData::I64 {
            values: cells.map(Cell::as_i64).collect(),
            nulls,
        },
        WireTag::Double => ColumnData::Double {
            values: cells
                .map(|c| match c {
                    Cell::Double(v) => *v,
                    _ => 0.0,
                })
                .collect(),
            nulls,
        },
        WireTag::String => ColumnData::String {
            values: cells
                .map(|c| match c {
                    Cell::Text(s) => s.as_bytes().to_vec(),
                    _ => Vec::new(),
                })
                .collect(),
            nulls,
        },
    }
}

impl Cell {
    fn as_i64(&self) -> i64 {
        match self {
            Cell::Int(v) => *v,
            _ => 0,
        }
    }

    fn text(value: impl Into<String>) -> Self {
        Cell::Text(value.into())
    }

    fn optional_text(value: Option<&str>) -> Self {
        value.map_or(Cell::Null, Cell::text)
    }
}

#[derive(Debug, Clone)]
pub struct Table {
    pub columns: Vec<ColumnDef>,
    pub rows: Vec<Vec<Cell>>,
}

#[derive(Debug, Default)]
struct Database {
    tables: BTreeMap<String, Table>,
}

/// What a statement did, for the operation log and its result.
#[derive(Debug, PartialEq)]
pub enum Outcome {
    Rows(ResultSet),
    Done(String),
}

#[derive(Debug)]
pub struct Catalog {
    databases: BTreeMap<String, Database>,
}

impl Default for Catalog {
    fn default() -> Self {
        Self::new()
    }
}

impl Catalog {
    pub fn new() -> Self {
        let mut databases = BTreeMap::new();
        databases.insert(DEFAULT_DATABASE.to_string(), Database::default());
        Self { databases }
    }

    pub fn has_database(&self, name: &str) -> bool {
        self.databases.contains_key(&name.to_ascii_lowercase())
    }

    /// Runs `statement` with `current_db` as the session's database; `USE`
    /// updates it.
    pub fn execute(
        &mut self,
        statement: &Statement,
        current_db: &mut String,
    ) -> Result<Outcome, CatalogError> {
        match statement {
            Statement::CreateDatabase {
                name,
                if_not_exists,
            } => {
                if self.databases.contains_key(name) {
                    if *if_not_exists {
                        return Ok(Outcome::Done(format!("database {name} exists")));
                    }
                    return Err(CatalogError::DatabaseExists(name.clone()));
                }
                self.databases.insert(name.clone(), Database::default());
                Ok(Outcome::Done(format!("created database {name}")))
            }
            Statement::DropDatabase {
                name,
                if_exists,
                cascade,
            } => {
                if name == DEFAULT_DATABASE {
                    return Err(CatalogError::DropDefault);
                }
                let Some(db) = self.databases.get(name) else {
                    if *if_exists {
                        return Ok(Outcome::Done(format!("database {name} does not exist")));
                    }
                    return Err(CatalogError::DatabaseNotFound(name.clone()));
                };
                if !db.tables.is_empty() && !cascade {
                    return Err(CatalogError::DatabaseNotEmpty(name.clone()));
                }
                self.databases.remove(name);
                if *current_db == *name {
                    *current_db = DEFAULT_DATABASE.to_string();
                }
                Ok(Outcome::Done(format!("dropped database {name}")))
            }
            Statement::Use { database } => {
                if !self.databases.contains_key(database) {
                    return Err(CatalogError::DatabaseNotFound(database.clone()));
                }
                *current_db = database.clone();
                Ok(Outcome::Done(format!("using database {database}")))
            }
            Statement::CreateTable {
                table,
                columns,
                if_not_exists,
            } => {
                for (i, column) in columns.iter().enumerate() {
                    if columns[..i].iter().any(|c| c.name == column.name) {
                        return Err(CatalogError::DuplicateColumn(column.name.clone()));
                    }
                }
                let db = self.database_mut(table, current_db)?;
                if db.tables.contains_key(&table.name) {
                    if *if_not_exists {
                        return Ok(Outcome::Done(format!("table {table} exists")));
                    }
                    return Err(CatalogError::TableExists(table.to_string()));
                }
                db.tables.insert(
                    table.name.clone(),
                    Table {
                        columns: columns.clone(),
                        rows: Vec::new(),
                    },
                );
                Ok(Outcome::Done(format!("created table {table}")))
            }
            Statement::DropTable { table, if_exists } => {
                let db = self.database_mut(table, current_db)?;
                match db.tables.remove(&table.name) {
                    Some(_) => Ok(Outcome::Done(format!("dropped table {table}"))),
                    None if *if_exists => Ok(Outcome::Done(format!("table {table} does not exist"))),
                    None => Err(CatalogError::TableNotFound(table.to_string())),
                }
            }
            Statement::Insert { table, rows } => {
                let name = table.to_string();
                let db = self.database_mut(table, current_db)?;
                let target = db
                    .tables
                    .get_mut(&table.name)
                    .ok_or(CatalogError::TableNotFound(name))?;

                let coerced = rows
                    .iter()
                    .enumerate()
                    .map(|(row, values)| coerce_row(&target.columns, row, values))
                    .collect::<Result<Vec<_>, _>>()?;
                let count = coerced.len();
                target.rows.extend(coerced);
                Ok(Outcome::Done(format!("inserted {count} rows into {table}")))
            }
            Statement::Select { table, projection } => {
                let source = self.table(table, current_db)?;
                let indices = project(&source.columns, projection)?;
                let columns = indices.iter().map(|&i| source.columns[i].clone()).collect();
                let rows = source
                    .rows
                    .iter()
                    .map(|row| indices.iter().map(|&i| row[i].clone()).collect())
                    .collect();
                Ok(Outcome::Rows(ResultSet { columns, rows }))
            }
            Statement::ShowDatabases => Ok(Outcome::Rows(ResultSet {
                columns: vec![string_column("database_name")],
                rows: self
                    .databases
                    .keys()
                    .map(|name| vec![Cell::text(name)])
                    .collect(),
            })),
            Statement::ShowTables { database } => {
                let name = database.as_deref().unwrap_or(current_db);
                let db = self
                    .databases
                    .get(name)
                    .ok_or_else(|| CatalogError::DatabaseNotFound(name.to_string()))?;
                Ok(Outcome::Rows(ResultSet {
                    columns: vec![string_column("tab_name")],
                    rows: db.tables.keys().map(|t| vec![Cell::text(t)]).collect(),
                }))
            }
        }
    }

    /// Result columns of `statement`, computed without running it.
    pub fn plan(&self, statement: &Statement, current_db: &str) -> Option<Vec<ColumnDef>> {
        match statement {
            Statement::Select { table, projection } => {
                let source = self.table(table, current_db).ok()?;
                let indices = project(&source.columns, projection).ok()?;
                Some(indices.iter().map(|&i| source.columns[i].clone()).collect())
            }
            Statement::ShowDatabases => Some(vec![string_column("database_name")]),
            Statement::ShowTables { .. } => Some(vec![string_column("tab_name")]),
            _ => None,
        }
    }

    /// GetSchemas: databases matching the LIKE `pattern`.
    pub fn schemas(&self, pattern: &str) -> ResultSet {
        ResultSet {
            columns: vec![string_column("TABLE_SCHEM"), string_column("TABLE_CATALOG")],
            rows: self
                .databases
                .keys()
                .filter(|name| like(pattern, name))
                .map(|name| vec![Cell::text(name), Cell::Null])
                .collect(),
        }
    }

    /// GetTables: tables matching `table_pattern` in databases matching `schema_pattern`.
    pub fn tables(&self, schema_pattern: &str, table_pattern: &str) -> ResultSet {
        let rows = self
            .databases
            .iter()
            .filter(|(db, _)| like(schema_pattern, db))
            .flat_map(|(db, database)| {
                database
                    .tables
                    .keys()
                    .filter(|table| like(table_pattern, table))
                    .map(move |table| {
                        vec![
                            Cell::Null,
                            Cell::text(db),
                            Cell::text(table),
                            Cell::text("TABLE"),
                            Cell::Null,
                        ]
                    })
            })
            .collect();

        ResultSet {
            columns: vec![
                string_column("TABLE_CAT"),
                string_column("TABLE_SCHEM"),
                string_column("TABLE_NAME"),
                string_column("TABLE_TYPE"),
                string_column("REMARKS"),
            ],
            rows,
        }
    }

    /// GetColumns: the column listing of one table.
    pub fn columns(&self, database: &str, table: &str) -> Result<ResultSet, CatalogError> {
        let name = TableName {
            database: Some(database.to_ascii_lowercase()),
            name: table.to_ascii_lowercase(),
        };
        let source = self.table(&name, database)?;
        let rows = source
            .columns
            .iter()
            .enumerate()
            .map(|(i, column)| {
                vec![
                    Cell::text(database.to_ascii_lowercase()),
                    Cell::text(&name.name),
                    Cell::text(&column.name),
                    Cell::text(column.column_type.to_string()),
                    Cell::Int(i as i64 + 1),
                    Cell::optional_text(column.comment.as_deref()),
                ]
            })
            .collect();

        Ok(ResultSet {
            columns: vec![
                string_column("TABLE_SCHEM"),
                string_column("TABLE_NAME"),
                string_column("COLUMN_NAME"),
                string_column("TYPE_NAME"),
                ColumnDef::new("ORDINAL_POSITION", ColumnType::Primitive(PrimitiveType::Int)),
                string_column("REMARKS"),
            ],
            rows,
        })
    }

    fn table(&self, table: &TableName, current_db: &str) -> Result<&Table, CatalogError> {
        let db_name = table.database.as_deref().unwrap_or(current_db);
        let db = self
            .databases
            .get(db_name)
            .ok_or_else(|| CatalogError::DatabaseNotFound(db_name.to_string()))?;
        db.tables
            .get(&table.name)
            .ok_or_else(|| CatalogError::TableNotFound(table.to_string()))
    }

    fn database_mut(
        &mut self,
        table: &TableName,
        current_db: &str,
    ) -> Result<&mut Database, CatalogError> {
        let db_name = table.database.as_deref().unwrap_or(current_db);
        self.databases
            .get_mut(db_name)
            .ok_or_else(|| CatalogError::DatabaseNotFound(db_name.to_string()))
    }
}

fn string_column(name: &str) -> ColumnDef {
    ColumnDef::new(name, ColumnType::Primitive(PrimitiveType::String))
}

fn project(columns: &[ColumnDef], projection: &Projection) -> Result<Vec<usize>, CatalogError> {
    match projection {
        Projection::All => Ok((0..columns.len()).collect()),
        Projection::Columns(names) => names
            .iter()
            .map(|name| {
                columns
                    .iter()
                    .position(|c| c.name == *name)
                    .ok_or_else(|| CatalogError::ColumnNotFound(name.clone()))
            })
            .collect(),
    }
}

fn coerce_row(columns: &[ColumnDef], row: usize, values: &[Literal]) -> Result<Vec<Cell>, CatalogError> {
    if values.len() != columns.len() {
        return Err(CatalogError::Arity {
            row,
            expected: columns.len(),
            found: values.len(),
        });
    }
    columns
        .iter()
        .zip(values)
        .map(|(column, value)| {
            coerce(&column.column_type, value).map_err(|message| CatalogError::Value {
                row,
                column: column.name.clone(),
                message,
            })
        })
        .collect()
}

/// Converts a literal to the stored form of `column_type`.
fn coerce(column_type: &ColumnType, value: &Literal) -> Result<Cell, String> {
    let text = match value {
        Literal::Null => return Ok(Cell::Null),
        Literal::Bool(b) => {
            return match column_type {
                ColumnType::Primitive(PrimitiveType::Boolean) => Ok(Cell::Bool(*b)),
                _ => Err(format!("boolean is not a valid {column_type}")),
            };
        }
        Literal::Number(n) | Literal::String(n) => n.as_str(),
    };
    let is_number = matches!(value, Literal::Number(_));

    match column_type {
        ColumnType::Primitive(p) => match p {
            PrimitiveType::TinyInt => integer(text, i8::MIN.into(), i8::MAX.into(), is_number),
            PrimitiveType::SmallInt => integer(text, i16::MIN.into(), i16::MAX.into(), is_number),
            PrimitiveType::Int => integer(text, i32::MIN.into(), i32::MAX.into(), is_number),
            PrimitiveType::BigInt => integer(text, i64::MIN, i64::MAX, is_number),
            PrimitiveType::Float => {
                let v = float(text, is_number)?;
                Ok(Cell::Double(f64::from(v as f32)))
            }
            PrimitiveType::Double => Ok(Cell::Double(float(text, is_number)?)),
            PrimitiveType::Boolean => Err(format!("'{text}' is not a BOOLEAN")),
            PrimitiveType::String => Ok(Cell::text(text)),
            PrimitiveType::Timestamp => {
                let ts = Timestamp::parse(text).map_err(|e| e.to_string())?;
                let naive = ts
                    .to_naive()
                    .ok_or_else(|| format!("'{text}' is out of range"))?;
                Ok(Cell::text(naive.format("%Y-%m-%d %H:%M:%S%.f").to_string()))
            }
        },
        ColumnType::Char { max_length } | ColumnType::Varchar { max_length } => {
            Ok(Cell::text(text.chars().take(*max_length as usize).collect::<String>()))
        }
        ColumnType::Decimal { precision, scale } => {
            let d = Decimal::parse(text, *precision, *scale).map_err(|e| e.to_string())?;
            Ok(Cell::text(d.to_string()))
        }
    }
}

fn integer(text: &str, min: i64, max: i64, is_number: bool) -> Result<Cell, String> {
    if !is_number {
        return Err(format!("'{text}' is a string, expected a number"));
    }
    let v: i64 = text
        .parse()
        .map_err(|_| format!("'{text}' is not an integer"))?;
    if v < min || v > max {
        return Err(format!("{v} is out of range [{min}, {max}]"));
    }
    Ok(Cell::Int(v))
}

fn float(text: &str, is_number: bool) -> Result<f64, String> {
    if !is_number {
        return Err(format!("'{text}' is a string, expected a number"));
    }
    text.parse()
        .map_err(|_| format!("'{text}' is not a number"))
}

/// SQL LIKE match, case-insensitive. `%` matches any run, `_` one character.
/// An empty pattern matches everything.
pub fn like(pattern: &str, text: &str) -> bool {
    if pattern.is_empty() {
        return true;
    }
    let pattern: Vec<char> = pattern.to_lowercase().chars().collect();
    let text: Vec<char> = text.to_lowercase().chars().collect();

    // matches[j]: pattern[..i] matches text[..j]
    let mut matches = vec![false; text.len() + 1];
    matches[0] = true;
    for p in &pattern {
        let mut next = vec![false; text.len() + 1];
        match p {
            '%' => {
                let mut seen = false;
                for j in 0..=text.len() {
                    seen |= matches[j];
                    next[j] = seen;
                }
            }
            _ => {
                for j in 1..=text.len() {
                    next[j] = matches[j - 1] && (*p == '_' || *p == text[j - 1]);
                }
            }
        }
        matches = next;
    }
    matches[text.len()]
}

#[cfg(test)]
mod tests {
    use crate::server::sql::parse;

    use super::*;

    fn run(catalog: &mut Catalog, db: &mut String, sql: &str) -> Result<Outcome, CatalogError> {
        catalog.execute(&parse(sql).unwrap(), db)
    }

    #[test]
    fn like_patterns() {
        assert!(like("%", "anything"));
        assert!(like("", "anything"));
        assert!(like("def%", "default"));
        assert!(like("DEF_ULT", "default"));
        assert!(like("%tab%", "my_table"));
        assert!(!like("def", "default"));
        assert!(!like("_", ""));
    }

    #[test]
    fn insert_coerces_to_column_types() {
        let mut catalog = Catalog::new();
        let mut db = DEFAULT_DATABASE.to_string();
        run(
            &mut catalog,
            &mut db,
            "create table t (a tinyint, b float, c varchar(3), d decimal(5,2), e timestamp)",
        )
        .unwrap();
        run(
            &mut catalog,
            &mut db,
            "insert into t values (1, 0.1, 'abcdef', 1.5, '2001-01-01'), (null, null, null, null, null)",
        )
        .unwrap();

        let Outcome::Rows(rows) = run(&mut catalog, &mut db, "select * from t").unwrap() else {
            panic!("expected rows");
        };
        assert_eq!(
            rows.rows[0],
            vec![
                Cell::Int(1),
                Cell::Double(f64::from(0.1f32)),
                Cell::text("abc"),
                Cell::text("1.50"),
                Cell::text("2001-01-01 00:00:00"),
            ]
        );
        assert!(rows.rows[1].iter().all(|c| *c == Cell::Null));
    }

    #[test]
    fn insert_rejects_out_of_range() {
        let mut catalog = Catalog::new();
        let mut db = DEFAULT_DATABASE.to_string();
        run(&mut catalog, &mut db, "create table t (a tinyint)").unwrap();
        let err = run(&mut catalog, &mut db, "insert into t values (300)").unwrap_err();
        assert!(matches!(err, CatalogError::Value { row: 0, .. }));
        let err = run(&mut catalog, &mut db, "insert into t values (1, 2)").unwrap_err();
        assert!(matches!(err, CatalogError::Arity { expected: 1, found: 2, .. }));
    }

    #[test]
    fn use_and_qualified_names() {
        let mut catalog = Catalog::new();
        let mut db = DEFAULT_DATABASE.to_string();
        run(&mut catalog, &mut db, "create database sales").unwrap();
        run(&mut catalog, &mut db, "create table sales.orders (id int)").unwrap();
        run(&mut catalog, &mut db, "use sales").unwrap();
        assert_eq!(db, "sales");
        assert!(run(&mut catalog, &mut db, "select id from orders").is_ok());

        let err = run(&mut catalog, &mut db, "drop database sales").unwrap_err();
        assert_eq!(err, CatalogError::DatabaseNotEmpty("sales".into()));
        run(&mut catalog, &mut db, "drop database sales cascade").unwrap();
        assert_eq!(db, DEFAULT_DATABASE);
    }

    #[test]
    fn row_set_slices_and_marks_nulls() {
        let result = ResultSet {
            columns: vec![ColumnDef::new("a", ColumnType::Primitive(PrimitiveType::Int))],
            rows: (0..5)
                .map(|i| vec![if i % 2 == 0 { Cell::Int(i) } else { Cell::Null }])
                .collect(),
        };
        let rows = result.row_set(3, 10);
        assert_eq!(rows.start_row_offset, 3);
        assert_eq!(
            rows.columns,
            vec![ColumnData::I32 {
                values: vec![0, 4],
                nulls: pack_nulls([true, false]),
            }]
        );
    }

    #[test]
    fn metadata_listings() {
        let mut catalog = Catalog::new();
        let mut db = DEFAULT_DATABASE.to_string();
        run(&mut catalog, &mut db, "create table t1 (a int comment 'key', b string)").unwrap();

        assert_eq!(catalog.schemas("def%").len(), 1);
        assert_eq!(catalog.schemas("nope").len(), 0);
        assert_eq!(catalog.tables("%", "t_").len(), 1);

        let columns = catalog.columns("default", "T1").unwrap();
        assert_eq!(columns.rows[0][2], Cell::text("a"));
        assert_eq!(columns.rows[0][5], Cell::text("key"));
        assert_eq!(columns.rows[1][4], Cell::Int(2));
        assert!(matches!(
            catalog.columns("default", "missing"),
            Err(CatalogError::TableNotFound(_))
        ));
    }
}
