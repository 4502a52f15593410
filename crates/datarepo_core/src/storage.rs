//! SQLite storage adapter.
//!
//! # Responsibility
//! - Execute bound statements and materialize rows as [`Record`]s.
//! - Provide identity-keyed insert/update/delete/find primitives.
//! - Acquire pessimistic write locks on behalf of a transaction.
//!
//! # Invariants
//! - Every statement sent to SQLite is counted, so callers can observe
//!   round trips (N+1 diagnostics).
//! - Busy/locked failures surface as `RepoError::LockTimeout`.

use crate::model::{EntityId, EntitySchema};
use crate::repo::{RepoError, RepoResult};
use log::{debug, warn};
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection};
use std::cell::Cell;
use std::rc::Rc;

/// Lock requested for the rows a query returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LockMode {
    #[default]
    None,
    /// Blocks other writers until the holding transaction ends.
    PessimisticWrite,
}

/// SQL text with positional placeholders and their values.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundStatement {
    pub sql: String,
    pub values: Vec<Value>,
}

impl BoundStatement {
    pub fn new(sql: impl Into<String>, values: Vec<Value>) -> Self {
        Self {
            sql: sql.into(),
            values,
        }
    }
}

/// One result row keyed by column name.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    columns: Rc<[String]>,
    values: Vec<Value>,
}

impl Record {
    pub fn new(columns: Rc<[String]>, values: Vec<Value>) -> Self {
        Self { columns, values }
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.columns
            .iter()
            .position(|name| name == column)
            .and_then(|index| self.values.get(index))
    }

    pub fn first(&self) -> Option<&Value> {
        self.values.first()
    }

    pub fn integer(&self, column: &str) -> RepoResult<i64> {
        self.optional_integer(column)?
            .ok_or_else(|| RepoError::InvalidData(format!("column `{column}` is null")))
    }

    pub fn optional_integer(&self, column: &str) -> RepoResult<Option<i64>> {
        match self.require(column)? {
            Value::Null => Ok(None),
            Value::Integer(value) => Ok(Some(*value)),
            other => Err(type_mismatch(column, "integer", other)),
        }
    }

    pub fn text(&self, column: &str) -> RepoResult<String> {
        self.optional_text(column)?
            .ok_or_else(|| RepoError::InvalidData(format!("column `{column}` is null")))
    }

    pub fn optional_text(&self, column: &str) -> RepoResult<Option<String>> {
        match self.require(column)? {
            Value::Null => Ok(None),
            Value::Text(value) => Ok(Some(value.clone())),
            other => Err(type_mismatch(column, "text", other)),
        }
    }

    fn require(&self, column: &str) -> RepoResult<&Value> {
        self.get(column)
            .ok_or_else(|| RepoError::InvalidData(format!("result has no column `{column}`")))
    }
}

fn type_mismatch(column: &str, expected: &str, actual: &Value) -> RepoError {
    RepoError::InvalidData(format!(
        "column `{column}` expected {expected}, found {:?}",
        actual.data_type()
    ))
}

/// Statement executor bound to one connection (usually an open transaction).
pub struct SqliteStorage<'a> {
    conn: &'a Connection,
    statements: &'a Cell<u64>,
}

impl<'a> SqliteStorage<'a> {
    pub fn new(conn: &'a Connection, statements: &'a Cell<u64>) -> Self {
        Self { conn, statements }
    }

    /// Number of statements executed through this counter.
    pub fn statements_executed(&self) -> u64 {
        self.statements.get()
    }

    /// Runs a query and returns every row.
    pub fn execute(&self, statement: &BoundStatement) -> RepoResult<Vec<Record>> {
        self.count_statement();
        debug!(
            "event=storage_query module=storage status=start params={}",
            statement.values.len()
        );
        let mut stmt = self.conn.prepare(&statement.sql)?;
        let columns: Rc<[String]> = stmt
            .column_names()
            .into_iter()
            .map(str::to_string)
            .collect::<Vec<_>>()
            .into();
        let mut rows = stmt.query(params_from_iter(statement.values.iter()))?;
        let mut records = Vec::new();
        while let Some(row) = rows.next()? {
            let mut values = Vec::with_capacity(columns.len());
            for index in 0..columns.len() {
                values.push(row.get::<_, Value>(index)?);
            }
            records.push(Record::new(Rc::clone(&columns), values));
        }
        Ok(records)
    }

    /// Runs an `UPDATE`/`DELETE`/`INSERT` and returns the affected row count.
    pub fn execute_mutation(&self, statement: &BoundStatement) -> RepoResult<usize> {
        self.count_statement();
        let affected = self
            .conn
            .execute(&statement.sql, params_from_iter(statement.values.iter()))?;
        debug!("event=storage_mutation module=storage status=ok affected={affected}");
        Ok(affected)
    }

    /// Runs a query expected to return one integer in its first column.
    pub fn execute_scalar(&self, statement: &BoundStatement) -> RepoResult<i64> {
        let records = self.execute(statement)?;
        match records.first().and_then(Record::first) {
            Some(Value::Integer(value)) => Ok(*value),
            other => Err(RepoError::InvalidData(format!(
                "scalar query returned {other:?} instead of an integer"
            ))),
        }
    }

    /// Loads one row by identity.
    pub fn find(&self, schema: &EntitySchema, id: EntityId) -> RepoResult<Option<Record>> {
        let sql = format!(
            "SELECT {} FROM {} {} WHERE {}.{} = ?1",
            schema.select_list(schema.alias),
            schema.table,
            schema.alias,
            schema.alias,
            schema.id_column
        );
        let mut records = self.execute(&BoundStatement::new(sql, vec![Value::Integer(id)]))?;
        Ok(records.pop())
    }

    /// Inserts one row. A `None` id lets storage generate the identity.
    pub fn insert(
        &self,
        schema: &EntitySchema,
        id: Option<EntityId>,
        values: &[Value],
    ) -> RepoResult<EntityId> {
        let mut columns = Vec::with_capacity(values.len() + 1);
        let mut binds = Vec::with_capacity(values.len() + 1);
        if let Some(id) = id {
            columns.push(schema.id_column);
            binds.push(Value::Integer(id));
        }
        columns.extend(schema.columns());
        binds.extend(values.iter().cloned());

        let placeholders = (1..=columns.len())
            .map(|index| format!("?{index}"))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({placeholders})",
            schema.table,
            columns.join(", ")
        );
        self.execute_mutation(&BoundStatement::new(sql, binds))?;
        Ok(id.unwrap_or_else(|| self.conn.last_insert_rowid()))
    }

    /// Writes all persistent columns of one row.
    pub fn update(&self, schema: &EntitySchema, id: EntityId, values: &[Value]) -> RepoResult<usize> {
        let assignments = schema
            .columns()
            .iter()
            .enumerate()
            .map(|(index, column)| format!("{column} = ?{}", index + 1))
            .collect::<Vec<_>>()
            .join(", ");
        let mut binds = values.to_vec();
        binds.push(Value::Integer(id));
        let sql = format!(
            "UPDATE {} SET {assignments} WHERE {} = ?{}",
            schema.table,
            schema.id_column,
            binds.len()
        );
        self.execute_mutation(&BoundStatement::new(sql, binds))
    }

    pub fn delete(&self, schema: &EntitySchema, id: EntityId) -> RepoResult<usize> {
        let sql = format!(
            "DELETE FROM {} WHERE {} = ?1",
            schema.table, schema.id_column
        );
        self.execute_mutation(&BoundStatement::new(sql, vec![Value::Integer(id)]))
    }

    /// Locks the given rows for the rest of the transaction.
    ///
    /// SQLite has no `SELECT ... FOR UPDATE`; a no-op write against the rows
    /// takes the database write lock, which blocks every other writer until
    /// commit or rollback. Waiting longer than the busy timeout fails with
    /// `RepoError::LockTimeout`.
    pub fn lock(&self, schema: &EntitySchema, ids: &[EntityId], mode: LockMode) -> RepoResult<()> {
        if mode == LockMode::None || ids.is_empty() {
            return Ok(());
        }
        let placeholders = vec!["?"; ids.len()].join(", ");
        let sql = format!(
            "UPDATE {table} SET {id} = {id} WHERE {id} IN ({placeholders})",
            table = schema.table,
            id = schema.id_column
        );
        let values = ids.iter().map(|id| Value::Integer(*id)).collect();
        match self.execute_mutation(&BoundStatement::new(sql, values)) {
            Ok(_) => {
                debug!(
                    "event=storage_lock module=storage status=ok entity={} rows={}",
                    schema.name,
                    ids.len()
                );
                Ok(())
            }
            Err(err) => {
                warn!(
                    "event=storage_lock module=storage status=error entity={} rows={} error={}",
                    schema.name,
                    ids.len(),
                    err
                );
                Err(err)
            }
        }
    }

    fn count_statement(&self) {
        self.statements.set(self.statements.get() + 1);
    }
}

#[cfg(test)]
mod tests {
    use super::{BoundStatement, Record, SqliteStorage};
    use crate::db::open_db_in_memory;
    use rusqlite::types::Value;
    use std::cell::Cell;
    use std::rc::Rc;

    #[test]
    fn record_reads_typed_columns() {
        let columns: Rc<[String]> = vec!["id".to_string(), "name".to_string(), "team".to_string()].into();
        let record = Record::new(
            columns,
            vec![Value::Integer(7), Value::Text("a".to_string()), Value::Null],
        );
        assert_eq!(record.integer("id").unwrap(), 7);
        assert_eq!(record.text("name").unwrap(), "a");
        assert_eq!(record.optional_integer("team").unwrap(), None);
        assert!(record.integer("team").is_err());
        assert!(record.text("id").is_err());
        assert!(record.get("missing").is_none());
    }

    #[test]
    fn statements_are_counted() {
        let conn = open_db_in_memory().unwrap();
        let counter = Cell::new(0);
        let storage = SqliteStorage::new(&conn, &counter);

        let inserted = storage
            .execute_mutation(&BoundStatement::new(
                "INSERT INTO teams (name) VALUES (?1)",
                vec![Value::Text("teamA".to_string())],
            ))
            .unwrap();
        assert_eq!(inserted, 1);
        let total = storage
            .execute_scalar(&BoundStatement::new("SELECT COUNT(*) FROM teams", Vec::new()))
            .unwrap();
        assert_eq!(total, 1);
        assert_eq!(storage.statements_executed(), 2);
    }
}
