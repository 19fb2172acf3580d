//! Database handle shared by the journal, the schema manager and the actions.
//!
//! A run works against one rusqlite connection (the hub). Every sqlite
//! endpoint of the configuration is attached to it under its schema name,
//! so SQL can address `schema.table` across files and a single transaction
//! can cover data rows and journal rows alike.

use std::path::Path;
use std::sync::{Arc, Mutex};

use rusqlite::Connection;

pub mod error;

pub use error::DatabaseError;

/// Thread-safe database handle wrapping a single rusqlite connection.
///
/// Cloning is cheap (inner `Arc`). All access is serialized through a
/// `Mutex`.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Opens (or creates) the database at the given path as the `main` schema.
    pub fn open(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| DatabaseError::Io {
                    path: parent.to_path_buf(),
                    source: e,
                })?;
            }
        }

        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;

        log::info!("Database opened at {}", path.display());

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Opens an in-memory hub. Endpoints are attached to it afterwards.
    pub fn open_in_memory() -> Result<Self, DatabaseError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Attaches a database file under `schema`. Attaching a schema that is
    /// already present is a no-op.
    pub fn attach(&self, schema: &str, path: &str) -> Result<(), DatabaseError> {
        if !is_valid_identifier(schema) {
            return Err(DatabaseError::InvalidSchemaName(schema.to_string()));
        }
        if self.has_schema(schema)? {
            return Ok(());
        }

        if path != ":memory:" {
            if let Some(parent) = Path::new(path).parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent).map_err(|e| DatabaseError::Io {
                        path: parent.to_path_buf(),
                        source: e,
                    })?;
                }
            }
        }

        self.with_conn(|conn| {
            conn.execute(&format!("ATTACH DATABASE ?1 AS \"{}\"", schema), [path])
                .map_err(|e| DatabaseError::Attach {
                    schema: schema.to_string(),
                    path: path.to_string(),
                    source: e,
                })?;
            Ok(())
        })?;

        log::info!("Attached '{}' as schema '{}'", path, schema);
        Ok(())
    }

    /// Names of every schema visible on the connection (`main`, `temp` excluded).
    pub fn schemas(&self) -> Result<Vec<String>, DatabaseError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("PRAGMA database_list")?;
            let names = stmt
                .query_map([], |row| row.get::<_, String>(1))?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(names
                .into_iter()
                .filter(|n| n != "main" && n != "temp")
                .collect())
        })
    }

    pub fn has_schema(&self, schema: &str) -> Result<bool, DatabaseError> {
        if schema == "main" {
            return Ok(true);
        }
        Ok(self.schemas()?.iter().any(|s| s == schema))
    }

    /// Provides locked access to the underlying connection.
    pub fn with_conn<F, T>(&self, f: F) -> Result<T, DatabaseError>
    where
        F: FnOnce(&Connection) -> Result<T, DatabaseError>,
    {
        let conn = self.conn.lock().map_err(|_| DatabaseError::LockPoisoned)?;
        f(&conn)
    }

    /// Like [`Database::with_conn`] for callers working in the crate error type.
    pub fn with_session<F, T>(&self, f: F) -> crate::Result<T>
    where
        F: FnOnce(&Connection) -> crate::Result<T>,
    {
        let conn = self.conn.lock().map_err(|_| DatabaseError::LockPoisoned)?;
        f(&conn)
    }

    /// Runs `f` inside a transaction. Commits when `f` succeeds, rolls back
    /// otherwise.
    pub fn with_transaction<F, T>(&self, f: F) -> crate::Result<T>
    where
        F: FnOnce(&Connection) -> crate::Result<T>,
    {
        let mut conn = self.conn.lock().map_err(|_| DatabaseError::LockPoisoned)?;
        let tx = conn.transaction()?;
        let out = f(&tx)?;
        tx.commit()?;
        Ok(out)
    }
}

/// Plain SQL identifier: ASCII letters, digits and underscores, not starting
/// with a digit.
pub fn is_valid_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_in_memory() {
        let db = Database::open_in_memory().unwrap();
        db.with_conn(|conn| {
            let one: i64 = conn.query_row("SELECT 1", [], |r| r.get(0))?;
            assert_eq!(one, 1);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_open_file_db() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("test.db");
        let _db = Database::open(&path).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_attach_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("warehouse.db");
        let db = Database::open_in_memory().unwrap();

        db.attach("modw", path.to_str().unwrap()).unwrap();
        db.attach("modw", path.to_str().unwrap()).unwrap();

        assert_eq!(db.schemas().unwrap(), vec!["modw".to_string()]);
        assert!(db.has_schema("modw").unwrap());
        assert!(db.has_schema("main").unwrap());
    }

    #[test]
    fn test_attach_rejects_bad_schema_name() {
        let db = Database::open_in_memory().unwrap();
        let err = db.attach("bad-name", ":memory:").unwrap_err();
        assert!(matches!(err, DatabaseError::InvalidSchemaName(_)));
    }

    #[test]
    fn test_transaction_rolls_back_on_error() {
        let db = Database::open_in_memory().unwrap();
        db.attach("s", ":memory:").unwrap();
        db.with_conn(|conn| {
            conn.execute("CREATE TABLE s.t (v INTEGER)", [])?;
            Ok(())
        })
        .unwrap();

        let result: crate::Result<()> = db.with_transaction(|conn| {
            conn.execute("INSERT INTO s.t (v) VALUES (1)", [])?;
            Err(crate::EtlError::InvalidRequest("boom".into()))
        });
        assert!(result.is_err());

        let count: i64 = db
            .with_conn(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM s.t", [], |r| r.get(0))?))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn test_database_is_clone() {
        let db = Database::open_in_memory().unwrap();
        let db2 = db.clone();
        db.attach("x", ":memory:").unwrap();
        assert!(db2.has_schema("x").unwrap());
    }

    #[test]
    fn test_identifier_rules() {
        assert!(is_valid_identifier("modw_etl"));
        assert!(is_valid_identifier("_t1"));
        assert!(!is_valid_identifier("1abc"));
        assert!(!is_valid_identifier("a.b"));
        assert!(!is_valid_identifier(""));
    }
}
