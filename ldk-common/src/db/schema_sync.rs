//! Declarative schema synchronization
//!
//! Runs between `CREATE TABLE IF NOT EXISTS` and the versioned migrations.
//! Each table declares its expected columns; columns missing from an older
//! database are added with `ALTER TABLE ADD COLUMN`. Type and constraint
//! drift is only reported, since SQLite cannot alter those in place.
//!
//! ```rust,ignore
//! pub struct VehiclesTableSchema;
//!
//! impl TableSchema for VehiclesTableSchema {
//!     fn table_name() -> &'static str { "vehicles" }
//!     fn expected_columns() -> Vec<ColumnDefinition> {
//!         vec![
//!             ColumnDefinition::new("id", "TEXT").primary_key(),
//!             ColumnDefinition::new("body_style", "TEXT"), // added on next start
//!         ]
//!     }
//! }
//!
//! SchemaSync::sync_table::<VehiclesTableSchema>(&pool).await?;
//! ```

use crate::Result;
use sqlx::{Row, SqlitePool};
use tracing::{debug, info, warn};

/// Expected column with its SQL constraints
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDefinition {
    pub name: String,
    /// SQL type (TEXT, INTEGER, REAL)
    pub sql_type: String,
    pub not_null: bool,
    pub primary_key: bool,
    pub unique: bool,
    /// SQL literal, e.g. `'draft'` or `0`
    pub default_value: Option<String>,
}

impl ColumnDefinition {
    pub fn new(name: impl Into<String>, sql_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sql_type: sql_type.into(),
            not_null: false,
            primary_key: false,
            unique: false,
            default_value: None,
        }
    }

    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }

    pub fn not_null(mut self) -> Self {
        self.not_null = true;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn default(mut self, value: impl Into<String>) -> Self {
        self.default_value = Some(value.into());
        self
    }
}

/// Row of `PRAGMA table_info`
#[derive(Debug, Clone)]
pub struct ActualColumn {
    pub cid: i32,
    pub name: String,
    pub type_name: String,
    pub not_null: bool,
    pub default_value: Option<String>,
    pub pk: bool,
}

/// Difference between declared and actual schema
#[derive(Debug, Clone)]
pub enum SchemaDrift {
    MissingColumn {
        table: String,
        column: ColumnDefinition,
    },
    /// Needs a manual migration
    TypeMismatch {
        table: String,
        column: String,
        expected: String,
        actual: String,
    },
    /// Needs a manual migration (table rebuild)
    ConstraintMismatch {
        table: String,
        column: String,
        constraint: String,
    },
}

/// Expected schema for one table
pub trait TableSchema {
    fn table_name() -> &'static str;

    /// Expected columns, in creation order
    fn expected_columns() -> Vec<ColumnDefinition>;
}

/// Reads the live schema
pub struct SchemaIntrospector;

impl SchemaIntrospector {
    /// Columns of `table_name`, ordered by cid
    pub async fn introspect_table(
        pool: &SqlitePool,
        table_name: &str,
    ) -> Result<Vec<ActualColumn>> {
        let query = format!("PRAGMA table_info({})", table_name);
        let rows = sqlx::query(&query).fetch_all(pool).await?;

        let mut columns: Vec<ActualColumn> = rows
            .iter()
            .map(|row| ActualColumn {
                cid: row.get("cid"),
                name: row.get("name"),
                type_name: row.get("type"),
                not_null: row.get::<i32, _>("notnull") != 0,
                default_value: row.get("dflt_value"),
                pk: row.get::<i32, _>("pk") != 0,
            })
            .collect();
        columns.sort_by_key(|c| c.cid);

        Ok(columns)
    }

    pub async fn table_exists(pool: &SqlitePool, table_name: &str) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?)",
        )
        .bind(table_name)
        .fetch_one(pool)
        .await?;

        Ok(exists)
    }
}

/// Compares declared and live schema
pub struct SchemaDiff;

impl SchemaDiff {
    pub fn compare(
        table_name: &str,
        expected: &[ColumnDefinition],
        actual: &[ActualColumn],
    ) -> Vec<SchemaDrift> {
        let mut drift = Vec::new();

        for expected_col in expected {
            let Some(actual_col) = actual.iter().find(|c| c.name == expected_col.name) else {
                drift.push(SchemaDrift::MissingColumn {
                    table: table_name.to_string(),
                    column: expected_col.clone(),
                });
                continue;
            };

            if !Self::types_compatible(&expected_col.sql_type, &actual_col.type_name) {
                drift.push(SchemaDrift::TypeMismatch {
                    table: table_name.to_string(),
                    column: expected_col.name.clone(),
                    expected: expected_col.sql_type.clone(),
                    actual: actual_col.type_name.clone(),
                });
            }

            // SQLite reports notnull=0 for TEXT PRIMARY KEY, so skip pk columns here
            if expected_col.not_null && !expected_col.primary_key && !actual_col.not_null {
                drift.push(SchemaDrift::ConstraintMismatch {
                    table: table_name.to_string(),
                    column: expected_col.name.clone(),
                    constraint: "NOT NULL".to_string(),
                });
            }

            if expected_col.primary_key && !actual_col.pk {
                drift.push(SchemaDrift::ConstraintMismatch {
                    table: table_name.to_string(),
                    column: expected_col.name.clone(),
                    constraint: "PRIMARY KEY".to_string(),
                });
            }
        }

        drift
    }

    /// SQLite type affinity comparison
    fn types_compatible(expected: &str, actual: &str) -> bool {
        #[derive(PartialEq)]
        enum Affinity {
            Integer,
            Text,
            Real,
            Other(String),
        }

        fn affinity(t: &str) -> Affinity {
            let t = t.to_uppercase();
            if t.contains("INT") {
                Affinity::Integer
            } else if t.contains("TEXT") || t.contains("CHAR") || t.contains("CLOB") {
                Affinity::Text
            } else if t.contains("REAL") || t.contains("FLOA") || t.contains("DOUB") {
                Affinity::Real
            } else {
                Affinity::Other(t)
            }
        }

        affinity(expected) == affinity(actual)
    }
}

/// Applies fixable drift
pub struct SchemaSync;

impl SchemaSync {
    /// Add missing columns to `T`'s table; warn about everything else
    ///
    /// Returns the number of columns added.
    pub async fn sync_table<T: TableSchema>(pool: &SqlitePool) -> Result<usize> {
        let table_name = T::table_name();

        if !SchemaIntrospector::table_exists(pool, table_name).await? {
            warn!("Schema sync: table '{}' does not exist yet, skipping", table_name);
            return Ok(0);
        }

        let actual = SchemaIntrospector::introspect_table(pool, table_name).await?;
        let drift = SchemaDiff::compare(table_name, &T::expected_columns(), &actual);

        if drift.is_empty() {
            debug!("Schema sync: '{}' up to date", table_name);
            return Ok(0);
        }

        let mut added = 0;
        for change in drift {
            match change {
                SchemaDrift::MissingColumn { table, column } => {
                    Self::add_column(pool, &table, &column).await?;
                    added += 1;
                }
                SchemaDrift::TypeMismatch {
                    table,
                    column,
                    expected,
                    actual,
                } => {
                    warn!(
                        "Schema sync: {}.{} is '{}', expected '{}'. Manual migration required.",
                        table, column, actual, expected
                    );
                }
                SchemaDrift::ConstraintMismatch {
                    table,
                    column,
                    constraint,
                } => {
                    warn!(
                        "Schema sync: {}.{} lacks '{}'. Manual migration required.",
                        table, column, constraint
                    );
                }
            }
        }

        Ok(added)
    }

    /// ALTER TABLE ADD COLUMN
    ///
    /// SQLite cannot add PRIMARY KEY or UNIQUE columns, and NOT NULL only
    /// with a DEFAULT; those constraints are dropped with a warning.
    async fn add_column(pool: &SqlitePool, table: &str, column: &ColumnDefinition) -> Result<()> {
        let mut sql = format!(
            "ALTER TABLE {} ADD COLUMN {} {}",
            table, column.name, column.sql_type
        );

        if column.primary_key || column.unique {
            warn!(
                "Schema sync: {}.{} added without PRIMARY KEY/UNIQUE constraint",
                table, column.name
            );
        }

        match (&column.default_value, column.not_null) {
            (Some(default), true) => sql.push_str(&format!(" NOT NULL DEFAULT {}", default)),
            (Some(default), false) => sql.push_str(&format!(" DEFAULT {}", default)),
            (None, true) => warn!(
                "Schema sync: {}.{} has no DEFAULT, added as nullable",
                table, column.name
            ),
            (None, false) => {}
        }

        match sqlx::query(&sql).execute(pool).await {
            Ok(_) => {
                info!("Schema sync: added column {}.{} ({})", table, column.name, column.sql_type);
                Ok(())
            }
            // Another service may have added it concurrently
            Err(sqlx::Error::Database(db_err)) if db_err.message().contains("duplicate column") => {
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn setup_test_db() -> SqlitePool {
        SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap()
    }

    struct WidgetsSchema;

    impl TableSchema for WidgetsSchema {
        fn table_name() -> &'static str {
            "widgets"
        }

        fn expected_columns() -> Vec<ColumnDefinition> {
            vec![
                ColumnDefinition::new("id", "TEXT").primary_key(),
                ColumnDefinition::new("name", "TEXT").not_null(),
                ColumnDefinition::new("status", "TEXT").not_null().default("'draft'"),
                ColumnDefinition::new("price", "INTEGER"),
            ]
        }
    }

    #[test]
    fn test_types_compatible() {
        assert!(SchemaDiff::types_compatible("INTEGER", "BIGINT"));
        assert!(SchemaDiff::types_compatible("TEXT", "VARCHAR(17)"));
        assert!(SchemaDiff::types_compatible("REAL", "DOUBLE"));
        assert!(!SchemaDiff::types_compatible("TEXT", "INTEGER"));
    }

    #[tokio::test]
    async fn test_sync_adds_missing_columns_once() {
        let pool = setup_test_db().await;
        sqlx::query("CREATE TABLE widgets (id TEXT PRIMARY KEY, name TEXT NOT NULL)")
            .execute(&pool)
            .await
            .unwrap();
        sqlx::query("INSERT INTO widgets (id, name) VALUES ('w1', 'first')")
            .execute(&pool)
            .await
            .unwrap();

        assert_eq!(SchemaSync::sync_table::<WidgetsSchema>(&pool).await.unwrap(), 2);
        assert_eq!(SchemaSync::sync_table::<WidgetsSchema>(&pool).await.unwrap(), 0);

        let status: String = sqlx::query_scalar("SELECT status FROM widgets WHERE id = 'w1'")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(status, "draft");
    }

    #[tokio::test]
    async fn test_type_mismatch_reported_not_fixed() {
        let pool = setup_test_db().await;
        sqlx::query(
            "CREATE TABLE widgets \
             (id TEXT PRIMARY KEY, name TEXT NOT NULL, status TEXT NOT NULL, price TEXT)",
        )
        .execute(&pool)
        .await
        .unwrap();

        let actual = SchemaIntrospector::introspect_table(&pool, "widgets").await.unwrap();
        let drift = SchemaDiff::compare("widgets", &WidgetsSchema::expected_columns(), &actual);
        assert_eq!(drift.len(), 1);
        assert!(matches!(&drift[0], SchemaDrift::TypeMismatch { column, .. } if column == "price"));
        assert_eq!(SchemaSync::sync_table::<WidgetsSchema>(&pool).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_missing_table_is_skipped() {
        let pool = setup_test_db().await;
        assert!(!SchemaIntrospector::table_exists(&pool, "widgets").await.unwrap());
        assert_eq!(SchemaSync::sync_table::<WidgetsSchema>(&pool).await.unwrap(), 0);
    }
}
