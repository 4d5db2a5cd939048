//! Table metadata extraction for the offline schema-embedding producer.
//!
//! Extraction is dialect specific, so it sits behind [`MetadataExtractor`].
//! [`SparkMetadataExtractor`] reads Spark SQL / Databricks `DESCRIBE` and
//! `SHOW` output. Primary keys, foreign keys and sample values are optional:
//! failing to read them leaves the field empty instead of failing the table.

use std::collections::HashSet;
use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;

use crate::{Row, Session, SessionScope, StatementOptions, WarehouseError, query_all};

const METADATA_MAX_ROWS: usize = 10_000;
const METADATA_TIMEOUT: Duration = Duration::from_secs(120);
const SAMPLE_ROWS: usize = 20;
const MIN_ENUM_VALUES: usize = 2;
const MAX_ENUM_VALUES: usize = 10;
const TEXT_TYPES: [&str; 4] = ["string", "text", "varchar", "char"];
const DETAIL_SECTION: &str = "# Detailed Table Information";

static FOREIGN_KEY_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\w+)\s*->\s*(\w+)\.(\w+)").expect("foreign key pattern is valid")
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnInfo {
    pub column_name: String,
    pub data_type: String,
    pub is_nullable: bool,
    pub is_primary_key: bool,
    pub is_foreign_key: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignKeyInfo {
    pub column_name: String,
    pub referenced_table: String,
    pub referenced_column: String,
}

/// A low-cardinality text column and its observed values, sorted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumValue {
    pub column_name: String,
    pub values: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableMetadata {
    pub table_name: String,
    pub columns: Vec<ColumnInfo>,
    pub primary_keys: Vec<String>,
    pub foreign_keys: Vec<ForeignKeyInfo>,
    pub enum_values: Vec<EnumValue>,
}

#[async_trait]
pub trait MetadataExtractor: Send {
    /// Names of every table in the configured catalog and schema.
    async fn list_tables(&mut self) -> Result<Vec<String>, WarehouseError>;

    /// Columns are required; the remaining fields are best effort.
    async fn extract_table(&mut self, table_name: &str) -> Result<TableMetadata, WarehouseError>;
}

/// Metadata extractor for Spark SQL warehouses.
pub struct SparkMetadataExtractor {
    session: Box<dyn Session>,
    scope: SessionScope,
}

impl std::fmt::Debug for SparkMetadataExtractor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SparkMetadataExtractor")
            .field("scope", &self.scope)
            .finish_non_exhaustive()
    }
}

impl SparkMetadataExtractor {
    pub fn new(session: Box<dyn Session>, scope: SessionScope) -> Self {
        Self { session, scope }
    }

    /// Closes the underlying session.
    pub async fn close(self) -> Result<(), WarehouseError> {
        self.session.close().await
    }

    fn qualified(&self, table_name: &str) -> String {
        format!(
            "{}.{}.{}",
            quote_identifier(&self.scope.catalog),
            quote_identifier(&self.scope.schema),
            quote_identifier(table_name)
        )
    }

    async fn query(&mut self, sql: &str, max_rows: usize) -> Result<Vec<Row>, WarehouseError> {
        let options = StatementOptions {
            max_rows,
            timeout: METADATA_TIMEOUT,
        };
        query_all(self.session.as_mut(), sql, &options).await
    }

    async fn primary_keys(&mut self, table_name: &str) -> Vec<String> {
        let sql = format!("SHOW TBLPROPERTIES {}", self.qualified(table_name));
        match self.query(&sql, METADATA_MAX_ROWS).await {
            Ok(rows) => parse_primary_keys(&rows),
            Err(err) => {
                tracing::debug!(table = table_name, error = %err, "no primary key metadata");
                Vec::new()
            }
        }
    }

    async fn enum_values(&mut self, table_name: &str, columns: &[ColumnInfo]) -> Vec<EnumValue> {
        let mut enum_values = Vec::new();

        for column in columns.iter().filter(|column| is_text_type(&column.data_type)) {
            let quoted = quote_identifier(&column.column_name);
            let sql = format!(
                "SELECT DISTINCT {quoted} AS value FROM {} WHERE {quoted} IS NOT NULL LIMIT {SAMPLE_ROWS}",
                self.qualified(table_name)
            );

            match self.query(&sql, SAMPLE_ROWS).await {
                Ok(rows) => {
                    let values = rows.iter().filter_map(|row| string_value(row.get("value")));
                    if let Some(enum_value) = detect_enum(&column.column_name, values) {
                        enum_values.push(enum_value);
                    }
                }
                Err(err) => {
                    tracing::debug!(
                        table = table_name,
                        column = %column.column_name,
                        error = %err,
                        "skipping sample values"
                    );
                }
            }
        }

        enum_values
    }
}

#[async_trait]
impl MetadataExtractor for SparkMetadataExtractor {
    async fn list_tables(&mut self) -> Result<Vec<String>, WarehouseError> {
        let sql = format!(
            "SHOW TABLES IN {}.{}",
            quote_identifier(&self.scope.catalog),
            quote_identifier(&self.scope.schema)
        );
        let rows = self.query(&sql, METADATA_MAX_ROWS).await?;

        Ok(rows
            .iter()
            .filter_map(|row| text(row, "tableName").map(ToString::to_string))
            .collect())
    }

    #[tracing::instrument(skip(self))]
    async fn extract_table(&mut self, table_name: &str) -> Result<TableMetadata, WarehouseError> {
        let sql = format!("DESCRIBE TABLE EXTENDED {}", self.qualified(table_name));
        let description = self.query(&sql, METADATA_MAX_ROWS).await?;

        let mut columns = parse_columns(&description);
        let foreign_keys = parse_foreign_keys(&description);
        let primary_keys = self.primary_keys(table_name).await;

        mark_key_columns(&mut columns, &primary_keys, &foreign_keys);

        let enum_values = self.enum_values(table_name, &columns).await;

        Ok(TableMetadata {
            table_name: table_name.to_string(),
            columns,
            primary_keys,
            foreign_keys,
            enum_values,
        })
    }
}

/// Backtick-quotes a Spark SQL identifier.
pub fn quote_identifier(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

fn text<'a>(row: &'a Row, key: &str) -> Option<&'a str> {
    row.get(key).and_then(Value::as_str)
}

fn string_value(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::Null => None,
        Value::String(value) => Some(value.clone()),
        other => Some(other.to_string()),
    }
}

fn is_text_type(data_type: &str) -> bool {
    let base = data_type
        .split('(')
        .next()
        .unwrap_or_default()
        .trim()
        .to_lowercase();
    TEXT_TYPES.contains(&base.as_str())
}

/// Column rows of `DESCRIBE TABLE EXTENDED`, which end at the first empty
/// or `#`-prefixed `col_name`.
pub fn parse_columns(rows: &[Row]) -> Vec<ColumnInfo> {
    let mut columns = Vec::new();

    for row in rows {
        let column_name = match text(row, "col_name") {
            Some(name) if !name.is_empty() && !name.starts_with('#') => name,
            _ => break,
        };

        if column_name.trim().is_empty() {
            continue;
        }

        let data_type = text(row, "data_type")
            .filter(|data_type| !data_type.is_empty())
            .unwrap_or("string");

        columns.push(ColumnInfo {
            column_name: column_name.to_string(),
            data_type: data_type.to_string(),
            is_nullable: true,
            is_primary_key: false,
            is_foreign_key: false,
        });
    }

    columns
}

/// Reads the `primaryKey` / `primary_key` table property.
pub fn parse_primary_keys(rows: &[Row]) -> Vec<String> {
    rows.iter()
        .find(|row| matches!(text(row, "key"), Some("primaryKey" | "primary_key")))
        .and_then(|row| text(row, "value"))
        .map(|value| {
            value
                .split(',')
                .map(str::trim)
                .filter(|name| !name.is_empty())
                .map(ToString::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Foreign keys listed in the detailed section as `col -> table.col`.
pub fn parse_foreign_keys(rows: &[Row]) -> Vec<ForeignKeyInfo> {
    let mut foreign_keys = Vec::new();
    let mut in_detail_section = false;

    for row in rows {
        let col_name = text(row, "col_name").unwrap_or_default();

        if col_name == DETAIL_SECTION {
            in_detail_section = true;
            continue;
        }

        if !in_detail_section || !col_name.contains("Foreign Key") {
            continue;
        }

        if let Some(captures) = text(row, "data_type").and_then(|t| FOREIGN_KEY_PATTERN.captures(t))
        {
            foreign_keys.push(ForeignKeyInfo {
                column_name: captures[1].to_string(),
                referenced_table: captures[2].to_string(),
                referenced_column: captures[3].to_string(),
            });
        }
    }

    foreign_keys
}

/// Records sample values only when the sample holds between 2 and 10
/// distinct values.
pub fn detect_enum(
    column_name: &str,
    values: impl IntoIterator<Item = String>,
) -> Option<EnumValue> {
    let mut values: Vec<String> = values.into_iter().collect();

    if !(MIN_ENUM_VALUES..=MAX_ENUM_VALUES).contains(&values.len()) {
        return None;
    }

    values.sort();
    Some(EnumValue {
        column_name: column_name.to_string(),
        values,
    })
}

fn mark_key_columns(
    columns: &mut [ColumnInfo],
    primary_keys: &[String],
    foreign_keys: &[ForeignKeyInfo],
) {
    let primary: HashSet<&str> = primary_keys.iter().map(String::as_str).collect();
    let foreign: HashSet<&str> = foreign_keys
        .iter()
        .map(|key| key.column_name.as_str())
        .collect();

    for column in columns {
        column.is_primary_key = primary.contains(column.column_name.as_str());
        column.is_foreign_key = foreign.contains(column.column_name.as_str());
    }
}
