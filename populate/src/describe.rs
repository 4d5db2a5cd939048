use warehouse::TableMetadata;
use warehouse::metadata::ColumnInfo;

/// Renders the text that gets embedded for a table. Identical metadata always
/// yields identical text.
pub(crate) fn format_table_content(metadata: &TableMetadata) -> String {
    let mut lines = vec![format!("Table: {}", metadata.table_name)];

    let columns: Vec<String> = metadata.columns.iter().map(describe_column).collect();
    lines.push(format!("Columns: {}", columns.join(", ")));

    if !metadata.foreign_keys.is_empty() {
        let foreign_keys: Vec<String> = metadata
            .foreign_keys
            .iter()
            .map(|fk| {
                format!(
                    "{}.{} → {}.{}",
                    metadata.table_name, fk.column_name, fk.referenced_table, fk.referenced_column
                )
            })
            .collect();
        lines.push(format!("Foreign Keys: {}", foreign_keys.join(", ")));
    }

    if !metadata.primary_keys.is_empty() {
        lines.push(format!("Primary Keys: {}", metadata.primary_keys.join(", ")));
    }

    if !metadata.enum_values.is_empty() {
        let samples: Vec<String> = metadata
            .enum_values
            .iter()
            .map(|enum_value| {
                let values: Vec<String> = enum_value
                    .values
                    .iter()
                    .map(|value| format!("'{value}'"))
                    .collect();
                format!("{} can be {}", enum_value.column_name, values.join(", "))
            })
            .collect();
        lines.push(format!("Sample Values: {}", samples.join("; ")));
    }

    lines.join("\n")
}

fn describe_column(column: &ColumnInfo) -> String {
    let mut constraints = Vec::new();

    if column.is_primary_key {
        constraints.push("primary key");
    }
    if column.is_foreign_key {
        constraints.push("foreign key");
    }
    // Primary keys are implicitly not null.
    if !column.is_nullable && !column.is_primary_key {
        constraints.push("not null");
    }

    if constraints.is_empty() {
        format!("{} ({})", column.column_name, column.data_type)
    } else {
        format!(
            "{} ({}, {})",
            column.column_name,
            column.data_type,
            constraints.join(", ")
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use warehouse::metadata::{EnumValue, ForeignKeyInfo};

    fn column(name: &str, data_type: &str) -> ColumnInfo {
        ColumnInfo {
            column_name: name.to_string(),
            data_type: data_type.to_string(),
            is_nullable: true,
            is_primary_key: false,
            is_foreign_key: false,
        }
    }

    fn orders() -> TableMetadata {
        TableMetadata {
            table_name: "orders".to_string(),
            columns: vec![
                ColumnInfo {
                    is_primary_key: true,
                    is_nullable: false,
                    ..column("id", "bigint")
                },
                ColumnInfo {
                    is_foreign_key: true,
                    ..column("customer_id", "bigint")
                },
                ColumnInfo {
                    is_nullable: false,
                    ..column("status", "string")
                },
                column("total", "decimal(10,2)"),
            ],
            primary_keys: vec!["id".to_string()],
            foreign_keys: vec![ForeignKeyInfo {
                column_name: "customer_id".to_string(),
                referenced_table: "customers".to_string(),
                referenced_column: "id".to_string(),
            }],
            enum_values: vec![
                EnumValue {
                    column_name: "status".to_string(),
                    values: vec!["paid".to_string(), "pending".to_string()],
                },
                EnumValue {
                    column_name: "channel".to_string(),
                    values: vec!["store".to_string(), "web".to_string()],
                },
            ],
        }
    }

    #[test]
    fn formats_every_section() {
        assert_eq!(
            format_table_content(&orders()),
            "Table: orders\n\
             Columns: id (bigint, primary key), customer_id (bigint, foreign key), status (string, not null), total (decimal(10,2))\n\
             Foreign Keys: orders.customer_id → customers.id\n\
             Primary Keys: id\n\
             Sample Values: status can be 'paid', 'pending'; channel can be 'store', 'web'"
        );
    }

    #[test]
    fn omits_empty_sections() {
        let metadata = TableMetadata {
            table_name: "events".to_string(),
            columns: vec![column("payload", "string")],
            primary_keys: Vec::new(),
            foreign_keys: Vec::new(),
            enum_values: Vec::new(),
        };

        assert_eq!(
            format_table_content(&metadata),
            "Table: events\nColumns: payload (string)"
        );
    }
}
