//! Schema command implementation.

use rowsync_testkit::demo_schema;
use serde::Serialize;

/// Printable schema summary.
#[derive(Debug, Serialize)]
struct SchemaResult {
    /// Tables with their primary keys.
    tables: Vec<TableSummary>,
    /// Apply order (parents before children).
    apply_order: Vec<String>,
    /// Hex-encoded schema fingerprint.
    fingerprint: String,
}

/// One table in the summary.
#[derive(Debug, Serialize)]
struct TableSummary {
    /// Table name.
    name: String,
    /// Column names.
    columns: Vec<String>,
    /// Primary-key column names.
    primary_key: Vec<String>,
}

/// Runs the schema command.
pub fn run(format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let schema = demo_schema();

    let result = SchemaResult {
        tables: schema
            .tables
            .iter()
            .map(|t| TableSummary {
                name: t.name.clone(),
                columns: t.columns.iter().map(|c| c.name.clone()).collect(),
                primary_key: t.primary_key.clone(),
            })
            .collect(),
        apply_order: schema.table_order()?,
        fingerprint: schema
            .fingerprint()?
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect(),
    };

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&result)?),
        _ => {
            for table in &result.tables {
                println!(
                    "{} ({}) pk: {}",
                    table.name,
                    table.columns.join(", "),
                    table.primary_key.join(", ")
                );
            }
            println!("apply order: {}", result.apply_order.join(" -> "));
            println!("fingerprint: {}", result.fingerprint);
        }
    }

    Ok(())
}
