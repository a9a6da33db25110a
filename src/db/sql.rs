//! SQL text generation for the table sink

use std::ops::Range;

/// Quote an identifier for Postgres / SQLite, doubling embedded quotes
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// DDL for the dataset table: one TEXT column per schema column, in order
pub fn create_table_ddl(table_name: &str, columns: &[String]) -> String {
    let column_defs: Vec<String> = columns
        .iter()
        .map(|col| format!("  {} TEXT", quote_ident(col)))
        .collect();

    format!(
        "CREATE TABLE IF NOT EXISTS {} (\n{}\n);",
        quote_ident(table_name),
        column_defs.join(",\n")
    )
}

/// A multi-row INSERT covering `rows` of a batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InsertStatement {
    pub sql: String,
    pub rows: Range<usize>,
}

/// Build `INSERT INTO table (cols) VALUES ($1, $2), ($3, $4), ...` statements
/// for `row_count` rows, splitting so no statement binds more than
/// `max_params` values.
pub fn insert_statements(
    table_name: &str,
    columns: &[String],
    row_count: usize,
    max_params: usize,
) -> Vec<InsertStatement> {
    if row_count == 0 || columns.is_empty() {
        return Vec::new();
    }

    let rows_per_statement = (max_params / columns.len()).max(1);
    let table_spec = quote_ident(table_name);
    let column_list = columns
        .iter()
        .map(|c| quote_ident(c))
        .collect::<Vec<_>>()
        .join(", ");

    let mut statements = Vec::new();
    let mut start = 0;

    while start < row_count {
        let end = (start + rows_per_statement).min(row_count);

        let mut param_idx = 1;
        let value_groups: Vec<String> = (start..end)
            .map(|_| {
                let placeholders: Vec<String> = (0..columns.len())
                    .map(|_| {
                        let placeholder = format!("${}", param_idx);
                        param_idx += 1;
                        placeholder
                    })
                    .collect();
                format!("({})", placeholders.join(", "))
            })
            .collect();

        statements.push(InsertStatement {
            sql: format!(
                "INSERT INTO {} ({}) VALUES {}",
                table_spec,
                column_list,
                value_groups.join(", ")
            ),
            rows: start..end,
        });

        start = end;
    }

    statements
}

/// Convert Postgres-style placeholders ($1, $2, ...) to SQLite-style (?, ?, ...)
#[cfg(test)]
pub fn convert_to_sqlite_placeholders(sql: &str) -> String {
    let mut result = String::new();
    let mut chars = sql.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' {
            // Skip the dollar sign and any following digits
            while chars.peek().is_some_and(|c| c.is_ascii_digit()) {
                chars.next();
            }
            result.push('?');
        } else {
            result.push(ch);
        }
    }

    result
}
