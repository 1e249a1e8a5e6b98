//! Builds parameterized SELECT, COUNT, INSERT, UPDATE, DELETE from an entity schema and a query spec.

use crate::error::AppError;
use crate::model::{ColumnInfo, EntitySchema};
use crate::query::{column, Logic, Op, Predicate, Spec};
use serde_json::{Map, Value};

/// Quote identifier for PostgreSQL (safe: only from the static schema).
fn quoted(s: &str) -> String {
    format!("\"{}\"", s.replace('"', "\"\""))
}

#[derive(Debug)]
pub struct QueryBuf {
    pub sql: String,
    pub params: Vec<Value>,
}

impl QueryBuf {
    fn new() -> Self {
        QueryBuf {
            sql: String::new(),
            params: Vec::new(),
        }
    }

    /// Pushes a bound value and returns its placeholder with the column's cast, e.g. `$2::int8`.
    fn push_param(&mut self, col: &ColumnInfo, v: Value) -> String {
        // jsonb parses its text form, so scalars must arrive JSON-encoded.
        let v = match (col.pg_type, v) {
            ("jsonb", v) if !v.is_null() => Value::String(v.to_string()),
            (_, v) => v,
        };
        self.params.push(v);
        format!("${}::{}", self.params.len(), col.pg_type)
    }
}

/// PostgreSQL reads LIMIT and OFFSET as bigint.
const MAX_ROWS: u64 = i64::MAX as u64;

fn column_list<'a>(cols: impl IntoIterator<Item = &'a str>) -> String {
    cols.into_iter().map(quoted).collect::<Vec<_>>().join(", ")
}

fn predicate_sql(q: &mut QueryBuf, schema: &EntitySchema, p: &Predicate) -> Result<String, AppError> {
    match p {
        Predicate::Filter(f) => {
            let col = column(schema, &f.field)?;
            let lhs = quoted(col.name);
            if f.value.is_null() {
                return Ok(match f.op {
                    Op::Ne => format!("{} IS NOT NULL", lhs),
                    _ => format!("{} IS NULL", lhs),
                });
            }
            let ph = q.push_param(col, f.value.clone());
            Ok(format!("{} {} {}", lhs, f.op.sql(), ph))
        }
        Predicate::Group { logic, items } => {
            if items.is_empty() {
                return Ok(match logic {
                    Logic::And => "TRUE".to_string(),
                    Logic::Or => "FALSE".to_string(),
                });
            }
            let parts = items
                .iter()
                .map(|item| predicate_sql(q, schema, item))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(format!("({})", parts.join(logic.sql())))
        }
    }
}

fn where_clause(q: &mut QueryBuf, schema: &EntitySchema, spec: &Spec) -> Result<String, AppError> {
    let parts = spec
        .predicates
        .iter()
        .map(|p| predicate_sql(q, schema, p))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(if parts.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", parts.join(" AND "))
    })
}

fn select_into(q: &mut QueryBuf, schema: &EntitySchema, spec: &Spec) -> Result<String, AppError> {
    spec.check(schema)?;
    let cols = column_list(spec.selected_columns(schema));
    let distinct = if spec.unique { "DISTINCT " } else { "" };
    let where_clause = where_clause(q, schema, spec)?;
    let order_clause = format!(
        " ORDER BY {}",
        spec.effective_sorts(schema)
            .iter()
            .map(|k| format!("{} {}", quoted(&k.field), k.direction.sql()))
            .collect::<Vec<_>>()
            .join(", ")
    );
    let (limit_clause, offset_clause) = match spec.window {
        Some(w) => (
            w.limit.map(|n| format!(" LIMIT {}", n.min(MAX_ROWS))).unwrap_or_default(),
            if w.offset > 0 { format!(" OFFSET {}", w.offset.min(MAX_ROWS)) } else { String::new() },
        ),
        None => (String::new(), String::new()),
    };
    Ok(format!(
        "SELECT {}{} FROM {}{}{}{}{}",
        distinct,
        cols,
        quoted(schema.table_name),
        where_clause,
        order_clause,
        limit_clause,
        offset_clause
    ))
}

/// SELECT with filters, ORDER BY requested keys plus tie-breakers, optional LIMIT/OFFSET.
pub fn select(schema: &EntitySchema, spec: &Spec) -> Result<QueryBuf, AppError> {
    let mut q = QueryBuf::new();
    let sql = select_into(&mut q, schema, spec)?;
    q.sql = sql;
    Ok(q)
}

/// COUNT over the same result set `select` produces, so unique and range are honoured.
pub fn count(schema: &EntitySchema, spec: &Spec) -> Result<QueryBuf, AppError> {
    let mut q = QueryBuf::new();
    let inner = select_into(&mut q, schema, spec)?;
    q.sql = format!("SELECT COUNT(*) AS \"count\" FROM ({}) AS counted", inner);
    Ok(q)
}

/// INSERT: columns present in `row`. Columns with a store default are omitted when absent or null.
pub fn insert(schema: &EntitySchema, row: &Map<String, Value>) -> Result<QueryBuf, AppError> {
    let mut q = QueryBuf::new();
    for key in row.keys() {
        column(schema, key)?;
    }
    let mut cols = Vec::new();
    let mut placeholders = Vec::new();
    for c in schema.columns {
        let val = row.get(c.name).cloned().unwrap_or(Value::Null);
        if val.is_null() && c.has_default {
            continue;
        }
        crate::query::check_value(c, &val)?;
        placeholders.push(q.push_param(c, val));
        cols.push(quoted(c.name));
    }
    let returning = column_list(schema.column_names());
    q.sql = if cols.is_empty() {
        format!("INSERT INTO {} DEFAULT VALUES RETURNING {}", quoted(schema.table_name), returning)
    } else {
        format!(
            "INSERT INTO {} ({}) VALUES ({}) RETURNING {}",
            quoted(schema.table_name),
            cols.join(", "),
            placeholders.join(", "),
            returning
        )
    };
    Ok(q)
}

/// UPDATE every row matching the spec's predicates. Sort, projection and window do not apply.
pub fn update(schema: &EntitySchema, spec: &Spec, field: &str, value: &Value) -> Result<QueryBuf, AppError> {
    spec.check(schema)?;
    let mut q = QueryBuf::new();
    let where_clause = where_clause(&mut q, schema, spec)?;
    let col = column(schema, field)?;
    let rhs = q.push_param(col, value.clone());
    q.sql = format!(
        "UPDATE {} SET {} = {}{}",
        quoted(schema.table_name),
        quoted(col.name),
        rhs,
        where_clause
    );
    Ok(q)
}

/// DELETE every row matching the spec's predicates.
pub fn delete(schema: &EntitySchema, spec: &Spec) -> Result<QueryBuf, AppError> {
    spec.check(schema)?;
    let mut q = QueryBuf::new();
    let where_clause = where_clause(&mut q, schema, spec)?;
    q.sql = format!("DELETE FROM {}{}", quoted(schema.table_name), where_clause);
    Ok(q)
}

/// CREATE TABLE IF NOT EXISTS for a record table; a uuid primary key defaults to `gen_random_uuid()`.
pub fn create_table(schema: &EntitySchema) -> String {
    let defs: Vec<String> = schema
        .columns
        .iter()
        .map(|c| {
            let mut def = format!("{} {}", quoted(c.name), c.pg_type.to_uppercase());
            if c.name == schema.pk_column {
                def.push_str(" PRIMARY KEY");
                if c.has_default && c.pg_type == "uuid" {
                    def.push_str(" DEFAULT gen_random_uuid()");
                }
            } else if !c.nullable {
                def.push_str(" NOT NULL");
            }
            def
        })
        .collect();
    format!(
        "CREATE TABLE IF NOT EXISTS {} ({})",
        quoted(schema.table_name),
        defs.join(", ")
    )
}
