//! In-process backend over JSON rows. Evaluates specs directly; used for tests and
//! for running the service without a database.
//!
//! A transaction holds the table lock for its whole lifetime, so its writes are never
//! visible to other executors before commit. Rollback (or drop) restores the snapshot
//! taken at `begin`.

use super::{finished, Backend, Executor, Transaction};
use crate::error::AppError;
use crate::model::EntitySchema;
use crate::query::{check_value, column, Direction, Logic, Op, Predicate, Spec};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

type Row = Map<String, Value>;

#[derive(Clone, Debug, Default)]
struct Tables {
    rows: HashMap<&'static str, Vec<Row>>,
}

#[derive(Clone, Default)]
pub struct MemoryBackend {
    tables: Arc<Mutex<Tables>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    fn kind(&self) -> &'static str {
        "memory"
    }

    fn executor(&self) -> Box<dyn Executor> {
        Box::new(MemoryExecutor {
            tables: Arc::clone(&self.tables),
        })
    }

    async fn begin(&self) -> Result<Box<dyn Transaction>, AppError> {
        let guard = Arc::clone(&self.tables).lock_owned().await;
        let snapshot = guard.clone();
        Ok(Box::new(MemoryTransaction {
            guard: Some(guard),
            snapshot: Some(snapshot),
        }))
    }

    async fn ping(&self) -> Result<(), AppError> {
        Ok(())
    }
}

struct MemoryExecutor {
    tables: Arc<Mutex<Tables>>,
}

#[async_trait]
impl Executor for MemoryExecutor {
    async fn select(&mut self, schema: &'static EntitySchema, spec: &Spec) -> Result<Vec<Value>, AppError> {
        let tables = self.tables.lock().await;
        select(&tables, schema, spec)
    }

    async fn count(&mut self, schema: &'static EntitySchema, spec: &Spec) -> Result<u64, AppError> {
        let tables = self.tables.lock().await;
        Ok(select(&tables, schema, spec)?.len() as u64)
    }

    async fn insert(&mut self, schema: &'static EntitySchema, row: &Map<String, Value>) -> Result<Value, AppError> {
        let mut tables = self.tables.lock().await;
        insert(&mut tables, schema, row)
    }

    async fn update(
        &mut self,
        schema: &'static EntitySchema,
        spec: &Spec,
        field: &str,
        value: &Value,
    ) -> Result<u64, AppError> {
        let mut tables = self.tables.lock().await;
        update(&mut tables, schema, spec, field, value)
    }

    async fn delete(&mut self, schema: &'static EntitySchema, spec: &Spec) -> Result<u64, AppError> {
        let mut tables = self.tables.lock().await;
        delete(&mut tables, schema, spec)
    }
}

struct MemoryTransaction {
    guard: Option<OwnedMutexGuard<Tables>>,
    snapshot: Option<Tables>,
}

impl MemoryTransaction {
    fn tables(&mut self) -> Result<&mut Tables, AppError> {
        self.guard.as_deref_mut().ok_or_else(finished)
    }
}

impl Drop for MemoryTransaction {
    fn drop(&mut self) {
        if let (Some(guard), Some(snapshot)) = (self.guard.as_mut(), self.snapshot.take()) {
            tracing::debug!("uncommitted memory transaction dropped; restoring snapshot");
            **guard = snapshot;
        }
    }
}

#[async_trait]
impl Executor for MemoryTransaction {
    async fn select(&mut self, schema: &'static EntitySchema, spec: &Spec) -> Result<Vec<Value>, AppError> {
        select(self.tables()?, schema, spec)
    }

    async fn count(&mut self, schema: &'static EntitySchema, spec: &Spec) -> Result<u64, AppError> {
        Ok(select(self.tables()?, schema, spec)?.len() as u64)
    }

    async fn insert(&mut self, schema: &'static EntitySchema, row: &Map<String, Value>) -> Result<Value, AppError> {
        insert(self.tables()?, schema, row)
    }

    async fn update(
        &mut self,
        schema: &'static EntitySchema,
        spec: &Spec,
        field: &str,
        value: &Value,
    ) -> Result<u64, AppError> {
        update(self.tables()?, schema, spec, field, value)
    }

    async fn delete(&mut self, schema: &'static EntitySchema, spec: &Spec) -> Result<u64, AppError> {
        delete(self.tables()?, schema, spec)
    }
}

#[async_trait]
impl Transaction for MemoryTransaction {
    fn executor(&mut self) -> &mut dyn Executor {
        self
    }

    async fn commit(&mut self) -> Result<(), AppError> {
        let guard = self.guard.take().ok_or_else(finished)?;
        self.snapshot = None;
        drop(guard);
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), AppError> {
        let mut guard = self.guard.take().ok_or_else(finished)?;
        if let Some(snapshot) = self.snapshot.take() {
            *guard = snapshot;
        }
        Ok(())
    }
}

fn select(tables: &Tables, schema: &EntitySchema, spec: &Spec) -> Result<Vec<Value>, AppError> {
    spec.check(schema)?;
    let rows = tables.rows.get(schema.table_name).map(Vec::as_slice).unwrap_or(&[]);
    let mut matched: Vec<&Row> = rows.iter().filter(|r| matches_all(r, &spec.predicates)).collect();

    let keys = sort_keys(schema, spec);
    // Stable sort: rows equal on every key keep insertion order.
    matched.sort_by(|a, b| {
        keys.iter()
            .map(|(field, dir)| {
                let ord = compare_for_sort(a.get(*field), b.get(*field));
                match dir {
                    Direction::Asc => ord,
                    Direction::Desc => ord.reverse(),
                }
            })
            .find(|o| *o != Ordering::Equal)
            .unwrap_or(Ordering::Equal)
    });

    let selected = spec.selected_columns(schema);
    let mut projected: Vec<Row> = matched
        .into_iter()
        .map(|r| {
            selected
                .iter()
                .map(|c| (c.to_string(), r.get(*c).cloned().unwrap_or(Value::Null)))
                .collect()
        })
        .collect();
    if spec.unique {
        // jsonb values have no order, so equal rows need not be adjacent. Keep first occurrences.
        let mut kept: Vec<Row> = Vec::with_capacity(projected.len());
        for row in projected {
            if !kept.contains(&row) {
                kept.push(row);
            }
        }
        projected = kept;
    }
    let out: Vec<Value> = projected.into_iter().map(Value::Object).collect();
    Ok(match spec.window {
        Some(w) => w.slice(out),
        None => out,
    })
}

/// Requested keys, plus the projected columns as tie-breakers for unique reads.
/// Plain reads fall back to insertion order rather than the id.
fn sort_keys<'s>(schema: &EntitySchema, spec: &'s Spec) -> Vec<(&'s str, Direction)> {
    let mut keys: Vec<(&'s str, Direction)> = spec
        .sorts
        .iter()
        .map(|k| (k.field.as_str(), k.direction))
        .collect();
    if spec.unique {
        for col in spec.selected_columns(schema) {
            if !keys.iter().any(|(f, _)| *f == col) {
                keys.push((col, Direction::Asc));
            }
        }
    }
    keys
}

fn insert(tables: &mut Tables, schema: &'static EntitySchema, row: &Map<String, Value>) -> Result<Value, AppError> {
    for key in row.keys() {
        column(schema, key)?;
    }
    let mut stored = Row::new();
    for c in schema.columns {
        let mut val = row.get(c.name).cloned().unwrap_or(Value::Null);
        if val.is_null() && c.has_default {
            val = Value::String(uuid::Uuid::new_v4().to_string());
        }
        check_value(c, &val)?;
        if val.is_null() && !c.nullable {
            return Err(AppError::Conflict(format!(
                "null value in column '{}' of {}",
                c.name, schema.table_name
            )));
        }
        stored.insert(c.name.to_string(), val);
    }
    let table = tables.rows.entry(schema.table_name).or_default();
    if let Some(id) = stored.get(schema.pk_column) {
        if table.iter().any(|r| r.get(schema.pk_column) == Some(id)) {
            return Err(AppError::Conflict(format!("duplicate {} in {}", schema.pk_column, schema.table_name)));
        }
    }
    table.push(stored.clone());
    Ok(Value::Object(stored))
}

fn update(
    tables: &mut Tables,
    schema: &EntitySchema,
    spec: &Spec,
    field: &str,
    value: &Value,
) -> Result<u64, AppError> {
    spec.check(schema)?;
    let col = column(schema, field)?;
    check_value(col, value)?;
    if value.is_null() && !col.nullable {
        return Err(AppError::Conflict(format!("null value in column '{}'", col.name)));
    }
    let mut affected = 0;
    if let Some(rows) = tables.rows.get_mut(schema.table_name) {
        for row in rows.iter_mut().filter(|r| matches_all(r, &spec.predicates)) {
            row.insert(col.name.to_string(), value.clone());
            affected += 1;
        }
    }
    Ok(affected)
}

fn delete(tables: &mut Tables, schema: &EntitySchema, spec: &Spec) -> Result<u64, AppError> {
    spec.check(schema)?;
    let Some(rows) = tables.rows.get_mut(schema.table_name) else {
        return Ok(0);
    };
    let before = rows.len();
    rows.retain(|r| !matches_all(r, &spec.predicates));
    Ok((before - rows.len()) as u64)
}

fn matches_all(row: &Row, predicates: &[Predicate]) -> bool {
    predicates.iter().all(|p| matches(row, p))
}

fn matches(row: &Row, p: &Predicate) -> bool {
    match p {
        Predicate::Filter(f) => {
            let actual = row.get(&f.field).unwrap_or(&Value::Null);
            if f.value.is_null() {
                return match f.op {
                    Op::Ne => !actual.is_null(),
                    _ => actual.is_null(),
                };
            }
            // SQL semantics: comparing against null is never true.
            if actual.is_null() {
                return false;
            }
            match f.op {
                Op::Eq => values_equal(actual, &f.value),
                Op::Ne => !values_equal(actual, &f.value),
                op => match compare_values(actual, &f.value) {
                    Some(ord) => match op {
                        Op::Lt => ord == Ordering::Less,
                        Op::Lte => ord != Ordering::Greater,
                        Op::Gt => ord == Ordering::Greater,
                        _ => ord != Ordering::Less,
                    },
                    None => false,
                },
            }
        }
        Predicate::Group { logic, items } => match logic {
            Logic::And => items.iter().all(|i| matches(row, i)),
            Logic::Or => items.iter().any(|i| matches(row, i)),
        },
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

/// Ordering between two non-null scalars of the same kind.
fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(x), Some(y)) => Some(x.cmp(&y)),
            _ => x.as_f64()?.partial_cmp(&y.as_f64()?),
        },
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

/// Nulls sort as the largest value, like PostgreSQL (last ascending, first descending).
fn compare_for_sort(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    let a = a.filter(|v| !v.is_null());
    let b = b.filter(|v| !v.is_null());
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (Some(x), Some(y)) => compare_values(x, y).unwrap_or(Ordering::Equal),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(v: Value) -> Row {
        match v {
            Value::Object(m) => m,
            _ => unreachable!(),
        }
    }

    #[test]
    fn null_never_compares_true() {
        let r = row(json!({"name": "x", "age": null}));
        let gt = Predicate::Filter(crate::query::Filter {
            field: "age".into(),
            op: Op::Gt,
            value: json!(1),
        });
        let ne = Predicate::Filter(crate::query::Filter {
            field: "age".into(),
            op: Op::Ne,
            value: json!(1),
        });
        assert!(!matches(&r, &gt));
        assert!(!matches(&r, &ne));
    }

    #[test]
    fn nulls_sort_last_ascending() {
        assert_eq!(compare_for_sort(Some(&Value::Null), Some(&json!(3))), Ordering::Greater);
        assert_eq!(compare_for_sort(Some(&json!(2)), Some(&json!(3))), Ordering::Less);
        assert_eq!(compare_for_sort(None, Some(&Value::Null)), Ordering::Equal);
    }

    #[test]
    fn integer_and_float_equality() {
        assert!(values_equal(&json!(3), &json!(3.0)));
        assert_eq!(compare_values(&json!(2), &json!(2.5)), Some(Ordering::Less));
    }
}
