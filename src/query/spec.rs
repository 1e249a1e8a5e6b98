//! Immutable query specification: predicates, ordering, projection, window.
//! Backends interpret a `Spec`; nothing here performs I/O.

use crate::error::AppError;
use crate::model::{ColumnInfo, EntitySchema};
use serde_json::Value;
use std::ops::{Bound, RangeBounds};
use std::str::FromStr;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Op {
    Eq,
    Ne,
    Lt,
    Lte,
    Gt,
    Gte,
}

impl Op {
    pub fn sql(self) -> &'static str {
        match self {
            Op::Eq => "=",
            Op::Ne => "<>",
            Op::Lt => "<",
            Op::Lte => "<=",
            Op::Gt => ">",
            Op::Gte => ">=",
        }
    }

    pub fn is_ordering(self) -> bool {
        !matches!(self, Op::Eq | Op::Ne)
    }
}

impl FromStr for Op {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "eq" => Op::Eq,
            "ne" => Op::Ne,
            "lt" => Op::Lt,
            "lte" => Op::Lte,
            "gt" => Op::Gt,
            "gte" => Op::Gte,
            other => return Err(AppError::BadRequest(format!("unknown operator '{}'", other))),
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Logic {
    And,
    Or,
}

impl Logic {
    pub fn sql(self) -> &'static str {
        match self {
            Logic::And => " AND ",
            Logic::Or => " OR ",
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Filter {
    pub field: String,
    pub op: Op,
    pub value: Value,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Predicate {
    Filter(Filter),
    /// Items combine with `logic`; the group itself is conjoined with its enclosing scope.
    Group { logic: Logic, items: Vec<Predicate> },
}

/// Sub-scope handed to `Query::group`.
#[derive(Clone, Debug)]
pub struct Group {
    logic: Logic,
    items: Vec<Predicate>,
}

impl Group {
    pub(crate) fn new(logic: Logic) -> Self {
        Group {
            logic,
            items: Vec::new(),
        }
    }

    pub fn filter(mut self, field: impl Into<String>, op: Op, value: impl Into<Value>) -> Self {
        self.items.push(Predicate::Filter(Filter {
            field: field.into(),
            op,
            value: value.into(),
        }));
        self
    }

    pub fn group(mut self, logic: Logic, build: impl FnOnce(Group) -> Group) -> Self {
        self.items.push(build(Group::new(logic)).into_predicate());
        self
    }

    pub(crate) fn into_predicate(self) -> Predicate {
        Predicate::Group {
            logic: self.logic,
            items: self.items,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Direction {
    #[default]
    Asc,
    Desc,
}

impl Direction {
    pub fn sql(self) -> &'static str {
        match self {
            Direction::Asc => "ASC",
            Direction::Desc => "DESC",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SortKey {
    pub field: String,
    pub direction: Direction,
}

/// Half-open window over result positions: `offset..offset + limit`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct Window {
    pub offset: u64,
    pub limit: Option<u64>,
}

impl Window {
    pub fn from_bounds(range: impl RangeBounds<u64>) -> Self {
        let offset = match range.start_bound() {
            Bound::Included(&n) => n,
            Bound::Excluded(&n) => n.saturating_add(1),
            Bound::Unbounded => 0,
        };
        let limit = match range.end_bound() {
            Bound::Included(&n) => Some(n.saturating_add(1).saturating_sub(offset)),
            Bound::Excluded(&n) => Some(n.saturating_sub(offset)),
            Bound::Unbounded => None,
        };
        Window { offset, limit }
    }

    /// A window nested inside this one, positions relative to this window's start.
    pub fn narrow(self, offset: u64, limit: u64) -> Self {
        let start = self.offset.saturating_add(offset);
        let available = match self.limit {
            Some(l) => l.saturating_sub(offset),
            None => u64::MAX,
        };
        Window {
            offset: start,
            limit: Some(limit.min(available)),
        }
    }

    pub fn slice<T>(&self, items: Vec<T>) -> Vec<T> {
        let skip = usize::try_from(self.offset).unwrap_or(usize::MAX);
        let take = self
            .limit
            .map(|l| usize::try_from(l).unwrap_or(usize::MAX))
            .unwrap_or(usize::MAX);
        items.into_iter().skip(skip).take(take).collect()
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Spec {
    /// Top-level predicates, conjoined.
    pub predicates: Vec<Predicate>,
    pub sorts: Vec<SortKey>,
    pub fields: Option<Vec<String>>,
    pub unique: bool,
    pub window: Option<Window>,
}

impl Spec {
    /// Columns a read returns, in output order.
    pub fn selected_columns(&self, schema: &EntitySchema) -> Vec<&'static str> {
        match &self.fields {
            Some(fields) => schema
                .column_names()
                .filter(|c| fields.iter().any(|f| f == c))
                .collect(),
            None => schema.column_names().collect(),
        }
    }

    /// Ordering actually applied: requested keys, then tie-breakers so the order is total.
    pub fn effective_sorts(&self, schema: &EntitySchema) -> Vec<SortKey> {
        let mut keys = self.sorts.clone();
        let tie_breakers: Vec<&'static str> = if self.unique {
            self.selected_columns(schema)
        } else {
            vec![schema.pk_column]
        };
        for col in tie_breakers {
            if !keys.iter().any(|k| k.field == col) {
                keys.push(SortKey {
                    field: col.to_string(),
                    direction: Direction::Asc,
                });
            }
        }
        keys
    }

    /// Rejects field names the schema does not know and comparisons the store cannot evaluate.
    pub fn check(&self, schema: &EntitySchema) -> Result<(), AppError> {
        for p in &self.predicates {
            check_predicate(schema, p)?;
        }
        let selected = self.selected_columns(schema);
        if let Some(fields) = &self.fields {
            if fields.is_empty() {
                return Err(AppError::BadRequest("projection needs at least one field".into()));
            }
            for f in fields {
                column(schema, f)?;
            }
        }
        for key in &self.sorts {
            let col = column(schema, &key.field)?;
            if col.pg_type == "jsonb" {
                return Err(AppError::BadRequest(format!("cannot sort by '{}'", key.field)));
            }
            if self.unique && !selected.contains(&col.name) {
                return Err(AppError::BadRequest(format!(
                    "sort field '{}' must be part of the unique projection",
                    key.field
                )));
            }
        }
        Ok(())
    }
}

fn check_predicate(schema: &EntitySchema, p: &Predicate) -> Result<(), AppError> {
    match p {
        Predicate::Filter(f) => {
            let col = column(schema, &f.field)?;
            if f.value.is_null() {
                if f.op.is_ordering() {
                    return Err(AppError::BadRequest(format!("'{}' cannot be ordered against null", f.field)));
                }
                return Ok(());
            }
            if f.op.is_ordering() && col.pg_type == "jsonb" {
                return Err(AppError::BadRequest(format!("'{}' supports only eq and ne", f.field)));
            }
            check_value(col, &f.value)
        }
        Predicate::Group { items, .. } => {
            for item in items {
                check_predicate(schema, item)?;
            }
            Ok(())
        }
    }
}

pub fn column<'s>(schema: &'s EntitySchema, name: &str) -> Result<&'s ColumnInfo, AppError> {
    schema
        .column(name)
        .ok_or_else(|| AppError::BadRequest(format!("unknown field '{}' on {}", name, schema.table_name)))
}

/// Checks that a JSON value fits the column's type. Null is accepted here; nullability is the store's concern.
pub fn check_value(col: &ColumnInfo, v: &Value) -> Result<(), AppError> {
    let ok = match (col.pg_type, v) {
        (_, Value::Null) => true,
        ("jsonb", _) => true,
        ("int8", Value::Number(n)) => n.is_i64(),
        ("float8", Value::Number(_)) => true,
        ("bool", Value::Bool(_)) => true,
        ("uuid", Value::String(s)) => uuid::Uuid::parse_str(s).is_ok(),
        ("text", Value::String(_)) => true,
        _ => false,
    };
    if !ok {
        return Err(AppError::BadRequest(format!(
            "'{}' expects a {} value, got {}",
            col.name, col.pg_type, v
        )));
    }
    match col.shape {
        Some(shape) if !v.is_null() => {
            shape(v).map_err(|e| AppError::BadRequest(format!("'{}' has the wrong shape: {}", col.name, e)))
        }
        _ => Ok(()),
    }
}
