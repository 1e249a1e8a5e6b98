//! Record handlers shared by every kind: create, paginate, all, first, filter, group, count, chunk, update, delete.
//! Query-string keys that name a column become filters (`field=value` or `field=op:value`);
//! other keys are either reserved (`sort`, `fields`, `unique`, `range`, `page`, `per`, `max`) or ignored.

use crate::error::{expect_matched, AppError};
use crate::model::{EntitySchema, Record};
use crate::query::{self, ChunkSummary, Direction, Filter, Logic, Op, PageRequest, Query, SortKey, Window};
use crate::response::{simple_ok, success_many, success_one, success_one_ok, SuccessOne};
use crate::service::RequestValidator;
use crate::state::AppState;
use axum::{
    extract::{Query as QueryString, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const DEFAULT_CHUNK: usize = 100;
pub const MAX_CHUNK: usize = 1000;

/// Parsed query string for record reads and bulk writes.
#[derive(Debug, Default)]
pub struct RecordParams {
    pub filters: Vec<Filter>,
    pub sorts: Vec<SortKey>,
    pub fields: Option<Vec<String>>,
    pub unique: bool,
    pub range: Option<Window>,
    pub page: PageRequest,
    pub max: Option<usize>,
}

impl RecordParams {
    pub fn parse(schema: &EntitySchema, params: Vec<(String, String)>) -> Result<Self, AppError> {
        let mut out = RecordParams::default();
        for (k, v) in params {
            match k.as_str() {
                "sort" => out.sorts.extend(parse_sorts(&v)?),
                "fields" => {
                    out.fields = Some(
                        v.split(',')
                            .map(str::trim)
                            .filter(|f| !f.is_empty())
                            .map(String::from)
                            .collect(),
                    )
                }
                "unique" => out.unique = parse_flag(&v)?,
                "range" => out.range = Some(parse_range(&v)?),
                "page" => out.page.page = parse_number("page", &v)?,
                "per" => out.page.per = parse_number("per", &v)?,
                "max" => out.max = Some(parse_number("max", &v)?),
                _ => {
                    if let Some(col) = schema.column(&k) {
                        let (op, raw) = split_op(&v)?;
                        let value = query_value_for_column(col.pg_type, col.nullable, raw);
                        out.filters.push(Filter { field: k, op, value });
                    }
                }
            }
        }
        Ok(out)
    }

    /// Filters conjoined at the top level, followed by sorts, projection, unique and range.
    pub fn query<R: Record>(&self) -> Query<R> {
        let q = self
            .filters
            .iter()
            .fold(Query::new(), |q, f| q.filter(f.field.clone(), f.op, f.value.clone()));
        self.shape(q)
    }

    /// Filters combined into one OR group.
    pub fn any_query<R: Record>(&self) -> Query<R> {
        let q = Query::new().group(Logic::Or, |g| {
            self.filters
                .iter()
                .fold(g, |g, f| g.filter(f.field.clone(), f.op, f.value.clone()))
        });
        self.shape(q)
    }

    fn shape<R: Record>(&self, q: Query<R>) -> Query<R> {
        let mut q = self
            .sorts
            .iter()
            .fold(q, |q, s| q.sort(s.field.clone(), s.direction));
        if let Some(fields) = &self.fields {
            q = q.project(fields.iter().cloned());
        }
        if self.unique {
            q = q.unique();
        }
        match self.range {
            Some(Window { offset, limit: Some(n) }) => q.range(offset..offset.saturating_add(n)),
            Some(Window { offset, limit: None }) => q.range(offset..),
            None => q,
        }
    }

    fn require_filter(&self, what: &str) -> Result<(), AppError> {
        if self.filters.is_empty() {
            return Err(AppError::BadRequest(format!("{} requires at least one filter", what)));
        }
        Ok(())
    }
}

fn split_op(v: &str) -> Result<(Op, &str), AppError> {
    match v.split_once(':') {
        Some((op, rest)) if matches!(op, "eq" | "ne" | "lt" | "lte" | "gt" | "gte") => Ok((op.parse()?, rest)),
        _ => Ok((Op::Eq, v)),
    }
}

fn parse_sorts(v: &str) -> Result<Vec<SortKey>, AppError> {
    v.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            let (field, direction) = match s.split_once(':') {
                None => (s, Direction::Asc),
                Some((f, d)) if d.eq_ignore_ascii_case("asc") => (f, Direction::Asc),
                Some((f, d)) if d.eq_ignore_ascii_case("desc") => (f, Direction::Desc),
                Some((_, d)) => return Err(AppError::BadRequest(format!("unknown sort direction '{}'", d))),
            };
            Ok(SortKey {
                field: field.to_string(),
                direction,
            })
        })
        .collect()
}

/// `lo..hi`, `..hi` or `lo..`; half-open.
fn parse_range(v: &str) -> Result<Window, AppError> {
    let bad = || AppError::BadRequest(format!("invalid range '{}'", v));
    let (lo, hi) = v.split_once("..").ok_or_else(bad)?;
    let lo: u64 = if lo.is_empty() { 0 } else { lo.parse().map_err(|_| bad())? };
    let hi: Option<u64> = if hi.is_empty() { None } else { Some(hi.parse().map_err(|_| bad())?) };
    match hi {
        Some(h) if h < lo => Err(bad()),
        Some(h) => Ok(Window::from_bounds(lo..h)),
        None => Ok(Window::from_bounds(lo..)),
    }
}

fn parse_flag(v: &str) -> Result<bool, AppError> {
    match v {
        "" | "true" | "1" => Ok(true),
        "false" | "0" => Ok(false),
        _ => Err(AppError::BadRequest(format!("invalid flag '{}'", v))),
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, v: &str) -> Result<T, AppError> {
    v.parse()
        .map_err(|_| AppError::BadRequest(format!("{} must be a non-negative integer", key)))
}

/// Coerces a query-string value to the column's JSON type. Values that don't parse stay
/// strings so the query check reports the mismatch.
fn query_value_for_column(pg_type: &str, nullable: bool, s: &str) -> Value {
    if nullable && s == "null" {
        return Value::Null;
    }
    match pg_type {
        "int8" => s.parse::<i64>().map(Value::from).unwrap_or_else(|_| Value::String(s.into())),
        "float8" => s.parse::<f64>().map(Value::from).unwrap_or_else(|_| Value::String(s.into())),
        "bool" if s.eq_ignore_ascii_case("true") => Value::Bool(true),
        "bool" if s.eq_ignore_ascii_case("false") => Value::Bool(false),
        "jsonb" => serde_json::from_str(s).unwrap_or_else(|_| Value::String(s.into())),
        _ => Value::String(s.to_string()),
    }
}

fn body_to_map(value: Value) -> Result<Map<String, Value>, AppError> {
    match value {
        Value::Object(m) => Ok(m),
        _ => Err(AppError::BadRequest("body must be a JSON object".into())),
    }
}

fn to_values<R: Record>(records: Vec<R>) -> Result<Vec<Value>, AppError> {
    records
        .into_iter()
        .map(|r| serde_json::to_value(r).map_err(AppError::from))
        .collect()
}

pub async fn create<R: Record>(
    State(state): State<AppState>,
    Json(body): Json<Value>,
) -> Result<impl IntoResponse, AppError> {
    let body = body_to_map(body)?;
    RequestValidator::validate(&body, R::schema().validation)?;
    let record: R = serde_json::from_value(Value::Object(body))
        .map_err(|e| AppError::BadRequest(format!("invalid {}: {}", R::schema().table_name, e)))?;
    let mut exec = state.backend.executor();
    let created = query::create(&mut *exec, &record).await?;
    Ok(success_one(created))
}

/// `GET /{kind}`: one page, sorted by name unless a sort is given.
pub async fn index<R: Record>(
    State(state): State<AppState>,
    QueryString(params): QueryString<Vec<(String, String)>>,
) -> Result<impl IntoResponse, AppError> {
    let mut params = RecordParams::parse(R::schema(), params)?;
    if params.sorts.is_empty() {
        params.sorts.push(SortKey {
            field: "name".into(),
            direction: Direction::Asc,
        });
    }
    let mut exec = state.backend.executor();
    let page = params.query::<R>().paginate(&mut *exec, params.page).await?;
    Ok((
        StatusCode::OK,
        Json(SuccessOne {
            data: page.items,
            meta: Some(serde_json::to_value(page.metadata)?),
        }),
    ))
}

/// Typed rows, or projected rows when `fields` or `unique` is given.
pub async fn all<R: Record>(
    State(state): State<AppState>,
    QueryString(params): QueryString<Vec<(String, String)>>,
) -> Result<impl IntoResponse, AppError> {
    let params = RecordParams::parse(R::schema(), params)?;
    list(&state, params.query::<R>(), params.fields.is_some() || params.unique).await
}

pub async fn first<R: Record>(
    State(state): State<AppState>,
    QueryString(params): QueryString<Vec<(String, String)>>,
) -> Result<impl IntoResponse, AppError> {
    let params = RecordParams::parse(R::schema(), params)?;
    let mut exec = state.backend.executor();
    match params.query::<R>().first(&mut *exec).await? {
        Some(record) => Ok(success_one_ok(record)),
        None => Err(AppError::NotFound(format!("no matching {}", R::schema().table_name))),
    }
}

/// Every given filter must hold.
pub async fn filter<R: Record>(
    State(state): State<AppState>,
    QueryString(params): QueryString<Vec<(String, String)>>,
) -> Result<impl IntoResponse, AppError> {
    let params = RecordParams::parse(R::schema(), params)?;
    list(&state, params.query::<R>(), false).await
}

/// Any given filter may hold.
pub async fn group<R: Record>(
    State(state): State<AppState>,
    QueryString(params): QueryString<Vec<(String, String)>>,
) -> Result<impl IntoResponse, AppError> {
    let params = RecordParams::parse(R::schema(), params)?;
    params.require_filter("group")?;
    list(&state, params.any_query::<R>(), false).await
}

async fn list<R: Record>(state: &AppState, q: Query<R>, projected: bool) -> Result<Response, AppError> {
    let mut exec = state.backend.executor();
    let rows = if projected {
        q.values(&mut *exec).await?
    } else {
        to_values(q.all(&mut *exec).await?)?
    };
    Ok(success_many(rows).into_response())
}

#[derive(Serialize)]
struct CountBody {
    count: u64,
}

pub async fn count<R: Record>(
    State(state): State<AppState>,
    QueryString(params): QueryString<Vec<(String, String)>>,
) -> Result<impl IntoResponse, AppError> {
    let params = RecordParams::parse(R::schema(), params)?;
    let mut exec = state.backend.executor();
    let count = params.query::<R>().count(&mut *exec).await?;
    Ok(success_one_ok(CountBody { count }))
}

#[derive(Serialize)]
pub struct ChunkBody<R> {
    pub records: Vec<R>,
    /// One message per row that failed to decode.
    pub failures: Vec<String>,
    pub summary: ChunkSummary,
}

pub async fn chunk<R: Record>(
    State(state): State<AppState>,
    QueryString(params): QueryString<Vec<(String, String)>>,
) -> Result<impl IntoResponse, AppError> {
    let params = RecordParams::parse(R::schema(), params)?;
    let max = params.max.unwrap_or(DEFAULT_CHUNK);
    if max == 0 || max > MAX_CHUNK {
        return Err(AppError::BadRequest(format!("max must be between 1 and {}", MAX_CHUNK)));
    }
    let mut records = Vec::new();
    let mut failures = Vec::new();
    let mut exec = state.backend.executor();
    let summary = params
        .query::<R>()
        .chunk(&mut *exec, max, |batch| {
            for item in batch {
                match item {
                    Ok(r) => records.push(r),
                    Err(e) => failures.push(e.to_string()),
                }
            }
        })
        .await?;
    Ok(success_one_ok(ChunkBody {
        records,
        failures,
        summary,
    }))
}

#[derive(Deserialize)]
pub struct UpdateBody {
    pub field: String,
    pub value: Value,
}

/// `PATCH /{kind}?<filters>` with `{field, value}`: sets one field on every match.
pub async fn update<R: Record>(
    State(state): State<AppState>,
    QueryString(params): QueryString<Vec<(String, String)>>,
    Json(body): Json<UpdateBody>,
) -> Result<impl IntoResponse, AppError> {
    let params = RecordParams::parse(R::schema(), params)?;
    params.require_filter("update")?;
    let mut changed = Map::new();
    changed.insert(body.field.clone(), body.value.clone());
    RequestValidator::validate_partial(&changed, R::schema().validation)?;
    let mut exec = state.backend.executor();
    let affected = params.query::<R>().update(&mut *exec, &body.field, body.value).await?;
    let affected = expect_matched(affected, &format!("no matching {}", R::schema().table_name))?;
    Ok(simple_ok(format!("updated {}", R::schema().table_name), Some(affected)))
}

pub async fn delete<R: Record>(
    State(state): State<AppState>,
    QueryString(params): QueryString<Vec<(String, String)>>,
) -> Result<impl IntoResponse, AppError> {
    let params = RecordParams::parse(R::schema(), params)?;
    params.require_filter("delete")?;
    let mut exec = state.backend.executor();
    let affected = params.query::<R>().delete(&mut *exec).await?;
    let affected = expect_matched(affected, &format!("no matching {}", R::schema().table_name))?;
    Ok(simple_ok(format!("deleted from {}", R::schema().table_name), Some(affected)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Galaxy, Planet};
    use crate::query::Predicate;
    use serde_json::json;

    fn pairs(items: &[(&str, &str)]) -> Vec<(String, String)> {
        items.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn column_keys_become_typed_filters() {
        let p = RecordParams::parse(
            Galaxy::schema(),
            pairs(&[("name", "Milky Way"), ("age", "gte:10"), ("distance", "null"), ("colour", "red")]),
        )
        .unwrap();
        assert_eq!(
            p.filters,
            vec![
                Filter { field: "name".into(), op: Op::Eq, value: json!("Milky Way") },
                Filter { field: "age".into(), op: Op::Gte, value: json!(10) },
                Filter { field: "distance".into(), op: Op::Eq, value: Value::Null },
            ]
        );
    }

    #[test]
    fn colon_without_known_operator_is_part_of_the_value() {
        let p = RecordParams::parse(Galaxy::schema(), pairs(&[("name", "M:31")])).unwrap();
        assert_eq!(p.filters[0].value, json!("M:31"));
        assert_eq!(p.filters[0].op, Op::Eq);
    }

    #[test]
    fn jsonb_values_parse_as_json() {
        let p = RecordParams::parse(Planet::schema(), pairs(&[("type", r#"{"name":"gas giant"}"#)])).unwrap();
        assert_eq!(p.filters[0].value, json!({"name": "gas giant"}));
    }

    #[test]
    fn reserved_keys_shape_the_query() {
        let p = RecordParams::parse(
            Galaxy::schema(),
            pairs(&[
                ("sort", "age:desc,name"),
                ("fields", "name, age"),
                ("unique", ""),
                ("range", "2..5"),
                ("page", "3"),
                ("per", "20"),
                ("max", "7"),
            ]),
        )
        .unwrap();
        assert_eq!(
            p.sorts,
            vec![
                SortKey { field: "age".into(), direction: Direction::Desc },
                SortKey { field: "name".into(), direction: Direction::Asc },
            ]
        );
        assert_eq!(p.fields, Some(vec!["name".to_string(), "age".to_string()]));
        assert!(p.unique);
        assert_eq!(p.range, Some(Window { offset: 2, limit: Some(3) }));
        assert_eq!(p.page, PageRequest::new(3, 20));
        assert_eq!(p.max, Some(7));
    }

    #[test]
    fn open_ranges_parse() {
        assert_eq!(parse_range("..4").unwrap(), Window { offset: 0, limit: Some(4) });
        assert_eq!(parse_range("3..").unwrap(), Window { offset: 3, limit: None });
        assert!(parse_range("5..2").is_err());
        assert!(parse_range("five").is_err());
    }

    #[test]
    fn bad_sort_direction_is_rejected() {
        assert!(RecordParams::parse(Galaxy::schema(), pairs(&[("sort", "name:sideways")])).is_err());
    }

    #[test]
    fn any_query_wraps_filters_in_one_or_group() {
        let p = RecordParams::parse(Galaxy::schema(), pairs(&[("name", "A"), ("name", "B")])).unwrap();
        let q = p.any_query::<Galaxy>();
        match q.spec().predicates.as_slice() {
            [Predicate::Group { logic: Logic::Or, items }] => assert_eq!(items.len(), 2),
            other => panic!("unexpected predicates {:?}", other),
        }
    }
}
