//! Typed query builder. Builder steps are pure and return a new `Query`;
//! terminal operations take an explicit executor and are the only code that touches the store.

mod page;
mod spec;

pub use page::{ChunkSummary, Page, PageMetadata, PageRequest};
pub use spec::{check_value, column, Direction, Filter, Group, Logic, Op, Predicate, SortKey, Spec, Window};

use crate::error::AppError;
use crate::model::Record;
use crate::store::Executor;
use serde_json::Value;
use std::marker::PhantomData;
use std::ops::RangeBounds;

pub struct Query<R> {
    spec: Spec,
    _record: PhantomData<fn() -> R>,
}

impl<R> Clone for Query<R> {
    fn clone(&self) -> Self {
        Query {
            spec: self.spec.clone(),
            _record: PhantomData,
        }
    }
}

impl<R> std::fmt::Debug for Query<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Query").field("spec", &self.spec).finish()
    }
}

impl<R: Record> Default for Query<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: Record> Query<R> {
    pub fn new() -> Self {
        Query {
            spec: Spec::default(),
            _record: PhantomData,
        }
    }

    pub fn spec(&self) -> &Spec {
        &self.spec
    }

    pub fn filter(mut self, field: impl Into<String>, op: Op, value: impl Into<Value>) -> Self {
        self.spec.predicates.push(Predicate::Filter(Filter {
            field: field.into(),
            op,
            value: value.into(),
        }));
        self
    }

    pub fn group(mut self, logic: Logic, build: impl FnOnce(Group) -> Group) -> Self {
        self.spec.predicates.push(build(Group::new(logic)).into_predicate());
        self
    }

    pub fn sort(mut self, field: impl Into<String>, direction: Direction) -> Self {
        self.spec.sorts.push(SortKey {
            field: field.into(),
            direction,
        });
        self
    }

    pub fn project<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.spec.fields = Some(fields.into_iter().map(Into::into).collect());
        self
    }

    pub fn unique(mut self) -> Self {
        self.spec.unique = true;
        self
    }

    /// Keeps only result positions inside `range` (0-based, over the sorted result).
    pub fn range(mut self, range: impl RangeBounds<u64>) -> Self {
        self.spec.window = Some(Window::from_bounds(range));
        self
    }

    fn with_window(&self, window: Window) -> Spec {
        Spec {
            window: Some(window),
            ..self.spec.clone()
        }
    }

    fn typed_spec(&self) -> Result<&Spec, AppError> {
        if self.spec.fields.is_some() {
            return Err(AppError::BadRequest(
                "projected queries return partial rows; use values()".into(),
            ));
        }
        Ok(&self.spec)
    }

    pub async fn all(&self, exec: &mut dyn Executor) -> Result<Vec<R>, AppError> {
        let spec = self.typed_spec()?;
        let rows = exec.select(R::schema(), spec).await?;
        rows.into_iter().map(decode).collect()
    }

    /// `None` when nothing matches.
    pub async fn first(&self, exec: &mut dyn Executor) -> Result<Option<R>, AppError> {
        self.typed_spec()?;
        let window = self.spec.window.unwrap_or_default().narrow(0, 1);
        let rows = exec.select(R::schema(), &self.with_window(window)).await?;
        rows.into_iter().next().map(decode).transpose()
    }

    /// Untyped rows restricted to the projection, if any.
    pub async fn values(&self, exec: &mut dyn Executor) -> Result<Vec<Value>, AppError> {
        exec.select(R::schema(), &self.spec).await
    }

    pub async fn count(&self, exec: &mut dyn Executor) -> Result<u64, AppError> {
        exec.count(R::schema(), &self.spec).await
    }

    /// Any range on the query is replaced by the page window; `total` counts every match.
    pub async fn paginate(&self, exec: &mut dyn Executor, req: PageRequest) -> Result<Page<R>, AppError> {
        req.check()?;
        let unwindowed = Spec {
            window: None,
            ..self.typed_spec()?.clone()
        };
        let total = exec.count(R::schema(), &unwindowed).await?;
        let window = Window {
            offset: (req.page - 1).saturating_mul(req.per),
            limit: Some(req.per),
        };
        let rows = exec.select(R::schema(), &self.with_window(window)).await?;
        let items = rows.into_iter().map(decode).collect::<Result<Vec<_>, _>>()?;
        Ok(Page {
            items,
            metadata: PageMetadata {
                page: req.page,
                per: req.per,
                total,
            },
        })
    }

    /// Streams matches in batches of at most `max`. Each row decodes on its own, so a bad row
    /// reaches the callback as an `Err` without stopping the scan.
    ///
    /// Every batch is its own LIMIT/OFFSET select. On an autocommit executor, writes that land
    /// between batches shift the window, so rows can be skipped or seen twice. Pass a
    /// transaction's executor to scan one consistent snapshot.
    pub async fn chunk<F>(&self, exec: &mut dyn Executor, max: usize, mut on_batch: F) -> Result<ChunkSummary, AppError>
    where
        F: FnMut(Vec<Result<R, AppError>>) + Send,
    {
        if max == 0 {
            return Err(AppError::BadRequest("chunk size must be positive".into()));
        }
        self.typed_spec()?;
        let outer = self.spec.window.unwrap_or_default();
        let batch_size = max as u64;
        let mut summary = ChunkSummary::default();
        loop {
            let window = outer.narrow(summary.records, batch_size);
            if window.limit == Some(0) {
                break;
            }
            let rows = exec.select(R::schema(), &self.with_window(window)).await?;
            if rows.is_empty() {
                break;
            }
            let fetched = rows.len() as u64;
            let batch: Vec<Result<R, AppError>> = rows.into_iter().map(decode).collect();
            summary.batches += 1;
            summary.records += fetched;
            summary.failures += batch.iter().filter(|r| r.is_err()).count() as u64;
            tracing::debug!(
                table = R::schema().table_name,
                batch = summary.batches,
                size = fetched,
                "chunk batch"
            );
            on_batch(batch);
            if fetched < batch_size {
                break;
            }
        }
        Ok(summary)
    }

    /// Sets `field` on every matching record in one statement. Returns the affected count.
    pub async fn update(&self, exec: &mut dyn Executor, field: &str, value: impl Into<Value>) -> Result<u64, AppError> {
        let schema = R::schema();
        self.check_bulk()?;
        let col = column(schema, field)?;
        if col.name == schema.pk_column {
            return Err(AppError::BadRequest(format!("'{}' is immutable", field)));
        }
        let value = value.into();
        check_value(col, &value)?;
        exec.update(schema, &self.spec, field, &value).await
    }

    /// Deletes every matching record in one statement. Returns the affected count.
    pub async fn delete(&self, exec: &mut dyn Executor) -> Result<u64, AppError> {
        self.check_bulk()?;
        exec.delete(R::schema(), &self.spec).await
    }

    fn check_bulk(&self) -> Result<(), AppError> {
        if self.spec.window.is_some() || self.spec.fields.is_some() || self.spec.unique {
            return Err(AppError::BadRequest(
                "update and delete apply to every match; range, projection and unique are not allowed".into(),
            ));
        }
        Ok(())
    }
}

/// Persists a transient record and returns it with its store-assigned id.
pub async fn create<R: Record>(exec: &mut dyn Executor, record: &R) -> Result<R, AppError> {
    if record.is_persisted() {
        return Err(AppError::Conflict(format!(
            "{} record is already persisted",
            R::schema().table_name
        )));
    }
    let row = match serde_json::to_value(record)? {
        Value::Object(map) => map,
        _ => return Err(AppError::Decode("record must serialize to an object".into())),
    };
    let created = exec.insert(R::schema(), &row).await?;
    decode(created)
}

fn decode<R: Record>(row: Value) -> Result<R, AppError> {
    serde_json::from_value(row).map_err(|e| AppError::Decode(format!("{}: {}", R::schema().table_name, e)))
}
