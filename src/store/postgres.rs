//! PostgreSQL backend: compiles specs with the SQL builder and runs them through sqlx.

use super::{finished, Backend, Executor, Transaction};
use crate::error::AppError;
use crate::model::{EntitySchema, Galaxy, Planet, Record};
use crate::query::Spec;
use crate::sql::{self, PgBindValue, QueryBuf};
use async_trait::async_trait;
use serde_json::{Map, Value};
use sqlx::postgres::{PgConnection, PgPool, PgPoolOptions, PgRow, Postgres};
use sqlx::ConnectOptions;
use std::str::FromStr;

#[derive(Clone)]
pub struct PgBackend {
    pool: PgPool,
}

impl PgBackend {
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, AppError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(PgBackend { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl Backend for PgBackend {
    fn kind(&self) -> &'static str {
        "postgres"
    }

    fn executor(&self) -> Box<dyn Executor> {
        Box::new(PgPoolExecutor {
            pool: self.pool.clone(),
        })
    }

    async fn begin(&self) -> Result<Box<dyn Transaction>, AppError> {
        let tx = self.pool.begin().await?;
        tracing::debug!("transaction opened");
        Ok(Box::new(PgTransaction { tx: Some(tx) }))
    }

    async fn ping(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1").fetch_optional(&self.pool).await?;
        Ok(())
    }
}

/// Autocommit executor: each statement checks out its own pooled connection.
struct PgPoolExecutor {
    pool: PgPool,
}

#[async_trait]
impl Executor for PgPoolExecutor {
    async fn select(&mut self, schema: &'static EntitySchema, spec: &Spec) -> Result<Vec<Value>, AppError> {
        let q = sql::select(schema, spec)?;
        fetch_all(&self.pool, &q).await
    }

    async fn count(&mut self, schema: &'static EntitySchema, spec: &Spec) -> Result<u64, AppError> {
        let q = sql::count(schema, spec)?;
        fetch_count(&self.pool, &q).await
    }

    async fn insert(&mut self, schema: &'static EntitySchema, row: &Map<String, Value>) -> Result<Value, AppError> {
        let q = sql::insert(schema, row)?;
        fetch_one(&self.pool, &q).await
    }

    async fn update(
        &mut self,
        schema: &'static EntitySchema,
        spec: &Spec,
        field: &str,
        value: &Value,
    ) -> Result<u64, AppError> {
        let q = sql::update(schema, spec, field, value)?;
        execute(&self.pool, &q).await
    }

    async fn delete(&mut self, schema: &'static EntitySchema, spec: &Spec) -> Result<u64, AppError> {
        let q = sql::delete(schema, spec)?;
        execute(&self.pool, &q).await
    }
}

/// sqlx rolls the transaction back when it is dropped uncommitted.
struct PgTransaction {
    tx: Option<sqlx::Transaction<'static, Postgres>>,
}

impl PgTransaction {
    fn conn(&mut self) -> Result<&mut PgConnection, AppError> {
        self.tx.as_deref_mut().ok_or_else(finished)
    }
}

#[async_trait]
impl Executor for PgTransaction {
    async fn select(&mut self, schema: &'static EntitySchema, spec: &Spec) -> Result<Vec<Value>, AppError> {
        let q = sql::select(schema, spec)?;
        fetch_all(self.conn()?, &q).await
    }

    async fn count(&mut self, schema: &'static EntitySchema, spec: &Spec) -> Result<u64, AppError> {
        let q = sql::count(schema, spec)?;
        fetch_count(self.conn()?, &q).await
    }

    async fn insert(&mut self, schema: &'static EntitySchema, row: &Map<String, Value>) -> Result<Value, AppError> {
        let q = sql::insert(schema, row)?;
        fetch_one(self.conn()?, &q).await
    }

    async fn update(
        &mut self,
        schema: &'static EntitySchema,
        spec: &Spec,
        field: &str,
        value: &Value,
    ) -> Result<u64, AppError> {
        let q = sql::update(schema, spec, field, value)?;
        execute(self.conn()?, &q).await
    }

    async fn delete(&mut self, schema: &'static EntitySchema, spec: &Spec) -> Result<u64, AppError> {
        let q = sql::delete(schema, spec)?;
        execute(self.conn()?, &q).await
    }
}

#[async_trait]
impl Transaction for PgTransaction {
    fn executor(&mut self) -> &mut dyn Executor {
        self
    }

    async fn commit(&mut self) -> Result<(), AppError> {
        let tx = self.tx.take().ok_or_else(finished)?;
        tx.commit().await?;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), AppError> {
        let tx = self.tx.take().ok_or_else(finished)?;
        tx.rollback().await?;
        Ok(())
    }
}

fn bind_all<'q>(q: &'q QueryBuf) -> sqlx::query::Query<'q, Postgres, sqlx::postgres::PgArguments> {
    tracing::debug!(sql = %q.sql, params = ?q.params, "query");
    let mut query = sqlx::query(&q.sql);
    for p in &q.params {
        query = query.bind(PgBindValue::from_json(p));
    }
    query
}

async fn fetch_all<'c, E>(executor: E, q: &QueryBuf) -> Result<Vec<Value>, AppError>
where
    E: sqlx::Executor<'c, Database = Postgres>,
{
    let rows = bind_all(q).fetch_all(executor).await?;
    Ok(rows.iter().map(row_to_json).collect())
}

async fn fetch_one<'c, E>(executor: E, q: &QueryBuf) -> Result<Value, AppError>
where
    E: sqlx::Executor<'c, Database = Postgres>,
{
    let row = bind_all(q).fetch_one(executor).await?;
    Ok(row_to_json(&row))
}

async fn fetch_count<'c, E>(executor: E, q: &QueryBuf) -> Result<u64, AppError>
where
    E: sqlx::Executor<'c, Database = Postgres>,
{
    use sqlx::Row;
    let row = bind_all(q).fetch_one(executor).await?;
    let n: i64 = row.try_get("count")?;
    Ok(n.max(0) as u64)
}

async fn execute<'c, E>(executor: E, q: &QueryBuf) -> Result<u64, AppError>
where
    E: sqlx::Executor<'c, Database = Postgres>,
{
    let result = bind_all(q).execute(executor).await?;
    Ok(result.rows_affected())
}

fn row_to_json(row: &PgRow) -> Value {
    use sqlx::Column;
    use sqlx::Row;
    let mut map = Map::new();
    for col in row.columns() {
        let name = col.name();
        let v = cell_to_value(row, name);
        map.insert(name.to_string(), v);
    }
    Value::Object(map)
}

fn cell_to_value(row: &PgRow, name: &str) -> Value {
    use sqlx::Row;
    if let Ok(Some(n)) = row.try_get::<Option<i32>, _>(name) {
        return Value::Number(n.into());
    }
    if let Ok(Some(n)) = row.try_get::<Option<i64>, _>(name) {
        return Value::Number(n.into());
    }
    if let Ok(Some(n)) = row.try_get::<Option<f64>, _>(name) {
        if let Some(n) = serde_json::Number::from_f64(n) {
            return Value::Number(n);
        }
    }
    if let Ok(Some(b)) = row.try_get::<Option<bool>, _>(name) {
        return Value::Bool(b);
    }
    if let Ok(Some(u)) = row.try_get::<Option<uuid::Uuid>, _>(name) {
        return Value::String(u.to_string());
    }
    if let Ok(Some(s)) = row.try_get::<Option<String>, _>(name) {
        return Value::String(s);
    }
    if let Ok(Some(j)) = row.try_get::<Option<Value>, _>(name) {
        return j;
    }
    Value::Null
}

/// Create the record tables if they do not exist yet.
pub async fn ensure_tables(pool: &PgPool) -> Result<(), AppError> {
    for schema in [Galaxy::schema(), Planet::schema()] {
        let ddl = sql::create_table(schema);
        tracing::debug!(sql = %ddl, "ensure table");
        sqlx::query(&ddl).execute(pool).await?;
    }
    Ok(())
}

/// Ensure the database in `database_url` exists; create it if not. Connects to the
/// default `postgres` database to run CREATE DATABASE. Call before creating the main pool.
pub async fn ensure_database_exists(database_url: &str) -> Result<(), AppError> {
    let (admin_url, db_name) = parse_db_name_from_url(database_url)?;
    if db_name.is_empty() || db_name == "postgres" {
        return Ok(());
    }
    let opts = sqlx::postgres::PgConnectOptions::from_str(&admin_url)
        .map_err(|e| AppError::BadRequest(format!("invalid DATABASE_URL: {}", e)))?;
    let mut conn: PgConnection = opts.connect().await?;
    let exists: (bool,) = sqlx::query_as("SELECT EXISTS(SELECT 1 FROM pg_database WHERE datname = $1)")
        .bind(&db_name)
        .fetch_one(&mut conn)
        .await?;
    if !exists.0 {
        tracing::info!(database = %db_name, "creating database");
        sqlx::query(&format!("CREATE DATABASE {}", quote_ident(&db_name)))
            .execute(&mut conn)
            .await?;
    }
    Ok(())
}

fn parse_db_name_from_url(url: &str) -> Result<(String, String), AppError> {
    let path_start = url
        .rfind('/')
        .ok_or_else(|| AppError::BadRequest("DATABASE_URL: no path".into()))?
        + 1;
    let path_and_query = url.get(path_start..).unwrap_or("");
    let db_name = path_and_query.split('?').next().unwrap_or("").trim();
    let base = url.get(..path_start).unwrap_or(url);
    Ok((format!("{}postgres", base), db_name.to_string()))
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admin_url_points_at_postgres_database() {
        let (admin, db) = parse_db_name_from_url("postgres://u:p@localhost:5432/starchart?sslmode=disable").unwrap();
        assert_eq!(admin, "postgres://u:p@localhost:5432/postgres");
        assert_eq!(db, "starchart");
    }

    #[test]
    fn quote_ident_doubles_quotes() {
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
    }
}
