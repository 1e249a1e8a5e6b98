//! Galaxy-only handlers.

use crate::error::AppError;
use crate::model::{Galaxy, Record};
use crate::response::success_one;
use crate::service::{CreateStep, RequestValidator, TransactionCoordinator};
use crate::state::AppState;
use axum::extract::{Query as QueryString, State};
use axum::response::IntoResponse;
use serde::Deserialize;
use serde_json::{Map, Value};

/// The first galaxy's name must contain this for the transaction to commit.
pub const STAR_MARKER: &str = "별";

#[derive(Deserialize)]
pub struct TransactionParams {
    pub name: String,
}

/// `POST /galaxies/transaction?name=`: creates `name` and `name star` atomically.
/// Rolls back both unless `name` contains the star marker.
pub async fn transaction(
    State(state): State<AppState>,
    QueryString(params): QueryString<TransactionParams>,
) -> Result<impl IntoResponse, AppError> {
    let mut fields = Map::new();
    fields.insert("name".into(), Value::String(params.name.clone()));
    RequestValidator::validate(&fields, Galaxy::schema().validation)?;

    let report = TransactionCoordinator::new(state.backend.as_ref())
        .step(CreateStep(Galaxy::new(params.name.clone())))
        .step(CreateStep(Galaxy::new(format!("{} star", params.name))))
        .abort_when(|i, output| {
            let name = output.created_field("name").and_then(Value::as_str)?;
            (i == 0 && !name.contains(STAR_MARKER)).then(|| format!("'{}' is not a star", name))
        })
        .execute()
        .await?;
    Ok(success_one(report))
}
