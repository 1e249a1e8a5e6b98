use crate::error::AppError;
use crate::model::NAME_RULE;
use crate::response::success_one_ok;
use crate::service::RequestValidator;
use axum::extract::Query as QueryString;
use axum::response::IntoResponse;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Deserialize, Serialize)]
pub struct NameParams {
    #[serde(default)]
    pub name: Option<String>,
}

/// `GET /validation?name=`: echoes the name once it passes the name rule.
pub async fn validate_name(QueryString(params): QueryString<NameParams>) -> Result<impl IntoResponse, AppError> {
    let mut fields = Map::new();
    if let Some(name) = &params.name {
        fields.insert("name".into(), Value::String(name.clone()));
    }
    RequestValidator::validate(&fields, &[("name", NAME_RULE)])?;
    Ok(success_one_ok(params))
}
