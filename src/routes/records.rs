//! Record routes, mounted once per kind under its path segment.

use crate::handlers::records::{all, chunk, count, create, delete, filter, first, group, index, update};
use crate::model::Record;
use crate::state::AppState;
use axum::{routing::get, Router};

pub fn record_routes<R: Record>() -> Router<AppState> {
    Router::new()
        .route(
            "/",
            get(index::<R>)
                .post(create::<R>)
                .patch(update::<R>)
                .delete(delete::<R>),
        )
        .route("/all", get(all::<R>))
        .route("/first", get(first::<R>))
        .route("/filter", get(filter::<R>))
        .route("/group", get(group::<R>))
        .route("/count", get(count::<R>))
        .route("/chunk", get(chunk::<R>))
}
