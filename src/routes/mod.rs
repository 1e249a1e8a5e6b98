//! Router assembly.

mod common;
mod records;

pub use common::common_routes;
pub use records::record_routes;

use crate::config::Settings;
use crate::handlers::{transaction, validate_name};
use crate::model::{Galaxy, Planet, Record};
use crate::state::AppState;
use axum::{
    routing::{get, post},
    Router,
};
use tower::ServiceBuilder;
use tower_http::{limit::RequestBodyLimitLayer, trace::TraceLayer};

/// The full application: `/galaxies`, `/planets`, `/validation` and the common routes.
pub fn app(state: AppState, settings: &Settings) -> Router {
    let galaxies = record_routes::<Galaxy>().route("/transaction", post(transaction));
    Router::new()
        .nest(&mount_point::<Galaxy>(), galaxies)
        .nest(&mount_point::<Planet>(), record_routes::<Planet>())
        .route("/validation", get(validate_name))
        .merge(common_routes())
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(RequestBodyLimitLayer::new(settings.body_limit)),
        )
        .with_state(state)
}

fn mount_point<R: Record>() -> String {
    format!("/{}", R::schema().path_segment)
}
