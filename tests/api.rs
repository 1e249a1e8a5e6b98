//! Router tests over the in-memory backend.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use starchart::config::Settings;
use starchart::{app, AppState, MemoryBackend};
use tower::ServiceExt;

fn router() -> Router {
    app(AppState::new(MemoryBackend::new()), &Settings::default())
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(b) => builder
            .header("content-type", "application/json")
            .body(Body::from(b.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

async fn seed(app: &Router) {
    for (name, age) in [("Milky Way", 13), ("Andromeda", 10), ("Triangulum", 10), ("Whirlpool", 400)] {
        let (status, _) = send(app, "POST", "/galaxies", Some(json!({"name": name, "age": age}))).await;
        assert_eq!(status, StatusCode::CREATED);
    }
}

fn names(body: &Value) -> Vec<&str> {
    body["data"]
        .as_array()
        .unwrap()
        .iter()
        .map(|g| g["name"].as_str().unwrap())
        .collect()
}

#[tokio::test]
async fn health_and_ready() {
    let app = router();
    let (status, body) = send(&app, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    let (status, body) = send(&app, "GET", "/ready", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["store"], "memory");
}

#[tokio::test]
async fn create_then_first_by_name() {
    let app = router();
    let (status, created) = send(&app, "POST", "/galaxies", Some(json!({"name": "Andromeda"}))).await;
    assert_eq!(status, StatusCode::CREATED);
    assert!(created["data"]["id"].is_string());

    let (status, found) = send(&app, "GET", "/galaxies/first?name=Andromeda", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(found["data"], created["data"]);

    let (status, missing) = send(&app, "GET", "/galaxies/first?name=Nowhere", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(missing["error"]["code"], "not_found");
}

#[tokio::test]
async fn short_names_fail_validation_with_details() {
    let app = router();
    let (status, body) = send(&app, "POST", "/galaxies", Some(json!({"name": "M3"}))).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"]["code"], "validation_error");
    assert_eq!(
        body["error"]["details"],
        json!([{"field": "name", "constraint": "min_length", "limit": 3}])
    );

    let (status, _) = send(&app, "POST", "/planets", Some(json!({"type": {"name": "rocky"}}))).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn creating_with_an_id_conflicts() {
    let app = router();
    let id = uuid::Uuid::new_v4();
    let (status, body) = send(&app, "POST", "/galaxies", Some(json!({"id": id, "name": "Andromeda"}))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "conflict");
}

#[tokio::test]
async fn index_paginates_sorted_by_name() {
    let app = router();
    seed(&app).await;
    let (status, body) = send(&app, "GET", "/galaxies?page=2&per=3", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(names(&body), vec!["Whirlpool"]);
    assert_eq!(body["meta"], json!({"page": 2, "per": 3, "total": 4}));

    let (status, _) = send(&app, "GET", "/galaxies?per=500", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn filter_and_group_routes() {
    let app = router();
    seed(&app).await;
    let (_, body) = send(&app, "GET", "/galaxies/filter?age=10&sort=name:desc", None).await;
    assert_eq!(names(&body), vec!["Triangulum", "Andromeda"]);

    let (_, body) = send(&app, "GET", "/galaxies/filter?age=gt:10&age=lt:100", None).await;
    assert_eq!(names(&body), vec!["Milky Way"]);

    let (_, body) = send(&app, "GET", "/galaxies/group?name=Andromeda&age=400&sort=name", None).await;
    assert_eq!(names(&body), vec!["Andromeda", "Whirlpool"]);
    assert_eq!(body["meta"]["count"], 2);

    let (status, _) = send(&app, "GET", "/galaxies/group", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn all_with_projection_unique_and_range() {
    let app = router();
    seed(&app).await;
    let (status, body) = send(&app, "GET", "/galaxies/all?fields=age&unique=true&sort=age", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"], json!([{"age": 10}, {"age": 13}, {"age": 400}]));

    let (_, body) = send(&app, "GET", "/galaxies/all?sort=name&range=1..3", None).await;
    assert_eq!(names(&body), vec!["Milky Way", "Triangulum"]);

    let (status, _) = send(&app, "GET", "/galaxies/all?sort=colour", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn count_route() {
    let app = router();
    seed(&app).await;
    let (_, body) = send(&app, "GET", "/galaxies/count?age=10", None).await;
    assert_eq!(body["data"]["count"], 2);
}

#[tokio::test]
async fn chunk_route_reports_records_and_summary() {
    let app = router();
    seed(&app).await;
    let (status, body) = send(&app, "GET", "/galaxies/chunk?max=3", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["records"].as_array().unwrap().len(), 4);
    assert_eq!(body["data"]["failures"], json!([]));
    assert_eq!(body["data"]["summary"], json!({"batches": 2, "records": 4, "failures": 0}));

    let (status, _) = send(&app, "GET", "/galaxies/chunk?max=5000", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn update_and_delete_need_filters_and_matches() {
    let app = router();
    seed(&app).await;
    let (status, body) = send(&app, "PATCH", "/galaxies?age=10", Some(json!({"field": "distance", "value": 2500}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"code": 200, "msg": "updated galaxies", "affected": 2}));

    let (status, _) = send(&app, "PATCH", "/galaxies", Some(json!({"field": "age", "value": 1}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(&app, "PATCH", "/galaxies?age=10", Some(json!({"field": "name", "value": "ab"}))).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let (status, _) = send(&app, "PATCH", "/galaxies?age=99", Some(json!({"field": "age", "value": 1}))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = send(&app, "DELETE", "/galaxies?distance=2500", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["affected"], 2);

    let (status, _) = send(&app, "DELETE", "/galaxies?distance=2500", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, body) = send(&app, "GET", "/galaxies/count", None).await;
    assert_eq!(body["data"]["count"], 2);
}

#[tokio::test]
async fn transaction_commits_both_galaxies_for_a_star() {
    let app = router();
    // 별빛
    let (status, body) = send(&app, "POST", "/galaxies/transaction?name=%EB%B3%84%EB%B9%9B", None).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["data"]["state"], "committed_all");

    let (_, body) = send(&app, "GET", "/galaxies/all?sort=name", None).await;
    assert_eq!(names(&body), vec!["별빛", "별빛 star"]);
}

#[tokio::test]
async fn transaction_without_marker_leaves_nothing_behind() {
    let app = router();
    let (status, body) = send(&app, "POST", "/galaxies/transaction?name=Andromeda", None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "transaction_aborted");

    let (_, body) = send(&app, "GET", "/galaxies/count", None).await;
    assert_eq!(body["data"]["count"], 0);
}

#[tokio::test]
async fn planets_filter_on_their_type() {
    let app = router();
    for (name, kind) in [("Jupiter", "gas giant"), ("Earth", "rocky"), ("Saturn", "gas giant")] {
        let (status, _) = send(&app, "POST", "/planets", Some(json!({"name": name, "type": {"name": kind}}))).await;
        assert_eq!(status, StatusCode::CREATED);
    }
    let (_, body) = send(
        &app,
        "GET",
        "/planets/filter?type=%7B%22name%22%3A%22gas%20giant%22%7D&sort=name",
        None,
    )
    .await;
    assert_eq!(names(&body), vec!["Jupiter", "Saturn"]);
}

#[tokio::test]
async fn planet_type_updates_must_keep_the_record_readable() {
    let app = router();
    for (name, kind) in [("Mercury", "rock"), ("Jupiter", "gas"), ("Mars", "rock")] {
        let (status, _) = send(&app, "POST", "/planets", Some(json!({"name": name, "type": {"name": kind}}))).await;
        assert_eq!(status, StatusCode::CREATED);
    }
    let (status, body) = send(&app, "PATCH", "/planets?name=Mars", Some(json!({"field": "type", "value": "x"}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "bad_request");

    let (status, body) = send(&app, "GET", "/planets/all", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(names(&body), vec!["Mercury", "Jupiter", "Mars"]);

    let (_, body) = send(&app, "GET", "/planets/all?fields=type&unique=true", None).await;
    assert_eq!(body["data"], json!([{"type": {"name": "rock"}}, {"type": {"name": "gas"}}]));
}

#[tokio::test]
async fn huge_page_numbers_return_an_empty_page() {
    let app = router();
    seed(&app).await;
    let (status, body) = send(&app, "GET", "/galaxies?page=18446744073709551615&per=10", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"], json!([]));
    assert_eq!(body["meta"]["total"], 4);
}

#[tokio::test]
async fn validation_route_echoes_valid_names() {
    let app = router();
    let (status, body) = send(&app, "GET", "/validation?name=Vega", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["name"], "Vega");

    let (status, body) = send(&app, "GET", "/validation?name=ab", None).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"]["details"][0]["constraint"], "min_length");

    let (status, _) = send(&app, "GET", "/validation", None).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}
