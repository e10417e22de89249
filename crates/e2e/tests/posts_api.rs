//! Posts client and schema checks against an in-process stub API

use std::time::Duration;

use axum::extract::Path;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Map, Value};
use webcheck_e2e::api::PostsClient;
use webcheck_e2e::harness::run_unit_slot;
use webcheck_e2e::schema::{validate_response, Post, PostList};
use webcheck_e2e::{E2eError, Outcome, OutcomeRecorder, TestId};

fn post(id: i64) -> Value {
    json!({
        "userId": (id - 1) / 10 + 1,
        "id": id,
        "title": format!("title {}", id),
        "body": format!("body {}", id),
    })
}

fn known(id: i64) -> bool {
    (1..=100).contains(&id)
}

async fn list() -> Json<Value> {
    Json(Value::Array((1..=100).map(post).collect()))
}

async fn get_one(Path(id): Path<i64>) -> (StatusCode, Json<Value>) {
    if known(id) {
        (StatusCode::OK, Json(post(id)))
    } else {
        (StatusCode::NOT_FOUND, Json(json!({})))
    }
}

async fn create(Json(payload): Json<Value>) -> (StatusCode, Json<Value>) {
    let mut created = payload.as_object().cloned().unwrap_or_default();
    created.insert("id".into(), json!(101));
    (StatusCode::CREATED, Json(Value::Object(created)))
}

async fn replace(Path(id): Path<i64>, Json(payload): Json<Value>) -> Json<Value> {
    let mut replaced = payload.as_object().cloned().unwrap_or_default();
    replaced.insert("id".into(), json!(id));
    Json(Value::Object(replaced))
}

async fn patch(Path(id): Path<i64>, Json(payload): Json<Value>) -> Json<Value> {
    let mut patched: Map<String, Value> = post(id).as_object().cloned().unwrap_or_default();
    if let Some(fields) = payload.as_object() {
        patched.extend(fields.clone());
    }
    Json(Value::Object(patched))
}

async fn remove(Path(_id): Path<i64>) -> Json<Value> {
    Json(json!({}))
}

async fn spawn_stub() -> PostsClient {
    let app = Router::new()
        .route("/posts", get(list).post(create))
        .route("/posts/:id", get(get_one).put(replace).patch(patch).delete(remove));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    PostsClient::new(format!("http://{}/", addr), Duration::from_secs(5)).unwrap()
}

#[tokio::test]
async fn list_returns_hundred_unique_posts() {
    let client = spawn_stub().await;

    let resp = client.list(&[]).await.unwrap();
    assert_eq!(resp.status, 200);
    assert!(resp.is_json());

    let posts: PostList = validate_response(&resp.body().unwrap(), true).unwrap();
    assert_eq!(posts.0.len(), 100);
    let mut ids: Vec<i64> = posts.0.iter().map(|p| p.id).collect();
    ids.dedup();
    assert_eq!(ids.len(), 100);

    let filtered = client.list(&[("userId", "1")]).await.unwrap();
    assert_eq!(filtered.status, 200);
    validate_response::<PostList>(&filtered.body().unwrap(), true).unwrap();
}

#[tokio::test]
async fn get_known_and_unknown_posts() {
    let client = spawn_stub().await;

    for id in [1, 50, 100] {
        let resp = client.get(id).await.unwrap();
        assert_eq!(resp.status, 200);
        let post: Post = validate_response(&resp.body().unwrap(), true).unwrap();
        assert_eq!(post.id, id);
    }

    for id in [0, 101, 999] {
        let resp = client.get(id).await.unwrap();
        assert_eq!(resp.status, 404);
        assert_eq!(resp.text, "{}");
    }
}

#[tokio::test]
async fn create_and_update_round_trip_title() {
    let client = spawn_stub().await;
    let payload = json!({"title": "foo", "body": "bar", "userId": 1});

    let created = client.create(&payload).await.unwrap();
    assert_eq!(created.status, 201);
    let post: Post = validate_response(&created.body().unwrap(), true).unwrap();
    assert_eq!(post.title, "foo");

    let update = json!({"title": "update", "body": "update", "userId": 1});
    for resp in [
        client.replace(1, &update).await.unwrap(),
        client.patch(1, &update).await.unwrap(),
    ] {
        assert_eq!(resp.status, 200);
        let post: Post = validate_response(&resp.body().unwrap(), true).unwrap();
        assert_eq!(post.title, "update");
    }
}

#[tokio::test]
async fn invalid_payloads_fail_validation() {
    let client = spawn_stub().await;

    for payload in [
        json!({}),
        json!({"title": "only title"}),
        json!({"userId": "not-an-int"}),
        json!({"title": null, "body": "bar", "userId": 1}),
        json!({"title": "valid", "body": "valid", "userId": -5}),
    ] {
        let resp = client.create(&payload).await.unwrap();
        assert_eq!(resp.status, 201);
        let err = validate_response::<Post>(&resp.body().unwrap(), false).unwrap_err();
        assert!(matches!(err, E2eError::Validation(_)), "{}", payload);
    }

    let resp = client.replace(1, &json!({"title": 123, "body": "y", "userId": 1})).await.unwrap();
    assert!(validate_response::<Post>(&resp.body().unwrap(), false).is_err());
}

#[tokio::test]
async fn delete_always_answers_empty_object() {
    let client = spawn_stub().await;

    for id in [1, 50, 100, 0, 9999, -10] {
        let resp = client.delete(id).await.unwrap();
        assert_eq!(resp.status, 200);
        assert_eq!(resp.body().unwrap(), json!({}));
    }
}

#[tokio::test]
async fn api_units_run_through_phase_interceptor() {
    let client = &spawn_stub().await;
    let recorder = OutcomeRecorder::new();

    let passed = run_unit_slot(&recorder, TestId::new("test_get_post_valid[valid_id_1]"), || async move {
        let resp = client.get(1).await?;
        if resp.status != 200 {
            return Err(E2eError::AssertionFailed(format!("status {}", resp.status)));
        }
        validate_response::<Post>(&resp.body()?, true).map(|_| ())
    })
    .await;
    assert!(passed.passed());

    let failed = run_unit_slot(&recorder, TestId::new("test_get_post_missing"), || async move {
        let resp = client.get(404).await?;
        validate_response::<Post>(&resp.body()?, true).map(|_| ())
    })
    .await;
    assert_eq!(failed.outcome(), Outcome::Failed);
    assert!(failed.error.unwrap().contains("Validation failed for data: {}"));
    assert_eq!(recorder.len(), 2);
}
