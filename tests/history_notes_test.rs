mod common;

use std::time::Duration;

use axum::http::{Method, StatusCode};
use chrono::{DateTime, Utc};
use serde_json::{json, Value};

use common::{read_json, TestApp, TEST_PART};

async fn add_note(app: &TestApp, token: &str, text: &str) -> axum::response::Response {
    app.request(
        Method::POST,
        &format!("/parts/{}/notes", TEST_PART),
        Some(json!({ "text": text, "stage_id": app.fixture.cutting_stage })),
        Some(token),
    )
    .await
}

fn timestamps(entries: &[Value]) -> Vec<DateTime<Utc>> {
    entries
        .iter()
        .map(|e| e["timestamp"].as_str().unwrap().parse().unwrap())
        .collect()
}

#[tokio::test]
async fn combined_history_is_newest_first() {
    let app = TestApp::new().await;
    let admin = app.login("admin").await;
    let manager = app.login("manager").await;

    app.confirm(TEST_PART, app.fixture.cutting_stage, 1).await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(
        add_note(&app, &manager, "Заусенцы на кромке").await.status(),
        StatusCode::CREATED
    );
    tokio::time::sleep(Duration::from_millis(20)).await;
    app.request(
        Method::PUT,
        &format!("/admin/parts/{}/responsible", TEST_PART),
        Some(json!({ "user_id": app.fixture.manager_id })),
        Some(&admin),
    )
    .await;

    let response = app
        .request(Method::GET, &format!("/history/{}", TEST_PART), None, None)
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = read_json(response).await;
    assert_eq!(body["part"]["part_id"], TEST_PART);

    let entries = body["entries"].as_array().unwrap();
    let kinds: Vec<&str> = entries.iter().map(|e| e["type"].as_str().unwrap()).collect();
    for kind in ["status", "note", "audit", "responsible"] {
        assert!(kinds.contains(&kind), "missing {kind} in {kinds:?}");
    }

    let times = timestamps(entries);
    assert!(times.windows(2).all(|w| w[0] >= w[1]));
    assert_eq!(kinds.last(), Some(&"status"));

    let note = entries.iter().find(|e| e["type"] == "note").unwrap();
    assert_eq!(note["author"], "manager");
    assert_eq!(note["stage"], "Резка");
    let responsible = entries.iter().find(|e| e["type"] == "responsible").unwrap();
    assert_eq!(responsible["user"], "manager");
}

#[tokio::test]
async fn history_of_unknown_part_is_not_found() {
    let app = TestApp::new().await;
    let response = app.request(Method::GET, "/history/NOPE", None, None).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn empty_note_is_rejected() {
    let app = TestApp::new().await;
    let token = app.login("operator").await;

    let response = add_note(&app, &token, "   ").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(read_json(response).await["message"]
        .as_str()
        .unwrap()
        .contains("Ошибка: This field is required."));
}

#[tokio::test]
async fn notes_require_login() {
    let app = TestApp::new().await;
    let response = app
        .request(
            Method::POST,
            &format!("/parts/{}/notes", TEST_PART),
            Some(json!({ "text": "без входа" })),
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn only_the_author_edits_a_note() {
    let app = TestApp::new().await;
    let manager = app.login("manager").await;
    let operator = app.login("operator").await;

    let note = read_json(add_note(&app, &manager, "Проверить допуск").await).await;
    let uri = format!("/notes/{}", note["id"]);

    let response = app
        .request(
            Method::PUT,
            &uri,
            Some(json!({ "text": "Чужая правка" })),
            Some(&operator),
        )
        .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert!(read_json(response).await["message"]
        .as_str()
        .unwrap()
        .contains("Вы можете изменять только свои примечания."));

    let response = app
        .request(
            Method::PUT,
            &uri,
            Some(json!({ "text": "Допуск проверен" })),
            Some(&manager),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(read_json(response).await["text"], "Допуск проверен");

    let response = app.request(Method::DELETE, &uri, None, Some(&operator)).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn administrators_delete_any_note() {
    let app = TestApp::new().await;
    let manager = app.login("manager").await;
    let admin = app.login("admin").await;

    let note = read_json(add_note(&app, &manager, "Лишнее").await).await;
    let response = app
        .request(
            Method::DELETE,
            &format!("/notes/{}", note["id"]),
            None,
            Some(&admin),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        read_json(response).await["message"],
        "Примечание к детали TEST-001 удалено"
    );
}
