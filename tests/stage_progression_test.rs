mod common;

use axum::http::{Method, StatusCode};
use sea_orm::{ActiveModelTrait, Set};
use serde_json::json;

use common::{read_json, TestApp, TEST_PART};
use parts_tracker::entities::part;

#[tokio::test]
async fn scan_page_points_to_first_stage() {
    let app = TestApp::new().await;

    let response = app
        .request(Method::GET, &format!("/scan/{}", TEST_PART), None, None)
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = read_json(response).await;
    assert_eq!(body["route"], "Стандартный маршрут");
    assert_eq!(body["stages"].as_array().unwrap().len(), 2);
    assert_eq!(body["next_stage"]["name"], "Резка");
    assert_eq!(body["next_stage"]["pending"], 1);
    assert!(body["message"].is_null());
}

#[tokio::test]
async fn completing_every_stage_finishes_the_part() {
    let app = TestApp::new().await;
    let f = &app.fixture;

    let response = app.confirm(TEST_PART, f.cutting_stage, 1).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = read_json(response).await;
    assert_eq!(body["current_status"], "Резка");
    assert_eq!(body["quantity_completed"], 0);
    assert_eq!(body["progression"]["stages"][0]["state"], "completed");
    assert_eq!(body["progression"]["stages"][1]["state"], "in_progress");

    let response = app.confirm(TEST_PART, f.drilling_stage, 1).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = read_json(response).await;
    assert_eq!(body["current_status"], "Сверловка");
    assert_eq!(body["quantity_completed"], 1);
    assert_eq!(body["quantity_total"], 1);

    let part = app.find_part(TEST_PART).await.unwrap();
    assert_eq!(part.quantity_completed, 1);
    assert_eq!(part.current_status, "Сверловка");

    let response = app
        .request(Method::GET, &format!("/scan/{}", TEST_PART), None, None)
        .await;
    let body = read_json(response).await;
    assert_eq!(body["message"], "Все этапы завершены");
    assert!(body["next_stage"].is_null());
}

#[tokio::test]
async fn stage_cannot_process_more_than_it_received() {
    let app = TestApp::new().await;
    let f = &app.fixture;

    let response = app.confirm(TEST_PART, f.cutting_stage, 2).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(read_json(response).await["message"]
        .as_str()
        .unwrap()
        .contains("доступно только 1 шт."));

    let response = app.confirm(TEST_PART, f.drilling_stage, 1).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app.confirm(TEST_PART, f.spare_stages[0], 1).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(read_json(response).await["message"]
        .as_str()
        .unwrap()
        .contains("Этап не входит в маршрут этой детали."));

    let part = app.find_part(TEST_PART).await.unwrap();
    assert_eq!(part.current_status, "На складе");
}

#[tokio::test]
async fn scrap_is_counted_separately() {
    let app = TestApp::new().await;
    let f = &app.fixture;
    let token = app.login("admin").await;
    app.request(
        Method::PUT,
        &format!("/admin/parts/{}", TEST_PART),
        Some(json!({ "quantity_total": 3 })),
        Some(&token),
    )
    .await;

    let response = app
        .request(
            Method::POST,
            &format!("/scan/{}/stages/{}", TEST_PART, f.cutting_stage),
            Some(json!({ "operator_name": "Тест", "quantity": 1, "status_type": "scrapped" })),
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    app.confirm(TEST_PART, f.cutting_stage, 2).await;
    app.confirm(TEST_PART, f.drilling_stage, 2).await;

    let part = app.find_part(TEST_PART).await.unwrap();
    assert_eq!(part.quantity_scrapped, 1);
    assert_eq!(part.quantity_completed, 2);
    assert!(part.is_complete());
}

#[tokio::test]
async fn part_without_route_cannot_be_scanned() {
    let app = TestApp::new().await;
    part::ActiveModel {
        part_id: Set("NO-ROUTE".to_string()),
        product_designation: Set("Изделие".to_string()),
        name: Set("Деталь".to_string()),
        material: Set("Ст3".to_string()),
        route_template_id: Set(None),
        ..Default::default()
    }
    .insert(&*app.state.db)
    .await
    .unwrap();

    let response = app.request(Method::GET, "/scan/NO-ROUTE", None, None).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(read_json(response).await["message"]
        .as_str()
        .unwrap()
        .contains("Этой детали не присвоен технологический маршрут"));

    let response = app.confirm("NO-ROUTE", app.fixture.cutting_stage, 1).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn unknown_part_is_not_found() {
    let app = TestApp::new().await;
    let response = app.request(Method::GET, "/scan/NOPE", None, None).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn operator_name_defaults_to_signed_in_user() {
    let app = TestApp::new().await;
    let uri = format!("/scan/{}/stages/{}", TEST_PART, app.fixture.cutting_stage);

    let response = app
        .request(Method::POST, &uri, Some(json!({ "quantity": 1 })), None)
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(read_json(response).await["message"]
        .as_str()
        .unwrap()
        .contains("This field is required."));

    let token = app.login("operator").await;
    let response = app
        .request(Method::POST, &uri, Some(json!({ "quantity": 1 })), Some(&token))
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let history = read_json(
        app.request(Method::GET, &format!("/history/{}", TEST_PART), None, None)
            .await,
    )
    .await;
    let status = history["entries"]
        .as_array()
        .unwrap()
        .iter()
        .find(|e| e["type"] == "status")
        .expect("status entry");
    assert_eq!(status["operator_name"], "operator");
}

#[tokio::test]
async fn cancelling_a_stage_rolls_totals_back() {
    let app = TestApp::new().await;
    let f = &app.fixture;
    let token = app.login("admin").await;

    let body = read_json(app.confirm(TEST_PART, f.cutting_stage, 1).await).await;
    let history_id = body["history_id"].as_i64().unwrap();

    let response = app
        .request(
            Method::DELETE,
            &format!("/admin/history/{}", history_id),
            None,
            Some(&token),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = read_json(response).await;
    assert_eq!(body["current_status"], "На складе");
    assert_eq!(body["quantity_completed"], 0);

    let response = app
        .request(
            Method::DELETE,
            &format!("/admin/history/{}", history_id),
            None,
            Some(&token),
        )
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn cannot_cancel_a_stage_later_stages_depend_on() {
    let app = TestApp::new().await;
    let f = &app.fixture;
    let token = app.login("admin").await;

    let cutting = read_json(app.confirm(TEST_PART, f.cutting_stage, 1).await).await;
    let drilling = read_json(app.confirm(TEST_PART, f.drilling_stage, 1).await).await;

    let response = app
        .request(
            Method::DELETE,
            &format!("/admin/history/{}", cutting["history_id"]),
            None,
            Some(&token),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(read_json(response).await["message"]
        .as_str()
        .unwrap()
        .contains("Нельзя отменить этап 'Резка'"));

    let response = app
        .request(
            Method::DELETE,
            &format!("/admin/history/{}", drilling["history_id"]),
            None,
            Some(&token),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let part = app.find_part(TEST_PART).await.unwrap();
    assert_eq!(part.quantity_completed, 0);
    assert_eq!(part.current_status, "Резка");
}

#[tokio::test]
async fn operators_cannot_cancel_stages() {
    let app = TestApp::new().await;
    let token = app.login("operator").await;
    let body = read_json(app.confirm(TEST_PART, app.fixture.cutting_stage, 1).await).await;

    let response = app
        .request(
            Method::DELETE,
            &format!("/admin/history/{}", body["history_id"]),
            None,
            Some(&token),
        )
        .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn rework_is_limited_to_what_the_stage_completed() {
    let app = TestApp::new().await;
    let uri = format!("/scan/{}/stages/{}", TEST_PART, app.fixture.cutting_stage);
    let rework = |quantity: i32| {
        json!({ "operator_name": "Тест", "quantity": quantity, "status_type": "rework" })
    };

    let response = app.request(Method::POST, &uri, Some(rework(1)), None).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(read_json(response).await["message"]
        .as_str()
        .unwrap()
        .contains("выполнено только 0 шт."));

    app.confirm(TEST_PART, app.fixture.cutting_stage, 1).await;

    let response = app.request(Method::POST, &uri, Some(rework(2)), None).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(read_json(response).await["message"]
        .as_str()
        .unwrap()
        .contains("Нельзя отправить на доработку 2 шт. на этапе 'Резка': выполнено только 1 шт."));

    let response = app.request(Method::POST, &uri, Some(rework(1)), None).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = read_json(response).await;
    assert_eq!(body["progression"]["stages"][0]["reworked"], 1);
    assert_eq!(body["progression"]["stages"][0]["done"], 1);

    let history = read_json(
        app.request(Method::GET, &format!("/history/{}", TEST_PART), None, None)
            .await,
    )
    .await;
    let kinds: Vec<&str> = history["entries"]
        .as_array()
        .unwrap()
        .iter()
        .filter(|e| e["type"] == "status")
        .map(|e| e["status_type"].as_str().unwrap())
        .collect();
    assert_eq!(kinds.len(), 2);
    assert!(kinds.contains(&"rework"));
    assert!(kinds.contains(&"completed"));
}

#[tokio::test]
async fn total_cannot_drop_below_processed_quantity() {
    let app = TestApp::new().await;
    let token = app.login("admin").await;
    let uri = format!("/admin/parts/{}", TEST_PART);
    let set_total = |total: i32| json!({ "quantity_total": total });

    let response = app
        .request(Method::PUT, &uri, Some(set_total(10)), Some(&token))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let response = app.confirm(TEST_PART, app.fixture.cutting_stage, 8).await;
    assert_eq!(response.status(), StatusCode::OK);

    // Nothing has reached the end of the route yet, only the first stage saw the pieces.
    let response = app
        .request(Method::PUT, &uri, Some(set_total(5)), Some(&token))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(read_json(response).await["message"]
        .as_str()
        .unwrap()
        .contains("Общее количество не может быть меньше уже обработанного (8 шт.)"));
    assert_eq!(app.find_part(TEST_PART).await.unwrap().quantity_total, 10);

    let response = app
        .request(Method::PUT, &uri, Some(set_total(8)), Some(&token))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(app.find_part(TEST_PART).await.unwrap().quantity_total, 8);
}
