mod common;

use axum::http::{header, Method, StatusCode};
use sea_orm::{ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter};
use serde_json::json;

use common::{read_bytes, read_json, TestApp, TEST_PART, TEST_PRODUCT};
use parts_tracker::entities::{assembly_component, audit_log, part_note, status_history};

fn new_part(part_id: &str) -> serde_json::Value {
    json!({
        "part_id": part_id,
        "product_designation": "Новое изделие",
        "name": "Новая деталь",
        "material": "Сталь",
        "quantity_total": 3
    })
}

#[tokio::test]
async fn create_part_assigns_default_route_and_audits() {
    let app = TestApp::new().await;
    let token = app.login("admin").await;

    let response = app
        .request(Method::POST, "/admin/parts", Some(new_part("NEW-001")), Some(&token))
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = read_json(response).await;
    assert_eq!(body["part_id"], "NEW-001");
    assert_eq!(body["current_status"], "На складе");
    assert_eq!(body["quantity_total"], 3);
    assert_eq!(body["route_template_id"], app.fixture.route_id);

    let audits = audit_log::Entity::find()
        .filter(audit_log::Column::PartId.eq("NEW-001"))
        .all(&*app.state.db)
        .await
        .unwrap();
    assert_eq!(audits.len(), 1);
    assert_eq!(audits[0].action, "Создание");
    assert_eq!(audits[0].category, "part");
}

#[tokio::test]
async fn duplicate_part_id_conflicts() {
    let app = TestApp::new().await;
    let token = app.login("manager").await;

    let response = app
        .request(Method::POST, "/admin/parts", Some(new_part(TEST_PART)), Some(&token))
        .await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
    let body = read_json(response).await;
    assert!(body["message"]
        .as_str()
        .unwrap()
        .contains("Деталь TEST-001 уже существует!"));
}

#[tokio::test]
async fn missing_required_fields_are_rejected() {
    let app = TestApp::new().await;
    let token = app.login("admin").await;

    let response = app
        .request(
            Method::POST,
            "/admin/parts",
            Some(json!({
                "part_id": "",
                "product_designation": "Изделие",
                "name": "Деталь",
                "material": "Ст3"
            })),
            Some(&token),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(read_json(response).await["message"]
        .as_str()
        .unwrap()
        .contains("This field is required."));
}

#[tokio::test]
async fn blank_fields_are_trimmed_before_validation() {
    let app = TestApp::new().await;
    let token = app.login("admin").await;

    let mut blank = new_part("   ");
    blank["material"] = json!(" ");
    let response = app
        .request(Method::POST, "/admin/parts", Some(blank), Some(&token))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(read_json(response).await["message"]
        .as_str()
        .unwrap()
        .contains("This field is required."));

    let response = app
        .request(
            Method::POST,
            &format!("/admin/parts/{}/children", TEST_PART),
            Some(json!({ "part_id": "CHILD-002", "name": "  ", "material": "Ст45" })),
            Some(&token),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(app.find_part("CHILD-002").await.is_none());

    let response = app
        .request(Method::POST, "/admin/parts", Some(new_part(" NEW-002 ")), Some(&token))
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    assert_eq!(read_json(response).await["part_id"], "NEW-002");
    assert!(app.find_part("NEW-002").await.is_some());
}

#[tokio::test]
async fn child_part_joins_parent_product() {
    let app = TestApp::new().await;
    let token = app.login("admin").await;

    let response = app
        .request(
            Method::POST,
            &format!("/admin/parts/{}/children", TEST_PART),
            Some(json!({
                "part_id": "CHILD-001",
                "name": "Винт",
                "material": "Ст45",
                "assembly_quantity": 4
            })),
            Some(&token),
        )
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = read_json(response).await;
    assert_eq!(body["product_designation"], TEST_PRODUCT);
    assert_eq!(body["route_template_id"], app.fixture.route_id);

    let link = assembly_component::Entity::find()
        .filter(assembly_component::Column::ChildId.eq("CHILD-001"))
        .one(&*app.state.db)
        .await
        .unwrap()
        .expect("assembly link");
    assert_eq!(link.parent_id, TEST_PART);
    assert_eq!(link.quantity, 4);

    let response = app
        .request(
            Method::POST,
            &format!("/admin/parts/{}/children", TEST_PART),
            Some(json!({ "part_id": "CHILD-001", "name": "Винт", "material": "Ст45" })),
            Some(&token),
        )
        .await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
    assert!(read_json(response).await["message"]
        .as_str()
        .unwrap()
        .contains("Деталь с артикулом 'CHILD-001' уже существует!"));
}

#[tokio::test]
async fn edit_part_records_changes() {
    let app = TestApp::new().await;
    let token = app.login("admin").await;

    let response = app
        .request(
            Method::PUT,
            &format!("/admin/parts/{}", TEST_PART),
            Some(json!({ "name": "Крышка верхняя", "quantity_total": 5 })),
            Some(&token),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = read_json(response).await;
    assert_eq!(body["name"], "Крышка верхняя");
    assert_eq!(body["quantity_total"], 5);

    let audit = audit_log::Entity::find()
        .filter(audit_log::Column::Action.eq("Редактирование"))
        .one(&*app.state.db)
        .await
        .unwrap()
        .expect("edit audit");
    let details = audit.details.unwrap();
    assert!(details.contains("Наименование: 'Крышка' → 'Крышка верхняя'"));
    assert!(details.contains("Количество: 1 → 5"));
}

#[tokio::test]
async fn delete_part_removes_history_and_notes() {
    let app = TestApp::new().await;
    let token = app.login("admin").await;

    assert_eq!(
        app.confirm(TEST_PART, app.fixture.cutting_stage, 1)
            .await
            .status(),
        StatusCode::OK
    );
    let response = app
        .request(
            Method::POST,
            &format!("/parts/{}/notes", TEST_PART),
            Some(json!({ "text": "Проверить размеры" })),
            Some(&token),
        )
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);

    let response = app
        .request(
            Method::DELETE,
            &format!("/admin/parts/{}", TEST_PART),
            None,
            Some(&token),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        read_json(response).await["message"],
        "Деталь TEST-001 и вся ее история удалены"
    );

    assert!(app.find_part(TEST_PART).await.is_none());
    let db = &*app.state.db;
    assert_eq!(
        status_history::Entity::find()
            .filter(status_history::Column::PartId.eq(TEST_PART))
            .count(db)
            .await
            .unwrap(),
        0
    );
    assert_eq!(part_note::Entity::find().count(db).await.unwrap(), 0);
}

#[tokio::test]
async fn bulk_delete_skips_missing_parts() {
    let app = TestApp::new().await;
    let token = app.login("admin").await;
    for id in ["BULK-1", "BULK-2"] {
        app.request(Method::POST, "/admin/parts", Some(new_part(id)), Some(&token))
            .await;
    }

    let response = app
        .request(
            Method::POST,
            "/admin/parts/bulk",
            Some(json!({ "action": "delete", "part_ids": ["BULK-1", "BULK-2", "MISSING"] })),
            Some(&token),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = read_json(response).await;
    assert_eq!(body["deleted"], 2);
    assert!(app.find_part("BULK-1").await.is_none());
    assert!(app.find_part(TEST_PART).await.is_some());

    let response = app
        .request(
            Method::POST,
            "/admin/parts/bulk",
            Some(json!({ "action": "delete", "part_ids": [] })),
            Some(&token),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(read_json(response).await["message"]
        .as_str()
        .unwrap()
        .contains("Вы не выбрали ни одной детали."));
}

#[tokio::test]
async fn qr_preview_lists_scan_links() {
    let app = TestApp::new().await;
    let token = app.login("operator").await;

    let response = app
        .request(
            Method::POST,
            "/admin/parts/qr-preview",
            Some(json!({ "part_ids": [TEST_PART] })),
            Some(&token),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = read_json(response).await;
    let labels = body["labels"].as_array().unwrap();
    assert_eq!(labels.len(), 1);
    assert_eq!(labels[0]["scan_url"], "http://tracker.test/scan/TEST-001");
    assert_eq!(labels[0]["name"], "Крышка");

    let response = app
        .request(
            Method::POST,
            "/admin/parts/qr-preview",
            Some(json!({ "part_ids": [] })),
            Some(&token),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(read_json(response).await["message"]
        .as_str()
        .unwrap()
        .contains("Вы не выбрали ни одной детали для печати."));
}

#[tokio::test]
async fn drawing_upload_is_served_back() {
    let app = TestApp::new().await;
    let token = app.login("admin").await;
    let pdf = b"%PDF-1.4 test drawing";

    let response = app
        .upload(
            &format!("/admin/parts/{}/drawing", TEST_PART),
            "drawing",
            "cover.pdf",
            pdf,
            &token,
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = read_json(response).await;
    let file_name = body["drawing_filename"].as_str().unwrap().to_string();
    assert!(file_name.starts_with("TEST-001_"));
    assert!(file_name.ends_with("_cover.pdf"));

    let response = app
        .request(
            Method::GET,
            &format!("/admin/drawings/{}", parts_tracker::utils::encode_path_segment(&file_name)),
            None,
            Some(&token),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).unwrap(),
        "application/pdf"
    );
    assert_eq!(read_bytes(response).await, pdf);
}

#[tokio::test]
async fn drawing_paths_cannot_escape_the_store() {
    let app = TestApp::new().await;
    let token = app.login("admin").await;

    let response = app
        .request(
            Method::GET,
            "/admin/drawings/..%2F..%2Fetc%2Fpasswd",
            None,
            Some(&token),
        )
        .await;
    assert!(response.status().is_client_error());
}

#[tokio::test]
async fn route_and_responsible_changes() {
    let app = TestApp::new().await;
    let token = app.login("admin").await;

    let response = app
        .request(
            Method::POST,
            "/admin/routes",
            Some(json!({ "name": "Короткий", "stage_ids": [app.fixture.spare_stages[0]] })),
            Some(&token),
        )
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let route_id = read_json(response).await["id"].as_i64().unwrap();

    let response = app
        .request(
            Method::PUT,
            &format!("/admin/parts/{}/route", TEST_PART),
            Some(json!({ "route_id": route_id })),
            Some(&token),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(read_json(response).await["changed"], true);

    let response = app
        .request(
            Method::PUT,
            &format!("/admin/parts/{}/route", TEST_PART),
            Some(json!({ "route_id": route_id })),
            Some(&token),
        )
        .await;
    assert_eq!(read_json(response).await["changed"], false);

    let response = app
        .request(
            Method::PUT,
            &format!("/admin/parts/{}/responsible", TEST_PART),
            Some(json!({ "user_id": app.fixture.operator_id })),
            Some(&token),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        read_json(response).await["responsible_id"],
        app.fixture.operator_id
    );

    let part = app.find_part(TEST_PART).await.unwrap();
    assert_eq!(part.route_template_id, Some(route_id as i32));
    assert_eq!(part.responsible_id, Some(app.fixture.operator_id));
}
