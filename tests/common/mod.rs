#![allow(dead_code)]

use std::sync::Arc;

use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    response::Response,
    Router,
};
use http_body_util::BodyExt;
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, Set};
use serde_json::{json, Value};
use tempfile::TempDir;
use tower::ServiceExt;

use parts_tracker::{
    auth::{ROLE_ADMINISTRATOR, ROLE_MANAGER, ROLE_OPERATOR},
    config::AppConfig,
    db,
    entities::{part, role, route_stage, route_template, stage},
    services::users::{create_user, insert_roles},
    AppState,
};

pub const PASSWORD: &str = "password123";
pub const TEST_PART: &str = "TEST-001";
pub const TEST_PRODUCT: &str = "Тестовое изделие";
pub const MULTIPART_BOUNDARY: &str = "tracker-test-boundary";

/// Ids of the rows every test starts with
#[derive(Debug, Clone)]
pub struct Fixture {
    pub admin_id: i32,
    pub manager_id: i32,
    pub operator_id: i32,
    pub cutting_stage: i32,
    pub drilling_stage: i32,
    pub spare_stages: [i32; 2],
    pub route_id: i32,
}

/// Application router over a fresh in-memory database.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    pub fixture: Fixture,
    _instance: TempDir,
}

impl TestApp {
    pub async fn new() -> Self {
        let instance = tempfile::tempdir().expect("create instance dir");

        let mut cfg = AppConfig::new(
            "sqlite::memory:".to_string(),
            "integration_test_secret_with_enough_entropy_42".to_string(),
            3600,
            "127.0.0.1".to_string(),
            18_080,
            "test".to_string(),
        );
        cfg.instance_path = instance.path().to_path_buf();
        cfg.public_base_url = Some("http://tracker.test".to_string());
        cfg.db_max_connections = 1;
        cfg.db_min_connections = 1;

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");
        tokio::fs::create_dir_all(cfg.drawings_dir())
            .await
            .expect("create drawings dir");

        let fixture = seed_fixture(&pool).await;
        let state = AppState::new(Arc::new(pool), cfg);
        let router = parts_tracker::app_router(state.clone());

        Self {
            router,
            state,
            fixture,
            _instance: instance,
        }
    }

    /// Logs in through the API and returns the bearer token.
    pub async fn login(&self, username: &str) -> String {
        let response = self
            .request(
                Method::POST,
                "/admin/login",
                Some(json!({ "username": username, "password": PASSWORD })),
                None,
            )
            .await;
        assert_eq!(response.status(), StatusCode::OK, "login as {username}");
        let body = read_json(response).await;
        body["token"]["access_token"]
            .as_str()
            .expect("token in login response")
            .to_string()
    }

    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        token: Option<&str>,
    ) -> Response {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(tok) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", tok));
        }

        let body = match body {
            Some(json) => {
                builder = builder.header(header::CONTENT_TYPE, "application/json");
                Body::from(serde_json::to_vec(&json).expect("serialize json request body"))
            }
            None => Body::empty(),
        };

        self.send(builder.body(body).expect("failed to build request"))
            .await
    }

    /// Sends one file as `multipart/form-data` under `field`.
    pub async fn upload(
        &self,
        uri: &str,
        field: &str,
        file_name: &str,
        content: &[u8],
        token: &str,
    ) -> Response {
        let mut body = format!(
            "--{b}\r\nContent-Disposition: form-data; name=\"{field}\"; filename=\"{file_name}\"\r\nContent-Type: application/octet-stream\r\n\r\n",
            b = MULTIPART_BOUNDARY
        )
        .into_bytes();
        body.extend_from_slice(content);
        body.extend_from_slice(format!("\r\n--{}--\r\n", MULTIPART_BOUNDARY).as_bytes());

        let request = Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header(header::AUTHORIZATION, format!("Bearer {}", token))
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={}", MULTIPART_BOUNDARY),
            )
            .body(Body::from(body))
            .expect("failed to build multipart request");
        self.send(request).await
    }

    pub async fn send(&self, request: Request<Body>) -> Response {
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during test request")
    }

    pub async fn find_part(&self, part_id: &str) -> Option<part::Model> {
        part::Entity::find_by_id(part_id.to_string())
            .one(&*self.state.db)
            .await
            .expect("query part")
    }

    /// Confirms `quantity` pieces of `stage_id` as operator "Тест".
    pub async fn confirm(&self, part_id: &str, stage_id: i32, quantity: i32) -> Response {
        self.request(
            Method::POST,
            &format!("/scan/{}/stages/{}", part_id, stage_id),
            Some(json!({ "operator_name": "Тест", "quantity": quantity })),
            None,
        )
        .await
    }
}

pub async fn read_bytes(response: Response) -> Vec<u8> {
    response
        .into_body()
        .collect()
        .await
        .expect("read response body")
        .to_bytes()
        .to_vec()
}

pub async fn read_json(response: Response) -> Value {
    let bytes = read_bytes(response).await;
    serde_json::from_slice(&bytes).expect("parse response body")
}

async fn role_id(pool: &db::DbPool, name: &str) -> i32 {
    role::Entity::find()
        .filter(role::Column::Name.eq(name))
        .one(pool)
        .await
        .expect("query role")
        .map(|r| r.id)
        .expect("preset role exists")
}

async fn insert_stage(pool: &db::DbPool, name: &str) -> i32 {
    stage::ActiveModel {
        name: Set(name.to_string()),
        ..Default::default()
    }
    .insert(pool)
    .await
    .expect("insert stage")
    .id
}

/// Roles, three users, four stages, the default route and one part on it.
async fn seed_fixture(pool: &db::DbPool) -> Fixture {
    insert_roles(pool).await.expect("insert roles");

    let mut user_ids = Vec::new();
    for (username, role_name) in [
        ("admin", ROLE_ADMINISTRATOR),
        ("manager", ROLE_MANAGER),
        ("operator", ROLE_OPERATOR),
    ] {
        let role = role_id(pool, role_name).await;
        let user = create_user(pool, username, PASSWORD, Some(role))
            .await
            .expect("create user");
        user_ids.push(user.id);
    }

    let cutting_stage = insert_stage(pool, "Резка").await;
    let drilling_stage = insert_stage(pool, "Сверловка").await;
    let spare_stages = [
        insert_stage(pool, "Test Stage 1").await,
        insert_stage(pool, "Test Stage 2").await,
    ];

    let route = route_template::ActiveModel {
        name: Set("Стандартный маршрут".to_string()),
        is_default: Set(true),
        ..Default::default()
    }
    .insert(pool)
    .await
    .expect("insert route");
    for (position, stage_id) in [cutting_stage, drilling_stage].into_iter().enumerate() {
        route_stage::ActiveModel {
            template_id: Set(route.id),
            stage_id: Set(stage_id),
            position: Set(position as i32),
            ..Default::default()
        }
        .insert(pool)
        .await
        .expect("insert route stage");
    }

    part::ActiveModel {
        part_id: Set(TEST_PART.to_string()),
        product_designation: Set(TEST_PRODUCT.to_string()),
        name: Set("Крышка".to_string()),
        material: Set("Ст3".to_string()),
        route_template_id: Set(Some(route.id)),
        ..Default::default()
    }
    .insert(pool)
    .await
    .expect("insert test part");

    Fixture {
        admin_id: user_ids[0],
        manager_id: user_ids[1],
        operator_id: user_ids[2],
        cutting_stage,
        drilling_stage,
        spare_stages,
        route_id: route.id,
    }
}
