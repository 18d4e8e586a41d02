/*!
 * # Seeding
 *
 * Initial data for a fresh installation (`seed`) and a fixed fixture set for browser
 * end-to-end runs (`seed_cypress`). Both return the lines the CLI prints. A generated admin
 * password travels only in [`SeedReport::admin_password`] and never reaches the log.
 */

use rand::distributions::Alphanumeric;
use rand::Rng;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait,
    PaginatorTrait, QueryFilter, Set, TransactionTrait,
};
use tracing::info;

use crate::auth::{ROLE_ADMINISTRATOR, ROLE_MANAGER, ROLE_OPERATOR};
use crate::entities::{
    assembly_component, audit_log, part, part_note, responsible_history, role, route_stage,
    route_template, stage, status_history, user,
};
use crate::errors::ServiceError;
use crate::services::users::{create_user, insert_roles};

pub const ROLES_CREATED: &str = "Роли успешно созданы.";
pub const ADMIN_CREATED: &str = "Администратор успешно создан.";
pub const USERS_EXIST: &str = "Пользователи уже существуют. Пропуск создания администратора.";
pub const CYPRESS_READY: &str = "База данных готова для Cypress-тестов.";

const FIXTURE_PASSWORD: &str = "password123";
const GENERATED_PASSWORD_LEN: usize = 12;

/// Outcome of a seeding run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SeedReport {
    /// Progress lines, also written to the log
    pub lines: Vec<String>,
    /// Set when an administrator account was created
    pub admin_password: Option<String>,
}

impl SeedReport {
    fn say(&mut self, line: impl Into<String>) {
        let line = line.into();
        info!("{}", line);
        self.lines.push(line);
    }
}

pub fn generate_password() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(GENERATED_PASSWORD_LEN)
        .map(char::from)
        .collect()
}

async fn role_id<C: ConnectionTrait>(db: &C, name: &str) -> Result<Option<i32>, ServiceError> {
    Ok(role::Entity::find()
        .filter(role::Column::Name.eq(name))
        .one(db)
        .await
        .map_err(ServiceError::db_error)?
        .map(|r| r.id))
}

/// Creates roles when none exist and an `admin` account when no users exist.
///
/// In production the password is random; otherwise `default_admin_password` or the
/// development default is used.
pub async fn seed(
    db: &DatabaseConnection,
    production: bool,
    default_admin_password: Option<&str>,
) -> Result<SeedReport, ServiceError> {
    let mut report = SeedReport::default();

    if role::Entity::find()
        .count(db)
        .await
        .map_err(ServiceError::db_error)?
        == 0
    {
        report.say("Создание ролей пользователей...");
        insert_roles(db).await?;
        report.say(ROLES_CREATED);
    }

    let users = user::Entity::find()
        .count(db)
        .await
        .map_err(ServiceError::db_error)?;
    if users > 0 {
        report.say(USERS_EXIST);
        return Ok(report);
    }

    let password = if production {
        generate_password()
    } else {
        default_admin_password
            .filter(|p| !p.is_empty())
            .unwrap_or(FIXTURE_PASSWORD)
            .to_string()
    };
    let admin_role = role_id(db, ROLE_ADMINISTRATOR).await?;
    create_user(db, "admin", &password, admin_role).await?;

    report.say(ADMIN_CREATED);
    report.say("Логин: admin");
    report.admin_password = Some(password);
    Ok(report)
}

/// Wipes every table and inserts the end-to-end fixture set.
pub async fn seed_cypress(db: &DatabaseConnection) -> Result<SeedReport, ServiceError> {
    let mut report = SeedReport::default();
    let txn = db.begin().await.map_err(ServiceError::db_error)?;

    report.say("Очистка старых данных...");
    audit_log::Entity::delete_many()
        .exec(&txn)
        .await
        .map_err(ServiceError::db_error)?;
    part_note::Entity::delete_many()
        .exec(&txn)
        .await
        .map_err(ServiceError::db_error)?;
    responsible_history::Entity::delete_many()
        .exec(&txn)
        .await
        .map_err(ServiceError::db_error)?;
    status_history::Entity::delete_many()
        .exec(&txn)
        .await
        .map_err(ServiceError::db_error)?;
    assembly_component::Entity::delete_many()
        .exec(&txn)
        .await
        .map_err(ServiceError::db_error)?;
    part::Entity::delete_many()
        .exec(&txn)
        .await
        .map_err(ServiceError::db_error)?;
    route_stage::Entity::delete_many()
        .exec(&txn)
        .await
        .map_err(ServiceError::db_error)?;
    user::Entity::delete_many()
        .exec(&txn)
        .await
        .map_err(ServiceError::db_error)?;
    role::Entity::delete_many()
        .exec(&txn)
        .await
        .map_err(ServiceError::db_error)?;
    route_template::Entity::delete_many()
        .exec(&txn)
        .await
        .map_err(ServiceError::db_error)?;
    stage::Entity::delete_many()
        .exec(&txn)
        .await
        .map_err(ServiceError::db_error)?;

    report.say("Создание ролей и пользователей для тестов...");
    insert_roles(&txn).await?;
    for (username, role_name) in [
        ("admin", ROLE_ADMINISTRATOR),
        ("manager", ROLE_MANAGER),
        ("operator", ROLE_OPERATOR),
    ] {
        let role = role_id(&txn, role_name).await?;
        create_user(&txn, username, FIXTURE_PASSWORD, role).await?;
    }

    report.say("Создание тестовых этапов и маршрута...");
    let mut stage_ids = Vec::new();
    for name in ["Резка", "Сварка"] {
        let created = stage::ActiveModel {
            name: Set(name.to_string()),
            ..Default::default()
        }
        .insert(&txn)
        .await
        .map_err(ServiceError::db_error)?;
        stage_ids.push(created.id);
    }
    let route = route_template::ActiveModel {
        name: Set("Стандартный тестовый маршрут".to_string()),
        is_default: Set(true),
        ..Default::default()
    }
    .insert(&txn)
    .await
    .map_err(ServiceError::db_error)?;
    for (position, stage_id) in stage_ids.into_iter().enumerate() {
        route_stage::ActiveModel {
            template_id: Set(route.id),
            stage_id: Set(stage_id),
            position: Set(position as i32),
            ..Default::default()
        }
        .insert(&txn)
        .await
        .map_err(ServiceError::db_error)?;
    }

    report.say("Создание тестовых деталей...");
    for (part_id, product, name, material) in [
        ("CY-TEST-001", "Тестовое изделие", "Тестовая деталь", "Ст3"),
        ("OTHER-PART-002", "Другое изделие", "Другая деталь", "Алюминий"),
    ] {
        part::ActiveModel {
            part_id: Set(part_id.to_string()),
            product_designation: Set(product.to_string()),
            name: Set(name.to_string()),
            material: Set(material.to_string()),
            route_template_id: Set(Some(route.id)),
            ..Default::default()
        }
        .insert(&txn)
        .await
        .map_err(ServiceError::db_error)?;
    }

    txn.commit().await.map_err(ServiceError::db_error)?;
    report.say(CYPRESS_READY);
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{establish_connection, run_migrations};

    async fn database() -> DatabaseConnection {
        let db = establish_connection("sqlite::memory:").await.unwrap();
        run_migrations(&db).await.unwrap();
        db
    }

    #[test]
    fn generated_passwords_are_alphanumeric() {
        let password = generate_password();
        assert_eq!(password.len(), GENERATED_PASSWORD_LEN);
        assert!(password.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[tokio::test]
    async fn seed_creates_admin_once() {
        let db = database().await;

        let first = seed(&db, false, None).await.unwrap();
        assert!(first.lines.iter().any(|l| l == ROLES_CREATED));
        assert!(first.lines.iter().any(|l| l == ADMIN_CREATED));
        assert!(first.lines.iter().all(|l| !l.contains("password123")));
        assert_eq!(first.admin_password.as_deref(), Some("password123"));

        let second = seed(&db, false, None).await.unwrap();
        assert_eq!(second.lines, vec![USERS_EXIST.to_string()]);
        assert!(second.admin_password.is_none());
    }

    #[tokio::test]
    async fn production_seed_generates_a_password() {
        let db = database().await;
        let report = seed(&db, true, Some("ignored")).await.unwrap();
        let password = report.admin_password.unwrap();
        assert_ne!(password, "ignored");
        assert_eq!(password.len(), GENERATED_PASSWORD_LEN);
    }

    #[tokio::test]
    async fn cypress_fixture_replaces_existing_data() {
        let db = database().await;
        seed(&db, false, None).await.unwrap();

        let report = seed_cypress(&db).await.unwrap();
        assert_eq!(report.lines.last().map(String::as_str), Some(CYPRESS_READY));
        assert_eq!(user::Entity::find().count(&db).await.unwrap(), 3);
        assert_eq!(part::Entity::find().count(&db).await.unwrap(), 2);
        let route = route_template::Entity::find()
            .filter(route_template::Column::IsDefault.eq(true))
            .one(&db)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(route.name, "Стандартный тестовый маршрут");

        // Running it again yields the same fixture.
        seed_cypress(&db).await.unwrap();
        assert_eq!(user::Entity::find().count(&db).await.unwrap(), 3);
    }
}
