/*!
 * # Users and roles
 *
 * Account administration. Roles carry a permission mask; one role is flagged as the default
 * and is given to users created without an explicit role.
 */

use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, ModelTrait,
    PaginatorTrait, QueryFilter, QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use validator::Validate;

use crate::auth::{hash_password, role_presets, AuthUser, Permission};
use crate::entities::{audit_log, part, part_note, responsible_history, role, user};
use crate::errors::ServiceError;
use crate::services::audit::{
    AuditEntry, ACTION_CREATE, ACTION_DELETE, ACTION_EDIT, CATEGORY_USER,
};

pub const LAST_ADMIN_MESSAGE: &str = "Нельзя удалить последнего администратора в системе.";
pub const LAST_ADMIN_DEMOTE_MESSAGE: &str =
    "Нельзя лишить прав последнего администратора в системе.";
pub const DELETE_SELF_MESSAGE: &str = "Вы не можете удалить свою учетную запись.";

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct NewUser {
    #[validate(length(min = 1, max = 64, message = "This field is required."))]
    pub username: String,
    #[validate(length(min = 1, max = 128, message = "This field is required."))]
    pub password: String,
    pub role_id: Option<i32>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct UserUpdate {
    #[validate(length(min = 1, max = 64, message = "This field is required."))]
    pub username: String,
    pub role_id: Option<i32>,
    /// Left empty to keep the current password
    #[validate(length(max = 128))]
    pub password: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct RoleInput {
    #[validate(length(min = 1, max = 64, message = "This field is required."))]
    pub name: String,
    /// Raw permission bits; undefined bits are dropped
    #[serde(default)]
    pub permissions: Vec<i32>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UserSummary {
    pub id: i32,
    pub username: String,
    pub role_id: Option<i32>,
    pub role: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RoleSummary {
    pub id: i32,
    pub name: String,
    pub is_default: bool,
    pub permissions: Permission,
    pub permission_names: Vec<&'static str>,
    pub user_count: u64,
}

/// Creates the built-in roles or resets their masks to the preset values.
#[instrument(skip(db))]
pub async fn insert_roles<C: ConnectionTrait>(db: &C) -> Result<(), ServiceError> {
    for preset in role_presets() {
        let existing = role::Entity::find()
            .filter(role::Column::Name.eq(preset.name))
            .one(db)
            .await
            .map_err(ServiceError::db_error)?;
        match existing {
            Some(found) => {
                let mut active: role::ActiveModel = found.into();
                active.permissions = Set(preset.permissions.bits());
                active.is_default = Set(preset.is_default);
                active.update(db).await.map_err(ServiceError::db_error)?;
            }
            None => {
                role::ActiveModel {
                    name: Set(preset.name.to_string()),
                    permissions: Set(preset.permissions.bits()),
                    is_default: Set(preset.is_default),
                    ..Default::default()
                }
                .insert(db)
                .await
                .map_err(ServiceError::db_error)?;
            }
        }
    }
    info!("Role presets written");
    Ok(())
}

/// Inserts a user with a hashed password; `role_id = None` selects the default role.
pub async fn create_user<C: ConnectionTrait>(
    db: &C,
    username: &str,
    password: &str,
    role_id: Option<i32>,
) -> Result<user::Model, ServiceError> {
    let role_id = match role_id {
        Some(id) => Some(id),
        None => default_role(db).await?.map(|r| r.id),
    };
    user::ActiveModel {
        username: Set(username.to_string()),
        password_hash: Set(hash_password(password)?),
        role_id: Set(role_id),
        ..Default::default()
    }
    .insert(db)
    .await
    .map_err(|e| {
        error!("Failed to create user {}: {}", username, e);
        ServiceError::db_error(e)
    })
}

async fn default_role<C: ConnectionTrait>(db: &C) -> Result<Option<role::Model>, ServiceError> {
    role::Entity::find()
        .filter(role::Column::IsDefault.eq(true))
        .one(db)
        .await
        .map_err(ServiceError::db_error)
}

#[derive(Clone)]
pub struct UserService {
    db: Arc<DatabaseConnection>,
}

impl UserService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    async fn find_user(&self, user_id: i32) -> Result<user::Model, ServiceError> {
        user::Entity::find_by_id(user_id)
            .one(&*self.db)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| ServiceError::NotFound(format!("Пользователь {} не найден", user_id)))
    }

    async fn find_role(&self, role_id: i32) -> Result<role::Model, ServiceError> {
        role::Entity::find_by_id(role_id)
            .one(&*self.db)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| ServiceError::NotFound(format!("Роль {} не найдена", role_id)))
    }

    async fn ensure_username_free(
        &self,
        username: &str,
        except: Option<i32>,
    ) -> Result<(), ServiceError> {
        let mut query = user::Entity::find().filter(user::Column::Username.eq(username));
        if let Some(id) = except {
            query = query.filter(user::Column::Id.ne(id));
        }
        let taken = query
            .count(&*self.db)
            .await
            .map_err(ServiceError::db_error)?;
        if taken > 0 {
            return Err(ServiceError::Conflict(format!(
                "Пользователь с именем '{}' уже существует.",
                username
            )));
        }
        Ok(())
    }

    async fn ensure_role_name_free(
        &self,
        name: &str,
        except: Option<i32>,
    ) -> Result<(), ServiceError> {
        let mut query = role::Entity::find().filter(role::Column::Name.eq(name));
        if let Some(id) = except {
            query = query.filter(role::Column::Id.ne(id));
        }
        let taken = query
            .count(&*self.db)
            .await
            .map_err(ServiceError::db_error)?;
        if taken > 0 {
            return Err(ServiceError::Conflict(format!(
                "Роль с названием '{}' уже существует.",
                name
            )));
        }
        Ok(())
    }

    async fn grants_admin(&self, role_id: Option<i32>) -> Result<bool, ServiceError> {
        match role_id {
            Some(role_id) => Ok(self.find_role(role_id).await?.has_permission(Permission::ADMIN)),
            None => Ok(false),
        }
    }

    /// Number of users whose role grants `ADMIN`, leaving out holders of `except_role`.
    async fn count_admins(&self, except_role: Option<i32>) -> Result<usize, ServiceError> {
        let admin_roles: Vec<i32> = role::Entity::find()
            .all(&*self.db)
            .await
            .map_err(ServiceError::db_error)?
            .into_iter()
            .filter(|r| r.has_permission(Permission::ADMIN) && Some(r.id) != except_role)
            .map(|r| r.id)
            .collect();
        if admin_roles.is_empty() {
            return Ok(0);
        }
        let count = user::Entity::find()
            .filter(user::Column::RoleId.is_in(admin_roles))
            .count(&*self.db)
            .await
            .map_err(ServiceError::db_error)?;
        Ok(count as usize)
    }

    // Users

    #[instrument(skip(self))]
    pub async fn list_users(&self) -> Result<Vec<UserSummary>, ServiceError> {
        let rows = user::Entity::find()
            .find_also_related(role::Entity)
            .order_by_asc(user::Column::Username)
            .all(&*self.db)
            .await
            .map_err(ServiceError::db_error)?;
        Ok(rows
            .into_iter()
            .map(|(u, r)| UserSummary {
                id: u.id,
                username: u.username,
                role_id: u.role_id,
                role: r.map(|r| r.name),
            })
            .collect())
    }

    #[instrument(skip(self, input, actor), fields(username = %input.username))]
    pub async fn add_user(
        &self,
        input: NewUser,
        actor: &AuthUser,
    ) -> Result<user::Model, ServiceError> {
        input.validate()?;
        let username = input.username.trim().to_string();
        self.ensure_username_free(&username, None).await?;
        if let Some(role_id) = input.role_id {
            self.find_role(role_id).await?;
        }

        let txn = self.db.begin().await.map_err(ServiceError::db_error)?;
        let created = create_user(&txn, &username, &input.password, input.role_id).await?;
        AuditEntry::new(actor.user_id, ACTION_CREATE, CATEGORY_USER)
            .details(format!("Создан пользователь '{}'", username))
            .record(&txn)
            .await?;
        txn.commit().await.map_err(ServiceError::db_error)?;

        info!(user_id = created.id, "User created");
        Ok(created)
    }

    #[instrument(skip(self, input, actor))]
    pub async fn edit_user(
        &self,
        user_id: i32,
        input: UserUpdate,
        actor: &AuthUser,
    ) -> Result<user::Model, ServiceError> {
        input.validate()?;
        let existing = self.find_user(user_id).await?;
        let username = input.username.trim().to_string();
        self.ensure_username_free(&username, Some(user_id)).await?;
        let role_id = match input.role_id {
            Some(role_id) => Some(self.find_role(role_id).await?.id),
            None => default_role(&*self.db).await?.map(|r| r.id),
        };
        if self.grants_admin(existing.role_id).await?
            && !self.grants_admin(role_id).await?
            && self.count_admins(None).await? <= 1
        {
            warn!(user_id, "Refusing to demote the last administrator");
            return Err(ServiceError::InvalidOperation(LAST_ADMIN_DEMOTE_MESSAGE.into()));
        }
        let new_hash = match input.password.as_deref().filter(|p| !p.is_empty()) {
            Some(password) => Some(hash_password(password)?),
            None => None,
        };

        let mut changes = Vec::new();
        if existing.username != username {
            changes.push(format!("имя: '{}' -> '{}'", existing.username, username));
        }
        if existing.role_id != role_id {
            changes.push("роль изменена".to_string());
        }
        if new_hash.is_some() {
            changes.push("пароль изменен".to_string());
        }

        let txn = self.db.begin().await.map_err(ServiceError::db_error)?;
        let mut active: user::ActiveModel = existing.into();
        active.username = Set(username.clone());
        active.role_id = Set(role_id);
        if let Some(hash) = new_hash {
            active.password_hash = Set(hash);
        }
        let updated = active.update(&txn).await.map_err(ServiceError::db_error)?;

        if !changes.is_empty() {
            AuditEntry::new(actor.user_id, ACTION_EDIT, CATEGORY_USER)
                .details(format!("Пользователь '{}': {}", username, changes.join(", ")))
                .record(&txn)
                .await?;
        }
        txn.commit().await.map_err(ServiceError::db_error)?;

        Ok(updated)
    }

    /// Deletes a user together with their notes and audit entries.
    #[instrument(skip(self, actor))]
    pub async fn delete_user(&self, user_id: i32, actor: &AuthUser) -> Result<(), ServiceError> {
        let existing = self.find_user(user_id).await?;
        if existing.id == actor.user_id {
            return Err(ServiceError::InvalidOperation(DELETE_SELF_MESSAGE.into()));
        }

        if self.grants_admin(existing.role_id).await? && self.count_admins(None).await? <= 1 {
            warn!(user_id, "Refusing to delete the last administrator");
            return Err(ServiceError::InvalidOperation(LAST_ADMIN_MESSAGE.into()));
        }

        let username = existing.username.clone();
        let txn = self.db.begin().await.map_err(ServiceError::db_error)?;
        part_note::Entity::delete_many()
            .filter(part_note::Column::UserId.eq(user_id))
            .exec(&txn)
            .await
            .map_err(ServiceError::db_error)?;
        audit_log::Entity::delete_many()
            .filter(audit_log::Column::UserId.eq(user_id))
            .exec(&txn)
            .await
            .map_err(ServiceError::db_error)?;
        part::Entity::update_many()
            .col_expr(part::Column::ResponsibleId, Expr::value(Option::<i32>::None))
            .filter(part::Column::ResponsibleId.eq(user_id))
            .exec(&txn)
            .await
            .map_err(ServiceError::db_error)?;
        responsible_history::Entity::update_many()
            .col_expr(
                responsible_history::Column::UserId,
                Expr::value(Option::<i32>::None),
            )
            .filter(responsible_history::Column::UserId.eq(user_id))
            .exec(&txn)
            .await
            .map_err(ServiceError::db_error)?;
        existing
            .delete(&txn)
            .await
            .map_err(ServiceError::db_error)?;

        AuditEntry::new(actor.user_id, ACTION_DELETE, CATEGORY_USER)
            .details(format!("Удален пользователь '{}'", username))
            .record(&txn)
            .await?;
        txn.commit().await.map_err(ServiceError::db_error)?;

        info!(user_id, "User deleted");
        Ok(())
    }

    // Roles

    #[instrument(skip(self))]
    pub async fn list_roles(&self) -> Result<Vec<RoleSummary>, ServiceError> {
        let roles = role::Entity::find()
            .order_by_asc(role::Column::Id)
            .all(&*self.db)
            .await
            .map_err(ServiceError::db_error)?;
        let mut counts: HashMap<i32, u64> = HashMap::new();
        for u in user::Entity::find()
            .all(&*self.db)
            .await
            .map_err(ServiceError::db_error)?
        {
            if let Some(role_id) = u.role_id {
                *counts.entry(role_id).or_default() += 1;
            }
        }

        Ok(roles
            .into_iter()
            .map(|r| {
                let permissions = Permission::from_bits(r.permissions);
                RoleSummary {
                    user_count: counts.get(&r.id).copied().unwrap_or(0),
                    id: r.id,
                    name: r.name,
                    is_default: r.is_default,
                    permission_names: permissions.names(),
                    permissions,
                }
            })
            .collect())
    }

    #[instrument(skip(self, input, actor), fields(name = %input.name))]
    pub async fn add_role(
        &self,
        input: RoleInput,
        actor: &AuthUser,
    ) -> Result<role::Model, ServiceError> {
        input.validate()?;
        let name = input.name.trim().to_string();
        self.ensure_role_name_free(&name, None).await?;
        let permissions = Permission::from_list(&input.permissions);

        let txn = self.db.begin().await.map_err(ServiceError::db_error)?;
        let created = role::ActiveModel {
            name: Set(name.clone()),
            permissions: Set(permissions.bits()),
            is_default: Set(false),
            ..Default::default()
        }
        .insert(&txn)
        .await
        .map_err(ServiceError::db_error)?;
        AuditEntry::new(actor.user_id, ACTION_CREATE, CATEGORY_USER)
            .details(format!("Создана роль '{}' ({})", name, permissions))
            .record(&txn)
            .await?;
        txn.commit().await.map_err(ServiceError::db_error)?;

        info!(role_id = created.id, "Role created");
        Ok(created)
    }

    #[instrument(skip(self, input, actor))]
    pub async fn edit_role(
        &self,
        role_id: i32,
        input: RoleInput,
        actor: &AuthUser,
    ) -> Result<role::Model, ServiceError> {
        input.validate()?;
        let existing = self.find_role(role_id).await?;
        let name = input.name.trim().to_string();
        self.ensure_role_name_free(&name, Some(role_id)).await?;
        let permissions = Permission::from_list(&input.permissions);

        let drops_admin = existing.has_permission(Permission::ADMIN)
            && !permissions.contains(Permission::ADMIN);
        if drops_admin && self.count_admins(Some(role_id)).await? == 0 {
            let holders = user::Entity::find()
                .filter(user::Column::RoleId.eq(role_id))
                .count(&*self.db)
                .await
                .map_err(ServiceError::db_error)?;
            if holders > 0 {
                warn!(role_id, "Refusing to strip ADMIN from the only administrator role");
                return Err(ServiceError::InvalidOperation(LAST_ADMIN_DEMOTE_MESSAGE.into()));
            }
        }

        let txn = self.db.begin().await.map_err(ServiceError::db_error)?;
        let mut active: role::ActiveModel = existing.into();
        active.name = Set(name.clone());
        active.permissions = Set(permissions.bits());
        let updated = active.update(&txn).await.map_err(ServiceError::db_error)?;
        AuditEntry::new(actor.user_id, ACTION_EDIT, CATEGORY_USER)
            .details(format!("Роль '{}' ({})", name, permissions))
            .record(&txn)
            .await?;
        txn.commit().await.map_err(ServiceError::db_error)?;

        Ok(updated)
    }

    #[instrument(skip(self, actor))]
    pub async fn delete_role(&self, role_id: i32, actor: &AuthUser) -> Result<(), ServiceError> {
        let existing = self.find_role(role_id).await?;
        let assigned = user::Entity::find()
            .filter(user::Column::RoleId.eq(role_id))
            .count(&*self.db)
            .await
            .map_err(ServiceError::db_error)?;
        if assigned > 0 {
            return Err(ServiceError::InvalidOperation(format!(
                "Нельзя удалить роль '{}', которая присвоена пользователям.",
                existing.name
            )));
        }

        let name = existing.name.clone();
        let txn = self.db.begin().await.map_err(ServiceError::db_error)?;
        existing
            .delete(&txn)
            .await
            .map_err(ServiceError::db_error)?;
        AuditEntry::new(actor.user_id, ACTION_DELETE, CATEGORY_USER)
            .details(format!("Удалена роль '{}'", name))
            .record(&txn)
            .await?;
        txn.commit().await.map_err(ServiceError::db_error)?;

        info!(role_id, "Role deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::ROLE_ADMINISTRATOR;
    use crate::db::establish_connection;
    use assert_matches::assert_matches;

    async fn setup() -> (UserService, Arc<DatabaseConnection>) {
        let db = Arc::new(establish_connection("sqlite::memory:").await.unwrap());
        crate::db::run_migrations(&db).await.unwrap();
        insert_roles(&*db).await.unwrap();
        (UserService::new(db.clone()), db)
    }

    fn actor(user: &user::Model) -> AuthUser {
        AuthUser {
            user_id: user.id,
            username: user.username.clone(),
            role: Some(ROLE_ADMINISTRATOR.into()),
            permissions: Permission::ALL,
            token_id: String::new(),
        }
    }

    async fn admin_role_id(db: &DatabaseConnection) -> i32 {
        role::Entity::find()
            .filter(role::Column::Name.eq(ROLE_ADMINISTRATOR))
            .one(db)
            .await
            .unwrap()
            .unwrap()
            .id
    }

    #[tokio::test]
    async fn insert_roles_is_idempotent() {
        let (service, db) = setup().await;
        insert_roles(&*db).await.unwrap();
        let roles = service.list_roles().await.unwrap();
        assert_eq!(roles.len(), 3);
        assert_eq!(roles.iter().filter(|r| r.is_default).count(), 1);
    }

    #[tokio::test]
    async fn new_users_get_the_default_role() {
        let (service, db) = setup().await;
        let admin = create_user(&*db, "admin", "password123", Some(admin_role_id(&db).await))
            .await
            .unwrap();
        let created = service
            .add_user(
                NewUser {
                    username: "user1".into(),
                    password: "password".into(),
                    role_id: None,
                },
                &actor(&admin),
            )
            .await
            .unwrap();
        let users = service.list_users().await.unwrap();
        let listed = users.iter().find(|u| u.id == created.id).unwrap();
        assert_eq!(listed.role.as_deref(), Some("Operator"));
    }

    #[tokio::test]
    async fn last_admin_and_self_are_protected() {
        let (service, db) = setup().await;
        let admin_role = admin_role_id(&db).await;
        let admin = create_user(&*db, "admin", "password123", Some(admin_role))
            .await
            .unwrap();
        let admin2 = create_user(&*db, "admin2", "password123", Some(admin_role))
            .await
            .unwrap();

        assert_matches!(
            service.delete_user(admin.id, &actor(&admin)).await,
            Err(ServiceError::InvalidOperation(msg)) if msg == DELETE_SELF_MESSAGE
        );
        service.delete_user(admin2.id, &actor(&admin)).await.unwrap();
        assert_matches!(
            service.delete_user(admin.id, &actor(&admin2)).await,
            Err(ServiceError::InvalidOperation(msg)) if msg == LAST_ADMIN_MESSAGE
        );
    }

    #[tokio::test]
    async fn edits_keep_an_administrator() {
        let (service, db) = setup().await;
        let admin_role = admin_role_id(&db).await;
        let admin = create_user(&*db, "admin", "password123", Some(admin_role))
            .await
            .unwrap();
        let clear_role = |username: &str| UserUpdate {
            username: username.into(),
            role_id: None,
            password: None,
        };

        assert_matches!(
            service.edit_user(admin.id, clear_role("admin"), &actor(&admin)).await,
            Err(ServiceError::InvalidOperation(msg)) if msg == LAST_ADMIN_DEMOTE_MESSAGE
        );
        let strip_admin = || RoleInput {
            name: ROLE_ADMINISTRATOR.into(),
            permissions: vec![Permission::ADD_PARTS.bits()],
        };
        assert_matches!(
            service.edit_role(admin_role, strip_admin(), &actor(&admin)).await,
            Err(ServiceError::InvalidOperation(msg)) if msg == LAST_ADMIN_DEMOTE_MESSAGE
        );

        // Clearing the role falls back to the default one instead of leaving it empty.
        let user1 = create_user(&*db, "user1", "password", Some(admin_role))
            .await
            .unwrap();
        let edited = service
            .edit_user(user1.id, clear_role("user1"), &actor(&admin))
            .await
            .unwrap();
        let default_id = default_role(&*db).await.unwrap().unwrap().id;
        assert_eq!(edited.role_id, Some(default_id));

        // A second administrator role makes the first one safe to change.
        let backup = service
            .add_role(
                RoleInput {
                    name: "Backup".into(),
                    permissions: vec![Permission::ADMIN.bits()],
                },
                &actor(&admin),
            )
            .await
            .unwrap();
        create_user(&*db, "admin2", "password123", Some(backup.id))
            .await
            .unwrap();
        let edited = service
            .edit_role(admin_role, strip_admin(), &actor(&admin))
            .await
            .unwrap();
        assert!(!edited.has_permission(Permission::ADMIN));
    }

    #[tokio::test]
    async fn assigned_roles_cannot_be_deleted() {
        let (service, db) = setup().await;
        let admin_role = admin_role_id(&db).await;
        let admin = create_user(&*db, "admin", "password123", Some(admin_role))
            .await
            .unwrap();
        assert_matches!(
            service.delete_role(admin_role, &actor(&admin)).await,
            Err(ServiceError::InvalidOperation(msg)) if msg.contains("которая присвоена пользователям")
        );

        let role = service
            .add_role(
                RoleInput {
                    name: "Role1".into(),
                    permissions: vec![Permission::ADD_PARTS.bits()],
                },
                &actor(&admin),
            )
            .await
            .unwrap();
        assert!(role.has_permission(Permission::ADD_PARTS));
        let renamed = service
            .edit_role(
                role.id,
                RoleInput {
                    name: "Role2".into(),
                    permissions: vec![],
                },
                &actor(&admin),
            )
            .await
            .unwrap();
        assert_eq!(renamed.name, "Role2");
        assert_eq!(renamed.permissions, 0);
        service.delete_role(role.id, &actor(&admin)).await.unwrap();
    }
}
