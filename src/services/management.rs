/*!
 * # Stages and routes
 *
 * Stage dictionary and route templates. A route is an ordered list of stages; exactly one
 * route may be flagged as the default, which new and imported parts receive.
 */

use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, ModelTrait,
    PaginatorTrait, QueryFilter, QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{error, info, instrument};
use validator::Validate;

use crate::auth::AuthUser;
use crate::entities::{part, route_stage, route_template, stage, status_history};
use crate::errors::ServiceError;
use crate::services::audit::{
    AuditEntry, ACTION_CREATE, ACTION_DELETE, ACTION_EDIT, CATEGORY_MANAGEMENT,
};
use crate::services::progression::RouteStep;

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct StageInput {
    #[validate(length(min = 1, max = 100, message = "This field is required."))]
    pub name: String,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct RouteInput {
    #[validate(length(min = 1, max = 100, message = "This field is required."))]
    pub name: String,
    /// Stage ids in route order
    #[serde(default)]
    pub stage_ids: Vec<i32>,
    #[serde(default)]
    pub is_default: bool,
}

/// Route template with its stages in order
#[derive(Debug, Clone, Serialize)]
pub struct RouteDetails {
    pub id: i32,
    pub name: String,
    pub is_default: bool,
    pub stages: Vec<stage::Model>,
}

/// Ordered stages of a route template.
pub async fn route_steps<C: ConnectionTrait>(
    db: &C,
    template_id: i32,
) -> Result<Vec<RouteStep>, ServiceError> {
    let rows = route_stage::Entity::find()
        .filter(route_stage::Column::TemplateId.eq(template_id))
        .order_by_asc(route_stage::Column::Position)
        .order_by_asc(route_stage::Column::Id)
        .find_also_related(stage::Entity)
        .all(db)
        .await
        .map_err(ServiceError::db_error)?;

    Ok(rows
        .into_iter()
        .filter_map(|(_, stage)| stage)
        .map(|stage| RouteStep {
            stage_id: stage.id,
            name: stage.name,
        })
        .collect())
}

/// The route template flagged as default, if any.
pub async fn default_route<C: ConnectionTrait>(
    db: &C,
) -> Result<Option<route_template::Model>, ServiceError> {
    route_template::Entity::find()
        .filter(route_template::Column::IsDefault.eq(true))
        .order_by_asc(route_template::Column::Id)
        .one(db)
        .await
        .map_err(ServiceError::db_error)
}

#[derive(Clone)]
pub struct ManagementService {
    db: Arc<DatabaseConnection>,
}

impl ManagementService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    // Stages

    #[instrument(skip(self))]
    pub async fn list_stages(&self) -> Result<Vec<stage::Model>, ServiceError> {
        stage::Entity::find()
            .order_by_asc(stage::Column::Name)
            .all(&*self.db)
            .await
            .map_err(ServiceError::db_error)
    }

    async fn find_stage(&self, stage_id: i32) -> Result<stage::Model, ServiceError> {
        stage::Entity::find_by_id(stage_id)
            .one(&*self.db)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| ServiceError::NotFound(format!("Этап {} не найден", stage_id)))
    }

    async fn ensure_stage_name_free(
        &self,
        name: &str,
        except_id: Option<i32>,
    ) -> Result<(), ServiceError> {
        let mut query = stage::Entity::find().filter(stage::Column::Name.eq(name));
        if let Some(id) = except_id {
            query = query.filter(stage::Column::Id.ne(id));
        }
        let taken = query
            .count(&*self.db)
            .await
            .map_err(ServiceError::db_error)?;
        if taken > 0 {
            return Err(ServiceError::Conflict(format!(
                "Этап с названием '{}' уже существует.",
                name
            )));
        }
        Ok(())
    }

    #[instrument(skip(self, actor))]
    pub async fn add_stage(
        &self,
        input: StageInput,
        actor: &AuthUser,
    ) -> Result<stage::Model, ServiceError> {
        input.validate()?;
        let name = input.name.trim().to_string();
        self.ensure_stage_name_free(&name, None).await?;

        let txn = self.db.begin().await.map_err(ServiceError::db_error)?;
        let created = stage::ActiveModel {
            name: Set(name.clone()),
            ..Default::default()
        }
        .insert(&txn)
        .await
        .map_err(|e| {
            error!("Failed to create stage: {}", e);
            ServiceError::db_error(e)
        })?;

        AuditEntry::new(actor.user_id, ACTION_CREATE, CATEGORY_MANAGEMENT)
            .details(format!("Добавлен этап '{}'", name))
            .record(&txn)
            .await?;
        txn.commit().await.map_err(ServiceError::db_error)?;

        info!(stage_id = created.id, "Stage created");
        Ok(created)
    }

    #[instrument(skip(self, actor))]
    pub async fn rename_stage(
        &self,
        stage_id: i32,
        input: StageInput,
        actor: &AuthUser,
    ) -> Result<stage::Model, ServiceError> {
        input.validate()?;
        let existing = self.find_stage(stage_id).await?;
        let name = input.name.trim().to_string();
        if existing.name == name {
            return Ok(existing);
        }
        self.ensure_stage_name_free(&name, Some(stage_id)).await?;

        let old_name = existing.name.clone();
        let txn = self.db.begin().await.map_err(ServiceError::db_error)?;
        let mut active: stage::ActiveModel = existing.into();
        active.name = Set(name.clone());
        let updated = active.update(&txn).await.map_err(ServiceError::db_error)?;

        // History rows and part statuses carry the stage name.
        let relabelled = status_history::Entity::update_many()
            .col_expr(status_history::Column::Status, Expr::value(name.clone()))
            .filter(status_history::Column::Status.eq(old_name.clone()))
            .exec(&txn)
            .await
            .map_err(ServiceError::db_error)?
            .rows_affected;
        part::Entity::update_many()
            .col_expr(part::Column::CurrentStatus, Expr::value(name.clone()))
            .filter(part::Column::CurrentStatus.eq(old_name.clone()))
            .exec(&txn)
            .await
            .map_err(ServiceError::db_error)?;

        AuditEntry::new(actor.user_id, ACTION_EDIT, CATEGORY_MANAGEMENT)
            .details(format!("Этап '{}' переименован в '{}'", old_name, name))
            .record(&txn)
            .await?;
        txn.commit().await.map_err(ServiceError::db_error)?;

        info!(stage_id, relabelled, "Stage renamed");
        Ok(updated)
    }

    #[instrument(skip(self, actor))]
    pub async fn delete_stage(&self, stage_id: i32, actor: &AuthUser) -> Result<(), ServiceError> {
        let existing = self.find_stage(stage_id).await?;

        let usages = route_stage::Entity::find()
            .filter(route_stage::Column::StageId.eq(stage_id))
            .count(&*self.db)
            .await
            .map_err(ServiceError::db_error)?;
        if usages > 0 {
            return Err(ServiceError::InvalidOperation(format!(
                "Нельзя удалить этап '{}', так как он используется в маршрутах.",
                existing.name
            )));
        }

        let name = existing.name.clone();
        let txn = self.db.begin().await.map_err(ServiceError::db_error)?;
        existing
            .delete(&txn)
            .await
            .map_err(ServiceError::db_error)?;
        AuditEntry::new(actor.user_id, ACTION_DELETE, CATEGORY_MANAGEMENT)
            .details(format!("Удален этап '{}'", name))
            .record(&txn)
            .await?;
        txn.commit().await.map_err(ServiceError::db_error)?;

        info!(stage_id, "Stage deleted");
        Ok(())
    }

    // Routes

    #[instrument(skip(self))]
    pub async fn list_routes(&self) -> Result<Vec<RouteDetails>, ServiceError> {
        let templates = route_template::Entity::find()
            .order_by_asc(route_template::Column::Name)
            .all(&*self.db)
            .await
            .map_err(ServiceError::db_error)?;

        let mut routes = Vec::with_capacity(templates.len());
        for template in templates {
            routes.push(self.details_for(template).await?);
        }
        Ok(routes)
    }

    pub async fn get_route(&self, route_id: i32) -> Result<RouteDetails, ServiceError> {
        let template = self.find_route(route_id).await?;
        self.details_for(template).await
    }

    async fn details_for(
        &self,
        template: route_template::Model,
    ) -> Result<RouteDetails, ServiceError> {
        let stages = route_steps(&*self.db, template.id)
            .await?
            .into_iter()
            .map(|step| stage::Model {
                id: step.stage_id,
                name: step.name,
            })
            .collect();

        Ok(RouteDetails {
            id: template.id,
            name: template.name,
            is_default: template.is_default,
            stages,
        })
    }

    async fn find_route(&self, route_id: i32) -> Result<route_template::Model, ServiceError> {
        route_template::Entity::find_by_id(route_id)
            .one(&*self.db)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| ServiceError::NotFound(format!("Маршрут {} не найден", route_id)))
    }

    async fn check_route_input(
        &self,
        input: &RouteInput,
        except_id: Option<i32>,
    ) -> Result<(), ServiceError> {
        input.validate()?;

        if input.stage_ids.is_empty() {
            return Err(ServiceError::ValidationError(
                "Маршрут должен содержать хотя бы один этап.".into(),
            ));
        }
        let unique: HashSet<i32> = input.stage_ids.iter().copied().collect();
        if unique.len() != input.stage_ids.len() {
            return Err(ServiceError::ValidationError(
                "Этап не может входить в маршрут дважды.".into(),
            ));
        }

        let known = stage::Entity::find()
            .filter(stage::Column::Id.is_in(input.stage_ids.clone()))
            .count(&*self.db)
            .await
            .map_err(ServiceError::db_error)?;
        if known as usize != input.stage_ids.len() {
            return Err(ServiceError::NotFound(
                "Один или несколько этапов не найдены".into(),
            ));
        }

        let mut same_name =
            route_template::Entity::find().filter(route_template::Column::Name.eq(input.name.trim()));
        if let Some(id) = except_id {
            same_name = same_name.filter(route_template::Column::Id.ne(id));
        }
        if same_name
            .count(&*self.db)
            .await
            .map_err(ServiceError::db_error)?
            > 0
        {
            return Err(ServiceError::Conflict(format!(
                "Маршрут с названием '{}' уже существует.",
                input.name.trim()
            )));
        }
        Ok(())
    }

    async fn write_route_stages<C: ConnectionTrait>(
        db: &C,
        template_id: i32,
        stage_ids: &[i32],
    ) -> Result<(), ServiceError> {
        route_stage::Entity::delete_many()
            .filter(route_stage::Column::TemplateId.eq(template_id))
            .exec(db)
            .await
            .map_err(ServiceError::db_error)?;

        for (position, stage_id) in stage_ids.iter().enumerate() {
            route_stage::ActiveModel {
                template_id: Set(template_id),
                stage_id: Set(*stage_id),
                position: Set(position as i32),
                ..Default::default()
            }
            .insert(db)
            .await
            .map_err(ServiceError::db_error)?;
        }
        Ok(())
    }

    async fn clear_default_flag<C: ConnectionTrait>(
        db: &C,
        except_id: i32,
    ) -> Result<(), ServiceError> {
        route_template::Entity::update_many()
            .col_expr(route_template::Column::IsDefault, Expr::value(false))
            .filter(route_template::Column::Id.ne(except_id))
            .exec(db)
            .await
            .map_err(ServiceError::db_error)?;
        Ok(())
    }

    #[instrument(skip(self, actor))]
    pub async fn add_route(
        &self,
        input: RouteInput,
        actor: &AuthUser,
    ) -> Result<RouteDetails, ServiceError> {
        self.check_route_input(&input, None).await?;
        let name = input.name.trim().to_string();

        let txn = self.db.begin().await.map_err(ServiceError::db_error)?;
        let template = route_template::ActiveModel {
            name: Set(name.clone()),
            is_default: Set(input.is_default),
            ..Default::default()
        }
        .insert(&txn)
        .await
        .map_err(|e| {
            error!("Failed to create route: {}", e);
            ServiceError::db_error(e)
        })?;

        Self::write_route_stages(&txn, template.id, &input.stage_ids).await?;
        if input.is_default {
            Self::clear_default_flag(&txn, template.id).await?;
        }
        AuditEntry::new(actor.user_id, ACTION_CREATE, CATEGORY_MANAGEMENT)
            .details(format!(
                "Добавлен маршрут '{}' ({} этапов)",
                name,
                input.stage_ids.len()
            ))
            .record(&txn)
            .await?;
        txn.commit().await.map_err(ServiceError::db_error)?;

        info!(route_id = template.id, "Route created");
        self.details_for(template).await
    }

    #[instrument(skip(self, actor))]
    pub async fn edit_route(
        &self,
        route_id: i32,
        input: RouteInput,
        actor: &AuthUser,
    ) -> Result<RouteDetails, ServiceError> {
        let existing = self.find_route(route_id).await?;
        self.check_route_input(&input, Some(route_id)).await?;
        let name = input.name.trim().to_string();

        let txn = self.db.begin().await.map_err(ServiceError::db_error)?;
        let mut active: route_template::ActiveModel = existing.into();
        active.name = Set(name.clone());
        if input.is_default {
            active.is_default = Set(true);
        }
        let updated = active.update(&txn).await.map_err(ServiceError::db_error)?;

        Self::write_route_stages(&txn, route_id, &input.stage_ids).await?;
        if input.is_default {
            Self::clear_default_flag(&txn, route_id).await?;
        }
        AuditEntry::new(actor.user_id, ACTION_EDIT, CATEGORY_MANAGEMENT)
            .details(format!("Изменен маршрут '{}'", name))
            .record(&txn)
            .await?;
        txn.commit().await.map_err(ServiceError::db_error)?;

        self.details_for(updated).await
    }

    #[instrument(skip(self, actor))]
    pub async fn delete_route(&self, route_id: i32, actor: &AuthUser) -> Result<(), ServiceError> {
        let existing = self.find_route(route_id).await?;

        let used_by = part::Entity::find()
            .filter(part::Column::RouteTemplateId.eq(route_id))
            .count(&*self.db)
            .await
            .map_err(ServiceError::db_error)?;
        if used_by > 0 {
            return Err(ServiceError::InvalidOperation(format!(
                "Нельзя удалить маршрут '{}', так как он используется деталями.",
                existing.name
            )));
        }

        let name = existing.name.clone();
        let txn = self.db.begin().await.map_err(ServiceError::db_error)?;
        route_stage::Entity::delete_many()
            .filter(route_stage::Column::TemplateId.eq(route_id))
            .exec(&txn)
            .await
            .map_err(ServiceError::db_error)?;
        existing
            .delete(&txn)
            .await
            .map_err(ServiceError::db_error)?;
        AuditEntry::new(actor.user_id, ACTION_DELETE, CATEGORY_MANAGEMENT)
            .details(format!("Удален маршрут '{}'", name))
            .record(&txn)
            .await?;
        txn.commit().await.map_err(ServiceError::db_error)?;

        info!(route_id, "Route deleted");
        Ok(())
    }

    /// Makes `route_id` the only default route.
    #[instrument(skip(self, actor))]
    pub async fn set_default_route(
        &self,
        route_id: i32,
        actor: &AuthUser,
    ) -> Result<RouteDetails, ServiceError> {
        let existing = self.find_route(route_id).await?;

        let txn = self.db.begin().await.map_err(ServiceError::db_error)?;
        Self::clear_default_flag(&txn, route_id).await?;
        let mut active: route_template::ActiveModel = existing.into();
        active.is_default = Set(true);
        let updated = active.update(&txn).await.map_err(ServiceError::db_error)?;
        AuditEntry::new(actor.user_id, ACTION_EDIT, CATEGORY_MANAGEMENT)
            .details(format!("Маршрут '{}' назначен маршрутом по умолчанию", updated.name))
            .record(&txn)
            .await?;
        txn.commit().await.map_err(ServiceError::db_error)?;

        self.details_for(updated).await
    }
}
