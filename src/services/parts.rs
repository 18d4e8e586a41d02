/*!
 * # Part service
 *
 * Part lifecycle: creation (single parts and assembly children), editing, route and
 * responsible changes, deletion, stage confirmation and cancellation, QR previews, drawing
 * uploads and file imports.
 *
 * Quantity totals on a part are always derived from its status history through
 * [`Progression`]; stage confirmation and cancellation recompute them inside the same
 * transaction that writes the history row.
 */

use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, ConnectionTrait, DatabaseConnection, EntityTrait,
    ModelTrait, QueryFilter, QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use validator::Validate;

use crate::auth::AuthUser;
use crate::entities::part::IN_STOCK_STATUS;
use crate::entities::{
    assembly_component, part, part_note, responsible_history, route_template,
    status_history, user, StatusType,
};
use crate::errors::ServiceError;
use crate::events::{EventBroadcaster, TrackerEvent};
use crate::services::audit::{
    AuditEntry, ACTION_CREATE, ACTION_DELETE, ACTION_EDIT, ACTION_IMPORT,
    ACTION_RESPONSIBLE_CHANGED, ACTION_ROUTE_CHANGED, ACTION_STAGE_CANCELLED,
    ACTION_STAGE_CONFIRMED, CATEGORY_PART, CATEGORY_STATUS,
};
use crate::services::drawings::DrawingStore;
use crate::services::import::{self, ImportSummary};
use crate::services::management::{default_route, route_steps};
use crate::services::progression::{Progression, StageEvent};
use crate::utils::{scan_url, to_safe_key};

pub const NO_ROUTE_MESSAGE: &str = "Этой детали не присвоен технологический маршрут";
pub const NOTHING_SELECTED_MESSAGE: &str = "Вы не выбрали ни одной детали.";
pub const NOTHING_TO_PRINT_MESSAGE: &str = "Вы не выбрали ни одной детали для печати.";

fn default_quantity() -> i32 {
    1
}

/// Input for a new top-level part
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct NewPart {
    #[validate(length(min = 1, max = 100, message = "This field is required."))]
    pub part_id: String,
    #[validate(length(min = 1, max = 150, message = "This field is required."))]
    pub product_designation: String,
    #[validate(length(min = 1, max = 150, message = "This field is required."))]
    pub name: String,
    #[validate(length(min = 1, max = 150, message = "This field is required."))]
    pub material: String,
    #[validate(length(max = 100))]
    pub size: Option<String>,
    pub route_template_id: Option<i32>,
    #[serde(default = "default_quantity")]
    #[validate(range(min = 1, max = 100000))]
    pub quantity_total: i32,
}

/// Input for a component added under an existing assembly
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct NewChildPart {
    #[validate(length(min = 1, max = 100, message = "This field is required."))]
    pub part_id: String,
    #[validate(length(min = 1, max = 150, message = "This field is required."))]
    pub name: String,
    #[validate(length(min = 1, max = 150, message = "This field is required."))]
    pub material: String,
    #[validate(length(max = 100))]
    pub size: Option<String>,
    pub route_template_id: Option<i32>,
    #[serde(default = "default_quantity")]
    #[validate(range(min = 1, max = 100000))]
    pub quantity_total: i32,
    /// Pieces of this component per assembly
    #[serde(default = "default_quantity")]
    #[validate(range(min = 1, max = 100000))]
    pub assembly_quantity: i32,
}

impl NewPart {
    /// Trims text fields so blank values fail validation.
    fn trimmed(mut self) -> Self {
        self.part_id = self.part_id.trim().to_string();
        self.product_designation = self.product_designation.trim().to_string();
        self.name = self.name.trim().to_string();
        self.material = self.material.trim().to_string();
        self
    }
}

impl NewChildPart {
    fn trimmed(mut self) -> Self {
        self.part_id = self.part_id.trim().to_string();
        self.name = self.name.trim().to_string();
        self.material = self.material.trim().to_string();
        self
    }
}

#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct PartUpdate {
    #[validate(length(min = 1, max = 150))]
    pub product_designation: Option<String>,
    #[validate(length(min = 1, max = 150))]
    pub name: Option<String>,
    #[validate(length(min = 1, max = 150))]
    pub material: Option<String>,
    #[validate(length(max = 100))]
    pub size: Option<String>,
    #[validate(range(min = 1, max = 100000))]
    pub quantity_total: Option<i32>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct StageConfirmation {
    #[serde(default)]
    #[validate(length(max = 100))]
    pub operator_name: String,
    #[serde(default = "default_quantity")]
    pub quantity: i32,
    #[serde(default)]
    pub status_type: StatusType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BulkAction {
    Delete,
}

/// Result of a recorded stage event
#[derive(Debug, Clone, Serialize)]
pub struct ConfirmedStage {
    pub part: part::Model,
    pub history: status_history::Model,
    pub progression: Progression,
}

#[derive(Debug, Clone, Serialize)]
pub struct QrLabel {
    pub part_id: String,
    pub name: String,
    pub product_designation: String,
    pub scan_url: String,
}

#[derive(Clone)]
pub struct PartService {
    db: Arc<DatabaseConnection>,
    events: EventBroadcaster,
    drawings: DrawingStore,
    public_base_url: String,
}

impl PartService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        events: EventBroadcaster,
        drawings: DrawingStore,
        public_base_url: String,
    ) -> Self {
        Self {
            db,
            events,
            drawings,
            public_base_url,
        }
    }

    pub fn drawings(&self) -> &DrawingStore {
        &self.drawings
    }

    #[instrument(skip(self))]
    pub async fn get_part(&self, part_id: &str) -> Result<part::Model, ServiceError> {
        find_part(&*self.db, part_id).await
    }

    async fn resolve_route<C: ConnectionTrait>(
        db: &C,
        requested: Option<i32>,
    ) -> Result<Option<i32>, ServiceError> {
        match requested {
            Some(route_id) => route_template::Entity::find_by_id(route_id)
                .one(db)
                .await
                .map_err(ServiceError::db_error)?
                .map(|route| Some(route.id))
                .ok_or_else(|| ServiceError::NotFound(format!("Маршрут {} не найден", route_id))),
            None => Ok(default_route(db).await?.map(|route| route.id)),
        }
    }

    fn publish_created(&self, part: &part::Model) {
        self.events.publish(TrackerEvent::PartCreated {
            part_id: part.part_id.clone(),
            product_designation: part.product_designation.clone(),
            safe_key: to_safe_key(&part.product_designation),
        });
    }

    #[instrument(skip(self, actor), fields(part_id = %input.part_id))]
    pub async fn create_single_part(
        &self,
        input: NewPart,
        actor: &AuthUser,
    ) -> Result<part::Model, ServiceError> {
        let input = input.trimmed();
        input.validate()?;
        let part_id = input.part_id.clone();

        let txn = self.db.begin().await.map_err(ServiceError::db_error)?;
        if part::Entity::find_by_id(part_id.clone())
            .one(&txn)
            .await
            .map_err(ServiceError::db_error)?
            .is_some()
        {
            return Err(ServiceError::Conflict(format!(
                "Деталь {} уже существует!",
                part_id
            )));
        }

        let route_id = Self::resolve_route(&txn, input.route_template_id).await?;
        let created = part::ActiveModel {
            part_id: Set(part_id.clone()),
            product_designation: Set(input.product_designation.clone()),
            name: Set(input.name.clone()),
            material: Set(input.material.clone()),
            size: Set(clean_optional(input.size)),
            quantity_total: Set(input.quantity_total),
            route_template_id: Set(route_id),
            ..Default::default()
        }
        .insert(&txn)
        .await
        .map_err(|e| {
            error!("Failed to create part: {}", e);
            ServiceError::db_error(e)
        })?;

        AuditEntry::new(actor.user_id, ACTION_CREATE, CATEGORY_PART)
            .part(&created.part_id)
            .details(format!(
                "Деталь '{}' добавлена в изделие '{}'",
                created.name, created.product_designation
            ))
            .record(&txn)
            .await?;
        txn.commit().await.map_err(ServiceError::db_error)?;

        info!("Part created");
        self.publish_created(&created);
        Ok(created)
    }

    #[instrument(skip(self, actor), fields(child_id = %input.part_id))]
    pub async fn add_child_part(
        &self,
        parent_id: &str,
        input: NewChildPart,
        actor: &AuthUser,
    ) -> Result<part::Model, ServiceError> {
        let input = input.trimmed();
        input.validate()?;
        let child_id = input.part_id.clone();

        let txn = self.db.begin().await.map_err(ServiceError::db_error)?;
        let parent = find_part(&txn, parent_id).await?;
        if part::Entity::find_by_id(child_id.clone())
            .one(&txn)
            .await
            .map_err(ServiceError::db_error)?
            .is_some()
        {
            return Err(ServiceError::Conflict(format!(
                "Деталь с артикулом '{}' уже существует!",
                child_id
            )));
        }

        let route_id = match input.route_template_id {
            Some(_) => Self::resolve_route(&txn, input.route_template_id).await?,
            None => match parent.route_template_id {
                Some(route_id) => Some(route_id),
                None => Self::resolve_route(&txn, None).await?,
            },
        };

        let child = part::ActiveModel {
            part_id: Set(child_id.clone()),
            product_designation: Set(parent.product_designation.clone()),
            name: Set(input.name.clone()),
            material: Set(input.material.clone()),
            size: Set(clean_optional(input.size)),
            quantity_total: Set(input.quantity_total),
            route_template_id: Set(route_id),
            ..Default::default()
        }
        .insert(&txn)
        .await
        .map_err(ServiceError::db_error)?;

        assembly_component::ActiveModel {
            parent_id: Set(parent.part_id.clone()),
            child_id: Set(child.part_id.clone()),
            quantity: Set(input.assembly_quantity),
            ..Default::default()
        }
        .insert(&txn)
        .await
        .map_err(ServiceError::db_error)?;

        AuditEntry::new(actor.user_id, ACTION_CREATE, CATEGORY_PART)
            .part(&child.part_id)
            .details(format!(
                "Узел '{}' добавлен в сборку '{}' ({} шт.)",
                child.name, parent.part_id, input.assembly_quantity
            ))
            .record(&txn)
            .await?;
        txn.commit().await.map_err(ServiceError::db_error)?;

        info!(parent_id, "Child part created");
        self.publish_created(&child);
        Ok(child)
    }

    #[instrument(skip(self, actor))]
    pub async fn edit_part(
        &self,
        part_id: &str,
        update: PartUpdate,
        actor: &AuthUser,
    ) -> Result<part::Model, ServiceError> {
        update.validate()?;

        let txn = self.db.begin().await.map_err(ServiceError::db_error)?;
        let existing = find_part(&txn, part_id).await?;
        let mut changes = Vec::new();
        let mut active: part::ActiveModel = existing.clone().into();

        if let Some(value) = trimmed(update.product_designation) {
            if value != existing.product_designation {
                changes.push(format!(
                    "Изделие: '{}' → '{}'",
                    existing.product_designation, value
                ));
                active.product_designation = Set(value);
            }
        }
        if let Some(value) = trimmed(update.name) {
            if value != existing.name {
                changes.push(format!("Наименование: '{}' → '{}'", existing.name, value));
                active.name = Set(value);
            }
        }
        if let Some(value) = trimmed(update.material) {
            if value != existing.material {
                changes.push(format!("Материал: '{}' → '{}'", existing.material, value));
                active.material = Set(value);
            }
        }
        if let Some(raw) = update.size {
            let value = clean_optional(Some(raw));
            if value != existing.size {
                changes.push(format!(
                    "Размер: '{}' → '{}'",
                    existing.size.as_deref().unwrap_or("-"),
                    value.as_deref().unwrap_or("-")
                ));
                active.size = Set(value);
            }
        }
        if let Some(total) = update.quantity_total {
            if total != existing.quantity_total {
                ensure_total_covers_history(&txn, &existing, total).await?;
                changes.push(format!(
                    "Количество: {} → {}",
                    existing.quantity_total, total
                ));
                active.quantity_total = Set(total);
            }
        }

        if changes.is_empty() {
            return Ok(existing);
        }

        let updated = active.update(&txn).await.map_err(ServiceError::db_error)?;
        AuditEntry::new(actor.user_id, ACTION_EDIT, CATEGORY_PART)
            .part(&updated.part_id)
            .details(changes.join("; "))
            .record(&txn)
            .await?;
        txn.commit().await.map_err(ServiceError::db_error)?;

        info!(changes = changes.len(), "Part updated");
        Ok(updated)
    }

    #[instrument(skip(self, actor))]
    pub async fn delete_single_part(
        &self,
        part_id: &str,
        actor: &AuthUser,
    ) -> Result<(), ServiceError> {
        let txn = self.db.begin().await.map_err(ServiceError::db_error)?;
        let existing = find_part(&txn, part_id).await?;
        let drawing = existing.drawing_filename.clone();
        let details = format!(
            "Деталь '{}' ({}) удалена из изделия '{}'",
            existing.name, existing.part_id, existing.product_designation
        );

        delete_dependents(&txn, part_id).await?;
        existing
            .delete(&txn)
            .await
            .map_err(ServiceError::db_error)?;
        AuditEntry::new(actor.user_id, ACTION_DELETE, CATEGORY_PART)
            .part(part_id)
            .details(details)
            .record(&txn)
            .await?;
        txn.commit().await.map_err(ServiceError::db_error)?;

        if let Some(file_name) = drawing {
            if let Err(e) = self.drawings.remove(&file_name).await {
                warn!(file = %file_name, "Failed to remove drawing of deleted part: {}", e);
            }
        }

        info!("Part deleted");
        Ok(())
    }

    /// Applies `action` to every selected part; returns how many parts it touched.
    #[instrument(skip(self, actor))]
    pub async fn bulk_action(
        &self,
        action: BulkAction,
        part_ids: &[String],
        actor: &AuthUser,
    ) -> Result<usize, ServiceError> {
        if part_ids.is_empty() {
            return Err(ServiceError::InvalidInput(NOTHING_SELECTED_MESSAGE.into()));
        }

        let mut affected = 0;
        match action {
            BulkAction::Delete => {
                for part_id in part_ids {
                    match self.delete_single_part(part_id, actor).await {
                        Ok(()) => affected += 1,
                        Err(ServiceError::NotFound(_)) => {
                            warn!(part_id = %part_id, "Skipping missing part in bulk delete")
                        }
                        Err(e) => return Err(e),
                    }
                }
            }
        }

        info!(affected, "Bulk action applied");
        Ok(affected)
    }

    /// Returns `false` when the part already follows `route_id`.
    #[instrument(skip(self, actor))]
    pub async fn change_part_route(
        &self,
        part_id: &str,
        route_id: i32,
        actor: &AuthUser,
    ) -> Result<bool, ServiceError> {
        let txn = self.db.begin().await.map_err(ServiceError::db_error)?;
        let existing = find_part(&txn, part_id).await?;
        if existing.route_template_id == Some(route_id) {
            return Ok(false);
        }

        let route = route_template::Entity::find_by_id(route_id)
            .one(&txn)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| ServiceError::NotFound(format!("Маршрут {} не найден", route_id)))?;

        let mut active: part::ActiveModel = existing.into();
        active.route_template_id = Set(Some(route.id));
        active.update(&txn).await.map_err(ServiceError::db_error)?;

        AuditEntry::new(actor.user_id, ACTION_ROUTE_CHANGED, CATEGORY_PART)
            .part(part_id)
            .details(format!("Назначен маршрут '{}'", route.name))
            .record(&txn)
            .await?;
        txn.commit().await.map_err(ServiceError::db_error)?;

        info!(route_id, "Part route changed");
        Ok(true)
    }

    #[instrument(skip(self, actor))]
    pub async fn change_responsible(
        &self,
        part_id: &str,
        user_id: Option<i32>,
        actor: &AuthUser,
    ) -> Result<part::Model, ServiceError> {
        let txn = self.db.begin().await.map_err(ServiceError::db_error)?;
        let existing = find_part(&txn, part_id).await?;

        let responsible = match user_id {
            Some(id) => Some(
                user::Entity::find_by_id(id)
                    .one(&txn)
                    .await
                    .map_err(ServiceError::db_error)?
                    .ok_or_else(|| {
                        ServiceError::NotFound(format!("Пользователь {} не найден", id))
                    })?,
            ),
            None => None,
        };

        let mut active: part::ActiveModel = existing.into();
        active.responsible_id = Set(responsible.as_ref().map(|u| u.id));
        let updated = active.update(&txn).await.map_err(ServiceError::db_error)?;

        responsible_history::ActiveModel {
            part_id: Set(part_id.to_string()),
            user_id: Set(responsible.as_ref().map(|u| u.id)),
            timestamp: Set(Utc::now()),
            ..Default::default()
        }
        .insert(&txn)
        .await
        .map_err(ServiceError::db_error)?;

        let details = match &responsible {
            Some(user) => format!("Ответственный: {}", user.username),
            None => "Ответственный снят".to_string(),
        };
        AuditEntry::new(actor.user_id, ACTION_RESPONSIBLE_CHANGED, CATEGORY_PART)
            .part(part_id)
            .details(details)
            .record(&txn)
            .await?;
        txn.commit().await.map_err(ServiceError::db_error)?;

        Ok(updated)
    }

    /// Records a completion, scrap or rework of `stage_id` and recomputes the part totals.
    #[instrument(skip(self, input, actor))]
    pub async fn confirm_stage(
        &self,
        part_id: &str,
        stage_id: i32,
        input: StageConfirmation,
        actor: Option<&AuthUser>,
    ) -> Result<ConfirmedStage, ServiceError> {
        input.validate()?;
        let operator_name = match (input.operator_name.trim(), actor) {
            ("", Some(user)) => user.username.clone(),
            ("", None) => {
                return Err(ServiceError::ValidationError(
                    "Ошибка: This field is required.".into(),
                ))
            }
            (name, _) => name.to_string(),
        };

        let txn = self.db.begin().await.map_err(ServiceError::db_error)?;
        let existing = find_part(&txn, part_id).await?;
        let route_id = existing
            .route_template_id
            .ok_or_else(|| ServiceError::InvalidOperation(NO_ROUTE_MESSAGE.into()))?;

        let route = route_steps(&txn, route_id).await?;
        let mut history = load_stage_events(&txn, part_id).await?;
        let before = Progression::compute(existing.quantity_total, &route, &history);
        let stage_name = before
            .validate(stage_id, input.quantity, input.status_type)?
            .name
            .clone();

        let recorded = status_history::ActiveModel {
            part_id: Set(part_id.to_string()),
            status: Set(stage_name.clone()),
            operator_name: Set(operator_name.clone()),
            quantity: Set(input.quantity),
            status_type: Set(input.status_type),
            ..Default::default()
        }
        .insert(&txn)
        .await
        .map_err(|e| {
            error!("Failed to record stage event: {}", e);
            ServiceError::db_error(e)
        })?;

        history.push(StageEvent::from(&recorded));
        let progression = Progression::compute(existing.quantity_total, &route, &history);

        let mut active: part::ActiveModel = existing.into();
        active.quantity_completed = Set(progression.quantity_completed());
        active.quantity_scrapped = Set(progression.quantity_scrapped());
        active.current_status = Set(stage_name.clone());
        let updated = active.update(&txn).await.map_err(ServiceError::db_error)?;

        if let Some(user) = actor {
            AuditEntry::new(user.user_id, ACTION_STAGE_CONFIRMED, CATEGORY_STATUS)
                .part(part_id)
                .details(format!(
                    "Этап '{}': {} {} шт. (оператор: {})",
                    stage_name,
                    status_label(input.status_type),
                    input.quantity,
                    operator_name
                ))
                .record(&txn)
                .await?;
        }
        txn.commit().await.map_err(ServiceError::db_error)?;

        info!(stage = %stage_name, quantity = input.quantity, "Stage confirmed");
        self.events.publish(TrackerEvent::StageConfirmed {
            part_id: updated.part_id.clone(),
            product_designation: updated.product_designation.clone(),
            safe_key: to_safe_key(&updated.product_designation),
            stage: stage_name,
            quantity: input.quantity,
            quantity_completed: updated.quantity_completed,
            quantity_total: updated.quantity_total,
        });

        Ok(ConfirmedStage {
            part: updated,
            history: recorded,
            progression,
        })
    }

    /// Removes one status-history row and rolls the part totals back.
    #[instrument(skip(self, actor))]
    pub async fn cancel_stage_by_history_id(
        &self,
        history_id: i32,
        actor: &AuthUser,
    ) -> Result<part::Model, ServiceError> {
        let txn = self.db.begin().await.map_err(ServiceError::db_error)?;
        let entry = status_history::Entity::find_by_id(history_id)
            .one(&txn)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Запись истории {} не найдена", history_id))
            })?;
        let existing = find_part(&txn, &entry.part_id).await?;

        let remaining: Vec<status_history::Model> = status_history::Entity::find()
            .filter(status_history::Column::PartId.eq(entry.part_id.clone()))
            .filter(status_history::Column::Id.ne(history_id))
            .order_by_asc(status_history::Column::Timestamp)
            .order_by_asc(status_history::Column::Id)
            .all(&txn)
            .await
            .map_err(ServiceError::db_error)?;

        let mut active: part::ActiveModel = existing.clone().into();
        if let Some(route_id) = existing.route_template_id {
            let route = route_steps(&txn, route_id).await?;
            let events: Vec<StageEvent> = remaining.iter().map(StageEvent::from).collect();
            let progression = Progression::compute(existing.quantity_total, &route, &events);
            if !progression.is_consistent() {
                return Err(ServiceError::InvalidOperation(format!(
                    "Нельзя отменить этап '{}': детали уже переданы на следующие этапы.",
                    entry.status
                )));
            }
            active.quantity_completed = Set(progression.quantity_completed());
            active.quantity_scrapped = Set(progression.quantity_scrapped());
        }
        active.current_status = Set(remaining
            .last()
            .map(|row| row.status.clone())
            .unwrap_or_else(|| IN_STOCK_STATUS.to_string()));

        let details = format!(
            "Отменена запись '{}' ({} {} шт., оператор: {})",
            entry.status,
            status_label(entry.status_type),
            entry.quantity,
            entry.operator_name
        );
        entry
            .delete(&txn)
            .await
            .map_err(ServiceError::db_error)?;
        let updated = active.update(&txn).await.map_err(ServiceError::db_error)?;

        AuditEntry::new(actor.user_id, ACTION_STAGE_CANCELLED, CATEGORY_STATUS)
            .part(&updated.part_id)
            .details(details)
            .record(&txn)
            .await?;
        txn.commit().await.map_err(ServiceError::db_error)?;

        info!(history_id, "Stage event cancelled");
        Ok(updated)
    }

    /// Labels for the selected parts, each carrying its scan link.
    #[instrument(skip(self))]
    pub async fn qr_print_preview(&self, part_ids: &[String]) -> Result<Vec<QrLabel>, ServiceError> {
        if part_ids.is_empty() {
            return Err(ServiceError::InvalidInput(NOTHING_TO_PRINT_MESSAGE.into()));
        }

        let parts = part::Entity::find()
            .filter(part::Column::PartId.is_in(part_ids.to_vec()))
            .order_by_asc(part::Column::PartId)
            .all(&*self.db)
            .await
            .map_err(ServiceError::db_error)?;

        parts
            .into_iter()
            .map(|p| -> Result<QrLabel, ServiceError> {
                Ok(QrLabel {
                    scan_url: scan_url(&self.public_base_url, &p.part_id)?,
                    part_id: p.part_id,
                    name: p.name,
                    product_designation: p.product_designation,
                })
            })
            .collect()
    }

    /// Stores an uploaded drawing and links it to the part, replacing any previous file.
    #[instrument(skip(self, content, actor))]
    pub async fn attach_drawing(
        &self,
        part_id: &str,
        original_name: &str,
        content: &[u8],
        actor: &AuthUser,
    ) -> Result<part::Model, ServiceError> {
        if content.is_empty() {
            return Err(ServiceError::InvalidInput("Файл чертежа пуст".into()));
        }
        let existing = self.get_part(part_id).await?;
        let previous = existing.drawing_filename.clone();
        let stored = self.drawings.save(part_id, original_name, content).await?;

        let txn = self.db.begin().await.map_err(ServiceError::db_error)?;
        let mut active: part::ActiveModel = existing.into();
        active.drawing_filename = Set(Some(stored.clone()));
        let updated = active.update(&txn).await.map_err(ServiceError::db_error)?;
        AuditEntry::new(actor.user_id, ACTION_EDIT, CATEGORY_PART)
            .part(part_id)
            .details(format!("Загружен чертеж '{}'", stored))
            .record(&txn)
            .await?;
        txn.commit().await.map_err(ServiceError::db_error)?;

        if let Some(old) = previous.filter(|old| *old != stored) {
            if let Err(e) = self.drawings.remove(&old).await {
                warn!(file = %old, "Failed to remove replaced drawing: {}", e);
            }
        }
        Ok(updated)
    }

    /// Imports a bill of materials; returns `(added, skipped)` through the summary.
    #[instrument(skip(self, content, actor))]
    pub async fn import_from_file(
        &self,
        file_name: &str,
        content: &[u8],
        actor: &AuthUser,
    ) -> Result<ImportSummary, ServiceError> {
        if content.is_empty() {
            return Ok(ImportSummary::default());
        }
        let rows = import::parse_file(file_name, content)?;

        let txn = self.db.begin().await.map_err(ServiceError::db_error)?;
        let summary = import::write_rows(&txn, &rows).await?;
        AuditEntry::new(actor.user_id, ACTION_IMPORT, CATEGORY_PART)
            .details(format!(
                "Импорт из файла '{}': добавлено {}, пропущено {}",
                file_name, summary.added, summary.skipped
            ))
            .record(&txn)
            .await?;
        txn.commit().await.map_err(ServiceError::db_error)?;

        info!(
            added = summary.added,
            skipped = summary.skipped,
            "Parts imported"
        );
        for created in &summary.created {
            self.publish_created(created);
        }
        Ok(summary)
    }
}

pub(crate) async fn find_part<C: ConnectionTrait>(
    db: &C,
    part_id: &str,
) -> Result<part::Model, ServiceError> {
    part::Entity::find_by_id(part_id.to_string())
        .one(db)
        .await
        .map_err(ServiceError::db_error)?
        .ok_or_else(|| ServiceError::NotFound(format!("Деталь {} не найдена", part_id)))
}

/// The first stage has seen every piece that was processed anywhere on the route, so a new
/// total must cover what it completed or scrapped.
async fn ensure_total_covers_history<C: ConnectionTrait>(
    db: &C,
    existing: &part::Model,
    total: i32,
) -> Result<(), ServiceError> {
    let mut used = existing.quantity_completed + existing.quantity_scrapped;
    let mut consistent = total >= used;
    if let Some(route_id) = existing.route_template_id {
        let route = route_steps(db, route_id).await?;
        let history = load_stage_events(db, &existing.part_id).await?;
        let progression = Progression::compute(total, &route, &history);
        if let Some(first) = progression.stages.first() {
            used = used.max(first.done + first.scrapped);
        }
        consistent = consistent && progression.is_consistent();
    }
    if !consistent {
        return Err(ServiceError::InvalidOperation(format!(
            "Общее количество не может быть меньше уже обработанного ({} шт.).",
            used
        )));
    }
    Ok(())
}

pub(crate) async fn load_stage_events<C: ConnectionTrait>(
    db: &C,
    part_id: &str,
) -> Result<Vec<StageEvent>, ServiceError> {
    let rows = status_history::Entity::find()
        .filter(status_history::Column::PartId.eq(part_id))
        .order_by_asc(status_history::Column::Timestamp)
        .order_by_asc(status_history::Column::Id)
        .all(db)
        .await
        .map_err(ServiceError::db_error)?;
    Ok(rows.iter().map(StageEvent::from).collect())
}

async fn delete_dependents<C: ConnectionTrait>(db: &C, part_id: &str) -> Result<(), ServiceError> {
    status_history::Entity::delete_many()
        .filter(status_history::Column::PartId.eq(part_id))
        .exec(db)
        .await
        .map_err(ServiceError::db_error)?;
    part_note::Entity::delete_many()
        .filter(part_note::Column::PartId.eq(part_id))
        .exec(db)
        .await
        .map_err(ServiceError::db_error)?;
    responsible_history::Entity::delete_many()
        .filter(responsible_history::Column::PartId.eq(part_id))
        .exec(db)
        .await
        .map_err(ServiceError::db_error)?;
    assembly_component::Entity::delete_many()
        .filter(
            Condition::any()
                .add(assembly_component::Column::ParentId.eq(part_id))
                .add(assembly_component::Column::ChildId.eq(part_id)),
        )
        .exec(db)
        .await
        .map_err(ServiceError::db_error)?;
    Ok(())
}

fn status_label(status_type: StatusType) -> &'static str {
    match status_type {
        StatusType::Completed => "выполнено",
        StatusType::Rework => "на доработку",
        StatusType::Scrapped => "брак",
    }
}

fn trimmed(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string())
}

fn clean_optional(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
