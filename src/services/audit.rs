//! Audit trail writes shared by the mutating services.

use sea_orm::{ActiveModelTrait, ConnectionTrait, Set};
use tracing::error;

use crate::entities::audit_log;
use crate::errors::ServiceError;

pub const CATEGORY_GENERAL: &str = "general";
pub const CATEGORY_PART: &str = "part";
pub const CATEGORY_STATUS: &str = "status";
pub const CATEGORY_MANAGEMENT: &str = "management";
pub const CATEGORY_USER: &str = "user";

pub const ACTION_CREATE: &str = "Создание";
pub const ACTION_EDIT: &str = "Редактирование";
pub const ACTION_DELETE: &str = "Удаление";
pub const ACTION_IMPORT: &str = "Импорт";
pub const ACTION_STAGE_CONFIRMED: &str = "Подтверждение этапа";
pub const ACTION_STAGE_CANCELLED: &str = "Отмена этапа";
pub const ACTION_ROUTE_CHANGED: &str = "Смена маршрута";
pub const ACTION_RESPONSIBLE_CHANGED: &str = "Смена ответственного";

/// Audit record about to be written
#[derive(Debug, Clone)]
pub struct AuditEntry<'a> {
    pub user_id: i32,
    pub part_id: Option<&'a str>,
    pub action: &'a str,
    pub details: Option<String>,
    pub category: &'a str,
}

impl<'a> AuditEntry<'a> {
    pub fn new(user_id: i32, action: &'a str, category: &'a str) -> Self {
        Self {
            user_id,
            part_id: None,
            action,
            details: None,
            category,
        }
    }

    pub fn part(mut self, part_id: &'a str) -> Self {
        self.part_id = Some(part_id);
        self
    }

    pub fn details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    /// Writes the entry on the given connection or transaction.
    pub async fn record<C: ConnectionTrait>(self, db: &C) -> Result<audit_log::Model, ServiceError> {
        let action = self.action;
        audit_log::ActiveModel {
            user_id: Set(self.user_id),
            part_id: Set(self.part_id.map(str::to_string)),
            action: Set(action.to_string()),
            details: Set(self.details),
            category: Set(self.category.to_string()),
            ..Default::default()
        }
        .insert(db)
        .await
        .map_err(|e| {
            error!(action, "Failed to write audit entry: {}", e);
            ServiceError::db_error(e)
        })
    }
}
