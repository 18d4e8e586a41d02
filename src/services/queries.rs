/*!
 * # Read models
 *
 * Queries behind the dashboard, the product parts table, the scan page, the part history and
 * the audit log. Nothing here writes.
 */

use chrono::{DateTime, Utc};
use sea_orm::{
    ColumnTrait, Condition, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::instrument;

use crate::auth::{AuthUser, Permission};
use crate::entities::{
    assembly_component, audit_log, part, part_note, responsible_history, route_template, stage,
    status_history, user, StatusType,
};
use crate::errors::ServiceError;
use crate::services::management::route_steps;
use crate::services::parts::{find_part, load_stage_events, NO_ROUTE_MESSAGE};
use crate::services::progression::{
    Progression, RouteStep, StageProgress, StageState, ALL_STAGES_COMPLETED,
};
use crate::utils::{encode_path_segment, scan_url, to_safe_key};

pub const RESPONSIBLE_ASSIGNED: &str = "Назначен ответственный";

/// One entry of a part's combined history
#[derive(Debug, Clone, Serialize)]
pub struct HistoryEntry {
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub event: HistoryEvent,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HistoryEvent {
    Status {
        id: i32,
        status: String,
        operator_name: String,
        quantity: i32,
        status_type: StatusType,
    },
    Note {
        id: i32,
        text: String,
        stage: Option<String>,
        author: Option<String>,
        author_id: i32,
    },
    Audit {
        action: String,
        details: Option<String>,
        user: Option<String>,
        category: String,
    },
    Responsible {
        action: String,
        user: Option<String>,
    },
}

impl HistoryEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            HistoryEvent::Status { .. } => "status",
            HistoryEvent::Note { .. } => "note",
            HistoryEvent::Audit { .. } => "audit",
            HistoryEvent::Responsible { .. } => "responsible",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PartHistory {
    pub part: part::Model,
    pub entries: Vec<HistoryEntry>,
}

/// Dashboard row for one product
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProductSummary {
    pub product_designation: String,
    pub safe_key: String,
    pub part_count: u64,
    pub total_quantity: i64,
    pub completed_quantity: i64,
    pub scrapped_quantity: i64,
    /// Completion in percent, 0 to 100
    pub progress: u32,
    pub last_update: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PartsFilter {
    pub search: Option<String>,
    pub responsible_id: Option<i32>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StageCell {
    pub name: String,
    pub status: StageState,
    pub qty_done: i32,
}

#[derive(Debug, Clone, Serialize)]
pub struct PartUrls {
    pub edit: String,
    pub delete: String,
    pub qr: String,
    pub history: String,
    pub scan: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PartRow {
    pub part_id: String,
    pub name: String,
    pub material: String,
    pub size: Option<String>,
    pub current_status: String,
    pub last_update: DateTime<Utc>,
    pub quantity_total: i32,
    pub quantity_completed: i32,
    pub quantity_scrapped: i32,
    pub progress: u32,
    pub route: Option<String>,
    pub responsible: Option<String>,
    pub responsible_id: Option<i32>,
    pub drawing_filename: Option<String>,
    pub parent_ids: Vec<String>,
    pub stages: Vec<StageCell>,
    pub urls: PartUrls,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ViewerPermissions {
    pub can_edit: bool,
    pub can_delete: bool,
    pub can_generate_qr: bool,
}

impl ViewerPermissions {
    pub fn for_viewer(viewer: Option<&AuthUser>) -> Self {
        match viewer {
            Some(user) => Self {
                can_edit: user.can(Permission::EDIT_PARTS),
                can_delete: user.can(Permission::DELETE_PARTS),
                can_generate_qr: user.can(Permission::GENERATE_QR),
            },
            None => Self::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ProductParts {
    pub product_designation: String,
    pub safe_key: String,
    pub parts: Vec<PartRow>,
    pub permissions: ViewerPermissions,
}

/// What the scan page shows for a part
#[derive(Debug, Clone, Serialize)]
pub struct StageSelection {
    pub part: part::Model,
    pub route: Option<String>,
    pub stages: Vec<StageProgress>,
    pub next_stage: Option<StageProgress>,
    pub message: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuditLogFilter {
    pub category: Option<String>,
    pub part_id: Option<String>,
    pub user_id: Option<i32>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AuditLogEntry {
    pub id: i32,
    pub timestamp: DateTime<Utc>,
    pub part_id: Option<String>,
    pub user_id: i32,
    pub username: Option<String>,
    pub action: String,
    pub details: Option<String>,
    pub category: String,
}

fn percent(done: i64, total: i64) -> u32 {
    if total <= 0 {
        return 0;
    }
    ((done.max(0) * 100) / total).min(100) as u32
}

#[derive(Clone)]
pub struct QueryService {
    db: Arc<DatabaseConnection>,
    public_base_url: String,
}

impl QueryService {
    pub fn new(db: Arc<DatabaseConnection>, public_base_url: String) -> Self {
        Self {
            db,
            public_base_url,
        }
    }

    async fn usernames(&self) -> Result<HashMap<i32, String>, ServiceError> {
        Ok(user::Entity::find()
            .all(&*self.db)
            .await
            .map_err(ServiceError::db_error)?
            .into_iter()
            .map(|u| (u.id, u.username))
            .collect())
    }

    /// Status history, notes, audit entries and responsible changes of one part, newest first.
    #[instrument(skip(self))]
    pub async fn get_combined_history(&self, part_id: &str) -> Result<PartHistory, ServiceError> {
        let db = &*self.db;
        let part = find_part(db, part_id).await?;
        let users = self.usernames().await?;
        let stages: HashMap<i32, String> = stage::Entity::find()
            .all(db)
            .await
            .map_err(ServiceError::db_error)?
            .into_iter()
            .map(|s| (s.id, s.name))
            .collect();

        let statuses = status_history::Entity::find()
            .filter(status_history::Column::PartId.eq(part_id))
            .all(db)
            .await
            .map_err(ServiceError::db_error)?;
        let notes = part_note::Entity::find()
            .filter(part_note::Column::PartId.eq(part_id))
            .all(db)
            .await
            .map_err(ServiceError::db_error)?;
        let audits = audit_log::Entity::find()
            .filter(audit_log::Column::PartId.eq(part_id))
            .all(db)
            .await
            .map_err(ServiceError::db_error)?;
        let responsibles = responsible_history::Entity::find()
            .filter(responsible_history::Column::PartId.eq(part_id))
            .all(db)
            .await
            .map_err(ServiceError::db_error)?;

        let mut entries =
            Vec::with_capacity(statuses.len() + notes.len() + audits.len() + responsibles.len());
        entries.extend(statuses.into_iter().map(|row| HistoryEntry {
            timestamp: row.timestamp,
            event: HistoryEvent::Status {
                id: row.id,
                status: row.status,
                operator_name: row.operator_name,
                quantity: row.quantity,
                status_type: row.status_type,
            },
        }));
        entries.extend(notes.into_iter().map(|row| HistoryEntry {
            timestamp: row.timestamp,
            event: HistoryEvent::Note {
                id: row.id,
                text: row.text,
                stage: row.stage_id.and_then(|id| stages.get(&id).cloned()),
                author: users.get(&row.user_id).cloned(),
                author_id: row.user_id,
            },
        }));
        entries.extend(audits.into_iter().map(|row| HistoryEntry {
            timestamp: row.timestamp,
            event: HistoryEvent::Audit {
                action: row.action,
                details: row.details,
                user: users.get(&row.user_id).cloned(),
                category: row.category,
            },
        }));
        entries.extend(responsibles.into_iter().map(|row| HistoryEntry {
            timestamp: row.timestamp,
            event: HistoryEvent::Responsible {
                action: RESPONSIBLE_ASSIGNED.to_string(),
                user: row.user_id.and_then(|id| users.get(&id).cloned()),
            },
        }));

        entries.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(PartHistory { part, entries })
    }

    /// Per-product totals for the dashboard, ordered by product designation.
    #[instrument(skip(self))]
    pub async fn dashboard(&self) -> Result<Vec<ProductSummary>, ServiceError> {
        let parts = part::Entity::find()
            .order_by_asc(part::Column::ProductDesignation)
            .all(&*self.db)
            .await
            .map_err(ServiceError::db_error)?;

        let mut products: BTreeMap<String, ProductSummary> = BTreeMap::new();
        for p in parts {
            let entry = products
                .entry(p.product_designation.clone())
                .or_insert_with(|| ProductSummary {
                    safe_key: to_safe_key(&p.product_designation),
                    product_designation: p.product_designation.clone(),
                    part_count: 0,
                    total_quantity: 0,
                    completed_quantity: 0,
                    scrapped_quantity: 0,
                    progress: 0,
                    last_update: None,
                });
            entry.part_count += 1;
            entry.total_quantity += i64::from(p.quantity_total);
            entry.completed_quantity += i64::from(p.quantity_completed);
            entry.scrapped_quantity += i64::from(p.quantity_scrapped);
            entry.last_update = entry.last_update.max(Some(p.last_update));
        }

        Ok(products
            .into_values()
            .map(|mut summary| {
                summary.progress = percent(summary.completed_quantity, summary.total_quantity);
                summary
            })
            .collect())
    }

    /// Parts of one product with their route progress, filtered for the dashboard table.
    #[instrument(skip(self, viewer))]
    pub async fn parts_for_product(
        &self,
        product_designation: &str,
        filter: &PartsFilter,
        viewer: Option<&AuthUser>,
    ) -> Result<ProductParts, ServiceError> {
        let db = &*self.db;
        let mut query =
            part::Entity::find().filter(part::Column::ProductDesignation.eq(product_designation));
        if let Some(search) = filter
            .search
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
        {
            query = query.filter(
                Condition::any()
                    .add(part::Column::PartId.contains(search))
                    .add(part::Column::Name.contains(search)),
            );
        }
        if let Some(responsible_id) = filter.responsible_id {
            query = query.filter(part::Column::ResponsibleId.eq(responsible_id));
        }
        let parts = query
            .order_by_asc(part::Column::PartId)
            .all(db)
            .await
            .map_err(ServiceError::db_error)?;

        let users = self.usernames().await?;
        let route_names: HashMap<i32, String> = route_template::Entity::find()
            .all(db)
            .await
            .map_err(ServiceError::db_error)?
            .into_iter()
            .map(|r| (r.id, r.name))
            .collect();

        let part_ids: Vec<String> = parts.iter().map(|p| p.part_id.clone()).collect();
        let mut parents: HashMap<String, Vec<String>> = HashMap::new();
        for link in assembly_component::Entity::find()
            .filter(assembly_component::Column::ChildId.is_in(part_ids))
            .all(db)
            .await
            .map_err(ServiceError::db_error)?
        {
            parents.entry(link.child_id).or_default().push(link.parent_id);
        }

        let mut routes: HashMap<i32, Vec<RouteStep>> = HashMap::new();
        let mut rows = Vec::with_capacity(parts.len());
        for p in parts {
            let stages = match p.route_template_id {
                Some(route_id) => {
                    if !routes.contains_key(&route_id) {
                        routes.insert(route_id, route_steps(db, route_id).await?);
                    }
                    let steps = routes.get(&route_id).map(Vec::as_slice).unwrap_or(&[]);
                    let history = load_stage_events(db, &p.part_id).await?;
                    Progression::compute(p.quantity_total, steps, &history)
                        .stages
                        .into_iter()
                        .map(|s| StageCell {
                            name: s.name,
                            status: s.state,
                            qty_done: s.done,
                        })
                        .collect()
                }
                None => Vec::new(),
            };

            let encoded = encode_path_segment(&p.part_id);
            rows.push(PartRow {
                progress: percent(i64::from(p.quantity_completed), i64::from(p.quantity_total)),
                route: p.route_template_id.and_then(|id| route_names.get(&id).cloned()),
                responsible: p.responsible_id.and_then(|id| users.get(&id).cloned()),
                parent_ids: parents.remove(&p.part_id).unwrap_or_default(),
                urls: PartUrls {
                    edit: format!("/admin/parts/{}", encoded),
                    delete: format!("/admin/parts/{}", encoded),
                    qr: format!("/admin/parts/qr-preview?part_ids={}", encoded),
                    history: format!("/history/{}", encoded),
                    scan: scan_url(&self.public_base_url, &p.part_id)?,
                },
                stages,
                part_id: p.part_id,
                name: p.name,
                material: p.material,
                size: p.size,
                current_status: p.current_status,
                last_update: p.last_update,
                quantity_total: p.quantity_total,
                quantity_completed: p.quantity_completed,
                quantity_scrapped: p.quantity_scrapped,
                responsible_id: p.responsible_id,
                drawing_filename: p.drawing_filename,
            });
        }

        Ok(ProductParts {
            product_designation: product_designation.to_string(),
            safe_key: to_safe_key(product_designation),
            parts: rows,
            permissions: ViewerPermissions::for_viewer(viewer),
        })
    }

    /// Route progress of a scanned part and the stage to confirm next.
    #[instrument(skip(self))]
    pub async fn select_stage(&self, part_id: &str) -> Result<StageSelection, ServiceError> {
        let db = &*self.db;
        let part = find_part(db, part_id).await?;
        let route_id = part
            .route_template_id
            .ok_or_else(|| ServiceError::InvalidOperation(NO_ROUTE_MESSAGE.into()))?;
        let route = route_template::Entity::find_by_id(route_id)
            .one(db)
            .await
            .map_err(ServiceError::db_error)?;

        let steps = route_steps(db, route_id).await?;
        let history = load_stage_events(db, part_id).await?;
        let progression = Progression::compute(part.quantity_total, &steps, &history);
        let next_stage = progression.next_stage().cloned();
        let message = next_stage
            .is_none()
            .then(|| ALL_STAGES_COMPLETED.to_string());

        Ok(StageSelection {
            part,
            route: route.map(|r| r.name),
            stages: progression.stages,
            next_stage,
            message,
        })
    }

    /// Audit log page, newest first. Returns the page and the total count.
    #[instrument(skip(self))]
    pub async fn list_audit_logs(
        &self,
        filter: &AuditLogFilter,
        page: u64,
        per_page: u64,
    ) -> Result<(Vec<AuditLogEntry>, u64), ServiceError> {
        let mut query = audit_log::Entity::find();
        if let Some(category) = filter.category.as_deref().filter(|c| !c.is_empty()) {
            query = query.filter(audit_log::Column::Category.eq(category));
        }
        if let Some(part_id) = filter.part_id.as_deref().filter(|p| !p.is_empty()) {
            query = query.filter(audit_log::Column::PartId.eq(part_id));
        }
        if let Some(user_id) = filter.user_id {
            query = query.filter(audit_log::Column::UserId.eq(user_id));
        }

        let paginator = query
            .order_by_desc(audit_log::Column::Timestamp)
            .order_by_desc(audit_log::Column::Id)
            .paginate(&*self.db, per_page.max(1));
        let total = paginator
            .num_items()
            .await
            .map_err(ServiceError::db_error)?;
        let rows = paginator
            .fetch_page(page.saturating_sub(1))
            .await
            .map_err(ServiceError::db_error)?;

        let users = self.usernames().await?;
        let entries = rows
            .into_iter()
            .map(|row| AuditLogEntry {
                username: users.get(&row.user_id).cloned(),
                id: row.id,
                timestamp: row.timestamp,
                part_id: row.part_id,
                user_id: row.user_id,
                action: row.action,
                details: row.details,
                category: row.category,
            })
            .collect();
        Ok((entries, total))
    }
}
