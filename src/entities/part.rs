use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use sea_orm::{ActiveValue, ConnectionTrait};
use serde::{Deserialize, Serialize};

/// Status shown for a part that has not passed any stage yet.
pub const IN_STOCK_STATUS: &str = "На складе";

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "parts")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub part_id: String,
    pub product_designation: String,
    pub name: String,
    pub material: String,
    pub size: Option<String>,
    pub date_added: DateTime<Utc>,
    pub current_status: String,
    pub last_update: DateTime<Utc>,
    pub quantity_total: i32,
    pub quantity_completed: i32,
    pub quantity_scrapped: i32,
    pub drawing_filename: Option<String>,
    pub route_template_id: Option<i32>,
    pub responsible_id: Option<i32>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::route_template::Entity",
        from = "Column::RouteTemplateId",
        to = "super::route_template::Column::Id"
    )]
    RouteTemplate,
    #[sea_orm(
        belongs_to = "super::user::Entity",
        from = "Column::ResponsibleId",
        to = "super::user::Column::Id"
    )]
    Responsible,
    #[sea_orm(has_many = "super::status_history::Entity")]
    History,
    #[sea_orm(has_many = "super::part_note::Entity")]
    Notes,
    #[sea_orm(has_many = "super::responsible_history::Entity")]
    ResponsibleHistory,
}

impl Related<super::route_template::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::RouteTemplate.def()
    }
}

impl Related<super::user::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Responsible.def()
    }
}

impl Related<super::status_history::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::History.def()
    }
}

impl Related<super::part_note::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Notes.def()
    }
}

impl Related<super::responsible_history::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ResponsibleHistory.def()
    }
}

#[async_trait::async_trait]
impl ActiveModelBehavior for ActiveModel {
    async fn before_save<C>(mut self, _db: &C, insert: bool) -> Result<Self, DbErr>
    where
        C: ConnectionTrait,
    {
        let now = Utc::now();

        if insert {
            if let ActiveValue::NotSet = self.date_added {
                self.date_added = ActiveValue::Set(now);
            }
            if let ActiveValue::NotSet = self.current_status {
                self.current_status = ActiveValue::Set(IN_STOCK_STATUS.to_string());
            }
            if let ActiveValue::NotSet = self.quantity_total {
                self.quantity_total = ActiveValue::Set(1);
            }
            if let ActiveValue::NotSet = self.quantity_completed {
                self.quantity_completed = ActiveValue::Set(0);
            }
            if let ActiveValue::NotSet = self.quantity_scrapped {
                self.quantity_scrapped = ActiveValue::Set(0);
            }
        }

        self.last_update = ActiveValue::Set(now);

        Ok(self)
    }
}

impl Model {
    /// Pieces still in production: neither finished nor scrapped.
    pub fn quantity_in_work(&self) -> i32 {
        (self.quantity_total - self.quantity_completed - self.quantity_scrapped).max(0)
    }

    pub fn is_complete(&self) -> bool {
        self.quantity_completed + self.quantity_scrapped >= self.quantity_total
    }
}
