use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use sea_orm::{ActiveValue, ConnectionTrait};
use serde::{Deserialize, Serialize};

/// Kind of event recorded against a stage
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumIter, DeriveActiveEnum,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "snake_case")]
pub enum StatusType {
    #[sea_orm(string_value = "completed")]
    Completed,
    #[sea_orm(string_value = "rework")]
    Rework,
    #[sea_orm(string_value = "scrapped")]
    Scrapped,
}

impl Default for StatusType {
    fn default() -> Self {
        StatusType::Completed
    }
}

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "status_history")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub part_id: String,
    /// Name of the stage the event was recorded at
    pub status: String,
    pub operator_name: String,
    pub timestamp: DateTime<Utc>,
    pub quantity: i32,
    pub status_type: StatusType,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::part::Entity",
        from = "Column::PartId",
        to = "super::part::Column::PartId",
        on_delete = "Cascade"
    )]
    Part,
}

impl Related<super::part::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Part.def()
    }
}

#[async_trait::async_trait]
impl ActiveModelBehavior for ActiveModel {
    async fn before_save<C>(mut self, _db: &C, insert: bool) -> Result<Self, DbErr>
    where
        C: ConnectionTrait,
    {
        if insert {
            if let ActiveValue::NotSet = self.timestamp {
                self.timestamp = ActiveValue::Set(Utc::now());
            }
            if let ActiveValue::NotSet = self.quantity {
                self.quantity = ActiveValue::Set(1);
            }
            if let ActiveValue::NotSet = self.status_type {
                self.status_type = ActiveValue::Set(StatusType::Completed);
            }
        }
        Ok(self)
    }
}
