use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Parent/child link between two parts: `quantity` children go into one parent.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "assembly_components")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub parent_id: String,
    pub child_id: String,
    pub quantity: i32,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::part::Entity",
        from = "Column::ParentId",
        to = "super::part::Column::PartId",
        on_delete = "Cascade"
    )]
    Parent,
    #[sea_orm(
        belongs_to = "super::part::Entity",
        from = "Column::ChildId",
        to = "super::part::Column::PartId",
        on_delete = "Cascade"
    )]
    Child,
}

impl ActiveModelBehavior for ActiveModel {}
