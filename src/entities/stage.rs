use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// A named production step, e.g. cutting or welding.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "stages")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    #[sea_orm(unique)]
    pub name: String,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::route_stage::Entity")]
    RouteStages,
}

impl Related<super::route_stage::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::RouteStages.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
