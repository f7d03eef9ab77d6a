use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// One catalog record: an owner's converted project.
///
/// `(owner_id, artifact_key)` is unique; `display_name` is not.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "projects")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub owner_id: String,
    pub display_name: String,
    pub artifact_key: String,
    pub created_at: Option<DateTimeUtc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
