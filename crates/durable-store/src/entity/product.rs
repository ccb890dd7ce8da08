//! Product entity
//!
//! Products are created out of band and treated as read-only during a
//! campaign.

use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "product")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub product_id: i64,
    pub title: String,
    pub sub_title: String,
    pub original_cost: f64,
    pub current_price: f64,
    pub discount: f64,
    pub is_free_delivery: i32,
    #[sea_orm(indexed)]
    pub category_id: i64,
    pub last_update_time: Option<DateTimeUtc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
