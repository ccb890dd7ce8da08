//! Promotion entity
//!
//! One live promotion per product. `remaining_count` only decreases inside a
//! campaign; every successful decrement increments `version` by one, which is
//! what the compare-and-set commit keys on.

use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "promotion")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub promotion_id: i64,
    #[sea_orm(indexed)]
    pub product_id: i64,
    pub remaining_count: i64,
    pub start_at: DateTimeUtc,
    pub end_at: DateTimeUtc,
    pub status: i32,
    pub current_price: f64,
    pub version: i64,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
