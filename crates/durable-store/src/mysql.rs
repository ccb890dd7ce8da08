//! MySQL-backed durable store via sea-orm
//!
//! The commit path runs in one transaction; the versioned decrement is a raw
//! `UPDATE … WHERE version = ?` so a concurrently committed purchase makes
//! the statement match zero rows instead of losing the update.

use crate::entity::{order, product, promotion};
use crate::{
    CommittedOrder, DurableResult, DurableStore, DurableStoreError, OrderState, Product, Promotion,
};
use async_trait::async_trait;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectOptions, ConnectionTrait, Database, DatabaseConnection,
    DbBackend, EntityTrait, PaginatorTrait, QueryFilter, Set, SqlErr, Statement, TransactionTrait,
};
use std::time::Duration;
use tracing::{debug, info, warn};

const CAS_DECREMENT_SQL: &str = "UPDATE promotion \
     SET remaining_count = remaining_count - 1, version = version + 1 \
     WHERE product_id = ? AND version = ? AND remaining_count > 0";

/// Connection pool sizing for the durable store
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub max_connections: u32,
    pub min_connections: u32,
    pub max_lifetime: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 100,
            min_connections: 20,
            max_lifetime: Duration::from_secs(180),
        }
    }
}

/// Durable store backed by MySQL
pub struct MysqlDurableStore {
    db: DatabaseConnection,
}

impl MysqlDurableStore {
    /// Connect with the given pool sizing.
    pub async fn connect(url: &str, pool: PoolConfig) -> DurableResult<Self> {
        info!("🔄 Connecting to durable store");
        let mut options = ConnectOptions::new(url.to_string());
        options
            .max_connections(pool.max_connections)
            .min_connections(pool.min_connections)
            .max_lifetime(pool.max_lifetime);
        let db = Database::connect(options)
            .await
            .map_err(|e| DurableStoreError::unavailable(format!("mysql connect failed: {e}")))?;
        info!("✅ Connected to durable store");
        Ok(Self { db })
    }

    /// Wrap an existing connection (tests against other backends).
    pub fn with_connection(db: DatabaseConnection) -> Self {
        Self { db }
    }
}

#[async_trait]
impl DurableStore for MysqlDurableStore {
    async fn find_product(&self, product_id: i64) -> DurableResult<Option<Product>> {
        Ok(product::Entity::find_by_id(product_id).one(&self.db).await?)
    }

    async fn find_promotion_by_product(&self, product_id: i64) -> DurableResult<Option<Promotion>> {
        Ok(promotion::Entity::find()
            .filter(promotion::Column::ProductId.eq(product_id))
            .one(&self.db)
            .await?)
    }

    async fn commit_order(&self, user_id: i64, product_id: i64) -> DurableResult<CommittedOrder> {
        let txn = self.db.begin().await?;

        let promo = promotion::Entity::find()
            .filter(promotion::Column::ProductId.eq(product_id))
            .one(&txn)
            .await?
            .ok_or(DurableStoreError::PromotionMissing { product_id })?;

        if promo.remaining_count <= 0 {
            return Err(DurableStoreError::SoldOut { product_id });
        }

        let update = txn
            .execute(Statement::from_sql_and_values(
                DbBackend::MySql,
                CAS_DECREMENT_SQL,
                [product_id.into(), promo.version.into()],
            ))
            .await?;
        if update.rows_affected() == 0 {
            debug!(
                "CAS lost for product {} at version {}",
                product_id, promo.version
            );
            return Err(DurableStoreError::StockConflict { product_id });
        }

        let row = order::ActiveModel {
            product_id: Set(product_id),
            user_id: Set(user_id),
            state: Set(OrderState::Created.as_i16()),
            created_at: Set(chrono::Utc::now()),
        };
        if let Err(e) = row.insert(&txn).await {
            if matches!(e.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) {
                return Err(DurableStoreError::DuplicateOrder {
                    user_id,
                    product_id,
                });
            }
            return Err(e.into());
        }

        txn.commit().await?;
        debug!(
            "Order committed, user={}, product={}, remaining={}",
            user_id,
            product_id,
            promo.remaining_count - 1
        );
        Ok(CommittedOrder {
            price: promo.current_price,
            remaining: promo.remaining_count - 1,
            version: promo.version + 1,
        })
    }

    async fn order_state(
        &self,
        user_id: i64,
        product_id: i64,
    ) -> DurableResult<Option<OrderState>> {
        let row = order::Entity::find_by_id((product_id, user_id))
            .one(&self.db)
            .await?;
        match row {
            None => Ok(None),
            Some(row) => match OrderState::from_i16(row.state) {
                Some(state) => Ok(Some(state)),
                None => {
                    warn!(
                        "Order ({}, {}) holds unknown state {}",
                        product_id, user_id, row.state
                    );
                    Err(DurableStoreError::unavailable(format!(
                        "unknown order state {}",
                        row.state
                    )))
                }
            },
        }
    }

    async fn transition_order(
        &self,
        user_id: i64,
        product_id: i64,
        from: OrderState,
        to: OrderState,
    ) -> DurableResult<bool> {
        let result = order::Entity::update_many()
            .col_expr(order::Column::State, Expr::value(to.as_i16()))
            .filter(order::Column::ProductId.eq(product_id))
            .filter(order::Column::UserId.eq(user_id))
            .filter(order::Column::State.eq(from.as_i16()))
            .exec(&self.db)
            .await?;
        Ok(result.rows_affected > 0)
    }

    async fn count_orders_for_product(&self, product_id: i64) -> DurableResult<u64> {
        Ok(order::Entity::find()
            .filter(order::Column::ProductId.eq(product_id))
            .count(&self.db)
            .await?)
    }

    async fn reset_product(&self, product_id: i64, count: i64) -> DurableResult<()> {
        let txn = self.db.begin().await?;

        let cleared = order::Entity::delete_many()
            .filter(order::Column::ProductId.eq(product_id))
            .exec(&txn)
            .await?;

        promotion::Entity::update_many()
            .col_expr(promotion::Column::RemainingCount, Expr::value(count))
            .col_expr(promotion::Column::Version, Expr::value(0i64))
            .filter(promotion::Column::ProductId.eq(product_id))
            .exec(&txn)
            .await?;

        txn.commit().await?;
        info!(
            "Reset product {}: cleared {} orders, stock back to {}",
            product_id, cleared.rows_affected, count
        );
        Ok(())
    }
}
