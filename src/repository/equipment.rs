//! Equipment repository for database operations

use chrono::Utc;
use sqlx::{Pool, Postgres, Transaction};

use crate::{
    error::{AppError, AppResult},
    models::equipment::{CreateEquipment, Equipment, UpdateEquipment},
};

#[derive(Clone)]
pub struct EquipmentRepository {
    pool: Pool<Postgres>,
}

impl EquipmentRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    /// List all equipment
    pub async fn list(&self) -> AppResult<Vec<Equipment>> {
        let rows = sqlx::query_as::<_, Equipment>("SELECT * FROM equipment ORDER BY name")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    /// Get equipment by ID
    pub async fn get_by_id(&self, id: i32) -> AppResult<Equipment> {
        sqlx::query_as::<_, Equipment>("SELECT * FROM equipment WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Equipment {} not found", id)))
    }

    /// Get equipment by ID inside an open transaction
    pub async fn get_in_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        id: i32,
    ) -> AppResult<Option<Equipment>> {
        let row = sqlx::query_as::<_, Equipment>("SELECT * FROM equipment WHERE id = $1")
            .bind(id)
            .fetch_optional(&mut **tx)
            .await?;
        Ok(row)
    }

    /// Create equipment; `available` starts equal to `quantity`
    pub async fn create(&self, data: &CreateEquipment) -> AppResult<Equipment> {
        let row = sqlx::query_as::<_, Equipment>(
            r#"
            INSERT INTO equipment (name, category, condition, quantity, available)
            VALUES ($1, $2, $3, $4, $4)
            RETURNING *
            "#,
        )
        .bind(&data.name)
        .bind(data.category)
        .bind(data.condition)
        .bind(data.quantity)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    /// Update equipment metadata. A quantity change shifts `available` by
    /// the same delta so units currently out stay accounted for.
    pub async fn update(&self, id: i32, data: &UpdateEquipment) -> AppResult<Equipment> {
        let current = self.get_by_id(id).await?;

        let name = data.name.clone().unwrap_or(current.name);
        let category = data.category.unwrap_or(current.category);
        let condition = data.condition.unwrap_or(current.condition);
        let quantity = data.quantity.unwrap_or(current.quantity);
        let available = (current.available + (quantity - current.quantity)).max(0);

        let row = sqlx::query_as::<_, Equipment>(
            r#"
            UPDATE equipment
            SET name = $2, category = $3, condition = $4,
                quantity = $5, available = $6, updated_at = $7
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(name)
        .bind(category)
        .bind(condition)
        .bind(quantity)
        .bind(available)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    /// Delete equipment. Refused while any unit is out or any active
    /// request still references it.
    pub async fn delete(&self, id: i32) -> AppResult<()> {
        let equipment = self.get_by_id(id).await?;

        if equipment.available != equipment.quantity {
            return Err(AppError::Conflict(format!(
                "Cannot delete '{}': {} unit(s) still borrowed",
                equipment.name,
                equipment.quantity - equipment.available
            )));
        }

        let referenced: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM request_items
                WHERE equipment_id = $1 AND status IN ('pending', 'approved', 'overdue')
            )
            "#,
        )
        .bind(id)
        .fetch_one(&self.pool)
        .await?;

        if referenced {
            return Err(AppError::Conflict(format!(
                "Cannot delete '{}': active requests still reference it",
                equipment.name
            )));
        }

        sqlx::query("DELETE FROM equipment WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Soft-reserve units: conditional decrement that only succeeds when
    /// enough units are free. Returns false when the guard fails, which
    /// closes the check-then-act race between concurrent creates.
    pub async fn reserve(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        id: i32,
        quantity: i32,
    ) -> AppResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE equipment
            SET available = available - $2, updated_at = $3
            WHERE id = $1 AND available >= $2
            "#,
        )
        .bind(id)
        .bind(quantity)
        .bind(Utc::now())
        .execute(&mut **tx)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Release previously reserved units. Unconditional increment; the
    /// pairing discipline in the reservation protocol guarantees each
    /// reservation is released at most once, and the reconciler heals any
    /// residual drift.
    pub async fn release(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        id: i32,
        quantity: i32,
    ) -> AppResult<()> {
        sqlx::query(
            "UPDATE equipment SET available = available + $2, updated_at = $3 WHERE id = $1",
        )
        .bind(id)
        .bind(quantity)
        .bind(Utc::now())
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    /// Overwrite `available` directly. Reconciler use only.
    pub async fn set_available(&self, id: i32, available: i32) -> AppResult<()> {
        sqlx::query("UPDATE equipment SET available = $2, updated_at = $3 WHERE id = $1")
            .bind(id)
            .bind(available)
            .bind(Utc::now())
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
