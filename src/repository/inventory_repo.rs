// ==========================================
// 血液供应匹配引擎 - 血液批次仓储
// ==========================================
// 职责: blood_unit 表的 CRUD, 供库存台账写穿
// 红线: Repository 不含业务逻辑（过期/排序由台账负责）
// ==========================================

use crate::domain::blood_bank::BloodUnit;
use crate::repository::error::{parse_column, RepositoryError, RepositoryResult};
use async_trait::async_trait;
use rusqlite::{params, Connection, Row};
use std::sync::{Arc, Mutex, MutexGuard};

#[async_trait]
pub trait InventoryRepository: Send + Sync {
    /// 新增批次
    async fn insert_batch(&self, unit: &BloodUnit) -> RepositoryResult<()>;

    /// 更新批次剩余数量
    async fn update_batch_quantity(&self, batch_id: &str, quantity: u32) -> RepositoryResult<()>;

    /// 删除批次（数量归零或已过期）
    async fn delete_batch(&self, batch_id: &str) -> RepositoryResult<()>;

    /// 批量更新批次数量（单事务, 全部生效或全部不生效）
    ///
    /// `(batch_id, None)` 表示批次已耗尽, 删除
    async fn apply_batch_quantities(&self, changes: &[(String, Option<u32>)]) -> RepositoryResult<()>;

    /// 列出全部批次
    async fn list_batches(&self) -> RepositoryResult<Vec<BloodUnit>>;

    /// 列出某血库的批次
    async fn list_batches_for_bank(&self, bank_id: &str) -> RepositoryResult<Vec<BloodUnit>>;
}

// ==========================================
// InventoryRepositoryImpl - SQLite 实现
// ==========================================
pub struct InventoryRepositoryImpl {
    conn: Arc<Mutex<Connection>>,
}

impl InventoryRepositoryImpl {
    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    fn map_row(row: &Row<'_>) -> rusqlite::Result<BloodUnit> {
        Ok(BloodUnit {
            batch_id: row.get(0)?,
            bank_id: row.get(1)?,
            blood_type: parse_column(2, row.get(2)?, |s| s.parse().ok())?,
            quantity: row.get(3)?,
            collected_at: row.get(4)?,
            expires_at: row.get(5)?,
        })
    }

    fn query_batches(
        conn: &Connection,
        filter: &str,
        args: &[&dyn rusqlite::ToSql],
    ) -> RepositoryResult<Vec<BloodUnit>> {
        let sql = format!(
            r#"
            SELECT batch_id, bank_id, blood_type, quantity, collected_at, expires_at
            FROM blood_unit
            {}
            ORDER BY bank_id, blood_type, expires_at, batch_id
            "#,
            filter
        );
        let mut stmt = conn.prepare(&sql)?;
        let units = stmt
            .query_map(args, Self::map_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(units)
    }
}

#[async_trait]
impl InventoryRepository for InventoryRepositoryImpl {
    async fn insert_batch(&self, unit: &BloodUnit) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            r#"
            INSERT INTO blood_unit (
                batch_id, bank_id, blood_type, quantity, collected_at, expires_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![
                unit.batch_id,
                unit.bank_id,
                unit.blood_type.as_str(),
                unit.quantity,
                unit.collected_at,
                unit.expires_at,
            ],
        )?;
        Ok(())
    }

    async fn update_batch_quantity(&self, batch_id: &str, quantity: u32) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        let rows = conn.execute(
            "UPDATE blood_unit SET quantity = ?1 WHERE batch_id = ?2",
            params![quantity, batch_id],
        )?;
        if rows == 0 {
            return Err(RepositoryError::NotFound {
                entity: "BloodUnit".to_string(),
                id: batch_id.to_string(),
            });
        }
        Ok(())
    }

    async fn delete_batch(&self, batch_id: &str) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        conn.execute("DELETE FROM blood_unit WHERE batch_id = ?1", params![batch_id])?;
        Ok(())
    }

    async fn apply_batch_quantities(&self, changes: &[(String, Option<u32>)]) -> RepositoryResult<()> {
        if changes.is_empty() {
            return Ok(());
        }
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;

        for (batch_id, quantity) in changes {
            let rows = match quantity {
                Some(quantity) => tx.execute(
                    "UPDATE blood_unit SET quantity = ?1 WHERE batch_id = ?2",
                    params![quantity, batch_id],
                )?,
                None => tx.execute("DELETE FROM blood_unit WHERE batch_id = ?1", params![batch_id])?,
            };
            if rows == 0 {
                // tx 未提交, drop 时回滚
                return Err(RepositoryError::NotFound {
                    entity: "BloodUnit".to_string(),
                    id: batch_id.clone(),
                });
            }
        }

        tx.commit()?;
        Ok(())
    }

    async fn list_batches(&self) -> RepositoryResult<Vec<BloodUnit>> {
        let conn = self.get_conn()?;
        Self::query_batches(&conn, "", &[])
    }

    async fn list_batches_for_bank(&self, bank_id: &str) -> RepositoryResult<Vec<BloodUnit>> {
        let conn = self.get_conn()?;
        Self::query_batches(&conn, "WHERE bank_id = ?1", &[&bank_id])
    }
}
