// ==========================================
// 血液供应匹配引擎 - 血库主数据仓储
// ==========================================
// 红线: Repository 不含业务逻辑
// 说明: 血库记录由注册服务校验后写入, 此处直接信任
// ==========================================

use crate::domain::blood_bank::{BloodBank, GeoPoint, OperatingHours};
use crate::repository::error::{RepositoryError, RepositoryResult};
use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::sync::{Arc, Mutex, MutexGuard};

// ==========================================
// BloodBankRepository Trait
// ==========================================
#[async_trait]
pub trait BloodBankRepository: Send + Sync {
    /// 插入或更新血库
    async fn upsert_bank(&self, bank: &BloodBank) -> RepositoryResult<()>;

    /// 按 ID 查询血库
    async fn find_bank(&self, bank_id: &str) -> RepositoryResult<Option<BloodBank>>;

    /// 列出全部血库（按 ID 升序）
    async fn list_banks(&self) -> RepositoryResult<Vec<BloodBank>>;
}

// ==========================================
// BloodBankRepositoryImpl - SQLite 实现
// ==========================================
pub struct BloodBankRepositoryImpl {
    conn: Arc<Mutex<Connection>>,
}

impl BloodBankRepositoryImpl {
    /// 从已有连接创建仓储实例
    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    fn map_row(row: &Row<'_>) -> rusqlite::Result<BloodBank> {
        Ok(BloodBank {
            id: row.get(0)?,
            name: row.get(1)?,
            address: row.get(2)?,
            phone: row.get(3)?,
            email: row.get(4)?,
            location: GeoPoint::new(row.get(5)?, row.get(6)?),
            operating_hours: OperatingHours::new(row.get(7)?, row.get(8)?),
        })
    }
}

const SELECT_BANK: &str = r#"
    SELECT bank_id, name, address, phone, email, lat, lng, open_time, close_time
    FROM blood_bank
"#;

#[async_trait]
impl BloodBankRepository for BloodBankRepositoryImpl {
    async fn upsert_bank(&self, bank: &BloodBank) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            r#"
            INSERT INTO blood_bank (
                bank_id, name, address, phone, email, lat, lng, open_time, close_time
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            ON CONFLICT(bank_id) DO UPDATE SET
                name = excluded.name,
                address = excluded.address,
                phone = excluded.phone,
                email = excluded.email,
                lat = excluded.lat,
                lng = excluded.lng,
                open_time = excluded.open_time,
                close_time = excluded.close_time
            "#,
            params![
                bank.id,
                bank.name,
                bank.address,
                bank.phone,
                bank.email,
                bank.location.lat,
                bank.location.lng,
                bank.operating_hours.open,
                bank.operating_hours.close,
            ],
        )?;
        Ok(())
    }

    async fn find_bank(&self, bank_id: &str) -> RepositoryResult<Option<BloodBank>> {
        let conn = self.get_conn()?;
        let sql = format!("{} WHERE bank_id = ?1", SELECT_BANK);
        let bank = conn
            .query_row(&sql, params![bank_id], Self::map_row)
            .optional()?;
        Ok(bank)
    }

    async fn list_banks(&self) -> RepositoryResult<Vec<BloodBank>> {
        let conn = self.get_conn()?;
        let sql = format!("{} ORDER BY bank_id", SELECT_BANK);
        let mut stmt = conn.prepare(&sql)?;
        let banks = stmt
            .query_map([], Self::map_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(banks)
    }
}
