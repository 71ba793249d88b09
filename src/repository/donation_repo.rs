// ==========================================
// 血液供应匹配引擎 - 献血预约仓储
// ==========================================

use crate::domain::donation::DonationRecord;
use crate::domain::types::DonationStatus;
use crate::repository::error::{parse_column, RepositoryError, RepositoryResult};
use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::sync::{Arc, Mutex, MutexGuard};

#[async_trait]
pub trait DonationRepository: Send + Sync {
    async fn upsert_donation(&self, donation: &DonationRecord) -> RepositoryResult<()>;

    async fn find_donation(&self, donation_id: &str) -> RepositoryResult<Option<DonationRecord>>;

    /// 某献血者的预约（按预约时间升序）
    async fn list_by_donor(&self, donor_id: &str) -> RepositoryResult<Vec<DonationRecord>>;

    /// 某血库的预约（按预约时间升序）
    async fn list_by_bank(&self, bank_id: &str) -> RepositoryResult<Vec<DonationRecord>>;
}

pub struct DonationRepositoryImpl {
    conn: Arc<Mutex<Connection>>,
}

const SELECT_DONATION: &str = r#"
    SELECT donation_id, donor_id, bank_id, blood_type, units, scheduled_date,
           status, notes, batch_id, completed_at
    FROM donation_record
"#;

impl DonationRepositoryImpl {
    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    fn map_row(row: &Row<'_>) -> rusqlite::Result<DonationRecord> {
        Ok(DonationRecord {
            id: row.get(0)?,
            donor_id: row.get(1)?,
            bank_id: row.get(2)?,
            blood_type: parse_column(3, row.get(3)?, |s| s.parse().ok())?,
            units: row.get(4)?,
            scheduled_date: row.get(5)?,
            status: parse_column(6, row.get(6)?, DonationStatus::parse)?,
            notes: row.get(7)?,
            batch_id: row.get(8)?,
            completed_at: row.get(9)?,
        })
    }

    fn query(&self, filter: &str, key: &str) -> RepositoryResult<Vec<DonationRecord>> {
        let conn = self.get_conn()?;
        let sql = format!(
            "{} WHERE {} = ?1 ORDER BY scheduled_date, donation_id",
            SELECT_DONATION, filter
        );
        let mut stmt = conn.prepare(&sql)?;
        let records = stmt
            .query_map(params![key], Self::map_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }
}

#[async_trait]
impl DonationRepository for DonationRepositoryImpl {
    async fn upsert_donation(&self, donation: &DonationRecord) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            r#"
            INSERT INTO donation_record (
                donation_id, donor_id, bank_id, blood_type, units, scheduled_date,
                status, notes, batch_id, completed_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            ON CONFLICT(donation_id) DO UPDATE SET
                scheduled_date = excluded.scheduled_date,
                status = excluded.status,
                notes = excluded.notes,
                batch_id = excluded.batch_id,
                completed_at = excluded.completed_at
            "#,
            params![
                donation.id,
                donation.donor_id,
                donation.bank_id,
                donation.blood_type.as_str(),
                donation.units,
                donation.scheduled_date,
                donation.status.as_str(),
                donation.notes,
                donation.batch_id,
                donation.completed_at,
            ],
        )?;
        Ok(())
    }

    async fn find_donation(&self, donation_id: &str) -> RepositoryResult<Option<DonationRecord>> {
        let conn = self.get_conn()?;
        let sql = format!("{} WHERE donation_id = ?1", SELECT_DONATION);
        let record = conn
            .query_row(&sql, params![donation_id], Self::map_row)
            .optional()?;
        Ok(record)
    }

    async fn list_by_donor(&self, donor_id: &str) -> RepositoryResult<Vec<DonationRecord>> {
        self.query("donor_id", donor_id)
    }

    async fn list_by_bank(&self, bank_id: &str) -> RepositoryResult<Vec<DonationRecord>> {
        self.query("bank_id", bank_id)
    }
}
