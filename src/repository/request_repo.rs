// ==========================================
// 血液供应匹配引擎 - 用血请求仓储
// ==========================================
// 红线: Repository 不含业务逻辑（状态转换由调度器负责）
// ==========================================

use crate::domain::blood_bank::GeoPoint;
use crate::domain::request::BloodRequest;
use crate::domain::types::{RequestStatus, Urgency};
use crate::repository::error::{parse_column, RepositoryError, RepositoryResult};
use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::sync::{Arc, Mutex, MutexGuard};

#[async_trait]
pub trait BloodRequestRepository: Send + Sync {
    /// 插入或更新请求
    async fn upsert_request(&self, request: &BloodRequest) -> RepositoryResult<()>;

    async fn find_request(&self, request_id: &str) -> RepositoryResult<Option<BloodRequest>>;

    /// 按状态列出（按提交时间升序）
    async fn list_by_status(&self, status: RequestStatus) -> RepositoryResult<Vec<BloodRequest>>;

    /// 某受血者的全部请求（按提交时间降序）
    async fn list_by_recipient(&self, recipient_id: &str) -> RepositoryResult<Vec<BloodRequest>>;
}

pub struct BloodRequestRepositoryImpl {
    conn: Arc<Mutex<Connection>>,
}

const SELECT_REQUEST: &str = r#"
    SELECT request_id, recipient_id, blood_type, units_needed, units_fulfilled,
           urgency, hospital_name, patient_name, doctor_name, contact_number,
           medical_reason, lat, lng, date_requested, required_by,
           status, attempts
    FROM blood_request
"#;

impl BloodRequestRepositoryImpl {
    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    fn map_row(row: &Row<'_>) -> rusqlite::Result<BloodRequest> {
        Ok(BloodRequest {
            id: row.get(0)?,
            recipient_id: row.get(1)?,
            blood_type: parse_column(2, row.get(2)?, |s| s.parse().ok())?,
            units_needed: row.get(3)?,
            units_fulfilled: row.get(4)?,
            urgency: parse_column(5, row.get(5)?, Urgency::parse)?,
            hospital_name: row.get(6)?,
            patient_name: row.get(7)?,
            doctor_name: row.get(8)?,
            contact_number: row.get(9)?,
            medical_reason: row.get(10)?,
            location: GeoPoint::new(row.get(11)?, row.get(12)?),
            date_requested: row.get(13)?,
            required_by: row.get(14)?,
            status: parse_column(15, row.get(15)?, RequestStatus::parse)?,
            attempts: row.get(16)?,
        })
    }
}

#[async_trait]
impl BloodRequestRepository for BloodRequestRepositoryImpl {
    async fn upsert_request(&self, request: &BloodRequest) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            r#"
            INSERT INTO blood_request (
                request_id, recipient_id, blood_type, units_needed, units_fulfilled,
                urgency, hospital_name, patient_name, doctor_name, contact_number,
                medical_reason, lat, lng, date_requested, required_by,
                status, attempts
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)
            ON CONFLICT(request_id) DO UPDATE SET
                units_fulfilled = excluded.units_fulfilled,
                urgency = excluded.urgency,
                required_by = excluded.required_by,
                status = excluded.status,
                attempts = excluded.attempts
            "#,
            params![
                request.id,
                request.recipient_id,
                request.blood_type.as_str(),
                request.units_needed,
                request.units_fulfilled,
                request.urgency.as_str(),
                request.hospital_name,
                request.patient_name,
                request.doctor_name,
                request.contact_number,
                request.medical_reason,
                request.location.lat,
                request.location.lng,
                request.date_requested,
                request.required_by,
                request.status.as_str(),
                request.attempts,
            ],
        )?;
        Ok(())
    }

    async fn find_request(&self, request_id: &str) -> RepositoryResult<Option<BloodRequest>> {
        let conn = self.get_conn()?;
        let sql = format!("{} WHERE request_id = ?1", SELECT_REQUEST);
        let request = conn
            .query_row(&sql, params![request_id], Self::map_row)
            .optional()?;
        Ok(request)
    }

    async fn list_by_status(&self, status: RequestStatus) -> RepositoryResult<Vec<BloodRequest>> {
        let conn = self.get_conn()?;
        let sql = format!(
            "{} WHERE status = ?1 ORDER BY date_requested, request_id",
            SELECT_REQUEST
        );
        let mut stmt = conn.prepare(&sql)?;
        let requests = stmt
            .query_map(params![status.as_str()], Self::map_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(requests)
    }

    async fn list_by_recipient(&self, recipient_id: &str) -> RepositoryResult<Vec<BloodRequest>> {
        let conn = self.get_conn()?;
        let sql = format!(
            "{} WHERE recipient_id = ?1 ORDER BY date_requested DESC, request_id",
            SELECT_REQUEST
        );
        let mut stmt = conn.prepare(&sql)?;
        let requests = stmt
            .query_map(params![recipient_id], Self::map_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(requests)
    }
}
