// ==========================================
// 血液供应匹配引擎 - SQLite 连接初始化
// ==========================================
// 目标:
// - 统一所有 Connection::open 的 PRAGMA 行为
// - 统一 busy_timeout, 减少并发写入时的偶发 busy 错误
// - 建表脚本集中在此处, 幂等执行
// ==========================================

use rusqlite::Connection;
use rusqlite::OptionalExtension;
use std::time::Duration;

/// 默认 busy_timeout（毫秒）
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

/// 当前代码所期望的 schema_version
pub const CURRENT_SCHEMA_VERSION: i64 = 1;

/// 配置 SQLite 连接的统一 PRAGMA
///
/// 说明：
/// - foreign_keys 需要"每个连接"单独开启
/// - busy_timeout 需要"每个连接"单独配置
pub fn configure_sqlite_connection(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    conn.busy_timeout(Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS))?;
    Ok(())
}

/// 打开 SQLite 连接并应用统一配置
pub fn open_sqlite_connection(db_path: &str) -> rusqlite::Result<Connection> {
    let conn = Connection::open(db_path)?;
    configure_sqlite_connection(&conn)?;
    Ok(conn)
}

/// 打开内存数据库并建表（测试与演示使用）
pub fn open_in_memory() -> rusqlite::Result<Connection> {
    let conn = Connection::open_in_memory()?;
    configure_sqlite_connection(&conn)?;
    init_schema(&conn)?;
    Ok(conn)
}

/// 初始化 schema（幂等）
pub fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS config_kv (
            scope_id TEXT NOT NULL DEFAULT 'global',
            key TEXT NOT NULL,
            value TEXT NOT NULL,
            updated_at TEXT NOT NULL DEFAULT (datetime('now')),
            PRIMARY KEY (scope_id, key)
        );

        CREATE TABLE IF NOT EXISTS blood_bank (
            bank_id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            address TEXT NOT NULL,
            phone TEXT,
            email TEXT,
            lat REAL NOT NULL,
            lng REAL NOT NULL,
            open_time TEXT NOT NULL,
            close_time TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS blood_unit (
            batch_id TEXT PRIMARY KEY,
            bank_id TEXT NOT NULL REFERENCES blood_bank(bank_id),
            blood_type TEXT NOT NULL,
            quantity INTEGER NOT NULL CHECK (quantity >= 0),
            collected_at TEXT NOT NULL,
            expires_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_blood_unit_bank_type
          ON blood_unit(bank_id, blood_type, expires_at);

        CREATE TABLE IF NOT EXISTS blood_request (
            request_id TEXT PRIMARY KEY,
            recipient_id TEXT NOT NULL,
            blood_type TEXT NOT NULL,
            units_needed INTEGER NOT NULL,
            units_fulfilled INTEGER NOT NULL DEFAULT 0,
            urgency TEXT NOT NULL,
            hospital_name TEXT,
            patient_name TEXT,
            doctor_name TEXT,
            contact_number TEXT,
            medical_reason TEXT,
            lat REAL NOT NULL,
            lng REAL NOT NULL,
            date_requested TEXT NOT NULL,
            required_by TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'active',
            attempts INTEGER NOT NULL DEFAULT 0
        );

        CREATE INDEX IF NOT EXISTS idx_blood_request_status
          ON blood_request(status, urgency);

        CREATE TABLE IF NOT EXISTS donation_record (
            donation_id TEXT PRIMARY KEY,
            donor_id TEXT NOT NULL,
            bank_id TEXT NOT NULL REFERENCES blood_bank(bank_id),
            blood_type TEXT NOT NULL,
            units INTEGER NOT NULL,
            scheduled_date TEXT NOT NULL,
            status TEXT NOT NULL,
            notes TEXT,
            batch_id TEXT,
            completed_at TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_donation_donor
          ON donation_record(donor_id, scheduled_date);
        "#,
    )?;

    conn.execute(
        "INSERT OR IGNORE INTO schema_version (version) VALUES (?1)",
        [CURRENT_SCHEMA_VERSION],
    )?;

    Ok(())
}

/// 读取 schema_version（若表不存在则返回 None）
pub fn read_schema_version(conn: &Connection) -> rusqlite::Result<Option<i64>> {
    let has_table: bool = conn
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version' LIMIT 1",
            [],
            |_row| Ok(true),
        )
        .optional()?
        .unwrap_or(false);

    if !has_table {
        return Ok(None);
    }

    let v: Option<i64> =
        conn.query_row("SELECT MAX(version) FROM schema_version", [], |row| row.get(0))?;
    Ok(v)
}
