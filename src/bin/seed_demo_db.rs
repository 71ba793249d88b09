// ==========================================
// 演示数据库初始化
// ==========================================
// 用法: seed_demo_db [db_path]
// 已存在的数据库先备份再重建, 之后写入仪表盘演示数据:
// 三个纽约血库及其库存、一条受血者请求、两条献血预约
// ==========================================

use anyhow::Context;
use chrono::{DateTime, Duration, Local, NaiveTime, Utc};
use std::fs;
use std::path::Path;

use lifebank_matching::api::{ScheduleDonationInput, SubmitRequestInput};
use lifebank_matching::app::{get_default_db_path, AppState};
use lifebank_matching::domain::blood_bank::{BloodBank, GeoPoint, OperatingHours};
use lifebank_matching::domain::types::BloodType;
use lifebank_matching::logging;

struct BankSeed {
    id: &'static str,
    name: &'static str,
    address: &'static str,
    phone: &'static str,
    email: &'static str,
    lat: f64,
    lng: f64,
    open: u32,
    close: u32,
    stock: &'static [(BloodType, u32)],
}

const BANKS: &[BankSeed] = &[
    BankSeed {
        id: "bb1",
        name: "City General Blood Bank",
        address: "123 Main St, New York, NY 10001",
        phone: "(555) 123-4567",
        email: "info@citygeneral.com",
        lat: 40.7580,
        lng: -73.9855,
        open: 8,
        close: 18,
        stock: &[
            (BloodType::APos, 45),
            (BloodType::ANeg, 23),
            (BloodType::BPos, 34),
            (BloodType::BNeg, 12),
            (BloodType::AbPos, 8),
            (BloodType::AbNeg, 5),
            (BloodType::OPos, 67),
            (BloodType::ONeg, 28),
        ],
    },
    BankSeed {
        id: "bb2",
        name: "Metropolitan Blood Center",
        address: "456 Park Ave, New York, NY 10016",
        phone: "(555) 234-5678",
        email: "contact@metrobc.com",
        lat: 40.7505,
        lng: -73.9934,
        open: 6,
        close: 20,
        stock: &[(BloodType::AbNeg, 12), (BloodType::BPos, 28)],
    },
    BankSeed {
        id: "bb3",
        name: "Community Health Blood Bank",
        address: "789 Broadway, New York, NY 10003",
        phone: "(555) 345-6789",
        email: "help@communityhealth.org",
        lat: 40.7282,
        lng: -73.9942,
        open: 7,
        close: 19,
        stock: &[(BloodType::ONeg, 18), (BloodType::ANeg, 25)],
    },
];

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init();

    let db_path = std::env::args().nth(1).unwrap_or_else(get_default_db_path);
    backup_and_reset_db(&db_path)?;

    let state = AppState::new(db_path.clone())?;
    let now = Utc::now();

    seed_banks(&state, now).await?;
    seed_request(&state, now).await?;
    seed_donations(&state, now).await?;

    for snapshot in state.dashboard_api.all_inventories(now).await? {
        let summary = state.dashboard_api.bank_summary(&snapshot.bank_id, now).await?;
        eprintln!(
            "{:<32} total={:>4} critical={} donors={}",
            summary.bank_name,
            summary.total_units,
            summary.critical_type_count(),
            summary.active_donors
        );
    }
    eprintln!("Seeded demo database: {}", db_path);
    Ok(())
}

fn backup_and_reset_db(db_path: &str) -> anyhow::Result<()> {
    let path = Path::new(db_path);
    if !path.exists() {
        return Ok(());
    }

    let ts = Local::now().format("%Y%m%d_%H%M%S").to_string();
    let backup_path = format!("{}.bak.{}", db_path, ts);
    fs::copy(path, &backup_path).with_context(|| format!("备份数据库失败: {}", db_path))?;
    fs::remove_file(path)?;

    eprintln!("Backed up {} -> {}", db_path, backup_path);
    Ok(())
}

fn hour(h: u32) -> anyhow::Result<NaiveTime> {
    NaiveTime::from_hms_opt(h, 0, 0).with_context(|| format!("无效的营业时间: {}", h))
}

async fn seed_banks(state: &AppState, now: DateTime<Utc>) -> anyhow::Result<()> {
    let ledger = state.engine.ledger();

    for seed in BANKS {
        let mut bank = BloodBank::new(seed.id, seed.name, GeoPoint::new(seed.lat, seed.lng));
        bank.address = seed.address.to_string();
        bank.phone = Some(seed.phone.to_string());
        bank.email = Some(seed.email.to_string());
        bank.operating_hours = OperatingHours::new(hour(seed.open)?, hour(seed.close)?);
        state.engine.register_bank(bank).await?;

        // 每个血型拆成两批: 约三分之一临近过期
        for &(blood_type, units) in seed.stock {
            let older = units / 3;
            let fresh = units - older;
            if older > 0 {
                ledger
                    .add_batch(
                        seed.id,
                        blood_type,
                        older,
                        now - Duration::days(38),
                        now + Duration::days(4),
                        now,
                    )
                    .await?;
            }
            ledger
                .add_batch(
                    seed.id,
                    blood_type,
                    fresh,
                    now - Duration::days(5),
                    now + Duration::days(37),
                    now,
                )
                .await?;
        }
    }
    Ok(())
}

async fn seed_request(state: &AppState, now: DateTime<Utc>) -> anyhow::Result<()> {
    let request = state
        .request_api
        .submit(
            SubmitRequestInput {
                recipient_id: "recipient-1".to_string(),
                blood_type: "A+".to_string(),
                units_needed: 3,
                urgency: "high".to_string(),
                hospital_name: Some("City General Hospital".to_string()),
                patient_name: Some("John Doe".to_string()),
                doctor_name: Some("Dr. Smith".to_string()),
                contact_number: Some("1234567890".to_string()),
                medical_reason: Some("Surgery".to_string()),
                lat: 40.7128,
                lng: -74.0060,
                required_by: now + Duration::days(5),
            },
            now,
        )
        .await?;
    eprintln!("Submitted request {}", request.id);
    Ok(())
}

async fn seed_donations(state: &AppState, now: DateTime<Utc>) -> anyhow::Result<()> {
    // 一个月前完成的献血, 下次可献血时间据此推算
    let donated_at = now - Duration::days(30);
    let past = state
        .donation_api
        .schedule(ScheduleDonationInput {
            donor_id: "donor-1".to_string(),
            bank_id: "bb2".to_string(),
            blood_type: "O+".to_string(),
            units: 1,
            scheduled_date: donated_at,
            notes: Some("Regular donation".to_string()),
        })
        .await?;
    state.donation_api.confirm(&past.id).await?;
    state.donation_api.complete(&past.id, donated_at).await?;

    let summary = state.donation_api.donor_summary("donor-1", now).await?;
    let next_date = summary.next_eligible_at.unwrap_or(now).max(now) + Duration::days(1);
    let upcoming = state
        .donation_api
        .schedule(ScheduleDonationInput {
            donor_id: "donor-1".to_string(),
            bank_id: "bb1".to_string(),
            blood_type: "O+".to_string(),
            units: 1,
            scheduled_date: next_date,
            notes: None,
        })
        .await?;
    state.donation_api.confirm(&upcoming.id).await?;
    Ok(())
}
