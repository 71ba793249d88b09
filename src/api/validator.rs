// ==========================================
// 血液供应匹配引擎 - 输入校验器
// ==========================================
// 职责: 展示层输入的格式与范围校验, 把原始字符串转换为领域类型
// 红线: 校验失败统一返回 ApiError::InvalidInput, 不进入引擎
// ==========================================

use crate::api::error::{ApiError, ApiResult};
use crate::domain::blood_bank::GeoPoint;
use crate::domain::types::{BloodType, Urgency};

/// 附近血库搜索半径范围（千米）
pub const MIN_SEARCH_RADIUS_KM: f64 = 1.0;
pub const MAX_SEARCH_RADIUS_KM: f64 = 50.0;
pub const DEFAULT_SEARCH_RADIUS_KM: f64 = 10.0;

/// 单次请求/献血的单位数上限
pub const MAX_UNITS_PER_SUBMISSION: u32 = 50;

pub fn parse_blood_type(raw: &str) -> ApiResult<BloodType> {
    raw.parse::<BloodType>()
        .map_err(|e| ApiError::InvalidInput(e.to_string()))
}

pub fn parse_urgency(raw: &str) -> ApiResult<Urgency> {
    Urgency::parse(raw).ok_or_else(|| ApiError::InvalidInput(format!("无效的紧急等级: {}", raw)))
}

/// 校验经纬度范围
pub fn validate_coordinates(lat: f64, lng: f64) -> ApiResult<GeoPoint> {
    if !lat.is_finite() || !(-90.0..=90.0).contains(&lat) {
        return Err(ApiError::InvalidInput(format!("纬度超出范围: {}", lat)));
    }
    if !lng.is_finite() || !(-180.0..=180.0).contains(&lng) {
        return Err(ApiError::InvalidInput(format!("经度超出范围: {}", lng)));
    }
    Ok(GeoPoint::new(lat, lng))
}

/// 非空字符串（返回去除首尾空白后的值）
pub fn require_non_empty(field: &str, value: &str) -> ApiResult<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ApiError::InvalidInput(format!("{}不能为空", field)));
    }
    Ok(trimmed.to_string())
}

/// 可选文本: 去除首尾空白, 空串视为未填写
pub fn optional_text(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// 联系电话: 可带前导 '+', 允许空格 / '-' / 括号分隔, 数字 7-15 位
pub fn validate_contact_number(value: Option<String>) -> ApiResult<Option<String>> {
    let number = match optional_text(value) {
        Some(n) => n,
        None => return Ok(None),
    };
    let body = number.strip_prefix('+').unwrap_or(&number);
    let allowed = body
        .chars()
        .all(|c| c.is_ascii_digit() || matches!(c, ' ' | '-' | '(' | ')'));
    let digits = body.chars().filter(|c| c.is_ascii_digit()).count();
    if !allowed || !(7..=15).contains(&digits) {
        return Err(ApiError::InvalidInput(format!("联系电话格式无效: {}", number)));
    }
    Ok(Some(number))
}

/// 搜索半径; None 使用默认值
pub fn validate_radius(radius_km: Option<f64>) -> ApiResult<f64> {
    let radius = radius_km.unwrap_or(DEFAULT_SEARCH_RADIUS_KM);
    if !radius.is_finite() || !(MIN_SEARCH_RADIUS_KM..=MAX_SEARCH_RADIUS_KM).contains(&radius) {
        return Err(ApiError::InvalidInput(format!(
            "搜索半径必须在 {}-{} 千米之间: {}",
            MIN_SEARCH_RADIUS_KM, MAX_SEARCH_RADIUS_KM, radius
        )));
    }
    Ok(radius)
}

pub fn validate_units(units: u32) -> ApiResult<u32> {
    if units == 0 || units > MAX_UNITS_PER_SUBMISSION {
        return Err(ApiError::InvalidInput(format!(
            "单位数必须在 1-{} 之间: {}",
            MAX_UNITS_PER_SUBMISSION, units
        )));
    }
    Ok(units)
}
