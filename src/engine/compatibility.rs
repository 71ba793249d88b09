// ==========================================
// 血液供应匹配引擎 - 血型相容性解析
// ==========================================
// 规则: 标准 ABO/Rh 红细胞相容表
// - 供血者的 A/B 抗原必须是受血者抗原的子集
// - Rh 阳性供血者只能给 Rh 阳性受血者
// 输出顺序: 同型优先, 其余按相容广度 (AB+ ... O-)
// 纯函数, 无状态
// ==========================================

use crate::domain::types::{BloodType, InvalidBloodType};

/// 供血者血型能否输给受血者
pub fn can_donate(donor: BloodType, recipient: BloodType) -> bool {
    let abo_ok = (!donor.has_a_antigen() || recipient.has_a_antigen())
        && (!donor.has_b_antigen() || recipient.has_b_antigen());
    let rh_ok = !donor.is_rh_positive() || recipient.is_rh_positive();
    abo_ok && rh_ok
}

/// 受血者可接受的供血血型（按优先顺序）
///
/// 同型在首位; 其余按 `BloodType::ALL` 的广度顺序, 万能供血者 O- 最后
pub fn compatible_donors(requested: BloodType) -> Vec<BloodType> {
    let mut donors = Vec::with_capacity(BloodType::ALL.len());
    donors.push(requested);
    donors.extend(
        BloodType::ALL
            .iter()
            .copied()
            .filter(|&donor| donor != requested && can_donate(donor, requested)),
    );
    donors
}

/// 供血血型可输给的受血血型
pub fn compatible_recipients(donor: BloodType) -> Vec<BloodType> {
    BloodType::ALL
        .iter()
        .copied()
        .filter(|&recipient| can_donate(donor, recipient))
        .collect()
}

/// 解析原始字符串并返回可接受的供血血型
pub fn parse_and_resolve(raw: &str) -> Result<Vec<BloodType>, InvalidBloodType> {
    let requested: BloodType = raw.parse()?;
    Ok(compatible_donors(requested))
}
