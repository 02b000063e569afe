//! 兑换码相关实体定义
//!
//! 包含兑换码、限制策略、统计数据、使用记录

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ReferralError, Result};

/// 兑换码长度
pub const CODE_LENGTH: usize = 6;

/// 兑换码字符表（A-Z0-9）
pub const CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// 每日限额的滚动窗口
pub fn daily_window() -> Duration {
    Duration::hours(24)
}

/// 每月限额的滚动窗口
pub fn monthly_window() -> Duration {
    Duration::days(30)
}

/// 规范化用户输入的兑换码
pub fn normalize_code(raw: &str) -> String {
    raw.trim().to_ascii_uppercase()
}

/// 是否符合兑换码格式
pub fn is_well_formed(code: &str) -> bool {
    code.len() == CODE_LENGTH && code.bytes().all(|b| CODE_ALPHABET.contains(&b))
}

/// 兑换限制策略
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeRestrictions {
    /// 滚动 24 小时内最大兑换次数
    pub max_per_day: u32,
    /// 滚动 30 天内最大兑换次数
    pub max_per_month: u32,
    /// 允许的专科（空表示不限）
    #[serde(default)]
    pub allowed_specialties: Vec<String>,
    /// 允许的地区（空表示不限）
    #[serde(default)]
    pub allowed_regions: Vec<String>,
}

impl CodeRestrictions {
    pub fn new(max_per_day: u32, max_per_month: u32) -> Self {
        Self {
            max_per_day,
            max_per_month,
            allowed_specialties: Vec::new(),
            allowed_regions: Vec::new(),
        }
    }

    /// 校验上下限：1 ≤ 每日 ≤ 100，1 ≤ 每月 ≤ 1000，且每日不超过每月
    pub fn validate(&self) -> Result<()> {
        if !(1..=100).contains(&self.max_per_day) {
            return Err(ReferralError::Validation(format!(
                "maxPerDay 必须在 1-100 之间: {}",
                self.max_per_day
            )));
        }
        if !(1..=1000).contains(&self.max_per_month) {
            return Err(ReferralError::Validation(format!(
                "maxPerMonth 必须在 1-1000 之间: {}",
                self.max_per_month
            )));
        }
        if self.max_per_day > self.max_per_month {
            return Err(ReferralError::Validation(
                "maxPerDay 不能大于 maxPerMonth".to_string(),
            ));
        }
        Ok(())
    }

    /// 检查专科与地区是否在允许范围内（忽略大小写）
    pub fn permits(&self, specialty: Option<&str>, region: Option<&str>) -> Result<()> {
        if !allowed(&self.allowed_specialties, specialty) {
            return Err(ReferralError::Validation(format!(
                "该兑换码不支持此专科: {}",
                specialty.unwrap_or("-")
            )));
        }
        if !allowed(&self.allowed_regions, region) {
            return Err(ReferralError::Validation(format!(
                "该兑换码不支持此地区: {}",
                region.unwrap_or("-")
            )));
        }
        Ok(())
    }
}

fn allowed(list: &[String], value: Option<&str>) -> bool {
    if list.is_empty() {
        return true;
    }
    value.is_some_and(|v| list.iter().any(|item| item.eq_ignore_ascii_case(v.trim())))
}

/// 兑换码统计
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct CodeAnalytics {
    pub total_referrals: i64,
    pub successful_referrals: i64,
    pub average_rating: f64,
    pub rating_count: i64,
    pub last_referral_date: Option<DateTime<Utc>>,
}

impl CodeAnalytics {
    /// 将一次评分计入平均分
    pub fn record_rating(&mut self, rating: u8) {
        let total = self.average_rating * self.rating_count as f64 + f64::from(rating);
        self.rating_count += 1;
        self.average_rating = total / self.rating_count as f64;
    }
}

/// 兑换码
///
/// 每个服务方同一时间最多一个有效码；code 创建后不可变
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ReferralCode {
    pub code: String,
    /// 签发服务方 ID
    pub owner_id: String,
    pub active: bool,
    pub expires_at: DateTime<Utc>,
    /// 累计兑换次数
    pub usage_count: i64,
    #[sqlx(default)]
    pub last_used_at: Option<DateTime<Utc>>,
    #[sqlx(json)]
    pub restrictions: CodeRestrictions,
    #[sqlx(flatten)]
    pub analytics: CodeAnalytics,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ReferralCode {
    /// 构造新签发的兑换码
    pub fn issue(
        code: String,
        owner_id: &str,
        restrictions: CodeRestrictions,
        validity: Duration,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            code,
            owner_id: owner_id.to_string(),
            active: true,
            expires_at: now + validity,
            usage_count: 0,
            last_used_at: None,
            restrictions,
            analytics: CodeAnalytics::default(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// 是否仍占用服务方的“有效码”名额
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.active && !self.is_expired(now)
    }

    /// 启用与有效期检查，先判停用再判过期
    pub fn ensure_redeemable(&self, now: DateTime<Utc>) -> Result<()> {
        if !self.active {
            return Err(ReferralError::Inactive(self.code.clone()));
        }
        if self.is_expired(now) {
            return Err(ReferralError::Expired(self.code.clone()));
        }
        Ok(())
    }

    /// 滚动窗口限额检查
    ///
    /// `daily_used`/`monthly_used` 为窗口内已有的兑换次数，不含本次
    pub fn check_quota(&self, daily_used: i64, monthly_used: i64) -> Result<()> {
        if daily_used >= i64::from(self.restrictions.max_per_day) {
            return Err(ReferralError::RateLimited {
                code: self.code.clone(),
                window: "每日",
                limit: self.restrictions.max_per_day,
            });
        }
        if monthly_used >= i64::from(self.restrictions.max_per_month) {
            return Err(ReferralError::RateLimited {
                code: self.code.clone(),
                window: "每月",
                limit: self.restrictions.max_per_month,
            });
        }
        Ok(())
    }
}

/// 兑换码使用记录
///
/// 每次成功兑换写入一条，滚动窗口限额基于此统计
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct CodeUsage {
    pub id: Uuid,
    pub code: String,
    pub used_at: DateTime<Utc>,
    #[sqlx(default)]
    pub referral_id: Option<Uuid>,
    #[sqlx(default)]
    pub idempotency_key: Option<String>,
}

/// 额度占用凭证
///
/// 转诊创建失败时凭此回滚额度
#[derive(Debug, Clone, PartialEq)]
pub struct QuotaReceipt {
    pub usage_id: Uuid,
    pub code: String,
    pub owner_id: String,
    pub used_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_code(now: DateTime<Utc>) -> ReferralCode {
        ReferralCode::issue(
            "AB12C3".to_string(),
            "provider-1",
            CodeRestrictions::new(2, 10),
            Duration::days(365),
            now,
        )
    }

    #[test]
    fn test_normalize_and_format() {
        assert_eq!(normalize_code("  ab12c3 "), "AB12C3");
        assert!(is_well_formed("AB12C3"));
        assert!(!is_well_formed("AB12C"));
        assert!(!is_well_formed("ab12c3"));
        assert!(!is_well_formed("AB-2C3"));
    }

    #[test]
    fn test_restrictions_bounds() {
        assert!(CodeRestrictions::new(1, 1).validate().is_ok());
        assert!(CodeRestrictions::new(100, 1000).validate().is_ok());
        assert!(CodeRestrictions::new(0, 10).validate().is_err());
        assert!(CodeRestrictions::new(101, 1000).validate().is_err());
        assert!(CodeRestrictions::new(5, 1001).validate().is_err());
        assert!(CodeRestrictions::new(50, 20).validate().is_err());
    }

    #[test]
    fn test_restrictions_permits() {
        let mut restrictions = CodeRestrictions::new(5, 50);
        assert!(restrictions.permits(None, None).is_ok());

        restrictions.allowed_specialties = vec!["Cardiology".to_string()];
        restrictions.allowed_regions = vec!["north".to_string()];
        assert!(restrictions.permits(Some("cardiology"), Some("NORTH")).is_ok());
        assert!(restrictions.permits(Some("Dermatology"), Some("north")).is_err());
        assert!(restrictions.permits(None, Some("north")).is_err());
        assert!(restrictions.permits(Some("Cardiology"), Some("south")).is_err());
    }

    #[test]
    fn test_expired_checked_after_inactive() {
        let now = Utc::now();
        let mut code = sample_code(now);
        assert!(code.ensure_redeemable(now).is_ok());

        assert!(matches!(
            code.ensure_redeemable(code.expires_at),
            Err(ReferralError::Expired(_))
        ));

        code.active = false;
        assert!(matches!(
            code.ensure_redeemable(code.expires_at),
            Err(ReferralError::Inactive(_))
        ));
    }

    #[test]
    fn test_check_quota() {
        let code = sample_code(Utc::now());
        assert!(code.check_quota(1, 1).is_ok());
        assert!(matches!(
            code.check_quota(2, 2),
            Err(ReferralError::RateLimited { window: "每日", .. })
        ));
        assert!(matches!(
            code.check_quota(0, 10),
            Err(ReferralError::RateLimited { window: "每月", .. })
        ));
    }

    #[test]
    fn test_record_rating() {
        let mut analytics = CodeAnalytics::default();
        analytics.record_rating(5);
        analytics.record_rating(3);
        assert_eq!(analytics.rating_count, 2);
        assert!((analytics.average_rating - 4.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_code_serialization_camel_case() {
        let code = sample_code(Utc::now());
        let json = serde_json::to_value(&code).unwrap();
        assert_eq!(json["ownerId"], "provider-1");
        assert_eq!(json["restrictions"]["maxPerDay"], 2);
        assert_eq!(json["analytics"]["totalReferrals"], 0);
    }
}
