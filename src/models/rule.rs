use bigdecimal::{BigDecimal, Zero};
use chrono::NaiveDate;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::error::AppError;

/// 供应商-商品折扣规则
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscountRule {
    pub item_code: String,
    pub discount_percentage: BigDecimal,
}

/// 单个供应商的规则集，按商品编码唯一 (保序)
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RuleSet {
    rules: IndexMap<String, BigDecimal>,
}

impl RuleSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// 从规则列表构建，同一商品出现两次视为数据错误
    pub fn from_rules(rules: impl IntoIterator<Item = DiscountRule>) -> Result<Self, AppError> {
        let mut set = Self::new();
        for rule in rules {
            let item_code = rule.item_code.clone();
            if !set.insert(rule) {
                return Err(AppError::Validation(format!(
                    "duplicate discount rule for item {}",
                    item_code
                )));
            }
        }
        Ok(set)
    }

    /// 插入规则；该商品已有规则时保留原规则并返回 false
    pub fn insert(&mut self, rule: DiscountRule) -> bool {
        if self.rules.contains_key(&rule.item_code) {
            return false;
        }
        self.rules.insert(rule.item_code, rule.discount_percentage);
        true
    }

    pub fn get(&self, item_code: &str) -> Option<&BigDecimal> {
        self.rules.get(item_code)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn to_rules(&self) -> Vec<DiscountRule> {
        self.rules
            .iter()
            .map(|(code, pct)| DiscountRule {
                item_code: code.clone(),
                discount_percentage: pct.clone(),
            })
            .collect()
    }
}

fn validate_percentage(pct: &BigDecimal, what: &str) -> Result<(), AppError> {
    if *pct <= BigDecimal::zero() || *pct > BigDecimal::from(100) {
        return Err(AppError::Validation(format!(
            "{} percentage must be between 0.01 and 100",
            what
        )));
    }
    Ok(())
}

/// 采购折扣协议 (Purchase Discount Agreement)
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct DiscountAgreement {
    pub supplier: String,
    pub item_code: String,
    pub discount_percentage: BigDecimal,
    pub valid_from: Option<NaiveDate>,
    pub valid_to: Option<NaiveDate>,
    pub is_active: bool,
}

impl DiscountAgreement {
    pub fn validate(&self) -> Result<(), AppError> {
        if let (Some(from), Some(to)) = (self.valid_from, self.valid_to) {
            if from > to {
                return Err(AppError::Validation(
                    "Valid To date cannot be earlier than Valid From date".to_string(),
                ));
            }
        }
        validate_percentage(&self.discount_percentage, "Discount")
    }

    pub fn is_active_on(&self, date: NaiveDate) -> bool {
        self.is_active
            && self.valid_from.map_or(true, |from| from <= date)
            && self.valid_to.map_or(true, |to| date <= to)
    }

    pub fn to_rule(&self) -> DiscountRule {
        DiscountRule {
            item_code: self.item_code.clone(),
            discount_percentage: self.discount_percentage.clone(),
        }
    }
}

/// 季节性促销
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeasonalPromotion {
    pub name: String,
    pub promotion_name: String,
    pub discount_percentage: BigDecimal,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub is_active: bool,
    #[serde(default)]
    pub applicable_items: Vec<String>, // 为空表示全部商品适用
}

impl SeasonalPromotion {
    pub fn validate(&self) -> Result<(), AppError> {
        if self.start_date > self.end_date {
            return Err(AppError::Validation(
                "End date cannot be earlier than start date".to_string(),
            ));
        }
        Ok(())
    }

    pub fn is_active_on(&self, date: NaiveDate) -> bool {
        self.is_active && self.start_date <= date && date <= self.end_date
    }

    pub fn applies_to(&self, item_code: &str) -> bool {
        self.applicable_items.is_empty() || self.applicable_items.iter().any(|c| c == item_code)
    }
}

/// 年度采购额返利方案
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct TurnoverIncentive {
    pub name: String,
    pub min_turnover: BigDecimal,
    pub incentive_percentage: BigDecimal,
    pub max_incentive_amount: BigDecimal, // 0 表示不封顶
    pub is_active: bool,
}

impl TurnoverIncentive {
    pub fn validate(&self) -> Result<(), AppError> {
        if self.min_turnover <= BigDecimal::zero() {
            return Err(AppError::Validation(
                "Minimum turnover must be greater than zero".to_string(),
            ));
        }
        if self.max_incentive_amount < BigDecimal::zero() {
            return Err(AppError::Validation(
                "Maximum incentive amount cannot be negative".to_string(),
            ));
        }
        validate_percentage(&self.incentive_percentage, "Incentive")
    }

    /// 选出适用方案：启用且门槛不高于年采购额中门槛最高的一个
    pub fn select<'a>(
        schemes: &'a [TurnoverIncentive],
        yearly_turnover: &BigDecimal,
    ) -> Option<&'a TurnoverIncentive> {
        schemes
            .iter()
            .filter(|s| s.is_active && s.min_turnover <= *yearly_turnover)
            .max_by(|a, b| a.min_turnover.cmp(&b.min_turnover))
    }
}

/// 一次折扣计算所需的全部外部数据
#[derive(Debug, Clone, Default)]
pub struct DiscountContext {
    pub supplier_rules: RuleSet,
    pub supplier_default_discount: Option<BigDecimal>,
    pub promotions: Vec<SeasonalPromotion>,
    pub turnover_incentive: Option<TurnoverIncentive>,
}
