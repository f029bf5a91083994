use bigdecimal::{BigDecimal, Zero};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// 折扣方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DiscountType {
    #[default]
    #[serde(rename = "", alias = "None")]
    None,
    #[serde(rename = "Item-wise")]
    ItemWise,
    #[serde(rename = "Invoice-wise")]
    InvoiceWise,
}

impl DiscountType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiscountType::None => "None",
            DiscountType::ItemWise => "Item-wise",
            DiscountType::InvoiceWise => "Invoice-wise",
        }
    }
}

impl fmt::Display for DiscountType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DiscountType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "" | "None" => Ok(DiscountType::None),
            "Item-wise" => Ok(DiscountType::ItemWise),
            "Invoice-wise" => Ok(DiscountType::InvoiceWise),
            other => Err(format!("unknown discount type: {}", other)),
        }
    }
}

/// 单据类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DocumentKind {
    #[serde(rename = "Purchase Estimate")]
    Estimate,
    #[default]
    #[serde(rename = "Purchase Invoice")]
    Invoice,
}

/// 提交状态 (0 草稿 / 1 已提交 / 2 已取消)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DocStatus {
    #[default]
    Draft,
    Submitted,
    Cancelled,
}

/// 业务状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DocumentState {
    #[default]
    Draft,
    Submitted,
    Converted,
    Cancelled,
}

/// 单据明细行
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LineItem {
    pub item_code: String,
    pub qty: Option<BigDecimal>,
    pub rate: Option<BigDecimal>,
    pub discount_percentage: Option<BigDecimal>, // 供应商规则或手工折扣 (0-100)
    pub discount_amount: BigDecimal,
    pub amount: BigDecimal,
    pub promotion_percentage: Option<BigDecimal>, // 季节性促销叠加折扣
    pub promotion_applied: Option<String>,
}

impl LineItem {
    pub fn new(item_code: impl Into<String>, qty: BigDecimal, rate: BigDecimal) -> Self {
        Self {
            item_code: item_code.into(),
            qty: Some(qty),
            rate: Some(rate),
            ..Default::default()
        }
    }

    pub fn with_discount_percentage(mut self, pct: BigDecimal) -> Self {
        self.discount_percentage = Some(pct);
        self
    }

    /// 数量和单价都存在且非负时才参与合计
    pub fn is_contributing(&self) -> bool {
        matches!(
            (&self.qty, &self.rate),
            (Some(q), Some(r)) if *q >= BigDecimal::zero() && *r >= BigDecimal::zero()
        )
    }

    /// 折前金额 qty × rate；不参与合计时返回 None
    pub fn gross_amount(&self) -> Option<BigDecimal> {
        if !self.is_contributing() {
            return None;
        }
        match (&self.qty, &self.rate) {
            (Some(q), Some(r)) => Some(q * r),
            _ => None,
        }
    }

    /// 有效折扣率 = 规则/手工折扣 + 促销折扣，上限 100
    pub fn effective_percentage(&self) -> Option<BigDecimal> {
        let hundred = BigDecimal::from(100);
        let total = match (&self.discount_percentage, &self.promotion_percentage) {
            (None, None) => return None,
            (Some(p), None) | (None, Some(p)) => p.clone(),
            (Some(a), Some(b)) => a + b,
        };
        if total > hundred {
            Some(hundred)
        } else {
            Some(total)
        }
    }

    /// 清空全部折扣字段
    pub fn clear_discounts(&mut self) {
        self.discount_percentage = None;
        self.discount_amount = BigDecimal::zero();
        self.promotion_percentage = None;
        self.promotion_applied = None;
    }
}

/// 采购单据 (Purchase Estimate / Purchase Invoice)
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PurchaseDocument {
    pub name: Option<String>,
    pub kind: DocumentKind,
    pub supplier: Option<String>,
    pub posting_date: Option<NaiveDate>,
    pub docstatus: DocStatus,
    pub status: DocumentState,
    pub apply_discount: bool,
    pub discount_type: DiscountType,
    pub total_discount_amount: Option<BigDecimal>, // 单据级折扣 (整单折扣 + 返利)
    pub effective_discount_percentage: BigDecimal,
    pub turnover_incentive: BigDecimal,
    pub total_qty: BigDecimal,
    pub total: BigDecimal,
    pub grand_total: BigDecimal,
    pub items: Vec<LineItem>,
    pub purchase_estimate_ref: Option<String>,
    pub converted_invoice: Option<String>,
}

impl PurchaseDocument {
    pub fn new(kind: DocumentKind, supplier: impl Into<String>) -> Self {
        Self {
            kind,
            supplier: Some(supplier.into()),
            ..Default::default()
        }
    }

    pub fn with_items(mut self, items: Vec<LineItem>) -> Self {
        self.items = items;
        self
    }

    /// 单据级折扣，未设置按 0 处理
    pub fn document_discount(&self) -> BigDecimal {
        self.total_discount_amount.clone().unwrap_or_else(BigDecimal::zero)
    }

    /// 参与合计的明细折前金额之和
    pub fn gross_total(&self) -> BigDecimal {
        self.items
            .iter()
            .filter_map(LineItem::gross_amount)
            .fold(BigDecimal::zero(), |acc, g| acc + g)
    }

    /// 参与合计的明细折扣金额之和
    pub fn item_discount_total(&self) -> BigDecimal {
        self.items
            .iter()
            .filter(|i| i.is_contributing())
            .fold(BigDecimal::zero(), |acc, i| acc + &i.discount_amount)
    }

    pub fn is_estimate(&self) -> bool {
        self.kind == DocumentKind::Estimate
    }
}
