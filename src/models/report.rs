use bigdecimal::{BigDecimal, Zero};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::service::calculator::round_half_up;

/// 折扣分析报表筛选条件
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReportFilters {
    pub from_date: Option<NaiveDate>,
    pub to_date: Option<NaiveDate>,
    pub supplier: Option<String>,
    pub discount_type: Option<String>,
    pub min_discount_amount: Option<BigDecimal>,
}

/// 折扣分析报表行 (仅已提交发票)
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct DiscountAnalysisRow {
    pub posting_date: NaiveDate,
    pub name: String,
    pub supplier: String,
    pub total: BigDecimal,
    pub total_discount_amount: BigDecimal,
    pub effective_discount_percentage: BigDecimal,
    pub discount_type: String,
    pub grand_total: BigDecimal,
    pub savings: BigDecimal,
}

/// 报表汇总
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportSummary {
    pub invoice_count: usize,
    pub total_amount: BigDecimal,
    pub total_discount: BigDecimal,
    pub total_grand: BigDecimal,
    pub average_discount_percentage: BigDecimal,
}

impl ReportSummary {
    pub fn from_rows(rows: &[DiscountAnalysisRow]) -> Self {
        let mut total_amount = BigDecimal::zero();
        let mut total_discount = BigDecimal::zero();
        let mut total_grand = BigDecimal::zero();

        for row in rows {
            total_amount += &row.total;
            total_discount += &row.total_discount_amount;
            total_grand += &row.grand_total;
        }

        let average_discount_percentage = if total_amount > BigDecimal::zero() {
            round_half_up(&(&total_discount * BigDecimal::from(100) / &total_amount), 2)
        } else {
            BigDecimal::zero()
        };

        Self {
            invoice_count: rows.len(),
            total_amount,
            total_discount,
            total_grand,
            average_discount_percentage,
        }
    }
}
