use bigdecimal::BigDecimal;
use chrono::NaiveDate;
use sqlx::{FromRow, PgPool};
use std::collections::HashMap;

use crate::models::{DiscountAgreement, SeasonalPromotion, TurnoverIncentive};

/// 查询供应商在指定日期有效的折扣协议
pub async fn list_active_agreements(
    pool: &PgPool,
    supplier: &str,
    on: NaiveDate,
) -> Result<Vec<DiscountAgreement>, sqlx::Error> {
    sqlx::query_as::<_, DiscountAgreement>(
        r#"
        SELECT supplier, item_code, discount_percentage, valid_from, valid_to, is_active
        FROM t_purchase_discount_agreement
        WHERE supplier = $1
          AND is_active = true
          AND (valid_from IS NULL OR valid_from <= $2)
          AND (valid_to IS NULL OR valid_to >= $2)
        ORDER BY item_code
        "#
    )
    .bind(supplier)
    .bind(on)
    .fetch_all(pool)
    .await
}

/// 查询供应商默认整单折扣率
pub async fn get_supplier_default_discount(
    pool: &PgPool,
    supplier: &str,
) -> Result<Option<BigDecimal>, sqlx::Error> {
    let row: Option<(Option<BigDecimal>,)> = sqlx::query_as(
        r#"
        SELECT default_invoice_discount
        FROM t_supplier
        WHERE name = $1
        "#
    )
    .bind(supplier)
    .fetch_optional(pool)
    .await?;

    Ok(row.and_then(|(pct,)| pct))
}

#[derive(Debug, FromRow)]
struct PromotionRow {
    name: String,
    promotion_name: String,
    discount_percentage: BigDecimal,
    start_date: NaiveDate,
    end_date: NaiveDate,
    is_active: bool,
}

#[derive(Debug, FromRow)]
struct PromotionItemRow {
    promotion: String,
    item_code: String,
}

/// 查询指定日期有效的季节性促销 (含适用商品)
pub async fn list_active_promotions(
    pool: &PgPool,
    on: NaiveDate,
) -> Result<Vec<SeasonalPromotion>, sqlx::Error> {
    let rows = sqlx::query_as::<_, PromotionRow>(
        r#"
        SELECT name, promotion_name, discount_percentage, start_date, end_date, is_active
        FROM t_seasonal_promotion
        WHERE is_active = true
          AND start_date <= $1
          AND end_date >= $1
        ORDER BY start_date, name
        "#
    )
    .bind(on)
    .fetch_all(pool)
    .await?;

    if rows.is_empty() {
        return Ok(Vec::new());
    }

    let names: Vec<String> = rows.iter().map(|r| r.name.clone()).collect();
    let items = sqlx::query_as::<_, PromotionItemRow>(
        r#"
        SELECT promotion, item_code
        FROM t_seasonal_promotion_item
        WHERE promotion = ANY($1)
        "#
    )
    .bind(&names)
    .fetch_all(pool)
    .await?;

    let mut by_promotion: HashMap<String, Vec<String>> = HashMap::new();
    for item in items {
        by_promotion.entry(item.promotion).or_default().push(item.item_code);
    }

    Ok(rows
        .into_iter()
        .map(|r| SeasonalPromotion {
            applicable_items: by_promotion.remove(&r.name).unwrap_or_default(),
            name: r.name,
            promotion_name: r.promotion_name,
            discount_percentage: r.discount_percentage,
            start_date: r.start_date,
            end_date: r.end_date,
            is_active: r.is_active,
        })
        .collect())
}

/// 查询启用的返利方案 (门槛降序)
pub async fn list_active_incentives(pool: &PgPool) -> Result<Vec<TurnoverIncentive>, sqlx::Error> {
    sqlx::query_as::<_, TurnoverIncentive>(
        r#"
        SELECT name, min_turnover, incentive_percentage,
               coalesce(max_incentive_amount, 0) as max_incentive_amount,
               is_active
        FROM t_turnover_incentive
        WHERE is_active = true
        ORDER BY min_turnover DESC
        "#
    )
    .fetch_all(pool)
    .await
}

/// 统计供应商在区间内已提交发票的采购额
pub async fn yearly_turnover(
    pool: &PgPool,
    supplier: &str,
    from: NaiveDate,
    to: NaiveDate,
) -> Result<BigDecimal, sqlx::Error> {
    sqlx::query_scalar::<_, BigDecimal>(
        r#"
        SELECT coalesce(sum(grand_total), 0)
        FROM t_purchase_invoice
        WHERE supplier = $1
          AND posting_date BETWEEN $2 AND $3
          AND docstatus = 1
        "#
    )
    .bind(supplier)
    .bind(from)
    .bind(to)
    .fetch_one(pool)
    .await
}
