use bigdecimal::{BigDecimal, Zero};
use rayon::prelude::*;

use crate::models::{DiscountContext, DiscountType, PurchaseDocument};
use crate::service::calculator::Calculator;

/// 整单折扣引擎
///
/// 依次应用：明细/整单折扣 -> 季节性促销 -> 年度返利 -> 合计。
/// 每次调用都从干净的单据级状态开始，重复调用结果一致。
#[derive(Debug, Clone, Copy, Default)]
pub struct DiscountEngine {
    calculator: Calculator,
}

impl DiscountEngine {
    pub fn new(calculator: Calculator) -> Self {
        Self { calculator }
    }

    pub fn calculator(&self) -> &Calculator {
        &self.calculator
    }

    pub fn apply_all(&self, doc: &PurchaseDocument, ctx: &DiscountContext) -> PurchaseDocument {
        let calc = &self.calculator;
        // 未开启折扣只重算合计；清除折扣由 reset_discounts 显式完成
        if !doc.apply_discount {
            return calc.recompute_document(doc);
        }

        let mut out = doc.clone();
        out.total_discount_amount = Some(BigDecimal::zero());
        out.turnover_incentive = BigDecimal::zero();
        for item in out.items.iter_mut() {
            // 促销折扣额由本轮重新计算
            if item.promotion_percentage.is_some() {
                item.discount_amount = BigDecimal::zero();
            }
            item.promotion_percentage = None;
            item.promotion_applied = None;
        }

        if out.discount_type == DiscountType::ItemWise {
            out = calc.apply_discount_rules(&out, Some(&ctx.supplier_rules));
        }

        self.apply_promotions(&mut out, ctx);
        out = calc.recompute_document(&out);

        let mut document_discount = BigDecimal::zero();

        if out.discount_type == DiscountType::InvoiceWise {
            if let Some(pct) = ctx
                .supplier_default_discount
                .as_ref()
                .filter(|p| **p > BigDecimal::zero())
            {
                document_discount += calc.percentage_of(&out.total, pct);
            }
        }

        if let Some(scheme) = &ctx.turnover_incentive {
            let mut incentive = calc.percentage_of(&out.total, &scheme.incentive_percentage);
            if scheme.max_incentive_amount > BigDecimal::zero() && incentive > scheme.max_incentive_amount {
                incentive = scheme.max_incentive_amount.clone();
            }
            tracing::debug!("turnover incentive {} -> {}", scheme.name, incentive);
            document_discount += &incentive;
            out.turnover_incentive = incentive;
        }

        out.total_discount_amount = Some(document_discount);
        out = calc.recompute_document(&out);
        out.effective_discount_percentage = self.effective_percentage(&out);

        tracing::info!(
            "discounts applied: supplier={:?}, type={}, total={}, discount={}, grand_total={}",
            out.supplier,
            out.discount_type,
            out.total,
            out.document_discount(),
            out.grand_total
        );
        out
    }

    /// 促销折扣率叠加到命中商品，记录最后一个促销名称
    fn apply_promotions(&self, doc: &mut PurchaseDocument, ctx: &DiscountContext) {
        for promotion in &ctx.promotions {
            for item in doc.items.iter_mut() {
                if !promotion.applies_to(&item.item_code) {
                    continue;
                }
                let stacked = match &item.promotion_percentage {
                    Some(p) => p + &promotion.discount_percentage,
                    None => promotion.discount_percentage.clone(),
                };
                item.promotion_percentage = Some(stacked);
                item.promotion_applied = Some(promotion.promotion_name.clone());
            }
        }
    }

    /// (明细折扣 + 单据折扣) / 折前合计 × 100
    fn effective_percentage(&self, doc: &PurchaseDocument) -> BigDecimal {
        let gross = doc.gross_total();
        if gross <= BigDecimal::zero() {
            return BigDecimal::zero();
        }
        let discount = doc.item_discount_total() + doc.document_discount();
        self.calculator.round(&(discount * BigDecimal::from(100) / gross))
    }

    /// 批量重算 (并行)，结果顺序与输入一致
    pub fn recompute_batch(&self, jobs: &[(PurchaseDocument, DiscountContext)]) -> Vec<PurchaseDocument> {
        jobs.par_iter()
            .map(|(doc, ctx)| self.apply_all(doc, ctx))
            .collect()
    }
}
