use bigdecimal::{BigDecimal, RoundingMode, Zero};

use crate::models::{DiscountType, LineItem, PurchaseDocument, RuleSet};

/// 币种精度下的四舍五入 (half-up)
pub fn round_half_up(value: &BigDecimal, precision: i64) -> BigDecimal {
    value.with_scale_round(precision, RoundingMode::HalfUp)
}

/// 折扣与合计计算器
///
/// 纯计算，不报错：数量或单价缺失的明细金额为 0 且不计入合计。
/// 每一步金额乘除后按 `precision` 位小数 half-up 取整，折扣率本身不取整。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Calculator {
    precision: i64,
}

impl Default for Calculator {
    fn default() -> Self {
        Self { precision: 2 }
    }
}

impl Calculator {
    pub fn new(precision: i64) -> Self {
        Self { precision }
    }

    pub fn precision(&self) -> i64 {
        self.precision
    }

    pub fn round(&self, value: &BigDecimal) -> BigDecimal {
        round_half_up(value, self.precision)
    }

    /// `base × pct / 100`，按币种精度取整
    pub fn percentage_of(&self, base: &BigDecimal, pct: &BigDecimal) -> BigDecimal {
        self.round(&(base * pct / BigDecimal::from(100)))
    }

    /// 重算单行
    ///
    /// `rules` 仅在单据开启折扣时传入；命中规则会覆盖该行折扣率。
    /// 折扣率为 None 时保留已有的 `discount_amount` (手工折扣额)。
    pub fn recompute_line(&self, item: &LineItem, rules: Option<&RuleSet>) -> LineItem {
        let mut line = item.clone();

        if let Some(pct) = rules.and_then(|r| r.get(&line.item_code)) {
            line.discount_percentage = Some(pct.clone());
        }

        let Some(gross) = line.gross_amount() else {
            line.amount = BigDecimal::zero();
            return line;
        };
        let gross = self.round(&gross);

        // 负折扣率按 0 处理
        if let Some(pct) = line.effective_percentage() {
            line.discount_amount = if pct > BigDecimal::zero() {
                self.percentage_of(&gross, &pct)
            } else {
                BigDecimal::zero()
            };
        }

        line.amount = self.round(&(&gross - &line.discount_amount));
        line
    }

    /// 重算单据合计，幂等
    pub fn recompute_document(&self, doc: &PurchaseDocument) -> PurchaseDocument {
        let mut out = doc.clone();
        let mut total_qty = BigDecimal::zero();
        let mut total = BigDecimal::zero();

        for item in out.items.iter_mut() {
            *item = self.recompute_line(item, None);
            if !item.is_contributing() {
                continue;
            }
            if let Some(qty) = &item.qty {
                total_qty += qty;
            }
            total += &item.amount;
        }

        out.total_qty = total_qty;
        out.total = self.round(&total);
        out.grand_total = self.round(&(&out.total - out.document_discount()));
        out
    }

    /// 应用供应商规则
    ///
    /// 命中规则的行覆盖折扣率并重算；未命中的行保留原折扣字段。
    /// 单据未开启折扣时等同于 [`Calculator::reset_discounts`]。
    pub fn apply_discount_rules(
        &self,
        doc: &PurchaseDocument,
        rules: Option<&RuleSet>,
    ) -> PurchaseDocument {
        if !doc.apply_discount {
            return self.reset_discounts(doc);
        }

        let mut out = doc.clone();
        if let Some(rules) = rules {
            let mut matched = 0usize;
            for item in out.items.iter_mut() {
                if rules.get(&item.item_code).is_some() {
                    *item = self.recompute_line(item, Some(rules));
                    matched += 1;
                }
            }
            tracing::debug!(
                "applied {} supplier rules to {} of {} items",
                rules.len(),
                matched,
                out.items.len()
            );
        }

        self.recompute_document(&out)
    }

    /// 清除全部折扣字段并重算合计
    pub fn reset_discounts(&self, doc: &PurchaseDocument) -> PurchaseDocument {
        let mut out = doc.clone();
        out.discount_type = DiscountType::None;
        out.total_discount_amount = Some(BigDecimal::zero());
        out.effective_discount_percentage = BigDecimal::zero();
        out.turnover_incentive = BigDecimal::zero();
        for item in out.items.iter_mut() {
            item.clear_discounts();
        }
        self.recompute_document(&out)
    }
}
