use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{Duration, Local, NaiveDate};
use dashmap::DashMap;
use sqlx::PgPool;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::db::queries;
use crate::error::{AppError, AppResult};
use crate::models::{
    DiscountAgreement, DiscountContext, PurchaseDocument, RuleSet, SeasonalPromotion,
    TurnoverIncentive,
};
use crate::service::engine::DiscountEngine;

/// 规则缓存上限 (供应商 × 日期)，超过后整体清空
const RULE_CACHE_LIMIT: usize = 4096;

/// 远程规则源
///
/// `recompute` 与本地 `DiscountEngine::apply_all(doc, discount_context(..))` 结果必须一致。
#[async_trait]
pub trait RuleSource: Send + Sync {
    /// 供应商当天有效的商品折扣规则
    async fn supplier_rules(&self, supplier: &str) -> AppResult<Arc<RuleSet>>;

    /// 指定供应商与记账日期下计算所需的全部规则
    async fn discount_context(
        &self,
        supplier: Option<&str>,
        on: NaiveDate,
    ) -> AppResult<DiscountContext>;

    async fn recompute(&self, doc: &PurchaseDocument) -> AppResult<PurchaseDocument>;
}

fn today() -> NaiveDate {
    Local::now().date_naive()
}

/// 规则生效日期：单据记账日期，未填写时为当天
pub fn pricing_date(doc: &PurchaseDocument) -> NaiveDate {
    doc.posting_date.unwrap_or_else(today)
}

/// 数据库中的无效记录跳过并告警，不影响其他规则
fn keep_valid(kind: &str, name: &str, result: AppResult<()>) -> bool {
    match result {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!("skipping invalid {} {}: {}", kind, name, e);
            false
        }
    }
}

/// 协议转规则集：跳过无效协议，同一商品多条协议时取第一条
pub fn rules_from_agreements(agreements: &[DiscountAgreement]) -> RuleSet {
    let mut rules = RuleSet::new();
    for agreement in agreements {
        if !keep_valid("agreement", &agreement.item_code, agreement.validate()) {
            continue;
        }
        if !rules.insert(agreement.to_rule()) {
            tracing::warn!(
                "duplicate agreement for supplier {} item {}, keeping the first",
                agreement.supplier,
                agreement.item_code
            );
        }
    }
    rules
}

/// PostgreSQL 规则源，供应商规则按 (供应商, 日期) 缓存
pub struct PgRuleSource {
    pool: PgPool,
    engine: DiscountEngine,
    cache: DashMap<(String, NaiveDate), Arc<RuleSet>>,
}

impl PgRuleSource {
    pub fn new(pool: PgPool, engine: DiscountEngine) -> Self {
        Self {
            pool,
            engine,
            cache: DashMap::new(),
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn engine(&self) -> &DiscountEngine {
        &self.engine
    }

    /// 折扣协议变更后清除该供应商缓存
    pub fn invalidate_supplier(&self, supplier: &str) {
        let before = self.cache.len();
        self.cache.retain(|(cached, _), _| cached != supplier);
        if self.cache.len() < before {
            tracing::info!("supplier rule cache invalidated: {}", supplier);
        }
    }

    async fn load_rules(&self, supplier: &str, on: NaiveDate) -> AppResult<Arc<RuleSet>> {
        let key = (supplier.to_string(), on);
        if let Some(rules) = self.cache.get(&key) {
            return Ok(rules.clone());
        }

        let agreements = queries::list_active_agreements(&self.pool, supplier, on).await?;
        let rules = Arc::new(rules_from_agreements(&agreements));
        tracing::info!("loaded {} discount rules for supplier {} on {}", rules.len(), supplier, on);

        if self.cache.len() >= RULE_CACHE_LIMIT {
            tracing::info!("rule cache reached {} entries, clearing", RULE_CACHE_LIMIT);
            self.cache.clear();
        }
        self.cache.insert(key, rules.clone());
        Ok(rules)
    }

    pub async fn active_promotions(&self, on: NaiveDate) -> AppResult<Vec<SeasonalPromotion>> {
        let promotions = queries::list_active_promotions(&self.pool, on).await?;
        Ok(promotions
            .into_iter()
            .filter(|p| keep_valid("promotion", &p.name, p.validate()))
            .collect())
    }

    /// 过去 365 天已提交发票的采购额所对应的返利方案
    async fn turnover_incentive(
        &self,
        supplier: &str,
        on: NaiveDate,
    ) -> AppResult<Option<TurnoverIncentive>> {
        let from = on - Duration::days(365);
        let turnover = queries::yearly_turnover(&self.pool, supplier, from, on).await?;
        let schemes: Vec<_> = queries::list_active_incentives(&self.pool)
            .await?
            .into_iter()
            .filter(|s| keep_valid("incentive", &s.name, s.validate()))
            .collect();
        Ok(TurnoverIncentive::select(&schemes, &turnover).cloned())
    }
}

#[async_trait]
impl RuleSource for PgRuleSource {
    async fn supplier_rules(&self, supplier: &str) -> AppResult<Arc<RuleSet>> {
        self.load_rules(supplier, today())
            .await
            .map_err(|e| AppError::Lookup(format!("supplier {}: {}", supplier, e)))
    }

    /// 并发拉取一张单据所需的全部规则
    async fn discount_context(
        &self,
        supplier: Option<&str>,
        on: NaiveDate,
    ) -> AppResult<DiscountContext> {
        let Some(supplier) = supplier else {
            return Ok(DiscountContext {
                promotions: self.active_promotions(on).await?,
                ..Default::default()
            });
        };

        let (rules, default_discount, promotions, incentive) = futures::try_join!(
            self.load_rules(supplier, on),
            async {
                Ok::<_, AppError>(
                    queries::get_supplier_default_discount(&self.pool, supplier).await?,
                )
            },
            self.active_promotions(on),
            self.turnover_incentive(supplier, on),
        )?;

        Ok(DiscountContext {
            supplier_rules: (*rules).clone(),
            supplier_default_discount: default_discount,
            promotions,
            turnover_incentive: incentive,
        })
    }

    async fn recompute(&self, doc: &PurchaseDocument) -> AppResult<PurchaseDocument> {
        let ctx = self
            .discount_context(doc.supplier.as_deref(), pricing_date(doc))
            .await?;
        Ok(self.engine.apply_all(doc, &ctx))
    }
}

/// 内存规则源 (离线使用与测试)
#[derive(Default)]
pub struct StaticRuleSource {
    engine: DiscountEngine,
    rules: HashMap<String, Arc<RuleSet>>,
    default_discounts: HashMap<String, BigDecimal>,
    promotions: Vec<SeasonalPromotion>,
    incentives: HashMap<String, TurnoverIncentive>,
    lookups: AtomicUsize,
}

impl StaticRuleSource {
    pub fn new(engine: DiscountEngine) -> Self {
        Self {
            engine,
            ..Default::default()
        }
    }

    pub fn with_supplier_rules(mut self, supplier: impl Into<String>, rules: RuleSet) -> Self {
        self.rules.insert(supplier.into(), Arc::new(rules));
        self
    }

    pub fn with_default_discount(mut self, supplier: impl Into<String>, pct: BigDecimal) -> Self {
        self.default_discounts.insert(supplier.into(), pct);
        self
    }

    pub fn with_promotion(mut self, promotion: SeasonalPromotion) -> Self {
        self.promotions.push(promotion);
        self
    }

    pub fn with_incentive(mut self, supplier: impl Into<String>, scheme: TurnoverIncentive) -> Self {
        self.incentives.insert(supplier.into(), scheme);
        self
    }

    /// 规则查询 (`supplier_rules` / `discount_context`) 的调用次数
    pub fn lookup_count(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }

    fn context_for(&self, supplier: Option<&str>, on: NaiveDate) -> DiscountContext {
        let supplier = supplier.unwrap_or_default();
        DiscountContext {
            supplier_rules: self
                .rules
                .get(supplier)
                .map(|r| (**r).clone())
                .unwrap_or_default(),
            supplier_default_discount: self.default_discounts.get(supplier).cloned(),
            promotions: self
                .promotions
                .iter()
                .filter(|p| p.is_active_on(on))
                .cloned()
                .collect(),
            turnover_incentive: self.incentives.get(supplier).cloned(),
        }
    }
}

#[async_trait]
impl RuleSource for StaticRuleSource {
    async fn supplier_rules(&self, supplier: &str) -> AppResult<Arc<RuleSet>> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .rules
            .get(supplier)
            .cloned()
            .unwrap_or_else(|| Arc::new(RuleSet::new())))
    }

    async fn discount_context(
        &self,
        supplier: Option<&str>,
        on: NaiveDate,
    ) -> AppResult<DiscountContext> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        Ok(self.context_for(supplier, on))
    }

    async fn recompute(&self, doc: &PurchaseDocument) -> AppResult<PurchaseDocument> {
        let ctx = self.context_for(doc.supplier.as_deref(), pricing_date(doc));
        Ok(self.engine.apply_all(doc, &ctx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn agreement(item_code: &str, pct: &str) -> DiscountAgreement {
        DiscountAgreement {
            supplier: "SUP-001".into(),
            item_code: item_code.into(),
            discount_percentage: BigDecimal::from_str(pct).unwrap(),
            valid_from: None,
            valid_to: None,
            is_active: true,
        }
    }

    #[test]
    fn duplicate_agreements_keep_first_row() {
        let rules = rules_from_agreements(&[
            agreement("A", "5"),
            agreement("A", "8"),
            agreement("B", "3"),
        ]);
        assert_eq!(rules.len(), 2);
        assert_eq!(rules.get("A"), Some(&BigDecimal::from(5)));
        assert_eq!(rules.get("B"), Some(&BigDecimal::from(3)));
    }

    #[test]
    fn invalid_agreements_are_skipped() {
        let rules = rules_from_agreements(&[agreement("A", "150"), agreement("B", "3")]);
        assert!(rules.get("A").is_none());
        assert_eq!(rules.len(), 1);
    }

    #[test]
    fn pricing_date_prefers_posting_date() {
        let mut doc = PurchaseDocument::default();
        assert_eq!(pricing_date(&doc), today());
        let date = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        doc.posting_date = Some(date);
        assert_eq!(pricing_date(&doc), date);
    }
}
