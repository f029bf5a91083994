use bigdecimal::{BigDecimal, Zero};
use chrono::NaiveDate;
use serde_json::Value;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::error::{AppResult, CalcError};
use crate::models::{DiscountContext, DiscountType, LineItem, PurchaseDocument};
use crate::service::calculator::Calculator;
use crate::service::engine::DiscountEngine;
use crate::service::rule_source::{pricing_date, RuleSource};

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// 宿主推送的字段变更
#[derive(Debug, Clone, PartialEq)]
pub enum FieldChange {
    Supplier(Option<String>),
    PostingDate(Option<NaiveDate>),
    ApplyDiscount(bool),
    DiscountType(DiscountType),
    TotalDiscountAmount(Option<BigDecimal>),
    ItemCode { row: usize, item_code: String },
    Qty { row: usize, qty: Option<BigDecimal> },
    Rate { row: usize, rate: Option<BigDecimal> },
    DiscountPercentage { row: usize, pct: Option<BigDecimal> },
    AddRow(LineItem),
    RemoveRow { row: usize },
}

fn invalid(field: &str, reason: impl Into<String>) -> CalcError {
    CalcError::InvalidValue {
        field: field.to_string(),
        reason: reason.into(),
    }
}

fn parse_decimal(field: &str, value: &Value) -> Result<Option<BigDecimal>, CalcError> {
    match value {
        Value::Null => Ok(None),
        Value::String(s) if s.trim().is_empty() => Ok(None),
        Value::String(s) => BigDecimal::from_str(s.trim())
            .map(Some)
            .map_err(|e| invalid(field, e.to_string())),
        Value::Number(n) => BigDecimal::from_str(&n.to_string())
            .map(Some)
            .map_err(|e| invalid(field, e.to_string())),
        other => Err(invalid(field, format!("expected number, got {}", other))),
    }
}

fn parse_text(field: &str, value: &Value) -> Result<Option<String>, CalcError> {
    match value {
        Value::Null => Ok(None),
        Value::String(s) if s.is_empty() => Ok(None),
        Value::String(s) => Ok(Some(s.clone())),
        other => Err(invalid(field, format!("expected string, got {}", other))),
    }
}

fn parse_date(field: &str, value: &Value) -> Result<Option<NaiveDate>, CalcError> {
    match parse_text(field, value)? {
        None => Ok(None),
        Some(s) => NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
            .map(Some)
            .map_err(|e| invalid(field, e.to_string())),
    }
}

fn parse_flag(field: &str, value: &Value) -> Result<bool, CalcError> {
    match value {
        Value::Bool(b) => Ok(*b),
        Value::Number(n) => Ok(n.as_f64().map_or(false, |f| f != 0.0)),
        Value::Null => Ok(false),
        other => Err(invalid(field, format!("expected flag, got {}", other))),
    }
}

impl FieldChange {
    /// 解析宿主 `set_field(name, value)` 通知；明细字段需要行号
    pub fn from_host(field: &str, row: Option<usize>, value: &Value) -> Result<Self, CalcError> {
        let row_of = |field: &str| row.ok_or_else(|| invalid(field, "row index required"));

        let change = match field {
            "supplier" => FieldChange::Supplier(parse_text(field, value)?),
            "posting_date" => FieldChange::PostingDate(parse_date(field, value)?),
            "apply_discount" => FieldChange::ApplyDiscount(parse_flag(field, value)?),
            "discount_type" => {
                let label = parse_text(field, value)?.unwrap_or_default();
                FieldChange::DiscountType(
                    DiscountType::from_str(&label).map_err(|e| invalid(field, e))?,
                )
            }
            "total_discount_amount" => FieldChange::TotalDiscountAmount(parse_decimal(field, value)?),
            "item_code" => FieldChange::ItemCode {
                row: row_of(field)?,
                item_code: parse_text(field, value)?.unwrap_or_default(),
            },
            "qty" => FieldChange::Qty {
                row: row_of(field)?,
                qty: parse_decimal(field, value)?,
            },
            "rate" => FieldChange::Rate {
                row: row_of(field)?,
                rate: parse_decimal(field, value)?,
            },
            "discount_percentage" => FieldChange::DiscountPercentage {
                row: row_of(field)?,
                pct: parse_decimal(field, value)?,
            },
            "items_remove" => FieldChange::RemoveRow { row: row_of(field)? },
            "items_add" => FieldChange::AddRow(
                serde_json::from_value(value.clone()).map_err(|e| invalid(field, e.to_string()))?,
            ),
            other => return Err(CalcError::UnknownField(other.to_string())),
        };
        Ok(change)
    }
}

/// 待完成的规则查询，按 (供应商, 记账日期) 取数
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleFetch {
    session_id: u64,
    pub supplier: Option<String>,
    pub on: NaiveDate,
}

/// 待完成的远程整单重算
#[derive(Debug, Clone)]
pub struct RemoteRecompute {
    session_id: u64,
    pub snapshot: PurchaseDocument,
}

/// 字段变更后的处理结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reaction {
    Recomputed,
    /// 已按现有数据重算，规则到达后需调用 `complete_rule_fetch`
    NeedsRules(RuleFetch),
}

type ContextKey = (Option<String>, NaiveDate);

/// 单据编辑会话
///
/// 持有当前单据与会话级规则缓存。本地重算与远程重算走同一个
/// [`DiscountEngine`]，规则相同时结果一致。异步查询以票据形式拆成
/// begin/complete 两步，完成时读取会话当前状态；会话关闭或
/// 供应商、记账日期已变化时完成步骤不做任何事。
pub struct EditingSession<S: RuleSource> {
    id: u64,
    source: Arc<S>,
    engine: DiscountEngine,
    document: PurchaseDocument,
    context: Option<(ContextKey, Arc<DiscountContext>)>,
    closed: bool,
}

impl<S: RuleSource> EditingSession<S> {
    pub fn open(source: Arc<S>, calculator: Calculator, document: PurchaseDocument) -> Self {
        let id = NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed);
        let document = calculator.recompute_document(&document);
        tracing::debug!("editing session {} opened for {:?}", id, document.name);
        Self {
            id,
            source,
            engine: DiscountEngine::new(calculator),
            document,
            context: None,
            closed: false,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn document(&self) -> &PurchaseDocument {
        &self.document
    }

    pub fn items(&self) -> &[LineItem] {
        &self.document.items
    }

    pub fn is_live(&self) -> bool {
        !self.closed
    }

    /// 离开单据：之后到达的查询结果全部丢弃
    pub fn close(&mut self) {
        self.closed = true;
        tracing::debug!("editing session {} closed", self.id);
    }

    fn context_key(&self) -> ContextKey {
        (self.document.supplier.clone(), pricing_date(&self.document))
    }

    /// 当前供应商与记账日期下的缓存规则
    pub fn cached_context(&self) -> Option<Arc<DiscountContext>> {
        match &self.context {
            Some((key, ctx)) if *key == self.context_key() => Some(ctx.clone()),
            _ => None,
        }
    }

    /// 读取单据头字段
    pub fn get_field(&self, name: &str) -> Option<Value> {
        let doc = &self.document;
        let value = match name {
            "supplier" => serde_json::to_value(&doc.supplier),
            "posting_date" => serde_json::to_value(doc.posting_date),
            "apply_discount" => serde_json::to_value(doc.apply_discount),
            "discount_type" => serde_json::to_value(doc.discount_type),
            "total_discount_amount" => serde_json::to_value(&doc.total_discount_amount),
            "effective_discount_percentage" => serde_json::to_value(&doc.effective_discount_percentage),
            "total_qty" => serde_json::to_value(&doc.total_qty),
            "total" => serde_json::to_value(&doc.total),
            "grand_total" => serde_json::to_value(&doc.grand_total),
            _ => return None,
        };
        value.ok()
    }

    fn check_row(&self, row: usize) -> Result<(), CalcError> {
        let len = self.document.items.len();
        if row >= len {
            return Err(CalcError::RowOutOfRange { row, len });
        }
        Ok(())
    }

    /// 按当前状态重算
    ///
    /// 未开启折扣只重算合计；开启折扣且规则已缓存时整单套用引擎，
    /// 否则先重算合计并请求规则。
    fn refresh(&mut self) -> Reaction {
        if !self.document.apply_discount {
            self.document = self.engine.apply_all(&self.document, &DiscountContext::default());
            return Reaction::Recomputed;
        }
        if let Some(ctx) = self.cached_context() {
            self.document = self.engine.apply_all(&self.document, &ctx);
            return Reaction::Recomputed;
        }
        self.document = self.engine.calculator().recompute_document(&self.document);
        match self.begin_rule_fetch() {
            Some(fetch) => Reaction::NeedsRules(fetch),
            None => Reaction::Recomputed,
        }
    }

    /// 处理一次字段变更
    pub fn apply(&mut self, change: FieldChange) -> Result<Reaction, CalcError> {
        tracing::trace!("session {} change: {:?}", self.id, change);

        let reaction = match change {
            FieldChange::Supplier(supplier) => {
                self.document.supplier = supplier;
                // 未开启折扣时也预取规则，后续开启无需再查
                match self.refresh() {
                    Reaction::Recomputed if self.cached_context().is_none() => self
                        .begin_rule_fetch()
                        .map_or(Reaction::Recomputed, Reaction::NeedsRules),
                    other => other,
                }
            }
            FieldChange::PostingDate(date) => {
                self.document.posting_date = date;
                self.refresh()
            }
            FieldChange::ApplyDiscount(enabled) => {
                self.document.apply_discount = enabled;
                if enabled {
                    self.refresh()
                } else {
                    self.document = self.engine.calculator().reset_discounts(&self.document);
                    Reaction::Recomputed
                }
            }
            FieldChange::DiscountType(discount_type) => {
                self.document.discount_type = discount_type;
                self.refresh()
            }
            FieldChange::TotalDiscountAmount(amount) => {
                self.document.total_discount_amount = amount;
                self.refresh()
            }
            FieldChange::ItemCode { row, item_code } => {
                self.check_row(row)?;
                self.document.items[row].item_code = item_code;
                self.refresh()
            }
            FieldChange::Qty { row, qty } => {
                self.check_row(row)?;
                self.document.items[row].qty = qty;
                self.refresh()
            }
            FieldChange::Rate { row, rate } => {
                self.check_row(row)?;
                self.document.items[row].rate = rate;
                self.refresh()
            }
            FieldChange::DiscountPercentage { row, pct } => {
                self.check_row(row)?;
                let item = &mut self.document.items[row];
                // 清空折扣率同时清空由其算出的折扣额
                if pct.is_none() {
                    item.discount_amount = BigDecimal::zero();
                }
                item.discount_percentage = pct;
                self.refresh()
            }
            FieldChange::AddRow(item) => {
                self.document.items.push(item);
                self.refresh()
            }
            FieldChange::RemoveRow { row } => {
                self.check_row(row)?;
                self.document.items.remove(row);
                self.refresh()
            }
        };
        Ok(reaction)
    }

    /// 保存前：按当前规则完整重算
    pub fn before_save(&mut self) -> Reaction {
        self.refresh()
    }

    /// 发起规则查询；会话已关闭时返回 None
    pub fn begin_rule_fetch(&self) -> Option<RuleFetch> {
        if self.closed {
            return None;
        }
        let (supplier, on) = self.context_key();
        Some(RuleFetch {
            session_id: self.id,
            supplier,
            on,
        })
    }

    /// 规则查询完成
    ///
    /// 返回 `Ok(true)` 表示已写入缓存并应用；`Ok(false)` 表示结果过期被丢弃。
    /// 查询失败原样返回，单据保持原状。
    pub fn complete_rule_fetch(
        &mut self,
        fetch: RuleFetch,
        result: AppResult<DiscountContext>,
    ) -> AppResult<bool> {
        if self.closed || fetch.session_id != self.id {
            tracing::debug!("session {}: dropping rule fetch for closed session", fetch.session_id);
            return Ok(false);
        }
        let key = (fetch.supplier, fetch.on);
        if key != self.context_key() {
            tracing::debug!(
                "session {}: supplier or date changed since fetch for {:?}, dropping",
                self.id,
                key
            );
            return Ok(false);
        }

        let ctx = match result {
            Ok(ctx) => Arc::new(ctx),
            Err(e) => {
                tracing::warn!("session {}: rule lookup for {:?} failed: {}", self.id, key.0, e);
                return Err(e);
            }
        };

        if self.document.apply_discount {
            self.document = self.engine.apply_all(&self.document, &ctx);
        }
        self.context = Some((key, ctx));
        Ok(true)
    }

    /// 查询并应用当前供应商规则
    pub async fn refresh_rules(&mut self) -> AppResult<bool> {
        let Some(fetch) = self.begin_rule_fetch() else {
            return Ok(false);
        };
        let result = self
            .source
            .discount_context(fetch.supplier.as_deref(), fetch.on)
            .await;
        self.complete_rule_fetch(fetch, result)
    }

    /// 发起远程整单重算
    pub fn begin_remote_recompute(&self) -> Option<RemoteRecompute> {
        if self.closed {
            return None;
        }
        Some(RemoteRecompute {
            session_id: self.id,
            snapshot: self.document.clone(),
        })
    }

    /// 远程重算完成；期间单据被修改或会话关闭则丢弃结果
    pub fn complete_remote_recompute(
        &mut self,
        pending: RemoteRecompute,
        result: AppResult<PurchaseDocument>,
    ) -> AppResult<bool> {
        if self.closed || pending.session_id != self.id {
            return Ok(false);
        }
        let recomputed = result?;
        if self.document != pending.snapshot {
            tracing::debug!("session {}: document edited during remote recompute, dropping", self.id);
            return Ok(false);
        }
        self.document = recomputed;
        Ok(true)
    }

    pub async fn recompute_remote(&mut self) -> AppResult<bool> {
        let Some(pending) = self.begin_remote_recompute() else {
            return Ok(false);
        };
        let result = self.source.recompute(&pending.snapshot).await;
        self.complete_remote_recompute(pending, result)
    }
}
