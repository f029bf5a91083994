use async_trait::async_trait;
use bigdecimal::{BigDecimal, Zero};
use chrono::NaiveDate;
use purchase_discount_rust::error::{AppError, AppResult, CalcError};
use purchase_discount_rust::models::{
    DiscountContext, DiscountRule, DiscountType, LineItem, PurchaseDocument, RuleSet,
    SeasonalPromotion, TurnoverIncentive,
};
use purchase_discount_rust::service::{
    Calculator, DiscountEngine, EditingSession, FieldChange, Reaction, RuleSource, StaticRuleSource,
};
use serde_json::json;
use std::str::FromStr;
use std::sync::Arc;

fn dec(s: &str) -> BigDecimal {
    BigDecimal::from_str(s).unwrap()
}

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn rules_for(item_code: &str, pct: &str) -> RuleSet {
    RuleSet::from_rules(vec![DiscountRule {
        item_code: item_code.into(),
        discount_percentage: dec(pct),
    }])
    .unwrap()
}

fn source() -> Arc<StaticRuleSource> {
    Arc::new(
        StaticRuleSource::new(DiscountEngine::default())
            .with_supplier_rules("SUP-001", rules_for("A", "5"))
            .with_supplier_rules("SUP-002", rules_for("B", "20")),
    )
}

/// 规则、整单折扣、促销、返利齐全的规则源
fn full_source() -> Arc<StaticRuleSource> {
    Arc::new(
        StaticRuleSource::new(DiscountEngine::default())
            .with_supplier_rules("SUP-001", rules_for("A", "5"))
            .with_default_discount("SUP-001", dec("10"))
            .with_promotion(SeasonalPromotion {
                name: "PROMO-0001".into(),
                promotion_name: "Summer".into(),
                discount_percentage: dec("2"),
                start_date: date(2024, 6, 1),
                end_date: date(2024, 8, 31),
                is_active: true,
                applicable_items: vec!["B".into()],
            })
            .with_incentive(
                "SUP-001",
                TurnoverIncentive {
                    name: "TI-01".into(),
                    min_turnover: dec("1000"),
                    incentive_percentage: dec("1"),
                    max_incentive_amount: dec("10"),
                    is_active: true,
                },
            ),
    )
}

fn draft() -> PurchaseDocument {
    let mut doc = PurchaseDocument::default().with_items(vec![LineItem::new("A", dec("10"), dec("200"))]);
    doc.supplier = Some("SUP-001".into());
    doc.apply_discount = true;
    doc.discount_type = DiscountType::ItemWise;
    doc
}

fn summer_draft(discount_type: DiscountType) -> PurchaseDocument {
    let mut doc = draft();
    doc.items.push(LineItem::new("B", dec("2"), dec("50")));
    doc.posting_date = Some(date(2024, 7, 1));
    doc.discount_type = discount_type;
    doc
}

struct UnreachableSource;

#[async_trait]
impl RuleSource for UnreachableSource {
    async fn supplier_rules(&self, supplier: &str) -> AppResult<Arc<RuleSet>> {
        Err(AppError::Lookup(format!("{} unreachable", supplier)))
    }

    async fn discount_context(
        &self,
        supplier: Option<&str>,
        _on: NaiveDate,
    ) -> AppResult<DiscountContext> {
        Err(AppError::Lookup(format!("{:?} unreachable", supplier)))
    }

    async fn recompute(&self, _doc: &PurchaseDocument) -> AppResult<PurchaseDocument> {
        Err(AppError::Lookup("recompute unreachable".to_string()))
    }
}

#[tokio::test]
async fn rules_arrive_after_change_and_are_cached() {
    let source = source();
    let mut session = EditingSession::open(source.clone(), Calculator::default(), draft());
    assert_eq!(session.document().total, dec("2000"));

    let fetch = match session.before_save() {
        Reaction::NeedsRules(fetch) => fetch,
        other => panic!("expected rule fetch, got {:?}", other),
    };
    assert_eq!(fetch.supplier.as_deref(), Some("SUP-001"));

    let result = source.discount_context(fetch.supplier.as_deref(), fetch.on).await;
    assert!(session.complete_rule_fetch(fetch, result).unwrap());
    assert_eq!(session.items()[0].discount_amount, dec("100"));
    assert_eq!(session.document().total, dec("1900"));
    assert_eq!(source.lookup_count(), 1);

    let reaction = session
        .apply(FieldChange::AddRow(LineItem::new("A", dec("1"), dec("200"))))
        .unwrap();
    assert_eq!(reaction, Reaction::Recomputed);
    assert_eq!(session.items()[1].discount_amount, dec("10"));
    assert_eq!(session.document().total, dec("2090"));
    assert_eq!(source.lookup_count(), 1);
}

#[tokio::test]
async fn refresh_rules_applies_current_supplier() {
    let mut session = EditingSession::open(source(), Calculator::default(), draft());
    assert!(session.refresh_rules().await.unwrap());
    assert_eq!(session.document().total, dec("1900"));
    assert_eq!(session.document().total_discount_amount, Some(BigDecimal::zero()));
    assert_eq!(session.document().effective_discount_percentage, dec("5"));
    assert!(session.cached_context().is_some());
}

#[tokio::test]
async fn local_and_remote_recompute_agree() {
    for discount_type in [DiscountType::ItemWise, DiscountType::InvoiceWise, DiscountType::None] {
        let source = full_source();
        let mut local = EditingSession::open(source.clone(), Calculator::default(), summer_draft(discount_type));
        let mut remote = EditingSession::open(source.clone(), Calculator::default(), summer_draft(discount_type));

        assert!(local.refresh_rules().await.unwrap());
        assert!(remote.recompute_remote().await.unwrap());
        assert_eq!(local.document(), remote.document(), "type={}", discount_type);

        // 本地编辑后的结果与远程重算一致
        local
            .apply(FieldChange::Qty {
                row: 1,
                qty: Some(dec("3")),
            })
            .unwrap();
        let recomputed = source.recompute(local.document()).await.unwrap();
        assert_eq!(&recomputed, local.document(), "type={}", discount_type);
    }
}

#[tokio::test]
async fn invoice_wise_does_not_apply_item_rules() {
    let mut session = EditingSession::open(
        full_source(),
        Calculator::default(),
        summer_draft(DiscountType::InvoiceWise),
    );
    session.refresh_rules().await.unwrap();

    let doc = session.document();
    assert!(doc.items[0].discount_amount.is_zero());
    assert_eq!(doc.items[1].discount_amount, dec("2"));
    assert_eq!(doc.total, dec("2098"));
    // 10% 整单折扣 209.80 + 封顶返利 10
    assert_eq!(doc.total_discount_amount, Some(dec("219.8")));
    assert_eq!(doc.grand_total, dec("1878.2"));
}

#[tokio::test]
async fn clearing_percentage_clears_discount_amount() {
    let mut doc = draft();
    doc.apply_discount = false;
    doc.items = vec![LineItem::new("C", dec("10"), dec("100")).with_discount_percentage(dec("10"))];
    let mut session = EditingSession::open(source(), Calculator::default(), doc);
    assert_eq!(session.document().total, dec("900"));

    session
        .apply(FieldChange::DiscountPercentage {
            row: 0,
            pct: Some(dec("0")),
        })
        .unwrap();
    assert!(session.items()[0].discount_amount.is_zero());
    assert_eq!(session.document().total, dec("1000"));

    session
        .apply(FieldChange::DiscountPercentage {
            row: 0,
            pct: Some(dec("10")),
        })
        .unwrap();
    assert_eq!(session.document().total, dec("900"));

    session
        .apply(FieldChange::DiscountPercentage { row: 0, pct: None })
        .unwrap();
    assert!(session.items()[0].discount_amount.is_zero());
    assert_eq!(session.document().total, dec("1000"));
}

#[tokio::test]
async fn clearing_percentage_with_rules_cached() {
    let mut doc = draft();
    doc.items = vec![LineItem::new("C", dec("10"), dec("100")).with_discount_percentage(dec("10"))];
    let mut session = EditingSession::open(source(), Calculator::default(), doc);
    session.refresh_rules().await.unwrap();
    assert_eq!(session.document().total, dec("900"));

    let reaction = session
        .apply(FieldChange::DiscountPercentage {
            row: 0,
            pct: Some(dec("0")),
        })
        .unwrap();
    assert_eq!(reaction, Reaction::Recomputed);
    assert_eq!(session.document().total, dec("1000"));
    assert!(session.document().effective_discount_percentage.is_zero());
}

#[tokio::test]
async fn closed_session_drops_late_rules() {
    let source = source();
    let mut session = EditingSession::open(source.clone(), Calculator::default(), draft());
    let fetch = session.begin_rule_fetch().unwrap();
    let before = session.document().clone();

    session.close();
    assert!(!session.is_live());
    let result = source.discount_context(fetch.supplier.as_deref(), fetch.on).await;
    assert!(!session.complete_rule_fetch(fetch, result).unwrap());
    assert_eq!(session.document(), &before);
    assert!(session.begin_rule_fetch().is_none());
    assert!(session.begin_remote_recompute().is_none());
}

#[tokio::test]
async fn rules_from_another_session_are_ignored() {
    let source = source();
    let first = EditingSession::open(source.clone(), Calculator::default(), draft());
    let mut second = EditingSession::open(source.clone(), Calculator::default(), draft());
    assert_ne!(first.id(), second.id());

    let fetch = first.begin_rule_fetch().unwrap();
    let result = source.discount_context(fetch.supplier.as_deref(), fetch.on).await;
    assert!(!second.complete_rule_fetch(fetch, result).unwrap());
    assert_eq!(second.document().total, dec("2000"));
}

#[tokio::test]
async fn supplier_change_invalidates_pending_fetch() {
    let source = source();
    let mut session = EditingSession::open(source.clone(), Calculator::default(), draft());
    let stale = session.begin_rule_fetch().unwrap();

    let fresh = match session.apply(FieldChange::Supplier(Some("SUP-002".into()))).unwrap() {
        Reaction::NeedsRules(fetch) => fetch,
        other => panic!("expected rule fetch, got {:?}", other),
    };
    assert_eq!(fresh.supplier.as_deref(), Some("SUP-002"));

    let stale_rules = source.discount_context(stale.supplier.as_deref(), stale.on).await;
    assert!(!session.complete_rule_fetch(stale, stale_rules).unwrap());
    assert!(session.items()[0].discount_amount.is_zero());

    let fresh_rules = source.discount_context(fresh.supplier.as_deref(), fresh.on).await;
    assert!(session.complete_rule_fetch(fresh, fresh_rules).unwrap());
    // SUP-002 has no rule for A
    assert_eq!(session.document().total, dec("2000"));
}

#[tokio::test]
async fn posting_date_change_refetches_rules() {
    let mut doc = draft();
    doc.posting_date = Some(date(2024, 7, 1));
    let mut session = EditingSession::open(source(), Calculator::default(), doc);
    session.refresh_rules().await.unwrap();
    assert!(session.cached_context().is_some());

    let reaction = session
        .apply(FieldChange::PostingDate(Some(date(2024, 9, 1))))
        .unwrap();
    match reaction {
        Reaction::NeedsRules(fetch) => assert_eq!(fetch.on, date(2024, 9, 1)),
        other => panic!("expected rule fetch, got {:?}", other),
    }
    assert!(session.cached_context().is_none());
}

#[tokio::test]
async fn lookup_failure_leaves_document_unchanged() {
    let mut session = EditingSession::open(Arc::new(UnreachableSource), Calculator::default(), draft());
    let before = session.document().clone();

    let err = session.refresh_rules().await.unwrap_err();
    assert!(matches!(err, AppError::Lookup(_)));
    assert_eq!(session.document(), &before);
    assert!(session.cached_context().is_none());

    assert!(session.recompute_remote().await.is_err());
    assert_eq!(session.document(), &before);
}

#[tokio::test]
async fn remote_recompute_is_dropped_when_document_changed() {
    let source = source();
    let mut session = EditingSession::open(source.clone(), Calculator::default(), draft());

    let pending = session.begin_remote_recompute().unwrap();
    let result = source.recompute(&pending.snapshot).await;
    session
        .apply(FieldChange::Qty {
            row: 0,
            qty: Some(dec("20")),
        })
        .unwrap();
    assert!(!session.complete_remote_recompute(pending, result).unwrap());
    assert_eq!(session.items()[0].qty, Some(dec("20")));
    assert_eq!(session.document().total, dec("4000"));

    assert!(session.recompute_remote().await.unwrap());
    assert_eq!(session.items()[0].discount_amount, dec("200"));
    assert_eq!(session.document().total, dec("3800"));
    assert_eq!(session.document().grand_total, dec("3800"));
}

#[tokio::test]
async fn disabling_discount_resets_immediately() {
    let mut session = EditingSession::open(source(), Calculator::default(), draft());
    session.refresh_rules().await.unwrap();
    assert_eq!(session.document().total, dec("1900"));

    let reaction = session.apply(FieldChange::ApplyDiscount(false)).unwrap();
    assert_eq!(reaction, Reaction::Recomputed);
    let doc = session.document();
    assert_eq!(doc.total_discount_amount, Some(BigDecimal::zero()));
    assert!(doc.items[0].discount_percentage.is_none());
    assert_eq!(doc.discount_type, DiscountType::None);
    assert_eq!(doc.total, dec("2000"));
    assert_eq!(doc.grand_total, dec("2000"));

    // 规则仍在缓存中，重新开启无需再查询
    let reaction = session.apply(FieldChange::ApplyDiscount(true)).unwrap();
    assert_eq!(reaction, Reaction::Recomputed);
    session
        .apply(FieldChange::DiscountType(DiscountType::ItemWise))
        .unwrap();
    assert_eq!(session.document().total, dec("1900"));
}

#[tokio::test]
async fn row_changes_validate_index() {
    let mut session = EditingSession::open(source(), Calculator::default(), draft());
    let err = session
        .apply(FieldChange::Rate {
            row: 3,
            rate: Some(dec("1")),
        })
        .unwrap_err();
    assert_eq!(err, CalcError::RowOutOfRange { row: 3, len: 1 });

    session.apply(FieldChange::RemoveRow { row: 0 }).unwrap();
    assert!(session.items().is_empty());
    assert!(session.document().total.is_zero());
}

#[test]
fn host_notifications_are_parsed() {
    assert_eq!(
        FieldChange::from_host("qty", Some(0), &json!("2.5")).unwrap(),
        FieldChange::Qty {
            row: 0,
            qty: Some(dec("2.5"))
        }
    );
    assert_eq!(
        FieldChange::from_host("rate", Some(1), &json!(null)).unwrap(),
        FieldChange::Rate { row: 1, rate: None }
    );
    assert_eq!(
        FieldChange::from_host("apply_discount", None, &json!(1)).unwrap(),
        FieldChange::ApplyDiscount(true)
    );
    assert_eq!(
        FieldChange::from_host("apply_discount", None, &json!(1.0)).unwrap(),
        FieldChange::ApplyDiscount(true)
    );
    assert_eq!(
        FieldChange::from_host("apply_discount", None, &json!(0.0)).unwrap(),
        FieldChange::ApplyDiscount(false)
    );
    assert_eq!(
        FieldChange::from_host("discount_type", None, &json!("Item-wise")).unwrap(),
        FieldChange::DiscountType(DiscountType::ItemWise)
    );
    assert_eq!(
        FieldChange::from_host("supplier", None, &json!("")).unwrap(),
        FieldChange::Supplier(None)
    );
    assert_eq!(
        FieldChange::from_host("posting_date", None, &json!("2024-07-01")).unwrap(),
        FieldChange::PostingDate(Some(date(2024, 7, 1)))
    );

    assert!(matches!(
        FieldChange::from_host("qty", None, &json!(3)),
        Err(CalcError::InvalidValue { .. })
    ));
    assert!(matches!(
        FieldChange::from_host("qty", Some(0), &json!("abc")),
        Err(CalcError::InvalidValue { .. })
    ));
    assert!(matches!(
        FieldChange::from_host("posting_date", None, &json!("07/01/2024")),
        Err(CalcError::InvalidValue { .. })
    ));
    assert_eq!(
        FieldChange::from_host("warehouse", None, &json!("Stores")),
        Err(CalcError::UnknownField("warehouse".into()))
    );
}

#[test]
fn header_fields_are_readable() {
    let session = EditingSession::open(source(), Calculator::default(), draft());
    assert_eq!(session.get_field("supplier"), Some(json!("SUP-001")));
    assert_eq!(session.get_field("apply_discount"), Some(json!(true)));
    assert_eq!(session.get_field("discount_type"), Some(json!("Item-wise")));
    assert_eq!(session.get_field("warehouse"), None);
}
