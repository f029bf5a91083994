use bigdecimal::BigDecimal;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};
use crate::models::{DocStatus, DocumentKind, DocumentState, LineItem, PurchaseDocument};
use crate::service::calculator::Calculator;

/// 估价单金额审批校验
pub fn validate_estimate(
    doc: &PurchaseDocument,
    approval_threshold: &BigDecimal,
    can_approve: bool,
) -> AppResult<()> {
    if !doc.is_estimate() {
        return Ok(());
    }
    if doc.total > *approval_threshold && !can_approve {
        return Err(AppError::Validation(format!(
            "Purchase Estimate above {} requires manager approval",
            approval_threshold
        )));
    }
    Ok(())
}

/// 估价单转发票结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversion {
    pub invoice: PurchaseDocument,
    pub estimate: PurchaseDocument,
}

/// 已提交且未转换的估价单生成草稿采购发票
pub fn convert_estimate_to_invoice(
    calculator: &Calculator,
    estimate: &PurchaseDocument,
    invoice_name: &str,
    posting_date: NaiveDate,
) -> AppResult<Conversion> {
    if !estimate.is_estimate() {
        return Err(AppError::Conversion("document is not a Purchase Estimate".to_string()));
    }
    if estimate.status == DocumentState::Converted {
        return Err(AppError::Conversion(
            "This estimate has already been converted to an invoice".to_string(),
        ));
    }
    if estimate.docstatus != DocStatus::Submitted {
        return Err(AppError::Conversion(
            "Please submit the estimate before converting".to_string(),
        ));
    }

    let items = estimate
        .items
        .iter()
        .map(|item| LineItem {
            item_code: item.item_code.clone(),
            qty: item.qty.clone(),
            rate: item.rate.clone(),
            discount_percentage: item.discount_percentage.clone(),
            discount_amount: item.discount_amount.clone(),
            amount: item.amount.clone(),
            promotion_percentage: item.promotion_percentage.clone(),
            promotion_applied: item.promotion_applied.clone(),
        })
        .collect();

    let invoice = PurchaseDocument {
        name: Some(invoice_name.to_string()),
        kind: DocumentKind::Invoice,
        supplier: estimate.supplier.clone(),
        posting_date: Some(posting_date),
        apply_discount: estimate.apply_discount,
        discount_type: estimate.discount_type,
        total_discount_amount: estimate.total_discount_amount.clone(),
        purchase_estimate_ref: estimate.name.clone(),
        items,
        ..Default::default()
    };
    let invoice = calculator.recompute_document(&invoice);

    let mut converted = estimate.clone();
    converted.status = DocumentState::Converted;
    converted.converted_invoice = Some(invoice_name.to_string());

    tracing::info!(
        "estimate {:?} converted to invoice {} ({} items, grand_total {})",
        estimate.name,
        invoice_name,
        invoice.items.len(),
        invoice.grand_total
    );

    Ok(Conversion {
        invoice,
        estimate: converted,
    })
}
