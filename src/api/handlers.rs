use crate::config::CalculatorConfig;
use crate::error::AppError;
use crate::models::{DiscountRule, PurchaseDocument, ReportFilters};
use crate::service::rule_source::pricing_date;
use crate::service::{
    convert_estimate_to_invoice, validate_estimate, Calculator, PgRuleSource, ReportService,
    RuleSource,
};
use axum::{
    extract::{Json, Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use chrono::{Local, NaiveDate};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// 共享状态
#[derive(Clone)]
pub struct AppState {
    pub rules: Arc<PgRuleSource>,
    pub reports: Arc<ReportService>,
    pub calculator: Calculator,
    pub settings: Arc<CalculatorConfig>,
}

/// 统一响应体
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub message: String,
    pub data: Option<T>,
}

fn error_status(err: &AppError) -> StatusCode {
    match err {
        AppError::Validation(_) | AppError::Conversion(_) => StatusCode::BAD_REQUEST,
        AppError::Lookup(_) => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn respond<T: Serialize>(result: Result<T, AppError>, message: impl FnOnce(&T) -> String) -> Response {
    match result {
        Ok(data) => {
            let response = ApiResponse {
                success: true,
                message: message(&data),
                data: Some(data),
            };
            (StatusCode::OK, Json(response)).into_response()
        }
        Err(e) => {
            tracing::error!("request failed: {}", e);
            let response: ApiResponse<T> = ApiResponse {
                success: false,
                message: format!("Error: {}", e),
                data: None,
            };
            (error_status(&e), Json(response)).into_response()
        }
    }
}

/// 健康检查
pub async fn health_check() -> &'static str {
    "OK"
}

/// 整单折扣计算 (远程重算入口)
pub async fn apply_discounts(
    State(state): State<AppState>,
    Json(doc): Json<PurchaseDocument>,
) -> Response {
    let result = state.rules.recompute(&doc).await;
    respond(result, |d| format!("Discounts calculated, grand total {}", d.grand_total))
}

/// 批量整单折扣计算
pub async fn apply_discounts_batch(
    State(state): State<AppState>,
    Json(docs): Json<Vec<PurchaseDocument>>,
) -> Response {
    let result = async {
        let contexts = futures::future::try_join_all(
            docs.iter()
                .map(|doc| state.rules.discount_context(doc.supplier.as_deref(), pricing_date(doc))),
        )
        .await?;
        let jobs: Vec<_> = docs.into_iter().zip(contexts).collect();
        Ok::<_, AppError>(state.rules.engine().recompute_batch(&jobs))
    }
    .await;
    respond(result, |d: &Vec<PurchaseDocument>| format!("Recomputed {} documents", d.len()))
}

/// 关闭折扣：清除全部折扣字段
pub async fn reset_discounts(
    State(state): State<AppState>,
    Json(doc): Json<PurchaseDocument>,
) -> Response {
    let reset = state.calculator.reset_discounts(&doc);
    respond(Ok(reset), |_| "Discounts reset".to_string())
}

/// 供应商折扣规则
pub async fn supplier_discounts(
    State(state): State<AppState>,
    Path(supplier): Path<String>,
) -> Response {
    let result = state
        .rules
        .supplier_rules(&supplier)
        .await
        .map(|rules| rules.to_rules());
    respond(result, |r: &Vec<DiscountRule>| format!("{} rules for {}", r.len(), supplier))
}

/// 折扣协议变更后清除供应商规则缓存
pub async fn invalidate_supplier_discounts(
    State(state): State<AppState>,
    Path(supplier): Path<String>,
) -> Response {
    state.rules.invalidate_supplier(&supplier);
    respond(Ok(()), |_| format!("Discount cache cleared for {}", supplier))
}

/// 当前有效的季节性促销
pub async fn active_promotions(State(state): State<AppState>) -> Response {
    let today = Local::now().date_naive();
    let result = state.rules.active_promotions(today).await;
    respond(result, |p| {
        if p.is_empty() {
            "No active promotions found".to_string()
        } else {
            format!("{} active promotions", p.len())
        }
    })
}

/// 估价单转发票请求
#[derive(Debug, Deserialize)]
pub struct ConvertEstimateRequest {
    pub estimate: PurchaseDocument,
    pub invoice_name: String,
    pub posting_date: Option<NaiveDate>,
    #[serde(default)]
    pub can_approve: bool,
}

/// 估价单转采购发票
pub async fn convert_estimate(
    State(state): State<AppState>,
    Json(req): Json<ConvertEstimateRequest>,
) -> Response {
    let posting_date = req.posting_date.unwrap_or_else(|| Local::now().date_naive());
    let result = validate_estimate(
        &req.estimate,
        &state.settings.estimate_approval_threshold,
        req.can_approve,
    )
    .and_then(|_| {
        convert_estimate_to_invoice(&state.calculator, &req.estimate, &req.invoice_name, posting_date)
    });
    respond(result, |_| {
        format!("Purchase Invoice {} has been created successfully", req.invoice_name)
    })
}

/// 折扣分析报表
pub async fn discount_analysis(
    State(state): State<AppState>,
    Query(filters): Query<ReportFilters>,
) -> Response {
    let result = state.reports.discount_analysis(&filters).await;
    respond(result, |a| format!("{} invoices", a.summary.invoice_count))
}

/// 折扣分析报表 CSV 下载
pub async fn export_discount_analysis(
    State(state): State<AppState>,
    Query(filters): Query<ReportFilters>,
) -> Response {
    let mut buf = Vec::new();
    match state.reports.export_csv(&filters, &mut buf).await {
        Ok(count) => {
            tracing::info!("exported {} report rows", count);
            (
                StatusCode::OK,
                [(header::CONTENT_TYPE, "text/csv; charset=utf-8")],
                buf,
            )
                .into_response()
        }
        Err(e) => respond::<()>(Err(e), |_| String::new()),
    }
}
