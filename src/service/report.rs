use serde::Serialize;
use sqlx::PgPool;
use std::io::Write;

use crate::db::report_queries;
use crate::error::AppResult;
use crate::models::{DiscountAnalysisRow, ReportFilters, ReportSummary};

/// 折扣分析报表结果
#[derive(Debug, Clone, Serialize)]
pub struct DiscountAnalysis {
    pub rows: Vec<DiscountAnalysisRow>,
    pub summary: ReportSummary,
}

/// 折扣分析报表服务
pub struct ReportService {
    pool: PgPool,
}

impl ReportService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn discount_analysis(&self, filters: &ReportFilters) -> AppResult<DiscountAnalysis> {
        let rows = report_queries::discount_analysis(&self.pool, filters).await?;
        let summary = ReportSummary::from_rows(&rows);
        tracing::info!(
            "折扣分析: {} 张发票, 折扣合计 {}, 平均折扣率 {}%",
            summary.invoice_count,
            summary.total_discount,
            summary.average_discount_percentage
        );
        Ok(DiscountAnalysis { rows, summary })
    }

    /// 导出报表 CSV，返回行数
    pub async fn export_csv<W: Write>(&self, filters: &ReportFilters, out: W) -> AppResult<usize> {
        let analysis = self.discount_analysis(filters).await?;
        report_queries::write_report_csv(&analysis.rows, out)?;
        Ok(analysis.rows.len())
    }
}
