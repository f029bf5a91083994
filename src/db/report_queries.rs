use sqlx::{PgPool, Postgres, QueryBuilder};
use std::io::Write;
use std::path::Path;

use crate::error::AppResult;
use crate::models::{DiscountAnalysisRow, ReportFilters};

/// 按筛选条件拼接折扣分析查询
fn build_discount_analysis_query(filters: &ReportFilters) -> QueryBuilder<'_, Postgres> {
    let mut qb = QueryBuilder::new(
        "SELECT pi.posting_date,
                pi.name,
                pi.supplier,
                pi.total,
                coalesce(pi.total_discount_amount, 0) as total_discount_amount,
                coalesce(pi.effective_discount_percentage, 0) as effective_discount_percentage,
                coalesce(nullif(pi.discount_type, ''), 'None') as discount_type,
                pi.grand_total,
                coalesce(pi.total_discount_amount, 0) as savings
         FROM t_purchase_invoice pi
         WHERE pi.docstatus = 1",
    );

    if let Some(from) = filters.from_date {
        qb.push(" AND pi.posting_date >= ").push_bind(from);
    }
    if let Some(to) = filters.to_date {
        qb.push(" AND pi.posting_date <= ").push_bind(to);
    }
    if let Some(supplier) = &filters.supplier {
        qb.push(" AND pi.supplier = ").push_bind(supplier);
    }
    if let Some(discount_type) = &filters.discount_type {
        qb.push(" AND coalesce(nullif(pi.discount_type, ''), 'None') = ")
            .push_bind(discount_type);
    }
    if let Some(min) = &filters.min_discount_amount {
        qb.push(" AND coalesce(pi.total_discount_amount, 0) >= ")
            .push_bind(min.clone());
    }

    qb.push(" ORDER BY pi.posting_date DESC, pi.name DESC");
    qb
}

/// 查询折扣分析报表 (仅已提交发票)
pub async fn discount_analysis(
    pool: &PgPool,
    filters: &ReportFilters,
) -> Result<Vec<DiscountAnalysisRow>, sqlx::Error> {
    let start_time = std::time::Instant::now();
    let mut qb = build_discount_analysis_query(filters);
    let rows = qb
        .build_query_as::<DiscountAnalysisRow>()
        .fetch_all(pool)
        .await?;
    tracing::debug!("折扣分析查询完成, {} 行, 耗时: {:?}", rows.len(), start_time.elapsed());
    Ok(rows)
}

const REPORT_HEADER: [&str; 9] = [
    "posting_date",
    "name",
    "supplier",
    "total",
    "total_discount_amount",
    "effective_discount_percentage",
    "discount_type",
    "grand_total",
    "savings",
];

/// 写出报表 CSV (含表头)
pub fn write_report_csv<W: Write>(rows: &[DiscountAnalysisRow], out: W) -> AppResult<()> {
    let mut writer = csv::Writer::from_writer(out);
    writer.write_record(REPORT_HEADER)?;

    for row in rows {
        writer.write_record(&[
            row.posting_date.to_string(),
            row.name.clone(),
            row.supplier.clone(),
            row.total.to_string(),
            row.total_discount_amount.to_string(),
            row.effective_discount_percentage.to_string(),
            row.discount_type.clone(),
            row.grand_total.to_string(),
            row.savings.to_string(),
        ])?;
    }

    writer.flush()?;
    Ok(())
}

/// 导出报表到 CSV 文件
pub fn export_report_csv(rows: &[DiscountAnalysisRow], output_path: &Path) -> AppResult<()> {
    let file = std::fs::File::create(output_path)?;
    write_report_csv(rows, file)?;
    tracing::info!("exported {} report rows to {}", rows.len(), output_path.display());
    Ok(())
}
