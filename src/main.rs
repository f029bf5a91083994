use axum::{
    routing::{get, post},
    Router,
};
use purchase_discount_rust::api::{self, AppState};
use purchase_discount_rust::service::ReportService;
use purchase_discount_rust::{create_pool, AppConfig, Calculator, DiscountEngine, PgRuleSource};
use std::sync::Arc;
use tower::ServiceBuilder;
use tracing::info;
use tracing_subscriber::fmt::time::ChronoLocal;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 初始化日志 - 本地时间格式
    tracing_subscriber::fmt()
        .with_timer(ChronoLocal::new("%Y-%m-%d %H:%M:%S".to_string()))
        .with_target(true)
        .with_level(true)
        .init();

    // 加载配置
    let config = AppConfig::from_env()?;
    info!("Starting server with config: {:?}", config);

    // 创建数据库连接池
    let pool = create_pool(&config.database).await?;
    info!("Database pool created");

    let calculator = Calculator::new(config.calculator.currency_precision);
    let state = AppState {
        rules: Arc::new(PgRuleSource::new(pool.clone(), DiscountEngine::new(calculator))),
        reports: Arc::new(ReportService::new(pool)),
        calculator,
        settings: Arc::new(config.calculator.clone()),
    };

    // 构建路由
    let app = Router::new()
        .route("/health", get(api::health_check))
        .route("/api/discounts/apply", post(api::apply_discounts))
        .route("/api/discounts/apply/batch", post(api::apply_discounts_batch))
        .route("/api/discounts/reset", post(api::reset_discounts))
        .route("/api/suppliers/:supplier/discounts", get(api::supplier_discounts))
        .route(
            "/api/suppliers/:supplier/discounts/invalidate",
            post(api::invalidate_supplier_discounts),
        )
        .route("/api/promotions/active", get(api::active_promotions))
        .route("/api/estimates/convert", post(api::convert_estimate))
        .route("/api/reports/discount-analysis", get(api::discount_analysis))
        .route(
            "/api/reports/discount-analysis/export",
            get(api::export_discount_analysis),
        )
        .with_state(state)
        .layer(ServiceBuilder::new());

    // 启动服务器
    let addr = format!("{}:{}", config.server.host, config.server.port);
    info!("Server listening on {}", addr);
    info!("API Endpoints:");
    info!("  POST /api/discounts/apply         - recompute one document");
    info!("  POST /api/discounts/apply/batch   - recompute documents in parallel");
    info!("  GET  /api/suppliers/:supplier/discounts");
    info!("  GET  /api/reports/discount-analysis[/export]");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
