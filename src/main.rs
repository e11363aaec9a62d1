use axum::{
    routing::{get, post},
    Router,
};
use receipt_matcher::fx::FrankfurterProvider;
use receipt_matcher::store::open_stores;
use receipt_matcher::{api, AppConfig, CurrencyResolver, MatchingEngine, ReceiptMatcher};
use std::sync::Arc;
use tower::ServiceBuilder;
use tracing::info;
use tracing_subscriber::fmt::time::ChronoLocal;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 加载配置 (日志级别也在配置里)
    let config = AppConfig::load()?;

    // 初始化日志 - 本地时间格式; RUST_LOG 优先于配置
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt()
        .with_timer(ChronoLocal::new("%Y-%m-%d %H:%M:%S".to_string()))
        .with_env_filter(filter)
        .with_target(true)
        .with_level(true)
        .init();

    info!("Starting server with config: {:?}", config);

    // 缓存 (file / postgres); HTTP 接口只用到汇率缓存
    let (_extraction_store, rate_store) = open_stores(&config).await?;

    // 汇率解析 + 匹配引擎
    let provider = Arc::new(FrankfurterProvider::new(&config.fx)?);
    let resolver = CurrencyResolver::new(provider, rate_store, &config.fx.domestic_currency)
        .with_fallback_days(config.fx.fallback_days)
        .with_max_concurrent(config.fx.max_concurrent_lookups);
    let engine = MatchingEngine::new(config.matching.clone())?;
    let matcher = Arc::new(ReceiptMatcher::new(resolver, engine));

    // 构建路由
    let app = Router::new()
        .route("/health", get(api::health_check))
        .route("/api/match", post(api::match_receipts))
        .with_state(matcher)
        .layer(ServiceBuilder::new());

    // 启动服务器
    let addr = format!("{}:{}", config.server.host, config.server.port);
    info!("Server listening on {}", addr);
    info!("API Endpoints:");
    info!("  GET  /health     - health check");
    info!("  POST /api/match  - match transactions with extracted receipts");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
