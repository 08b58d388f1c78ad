use axum::http::{HeaderValue, Method};
use notify_fanout::{
    config::Config,
    routes,
    services::{
        channels::{MobilePushAdapter, WebPushAdapter},
        Database, MemoryStore,
    },
    state::{AppState, Stores},
};
use std::sync::Arc;
use tokio::time::Duration;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// 关闭时等待在途投递的上限
const SHUTDOWN_SETTLE_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let config = Config::from_env()?;

    // 初始化日志
    let filter = tracing_subscriber::EnvFilter::new(&config.log_level);
    if config.uses_json_logs() {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    info!("Starting notify-fanout service ({})...", config.environment);

    let stores = if config.uses_memory_storage() {
        if config.is_production() {
            warn!("In-memory storage selected in production; data is lost on restart");
        } else {
            info!("Using in-memory storage");
        }
        Stores::memory(Arc::new(MemoryStore::new()))
    } else {
        let db = Database::new(&config).await.map_err(|e| {
            error!("Failed to create database connection: {}", e);
            anyhow::anyhow!("Database initialization failed")
        })?;
        db.verify_connection().await?;
        info!("Database connection established successfully");
        Stores::surreal(Arc::new(db))
    };

    // 通道凭据在启动时校验，启用的通道缺少凭据直接退出
    let web_push = if config.enable_web_push {
        Some(WebPushAdapter::from_config(&config)?)
    } else {
        info!("Web push disabled");
        None
    };
    let mobile_push = if config.enable_mobile_push {
        Some(MobilePushAdapter::from_config(&config)?)
    } else {
        info!("Mobile push disabled");
        None
    };

    let app_state = Arc::new(AppState::new(config.clone(), stores, web_push, mobile_push));
    app_state.websocket_service.spawn_cleanup();

    // 配置 CORS
    let origins: Vec<HeaderValue> = config
        .cors_allowed_origins
        .split(',')
        .filter_map(|origin| origin.trim().parse::<HeaderValue>().ok())
        .collect();
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers(Any)
        .allow_origin(origins);

    let app = routes::app(app_state.clone())
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    let addr = format!("{}:{}", config.server_host, config.server_port);
    info!("Starting server on http://{}", addr);

    axum::Server::bind(&addr.parse()?)
        .serve(app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped, waiting for in-flight deliveries...");
    let dispatcher = app_state.dispatcher.clone();
    if tokio::time::timeout(SHUTDOWN_SETTLE_TIMEOUT, dispatcher.settle())
        .await
        .is_err()
    {
        warn!(
            "Shutdown with {} fan-out(s) still in flight",
            app_state.dispatcher.in_flight()
        );
    }

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
