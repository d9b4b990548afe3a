//! OrderDesk 服务入口
//!
//! 同一个 HTTP 服务上挂载：Telegram Webhook（操作员机器人）、顾客结账 / 查单接口、管理接口。
//!
//! 配置：config/default.toml，可用 `ORDERDESK__*` 环境变量覆盖；第一个命令行参数可指定额外配置文件。
//!
//! 启动: cargo run --features server

#[cfg(feature = "server")]
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    use std::path::PathBuf;
    use std::sync::Arc;

    use anyhow::Context;
    use axum::{routing::get, Router};
    use orderdesk::admin::AdminDesk;
    use orderdesk::checkout::CheckoutFlow;
    use orderdesk::config::load_config;
    use orderdesk::core::{ShutdownCoordinator, ShutdownManager};
    use orderdesk::integrations::{telegram, web};
    use orderdesk::notify::{NotificationGateway, TelegramChannel};
    use orderdesk::observability;
    use orderdesk::operator::OperatorProtocol;
    use orderdesk::order::{OrderLifecycle, OrderNumberAllocator};

    observability::init();

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let cfg = load_config(config_path).context("Failed to load configuration")?;
    let app_name = cfg.app.name.clone().unwrap_or_else(|| "OrderDesk".to_string());

    let shutdown = Arc::new(ShutdownManager::new());
    let mut coordinator = ShutdownCoordinator::new().with_timeout(cfg.store.timeout());

    let store = open_store(&cfg, &mut coordinator).await?;
    let allocator = OrderNumberAllocator::new(store.clone(), cfg.orders.max_allocation_attempts);
    let lifecycle = Arc::new(
        OrderLifecycle::new(store, allocator).with_store_timeout(cfg.store.timeout()),
    );

    let operator = cfg
        .operator
        .chat_id
        .clone()
        .filter(|id| !id.trim().is_empty());
    let channel = match (cfg.telegram.token(), operator.as_deref()) {
        (Some(token), Some(chat_id)) => Some(Arc::new(
            TelegramChannel::new(&cfg.telegram.api_base, token, chat_id, cfg.telegram.timeout())
                .context("Failed to build Telegram client")?,
        )),
        _ => {
            tracing::warn!(
                "telegram.bot_token or operator.chat_id not set; operator notifications disabled"
            );
            None
        }
    };
    let gateway = Arc::new(match channel {
        Some(ref ch) => NotificationGateway::new(ch.clone()),
        None => NotificationGateway::disabled(),
    });

    let protocol = Arc::new(
        OperatorProtocol::new(Arc::clone(&lifecycle), operator)
            .with_list_limit(cfg.orders.list_limit),
    );

    let telegram_state = telegram::TelegramState::new(
        protocol,
        Arc::clone(&gateway),
        channel,
        cfg.telegram.webhook_secret.clone(),
    );
    let web_state = web::WebState {
        checkout: Arc::new(CheckoutFlow::new(Arc::clone(&lifecycle), Arc::clone(&gateway))),
        admin: Arc::new(AdminDesk::new(lifecycle)),
    };

    let app = Router::new()
        .route("/health", get(|| async { "OK" }))
        .merge(telegram::create_router(Arc::new(telegram_state)))
        .merge(web::create_router(Arc::new(web_state)));

    let addr = cfg.server.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    tracing::info!("{} listening on http://{}", app_name, addr);
    tracing::info!("Telegram webhook path: /telegram/webhook");

    shutdown.install_signal_handlers();
    let signal = Arc::clone(&shutdown);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { signal.wait_for_shutdown().await })
        .await
        .context("HTTP server error")?;

    coordinator.run_cleanup().await;
    tracing::info!("{} stopped", app_name);
    Ok(())
}

/// db_path 已配置且启用 async-sqlite 时使用 SQLite，否则使用内存存储
#[cfg(feature = "server")]
async fn open_store(
    cfg: &orderdesk::config::AppConfig,
    coordinator: &mut orderdesk::core::ShutdownCoordinator,
) -> anyhow::Result<std::sync::Arc<dyn orderdesk::order::OrderStore>> {
    use orderdesk::order::MemoryOrderStore;

    match cfg.store.db_path {
        #[cfg(feature = "async-sqlite")]
        Some(ref path) => {
            use anyhow::Context;
            use orderdesk::core::SqliteStoreCleanup;
            use orderdesk::order::{OrderStore, SqliteOrderStore};
            use std::sync::Arc;

            let sqlite = Arc::new(
                SqliteOrderStore::new(path)
                    .await
                    .with_context(|| format!("Failed to open {}", path.display()))?,
            );
            coordinator.register(SqliteStoreCleanup::new(Arc::clone(&sqlite)));
            tracing::info!("Order store: SQLite at {}", path.display());
            let store: Arc<dyn OrderStore> = sqlite;
            Ok(store)
        }
        #[cfg(not(feature = "async-sqlite"))]
        Some(ref path) => {
            let _ = coordinator;
            tracing::warn!(
                "store.db_path = {} ignored: built without async-sqlite, using in-memory store",
                path.display()
            );
            Ok(MemoryOrderStore::shared())
        }
        None => {
            tracing::info!("Order store: in-memory (orders are lost on restart)");
            Ok(MemoryOrderStore::shared())
        }
    }
}

#[cfg(not(feature = "server"))]
fn main() {
    eprintln!("请使用 --features server 编译: cargo run --features server");
    std::process::exit(1);
}
