//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `ORDERDESK__*` 覆盖
//! （双下划线表示嵌套，如 `ORDERDESK__TELEGRAM__BOT_TOKEN=123:abc`）。

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub operator: OperatorSection,
    pub telegram: TelegramSection,
    pub store: StoreSection,
    pub orders: OrdersSection,
    pub server: ServerSection,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppSection {
    pub name: Option<String>,
}

/// [operator] 段：唯一授权的操作员聊天 ID；为空时协议忽略所有输入
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OperatorSection {
    #[serde(default)]
    pub chat_id: Option<String>,
}

/// [telegram] 段：Bot Token 为空时不推送通知
#[derive(Debug, Clone, Deserialize)]
pub struct TelegramSection {
    #[serde(default)]
    pub bot_token: Option<String>,
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default = "default_telegram_timeout")]
    pub timeout_secs: u64,
    /// 校验 `X-Telegram-Bot-Api-Secret-Token` 请求头；为空时不校验
    #[serde(default)]
    pub webhook_secret: Option<String>,
}

impl Default for TelegramSection {
    fn default() -> Self {
        Self {
            bot_token: None,
            api_base: default_api_base(),
            timeout_secs: default_telegram_timeout(),
            webhook_secret: None,
        }
    }
}

impl TelegramSection {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// 非空 Bot Token
    pub fn token(&self) -> Option<&str> {
        self.bot_token.as_deref().filter(|t| !t.trim().is_empty())
    }
}

fn default_api_base() -> String {
    "https://api.telegram.org".to_string()
}

fn default_telegram_timeout() -> u64 {
    10
}

/// [store] 段：db_path 未设置时使用内存存储
#[derive(Debug, Clone, Deserialize)]
pub struct StoreSection {
    #[serde(default)]
    pub db_path: Option<PathBuf>,
    /// 单次存储调用超时（秒）
    #[serde(default = "default_store_timeout")]
    pub timeout_secs: u64,
}

impl Default for StoreSection {
    fn default() -> Self {
        Self {
            db_path: None,
            timeout_secs: default_store_timeout(),
        }
    }
}

impl StoreSection {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_store_timeout() -> u64 {
    5
}

/// [orders] 段：订单号分配重试上限、列表命令条数上限
#[derive(Debug, Clone, Deserialize)]
pub struct OrdersSection {
    #[serde(default = "default_max_allocation_attempts")]
    pub max_allocation_attempts: u32,
    #[serde(default = "default_list_limit")]
    pub list_limit: usize,
}

impl Default for OrdersSection {
    fn default() -> Self {
        Self {
            max_allocation_attempts: default_max_allocation_attempts(),
            list_limit: default_list_limit(),
        }
    }
}

fn default_max_allocation_attempts() -> u32 {
    crate::order::DEFAULT_MAX_ATTEMPTS
}

fn default_list_limit() -> usize {
    20
}

/// [server] 段：HTTP 监听地址
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl ServerSection {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3000
}

/// 从 config 目录加载配置，环境变量 ORDERDESK__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 ORDERDESK__*
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("ORDERDESK")
            .separator("__")
            .try_parsing(true),
    );

    builder.build()?.try_deserialize()
}
