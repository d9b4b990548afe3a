//! OrderDesk - 订单客服台
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误分类、优雅关闭
//! - **order**: 订单模型、订单号分配、存储抽象（内存 / SQLite）、生命周期
//! - **notify**: 操作员通知网关与频道（Telegram Bot API）
//! - **operator**: 操作员聊天协议（命令、按钮回调、回复意图）
//! - **render**: 订单详情 / 消息记录 / 列表的 HTML 文案
//! - **checkout**: 顾客下单、查单、留言
//! - **admin**: 管理面板操作
//! - **integrations**: axum HTTP 入口（Telegram Webhook、JSON 接口）

pub mod admin;
pub mod checkout;
pub mod config;
pub mod core;
pub mod integrations;
pub mod notify;
pub mod observability;
pub mod operator;
pub mod order;
pub mod render;

pub use crate::core::{DeskError, ValidationError};
pub use order::{Order, OrderLifecycle, OrderNumber, OrderStatus};
