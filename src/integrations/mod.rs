//! HTTP 入口：Telegram 操作员机器人、顾客 / 管理 JSON 接口（需对应 feature）

#[cfg(feature = "telegram")]
pub mod telegram;

#[cfg(feature = "web")]
pub mod web;
