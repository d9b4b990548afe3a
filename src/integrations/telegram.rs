//! Telegram Bot 集成：操作员通过机器人聊天管理订单
//!
//! Webhook 收到 Update 后立即返回 200，避免 Telegram 因超时重发。按 update_id 去重。
//! 协议处理交给单个后台 worker，按到达顺序逐条执行（回复也等发出后再处理下一条）。

use std::collections::HashSet;
use std::sync::Arc;

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    routing::post,
    Json, Router,
};
use serde::Deserialize;
use tokio::sync::{mpsc, RwLock};

use crate::notify::{NotificationGateway, TelegramChannel};
use crate::operator::OperatorProtocol;

const SECRET_HEADER: &str = "x-telegram-bot-api-secret-token";

/// 已处理的 update_id（超过上限时整体清空）
pub type ProcessedUpdates = Arc<RwLock<HashSet<i64>>>;

pub struct TelegramState {
    updates: mpsc::UnboundedSender<Update>,
    pub processed_updates: ProcessedUpdates,
    pub webhook_secret: Option<String>,
}

impl TelegramState {
    /// 同时启动处理 worker，需在 tokio 运行时内调用
    pub fn new(
        protocol: Arc<OperatorProtocol>,
        gateway: Arc<NotificationGateway>,
        channel: Option<Arc<TelegramChannel>>,
        webhook_secret: Option<String>,
    ) -> Self {
        let (updates, mut rx) = mpsc::unbounded_channel::<Update>();
        let processor = UpdateProcessor {
            protocol,
            gateway,
            channel,
        };
        tokio::spawn(async move {
            while let Some(update) = rx.recv().await {
                processor.process(update).await;
            }
            tracing::debug!("Telegram update worker stopped");
        });

        Self {
            updates,
            processed_updates: Arc::new(RwLock::new(HashSet::new())),
            webhook_secret: webhook_secret.filter(|s| !s.is_empty()),
        }
    }
}

struct UpdateProcessor {
    protocol: Arc<OperatorProtocol>,
    /// 回复发回操作员聊天
    gateway: Arc<NotificationGateway>,
    /// 用于 answerCallbackQuery；未配置 Bot Token 时为 None
    channel: Option<Arc<TelegramChannel>>,
}

#[derive(Debug, Deserialize)]
pub struct Update {
    pub update_id: i64,
    pub message: Option<TgMessage>,
    pub callback_query: Option<CallbackQuery>,
}

#[derive(Debug, Deserialize)]
pub struct TgMessage {
    pub chat: Chat,
    pub text: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Chat {
    pub id: i64,
}

#[derive(Debug, Deserialize)]
pub struct User {
    pub id: i64,
}

#[derive(Debug, Deserialize)]
pub struct CallbackQuery {
    pub id: String,
    pub from: User,
    pub data: Option<String>,
    pub message: Option<TgMessage>,
}

impl CallbackQuery {
    /// 按钮所在聊天；缺失时退回点击者 id
    fn sender(&self) -> String {
        self.message
            .as_ref()
            .map(|m| m.chat.id)
            .unwrap_or(self.from.id)
            .to_string()
    }
}

pub fn create_router(state: Arc<TelegramState>) -> Router {
    Router::new()
        .route("/telegram/webhook", post(webhook_handler))
        .with_state(state)
}

/// POST /telegram/webhook
async fn webhook_handler(
    State(state): State<Arc<TelegramState>>,
    headers: HeaderMap,
    Json(update): Json<Update>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    if let Some(ref secret) = state.webhook_secret {
        let provided = headers.get(SECRET_HEADER).and_then(|v| v.to_str().ok());
        if provided != Some(secret.as_str()) {
            tracing::warn!("Telegram webhook: secret token mismatch, rejecting");
            return Err(StatusCode::UNAUTHORIZED);
        }
    }

    {
        let mut processed = state.processed_updates.write().await;
        if !processed.insert(update.update_id) {
            tracing::debug!("Duplicate update ignored: {}", update.update_id);
            return Ok(Json(serde_json::json!({})));
        }
        if processed.len() > 10_000 {
            processed.clear();
            processed.insert(update.update_id);
        }
    }

    let update_id = update.update_id;
    if state.updates.send(update).is_err() {
        tracing::error!("Telegram update worker is gone, update {} dropped", update_id);
    } else {
        tracing::debug!("Telegram update {} queued", update_id);
    }

    Ok(Json(serde_json::json!({})))
}

impl UpdateProcessor {
    async fn process(&self, update: Update) {
        if let Some(query) = update.callback_query {
            let sender = query.sender();
            let data = query.data.as_deref().unwrap_or_default();
            let outcome = self.protocol.handle_callback(&sender, data).await;

            if let Some(ref channel) = self.channel {
                if let Err(e) = channel
                    .answer_callback(&query.id, outcome.toast.as_deref())
                    .await
                {
                    tracing::error!("answerCallbackQuery failed: {}", e);
                }
            }
            if let Some(reply) = outcome.reply {
                self.gateway.deliver("callback reply", reply).outcome().await;
            }
            return;
        }

        let Some(message) = update.message else {
            tracing::debug!("Update {} has no message, ignoring", update.update_id);
            return;
        };
        let Some(text) = message.text else {
            tracing::debug!("Non-text message from chat {}, ignoring", message.chat.id);
            return;
        };
        let sender = message.chat.id.to_string();
        if let Some(reply) = self.protocol.handle_text(&sender, &text).await {
            self.gateway.deliver("operator reply", reply).outcome().await;
        }
    }
}
