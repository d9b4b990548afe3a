//! 通知网关：向唯一的操作员频道推送新订单 / 新顾客消息
//!
//! 通知是尽力而为的旁路：订单已先落库，推送在后台任务中执行，
//! 失败只记日志、不重试、不回传给触发它的生命周期操作。

pub mod memory;
pub mod telegram;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::task::JoinHandle;

use crate::operator::command::CallbackAction;
use crate::order::Order;
use crate::render::escape_html;

pub use memory::MemoryChannel;
pub use telegram::TelegramChannel;

/// 操作按钮：(显示文字, 回调 payload)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionButton {
    pub label: String,
    pub payload: String,
}

impl ActionButton {
    pub fn new(label: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            payload: payload.into(),
        }
    }
}

/// 待发送给操作员的消息，正文为 Telegram HTML
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub text: String,
    /// 按行分组的按钮
    pub actions: Vec<Vec<ActionButton>>,
}

impl OutboundMessage {
    pub fn html(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            actions: Vec::new(),
        }
    }

    pub fn with_actions(mut self, actions: Vec<Vec<ActionButton>>) -> Self {
        self.actions = actions;
        self
    }

    /// 所有按钮的 payload（测试与日志用）
    pub fn payloads(&self) -> Vec<&str> {
        self.actions
            .iter()
            .flatten()
            .map(|b| b.payload.as_str())
            .collect()
    }
}

/// 推送失败原因
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NotifyError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("channel rejected message: {0}")]
    Rejected(String),
}

/// 操作员聊天频道
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    async fn send(&self, message: OutboundMessage) -> Result<(), NotifyError>;
}

/// 单次推送结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    Delivered,
    Failed(NotifyError),
    /// 未配置频道
    Skipped,
}

/// 尽力而为的推送句柄：调用方可以直接丢弃，也可以 await 查看结果。
/// 丢弃句柄不会取消推送。
pub struct BestEffort(Option<JoinHandle<Delivery>>);

impl BestEffort {
    fn skipped() -> Self {
        Self(None)
    }

    pub async fn outcome(self) -> Delivery {
        match self.0 {
            None => Delivery::Skipped,
            Some(handle) => match handle.await {
                Ok(delivery) => delivery,
                Err(e) => Delivery::Failed(NotifyError::Transport(e.to_string())),
            },
        }
    }
}

pub struct NotificationGateway {
    channel: Option<Arc<dyn NotificationChannel>>,
}

impl NotificationGateway {
    pub fn new(channel: Arc<dyn NotificationChannel>) -> Self {
        Self {
            channel: Some(channel),
        }
    }

    /// 未配置操作员频道：所有推送都被跳过
    pub fn disabled() -> Self {
        Self { channel: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.channel.is_some()
    }

    /// 在后台投递一条消息；失败只记录日志
    pub fn deliver(&self, context: &str, message: OutboundMessage) -> BestEffort {
        let Some(channel) = self.channel.clone() else {
            tracing::debug!("Notification skipped (no operator channel): {}", context);
            return BestEffort::skipped();
        };
        let context = context.to_string();
        BestEffort(Some(tokio::spawn(async move {
            match channel.send(message).await {
                Ok(()) => {
                    tracing::debug!("Notification delivered: {}", context);
                    Delivery::Delivered
                }
                Err(e) => {
                    tracing::error!("Notification failed ({}): {}", context, e);
                    Delivery::Failed(e)
                }
            }
        })))
    }

    pub fn notify_new_order(&self, order: &Order) -> BestEffort {
        self.deliver(
            &format!("new order {}", order.order_number),
            new_order_message(order),
        )
    }

    pub fn notify_new_customer_message(&self, order: &Order, text: &str) -> BestEffort {
        self.deliver(
            &format!("customer message on {}", order.order_number),
            new_customer_message(order, text),
        )
    }
}

/// 新订单通知：订单号、商品、数量、支付方式、TxID、首条备注 + 确认/取消/查看/归档按钮
pub fn new_order_message(order: &Order) -> OutboundMessage {
    let n = &order.order_number;
    let mut text = format!(
        "📦 <b>New order received!</b>\n\n\
         <b>Order No:</b> <code>{}</code>\n\
         <b>Product:</b> {} (x{})\n\
         <b>Payment:</b> {}\n",
        n,
        escape_html(&order.product_name),
        order.quantity,
        escape_html(&order.payment_info),
    );
    if let Some(ref tx) = order.transaction_id {
        text.push_str(&format!("<b>TxID:</b> <code>{}</code>\n", escape_html(tx)));
    }
    if let Some(note) = order.first_customer_note() {
        text.push_str(&format!("<b>Note:</b> {}\n", escape_html(&note.text)));
    }
    text.push_str("\n<i>Use the buttons below to act.</i>");

    OutboundMessage::html(text).with_actions(vec![
        vec![
            ActionButton::new("✅ Confirm", CallbackAction::Confirm.payload(n)),
            ActionButton::new("❌ Cancel", CallbackAction::Cancel.payload(n)),
        ],
        vec![
            ActionButton::new("📄 View messages", CallbackAction::View.payload(n)),
            ActionButton::new("📁 Archive", CallbackAction::Archive.payload(n)),
        ],
    ])
}

/// 新顾客消息通知：订单号、商品、消息 + 回复/查看/确认/取消/归档按钮
pub fn new_customer_message(order: &Order, message_text: &str) -> OutboundMessage {
    let n = &order.order_number;
    let text = format!(
        "💬 <b>New customer message!</b>\n\n\
         <b>Order No:</b> <code>{}</code>\n\
         <b>Product:</b> {}\n\n\
         <b>Message:</b> {}\n\n\
         <i>Use the buttons below to act.</i>",
        n,
        escape_html(&order.product_name),
        escape_html(message_text),
    );

    OutboundMessage::html(text).with_actions(vec![
        vec![
            ActionButton::new("💬 Reply", CallbackAction::ReplyInit.payload(n)),
            ActionButton::new("📄 View messages", CallbackAction::View.payload(n)),
        ],
        vec![
            ActionButton::new("✅ Confirm", CallbackAction::Confirm.payload(n)),
            ActionButton::new("❌ Cancel", CallbackAction::Cancel.payload(n)),
        ],
        vec![ActionButton::new("📁 Archive", CallbackAction::Archive.payload(n))],
    ])
}
