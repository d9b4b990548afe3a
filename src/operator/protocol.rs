//! 操作员协议：在订单生命周期之上的有状态聊天前端
//!
//! 输入有三类：按钮回调、斜杠命令、普通文本。普通文本只有在回复意图已设置时才会被当作回复；
//! 命令总是优先于回复意图，且不会消耗它。
//! 只接受配置中的唯一操作员身份，其他身份的输入静默忽略。

use std::sync::Arc;

use super::command::{self, parse_callback, CallbackAction, CallbackParseError, Command, Input};
use super::intent::ReplyIntents;
use crate::core::DeskError;
use crate::notify::{ActionButton, OutboundMessage};
use crate::order::{
    Order, OrderFilter, OrderLifecycle, OrderNumber, OrderSort, OrderStatus, Sender,
};
use crate::render::{escape_html, order_detail, order_list};

const DEFAULT_LIST_LIMIT: usize = 20;

/// 按钮回调的处理结果：`toast` 用于确认回调的短提示，`reply` 为需要发到聊天里的消息
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallbackOutcome {
    pub toast: Option<String>,
    pub reply: Option<OutboundMessage>,
}

impl CallbackOutcome {
    fn toast(text: impl Into<String>) -> Self {
        Self {
            toast: Some(text.into()),
            reply: None,
        }
    }

    fn with_reply(mut self, reply: OutboundMessage) -> Self {
        self.reply = Some(reply);
        self
    }

    /// 变更失败：提示 + 聊天里的失败说明
    fn failed(err: &DeskError) -> Self {
        Self::toast(err.user_message()).with_reply(failure(err))
    }
}

pub struct OperatorProtocol {
    lifecycle: Arc<OrderLifecycle>,
    intents: ReplyIntents,
    operator: Option<String>,
    list_limit: usize,
}

fn failure(err: &DeskError) -> OutboundMessage {
    OutboundMessage::html(format!("❌ {}", escape_html(&err.user_message())))
}

fn unrecognized() -> OutboundMessage {
    OutboundMessage::html(
        "🤔 Unrecognized command. Send /yardim for the list of commands.".to_string(),
    )
}

impl OperatorProtocol {
    /// `operator` 为唯一授权的操作员身份（聊天 ID）；为 `None` 时所有输入都被忽略
    pub fn new(lifecycle: Arc<OrderLifecycle>, operator: Option<String>) -> Self {
        Self {
            lifecycle,
            intents: ReplyIntents::default(),
            operator: operator.filter(|id| !id.trim().is_empty()),
            list_limit: DEFAULT_LIST_LIMIT,
        }
    }

    pub fn with_list_limit(mut self, limit: usize) -> Self {
        self.list_limit = limit.max(1);
        self
    }

    pub fn intents(&self) -> &ReplyIntents {
        &self.intents
    }

    fn authorize(&self, sender: &str) -> Result<(), DeskError> {
        match self.operator.as_deref() {
            Some(op) if op == sender => Ok(()),
            _ => Err(DeskError::Unauthorized(sender.to_string())),
        }
    }

    /// 处理一条文本消息；返回 `None` 表示不回复（非授权身份）
    pub async fn handle_text(&self, sender: &str, text: &str) -> Option<OutboundMessage> {
        if let Err(e) = self.authorize(sender) {
            tracing::warn!("Ignoring operator text: {}", e);
            return None;
        }

        let reply = match command::parse(text) {
            Input::Command(cmd) => {
                tracing::debug!("Operator command: {:?}", cmd);
                self.run(sender, cmd).await
            }
            Input::Malformed(verb) => OutboundMessage::html(format!(
                "⚠️ Invalid arguments.\nUsage: <code>{}</code>",
                escape_html(verb.usage())
            )),
            Input::UnknownCommand => unrecognized(),
            Input::Text => match self.intents.consume(sender).await {
                Some(number) => self.reply_from_intent(&number, text).await,
                None => unrecognized(),
            },
        };
        Some(reply)
    }

    /// 处理一次按钮点击
    pub async fn handle_callback(&self, sender: &str, data: &str) -> CallbackOutcome {
        if let Err(e) = self.authorize(sender) {
            tracing::warn!("Ignoring operator callback: {}", e);
            return CallbackOutcome::default();
        }

        let callback = match parse_callback(data) {
            Ok(cb) => cb,
            Err(CallbackParseError::MissingOrderNumber) => {
                tracing::warn!("Callback without order number: {:?}", data);
                return CallbackOutcome::toast("Invalid request: order number missing.");
            }
            Err(CallbackParseError::UnknownAction(action)) => {
                tracing::warn!("Unknown callback action: {}", action);
                return CallbackOutcome::toast("Unknown action.").with_reply(
                    OutboundMessage::html(format!(
                        "⚠️ Unknown action: <code>{}</code>",
                        escape_html(&action)
                    )),
                );
            }
        };

        let number = callback.order_number;
        match callback.action {
            CallbackAction::Confirm => {
                self.status_callback(&number, OrderStatus::Completed).await
            }
            CallbackAction::Cancel => {
                self.status_callback(&number, OrderStatus::Cancelled).await
            }
            CallbackAction::Archive => match self.lifecycle.set_archived(&number, true).await {
                Ok(order) => CallbackOutcome::toast("Archived.").with_reply(archived_message(&order)),
                Err(e) => CallbackOutcome::failed(&e),
            },
            CallbackAction::View => CallbackOutcome::default().with_reply(self.view(&number).await),
            CallbackAction::ReplyInit => {
                self.intents.arm(sender, number.clone()).await;
                tracing::info!("Reply intent armed for {}", number);
                CallbackOutcome::toast("Reply mode.").with_reply(OutboundMessage::html(format!(
                    "💬 Write your reply for order <code>{}</code> now.\n\
                     Send /yanitiptal to cancel.",
                    number
                )))
            }
        }
    }

    async fn status_callback(&self, number: &OrderNumber, status: OrderStatus) -> CallbackOutcome {
        match self.lifecycle.transition_status(number, status).await {
            Ok(order) => CallbackOutcome::toast(format!("Status: {}", status.label()))
                .with_reply(status_message(&order)),
            Err(e) => CallbackOutcome::failed(&e),
        }
    }

    async fn reply_from_intent(&self, number: &OrderNumber, text: &str) -> OutboundMessage {
        if text.trim().is_empty() {
            return OutboundMessage::html("⚠️ Reply cannot be empty. Cancelled.".to_string());
        }
        self.send_operator_message(number, text).await
    }

    async fn send_operator_message(&self, number: &OrderNumber, text: &str) -> OutboundMessage {
        match self
            .lifecycle
            .append_message(number, Sender::Operator, text)
            .await
        {
            Ok(order) => OutboundMessage::html(format!(
                "✅ Message sent to order <code>{}</code>.",
                order.order_number
            )),
            Err(e) => failure(&e),
        }
    }

    async fn view(&self, number: &OrderNumber) -> OutboundMessage {
        match self.lifecycle.find(number).await {
            Ok(Some(order)) => OutboundMessage::html(order_detail(&order)).with_actions(vec![
                vec![ActionButton::new(
                    "💬 Reply",
                    CallbackAction::ReplyInit.payload(&order.order_number),
                )],
            ]),
            Ok(None) => failure(&DeskError::NotFound(number.to_string())),
            Err(e) => failure(&e),
        }
    }

    async fn list(&self, title: &str, filter: OrderFilter, sort: OrderSort) -> OutboundMessage {
        match self.lifecycle.list(&filter, sort).await {
            Ok(orders) => OutboundMessage::html(order_list(title, &orders)),
            Err(e) => failure(&e),
        }
    }

    async fn run(&self, sender: &str, cmd: Command) -> OutboundMessage {
        match cmd {
            Command::Help => OutboundMessage::html(command::help_text()),
            Command::View(number) => self.view(&number).await,
            Command::Confirm(number) => self.set_status(&number, OrderStatus::Completed).await,
            Command::Cancel(number) => self.set_status(&number, OrderStatus::Cancelled).await,
            Command::Archive(number) => match self.lifecycle.set_archived(&number, true).await {
                Ok(order) => archived_message(&order),
                Err(e) => failure(&e),
            },
            Command::Unarchive(number) => match self.lifecycle.set_archived(&number, false).await
            {
                Ok(order) => OutboundMessage::html(format!(
                    "📂 Order <code>{}</code> moved out of the archive.",
                    order.order_number
                )),
                Err(e) => failure(&e),
            },
            Command::DeleteArchived(number) => self.delete_archived(&number).await,
            Command::Reply { order_number, text }
            | Command::SendMessage { order_number, text } => {
                self.send_operator_message(&order_number, &text).await
            }
            Command::CancelReply => {
                if self.intents.clear(sender).await {
                    OutboundMessage::html("Reply cancelled.".to_string())
                } else {
                    OutboundMessage::html("There is no pending reply.".to_string())
                }
            }
            Command::ListPending => {
                let filter = OrderFilter {
                    status: Some(OrderStatus::Pending),
                    archived: Some(false),
                    limit: Some(self.list_limit),
                    ..Default::default()
                };
                self.list("Pending orders", filter, OrderSort::UnreadFirst).await
            }
            Command::ListUnread => {
                let filter = OrderFilter {
                    archived: Some(false),
                    unread: Some(true),
                    limit: Some(self.list_limit),
                    ..Default::default()
                };
                self.list("Orders with unread messages", filter, OrderSort::Newest)
                    .await
            }
            Command::ListRecent(n) => {
                let limit = n.min(self.list_limit);
                let filter = OrderFilter {
                    limit: Some(limit),
                    ..Default::default()
                };
                self.list(&format!("Last {} orders", limit), filter, OrderSort::Newest)
                    .await
            }
            Command::Search(query) => {
                let title = format!("Search: {}", query);
                let filter = OrderFilter {
                    search: Some(query),
                    limit: Some(self.list_limit),
                    ..Default::default()
                };
                self.list(&title, filter, OrderSort::UnreadFirst).await
            }
        }
    }

    async fn set_status(&self, number: &OrderNumber, status: OrderStatus) -> OutboundMessage {
        match self.lifecycle.transition_status(number, status).await {
            Ok(order) => status_message(&order),
            Err(e) => failure(&e),
        }
    }

    /// 先按订单号解析出 id，再做条件删除
    async fn delete_archived(&self, number: &OrderNumber) -> OutboundMessage {
        let order = match self.lifecycle.find(number).await {
            Ok(Some(order)) => order,
            Ok(None) => return failure(&DeskError::NotFound(number.to_string())),
            Err(e) => return failure(&e),
        };
        match self.lifecycle.delete_archived(order.id).await {
            Ok(deleted) => OutboundMessage::html(format!(
                "🗑 Archived order <code>{}</code> permanently deleted.",
                deleted.order_number
            )),
            Err(e) if e.is_not_found() => OutboundMessage::html(format!(
                "❌ Order <code>{}</code> was not found in the archive.",
                number
            )),
            Err(e) => failure(&e),
        }
    }
}

fn status_message(order: &Order) -> OutboundMessage {
    OutboundMessage::html(format!(
        "{} Order <code>{}</code> status: <b>{}</b>",
        order.status.icon(),
        order.order_number,
        order.status.label()
    ))
}

fn archived_message(order: &Order) -> OutboundMessage {
    OutboundMessage::html(format!(
        "📁 Order <code>{}</code> archived.",
        order.order_number
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::order::{MemoryOrderStore, NewOrder, OrderNumberAllocator};

    const OP: &str = "1001";

    async fn setup() -> (OperatorProtocol, Arc<OrderLifecycle>, Order) {
        let store = MemoryOrderStore::shared();
        let allocator = OrderNumberAllocator::new(store.clone(), 10);
        let lifecycle = Arc::new(OrderLifecycle::new(store, allocator));
        let order = lifecycle
            .create(NewOrder {
                product_name: "Widget".into(),
                quantity: 1,
                payment_info: "USDT".into(),
                ..Default::default()
            })
            .await
            .unwrap();
        let protocol = OperatorProtocol::new(lifecycle.clone(), Some(OP.to_string()));
        (protocol, lifecycle, order)
    }

    #[tokio::test]
    async fn test_unauthorized_is_silent() {
        let (protocol, lifecycle, order) = setup().await;
        let text = format!("/onayla {}", order.order_number);
        assert!(protocol.handle_text("999", &text).await.is_none());

        let outcome = protocol
            .handle_callback("999", &CallbackAction::Confirm.payload(&order.order_number))
            .await;
        assert_eq!(outcome, CallbackOutcome::default());

        let stored = lifecycle.find(&order.order_number).await.unwrap().unwrap();
        assert_eq!(stored.status, OrderStatus::Pending);
    }

    #[tokio::test]
    async fn test_no_operator_configured_ignores_everything() {
        let (_, lifecycle, _) = setup().await;
        let protocol = OperatorProtocol::new(lifecycle, Some("  ".into()));
        assert!(protocol.handle_text("", "/yardim").await.is_none());
    }

    #[tokio::test]
    async fn test_confirm_callback() {
        let (protocol, lifecycle, order) = setup().await;
        let outcome = protocol
            .handle_callback(OP, &CallbackAction::Confirm.payload(&order.order_number))
            .await;
        assert!(outcome.toast.unwrap().contains("Payment confirmed"));
        let stored = lifecycle.find(&order.order_number).await.unwrap().unwrap();
        assert_eq!(stored.status, OrderStatus::Completed);
    }

    #[tokio::test]
    async fn test_failed_callback_reports_in_chat() {
        let (protocol, _, _) = setup().await;
        for data in ["confirm:EM-DEADBEEF", "cancel:EM-DEADBEEF", "archive:EM-DEADBEEF"] {
            let outcome = protocol.handle_callback(OP, data).await;
            assert!(outcome.toast.unwrap().contains("not found"));
            let reply = outcome.reply.unwrap();
            assert!(reply.text.starts_with("❌"));
            assert!(reply.text.contains("EM-DEADBEEF"));
        }
    }

    #[tokio::test]
    async fn test_bad_callbacks_do_not_mutate() {
        let (protocol, lifecycle, order) = setup().await;
        let outcome = protocol.handle_callback(OP, "confirm").await;
        assert!(outcome.toast.is_some());
        assert!(outcome.reply.is_none());

        let outcome = protocol
            .handle_callback(OP, &format!("explode:{}", order.order_number))
            .await;
        assert!(outcome.reply.unwrap().text.contains("explode"));

        let stored = lifecycle.find(&order.order_number).await.unwrap().unwrap();
        assert_eq!(stored, order);
    }

    #[tokio::test]
    async fn test_reply_intent_flow() {
        let (protocol, lifecycle, order) = setup().await;
        protocol
            .handle_callback(OP, &CallbackAction::ReplyInit.payload(&order.order_number))
            .await;
        assert_eq!(protocol.intents().peek(OP).await, Some(order.order_number.clone()));

        let reply = protocol.handle_text(OP, "  on its way  ").await.unwrap();
        assert!(reply.text.contains("Message sent"));
        assert!(protocol.intents().peek(OP).await.is_none());

        let stored = lifecycle.find(&order.order_number).await.unwrap().unwrap();
        assert_eq!(stored.messages.len(), 1);
        assert_eq!(stored.messages[0].text, "on its way");
        assert_eq!(stored.messages[0].sender, Sender::Operator);
    }

    #[tokio::test]
    async fn test_empty_reply_clears_intent() {
        let (protocol, _, order) = setup().await;
        protocol.intents().arm(OP, order.order_number.clone()).await;
        let reply = protocol.handle_text(OP, "   ").await.unwrap();
        assert!(reply.text.contains("cannot be empty"));
        assert!(protocol.intents().peek(OP).await.is_none());
    }

    #[tokio::test]
    async fn test_unknown_slash_keeps_intent() {
        let (protocol, _, order) = setup().await;
        protocol.intents().arm(OP, order.order_number.clone()).await;
        let reply = protocol.handle_text(OP, "/nope").await.unwrap();
        assert!(reply.text.contains("Unrecognized"));
        assert!(protocol.intents().peek(OP).await.is_some());

        assert!(protocol
            .handle_text(OP, "/yanitiptal")
            .await
            .unwrap()
            .text
            .contains("cancelled"));
        assert!(protocol.intents().peek(OP).await.is_none());
    }

    #[tokio::test]
    async fn test_plain_text_without_intent_is_unrecognized() {
        let (protocol, lifecycle, order) = setup().await;
        let reply = protocol.handle_text(OP, "hello").await.unwrap();
        assert!(reply.text.contains("Unrecognized"));
        let stored = lifecycle.find(&order.order_number).await.unwrap().unwrap();
        assert!(stored.messages.is_empty());
    }

    #[tokio::test]
    async fn test_malformed_command_shows_usage() {
        let (protocol, _, _) = setup().await;
        let reply = protocol.handle_text(OP, "/onayla").await.unwrap();
        assert!(reply.text.contains("Usage"));
        assert!(reply.text.contains("/onayla &lt;OrderNo&gt;"));
    }

    #[tokio::test]
    async fn test_delete_archived_requires_archive() {
        let (protocol, lifecycle, order) = setup().await;
        let text = format!("/arsivlisil {}", order.order_number);
        let reply = protocol.handle_text(OP, &text).await.unwrap();
        assert!(reply.text.contains("not found in the archive"));
        assert!(lifecycle.find(&order.order_number).await.unwrap().is_some());

        protocol
            .handle_text(OP, &format!("/arsivle {}", order.order_number))
            .await;
        let reply = protocol.handle_text(OP, &text).await.unwrap();
        assert!(reply.text.contains("permanently deleted"));
        assert!(lifecycle.find(&order.order_number).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_recent_is_capped() {
        let (_, lifecycle, _) = setup().await;
        let protocol = OperatorProtocol::new(lifecycle, Some(OP.into())).with_list_limit(3);
        let reply = protocol.handle_text(OP, "/son 50").await.unwrap();
        assert!(reply.text.contains("Last 3 orders"));
    }
}
