//! 端到端场景：顾客下单 / 留言 + 操作员通过机器人协议处理

use std::sync::Arc;
use std::time::Duration;

use orderdesk::checkout::{CheckoutFlow, CheckoutRequest};
use orderdesk::notify::{MemoryChannel, NotificationGateway, OutboundMessage};
use orderdesk::operator::{CallbackAction, OperatorProtocol};
use orderdesk::order::{
    MemoryOrderStore, OrderLifecycle, OrderNumber, OrderNumberAllocator, OrderStatus, Sender,
};
use orderdesk::{DeskError, ValidationError};

const OPERATOR: &str = "5005";

struct Desk {
    lifecycle: Arc<OrderLifecycle>,
    checkout: CheckoutFlow,
    protocol: OperatorProtocol,
    channel: Arc<MemoryChannel>,
}

fn desk() -> Desk {
    let store = MemoryOrderStore::shared();
    let allocator = OrderNumberAllocator::new(store.clone(), 10);
    let lifecycle = Arc::new(OrderLifecycle::new(store, allocator));
    let channel = Arc::new(MemoryChannel::new());
    let gateway = Arc::new(NotificationGateway::new(channel.clone()));
    Desk {
        checkout: CheckoutFlow::new(lifecycle.clone(), gateway),
        protocol: OperatorProtocol::new(lifecycle.clone(), Some(OPERATOR.to_string())),
        lifecycle,
        channel,
    }
}

fn request(tx: &str) -> CheckoutRequest {
    CheckoutRequest {
        product_name: "Mechanical keyboard".into(),
        quantity: 2,
        payment_info: "USDT (TRC20)".into(),
        transaction_id: Some(tx.to_string()),
        note: None,
    }
}

async fn notifications(channel: &MemoryChannel, at_least: usize) -> Vec<OutboundMessage> {
    for _ in 0..100 {
        let sent = channel.sent().await;
        if sent.len() >= at_least {
            return sent;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    channel.sent().await
}

#[tokio::test]
async fn customer_question_and_operator_reply() {
    let desk = desk();
    let order = desk.checkout.place_order(request(&"a".repeat(64))).await.unwrap();
    assert_eq!(order.status, OrderStatus::Pending);
    assert!(!order.is_archived);

    let order = desk
        .checkout
        .add_customer_message(order.id, "where is my item?")
        .await
        .unwrap();
    assert!(order.has_unread_user_message);
    assert_eq!(order.messages.len(), 1);

    let reply = desk
        .protocol
        .handle_text(OPERATOR, &format!("/yanitla {} shipped", order.order_number))
        .await
        .unwrap();
    assert!(reply.text.contains("Message sent"));

    let stored = desk.lifecycle.find(&order.order_number).await.unwrap().unwrap();
    assert_eq!(stored.messages.len(), 2);
    assert_eq!(stored.messages[1].sender, Sender::Operator);
    assert_eq!(stored.messages[1].text, "shipped");
    assert!(!stored.has_unread_user_message);
}

#[tokio::test]
async fn invalid_transaction_id_persists_nothing() {
    let desk = desk();
    let err = desk.checkout.place_order(request("not-a-hash")).await.unwrap_err();
    assert!(matches!(
        err,
        DeskError::Validation(ValidationError::InvalidTransactionId)
    ));
    assert_eq!(desk.lifecycle.count(&Default::default()).await.unwrap(), 0);
    assert!(desk.channel.sent().await.is_empty());
}

#[tokio::test]
async fn viewing_unknown_order_reports_not_found() {
    let desk = desk();
    let reply = desk
        .protocol
        .handle_text(OPERATOR, "/goruntule EM-DEADBEEF")
        .await
        .unwrap();
    assert!(reply.text.contains("not found"));
    assert_eq!(desk.lifecycle.count(&Default::default()).await.unwrap(), 0);
}

#[tokio::test]
async fn command_does_not_consume_armed_reply() {
    let desk = desk();
    let order = desk.checkout.place_order(request(&"c".repeat(64))).await.unwrap();
    desk.protocol
        .handle_callback(OPERATOR, &CallbackAction::ReplyInit.payload(&order.order_number))
        .await;

    let listing = desk
        .protocol
        .handle_text(OPERATOR, "/bekleyenler")
        .await
        .unwrap();
    assert!(listing.text.contains(order.order_number.as_str()));
    assert_eq!(
        desk.protocol.intents().peek(OPERATOR).await,
        Some(order.order_number.clone())
    );

    desk.protocol.handle_text(OPERATOR, "packed today").await.unwrap();
    assert!(desk.protocol.intents().peek(OPERATOR).await.is_none());
    let stored = desk.lifecycle.find(&order.order_number).await.unwrap().unwrap();
    assert_eq!(stored.messages.last().unwrap().text, "packed today");
}

#[tokio::test]
async fn notification_buttons_drive_the_protocol() {
    let desk = desk();
    let order = desk.checkout.place_order(request(&"d".repeat(64))).await.unwrap();
    desk.checkout
        .add_customer_message(order.id, "is it paid?")
        .await
        .unwrap();

    let sent = notifications(&desk.channel, 2).await;
    assert_eq!(sent.len(), 2);
    let customer_note = sent
        .iter()
        .find(|m| m.text.contains("is it paid?"))
        .unwrap();
    assert!(customer_note
        .payloads()
        .contains(&CallbackAction::ReplyInit.payload(&order.order_number).as_str()));
    let confirm = customer_note
        .payloads()
        .into_iter()
        .find(|p| p.starts_with("confirm:"))
        .unwrap()
        .to_string();

    let outcome = desk.protocol.handle_callback(OPERATOR, &confirm).await;
    assert!(outcome.toast.is_some());
    let stored = desk.lifecycle.find(&order.order_number).await.unwrap().unwrap();
    assert_eq!(stored.status, OrderStatus::Completed);
    // 状态变更不影响未读标记
    assert!(stored.has_unread_user_message);
}

#[tokio::test]
async fn concurrent_appends_keep_every_message() {
    let desk = desk();
    let order = desk.checkout.place_order(request(&"e".repeat(64))).await.unwrap();
    let number: OrderNumber = order.order_number.clone();

    let mut handles = Vec::new();
    for i in 0..10 {
        let lifecycle = desk.lifecycle.clone();
        let number = number.clone();
        handles.push(tokio::spawn(async move {
            let sender = if i % 2 == 0 {
                Sender::Customer
            } else {
                Sender::Operator
            };
            lifecycle
                .append_message(&number, sender, &format!("m{}", i))
                .await
                .unwrap();
        }));
    }
    for h in handles {
        h.await.unwrap();
    }

    let stored = desk.lifecycle.find(&number).await.unwrap().unwrap();
    assert_eq!(stored.messages.len(), 10);
}

#[tokio::test]
async fn unauthorized_operator_changes_nothing() {
    let desk = desk();
    let order = desk.checkout.place_order(request(&"f".repeat(64))).await.unwrap();
    let cancel = CallbackAction::Cancel.payload(&order.order_number);

    let outcome = desk.protocol.handle_callback("intruder", &cancel).await;
    assert!(outcome.toast.is_none());
    assert!(outcome.reply.is_none());
    assert!(desk
        .protocol
        .handle_text("intruder", &format!("/arsivle {}", order.order_number))
        .await
        .is_none());

    let stored = desk.lifecycle.find(&order.order_number).await.unwrap().unwrap();
    assert_eq!(stored.status, OrderStatus::Pending);
    assert!(!stored.is_archived);
}
