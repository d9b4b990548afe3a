//! 顾客侧流程：下单、查单、给订单留言
//!
//! 修改先落库，再通过通知网关旁路推送给操作员。

use std::sync::Arc;

use serde::Deserialize;

use crate::core::{DeskError, ValidationError};
use crate::notify::NotificationGateway;
use crate::order::{NewOrder, Order, OrderId, OrderLifecycle, OrderNumber, Sender};

/// 结账请求体
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutRequest {
    pub product_name: String,
    pub quantity: i64,
    pub payment_info: String,
    #[serde(default)]
    pub transaction_id: Option<String>,
    #[serde(default)]
    pub note: Option<String>,
}

pub struct CheckoutFlow {
    lifecycle: Arc<OrderLifecycle>,
    notifier: Arc<NotificationGateway>,
}

impl CheckoutFlow {
    pub fn new(lifecycle: Arc<OrderLifecycle>, notifier: Arc<NotificationGateway>) -> Self {
        Self {
            lifecycle,
            notifier,
        }
    }

    /// 下单：TxID 必填（去除首尾空白后校验格式）；成功后推送新订单通知
    pub async fn place_order(&self, req: CheckoutRequest) -> Result<Order, DeskError> {
        let transaction_id = req
            .transaction_id
            .as_deref()
            .map(str::trim)
            .filter(|tx| !tx.is_empty())
            .ok_or(ValidationError::MissingField("transactionId"))?
            .to_string();

        let order = self
            .lifecycle
            .create(NewOrder {
                product_name: req.product_name.trim().to_string(),
                quantity: req.quantity,
                payment_info: req.payment_info.trim().to_string(),
                transaction_id: Some(transaction_id),
                customer_note: req.note,
            })
            .await?;

        self.notifier.notify_new_order(&order);
        Ok(order)
    }

    /// 查单：必须是 `EM-` 前缀的订单号（大小写不敏感）
    pub async fn track(&self, raw_number: &str) -> Result<Order, DeskError> {
        let number = OrderNumber::parse(raw_number)?;
        self.lifecycle
            .find(&number)
            .await?
            .ok_or_else(|| DeskError::NotFound(number.to_string()))
    }

    /// 顾客留言：按订单 id 追加，置未读并通知操作员
    pub async fn add_customer_message(&self, id: OrderId, text: &str) -> Result<Order, DeskError> {
        let order = self
            .lifecycle
            .append_message(id, Sender::Customer, text)
            .await?;
        self.notifier
            .notify_new_customer_message(&order, text.trim());
        Ok(order)
    }
}
