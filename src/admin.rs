//! 管理面板操作（按订单 id）
//!
//! 登录鉴权不在这里处理，由前置代理负责。

use std::sync::Arc;

use crate::core::DeskError;
use crate::order::{
    Order, OrderFilter, OrderId, OrderLifecycle, OrderSort, OrderStatus, Sender,
};

pub struct AdminDesk {
    lifecycle: Arc<OrderLifecycle>,
}

impl AdminDesk {
    pub fn new(lifecycle: Arc<OrderLifecycle>) -> Self {
        Self { lifecycle }
    }

    /// 看板：全部订单，未读在前，其次按创建时间倒序
    pub async fn dashboard(&self, filter: &OrderFilter) -> Result<Vec<Order>, DeskError> {
        self.lifecycle.list(filter, OrderSort::UnreadFirst).await
    }

    /// 状态字符串接受英文名与旧面板的土耳其语取值
    pub async fn update_status(&self, id: OrderId, raw_status: &str) -> Result<Order, DeskError> {
        let status: OrderStatus = raw_status.parse()?;
        self.lifecycle.transition_status(id, status).await
    }

    pub async fn send_operator_message(&self, id: OrderId, text: &str) -> Result<Order, DeskError> {
        self.lifecycle.append_message(id, Sender::Operator, text).await
    }

    pub async fn archive(&self, id: OrderId) -> Result<Order, DeskError> {
        self.lifecycle.set_archived(id, true).await
    }

    pub async fn delete_archived(&self, id: OrderId) -> Result<Order, DeskError> {
        self.lifecycle.delete_archived(id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ValidationError;
    use crate::order::{MemoryOrderStore, NewOrder, OrderNumberAllocator};

    async fn desk_with_order() -> (AdminDesk, Arc<OrderLifecycle>, Order) {
        let store = MemoryOrderStore::shared();
        let allocator = OrderNumberAllocator::new(store.clone(), 10);
        let lifecycle = Arc::new(OrderLifecycle::new(store, allocator));
        let order = lifecycle
            .create(NewOrder {
                product_name: "Lamp".into(),
                quantity: 1,
                payment_info: "BTC".into(),
                ..Default::default()
            })
            .await
            .unwrap();
        (AdminDesk::new(lifecycle.clone()), lifecycle, order)
    }

    #[tokio::test]
    async fn test_update_status_accepts_legacy_labels() {
        let (desk, _, order) = desk_with_order().await;
        let updated = desk.update_status(order.id, "Tamamlandı").await.unwrap();
        assert_eq!(updated.status, OrderStatus::Completed);
        let updated = desk.update_status(order.id, "pending").await.unwrap();
        assert_eq!(updated.status, OrderStatus::Pending);

        let err = desk.update_status(order.id, "shipped").await.unwrap_err();
        assert!(matches!(
            err,
            DeskError::Validation(ValidationError::InvalidStatus(_))
        ));
    }

    #[tokio::test]
    async fn test_operator_message_clears_unread() {
        let (desk, lifecycle, order) = desk_with_order().await;
        lifecycle
            .append_message(order.id, Sender::Customer, "hi")
            .await
            .unwrap();
        let updated = desk.send_operator_message(order.id, "hello").await.unwrap();
        assert!(!updated.has_unread_user_message);
        assert_eq!(updated.messages.len(), 2);
    }

    #[tokio::test]
    async fn test_archive_then_delete() {
        let (desk, lifecycle, order) = desk_with_order().await;
        assert!(desk.delete_archived(order.id).await.unwrap_err().is_not_found());
        desk.archive(order.id).await.unwrap();
        desk.delete_archived(order.id).await.unwrap();
        assert!(lifecycle.get(order.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_dashboard_puts_unread_first() {
        let (desk, lifecycle, first) = desk_with_order().await;
        let second = lifecycle
            .create(NewOrder {
                product_name: "Desk".into(),
                quantity: 1,
                payment_info: "BTC".into(),
                ..Default::default()
            })
            .await
            .unwrap();
        lifecycle
            .append_message(first.id, Sender::Customer, "ping")
            .await
            .unwrap();

        let orders = desk.dashboard(&OrderFilter::default()).await.unwrap();
        assert_eq!(orders[0].id, first.id);
        assert_eq!(orders[1].id, second.id);
    }
}
