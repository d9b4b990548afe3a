//! 订单生命周期：创建、状态流转、归档、删除已归档、消息追加、查询
//!
//! 每个修改操作都映射为存储层的一次原子更新；存储调用统一加超时。

use std::future::Future;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use chrono::Utc;
use regex::Regex;

use super::model::{Message, Order, OrderId, OrderNumber, OrderRef, OrderStatus, Sender};
use super::number::OrderNumberAllocator;
use super::store::{
    unread_after_append, FieldUpdate, OrderFilter, OrderSort, OrderStore, Selector, StoreError,
};
use crate::core::{DeskError, ValidationError};

static TX_ID_RE: OnceLock<Regex> = OnceLock::new();

/// TxID 格式：`0x` + 64 位十六进制，或 64 位十六进制
pub fn validate_transaction_id(tx: &str) -> Result<(), ValidationError> {
    let re = TX_ID_RE
        .get_or_init(|| Regex::new(r"^(0x[0-9a-fA-F]{64}|[0-9a-fA-F]{64})$").expect("static regex"));
    if re.is_match(tx) {
        Ok(())
    } else {
        Err(ValidationError::InvalidTransactionId)
    }
}

/// 新订单输入
#[derive(Debug, Clone, Default)]
pub struct NewOrder {
    pub product_name: String,
    pub quantity: i64,
    pub payment_info: String,
    pub transaction_id: Option<String>,
    pub customer_note: Option<String>,
}

pub struct OrderLifecycle {
    store: Arc<dyn OrderStore>,
    allocator: OrderNumberAllocator,
    store_timeout: Duration,
}

impl OrderLifecycle {
    pub fn new(store: Arc<dyn OrderStore>, allocator: OrderNumberAllocator) -> Self {
        Self {
            store,
            allocator,
            store_timeout: Duration::from_secs(5),
        }
    }

    pub fn with_store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = timeout;
        self
    }

    async fn timed<T, F>(&self, fut: F) -> Result<T, StoreError>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        tokio::time::timeout(self.store_timeout, fut)
            .await
            .unwrap_or(Err(StoreError::Timeout))
    }

    async fn guarded<T, F>(&self, fut: F) -> Result<T, DeskError>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        self.timed(fut).await.map_err(|e| {
            tracing::error!("Order store error: {}", e);
            DeskError::from(e)
        })
    }

    /// 校验并创建订单；非空备注作为第一条顾客消息写入并置未读
    pub async fn create(&self, input: NewOrder) -> Result<Order, DeskError> {
        if input.product_name.trim().is_empty() {
            return Err(ValidationError::MissingField("productName").into());
        }
        if input.payment_info.trim().is_empty() {
            return Err(ValidationError::MissingField("paymentInfo").into());
        }
        if input.quantity <= 0 {
            return Err(ValidationError::NonPositiveQuantity.into());
        }
        let quantity =
            u32::try_from(input.quantity).map_err(|_| ValidationError::NonPositiveQuantity)?;
        if let Some(ref tx) = input.transaction_id {
            validate_transaction_id(tx)?;
        }

        let messages: Vec<Message> = input
            .customer_note
            .as_deref()
            .map(str::trim)
            .filter(|note| !note.is_empty())
            .map(|note| vec![Message::customer(note)])
            .unwrap_or_default();
        let has_unread = !messages.is_empty();

        let saved = self
            .allocator
            .allocate_with(|order_number| {
                let order = Order {
                    id: OrderId::new(),
                    order_number,
                    product_name: input.product_name.clone(),
                    quantity,
                    payment_info: input.payment_info.clone(),
                    transaction_id: input.transaction_id.clone(),
                    status: OrderStatus::Pending,
                    is_archived: false,
                    has_unread_user_message: has_unread,
                    messages: messages.clone(),
                    created_at: Utc::now(),
                };
                async move {
                    match self.timed(self.store.insert(order)).await {
                        Ok(saved) => Ok(Some(saved)),
                        Err(StoreError::DuplicateNumber(_)) => Ok(None),
                        Err(e) => {
                            tracing::error!("Order store error: {}", e);
                            Err(DeskError::from(e))
                        }
                    }
                }
            })
            .await?;
        tracing::info!("Order created: {}", saved.order_number);
        Ok(saved)
    }

    /// 状态可在三种取值之间任意切换
    pub async fn transition_status(
        &self,
        target: impl Into<OrderRef>,
        status: OrderStatus,
    ) -> Result<Order, DeskError> {
        let target = target.into();
        let updated = self
            .guarded(
                self.store
                    .update_fields(&Selector::new(target.clone()), FieldUpdate::status(status)),
            )
            .await?
            .ok_or_else(|| DeskError::NotFound(target.to_string()))?;
        tracing::info!("Order {} status -> {}", updated.order_number, status);
        Ok(updated)
    }

    /// 幂等：重复设置同一值也返回成功
    pub async fn set_archived(
        &self,
        target: impl Into<OrderRef>,
        archived: bool,
    ) -> Result<Order, DeskError> {
        let target = target.into();
        let updated = self
            .guarded(
                self.store
                    .update_fields(&Selector::new(target.clone()), FieldUpdate::archived(archived)),
            )
            .await?
            .ok_or_else(|| DeskError::NotFound(target.to_string()))?;
        tracing::info!("Order {} archived={}", updated.order_number, archived);
        Ok(updated)
    }

    /// 仅删除已归档订单；存在性与归档检查在同一条件删除中完成。
    /// 「不存在」与「未归档」都返回 `NotFound`。
    pub async fn delete_archived(&self, id: OrderId) -> Result<Order, DeskError> {
        let deleted = self
            .guarded(self.store.delete_matching(&Selector::new(id).archived(true)))
            .await?
            .ok_or_else(|| DeskError::NotFound(id.to_string()))?;
        tracing::info!("Archived order {} permanently deleted", deleted.order_number);
        Ok(deleted)
    }

    /// 追加消息：顾客消息置未读，操作员消息清除未读（视为对之前所有未读的确认）
    pub async fn append_message(
        &self,
        target: impl Into<OrderRef>,
        sender: Sender,
        text: &str,
    ) -> Result<Order, DeskError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(ValidationError::EmptyText.into());
        }
        let target = target.into();
        let updated = self
            .guarded(self.store.append_to_thread(
                &Selector::new(target.clone()),
                Message::new(sender, text),
                unread_after_append(sender),
            ))
            .await?
            .ok_or_else(|| DeskError::NotFound(target.to_string()))?;
        tracing::info!(
            "Message appended to {} by {} (thread length {})",
            updated.order_number,
            sender.as_str(),
            updated.messages.len()
        );
        Ok(updated)
    }

    pub async fn find(&self, number: &OrderNumber) -> Result<Option<Order>, DeskError> {
        self.guarded(self.store.find_by_number(number)).await
    }

    pub async fn get(&self, id: OrderId) -> Result<Option<Order>, DeskError> {
        self.guarded(self.store.find_by_id(id)).await
    }

    pub async fn list(&self, filter: &OrderFilter, sort: OrderSort) -> Result<Vec<Order>, DeskError> {
        self.guarded(self.store.list(filter, sort)).await
    }

    pub async fn count(&self, filter: &OrderFilter) -> Result<usize, DeskError> {
        self.guarded(self.store.count_matching(filter)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::order::number::DEFAULT_MAX_ATTEMPTS;
    use crate::order::store::MemoryOrderStore;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn lifecycle() -> OrderLifecycle {
        let store = MemoryOrderStore::shared();
        let allocator = OrderNumberAllocator::new(Arc::clone(&store), DEFAULT_MAX_ATTEMPTS);
        OrderLifecycle::new(store, allocator)
    }

    fn input() -> NewOrder {
        NewOrder {
            product_name: "Widget".into(),
            quantity: 2,
            payment_info: "BTC".into(),
            transaction_id: Some("a".repeat(64)),
            customer_note: None,
        }
    }

    #[test]
    fn test_validate_transaction_id() {
        assert!(validate_transaction_id(&"a".repeat(64)).is_ok());
        assert!(validate_transaction_id(&format!("0x{}", "F".repeat(64))).is_ok());
        assert!(validate_transaction_id("not-a-hash").is_err());
        assert!(validate_transaction_id(&"a".repeat(63)).is_err());
        assert!(validate_transaction_id(&format!("0X{}", "a".repeat(64))).is_err());
    }

    #[tokio::test]
    async fn test_create_defaults() {
        let lc = lifecycle();
        let order = lc.create(input()).await.unwrap();
        assert!(order.order_number.is_canonical());
        assert_eq!(order.status, OrderStatus::Pending);
        assert!(!order.is_archived);
        assert!(!order.has_unread_user_message);
        assert!(order.messages.is_empty());
    }

    #[tokio::test]
    async fn test_create_with_note_seeds_thread() {
        let lc = lifecycle();
        let order = lc
            .create(NewOrder {
                customer_note: Some("  gift wrap please ".into()),
                ..input()
            })
            .await
            .unwrap();
        assert!(order.has_unread_user_message);
        assert_eq!(order.messages.len(), 1);
        assert_eq!(order.messages[0].sender, Sender::Customer);
        assert_eq!(order.messages[0].text, "gift wrap please");
    }

    #[tokio::test]
    async fn test_create_rejects_bad_input() {
        let lc = lifecycle();
        let bad_tx = lc
            .create(NewOrder {
                transaction_id: Some("not-a-hash".into()),
                ..input()
            })
            .await
            .unwrap_err();
        assert!(matches!(
            bad_tx,
            DeskError::Validation(ValidationError::InvalidTransactionId)
        ));

        let zero = lc
            .create(NewOrder {
                quantity: 0,
                ..input()
            })
            .await
            .unwrap_err();
        assert!(matches!(
            zero,
            DeskError::Validation(ValidationError::NonPositiveQuantity)
        ));

        assert_eq!(lc.count(&OrderFilter::default()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_unread_flag_cleared_by_operator() {
        let lc = lifecycle();
        let order = lc.create(input()).await.unwrap();
        for i in 0..3 {
            let o = lc
                .append_message(order.id, Sender::Customer, &format!("q{}", i))
                .await
                .unwrap();
            assert!(o.has_unread_user_message);
        }
        let o = lc
            .append_message(&order.order_number, Sender::Operator, "answer")
            .await
            .unwrap();
        assert!(!o.has_unread_user_message);
        let texts: Vec<_> = o.messages.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, vec!["q0", "q1", "q2", "answer"]);
    }

    #[tokio::test]
    async fn test_append_rejects_whitespace() {
        let lc = lifecycle();
        let order = lc.create(input()).await.unwrap();
        let err = lc
            .append_message(order.id, Sender::Customer, "   \n ")
            .await
            .unwrap_err();
        assert!(matches!(err, DeskError::Validation(ValidationError::EmptyText)));
    }

    #[tokio::test]
    async fn test_transition_is_unrestricted() {
        let lc = lifecycle();
        let order = lc.create(input()).await.unwrap();
        for from in OrderStatus::ALL {
            for to in OrderStatus::ALL {
                lc.transition_status(order.id, from).await.unwrap();
                let o = lc.transition_status(&order.order_number, to).await.unwrap();
                assert_eq!(o.status, to);
            }
        }
    }

    #[tokio::test]
    async fn test_missing_order_is_not_found() {
        let lc = lifecycle();
        let ghost = OrderNumber::parse("EM-DEADBEEF").unwrap();
        assert!(lc
            .transition_status(&ghost, OrderStatus::Completed)
            .await
            .unwrap_err()
            .is_not_found());
        assert!(lc.set_archived(&ghost, true).await.unwrap_err().is_not_found());
        assert!(lc
            .append_message(&ghost, Sender::Operator, "hi")
            .await
            .unwrap_err()
            .is_not_found());
        assert!(lc.find(&ghost).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_archive_idempotent_and_delete() {
        let lc = lifecycle();
        let order = lc.create(input()).await.unwrap();

        assert!(lc.delete_archived(order.id).await.unwrap_err().is_not_found());

        let first = lc.set_archived(order.id, true).await.unwrap();
        let second = lc.set_archived(order.id, true).await.unwrap();
        assert_eq!(first, second);

        let deleted = lc.delete_archived(order.id).await.unwrap();
        assert_eq!(deleted.id, order.id);
        assert!(lc.get(order.id).await.unwrap().is_none());
        assert!(lc.delete_archived(order.id).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_created_numbers_are_distinct() {
        let lc = lifecycle();
        let mut seen = std::collections::HashSet::new();
        for _ in 0..50 {
            let o = lc.create(input()).await.unwrap();
            assert!(seen.insert(o.order_number));
        }
    }

    /// 预检查总是放行、写入时前 `lost` 次报号码冲突的存储
    struct RacingStore {
        inner: MemoryOrderStore,
        lost: usize,
        inserts: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl OrderStore for RacingStore {
        async fn find_by_number(&self, _: &OrderNumber) -> Result<Option<Order>, StoreError> {
            Ok(None)
        }

        async fn find_by_id(&self, id: OrderId) -> Result<Option<Order>, StoreError> {
            self.inner.find_by_id(id).await
        }

        async fn insert(&self, order: Order) -> Result<Order, StoreError> {
            if self.inserts.fetch_add(1, Ordering::SeqCst) < self.lost {
                return Err(StoreError::DuplicateNumber(order.order_number.to_string()));
            }
            self.inner.insert(order).await
        }

        async fn update_fields(
            &self,
            selector: &Selector,
            fields: FieldUpdate,
        ) -> Result<Option<Order>, StoreError> {
            self.inner.update_fields(selector, fields).await
        }

        async fn delete_matching(&self, selector: &Selector) -> Result<Option<Order>, StoreError> {
            self.inner.delete_matching(selector).await
        }

        async fn append_to_thread(
            &self,
            selector: &Selector,
            message: Message,
            has_unread_user_message: bool,
        ) -> Result<Option<Order>, StoreError> {
            self.inner
                .append_to_thread(selector, message, has_unread_user_message)
                .await
        }

        async fn list(&self, filter: &OrderFilter, sort: OrderSort) -> Result<Vec<Order>, StoreError> {
            self.inner.list(filter, sort).await
        }

        async fn count_matching(&self, filter: &OrderFilter) -> Result<usize, StoreError> {
            self.inner.count_matching(filter).await
        }
    }

    fn racing(lost: usize, budget: u32) -> (OrderLifecycle, Arc<RacingStore>, Arc<AtomicUsize>) {
        let store = Arc::new(RacingStore {
            inner: MemoryOrderStore::new(),
            lost,
            inserts: AtomicUsize::new(0),
        });
        let draws = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&draws);
        let allocator = OrderNumberAllocator::new(store.clone(), budget).with_source(move || {
            (counter.fetch_add(1, Ordering::SeqCst) as u32).to_be_bytes()
        });
        (OrderLifecycle::new(store.clone(), allocator), store, draws)
    }

    #[tokio::test]
    async fn test_write_time_duplicate_is_retried() {
        let (lc, store, draws) = racing(2, 5);
        let order = lc.create(input()).await.unwrap();

        assert_eq!(store.inserts.load(Ordering::SeqCst), 3);
        assert_eq!(draws.load(Ordering::SeqCst), 3);
        assert_eq!(order.order_number.as_str(), "EM-00000002");
        assert_eq!(lc.count(&OrderFilter::default()).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_write_time_duplicates_exhaust_budget() {
        let (lc, store, draws) = racing(3, 3);
        let err = lc.create(input()).await.unwrap_err();

        assert!(matches!(err, DeskError::AllocationExhausted(3)));
        // 预检查与写入共用一个预算
        assert_eq!(draws.load(Ordering::SeqCst), 3);
        assert_eq!(store.inserts.load(Ordering::SeqCst), 3);
        assert_eq!(lc.count(&OrderFilter::default()).await.unwrap(), 0);
    }
}
