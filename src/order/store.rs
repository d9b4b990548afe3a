//! 订单存储抽象层
//!
//! 定义统一的订单存储接口，支持内存和 SQLite 两种实现。
//! 每个方法都是针对单条记录的一次原子读改写（或条件更新），
//! 调用方不得「读出整条 → 改数组 → 整条写回」。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::RwLock;

use super::model::{Message, Order, OrderId, OrderNumber, OrderRef, OrderStatus, Sender};

/// 存储层错误
#[derive(Error, Debug)]
pub enum StoreError {
    /// 写入时订单号唯一约束冲突（分配器应视为「重试」）
    #[error("duplicate order number: {0}")]
    DuplicateNumber(String),

    #[error("store operation timed out")]
    Timeout,

    #[error("store backend error: {0}")]
    Backend(String),
}

/// 选择器：订单号或 ID，可附加 `is_archived` 等值条件
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selector {
    pub target: OrderRef,
    pub require_archived: Option<bool>,
}

impl Selector {
    pub fn new(target: impl Into<OrderRef>) -> Self {
        Self {
            target: target.into(),
            require_archived: None,
        }
    }

    /// 仅当 `is_archived == archived` 时命中
    pub fn archived(mut self, archived: bool) -> Self {
        self.require_archived = Some(archived);
        self
    }

    /// 目标已解析后的附加条件检查
    pub fn predicate_holds(&self, order: &Order) -> bool {
        self.require_archived
            .map_or(true, |archived| order.is_archived == archived)
    }
}

/// 字段级更新；`None` 表示保持不变
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldUpdate {
    pub status: Option<OrderStatus>,
    pub is_archived: Option<bool>,
}

impl FieldUpdate {
    pub fn status(status: OrderStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn archived(archived: bool) -> Self {
        Self {
            is_archived: Some(archived),
            ..Default::default()
        }
    }

    pub fn apply(&self, order: &mut Order) {
        if let Some(status) = self.status {
            order.status = status;
        }
        if let Some(archived) = self.is_archived {
            order.is_archived = archived;
        }
    }
}

/// 列表过滤条件
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrderFilter {
    pub status: Option<OrderStatus>,
    pub archived: Option<bool>,
    pub unread: Option<bool>,
    /// 在订单号 / 商品名中做大小写不敏感的子串搜索
    pub search: Option<String>,
    pub limit: Option<usize>,
}

impl OrderFilter {
    pub fn matches(&self, order: &Order) -> bool {
        if let Some(status) = self.status {
            if order.status != status {
                return false;
            }
        }
        if let Some(archived) = self.archived {
            if order.is_archived != archived {
                return false;
            }
        }
        if let Some(unread) = self.unread {
            if order.has_unread_user_message != unread {
                return false;
            }
        }
        if let Some(ref needle) = self.search {
            let needle = needle.to_lowercase();
            let hit = order.order_number.as_str().to_lowercase().contains(&needle)
                || order.product_name.to_lowercase().contains(&needle);
            if !hit {
                return false;
            }
        }
        true
    }
}

/// 列表排序
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OrderSort {
    /// 有未读顾客消息的在前，其次按创建时间倒序（看板视图）
    #[default]
    UnreadFirst,
    /// 仅按创建时间倒序
    Newest,
}

/// 按排序规则原地排序
pub fn sort_orders(orders: &mut [Order], sort: OrderSort) {
    match sort {
        OrderSort::UnreadFirst => orders.sort_by(|a, b| {
            b.has_unread_user_message
                .cmp(&a.has_unread_user_message)
                .then_with(|| b.created_at.cmp(&a.created_at))
        }),
        OrderSort::Newest => orders.sort_by(|a, b| b.created_at.cmp(&a.created_at)),
    }
}

/// 订单存储接口
#[async_trait]
pub trait OrderStore: Send + Sync {
    async fn find_by_number(&self, number: &OrderNumber) -> Result<Option<Order>, StoreError>;

    async fn find_by_id(&self, id: OrderId) -> Result<Option<Order>, StoreError>;

    /// 写入新订单；订单号已存在时返回 `DuplicateNumber`
    async fn insert(&self, order: Order) -> Result<Order, StoreError>;

    /// 条件更新字段，返回更新后的订单；未命中返回 `None`
    async fn update_fields(
        &self,
        selector: &Selector,
        fields: FieldUpdate,
    ) -> Result<Option<Order>, StoreError>;

    /// 条件删除，返回被删除的订单；未命中返回 `None`
    async fn delete_matching(&self, selector: &Selector) -> Result<Option<Order>, StoreError>;

    /// 追加一条消息并同时设置未读标记（单次原子操作）
    async fn append_to_thread(
        &self,
        selector: &Selector,
        message: Message,
        has_unread_user_message: bool,
    ) -> Result<Option<Order>, StoreError>;

    async fn list(&self, filter: &OrderFilter, sort: OrderSort) -> Result<Vec<Order>, StoreError>;

    async fn count_matching(&self, filter: &OrderFilter) -> Result<usize, StoreError>;
}

#[derive(Default)]
struct MemoryInner {
    orders: HashMap<OrderId, Order>,
    by_number: HashMap<OrderNumber, OrderId>,
}

impl MemoryInner {
    fn resolve(&self, selector: &Selector) -> Option<OrderId> {
        let id = match &selector.target {
            OrderRef::Id(id) => *id,
            OrderRef::Number(number) => *self.by_number.get(number)?,
        };
        let order = self.orders.get(&id)?;
        selector.predicate_holds(order).then_some(id)
    }
}

/// 内存订单存储：每个操作只持有一次写锁，读改写在锁内完成
#[derive(Default)]
pub struct MemoryOrderStore {
    inner: RwLock<MemoryInner>,
}

impl MemoryOrderStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> Arc<dyn OrderStore> {
        Arc::new(Self::new())
    }
}

#[async_trait]
impl OrderStore for MemoryOrderStore {
    async fn find_by_number(&self, number: &OrderNumber) -> Result<Option<Order>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .by_number
            .get(number)
            .and_then(|id| inner.orders.get(id))
            .cloned())
    }

    async fn find_by_id(&self, id: OrderId) -> Result<Option<Order>, StoreError> {
        Ok(self.inner.read().await.orders.get(&id).cloned())
    }

    async fn insert(&self, order: Order) -> Result<Order, StoreError> {
        let mut inner = self.inner.write().await;
        if inner.by_number.contains_key(&order.order_number) {
            return Err(StoreError::DuplicateNumber(order.order_number.to_string()));
        }
        inner.by_number.insert(order.order_number.clone(), order.id);
        inner.orders.insert(order.id, order.clone());
        Ok(order)
    }

    async fn update_fields(
        &self,
        selector: &Selector,
        fields: FieldUpdate,
    ) -> Result<Option<Order>, StoreError> {
        let mut inner = self.inner.write().await;
        let Some(id) = inner.resolve(selector) else {
            return Ok(None);
        };
        Ok(inner.orders.get_mut(&id).map(|order| {
            fields.apply(order);
            order.clone()
        }))
    }

    async fn delete_matching(&self, selector: &Selector) -> Result<Option<Order>, StoreError> {
        let mut inner = self.inner.write().await;
        let Some(id) = inner.resolve(selector) else {
            return Ok(None);
        };
        let removed = inner.orders.remove(&id);
        if let Some(ref order) = removed {
            inner.by_number.remove(&order.order_number);
        }
        Ok(removed)
    }

    async fn append_to_thread(
        &self,
        selector: &Selector,
        message: Message,
        has_unread_user_message: bool,
    ) -> Result<Option<Order>, StoreError> {
        let mut inner = self.inner.write().await;
        let Some(id) = inner.resolve(selector) else {
            return Ok(None);
        };
        Ok(inner.orders.get_mut(&id).map(|order| {
            order.messages.push(message);
            order.has_unread_user_message = has_unread_user_message;
            order.clone()
        }))
    }

    async fn list(&self, filter: &OrderFilter, sort: OrderSort) -> Result<Vec<Order>, StoreError> {
        let inner = self.inner.read().await;
        let mut orders: Vec<Order> = inner
            .orders
            .values()
            .filter(|o| filter.matches(o))
            .cloned()
            .collect();
        sort_orders(&mut orders, sort);
        if let Some(limit) = filter.limit {
            orders.truncate(limit);
        }
        Ok(orders)
    }

    async fn count_matching(&self, filter: &OrderFilter) -> Result<usize, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner.orders.values().filter(|o| filter.matches(o)).count())
    }
}

/// 消息发送方是否应置未读标记：顾客消息置位，操作员消息清除
pub fn unread_after_append(sender: Sender) -> bool {
    sender == Sender::Customer
}
