//! 回复意图槽
//!
//! 操作员身份 → 待回复订单号。有界、仅存于进程内：重启后丢失进行中的回复意图。
//! 读后写（consume）在同一把锁内完成。

use std::collections::HashMap;

use tokio::sync::Mutex;

use crate::order::OrderNumber;

pub struct ReplyIntents {
    slots: Mutex<HashMap<String, OrderNumber>>,
    capacity: usize,
}

impl ReplyIntents {
    /// `capacity` 为可同时持有意图的操作员数量（单操作员部署时为 1）
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    /// 设置回复目标，返回被覆盖的旧目标
    pub async fn arm(&self, operator: &str, order_number: OrderNumber) -> Option<OrderNumber> {
        let mut slots = self.slots.lock().await;
        if !slots.contains_key(operator) && slots.len() >= self.capacity {
            if let Some(evicted) = slots.keys().next().cloned() {
                tracing::warn!("Reply intent capacity reached, dropping intent of {}", evicted);
                slots.remove(&evicted);
            }
        }
        slots.insert(operator.to_string(), order_number)
    }

    /// 取出并清除回复目标
    pub async fn consume(&self, operator: &str) -> Option<OrderNumber> {
        self.slots.lock().await.remove(operator)
    }

    /// 清除回复目标，返回是否存在
    pub async fn clear(&self, operator: &str) -> bool {
        self.slots.lock().await.remove(operator).is_some()
    }

    pub async fn peek(&self, operator: &str) -> Option<OrderNumber> {
        self.slots.lock().await.get(operator).cloned()
    }
}

impl Default for ReplyIntents {
    fn default() -> Self {
        Self::new(1)
    }
}
