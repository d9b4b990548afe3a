//! 订单号分配器
//!
//! 4 个随机字节 → `EM-` + 8 位大写十六进制；先查重，冲突时重新抽取。
//! 预检查并非原子，最终唯一性由存储层写入时的唯一约束保证（见 `OrderLifecycle::create`）。

use std::future::Future;
use std::sync::Arc;

use rand::RngCore;

use super::model::OrderNumber;
use super::store::OrderStore;
use crate::core::DeskError;

/// 默认最大尝试次数
pub const DEFAULT_MAX_ATTEMPTS: u32 = 10;

type ByteSource = Box<dyn Fn() -> [u8; 4] + Send + Sync>;

fn random_bytes() -> [u8; 4] {
    let mut bytes = [0u8; 4];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes
}

pub struct OrderNumberAllocator {
    store: Arc<dyn OrderStore>,
    max_attempts: u32,
    source: ByteSource,
}

impl OrderNumberAllocator {
    pub fn new(store: Arc<dyn OrderStore>, max_attempts: u32) -> Self {
        Self {
            store,
            max_attempts: max_attempts.max(1),
            source: Box::new(random_bytes),
        }
    }

    /// 替换随机源（测试中用于构造冲突）
    pub fn with_source<F>(mut self, source: F) -> Self
    where
        F: Fn() -> [u8; 4] + Send + Sync + 'static,
    {
        self.source = Box::new(source);
        self
    }

    /// 抽取一个当前未被占用的订单号
    pub async fn allocate(&self) -> Result<OrderNumber, DeskError> {
        self.allocate_with(|candidate| async move { Ok(Some(candidate)) })
            .await
    }

    /// 抽号并交给 `claim` 落库，预检查冲突与写入冲突共用同一个尝试次数；
    /// `claim` 返回 `Ok(None)` 表示写入时发现号码已被占用
    pub async fn allocate_with<T, F, Fut>(&self, mut claim: F) -> Result<T, DeskError>
    where
        F: FnMut(OrderNumber) -> Fut,
        Fut: Future<Output = Result<Option<T>, DeskError>>,
    {
        for attempt in 1..=self.max_attempts {
            let candidate = OrderNumber::from_bytes((self.source)());
            if self.store.find_by_number(&candidate).await?.is_some() {
                tracing::warn!(
                    "Order number collision on {} (attempt {}/{})",
                    candidate,
                    attempt,
                    self.max_attempts
                );
                continue;
            }
            let number = candidate.clone();
            if let Some(claimed) = claim(candidate).await? {
                return Ok(claimed);
            }
            tracing::warn!(
                "Order number {} taken at write time (attempt {}/{})",
                number,
                attempt,
                self.max_attempts
            );
        }
        Err(DeskError::AllocationExhausted(self.max_attempts))
    }
}
