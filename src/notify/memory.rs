//! 内存通知频道（用于测试，无需 Bot Token）
//!
//! 记录所有发出的消息；`failing()` 构造的频道每次发送都返回传输错误。

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{NotificationChannel, NotifyError, OutboundMessage};

#[derive(Debug, Default)]
pub struct MemoryChannel {
    sent: Mutex<Vec<OutboundMessage>>,
    fail: bool,
}

impl MemoryChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub async fn sent(&self) -> Vec<OutboundMessage> {
        self.sent.lock().await.clone()
    }
}

#[async_trait]
impl NotificationChannel for MemoryChannel {
    async fn send(&self, message: OutboundMessage) -> Result<(), NotifyError> {
        if self.fail {
            return Err(NotifyError::Transport("memory channel set to fail".into()));
        }
        self.sent.lock().await.push(message);
        Ok(())
    }
}
