//! 订单台错误类型
//!
//! 所有面向用户（操作员 / 顾客）的文案只由错误种类生成，不拼接内部错误文本。

use thiserror::Error;

use crate::order::StoreError;

/// 输入格式错误：空文本、TxID 格式、数量、状态值、订单号
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("message text is empty")]
    EmptyText,

    #[error("transaction id does not match the expected hash format")]
    InvalidTransactionId,

    #[error("quantity must be greater than zero")]
    NonPositiveQuantity,

    #[error("invalid status value: {0}")]
    InvalidStatus(String),

    #[error("invalid order number: {0}")]
    InvalidOrderNumber(String),

    #[error("missing required field: {0}")]
    MissingField(&'static str),
}

/// 订单生命周期操作可能返回的错误
#[derive(Error, Debug)]
pub enum DeskError {
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// 选择器没有命中订单（delete-archived 时也涵盖「存在但未归档」）
    #[error("order not found: {0}")]
    NotFound(String),

    #[error("order number allocation exhausted after {0} attempts")]
    AllocationExhausted(u32),

    /// 非授权身份发起的操作员动作；调用方应静默处理
    #[error("unauthorized actor: {0}")]
    Unauthorized(String),

    #[error("store error: {0}")]
    Store(String),
}

impl From<StoreError> for DeskError {
    fn from(err: StoreError) -> Self {
        DeskError::Store(err.to_string())
    }
}

impl DeskError {
    /// 生成可直接展示给操作员 / 顾客的说明文字
    pub fn user_message(&self) -> String {
        match self {
            DeskError::Validation(v) => match v {
                ValidationError::EmptyText => "Message cannot be empty.".to_string(),
                ValidationError::InvalidTransactionId => {
                    "Invalid transaction ID format.".to_string()
                }
                ValidationError::NonPositiveQuantity => {
                    "Quantity must be greater than zero.".to_string()
                }
                ValidationError::InvalidStatus(_) => "Invalid status value.".to_string(),
                ValidationError::InvalidOrderNumber(_) => {
                    "Invalid order number format.".to_string()
                }
                ValidationError::MissingField(field) => {
                    format!("Missing required field: {}.", field)
                }
            },
            DeskError::NotFound(target) => format!("Order {} was not found.", target),
            DeskError::AllocationExhausted(_) => {
                "Could not allocate an order number. Please try again.".to_string()
            }
            DeskError::Unauthorized(_) => "Not authorized.".to_string(),
            DeskError::Store(_) => "A storage error occurred. Please try again.".to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, DeskError::NotFound(_))
    }
}
