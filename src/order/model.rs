//! 订单聚合：Order、消息线程、状态、订单号
//!
//! Order 是唯一的聚合根；Message 嵌入其中，没有独立身份。
//! 商品名 / 数量 / 支付方式是下单时的快照，不随商品目录变化。

use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::ValidationError;

/// 订单号前缀
pub const ORDER_NUMBER_PREFIX: &str = "EM-";

static LOOKUP_RE: OnceLock<Regex> = OnceLock::new();
static CANONICAL_RE: OnceLock<Regex> = OnceLock::new();

fn lookup_re() -> &'static Regex {
    LOOKUP_RE.get_or_init(|| Regex::new(r"^(?i)EM-[A-Z0-9]+$").expect("static regex"))
}

fn canonical_re() -> &'static Regex {
    CANONICAL_RE.get_or_init(|| Regex::new(r"^EM-[0-9A-F]{8}$").expect("static regex"))
}

/// 对外订单号，如 `EM-1A2B3C4D`
///
/// 解析时大小写不敏感、统一转大写；分配器生成的订单号总是 8 位大写十六进制。
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderNumber(String);

impl OrderNumber {
    /// 解析操作员 / 顾客输入的订单号（`EM-[A-Z0-9]+`，大小写不敏感）
    pub fn parse(raw: &str) -> Result<Self, ValidationError> {
        let trimmed = raw.trim();
        if !lookup_re().is_match(trimmed) {
            return Err(ValidationError::InvalidOrderNumber(trimmed.to_string()));
        }
        Ok(Self(trimmed.to_uppercase()))
    }

    /// 由 4 个随机字节生成规范订单号
    pub fn from_bytes(bytes: [u8; 4]) -> Self {
        let hex: String = bytes.iter().map(|b| format!("{:02X}", b)).collect();
        Self(format!("{}{}", ORDER_NUMBER_PREFIX, hex))
    }

    /// 是否为持久化格式：`EM-` + 8 位大写十六进制
    pub fn is_canonical(&self) -> bool {
        canonical_re().is_match(&self.0)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OrderNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// 内部订单 ID（UI / 管理端在已解析订单后做定向修改时使用）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderId(Uuid);

impl OrderId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for OrderId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for OrderId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim())
            .map(Self)
            .map_err(|_| ValidationError::InvalidOrderNumber(s.trim().to_string()))
    }
}

/// 订单状态；任意状态之间都可以互相转换（用于人工更正）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderStatus {
    Pending,
    Completed,
    Cancelled,
}

impl OrderStatus {
    pub const ALL: [OrderStatus; 3] = [
        OrderStatus::Pending,
        OrderStatus::Completed,
        OrderStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "Pending",
            OrderStatus::Completed => "Completed",
            OrderStatus::Cancelled => "Cancelled",
        }
    }

    /// 面向操作员的显示文案
    pub fn label(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "Pending",
            OrderStatus::Completed => "Payment confirmed",
            OrderStatus::Cancelled => "Cancelled",
        }
    }

    pub fn icon(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "⏳",
            OrderStatus::Completed => "✅",
            OrderStatus::Cancelled => "❌",
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 同时接受英文名与旧面板的土耳其语状态值
impl FromStr for OrderStatus {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase();
        match normalized.as_str() {
            "pending" | "beklemede" => Ok(OrderStatus::Pending),
            "completed" | "tamamlandı" | "tamamlandi" => Ok(OrderStatus::Completed),
            "cancelled" | "canceled" | "i̇ptal" | "iptal" => Ok(OrderStatus::Cancelled),
            _ => Err(ValidationError::InvalidStatus(s.trim().to_string())),
        }
    }
}

/// 消息发送方
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    Customer,
    Operator,
}

impl Sender {
    pub fn as_str(&self) -> &'static str {
        match self {
            Sender::Customer => "customer",
            Sender::Operator => "operator",
        }
    }

    /// 兼容旧数据中的 `user` / `admin`
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "customer" | "user" => Some(Sender::Customer),
            "operator" | "admin" => Some(Sender::Operator),
            _ => None,
        }
    }
}

/// 线程中的单条消息
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub sender: Sender,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    pub fn new(sender: Sender, text: impl Into<String>) -> Self {
        Self {
            sender,
            text: text.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn customer(text: impl Into<String>) -> Self {
        Self::new(Sender::Customer, text)
    }

    pub fn operator(text: impl Into<String>) -> Self {
        Self::new(Sender::Operator, text)
    }
}

/// 订单
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: OrderId,
    pub order_number: OrderNumber,
    pub product_name: String,
    pub quantity: u32,
    pub payment_info: String,
    pub transaction_id: Option<String>,
    pub status: OrderStatus,
    pub is_archived: bool,
    pub has_unread_user_message: bool,
    /// 按时间顺序追加，不可编辑、不可删除
    pub messages: Vec<Message>,
    pub created_at: DateTime<Utc>,
}

impl Order {
    /// 第一条顾客留言（下单备注）
    pub fn first_customer_note(&self) -> Option<&Message> {
        self.messages.first().filter(|m| m.sender == Sender::Customer)
    }
}

/// 订单选择器：订单号或内部 ID
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum OrderRef {
    Number(OrderNumber),
    Id(OrderId),
}

impl fmt::Display for OrderRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderRef::Number(n) => n.fmt(f),
            OrderRef::Id(id) => id.fmt(f),
        }
    }
}

impl From<OrderNumber> for OrderRef {
    fn from(n: OrderNumber) -> Self {
        OrderRef::Number(n)
    }
}

impl From<&OrderNumber> for OrderRef {
    fn from(n: &OrderNumber) -> Self {
        OrderRef::Number(n.clone())
    }
}

impl From<OrderId> for OrderRef {
    fn from(id: OrderId) -> Self {
        OrderRef::Id(id)
    }
}
