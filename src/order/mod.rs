//! 订单层：聚合模型、订单号分配、存储抽象、生命周期

pub mod lifecycle;
pub mod model;
pub mod number;
#[cfg(feature = "async-sqlite")]
pub mod sqlite_store;
pub mod store;

pub use lifecycle::{validate_transaction_id, NewOrder, OrderLifecycle};
pub use model::{Message, Order, OrderId, OrderNumber, OrderRef, OrderStatus, Sender};
pub use number::{OrderNumberAllocator, DEFAULT_MAX_ATTEMPTS};
#[cfg(feature = "async-sqlite")]
pub use sqlite_store::SqliteOrderStore;
pub use store::{
    FieldUpdate, MemoryOrderStore, OrderFilter, OrderSort, OrderStore, Selector, StoreError,
};
