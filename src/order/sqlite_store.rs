//! SQLite 订单存储（sqlx）
//!
//! 订单一行一条，消息单独成表（自增 id 保证插入顺序）。
//! 追加消息、条件删除都在单个事务里完成；订单号由 UNIQUE 约束兜底。

#![cfg(feature = "async-sqlite")]

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{Sqlite, SqliteConnection, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{QueryBuilder, Row};

use super::model::{Message, Order, OrderId, OrderNumber, OrderRef, OrderStatus, Sender};
use super::store::{FieldUpdate, OrderFilter, OrderSort, OrderStore, Selector, StoreError};

const ORDER_COLUMNS: &str = "id, order_number, product_name, quantity, payment_info, \
     transaction_id, status, is_archived, has_unread_user_message, created_at";

fn backend(e: sqlx::Error) -> StoreError {
    StoreError::Backend(e.to_string())
}

fn timestamp(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Backend(format!("bad timestamp {}: {}", raw, e)))
}

fn push_selector(qb: &mut QueryBuilder<'_, Sqlite>, selector: &Selector) {
    match &selector.target {
        OrderRef::Id(id) => {
            qb.push(" WHERE id = ").push_bind(id.to_string());
        }
        OrderRef::Number(number) => {
            qb.push(" WHERE order_number = ").push_bind(number.to_string());
        }
    }
    if let Some(archived) = selector.require_archived {
        qb.push(" AND is_archived = ").push_bind(archived);
    }
}

fn push_filter(qb: &mut QueryBuilder<'_, Sqlite>, filter: &OrderFilter) {
    qb.push(" WHERE 1 = 1");
    if let Some(status) = filter.status {
        qb.push(" AND status = ").push_bind(status.as_str());
    }
    if let Some(archived) = filter.archived {
        qb.push(" AND is_archived = ").push_bind(archived);
    }
    if let Some(unread) = filter.unread {
        qb.push(" AND has_unread_user_message = ").push_bind(unread);
    }
    if let Some(ref needle) = filter.search {
        let needle = needle.to_lowercase();
        qb.push(" AND (instr(lower(order_number), ")
            .push_bind(needle.clone())
            .push(") > 0 OR instr(lower(product_name), ")
            .push_bind(needle)
            .push(") > 0)");
    }
}

async fn load_messages(
    conn: &mut SqliteConnection,
    order_id: &str,
) -> Result<Vec<Message>, StoreError> {
    let rows = sqlx::query(
        "SELECT sender, text, created_at FROM order_messages WHERE order_id = ? ORDER BY id ASC",
    )
    .bind(order_id)
    .fetch_all(&mut *conn)
    .await
    .map_err(backend)?;

    let mut messages = Vec::with_capacity(rows.len());
    for row in rows {
        let sender: String = row.get("sender");
        let Some(sender) = Sender::parse(&sender) else {
            tracing::warn!("Skipping message with unknown sender {:?} on {}", sender, order_id);
            continue;
        };
        let created_at: String = row.get("created_at");
        messages.push(Message {
            sender,
            text: row.get("text"),
            timestamp: parse_timestamp(&created_at)?,
        });
    }
    Ok(messages)
}

async fn hydrate(conn: &mut SqliteConnection, row: &SqliteRow) -> Result<Order, StoreError> {
    let id: String = row.get("id");
    let number: String = row.get("order_number");
    let status: String = row.get("status");
    let quantity: i64 = row.get("quantity");
    let created_at: String = row.get("created_at");
    let messages = load_messages(conn, &id).await?;

    Ok(Order {
        id: id
            .parse::<OrderId>()
            .map_err(|e| StoreError::Backend(e.to_string()))?,
        order_number: OrderNumber::parse(&number)
            .map_err(|e| StoreError::Backend(e.to_string()))?,
        product_name: row.get("product_name"),
        quantity: u32::try_from(quantity).map_err(|e| StoreError::Backend(e.to_string()))?,
        payment_info: row.get("payment_info"),
        transaction_id: row.get("transaction_id"),
        status: status
            .parse::<OrderStatus>()
            .map_err(|e| StoreError::Backend(e.to_string()))?,
        is_archived: row.get("is_archived"),
        has_unread_user_message: row.get("has_unread_user_message"),
        messages,
        created_at: parse_timestamp(&created_at)?,
    })
}

async fn load_one(
    conn: &mut SqliteConnection,
    selector: &Selector,
) -> Result<Option<Order>, StoreError> {
    let mut qb = QueryBuilder::<Sqlite>::new(format!("SELECT {} FROM orders", ORDER_COLUMNS));
    push_selector(&mut qb, selector);
    let row = qb
        .build()
        .fetch_optional(&mut *conn)
        .await
        .map_err(backend)?;
    match row {
        Some(row) => Ok(Some(hydrate(conn, &row).await?)),
        None => Ok(None),
    }
}

/// SQLite 订单存储
pub struct SqliteOrderStore {
    pool: SqlitePool,
}

impl SqliteOrderStore {
    pub async fn new(db_path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let db_url = format!("sqlite:{}?mode=rwc", db_path.as_ref().display());

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&db_url)
            .await
            .map_err(backend)?;

        let store = Self { pool };
        store.init_tables().await?;
        Ok(store)
    }

    async fn init_tables(&self) -> Result<(), StoreError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS orders (
                id TEXT PRIMARY KEY,
                order_number TEXT NOT NULL UNIQUE,
                product_name TEXT NOT NULL,
                quantity INTEGER NOT NULL,
                payment_info TEXT NOT NULL,
                transaction_id TEXT,
                status TEXT NOT NULL,
                is_archived INTEGER NOT NULL DEFAULT 0,
                has_unread_user_message INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS order_messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                order_id TEXT NOT NULL,
                sender TEXT NOT NULL,
                text TEXT NOT NULL,
                created_at TEXT NOT NULL,
                FOREIGN KEY (order_id) REFERENCES orders(id) ON DELETE CASCADE
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_order_messages_order ON order_messages(order_id)",
        )
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        Ok(())
    }

    /// 关闭连接池
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl OrderStore for SqliteOrderStore {
    async fn find_by_number(&self, number: &OrderNumber) -> Result<Option<Order>, StoreError> {
        let mut conn = self.pool.acquire().await.map_err(backend)?;
        load_one(&mut conn, &Selector::new(number)).await
    }

    async fn find_by_id(&self, id: OrderId) -> Result<Option<Order>, StoreError> {
        let mut conn = self.pool.acquire().await.map_err(backend)?;
        load_one(&mut conn, &Selector::new(id)).await
    }

    async fn insert(&self, order: Order) -> Result<Order, StoreError> {
        let mut tx = self.pool.begin().await.map_err(backend)?;
        let id = order.id.to_string();

        let inserted = sqlx::query(
            "INSERT INTO orders (id, order_number, product_name, quantity, payment_info, \
             transaction_id, status, is_archived, has_unread_user_message, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(order.order_number.as_str())
        .bind(&order.product_name)
        .bind(i64::from(order.quantity))
        .bind(&order.payment_info)
        .bind(&order.transaction_id)
        .bind(order.status.as_str())
        .bind(order.is_archived)
        .bind(order.has_unread_user_message)
        .bind(timestamp(&order.created_at))
        .execute(&mut *tx)
        .await;

        if let Err(e) = inserted {
            if let sqlx::Error::Database(ref db) = e {
                if db.is_unique_violation() {
                    return Err(StoreError::DuplicateNumber(order.order_number.to_string()));
                }
            }
            return Err(backend(e));
        }

        for message in &order.messages {
            sqlx::query(
                "INSERT INTO order_messages (order_id, sender, text, created_at) VALUES (?, ?, ?, ?)",
            )
            .bind(&id)
            .bind(message.sender.as_str())
            .bind(&message.text)
            .bind(timestamp(&message.timestamp))
            .execute(&mut *tx)
            .await
            .map_err(backend)?;
        }

        tx.commit().await.map_err(backend)?;
        Ok(order)
    }

    async fn update_fields(
        &self,
        selector: &Selector,
        fields: FieldUpdate,
    ) -> Result<Option<Order>, StoreError> {
        let mut tx = self.pool.begin().await.map_err(backend)?;

        let mut qb = QueryBuilder::<Sqlite>::new("UPDATE orders SET status = COALESCE(");
        qb.push_bind(fields.status.map(|s| s.as_str()))
            .push(", status), is_archived = COALESCE(")
            .push_bind(fields.is_archived)
            .push(", is_archived)");
        push_selector(&mut qb, selector);
        qb.push(" RETURNING id");

        let Some(row) = qb
            .build()
            .fetch_optional(&mut *tx)
            .await
            .map_err(backend)?
        else {
            return Ok(None);
        };
        let id: String = row.get("id");
        let id = id
            .parse::<OrderId>()
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        let updated = load_one(&mut tx, &Selector::new(id)).await?;
        tx.commit().await.map_err(backend)?;
        Ok(updated)
    }

    async fn delete_matching(&self, selector: &Selector) -> Result<Option<Order>, StoreError> {
        let mut tx = self.pool.begin().await.map_err(backend)?;

        let Some(snapshot) = load_one(&mut tx, selector).await? else {
            return Ok(None);
        };

        // 条件删除：附加条件在 DELETE 本身上再次生效
        let mut qb = QueryBuilder::<Sqlite>::new("DELETE FROM orders");
        push_selector(&mut qb, &Selector {
            target: OrderRef::Id(snapshot.id),
            require_archived: selector.require_archived,
        });
        let deleted = qb
            .build()
            .execute(&mut *tx)
            .await
            .map_err(backend)?
            .rows_affected();
        if deleted == 0 {
            return Ok(None);
        }

        sqlx::query("DELETE FROM order_messages WHERE order_id = ?")
            .bind(snapshot.id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(backend)?;

        tx.commit().await.map_err(backend)?;
        Ok(Some(snapshot))
    }

    async fn append_to_thread(
        &self,
        selector: &Selector,
        message: Message,
        has_unread_user_message: bool,
    ) -> Result<Option<Order>, StoreError> {
        let mut tx = self.pool.begin().await.map_err(backend)?;

        // 先写订单行以取得写锁，再插入消息
        let mut qb = QueryBuilder::<Sqlite>::new("UPDATE orders SET has_unread_user_message = ");
        qb.push_bind(has_unread_user_message);
        push_selector(&mut qb, selector);
        qb.push(" RETURNING id");

        let Some(row) = qb
            .build()
            .fetch_optional(&mut *tx)
            .await
            .map_err(backend)?
        else {
            return Ok(None);
        };
        let id: String = row.get("id");

        sqlx::query(
            "INSERT INTO order_messages (order_id, sender, text, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(message.sender.as_str())
        .bind(&message.text)
        .bind(timestamp(&message.timestamp))
        .execute(&mut *tx)
        .await
        .map_err(backend)?;

        let id = id
            .parse::<OrderId>()
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        let updated = load_one(&mut tx, &Selector::new(id)).await?;
        tx.commit().await.map_err(backend)?;
        Ok(updated)
    }

    async fn list(&self, filter: &OrderFilter, sort: OrderSort) -> Result<Vec<Order>, StoreError> {
        let mut conn = self.pool.acquire().await.map_err(backend)?;

        let mut qb = QueryBuilder::<Sqlite>::new(format!("SELECT {} FROM orders", ORDER_COLUMNS));
        push_filter(&mut qb, filter);
        match sort {
            OrderSort::UnreadFirst => {
                qb.push(" ORDER BY has_unread_user_message DESC, created_at DESC");
            }
            OrderSort::Newest => {
                qb.push(" ORDER BY created_at DESC");
            }
        }
        if let Some(limit) = filter.limit {
            qb.push(" LIMIT ").push_bind(limit as i64);
        }

        let rows = qb.build().fetch_all(&mut *conn).await.map_err(backend)?;
        let mut orders = Vec::with_capacity(rows.len());
        for row in &rows {
            orders.push(hydrate(&mut conn, row).await?);
        }
        Ok(orders)
    }

    async fn count_matching(&self, filter: &OrderFilter) -> Result<usize, StoreError> {
        let mut qb = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) AS n FROM orders");
        push_filter(&mut qb, filter);
        let row = qb.build().fetch_one(&self.pool).await.map_err(backend)?;
        let n: i64 = row.get("n");
        Ok(n.max(0) as usize)
    }
}
