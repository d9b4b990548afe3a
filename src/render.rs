//! 操作员视图文案（Telegram HTML 模式）
//!
//! 所有来自顾客 / 商品目录的文本都会先做 HTML 转义。

use chrono::{DateTime, Utc};

use crate::order::{Message, Order, Sender};

/// 转义 `&`、`<`、`>`，供 HTML parse mode 使用
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(ch),
        }
    }
    out
}

/// `dd.mm.yyyy HH:MM`（UTC）
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.format("%d.%m.%Y %H:%M").to_string()
}

fn sender_label(sender: Sender) -> &'static str {
    match sender {
        Sender::Operator => "<b>You</b>",
        Sender::Customer => "<b>Customer</b>",
    }
}

const SEPARATOR: &str = "--------------------";

/// 消息记录，按时间顺序
pub fn transcript(messages: &[Message]) -> String {
    if messages.is_empty() {
        return "<i>No messages for this order yet.</i>".to_string();
    }
    messages
        .iter()
        .map(|m| {
            format!(
                "{} ({}):\n{}",
                sender_label(m.sender),
                format_timestamp(&m.timestamp),
                escape_html(&m.text)
            )
        })
        .collect::<Vec<_>>()
        .join(&format!("\n{}\n", SEPARATOR))
}

/// 订单详情 + 完整消息记录
pub fn order_detail(order: &Order) -> String {
    let mut out = format!(
        "<b>Order No:</b> <code>{}</code>\n\
         <b>Created:</b> {}\n\
         <b>Product:</b> {} (x{})\n\
         <b>Payment:</b> {}\n\
         <b>Status:</b> {} {}\n\
         <b>Archived:</b> {}\n",
        order.order_number,
        format_timestamp(&order.created_at),
        escape_html(&order.product_name),
        order.quantity,
        escape_html(&order.payment_info),
        order.status.icon(),
        order.status.label(),
        if order.is_archived { "Yes" } else { "No" },
    );
    if let Some(ref tx) = order.transaction_id {
        out.push_str(&format!("<b>TxID:</b> <code>{}</code>\n", escape_html(tx)));
    }
    out.push_str(&format!(
        "\n<b>Message history:</b>\n{}\n{}",
        SEPARATOR,
        transcript(&order.messages)
    ));
    out
}

/// 列表视图：每单一行
pub fn order_list(title: &str, orders: &[Order]) -> String {
    if orders.is_empty() {
        return format!("<b>{}</b>\n\n<i>No matching orders.</i>", escape_html(title));
    }
    let lines: Vec<String> = orders
        .iter()
        .map(|o| {
            format!(
                "{} <code>{}</code> {} (x{}){}{}",
                o.status.icon(),
                o.order_number,
                escape_html(&o.product_name),
                o.quantity,
                if o.has_unread_user_message { " 💬" } else { "" },
                if o.is_archived { " 📁" } else { "" },
            )
        })
        .collect();
    format!(
        "<b>{}</b> ({})\n\n{}",
        escape_html(title),
        orders.len(),
        lines.join("\n")
    )
}
