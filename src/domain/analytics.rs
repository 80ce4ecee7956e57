//! Back-office dashboard figures.

use chrono::{DateTime, Duration, NaiveTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::HashMap;
use uuid::Uuid;

use crate::domain::aggregates::{Order, OrderLine, OrderStatus, PaymentStatus, Product, User};

/// Active products below this stock level are flagged.
pub const LOW_STOCK_THRESHOLD: i32 = 10;
/// Length of each ranked list on the dashboard.
pub const DASHBOARD_ROWS: usize = 10;

/// Day and week boundaries, both at UTC midnight.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReportWindow {
    pub today: DateTime<Utc>,
    pub week: DateTime<Utc>,
}

impl ReportWindow {
    pub fn at(now: DateTime<Utc>) -> Self {
        let today = now.date_naive().and_time(NaiveTime::MIN).and_utc();
        Self { today, week: today - Duration::days(7) }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, sqlx::FromRow)]
pub struct SalesSummary {
    pub total_orders: i64,
    pub pending_orders: i64,
    pub today_orders: i64,
    pub weekly_orders: i64,
    /// Sum of every order total, whatever its status.
    pub total_revenue: Decimal,
    /// Paid orders placed since the start of the week window.
    pub weekly_revenue: Decimal,
}

#[derive(Clone, Debug, PartialEq, Serialize, sqlx::FromRow)]
pub struct TopProduct {
    pub product_id: Uuid,
    pub name: String,
    pub units_sold: i64,
}

#[derive(Clone, Debug, PartialEq, Serialize, sqlx::FromRow)]
pub struct StockAlert {
    pub product_id: Uuid,
    pub name: String,
    pub stock: i32,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Dashboard {
    #[serde(flatten)]
    pub sales: SalesSummary,
    pub total_users: i64,
    pub new_users_week: i64,
    pub top_products: Vec<TopProduct>,
    pub low_stock: Vec<StockAlert>,
    pub recent_orders: Vec<Order>,
}

impl Dashboard {
    /// Tally a dashboard from full in-process collections.
    pub fn tally<'a>(
        window: ReportWindow,
        orders: &[Order],
        lines: &[OrderLine],
        products: impl Iterator<Item = &'a Product>,
        users: impl Iterator<Item = &'a User>,
    ) -> Self {
        let mut sales = SalesSummary::default();
        for o in orders {
            sales.total_orders += 1;
            sales.total_revenue += o.total;
            if o.status == OrderStatus::Pending { sales.pending_orders += 1; }
            if o.created_at >= window.today { sales.today_orders += 1; }
            if o.created_at >= window.week {
                sales.weekly_orders += 1;
                if o.payment_status == PaymentStatus::Paid { sales.weekly_revenue += o.total; }
            }
        }

        let products: Vec<&Product> = products.collect();
        let mut sold: HashMap<Uuid, i64> = HashMap::new();
        for line in lines { *sold.entry(line.product_id).or_default() += i64::from(line.quantity); }
        let mut top_products: Vec<TopProduct> = products.iter()
            .filter_map(|p| sold.get(&p.id).map(|&units_sold| TopProduct { product_id: p.id, name: p.name.clone(), units_sold }))
            .collect();
        top_products.sort_by(|a, b| b.units_sold.cmp(&a.units_sold).then_with(|| a.name.cmp(&b.name)));
        top_products.truncate(DASHBOARD_ROWS);

        let mut low_stock: Vec<StockAlert> = products.iter()
            .filter(|p| p.is_active && p.stock < LOW_STOCK_THRESHOLD)
            .map(|p| StockAlert { product_id: p.id, name: p.name.clone(), stock: p.stock })
            .collect();
        low_stock.sort_by(|a, b| a.stock.cmp(&b.stock).then_with(|| a.name.cmp(&b.name)));
        low_stock.truncate(DASHBOARD_ROWS);

        let mut recent_orders = orders.to_vec();
        recent_orders.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        recent_orders.truncate(DASHBOARD_ROWS);

        let (mut total_users, mut new_users_week) = (0, 0);
        for u in users {
            total_users += 1;
            if u.created_at >= window.week { new_users_week += 1; }
        }

        Self { sales, total_users, new_users_week, top_products, low_stock, recent_orders }
    }
}
