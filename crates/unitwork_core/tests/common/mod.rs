#![allow(dead_code)]

use tempfile::TempDir;
use unitwork_core::{Entity, EntityRow, Literal, Relation, StoreConfig, UnitOfWorkFactory};

pub const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS customers (
    id INTEGER PRIMARY KEY NOT NULL,
    name TEXT NOT NULL UNIQUE,
    tier TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS orders (
    id INTEGER PRIMARY KEY NOT NULL,
    customer_id INTEGER NOT NULL REFERENCES customers(id),
    total_cents INTEGER NOT NULL CHECK (total_cents >= 0),
    status TEXT NOT NULL,
    note TEXT
);";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Customer {
    pub id: i64,
    pub name: String,
    pub tier: String,
}

impl Entity for Customer {
    const TABLE: &'static str = "customers";
    const KEY: &'static str = "id";
    type Key = i64;

    fn columns() -> &'static [&'static str] {
        &["id", "name", "tier"]
    }

    fn key(&self) -> i64 {
        self.id
    }

    fn values(&self) -> Vec<Literal> {
        vec![
            self.id.into(),
            self.name.clone().into(),
            self.tier.clone().into(),
        ]
    }

    fn from_row(row: &EntityRow<'_, '_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get("id")?,
            name: row.get("name")?,
            tier: row.get("tier")?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    pub id: i64,
    pub customer_id: i64,
    pub total_cents: i64,
    pub status: String,
    pub note: Option<String>,
    /// Loaded only when the `customer` relation is included.
    pub customer_name: Option<String>,
}

const ORDER_CUSTOMER: Relation = Relation {
    name: "customer",
    table: "customers",
    local_column: "customer_id",
    foreign_column: "id",
    columns: &["name", "tier"],
};

impl Entity for Order {
    const TABLE: &'static str = "orders";
    const KEY: &'static str = "id";
    type Key = i64;

    fn columns() -> &'static [&'static str] {
        &["id", "customer_id", "total_cents", "status", "note"]
    }

    fn key(&self) -> i64 {
        self.id
    }

    fn values(&self) -> Vec<Literal> {
        vec![
            self.id.into(),
            self.customer_id.into(),
            self.total_cents.into(),
            self.status.clone().into(),
            self.note.clone().into(),
        ]
    }

    fn from_row(row: &EntityRow<'_, '_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get("id")?,
            customer_id: row.get("customer_id")?,
            total_cents: row.get("total_cents")?,
            status: row.get("status")?,
            note: row.get("note")?,
            customer_name: row.related("customer", "name")?,
        })
    }

    fn relations() -> &'static [Relation] {
        &[ORDER_CUSTOMER]
    }
}

pub fn customer(id: i64, name: &str, tier: &str) -> Customer {
    Customer {
        id,
        name: name.to_string(),
        tier: tier.to_string(),
    }
}

pub fn order(id: i64, customer_id: i64, total_cents: i64, status: &str) -> Order {
    Order {
        id,
        customer_id,
        total_cents,
        status: status.to_string(),
        note: None,
        customer_name: None,
    }
}

/// File-backed store so several scopes can observe the same data.
pub struct TestStore {
    _dir: TempDir,
    pub config: StoreConfig,
}

impl TestStore {
    pub fn new() -> Self {
        Self::with_extra_schema("")
    }

    /// Store whose schema hook also runs `extra` after the shared tables.
    pub fn with_extra_schema(extra: &str) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let config = StoreConfig::file(dir.path().join("unitwork.db"))
            .with_schema(format!("{SCHEMA}\n{extra}"));
        Self { _dir: dir, config }
    }

    pub fn factory(&self) -> UnitOfWorkFactory {
        UnitOfWorkFactory::new(self.config.clone())
    }
}

pub fn ids(orders: &[Order]) -> Vec<i64> {
    orders.iter().map(|order| order.id).collect()
}
