//! Snapshot data contract and the source trait that produces it

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Number of text cells a sale row must carry: number, address, time, liters, total
pub const SALE_TEXT_CELLS: usize = 5;

const COIN_ICON_PATH: &str = "M336 32c-48.6 0-92.6 9-124.5 23.4";
const CARD_ICON_PATH: &str = "M528 32H48C21.5 32 0 53.5 0 80v352c0 26.5";
const BILL_ICON_PATH: &str = "M320 144c-53.02 0-96 50.14-96 112 0 61.85";

/// How a sale was paid for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Coin,
    Card,
    Bill,
    Unknown,
}

impl PaymentMethod {
    /// Classify the payment column icon by its SVG path data
    pub fn from_icon(svg: Option<&str>) -> Self {
        match svg {
            Some(svg) if svg.contains(COIN_ICON_PATH) => PaymentMethod::Coin,
            Some(svg) if svg.contains(CARD_ICON_PATH) => PaymentMethod::Card,
            Some(svg) if svg.contains(BILL_ICON_PATH) => PaymentMethod::Bill,
            _ => PaymentMethod::Unknown,
        }
    }
}

impl fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PaymentMethod::Coin => write!(f, "Монеты"),
            PaymentMethod::Card => write!(f, "Банковская карта"),
            PaymentMethod::Bill => write!(f, "Купюры"),
            PaymentMethod::Unknown => write!(f, "Неизвестно"),
        }
    }
}

/// A sales table row as the source observed it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaleRow {
    pub cells: Vec<String>,
    pub payment: PaymentMethod,
}

impl SaleRow {
    pub fn new<S: Into<String>>(cells: impl IntoIterator<Item = S>, payment: PaymentMethod) -> Self {
        Self {
            cells: cells.into_iter().map(Into::into).collect(),
            payment,
        }
    }
}

/// A single observed sale. Identity is `id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaleRecord {
    pub id: String,
    pub address: String,
    pub occurred_at: String,
    pub volume_liters: String,
    pub amount: String,
    pub payment_method: PaymentMethod,
}

impl SaleRecord {
    /// Build a record from a raw row, or `None` if the row is malformed
    pub fn from_row(row: &SaleRow) -> Option<Self> {
        if row.cells.len() < SALE_TEXT_CELLS {
            return None;
        }
        let cell = |i: usize| row.cells[i].trim().to_string();
        let id = cell(0);
        if id.is_empty() {
            return None;
        }
        Some(Self {
            id,
            address: cell(1),
            occurred_at: cell(2),
            volume_liters: cell(3),
            amount: cell(4),
            payment_method: row.payment,
        })
    }
}

/// A terminal with an active alert. Identity is `terminal_name`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminalAlert {
    pub terminal_name: String,
    pub error_count: u32,
}

/// One poll's full observed state
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    /// Newest first
    pub sales: Vec<SaleRow>,
    pub terminals: Vec<TerminalAlert>,
}

impl Snapshot {
    /// Alert counts keyed by terminal; the first occurrence of a name wins
    pub fn terminal_counts(&self) -> BTreeMap<String, u32> {
        let mut counts = BTreeMap::new();
        for alert in &self.terminals {
            counts
                .entry(alert.terminal_name.clone())
                .or_insert(alert.error_count);
        }
        counts
    }
}

/// Produces snapshots of the operator dashboard
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    /// Make sure an authenticated session exists. Idempotent.
    async fn ensure_session(&self) -> crate::Result<()>;

    /// Read the current sales and terminal alert state
    async fn fetch_snapshot(&self) -> crate::Result<Snapshot>;
}
