//! Catalog row shapes consumed by part reconciliation (component C9).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A single catalog part, as read from a tenant's parts catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartRow {
    /// Catalog part identifier.
    pub part_id: Uuid,
    /// Manufacturer/internal part code (not yet normalised).
    pub code: String,
    /// Human-readable description.
    pub description: String,
    /// Timestamp of the most recent stock movement, used to break score ties.
    pub last_stock_movement_at: Option<DateTime<Utc>>,
}

/// An open line on an approved shopping list, with outstanding quantity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShoppingListLine {
    /// Matching catalog part.
    pub part_id: Uuid,
    /// Quantity still outstanding (not yet received).
    pub outstanding_qty: f64,
}

/// A purchase order received within the reconciliation lookback window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecentPo {
    /// Matching catalog part.
    pub part_id: Uuid,
    /// When the PO was received.
    pub received_at: DateTime<Utc>,
}
