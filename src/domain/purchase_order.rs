//! Purchase order domain types.
//!
//! Purchase orders live in two tables with different shapes: orders raised in
//! this system ([`InternalPurchaseOrder`]) and orders imported from an external
//! storefront ([`ExternalPurchaseOrder`]). [`PurchaseOrder`] is the tagged union
//! the correlation engine works with.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::{PoId, VendorId};

/// Statuses that end an internal order's lifecycle.
pub const PRIMARY_TERMINAL_STATUSES: &[&str] = &["received", "fulfilled", "completed"];

/// Statuses that end an imported order's lifecycle.
pub const SECONDARY_TERMINAL_STATUSES: &[&str] =
    &["received", "fulfilled", "completed", "cancelled", "closed"];

/// Which table a purchase order came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PoSource {
    /// `purchase_orders`.
    Primary,
    /// `external_purchase_orders`.
    Secondary,
}

impl PoSource {
    /// Returns the stored string form.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::Secondary => "secondary",
        }
    }

    /// Parses the stored string form.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "primary" => Some(Self::Primary),
            "secondary" => Some(Self::Secondary),
            _ => None,
        }
    }
}

/// A purchase order raised in this system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InternalPurchaseOrder {
    pub id: PoId,
    pub order_number: String,
    pub vendor_id: Option<VendorId>,
    pub status: String,
    pub order_date: Option<DateTime<Utc>>,
    pub tracking_number: Option<String>,
    pub tracking_carrier: Option<String>,
}

/// A purchase order imported from an external system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExternalPurchaseOrder {
    pub id: PoId,
    pub external_order_id: String,
    pub supplier_id: Option<VendorId>,
    pub order_status: String,
    pub ordered_at: Option<DateTime<Utc>>,
    pub estimated_delivery: Option<NaiveDate>,
    pub tracking_number: Option<String>,
    pub tracking_carrier: Option<String>,
}

/// Either shape of purchase order.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "lowercase")]
pub enum PurchaseOrder {
    Primary(InternalPurchaseOrder),
    Secondary(ExternalPurchaseOrder),
}

impl PurchaseOrder {
    pub fn id(&self) -> &PoId {
        match self {
            Self::Primary(po) => &po.id,
            Self::Secondary(po) => &po.id,
        }
    }

    /// The human-facing order number.
    pub fn number(&self) -> &str {
        match self {
            Self::Primary(po) => &po.order_number,
            Self::Secondary(po) => &po.external_order_id,
        }
    }

    pub fn vendor_id(&self) -> Option<&VendorId> {
        match self {
            Self::Primary(po) => po.vendor_id.as_ref(),
            Self::Secondary(po) => po.supplier_id.as_ref(),
        }
    }

    pub fn status(&self) -> &str {
        match self {
            Self::Primary(po) => &po.status,
            Self::Secondary(po) => &po.order_status,
        }
    }

    pub fn ordered_at(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Primary(po) => po.order_date,
            Self::Secondary(po) => po.ordered_at,
        }
    }

    pub fn source(&self) -> PoSource {
        match self {
            Self::Primary(_) => PoSource::Primary,
            Self::Secondary(_) => PoSource::Secondary,
        }
    }

    /// Returns true if the order can no longer receive correlations.
    pub fn is_terminal(&self) -> bool {
        let terminal = match self {
            Self::Primary(_) => PRIMARY_TERMINAL_STATUSES,
            Self::Secondary(_) => SECONDARY_TERMINAL_STATUSES,
        };
        let status = self.status().trim().to_lowercase();
        terminal.contains(&status.as_str())
    }

    /// Returns true if the order was placed within `window` of `now`.
    pub fn within_window(&self, now: DateTime<Utc>, window: chrono::Duration) -> bool {
        match self.ordered_at() {
            Some(at) => at >= now - window,
            None => false,
        }
    }

    /// Returns a lightweight reference for correlation results.
    pub fn to_ref(&self) -> PoRef {
        PoRef {
            id: self.id().clone(),
            number: self.number().to_string(),
            source: self.source(),
            vendor_id: self.vendor_id().cloned(),
        }
    }
}

/// A lightweight pointer to a purchase order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoRef {
    pub id: PoId,
    pub number: String,
    pub source: PoSource,
    pub vendor_id: Option<VendorId>,
}

/// Normalizes a PO number for comparison.
///
/// Keeps upper-cased ASCII alphanumerics and strips a leading `PO`, so
/// `PO-4821`, `P.O. 4821` and `4821` all compare equal.
pub fn normalize_po_number(raw: &str) -> String {
    let key: String = raw
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_uppercase())
        .collect();
    match key.strip_prefix("PO") {
        Some(rest) if !rest.is_empty() => rest.to_string(),
        _ => key,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn internal(status: &str, days_ago: i64) -> PurchaseOrder {
        PurchaseOrder::Primary(InternalPurchaseOrder {
            id: PoId::from("po-1"),
            order_number: "PO-4821".to_string(),
            vendor_id: Some(VendorId::from("v-1")),
            status: status.to_string(),
            order_date: Some(Utc::now() - chrono::Duration::days(days_ago)),
            tracking_number: None,
            tracking_carrier: None,
        })
    }

    #[test]
    fn normalizes_po_numbers() {
        assert_eq!(normalize_po_number("PO-4821"), "4821");
        assert_eq!(normalize_po_number("P.O. 4821"), "4821");
        assert_eq!(normalize_po_number("po#a12-7"), "A127");
        assert_eq!(normalize_po_number("4821"), "4821");
        assert_eq!(normalize_po_number("PO"), "PO");
    }

    #[test]
    fn terminal_status_is_case_insensitive() {
        assert!(internal("Received", 1).is_terminal());
        assert!(!internal("sent", 1).is_terminal());
    }

    #[test]
    fn cancelled_is_terminal_only_for_secondary() {
        assert!(!internal("cancelled", 1).is_terminal());
        let external = PurchaseOrder::Secondary(ExternalPurchaseOrder {
            id: PoId::from("ext-1"),
            external_order_id: "4821".to_string(),
            supplier_id: None,
            order_status: "cancelled".to_string(),
            ordered_at: Some(Utc::now()),
            estimated_delivery: None,
            tracking_number: None,
            tracking_carrier: None,
        });
        assert!(external.is_terminal());
        assert_eq!(external.source(), PoSource::Secondary);
        assert_eq!(external.number(), "4821");
    }

    #[test]
    fn recency_window() {
        let window = chrono::Duration::days(30);
        assert!(internal("sent", 10).within_window(Utc::now(), window));
        assert!(!internal("sent", 45).within_window(Utc::now(), window));
    }
}
