//! Stock-alert CSV handling.
//!
//! Vendor and warehouse exports differ in delimiter, quoting and column
//! names, so the reader is deliberately forgiving: the delimiter is sniffed
//! from the header, columns are found by synonym, and rows that cannot be
//! read are skipped rather than failing the file.

use serde::Serialize;

use super::PollContext;
use crate::domain::AttachmentId;
use crate::storage::queries::attachments::{self, DraftPurchaseAction};
use crate::storage::queries::vendors;
use crate::storage::Result;

/// Group name for rows without a vendor.
pub const UNKNOWN_VENDOR: &str = "Unknown vendor";

const DELIMITERS: [char; 3] = [',', ';', '\t'];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Column {
    Sku,
    Vendor,
    Available,
    OnHand,
    Incoming,
    Name,
}

/// Claimed in this order, so generic names like "item" go last.
const COLUMN_SYNONYMS: &[(Column, &[&str])] = &[
    (
        Column::Sku,
        &["sku", "item code", "item number", "item no", "part number", "product code"],
    ),
    (Column::Vendor, &["vendor", "supplier", "manufacturer"]),
    (Column::Available, &["available", "avail"]),
    (Column::OnHand, &["on hand", "onhand", "qoh", "in stock"]),
    (Column::Incoming, &["incoming", "on order", "inbound"]),
    (Column::Name, &["name", "description", "product", "item", "title"]),
];

/// Bare quantity headers, only claimed once every named column is placed.
/// "Incoming Qty" must not be read as the on-hand count.
const FALLBACK_SYNONYMS: &[(Column, &[&str])] = &[(Column::OnHand, &["quantity", "qty"])];

/// A product that needs to be reordered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReorderItem {
    pub sku: Option<String>,
    pub name: Option<String>,
    pub vendor: String,
}

/// Reorder items for one vendor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VendorGroup {
    pub vendor: String,
    pub items: Vec<ReorderItem>,
}

#[derive(Debug, Default)]
struct ColumnMap {
    sku: Option<usize>,
    vendor: Option<usize>,
    available: Option<usize>,
    on_hand: Option<usize>,
    incoming: Option<usize>,
    name: Option<usize>,
}

impl ColumnMap {
    fn detect(headers: &[String]) -> Self {
        let normalized: Vec<String> = headers
            .iter()
            .map(|h| h.trim().to_lowercase().replace(['_', '-'], " "))
            .collect();
        let mut claimed = vec![false; headers.len()];
        let mut map = ColumnMap::default();

        for (column, synonyms) in COLUMN_SYNONYMS.iter().chain(FALLBACK_SYNONYMS) {
            if map.slot(*column).is_some() {
                continue;
            }
            let found = (0..normalized.len())
                .find(|&i| !claimed[i] && synonyms.iter().any(|s| normalized[i].contains(s)));
            if let Some(index) = found {
                claimed[index] = true;
                *map.slot(*column) = Some(index);
            }
        }
        map
    }

    fn slot(&mut self, column: Column) -> &mut Option<usize> {
        match column {
            Column::Sku => &mut self.sku,
            Column::Vendor => &mut self.vendor,
            Column::Available => &mut self.available,
            Column::OnHand => &mut self.on_hand,
            Column::Incoming => &mut self.incoming,
            Column::Name => &mut self.name,
        }
    }

    fn has_quantity(&self) -> bool {
        self.available.is_some() || self.on_hand.is_some() || self.incoming.is_some()
    }
}

/// Picks the delimiter that splits the header line into the most fields.
/// Ties go to the comma.
fn sniff_delimiter(header_line: &str) -> char {
    DELIMITERS
        .iter()
        .rev()
        .copied()
        .max_by_key(|d| split_line(header_line, *d).len())
        .unwrap_or(',')
}

/// Splits one CSV line, honouring quotes and doubled-quote escapes.
fn split_line(line: &str, delimiter: char) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' if in_quotes && chars.peek() == Some(&'"') => {
                current.push('"');
                chars.next();
            }
            '"' => in_quotes = !in_quotes,
            c if c == delimiter && !in_quotes => {
                fields.push(current.trim().to_string());
                current.clear();
            }
            c => current.push(c),
        }
    }
    fields.push(current.trim().to_string());
    fields
}

/// Parses a quantity. Blank is zero; anything else unparsable is `None`.
fn parse_quantity(value: Option<&String>) -> Option<f64> {
    let value = value.map(|v| v.trim().replace(',', "")).unwrap_or_default();
    if value.is_empty() {
        return Some(0.0);
    }
    value.parse::<f64>().ok()
}

/// Returns the rows whose available, on-hand and incoming quantities are all zero.
pub fn parse_reorder_items(text: &str) -> Vec<ReorderItem> {
    let text = text.trim_start_matches('\u{feff}');
    let mut lines = text.lines().filter(|l| !l.trim().is_empty());
    let Some(header_line) = lines.next() else {
        return Vec::new();
    };

    let delimiter = sniff_delimiter(header_line);
    let columns = ColumnMap::detect(&split_line(header_line, delimiter));
    if !columns.has_quantity() {
        tracing::warn!("Stock alert file has no quantity column");
        return Vec::new();
    }

    let mut items = Vec::new();
    for line in lines {
        let fields = split_line(line, delimiter);
        let quantity = |index: Option<usize>| match index {
            Some(i) => parse_quantity(fields.get(i)),
            None => Some(0.0),
        };
        let (Some(available), Some(on_hand), Some(incoming)) = (
            quantity(columns.available),
            quantity(columns.on_hand),
            quantity(columns.incoming),
        ) else {
            tracing::debug!(line = %line, "Skipping unreadable stock row");
            continue;
        };
        if available != 0.0 || on_hand != 0.0 || incoming != 0.0 {
            continue;
        }

        let text_field = |index: Option<usize>| {
            index
                .and_then(|i| fields.get(i))
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        items.push(ReorderItem {
            sku: text_field(columns.sku),
            name: text_field(columns.name),
            vendor: text_field(columns.vendor).unwrap_or_else(|| UNKNOWN_VENDOR.to_string()),
        });
    }
    items
}

/// Groups items by vendor, in order of first appearance.
pub fn group_by_vendor(items: Vec<ReorderItem>) -> Vec<VendorGroup> {
    let mut groups: Vec<VendorGroup> = Vec::new();
    for item in items {
        match groups
            .iter_mut()
            .find(|g| g.vendor.eq_ignore_ascii_case(&item.vendor))
        {
            Some(group) => group.items.push(item),
            None => groups.push(VendorGroup {
                vendor: item.vendor.clone(),
                items: vec![item],
            }),
        }
    }
    groups
}

/// Parses a stock-alert file and writes one draft action per vendor group.
///
/// Returns the number of draft actions created.
pub async fn process(
    ctx: &PollContext<'_>,
    attachment_id: &AttachmentId,
    content: &[u8],
) -> Result<u32> {
    let text = String::from_utf8_lossy(content);
    let groups = group_by_vendor(parse_reorder_items(&text));

    let mut created = 0;
    for group in groups {
        let vendor_id = if group.vendor == UNKNOWN_VENDOR {
            None
        } else {
            vendors::find_by_name(ctx.db, &group.vendor).await?
        };
        let action = DraftPurchaseAction {
            source_attachment_id: attachment_id.clone(),
            vendor_name: group.vendor.clone(),
            vendor_id,
            items_json: serde_json::to_string(&group.items)?,
            item_count: group.items.len() as u32,
        };
        if attachments::insert_draft_action(ctx.db, &action).await? {
            created += 1;
        }
    }

    tracing::info!(
        attachment_id = %attachment_id,
        draft_actions = created,
        "Processed stock alert"
    );
    Ok(created)
}
