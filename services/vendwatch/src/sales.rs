//! Sales differ: finds the sales that appeared since the persisted cursor

use std::collections::HashSet;

use crate::snapshot::{SaleRecord, SaleRow};

/// Result of comparing a sales snapshot against the cursor
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SalesDiff {
    /// New sales, oldest first
    pub new_sales: Vec<SaleRecord>,
    /// Cursor to persist after this tick
    pub new_cursor: Option<String>,
    /// No cursor existed; the snapshot only establishes one
    pub baseline: bool,
    /// The cursor was not in the snapshot and the window heuristic was applied
    pub cursor_lost: bool,
}

/// Compare a newest-first snapshot against the last processed sale id.
///
/// When the cursor has scrolled out of the visible window, every entry
/// except the oldest one is reported as new. The oldest entry is assumed to
/// have been seen already. This is a heuristic: the source does not expose
/// its full history, so sales that scrolled past between two polls are lost
/// and an older cursor can produce one re-notification.
pub fn diff_sales(rows: &[SaleRow], last_processed: Option<&str>) -> SalesDiff {
    let records = normalize(rows);
    let newest = records.first().map(|r| r.id.clone());

    let Some(cursor) = last_processed else {
        tracing::info!(
            "No sales cursor yet, establishing baseline at {:?} without notifying",
            newest
        );
        return SalesDiff {
            new_sales: Vec::new(),
            new_cursor: newest,
            baseline: true,
            cursor_lost: false,
        };
    };

    let (fresh, cursor_lost) = match records.iter().position(|r| r.id == cursor) {
        Some(pos) => (&records[..pos], false),
        None if records.is_empty() => (&records[..], false),
        None => {
            tracing::warn!(
                "Cursor {} not found in {} visible sales, treating all but the oldest as new",
                cursor,
                records.len()
            );
            (&records[..records.len() - 1], true)
        }
    };

    let new_sales: Vec<SaleRecord> = fresh.iter().rev().cloned().collect();
    let new_cursor = newest.or_else(|| Some(cursor.to_string()));

    tracing::debug!(
        "Sales diff: {} new, cursor {} -> {:?}",
        new_sales.len(),
        cursor,
        new_cursor
    );

    SalesDiff {
        new_sales,
        new_cursor,
        baseline: false,
        cursor_lost,
    }
}

/// Drop malformed rows and repeated ids, preserving snapshot order
fn normalize(rows: &[SaleRow]) -> Vec<SaleRecord> {
    let mut seen = HashSet::new();
    let mut records = Vec::with_capacity(rows.len());

    for (index, row) in rows.iter().enumerate() {
        let Some(record) = SaleRecord::from_row(row) else {
            tracing::warn!(
                "Skipping malformed sale row {} ({} cells)",
                index,
                row.cells.len()
            );
            continue;
        };
        if !seen.insert(record.id.clone()) {
            tracing::warn!("Skipping duplicate sale id {} at row {}", record.id, index);
            continue;
        }
        records.push(record);
    }

    records
}
