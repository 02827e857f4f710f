//! Cross-window summation for reporting.

use serde::Serialize;
use std::collections::BTreeMap;

use crate::stats::aggregator::WindowRecord;

/// Usage for one tag summed over every window it appears in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UsageTotal {
    pub tag: String,
    pub uplink: u64,
    pub downlink: u64,
    pub windows: usize,
}

/// Sum `records` per tag, ordered by tag.
pub fn cumulative(records: &[WindowRecord]) -> Vec<UsageTotal> {
    let mut totals: BTreeMap<&str, UsageTotal> = BTreeMap::new();
    for record in records {
        let total = totals.entry(record.tag.as_str()).or_insert_with(|| UsageTotal {
            tag: record.tag.clone(),
            uplink: 0,
            downlink: 0,
            windows: 0,
        });
        total.uplink = total.uplink.saturating_add(record.uplink);
        total.downlink = total.downlink.saturating_add(record.downlink);
        total.windows += 1;
    }
    totals.into_values().collect()
}
