//! Terminal differ: compares alert-count maps between polls

use std::collections::BTreeMap;

/// A terminal whose error count went up
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Worsened {
    pub name: String,
    pub old_count: u32,
    pub new_count: u32,
}

/// Changes in terminal alerts between two polls. Each list is sorted by name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TerminalDiff {
    pub new_problems: Vec<(String, u32)>,
    pub worsened: Vec<Worsened>,
    pub resolved: Vec<String>,
}

impl TerminalDiff {
    pub fn is_empty(&self) -> bool {
        self.new_problems.is_empty() && self.worsened.is_empty() && self.resolved.is_empty()
    }
}

/// Diff the current alert counts against the previously committed ones.
///
/// Only full absence from `current` counts as resolved; a lower but
/// non-zero count is neither worsened nor resolved.
pub fn diff_terminals(
    current: &BTreeMap<String, u32>,
    previous: &BTreeMap<String, u32>,
) -> TerminalDiff {
    let mut diff = TerminalDiff::default();

    for (name, &count) in current {
        match previous.get(name) {
            None => diff.new_problems.push((name.clone(), count)),
            Some(&old_count) if count > old_count => diff.worsened.push(Worsened {
                name: name.clone(),
                old_count,
                new_count: count,
            }),
            Some(_) => {}
        }
    }

    diff.resolved = previous
        .keys()
        .filter(|name| !current.contains_key(*name))
        .cloned()
        .collect();

    tracing::debug!(
        "Terminal diff: {} new, {} worsened, {} resolved",
        diff.new_problems.len(),
        diff.worsened.len(),
        diff.resolved.len()
    );

    diff
}
