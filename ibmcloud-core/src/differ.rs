//! Differ - Compare desired attributes with observed ones
//!
//! Produces the patch an update has to send: only the attributes whose
//! desired value differs from what the remote side currently reports.

use crate::resource::Attributes;

/// Result of comparing a desired spec with an observed object
#[derive(Debug, Clone, PartialEq)]
pub enum Diff {
    /// Nothing to send
    NoChange,
    /// Attributes to send as a patch
    Update { patch: Attributes, changed: Vec<String> },
}

impl Diff {
    pub fn is_change(&self) -> bool {
        !matches!(self, Diff::NoChange)
    }

    pub fn into_patch(self) -> Attributes {
        match self {
            Diff::NoChange => Attributes::new(),
            Diff::Update { patch, .. } => patch,
        }
    }
}

/// Compare desired attributes against observed ones
pub fn diff_attributes(desired: &Attributes, observed: &Attributes) -> Diff {
    let changed = find_changed_attributes(desired, observed);

    if changed.is_empty() {
        return Diff::NoChange;
    }

    let patch = changed
        .iter()
        .filter_map(|key| desired.raw(key).map(|v| (key.clone(), v.clone())))
        .collect();
    Diff::Update { patch, changed }
}

fn find_changed_attributes(desired: &Attributes, observed: &Attributes) -> Vec<String> {
    let mut changed = Vec::new();

    for (key, desired_value) in desired.iter() {
        // Skip internal attributes (starting with _)
        if key.starts_with('_') {
            continue;
        }

        match observed.raw(key) {
            Some(current) if current == desired_value => {}
            _ => changed.push(key.clone()),
        }
    }

    changed
}
