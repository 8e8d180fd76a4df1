// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use crate::model::Category;

/// Spellings seen in the wild, after [`canonical`] folding.
const SYNONYMS: &[(&str, Category)] = &[
    ("new_order", Category::NewOrder),
    ("neworder", Category::NewOrder),
    ("order", Category::NewOrder),
    ("new", Category::NewOrder),
    ("purchase", Category::NewOrder),
    ("enquiry", Category::Enquiry),
    ("inquiry", Category::Enquiry),
    ("question", Category::Enquiry),
    ("general", Category::Enquiry),
    ("follow_up", Category::FollowUp),
    ("followup", Category::FollowUp),
    ("reminder", Category::FollowUp),
    ("complaint", Category::Complaint),
    ("complain", Category::Complaint),
    ("issue", Category::Complaint),
    ("problem", Category::Complaint),
    ("return", Category::Return),
    ("returns", Category::Return),
    ("refund", Category::Return),
    ("exchange", Category::Return),
];

/// Map free-form category text to a [`Category`]. Unknown text is an enquiry.
#[must_use]
pub fn classify(raw: &str) -> Category {
    let folded = canonical(raw);
    SYNONYMS
        .iter()
        .find(|(name, _)| *name == folded)
        .map(|(_, category)| *category)
        .unwrap_or_default()
}

/// Trim, lowercase, and collapse runs of spaces, hyphens and underscores
/// into one underscore.
fn canonical(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut pending_sep = false;
    for c in raw.trim().chars() {
        if c.is_whitespace() || c == '-' || c == '_' {
            pending_sep = !out.is_empty();
            continue;
        }
        if pending_sep {
            out.push('_');
            pending_sep = false;
        }
        out.extend(c.to_lowercase());
    }
    out
}
