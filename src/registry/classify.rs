//! Keyword-based categorization and tagging of discovered tools.
//!
//! A fixed rule table rather than a classifier: category matching runs in
//! priority order and the first hit wins, so a tool never lands in an
//! ambiguous multi-category assignment. Tags are independent checks and a
//! tool may carry several.

use crate::types::ToolCategory;

/// Priority-ordered category rules; first match on name+description wins.
const CATEGORY_RULES: &[(ToolCategory, &[&str])] = &[
    (ToolCategory::Rag, &["rag", "search", "retrieval"]),
    (
        ToolCategory::ProjectManagement,
        &["project", "task", "document"],
    ),
    (ToolCategory::Data, &["data", "database", "sql"]),
    (ToolCategory::Development, &["code", "git", "build"]),
    (
        ToolCategory::Communication,
        &["notification", "message", "email"],
    ),
    (
        ToolCategory::FileManagement,
        &["file", "upload", "download"],
    ),
];

const ACTION_TAGS: &[&str] = &["create", "update", "delete", "list", "search"];

pub fn categorize(name: &str, description: &str) -> ToolCategory {
    let haystack = format!("{} {}", name.to_lowercase(), description.to_lowercase());
    for (category, keywords) in CATEGORY_RULES {
        if keywords.iter().any(|keyword| haystack.contains(keyword)) {
            return *category;
        }
    }
    ToolCategory::General
}

pub fn derive_tags(name: &str, description: &str) -> Vec<String> {
    let haystack = format!("{} {}", name.to_lowercase(), description.to_lowercase());
    let mut tags = Vec::new();
    for tag in ACTION_TAGS {
        if haystack.contains(tag) {
            tags.push((*tag).to_string());
        }
    }
    if haystack.contains("ai") {
        tags.push("ai".to_string());
    }
    if haystack.contains("async") {
        tags.push("async".to_string());
    }
    if haystack.contains("real-time") || haystack.contains("realtime") {
        tags.push("real-time".to_string());
    }
    tags
}
