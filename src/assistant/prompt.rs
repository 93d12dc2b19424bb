//! System instruction for the agronomist assistant.

use super::context::{OrganizationSnapshot, SourceList};

const RULES: &[&str] = &[
    "Never say you have no access to the farm's data. The snapshot below is the farm's data.",
    "If a section is missing from the snapshot, say the information has not been loaded yet. \
     Do not describe it as something you cannot access.",
    "Ground every claim in the snapshot. Do not invent plots, values, dates or products.",
    "Put critical alerts first: vegetation decline, weather risk and overdue tasks.",
];

/// Build the system instruction embedding the snapshot as JSON.
pub fn build_system_instruction(snapshot: &OrganizationSnapshot, sources: &SourceList) -> String {
    let snapshot_json = serde_json::to_string_pretty(snapshot).unwrap_or_else(|e| {
        log::warn!("Failed to serialize assistant snapshot: {}", e);
        "{}".to_string()
    });

    let source_line = if sources.is_empty() {
        "none".to_string()
    } else {
        sources.iter().collect::<Vec<_>>().join(", ")
    };

    let mut prompt = String::with_capacity(snapshot_json.len() + 1024);
    prompt.push_str(
        "You are an agronomist assistant for a farm-management platform. \
         Answer the user's question about their farm using the data snapshot below.\n\n",
    );

    prompt.push_str("Rules:\n");
    for (i, rule) in RULES.iter().enumerate() {
        prompt.push_str(&format!("{}. {}\n", i + 1, rule));
    }

    prompt.push_str(&format!("\nLoaded sources: {}\n\n", source_line));
    prompt.push_str("Farm data snapshot (JSON):\n```json\n");
    prompt.push_str(&snapshot_json);
    prompt.push_str("\n```\n");
    prompt
}
