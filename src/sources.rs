use anyhow::Result;

use crate::pipeline::HubAssistant;

/// Print the source map as a table, flagging the cross-cutting project.
pub async fn list_sources(assistant: &HubAssistant) -> Result<()> {
    let entries = assistant.sources().await;
    if entries.is_empty() {
        println!(
            "No sources found in '{}' (table {}).",
            assistant.config().source_map.document,
            assistant.config().source_map.table
        );
        return Ok(());
    }

    let shared = assistant
        .config()
        .source_map
        .cross_cutting_project
        .as_deref()
        .map(str::trim);

    println!("{:<24} {:<16} {:<6} LINK", "PROJECT", "CATEGORY", "SHARED");
    for e in entries.iter() {
        let is_shared = shared
            .map(|s| s.eq_ignore_ascii_case(e.project_name.trim()))
            .unwrap_or(false);
        println!(
            "{:<24} {:<16} {:<6} {}",
            e.project_name,
            e.category,
            if is_shared { "yes" } else { "" },
            e.document_reference
        );
    }

    if let Some(internal) = &assistant.config().internal_tasks {
        println!();
        println!("{:<24} {}", internal.label, internal.document);
    }
    Ok(())
}
