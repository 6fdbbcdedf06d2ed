// System status display: queue counts, verdict totals, last tick.

use anyhow::Result;
use std::path::Path;
use std::sync::Arc;

use crate::db::ContentStore;
use crate::pipeline::run::{LAST_TICK_AT, LAST_TICK_SUMMARY};
use crate::pipeline::TickReport;

/// Display system status to the terminal.
///
/// `sqlite_path` is given for the SQLite backend so the file size can be
/// shown next to the location.
pub async fn show(
    store: &Arc<dyn ContentStore>,
    db_display: &str,
    sqlite_path: Option<&str>,
) -> Result<()> {
    match sqlite_path.map(Path::new) {
        Some(path) => {
            let file_size = std::fs::metadata(path)
                .map(|m| format_bytes(m.len()))
                .unwrap_or_else(|_| "unknown".to_string());
            println!("Database: {} ({})", db_display, file_size);
        }
        None => println!("Database: {}", db_display),
    }

    let counts = store.counts().await?;
    println!(
        "Content items: {} total, {} analyzed, {} pending, {} flagged",
        counts.items, counts.analyzed, counts.pending, counts.flagged
    );
    println!("Analysis results: {}", counts.results);

    match store.get_state(LAST_TICK_AT).await? {
        Some(at) => {
            println!("Last run: {}", at);
            if let Some(summary) = store.get_state(LAST_TICK_SUMMARY).await? {
                // Older or hand-edited summaries are shown raw
                match serde_json::from_str::<TickReport>(&summary) {
                    Ok(report) => println!("  {report}"),
                    Err(_) => println!("  {summary}"),
                }
            }
        }
        None => {
            println!("Last run: never");
            println!("  Run `vigil run-once` or `vigil serve` to analyze pending content");
        }
    }

    Ok(())
}

fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(3 * 1024 * 1024), "3.0 MB");
    }
}
