// Colored terminal output for verdicts, items and comment threads.
//
// This module handles all terminal-specific formatting. The CLI commands
// in main.rs delegate here; the library itself never prints.

use colored::Colorize;

use super::{one_line, truncate_chars};
use crate::db::models::{AnalysisResult, AttachedFile, ContentItem};
use crate::db::thread::CommentNode;
use crate::pipeline::{ItemOutcome, TickReport};

/// Names of the signals a verdict raised.
pub fn flag_labels(result: &AnalysisResult) -> Vec<&'static str> {
    let mut labels = Vec::new();
    if result.contains_profanity {
        labels.push("profanity");
    }
    if result.is_nsfw {
        labels.push("nsfw");
    }
    if result.contains_phone_pattern {
        labels.push("phone");
    }
    labels
}

fn colorize_flags(result: &AnalysisResult) -> String {
    let labels = flag_labels(result);
    if labels.is_empty() {
        "clean".green().to_string()
    } else {
        labels.join(",").red().bold().to_string()
    }
}

fn item_state(item: &ContentItem) -> colored::ColoredString {
    if item.flagged_reason.is_some() {
        "flagged".yellow()
    } else if item.analyzed {
        "analyzed".green()
    } else {
        "pending".dimmed()
    }
}

/// Display recent verdicts, newest first.
pub fn display_results(results: &[AnalysisResult]) {
    if results.is_empty() {
        println!("No analysis results yet. Run `vigil run-once` first.");
        return;
    }

    println!(
        "\n{}",
        format!("=== Analysis Results ({}) ===", results.len()).bold()
    );
    println!();
    println!(
        "  {:>6}  {:>6}  {:<22}  {}",
        "Result".dimmed(),
        "Item".dimmed(),
        "Analyzed at".dimmed(),
        "Flags".dimmed(),
    );
    println!("  {}", "-".repeat(60).dimmed());

    for r in results {
        println!(
            "  {:>6}  {:>6}  {:<22}  {}",
            r.id,
            r.content_item_id,
            r.created_at.format("%Y-%m-%d %H:%M:%S"),
            colorize_flags(r),
        );
    }

    let violations = results.iter().filter(|r| !flag_labels(r).is_empty()).count();
    println!();
    if violations > 0 {
        println!("  {} {} results raised a flag", "!".bright_red(), violations);
    }
}

/// Display recent content items with their queue state.
pub fn display_item_list(items: &[ContentItem]) {
    if items.is_empty() {
        println!("No content items yet. Add one with `vigil add`.");
        return;
    }

    println!("\n{}", format!("=== Content ({} items) ===", items.len()).bold());
    println!();
    for item in items {
        let preview = truncate_chars(&one_line(&item.text_parts().collect::<Vec<_>>().join(" ")), 80);
        println!(
            "  {:>6}  {:<8} {:<9} @{:<16} {}",
            item.id,
            item.kind.as_str(),
            item_state(item),
            item.author_ref,
            preview.dimmed()
        );
    }
}

/// Display one item with its attachments, comment thread and verdict history.
pub fn display_item_detail(
    item: &ContentItem,
    files: &[AttachedFile],
    thread: &[CommentNode],
    results: &[AnalysisResult],
) {
    println!(
        "\n{}",
        format!("=== {} #{} by @{} ===", item.kind, item.id, item.author_ref).bold()
    );
    if let Some(title) = &item.title {
        println!("  Title: {}", title.bold());
    }
    println!("  Created: {}", item.created_at.format("%Y-%m-%d %H:%M:%S"));
    println!("  State: {}", item_state(item));
    if let Some(reason) = &item.flagged_reason {
        println!("  Flagged: {}", reason.yellow());
    }
    println!("\n  {}", truncate_chars(&one_line(&item.body), 400));

    if !files.is_empty() {
        println!("\n  Attachments:");
        for f in files {
            println!(
                "    {} ({}, {} bytes)",
                f.display_name,
                f.mime_type.dimmed(),
                f.payload.len()
            );
        }
    }

    if !thread.is_empty() {
        let total: usize = thread.iter().map(CommentNode::size).sum();
        println!("\n  Comments ({total}):");
        for line in render_thread(thread) {
            println!("    {line}");
        }
    }

    if results.is_empty() {
        println!("\n  No verdicts yet.");
    } else {
        println!("\n  Verdicts (newest first):");
        for r in results {
            println!(
                "    #{} {}  {}",
                r.id,
                r.created_at.format("%Y-%m-%d %H:%M:%S"),
                colorize_flags(r)
            );
        }
    }
}

/// One line per comment, indented two spaces per reply level.
pub fn render_thread(nodes: &[CommentNode]) -> Vec<String> {
    fn walk(nodes: &[CommentNode], depth: usize, out: &mut Vec<String>) {
        for node in nodes {
            let c = &node.comment;
            out.push(format!(
                "{}#{} @{}: {}",
                "  ".repeat(depth),
                c.id,
                c.author_ref,
                truncate_chars(&one_line(&c.body), 100)
            ));
            walk(&node.replies, depth + 1, out);
        }
    }

    let mut lines = Vec::new();
    walk(nodes, 0, &mut lines);
    lines
}

/// Display the outcome of a manual pipeline run.
pub fn display_tick_report(report: &TickReport) {
    println!("\n{}", "=== Pipeline Run ===".bold());
    println!("  {report}");

    for item in &report.items {
        match &item.outcome {
            ItemOutcome::Analyzed { result_id } => {
                println!("  {} item {} -> result {}", "✓".green(), item.item_id, result_id)
            }
            ItemOutcome::Deferred { reason } => println!(
                "  {} item {} deferred: {}",
                "~".yellow(),
                item.item_id,
                reason.dimmed()
            ),
            ItemOutcome::Flagged { reason } => println!(
                "  {} item {} flagged: {}",
                "!".red(),
                item.item_id,
                reason.dimmed()
            ),
            ItemOutcome::NotDispatched => {
                println!("  {} item {} not dispatched", "-".dimmed(), item.item_id)
            }
        }
    }
}
