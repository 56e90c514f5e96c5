//! Minimal terminal rendering for the agent's markdown report.
//!
//! Handles what the reports actually contain: headings, bullet and numbered
//! lists, fenced code, `**bold**` and `` `code` `` spans, and rules.

use colored::*;

/// Render markdown as colored terminal text.
pub fn render(markdown: &str) -> String {
    let mut out = Vec::new();
    let mut in_code = false;

    for line in markdown.lines() {
        let trimmed = line.trim_start();

        if trimmed.starts_with("```") {
            in_code = !in_code;
            continue;
        }
        if in_code {
            out.push(format!("    {}", line.dimmed()));
            continue;
        }

        if let Some(heading) = trimmed.strip_prefix("# ") {
            out.push(heading.trim().cyan().bold().underline().to_string());
        } else if let Some(heading) = trimmed.strip_prefix("## ") {
            out.push(heading.trim().cyan().bold().to_string());
        } else if let Some(heading) = trimmed
            .strip_prefix("### ")
            .or_else(|| trimmed.strip_prefix("#### "))
        {
            out.push(heading.trim().bold().to_string());
        } else if trimmed == "---" || trimmed == "***" {
            out.push("─".repeat(40).dimmed().to_string());
        } else if let Some(item) = trimmed
            .strip_prefix("- ")
            .or_else(|| trimmed.strip_prefix("* "))
        {
            let indent = " ".repeat(line.len() - trimmed.len());
            out.push(format!("{}  • {}", indent, inline(item)));
        } else {
            out.push(inline(line));
        }
    }

    out.join("\n")
}

/// Style `**bold**` and `` `code` `` spans.
fn inline(text: &str) -> String {
    let mut out = String::new();
    let mut rest = text;

    loop {
        let bold = rest.find("**");
        let code = rest.find('`');
        let (start, marker) = match (bold, code) {
            (Some(b), Some(c)) if c < b => (c, "`"),
            (Some(b), _) => (b, "**"),
            (None, Some(c)) => (c, "`"),
            (None, None) => break,
        };

        let after = &rest[start + marker.len()..];
        let Some(end) = after.find(marker) else {
            break;
        };

        out.push_str(&rest[..start]);
        let span = &after[..end];
        if marker == "`" {
            out.push_str(&span.yellow().to_string());
        } else {
            out.push_str(&span.bold().to_string());
        }
        rest = &after[end + marker.len()..];
    }

    out.push_str(rest);
    out
}
