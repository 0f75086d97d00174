//! Session summary line and per-kind field histogram.

use std::collections::BTreeMap;
use std::time::Duration;
use unfurl_core::{EngineSnapshot, SessionSummary};

/// Format a Duration as human-readable elapsed time (e.g., "1h 23m 45s").
pub fn format_elapsed_time(duration: Duration) -> String {
    let total_secs = duration.as_secs();
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;

    match (hours, minutes, seconds) {
        (h, m, s) if h > 0 => format!("{}h {}m {}s", h, m, s),
        (_, m, s) if m > 0 => format!("{}m {}s", m, s),
        (_, _, s) if s > 0 => format!("{}s", s),
        _ => format!("{}ms", duration.as_millis()),
    }
}

/// One line for stderr once the session is over.
pub fn summary_line(summary: &SessionSummary) -> String {
    let marker = if summary.is_success() { "✅" } else { "❌" };
    let mut line = format!(
        "{} {} {} | {} fields in {} groups | {} frames, {} parses | {}",
        marker,
        summary.job_id,
        summary.status,
        summary.fields,
        summary.groups,
        summary.stats.frames,
        summary.stats.parses,
        format_elapsed_time(summary.elapsed)
    );
    if let Some(error) = &summary.error {
        line.push_str(&format!(" | {}", error));
    }
    line
}

/// Bar chart of rendered fields per render kind.
pub fn field_histogram(snapshot: &EngineSnapshot) -> String {
    const MAX_BAR_WIDTH: usize = 30;
    const BAR_CHAR: char = '█';

    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for field in snapshot.fields() {
        *counts.entry(field.definition.render_kind.as_str()).or_default() += 1;
    }
    if counts.is_empty() {
        return "   No fields rendered".to_string();
    }

    let max = counts.values().copied().max().unwrap_or(1);
    let width = counts.keys().map(|k| k.len()).max().unwrap_or(0);

    let mut out = String::new();
    for (kind, count) in &counts {
        let bar = BAR_CHAR.to_string().repeat(scale_bar(*count, max, MAX_BAR_WIDTH).max(1));
        out.push_str(&format!("   {:<width$} │{} {}\n", kind, bar, count, width = width));
    }
    out
}

/// Scale a value to a bar length proportional to max.
fn scale_bar(value: usize, max: usize, max_width: usize) -> usize {
    if max == 0 {
        0
    } else {
        ((value as f64 / max as f64) * max_width as f64) as usize
    }
}
