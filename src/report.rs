use crate::alerts::Alert;
use crate::collectors::MetricsSnapshot;
use std::fmt::Write;
use teloxide::utils::html::escape;

const MAX_MOUNT_WIDTH: usize = 24;
const HEADER: [&str; 4] = ["Mount", "Use", "St", "Used/Total"];

pub fn format_metrics_html(snapshot: &MetricsSnapshot) -> String {
    let mut out = format!(
        "<b>System Monitor</b>\n<i>{}</i>\n<pre>\n",
        escape(&snapshot.hostname)
    );
    let _ = writeln!(
        out,
        "CPU  {:.1}% {}",
        snapshot.cpu_percent,
        status_marker(snapshot.cpu_percent)
    );
    let _ = writeln!(
        out,
        "MEM  {:.1}% {}",
        snapshot.mem_percent,
        status_marker(snapshot.mem_percent)
    );

    if snapshot.disks.is_empty() {
        out.push_str("Disk\nnone\n</pre>");
        return out;
    }

    let rows: Vec<[String; 4]> = snapshot
        .disks
        .iter()
        .map(|d| {
            [
                truncate_mount(&d.mountpoint, MAX_MOUNT_WIDTH),
                format!("{:.1}%", d.used_percent),
                status_marker(d.used_percent).to_string(),
                format!(
                    "{:.1}/{:.1}GiB",
                    bytes_to_gib(d.used_bytes),
                    bytes_to_gib(d.total_bytes)
                ),
            ]
        })
        .collect();

    let mut widths = HEADER.map(char_len);
    for row in &rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(char_len(cell));
        }
    }

    out.push_str("\nDisk\n");
    out.push_str(&border(&widths, '┌', '┬', '┐'));
    out.push_str(&table_row(&widths, &HEADER.map(str::to_string)));
    out.push_str(&border(&widths, '├', '┼', '┤'));
    for (i, row) in rows.iter().enumerate() {
        out.push_str(&table_row(&widths, row));
        if i + 1 < rows.len() {
            out.push_str(&border(&widths, '├', '┼', '┤'));
        }
    }
    out.push_str(border(&widths, '└', '┴', '┘').trim_end());
    out.push_str("</pre>");
    out
}

pub fn format_alert_html(hostname: &str, alerts: &[Alert]) -> String {
    let mut out = format!("<b>🚨 ALERT</b> {}", escape(hostname));
    if alerts.is_empty() {
        return out;
    }
    let lines = alerts
        .iter()
        .map(|a| a.to_string())
        .collect::<Vec<_>>()
        .join("\n");
    let _ = write!(out, "\n<pre>\n{}\n</pre>", escape(&lines));
    out
}

fn status_marker(percent: f64) -> &'static str {
    if percent >= 90.0 {
        "🟥"
    } else if percent >= 75.0 {
        "🟨"
    } else {
        "🟩"
    }
}

fn truncate_mount(mount: &str, width: usize) -> String {
    if char_len(mount) <= width {
        return mount.to_string();
    }
    if width <= 3 {
        return mount.chars().take(width).collect();
    }
    let mut out: String = mount.chars().take(width - 1).collect();
    out.push('…');
    out
}

fn border(widths: &[usize; 4], left: char, mid: char, right: char) -> String {
    let segments = widths
        .iter()
        .map(|w| "─".repeat(w + 2))
        .collect::<Vec<_>>()
        .join(&mid.to_string());
    format!("{left}{segments}{right}\n")
}

fn table_row(widths: &[usize; 4], cells: &[String; 4]) -> String {
    format!(
        "│ {} │ {} │ {} │ {} │\n",
        pad_right(&escape(&cells[0]), char_len(&cells[0]), widths[0]),
        pad_left(&cells[1], widths[1]),
        pad_right(&cells[2], char_len(&cells[2]), widths[2]),
        pad_right(&escape(&cells[3]), char_len(&cells[3]), widths[3]),
    )
}

fn pad_right(value: &str, visible: usize, width: usize) -> String {
    format!("{value}{}", " ".repeat(width.saturating_sub(visible)))
}

fn pad_left(value: &str, width: usize) -> String {
    format!("{}{value}", " ".repeat(width.saturating_sub(char_len(value))))
}

fn char_len(value: &str) -> usize {
    value.chars().count()
}

fn bytes_to_gib(bytes: u64) -> f64 {
    bytes as f64 / 1024.0 / 1024.0 / 1024.0
}
