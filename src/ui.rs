//! User interface utilities for the headless operator CLI: progress bars,
//! colored status lines, and simple tabular output. No GUI, theming, or
//! localization lives here — those are out of scope for the core (see §1).

use colored::*;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::time::Duration;

/// Progress bar for a single transfer or publish operation.
pub struct ProgressManager {
    bar: ProgressBar,
}

impl ProgressManager {
    pub fn new_upload(file_size: u64) -> Self {
        let bar = ProgressBar::new(file_size);
        bar.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta})")
                .unwrap()
                .progress_chars("#>-"),
        );
        bar.set_message("Publishing");
        Self { bar }
    }

    pub fn new_download(total_bytes: u64) -> Self {
        let bar = ProgressBar::new(total_bytes);
        bar.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta})")
                .unwrap()
                .progress_chars("#>-"),
        );
        bar.set_message("Downloading");
        Self { bar }
    }

    pub fn set_position(&self, position: u64) {
        self.bar.set_position(position);
    }

    pub fn set_message(&self, message: &str) {
        self.bar.set_message(message.to_string());
    }

    pub fn finish_with_message(&self, message: &str) {
        self.bar.finish_with_message(message.to_string());
    }
}

/// Tracks progress bars for several concurrent sources feeding one transfer.
pub struct MultiOperationProgress {
    multi: MultiProgress,
    operations: Vec<ProgressBar>,
}

impl MultiOperationProgress {
    pub fn new() -> Self {
        Self {
            multi: MultiProgress::new(),
            operations: Vec::new(),
        }
    }

    pub fn add_operation(&mut self, name: &str, total: u64) -> usize {
        let pb = self.multi.add(ProgressBar::new(total));
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} {prefix:.bold.cyan} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
                .unwrap()
                .progress_chars("#>-"),
        );
        pb.set_prefix(name.to_string());
        let index = self.operations.len();
        self.operations.push(pb);
        index
    }

    pub fn update_operation(&self, index: usize, position: u64, message: &str) {
        if let Some(pb) = self.operations.get(index) {
            pb.set_position(position);
            pb.set_message(message.to_string());
        }
    }

    pub fn finish_operation(&self, index: usize, message: &str) {
        if let Some(pb) = self.operations.get(index) {
            pb.finish_with_message(message.to_string());
        }
    }
}

pub fn print_header(title: &str) {
    println!("\n{}", title.bold().cyan());
    println!("{}", "=".repeat(title.len()).cyan());
}

pub fn print_section(title: &str) {
    println!("\n{}", title.bold());
}

pub fn print_operation_status(operation: &str, status: &str, details: Option<&str>) {
    let status_colored = match status {
        "Ready" | "Completed" | "Active" => status.green(),
        "Failed" | "Error" => status.red(),
        _ => status.yellow(),
    };
    match details {
        Some(d) => println!("{}: {} ({})", operation, status_colored, d),
        None => println!("{}: {}", operation, status_colored),
    }
}

pub fn print_key_value(key: &str, value: &str) {
    println!("  {}: {}", key.bold(), value);
}

pub fn print_table(headers: &[&str], rows: &[Vec<String>]) {
    let mut widths: Vec<usize> = headers.iter().map(|h| h.len()).collect();
    for row in rows {
        for (i, cell) in row.iter().enumerate() {
            if i < widths.len() {
                widths[i] = widths[i].max(cell.len());
            }
        }
    }
    let header_line: Vec<String> = headers
        .iter()
        .enumerate()
        .map(|(i, h)| format!("{:width$}", h, width = widths[i]))
        .collect();
    println!("{}", header_line.join("  ").bold());
    println!("{}", "-".repeat(widths.iter().sum::<usize>() + widths.len() * 2));
    for row in rows {
        let line: Vec<String> = row
            .iter()
            .enumerate()
            .map(|(i, c)| format!("{:width$}", c, width = widths.get(i).copied().unwrap_or(0)))
            .collect();
        println!("{}", line.join("  "));
    }
}

pub fn create_spinner(message: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {msg}")
            .unwrap(),
    );
    pb.set_message(message.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

pub fn format_file_size(size: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = size as f64;
    let mut unit_idx = 0;
    while value >= 1024.0 && unit_idx < UNITS.len() - 1 {
        value /= 1024.0;
        unit_idx += 1;
    }
    if unit_idx == 0 {
        format!("{} {}", size, UNITS[0])
    } else {
        format!("{:.2} {}", value, UNITS[unit_idx])
    }
}

pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m{}s", secs / 60, secs % 60)
    } else {
        format!("{}h{}m", secs / 3600, (secs % 3600) / 60)
    }
}

pub fn print_success(message: &str) {
    println!("{} {}", "\u{2713}".green(), message);
}

pub fn print_error(message: &str) {
    eprintln!("{} {}", "\u{2717}".red(), message);
}

pub fn print_warning(message: &str) {
    println!("{} {}", "!".yellow(), message);
}

pub fn print_info(message: &str) {
    println!("{} {}", "i".blue(), message);
}

pub fn print_separator() {
    println!("{}", "-".repeat(60));
}
