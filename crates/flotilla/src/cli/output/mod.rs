//! Output formatting utilities

use console::{style, Style};

use flotilla_core::diagnostics::{Diagnostic, Severity};

/// Print a success message
pub fn success(message: &str) {
    println!("{} {}", style("✓").green().bold(), message);
}

/// Print an error message
pub fn error(message: &str) {
    eprintln!("{} {}", style("✗").red().bold(), message);
}

/// Print a warning message
pub fn warning(message: &str) {
    println!("{} {}", style("!").yellow().bold(), message);
}

/// Print an info message
pub fn info(message: &str) {
    println!("{} {}", style("→").blue(), message);
}

/// Create a styled header
pub fn header(text: &str) -> String {
    style(text).bold().to_string()
}

/// Create a styled key-value line
pub fn key_value(key: &str, value: &str) -> String {
    format!("  {}: {}", style(key).dim(), value)
}

/// Style for paths
pub fn path_style() -> Style {
    Style::new().cyan()
}

/// Format one diagnostic line, coloured by severity
pub fn diagnostic(diagnostic: &Diagnostic) -> String {
    let marker = match diagnostic.severity {
        Severity::Error => style("✗").red().bold(),
        Severity::Warning => style("!").yellow().bold(),
    };
    format!(
        "    {} {} {}: {}",
        marker,
        style(format!("[{}]", diagnostic.code)).dim(),
        style(&diagnostic.build).bold(),
        diagnostic.message
    )
}
