//! Terminal output for the launcher.
//!
//! Status lines for the person at the terminal. Diagnostics go through
//! `tracing` on stderr instead.

use crossterm::style::Stylize;

#[derive(Debug, Clone, Copy, Default)]
pub struct Output;

#[allow(clippy::unused_self)]
impl Output {
    pub fn new() -> Self {
        Self
    }

    pub fn info(&self, msg: &str) {
        println!("  {} {msg}", "•".cyan());
    }

    pub fn success(&self, msg: &str) {
        println!("  {} {}", "✓".green().bold(), msg.green());
    }

    pub fn warning(&self, msg: &str) {
        eprintln!("  {} {}", "!".yellow().bold(), msg.yellow());
    }

    pub fn error(&self, msg: &str) {
        eprintln!("  {} {}", "✗".red().bold(), msg.red());
    }

    /// Indented follow-up line, e.g. a recovery instruction.
    pub fn hint(&self, msg: &str) {
        eprintln!("    {}", msg.dark_grey());
    }
}
