// ============================================================================
// src/ui.rs – Operator-facing console output for the CLI subcommands
// ============================================================================

use console::Style;

/// Styled console output. Diagnostics of the daemon itself go through tracing.
#[derive(Debug, Clone, Copy, Default)]
pub struct UX {
    pub quiet: bool,
}

impl UX {
    pub fn new(quiet: bool) -> Self {
        Self { quiet }
    }

    pub fn phase(&self, title: &str) {
        if self.quiet {
            return;
        }
        let style = Style::new().color256(39).bold();
        println!("{}", style.apply_to(format!("── {title} ──")));
    }

    pub fn info(&self, msg: &str) {
        if !self.quiet {
            println!("{}", Style::new().white().apply_to(msg));
        }
    }

    pub fn success(&self, msg: &str) {
        if !self.quiet {
            println!("{}", Style::new().green().bold().apply_to(msg));
        }
    }

    pub fn warn(&self, msg: &str) {
        eprintln!("{}", Style::new().yellow().bold().apply_to(msg));
    }

    pub fn error(&self, msg: &str) {
        eprintln!("{}", Style::new().red().bold().apply_to(msg));
    }
}
