// ============================================================================
// src/ui.rs – Operator-facing console output
// ============================================================================

use console::{Style, Term};

pub const BANNER_BODY_WIDTH: usize = 60;

/// Console presenter. Progress goes to stdout and can be silenced with
/// `quiet`; warnings and errors always go to stderr.
#[derive(Clone, Debug)]
pub struct UX {
    pub quiet: bool,
    out: Term,
    err: Term,
}

impl UX {
    pub fn new(quiet: bool) -> Self {
        Self {
            quiet,
            out: Term::stdout(),
            err: Term::stderr(),
        }
    }

    pub fn banner(&self) {
        if self.quiet {
            return;
        }
        let frame = Style::new().color256(39).bold();
        let span = "═".repeat(BANNER_BODY_WIDTH);
        let title = format!("{:^width$}", "VOL IMAGER // volume → image", width = BANNER_BODY_WIDTH);
        self.line(&frame.apply_to(format!("╔{span}╗")).to_string());
        self.line(&frame.apply_to(format!("║{title}║")).to_string());
        self.line(&frame.apply_to(format!("╚{span}╝")).to_string());
    }

    pub fn phase(&self, title: &str) {
        if self.quiet {
            return;
        }
        let style = Style::new().white().bold();
        self.line("");
        self.line(&style.apply_to(format!("▸ {title}")).to_string());
    }

    pub fn info(&self, msg: &str) {
        if !self.quiet {
            self.line(&format!("  {msg}"));
        }
    }

    pub fn note(&self, msg: &str) {
        if !self.quiet {
            self.line(&Style::new().dim().apply_to(format!("  · {msg}")).to_string());
        }
    }

    pub fn success(&self, msg: &str) {
        if !self.quiet {
            self.line(&Style::new().green().bold().apply_to(format!("✔ {msg}")).to_string());
        }
    }

    pub fn warn(&self, msg: &str) {
        let _ = self
            .err
            .write_line(&Style::new().yellow().bold().apply_to(format!("⚠ {msg}")).to_string());
    }

    pub fn error(&self, msg: &str) {
        let _ = self
            .err
            .write_line(&Style::new().red().bold().apply_to(format!("✖ {msg}")).to_string());
    }

    /// Two-column key/value panel.
    pub fn data_panel(&self, title: &str, rows: &[(&str, String)]) {
        if self.quiet {
            return;
        }
        let key_width = rows.iter().map(|(k, _)| k.len()).max().unwrap_or(0);
        let head = Style::new().cyan().bold();
        self.line(&head.apply_to(format!("┌─ {title}")).to_string());
        for (key, value) in rows {
            self.line(&format!("│ {key:<key_width$}  {value}"));
        }
        self.line(&head.apply_to("└─").to_string());
    }

    fn line(&self, text: &str) {
        let _ = self.out.write_line(text);
    }
}
