//! Terminal output
//!
//! Every command reports through a [`Printer`]. In human mode it writes
//! marked lines (errors and warnings to stderr); in JSON mode status lines
//! become one-line JSON objects and informational lines are dropped, so
//! stdout stays machine-readable.

/// Output format selector
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OutputFormat {
    Human,
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Level {
    Success,
    Error,
    Warn,
    Info,
}

impl Level {
    fn to_stderr(self) -> bool {
        matches!(self, Level::Error | Level::Warn)
    }
}

/// Writes command output in the selected format
#[derive(Debug, Clone, Copy)]
pub struct Printer {
    format: OutputFormat,
    /// Drop informational lines in human mode
    quiet: bool,
}

impl Printer {
    pub fn new(format: OutputFormat, quiet: bool) -> Self {
        Self { format, quiet }
    }

    fn is_json(&self) -> bool {
        self.format == OutputFormat::Json
    }

    /// Text of one status line, `None` when it is suppressed
    fn render(&self, level: Level, message: &str) -> Option<String> {
        match self.format {
            OutputFormat::Human => match level {
                Level::Success => Some(format!("\u{2713} {}", message)),
                Level::Error => Some(format!("\u{2717} Error: {}", message)),
                Level::Warn => Some(format!("\u{26a0} Warning: {}", message)),
                Level::Info if self.quiet => None,
                Level::Info => Some(format!("  {}", message)),
            },
            OutputFormat::Json => match level {
                Level::Success => {
                    Some(serde_json::json!({"success": true, "message": message}).to_string())
                }
                Level::Error => {
                    Some(serde_json::json!({"success": false, "error": message}).to_string())
                }
                Level::Warn => Some(
                    serde_json::json!({"level": "warning", "message": message}).to_string(),
                ),
                Level::Info => None,
            },
        }
    }

    fn emit(&self, level: Level, message: &str) {
        if let Some(line) = self.render(level, message) {
            if level.to_stderr() {
                eprintln!("{}", line);
            } else {
                println!("{}", line);
            }
        }
    }

    pub fn success(&self, message: &str) {
        self.emit(Level::Success, message);
    }

    pub fn error(&self, message: &str) {
        self.emit(Level::Error, message);
    }

    pub fn warn(&self, message: &str) {
        self.emit(Level::Warn, message);
    }

    pub fn info(&self, message: &str) {
        self.emit(Level::Info, message);
    }

    /// Pretty-prints a result document; ignored in human mode
    pub fn json(&self, value: &serde_json::Value) {
        if self.is_json() {
            println!(
                "{}",
                serde_json::to_string_pretty(value).unwrap_or_default()
            );
        }
    }
}

/// "1 file" / "2 files"
pub fn plural(count: usize, noun: &str) -> String {
    if count == 1 {
        format!("{} {}", count, noun)
    } else {
        format!("{} {}s", count, noun)
    }
}

/// Byte count with a binary unit, e.g. `1.5 KiB`
pub fn human_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} B", bytes)
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}
