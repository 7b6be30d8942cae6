//! # Output Configuration
//!
//! Controls whether the CLI decorates its output with colours and symbols.
//!
//! The `--color=never|always|auto` flag wins. In `auto` mode, decoration is
//! disabled by `NO_COLOR` (any value), `CLICOLOR=0`, `TERM=dumb` or a
//! non-terminal stdout, and forced on by `CLICOLOR_FORCE=1`.
//!
//! ```rust,ignore
//! use config_repo::output::{marker, Marker, OutputConfig};
//!
//! let out = OutputConfig::from_env_and_flag("auto");
//! println!("{} Merged 3 pipelines", marker(&out, Marker::Ok));
//! ```

use std::env;

use console::style;

/// Output configuration for controlling colours and symbols.
#[derive(Debug, Clone)]
pub struct OutputConfig {
    pub use_color: bool,
}

impl OutputConfig {
    /// Create an output configuration from the environment and the value of
    /// the `--color` flag.
    pub fn from_env_and_flag(color_flag: &str) -> Self {
        let use_color = match color_flag.to_lowercase().as_str() {
            "always" => true,
            "never" => false,
            _ => Self::detect_color_support(),
        };
        Self { use_color }
    }

    fn detect_color_support() -> bool {
        // https://no-color.org/: presence alone disables colour
        if env::var_os("NO_COLOR").is_some() {
            return false;
        }
        if env::var("CLICOLOR").is_ok_and(|v| v == "0") {
            return false;
        }
        if env::var("CLICOLOR_FORCE").is_ok_and(|v| v != "0" && !v.is_empty()) {
            return true;
        }
        if env::var("TERM").is_ok_and(|v| v == "dumb") {
            return false;
        }
        console::Term::stdout().features().colors_supported()
    }

    pub fn plain() -> Self {
        Self { use_color: false }
    }

    #[cfg(test)]
    pub fn with_color() -> Self {
        Self { use_color: true }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self::from_env_and_flag("auto")
    }
}

/// Line prefixes used by the commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Marker {
    Scan,
    Ok,
    Warn,
    Err,
    Info,
}

impl Marker {
    fn symbol(self) -> &'static str {
        match self {
            Marker::Scan => "🔍",
            Marker::Ok => "✅",
            Marker::Warn => "⚠️",
            Marker::Err => "❌",
            Marker::Info => "📊",
        }
    }

    fn text(self) -> &'static str {
        match self {
            Marker::Scan => "[SCAN]",
            Marker::Ok => "[OK]",
            Marker::Warn => "[WARN]",
            Marker::Err => "[ERR]",
            Marker::Info => "[INFO]",
        }
    }
}

/// The prefix for `marker`: a symbol when decorating, plain text otherwise.
pub fn marker(config: &OutputConfig, marker: Marker) -> &'static str {
    if config.use_color {
        marker.symbol()
    } else {
        marker.text()
    }
}

/// Highlight a value such as a pipeline name or revision.
pub fn highlight(config: &OutputConfig, value: &str) -> String {
    if config.use_color {
        style(value).bold().to_string()
    } else {
        value.to_string()
    }
}
