//! Console printer with ANSI color support.

use std::io::IsTerminal;

/// Available colors for printed output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrinterColor {
    Red,
    Green,
    Yellow,
    Cyan,
    White,
    BoldRed,
    BoldGreen,
    BoldYellow,
    BoldCyan,
    BoldWhite,
}

impl PrinterColor {
    /// ANSI escape code for this color.
    fn ansi_code(&self) -> &'static str {
        match self {
            Self::Red => "\x1b[31m",
            Self::Green => "\x1b[32m",
            Self::Yellow => "\x1b[33m",
            Self::Cyan => "\x1b[36m",
            Self::White => "\x1b[37m",
            Self::BoldRed => "\x1b[1;31m",
            Self::BoldGreen => "\x1b[1;32m",
            Self::BoldYellow => "\x1b[1;33m",
            Self::BoldCyan => "\x1b[1;36m",
            Self::BoldWhite => "\x1b[1;37m",
        }
    }
}

/// ANSI reset code.
const RESET: &str = "\x1b[0m";

/// A piece of colored text.
pub struct ColoredText {
    pub text: String,
    pub color: PrinterColor,
}

impl ColoredText {
    pub fn new(text: impl Into<String>, color: PrinterColor) -> Self {
        Self {
            text: text.into(),
            color,
        }
    }
}

/// Printer for console output; colors are dropped when stdout is not a terminal.
#[derive(Debug, Clone)]
pub struct Printer {
    colors: bool,
}

impl Default for Printer {
    fn default() -> Self {
        Self {
            colors: std::io::stdout().is_terminal(),
        }
    }
}

impl Printer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Printer that never emits escape codes.
    pub fn plain() -> Self {
        Self { colors: false }
    }

    /// Format a message with the specified color.
    pub fn paint(&self, content: &str, color: PrinterColor) -> String {
        if self.colors {
            format!("{}{}{}", color.ansi_code(), content, RESET)
        } else {
            content.to_string()
        }
    }

    /// Print a message with the specified color.
    pub fn print(&self, content: &str, color: PrinterColor) {
        println!("{}", self.paint(content, color));
    }

    /// Print multiple colored text segments on a single line.
    pub fn print_colored(&self, segments: &[ColoredText]) {
        let line: String = segments
            .iter()
            .map(|segment| self.paint(&segment.text, segment.color))
            .collect();
        println!("{}", line);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_printer_has_no_escape_codes() {
        assert_eq!(Printer::plain().paint("PASS", PrinterColor::BoldGreen), "PASS");
    }

    #[test]
    fn test_colored_paint_wraps_in_ansi() {
        let printer = Printer { colors: true };
        assert_eq!(
            printer.paint("FAIL", PrinterColor::BoldRed),
            "\x1b[1;31mFAIL\x1b[0m"
        );
    }
}
