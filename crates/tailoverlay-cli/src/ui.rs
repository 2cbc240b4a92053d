//! UI utilities for TailOverlay CLI.

use std::net::SocketAddr;

const BOX_WIDTH: usize = 33;

/// A formatted box for displaying workspace codes.
pub struct CodeBox<'a> {
    code: &'a str,
    address: Option<SocketAddr>,
}

impl<'a> CodeBox<'a> {
    /// Create a new code box.
    #[must_use]
    pub const fn new(code: &'a str) -> Self {
        Self {
            code,
            address: None,
        }
    }

    /// Add the listening address to the box.
    #[must_use]
    pub const fn with_address(mut self, address: SocketAddr) -> Self {
        self.address = Some(address);
        self
    }

    /// Display the code box to stdout.
    pub fn display(&self) {
        let code_line = format!("Code:  {}", format_code_spaced(self.code));

        println!("  ┌{}┐", "─".repeat(BOX_WIDTH));
        println!("  │{}│", " ".repeat(BOX_WIDTH));
        println!("  │{}│", center_in_box(&code_line, BOX_WIDTH));
        println!("  │{}│", " ".repeat(BOX_WIDTH));

        if let Some(address) = self.address {
            let address_line = format!("Listening on {}", address);
            println!("  │{}│", center_in_box(&address_line, BOX_WIDTH));
            println!("  │{}│", " ".repeat(BOX_WIDTH));
        }

        println!("  └{}┘", "─".repeat(BOX_WIDTH));
    }
}

fn format_code_spaced(code: &str) -> String {
    code.chars()
        .map(|c| c.to_string())
        .collect::<Vec<_>>()
        .join(" ")
}

fn center_in_box(content: &str, width: usize) -> String {
    let content_len = content.chars().count();
    let padding = width.saturating_sub(content_len);
    let left = padding / 2;
    let right = padding - left;
    format!("{}{}{}", " ".repeat(left), content, " ".repeat(right))
}

/// Format a byte count as a human-readable size.
#[allow(clippy::cast_precision_loss)]
pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["KB", "MB", "GB", "TB"];

    if bytes < 1024 {
        return format!("{} B", bytes);
    }

    let mut size = bytes as f64 / 1024.0;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    format!("{:.1} {}", size, UNITS[unit])
}
