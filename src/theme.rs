//! Color theming for terminal output.
//!
//! Colors can be disabled globally with `--no-color` or the `NO_COLOR`
//! environment variable; every helper here then returns unstyled output.

use std::sync::atomic::{AtomicBool, Ordering};

static COLORS_ENABLED: AtomicBool = AtomicBool::new(true);

/// Disable all colors globally, for both owo_colors text and table cells.
pub fn disable_colors() {
    COLORS_ENABLED.store(false, Ordering::Relaxed);
    owo_colors::set_override(false);
}

pub fn colors_enabled() -> bool {
    COLORS_ENABLED.load(Ordering::Relaxed)
}

/// Semantic color categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Semantic {
    /// The input a row belongs to (APK path, payload)
    Input,
    /// A produced result
    Value,
    /// No result: timed out, crashed or failed
    Missing,
}

/// The comfy_table color for a semantic category, `None` when colors are off.
pub fn table_color(semantic: Semantic) -> Option<comfy_table::Color> {
    if !colors_enabled() {
        return None;
    }
    Some(match semantic {
        Semantic::Input => comfy_table::Color::Cyan,
        Semantic::Value => comfy_table::Color::Green,
        Semantic::Missing => comfy_table::Color::Red,
    })
}

/// Semantic coloring for comfy_table cells.
pub trait ThemedCell {
    fn themed(self, semantic: Semantic) -> Self;
}

impl ThemedCell for comfy_table::Cell {
    fn themed(self, semantic: Semantic) -> Self {
        match table_color(semantic) {
            Some(color) => self.fg(color),
            None => self,
        }
    }
}

/// Semantic styles for terminal text.
pub trait Themed: std::fmt::Display {
    /// Bold green.
    fn success(&self) -> String {
        if colors_enabled() {
            let text = self.to_string();
            format!(
                "{}",
                owo_colors::OwoColorize::bold(&owo_colors::OwoColorize::green(&text))
            )
        } else {
            self.to_string()
        }
    }

    /// Yellow.
    fn warning(&self) -> String {
        if colors_enabled() {
            let text = self.to_string();
            format!("{}", owo_colors::OwoColorize::yellow(&text))
        } else {
            self.to_string()
        }
    }
}

impl<T: std::fmt::Display + ?Sized> Themed for T {}
