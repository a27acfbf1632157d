use anstyle::{AnsiColor, Color, Style};

pub const HEADER: Style = Style::new()
    .fg_color(Some(Color::Ansi(AnsiColor::Green)))
    .bold();

pub const USAGE: Style = Style::new()
    .fg_color(Some(Color::Ansi(AnsiColor::Green)))
    .bold();

pub const LITERAL: Style = Style::new().fg_color(Some(Color::Ansi(AnsiColor::Cyan)));

/// Steps and capabilities that will not run.
pub const SKIPPED: Style = Style::new()
    .fg_color(Some(Color::Ansi(AnsiColor::White)))
    .dimmed();

pub const ACTIVE: Style = Style::new().fg_color(Some(Color::Ansi(AnsiColor::Green)));

pub fn get_clap_styles() -> clap::builder::Styles {
    clap::builder::Styles::styled()
        .header(HEADER)
        .usage(USAGE)
        .literal(LITERAL)
        .placeholder(LITERAL)
}

/// Wraps `text` in `style` when colour output is enabled.
pub fn paint(style: Style, text: &str, color: bool) -> String {
    if color {
        format!("{}{}{}", style.render(), text, style.render_reset())
    } else {
        text.to_string()
    }
}
