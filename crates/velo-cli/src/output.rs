//! Coloured status output for the driver.

use std::io::Write;
use termcolor::{Color, ColorChoice, ColorSpec, StandardStream, WriteColor};

pub fn success(message: &str) {
    let mut stream = StandardStream::stderr(ColorChoice::Auto);
    let _ = stream.set_color(ColorSpec::new().set_fg(Some(Color::Green)).set_bold(true));
    let _ = write!(stream, "  compiled ");
    let _ = stream.reset();
    let _ = writeln!(stream, "{message}");
}

pub fn error(message: &str) {
    let mut stream = StandardStream::stderr(ColorChoice::Auto);
    let _ = stream.set_color(ColorSpec::new().set_fg(Some(Color::Red)).set_bold(true));
    let _ = write!(stream, "error: ");
    let _ = stream.reset();
    let _ = writeln!(stream, "{message}");
}
