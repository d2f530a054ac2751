//! Output formatting for clipboard commands.
//!
//! Payloads go to stdout untouched so that piping works naturally
//! (`clipbridge read image/png > out.png`). Status lines for humans go
//! to stderr.

use std::path::Path;

use clipbridge::clipboard::{AvailableTypes, HtmlFragment};

/// Print advertised MIME types, one per line.
pub fn print_types(types: &AvailableTypes) {
    if types.types.is_empty() {
        eprintln!("Clipboard is empty");
        return;
    }
    for mime_type in &types.types {
        println!("{mime_type}");
    }
    if types.contains_filenames {
        eprintln!("(contains file names)");
    }
}

pub fn print_availability(mime_type: &str, available: bool) {
    println!("{}", availability_line(mime_type, available));
}

pub fn print_text(text: &str) {
    if text.is_empty() {
        eprintln!("No text on the clipboard");
        return;
    }
    println!("{text}");
}

/// Markup to stdout, fragment bounds and source URL to stderr.
pub fn print_html(fragment: &HtmlFragment) {
    if fragment.markup.is_empty() {
        eprintln!("No HTML on the clipboard");
        return;
    }
    eprintln!("Fragment: {}..{}", fragment.fragment_start, fragment.fragment_end);
    if let Some(url) = &fragment.src_url {
        eprintln!("Source:   {url}");
    }
    println!("{}", fragment.markup);
}

pub fn print_saved(path: &Path, width: u32, height: u32) {
    eprintln!("Saved {width}x{height} image to {}", path.display());
}

fn availability_line(mime_type: &str, available: bool) -> String {
    format!("{mime_type}: {}", if available { "yes" } else { "no" })
}
