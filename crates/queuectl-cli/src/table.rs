//! A small fixed-width table renderer for terminal output. No external
//! crate in the retrieved corpus reaches for a table-formatting dependency
//! for this kind of CLI, so this is hand-rolled — grounded in spirit, if not
//! in code, by the original's `tabulate(..., tablefmt='grid')` calls.

pub fn render(headers: &[&str], rows: &[Vec<String>]) -> String {
    let mut widths: Vec<usize> = headers.iter().map(|h| h.len()).collect();
    for row in rows {
        for (i, cell) in row.iter().enumerate() {
            widths[i] = widths[i].max(cell.len());
        }
    }

    let mut out = String::new();
    out.push_str(&render_row(headers, &widths));
    out.push_str(&render_separator(&widths));
    for row in rows {
        let cells: Vec<&str> = row.iter().map(|s| s.as_str()).collect();
        out.push_str(&render_row(&cells, &widths));
    }
    out
}

fn render_row(cells: &[&str], widths: &[usize]) -> String {
    let padded: Vec<String> = cells
        .iter()
        .zip(widths)
        .map(|(c, w)| format!("{:<width$}", c, width = w))
        .collect();
    format!("{}\n", padded.join("  "))
}

fn render_separator(widths: &[usize]) -> String {
    let dashes: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();
    format!("{}\n", dashes.join("  "))
}

/// Truncates `s` to `max_len`, appending `...` when truncated — mirrors the
/// original's `command[:37] + "..."` style truncation for long columns.
/// Cuts on a char boundary since commands are arbitrary, possibly
/// multibyte-UTF-8, strings.
pub fn truncate(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        return s.to_string();
    }
    let mut end = max_len.saturating_sub(3).min(s.len());
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &s[..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_leaves_short_strings_untouched() {
        assert_eq!(truncate("echo hi", 40), "echo hi");
    }

    #[test]
    fn truncate_cuts_long_strings_with_ellipsis() {
        let long = "a".repeat(50);
        let out = truncate(&long, 10);
        assert_eq!(out, format!("{}...", "a".repeat(7)));
    }

    #[test]
    fn truncate_does_not_panic_on_multibyte_boundary() {
        // Each 'é' is 2 bytes; a naive byte slice at an odd offset would
        // split one in half and panic.
        let command = "echo ".to_string() + &"é".repeat(40);
        let out = truncate(&command, 37);
        assert!(out.ends_with("..."));
        assert!(out.is_char_boundary(out.len() - 3));
    }
}
