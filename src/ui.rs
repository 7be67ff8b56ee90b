use colored::Colorize;

/// Print an info message
pub fn info(msg: &str) {
    println!("{} {}", "ℹ".blue(), msg);
}

/// Print a success message
pub fn success(msg: &str) {
    println!("{} {}", "✓".green(), msg);
}

/// Print a warning message
pub fn warn(msg: &str) {
    println!("{} {}", "⚠".yellow(), msg);
}

/// Print a dim/muted message
pub fn dim(msg: &str) {
    println!("  {}", msg.dimmed());
}

/// Print a header/title
pub fn header(title: &str) {
    println!();
    println!("{}", title.bold());
    println!("{}", "─".repeat(title.chars().count()).dimmed());
}

/// Print a section header
pub fn section(title: &str) {
    println!();
    println!("{}", title.cyan().bold());
}

/// Print a key-value pair
pub fn kv(key: &str, value: &str) {
    println!("  {}: {}", key.dimmed(), value);
}

/// Key-value rows inside a frame, padded to the widest row
pub fn boxed(title: &str, rows: &[(&str, String)]) {
    for line in boxed_lines(title, rows) {
        println!("{}", line);
    }
}

fn boxed_lines(title: &str, rows: &[(&str, String)]) -> Vec<String> {
    let key_width = rows.iter().map(|(k, _)| k.chars().count()).max().unwrap_or(0);
    let body: Vec<String> = rows
        .iter()
        .map(|(k, v)| format!("{:<key_width$}  {}", k, v))
        .collect();
    let width = body
        .iter()
        .map(|l| l.chars().count())
        .chain(std::iter::once(title.chars().count()))
        .max()
        .unwrap_or(0);

    let mut lines = Vec::with_capacity(body.len() + 4);
    lines.push(format!("┌─{}─┐", "─".repeat(width)));
    lines.push(format!("│ {:<width$} │", title));
    lines.push(format!("├─{}─┤", "─".repeat(width)));
    lines.extend(body.iter().map(|l| format!("│ {:<width$} │", l)));
    lines.push(format!("└─{}─┘", "─".repeat(width)));
    lines
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boxed_rows_are_aligned() {
        let lines = boxed_lines(
            "Credentials",
            &[("User", "demo".to_string()), ("Password", "pa$$!".to_string())],
        );
        assert_eq!(lines.len(), 6);
        assert_eq!(lines[3], "│ User      demo  │");
        assert_eq!(lines[4], "│ Password  pa$$! │");
        let widths: Vec<usize> = lines.iter().map(|l| l.chars().count()).collect();
        assert!(widths.iter().all(|w| *w == widths[0]));
    }
}
