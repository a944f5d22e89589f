//! Statement layout normalization.

const INDENT: &str = "    ";

const CLAUSE_KEYWORDS: &[&str] = &[
    "select", "insert", "update", "delete", "from", "where", "group by", "order by",
];

/// Re-indents a statement so that clause lines sit at the current nesting
/// depth and every other line one level deeper.
///
/// Blank lines are dropped. Depth goes up by one after a line containing `(`
/// and down by one after a line containing `)`; it never drops below zero.
pub fn format_sql(sql: &str) -> String {
    let mut depth = 0usize;
    let mut lines = Vec::new();

    for line in sql.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let level = if starts_with_clause(line) {
            depth
        } else {
            depth + 1
        };
        lines.push(format!("{}{line}", INDENT.repeat(level)));

        if line.contains('(') {
            depth += 1;
        }
        if line.contains(')') {
            depth = depth.saturating_sub(1);
        }
    }

    lines.join("\n")
}

fn starts_with_clause(line: &str) -> bool {
    let lower = line.to_lowercase();
    CLAUSE_KEYWORDS.iter().any(|kw| {
        lower.starts_with(kw)
            && !lower[kw.len()..]
                .chars()
                .next()
                .is_some_and(|c| c.is_alphanumeric() || c == '_')
    })
}
