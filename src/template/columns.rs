//! Column-name inference from a statement's top-level select list.

/// Infers result column names from the outermost `SELECT ... FROM` list.
///
/// Each top-level item is named by its last `AS` alias, or otherwise by the
/// text after its last `.`. Returns `None` when there is no select list or it
/// contains a wildcard, in which case driver-reported names are used.
pub fn infer_columns(sql: &str) -> Option<Vec<String>> {
    let select = find_top_level_keyword(sql, "select", 0)?;
    let list_start = select + "select".len();
    let list_end = find_top_level_keyword(sql, "from", list_start).unwrap_or(sql.len());

    let list = strip_set_quantifier(&sql[list_start..list_end]);
    let items = split_top_level(list, ',');

    let mut names = Vec::with_capacity(items.len());
    for item in items {
        let item = item.split_whitespace().collect::<Vec<_>>().join(" ");
        if item.is_empty() {
            continue;
        }
        if item == "*" || item.ends_with(".*") {
            return None;
        }
        names.push(column_name(&item));
    }

    if names.is_empty() {
        None
    } else {
        Some(names)
    }
}

/// Byte offset of `keyword` at parenthesis depth zero, outside string literals.
fn find_top_level_keyword(sql: &str, keyword: &str, from: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;

    for (i, c) in sql.char_indices() {
        if in_string {
            if c == '\'' {
                in_string = false;
            }
            continue;
        }
        match c {
            '\'' => in_string = true,
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            _ if depth == 0 && i >= from && is_keyword_at(sql, i, keyword) => return Some(i),
            _ => {}
        }
    }
    None
}

fn is_keyword_at(sql: &str, at: usize, keyword: &str) -> bool {
    let Some(candidate) = sql.get(at..at + keyword.len()) else {
        return false;
    };
    if !candidate.eq_ignore_ascii_case(keyword) {
        return false;
    }
    let before = sql[..at].chars().next_back();
    let after = sql[at + keyword.len()..].chars().next();
    !before.is_some_and(is_ident_char) && !after.is_some_and(is_ident_char)
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

fn strip_set_quantifier(list: &str) -> &str {
    let trimmed = list.trim_start();
    for quantifier in ["distinct", "all"] {
        if is_keyword_at(trimmed, 0, quantifier) {
            return &trimmed[quantifier.len()..];
        }
    }
    list
}

/// Splits on `sep` at depth zero, outside string literals.
fn split_top_level(text: &str, sep: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut in_string = false;
    let mut start = 0;

    for (i, c) in text.char_indices() {
        if in_string {
            if c == '\'' {
                in_string = false;
            }
            continue;
        }
        match c {
            '\'' => in_string = true,
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            c if c == sep && depth == 0 => {
                parts.push(&text[start..i]);
                start = i + c.len_utf8();
            }
            _ => {}
        }
    }
    parts.push(&text[start..]);
    parts
}

fn column_name(item: &str) -> String {
    if let Some(alias) = top_level_alias(item) {
        return unquote(alias);
    }
    let base = match item.rfind('.') {
        Some(dot) => &item[dot + 1..],
        None => item,
    };
    unquote(base)
}

/// Text after the last ` as ` that is not inside parentheses.
fn top_level_alias(item: &str) -> Option<&str> {
    let lower = item.to_ascii_lowercase();
    let mut search_end = lower.len();

    while let Some(pos) = lower[..search_end].rfind(" as ") {
        let depth: i64 = item[..pos]
            .chars()
            .map(|c| match c {
                '(' => 1,
                ')' => -1,
                _ => 0,
            })
            .sum();
        if depth <= 0 {
            return Some(&item[pos + " as ".len()..]);
        }
        search_end = pos;
    }
    None
}

fn unquote(name: &str) -> String {
    name.trim().trim_matches('"').to_string()
}
