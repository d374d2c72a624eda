//! Arithmetic/conditional expression rewriting.
//!
//! Expressions such as `3 + $w * initialWidth` are rewritten into the
//! URL-safe token form `3_add_$w_mul_iw`. The rewrite runs in three passes:
//!
//! 1. operators followed by a space or underscore become their token
//!    ([`OPERATORS`]);
//! 2. predefined variable names become their short code
//!    ([`PREDEFINED_VARS`]); `$user` variables and `:name` references are
//!    copied through untouched;
//! 3. runs of spaces and underscores collapse to a single `_`.

/// Operator token table, longest operators first.
pub const OPERATORS: &[(&str, &str)] = &[
    ("||", "or"),
    (">=", "gte"),
    ("<=", "lte"),
    ("&&", "and"),
    ("!=", "ne"),
    (">", "gt"),
    ("=", "eq"),
    ("<", "lt"),
    ("/", "div"),
    ("-", "sub"),
    ("^", "pow"),
    ("+", "add"),
    ("*", "mul"),
];

/// Predefined variable names and their short codes.
pub const PREDEFINED_VARS: &[(&str, &str)] = &[
    ("aspect_ratio", "ar"),
    ("aspectRatio", "ar"),
    ("context", "ctx"),
    ("current_page", "cp"),
    ("currentPage", "cp"),
    ("current_public_id", "cp_id"),
    ("currentPublicId", "cp_id"),
    ("duration", "du"),
    ("face_count", "fc"),
    ("faceCount", "fc"),
    ("height", "h"),
    ("illustration_score", "ils"),
    ("illustrationScore", "ils"),
    ("initial_aspect_ratio", "iar"),
    ("initialAspectRatio", "iar"),
    ("initial_density", "idn"),
    ("initialDensity", "idn"),
    ("initial_duration", "idu"),
    ("initialDuration", "idu"),
    ("initial_height", "ih"),
    ("initialHeight", "ih"),
    ("initial_width", "iw"),
    ("initialWidth", "iw"),
    ("page_count", "pc"),
    ("pageCount", "pc"),
    ("page_x", "px"),
    ("pageX", "px"),
    ("page_y", "py"),
    ("pageY", "py"),
    ("tags", "tags"),
    ("trimmed_aspect_ratio", "tar"),
    ("trimmedAspectRatio", "tar"),
    ("width", "w"),
];

/// Rewrites an expression into its URL token form.
///
/// Empty strings and `!literal!` strings are returned unchanged.
pub fn normalize_expression(expression: &str) -> String {
    if expression.is_empty() || is_literal(expression) {
        return expression.to_string();
    }
    let replaced = replace_variables(&replace_operators(expression));
    collapse_separators(&replaced)
}

fn is_literal(s: &str) -> bool {
    s.len() > 2 && s.starts_with('!') && s.ends_with('!')
}

fn is_separator(c: char) -> bool {
    c == ' ' || c == '_'
}

fn replace_operators(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    'scan: while let Some(c) = rest.chars().next() {
        for (op, token) in OPERATORS {
            if let Some(after) = rest.strip_prefix(op) {
                if after.chars().next().is_some_and(is_separator) {
                    out.push_str(token);
                    rest = after;
                    continue 'scan;
                }
            }
        }
        out.push(c);
        rest = &rest[c.len_utf8()..];
    }
    out
}

fn replace_variables(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(c) = rest.chars().next() {
        if c == '$' {
            let len = user_variable_len(rest);
            if len > 0 {
                out.push_str(&rest[..len]);
                rest = &rest[len..];
                continue;
            }
        }
        if c == ':' {
            // `:name` references are kept verbatim.
            if let Some((name, _)) = longest_predefined(&rest[1..]) {
                let len = 1 + name.len();
                out.push_str(&rest[..len]);
                rest = &rest[len..];
                continue;
            }
        }
        if let Some((name, short)) = longest_predefined(rest) {
            out.push_str(short);
            rest = &rest[name.len()..];
            continue;
        }
        out.push(c);
        rest = &rest[c.len_utf8()..];
    }
    out
}

/// Length of a `$_*[^_ ]+` user variable at the start of `s`, or 0.
fn user_variable_len(s: &str) -> usize {
    let body = &s[1..];
    let underscores = body.len() - body.trim_start_matches('_').len();
    let name: usize = body[underscores..]
        .chars()
        .take_while(|c| !is_separator(*c))
        .map(char::len_utf8)
        .sum();
    if name == 0 { 0 } else { 1 + underscores + name }
}

fn longest_predefined(s: &str) -> Option<(&'static str, &'static str)> {
    PREDEFINED_VARS
        .iter()
        .filter(|(name, _)| s.starts_with(name))
        .max_by_key(|(name, _)| name.len())
        .copied()
}

fn collapse_separators(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut in_run = false;
    for c in input.chars() {
        if is_separator(c) {
            if !in_run {
                out.push('_');
            }
            in_run = true;
        } else {
            out.push(c);
            in_run = false;
        }
    }
    out
}
