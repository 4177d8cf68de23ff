use regex::Regex;

/// The output of route pattern finalization: the rewritten regex, the
/// fast-reject literals, the extracted token names and the derived URI
/// template.
#[derive(Debug, Default)]
pub struct CompiledPattern {
    /// The pattern with route grammar rewritten into plain regex syntax.
    pub optimized: String,
    /// Compiled form; `None` when compilation failed and the route is inert.
    pub regex: Option<Regex>,
    /// Longest literal prefix of the pattern, for fast rejection.
    pub start_with: Option<String>,
    /// First path segment of `start_with`, the group skip key.
    pub start_segment: Option<String>,
    /// Ordered names of `{token}` capture groups.
    pub tokens: Vec<String>,
    /// URI template for link generation, derived heuristically.
    pub template: String,
}

/// Characters that end the leading literal run of a pattern.
const REGEX_SPECIALS: &[char] = &['^', '$', '*', '+', '?', '.', '(', '|', '{', '[', '\\'];

/// Finalize a route pattern:
///   - Change `\{` and `\~` to literal `{` and `~`
///   - Change `(~ PAT ~)` to `(?:PAT)?`
///   - Extract tokens, changing `{word}` to `([^/]*)` and `{word=PAT}` to
///     `(PAT)`
///   - Strip the route prefix and anchor the result
pub fn compile(pattern: &str, prefix: Option<&str>) -> CompiledPattern {
    let mut out = CompiledPattern {
        template: finalize_template(pattern),
        ..CompiledPattern::default()
    };

    let start_pattern = pattern.strip_prefix('^').unwrap_or(pattern);

    // A simple literal start string to optimize route rejection.
    let literal_len = start_pattern
        .find(REGEX_SPECIALS)
        .unwrap_or(start_pattern.len());
    if literal_len > 0 {
        let start_with = &start_pattern[..literal_len];
        out.start_with = Some(start_with.to_owned());
        out.start_segment = Some(match start_with[1..].find('/') {
            Some(i) => start_with[..i + 1].to_owned(),
            None => start_with.to_owned(),
        });
    }

    // The prefix is stripped before matching, so remove it from the front
    // of the compiled pattern.
    let start_pattern = match prefix {
        Some(prefix) if start_pattern.starts_with(prefix) => &start_pattern[prefix.len()..],
        _ => start_pattern,
    };

    let mut rewritten = String::with_capacity(start_pattern.len() + 8);
    rewritten.push('^');

    let chars: Vec<char> = start_pattern.chars().collect();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            '(' if chars.get(i + 1) == Some(&'~') => {
                // Alias for an optional, non-capturing group.
                rewritten.push_str("(?:");
                i += 2;
            }
            '~' if chars.get(i + 1) == Some(&')') => {
                rewritten.push_str(")?");
                i += 2;
            }
            '\\' if chars.get(i + 1) == Some(&'{') => {
                // Keep the escape; a bare `{` is not valid regex syntax.
                rewritten.push_str("\\{");
                i += 2;
            }
            '\\' if chars.get(i + 1) == Some(&'~') => {
                rewritten.push('~');
                i += 2;
            }
            '{' => {
                match chars[i..].iter().position(|&c| c == '}') {
                    Some(rel) => {
                        let token: String = chars[i + 1..i + rel].iter().collect();
                        match token.split_once('=') {
                            Some((name, field)) => {
                                rewritten.push('(');
                                rewritten.push_str(field);
                                rewritten.push(')');
                                out.tokens.push(name.to_owned());
                            }
                            None => {
                                rewritten.push_str("([^/]*)");
                                out.tokens.push(token);
                            }
                        }
                        i += rel + 1;
                    }
                    None => {
                        rewritten.push(c);
                        i += 1;
                    }
                }
            }
            c => {
                rewritten.push(c);
                i += 1;
            }
        }
    }

    match Regex::new(&rewritten) {
        Ok(regex) => out.regex = Some(regex),
        Err(e) => {
            tracing::error!("cannot compile route pattern \"{}\": {}", rewritten, e);
        }
    }
    out.optimized = rewritten;

    out
}

/// Convert a route pattern into a usable template to construct URI links.
///
/// This is heuristic and not perfect; users can override the template
/// explicitly.
fn finalize_template(pattern: &str) -> String {
    let mut buf = String::new();
    let chars: Vec<char> = pattern.chars().collect();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            '^' if i == 0 => {}
            '$' if i + 1 == chars.len() => {}
            '+' | '?' | '|' | '[' | ']' | '*' | '.' | ')' => {}
            '(' => {
                if chars.get(i + 1) == Some(&'~') {
                    i += 1;
                }
            }
            '~' => {
                if chars.get(i + 1) == Some(&')') {
                    i += 1;
                } else {
                    buf.push('~');
                }
            }
            '\\' => {
                if let Some(&next) = chars.get(i + 1) {
                    buf.push(next);
                    i += 1;
                }
            }
            '{' => {
                buf.push('$');
                buf.push('{');
                i += 1;
                while i < chars.len() && chars[i] != '}' {
                    if chars[i] == '=' {
                        while i + 1 < chars.len() && chars[i] != '}' {
                            i += 1;
                        }
                        break;
                    }
                    buf.push(chars[i]);
                    i += 1;
                }
                buf.push('}');
            }
            c => buf.push(c),
        }
        i += 1;
    }

    if buf.ends_with('/') {
        buf.pop();
    }

    if buf.is_empty() {
        "/".to_owned()
    } else {
        buf
    }
}

/// Prepare a replacement string: rewrite `${token}` and `$token` references
/// into positional `$N` pattern references, leaving `$&`-style specials and
/// request tokens (`${category:...}`) alone.
///
/// Request tokens get an extra `$` so they survive the pattern expansion
/// pass untouched.
pub fn finalize_replacement(src: &str, tokens: &[String]) -> String {
    let mut buf = String::with_capacity(src.len());
    let chars: Vec<char> = src.chars().collect();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];

        if c == '\\' {
            match chars.get(i + 1) {
                Some('r') => {
                    buf.push('\r');
                    i += 2;
                }
                Some('n') => {
                    buf.push('\n');
                    i += 2;
                }
                Some('$') => {
                    buf.push('\\');
                    buf.push('$');
                    i += 2;
                }
                _ => {
                    buf.push(c);
                    i += 1;
                }
            }
            continue;
        }

        if c != '$' {
            buf.push(c);
            i += 1;
            continue;
        }

        let braced = chars.get(i + 1) == Some(&'{');
        let start = if braced { i + 2 } else { i + 1 };

        match chars.get(start) {
            Some(&special @ ('&' | '\'' | '`' | '$')) => {
                buf.push('$');
                buf.push(special);
                i = start + 1;
                if braced && chars.get(i) == Some(&'}') {
                    i += 1;
                }
                continue;
            }
            _ => {}
        }

        let end = if braced {
            let mut j = start;
            while j < chars.len() && chars[j] != '}' {
                j += 1;
            }
            j
        } else {
            let mut j = start;
            while j < chars.len() && chars[j].is_ascii_digit() {
                j += 1;
            }
            j
        };

        let token: String = chars[start..end].iter().collect();

        if token.contains(':') {
            // A request token. Double the dollar so it passes through the
            // pattern expansion pass intact.
            buf.push_str("$${");
            buf.push_str(&token);
            buf.push('}');
        } else if let Some(pos) = tokens.iter().position(|t| *t == token) {
            buf.push('$');
            buf.push_str(&(pos + 1).to_string());
        } else if !token.is_empty() && token.chars().all(|c| c.is_ascii_digit()) {
            buf.push('$');
            buf.push_str(&token);
        } else {
            tracing::error!("cannot find token \"{}\" in route pattern", token);
        }

        i = end;
        if braced && chars.get(i) == Some(&'}') {
            i += 1;
        }
    }

    buf
}
