use crate::request::RequestCtx;
use crate::route::Route;

/// Expand a target or operation template against the current request: the
/// pattern-match pass (`$N`, `$&`, `` $` ``, `$'`) runs first, then the
/// request token pass (`${category:name=default}`).
///
/// A leading unescaped `~` expands to the route prefix, or `/` when the
/// route has none.
pub fn expand_tokens(ctx: &RequestCtx, route: &Route, src: &str) -> String {
    let src = match src.strip_prefix('~') {
        Some(rest) => {
            let prefix = route.prefix.as_deref().unwrap_or("");
            if prefix.is_empty() {
                format!("/{}", rest.trim_start_matches('/'))
            } else {
                format!("{}{}", prefix, rest)
            }
        }
        None => src.to_owned(),
    };

    let expanded = expand_pattern_tokens(&ctx.rx.path_info, &src, &ctx.matches);
    expand_request_tokens(ctx, route, &expanded)
}

/// Replace text using the capture spans of the route pattern match.
pub fn expand_pattern_tokens(
    str_: &str,
    replacement: &str,
    matches: &[Option<(usize, usize)>],
) -> String {
    let mut result = String::with_capacity(replacement.len());
    let chars: Vec<char> = replacement.chars().collect();
    let mut i = 0;

    // Spans index into `str_` by byte; the matcher guarantees they sit on
    // character boundaries.
    let span = |idx: usize| -> &str {
        match matches.get(idx).copied().flatten() {
            Some((s, e)) => &str_[s..e],
            None => "",
        }
    };

    while i < chars.len() {
        if chars[i] != '$' {
            result.push(chars[i]);
            i += 1;
            continue;
        }

        match chars.get(i + 1) {
            Some('$') => {
                result.push('$');
                i += 2;
            }
            Some('&') => {
                // Replace with the matched string
                result.push_str(span(0));
                i += 2;
            }
            Some('`') => {
                // Insert the portion preceding the matched string
                if let Some((start, _)) = matches.first().copied().flatten() {
                    result.push_str(&str_[..start]);
                }
                i += 2;
            }
            Some('\'') => {
                // Insert the portion following the matched string
                if let Some((_, end)) = matches.first().copied().flatten() {
                    result.push_str(&str_[end..]);
                }
                i += 2;
            }
            Some(c) if c.is_ascii_digit() => {
                let mut j = i + 1;
                let mut submatch = 0usize;
                while j < chars.len() && chars[j].is_ascii_digit() {
                    submatch = submatch * 10 + chars[j].to_digit(10).unwrap() as usize;
                    j += 1;
                }
                result.push_str(span(submatch));
                i = j;
            }
            _ => {
                result.push('$');
                i += 1;
            }
        }
    }

    result
}

/// Replace `${category:name=default}` request tokens.
pub fn expand_request_tokens(ctx: &RequestCtx, route: &Route, src: &str) -> String {
    let mut result = String::with_capacity(src.len());
    let mut rest = src;

    while let Some(start) = rest.find("${") {
        result.push_str(&rest[..start]);

        let inner = &rest[start + 2..];
        let end = match inner.find('}') {
            Some(end) => end,
            None => {
                result.push_str(&rest[start..]);
                return result;
            }
        };

        let token = &inner[..end];
        rest = &inner[end + 1..];

        let (key, value) = match token.split_once(':') {
            Some((key, value)) => (key, value),
            None => (token, ""),
        };

        let (field, default_value) = match value.split_once('=') {
            Some((field, default_value)) => (field, default_value),
            None => (value, ""),
        };

        match key {
            "header" => {
                let value = ctx.header(&field.to_ascii_lowercase());
                result.push_str(value.unwrap_or(default_value));
            }
            "param" => {
                result.push_str(ctx.param(field).unwrap_or(default_value));
            }
            "request" => expand_request_field(ctx, route, field, default_value, &mut result),
            "ssl" => {
                // TLS session details live in the transport; only the
                // negotiated state is visible here.
                if field == "state" {
                    result.push_str(if ctx.secure { "secure" } else { "clear" });
                }
            }
            _ => {}
        }
    }

    result.push_str(rest);
    result
}

fn expand_request_field(
    ctx: &RequestCtx,
    route: &Route,
    field: &str,
    default_value: &str,
    result: &mut String,
) {
    match field {
        "authenticated" => result.push_str(if ctx.authenticated { "true" } else { "false" }),
        "clientAddress" => result.push_str(&ctx.peer_addr),
        "error" => result.push_str(ctx.error_msg.as_deref().unwrap_or("")),
        "ext" => {
            if let Some(ext) = ctx.ext() {
                result.push_str(ext);
            }
        }
        "filename" => {
            if let Some(ref filename) = ctx.tx.filename {
                result.push_str(&filename.to_string_lossy());
            }
        }
        "language" => {
            let fallback = if default_value.is_empty() {
                route.default_language.as_deref().unwrap_or("")
            } else {
                default_value
            };
            match ctx.rx.language {
                Some(ref lang) => result.push_str(lang),
                None => result.push_str(fallback),
            }
        }
        "languageDir" => {
            let fallback = if default_value.is_empty() {
                "."
            } else {
                default_value
            };
            match ctx.rx.language_dir {
                Some(ref dir) => result.push_str(dir),
                None => result.push_str(fallback),
            }
        }
        "host" => result.push_str(&ctx.rx.authority),
        "method" => result.push_str(&ctx.rx.method),
        "originalUri" => result.push_str(&ctx.rx.original_uri),
        "pathInfo" => result.push_str(&ctx.rx.path_info),
        "prefix" => result.push_str(route.prefix.as_deref().unwrap_or("")),
        "query" => result.push_str(&ctx.rx.query),
        "reference" => result.push_str(&ctx.rx.reference),
        "scheme" => {
            if !ctx.rx.scheme.is_empty() {
                result.push_str(&ctx.rx.scheme);
            } else {
                result.push_str(if ctx.secure { "https" } else { "http" });
            }
        }
        "scriptName" => result.push_str(&ctx.rx.script_name),
        "serverAddress" => result.push_str(&ctx.rx.authority),
        "uri" => result.push_str(&ctx.rx.uri),
        _ => result.push_str(default_value),
    }
}

/// Expand a route's URI template into an inbound link, resolving `${name}`
/// tokens from the request parameters.
pub fn link(ctx: &RequestCtx, route: &Route) -> String {
    let mut result = String::with_capacity(route.template.len());
    let mut rest = route.template.as_str();

    while let Some(start) = rest.find("${") {
        result.push_str(&rest[..start]);
        let inner = &rest[start + 2..];
        match inner.find('}') {
            Some(end) => {
                result.push_str(ctx.param(&inner[..end]).unwrap_or(""));
                rest = &inner[end + 1..];
            }
            None => {
                result.push_str(&rest[start..]);
                return result;
            }
        }
    }

    result.push_str(rest);
    result
}

/// Escape HTML special characters in a response body.
pub fn escape_html(src: &str) -> String {
    let mut out = String::with_capacity(src.len());
    for c in src.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            c => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn pattern_tokens_substitute_spans() {
        //                0123456789
        let path = "/users/42/profile";
        let matches = vec![Some((0, 17)), Some((7, 9))];

        assert_eq!(expand_pattern_tokens(path, "id=$1", &matches), "id=42");
        assert_eq!(
            expand_pattern_tokens(path, "all=$&", &matches),
            "all=/users/42/profile"
        );
        assert_eq!(expand_pattern_tokens(path, "$$1", &matches), "$1");
        assert_eq!(expand_pattern_tokens(path, "$9", &matches), "");
    }

    #[test]
    fn escape_html_covers_specials() {
        assert_eq!(
            escape_html("<b>\"x\" & 'y'</b>"),
            "&lt;b&gt;&quot;x&quot; &amp; &#x27;y&#x27;&lt;/b&gt;"
        );
    }
}
