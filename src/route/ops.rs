use std::collections::HashMap;
use std::fs;
use std::process::Command;
use std::sync::{Arc, RwLock};

use http::StatusCode;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::request::{RequestCtx, RouteAction};
use crate::route::expand::{escape_html, expand_tokens};
use crate::route::lang::select_language;
use crate::route::map::map_file;
use crate::route::{Route, RouteError};

/// A user supplied condition, update or target routine.
pub type RouteProc =
    Arc<dyn Fn(&mut RequestCtx, &Route, &str) -> RouteAction + Send + Sync>;

static CONDITIONS: Lazy<RwLock<HashMap<String, RouteProc>>> =
    Lazy::new(|| RwLock::new(HashMap::new()));
static UPDATES: Lazy<RwLock<HashMap<String, RouteProc>>> =
    Lazy::new(|| RwLock::new(HashMap::new()));
static TARGETS: Lazy<RwLock<HashMap<String, RouteProc>>> =
    Lazy::new(|| RwLock::new(HashMap::new()));

/// Register a custom condition rule.
pub fn define_route_condition(name: &str, proc_: RouteProc) {
    CONDITIONS.write().unwrap().insert(name.to_owned(), proc_);
}

/// Register a custom update rule.
pub fn define_route_update(name: &str, proc_: RouteProc) {
    UPDATES.write().unwrap().insert(name.to_owned(), proc_);
}

/// Register a custom target rule.
pub fn define_route_target(name: &str, proc_: RouteProc) {
    TARGETS.write().unwrap().insert(name.to_owned(), proc_);
}

fn lookup(map: &Lazy<RwLock<HashMap<String, RouteProc>>>, name: &str) -> Option<RouteProc> {
    map.read().unwrap().get(name).cloned()
}

/// A route condition with its negation flag.
#[derive(Debug, Clone)]
pub struct Condition {
    pub kind: ConditionKind,
    pub not: bool,
}

#[derive(Clone)]
pub enum ConditionKind {
    /// Evaluate the auth allow/deny peer lists.
    AllowDeny,
    /// Authenticate the user and check required abilities.
    Auth,
    /// Succeeds only when the caller is NOT authenticated; guards the login
    /// page itself.
    Unauthorized,
    /// The expanded path names an existing directory.
    Directory { path: String },
    /// The expanded path names an existing, readable path.
    Exists { path: String },
    /// The expanded value matches the pattern.
    Match { pattern: Regex, value: String },
    /// The connection is TLS; optionally emits an HSTS header.
    Secure { max_age: Option<i64> },
    /// A rule registered with `define_route_condition`.
    Custom { name: String, details: String },
}

impl std::fmt::Debug for ConditionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            ConditionKind::AllowDeny => f.write_str("AllowDeny"),
            ConditionKind::Auth => f.write_str("Auth"),
            ConditionKind::Unauthorized => f.write_str("Unauthorized"),
            ConditionKind::Directory { path } => write!(f, "Directory({})", path),
            ConditionKind::Exists { path } => write!(f, "Exists({})", path),
            ConditionKind::Match { pattern, value } => {
                write!(f, "Match({}, {})", pattern.as_str(), value)
            }
            ConditionKind::Secure { max_age } => write!(f, "Secure({:?})", max_age),
            ConditionKind::Custom { name, .. } => write!(f, "Custom({})", name),
        }
    }
}

impl Condition {
    /// Parse a named condition and its details.
    pub fn parse(name: &str, details: &str, not: bool) -> Result<Condition, RouteError> {
        let kind = match name {
            "allowDeny" => ConditionKind::AllowDeny,
            "auth" => ConditionKind::Auth,
            "unauthorized" => ConditionKind::Unauthorized,
            "directory" => ConditionKind::Directory {
                path: details.trim().to_owned(),
            },
            "exists" => ConditionKind::Exists {
                path: details.trim().to_owned(),
            },
            "match" => {
                let words = split_words(details);
                if words.len() != 2 {
                    return Err(RouteError::BadArgs(format!(
                        "match condition expects PATTERN VALUE, got \"{}\"",
                        details
                    )));
                }
                let pattern = Regex::new(&words[0])
                    .map_err(|e| RouteError::BadPattern(e.to_string()))?;
                ConditionKind::Match {
                    pattern,
                    value: words[1].clone(),
                }
            }
            "secure" => {
                let details = details.trim();
                let max_age = if details.is_empty() {
                    None
                } else {
                    Some(details.parse::<i64>().map_err(|_| {
                        RouteError::BadArgs(format!("bad secure max-age \"{}\"", details))
                    })?)
                };
                ConditionKind::Secure { max_age }
            }
            other => {
                if lookup(&CONDITIONS, other).is_none() {
                    return Err(RouteError::UnknownRule(other.to_owned()));
                }
                ConditionKind::Custom {
                    name: other.to_owned(),
                    details: details.to_owned(),
                }
            }
        };

        Ok(Condition { kind, not })
    }
}

/// A route update.
#[derive(Debug, Clone)]
pub enum Update {
    /// Set a request parameter to the expanded value.
    Param { name: String, value: String },
    /// Run an external command; failure is recorded, never fatal.
    Cmd { command: String },
    /// Negotiate a language and rewrite the path accordingly.
    Lang,
    /// A rule registered with `define_route_update`.
    Custom { name: String, details: String },
}

impl Update {
    pub fn parse(name: &str, details: &str) -> Result<Update, RouteError> {
        match name {
            "param" | "field" => {
                let (field, value) = details
                    .trim()
                    .split_once(char::is_whitespace)
                    .ok_or_else(|| {
                        RouteError::BadArgs(format!(
                            "param update expects NAME VALUE, got \"{}\"",
                            details
                        ))
                    })?;
                Ok(Update::Param {
                    name: field.to_owned(),
                    value: trim_quotes(value.trim()).to_owned(),
                })
            }
            "cmd" => Ok(Update::Cmd {
                command: trim_quotes(details.trim()).to_owned(),
            }),
            "lang" => Ok(Update::Lang),
            other => {
                if lookup(&UPDATES, other).is_none() {
                    return Err(RouteError::UnknownRule(other.to_owned()));
                }
                Ok(Update::Custom {
                    name: other.to_owned(),
                    details: details.to_owned(),
                })
            }
        }
    }
}

/// A route's target rule. The associated template lives on the route.
#[derive(Debug, Clone)]
pub enum Target {
    /// Terminate the request with an abort.
    Close,
    /// Redirect with the route's response status (default 302).
    Redirect,
    /// Template-expand into the request target for handler processing.
    Run,
    /// Write the expanded message as the response body.
    Write { raw: bool },
    /// A rule registered with `define_route_target`.
    Custom { name: String },
}

impl Target {
    /// Parse a target rule, returning the rule and the residual template
    /// details.
    pub fn parse(rule: &str, details: &str) -> Result<(Target, ParsedTarget), RouteError> {
        let mut parsed = ParsedTarget::default();

        let target = match rule {
            "close" => Target::Close,
            "redirect" => {
                let details = details.trim();
                // Details are "STATUS URI" or just "URI".
                let (status, uri) = match details.split_once(char::is_whitespace) {
                    Some((first, rest)) if first.chars().all(|c| c.is_ascii_digit()) => {
                        (first.parse::<u16>().ok(), rest.trim())
                    }
                    _ => match details.parse::<u16>() {
                        Ok(status) => (Some(status), ""),
                        Err(_) => (None, details),
                    },
                };
                parsed.status = status.and_then(|s| StatusCode::from_u16(s).ok());
                parsed.template = Some(uri.to_owned());
                Target::Redirect
            }
            "run" => {
                parsed.template = Some(trim_quotes(details.trim()).to_owned());
                Target::Run
            }
            "write" => {
                let mut rest = details.trim();
                let raw = match rest.strip_prefix("-r") {
                    Some(stripped) => {
                        rest = stripped.trim_start();
                        true
                    }
                    None => false,
                };
                let (status, msg) = rest.split_once(char::is_whitespace).ok_or_else(|| {
                    RouteError::BadArgs(format!(
                        "write target expects [-r] STATUS MSG, got \"{}\"",
                        details
                    ))
                })?;
                parsed.status = status
                    .parse::<u16>()
                    .ok()
                    .and_then(|s| StatusCode::from_u16(s).ok());
                if parsed.status.is_none() {
                    return Err(RouteError::BadArgs(format!(
                        "bad write status \"{}\"",
                        status
                    )));
                }
                parsed.template = Some(trim_quotes(msg.trim()).to_owned());
                Target::Write { raw }
            }
            other => {
                if lookup(&TARGETS, other).is_none() {
                    return Err(RouteError::UnknownRule(other.to_owned()));
                }
                parsed.template = Some(details.to_owned());
                Target::Custom {
                    name: other.to_owned(),
                }
            }
        };

        Ok((target, parsed))
    }
}

/// The pieces parsed out of a target's details.
#[derive(Debug, Default)]
pub struct ParsedTarget {
    pub status: Option<StatusCode>,
    pub template: Option<String>,
}

// ===== condition evaluation =====

/// Run a condition. The caller applies the `not` inversion, so `Reroute`
/// can pass through uninverted.
pub fn test_condition(ctx: &mut RequestCtx, route: &Route, condition: &Condition) -> RouteAction {
    tracing::trace!(
        "test route \"{}\" condition {:?}",
        route.name,
        condition.kind
    );

    match condition.kind {
        ConditionKind::AllowDeny => allow_deny_condition(ctx, route),
        ConditionKind::Auth => auth_condition(ctx, route),
        ConditionKind::Unauthorized => unauthorized_condition(ctx, route),
        ConditionKind::Directory { ref path } => {
            let path = mapped_path(ctx, route, path);
            match fs::metadata(&path) {
                Ok(info) if info.is_dir() => RouteAction::Ok,
                _ => RouteAction::Reject,
            }
        }
        ConditionKind::Exists { ref path } => {
            let path = mapped_path(ctx, route, path);
            if fs::metadata(&path).is_ok() {
                RouteAction::Ok
            } else {
                RouteAction::Reject
            }
        }
        ConditionKind::Match {
            ref pattern,
            ref value,
        } => {
            let value = expand_tokens(ctx, route, value);
            if pattern.is_match(&value) {
                RouteAction::Ok
            } else {
                RouteAction::Reject
            }
        }
        ConditionKind::Secure { max_age } => {
            if let Some(age) = max_age {
                // A negative age means includeSubDomains.
                let header = if age < 0 {
                    format!("max-age={}; includeSubDomains", -age)
                } else {
                    format!("max-age={}", age)
                };
                ctx.add_header("strict-transport-security", &header);
            }
            if ctx.secure {
                RouteAction::Ok
            } else {
                RouteAction::Reject
            }
        }
        ConditionKind::Custom {
            ref name,
            ref details,
        } => match lookup(&CONDITIONS, name) {
            Some(proc_) => proc_(ctx, route, details),
            None => {
                tracing::error!("cannot find route condition rule {}", name);
                RouteAction::Reject
            }
        },
    }
}

/// `exists`/`directory` need `tx.filename` populated while their template
/// expands, then reset.
fn mapped_path(ctx: &mut RequestCtx, route: &Route, template: &str) -> std::path::PathBuf {
    map_file(ctx, route);
    let expanded = expand_tokens(ctx, route, template);
    ctx.tx.filename = None;
    ctx.tx.ext = None;
    route.dir.join(expanded)
}

/// Allow/deny authorization against the peer address.
fn allow_deny_condition(ctx: &mut RequestCtx, route: &Route) -> RouteAction {
    use crate::auth::Order;

    let auth = &route.auth;
    let ip = ctx.peer_addr.clone();

    let in_allow = auth.allow.contains(&ip);
    let in_deny = auth.deny.contains(&ip);

    let allowed = match auth.order {
        // Deny by default: the peer must be allowed and not denied.
        Order::AllowDeny => (auth.allow.is_empty() || in_allow) && !in_deny,
        // Allow by default: a deny entry wins unless the peer is explicitly
        // allowed.
        Order::DenyAllow => in_allow || !in_deny,
    };

    if !allowed {
        ctx.error(
            StatusCode::UNAUTHORIZED,
            &format!("Access denied for this server {}", ip),
        );
    }
    RouteAction::Ok
}

/// Implements all user authentication for routes.
fn auth_condition(ctx: &mut RequestCtx, route: &Route) -> RouteAction {
    let auth = &route.auth;

    if !auth.requires_login() {
        // Authentication not required
        return RouteAction::Ok;
    }

    if !auth.logged_in(ctx) {
        let login_failed = match auth.get_credentials(ctx) {
            Ok((username, password)) => {
                !auth.login(ctx, username.as_deref().unwrap_or(""), password.as_deref())
            }
            Err(e) => {
                ctx.error(
                    StatusCode::BAD_REQUEST,
                    &format!("Access denied. {}.", e),
                );
                true
            }
        };

        if login_failed {
            if !ctx.tx.finalized {
                auth.ask_login(ctx);
            }
            // The request has been denied and a response generated, so it is
            // OK to accept this route.
            return RouteAction::Ok;
        }
    }

    if !auth.can_user(ctx, None) {
        ctx.error(
            StatusCode::FORBIDDEN,
            "Access denied. User is not authorized for access.",
        );
    }
    RouteAction::Ok
}

/// Used for "condition unauthorized": succeeds only for anonymous callers.
fn unauthorized_condition(ctx: &mut RequestCtx, route: &Route) -> RouteAction {
    let auth = &route.auth;

    if !auth.requires_login() {
        return RouteAction::Reject;
    }
    if auth.logged_in(ctx) {
        return RouteAction::Reject;
    }
    if let Ok((Some(username), password)) = auth.get_credentials(ctx) {
        if auth.login(ctx, &username, password.as_deref()) {
            return RouteAction::Reject;
        }
    }
    RouteAction::Ok
}

// ===== update evaluation =====

pub fn run_update(ctx: &mut RequestCtx, route: &Route, update: &Update) -> RouteAction {
    tracing::trace!("run route \"{}\" update {:?}", route.name, update);

    match update {
        Update::Param { name, value } => {
            let value = expand_tokens(ctx, route, value);
            ctx.set_param(name, &value);
            RouteAction::Ok
        }
        Update::Cmd { command } => {
            let command = expand_tokens(ctx, route, command);
            cmd_update(ctx, &command);
            RouteAction::Ok
        }
        Update::Lang => lang_update(ctx, route),
        Update::Custom { name, details } => match lookup(&UPDATES, name) {
            Some(proc_) => proc_(ctx, route, details),
            None => {
                tracing::error!("cannot find route update rule {}", name);
                RouteAction::Ok
            }
        },
    }
}

/// Run an external command. Failures are recorded in the request error
/// field, retrievable via `${request:error}`; the request continues.
fn cmd_update(ctx: &mut RequestCtx, command: &str) {
    let output = Command::new("sh").arg("-c").arg(command).output();

    match output {
        Ok(output) if output.status.success() => {}
        Ok(output) => {
            let msg = format!(
                "Command failed: {}\nStatus: {}\n{}\n{}",
                command,
                output.status.code().unwrap_or(-1),
                String::from_utf8_lossy(&output.stdout),
                String::from_utf8_lossy(&output.stderr),
            );
            tracing::error!("{}", msg);
            ctx.error_msg = Some(msg);
        }
        Err(e) => {
            let msg = format!("Command failed: {}\n{}", command, e);
            tracing::error!("{}", msg);
            ctx.error_msg = Some(msg);
        }
    }
}

/// Negotiate a language from `Accept-Language` and rewrite the path to
/// carry the language suffix. A rewrite restarts route selection.
fn lang_update(ctx: &mut RequestCtx, route: &Route) -> RouteAction {
    use crate::route::lang::LangPos;

    let accept = ctx.header("accept-language").map(str::to_owned);
    let selected = select_language(
        accept.as_deref(),
        &route.languages,
        route.default_language.as_deref(),
    );

    let (tag, lang) = match selected {
        Some(found) => found,
        None => return RouteAction::Ok,
    };

    let suffix = lang.suffix.clone().unwrap_or_else(|| tag.to_owned());
    let lang_dir = lang.path.as_ref().map(|p| p.to_string_lossy().into_owned());
    let pos = lang.pos;

    ctx.rx.language = Some(suffix.clone());
    ctx.rx.language_dir = lang_dir;

    if lang.suffix.is_none() {
        return RouteAction::Ok;
    }

    let path = ctx.rx.path_info.clone();
    let rewritten = match pos {
        LangPos::After => {
            if path.ends_with(&format!(".{}", suffix)) {
                return RouteAction::Ok;
            }
            format!("{}.{}", path, suffix)
        }
        LangPos::Before => match ctx.ext() {
            Some(ext) => {
                let ext = ext.to_owned();
                let stem = &path[..path.len() - ext.len() - 1];
                if stem.ends_with(&format!(".{}", suffix)) {
                    return RouteAction::Ok;
                }
                format!("{}.{}.{}", stem, suffix, ext)
            }
            None => {
                if path.ends_with(&format!(".{}", suffix)) {
                    return RouteAction::Ok;
                }
                format!("{}.{}", path, suffix)
            }
        },
    };

    tracing::debug!("lang update rewrote \"{}\" to \"{}\"", path, rewritten);
    ctx.rx.path_info = rewritten;
    RouteAction::Reroute
}

// ===== target evaluation =====

pub fn run_target(ctx: &mut RequestCtx, route: &Route) -> RouteAction {
    match route.target_rule {
        Target::Close => {
            // Terminate the request with an abort; no response body.
            tracing::debug!("route target \"close\" is closing request");
            ctx.abort();
            RouteAction::Ok
        }
        Target::Redirect => {
            let target = route
                .target
                .as_deref()
                .map(|t| expand_tokens(ctx, route, t))
                .unwrap_or_default();
            let status = route.response_status.unwrap_or(StatusCode::FOUND);
            ctx.redirect(status, &target);
            RouteAction::Ok
        }
        Target::Run => {
            // Recompute the target: updates may have defined parameters that
            // affect the expansion.
            ctx.rx.target = match route.target {
                Some(ref t) => expand_tokens(ctx, route, t),
                None => ctx.rx.path_info.trim_start_matches('/').to_owned(),
            };
            RouteAction::Ok
        }
        Target::Write { raw } => {
            let body = route
                .target
                .as_deref()
                .map(|t| expand_tokens(ctx, route, t))
                .unwrap_or_default();
            let body = if raw { body } else { escape_html(&body) };
            if let Some(status) = route.response_status {
                ctx.set_status(status);
            }
            ctx.format_response(&body);
            RouteAction::Ok
        }
        Target::Custom { ref name } => match lookup(&TARGETS, name) {
            Some(proc_) => {
                let details = route.target.clone().unwrap_or_default();
                proc_(ctx, route, &details)
            }
            None => {
                tracing::error!("cannot find route target rule \"{}\"", name);
                RouteAction::Reject
            }
        },
    }
}

// ===== detail tokenization =====

/// Split a details string into words, honoring double quotes.
pub fn split_words(src: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut quoted = false;

    for c in src.chars() {
        match c {
            '"' => quoted = !quoted,
            c if c.is_whitespace() && !quoted => {
                if !current.is_empty() {
                    words.push(std::mem::take(&mut current));
                }
            }
            c => current.push(c),
        }
    }
    if !current.is_empty() {
        words.push(current);
    }
    words
}

pub fn trim_quotes(src: &str) -> &str {
    let bytes = src.as_bytes();
    if bytes.len() > 2 && bytes[0] == b'"' && bytes[bytes.len() - 1] == b'"' && bytes[1] != b'"' {
        &src[1..src.len() - 1]
    } else {
        src
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn words_split_with_quotes() {
        assert_eq!(
            split_words("match \"a b\" c"),
            vec!["match".to_owned(), "a b".to_owned(), "c".to_owned()]
        );
    }

    #[test]
    fn unknown_rules_are_config_errors() {
        assert!(matches!(
            Condition::parse("no-such-rule", "", false),
            Err(RouteError::UnknownRule(_))
        ));
        assert!(matches!(
            Update::parse("no-such-rule", ""),
            Err(RouteError::UnknownRule(_))
        ));
        assert!(matches!(
            Target::parse("no-such-rule", ""),
            Err(RouteError::UnknownRule(_))
        ));
    }

    #[test]
    fn write_target_parses_flags_and_status() {
        let (target, parsed) = Target::parse("write", "-r 201 \"<b>done</b>\"").unwrap();
        assert!(matches!(target, Target::Write { raw: true }));
        assert_eq!(parsed.status, Some(StatusCode::CREATED));
        assert_eq!(parsed.template.as_deref(), Some("<b>done</b>"));
    }

    #[test]
    fn redirect_target_parses_status_and_uri() {
        let (_, parsed) = Target::parse("redirect", "301 /new/home").unwrap();
        assert_eq!(parsed.status, Some(StatusCode::MOVED_PERMANENTLY));
        assert_eq!(parsed.template.as_deref(), Some("/new/home"));

        let (_, parsed) = Target::parse("redirect", "/just/a/uri").unwrap();
        assert_eq!(parsed.status, None);
        assert_eq!(parsed.template.as_deref(), Some("/just/a/uri"));
    }
}
