//! The request router: pattern based route matching with inherited route
//! trees, conditions, updates, target rules and handler binding.

mod dispatch;
pub mod expand;
mod lang;
mod map;
mod ops;
mod pattern;

pub use self::lang::{Lang, LangPos};
pub use self::map::map_file;
pub use self::ops::{
    define_route_condition, define_route_target, define_route_update, Condition, ConditionKind,
    RouteProc, Target, Update,
};

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::{error, fmt};

use http::StatusCode;
use regex::Regex;

use crate::auth::{Auth, SessionStore};
use crate::request::{Handler, PassHandler, RequestCtx};

/// Route selection restarts at most this many times per request.
pub const MAX_REWRITES: usize = 20;

/// Invert the sense of a pattern or operation.
pub const NOT: u32 = 0x1;
/// Don't HTML-escape the body written by a `write` target.
pub const RAW: u32 = 0x2;

/// Errors reported at route configuration time. An affected route is still
/// constructed but can never match.
#[derive(Debug)]
pub enum RouteError {
    BadArgs(String),
    BadPattern(String),
    UnknownRule(String),
}

impl fmt::Display for RouteError {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            RouteError::BadArgs(ref msg) => write!(fmt, "bad arguments: {}", msg),
            RouteError::BadPattern(ref msg) => write!(fmt, "bad pattern: {}", msg),
            RouteError::UnknownRule(ref name) => write!(fmt, "unknown rule \"{}\"", name),
        }
    }
}

impl error::Error for RouteError {}

/// A header or parameter guard: the named value must (or must not) match.
#[derive(Debug, Clone)]
pub struct Guard {
    pub name: String,
    pub pattern: Regex,
    pub not: bool,
}

/// Per-route limit overrides.
#[derive(Debug, Clone)]
pub struct Limits {
    pub uri_size: usize,
    pub header_size: usize,
    pub body_size: usize,
}

impl Default for Limits {
    fn default() -> Limits {
        Limits {
            uri_size: 1024,
            header_size: 64 * 1024,
            body_size: 16 << 20,
        }
    }
}

/// A description of how to match and dispatch a class of requests.
///
/// Routes are built up mutably, then finalized and added to a [`Host`],
/// after which they are read-only. A route inherited from a parent shares
/// the parent's collection fields until it writes to them.
pub struct Route {
    pub name: String,
    pub pattern: String,
    pub prefix: Option<String>,

    pub(crate) start_with: Option<String>,
    pub(crate) start_segment: Option<String>,
    pub(crate) optimized_pattern: String,
    pub(crate) compiled: Option<Regex>,
    pub(crate) tokens: Arc<Vec<String>>,
    pub template: String,

    pub(crate) methods: Arc<HashSet<String>>,

    pub(crate) handler: Option<Arc<dyn Handler>>,
    pub(crate) handlers: Arc<Vec<Arc<dyn Handler>>>,
    pub(crate) extensions: Arc<HashMap<String, Arc<dyn Handler>>>,

    pub(crate) headers: Arc<Vec<Guard>>,
    pub(crate) param_checks: Arc<Vec<Guard>>,
    pub(crate) conditions: Arc<Vec<Condition>>,
    pub(crate) updates: Arc<Vec<Update>>,

    pub(crate) target_rule: Target,
    pub(crate) target: Option<String>,
    pub response_status: Option<StatusCode>,

    pub auth: Auth,

    pub(crate) vars: Arc<HashMap<String, String>>,

    /// Documents directory.
    pub dir: PathBuf,
    /// Route home, the base for relative configuration paths.
    pub home: PathBuf,

    pub(crate) indicies: Arc<Vec<String>>,
    pub(crate) languages: Arc<HashMap<String, Lang>>,
    pub default_language: Option<String>,

    /// Extension map for content negotiation (e.g. gzip/minified variants).
    pub(crate) map: Arc<HashMap<String, Vec<String>>>,
    /// Cache of file mapping results.
    mappings: Mutex<HashMap<PathBuf, PathBuf>>,

    pub(crate) error_documents: Arc<HashMap<u16, String>>,

    pub limits: Arc<Limits>,

    pub(crate) flags: u32,
    pub(crate) finalized: bool,
}

impl Clone for Route {
    fn clone(&self) -> Route {
        Route {
            name: self.name.clone(),
            pattern: self.pattern.clone(),
            prefix: self.prefix.clone(),
            start_with: self.start_with.clone(),
            start_segment: self.start_segment.clone(),
            optimized_pattern: self.optimized_pattern.clone(),
            compiled: self.compiled.clone(),
            tokens: self.tokens.clone(),
            template: self.template.clone(),
            methods: self.methods.clone(),
            handler: self.handler.clone(),
            handlers: self.handlers.clone(),
            extensions: self.extensions.clone(),
            headers: self.headers.clone(),
            param_checks: self.param_checks.clone(),
            conditions: self.conditions.clone(),
            updates: self.updates.clone(),
            target_rule: self.target_rule.clone(),
            target: self.target.clone(),
            response_status: self.response_status,
            auth: self.auth.clone(),
            vars: self.vars.clone(),
            dir: self.dir.clone(),
            home: self.home.clone(),
            indicies: self.indicies.clone(),
            languages: self.languages.clone(),
            default_language: self.default_language.clone(),
            map: self.map.clone(),
            // The mapping cache is per-route state, not configuration.
            mappings: Mutex::new(HashMap::new()),
            error_documents: self.error_documents.clone(),
            limits: self.limits.clone(),
            flags: self.flags,
            finalized: self.finalized,
        }
    }
}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Route")
            .field("name", &self.name)
            .field("pattern", &self.pattern)
            .field("prefix", &self.prefix)
            .field("methods", &self.methods)
            .field("target_rule", &self.target_rule)
            .field("finalized", &self.finalized)
            .finish()
    }
}

impl Default for Route {
    fn default() -> Route {
        Route::new()
    }
}

impl Route {
    pub fn new() -> Route {
        let mut methods = HashSet::new();
        methods.insert("*".to_owned());

        Route {
            name: String::new(),
            pattern: String::new(),
            prefix: None,
            start_with: None,
            start_segment: None,
            optimized_pattern: String::new(),
            compiled: None,
            tokens: Arc::new(Vec::new()),
            template: String::new(),
            methods: Arc::new(methods),
            handler: None,
            handlers: Arc::new(Vec::new()),
            extensions: Arc::new(HashMap::new()),
            headers: Arc::new(Vec::new()),
            param_checks: Arc::new(Vec::new()),
            conditions: Arc::new(Vec::new()),
            updates: Arc::new(Vec::new()),
            target_rule: Target::Run,
            target: None,
            response_status: None,
            auth: Auth::new(),
            vars: Arc::new(HashMap::new()),
            dir: PathBuf::from("."),
            home: PathBuf::from("."),
            indicies: Arc::new(Vec::new()),
            languages: Arc::new(HashMap::new()),
            default_language: None,
            map: Arc::new(HashMap::new()),
            mappings: Mutex::new(HashMap::new()),
            error_documents: Arc::new(HashMap::new()),
            limits: Arc::new(Limits::default()),
            flags: 0,
            finalized: false,
        }
    }

    /// Create a route inheriting from `parent`.
    ///
    /// All collection fields are shared with the parent and cloned lazily on
    /// first mutation; the child never mutates the parent.
    pub fn inherit(parent: &Route) -> Route {
        let mut route = parent.clone();
        route.finalized = false;
        route.auth = Auth::inherit(&parent.auth);
        route
    }

    // ===== configuration =====

    pub fn set_name(&mut self, name: &str) {
        self.name = name.to_owned();
    }

    /// Set the match pattern. `flags` may carry [`NOT`] to invert the match.
    pub fn set_pattern(&mut self, pattern: &str, flags: u32) {
        self.pattern = pattern.to_owned();
        self.flags |= flags & NOT;
    }

    /// Set the literal path prefix stripped before pattern matching.
    pub fn set_prefix(&mut self, prefix: &str) {
        self.prefix = if prefix.is_empty() {
            None
        } else {
            Some(prefix.to_owned())
        };
    }

    /// Replace the method set. Comma or whitespace separated; `ALL`
    /// normalizes to `*`.
    pub fn set_methods(&mut self, methods: &str) {
        self.methods = Arc::new(HashSet::new());
        self.add_methods(methods);
    }

    pub fn add_methods(&mut self, methods: &str) {
        let set = Arc::make_mut(&mut self.methods);
        for method in split_methods(methods) {
            set.insert(method);
        }
    }

    pub fn remove_methods(&mut self, methods: &str) {
        let set = Arc::make_mut(&mut self.methods);
        for method in split_methods(methods) {
            set.remove(&method);
        }
    }

    pub fn set_dir(&mut self, dir: impl Into<PathBuf>) {
        self.dir = dir.into();
    }

    pub fn set_home(&mut self, home: impl Into<PathBuf>) {
        self.home = home.into();
    }

    /// Pin the handler, bypassing handler selection.
    pub fn set_handler(&mut self, handler: Arc<dyn Handler>) {
        self.handler = Some(handler);
    }

    /// Add a handler. With extensions, it is bound via the extension map;
    /// without, it joins the ordered list tried by match callback.
    pub fn add_handler(&mut self, handler: Arc<dyn Handler>, extensions: &str) {
        if extensions.is_empty() {
            Arc::make_mut(&mut self.handlers).push(handler);
            return;
        }

        let map = Arc::make_mut(&mut self.extensions);
        for ext in extensions.split([',', ' ', '\t']) {
            let ext = ext.trim().trim_start_matches('.');
            map.insert(ext.to_owned(), handler.clone());
        }
    }

    /// Add a named condition. `flags` may carry [`NOT`].
    pub fn add_condition(
        &mut self,
        name: &str,
        details: &str,
        flags: u32,
    ) -> Result<(), RouteError> {
        let condition = Condition::parse(name, details, flags & NOT != 0)?;
        Arc::make_mut(&mut self.conditions).push(condition);
        Ok(())
    }

    /// Add a named update.
    pub fn add_update(&mut self, name: &str, details: &str) -> Result<(), RouteError> {
        let update = Update::parse(name, details)?;
        Arc::make_mut(&mut self.updates).push(update);
        Ok(())
    }

    /// Set the target rule and its details.
    pub fn set_target(&mut self, rule: &str, details: &str) -> Result<(), RouteError> {
        let (target, parsed) = Target::parse(rule, details)?;
        self.target_rule = target;
        if let Some(status) = parsed.status {
            self.response_status = Some(status);
        }
        self.target = parsed.template.filter(|t| !t.is_empty());
        if let Target::Write { raw } = self.target_rule {
            if raw {
                self.flags |= RAW;
            }
        }
        Ok(())
    }

    /// Guard on a request header value.
    pub fn add_header_check(
        &mut self,
        name: &str,
        pattern: &str,
        flags: u32,
    ) -> Result<(), RouteError> {
        let guard = Guard {
            name: name.to_ascii_lowercase(),
            pattern: Regex::new(pattern).map_err(|e| RouteError::BadPattern(e.to_string()))?,
            not: flags & NOT != 0,
        };
        Arc::make_mut(&mut self.headers).push(guard);
        Ok(())
    }

    /// Guard on a request parameter value.
    pub fn add_param_check(
        &mut self,
        name: &str,
        pattern: &str,
        flags: u32,
    ) -> Result<(), RouteError> {
        let guard = Guard {
            name: name.to_owned(),
            pattern: Regex::new(pattern).map_err(|e| RouteError::BadPattern(e.to_string()))?,
            not: flags & NOT != 0,
        };
        Arc::make_mut(&mut self.param_checks).push(guard);
        Ok(())
    }

    pub fn set_var(&mut self, key: &str, value: &str) {
        Arc::make_mut(&mut self.vars).insert(key.to_owned(), value.to_owned());
    }

    pub fn var(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(|v| v.as_str())
    }

    pub fn add_index(&mut self, index: &str) {
        let indicies = Arc::make_mut(&mut self.indicies);
        if !indicies.iter().any(|i| i == index) {
            indicies.push(index.to_owned());
        }
    }

    pub fn add_language_suffix(&mut self, language: &str, suffix: &str, pos: LangPos) {
        Arc::make_mut(&mut self.languages)
            .insert(language.to_owned(), Lang::suffix(suffix, pos));
    }

    pub fn add_language_dir(&mut self, language: &str, path: impl Into<PathBuf>) {
        Arc::make_mut(&mut self.languages).insert(language.to_owned(), Lang::dir(path));
    }

    pub fn set_default_language(&mut self, language: &str) {
        self.default_language = Some(language.to_owned());
    }

    /// Map extensions to alternative extensions for content negotiation,
    /// e.g. `add_mapping("css,js", "${1}.gz, min.${1}")`.
    pub fn add_mapping(&mut self, extensions: &str, mappings: &str) {
        let map = Arc::make_mut(&mut self.map);
        for ext in extensions.split([',', ' ', '\t']) {
            let ext = ext.trim().trim_start_matches('.');
            if ext.is_empty() {
                continue;
            }
            let alternates: Vec<String> = mappings
                .split(',')
                .map(|m| m.trim().replace("${1}", ext))
                .filter(|m| !m.is_empty())
                .collect();
            map.insert(ext.to_owned(), alternates);
        }
    }

    pub fn set_response_status(&mut self, status: StatusCode) {
        self.response_status = Some(status);
    }

    pub fn add_error_document(&mut self, status: u16, url: &str) {
        Arc::make_mut(&mut self.error_documents).insert(status, url.to_owned());
    }

    pub fn lookup_error_document(&self, status: u16) -> Option<&str> {
        self.error_documents.get(&status).map(|u| u.as_str())
    }

    pub fn set_limits(&mut self, limits: Limits) {
        self.limits = Arc::new(limits);
    }

    /// Explicitly override the derived URI template.
    pub fn set_template(&mut self, template: &str) {
        self.template = template.to_owned();
    }

    /// Finalize the route: compile the pattern, derive the template and
    /// rewrite `${token}` references in stored templates to positional
    /// pattern references.
    ///
    /// After this the route must not be mutated.
    pub fn finalize(&mut self) {
        if self.finalized {
            return;
        }

        if !self.pattern.is_empty() {
            let compiled = pattern::compile(&self.pattern, self.prefix.as_deref());

            if self.name.is_empty() {
                self.name = self
                    .pattern
                    .strip_prefix('^')
                    .unwrap_or(&self.pattern)
                    .to_owned();
            }
            if self.template.is_empty() {
                self.template = compiled.template;
            }

            if self.flags & NOT != 0 {
                // An inverted route must see every path; the literal
                // fast-reject would skip exactly the paths it matches.
                self.start_with = None;
                self.start_segment = None;
            } else {
                self.start_with = compiled.start_with;
                self.start_segment = compiled.start_segment;
            }
            self.optimized_pattern = compiled.optimized;
            self.compiled = compiled.regex;
            self.tokens = Arc::new(compiled.tokens);
        } else if self.name.is_empty() {
            self.name = "/".to_owned();
        }

        // Convert {token} references in stored templates now that the token
        // list is known.
        if let Some(target) = self.target.take() {
            self.target = Some(pattern::finalize_replacement(&target, &self.tokens));
        }

        let tokens = self.tokens.clone();
        let updates = Arc::make_mut(&mut self.updates);
        for update in updates.iter_mut() {
            if let Update::Param { value, .. } = update {
                *value = pattern::finalize_replacement(value, &tokens);
            }
        }

        if self.indicies.is_empty() {
            Arc::make_mut(&mut self.indicies).push("index.html".to_owned());
        }

        self.finalized = true;
    }

    pub(crate) fn lookup_mapping(&self, filename: &Path) -> Option<PathBuf> {
        let mappings = self.mappings.lock().unwrap();
        mappings.get(filename).cloned()
    }

    pub(crate) fn cache_mapping(&self, filename: &Path, mapped: &Path) {
        let mut mappings = self.mappings.lock().unwrap();
        mappings.insert(filename.to_owned(), mapped.to_owned());
    }

    /// Expand this route's URI template into a link using the request's
    /// parameters.
    pub fn link(&self, ctx: &RequestCtx) -> String {
        expand::link(ctx, self)
    }
}

fn split_methods(methods: &str) -> impl Iterator<Item = String> + '_ {
    methods
        .split([',', ' ', '\t'])
        .filter(|m| !m.is_empty())
        .map(|m| {
            let method = m.trim().to_ascii_uppercase();
            if method == "ALL" {
                "*".to_owned()
            } else {
                method
            }
        })
}

/// An ordered collection of routes plus the session store and built-in
/// handlers a dispatch needs.
///
/// Routes are matched in insertion order. Consecutive routes sharing a
/// start segment form a group the matcher can skip in one step.
#[derive(Debug)]
pub struct Host {
    pub name: String,
    pub port: u16,

    routes: Vec<Arc<Route>>,
    /// For each route, the index to jump to when its start segment fails.
    next_group: Vec<usize>,

    default_route: Arc<Route>,
    pass_handler: Arc<dyn Handler>,
    sessions: Arc<SessionStore>,
}

impl Host {
    pub fn new(name: &str, port: u16) -> Host {
        let mut default_route = Route::new();
        default_route.set_name("default");
        default_route.finalize();

        Host {
            name: name.to_owned(),
            port,
            routes: Vec::new(),
            next_group: Vec::new(),
            default_route: Arc::new(default_route),
            pass_handler: Arc::new(PassHandler),
            sessions: Arc::new(SessionStore::new()),
        }
    }

    /// Finalize (if needed) and append a route.
    pub fn add_route(&mut self, mut route: Route) -> Arc<Route> {
        if !route.finalized {
            route.finalize();
        }

        // Host variables are available for template expansion.
        let vars = Arc::make_mut(&mut route.vars);
        vars.entry("DOCUMENTS".to_owned())
            .or_insert_with(|| route.dir.to_string_lossy().into_owned());
        vars.entry("ROUTE_HOME".to_owned())
            .or_insert_with(|| route.home.to_string_lossy().into_owned());
        vars.entry("SERVER_NAME".to_owned())
            .or_insert_with(|| self.name.clone());
        vars.entry("SERVER_PORT".to_owned())
            .or_insert_with(|| self.port.to_string());

        let route = Arc::new(route);
        self.routes.push(route.clone());
        self.rebuild_groups();
        route
    }

    /// The one-call route helper: inherit, set pattern/methods/target,
    /// finalize, add.
    pub fn define_route(
        &mut self,
        parent: Option<&Route>,
        name: &str,
        methods: Option<&str>,
        pattern: &str,
        target: &str,
    ) -> Result<Arc<Route>, RouteError> {
        let mut route = match parent {
            Some(parent) => Route::inherit(parent),
            None => Route::new(),
        };

        route.set_name(if name.is_empty() { "/" } else { name });
        route.set_pattern(pattern, 0);
        if let Some(methods) = methods {
            route.set_methods(methods);
        }
        route.set_target("run", target)?;
        route.finalize();

        Ok(self.add_route(route))
    }

    pub fn routes(&self) -> &[Arc<Route>] {
        &self.routes
    }

    pub(crate) fn route_at(&self, index: usize) -> &Arc<Route> {
        &self.routes[index]
    }

    pub(crate) fn route_count(&self) -> usize {
        self.routes.len()
    }

    pub(crate) fn next_group(&self, index: usize) -> usize {
        self.next_group[index]
    }

    pub fn default_route(&self) -> &Arc<Route> {
        &self.default_route
    }

    pub fn pass_handler(&self) -> &Arc<dyn Handler> {
        &self.pass_handler
    }

    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    /// Configure form-based authentication on `parent`, creating
    /// unauthenticated child routes for the login page, the login service
    /// and the logout service.
    ///
    /// A `https:///` prefix on a URI pins the route to TLS via a `secure`
    /// condition.
    pub fn set_auth_form(
        &mut self,
        parent: &mut Route,
        login_page: &str,
        login_service: &str,
        logout_service: &str,
        logged_in_uri: Option<&str>,
    ) {
        use crate::request::ActionHandler;

        parent.auth.login_page = Some(strip_https_prefix(login_page).0.to_owned());
        if let Some(uri) = logged_in_uri {
            parent.auth.logged_in_uri = Some(uri.to_owned());
        }

        let (page, mut secure) = strip_https_prefix(login_page);
        {
            let mut route = Route::inherit(parent);
            route.set_pattern(&format!("^{}$", regex::escape(page)), 0);
            route.auth.clear_type();
            if secure {
                let _ = route.add_condition("secure", "", 0);
            }
            route.finalize();
            self.add_route(route);
        }

        if !login_service.is_empty() {
            let (uri, service_secure) = strip_https_prefix(login_service);
            secure = service_secure;
            let mut route = Route::inherit(parent);
            route.set_pattern(&format!("^{}$", regex::escape(uri)), 0);
            route.set_methods("POST");
            route.set_handler(Arc::new(ActionHandler::new("login", login_service_action)));
            route.auth.clear_type();
            if secure {
                let _ = route.add_condition("secure", "", 0);
            }
            route.finalize();
            self.add_route(route);
        }

        if !logout_service.is_empty() {
            let (uri, service_secure) = strip_https_prefix(logout_service);
            let mut route = Route::inherit(parent);
            route.set_pattern(&format!("^{}$", regex::escape(uri)), 0);
            route.set_methods("POST");
            route.set_handler(Arc::new(ActionHandler::new(
                "logout",
                logout_service_action,
            )));
            route.auth.clear_type();
            if service_secure {
                let _ = route.add_condition("secure", "", 0);
            }
            route.finalize();
            self.add_route(route);
        }
    }

    fn rebuild_groups(&mut self) {
        let n = self.routes.len();
        self.next_group = vec![0; n];

        let mut i = 0;
        while i < n {
            let mut j = i + 1;
            while j < n && self.routes[j].start_segment == self.routes[i].start_segment {
                j += 1;
            }
            for k in i..j {
                self.next_group[k] = j;
            }
            i = j;
        }
    }
}

/// `https:///path` pins a route to TLS; return the bare path and the flag.
fn strip_https_prefix(uri: &str) -> (&str, bool) {
    match uri.strip_prefix("https://") {
        Some(rest) => (rest, true),
        None => (uri, false),
    }
}

/// Form login service action: authenticates the posted credentials and
/// redirects to the saved referrer, the configured logged-in URI, or `/`.
fn login_service_action(ctx: &mut RequestCtx) -> Result<(), crate::Error> {
    let route = ctx.route.clone().expect("action routes are always bound");
    let auth = &route.auth;

    let username = ctx.param("username").unwrap_or("").to_owned();
    let password = ctx.param("password").map(str::to_owned);

    if auth.login(ctx, &username, password.as_deref()) {
        let destination = ctx
            .session_var("referrer")
            .or_else(|| auth.logged_in_uri.clone())
            .unwrap_or_else(|| "/".to_owned());
        ctx.redirect(StatusCode::FOUND, &destination);
    } else {
        let login_page = auth.login_page.clone().unwrap_or_else(|| "/".to_owned());
        ctx.redirect(StatusCode::FOUND, &login_page);
    }

    Ok(())
}

/// Form logout service action: destroys the session and redirects back to
/// the login page.
fn logout_service_action(ctx: &mut RequestCtx) -> Result<(), crate::Error> {
    let route = ctx.route.clone().expect("action routes are always bound");
    let auth = &route.auth;

    auth.logout(ctx);

    let login_page = auth.login_page.clone().unwrap_or_else(|| "/".to_owned());
    ctx.redirect(StatusCode::FOUND, &login_page);
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn methods_normalize() {
        let mut route = Route::new();
        route.set_methods("get, post");
        assert!(route.methods.contains("GET"));
        assert!(route.methods.contains("POST"));
        assert!(!route.methods.contains("*"));

        route.remove_methods("POST");
        assert!(!route.methods.contains("POST"));

        route.set_methods("ALL");
        assert!(route.methods.contains("*"));
    }

    #[test]
    fn error_documents_look_up_by_status() {
        let mut route = Route::new();
        route.add_error_document(404, "/notfound.html");
        assert_eq!(route.lookup_error_document(404), Some("/notfound.html"));
        assert_eq!(route.lookup_error_document(500), None);
    }

    #[test]
    fn finalize_defaults_name_and_indicies() {
        let mut route = Route::new();
        route.set_pattern("^/docs/{file}", 0);
        route.finalize();

        assert_eq!(route.name, "/docs/{file}");
        assert_eq!(&*route.indicies, &["index.html".to_owned()]);
        assert_eq!(&*route.tokens, &["file".to_owned()]);
    }

    #[test]
    fn finalize_rewrites_target_tokens() {
        let mut route = Route::new();
        route.set_pattern("^/users/{id=[0-9]+}/profile", 0);
        route.set_target("run", "users/${id}").unwrap();
        route.finalize();

        assert_eq!(route.target.as_deref(), Some("users/$1"));
    }

    #[test]
    fn inherited_routes_copy_on_write() {
        let mut parent = Route::new();
        parent.set_var("KEY", "parent");
        parent.add_index("home.html");

        let mut child = Route::inherit(&parent);
        child.set_var("KEY", "child");

        assert_eq!(parent.var("KEY"), Some("parent"));
        assert_eq!(child.var("KEY"), Some("child"));
        // Unmutated fields still alias the parent's.
        assert!(Arc::ptr_eq(&parent.indicies, &child.indicies));
    }

    #[test]
    fn group_skip_indexes() {
        let mut host = Host::new("test", 80);

        for pattern in ["^/app/a", "^/app/b", "^/other/c"] {
            let mut route = Route::new();
            route.set_pattern(pattern, 0);
            host.add_route(route);
        }

        // Both /app routes share the segment "/app" and skip to index 2.
        assert_eq!(host.next_group(0), 2);
        assert_eq!(host.next_group(1), 2);
        assert_eq!(host.next_group(2), 3);
    }
}
