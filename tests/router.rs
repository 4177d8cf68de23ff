use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use http::StatusCode;
use trellis::auth::SESSION_USERNAME;
use trellis::request::{parse_query_params, Handler, RequestCtx, RouteAction};
use trellis::route::{define_route_update, Host, Route, NOT};
use trellis::Error;

/// A handler that records how often it ran.
#[derive(Debug, Default)]
struct TestHandler {
    hits: AtomicUsize,
}

impl Handler for TestHandler {
    fn name(&self) -> &str {
        "test"
    }

    fn handle(&self, ctx: &mut RequestCtx) -> Result<(), Error> {
        self.hits.fetch_add(1, Ordering::SeqCst);
        ctx.format_response("handled");
        Ok(())
    }
}

fn ctx_for(host: &Host, method: &str, uri: &str) -> RequestCtx {
    let mut ctx = RequestCtx::new(host.sessions().clone());
    let (path, query) = match uri.split_once('?') {
        Some((path, query)) => (path, query),
        None => (uri, ""),
    };

    ctx.rx.method = method.to_owned();
    ctx.rx.uri = uri.to_owned();
    ctx.rx.path_info = path.to_owned();
    ctx.rx.original_uri = uri.to_owned();
    ctx.rx.query = query.to_owned();
    ctx.peer_addr = "127.0.0.1".to_owned();
    parse_query_params(query, &mut ctx.params);
    ctx
}

fn simple_host(pattern: &str, target_rule: &str, target: &str) -> (Arc<TestHandler>, Host) {
    let handler = Arc::new(TestHandler::default());
    let mut host = Host::new("example.com", 443);

    let mut route = Route::new();
    route.set_pattern(pattern, 0);
    route.set_target(target_rule, target).unwrap();
    route.set_handler(handler.clone());
    host.add_route(route);

    (handler, host)
}

// A pattern with a constrained named token binds the token as a request
// parameter and expands it into the target.
#[test]
fn named_token_route() {
    let (_, host) = simple_host("^/users/{id=[0-9]+}/profile", "run", "users/${id}");

    let mut ctx = ctx_for(&host, "GET", "/users/42/profile");
    host.dispatch(&mut ctx);

    assert_eq!(ctx.route.as_ref().unwrap().pattern, "^/users/{id=[0-9]+}/profile");
    assert_eq!(ctx.param("id"), Some("42"));
    assert_eq!(ctx.rx.target, "users/42");

    // The constraint rejects non-numeric ids.
    let mut ctx = ctx_for(&host, "GET", "/users/alice/profile");
    host.dispatch(&mut ctx);
    assert_eq!(ctx.tx.status, StatusCode::METHOD_NOT_ALLOWED);
}

// The first route in host order that accepts the request wins.
#[test]
fn first_matching_route_wins() {
    let first = Arc::new(TestHandler::default());
    let second = Arc::new(TestHandler::default());
    let mut host = Host::new("example.com", 443);

    let mut route = Route::new();
    route.set_name("first");
    route.set_pattern("^/shared", 0);
    route.set_handler(first.clone());
    host.add_route(route);

    let mut route = Route::new();
    route.set_name("second");
    route.set_pattern("^/shared", 0);
    route.set_handler(second.clone());
    host.add_route(route);

    let mut ctx = ctx_for(&host, "GET", "/shared/thing");
    host.dispatch(&mut ctx);
    assert_eq!(ctx.route.as_ref().unwrap().name, "first");
}

#[test]
fn methods_gate_routes_with_head_fallback() {
    let (_, host) = {
        let handler = Arc::new(TestHandler::default());
        let mut host = Host::new("example.com", 443);
        let mut route = Route::new();
        route.set_pattern("^/resource", 0);
        route.set_methods("GET");
        route.set_handler(handler.clone());
        host.add_route(route);
        (handler, host)
    };

    let mut ctx = ctx_for(&host, "GET", "/resource");
    host.dispatch(&mut ctx);
    assert!(!ctx.tx.finalized);

    // A HEAD request matches routes permitting GET.
    let mut ctx = ctx_for(&host, "HEAD", "/resource");
    host.dispatch(&mut ctx);
    assert!(!ctx.tx.finalized);

    let mut ctx = ctx_for(&host, "POST", "/resource");
    host.dispatch(&mut ctx);
    assert_eq!(ctx.tx.status, StatusCode::METHOD_NOT_ALLOWED);
}

#[test]
fn not_flag_inverts_the_pattern() {
    let (_, mut host) = simple_host("^/private", "run", "");
    {
        // A second, inverted route that matches everything BUT /private.
        let mut route = Route::new();
        route.set_name("catch");
        route.set_pattern("^/private", NOT);
        route.set_handler(Arc::new(TestHandler::default()));
        host.add_route(route);
    }

    let mut ctx = ctx_for(&host, "GET", "/public/page");
    host.dispatch(&mut ctx);
    assert_eq!(ctx.route.as_ref().unwrap().name, "catch");
    // The inverted match synthesizes a whole-string capture.
    assert_eq!(ctx.matches, vec![Some((0, "/public/page".len()))]);
}

#[test]
fn header_and_param_guards() {
    let handler = Arc::new(TestHandler::default());
    let mut host = Host::new("example.com", 443);

    let mut route = Route::new();
    route.set_pattern("^/api", 0);
    route.add_header_check("x-api-version", "^2\\.", 0).unwrap();
    route.add_param_check("format", "json|xml", 0).unwrap();
    route.set_handler(handler.clone());
    host.add_route(route);

    let mut ctx = ctx_for(&host, "GET", "/api?format=json");
    ctx.rx.headers.insert(
        "x-api-version",
        http::HeaderValue::from_static("2.1"),
    );
    host.dispatch(&mut ctx);
    assert!(ctx.route.is_some());
    assert!(!ctx.tx.finalized);

    let mut ctx = ctx_for(&host, "GET", "/api?format=csv");
    host.dispatch(&mut ctx);
    assert_eq!(ctx.tx.status, StatusCode::METHOD_NOT_ALLOWED);
}

#[test]
fn write_target_escapes_html() {
    let mut host = Host::new("example.com", 443);
    let mut route = Route::new();
    route.set_pattern("^/echo", 0);
    route.set_target("write", "201 \"<b>${param:msg}</b>\"").unwrap();
    host.add_route(route);

    let mut ctx = ctx_for(&host, "GET", "/echo?msg=hi");
    host.dispatch(&mut ctx);

    assert_eq!(ctx.tx.status, StatusCode::CREATED);
    assert_eq!(&ctx.tx.body[..], b"&lt;b&gt;hi&lt;/b&gt;");
    assert!(ctx.tx.finalized);
}

#[test]
fn raw_write_target_does_not_escape() {
    let mut host = Host::new("example.com", 443);
    let mut route = Route::new();
    route.set_pattern("^/echo", 0);
    route.set_target("write", "-r 200 \"<b>ok</b>\"").unwrap();
    host.add_route(route);

    let mut ctx = ctx_for(&host, "GET", "/echo");
    host.dispatch(&mut ctx);
    assert_eq!(&ctx.tx.body[..], b"<b>ok</b>");
}

#[test]
fn redirect_target_expands_the_uri() {
    let mut host = Host::new("example.com", 443);
    let mut route = Route::new();
    route.set_pattern("^/old/{rest}", 0);
    route.set_target("redirect", "301 /new/${rest}").unwrap();
    host.add_route(route);

    let mut ctx = ctx_for(&host, "GET", "/old/page");
    host.dispatch(&mut ctx);

    assert_eq!(ctx.tx.status, StatusCode::MOVED_PERMANENTLY);
    assert_eq!(ctx.tx.headers.get("location").unwrap(), "/new/page");
}

#[test]
fn close_target_aborts() {
    let mut host = Host::new("example.com", 443);
    let mut route = Route::new();
    route.set_pattern("^/kill", 0);
    route.set_target("close", "").unwrap();
    host.add_route(route);

    let mut ctx = ctx_for(&host, "GET", "/kill");
    host.dispatch(&mut ctx);
    assert!(ctx.aborted);
}

#[test]
fn trace_requests_bind_the_pass_handler() {
    let (handler, host) = simple_host("^/any", "run", "");

    let mut ctx = ctx_for(&host, "TRACE", "/any");
    host.dispatch(&mut ctx);
    assert_eq!(ctx.handler.as_ref().unwrap().name(), "pass");
    assert_eq!(handler.hits.load(Ordering::SeqCst), 0);
}

// Mutually rewriting updates must hit the rewrite bound and produce a 500.
#[test]
fn rewrite_loop_is_bounded() {
    define_route_update(
        "flip-a",
        Arc::new(|ctx: &mut RequestCtx, _: &Route, _: &str| {
            ctx.rx.path_info = "/b".to_owned();
            RouteAction::Reroute
        }),
    );
    define_route_update(
        "flip-b",
        Arc::new(|ctx: &mut RequestCtx, _: &Route, _: &str| {
            ctx.rx.path_info = "/a".to_owned();
            RouteAction::Reroute
        }),
    );

    let mut host = Host::new("example.com", 443);

    let mut route = Route::new();
    route.set_pattern("^/a", 0);
    route.add_update("flip-a", "").unwrap();
    host.add_route(route);

    let mut route = Route::new();
    route.set_pattern("^/b", 0);
    route.add_update("flip-b", "").unwrap();
    host.add_route(route);

    let mut ctx = ctx_for(&host, "GET", "/a");
    host.dispatch(&mut ctx);

    assert_eq!(ctx.tx.status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(&ctx.tx.body[..], b"Too many request rewrites");
}

#[test]
fn lang_update_rewrites_once_and_rematches() {
    let handler = Arc::new(TestHandler::default());
    let mut host = Host::new("example.com", 443);

    let mut route = Route::new();
    route.set_pattern("^/docs/", 0);
    route.add_language_suffix("fr", "fr", trellis::route::LangPos::Before);
    route.add_update("lang", "").unwrap();
    route.set_handler(handler.clone());
    host.add_route(route);

    let mut ctx = ctx_for(&host, "GET", "/docs/index.html");
    ctx.rx.headers.insert(
        "accept-language",
        http::HeaderValue::from_static("fr;q=1.0, en;q=0.2"),
    );
    host.dispatch(&mut ctx);

    assert_eq!(ctx.rx.path_info, "/docs/index.fr.html");
    assert_eq!(ctx.rx.language.as_deref(), Some("fr"));
    assert!(ctx.route.is_some());
    assert_ne!(ctx.tx.status, StatusCode::INTERNAL_SERVER_ERROR);
}

#[test]
fn prefix_is_stripped_and_restored() {
    let handler = Arc::new(TestHandler::default());
    let mut host = Host::new("example.com", 443);

    let mut route = Route::new();
    route.set_prefix("/app");
    route.set_pattern("^/app/users/{id}", 0);
    route.set_handler(handler.clone());
    host.add_route(route);

    let mut route = Route::new();
    route.set_name("fallback");
    route.set_pattern("^/other", 0);
    route.set_handler(Arc::new(TestHandler::default()));
    host.add_route(route);

    let mut ctx = ctx_for(&host, "GET", "/app/users/7");
    host.dispatch(&mut ctx);
    // The prefix is stripped from the matched path and recorded.
    assert_eq!(ctx.rx.path_info, "/users/7");
    assert_eq!(ctx.rx.script_name, "/app");
    assert_eq!(ctx.param("id"), Some("7"));
    assert_eq!(ctx.param("prefix"), Some("/app"));

    // A non-matching request under another route keeps its path intact.
    let mut ctx = ctx_for(&host, "GET", "/other/x");
    host.dispatch(&mut ctx);
    assert_eq!(ctx.rx.path_info, "/other/x");
}

#[test]
fn basic_auth_challenges_and_admits() {
    use base64::engine::general_purpose::STANDARD as BASE64;
    use base64::Engine;

    let handler = Arc::new(TestHandler::default());
    let mut host = Host::new("example.com", 443);

    let mut route = Route::new();
    route.set_pattern("^/secret", 0);
    route.auth.set_realm("example.com");
    route.auth.set_type("basic").unwrap();
    let stored = format!("{:x}", md5::compute("alice:example.com:secret"));
    route.auth.add_user("alice", &stored, "staff").unwrap();
    route.add_condition("auth", "", 0).unwrap();
    route.set_handler(handler.clone());
    host.add_route(route);

    // No credentials: a 401 challenge naming the realm.
    let mut ctx = ctx_for(&host, "GET", "/secret");
    host.dispatch(&mut ctx);
    assert_eq!(ctx.tx.status, StatusCode::UNAUTHORIZED);
    assert_eq!(
        ctx.tx.headers.get("www-authenticate").unwrap(),
        "Basic realm=\"example.com\""
    );
    // The pass handler transmits the challenge.
    assert_eq!(ctx.handler.as_ref().unwrap().name(), "pass");

    // Correct credentials: authenticated and dispatched normally.
    let mut ctx = ctx_for(&host, "GET", "/secret");
    let token = BASE64.encode("alice:secret");
    ctx.rx.headers.insert(
        "authorization",
        http::HeaderValue::from_str(&format!("Basic {}", token)).unwrap(),
    );
    host.dispatch(&mut ctx);
    assert!(ctx.authenticated);
    assert_eq!(ctx.username.as_deref(), Some("alice"));
    assert!(!ctx.tx.finalized);

    // The session now carries the login.
    assert_eq!(
        ctx.session_var(SESSION_USERNAME).as_deref(),
        Some("alice")
    );
}

#[test]
fn required_abilities_produce_403() {
    let handler = Arc::new(TestHandler::default());
    let mut host = Host::new("example.com", 443);

    let mut route = Route::new();
    route.set_pattern("^/admin", 0);
    route.auth.set_realm("example.com");
    route.auth.set_type("basic").unwrap();
    route.auth.add_role("admin", "manage edit").unwrap();
    let stored = format!("{:x}", md5::compute("bob:example.com:pw"));
    route.auth.add_user("bob", &stored, "viewer").unwrap();
    route.auth.set_required_abilities("manage");
    route.add_condition("auth", "", 0).unwrap();
    route.set_handler(handler.clone());
    host.add_route(route);

    use base64::engine::general_purpose::STANDARD as BASE64;
    use base64::Engine;

    let mut ctx = ctx_for(&host, "GET", "/admin");
    let token = BASE64.encode("bob:pw");
    ctx.rx.headers.insert(
        "authorization",
        http::HeaderValue::from_str(&format!("Basic {}", token)).unwrap(),
    );
    host.dispatch(&mut ctx);
    assert_eq!(ctx.tx.status, StatusCode::FORBIDDEN);
}

#[test]
fn allow_deny_lists_gate_peers() {
    let handler = Arc::new(TestHandler::default());
    let mut host = Host::new("example.com", 443);

    let mut route = Route::new();
    route.set_pattern("^/internal", 0);
    route.auth.add_deny("10.0.0.66");
    route.add_condition("allowDeny", "", 0).unwrap();
    route.set_handler(handler.clone());
    host.add_route(route);

    let mut ctx = ctx_for(&host, "GET", "/internal");
    ctx.peer_addr = "10.0.0.66".to_owned();
    host.dispatch(&mut ctx);
    assert_eq!(ctx.tx.status, StatusCode::UNAUTHORIZED);

    let mut ctx = ctx_for(&host, "GET", "/internal");
    host.dispatch(&mut ctx);
    assert!(!ctx.tx.finalized);
}

#[test]
fn secure_condition_requires_tls_and_emits_hsts() {
    let handler = Arc::new(TestHandler::default());
    let mut host = Host::new("example.com", 443);

    let mut route = Route::new();
    route.set_pattern("^/bank", 0);
    route.add_condition("secure", "-31536000", 0).unwrap();
    route.set_handler(handler.clone());
    host.add_route(route);

    let mut ctx = ctx_for(&host, "GET", "/bank");
    ctx.secure = true;
    host.dispatch(&mut ctx);
    assert!(ctx.route.is_some());
    assert_eq!(
        ctx.tx.headers.get("strict-transport-security").unwrap(),
        "max-age=31536000; includeSubDomains"
    );

    let mut ctx = ctx_for(&host, "GET", "/bank");
    ctx.secure = false;
    host.dispatch(&mut ctx);
    assert_eq!(ctx.tx.status, StatusCode::METHOD_NOT_ALLOWED);
}

#[test]
fn form_login_flow() {
    let mut host = Host::new("example.com", 443);

    let mut parent = Route::new();
    parent.set_pattern("^/members/", 0);
    parent.auth.set_realm("example.com");
    parent.auth.set_type("form").unwrap();
    let stored = format!("{:x}", md5::compute("alice:example.com:secret"));
    parent.auth.add_user("alice", &stored, "member").unwrap();
    parent.add_condition("auth", "", 0).unwrap();
    parent.set_handler(Arc::new(TestHandler::default()));

    host.set_auth_form(
        &mut parent,
        "/login.html",
        "/login",
        "/logout",
        Some("/members/home"),
    );
    host.add_route(parent);

    // Anonymous access redirects to the login page.
    let mut ctx = ctx_for(&host, "GET", "/members/area");
    host.dispatch(&mut ctx);
    assert_eq!(ctx.tx.status, StatusCode::FOUND);
    assert_eq!(ctx.tx.headers.get("location").unwrap(), "/login.html");

    // Posting valid credentials to the login service logs in and redirects
    // to the configured destination.
    let mut ctx = ctx_for(&host, "POST", "/login");
    ctx.set_param("username", "alice");
    ctx.set_param("password", "secret");
    host.dispatch(&mut ctx);
    let handler = ctx.handler.clone().unwrap();
    handler.handle(&mut ctx).unwrap();

    assert_eq!(ctx.tx.status, StatusCode::FOUND);
    assert_eq!(ctx.tx.headers.get("location").unwrap(), "/members/home");
    let session_id = ctx.session_id.clone().expect("login created a session");

    // The session admits a subsequent request.
    let mut ctx = ctx_for(&host, "GET", "/members/area");
    ctx.session_id = Some(session_id.clone());
    host.dispatch(&mut ctx);
    assert!(ctx.authenticated);
    assert!(!ctx.tx.finalized);

    // Logging out destroys the session.
    let mut ctx = ctx_for(&host, "POST", "/logout");
    ctx.session_id = Some(session_id.clone());
    host.dispatch(&mut ctx);
    let handler = ctx.handler.clone().unwrap();
    handler.handle(&mut ctx).unwrap();
    assert_eq!(ctx.tx.headers.get("location").unwrap(), "/login.html");

    let mut ctx = ctx_for(&host, "GET", "/members/area");
    ctx.session_id = Some(session_id);
    host.dispatch(&mut ctx);
    // Session is gone; back to the login redirect.
    assert_eq!(ctx.tx.status, StatusCode::FOUND);
}

#[test]
fn links_expand_from_the_route_template() {
    let (_, host) = simple_host("^/users/{id=[0-9]+}/profile", "run", "users/${id}");

    let mut ctx = ctx_for(&host, "GET", "/users/42/profile");
    host.dispatch(&mut ctx);

    let route = ctx.route.clone().unwrap();
    assert_eq!(route.template, "/users/${id}/profile");
    assert_eq!(route.link(&ctx), "/users/42/profile");
}

#[test]
fn file_mapping_negotiates_gzip_and_caches() {
    use trellis::route::map_file;

    // Scratch documents directory with a stylesheet and its gzip variant.
    let docs = std::env::temp_dir().join(format!("trellis-router-map-{}", std::process::id()));
    std::fs::create_dir_all(&docs).unwrap();
    std::fs::write(docs.join("style.css"), b"body{}").unwrap();
    std::fs::write(docs.join("style.css.gz"), b"gz").unwrap();

    let handler = Arc::new(TestHandler::default());
    let mut host = Host::new("example.com", 443);

    let mut route = Route::new();
    route.set_pattern("^/assets/{file}", 0);
    route.set_target("run", "${file}").unwrap();
    route.set_dir(&docs);
    route.add_mapping("css", "${1}.gz");
    route.set_handler(handler.clone());
    host.add_route(route);

    // A client without gzip support gets the plain file.
    let mut ctx = ctx_for(&host, "GET", "/assets/style.css");
    host.dispatch(&mut ctx);
    assert_eq!(ctx.rx.target, "style.css");
    let route = ctx.route.clone().unwrap();
    map_file(&mut ctx, &route);
    assert!(ctx
        .tx
        .filename
        .as_ref()
        .unwrap()
        .to_string_lossy()
        .ends_with("style.css"));
    assert!(ctx.tx.headers.get("content-encoding").is_none());
    assert!(ctx.tx.etag.is_some());

    // A gzip-capable client is served the variant, with the encoding
    // header and an etag for the file actually chosen.
    let mut ctx = ctx_for(&host, "GET", "/assets/style.css");
    ctx.rx.headers.insert(
        "accept-encoding",
        http::HeaderValue::from_static("gzip, deflate"),
    );
    host.dispatch(&mut ctx);
    let route = ctx.route.clone().unwrap();
    map_file(&mut ctx, &route);
    let mapped = ctx.tx.filename.clone().unwrap();
    assert!(mapped.to_string_lossy().ends_with("style.css.gz"));
    assert_eq!(ctx.tx.headers.get("content-encoding").unwrap(), "gzip");
    assert!(ctx.tx.etag.as_deref().unwrap().starts_with('"'));

    // The second lookup is served from the route's mapping cache: the
    // variant file can vanish from disk and the mapping still resolves.
    std::fs::remove_file(&mapped).unwrap();
    let mut ctx = ctx_for(&host, "GET", "/assets/style.css");
    ctx.rx.headers.insert(
        "accept-encoding",
        http::HeaderValue::from_static("gzip"),
    );
    host.dispatch(&mut ctx);
    let route = ctx.route.clone().unwrap();
    map_file(&mut ctx, &route);
    assert_eq!(ctx.tx.filename, Some(mapped));

    let _ = std::fs::remove_dir_all(&docs);
}

#[test]
fn start_segment_groups_skip_quickly() {
    // Functional check that group skipping does not change match results.
    let mut host = Host::new("example.com", 443);
    for pattern in ["^/assets/css/", "^/assets/js/", "^/pages/"] {
        let mut route = Route::new();
        route.set_pattern(pattern, 0);
        route.set_handler(Arc::new(TestHandler::default()));
        host.add_route(route);
    }

    let mut ctx = ctx_for(&host, "GET", "/pages/about");
    host.dispatch(&mut ctx);
    assert_eq!(ctx.route.as_ref().unwrap().pattern, "^/pages/");
}
