//! The per-request state shared between the protocol engine, the router and
//! handlers, split into a receive half and a transmit half.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use bytes::BytesMut;
use http::{HeaderMap, Method, Request, StatusCode};

use crate::auth::session::SessionStore;
use crate::route::Route;
use crate::Error;

/// The verdict of a route operation, condition or handler match callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteAction {
    /// Accept and continue.
    Ok,
    /// Reject this route and try the next one.
    Reject,
    /// Restart route selection from the first route.
    Reroute,
}

/// The receive half: everything parsed out of the request.
#[derive(Debug, Default)]
pub struct Rx {
    pub method: String,
    /// Full request URI as received (path and query).
    pub uri: String,
    /// The URI path being matched; rewrites and prefix stripping act here.
    pub path_info: String,
    pub original_uri: String,
    /// Prefix stripped from `path_info` by the matched route.
    pub script_name: String,
    pub query: String,
    pub reference: String,
    pub scheme: String,
    pub authority: String,
    pub headers: HeaderMap,
    pub body: BytesMut,
    pub eof: bool,
    /// The expanded target, input to handler selection and file mapping.
    pub target: String,
    /// Suffix of the language negotiated by the `lang` update.
    pub language: Option<String>,
    /// Directory of the negotiated language, when one is mapped.
    pub language_dir: Option<String>,
    /// Expected digest-auth fields parsed from `Authorization`.
    pub digest: Option<DigestParams>,
}

/// The transmit half: the response under construction.
#[derive(Debug)]
pub struct Tx {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: BytesMut,
    pub filename: Option<PathBuf>,
    pub ext: Option<String>,
    pub etag: Option<String>,
    pub finalized: bool,
}

impl Default for Tx {
    fn default() -> Tx {
        Tx {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            body: BytesMut::new(),
            filename: None,
            ext: None,
            etag: None,
            finalized: false,
        }
    }
}

/// Fields of a `Digest` Authorization header needed for verification.
#[derive(Debug, Clone, Default)]
pub struct DigestParams {
    pub username: String,
    pub realm: String,
    pub nonce: String,
    pub nc: String,
    pub cnonce: String,
    pub qop: String,
    pub uri: String,
    pub response: String,
}

/// All the state of one request: receive and transmit halves, matched route,
/// parameters, session and authentication state.
pub struct RequestCtx {
    pub rx: Rx,
    pub tx: Tx,

    /// Request parameters: query string, form body and route tokens.
    pub params: indexmap::IndexMap<String, String>,

    /// Peer address, as text.
    pub peer_addr: String,
    /// Whether the transport is TLS.
    pub secure: bool,

    pub session_id: Option<String>,
    pub username: Option<String>,
    pub authenticated: bool,
    /// Whether the supplied password has already been digest-encoded.
    pub encoded: bool,

    /// Failure text of the last `cmd` update, exposed as `${request:error}`.
    pub error_msg: Option<String>,

    /// Set by the `close` target: terminate the stream without a response.
    pub aborted: bool,

    /// Regex capture spans of the last pattern match against `path_info`.
    pub matches: Vec<Option<(usize, usize)>>,

    pub route: Option<Arc<Route>>,
    pub handler: Option<Arc<dyn Handler>>,

    pub(crate) sessions: Arc<SessionStore>,
}

impl RequestCtx {
    pub fn new(sessions: Arc<SessionStore>) -> RequestCtx {
        RequestCtx {
            rx: Rx::default(),
            tx: Tx::default(),
            params: indexmap::IndexMap::new(),
            peer_addr: String::new(),
            secure: false,
            session_id: None,
            username: None,
            authenticated: false,
            encoded: false,
            error_msg: None,
            aborted: false,
            matches: Vec::new(),
            route: None,
            handler: None,
            sessions,
        }
    }

    /// Build a request context from a decoded HTTP/2 request head.
    pub fn from_request(sessions: Arc<SessionStore>, request: &Request<()>) -> RequestCtx {
        let mut ctx = RequestCtx::new(sessions);

        ctx.rx.method = request.method().as_str().to_owned();
        ctx.rx.uri = request
            .uri()
            .path_and_query()
            .map(|pq| pq.as_str().to_owned())
            .unwrap_or_else(|| "/".to_owned());
        ctx.rx.path_info = request.uri().path().to_owned();
        ctx.rx.original_uri = ctx.rx.uri.clone();
        ctx.rx.query = request.uri().query().unwrap_or("").to_owned();
        ctx.rx.scheme = request
            .uri()
            .scheme_str()
            .unwrap_or("http")
            .to_owned();
        ctx.rx.authority = request
            .uri()
            .authority()
            .map(|a| a.as_str().to_owned())
            .unwrap_or_default();
        ctx.rx.headers = request.headers().clone();

        parse_query_params(&ctx.rx.query.clone(), &mut ctx.params);

        ctx
    }

    /// Parse an `application/x-www-form-urlencoded` body into the request
    /// parameters.
    pub fn parse_form_body(&mut self) {
        let is_form = self
            .header("content-type")
            .map(|ct| ct.starts_with("application/x-www-form-urlencoded"))
            .unwrap_or(false);

        if is_form {
            let body = String::from_utf8_lossy(&self.rx.body).into_owned();
            parse_query_params(&body, &mut self.params);
        }
    }

    /// The value of a request header, when it is valid text.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.rx.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(|v| v.as_str())
    }

    pub fn set_param(&mut self, name: &str, value: &str) {
        self.params.insert(name.to_owned(), value.to_owned());
    }

    /// The filename extension of the request path, without the dot.
    pub fn ext(&self) -> Option<&str> {
        let path = &self.rx.path_info;
        let file = path.rsplit('/').next()?;
        let (_, ext) = file.rsplit_once('.')?;
        if ext.is_empty() {
            None
        } else {
            Some(ext)
        }
    }

    // ===== session handling =====

    pub fn create_session(&mut self) -> String {
        if let Some(ref id) = self.session_id {
            return id.clone();
        }
        let id = self.sessions.create();
        self.session_id = Some(id.clone());
        id
    }

    pub fn destroy_session(&mut self) {
        if let Some(id) = self.session_id.take() {
            self.sessions.destroy(&id);
        }
    }

    pub fn session_var(&self, key: &str) -> Option<String> {
        let id = self.session_id.as_ref()?;
        self.sessions.get_var(id, key)
    }

    pub fn set_session_var(&mut self, key: &str, value: &str) {
        let id = self.create_session();
        self.sessions.set_var(&id, key, value);
    }

    // ===== response helpers =====

    pub fn set_status(&mut self, status: StatusCode) {
        self.tx.status = status;
    }

    pub fn add_header(&mut self, name: &str, value: &str) {
        if let (Ok(name), Ok(value)) = (
            http::header::HeaderName::try_from(name),
            http::HeaderValue::try_from(value),
        ) {
            self.tx.headers.insert(name, value);
        }
    }

    /// Send a redirect and finalize the request.
    pub fn redirect(&mut self, status: StatusCode, location: &str) {
        tracing::debug!("redirect; status={} location={}", status, location);
        self.tx.status = status;
        self.add_header("location", location);
        self.tx.body.clear();
        self.tx.finalized = true;
    }

    /// Write an error response and finalize the request.
    pub fn error(&mut self, status: StatusCode, msg: &str) {
        tracing::debug!("request error; status={} msg={}", status, msg);
        self.tx.status = status;
        self.tx.body.clear();
        self.tx.body.extend_from_slice(msg.as_bytes());
        self.tx.finalized = true;
    }

    /// Replace the response body and finalize the request.
    pub fn format_response(&mut self, body: &str) {
        self.tx.body.clear();
        self.tx.body.extend_from_slice(body.as_bytes());
        self.tx.finalized = true;
    }

    /// Abort without a response body; the stream is reset instead.
    pub fn abort(&mut self) {
        self.aborted = true;
        self.tx.body.clear();
        self.tx.finalized = true;
    }
}

impl fmt::Debug for RequestCtx {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("RequestCtx")
            .field("method", &self.rx.method)
            .field("uri", &self.rx.uri)
            .field("peer_addr", &self.peer_addr)
            .field("username", &self.username)
            .field("authenticated", &self.authenticated)
            .finish()
    }
}

/// Terminal stage producing the response for a matched request.
pub trait Handler: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    /// Called during handler selection when the route carries an ordered
    /// handler list.
    fn matches(&self, _ctx: &RequestCtx, _route: &Route) -> RouteAction {
        RouteAction::Ok
    }

    /// Gives the bound handler a chance to rewrite the request before it is
    /// accepted.
    fn rewrite(&self, _ctx: &mut RequestCtx) -> RouteAction {
        RouteAction::Ok
    }

    fn handle(&self, ctx: &mut RequestCtx) -> Result<(), Error>;
}

/// A handler wrapping a plain action function; used for service endpoints
/// like the form-auth login and logout actions.
pub struct ActionHandler {
    name: String,
    action: Arc<dyn Fn(&mut RequestCtx) -> Result<(), Error> + Send + Sync>,
}

impl ActionHandler {
    pub fn new<F>(name: &str, action: F) -> ActionHandler
    where
        F: Fn(&mut RequestCtx) -> Result<(), Error> + Send + Sync + 'static,
    {
        ActionHandler {
            name: name.to_owned(),
            action: Arc::new(action),
        }
    }
}

impl fmt::Debug for ActionHandler {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("ActionHandler")
            .field("name", &self.name)
            .finish()
    }
}

impl Handler for ActionHandler {
    fn name(&self) -> &str {
        &self.name
    }

    fn handle(&self, ctx: &mut RequestCtx) -> Result<(), Error> {
        (self.action)(ctx)?;
        ctx.tx.finalized = true;
        Ok(())
    }
}

/// The built-in pass handler: transmits whatever the transmit half already
/// holds. Bound for `TRACE` requests and error responses.
#[derive(Debug)]
pub struct PassHandler;

impl Handler for PassHandler {
    fn name(&self) -> &str {
        "pass"
    }

    fn handle(&self, ctx: &mut RequestCtx) -> Result<(), Error> {
        ctx.tx.finalized = true;
        Ok(())
    }
}

/// Parse `a=b&c=d` pairs, percent-decoded, into `params`.
pub fn parse_query_params(src: &str, params: &mut indexmap::IndexMap<String, String>) {
    for pair in src.split('&') {
        if pair.is_empty() {
            continue;
        }
        let (key, value) = match pair.split_once('=') {
            Some((k, v)) => (k, v),
            None => (pair, ""),
        };
        params.insert(url_decode(key), url_decode(value));
    }
}

/// Decode %XX escapes and `+` as space.
pub fn url_decode(src: &str) -> String {
    let bytes = src.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b'%' => match (hex_val(bytes.get(i + 1)), hex_val(bytes.get(i + 2))) {
                (Some(hi), Some(lo)) => {
                    out.push(hi << 4 | lo);
                    i += 3;
                }
                _ => {
                    out.push(b'%');
                    i += 1;
                }
            },
            b => {
                out.push(b);
                i += 1;
            }
        }
    }

    String::from_utf8_lossy(&out).into_owned()
}

fn hex_val(b: Option<&u8>) -> Option<u8> {
    match *b? {
        b @ b'0'..=b'9' => Some(b - b'0'),
        b @ b'a'..=b'f' => Some(b - b'a' + 10),
        b @ b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn query_params_decode() {
        let mut params = indexmap::IndexMap::new();
        parse_query_params("a=1&b=hello+world&c=%2Fpath&flag", &mut params);
        assert_eq!(params.get("a").unwrap(), "1");
        assert_eq!(params.get("b").unwrap(), "hello world");
        assert_eq!(params.get("c").unwrap(), "/path");
        assert_eq!(params.get("flag").unwrap(), "");
    }

    #[test]
    fn ext_comes_from_last_segment() {
        let sessions = Arc::new(SessionStore::default());
        let mut ctx = RequestCtx::new(sessions);
        ctx.rx.path_info = "/docs/index.html".to_owned();
        assert_eq!(ctx.ext(), Some("html"));

        ctx.rx.path_info = "/docs.d/readme".to_owned();
        assert_eq!(ctx.ext(), None);
    }
}
