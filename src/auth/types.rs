use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use http::StatusCode;
use once_cell::sync::Lazy;
use rand::Rng;

use crate::auth::store::md5_hex;
use crate::auth::{Auth, AuthError};
use crate::request::{DigestParams, RequestCtx};

/// An authentication protocol: how credentials arrive on the wire and how
/// the peer is asked to log in.
pub trait AuthType: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    /// The `Authorization` scheme this type consumes; empty when
    /// credentials travel out of protocol (form auth).
    fn scheme(&self) -> &str {
        ""
    }

    /// Extract `(username, password-or-response)` from the request.
    ///
    /// Returns `Ok(None)` when the request carries no credentials for this
    /// scheme.
    fn parse_credentials(
        &self,
        _ctx: &mut RequestCtx,
        _auth: &Auth,
    ) -> Result<Option<(String, String)>, AuthError> {
        Ok(None)
    }

    /// Ask the peer to log in; writes the 401 challenge or redirect.
    fn ask_login(&self, ctx: &mut RequestCtx, auth: &Auth);

    /// Add response headers the scheme requires on successful responses.
    fn set_response_headers(&self, _ctx: &mut RequestCtx, _auth: &Auth) {}
}

static AUTH_TYPES: Lazy<RwLock<HashMap<String, Arc<dyn AuthType>>>> = Lazy::new(|| {
    let mut types: HashMap<String, Arc<dyn AuthType>> = HashMap::new();
    types.insert("basic".to_owned(), Arc::new(BasicAuth));
    types.insert("digest".to_owned(), Arc::new(DigestAuth));
    types.insert("form".to_owned(), Arc::new(FormAuth));
    RwLock::new(types)
});

/// Register an authentication protocol under `name`.
pub fn add_auth_type(name: &str, ty: Arc<dyn AuthType>) {
    let mut types = AUTH_TYPES.write().unwrap();
    types.insert(name.to_owned(), ty);
}

pub fn lookup_auth_type(name: &str) -> Option<Arc<dyn AuthType>> {
    let types = AUTH_TYPES.read().unwrap();
    types.get(name).cloned()
}

// ===== Basic =====

#[derive(Debug)]
struct BasicAuth;

impl AuthType for BasicAuth {
    fn name(&self) -> &str {
        "basic"
    }

    fn scheme(&self) -> &str {
        "Basic"
    }

    fn parse_credentials(
        &self,
        ctx: &mut RequestCtx,
        _auth: &Auth,
    ) -> Result<Option<(String, String)>, AuthError> {
        let header = match ctx.header("authorization") {
            Some(h) => h,
            None => return Ok(None),
        };

        let encoded = match header.strip_prefix("Basic ").or_else(|| header.strip_prefix("basic ")) {
            Some(rest) => rest.trim(),
            None => return Ok(None),
        };

        let decoded = BASE64
            .decode(encoded)
            .map_err(|_| AuthError::BadCredentials)?;
        let decoded = String::from_utf8(decoded).map_err(|_| AuthError::BadCredentials)?;

        let (username, password) = decoded
            .split_once(':')
            .ok_or(AuthError::BadCredentials)?;

        Ok(Some((username.to_owned(), password.to_owned())))
    }

    fn ask_login(&self, ctx: &mut RequestCtx, auth: &Auth) {
        let challenge = format!("Basic realm=\"{}\"", auth.realm);
        ctx.add_header("www-authenticate", &challenge);
        ctx.error(StatusCode::UNAUTHORIZED, "Access Denied. Login required");
    }
}

// ===== Digest =====

#[derive(Debug)]
struct DigestAuth;

impl AuthType for DigestAuth {
    fn name(&self) -> &str {
        "digest"
    }

    fn scheme(&self) -> &str {
        "Digest"
    }

    fn parse_credentials(
        &self,
        ctx: &mut RequestCtx,
        auth: &Auth,
    ) -> Result<Option<(String, String)>, AuthError> {
        let header = match ctx.header("authorization") {
            Some(h) => h,
            None => return Ok(None),
        };

        let rest = match header
            .strip_prefix("Digest ")
            .or_else(|| header.strip_prefix("digest "))
        {
            Some(rest) => rest,
            None => return Ok(None),
        };

        let mut params = DigestParams::default();

        for field in split_auth_fields(rest) {
            let (key, value) = match field.split_once('=') {
                Some((k, v)) => (k.trim(), v.trim().trim_matches('"')),
                None => continue,
            };

            match key {
                "username" => params.username = value.to_owned(),
                "realm" => params.realm = value.to_owned(),
                "nonce" => params.nonce = value.to_owned(),
                "nc" => params.nc = value.to_owned(),
                "cnonce" => params.cnonce = value.to_owned(),
                "qop" => params.qop = value.to_owned(),
                "uri" => params.uri = value.to_owned(),
                "response" => params.response = value.to_owned(),
                _ => {}
            }
        }

        if params.username.is_empty() || params.response.is_empty() {
            return Err(AuthError::BadCredentials);
        }
        if !auth.realm.is_empty() && params.realm != auth.realm {
            return Err(AuthError::BadCredentials);
        }

        let username = params.username.clone();
        let response = params.response.clone();
        ctx.rx.digest = Some(params);

        Ok(Some((username, response)))
    }

    fn ask_login(&self, ctx: &mut RequestCtx, auth: &Auth) {
        let nonce: u64 = rand::thread_rng().gen();
        let opaque = md5_hex(&format!("{}:{}", auth.realm, nonce));

        let challenge = if auth.qop.is_empty() {
            format!("Digest realm=\"{}\", nonce=\"{:x}\"", auth.realm, nonce)
        } else {
            format!(
                "Digest realm=\"{}\", qop=\"{}\", nonce=\"{:x}\", opaque=\"{}\"",
                auth.realm, auth.qop, nonce, opaque
            )
        };

        ctx.add_header("www-authenticate", &challenge);
        ctx.error(StatusCode::UNAUTHORIZED, "Access Denied. Login required");
    }
}

// ===== Form =====

/// Web form based authentication: the login page posts `username` and
/// `password` parameters, so there is nothing to parse from headers and
/// asking for a login is a redirect.
#[derive(Debug)]
struct FormAuth;

impl AuthType for FormAuth {
    fn name(&self) -> &str {
        "form"
    }

    fn ask_login(&self, ctx: &mut RequestCtx, auth: &Auth) {
        match auth.login_page {
            Some(ref page) => {
                let page = page.clone();
                ctx.redirect(StatusCode::FOUND, &page);
            }
            None => ctx.error(StatusCode::UNAUTHORIZED, "Access Denied. Login required"),
        }
    }
}

/// Split comma separated auth-param fields, honoring quoted commas.
fn split_auth_fields(src: &str) -> Vec<&str> {
    let mut fields = Vec::new();
    let mut start = 0;
    let mut quoted = false;

    for (i, c) in src.char_indices() {
        match c {
            '"' => quoted = !quoted,
            ',' if !quoted => {
                fields.push(src[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
    }
    fields.push(src[start..].trim());
    fields.retain(|f| !f.is_empty());
    fields
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::auth::SessionStore;

    fn ctx() -> RequestCtx {
        RequestCtx::new(Arc::new(SessionStore::new()))
    }

    fn with_auth_header(value: &str) -> RequestCtx {
        let mut ctx = ctx();
        ctx.rx.headers.insert(
            http::header::AUTHORIZATION,
            http::HeaderValue::from_str(value).unwrap(),
        );
        ctx
    }

    #[test]
    fn basic_credentials_decode() {
        let mut ctx = with_auth_header("Basic YWxpY2U6c2VjcmV0");
        let auth = Auth::new();

        let creds = BasicAuth.parse_credentials(&mut ctx, &auth).unwrap();
        assert_eq!(creds, Some(("alice".to_owned(), "secret".to_owned())));
    }

    #[test]
    fn basic_rejects_garbage() {
        let mut ctx = with_auth_header("Basic !!!not-base64!!!");
        let auth = Auth::new();
        assert!(BasicAuth.parse_credentials(&mut ctx, &auth).is_err());
    }

    #[test]
    fn basic_challenge_carries_realm() {
        let mut ctx = ctx();
        let mut auth = Auth::new();
        auth.set_realm("example.com");

        BasicAuth.ask_login(&mut ctx, &auth);
        assert_eq!(ctx.tx.status, StatusCode::UNAUTHORIZED);
        let challenge = ctx.tx.headers.get("www-authenticate").unwrap();
        assert_eq!(challenge, "Basic realm=\"example.com\"");
        assert!(ctx.tx.finalized);
    }

    #[test]
    fn digest_fields_parse() {
        let mut ctx = with_auth_header(
            "Digest username=\"alice\", realm=\"example.com\", nonce=\"abc\", \
             uri=\"/index.html\", qop=auth, nc=00000001, cnonce=\"xyz\", \
             response=\"deadbeef\"",
        );
        let mut auth = Auth::new();
        auth.set_realm("example.com");

        let creds = DigestAuth.parse_credentials(&mut ctx, &auth).unwrap();
        assert_eq!(
            creds,
            Some(("alice".to_owned(), "deadbeef".to_owned()))
        );

        let digest = ctx.rx.digest.unwrap();
        assert_eq!(digest.nonce, "abc");
        assert_eq!(digest.uri, "/index.html");
        assert_eq!(digest.qop, "auth");
    }

    #[test]
    fn form_ask_login_redirects() {
        let mut ctx = ctx();
        let mut auth = Auth::new();
        auth.login_page = Some("/login.html".to_owned());

        FormAuth.ask_login(&mut ctx, &auth);
        assert_eq!(ctx.tx.status, StatusCode::FOUND);
        assert_eq!(ctx.tx.headers.get("location").unwrap(), "/login.html");
    }
}
