use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};

use once_cell::sync::Lazy;

use crate::auth::Auth;
use crate::request::RequestCtx;

/// Verifies a user's credentials against some backing source.
pub type VerifyUser =
    Arc<dyn Fn(&mut RequestCtx, &Auth, &str, Option<&str>) -> bool + Send + Sync>;

/// A named credential store: a verification routine looked up by name at
/// configuration time.
#[derive(Clone)]
pub struct AuthStore {
    pub name: String,
    pub verify: Option<VerifyUser>,
}

impl fmt::Debug for AuthStore {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("AuthStore")
            .field("name", &self.name)
            .field("verify", &self.verify.as_ref().map(|_| "..."))
            .finish()
    }
}

static AUTH_STORES: Lazy<RwLock<HashMap<String, AuthStore>>> = Lazy::new(|| {
    let mut stores = HashMap::new();

    let internal: VerifyUser = Arc::new(internal_verify_user);
    let system: VerifyUser = Arc::new(system_verify_user);

    register(&mut stores, "internal", Some(internal.clone()));
    register(&mut stores, "app", None);
    register(&mut stores, "system", Some(system.clone()));

    // Deprecated aliases retained for configuration compatibility.
    register(&mut stores, "file", Some(internal));
    register(&mut stores, "pam", Some(system));

    RwLock::new(stores)
});

fn register(stores: &mut HashMap<String, AuthStore>, name: &str, verify: Option<VerifyUser>) {
    stores.insert(
        name.to_owned(),
        AuthStore {
            name: name.to_owned(),
            verify,
        },
    );
}

/// Register a credential store under `name`.
pub fn add_auth_store(name: &str, verify: VerifyUser) {
    let mut stores = AUTH_STORES.write().unwrap();
    register(&mut stores, name, Some(verify));
}

/// Replace the verification routine of an existing store.
pub fn set_auth_store_verify(name: &str, verify: VerifyUser) -> bool {
    let mut stores = AUTH_STORES.write().unwrap();
    match stores.get_mut(name) {
        Some(store) => {
            store.verify = Some(verify);
            true
        }
        None => false,
    }
}

pub fn lookup_auth_store(name: &str) -> Option<AuthStore> {
    let stores = AUTH_STORES.read().unwrap();
    stores.get(name).cloned()
}

/// Verify the user password against the internal user table.
///
/// Passwords are stored either as `BF<cost>:` prefixed bcrypt hashes of
/// `username:realm:password`, or as `MD5("username:realm:password")` hex
/// digests. The password may be absent only when auto-login is configured.
fn internal_verify_user(
    ctx: &mut RequestCtx,
    auth: &Auth,
    username: &str,
    password: Option<&str>,
) -> bool {
    let user = match auth.lookup_user(username) {
        Some(user) => user.clone(),
        None => {
            tracing::debug!("internal store: unknown user \"{}\"", username);
            return false;
        }
    };

    let password = match password {
        Some(password) => password,
        // Auto-login; no password check.
        None => return true,
    };

    // An in-flight digest exchange is verified against the stored digest
    // rather than by direct comparison.
    if let Some(ref digest) = ctx.rx.digest {
        let success = check_digest(&ctx.rx.method, &user.password, digest, password);
        log_outcome(success, username);
        return success;
    }

    let stored = user.password.as_str();

    let success = if is_blowfish_hash(stored) {
        let (_, hash) = stored.split_once(':').expect("checked by is_blowfish_hash");
        let plain = format!("{}:{}:{}", username, auth.realm, password);
        bcrypt::verify(plain, hash).unwrap_or(false)
    } else {
        let supplied = if ctx.encoded {
            password.to_owned()
        } else {
            ctx.encoded = true;
            md5_hex(&format!("{}:{}:{}", username, auth.realm, password))
        };
        supplied == stored
    };

    log_outcome(success, username);
    success
}

fn log_outcome(success: bool, username: &str) {
    if success {
        tracing::debug!("user \"{}\" authenticated", username);
    } else {
        tracing::debug!("password for user \"{}\" failed to authenticate", username);
    }
}

/// `BF<digit>:` marks a bcrypt hash of `username:realm:password`.
fn is_blowfish_hash(stored: &str) -> bool {
    let bytes = stored.as_bytes();
    bytes.len() > 4
        && bytes[0] == b'B'
        && bytes[1] == b'F'
        && bytes[2].is_ascii_digit()
        && bytes[3] == b':'
}

/// RFC 2617 digest check: the stored password is HA1
/// (`MD5(username:realm:password)`), the response covers the method and URI.
fn check_digest(
    method: &str,
    stored_ha1: &str,
    digest: &crate::request::DigestParams,
    response: &str,
) -> bool {
    let ha2 = md5_hex(&format!("{}:{}", method, digest.uri));

    let expected = if digest.qop.is_empty() {
        md5_hex(&format!("{}:{}:{}", stored_ha1, digest.nonce, ha2))
    } else {
        md5_hex(&format!(
            "{}:{}:{}:{}:{}:{}",
            stored_ha1, digest.nonce, digest.nc, digest.cnonce, digest.qop, ha2
        ))
    };

    expected == response
}

/// The system (PAM) verifier is not built into this configuration; it can
/// be plugged via `set_auth_store_verify`.
fn system_verify_user(
    _ctx: &mut RequestCtx,
    _auth: &Auth,
    username: &str,
    _password: Option<&str>,
) -> bool {
    tracing::error!(
        "system password store is not supported in this configuration; denying \"{}\"",
        username
    );
    false
}

pub(crate) fn md5_hex(src: &str) -> String {
    format!("{:x}", md5::compute(src.as_bytes()))
}
