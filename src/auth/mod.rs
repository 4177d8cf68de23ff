//! Authorization and access management: auth protocols (basic, digest,
//! form), pluggable credential stores, roles expanded into ability sets and
//! allow/deny peer lists.

pub mod session;
mod store;
mod types;

pub use self::session::{SessionStore, SESSION_USERNAME};
pub use self::store::{add_auth_store, lookup_auth_store, set_auth_store_verify, AuthStore,
                      VerifyUser};
pub use self::types::{add_auth_type, lookup_auth_type, AuthType};

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::{error, fmt};

use http::StatusCode;

use crate::request::RequestCtx;

/// A named set of abilities.
#[derive(Debug, Clone)]
pub struct Role {
    pub name: String,
    pub abilities: HashSet<String>,
}

impl Role {
    /// Create a role from a space/tab separated ability list.
    pub fn new(name: &str, abilities: &str) -> Role {
        Role {
            name: name.to_owned(),
            abilities: abilities
                .split([' ', '\t'])
                .filter(|s| !s.is_empty())
                .map(str::to_owned)
                .collect(),
        }
    }
}

/// A user record: stored password, configured roles and the expanded
/// ability set computed from them.
#[derive(Debug, Clone)]
pub struct User {
    pub name: String,
    pub password: String,
    pub roles: String,
    pub abilities: HashSet<String>,
}

/// Allow/deny evaluation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Order {
    AllowDeny,
    DenyAllow,
}

/// Errors from the authorization service; the `auth` route condition
/// converts them into 401/403 responses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// No credential store is configured on the route's auth.
    MissingStore,
    /// The peer supplied credentials for the wrong protocol.
    WrongProtocol,
    /// The credentials could not be parsed.
    BadCredentials,
    /// The user is unknown or the password check failed.
    Denied,
    /// The user lacks a required ability.
    Forbidden,
}

impl fmt::Display for AuthError {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        use self::AuthError::*;

        fmt.write_str(match *self {
            MissingStore => "no auth store defined",
            WrongProtocol => "wrong authentication protocol type",
            BadCredentials => "bad authentication data",
            Denied => "access denied",
            Forbidden => "user is not authorized for access",
        })
    }
}

impl error::Error for AuthError {}

/// Authorization configuration attached to a route.
///
/// Collection fields are shared with the parent auth they were inherited
/// from and cloned lazily on first mutation.
#[derive(Debug, Clone)]
pub struct Auth {
    pub realm: String,
    pub qop: String,

    pub(crate) auth_type: Option<Arc<dyn AuthType>>,
    pub(crate) store: Option<AuthStore>,

    /// When set, every request is logged in as this user without a password.
    pub auto_login_username: Option<String>,

    roles: Arc<HashMap<String, Role>>,
    users: Arc<HashMap<String, User>>,

    /// Abilities required to enter any route carrying this auth.
    required_abilities: Arc<HashSet<String>>,

    /// Optional user allow-list, consulted before abilities.
    permitted_users: Option<Arc<HashSet<String>>>,

    pub(crate) allow: Arc<HashSet<String>>,
    pub(crate) deny: Arc<HashSet<String>>,
    pub order: Order,

    pub login_page: Option<String>,
    pub logged_in_uri: Option<String>,
}

impl Default for Auth {
    fn default() -> Auth {
        Auth {
            realm: String::new(),
            qop: String::new(),
            auth_type: None,
            store: None,
            auto_login_username: None,
            roles: Arc::new(HashMap::new()),
            users: Arc::new(HashMap::new()),
            required_abilities: Arc::new(HashSet::new()),
            permitted_users: None,
            allow: Arc::new(HashSet::new()),
            deny: Arc::new(HashSet::new()),
            order: Order::DenyAllow,
            login_page: None,
            logged_in_uri: None,
        }
    }
}

impl Auth {
    pub fn new() -> Auth {
        Auth::default()
    }

    /// Create an auth inheriting all fields from `parent`; collections are
    /// shared until written to.
    pub fn inherit(parent: &Auth) -> Auth {
        parent.clone()
    }

    // ===== configuration =====

    pub fn set_realm(&mut self, realm: &str) {
        self.realm = realm.to_owned();
    }

    pub fn set_qop(&mut self, qop: &str) {
        self.qop = qop.to_owned();
    }

    /// Select the authentication protocol by registered name. Defaults the
    /// store to `internal` when none is set, as a type without a store is
    /// useless.
    pub fn set_type(&mut self, name: &str) -> Result<(), AuthError> {
        let ty = lookup_auth_type(name).ok_or(AuthError::BadCredentials)?;
        self.auth_type = Some(ty);
        if self.store.is_none() {
            self.set_store("internal")?;
        }
        Ok(())
    }

    pub fn clear_type(&mut self) {
        self.auth_type = None;
    }

    /// Select the credential store by registered name.
    pub fn set_store(&mut self, name: &str) -> Result<(), AuthError> {
        let store = lookup_auth_store(name).ok_or(AuthError::MissingStore)?;
        if store.verify.is_none() {
            tracing::warn!("auth store {} has no verifier in this configuration", name);
        }
        self.store = Some(store);
        Ok(())
    }

    /// Auto-login as `username`, bypassing password checks.
    pub fn set_username(&mut self, username: &str) {
        self.auto_login_username = Some(username.to_owned());
    }

    pub fn set_order(&mut self, order: Order) {
        self.order = order;
    }

    pub fn add_allow(&mut self, client: &str) {
        Arc::make_mut(&mut self.allow).insert(client.to_owned());
    }

    pub fn add_deny(&mut self, client: &str) {
        Arc::make_mut(&mut self.deny).insert(client.to_owned());
    }

    pub fn set_permitted_users(&mut self, users: &str) {
        let set = split_tokens(users).map(str::to_owned).collect();
        self.permitted_users = Some(Arc::new(set));
    }

    pub fn allow_any_valid_user(&mut self) {
        self.permitted_users = None;
    }

    pub fn add_role(&mut self, name: &str, abilities: &str) -> Result<(), AuthError> {
        if self.roles.contains_key(name) {
            return Err(AuthError::Denied);
        }
        let role = Role::new(name, abilities);
        tracing::trace!("role \"{}\" has abilities: {}", name, abilities);
        Arc::make_mut(&mut self.roles).insert(name.to_owned(), role);
        Ok(())
    }

    pub fn remove_role(&mut self, name: &str) -> Result<(), AuthError> {
        if Arc::make_mut(&mut self.roles).remove(name).is_none() {
            return Err(AuthError::Denied);
        }
        Ok(())
    }

    pub fn add_user(&mut self, name: &str, password: &str, roles: &str) -> Result<(), AuthError> {
        if self.users.contains_key(name) {
            return Err(AuthError::Denied);
        }

        let mut user = User {
            name: name.to_owned(),
            password: password.to_owned(),
            roles: roles.to_owned(),
            abilities: HashSet::new(),
        };
        user.abilities = self.expand_abilities(roles);

        Arc::make_mut(&mut self.users).insert(name.to_owned(), user);
        Ok(())
    }

    pub fn remove_user(&mut self, name: &str) -> Result<(), AuthError> {
        if Arc::make_mut(&mut self.users).remove(name).is_none() {
            return Err(AuthError::Denied);
        }
        Ok(())
    }

    pub fn lookup_user(&self, name: &str) -> Option<&User> {
        self.users.get(name)
    }

    /// Can supply roles or abilities; roles are expanded.
    pub fn set_required_abilities(&mut self, abilities: &str) {
        let expanded = self.expand_abilities(abilities);
        self.required_abilities = Arc::new(expanded);
    }

    pub fn required_abilities(&self) -> &HashSet<String> {
        &self.required_abilities
    }

    /// Recompute every user's expanded ability set after role changes.
    pub fn compute_all_user_abilities(&mut self) {
        let roles = self.roles.clone();
        let users = Arc::make_mut(&mut self.users);
        for user in users.values_mut() {
            user.abilities = expand_with_roles(&roles, &user.roles);
        }
    }

    /// Expand a token list: tokens naming a role contribute that role's
    /// abilities, any other token is itself an ability.
    fn expand_abilities(&self, tokens: &str) -> HashSet<String> {
        expand_with_roles(&self.roles, tokens)
    }

    // ===== request-time operations =====

    /// True when this auth demands a login before entering the route.
    pub fn requires_login(&self) -> bool {
        self.auth_type.is_some() && self.auto_login_username.is_none()
    }

    /// Resolve authentication state from the session.
    pub fn authenticate(&self, ctx: &mut RequestCtx) -> bool {
        if ctx.authenticated {
            return true;
        }

        let mut username = ctx.session_var(SESSION_USERNAME);

        if username.is_none() {
            if let Some(ref auto) = self.auto_login_username {
                if !auto.is_empty() && self.login(ctx, auto, None) {
                    username = ctx.session_var(SESSION_USERNAME);
                }
            }
        }

        match username {
            Some(username) => {
                tracing::trace!("using cached authentication data for user {}", username);
                ctx.username = Some(username);
                ctx.authenticated = true;
                true
            }
            None => false,
        }
    }

    pub fn logged_in(&self, ctx: &mut RequestCtx) -> bool {
        ctx.authenticated || self.authenticate(ctx)
    }

    /// Get the username and password credentials.
    ///
    /// In-protocol schemes (basic, digest) parse the `Authorization` header;
    /// otherwise the `username` and `password` request parameters are used.
    pub fn get_credentials(
        &self,
        ctx: &mut RequestCtx,
    ) -> Result<(Option<String>, Option<String>), AuthError> {
        if let Some(ref ty) = self.auth_type {
            if let Some(supplied) = ctx.header("authorization") {
                let scheme = supplied.split(' ').next().unwrap_or("");
                if !scheme.eq_ignore_ascii_case(ty.scheme()) && !ty.scheme().is_empty() {
                    return Err(AuthError::WrongProtocol);
                }
            }
            if let Some((username, password)) = ty.parse_credentials(ctx, self)? {
                return Ok((Some(username), Some(password)));
            }
            if !ty.scheme().is_empty() {
                // An in-protocol scheme with no credentials supplied.
                return Ok((None, None));
            }
        }

        Ok((
            ctx.param("username").map(str::to_owned),
            ctx.param("password").map(str::to_owned),
        ))
    }

    /// Login the user and record the authenticated session state.
    pub fn login(&self, ctx: &mut RequestCtx, username: &str, password: Option<&str>) -> bool {
        if username.is_empty() {
            tracing::trace!("login missing username");
            return false;
        }

        let store = match self.store {
            Some(ref store) => store,
            None => {
                tracing::error!("no auth store defined");
                return false;
            }
        };

        let verify = match store.verify {
            Some(ref verify) => verify.clone(),
            None => {
                tracing::error!("no auth store verification routine defined");
                return false;
            }
        };

        // If using auto-login, replace the username.
        let (username, password) = match self.auto_login_username {
            Some(ref auto) if !auto.is_empty() => (auto.as_str(), None),
            _ => (username, password),
        };

        if !verify(ctx, self, username, password) {
            return false;
        }

        ctx.create_session();
        ctx.set_session_var(SESSION_USERNAME, username);
        ctx.authenticated = true;
        ctx.username = Some(username.to_owned());
        ctx.encoded = false;
        true
    }

    /// Log the user out and remove the authentication state from the
    /// session.
    pub fn logout(&self, ctx: &mut RequestCtx) {
        ctx.authenticated = false;
        ctx.username = None;
        ctx.destroy_session();
    }

    /// Test whether the user has the requisite abilities. When `abilities`
    /// is `None`, the auth's required abilities apply.
    pub fn can_user(&self, ctx: &RequestCtx, abilities: Option<&str>) -> bool {
        let username = ctx.username.as_deref().unwrap_or("");

        if let Some(ref permitted) = self.permitted_users {
            if !permitted.contains(username) {
                tracing::debug!(
                    "user \"{}\" is not a permitted user for {}",
                    username,
                    ctx.rx.path_info
                );
                return false;
            }
        }

        if self.required_abilities.is_empty() && abilities.is_none() {
            // No abilities are required
            return true;
        }

        if username.is_empty() {
            // User not authenticated
            return false;
        }

        let user = match self.users.get(username) {
            Some(user) => user,
            None => {
                tracing::debug!("cannot find user {}", username);
                return false;
            }
        };

        match abilities {
            Some(abilities) => {
                for ability in split_tokens(abilities) {
                    if !user.abilities.contains(ability) {
                        tracing::debug!(
                            "user \"{}\" does not possess the required ability \"{}\" to access {}",
                            username,
                            ability,
                            ctx.rx.path_info
                        );
                        return false;
                    }
                }
            }
            None => {
                for ability in self.required_abilities.iter() {
                    if !user.abilities.contains(ability) {
                        tracing::debug!(
                            "user \"{}\" does not possess the required ability \"{}\" to access {}",
                            username,
                            ability,
                            ctx.rx.path_info
                        );
                        return false;
                    }
                }
            }
        }

        true
    }

    /// Ask the peer to log in, via whatever the auth type does: a 401
    /// challenge or a redirect to the login page.
    pub fn ask_login(&self, ctx: &mut RequestCtx) {
        if let Some(ref ty) = self.auth_type {
            ty.ask_login(ctx, self);
        } else {
            ctx.error(StatusCode::UNAUTHORIZED, "Access denied");
        }
    }
}

fn split_tokens(src: &str) -> impl Iterator<Item = &str> {
    src.split([' ', '\t', ',']).filter(|s| !s.is_empty())
}

fn expand_with_roles(roles: &HashMap<String, Role>, tokens: &str) -> HashSet<String> {
    let mut abilities = HashSet::new();

    for token in split_tokens(tokens) {
        match roles.get(token) {
            Some(role) => {
                // Interpret as a role
                for ability in role.abilities.iter() {
                    abilities.insert(ability.clone());
                }
            }
            None => {
                // Not found as a role: interpret the token as an ability
                abilities.insert(token.to_owned());
            }
        }
    }

    abilities
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::Arc as StdArc;

    fn ctx() -> RequestCtx {
        RequestCtx::new(StdArc::new(SessionStore::new()))
    }

    #[test]
    fn roles_expand_to_abilities() {
        let mut auth = Auth::new();
        auth.add_role("admin", "manage edit").unwrap();
        auth.add_role("viewer", "read").unwrap();
        auth.add_user("alice", "secret", "admin viewer extra").unwrap();

        let alice = auth.lookup_user("alice").unwrap();
        for ability in ["manage", "edit", "read", "extra"] {
            assert!(alice.abilities.contains(ability), "missing {}", ability);
        }
        assert!(!alice.abilities.contains("admin"));
    }

    #[test]
    fn can_user_checks_each_token() {
        let mut auth = Auth::new();
        auth.add_role("admin", "manage edit").unwrap();
        auth.add_role("viewer", "read").unwrap();
        auth.add_user("alice", "secret", "admin viewer extra").unwrap();

        let mut ctx = ctx();
        ctx.username = Some("alice".to_owned());

        assert!(auth.can_user(&ctx, Some("read")));
        assert!(auth.can_user(&ctx, Some("manage,extra")));
        assert!(!auth.can_user(&ctx, Some("delete")));
    }

    #[test]
    fn no_required_abilities_allows_anyone() {
        let auth = Auth::new();
        let ctx = ctx();
        assert!(auth.can_user(&ctx, None));
    }

    #[test]
    fn required_abilities_deny_unknown_user() {
        let mut auth = Auth::new();
        auth.set_required_abilities("manage");

        let mut ctx = ctx();
        assert!(!auth.can_user(&ctx, None));

        ctx.username = Some("ghost".to_owned());
        assert!(!auth.can_user(&ctx, None));
    }

    #[test]
    fn inherited_auth_copies_on_write() {
        let mut parent = Auth::new();
        parent.add_role("admin", "manage").unwrap();

        let mut child = Auth::inherit(&parent);
        child.add_role("viewer", "read").unwrap();

        assert!(child.roles.contains_key("admin"));
        assert!(child.roles.contains_key("viewer"));
        // The parent never observes the child's mutation.
        assert!(!parent.roles.contains_key("viewer"));
    }

    #[test]
    fn permitted_users_gate_first() {
        let mut auth = Auth::new();
        auth.add_user("alice", "secret", "read").unwrap();
        auth.add_user("bob", "secret", "read").unwrap();
        auth.set_permitted_users("alice");

        let mut ctx = ctx();
        ctx.username = Some("bob".to_owned());
        assert!(!auth.can_user(&ctx, Some("read")));

        ctx.username = Some("alice".to_owned());
        assert!(auth.can_user(&ctx, Some("read")));
    }
}
