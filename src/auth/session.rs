use std::collections::HashMap;
use std::sync::Mutex;

use rand::distributions::Alphanumeric;
use rand::Rng;

/// The session variable holding the authenticated username.
pub const SESSION_USERNAME: &str = "__username__";

/// In-memory session state store.
///
/// Sessions are keyed by a random id handed to the request; each holds a
/// flat string map. Persistence is an external collaborator's concern.
#[derive(Debug, Default)]
pub struct SessionStore {
    inner: Mutex<HashMap<String, HashMap<String, String>>>,
}

impl SessionStore {
    pub fn new() -> SessionStore {
        SessionStore::default()
    }

    /// Create a session, returning its id.
    pub fn create(&self) -> String {
        let id: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(32)
            .map(char::from)
            .collect();

        let mut inner = self.inner.lock().unwrap();
        inner.insert(id.clone(), HashMap::new());
        tracing::trace!("created session {}", id);
        id
    }

    pub fn destroy(&self, id: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.remove(id);
    }

    pub fn exists(&self, id: &str) -> bool {
        let inner = self.inner.lock().unwrap();
        inner.contains_key(id)
    }

    pub fn get_var(&self, id: &str, key: &str) -> Option<String> {
        let inner = self.inner.lock().unwrap();
        inner.get(id)?.get(key).cloned()
    }

    pub fn set_var(&self, id: &str, key: &str, value: &str) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(vars) = inner.get_mut(id) {
            vars.insert(key.to_owned(), value.to_owned());
        }
    }

    pub fn remove_var(&self, id: &str, key: &str) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(vars) = inner.get_mut(id) {
            vars.remove(key);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn create_set_get_destroy() {
        let store = SessionStore::new();
        let id = store.create();
        assert!(store.exists(&id));

        store.set_var(&id, "k", "v");
        assert_eq!(store.get_var(&id, "k").unwrap(), "v");

        store.destroy(&id);
        assert!(!store.exists(&id));
        assert!(store.get_var(&id, "k").is_none());
    }

    #[test]
    fn ids_are_unique() {
        let store = SessionStore::new();
        assert_ne!(store.create(), store.create());
    }
}
