use std::fmt;

use tracing::warn;

use crate::types::Authority;

type Listener<T> = Box<dyn FnMut(&T, &T) + Send>;

/// Server-written, client-read value. The server holds the canonical value and
/// bumps `version` on every change; mirrors apply the pushed value only when it
/// is newer than what they hold (last write wins per variable). Listeners run
/// on every accepted change with the old and new value.
pub struct Replicated<T> {
    value: T,
    version: u64,
    listeners: Vec<Listener<T>>,
}

impl<T: Clone + PartialEq> Replicated<T> {
    pub fn new(initial: T) -> Self {
        Self {
            value: initial,
            version: 0,
            listeners: Vec::new(),
        }
    }

    pub fn get(&self) -> &T {
        &self.value
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    /// Writes a new value. Returns true when the value changed.
    pub fn set(&mut self, authority: Authority, value: T) -> bool {
        if !authority.is_server() {
            warn!(?authority, "replicated value write rejected: caller is not the server");
            return false;
        }
        if self.value == value {
            return false;
        }
        let next_version = self.version + 1;
        self.replace(value, next_version);
        true
    }

    /// Applies a value pushed by the server. Stale or repeated versions are ignored.
    pub fn apply_remote(&mut self, value: T, version: u64) -> bool {
        if version <= self.version {
            return false;
        }
        if self.value == value {
            self.version = version;
            return false;
        }
        self.replace(value, version);
        true
    }

    pub fn subscribe(&mut self, listener: impl FnMut(&T, &T) + Send + 'static) {
        self.listeners.push(Box::new(listener));
    }

    fn replace(&mut self, value: T, version: u64) {
        let previous = std::mem::replace(&mut self.value, value);
        self.version = version;
        for listener in self.listeners.iter_mut() {
            listener(&previous, &self.value);
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Replicated<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Replicated")
            .field("value", &self.value)
            .field("version", &self.version)
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;

    #[test]
    fn only_server_writes_are_accepted() {
        let mut value = Replicated::new(1);
        assert!(!value.set(Authority::Client(3), 2));
        assert_eq!(*value.get(), 1);
        assert!(value.set(Authority::Server, 2));
        assert_eq!(*value.get(), 2);
        assert_eq!(value.version(), 1);
    }

    #[test]
    fn listeners_see_old_and_new_values_once_per_change() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut value = Replicated::new("white".to_string());
        let sink = seen.clone();
        value.subscribe(move |old: &String, new: &String| {
            sink.lock()
                .expect("listener lock")
                .push(format!("{old}->{new}"));
        });

        value.set(Authority::Server, "red".to_string());
        value.set(Authority::Server, "red".to_string());
        value.set(Authority::Client(2), "blue".to_string());
        value.apply_remote("green".to_string(), 9);

        assert_eq!(
            *seen.lock().expect("listener lock"),
            vec!["white->red", "red->green"]
        );
    }

    #[test]
    fn mirrors_ignore_stale_versions() {
        let mut mirror = Replicated::new(0);
        assert!(mirror.apply_remote(5, 2));
        assert!(!mirror.apply_remote(4, 1));
        assert!(!mirror.apply_remote(9, 2));
        assert_eq!(*mirror.get(), 5);
        assert!(mirror.apply_remote(9, 3));
        assert_eq!(*mirror.get(), 9);
    }
}
