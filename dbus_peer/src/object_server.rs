//! Dispatch tables for exported objects and subtrees.
//!
//! Interfaces and subtrees are modeled as trait objects over a small, stable capability set:
//! registrations own a boxed vtable so the table never borrows from the caller.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use zbus_names::InterfaceName;
use zvariant::{ObjectPath, Value};

use crate::message::Message;
use crate::{Error, Result};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

pub fn next_id() -> u64 {
    NEXT_ID.fetch_add(1, Ordering::Relaxed)
}

/// A method-call/property vtable for one interface: `{method_call, get_property, set_property}`.
pub trait Interface: Send + Sync {
    fn name(&self) -> InterfaceName;

    /// Handle a method call; `Ok(None)` means "not handled, fall through" (only meaningful for
    /// methods this interface doesn't recognize — returning an error is still a handled call).
    fn call(&self, member: &str, message: &Message) -> Option<Result<Value>>;

    /// Property getters/setters, keyed by property name. Returning `None` from `get`/`set` means
    /// the property does not exist on this interface.
    fn get_property(&self, _name: &str) -> Option<Result<Value>> {
        None
    }

    fn set_property(&self, _name: &str, _value: &Value) -> Option<Result<()>> {
        None
    }

    /// Property names this interface exposes, for `Properties.GetAll` and introspection.
    fn property_names(&self) -> Vec<String> {
        Vec::new()
    }

    /// The declared D-Bus type of property `name`, if this interface exposes it. `Properties.Set`
    /// checks the inbound variant against this before ever calling [`Interface::set_property`], so
    /// a type mismatch is reported as `InvalidArgs` rather than surfacing as whatever
    /// `set_property` happens to do with a value of the wrong shape.
    fn property_signature(&self, _name: &str) -> Option<zvariant::Signature> {
        None
    }

    /// Bare interface body for `Introspect` (just the `<method>`/`<property>` elements; the
    /// `<interface name="…">` wrapper is added by the caller).
    fn introspect_body(&self) -> String {
        String::new()
    }
}

struct Registration {
    interface: Arc<dyn Interface>,
    id: u64,
}

/// Path → {interface-name → registration}. At most one registration per (path, interface).
#[derive(Default)]
pub struct ObjectTable {
    objects: HashMap<String, HashMap<String, Registration>>,
}

impl ObjectTable {
    pub fn register(&mut self, path: &ObjectPath, interface: Arc<dyn Interface>) -> Result<u64> {
        let by_interface = self.objects.entry(path.as_str().to_owned()).or_default();
        let name = interface.name().as_str().to_owned();
        if by_interface.contains_key(&name) {
            return Err(Error::Exists);
        }
        let id = next_id();
        by_interface.insert(name, Registration { interface, id });
        Ok(id)
    }

    /// Returns `false` if no such registration existed; unregistering is otherwise a no-op.
    pub fn unregister(&mut self, path: &str, interface: &str) -> bool {
        let Some(by_interface) = self.objects.get_mut(path) else {
            return false;
        };
        let removed = by_interface.remove(interface).is_some();
        if by_interface.is_empty() {
            self.objects.remove(path);
        }
        removed
    }

    pub fn get(&self, path: &str, interface: &str) -> Option<Arc<dyn Interface>> {
        self.objects
            .get(path)?
            .get(interface)
            .map(|r| r.interface.clone())
    }

    pub fn interfaces_at(&self, path: &str) -> Vec<Arc<dyn Interface>> {
        self.objects
            .get(path)
            .map(|m| m.values().map(|r| r.interface.clone()).collect())
            .unwrap_or_default()
    }

    /// Immediate child object paths of `path` (for `Introspect`'s `<node>` entries).
    pub fn children_of(&self, path: &str) -> Vec<String> {
        let prefix = if path == "/" { "/".to_string() } else { format!("{path}/") };
        let mut names: Vec<String> = self
            .objects
            .keys()
            .filter_map(|p| {
                let rest = p.strip_prefix(&prefix)?;
                if rest.is_empty() {
                    return None;
                }
                Some(rest.split('/').next().unwrap().to_owned())
            })
            .collect();
        names.sort();
        names.dedup();
        names
    }
}

/// A subtree's hooks: `enumerate`/`introspect`/`dispatch` over the naming cone.
pub trait Subtree: Send + Sync {
    fn dispatch(&self, relative_path: &str, member: &str, message: &Message) -> Option<Result<Value>>;
    fn enumerate(&self, _relative_path: &str) -> Vec<String> {
        Vec::new()
    }
    fn introspect(&self, _relative_path: &str) -> String {
        String::new()
    }
}

struct SubtreeRegistration {
    subtree: Arc<dyn Subtree>,
    id: u64,
}

#[derive(Default)]
pub struct SubtreeTable {
    subtrees: HashMap<String, SubtreeRegistration>,
}

impl SubtreeTable {
    pub fn register(&mut self, path: &ObjectPath, subtree: Arc<dyn Subtree>) -> Result<u64> {
        if self.subtrees.contains_key(path.as_str()) {
            return Err(Error::Exists);
        }
        let id = next_id();
        self.subtrees
            .insert(path.as_str().to_owned(), SubtreeRegistration { subtree, id });
        Ok(id)
    }

    pub fn unregister(&mut self, path: &str) -> bool {
        self.subtrees.remove(path).is_some()
    }

    /// A subtree rooted exactly at `path`, or at one of `path`'s ancestors.
    pub fn lookup_for_dispatch<'a>(&'a self, path: &'a str) -> Option<(&'a str, Arc<dyn Subtree>)> {
        if let Some(r) = self.subtrees.get(path) {
            return Some(("", r.subtree.clone()));
        }
        let parent = ObjectPath::try_new(path).ok()?.parent()?.to_owned();
        let r = self.subtrees.get(&parent)?;
        let relative = &path[parent.len()..];
        let relative = relative.trim_start_matches('/');
        Some((relative, r.subtree.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Ping;
    impl Interface for Ping {
        fn name(&self) -> InterfaceName {
            InterfaceName::try_from("org.example.I").unwrap()
        }
        fn call(&self, member: &str, _message: &Message) -> Option<Result<Value>> {
            (member == "Ping").then(|| Ok(Value::nothing(zvariant::Signature::String)))
        }
    }

    #[test]
    fn register_then_exists_then_unregister() {
        let mut table = ObjectTable::default();
        let path = ObjectPath::try_new("/a").unwrap();
        table.register(&path, Arc::new(Ping)).unwrap();
        assert!(matches!(
            table.register(&path, Arc::new(Ping)),
            Err(Error::Exists)
        ));
        assert!(table.unregister("/a", "org.example.I"));
        assert!(!table.unregister("/a", "org.example.I"));
    }

    #[test]
    fn children_of_lists_immediate_descendants() {
        let mut table = ObjectTable::default();
        table
            .register(&ObjectPath::try_new("/a/b").unwrap(), Arc::new(Ping))
            .unwrap();
        table
            .register(&ObjectPath::try_new("/a/c/d").unwrap(), Arc::new(Ping))
            .unwrap();
        let mut children = table.children_of("/a");
        children.sort();
        assert_eq!(children, vec!["b".to_string(), "c".to_string()]);
    }
}
