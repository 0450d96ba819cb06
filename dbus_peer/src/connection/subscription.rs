//! Signal subscriptions and the namespace/path match-rule semantics that govern them.

use std::sync::Arc;

use zbus_names::{BusName, InterfaceName, MemberName};
use zvariant::{ObjectPath, Value};

use crate::message::Message;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arg0Match {
    Exact,
    Namespace,
    Path,
}

/// A match descriptor. `None` fields are wildcards.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MatchRule {
    pub sender: Option<BusName>,
    pub interface: Option<InterfaceName>,
    pub member: Option<MemberName>,
    pub path: Option<ObjectPath>,
    pub arg0: Option<String>,
    pub arg0_kind: Option<Arg0Match>,
    pub no_match_rule: bool,
}

impl MatchRule {
    /// The deterministic rule string used both on the wire (`AddMatch`/`RemoveMatch`) and as the
    /// coalescing key for subscriptions sharing it.
    ///
    /// A leading `-` is a core-private sigil marking `no_match_rule`; it must never reach
    /// the wire, only the local coalescing key.
    pub fn rule_string(&self) -> String {
        let mut parts = vec!["type='signal'".to_string()];
        if let Some(s) = &self.sender {
            parts.push(format!("sender='{s}'"));
        }
        if let Some(i) = &self.interface {
            parts.push(format!("interface='{i}'"));
        }
        if let Some(m) = &self.member {
            parts.push(format!("member='{m}'"));
        }
        if let Some(p) = &self.path {
            parts.push(format!("path='{p}'"));
        }
        if let Some(arg0) = &self.arg0 {
            let key = match self.arg0_kind {
                Some(Arg0Match::Namespace) => "arg0namespace",
                Some(Arg0Match::Path) => "arg0path",
                _ => "arg0",
            };
            parts.push(format!("{key}='{arg0}'"));
        }
        let joined = parts.join(",");
        if self.no_match_rule {
            format!("-{joined}")
        } else {
            joined
        }
    }

    /// The rule string with the `no_match_rule` sigil stripped, as sent to `AddMatch`/`RemoveMatch`.
    pub fn wire_rule_string(&self) -> String {
        self.rule_string().trim_start_matches('-').to_string()
    }

    fn matches(&self, message: &Message) -> bool {
        let fields = message.fields();
        if let Some(sender) = &self.sender {
            if fields.sender().map(|s| s.as_str()) != Some(sender.as_str()) {
                return false;
            }
        }
        if let Some(interface) = &self.interface {
            if fields.interface() != Some(interface) {
                return false;
            }
        }
        if let Some(member) = &self.member {
            if fields.member() != Some(member) {
                return false;
            }
        }
        if let Some(path) = &self.path {
            if fields.path() != Some(path) {
                return false;
            }
        }
        if let Some(pattern) = &self.arg0 {
            let arg0 = message.body().get_child(0).and_then(Value::as_str);
            let arg0 = match arg0 {
                Some(a) => a,
                None => return false,
            };
            let matched = match self.arg0_kind {
                Some(Arg0Match::Namespace) => arg0_namespace_matches(pattern, arg0),
                Some(Arg0Match::Path) => arg0_path_matches(pattern, arg0),
                _ => arg0 == pattern,
            };
            if !matched {
                return false;
            }
        }
        true
    }
}

/// `arg0` matches `namespace` if equal, or prefixed by `namespace + "."`.
pub fn arg0_namespace_matches(namespace: &str, arg0: &str) -> bool {
    arg0 == namespace || arg0.starts_with(&format!("{namespace}."))
}

/// Matches iff one of `arg0`/`pattern` is a prefix of the other at a `/`-boundary.
pub fn arg0_path_matches(pattern: &str, arg0: &str) -> bool {
    let terminate = |s: &str| if s.ends_with('/') { s.to_string() } else { format!("{s}/") };
    let a = terminate(pattern);
    let b = terminate(arg0);
    a.starts_with(&b) || b.starts_with(&a)
}

pub type SignalCallback = Arc<dyn Fn(Message) + Send + Sync>;

pub struct Subscriber {
    pub id: u64,
    pub callback: SignalCallback,
}

/// All subscribers sharing one coalesced rule string.
pub struct SignalData {
    pub rule: MatchRule,
    pub subscribers: Vec<Subscriber>,
}

/// Indexed by sender: `by_sender[sender]` and the `by_sender[""]` wildcard bucket.
#[derive(Default)]
pub struct SubscriptionTable {
    by_sender: std::collections::HashMap<String, Vec<Arc<std::sync::Mutex<SignalData>>>>,
}

impl SubscriptionTable {
    pub fn subscribe(&mut self, rule: MatchRule, id: u64, callback: SignalCallback) -> (String, bool) {
        let rule_string = rule.rule_string();
        let sender_key = rule.sender.as_ref().map(|s| s.as_str().to_owned()).unwrap_or_default();
        let bucket = self.by_sender.entry(sender_key).or_default();
        if let Some(existing) = bucket
            .iter()
            .find(|d| d.lock().unwrap().rule.rule_string() == rule_string)
        {
            existing.lock().unwrap().subscribers.push(Subscriber { id, callback });
            return (rule_string, false);
        }
        bucket.push(Arc::new(std::sync::Mutex::new(SignalData {
            rule,
            subscribers: vec![Subscriber { id, callback }],
        })));
        (rule_string, true)
    }

    /// Removes subscriber `id`; returns `(rule_string, now_empty)` if found.
    pub fn unsubscribe(&mut self, id: u64) -> Option<(String, bool)> {
        for bucket in self.by_sender.values_mut() {
            for index in 0..bucket.len() {
                let data = &bucket[index];
                let mut guard = data.lock().unwrap();
                let before = guard.subscribers.len();
                guard.subscribers.retain(|s| s.id != id);
                if guard.subscribers.len() != before {
                    let rule_string = guard.rule.rule_string();
                    let empty = guard.subscribers.is_empty();
                    drop(guard);
                    if empty {
                        bucket.remove(index);
                    }
                    return Some((rule_string, empty));
                }
            }
        }
        None
    }

    /// Every subscription whose descriptor matches `message`: candidates from the sender's
    /// bucket plus the wildcard bucket.
    pub fn matching(&self, message: &Message) -> Vec<SignalCallback> {
        let mut out = Vec::new();
        let sender_key = message
            .fields()
            .sender()
            .map(|s| s.as_str().to_owned())
            .unwrap_or_default();
        for key in [sender_key.as_str(), ""] {
            if let Some(bucket) = self.by_sender.get(key) {
                for data in bucket {
                    let guard = data.lock().unwrap();
                    if guard.rule.matches(message) {
                        out.extend(guard.subscribers.iter().map(|s| s.callback.clone()));
                    }
                }
            }
            if key.is_empty() && sender_key.is_empty() {
                break;
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rule_string_matches_scenario() {
        let rule = MatchRule {
            sender: Some(BusName::try_from(":1.17").unwrap()),
            interface: Some(InterfaceName::try_from("org.example.I").unwrap()),
            member: None,
            path: Some(ObjectPath::try_new("/o").unwrap()),
            arg0: Some("com.x".into()),
            arg0_kind: Some(Arg0Match::Namespace),
            no_match_rule: false,
        };
        assert_eq!(
            rule.rule_string(),
            "type='signal',sender=':1.17',interface='org.example.I',path='/o',arg0namespace='com.x'"
        );
    }

    #[test]
    fn namespace_matching() {
        assert!(arg0_namespace_matches("com.example", "com.example"));
        assert!(arg0_namespace_matches("com.example", "com.example.Sub"));
        assert!(!arg0_namespace_matches("com.example", "com.examplex"));
    }

    #[test]
    fn path_matching() {
        assert!(arg0_path_matches("/a/b/", "/a/b/c"));
        assert!(arg0_path_matches("/a/b", "/a/b/c"));
        assert!(!arg0_path_matches("/a/bb", "/a/b"));
    }

    #[test]
    fn coalesces_by_rule_string() {
        let mut table = SubscriptionTable::default();
        let rule = MatchRule {
            interface: Some(InterfaceName::try_from("org.example.I").unwrap()),
            ..Default::default()
        };
        let (_, first_new) = table.subscribe(rule.clone(), 1, Arc::new(|_| {}));
        let (_, second_new) = table.subscribe(rule, 2, Arc::new(|_| {}));
        assert!(first_new);
        assert!(!second_new);
        let (_, empty1) = table.unsubscribe(1).unwrap();
        assert!(!empty1);
        let (_, empty2) = table.unsubscribe(2).unwrap();
        assert!(empty2);
    }
}
