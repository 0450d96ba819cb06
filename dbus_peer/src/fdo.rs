//! The standard interfaces the core implements for itself: `Peer`, `Introspectable` and
//! `Properties`. Introspection XML *generation* from richer metadata is left to a higher layer —
//! this only emits the fixed `Properties`/`Introspectable` boilerplate and enumerates exported
//! interfaces/children, the minimum a peer needs to describe itself on the wire.

use std::fs;
use std::sync::Mutex;

use zvariant::Value;

use crate::object_server::ObjectTable;
use crate::{Error, Result};

pub const INTROSPECTABLE: &str = "org.freedesktop.DBus.Introspectable";
pub const PROPERTIES: &str = "org.freedesktop.DBus.Properties";
pub const PEER: &str = "org.freedesktop.DBus.Peer";
pub const UNKNOWN_METHOD: &str = "org.freedesktop.DBus.Error.UnknownMethod";
pub const INVALID_ARGS: &str = "org.freedesktop.DBus.Error.InvalidArgs";

const BUILTIN_PROPERTIES_XML: &str = r#"  <interface name="org.freedesktop.DBus.Properties">
    <method name="Get">
      <arg name="interface_name" type="s" direction="in"/>
      <arg name="property_name" type="s" direction="in"/>
      <arg name="value" type="v" direction="out"/>
    </method>
    <method name="Set">
      <arg name="interface_name" type="s" direction="in"/>
      <arg name="property_name" type="s" direction="in"/>
      <arg name="value" type="v" direction="in"/>
    </method>
    <method name="GetAll">
      <arg name="interface_name" type="s" direction="in"/>
      <arg name="properties" type="a{sv}" direction="out"/>
    </method>
  </interface>
"#;

const BUILTIN_INTROSPECTABLE_XML: &str = r#"  <interface name="org.freedesktop.DBus.Introspectable">
    <method name="Introspect">
      <arg name="xml_data" type="s" direction="out"/>
    </method>
  </interface>
"#;

/// `Introspect`: registered interfaces at `path`, the built-in `Properties`/
/// `Introspectable` interfaces when not shadowed by a real registration, then `<node>` entries.
pub fn introspect(objects: &ObjectTable, path: &str) -> String {
    let mut xml = String::new();
    xml.push_str("<!DOCTYPE node PUBLIC \"-//freedesktop//DTD D-BUS Object Introspection 1.0//EN\"\n");
    xml.push_str(" \"http://www.freedesktop.org/standards/dbus/1.0/introspect.dtd\">\n");
    xml.push_str(&format!("<node name=\"{path}\">\n"));

    let registered = objects.interfaces_at(path);
    let mut has_properties = false;
    let mut has_introspectable = false;
    for iface in &registered {
        let name = iface.name();
        has_properties |= name.as_str() == PROPERTIES;
        has_introspectable |= name.as_str() == INTROSPECTABLE;
        xml.push_str(&format!("  <interface name=\"{name}\">\n"));
        xml.push_str(&iface.introspect_body());
        xml.push_str("  </interface>\n");
    }
    if !has_properties {
        xml.push_str(BUILTIN_PROPERTIES_XML);
    }
    if !has_introspectable {
        xml.push_str(BUILTIN_INTROSPECTABLE_XML);
    }
    for child in objects.children_of(path) {
        xml.push_str(&format!("  <node name=\"{child}\"/>\n"));
    }
    xml.push_str("</node>\n");
    xml
}

/// `Peer.GetMachineId`: cached lazily on first use.
pub fn machine_id(cache: &Mutex<Option<String>>) -> Result<String> {
    if let Some(id) = cache.lock().unwrap().as_ref() {
        return Ok(id.clone());
    }
    let id = read_machine_id()?;
    *cache.lock().unwrap() = Some(id.clone());
    Ok(id)
}

fn read_machine_id() -> Result<String> {
    for path in ["/etc/machine-id", "/var/lib/dbus/machine-id"] {
        if let Ok(contents) = fs::read_to_string(path) {
            let trimmed = contents.trim();
            if !trimmed.is_empty() {
                return Ok(trimmed.to_owned());
            }
        }
    }
    Err(Error::Failed("machine-id is unavailable".into()))
}

/// `Properties.Get`.
pub fn properties_get(objects: &ObjectTable, path: &str, interface: &str, property: &str) -> Result<Value> {
    let iface = objects
        .get(path, interface)
        .ok_or_else(|| invalid_args(format!("no interface `{interface}` at `{path}`")))?;
    iface
        .get_property(property)
        .ok_or_else(|| invalid_args(format!("no such property `{property}`")))?
}

/// `Properties.Set`: the caller has already unwrapped the inbound variant's inner value. Checked
/// against the interface's declared property type before `set_property` ever sees it, so a type
/// mismatch reports `InvalidArgs` instead of whatever `set_property` does with the wrong shape.
pub fn properties_set(
    objects: &ObjectTable,
    path: &str,
    interface: &str,
    property: &str,
    value: &Value,
) -> Result<()> {
    let iface = objects
        .get(path, interface)
        .ok_or_else(|| invalid_args(format!("no interface `{interface}` at `{path}`")))?;
    if let Some(declared) = iface.property_signature(property) {
        let actual = value.value_signature();
        if actual != declared {
            return Err(invalid_args(format!(
                "property `{property}` has type `{declared}`, got `{actual}`"
            )));
        }
    }
    iface
        .set_property(property, value)
        .ok_or_else(|| invalid_args(format!("no such property `{property}`")))?
}

/// `Properties.GetAll`.
pub fn properties_get_all(objects: &ObjectTable, path: &str, interface: &str) -> Result<Vec<(String, Value)>> {
    let iface = objects
        .get(path, interface)
        .ok_or_else(|| invalid_args(format!("no interface `{interface}` at `{path}`")))?;
    iface
        .property_names()
        .into_iter()
        .map(|name| {
            let value = iface.get_property(&name).transpose()?.unwrap_or(Value::bool(false));
            Ok((name, value))
        })
        .collect()
}

fn invalid_args(message: String) -> Error {
    Error::MethodError {
        name: INVALID_ARGS.to_owned(),
        message: Some(message),
    }
}

/// `UnknownMethod` error: mentions the interface name so callers can tell
/// "no such path" apart from "path exists, interface doesn't".
pub fn unknown_method(interface: &str, member: &str) -> Error {
    Error::MethodError {
        name: UNKNOWN_METHOD.to_owned(),
        message: Some(format!(
            "no such method `{member}` on interface `{interface}`"
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object_server::Interface;
    use std::sync::Arc;
    use zbus_names::InterfaceName;

    struct Greeter;
    impl Interface for Greeter {
        fn name(&self) -> InterfaceName {
            InterfaceName::try_from("org.example.Greeter").unwrap()
        }
        fn call(&self, _member: &str, _message: &crate::message::Message) -> Option<Result<Value>> {
            None
        }
        fn introspect_body(&self) -> String {
            "    <method name=\"Ping\"/>\n".into()
        }
    }

    #[test]
    fn introspect_includes_registered_and_builtin_interfaces() {
        let mut objects = ObjectTable::default();
        objects
            .register(&zvariant::ObjectPath::try_new("/a").unwrap(), Arc::new(Greeter))
            .unwrap();
        let xml = introspect(&objects, "/a");
        assert!(xml.contains("<interface name=\"org.example.Greeter\">"));
        assert!(xml.contains(PROPERTIES));
        assert!(xml.contains(INTROSPECTABLE));
    }

    struct Labeled(std::sync::Mutex<String>);
    impl Interface for Labeled {
        fn name(&self) -> InterfaceName {
            InterfaceName::try_from("org.example.Labeled").unwrap()
        }
        fn call(&self, _member: &str, _message: &crate::message::Message) -> Option<Result<Value>> {
            None
        }
        fn get_property(&self, name: &str) -> Option<Result<Value>> {
            (name == "Label").then(|| Ok(Value::string(self.0.lock().unwrap().clone())))
        }
        fn set_property(&self, name: &str, value: &Value) -> Option<Result<()>> {
            (name == "Label").then(|| {
                *self.0.lock().unwrap() = value.as_str().unwrap_or_default().to_owned();
                Ok(())
            })
        }
        fn property_names(&self) -> Vec<String> {
            vec!["Label".to_owned()]
        }
        fn property_signature(&self, name: &str) -> Option<zvariant::Signature> {
            (name == "Label").then_some(zvariant::Signature::String)
        }
    }

    #[test]
    fn properties_set_rejects_a_type_mismatch() {
        let mut objects = ObjectTable::default();
        objects
            .register(
                &zvariant::ObjectPath::try_new("/a").unwrap(),
                Arc::new(Labeled(std::sync::Mutex::new(String::new()))),
            )
            .unwrap();
        let err = properties_set(&objects, "/a", "org.example.Labeled", "Label", &Value::int32(1)).unwrap_err();
        assert!(matches!(err, Error::MethodError { ref name, .. } if name == INVALID_ARGS));
    }

    #[test]
    fn properties_set_accepts_a_matching_type() {
        let mut objects = ObjectTable::default();
        objects
            .register(
                &zvariant::ObjectPath::try_new("/a").unwrap(),
                Arc::new(Labeled(std::sync::Mutex::new(String::new()))),
            )
            .unwrap();
        properties_set(&objects, "/a", "org.example.Labeled", "Label", &Value::string("hi")).unwrap();
        let got = properties_get(&objects, "/a", "org.example.Labeled", "Label").unwrap();
        assert_eq!(got.as_str(), Some("hi"));
    }
}
