//! The connection façade: the public, cloneable handle applications
//! hold. All mutable state lives behind [`Inner`], shared by `Arc` with the background worker
//! tasks, which only ever see a [`std::sync::Weak`]. That breaks the façade↔worker reference cycle
//! without a process-wide registry — `Weak` already gives the same "never touch a dropped
//! connection" guarantee a registry lookup would, and does it with ownership instead of a lock.

pub mod socket;
pub mod subscription;
mod worker;

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use event_listener::Event;
use futures_util::future::{select, Either};
use zbus_names::{BusName, InterfaceName, MemberName, UniqueName};
use zvariant::{ObjectPath, Value};

#[cfg(feature = "async-io")]
use crate::address::{self, connect::Connected};
use crate::auth;
use crate::connection::socket::{ReadHalf, Socket, WriteHalf};
use crate::connection::subscription::{MatchRule, SignalCallback, SubscriptionTable};
use crate::fdo;
use crate::guid::Guid;
use crate::message::{Field, Message, MessageType};
use crate::object_server::{next_id, Interface, ObjectTable, Subtree, SubtreeTable};
use crate::rt;
use crate::{Error, Result};

const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_millis(25_000);
const DBUS_NAME: &str = "org.freedesktop.DBus";
const DBUS_PATH: &str = "/org/freedesktop/DBus";

struct ReplySlot {
    result: Mutex<Option<Result<Message>>>,
    event: Event,
}

/// Removes `serial` from the reply table when dropped, regardless of how the enclosing future
/// got there — normal completion, timeout, or the caller dropping the `call` future itself (e.g.
/// a higher-level `select!`/timeout wrapper losing the race). Without this, a cancelled call
/// leaks its `Arc<ReplySlot>` in the table forever, since nothing else ever removes it.
struct ReplyTableGuard<'a> {
    inner: &'a Inner,
    serial: u32,
}

impl Drop for ReplyTableGuard<'_> {
    fn drop(&mut self) {
        self.inner.state.lock().unwrap().reply_table.remove(&self.serial);
    }
}

/// A hook run over every inbound message before dispatch and every outbound message after serial
/// assignment but before encoding. Returning `None` drops the message.
pub type Filter = Arc<dyn Fn(Message) -> Option<Message> + Send + Sync>;

/// Everything the main mutex guards. This is the innermost lock, taken
/// only for the duration of a table lookup/mutation, never held across an `.await`.
#[derive(Default)]
struct State {
    reply_table: HashMap<u32, Arc<ReplySlot>>,
    subscriptions: SubscriptionTable,
    objects: ObjectTable,
    subtrees: SubtreeTable,
    filters: Vec<(u64, Filter)>,
}

struct Inner {
    state: Mutex<State>,
    outbound: Mutex<VecDeque<Vec<u8>>>,
    outbound_event: Event,
    serial_counter: AtomicU32,
    unique_name: Mutex<Option<UniqueName>>,
    guid: Mutex<Option<Guid>>,
    closed: AtomicBool,
    close_event: Event,
    machine_id_cache: Mutex<Option<String>>,
    is_bus: bool,
}

impl Inner {
    fn next_serial(&self) -> u32 {
        // 0 is reserved: serial 0 never appears on the wire; wrapping past it mid-run is a
        // real but vanishingly unlikely edge case shared with every other D-Bus implementation.
        let serial = self.serial_counter.fetch_add(1, Ordering::Relaxed);
        if serial == 0 {
            self.serial_counter.fetch_add(1, Ordering::Relaxed)
        } else {
            serial
        }
    }

    fn enqueue(&self, mut message: Message, serial: u32) -> Result<()> {
        message.assign_serial(serial);
        // Outbound suppression (a filter returning `None`) silently drops the message; a pending
        // call waiting on its reply hangs until timeout rather than failing fast, by design, so
        // that a proxy can substitute its own reply later.
        let Some(message) = self.run_filters(message) else { return Ok(()) };
        let bytes = message.encode()?;
        self.outbound.lock().unwrap().push_back(bytes);
        self.outbound_event.notify(usize::MAX);
        Ok(())
    }

    /// Run every registered filter over `message` in registration order, snapshotting the filter
    /// list first so one registered from inside a running filter is not seen by this pass.
    fn run_filters(&self, message: Message) -> Option<Message> {
        let filters: Vec<Filter> = self.state.lock().unwrap().filters.iter().map(|(_, f)| f.clone()).collect();
        filters.into_iter().try_fold(message, |message, filter| filter(message))
    }

    /// Route one inbound frame: after the filter chain, replies and errors complete a pending
    /// [`Connection::call`], signals fan out to matching subscribers, method calls reach the
    /// object/subtree tables or the built-in interfaces, in that order.
    async fn handle_incoming(self: &Arc<Self>, message: Message) {
        let Some(message) = self.run_filters(message) else { return };
        match message.message_type() {
            MessageType::MethodReturn | MessageType::Error => self.complete_reply(message),
            MessageType::Signal => self.dispatch_signal(message),
            MessageType::MethodCall => self.dispatch_method_call(message),
        }
    }

    fn complete_reply(&self, message: Message) {
        let Some(reply_serial) = message.fields().reply_serial() else {
            tracing::debug!("reply message without a reply_serial field, dropping");
            return;
        };
        let slot = { self.state.lock().unwrap().reply_table.remove(&reply_serial) };
        let Some(slot) = slot else {
            // No one is waiting (a timed-out or cancelled call) — nothing to do.
            return;
        };
        let result = if message.message_type() == MessageType::Error {
            let name = message
                .fields()
                .error_name()
                .map(|n| n.as_str().to_owned())
                .unwrap_or_else(|| "org.freedesktop.DBus.Error.Failed".to_owned());
            let detail = message.body().get_child(0).and_then(Value::as_str).map(str::to_owned);
            Err(Error::MethodError { name, message: detail })
        } else {
            Ok(message)
        };
        *slot.result.lock().unwrap() = Some(result);
        slot.event.notify(usize::MAX);
    }

    fn dispatch_signal(self: &Arc<Self>, message: Message) {
        let callbacks = self.state.lock().unwrap().subscriptions.matching(&message);
        for callback in callbacks {
            let message = message.clone();
            // Run off the read loop so one slow subscriber can't stall framing of later messages.
            // Dropping the handle doesn't cancel the task (see `rt::JoinHandle`).
            let _ = rt::spawn(async move { callback(message) });
        }
    }

    fn dispatch_method_call(self: &Arc<Self>, message: Message) {
        let no_reply = message.flags().contains(crate::message::Flags::NoReplyExpected);
        let path = message
            .fields()
            .path()
            .cloned()
            .unwrap_or_else(|| ObjectPath::try_new("/").unwrap());
        let member = message.fields().member().map(|m| m.as_str().to_owned());
        let interface = message.fields().interface().map(|i| i.as_str().to_owned());
        let serial = message.serial();

        let outcome = self.call_handler(&path, interface.as_deref(), member.as_deref(), &message);
        if no_reply {
            return;
        }
        let reply = match outcome {
            Ok(body) => {
                let mut reply = Message::method_return(serial);
                if let Err(e) = reply.set_body(body) {
                    tracing::warn!("failed to attach method reply body: {e}");
                }
                reply
            }
            Err(e) => error_message(serial, &e),
        };
        let result_serial = self.next_serial();
        if let Err(e) = self.enqueue(reply, result_serial) {
            tracing::warn!("failed to encode method reply: {e}");
        }
    }

    fn call_handler(
        &self,
        path: &ObjectPath,
        interface: Option<&str>,
        member: Option<&str>,
        message: &Message,
    ) -> Result<Value> {
        let member = member.ok_or_else(|| fdo::unknown_method("", ""))?;
        let state = self.state.lock().unwrap();

        // A user-registered object implementing one of the standard interfaces at this exact
        // path takes precedence over the built-in handler for that interface.
        if let Some(name) = interface.filter(|i| matches!(*i, fdo::PROPERTIES | fdo::INTROSPECTABLE | fdo::PEER)) {
            if let Some(iface) = state.objects.get(path.as_str(), name) {
                return iface
                    .call(member, message)
                    .unwrap_or_else(|| Err(fdo::unknown_method(name, member)));
            }
        }
        if interface.is_none() && member == "Introspect" {
            if let Some(iface) = state.objects.get(path.as_str(), fdo::INTROSPECTABLE) {
                return iface
                    .call(member, message)
                    .unwrap_or_else(|| Err(fdo::unknown_method(fdo::INTROSPECTABLE, member)));
            }
        }

        match interface {
            Some(fdo::PROPERTIES) => {
                let args = message.body();
                let target_iface = args.get_child(0).and_then(Value::as_str).unwrap_or_default();
                match member {
                    "Get" => {
                        let prop = args.get_child(1).and_then(Value::as_str).unwrap_or_default();
                        fdo::properties_get(&state.objects, path.as_str(), target_iface, prop)
                    }
                    "Set" => {
                        let prop = args.get_child(1).and_then(Value::as_str).unwrap_or_default();
                        let value = args
                            .get_child(2)
                            .and_then(Value::as_variant)
                            .ok_or_else(|| fdo::unknown_method(fdo::PROPERTIES, "Set"))?;
                        fdo::properties_set(&state.objects, path.as_str(), target_iface, prop, value)
                            .map(|()| unit_value())
                    }
                    "GetAll" => {
                        let props = fdo::properties_get_all(&state.objects, path.as_str(), target_iface)?;
                        Ok(dict_value(props))
                    }
                    _ => Err(fdo::unknown_method(fdo::PROPERTIES, member)),
                }
            }
            Some(fdo::INTROSPECTABLE) | None if member == "Introspect" => {
                Ok(Value::string(fdo::introspect(&state.objects, path.as_str())))
            }
            Some(fdo::PEER) => match member {
                "Ping" => Ok(unit_value()),
                "GetMachineId" => fdo::machine_id(&self.machine_id_cache).map(Value::string),
                _ => Err(fdo::unknown_method(fdo::PEER, member)),
            },
            Some(name) => {
                if let Some(iface) = state.objects.get(path.as_str(), name) {
                    iface
                        .call(member, message)
                        .unwrap_or_else(|| Err(fdo::unknown_method(name, member)))
                } else if let Some((relative, subtree)) = state.subtrees.lookup_for_dispatch(path.as_str()) {
                    subtree
                        .dispatch(relative, member, message)
                        .unwrap_or_else(|| Err(fdo::unknown_method(name, member)))
                } else {
                    Err(fdo::unknown_method(name, member))
                }
            }
            None => {
                if let Some((relative, subtree)) = state.subtrees.lookup_for_dispatch(path.as_str()) {
                    subtree
                        .dispatch(relative, member, message)
                        .unwrap_or_else(|| Err(fdo::unknown_method("", member)))
                } else {
                    Err(fdo::unknown_method("", member))
                }
            }
        }
    }

    /// Mark the connection closed; idempotent. Drains the reply table with [`Error::Closed`] so no
    /// pending `call` waits forever on a peer that is never coming back.
    fn close(self: &Arc<Self>) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let slots: Vec<_> = self.state.lock().unwrap().reply_table.drain().map(|(_, s)| s).collect();
        for slot in slots {
            *slot.result.lock().unwrap() = Some(Err(Error::Closed));
            slot.event.notify(usize::MAX);
        }
        self.outbound_event.notify(usize::MAX);
        self.close_event.notify(usize::MAX);
    }
}

/// An empty-tuple body, for replies and errors that carry no arguments.
fn unit_value() -> Value {
    zvariant::StructBuilder::new()
        .build()
        .expect("an indefinite struct builder with no children always builds")
}

fn error_message(reply_serial: u32, error: &Error) -> Message {
    let (name, detail) = match error {
        Error::MethodError { name, message } => (name.clone(), message.clone()),
        other => ("org.freedesktop.DBus.Error.Failed".to_owned(), Some(other.to_string())),
    };
    let error_name = zbus_names::ErrorName::try_from(name.as_str())
        .unwrap_or_else(|_| zbus_names::ErrorName::try_from("org.freedesktop.DBus.Error.Failed").unwrap());
    let mut msg = Message::error(reply_serial, error_name);
    let body = match detail {
        Some(text) => {
            let mut builder = zvariant::StructBuilder::new();
            builder
                .append(Value::string(text))
                .expect("single append into an indefinite struct never fails");
            builder.build().expect("indefinite struct builder never fails to build")
        }
        None => unit_value(),
    };
    let _ = msg.set_body(body);
    msg
}

fn dict_value(entries: Vec<(String, Value)>) -> Value {
    let mut builder = zvariant::DictBuilder::with_types(zvariant::Signature::String, zvariant::Signature::Variant);
    for (key, value) in entries {
        builder
            .insert(Value::string(key), Value::variant(value))
            .expect("dict element types were computed from the same entries");
    }
    builder.build().expect("dict builder with definite types always builds")
}

/// A live peer connection: cheap to clone, every clone shares the same
/// worker tasks and state.
#[derive(Clone)]
pub struct Connection(Arc<Inner>);

impl Connection {
    /// Connect to the given D-Bus address. `bus` selects whether the
    /// `org.freedesktop.DBus.Hello` handshake runs once the transport and auth are up.
    #[cfg(feature = "async-io")]
    pub async fn connect(address_str: &str, bus: bool) -> Result<Self> {
        let parsed = address::Address::parse(address_str)?;
        let connected = crate::address::connect::connect(&parsed).await?;
        Self::from_connected(connected, bus).await
    }

    #[cfg(feature = "async-io")]
    async fn from_connected(connected: Connected, bus: bool) -> Result<Self> {
        let (guid, read, write): (Guid, Box<dyn ReadHalf>, Box<dyn WriteHalf>) = match connected {
            Connected::Unix(stream, _hint) => {
                let (mut r, mut w) = stream.split();
                let guid = auth::authenticate_client(&mut r, &mut w).await?;
                (guid, Box::new(r), Box::new(w))
            }
            Connected::Tcp(stream, _hint) => {
                let (mut r, mut w) = stream.split();
                let guid = auth::authenticate_client(&mut r, &mut w).await?;
                (guid, Box::new(r), Box::new(w))
            }
        };
        let inner = Arc::new(Inner {
            state: Mutex::new(State::default()),
            outbound: Mutex::new(VecDeque::new()),
            outbound_event: Event::new(),
            serial_counter: AtomicU32::new(1),
            unique_name: Mutex::new(None),
            guid: Mutex::new(Some(guid)),
            closed: AtomicBool::new(false),
            close_event: Event::new(),
            machine_id_cache: Mutex::new(None),
            is_bus: bus,
        });
        let _ = rt::spawn(worker::read_loop(Arc::downgrade(&inner), read));
        let _ = rt::spawn(worker::write_loop(Arc::downgrade(&inner), write));

        let connection = Self(inner);
        if bus {
            connection.say_hello().await?;
        }
        Ok(connection)
    }

    /// Wrap an already-authenticated server-side stream as a connection. The listener hands
    /// each accepted peer off to this after running [`auth::authenticate_server`].
    pub(crate) fn from_server_halves(read: Box<dyn ReadHalf>, write: Box<dyn WriteHalf>, guid: Guid) -> Self {
        let inner = Arc::new(Inner {
            state: Mutex::new(State::default()),
            outbound: Mutex::new(VecDeque::new()),
            outbound_event: Event::new(),
            serial_counter: AtomicU32::new(1),
            unique_name: Mutex::new(None),
            guid: Mutex::new(Some(guid)),
            closed: AtomicBool::new(false),
            close_event: Event::new(),
            machine_id_cache: Mutex::new(None),
            is_bus: false,
        });
        let _ = rt::spawn(worker::read_loop(Arc::downgrade(&inner), read));
        let _ = rt::spawn(worker::write_loop(Arc::downgrade(&inner), write));
        Self(inner)
    }

    async fn say_hello(&self) -> Result<()> {
        let mut hello = Message::method_call(
            ObjectPath::try_new(DBUS_PATH).unwrap(),
            MemberName::try_from("Hello").unwrap(),
        );
        hello.fields_mut()?.add(Field::Destination(BusName::try_from(DBUS_NAME).unwrap()));
        hello
            .fields_mut()?
            .add(Field::Interface(InterfaceName::try_from(DBUS_NAME).unwrap()));
        let reply = self.call(hello, DEFAULT_CALL_TIMEOUT).await?;
        let name = reply
            .body()
            .get_child(0)
            .and_then(Value::as_str)
            .ok_or_else(|| Error::Failed("Hello reply had no unique name".into()))?;
        *self.0.unique_name.lock().unwrap() = Some(UniqueName::try_from(name)?);
        Ok(())
    }

    /// Send `message` without waiting for a reply; returns the serial it was assigned.
    pub async fn send(&self, message: Message) -> Result<u32> {
        if self.0.closed.load(Ordering::Acquire) {
            return Err(Error::Closed);
        }
        let serial = self.0.next_serial();
        self.0.enqueue(message, serial)?;
        Ok(serial)
    }

    /// Send a method call and await its reply or timeout. The reply table entry is
    /// reserved before the bytes are handed to the write loop, so a reply racing the send can
    /// never arrive before its slot exists.
    pub async fn call(&self, message: Message, timeout: Duration) -> Result<Message> {
        if self.0.closed.load(Ordering::Acquire) {
            return Err(Error::Closed);
        }
        let slot = Arc::new(ReplySlot {
            result: Mutex::new(None),
            event: Event::new(),
        });
        let serial = self.0.next_serial();
        self.0.state.lock().unwrap().reply_table.insert(serial, slot.clone());
        let _guard = ReplyTableGuard { inner: &self.0, serial };

        if let Err(e) = self.0.enqueue(message, serial) {
            return Err(e);
        }

        let listener = slot.event.listen();
        if let Some(result) = slot.result.lock().unwrap().take() {
            return result;
        }
        match select(listener, Box::pin(rt::sleep(timeout))).await {
            Either::Left(_) => slot
                .result
                .lock()
                .unwrap()
                .take()
                .unwrap_or(Err(Error::Failed("reply slot woke with no result".into()))),
            Either::Right(_) => Err(Error::TimedOut),
        }
    }

    /// A convenience wrapper over [`Connection::call`] for the common case of calling a named
    /// method with a plain argument tuple.
    pub async fn method_call(
        &self,
        destination: Option<BusName>,
        path: ObjectPath,
        interface: InterfaceName,
        member: MemberName,
        args: Value,
        timeout: Duration,
    ) -> Result<Value> {
        let mut message = Message::method_call(path, member);
        if let Some(dest) = destination {
            message.fields_mut()?.add(Field::Destination(dest));
        }
        message.fields_mut()?.add(Field::Interface(interface));
        message.set_body(args)?;
        let reply = self.call(message, timeout).await?;
        Ok(reply.body().clone())
    }

    /// Broadcast a signal.
    pub fn emit_signal(
        &self,
        path: ObjectPath,
        interface: InterfaceName,
        member: MemberName,
        args: Value,
    ) -> Result<u32> {
        let mut message = Message::signal(path, interface, member);
        message.set_body(args)?;
        let serial = self.0.next_serial();
        self.0.enqueue(message, serial)?;
        Ok(serial)
    }

    /// Subscribe to signals matching `rule`. On a bus connection, the first subscriber for a
    /// newly-coalesced rule string also issues `AddMatch` — except for `NameAcquired`/`NameLost`,
    /// which the bus synthesizes for every peer without any registration, so asking it to
    /// `AddMatch` them would just be a wasted round trip (some bus implementations reject it
    /// outright since nothing is actually registerable for those members).
    pub async fn subscribe(&self, rule: MatchRule, callback: SignalCallback) -> Result<u64> {
        let id = next_id();
        let (rule_string, is_new) = {
            let mut state = self.0.state.lock().unwrap();
            state.subscriptions.subscribe(rule.clone(), id, callback)
        };
        let is_synthesized_name_owner_signal = matches!(
            rule.member.as_ref().map(MemberName::as_str),
            Some("NameAcquired") | Some("NameLost")
        );
        if is_new && self.0.is_bus && !rule.no_match_rule && !is_synthesized_name_owner_signal {
            self.dbus_call("AddMatch", Value::string(rule_string)).await?;
        }
        Ok(id)
    }

    /// Remove a subscription by the id returned from [`Connection::subscribe`].
    pub async fn unsubscribe(&self, id: u64) -> Result<bool> {
        let outcome = { self.0.state.lock().unwrap().subscriptions.unsubscribe(id) };
        let Some((rule_string, now_empty)) = outcome else {
            return Ok(false);
        };
        if now_empty && self.0.is_bus {
            self.dbus_call("RemoveMatch", Value::string(rule_string)).await?;
        }
        Ok(true)
    }

    async fn dbus_call(&self, member: &str, arg: Value) -> Result<Value> {
        let mut builder = zvariant::StructBuilder::new();
        builder.append(arg).expect("single-field struct always builds");
        self.method_call(
            Some(BusName::try_from(DBUS_NAME)?),
            ObjectPath::try_new(DBUS_PATH).unwrap(),
            InterfaceName::try_from(DBUS_NAME)?,
            MemberName::try_from(member)?,
            builder.build()?,
            DEFAULT_CALL_TIMEOUT,
        )
        .await
    }

    /// Register a filter run over every inbound message before dispatch and every outbound
    /// message after serial assignment, before encoding, in registration order.
    pub fn add_filter(&self, filter: Filter) -> u64 {
        let id = next_id();
        self.0.state.lock().unwrap().filters.push((id, filter));
        id
    }

    /// Remove a filter by the id returned from [`Connection::add_filter`]. Returns `false` if no
    /// such filter was registered.
    pub fn remove_filter(&self, id: u64) -> bool {
        let mut state = self.0.state.lock().unwrap();
        let before = state.filters.len();
        state.filters.retain(|(fid, _)| *fid != id);
        state.filters.len() != before
    }

    /// Register an interface implementation at `path`.
    pub fn register_object(&self, path: &ObjectPath, interface: Arc<dyn Interface>) -> Result<u64> {
        self.0.state.lock().unwrap().objects.register(path, interface)
    }

    pub fn unregister_object(&self, path: &str, interface: &str) -> bool {
        self.0.state.lock().unwrap().objects.unregister(path, interface)
    }

    /// Register a subtree handler rooted at `path`.
    pub fn register_subtree(&self, path: &ObjectPath, subtree: Arc<dyn Subtree>) -> Result<u64> {
        self.0.state.lock().unwrap().subtrees.register(path, subtree)
    }

    pub fn unregister_subtree(&self, path: &str) -> bool {
        self.0.state.lock().unwrap().subtrees.unregister(path)
    }

    pub fn unique_name(&self) -> Option<UniqueName> {
        self.0.unique_name.lock().unwrap().clone()
    }

    pub fn guid(&self) -> Option<Guid> {
        self.0.guid.lock().unwrap().clone()
    }

    /// A weak handle that does not keep the connection's worker tasks alive. The bus
    /// singleton cache holds one of these rather than a strong `Connection`.
    pub fn downgrade(&self) -> WeakConnection {
        WeakConnection(Arc::downgrade(&self.0))
    }

    pub fn is_closed(&self) -> bool {
        self.0.closed.load(Ordering::Acquire)
    }

    /// Close the connection. Idempotent; pending calls fail with [`Error::Closed`].
    pub fn close(&self) {
        self.0.close();
    }

    /// Resolve once the connection has closed, whether by [`Connection::close`] or because the
    /// peer vanished.
    pub async fn closed(&self) {
        if self.0.closed.load(Ordering::Acquire) {
            return;
        }
        self.0.close_event.listen().await;
    }
}

/// The weak counterpart of [`Connection::downgrade`].
#[derive(Clone)]
pub struct WeakConnection(Weak<Inner>);

impl WeakConnection {
    pub fn upgrade(&self) -> Option<Connection> {
        self.0.upgrade().map(Connection)
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("unique_name", &self.unique_name())
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(all(test, feature = "async-io", unix))]
mod tests {
    use super::*;
    use std::os::unix::net::UnixStream;

    struct Echo;
    impl Interface for Echo {
        fn name(&self) -> InterfaceName {
            InterfaceName::try_from("org.example.Echo").unwrap()
        }
        fn call(&self, member: &str, message: &Message) -> Option<Result<Value>> {
            (member == "Echo").then(|| Ok(message.body().clone()))
        }
    }

    /// Two connections wired directly to each other over a Unix socket pair, as in a
    /// peer-to-peer (non-bus) session: neither side runs `Hello`.
    fn connected_pair() -> (Connection, Connection) {
        let (a, b) = UnixStream::pair().unwrap();
        let (ar, aw) = async_io::Async::new(a).unwrap().split();
        let (br, bw) = async_io::Async::new(b).unwrap().split();
        let guid = Guid::generate();
        (
            Connection::from_server_halves(Box::new(ar), Box::new(aw), guid.clone()),
            Connection::from_server_halves(Box::new(br), Box::new(bw), guid),
        )
    }

    /// Like [`connected_pair`], but the first connection behaves as if dialed against a bus
    /// (`is_bus` true), without ever running `Hello` — enough for `subscribe`'s `AddMatch`
    /// gating to exercise its bus-only branch.
    fn connected_pair_with_first_as_bus() -> (Connection, Connection) {
        let (a, b) = UnixStream::pair().unwrap();
        let (ar, aw) = async_io::Async::new(a).unwrap().split();
        let (br, bw) = async_io::Async::new(b).unwrap().split();
        let guid = Guid::generate();

        let bus_side = Arc::new(Inner {
            state: Mutex::new(State::default()),
            outbound: Mutex::new(VecDeque::new()),
            outbound_event: Event::new(),
            serial_counter: AtomicU32::new(1),
            unique_name: Mutex::new(None),
            guid: Mutex::new(Some(guid.clone())),
            closed: AtomicBool::new(false),
            close_event: Event::new(),
            machine_id_cache: Mutex::new(None),
            is_bus: true,
        });
        let _ = rt::spawn(worker::read_loop(Arc::downgrade(&bus_side), Box::new(ar)));
        let _ = rt::spawn(worker::write_loop(Arc::downgrade(&bus_side), Box::new(aw)));

        (
            Connection(bus_side),
            Connection::from_server_halves(Box::new(br), Box::new(bw), guid),
        )
    }

    #[test]
    fn call_reaches_registered_interface_and_replies() {
        async_io::block_on(async {
            let (client, server) = connected_pair();
            server
                .register_object(&ObjectPath::try_new("/echo").unwrap(), Arc::new(Echo))
                .unwrap();

            let reply = client
                .method_call(
                    None,
                    ObjectPath::try_new("/echo").unwrap(),
                    InterfaceName::try_from("org.example.Echo").unwrap(),
                    MemberName::try_from("Echo").unwrap(),
                    Value::string("hi"),
                    Duration::from_secs(5),
                )
                .await
                .unwrap();
            assert_eq!(reply.as_str(), Some("hi"));
        });
    }

    #[test]
    fn unknown_method_surfaces_as_method_error() {
        async_io::block_on(async {
            let (client, _server) = connected_pair();
            let err = client
                .method_call(
                    None,
                    ObjectPath::try_new("/nope").unwrap(),
                    InterfaceName::try_from("org.example.Missing").unwrap(),
                    MemberName::try_from("DoesNotExist").unwrap(),
                    unit_value(),
                    Duration::from_secs(5),
                )
                .await
                .unwrap_err();
            assert!(matches!(err, Error::MethodError { .. }));
        });
    }

    #[test]
    fn introspect_falls_back_to_builtin_interfaces() {
        async_io::block_on(async {
            let (client, _server) = connected_pair();
            let reply = client
                .method_call(
                    None,
                    ObjectPath::try_new("/").unwrap(),
                    InterfaceName::try_from("org.freedesktop.DBus.Introspectable").unwrap(),
                    MemberName::try_from("Introspect").unwrap(),
                    unit_value(),
                    Duration::from_secs(5),
                )
                .await
                .unwrap();
            let xml = reply.as_str().unwrap();
            assert!(xml.contains("org.freedesktop.DBus.Properties"));
        });
    }

    #[test]
    fn serials_are_unique_and_skip_zero() {
        async_io::block_on(async {
            let (client, _server) = connected_pair();
            let mut seen = std::collections::HashSet::new();
            for _ in 0..16 {
                let serial = client
                    .send(Message::signal(
                        ObjectPath::try_new("/").unwrap(),
                        InterfaceName::try_from("org.example.I").unwrap(),
                        MemberName::try_from("Tick").unwrap(),
                    ))
                    .await
                    .unwrap();
                assert_ne!(serial, 0);
                assert!(seen.insert(serial), "serial {serial} reused");
            }
        });
    }

    #[test]
    fn inbound_filter_rewrites_the_message_before_dispatch() {
        async_io::block_on(async {
            let (client, server) = connected_pair();
            server
                .register_object(&ObjectPath::try_new("/echo").unwrap(), Arc::new(Echo))
                .unwrap();
            server.add_filter(Arc::new(|mut message: Message| {
                if message.message_type() == MessageType::MethodCall {
                    let _ = message.set_body(Value::string("rewritten"));
                }
                Some(message)
            }));

            let reply = client
                .method_call(
                    None,
                    ObjectPath::try_new("/echo").unwrap(),
                    InterfaceName::try_from("org.example.Echo").unwrap(),
                    MemberName::try_from("Echo").unwrap(),
                    Value::string("original"),
                    Duration::from_secs(5),
                )
                .await
                .unwrap();
            assert_eq!(reply.as_str(), Some("rewritten"));
        });
    }

    #[test]
    fn inbound_filter_can_drop_a_signal_before_subscribers_see_it() {
        async_io::block_on(async {
            let (client, server) = connected_pair();
            client.add_filter(Arc::new(|message: Message| {
                (message.message_type() != MessageType::Signal).then_some(message)
            }));
            let seen: Arc<Mutex<u32>> = Arc::new(Mutex::new(0));
            let seen2 = seen.clone();
            client
                .subscribe(
                    MatchRule {
                        interface: Some(InterfaceName::try_from("org.example.I").unwrap()),
                        ..Default::default()
                    },
                    Arc::new(move |_msg| *seen2.lock().unwrap() += 1),
                )
                .await
                .unwrap();

            server
                .emit_signal(
                    ObjectPath::try_new("/").unwrap(),
                    InterfaceName::try_from("org.example.I").unwrap(),
                    MemberName::try_from("Tick").unwrap(),
                    unit_value(),
                )
                .unwrap();
            rt::sleep(Duration::from_millis(50)).await;
            assert_eq!(*seen.lock().unwrap(), 0);
        });
    }

    #[test]
    fn subscribing_to_name_owner_signals_skips_add_match() {
        async_io::block_on(async {
            let (client, server) = connected_pair_with_first_as_bus();
            let add_match_calls: Arc<Mutex<u32>> = Arc::new(Mutex::new(0));
            let add_match_calls2 = add_match_calls.clone();
            server.add_filter(Arc::new(move |message: Message| {
                if message.message_type() == MessageType::MethodCall
                    && message.fields().member().map(MemberName::as_str) == Some("AddMatch")
                {
                    *add_match_calls2.lock().unwrap() += 1;
                }
                Some(message)
            }));

            client
                .subscribe(
                    MatchRule {
                        member: Some(MemberName::try_from("NameAcquired").unwrap()),
                        ..Default::default()
                    },
                    Arc::new(|_msg| {}),
                )
                .await
                .unwrap();
            client
                .subscribe(
                    MatchRule {
                        member: Some(MemberName::try_from("NameLost").unwrap()),
                        ..Default::default()
                    },
                    Arc::new(|_msg| {}),
                )
                .await
                .unwrap();
            rt::sleep(Duration::from_millis(50)).await;
            assert_eq!(*add_match_calls.lock().unwrap(), 0);
        });
    }

    #[test]
    fn outbound_filter_suppression_leaves_a_pending_call_to_time_out() {
        async_io::block_on(async {
            let (client, _server) = connected_pair();
            client.add_filter(Arc::new(|_message: Message| None));
            let err = client
                .call(
                    Message::method_call(
                        ObjectPath::try_new("/never").unwrap(),
                        MemberName::try_from("NeverSent").unwrap(),
                    ),
                    Duration::from_millis(50),
                )
                .await
                .unwrap_err();
            assert!(matches!(err, Error::TimedOut));
        });
    }

    #[test]
    fn close_is_idempotent_and_fails_pending_calls() {
        async_io::block_on(async {
            let (client, _server) = connected_pair();
            let outcome: Arc<Mutex<Option<Result<Message>>>> = Arc::new(Mutex::new(None));
            let outcome2 = outcome.clone();
            let waiter = client.clone();
            let _ = rt::spawn(async move {
                let result = waiter
                    .call(
                        Message::method_call(
                            ObjectPath::try_new("/never").unwrap(),
                            MemberName::try_from("NeverReplies").unwrap(),
                        ),
                        Duration::from_secs(30),
                    )
                    .await;
                *outcome2.lock().unwrap() = Some(result);
            });
            // Give the call a moment to register its reply slot before closing underneath it.
            rt::sleep(Duration::from_millis(20)).await;
            client.close();
            client.close();
            assert!(client.is_closed());

            for _ in 0..200 {
                if outcome.lock().unwrap().is_some() {
                    break;
                }
                std::thread::sleep(Duration::from_millis(5));
            }
            let result = outcome.lock().unwrap().take().expect("pending call never resolved");
            assert!(matches!(result, Err(Error::Closed)));
        });
    }
}
