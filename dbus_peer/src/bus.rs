//! The bus singleton: one shared [`Connection`] per bus identity per process, so
//! independent callers asking for "the session bus" end up sharing a single worker pair instead
//! of dialing a fresh socket each time.

use std::collections::HashMap;
use std::sync::{Mutex, OnceLock};

use crate::connection::{Connection, WeakConnection};
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum BusKind {
    Session,
    System,
}

/// Weak only: once every caller drops its `Connection`, the entry lapses and the next request
/// reconnects instead of resurrecting a closed worker.
fn cache() -> &'static Mutex<HashMap<BusKind, WeakConnection>> {
    static CACHE: OnceLock<Mutex<HashMap<BusKind, WeakConnection>>> = OnceLock::new();
    CACHE.get_or_init(|| Mutex::new(HashMap::new()))
}

/// The session bus address: `DBUS_SESSION_BUS_ADDRESS`, with no platform-specific fallback
/// attempted here (a production bus implementation would probe a well-known per-user socket path;
/// this core only follows the documented environment-variable contract).
pub async fn session() -> Result<Connection> {
    get_or_connect(BusKind::Session, || {
        std::env::var("DBUS_SESSION_BUS_ADDRESS")
            .map_err(|_| Error::Failed("DBUS_SESSION_BUS_ADDRESS is not set".into()))
    })
    .await
}

/// The system bus address: `DBUS_SYSTEM_BUS_ADDRESS` if set, else the well-known system
/// socket path.
pub async fn system() -> Result<Connection> {
    get_or_connect(BusKind::System, || {
        Ok(std::env::var("DBUS_SYSTEM_BUS_ADDRESS")
            .unwrap_or_else(|_| "unix:path=/var/run/dbus/system_bus_socket".to_owned()))
    })
    .await
}

/// Whichever bus `DBUS_STARTER_BUS_TYPE` names: the bus a service was activated onto. Unlike
/// [`session`]/[`system`], there is no usable default here — an unset or unrecognized value is a
/// caller error, not "assume session".
pub async fn starter() -> Result<Connection> {
    match std::env::var("DBUS_STARTER_BUS_TYPE") {
        Ok(kind) if kind == "system" => system().await,
        Ok(kind) if kind == "session" => session().await,
        Ok(other) => Err(Error::InvalidArgument(format!(
            "unknown DBUS_STARTER_BUS_TYPE `{other}`"
        ))),
        Err(_) => Err(Error::InvalidArgument(
            "DBUS_STARTER_BUS_TYPE is not set".into(),
        )),
    }
}

async fn get_or_connect(kind: BusKind, address: impl FnOnce() -> Result<String>) -> Result<Connection> {
    if let Some(existing) = cache().lock().unwrap().get(&kind).and_then(WeakConnection::upgrade) {
        return Ok(existing);
    }
    let connection = Connection::connect(&address()?, true).await?;
    cache().lock().unwrap().insert(kind, connection.downgrade());
    Ok(connection)
}

#[cfg(test)]
mod tests {
    use super::*;

    // Both cases live in one test: they mutate the same process-wide env var, and Rust runs
    // `#[test]` functions concurrently by default, so splitting them risks one clobbering the
    // other mid-assertion.
    #[test]
    fn starter_rejects_an_unset_or_unknown_bus_type() {
        std::env::remove_var("DBUS_STARTER_BUS_TYPE");
        let err = async_io::block_on(starter()).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));

        std::env::set_var("DBUS_STARTER_BUS_TYPE", "carrier-pigeon");
        let err = async_io::block_on(starter()).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
        std::env::remove_var("DBUS_STARTER_BUS_TYPE");
    }
}
