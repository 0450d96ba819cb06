//! The address connector: try every [`Entry`] in order until one yields a live stream.

use std::fs;
use std::io::Write;
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
#[cfg(unix)]
use std::os::unix::net::UnixStream;

use crate::address::{Address, Entry, Family, TcpParams, UnixPath};
use crate::connection::socket::{AsyncTcpStream, AsyncUnixStream};
use crate::{Error, Result};

/// The result of a successful connect: a live stream plus whatever GUID the address string
/// carried for that entry (not yet verified against what auth actually returns).
pub enum Connected {
    Unix(AsyncUnixStream, Option<String>),
    Tcp(AsyncTcpStream, Option<String>),
}

/// Try each entry of `address` in order; return the first that connects. `nonce-tcp`
/// entries additionally read the nonce file and write it as the connection's first outbound
/// bytes before returning.
pub async fn connect(address: &Address) -> Result<Connected> {
    let mut last_err = None;
    for (index, entry) in address.entries().iter().enumerate() {
        match connect_entry(entry, address.guid_for(index)).await {
            Ok(connected) => return Ok(connected),
            Err(e) => last_err = Some(e),
        }
    }
    Err(last_err.unwrap_or_else(|| Error::InvalidArgument("address has no entries".into())))
}

async fn connect_entry(entry: &Entry, guid: Option<&str>) -> Result<Connected> {
    match entry {
        Entry::Unix(path) => connect_unix(path, guid),
        Entry::Tcp(params) => connect_tcp(params, guid).await,
        Entry::NonceTcp(params, noncefile) => {
            let nonce = fs::read(noncefile)
                .map_err(|e| Error::Failed(format!("reading noncefile `{noncefile}`: {e}")))?;
            if nonce.len() != 16 {
                return Err(Error::InvalidArgument(format!(
                    "noncefile `{noncefile}` must contain exactly 16 bytes"
                )));
            }
            // Written synchronously before wrapping the stream for the worker: the nonce
            // must be the very first outbound bytes, ahead of anything the worker later queues.
            connect_raw_tcp(params, guid, |stream| stream.write_all(&nonce)).await
        }
        Entry::Autolaunch => {
            let resolved = autolaunch_address()?;
            Box::pin(connect(&resolved)).await
        }
    }
}

#[cfg(unix)]
fn connect_unix(path: &UnixPath, _guid: Option<&str>) -> Result<Connected> {
    let stream = match path {
        UnixPath::Path(p) => UnixStream::connect(p)
            .map_err(|e| Error::Failed(format!("connecting to unix socket `{p}`: {e}")))?,
        UnixPath::Abstract(name) => connect_abstract(name)?,
        UnixPath::Dir(_) | UnixPath::TmpDir(_) => {
            return Err(Error::InvalidArgument(
                "dir/tmpdir unix addresses are listen-only, not dialable".into(),
            ))
        }
    };
    let socket = async_io::Async::new(stream)?;
    Ok(Connected::Unix(socket, _guid.map(str::to_owned)))
}

#[cfg(not(unix))]
fn connect_unix(_path: &UnixPath, _guid: Option<&str>) -> Result<Connected> {
    Err(Error::NotSupported("unix sockets are unavailable on this platform".into()))
}

#[cfg(all(unix, target_os = "linux"))]
fn connect_abstract(name: &str) -> Result<UnixStream> {
    use std::os::linux::net::SocketAddrExt;
    use std::os::unix::net::SocketAddr as UnixSocketAddr;
    let addr = UnixSocketAddr::from_abstract_name(name.as_bytes())
        .map_err(|e| Error::Failed(format!("building abstract socket address: {e}")))?;
    UnixStream::connect_addr(&addr)
        .map_err(|e| Error::Failed(format!("connecting to abstract socket `{name}`: {e}")))
}

#[cfg(all(unix, not(target_os = "linux")))]
fn connect_abstract(_name: &str) -> Result<UnixStream> {
    Err(Error::NotSupported(
        "abstract unix sockets are Linux-only".into(),
    ))
}

async fn connect_tcp(params: &TcpParams, guid: Option<&str>) -> Result<Connected> {
    connect_raw_tcp(params, guid, |_| Ok(())).await
}

async fn connect_raw_tcp(
    params: &TcpParams,
    guid: Option<&str>,
    mut before_wrap: impl FnMut(&mut TcpStream) -> std::io::Result<()>,
) -> Result<Connected> {
    let host = params
        .host
        .as_deref()
        .ok_or_else(|| Error::InvalidArgument("tcp: requires a host".into()))?;
    let port = params
        .port
        .ok_or_else(|| Error::InvalidArgument("tcp: requires a port".into()))?;
    let candidates: Vec<SocketAddr> = (host, port)
        .to_socket_addrs()
        .map_err(|e| Error::Failed(format!("resolving `{host}:{port}`: {e}")))?
        .filter(|a| match params.family {
            Some(Family::Ipv4) => a.is_ipv4(),
            Some(Family::Ipv6) => a.is_ipv6(),
            None => true,
        })
        .collect();
    let mut last_err = None;
    for addr in candidates {
        match TcpStream::connect(addr) {
            Ok(mut stream) => {
                before_wrap(&mut stream)
                    .map_err(|e| Error::Failed(format!("nonce handshake on `{addr}`: {e}")))?;
                let socket = async_io::Async::new(stream)?;
                return Ok(Connected::Tcp(socket, guid.map(str::to_owned)));
            }
            Err(e) => last_err = Some(Error::Failed(format!("connecting to `{addr}`: {e}"))),
        }
    }
    Err(last_err.unwrap_or_else(|| {
        Error::Failed(format!("`{host}:{port}` resolved to no usable addresses"))
    }))
}

/// The platform autolaunch helper: on POSIX with a usable
/// `$DISPLAY`, invoke `dbus-launch --autolaunch`; its stdout is itself a D-Bus address string.
///
/// `dbus-launch` itself never reads `$DISPLAY`, but this keeps the precondition since dropping
/// it silently would change autolaunch's failure mode on headless hosts from "clear error" to
/// "dbus-launch itself fails confusingly".
fn autolaunch_address() -> Result<Address> {
    if std::env::var_os("DISPLAY").is_none() {
        return Err(Error::Failed(
            "autolaunch: requires the DISPLAY environment variable".into(),
        ));
    }
    let output = std::process::Command::new("dbus-launch")
        .arg("--autolaunch")
        .arg("--binary-syntax")
        .output()
        .map_err(|e| Error::Failed(format!("running dbus-launch: {e}")))?;
    if !output.status.success() {
        return Err(Error::Failed("dbus-launch exited with failure".into()));
    }
    let text = String::from_utf8(output.stdout)
        .map_err(|_| Error::Failed("dbus-launch produced non-UTF-8 output".into()))?;
    let address = text
        .split('\0')
        .next()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| Error::Failed("dbus-launch produced no address".into()))?;
    Address::parse(address)
}

#[cfg(all(test, feature = "async-io", unix))]
mod tests {
    use super::*;
    use std::io::Read as _;
    use std::net::TcpListener;
    use std::os::unix::net::UnixListener;

    #[test]
    fn connect_unix_reaches_a_listening_socket() {
        async_io::block_on(async {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("sock").to_str().unwrap().to_owned();
            let listener = UnixListener::bind(&path).unwrap();

            let address = Address::parse(&format!("unix:path={}", crate::address::encode(&path))).unwrap();
            let connected = connect(&address).await.unwrap();
            assert!(matches!(connected, Connected::Unix(..)));
            listener.accept().unwrap();
        });
    }

    #[test]
    fn connect_falls_back_to_the_next_entry_when_the_first_fails() {
        async_io::block_on(async {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            let port = listener.local_addr().unwrap().port();

            let address = Address::parse(&format!(
                "unix:path=/nonexistent/dbus-peer-test-socket;tcp:host=127.0.0.1,port={port}"
            ))
            .unwrap();
            let connected = connect(&address).await.unwrap();
            assert!(matches!(connected, Connected::Tcp(..)));
            listener.accept().unwrap();
        });
    }

    #[test]
    fn connect_fails_when_every_entry_fails() {
        async_io::block_on(async {
            let address =
                Address::parse("unix:path=/nonexistent/dbus-peer-test-socket-a;unix:path=/nonexistent/dbus-peer-test-socket-b")
                    .unwrap();
            assert!(connect(&address).await.is_err());
        });
    }

    #[test]
    fn nonce_tcp_writes_the_nonce_before_anything_else() {
        async_io::block_on(async {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            let port = listener.local_addr().unwrap().port();
            let noncefile = tempfile::NamedTempFile::new().unwrap();
            let nonce = [7u8; 16];
            std::fs::write(noncefile.path(), nonce).unwrap();

            let address = Address::parse(&format!(
                "nonce-tcp:host=127.0.0.1,port={port},noncefile={}",
                crate::address::encode(noncefile.path().to_str().unwrap())
            ))
            .unwrap();

            // `accept`/`read_exact` are blocking calls; run them on a real OS thread so they don't
            // stall the single-threaded executor driving `connect` below.
            let accept_thread = std::thread::spawn(move || {
                let (mut stream, _) = listener.accept().unwrap();
                let mut buf = [0u8; 16];
                stream.read_exact(&mut buf).unwrap();
                buf
            });
            connect(&address).await.unwrap();
            let accepted = accept_thread.join().unwrap();
            assert_eq!(accepted, nonce);
        });
    }
}
