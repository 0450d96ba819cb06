//! The server listener: bind an address, accept peers, authenticate each as the server
//! role, and hand back a ready [`Connection`] per accepted peer.

use std::future::Future;
use std::io::Write;
#[cfg(unix)]
use std::os::unix::net::UnixListener;
use std::pin::Pin;

use async_io::Async;
use rand::RngCore;

use crate::address::{Address, Entry, Family, TcpParams, UnixPath};
use crate::auth;
use crate::connection::socket::Socket;
use crate::connection::Connection;
use crate::guid::Guid;
use crate::{Error, Result};

enum Bound {
    #[cfg(unix)]
    Unix(Async<UnixListener>, Option<String>),
    Tcp(Async<std::net::TcpListener>, Option<NonceFile>),
}

struct NonceFile {
    path: String,
    nonce: [u8; 16],
}

/// A bound listener, ready to accept peers. One [`Bound`] per address entry — a multi-entry
/// address binds one listening endpoint per entry.
pub struct Server {
    bound: Vec<Bound>,
    guid: Guid,
}

impl Server {
    /// Bind every entry of `address_str`, one listener each. [`Server::accept`] then races all
    /// of them and returns whichever peer connects first.
    pub async fn bind(address_str: &str) -> Result<Self> {
        let parsed = Address::parse(address_str)?;
        if parsed.entries().is_empty() {
            return Err(Error::InvalidArgument("address has no entries".into()));
        }
        let guid = Guid::generate();
        let mut bound = Vec::with_capacity(parsed.entries().len());
        for entry in parsed.entries() {
            let listener = match entry {
                Entry::Unix(path) => bind_unix(path)?,
                Entry::Tcp(params) => bind_tcp(params, None)?,
                Entry::NonceTcp(params, noncefile) => bind_tcp(params, Some(noncefile.clone()))?,
                Entry::Autolaunch => {
                    return Err(Error::InvalidArgument(
                        "autolaunch: is a client-only transport".into(),
                    ))
                }
            };
            bound.push(listener);
        }
        Ok(Self { bound, guid })
    }

    pub fn guid(&self) -> &Guid {
        &self.guid
    }

    /// The address clients should use to reach this server, if any bound entry has one
    /// meaningful to report (a unix socket path or a tcp host:port; abstract names are surfaced
    /// by the caller instead, since this module doesn't track the original address string). When
    /// several entries were bound, this is the first one with a reportable address.
    pub fn listening_address(&self) -> Option<String> {
        self.bound.iter().find_map(|bound| match bound {
            #[cfg(unix)]
            Bound::Unix(_, Some(path)) => Some(format!(
                "unix:path={},guid={}",
                crate::address::encode(path),
                self.guid
            )),
            #[cfg(unix)]
            Bound::Unix(_, None) => None,
            Bound::Tcp(listener, _) => listener
                .get_ref()
                .local_addr()
                .ok()
                .map(|addr| format!("tcp:host={},port={},guid={}", addr.ip(), addr.port(), self.guid)),
        })
    }

    /// Accept one peer on whichever bound entry connects first, authenticate it as the server,
    /// and return a ready connection.
    pub async fn accept(&self) -> Result<Connection> {
        let attempts: Vec<Pin<Box<dyn Future<Output = Result<Connection>> + '_>>> = self
            .bound
            .iter()
            .map(|bound| Box::pin(accept_one(bound, &self.guid)) as _)
            .collect();
        let (result, _index, _still_pending) = futures_util::future::select_all(attempts).await;
        result
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        for bound in &self.bound {
            #[cfg(unix)]
            if let Bound::Unix(_, Some(path)) = bound {
                let _ = std::fs::remove_file(path);
            }
            if let Bound::Tcp(_, Some(nonce)) = bound {
                let _ = std::fs::remove_file(&nonce.path);
            }
        }
    }
}

async fn accept_one(bound: &Bound, guid: &Guid) -> Result<Connection> {
    match bound {
        #[cfg(unix)]
        Bound::Unix(listener, _) => {
            let (stream, _) = listener.accept().await?;
            let (mut r, mut w) = stream.split();
            auth::authenticate_server(&mut r, &mut w, guid).await?;
            Ok(Connection::from_server_halves(Box::new(r), Box::new(w), guid.clone()))
        }
        Bound::Tcp(listener, nonce) => {
            let (stream, _) = listener.accept().await?;
            if let Some(nonce) = nonce {
                verify_nonce(&stream, &nonce.nonce).await?;
            }
            let (mut r, mut w) = stream.split();
            auth::authenticate_server(&mut r, &mut w, guid).await?;
            Ok(Connection::from_server_halves(Box::new(r), Box::new(w), guid.clone()))
        }
    }
}

#[cfg(unix)]
fn bind_unix(path: &UnixPath) -> Result<Bound> {
    match path {
        UnixPath::Path(p) => {
            let _ = std::fs::remove_file(p);
            let listener = UnixListener::bind(p)
                .map_err(|e| Error::Failed(format!("binding unix socket `{p}`: {e}")))?;
            Ok(Bound::Unix(Async::new(listener)?, Some(p.clone())))
        }
        UnixPath::Dir(dir) | UnixPath::TmpDir(dir) => {
            let name = format!("dbus-peer-{}", hex::encode(random_bytes()));
            let path = format!("{}/{}", dir.trim_end_matches('/'), name);
            let listener = UnixListener::bind(&path)
                .map_err(|e| Error::Failed(format!("binding unix socket `{path}`: {e}")))?;
            Ok(Bound::Unix(Async::new(listener)?, Some(path)))
        }
        UnixPath::Abstract(name) => bind_abstract(name),
    }
}

#[cfg(not(unix))]
fn bind_unix(_path: &UnixPath) -> Result<Bound> {
    Err(Error::NotSupported("unix sockets are unavailable on this platform".into()))
}

#[cfg(all(unix, target_os = "linux"))]
fn bind_abstract(name: &str) -> Result<Bound> {
    use std::os::linux::net::SocketAddrExt;
    use std::os::unix::net::SocketAddr as UnixSocketAddr;
    let addr = UnixSocketAddr::from_abstract_name(name.as_bytes())
        .map_err(|e| Error::Failed(format!("building abstract socket address: {e}")))?;
    let listener = UnixListener::bind_addr(&addr)
        .map_err(|e| Error::Failed(format!("binding abstract socket `{name}`: {e}")))?;
    Ok(Bound::Unix(Async::new(listener)?, None))
}

#[cfg(all(unix, not(target_os = "linux")))]
fn bind_abstract(_name: &str) -> Result<Bound> {
    Err(Error::NotSupported("abstract unix sockets are Linux-only".into()))
}

fn bind_tcp(params: &TcpParams, noncefile: Option<String>) -> Result<Bound> {
    let host = params.host.as_deref().unwrap_or("127.0.0.1");
    let port = params.port.unwrap_or(0);
    let bind_addr = match params.family {
        Some(Family::Ipv6) => format!("[{host}]:{port}"),
        _ => format!("{host}:{port}"),
    };
    let listener = std::net::TcpListener::bind(&bind_addr)
        .map_err(|e| Error::Failed(format!("binding tcp `{bind_addr}`: {e}")))?;
    let nonce = match noncefile {
        Some(path) => {
            let bytes = random_bytes();
            let mut file = std::fs::File::create(&path)
                .map_err(|e| Error::Failed(format!("creating noncefile `{path}`: {e}")))?;
            file.write_all(&bytes)
                .map_err(|e| Error::Failed(format!("writing noncefile `{path}`: {e}")))?;
            Some(NonceFile { path, nonce: bytes })
        }
        None => None,
    };
    Ok(Bound::Tcp(Async::new(listener)?, nonce))
}

fn random_bytes() -> [u8; 16] {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes
}

async fn verify_nonce(stream: &Async<std::net::TcpStream>, expected: &[u8; 16]) -> Result<()> {
    use futures_util::AsyncReadExt;
    let mut buf = [0u8; 16];
    (&*stream)
        .read_exact(&mut buf)
        .await
        .map_err(|e| Error::Failed(format!("reading nonce handshake: {e}")))?;
    if &buf != expected {
        return Err(Error::Failed("nonce-tcp handshake mismatch".into()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accept_and_connect_complete_the_handshake() {
        async_io::block_on(async {
            let server = Server::bind("tcp:host=127.0.0.1,port=0").await.unwrap();
            let address = server.listening_address().unwrap();

            let (accepted, connected) =
                futures_util::join!(server.accept(), Connection::connect(&address, false));
            let accepted = accepted.unwrap();
            let connected = connected.unwrap();
            assert_eq!(accepted.guid(), connected.guid());
            assert_eq!(accepted.guid().as_ref(), Some(server.guid()));
        });
    }

    #[test]
    fn nonce_tcp_rejects_a_mismatched_nonce() {
        async_io::block_on(async {
            let noncefile = tempfile::NamedTempFile::new().unwrap();
            let address = format!(
                "nonce-tcp:host=127.0.0.1,port=0,noncefile={}",
                crate::address::encode(noncefile.path().to_str().unwrap())
            );
            let server = Server::bind(&address).await.unwrap();
            let addr = match &server.bound[0] {
                Bound::Tcp(listener, _) => listener.get_ref().local_addr().unwrap(),
                #[cfg(unix)]
                _ => unreachable!(),
            };
            let (accept_result, _connect_attempt) = futures_util::join!(server.accept(), async {
                let stream = Async::<std::net::TcpStream>::connect(addr).await.unwrap();
                futures_util::AsyncWriteExt::write_all(&mut &stream, &[0u8; 16]).await.unwrap();
                stream
            });
            assert!(accept_result.is_err());
        });
    }

    #[test]
    fn binds_every_entry_and_accepts_on_whichever_connects_first() {
        async_io::block_on(async {
            let server = Server::bind("tcp:host=127.0.0.1,port=0;tcp:host=127.0.0.1,port=0")
                .await
                .unwrap();
            assert_eq!(server.bound.len(), 2);
            let second_addr = match &server.bound[1] {
                Bound::Tcp(listener, _) => listener.get_ref().local_addr().unwrap(),
                #[cfg(unix)]
                _ => unreachable!(),
            };

            let (accepted, connected) = futures_util::join!(server.accept(), async {
                let address = format!(
                    "tcp:host={},port={},guid={}",
                    second_addr.ip(),
                    second_addr.port(),
                    server.guid()
                );
                Connection::connect(&address, false).await
            });
            assert_eq!(accepted.unwrap().guid().as_ref(), Some(server.guid()));
            connected.unwrap();
        });
    }
}
