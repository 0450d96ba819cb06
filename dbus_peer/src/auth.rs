//! The SASL EXTERNAL handshake. EXTERNAL is the only mechanism every local D-Bus peer is required
//! to support, so it is the one mechanism implemented inline rather than behind an abstract
//! `authenticate` seam; richer negotiation is left to a higher layer.

use crate::connection::socket::{ReadHalf, WriteHalf};
use crate::guid::Guid;
use crate::{Error, Result};

/// Client side: send the initial NUL, `AUTH EXTERNAL <uid>`, then `BEGIN` once the server agrees.
/// Returns the server's GUID.
pub async fn authenticate_client(read: &mut dyn ReadHalf, write: &mut dyn WriteHalf) -> Result<Guid> {
    write.send(&[0]).await?;
    let uid = hex_uid()?;
    send_line(write, &format!("AUTH EXTERNAL {uid}")).await?;
    let line = read_line(read).await?;
    let guid_hex = line
        .strip_prefix("OK ")
        .ok_or_else(|| Error::Failed(format!("authentication rejected: {line}")))?;
    send_line(write, "BEGIN").await?;
    Guid::try_from(guid_hex.trim())
}

/// Server side: read the client's NUL and `AUTH EXTERNAL` line, reply `OK <guid>`, then consume
/// the client's `BEGIN`.
pub async fn authenticate_server(
    read: &mut dyn ReadHalf,
    write: &mut dyn WriteHalf,
    guid: &Guid,
) -> Result<()> {
    let mut lead = [0u8; 1];
    read_exact(read, &mut lead).await?;
    if lead[0] != 0 {
        return Err(Error::Failed("expected a leading NUL byte".into()));
    }
    let line = read_line(read).await?;
    if !line.starts_with("AUTH EXTERNAL") {
        return Err(Error::Failed(format!("unsupported auth mechanism: {line}")));
    }
    send_line(write, &format!("OK {guid}")).await?;
    let begin = read_line(read).await?;
    if begin != "BEGIN" {
        return Err(Error::Failed(format!("expected BEGIN, got: {begin}")));
    }
    Ok(())
}

#[cfg(unix)]
fn hex_uid() -> Result<String> {
    let uid = nix::unistd::getuid().as_raw();
    Ok(hex::encode(uid.to_string()))
}

#[cfg(not(unix))]
fn hex_uid() -> Result<String> {
    Err(Error::NotSupported(
        "EXTERNAL authentication requires a unix uid".into(),
    ))
}

async fn send_line(write: &mut dyn WriteHalf, line: &str) -> Result<()> {
    let mut bytes = line.as_bytes().to_vec();
    bytes.extend_from_slice(b"\r\n");
    crate::connection::socket::send_bytes(write, &bytes).await
}

async fn read_line(read: &mut dyn ReadHalf) -> Result<String> {
    let mut bytes = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        read_exact(read, &mut byte).await?;
        if byte[0] == b'\n' {
            if bytes.last() == Some(&b'\r') {
                bytes.pop();
            }
            break;
        }
        bytes.push(byte[0]);
    }
    String::from_utf8(bytes).map_err(|_| Error::Failed("auth line was not valid UTF-8".into()))
}

async fn read_exact(read: &mut dyn ReadHalf, buf: &mut [u8]) -> Result<()> {
    let n = read.recv(buf).await?;
    if n == 0 {
        return Err(Error::Failed("connection closed during authentication".into()));
    }
    if n != buf.len() {
        // A one-byte-at-a-time protocol never needs a short-read retry loop in practice; treat it
        // as a hard failure rather than silently accepting a partial handshake byte.
        return Err(Error::Failed("short read during authentication".into()));
    }
    Ok(())
}

#[cfg(all(test, feature = "async-io", unix))]
mod tests {
    use super::*;
    use crate::connection::socket::Socket;
    use std::os::unix::net::UnixStream;

    fn pair() -> (async_io::Async<UnixStream>, async_io::Async<UnixStream>) {
        let (a, b) = UnixStream::pair().unwrap();
        (async_io::Async::new(a).unwrap(), async_io::Async::new(b).unwrap())
    }

    #[test]
    fn external_handshake_round_trips_the_guid() {
        async_io::block_on(async {
            let (client_stream, server_stream) = pair();
            let (mut client_r, mut client_w) = client_stream.split();
            let (mut server_r, mut server_w) = server_stream.split();
            let guid = Guid::generate();

            let (client_result, server_result) = futures_util::join!(
                authenticate_client(&mut client_r, &mut client_w),
                authenticate_server(&mut server_r, &mut server_w, &guid),
            );
            server_result.unwrap();
            assert_eq!(client_result.unwrap(), guid);
        });
    }

    #[test]
    fn server_rejects_unsupported_mechanism() {
        async_io::block_on(async {
            let (client_stream, server_stream) = pair();
            let (_client_r, mut client_w) = client_stream.split();
            let (mut server_r, mut server_w) = server_stream.split();
            let guid = Guid::generate();

            crate::connection::socket::send_bytes(
                &mut client_w,
                b"\0AUTH DBUS_COOKIE_SHA1 deadbeef\r\n",
            )
            .await
            .unwrap();
            let err = authenticate_server(&mut server_r, &mut server_w, &guid)
                .await
                .unwrap_err();
            assert!(matches!(err, Error::Failed(_)));
        });
    }
}
