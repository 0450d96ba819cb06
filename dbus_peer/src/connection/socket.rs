//! The byte-stream abstraction the worker drives: generic
//! enough to cover Unix and TCP sockets under either the `async-io` or `tokio` runtime feature.

use std::io;

use async_trait::async_trait;

use crate::message::{header_lengths, Message, MIN_HEADER_LEN};
use crate::{Error, Result};

#[async_trait]
pub trait ReadHalf: std::fmt::Debug + Send + Sync + 'static {
    async fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize>;
}

#[async_trait]
pub trait WriteHalf: std::fmt::Debug + Send + Sync + 'static {
    async fn send(&mut self, buf: &[u8]) -> io::Result<usize>;
}

/// A full-duplex byte stream, split into independently owned halves so the worker can read while
/// sends from other threads enqueue onto the write half.
pub trait Socket: std::fmt::Debug + Send + Sync + 'static {
    type ReadHalf: ReadHalf;
    type WriteHalf: WriteHalf;

    fn split(self) -> (Self::ReadHalf, Self::WriteHalf);
}

/// Read one complete frame from `read`, growing `scratch` with whatever is left over from a
/// previous short read. Returns `None` on a clean EOF before any bytes of a new frame arrived.
///
/// Takes a trait object rather than `impl ReadHalf` so a boxed, type-erased half can be stored
/// directly on the connection (it otherwise owns one of several distinct per-transport types).
pub async fn receive_message(
    read: &mut dyn ReadHalf,
    scratch: &mut Vec<u8>,
) -> Result<Option<Message>> {
    while scratch.len() < MIN_HEADER_LEN {
        if !read_more(read, scratch).await? {
            if scratch.is_empty() {
                return Ok(None);
            }
            return Err(Error::Failed("connection closed mid-message".into()));
        }
    }
    let total = header_lengths(scratch)?;
    while scratch.len() < total {
        if !read_more(read, scratch).await? {
            return Err(Error::Failed("connection closed mid-message".into()));
        }
    }
    let message = Message::decode(&scratch[..total])?;
    scratch.drain(..total);
    Ok(Some(message))
}

async fn read_more(read: &mut dyn ReadHalf, scratch: &mut Vec<u8>) -> Result<bool> {
    let mut chunk = [0u8; 4096];
    let n = read.recv(&mut chunk).await?;
    if n == 0 {
        return Ok(false);
    }
    scratch.extend_from_slice(&chunk[..n]);
    Ok(true)
}

pub async fn send_message(write: &mut dyn WriteHalf, message: &Message) -> Result<()> {
    let bytes = message.encode()?;
    send_bytes(write, &bytes).await
}

pub async fn send_bytes(write: &mut dyn WriteHalf, bytes: &[u8]) -> Result<()> {
    let mut sent = 0;
    while sent < bytes.len() {
        let n = write.send(&bytes[sent..]).await?;
        if n == 0 {
            return Err(Error::Failed("write returned zero bytes".into()));
        }
        sent += n;
    }
    Ok(())
}

#[cfg(feature = "async-io")]
mod io_impl {
    use std::net::TcpStream;
    #[cfg(unix)]
    use std::os::unix::net::UnixStream;
    use std::sync::Arc;

    use async_io::Async;
    use async_trait::async_trait;
    use futures_util::{AsyncReadExt, AsyncWriteExt};

    use super::{ReadHalf, Socket, WriteHalf};

    #[async_trait]
    impl<T> ReadHalf for Arc<Async<T>>
    where
        T: std::io::Read + std::fmt::Debug + Send + Sync + 'static,
        for<'a> &'a Async<T>: futures_util::AsyncRead + Unpin,
    {
        async fn recv(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            (&**self).read(buf).await
        }
    }

    #[async_trait]
    impl<T> WriteHalf for Arc<Async<T>>
    where
        T: std::io::Write + std::fmt::Debug + Send + Sync + 'static,
        for<'a> &'a Async<T>: futures_util::AsyncWrite + Unpin,
    {
        async fn send(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            (&**self).write(buf).await
        }
    }

    impl<T> Socket for Async<T>
    where
        T: std::io::Read + std::io::Write + std::fmt::Debug + Send + Sync + 'static,
        for<'a> &'a Async<T>: futures_util::AsyncRead + futures_util::AsyncWrite + Unpin,
    {
        type ReadHalf = Arc<Async<T>>;
        type WriteHalf = Arc<Async<T>>;

        fn split(self) -> (Self::ReadHalf, Self::WriteHalf) {
            let arc = Arc::new(self);
            (arc.clone(), arc)
        }
    }

    pub type AsyncUnixStream = Async<UnixStream>;
    pub type AsyncTcpStream = Async<TcpStream>;
}

#[cfg(feature = "async-io")]
pub use io_impl::{AsyncTcpStream, AsyncUnixStream};

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// A `ReadHalf` that hands back one fixed-size slice per call regardless of how much room
    /// `buf` has, to exercise `receive_message`'s short-read accumulation.
    #[derive(Debug)]
    struct Chunked {
        chunks: Mutex<std::collections::VecDeque<Vec<u8>>>,
    }

    #[async_trait]
    impl ReadHalf for Chunked {
        async fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let Some(chunk) = self.chunks.lock().unwrap().pop_front() else {
                return Ok(0);
            };
            let n = chunk.len();
            buf[..n].copy_from_slice(&chunk);
            Ok(n)
        }
    }

    fn frame() -> Vec<u8> {
        let mut message = Message::signal(
            zvariant::ObjectPath::try_new("/").unwrap(),
            zbus_names::InterfaceName::try_from("org.example.I").unwrap(),
            zbus_names::MemberName::try_from("Tick").unwrap(),
        );
        message.assign_serial(7);
        message.encode().unwrap()
    }

    fn in_pieces(bytes: &[u8], piece_len: usize) -> std::collections::VecDeque<Vec<u8>> {
        bytes.chunks(piece_len).map(|c| c.to_vec()).collect()
    }

    #[test]
    fn receive_message_reassembles_a_frame_split_across_many_short_reads() {
        async_io::block_on(async {
            let bytes = frame();
            let mut read = Chunked {
                chunks: Mutex::new(in_pieces(&bytes, 3)),
            };
            let mut scratch = Vec::new();
            let message = receive_message(&mut read, &mut scratch).await.unwrap().unwrap();
            assert_eq!(message.serial(), 7);
            assert!(scratch.is_empty());
        });
    }

    #[test]
    fn receive_message_returns_none_on_eof_before_any_bytes() {
        async_io::block_on(async {
            let mut read = Chunked {
                chunks: Mutex::new(std::collections::VecDeque::new()),
            };
            let mut scratch = Vec::new();
            let outcome = receive_message(&mut read, &mut scratch).await.unwrap();
            assert!(outcome.is_none());
        });
    }

    #[test]
    fn receive_message_errors_when_closed_mid_message() {
        async_io::block_on(async {
            let bytes = frame();
            // Hand back only the first half of the frame, then EOF.
            let mut pieces = in_pieces(&bytes[..bytes.len() / 2], 4);
            pieces.push_back(Vec::new());
            let mut read = Chunked {
                chunks: Mutex::new(pieces),
            };
            let mut scratch = Vec::new();
            let err = receive_message(&mut read, &mut scratch).await.unwrap_err();
            assert!(matches!(err, Error::Failed(_)));
        });
    }
}

#[cfg(feature = "tokio")]
mod tokio_impl {
    use async_trait::async_trait;
    use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf as TokioReadHalf, WriteHalf as TokioWriteHalf};

    use super::{ReadHalf, Socket, WriteHalf};

    #[async_trait]
    impl<T> ReadHalf for TokioReadHalf<T>
    where
        T: AsyncRead + Send + Sync + 'static,
    {
        async fn recv(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            self.read(buf).await
        }
    }

    #[async_trait]
    impl<T> WriteHalf for TokioWriteHalf<T>
    where
        T: AsyncWrite + Send + Sync + 'static,
    {
        async fn send(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.write(buf).await
        }
    }

    impl<T> Socket for T
    where
        T: AsyncRead + AsyncWrite + std::fmt::Debug + Send + Sync + Unpin + 'static,
    {
        type ReadHalf = TokioReadHalf<T>;
        type WriteHalf = TokioWriteHalf<T>;

        fn split(self) -> (Self::ReadHalf, Self::WriteHalf) {
            tokio::io::split(self)
        }
    }
}
