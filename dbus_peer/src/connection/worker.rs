//! The per-connection worker: one read loop and one write loop, each holding only a
//! [`Weak`] reference back to the façade's shared state so a dropped [`super::Connection`] lets
//! both tasks wind down on their own rather than being kept alive by a strong cycle.

use std::sync::Weak;

use crate::connection::socket::{self, ReadHalf, WriteHalf};

use super::Inner;

/// Decode frames off `read` and hand each to [`Inner::handle_incoming`] until EOF, a framing
/// error, or the connection's owner has gone away.
pub(super) async fn read_loop(inner: Weak<Inner>, mut read: Box<dyn ReadHalf>) {
    let mut scratch = Vec::new();
    loop {
        let Some(inner) = inner.upgrade() else { return };
        match socket::receive_message(&mut *read, &mut scratch).await {
            Ok(Some(message)) => {
                inner.handle_incoming(message).await;
            }
            Ok(None) => {
                // Clean EOF: the peer closed its write side.
                inner.close();
                return;
            }
            Err(e) => {
                tracing::debug!("connection read loop ending: {e}");
                inner.close();
                return;
            }
        }
    }
}

/// Drain `inner`'s outbound queue onto `write` until the connection closes and the queue runs dry.
pub(super) async fn write_loop(inner: Weak<Inner>, mut write: Box<dyn WriteHalf>) {
    loop {
        let Some(strong) = inner.upgrade() else { return };
        let next = { strong.outbound.lock().unwrap().pop_front() };
        match next {
            Some(bytes) => {
                if let Err(e) = send_all(&mut *write, &bytes).await {
                    tracing::debug!("connection write loop ending: {e}");
                    strong.close();
                    return;
                }
            }
            None => {
                if strong.closed.load(std::sync::atomic::Ordering::Acquire) {
                    return;
                }
                let listener = strong.outbound_event.listen();
                let still_empty = strong.outbound.lock().unwrap().is_empty();
                drop(strong);
                if still_empty {
                    listener.await;
                }
            }
        }
    }
}

async fn send_all(write: &mut dyn WriteHalf, bytes: &[u8]) -> crate::Result<()> {
    socket::send_bytes(write, bytes).await
}

#[cfg(all(test, feature = "async-io", unix))]
mod tests {
    use super::*;
    use std::os::unix::net::UnixStream;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};

    use event_listener::Event;
    use zvariant::ObjectPath;
    use zbus_names::{InterfaceName, MemberName};

    use crate::connection::socket::Socket;
    use super::super::{Inner, State};
    use crate::message::Message;

    fn fresh_inner() -> Arc<Inner> {
        Arc::new(Inner {
            state: Mutex::new(State::default()),
            outbound: Mutex::new(std::collections::VecDeque::new()),
            outbound_event: Event::new(),
            serial_counter: AtomicU32::new(1),
            unique_name: Mutex::new(None),
            guid: Mutex::new(None),
            closed: AtomicBool::new(false),
            close_event: Event::new(),
            machine_id_cache: Mutex::new(None),
            is_bus: false,
        })
    }

    #[test]
    fn read_loop_closes_the_connection_on_clean_eof() {
        async_io::block_on(async {
            let (a, b) = UnixStream::pair().unwrap();
            let (ar, _aw) = async_io::Async::new(a).unwrap().split();
            drop(b);

            let inner = fresh_inner();
            read_loop(Arc::downgrade(&inner), Box::new(ar)).await;
            assert!(inner.closed.load(Ordering::Acquire));
        });
    }

    #[test]
    fn read_loop_returns_immediately_once_the_owner_is_gone() {
        async_io::block_on(async {
            let (a, _b) = UnixStream::pair().unwrap();
            let (ar, _aw) = async_io::Async::new(a).unwrap().split();
            let inner = fresh_inner();
            let weak = Arc::downgrade(&inner);
            drop(inner);

            // Never reads a byte; the loop should exit on its first `upgrade()` instead.
            read_loop(weak, Box::new(ar)).await;
        });
    }

    #[test]
    fn write_loop_drains_the_queue_then_exits_once_closed() {
        async_io::block_on(async {
            let (a, b) = UnixStream::pair().unwrap();
            let (_ar, aw) = async_io::Async::new(a).unwrap().split();
            let (mut br, _bw) = async_io::Async::new(b).unwrap().split();

            let inner = fresh_inner();
            let mut message = Message::signal(
                ObjectPath::try_new("/").unwrap(),
                InterfaceName::try_from("org.example.I").unwrap(),
                MemberName::try_from("Tick").unwrap(),
            );
            message.assign_serial(1);
            let bytes = message.encode().unwrap();
            inner.outbound.lock().unwrap().push_back(bytes.clone());
            inner.closed.store(true, Ordering::SeqCst);

            write_loop(Arc::downgrade(&inner), Box::new(aw)).await;

            let mut scratch = Vec::new();
            let received = socket::receive_message(&mut br, &mut scratch).await.unwrap().unwrap();
            assert_eq!(received.serial(), 1);
        });
    }
}
