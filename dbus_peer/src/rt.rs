//! Runtime duality: the worker and server accept loops are plain
//! futures; this module is the only place that knows how to actually drive them, so the rest of
//! the crate never has to `#[cfg]` on the runtime feature itself.

use std::future::Future;
use std::time::Duration;

/// An opaque handle to a spawned task. Dropping it does not cancel the task (matching both
/// `async-executor`'s and `tokio`'s detached-by-default behavior).
pub struct JoinHandle<T>(Inner<T>);

#[cfg(feature = "async-io")]
enum Inner<T> {
    AsyncIo(async_executor::Task<T>),
}

#[cfg(all(feature = "tokio", not(feature = "async-io")))]
enum Inner<T> {
    Tokio(tokio::task::JoinHandle<T>),
}

#[cfg(feature = "async-io")]
pub fn spawn<F>(future: F) -> JoinHandle<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    JoinHandle(Inner::AsyncIo(executor().spawn(future)))
}

#[cfg(all(feature = "tokio", not(feature = "async-io")))]
pub fn spawn<F>(future: F) -> JoinHandle<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    JoinHandle(Inner::Tokio(tokio::spawn(future)))
}

#[cfg(feature = "async-io")]
fn executor() -> &'static async_executor::Executor<'static> {
    use std::sync::OnceLock;
    static EXECUTOR: OnceLock<async_executor::Executor<'static>> = OnceLock::new();
    EXECUTOR.get_or_init(|| {
        let ex = async_executor::Executor::new();
        // One dedicated thread drives every `dbus_peer` background task for the life of the
        // process, mirroring how a hand-rolled connection worker thread would be kept alive.
        std::thread::Builder::new()
            .name("dbus_peer-worker".into())
            .spawn(|| {
                async_io::block_on(executor().run(std::future::pending::<()>()));
            })
            .expect("spawning the dbus_peer background thread");
        ex
    })
}

/// Resolve after `duration` (used for call timeouts), without requiring callers to know which
/// runtime feature is active.
#[cfg(feature = "async-io")]
pub async fn sleep(duration: Duration) {
    async_io::Timer::after(duration).await;
}

#[cfg(all(feature = "tokio", not(feature = "async-io")))]
pub async fn sleep(duration: Duration) {
    tokio::time::sleep(duration).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[test]
    fn spawn_runs_the_future() {
        let ran = Arc::new(AtomicBool::new(false));
        let ran2 = ran.clone();
        let handle = spawn(async move {
            ran2.store(true, Ordering::SeqCst);
        });
        drop(handle);
        for _ in 0..1000 {
            if ran.load(Ordering::SeqCst) {
                return;
            }
            std::thread::sleep(std::time::Duration::from_millis(1));
        }
        panic!("spawned future never ran");
    }
}
