use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::task;
use std::time::Duration;

use async_broadcast::{Receiver, Sender};
use async_lock::Mutex;
use futures_core::Stream;
use futures_lite::{FutureExt, StreamExt};
use futures_timer::Delay;

/// Awaits `fut`, giving up after `timeout` if there is one. Returns `None` on timeout.
pub async fn with_timeout<T>(fut: impl Future<Output = T>, timeout: Option<Duration>) -> Option<T> {
    let fut = async { Some(fut.await) };
    match timeout {
        Some(dur) => {
            fut.or(async {
                Delay::new(dur).await;
                None
            })
            .await
        }
        None => fut.await,
    }
}

/// Re-publishes values from "foreign" callbacks to every existing `NotifierReceiver`.
///
/// Values sent while nobody is subscribed are discarded; a receiver only sees values
/// sent after it was created.
pub struct Notifier<T: Send + Clone> {
    capacity: usize,
    inner: Mutex<Weak<NotifierInner<T>>>,
}

struct NotifierInner<T: Send + Clone> {
    sender: Sender<Option<T>>,
}

pub struct NotifierReceiver<T: Send + Clone> {
    holder: Option<Arc<NotifierInner<T>>>,
    receiver: Receiver<Option<T>>,
}

impl<T: Send + Clone> Notifier<T> {
    /// Creates a new inactive `Notifier`.
    pub const fn new(capacity: usize) -> Self {
        Self {
            capacity,
            inner: Mutex::new(Weak::new()),
        }
    }

    /// Checks if any `NotifierReceiver` is alive.
    pub fn is_active(&self) -> bool {
        self.inner.lock_blocking().strong_count() > 0
    }

    /// Creates a new `NotifierReceiver` for the caller to receive values.
    pub fn subscribe(&self) -> NotifierReceiver<T> {
        let mut guard_inner = self.inner.lock_blocking();
        if let Some(inner) = guard_inner.upgrade() {
            let receiver = inner.sender.new_receiver();
            NotifierReceiver {
                holder: Some(inner),
                receiver,
            }
        } else {
            let (mut sender, receiver) = async_broadcast::broadcast(self.capacity);
            sender.set_overflow(true);
            let new_inner = Arc::new(NotifierInner { sender });
            *guard_inner = Arc::downgrade(&new_inner);
            NotifierReceiver {
                holder: Some(new_inner),
                receiver,
            }
        }
    }

    /// Sends a value from the "foreign" callback.
    pub fn notify(&self, value: T) {
        let inner = self.inner.lock_blocking().upgrade();
        if let Some(inner) = inner {
            let _ = inner.sender.try_broadcast(Some(value));
        }
    }

    /// Ends all existing receivers.
    pub fn close(&self) {
        let inner = std::mem::take(&mut *self.inner.lock_blocking()).upgrade();
        if let Some(inner) = inner {
            let _ = inner.sender.try_broadcast(None);
        }
    }
}

impl<T: Send + Clone> futures_core::Stream for NotifierReceiver<T> {
    type Item = T;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut task::Context<'_>) -> task::Poll<Option<T>> {
        if self.holder.is_none() {
            task::Poll::Ready(None)
        } else if let task::Poll::Ready(result) = std::pin::pin!(&mut self.receiver).poll_next(cx) {
            if let Some(value) = result.flatten() {
                task::Poll::Ready(Some(value))
            } else {
                let _ = self.holder.take();
                task::Poll::Ready(None)
            }
        } else {
            task::Poll::Pending
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.receiver.size_hint()
    }
}

impl<T: Send + Clone> Drop for Notifier<T> {
    fn drop(&mut self) {
        self.close()
    }
}

/// Wraps the main stream and also checks an event stream; ends and fuses the main stream when
/// the event stream ends or the checker returns true for a received event item.
pub struct StreamUntil<T, E, S, F>
where
    T: Send + Unpin,
    E: Send,
    S: Stream<Item = E> + Send + Unpin,
    F: Fn(&E) -> bool + Send + Sync + Unpin + 'static,
{
    stream: S,
    event_checker: F,
    ph: PhantomData<T>,
}

impl<T, E, S, F> StreamUntil<T, E, S, F>
where
    T: Send + Unpin,
    E: Send,
    S: Stream<Item = E> + Send + Unpin,
    F: Fn(&E) -> bool + Send + Sync + Unpin + 'static,
{
    /// Creates the `StreamUntil`.
    pub fn create(
        stream: impl Stream<Item = T>,
        event_stream: S,
        event_checker: F,
    ) -> impl Stream<Item = T> {
        stream
            .or(StreamUntil {
                stream: event_stream,
                event_checker,
                ph: PhantomData,
            })
            .fuse()
    }
}

impl<T, E, S, F> futures_core::Stream for StreamUntil<T, E, S, F>
where
    T: Send + Unpin,
    E: Send,
    S: Stream<Item = E> + Send + Unpin,
    F: Fn(&E) -> bool + Send + Sync + Unpin + 'static,
{
    type Item = T;
    fn poll_next(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Option<Self::Item>> {
        use futures_core::task::Poll;
        loop {
            match self.stream.poll_next(cx) {
                Poll::Ready(Some(event)) if (self.event_checker)(&event) => {
                    return Poll::Ready(None)
                }
                Poll::Ready(None) => return Poll::Ready(None),
                // drain unrelated events so that the waker stays registered.
                Poll::Ready(Some(_)) => continue,
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}
