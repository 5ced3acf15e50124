//! Accepted-versus-completed results.
//!
//! Every intent returns as soon as the backend accepts it. The eventual
//! outcome arrives later, when the pump fires the operation's callback.
//! [`Accepted`] carries the immediate value; its [`Completion`] resolves
//! with the result code once the callback has run.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use matchforge_backend::ResultCode;
use tokio::sync::oneshot;

/// A request the backend has accepted but not yet completed.
#[derive(Debug)]
#[must_use = "the completion may be dropped, but the accepted value is usually needed"]
pub struct Accepted<T> {
    /// Available immediately, e.g. the session name.
    pub value: T,
    /// Resolves when the backend reports the outcome.
    pub completion: Completion,
}

impl<T> Accepted<T> {
    /// Discards the completion. The outcome is still recorded on the
    /// session when it arrives.
    pub fn into_value(self) -> T {
        self.value
    }
}

/// Resolves with the backend's result code for one operation.
///
/// Yields `None` if the callback was dropped without running, which only
/// happens when the backend itself goes away. Dropping a `Completion` is
/// always allowed.
#[derive(Debug)]
pub struct Completion {
    rx: oneshot::Receiver<ResultCode>,
}

impl Future for Completion {
    type Output = Option<ResultCode>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx).poll(cx).map(Result::ok)
    }
}

/// The sending half, moved into the backend callback.
pub(crate) struct Completer {
    tx: oneshot::Sender<ResultCode>,
}

impl Completer {
    pub(crate) fn complete(self, code: ResultCode) {
        // Nobody waiting is fine.
        let _ = self.tx.send(code);
    }
}

pub(crate) fn channel() -> (Completer, Completion) {
    let (tx, rx) = oneshot::channel();
    (Completer { tx }, Completion { rx })
}
