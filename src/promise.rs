//! Turns one native request into a future that settles exactly once.
//!
//! Listener attachment happens synchronously in the caller's turn, right
//! after the native call. A synchronous failure of the native call is
//! returned as `Err` from [`promisify_call`], never as a rejected future.

use crate::core::{DbError, Key, Result, Value};
use crate::engine::{NativeRequest, RequestResult};
use futures::channel::oneshot;
use std::cell::RefCell;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};

/// Future of one native request's outcome, decoded into `T`.
pub struct Promised<T> {
    request: Rc<NativeRequest>,
    receiver: oneshot::Receiver<Result<T>>,
}

impl<T> Promised<T> {
    /// The native request behind this future.
    pub fn request(&self) -> Rc<NativeRequest> {
        self.request.clone()
    }
}

impl<T> Future for Promised<T> {
    type Output = Result<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.get_mut().receiver).poll(cx) {
            Poll::Ready(Ok(outcome)) => Poll::Ready(outcome),
            // both listeners were dropped without firing
            Poll::Ready(Err(oneshot::Canceled)) => Poll::Ready(Err(DbError::Aborted(
                "request was discarded before it settled".into(),
            ))),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<T> fmt::Debug for Promised<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Promised")
            .field("request", &self.request.id())
            .field("ready_state", &self.request.ready_state())
            .finish()
    }
}

pub(crate) type Slot<T> = Rc<RefCell<Option<oneshot::Sender<Result<T>>>>>;

/// Deliver `outcome` unless the slot already fired.
pub(crate) fn settle<T>(slot: &Slot<T>, outcome: Result<T>) {
    if let Some(sender) = slot.borrow_mut().take() {
        // the receiver may be gone; nobody is waiting then
        let _ = sender.send(outcome);
    }
}

/// Attach listeners to `request` and return its future.
///
/// A request that already settled resolves immediately.
pub fn promisify<T, D>(request: Rc<NativeRequest>, decode: D) -> Promised<T>
where
    T: 'static,
    D: FnOnce(&RequestResult) -> Result<T> + 'static,
{
    let (sender, receiver) = oneshot::channel();
    let slot: Slot<T> = Rc::new(RefCell::new(Some(sender)));

    if let Some(outcome) = request.outcome() {
        settle(&slot, outcome.and_then(|result| decode(&result)));
    } else {
        let on_error = slot.clone();
        request.add_success_listener(Box::new(move |result| settle(&slot, decode(result))));
        request.add_error_listener(Box::new(move |error| settle(&on_error, Err(error.clone()))));
    }
    Promised { request, receiver }
}

/// Invoke a native operation and promisify the request it returns.
pub fn promisify_call<T, C, D>(call: C, decode: D) -> Result<Promised<T>>
where
    T: 'static,
    C: FnOnce() -> Result<Rc<NativeRequest>>,
    D: FnOnce(&RequestResult) -> Result<T> + 'static,
{
    let request = call()?;
    Ok(promisify(request, decode))
}

// ============================================================================
// Result decoders
// ============================================================================

fn unexpected(result: &RequestResult, wanted: &str) -> DbError {
    DbError::TypeMismatch(format!("expected {} result, got {:?}", wanted, result))
}

pub(crate) fn decode_unit(_: &RequestResult) -> Result<()> {
    Ok(())
}

pub(crate) fn decode_value(result: &RequestResult) -> Result<Option<Value>> {
    match result {
        RequestResult::Value(value) => Ok(value.clone()),
        other => Err(unexpected(other, "value")),
    }
}

pub(crate) fn decode_key(result: &RequestResult) -> Result<Option<Key>> {
    match result {
        RequestResult::Key(key) => Ok(key.clone()),
        other => Err(unexpected(other, "key")),
    }
}

/// Keys returned by `put`/`add`/`update`, which always produce one.
pub(crate) fn decode_written_key(result: &RequestResult) -> Result<Key> {
    match result {
        RequestResult::Key(Some(key)) => Ok(key.clone()),
        other => Err(unexpected(other, "written key")),
    }
}

pub(crate) fn decode_values(result: &RequestResult) -> Result<Vec<Value>> {
    match result {
        RequestResult::Values(values) => Ok(values.clone()),
        other => Err(unexpected(other, "values")),
    }
}

pub(crate) fn decode_keys(result: &RequestResult) -> Result<Vec<Key>> {
    match result {
        RequestResult::Keys(keys) => Ok(keys.clone()),
        other => Err(unexpected(other, "keys")),
    }
}

pub(crate) fn decode_count(result: &RequestResult) -> Result<u64> {
    match result {
        RequestResult::Count(count) => Ok(*count),
        other => Err(unexpected(other, "count")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::RequestSource;
    use futures::FutureExt;

    #[test]
    fn test_settles_on_success() {
        let request = NativeRequest::new(RequestSource::Factory, None);
        let mut future = promisify(request.clone(), decode_count);
        assert!((&mut future).now_or_never().is_none());
        request.succeed(RequestResult::Count(2));
        assert_eq!(future.now_or_never(), Some(Ok(2)));
    }

    #[test]
    fn test_settles_once() {
        let request = NativeRequest::new(RequestSource::Factory, None);
        let future = promisify(request.clone(), decode_count);
        request.fail(DbError::ConstraintViolation("dup".into()));
        request.succeed(RequestResult::Count(2));
        assert_eq!(
            future.now_or_never(),
            Some(Err(DbError::ConstraintViolation("dup".into())))
        );
    }

    #[test]
    fn test_settled_request_resolves_immediately() {
        let request = NativeRequest::new(RequestSource::Factory, None);
        request.succeed(RequestResult::Value(Some(Value::from(1))));
        let future = promisify(request, decode_value);
        assert_eq!(future.now_or_never(), Some(Ok(Some(Value::from(1)))));
    }

    #[test]
    fn test_sync_failure_is_not_a_future() {
        let result = promisify_call(
            || Err(DbError::TransactionInactive("idle".into())),
            decode_unit,
        );
        assert!(matches!(result, Err(DbError::TransactionInactive(_))));
    }

    #[test]
    fn test_decode_mismatch() {
        let request = NativeRequest::new(RequestSource::Factory, None);
        let future = promisify(request.clone(), decode_keys);
        request.succeed(RequestResult::Count(1));
        assert!(matches!(future.now_or_never(), Some(Err(DbError::TypeMismatch(_)))));
    }
}
