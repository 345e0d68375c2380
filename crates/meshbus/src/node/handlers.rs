// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Handler objects stored in the registries: typed subscription
//! callbacks, typed service repliers, and pending outgoing requests.
//!
//! The typed handlers erase their payload type behind small dispatch
//! traits so the runtime can move bytes without knowing schemas. A
//! handler is immutable after construction except for the request
//! flags, and is shared between the registry and in-flight dispatchers.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::error::{Error, Result};
use crate::message::Message;

fn new_uuid() -> String {
    uuid::Uuid::new_v4().to_string()
}

// =======================================================================
// Subscriptions
// =======================================================================

/// Type-erased subscription dispatch: deserialize a payload and run the
/// registered callback.
pub trait SubscriptionDispatch: Send + Sync {
    fn node_uuid(&self) -> &str;
    fn handler_uuid(&self) -> &str;
    fn type_name(&self) -> &'static str;

    /// Decode `payload` and invoke the callback. Reports failure when
    /// the payload does not match the expected type.
    fn run(&self, topic: &str, payload: &[u8]) -> Result<()>;
}

/// A typed subscription callback owned by one node.
pub struct SubscriptionHandler<T: Message> {
    n_uuid: String,
    h_uuid: String,
    callback: Box<dyn Fn(&str, T) + Send + Sync>,
}

impl<T: Message> SubscriptionHandler<T> {
    pub fn new(n_uuid: &str, callback: impl Fn(&str, T) + Send + Sync + 'static) -> Self {
        Self {
            n_uuid: n_uuid.to_string(),
            h_uuid: new_uuid(),
            callback: Box::new(callback),
        }
    }
}

impl<T: Message> SubscriptionDispatch for SubscriptionHandler<T> {
    fn node_uuid(&self) -> &str {
        &self.n_uuid
    }

    fn handler_uuid(&self) -> &str {
        &self.h_uuid
    }

    fn type_name(&self) -> &'static str {
        T::type_name()
    }

    fn run(&self, topic: &str, payload: &[u8]) -> Result<()> {
        let msg = T::decode(payload)?;
        // User code sees the plain name, not the partition-qualified one.
        (self.callback)(crate::topic::strip_partition(topic), msg);
        Ok(())
    }
}

// =======================================================================
// Repliers
// =======================================================================

/// Type-erased service dispatch: decode a request blob, run the service
/// callback, return the response blob plus the success flag.
pub trait ReplierDispatch: Send + Sync {
    fn handler_uuid(&self) -> &str;
    fn req_type_name(&self) -> &'static str;
    fn rep_type_name(&self) -> &'static str;

    fn run(&self, topic: &str, req: &[u8]) -> (Vec<u8>, bool);
}

/// A typed service callback. Returning `None` reports failure to the
/// requester.
pub struct ReplierHandler<Req: Message, Rep: Message> {
    h_uuid: String,
    callback: Box<dyn Fn(&str, Req) -> Option<Rep> + Send + Sync>,
}

impl<Req: Message, Rep: Message> ReplierHandler<Req, Rep> {
    pub fn new(callback: impl Fn(&str, Req) -> Option<Rep> + Send + Sync + 'static) -> Self {
        Self {
            h_uuid: new_uuid(),
            callback: Box::new(callback),
        }
    }
}

impl<Req: Message, Rep: Message> ReplierDispatch for ReplierHandler<Req, Rep> {
    fn handler_uuid(&self) -> &str {
        &self.h_uuid
    }

    fn req_type_name(&self) -> &'static str {
        Req::type_name()
    }

    fn rep_type_name(&self) -> &'static str {
        Rep::type_name()
    }

    fn run(&self, topic: &str, req: &[u8]) -> (Vec<u8>, bool) {
        let req = match Req::decode(req) {
            Ok(req) => req,
            Err(e) => {
                log::warn!("[node] service request on [{}] does not decode: {}", topic, e);
                return (Vec::new(), false);
            }
        };

        match (self.callback)(crate::topic::strip_partition(topic), req) {
            Some(rep) => match rep.encode() {
                Ok(bytes) => (bytes, true),
                Err(e) => {
                    log::warn!("[node] service response on [{}] does not encode: {}", topic, e);
                    (Vec::new(), false)
                }
            },
            None => (Vec::new(), false),
        }
    }
}

// =======================================================================
// Pending requests
// =======================================================================

/// Lifecycle of a pending request. It transitions out of `Pending`
/// exactly once: to `Done` on the first response, or to `Dead` on
/// timeout/cancellation. Later responses are dropped.
enum Completion {
    Pending,
    Done { rep: Vec<u8>, result: bool },
    Dead,
}

/// Callback form of a response: raw reply bytes plus the success flag.
pub type ResponseCallback = Box<dyn Fn(&str, &[u8], bool) + Send + Sync>;

/// A pending outgoing service request.
///
/// Holds the serialized request, the owning node, the request UUID, and
/// either an async response callback or a rendezvous a blocking caller
/// waits on. The `requested` flag flips once the bytes have been handed
/// to the transport, so repeated discovery notifications never resend.
pub struct RequestHandler {
    n_uuid: String,
    req_uuid: String,
    req_data: Vec<u8>,
    requested: AtomicBool,
    callback: Option<ResponseCallback>,
    completion: Mutex<Completion>,
    available: Condvar,
}

impl RequestHandler {
    pub fn new(n_uuid: &str, req_data: Vec<u8>, callback: Option<ResponseCallback>) -> Self {
        Self {
            n_uuid: n_uuid.to_string(),
            req_uuid: new_uuid(),
            req_data,
            requested: AtomicBool::new(false),
            callback,
            completion: Mutex::new(Completion::Pending),
            available: Condvar::new(),
        }
    }

    pub fn node_uuid(&self) -> &str {
        &self.n_uuid
    }

    pub fn request_uuid(&self) -> &str {
        &self.req_uuid
    }

    pub fn request_data(&self) -> &[u8] {
        &self.req_data
    }

    /// True once the request bytes were handed to the transport.
    pub fn requested(&self) -> bool {
        self.requested.load(Ordering::Acquire)
    }

    pub fn mark_requested(&self) {
        self.requested.store(true, Ordering::Release);
    }

    /// Deliver the response: complete the rendezvous and fire the async
    /// callback, once. Duplicate or late responses are dropped.
    pub fn notify(&self, topic: &str, rep: &[u8], result: bool) {
        {
            let mut st = self.completion.lock();
            if !matches!(*st, Completion::Pending) {
                log::debug!("[node] dropping duplicate response for request {}", self.req_uuid);
                return;
            }
            *st = Completion::Done {
                rep: rep.to_vec(),
                result,
            };
        }
        self.available.notify_all();

        if let Some(cb) = &self.callback {
            cb(topic, rep, result);
        }
    }

    /// Kill a pending request (timeout or teardown). A request already
    /// completed stays completed.
    pub fn mark_dead(&self) {
        let mut st = self.completion.lock();
        if matches!(*st, Completion::Pending) {
            *st = Completion::Dead;
        }
    }

    /// Block until the response arrives or `timeout` expires. Returns
    /// true when the request executed.
    pub fn wait_for(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut st = self.completion.lock();

        while matches!(*st, Completion::Pending) {
            if self.available.wait_until(&mut st, deadline).timed_out() {
                break;
            }
        }

        matches!(*st, Completion::Done { .. })
    }

    /// The response of a completed request.
    pub fn response(&self) -> Result<(Vec<u8>, bool)> {
        match &*self.completion.lock() {
            Completion::Done { rep, result } => Ok((rep.clone(), *result)),
            _ => Err(Error::RequestTimeout),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    #[derive(Debug, PartialEq, Eq, Clone)]
    struct Int32Msg {
        data: i32,
    }

    impl Message for Int32Msg {
        fn type_name() -> &'static str {
            "test.Int32"
        }

        fn encode(&self) -> Result<Vec<u8>> {
            Ok(self.data.to_le_bytes().to_vec())
        }

        fn decode(data: &[u8]) -> Result<Self> {
            let bytes: [u8; 4] = data
                .try_into()
                .map_err(|_| Error::Serialization("expected 4 bytes".into()))?;
            Ok(Self {
                data: i32::from_le_bytes(bytes),
            })
        }
    }

    #[test]
    fn subscription_dispatch_decodes_and_runs() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_cb = Arc::clone(&seen);
        let handler = SubscriptionHandler::new("n1", move |topic: &str, msg: Int32Msg| {
            seen_cb.lock().push((topic.to_string(), msg.data));
        });

        assert_eq!(handler.node_uuid(), "n1");
        assert_eq!(handler.type_name(), "test.Int32");
        assert!(!handler.handler_uuid().is_empty());

        handler.run("/t", &5i32.to_le_bytes()).unwrap();
        assert_eq!(seen.lock().as_slice(), &[("/t".to_string(), 5)]);

        // A payload of the wrong shape reports failure and runs nothing.
        assert!(handler.run("/t", &[1, 2]).is_err());
        assert_eq!(seen.lock().len(), 1);
    }

    #[test]
    fn replier_dispatch_round_trips() {
        let handler = ReplierHandler::new(|_topic: &str, req: Int32Msg| {
            Some(Int32Msg { data: req.data * 2 })
        });

        let (rep, ok) = handler.run("/echo", &21i32.to_le_bytes());
        assert!(ok);
        assert_eq!(Int32Msg::decode(&rep).unwrap().data, 42);
    }

    #[test]
    fn replier_failure_paths() {
        let handler = ReplierHandler::new(|_: &str, _req: Int32Msg| None::<Int32Msg>);

        let (_, ok) = handler.run("/echo", &1i32.to_le_bytes());
        assert!(!ok);

        // Undecodable request reports failure too.
        let (_, ok) = handler.run("/echo", &[0xFF]);
        assert!(!ok);
    }

    #[test]
    fn request_completes_exactly_once() {
        let fired = Arc::new(AtomicUsize::new(0));
        let fired_cb = Arc::clone(&fired);
        let callback: ResponseCallback = Box::new(move |_, _, _| {
            fired_cb.fetch_add(1, Ordering::SeqCst);
        });
        let handler = RequestHandler::new("n1", vec![1, 2, 3], Some(callback));

        handler.notify("/t", &[9], true);
        handler.notify("/t", &[8], false);

        assert_eq!(fired.load(Ordering::SeqCst), 1);
        let (rep, result) = handler.response().unwrap();
        assert_eq!(rep, vec![9]);
        assert!(result);
    }

    #[test]
    fn dead_requests_ignore_late_responses() {
        let handler = RequestHandler::new("n1", vec![], None);
        handler.mark_dead();
        handler.notify("/t", &[1], true);
        assert!(handler.response().is_err());
    }

    #[test]
    fn completed_requests_survive_mark_dead() {
        let handler = RequestHandler::new("n1", vec![], None);
        handler.notify("/t", &[1], true);
        handler.mark_dead();
        assert!(handler.response().is_ok());
    }

    #[test]
    fn wait_times_out_without_response() {
        let handler = RequestHandler::new("n1", vec![], None);
        let start = Instant::now();
        assert!(!handler.wait_for(Duration::from_millis(50)));
        assert!(start.elapsed() >= Duration::from_millis(45));
    }

    #[test]
    fn wait_wakes_on_notify() {
        let handler = Arc::new(RequestHandler::new("n1", vec![], None));
        let notifier = Arc::clone(&handler);

        let t = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            notifier.notify("/t", &[7], true);
        });

        assert!(handler.wait_for(Duration::from_millis(500)));
        t.join().unwrap();
    }

    #[test]
    fn requested_flag_flips_once_set() {
        let handler = RequestHandler::new("n1", vec![], None);
        assert!(!handler.requested());
        handler.mark_requested();
        assert!(handler.requested());
    }
}
