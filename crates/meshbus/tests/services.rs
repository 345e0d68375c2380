// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Service call integration tests: synchronous echo, async callbacks,
//! failure reporting, and timeout behavior.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use meshbus::{Error, Message, Node, Result, Scope};

#[derive(Debug, Clone, PartialEq, Eq)]
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

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[test]
fn synchronous_echo() {
    init_logging();
    let node = Node::with_partition("srv_echo").expect("node");

    node.advertise_service(
        "/echo",
        |_topic: &str, req: Int32Msg| Some(Int32Msg { data: req.data }),
        Scope::All,
    )
    .expect("advertise service");

    let rep: Int32Msg = node
        .request_blocking("/echo", &Int32Msg { data: 5 }, Duration::from_millis(1000))
        .expect("request executed");
    assert_eq!(rep.data, 5);
}

#[test]
fn request_times_out_without_responder() {
    init_logging();
    let node = Node::with_partition("srv_timeout").expect("node");

    let start = Instant::now();
    let result: Result<Int32Msg> =
        node.request_blocking("/nobody_home", &Int32Msg { data: 5 }, Duration::from_millis(1000));
    let elapsed = start.elapsed();

    assert!(matches!(result, Err(Error::RequestTimeout)));
    assert!(
        elapsed >= Duration::from_millis(950),
        "returned early: {:?}",
        elapsed
    );
    assert!(
        elapsed < Duration::from_millis(2500),
        "returned late: {:?}",
        elapsed
    );
}

#[test]
fn async_request_runs_callback() {
    init_logging();
    let node = Node::with_partition("srv_async").expect("node");

    node.advertise_service(
        "/double",
        |_topic: &str, req: Int32Msg| Some(Int32Msg { data: req.data * 2 }),
        Scope::All,
    )
    .expect("advertise service");

    let seen = Arc::new(Mutex::new(None::<(String, i32)>));
    let cb_seen = Arc::clone(&seen);
    node.request("/double", &Int32Msg { data: 21 }, move |topic, rep: Result<Int32Msg>| {
        *cb_seen.lock() = Some((topic.to_string(), rep.expect("reply").data));
    })
    .expect("request");

    // The local responder fast path runs the callback synchronously.
    assert_eq!(seen.lock().clone(), Some(("/double".to_string(), 42)));
}

#[test]
fn replier_failure_is_reported() {
    init_logging();
    let node = Node::with_partition("srv_failure").expect("node");

    node.advertise_service(
        "/refuse",
        |_topic: &str, _req: Int32Msg| None::<Int32Msg>,
        Scope::All,
    )
    .expect("advertise service");

    let result: Result<Int32Msg> =
        node.request_blocking("/refuse", &Int32Msg { data: 1 }, Duration::from_millis(1000));
    assert!(matches!(result, Err(Error::ServiceFailed(_))));
}

#[test]
fn unadvertised_service_stops_answering() {
    init_logging();
    let node = Node::with_partition("srv_unadvertise").expect("node");

    let calls = Arc::new(AtomicUsize::new(0));
    let cb_calls = Arc::clone(&calls);
    node.advertise_service(
        "/flaky",
        move |_topic: &str, req: Int32Msg| {
            cb_calls.fetch_add(1, Ordering::SeqCst);
            Some(req)
        },
        Scope::All,
    )
    .expect("advertise service");

    let rep: Int32Msg = node
        .request_blocking("/flaky", &Int32Msg { data: 1 }, Duration::from_millis(500))
        .expect("first call");
    assert_eq!(rep.data, 1);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(node.advertised_services(), vec!["/flaky".to_string()]);

    node.unadvertise_service("/flaky").expect("unadvertise");
    assert!(node.advertised_services().is_empty());

    // No local responder anymore: the request waits out its timeout.
    let result: Result<Int32Msg> =
        node.request_blocking("/flaky", &Int32Msg { data: 2 }, Duration::from_millis(300));
    assert!(matches!(result, Err(Error::RequestTimeout)));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn service_names_are_validated() {
    init_logging();
    let node = Node::with_partition("srv_invalid").expect("node");

    assert!(matches!(
        node.advertise_service(
            "bad name",
            |_: &str, req: Int32Msg| Some(req),
            Scope::All
        ),
        Err(Error::InvalidTopic(_))
    ));
    assert!(matches!(
        node.request_blocking::<Int32Msg, Int32Msg>(
            "//bad",
            &Int32Msg { data: 0 },
            Duration::from_millis(10)
        ),
        Err(Error::InvalidTopic(_))
    ));
}
