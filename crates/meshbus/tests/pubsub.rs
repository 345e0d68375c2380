// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Pub/sub integration tests over the public facade.
//!
//! Each test runs in its own partition so parallel tests never share a
//! runtime or cross-talk over the shared multicast group.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

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
fn advertise_publish_subscribe_single_node() {
    init_logging();
    let node = Node::with_partition("pubsub_basic").expect("node");

    let count = Arc::new(AtomicUsize::new(0));
    let last = Arc::new(Mutex::new(None::<(String, i32)>));

    let (cb_count, cb_last) = (Arc::clone(&count), Arc::clone(&last));
    node.advertise("/foo", Scope::All).expect("advertise");
    node.subscribe("/foo", move |topic: &str, msg: Int32Msg| {
        cb_count.fetch_add(1, Ordering::SeqCst);
        *cb_last.lock() = Some((topic.to_string(), msg.data));
    })
    .expect("subscribe");

    thread::sleep(Duration::from_millis(100));
    node.publish("/foo", &Int32Msg { data: 5 }).expect("publish");
    thread::sleep(Duration::from_millis(100));

    assert_eq!(count.load(Ordering::SeqCst), 1);
    assert_eq!(last.lock().clone(), Some(("/foo".to_string(), 5)));

    // After unadvertising, publishing fails and the callback stays
    // quiet.
    node.unadvertise("/foo").expect("unadvertise");
    let err = node.publish("/foo", &Int32Msg { data: 6 }).unwrap_err();
    assert!(matches!(err, Error::NotAdvertised(_)));
    thread::sleep(Duration::from_millis(100));
    assert_eq!(count.load(Ordering::SeqCst), 1);
}

#[test]
fn two_subscribers_one_unsubscribes() {
    init_logging();
    let node1 = Node::with_partition("pubsub_two_subs").expect("node1");
    let node2 = Node::with_partition("pubsub_two_subs").expect("node2");

    let count1 = Arc::new(AtomicUsize::new(0));
    let count2 = Arc::new(AtomicUsize::new(0));

    node1.advertise("/foo", Scope::All).expect("advertise");

    let cb1 = Arc::clone(&count1);
    node1
        .subscribe("/foo", move |_: &str, _: Int32Msg| {
            cb1.fetch_add(1, Ordering::SeqCst);
        })
        .expect("subscribe cb1");

    let cb2 = Arc::clone(&count2);
    node2
        .subscribe("/foo", move |_: &str, _: Int32Msg| {
            cb2.fetch_add(1, Ordering::SeqCst);
        })
        .expect("subscribe cb2");

    thread::sleep(Duration::from_millis(100));
    node1.publish("/foo", &Int32Msg { data: 1 }).expect("publish");
    thread::sleep(Duration::from_millis(100));

    assert_eq!(count1.load(Ordering::SeqCst), 1);
    assert_eq!(count2.load(Ordering::SeqCst), 1);

    node1.unsubscribe("/foo").expect("unsubscribe");
    thread::sleep(Duration::from_millis(500));

    node1.publish("/foo", &Int32Msg { data: 2 }).expect("publish");
    thread::sleep(Duration::from_millis(100));

    assert_eq!(count1.load(Ordering::SeqCst), 1, "cb1 fired after unsubscribe");
    assert_eq!(count2.load(Ordering::SeqCst), 2);
}

#[test]
fn publish_without_advertise_fails() {
    init_logging();
    let node = Node::with_partition("pubsub_unadvertised").expect("node");
    let err = node.publish("/never", &Int32Msg { data: 1 }).unwrap_err();
    assert!(matches!(err, Error::NotAdvertised(_)));
}

#[test]
fn invalid_topics_are_rejected_everywhere() {
    init_logging();
    let node = Node::with_partition("pubsub_invalid").expect("node");

    for bad in ["", "~", "foo bar", "/a//b", "a@b"] {
        assert!(matches!(
            node.advertise(bad, Scope::All),
            Err(Error::InvalidTopic(_))
        ));
        assert!(matches!(
            node.subscribe(bad, |_: &str, _: Int32Msg| {}),
            Err(Error::InvalidTopic(_))
        ));
        assert!(matches!(
            node.publish(bad, &Int32Msg { data: 0 }),
            Err(Error::InvalidTopic(_))
        ));
    }
}

#[test]
fn namespace_scopes_relative_names() {
    init_logging();
    let node = Node::with_partition_and_ns("pubsub_ns", "/sensors").expect("node");

    let seen = Arc::new(Mutex::new(Vec::new()));
    let cb_seen = Arc::clone(&seen);

    node.advertise("~/temp", Scope::All).expect("advertise");
    node.subscribe("~/temp", move |topic: &str, _: Int32Msg| {
        cb_seen.lock().push(topic.to_string());
    })
    .expect("subscribe");

    thread::sleep(Duration::from_millis(50));
    node.publish("~/temp", &Int32Msg { data: 3 }).expect("publish");
    thread::sleep(Duration::from_millis(50));

    assert_eq!(seen.lock().as_slice(), &["/sensors/temp".to_string()]);
    assert_eq!(node.advertised_topics(), vec!["/sensors/temp".to_string()]);
}

#[test]
fn listing_reports_node_state() {
    init_logging();
    let node = Node::with_partition("pubsub_listing").expect("node");

    node.advertise("/a", Scope::All).expect("advertise a");
    node.advertise("/b", Scope::Host).expect("advertise b");
    node.subscribe("/c", |_: &str, _: Int32Msg| {}).expect("subscribe c");

    assert_eq!(node.advertised_topics(), vec!["/a".to_string(), "/b".to_string()]);
    assert_eq!(node.subscribed_topics(), vec!["/c".to_string()]);

    // The network-wide list contains at least our own advertisements.
    let all = node.topic_list();
    assert!(all.contains(&"/a".to_string()));
    assert!(all.contains(&"/b".to_string()));

    node.unadvertise("/a").expect("unadvertise");
    assert_eq!(node.advertised_topics(), vec!["/b".to_string()]);
}

#[test]
fn type_mismatch_skips_handler_but_not_others() {
    init_logging();

    #[derive(Debug)]
    struct WideMsg {
        data: i64,
    }
    impl Message for WideMsg {
        fn type_name() -> &'static str {
            "test.Int64"
        }
        fn encode(&self) -> Result<Vec<u8>> {
            Ok(self.data.to_le_bytes().to_vec())
        }
        fn decode(data: &[u8]) -> Result<Self> {
            let bytes: [u8; 8] = data
                .try_into()
                .map_err(|_| Error::Serialization("expected 8 bytes".into()))?;
            Ok(Self {
                data: i64::from_le_bytes(bytes),
            })
        }
    }

    let node = Node::with_partition("pubsub_mismatch").expect("node");
    node.advertise("/mix", Scope::All).expect("advertise");

    let narrow = Arc::new(AtomicUsize::new(0));
    let wide = Arc::new(AtomicUsize::new(0));

    let cb = Arc::clone(&narrow);
    node.subscribe("/mix", move |_: &str, _: Int32Msg| {
        cb.fetch_add(1, Ordering::SeqCst);
    })
    .expect("subscribe narrow");

    let cb = Arc::clone(&wide);
    node.subscribe("/mix", move |_: &str, _: WideMsg| {
        cb.fetch_add(1, Ordering::SeqCst);
    })
    .expect("subscribe wide");

    // An 8-byte payload decodes for the wide handler only; the narrow
    // one logs the mismatch and is skipped.
    node.publish("/mix", &WideMsg { data: 9 }).expect("publish");
    thread::sleep(Duration::from_millis(50));

    assert_eq!(narrow.load(Ordering::SeqCst), 0);
    assert_eq!(wide.load(Ordering::SeqCst), 1);
}
