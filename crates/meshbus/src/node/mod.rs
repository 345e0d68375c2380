// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The node facade: what applications hold to advertise, publish,
//! subscribe, offer services and invoke them.
//!
//! A [`Node`] is a lightweight handle over the per-partition shared
//! runtime ([`NodeShared`]). Topic names are validated and qualified
//! with the node's partition and namespace before anything reaches
//! discovery or the wire. Dropping a node unsubscribes and
//! unadvertises everything it registered.

pub(crate) mod handlers;
pub(crate) mod registry;
mod shared;

pub use shared::NodeShared;

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::config;
use crate::discovery::EndpointKind;
use crate::error::{Error, Result};
use crate::message::Message;
use crate::node::handlers::{
    ReplierDispatch, ReplierHandler, RequestHandler, SubscriptionDispatch, SubscriptionHandler,
};
use crate::protocol::Scope;
use crate::topic;

/// A participant in the mesh. Symmetric: any node may publish,
/// subscribe, offer services, or invoke them.
pub struct Node {
    shared: Arc<NodeShared>,
    n_uuid: String,
    ns: String,
    topics_advertised: Mutex<BTreeSet<String>>,
    topics_subscribed: Mutex<BTreeSet<String>>,
    srvs_advertised: Mutex<BTreeSet<String>>,
}

impl Node {
    /// A node in the partition named by `IGN_PARTITION` (or the default
    /// empty partition). Nodes of the same partition in this process
    /// share one runtime.
    pub fn new() -> Result<Self> {
        let partition = match config::default_partition() {
            Some(p) if topic::is_valid_namespace(&p) => p,
            Some(p) => {
                log::error!("[node] invalid IGN_PARTITION value [{}], using default", p);
                String::new()
            }
            None => String::new(),
        };
        Self::with_partition_and_ns(&partition, "")
    }

    /// A node in an explicit partition.
    pub fn with_partition(partition: &str) -> Result<Self> {
        Self::with_partition_and_ns(partition, "")
    }

    /// A node with an explicit partition and default namespace. The
    /// namespace prefixes every relative (`~`) name this node uses.
    pub fn with_partition_and_ns(partition: &str, ns: &str) -> Result<Self> {
        if !partition.is_empty() && !topic::is_valid_namespace(partition) {
            return Err(Error::InvalidNamespace(partition.to_string()));
        }
        let shared = NodeShared::instance(partition)?;
        Self::with_shared(&shared, ns)
    }

    /// A node over an explicit runtime. Lets tests run several
    /// runtimes (acting as separate processes) inside one process.
    pub fn with_shared(shared: &Arc<NodeShared>, ns: &str) -> Result<Self> {
        if !ns.is_empty() && !topic::is_valid_namespace(ns) {
            return Err(Error::InvalidNamespace(ns.to_string()));
        }
        Ok(Self {
            shared: Arc::clone(shared),
            n_uuid: uuid::Uuid::new_v4().to_string(),
            ns: ns.to_string(),
            topics_advertised: Mutex::new(BTreeSet::new()),
            topics_subscribed: Mutex::new(BTreeSet::new()),
            srvs_advertised: Mutex::new(BTreeSet::new()),
        })
    }

    fn qualified(&self, name: &str) -> Result<String> {
        topic::fully_qualified_name(&self.shared.partition, &self.ns, name)
            .ok_or_else(|| Error::InvalidTopic(name.to_string()))
    }

    // ===================================================================
    // Pub/sub
    // ===================================================================

    /// Declare that this node publishes `topic`.
    pub fn advertise(&self, topic: &str, scope: Scope) -> Result<()> {
        let ft = self.qualified(topic)?;
        self.topics_advertised.lock().insert(ft.clone());
        self.shared.discovery.advertise(
            EndpointKind::Msg,
            &ft,
            &self.shared.pub_addr,
            &self.shared.control_addr,
            &self.n_uuid,
            scope,
        );
        Ok(())
    }

    /// Withdraw an advertisement.
    pub fn unadvertise(&self, topic: &str) -> Result<()> {
        let ft = self.qualified(topic)?;
        self.unadvertise_fq(&ft);
        Ok(())
    }

    fn unadvertise_fq(&self, ft: &str) {
        self.topics_advertised.lock().remove(ft);
        self.shared.discovery.unadvertise(EndpointKind::Msg, ft, &self.n_uuid);
    }

    /// Publish one message. Local subscribers run synchronously on this
    /// thread; remote delivery is best-effort over the publisher
    /// socket. Fails when the topic was never advertised by this node.
    pub fn publish<T: Message>(&self, topic: &str, msg: &T) -> Result<()> {
        let ft = self.qualified(topic)?;
        if !self.topics_advertised.lock().contains(&ft) {
            return Err(Error::NotAdvertised(topic.to_string()));
        }

        let data = msg.encode()?;

        if let Some(handlers) = self.shared.subscription_handlers(&ft) {
            for handlers in handlers.values() {
                for handler in handlers.values() {
                    if let Err(e) = handler.run(&ft, &data) {
                        log::warn!(
                            "[node] local handler for [{}] expecting [{}] rejected payload: {}",
                            ft,
                            handler.type_name(),
                            e
                        );
                    }
                }
            }
        }

        self.shared.publish(&ft, &data)
    }

    /// Subscribe to a topic. The callback runs on the reception thread
    /// for remote updates and on the publisher's thread for updates
    /// from this process.
    pub fn subscribe<T, F>(&self, topic: &str, callback: F) -> Result<()>
    where
        T: Message,
        F: Fn(&str, T) + Send + Sync + 'static,
    {
        let ft = self.qualified(topic)?;

        let handler = Arc::new(SubscriptionHandler::new(&self.n_uuid, callback));
        let handler_uuid = handler.handler_uuid().to_string();
        self.shared.add_subscription(
            &ft,
            &self.n_uuid,
            &handler_uuid,
            handler as Arc<dyn SubscriptionDispatch>,
        );
        self.topics_subscribed.lock().insert(ft.clone());

        // Probe the network; advertisers answer right away.
        self.shared.discovery.discover(EndpointKind::Msg, &ft);
        Ok(())
    }

    /// Drop this node's subscriptions on a topic and tell the known
    /// publishers.
    pub fn unsubscribe(&self, topic: &str) -> Result<()> {
        let ft = self.qualified(topic)?;
        self.unsubscribe_fq(&ft);
        Ok(())
    }

    fn unsubscribe_fq(&self, ft: &str) {
        self.shared.remove_subscriptions_for_node(ft, &self.n_uuid);
        self.topics_subscribed.lock().remove(ft);

        // Last local subscriber gone: drop the socket filter.
        if !self.shared.has_subscriptions(ft) {
            self.shared.unsubscribe_filter(ft);
        }

        let Some(addresses) = self.shared.discovery.addresses(EndpointKind::Msg, ft) else {
            return;
        };
        for records in addresses.values() {
            for record in records {
                self.shared.notify_end_connection(&record.ctrl, ft, &self.n_uuid);
            }
        }
    }

    // ===================================================================
    // Services
    // ===================================================================

    /// Offer a service. Returning `None` from the callback reports
    /// failure to the requester.
    pub fn advertise_service<Req, Rep, F>(&self, topic: &str, callback: F, scope: Scope) -> Result<()>
    where
        Req: Message,
        Rep: Message,
        F: Fn(&str, Req) -> Option<Rep> + Send + Sync + 'static,
    {
        let ft = self.qualified(topic)?;
        self.srvs_advertised.lock().insert(ft.clone());

        let handler = Arc::new(ReplierHandler::new(callback));
        let handler_uuid = handler.handler_uuid().to_string();
        log::debug!(
            "[node] offering [{}] ({} -> {})",
            ft,
            handler.req_type_name(),
            handler.rep_type_name()
        );
        self.shared
            .add_replier(&ft, &self.n_uuid, &handler_uuid, handler as Arc<dyn ReplierDispatch>);

        self.shared.discovery.advertise(
            EndpointKind::Srv,
            &ft,
            &self.shared.replier_addr,
            &self.shared.replier_id,
            &self.n_uuid,
            scope,
        );
        Ok(())
    }

    /// Withdraw a service.
    pub fn unadvertise_service(&self, topic: &str) -> Result<()> {
        let ft = self.qualified(topic)?;
        self.unadvertise_srv_fq(&ft);
        Ok(())
    }

    fn unadvertise_srv_fq(&self, ft: &str) {
        self.srvs_advertised.lock().remove(ft);
        self.shared.remove_repliers_for_node(ft, &self.n_uuid);
        self.shared.discovery.unadvertise(EndpointKind::Srv, ft, &self.n_uuid);
    }

    /// Invoke a service asynchronously. The callback receives the
    /// decoded response, or [`Error::ServiceFailed`] when the responder
    /// reported failure. No built-in timeout: callers that stop caring
    /// should unadvertise interest by dropping the node.
    pub fn request<Req, Rep, F>(&self, topic: &str, req: &Req, callback: F) -> Result<()>
    where
        Req: Message,
        Rep: Message,
        F: Fn(&str, Result<Rep>) + Send + Sync + 'static,
    {
        let ft = self.qualified(topic)?;
        let req_data = req.encode()?;

        // A responder in this process short-circuits the wire.
        if let Some(replier) = self.shared.first_replier(&ft) {
            let (rep, ok) = replier.run(&ft, &req_data);
            let plain = topic::strip_partition(&ft);
            callback(plain, decode_response::<Rep>(plain, &rep, ok));
            return Ok(());
        }

        let raw_callback: handlers::ResponseCallback = Box::new(move |topic, rep, ok| {
            let plain = topic::strip_partition(topic);
            callback(plain, decode_response::<Rep>(plain, rep, ok));
        });
        let handler = Arc::new(RequestHandler::new(&self.n_uuid, req_data, Some(raw_callback)));
        self.shared.add_request(&ft, &handler);

        self.kick_pending_requests(&ft);
        Ok(())
    }

    /// Invoke a service and block until the response or the timeout.
    ///
    /// # Errors
    /// [`Error::RequestTimeout`] when no response arrived in time (the
    /// pending request is removed; a late response is dropped), and
    /// [`Error::ServiceFailed`] when the responder reported failure.
    pub fn request_blocking<Req, Rep>(&self, topic: &str, req: &Req, timeout: Duration) -> Result<Rep>
    where
        Req: Message,
        Rep: Message,
    {
        let ft = self.qualified(topic)?;
        let req_data = req.encode()?;

        if let Some(replier) = self.shared.first_replier(&ft) {
            let (rep, ok) = replier.run(&ft, &req_data);
            return decode_response::<Rep>(topic::strip_partition(&ft), &rep, ok);
        }

        let handler = Arc::new(RequestHandler::new(&self.n_uuid, req_data, None));
        self.shared.add_request(&ft, &handler);
        self.kick_pending_requests(&ft);

        if !handler.wait_for(timeout) {
            self.shared.remove_request(&ft, &self.n_uuid, handler.request_uuid());
            handler.mark_dead();
            return Err(Error::RequestTimeout);
        }

        let (rep, ok) = handler.response()?;
        decode_response::<Rep>(topic::strip_partition(&ft), &rep, ok)
    }

    /// Send pending requests now when a responder is already known,
    /// otherwise probe for one; `OnNewSrvConnection` sends later.
    fn kick_pending_requests(&self, ft: &str) {
        let responder = self
            .shared
            .discovery
            .addresses(EndpointKind::Srv, ft)
            .and_then(|addresses| {
                addresses
                    .values()
                    .next()
                    .and_then(|records| records.first())
                    .map(|r| (r.addr.clone(), r.ctrl.clone()))
            });

        match responder {
            Some((addr, responder_id)) => {
                self.shared.send_pending_requests(ft, &addr, &responder_id);
            }
            None => self.shared.discovery.discover(EndpointKind::Srv, ft),
        }
    }

    // ===================================================================
    // Introspection
    // ===================================================================

    /// Topics this node advertises.
    pub fn advertised_topics(&self) -> Vec<String> {
        self.topics_advertised
            .lock()
            .iter()
            .map(|t| topic::strip_partition(t).to_string())
            .collect()
    }

    /// Topics this node subscribes to.
    pub fn subscribed_topics(&self) -> Vec<String> {
        self.topics_subscribed
            .lock()
            .iter()
            .map(|t| topic::strip_partition(t).to_string())
            .collect()
    }

    /// Services this node offers.
    pub fn advertised_services(&self) -> Vec<String> {
        self.srvs_advertised
            .lock()
            .iter()
            .map(|t| topic::strip_partition(t).to_string())
            .collect()
    }

    /// Every topic currently advertised in the network.
    pub fn topic_list(&self) -> Vec<String> {
        self.shared
            .discovery
            .topic_list()
            .iter()
            .map(|t| topic::strip_partition(t).to_string())
            .collect()
    }

    /// Every service currently advertised in the network.
    pub fn service_list(&self) -> Vec<String> {
        self.shared
            .discovery
            .service_list()
            .iter()
            .map(|t| topic::strip_partition(t).to_string())
            .collect()
    }

    /// Topics with at least one known remote subscriber.
    pub fn remote_subscriber_topics(&self) -> Vec<String> {
        self.shared
            .remote_subscriber_topics()
            .iter()
            .map(|t| topic::strip_partition(t).to_string())
            .collect()
    }

    /// This node's UUID.
    pub fn node_uuid(&self) -> &str {
        &self.n_uuid
    }
}

impl Drop for Node {
    fn drop(&mut self) {
        let subscribed: Vec<String> = self.topics_subscribed.lock().iter().cloned().collect();
        for ft in subscribed {
            self.unsubscribe_fq(&ft);
        }

        let advertised: Vec<String> = self.topics_advertised.lock().iter().cloned().collect();
        for ft in advertised {
            self.unadvertise_fq(&ft);
        }

        let services: Vec<String> = self.srvs_advertised.lock().iter().cloned().collect();
        for ft in services {
            self.unadvertise_srv_fq(&ft);
        }
    }
}

fn decode_response<Rep: Message>(topic: &str, rep: &[u8], ok: bool) -> Result<Rep> {
    if !ok {
        return Err(Error::ServiceFailed(topic.to_string()));
    }
    Rep::decode(rep)
}
