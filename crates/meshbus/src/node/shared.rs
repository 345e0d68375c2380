// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The runtime shared by every node of a process: stream sockets, the
//! reception thread, and the registries behind pub/sub delivery and
//! service calls.
//!
//! # Sockets
//!
//! | socket            | pattern             | role                                |
//! |-------------------|---------------------|-------------------------------------|
//! | publisher         | PUB                 | sends topic updates                 |
//! | subscriber        | SUB                 | receives topic updates              |
//! | control           | DEALER (bound)      | receives subscriber presence        |
//! | requester         | ROUTER              | initiates service calls             |
//! | response receiver | ROUTER (sticky id)  | receives service responses          |
//! | replier           | ROUTER (sticky id, mandatory) | serves service calls      |
//!
//! A single reception thread polls subscriber/control/replier/response
//! receiver with a fixed timeout and dispatches ready frames.
//!
//! # Locking
//!
//! Two mutexes instead of the recursive one the design grew out of:
//! `recv` guards the four polled sockets (the poll loop holds it for
//! the poll duration), `state` guards the registries, connection tables
//! and the outgoing sockets. Global lock order is discovery -> recv ->
//! state; no path acquires them against that order, and user callbacks
//! always run with both released.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;

use crate::config::{
    self, CONNECT_SETTLE, RECEPTION_TIMEOUT, SOCKET_LINGER_MS, TRANSIENT_LINGER_MS,
};
use crate::discovery::{Discovery, TopicStorage};
use crate::error::{Error, Result};
use crate::node::handlers::{ReplierDispatch, RequestHandler, SubscriptionDispatch};
use crate::node::registry::{HandlerMap, HandlerStorage};
use crate::protocol::{ControlCode, Scope};

/// The four sockets the reception thread polls.
struct RecvSockets {
    subscriber: zmq::Socket,
    control: zmq::Socket,
    replier: zmq::Socket,
    response_receiver: zmq::Socket,
}

/// Registries, connection tables and outgoing sockets.
struct SharedState {
    publisher: zmq::Socket,
    requester: zmq::Socket,
    responses: zmq::Socket,
    /// Responder endpoints the requester already connected to.
    requester_peers: Vec<String>,
    /// Requester response endpoints the responses socket already
    /// connected to.
    response_peers: Vec<String>,
    subscriptions: HandlerStorage<dyn SubscriptionDispatch>,
    repliers: HandlerStorage<dyn ReplierDispatch>,
    requests: HandlerStorage<RequestHandler>,
    /// Publishers our subscriber socket is connected to.
    connections: TopicStorage,
    /// Responders we have seen for service topics.
    srv_connections: TopicStorage,
    /// Remote subscribers announced on the control channel. Tracked for
    /// introspection and future per-subscriber filtering; publishing is
    /// not gated on it.
    remote_subscribers: TopicStorage,
}

/// Process-wide shared runtime. Nodes of the same partition share one
/// instance; see [`NodeShared::instance`].
pub struct NodeShared {
    pub(crate) p_uuid: String,
    pub(crate) host_addr: String,
    pub(crate) partition: String,
    verbose: bool,
    context: zmq::Context,
    pub(crate) discovery: Discovery,
    pub(crate) pub_addr: String,
    pub(crate) control_addr: String,
    pub(crate) response_addr: String,
    pub(crate) replier_addr: String,
    pub(crate) replier_id: String,
    pub(crate) response_id: String,
    recv: Arc<Mutex<RecvSockets>>,
    state: Arc<Mutex<SharedState>>,
    exit: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

fn instances() -> &'static Mutex<HashMap<String, Weak<NodeShared>>> {
    static INSTANCES: OnceLock<Mutex<HashMap<String, Weak<NodeShared>>>> = OnceLock::new();
    INSTANCES.get_or_init(|| Mutex::new(HashMap::new()))
}

impl NodeShared {
    /// The shared runtime of a partition, created on first use. Nodes
    /// in the same partition share it; the last node dropping its
    /// handle tears it down.
    pub fn instance(partition: &str) -> Result<Arc<NodeShared>> {
        let mut map = instances().lock();
        if let Some(existing) = map.get(partition).and_then(Weak::upgrade) {
            return Ok(existing);
        }
        let shared = Self::create(partition)?;
        // Sweep entries whose runtime is gone, so the registry stays a
        // cache of live instances rather than a log of every partition
        // ever used.
        map.retain(|_, weak| weak.upgrade().is_some());
        map.insert(partition.to_string(), Arc::downgrade(&shared));
        Ok(shared)
    }

    /// A fresh, unregistered runtime. Two instances with the same
    /// partition behave like two processes; tests use this to exercise
    /// the wire paths inside one process.
    pub fn create(partition: &str) -> Result<Arc<NodeShared>> {
        let verbose = config::verbose();
        let p_uuid = uuid::Uuid::new_v4().to_string();

        let discovery = Discovery::new(&p_uuid, verbose)?;
        let host_addr = discovery.host_addr().to_string();

        let context = zmq::Context::new();
        let wildcard = format!("tcp://{}:*", host_addr);

        let publisher = bind_socket(&context, zmq::PUB, &wildcard, "publisher")?;
        let pub_addr = last_endpoint(&publisher)?;

        let subscriber = new_socket(&context, zmq::SUB, "subscriber")?;

        let control = bind_socket(&context, zmq::DEALER, &wildcard, "control")?;
        let control_addr = last_endpoint(&control)?;

        let requester = new_socket(&context, zmq::ROUTER, "requester")?;

        let response_id = uuid::Uuid::new_v4().to_string();
        let response_receiver = new_socket(&context, zmq::ROUTER, "response receiver")?;
        response_receiver
            .set_identity(response_id.as_bytes())
            .map_err(|e| Error::InitFailed(format!("response receiver identity: {}", e)))?;
        response_receiver
            .bind(&wildcard)
            .map_err(|e| Error::InitFailed(format!("cannot bind response receiver: {}", e)))?;
        let response_addr = last_endpoint(&response_receiver)?;

        let replier_id = uuid::Uuid::new_v4().to_string();
        let replier = new_socket(&context, zmq::ROUTER, "replier")?;
        replier
            .set_identity(replier_id.as_bytes())
            .map_err(|e| Error::InitFailed(format!("replier identity: {}", e)))?;
        replier
            .set_router_mandatory(true)
            .map_err(|e| Error::InitFailed(format!("replier mandatory routing: {}", e)))?;
        replier
            .bind(&wildcard)
            .map_err(|e| Error::InitFailed(format!("cannot bind replier: {}", e)))?;
        let replier_addr = last_endpoint(&replier)?;

        let responses = new_socket(&context, zmq::ROUTER, "responses")?;

        if verbose {
            log::info!("[node] host address: {}", host_addr);
            log::info!("[node] process UUID: {}", p_uuid);
            log::info!("[node] bound [{}] for pub/sub", pub_addr);
            log::info!("[node] bound [{}] for control", control_addr);
            log::info!("[node] bound [{}] for service calls", replier_addr);
            log::info!("[node] bound [{}] for service responses", response_addr);
        }

        let recv = Arc::new(Mutex::new(RecvSockets {
            subscriber,
            control,
            replier,
            response_receiver,
        }));
        let state = Arc::new(Mutex::new(SharedState {
            publisher,
            requester,
            responses,
            requester_peers: Vec::new(),
            response_peers: Vec::new(),
            subscriptions: HandlerStorage::new(),
            repliers: HandlerStorage::new(),
            requests: HandlerStorage::new(),
            connections: TopicStorage::new(),
            srv_connections: TopicStorage::new(),
            remote_subscribers: TopicStorage::new(),
        }));
        let exit = Arc::new(AtomicBool::new(false));

        let thread_recv = Arc::clone(&recv);
        let thread_state = Arc::clone(&state);
        let thread_exit = Arc::clone(&exit);
        let thread_verbose = verbose;
        let handle = thread::Builder::new()
            .name("meshbus-node".into())
            .spawn(move || reception_loop(&thread_recv, &thread_state, &thread_exit, thread_verbose))
            .map_err(|e| Error::InitFailed(format!("cannot spawn reception thread: {}", e)))?;

        let shared = NodeShared {
            p_uuid: p_uuid.clone(),
            host_addr,
            partition: partition.to_string(),
            verbose,
            context: context.clone(),
            discovery,
            pub_addr,
            control_addr,
            response_addr: response_addr.clone(),
            replier_addr,
            replier_id,
            response_id: response_id.clone(),
            recv: Arc::clone(&recv),
            state: Arc::clone(&state),
            exit,
            handle: Some(handle),
        };

        // Wire the discovery callbacks. The closures capture the lock
        // arcs, never the runtime itself, so dropping the last external
        // handle tears everything down.
        let (cb_recv, cb_state) = (Arc::clone(&recv), Arc::clone(&state));
        let (cb_ctx, cb_puuid) = (context.clone(), p_uuid.clone());
        shared
            .discovery
            .set_connections_cb(Box::new(move |topic, addr, ctrl, r_puuid, n_uuid, scope| {
                on_new_connection(
                    &cb_recv, &cb_state, &cb_ctx, &cb_puuid, topic, addr, ctrl, r_puuid, n_uuid,
                    scope,
                );
            }));

        let (cb_recv, cb_state) = (Arc::clone(&recv), Arc::clone(&state));
        shared
            .discovery
            .set_disconnections_cb(Box::new(move |topic, _addr, _ctrl, r_puuid, n_uuid, _scope| {
                on_new_disconnection(&cb_recv, &cb_state, topic, r_puuid, n_uuid);
            }));

        let cb_state = Arc::clone(&state);
        let (cb_resp_addr, cb_resp_id) = (response_addr, response_id);
        shared
            .discovery
            .set_connections_srv_cb(Box::new(move |topic, addr, ctrl, r_puuid, n_uuid, scope| {
                {
                    let mut st = cb_state.lock();
                    st.srv_connections.add_address(topic, addr, ctrl, r_puuid, n_uuid, scope);
                }
                send_pending_requests(&cb_state, &cb_resp_addr, &cb_resp_id, topic, addr, ctrl);
            }));

        let cb_state = Arc::clone(&state);
        shared
            .discovery
            .set_disconnections_srv_cb(Box::new(move |topic, _addr, _ctrl, r_puuid, n_uuid, _scope| {
                let mut st = cb_state.lock();
                if topic.is_empty() {
                    st.srv_connections.del_addresses_by_proc(r_puuid);
                } else {
                    st.srv_connections.del_address_by_node(topic, r_puuid, n_uuid);
                }
            }));

        Ok(Arc::new(shared))
    }

    /// The host IP this runtime binds and advertises.
    pub fn host_addr(&self) -> &str {
        &self.host_addr
    }

    /// This process's UUID within the mesh.
    pub fn process_uuid(&self) -> &str {
        &self.p_uuid
    }

    // ===================================================================
    // Registry access for the facade
    // ===================================================================

    pub(crate) fn add_subscription(
        &self,
        topic: &str,
        n_uuid: &str,
        handler_uuid: &str,
        handler: Arc<dyn SubscriptionDispatch>,
    ) {
        self.state
            .lock()
            .subscriptions
            .add_handler(topic, n_uuid, handler_uuid, handler);
    }

    pub(crate) fn subscription_handlers(
        &self,
        topic: &str,
    ) -> Option<HandlerMap<dyn SubscriptionDispatch>> {
        self.state.lock().subscriptions.get_handlers(topic)
    }

    pub(crate) fn remove_subscriptions_for_node(&self, topic: &str, n_uuid: &str) {
        self.state.lock().subscriptions.remove_handlers_for_node(topic, n_uuid);
    }

    pub(crate) fn has_subscriptions(&self, topic: &str) -> bool {
        self.state.lock().subscriptions.has_handlers_for_topic(topic)
    }

    /// Drop the subscriber-side topic filter once the last local
    /// subscription on the topic is gone.
    pub(crate) fn unsubscribe_filter(&self, topic: &str) {
        if let Err(e) = self.recv.lock().subscriber.set_unsubscribe(topic.as_bytes()) {
            log::warn!("[node] cannot drop filter for [{}]: {}", topic, e);
        }
    }

    pub(crate) fn add_replier(
        &self,
        topic: &str,
        n_uuid: &str,
        handler_uuid: &str,
        handler: Arc<dyn ReplierDispatch>,
    ) {
        self.state
            .lock()
            .repliers
            .add_handler(topic, n_uuid, handler_uuid, handler);
    }

    pub(crate) fn first_replier(&self, topic: &str) -> Option<Arc<dyn ReplierDispatch>> {
        self.state.lock().repliers.first_handler(topic)
    }

    pub(crate) fn remove_repliers_for_node(&self, topic: &str, n_uuid: &str) {
        self.state.lock().repliers.remove_handlers_for_node(topic, n_uuid);
    }

    pub(crate) fn add_request(&self, topic: &str, handler: &Arc<RequestHandler>) {
        self.state.lock().requests.add_handler(
            topic,
            handler.node_uuid(),
            handler.request_uuid(),
            Arc::clone(handler),
        );
    }

    pub(crate) fn remove_request(&self, topic: &str, n_uuid: &str, req_uuid: &str) {
        self.state.lock().requests.remove_handler(topic, n_uuid, req_uuid);
    }

    /// Topics with at least one known remote subscriber.
    pub(crate) fn remote_subscriber_topics(&self) -> Vec<String> {
        self.state.lock().remote_subscribers.topic_list()
    }

    // ===================================================================
    // Outgoing traffic
    // ===================================================================

    /// Send one topic update: `[topic][senderAddress][payload]`.
    pub(crate) fn publish(&self, topic: &str, data: &[u8]) -> Result<()> {
        let st = self.state.lock();
        send_frames(
            &st.publisher,
            &[topic.as_bytes(), self.pub_addr.as_bytes(), data],
        )
        .map_err(|e| {
            log::warn!("[node] publish on [{}] failed: {}", topic, e);
            e
        })
    }

    /// Forward every not-yet-sent pending request on `topic` to the
    /// resolved responder.
    pub(crate) fn send_pending_requests(&self, topic: &str, addr: &str, responder_id: &str) {
        send_pending_requests(
            &self.state,
            &self.response_addr,
            &self.response_id,
            topic,
            addr,
            responder_id,
        );
    }

    /// Tell a publisher's control endpoint that one of our
    /// subscriptions is gone.
    pub(crate) fn notify_end_connection(&self, ctrl: &str, topic: &str, n_uuid: &str) {
        notify_control(
            &self.context,
            ctrl,
            topic,
            &self.p_uuid,
            &[n_uuid.to_string()],
            ControlCode::EndConnection,
            false,
        );
    }
}

impl Drop for NodeShared {
    fn drop(&mut self) {
        self.exit.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
        if self.verbose {
            log::info!("[node] runtime for partition [{}] stopped", self.partition);
        }
        // Discovery drops after us and broadcasts BYE; sockets carry
        // linger 0, so context teardown does not block.
    }
}

// =======================================================================
// Socket helpers
// =======================================================================

fn new_socket(context: &zmq::Context, kind: zmq::SocketType, what: &str) -> Result<zmq::Socket> {
    let socket = context
        .socket(kind)
        .map_err(|e| Error::InitFailed(format!("cannot create {} socket: {}", what, e)))?;
    socket
        .set_linger(SOCKET_LINGER_MS)
        .map_err(|e| Error::InitFailed(format!("{} linger: {}", what, e)))?;
    Ok(socket)
}

fn bind_socket(
    context: &zmq::Context,
    kind: zmq::SocketType,
    endpoint: &str,
    what: &str,
) -> Result<zmq::Socket> {
    let socket = new_socket(context, kind, what)?;
    socket
        .bind(endpoint)
        .map_err(|e| Error::InitFailed(format!("cannot bind {} socket: {}", what, e)))?;
    Ok(socket)
}

fn last_endpoint(socket: &zmq::Socket) -> Result<String> {
    socket
        .get_last_endpoint()
        .map_err(Error::Socket)?
        .map_err(|_| Error::InitFailed("bound endpoint is not UTF-8".into()))
}

/// Send a multi-frame message, flagging every frame but the last.
fn send_frames(socket: &zmq::Socket, frames: &[&[u8]]) -> Result<()> {
    for (i, frame) in frames.iter().enumerate() {
        let flags = if i + 1 == frames.len() { 0 } else { zmq::SNDMORE };
        socket.send(*frame, flags)?;
    }
    Ok(())
}

fn frame_str(frame: &[u8]) -> Option<&str> {
    std::str::from_utf8(frame).ok()
}

/// Open a transient dealer to a control endpoint and send one
/// `[topic][pUuid][nUuid][code]` frame-set per node UUID.
fn notify_control(
    context: &zmq::Context,
    ctrl: &str,
    topic: &str,
    p_uuid: &str,
    node_uuids: &[String],
    code: ControlCode,
    settle: bool,
) {
    let socket = match context.socket(zmq::DEALER) {
        Ok(s) => s,
        Err(e) => {
            log::warn!("[node] cannot create control notifier: {}", e);
            return;
        }
    };
    // Positive linger: the frames must survive the socket dropping
    // right after an asynchronous connect.
    let _ = socket.set_linger(TRANSIENT_LINGER_MS);
    if let Err(e) = socket.connect(ctrl) {
        log::warn!("[node] cannot reach control endpoint [{}]: {}", ctrl, e);
        return;
    }
    if settle {
        thread::sleep(CONNECT_SETTLE);
    }

    let code_str = (code as u8).to_string();
    for n_uuid in node_uuids {
        if let Err(e) = send_frames(
            &socket,
            &[
                topic.as_bytes(),
                p_uuid.as_bytes(),
                n_uuid.as_bytes(),
                code_str.as_bytes(),
            ],
        ) {
            log::warn!("[node] control notify [{}] failed: {}", ctrl, e);
        }
    }
}

// =======================================================================
// Discovery callbacks (run on the discovery thread)
// =======================================================================

/// A publisher for a topic appeared. If any local node subscribes to
/// it, connect the subscriber socket, record the connection, and report
/// our subscriptions on the publisher's control endpoint.
#[allow(clippy::too_many_arguments)]
fn on_new_connection(
    recv: &Mutex<RecvSockets>,
    state: &Mutex<SharedState>,
    context: &zmq::Context,
    my_puuid: &str,
    topic: &str,
    addr: &str,
    ctrl: &str,
    remote_puuid: &str,
    n_uuid: &str,
    scope: Scope,
) {
    // Same-process publishers deliver locally, no socket work.
    if remote_puuid == my_puuid {
        return;
    }
    if !state.lock().subscriptions.has_handlers_for_topic(topic) {
        return;
    }

    let already_connected = state.lock().connections.has_address(addr);
    if !already_connected {
        if let Err(e) = recv.lock().subscriber.connect(addr) {
            log::warn!("[node] cannot connect subscriber to [{}]: {}", addr, e);
            return;
        }
        log::debug!("[node] subscriber connected to [{}] for [{}]", addr, topic);
    }
    if let Err(e) = recv.lock().subscriber.set_subscribe(topic.as_bytes()) {
        log::warn!("[node] cannot filter on [{}]: {}", topic, e);
        return;
    }

    let node_uuids: Vec<String> = {
        let mut st = state.lock();
        st.connections.add_address(topic, addr, ctrl, remote_puuid, n_uuid, scope);
        st.subscriptions
            .get_handlers(topic)
            .map(|nodes| {
                nodes
                    .values()
                    .flat_map(|handlers| handlers.values())
                    .map(|h| h.node_uuid().to_string())
                    .collect()
            })
            .unwrap_or_default()
    };

    // One NewConnection frame-set per local subscription handler. The
    // settle delay covers the asynchronous connect.
    notify_control(
        context,
        ctrl,
        topic,
        my_puuid,
        &node_uuids,
        ControlCode::NewConnection,
        true,
    );
}

/// A publisher (or a whole process) went away: drop its connections and
/// forget its remote subscribers.
fn on_new_disconnection(
    recv: &Mutex<RecvSockets>,
    state: &Mutex<SharedState>,
    topic: &str,
    remote_puuid: &str,
    n_uuid: &str,
) {
    if !topic.is_empty() && !n_uuid.is_empty() {
        // One advertisement was cancelled.
        let record = {
            let mut st = state.lock();
            st.remote_subscribers.del_address_by_node(topic, remote_puuid, n_uuid);
            st.connections.get_address(topic, remote_puuid, n_uuid)
        };
        let Some(record) = record else { return };

        if let Err(e) = recv.lock().subscriber.disconnect(&record.addr) {
            log::debug!("[node] disconnect [{}] failed: {}", record.addr, e);
        }
        state.lock().connections.del_address_by_node(topic, remote_puuid, n_uuid);
    } else {
        // The whole process is gone (BYE or silence).
        let addrs: Vec<String> = {
            let mut st = state.lock();
            st.remote_subscribers.del_addresses_by_proc(remote_puuid);
            let addrs = st
                .connections
                .get_addresses_by_proc(remote_puuid)
                .into_values()
                .flatten()
                .map(|r| r.addr)
                .collect();
            st.connections.del_addresses_by_proc(remote_puuid);
            addrs
        };

        let sockets = recv.lock();
        for addr in addrs {
            if let Err(e) = sockets.subscriber.disconnect(&addr) {
                log::debug!("[node] disconnect [{}] failed: {}", addr, e);
            }
        }
    }
}

/// Forward pending requests for `topic` to the responder at
/// `(addr, responder_id)`. Handlers already sent are skipped; the flag
/// flips before the send so repeated discovery notifications never
/// duplicate a request.
fn send_pending_requests(
    state: &Mutex<SharedState>,
    my_response_addr: &str,
    my_response_id: &str,
    topic: &str,
    addr: &str,
    responder_id: &str,
) {
    let mut st = state.lock();

    let Some(handlers) = st.requests.get_handlers(topic) else {
        return;
    };

    if !st.requester_peers.iter().any(|a| a == addr) {
        if let Err(e) = st.requester.connect(addr) {
            log::warn!("[node] cannot connect requester to [{}]: {}", addr, e);
            return;
        }
        st.requester_peers.push(addr.to_string());
        // Routed sends need the identity handshake to finish first.
        thread::sleep(CONNECT_SETTLE);
    }

    for handlers in handlers.values() {
        for handler in handlers.values() {
            if handler.requested() {
                continue;
            }
            handler.mark_requested();

            let result = send_frames(
                &st.requester,
                &[
                    responder_id.as_bytes(),
                    topic.as_bytes(),
                    my_response_addr.as_bytes(),
                    my_response_id.as_bytes(),
                    handler.node_uuid().as_bytes(),
                    handler.request_uuid().as_bytes(),
                    handler.request_data(),
                ],
            );
            if let Err(e) = result {
                log::warn!("[node] request on [{}] to [{}] failed: {}", topic, addr, e);
            } else {
                log::debug!(
                    "[node] sent request {} on [{}] to [{}]",
                    handler.request_uuid(),
                    topic,
                    addr
                );
            }
        }
    }
}

// =======================================================================
// Reception thread
// =======================================================================

const CH_SUBSCRIBER: usize = 0;
const CH_CONTROL: usize = 1;
const CH_REPLIER: usize = 2;
const CH_RESPONSE: usize = 3;

fn reception_loop(
    recv: &Mutex<RecvSockets>,
    state: &Mutex<SharedState>,
    exit: &AtomicBool,
    verbose: bool,
) {
    loop {
        if exit.load(Ordering::Relaxed) {
            break;
        }

        let mut batches: Vec<(usize, Vec<Vec<u8>>)> = Vec::new();
        {
            let sockets = recv.lock();
            let mut items = [
                sockets.subscriber.as_poll_item(zmq::POLLIN),
                sockets.control.as_poll_item(zmq::POLLIN),
                sockets.replier.as_poll_item(zmq::POLLIN),
                sockets.response_receiver.as_poll_item(zmq::POLLIN),
            ];
            let ready = match zmq::poll(&mut items, RECEPTION_TIMEOUT.as_millis() as i64) {
                Ok(_) => [
                    items[0].is_readable(),
                    items[1].is_readable(),
                    items[2].is_readable(),
                    items[3].is_readable(),
                ],
                Err(e) => {
                    log::warn!("[node] poll failed: {}", e);
                    [false; 4]
                }
            };
            drop(items);

            let by_channel = [
                &sockets.subscriber,
                &sockets.control,
                &sockets.replier,
                &sockets.response_receiver,
            ];
            for (channel, ready) in ready.iter().enumerate() {
                if !ready {
                    continue;
                }
                match by_channel[channel].recv_multipart(0) {
                    Ok(frames) => batches.push((channel, frames)),
                    Err(e) => log::warn!("[node] receive on channel {} failed: {}", channel, e),
                }
            }
        }

        // Dispatch with the socket lock released; user callbacks run
        // here and may call back into the facade.
        for (channel, frames) in batches {
            match channel {
                CH_SUBSCRIBER => recv_msg_update(state, &frames),
                CH_CONTROL => recv_control_update(state, &frames, verbose),
                CH_REPLIER => recv_srv_request(state, &frames),
                CH_RESPONSE => recv_srv_response(state, &frames),
                _ => unreachable!(),
            }
        }
    }
}

/// Topic update: `[topic][senderAddress][payload]`. Every local
/// subscription handler on the topic runs; a handler whose type does
/// not match logs and the others still run.
fn recv_msg_update(state: &Mutex<SharedState>, frames: &[Vec<u8>]) {
    if frames.len() != 3 {
        log::warn!("[node] dropping malformed topic update ({} frames)", frames.len());
        return;
    }
    let Some(topic) = frame_str(&frames[0]) else {
        log::warn!("[node] dropping topic update with non-UTF-8 topic");
        return;
    };
    let payload = &frames[2];

    let handlers = state.lock().subscriptions.get_handlers(topic);
    let Some(handlers) = handlers else {
        log::debug!("[node] not subscribed to [{}]", topic);
        return;
    };

    for handlers in handlers.values() {
        for handler in handlers.values() {
            if let Err(e) = handler.run(topic, payload) {
                log::warn!(
                    "[node] handler for [{}] expecting [{}] rejected payload: {}",
                    topic,
                    handler.type_name(),
                    e
                );
            }
        }
    }
}

/// Control update: `[topic][pUuid][nUuid][code]`. Maintains the remote
/// subscribers table.
fn recv_control_update(state: &Mutex<SharedState>, frames: &[Vec<u8>], verbose: bool) {
    if frames.len() != 4 {
        log::warn!("[node] dropping malformed control update ({} frames)", frames.len());
        return;
    }
    let (Some(topic), Some(p_uuid), Some(n_uuid), Some(code)) = (
        frame_str(&frames[0]),
        frame_str(&frames[1]),
        frame_str(&frames[2]),
        frame_str(&frames[3]),
    ) else {
        log::warn!("[node] dropping control update with non-UTF-8 frames");
        return;
    };

    let code = code.parse::<u8>().ok().and_then(ControlCode::from_u8);
    match code {
        Some(ControlCode::NewConnection) => {
            if verbose {
                log::info!("[node] remote subscriber {}/{} on [{}]", p_uuid, n_uuid, topic);
            }
            state
                .lock()
                .remote_subscribers
                .add_address(topic, "", "", p_uuid, n_uuid, Scope::All);
        }
        Some(ControlCode::EndConnection) => {
            if verbose {
                log::info!(
                    "[node] remote subscriber {}/{} left [{}]",
                    p_uuid,
                    n_uuid,
                    topic
                );
            }
            state
                .lock()
                .remote_subscribers
                .del_address_by_node(topic, p_uuid, n_uuid);
        }
        None => log::warn!("[node] unknown control code on [{}]", topic),
    }
}

/// Service request:
/// `[identity][topic][responseAddr][responseId][nUuid][reqUuid][req]`.
/// Runs the replier and routes the response back to the requester's
/// response receiver.
fn recv_srv_request(state: &Mutex<SharedState>, frames: &[Vec<u8>]) {
    if frames.len() != 7 {
        log::warn!("[node] dropping malformed service request ({} frames)", frames.len());
        return;
    }
    let (Some(topic), Some(response_addr)) = (frame_str(&frames[1]), frame_str(&frames[2])) else {
        log::warn!("[node] dropping service request with non-UTF-8 frames");
        return;
    };
    let response_id: &[u8] = &frames[3];
    let n_uuid: &[u8] = &frames[4];
    let req_uuid: &[u8] = &frames[5];
    let req: &[u8] = &frames[6];

    let replier = state.lock().repliers.first_handler(topic);
    let Some(replier) = replier else {
        // The requester relies on its own timeout.
        log::warn!("[node] no service registered for [{}]", topic);
        return;
    };

    // User callback with no locks held.
    let (rep, result) = replier.run(topic, req);
    let flag: &[u8] = if result { b"1" } else { b"0" };

    let mut st = state.lock();
    if !st.response_peers.iter().any(|a| a == response_addr) {
        if let Err(e) = st.responses.connect(response_addr) {
            log::warn!("[node] cannot connect responses to [{}]: {}", response_addr, e);
            return;
        }
        st.response_peers.push(response_addr.to_string());
        thread::sleep(CONNECT_SETTLE);
    }

    let result = send_frames(
        &st.responses,
        &[
            response_id,
            topic.as_bytes(),
            n_uuid,
            req_uuid,
            rep.as_slice(),
            flag,
        ],
    );
    if let Err(e) = result {
        log::warn!("[node] response on [{}] to [{}] failed: {}", topic, response_addr, e);
    }
}

/// Service response: `[identity][topic][nUuid][reqUuid][rep][flag]`.
/// Completes the matching pending request and removes it.
fn recv_srv_response(state: &Mutex<SharedState>, frames: &[Vec<u8>]) {
    if frames.len() != 6 {
        log::warn!("[node] dropping malformed service response ({} frames)", frames.len());
        return;
    }
    let (Some(topic), Some(n_uuid), Some(req_uuid), Some(flag)) = (
        frame_str(&frames[1]),
        frame_str(&frames[2]),
        frame_str(&frames[3]),
        frame_str(&frames[5]),
    ) else {
        log::warn!("[node] dropping service response with non-UTF-8 frames");
        return;
    };
    let rep = &frames[4];

    let handler = {
        let mut st = state.lock();
        let handler = st.requests.get_handler(topic, n_uuid, req_uuid);
        if handler.is_some() {
            st.requests.remove_handler(topic, n_uuid, req_uuid);
        }
        handler
    };

    match handler {
        // Callback and rendezvous fire with no locks held.
        Some(handler) => handler.notify(topic, rep, flag == "1"),
        None => log::warn!(
            "[node] service response on [{}] for unknown request {}",
            topic,
            req_uuid
        ),
    }
}
