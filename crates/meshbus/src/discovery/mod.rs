// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Distributed topic discovery over UDP multicast.
//!
//! Every peer binds the discovery port, joins the multicast group and
//! exchanges the packets of [`crate::protocol`]. Local advertisements
//! are stored and announced; remote advertisements are stored and
//! surfaced through connection callbacks; heartbeats prove liveness and
//! silence evicts a peer's entries. A single background thread folds
//! reception, heartbeat emission and the liveness sweep into one loop.
//!
//! Callbacks fire on the discovery thread while the discovery mutex is
//! held; callback bodies may take the node-shared locks (the global
//! order is discovery -> sockets -> state) but must never call back
//! into discovery.

mod net;
mod store;

pub use net::determine_host;
pub use store::{AddressMap, EndpointRecord, TopicStorage};

use std::collections::BTreeMap;
use std::net::{Ipv4Addr, SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use socket2::{Domain, Protocol, Socket, Type};

use crate::config::{
    self, DEF_ACTIVITY_INTERVAL, DEF_ADVERTISE_INTERVAL, DEF_HEARTBEAT_INTERVAL,
    DEF_SILENCE_INTERVAL, DISCOVERY_PORT, MAX_DATAGRAM_SIZE, MULTICAST_GROUP, PACKET_VERSION,
    RECEPTION_TIMEOUT,
};
use crate::error::{Error, Result};
use crate::protocol::{AdvertiseMsg, AdvertiseSrv, Header, MsgType, Scope, SubscriptionMsg};

/// Which flavor of endpoint an operation refers to: a topic publisher
/// or a service responder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointKind {
    Msg,
    Srv,
}

/// Connection/disconnection callback:
/// `(topic, addr, ctrl, pUuid, nUuid, scope)`.
pub type DiscoveryCallback = Box<dyn Fn(&str, &str, &str, &str, &str, Scope) + Send + Sync>;

struct DiscoveryState {
    /// Remote and local topic publishers.
    info_msg: TopicStorage,
    /// Remote and local service responders.
    info_srv: TopicStorage,
    /// Last time each remote process was heard from.
    activity: BTreeMap<String, Instant>,
    heartbeat_interval: Duration,
    silence_interval: Duration,
    activity_interval: Duration,
    advertise_interval: Duration,
    connection_cb: Option<DiscoveryCallback>,
    disconnection_cb: Option<DiscoveryCallback>,
    connection_srv_cb: Option<DiscoveryCallback>,
    disconnection_srv_cb: Option<DiscoveryCallback>,
}

struct DiscoveryInner {
    p_uuid: String,
    host_addr: String,
    verbose: bool,
    socket: UdpSocket,
    mcast_dest: SocketAddr,
    state: Mutex<DiscoveryState>,
    exit: AtomicBool,
}

/// The discovery service. Owns the datagram socket and the background
/// thread; dropped last by the node-shared runtime, it broadcasts BYE
/// so peers cancel this process's entries immediately.
pub struct Discovery {
    inner: Arc<DiscoveryInner>,
    handle: Option<JoinHandle<()>>,
}

impl Discovery {
    /// Bind the discovery socket and start the reception thread.
    ///
    /// # Errors
    /// Fails when the host address cannot be determined as a usable
    /// IPv4 or the discovery port cannot be bound; the process is
    /// expected to exit.
    pub fn new(p_uuid: &str, verbose: bool) -> Result<Self> {
        let host_addr = determine_host();
        let iface: Ipv4Addr = host_addr
            .parse()
            .map_err(|_| Error::InitFailed(format!("host address [{}] is not IPv4", host_addr)))?;

        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_reuse_address(true)?;
        #[cfg(unix)]
        socket.set_reuse_port(true)?;
        socket
            .bind(&SocketAddr::from((Ipv4Addr::UNSPECIFIED, DISCOVERY_PORT)).into())
            .map_err(|e| {
                Error::InitFailed(format!("cannot bind discovery port {}: {}", DISCOVERY_PORT, e))
            })?;

        // Select the outgoing interface and join the group on it.
        // Non-fatal: loopback-only hosts still discover local peers.
        if let Err(e) = socket.set_multicast_if_v4(&iface) {
            log::warn!("[discovery] set_multicast_if_v4({}) failed: {}", iface, e);
        }
        if let Err(e) = socket.join_multicast_v4(&MULTICAST_GROUP, &iface) {
            log::warn!(
                "[discovery] join_multicast_v4({}) on {} failed: {}",
                MULTICAST_GROUP,
                iface,
                e
            );
        }
        if let Err(e) = socket.set_multicast_loop_v4(true) {
            log::warn!("[discovery] set_multicast_loop_v4 failed: {}", e);
        }

        let socket: UdpSocket = socket.into();
        socket.set_read_timeout(Some(RECEPTION_TIMEOUT))?;

        log::debug!(
            "[discovery] listening on port {} group {} iface {} pUuid {}",
            DISCOVERY_PORT,
            MULTICAST_GROUP,
            iface,
            p_uuid
        );

        let inner = Arc::new(DiscoveryInner {
            p_uuid: p_uuid.to_string(),
            host_addr,
            verbose,
            socket,
            mcast_dest: SocketAddr::from((MULTICAST_GROUP, DISCOVERY_PORT)),
            state: Mutex::new(DiscoveryState {
                info_msg: TopicStorage::new(),
                info_srv: TopicStorage::new(),
                activity: BTreeMap::new(),
                heartbeat_interval: DEF_HEARTBEAT_INTERVAL,
                silence_interval: DEF_SILENCE_INTERVAL,
                activity_interval: DEF_ACTIVITY_INTERVAL,
                advertise_interval: DEF_ADVERTISE_INTERVAL,
                connection_cb: None,
                disconnection_cb: None,
                connection_srv_cb: None,
                disconnection_srv_cb: None,
            }),
            exit: AtomicBool::new(false),
        });

        let thread_inner = Arc::clone(&inner);
        let handle = thread::Builder::new()
            .name("meshbus-discovery".into())
            .spawn(move || thread_inner.reception_loop())
            .map_err(|e| Error::InitFailed(format!("cannot spawn discovery thread: {}", e)))?;

        Ok(Self {
            inner,
            handle: Some(handle),
        })
    }

    /// The host IP this process binds and advertises.
    pub fn host_addr(&self) -> &str {
        &self.inner.host_addr
    }

    /// Store a local advertisement and announce it, unless the scope
    /// confines it to this process.
    pub fn advertise(
        &self,
        kind: EndpointKind,
        topic: &str,
        addr: &str,
        ctrl: &str,
        n_uuid: &str,
        scope: Scope,
    ) {
        {
            let mut st = self.inner.state.lock();
            let storage = match kind {
                EndpointKind::Msg => &mut st.info_msg,
                EndpointKind::Srv => &mut st.info_srv,
            };
            storage.add_address(topic, addr, ctrl, &self.inner.p_uuid, n_uuid, scope);
        }

        if scope == Scope::Process {
            return;
        }

        let msg_type = match kind {
            EndpointKind::Msg => MsgType::Advertise,
            EndpointKind::Srv => MsgType::AdvertiseSrv,
        };
        self.inner.send_msg(msg_type, topic, addr, ctrl, n_uuid, scope);
    }

    /// Erase a local advertisement and broadcast the cancellation.
    pub fn unadvertise(&self, kind: EndpointKind, topic: &str, n_uuid: &str) {
        let record = {
            let mut st = self.inner.state.lock();
            let storage = match kind {
                EndpointKind::Msg => &mut st.info_msg,
                EndpointKind::Srv => &mut st.info_srv,
            };
            let record = storage.get_address(topic, &self.inner.p_uuid, n_uuid);
            if record.is_some() {
                storage.del_address_by_node(topic, &self.inner.p_uuid, n_uuid);
            }
            record
        };

        // Nothing to do when none of my nodes advertises the topic.
        let Some(record) = record else { return };

        if record.scope == Scope::Process {
            return;
        }

        let msg_type = match kind {
            EndpointKind::Msg => MsgType::Unadvertise,
            EndpointKind::Srv => MsgType::UnadvertiseSrv,
        };
        self.inner
            .send_msg(msg_type, topic, &record.addr, &record.ctrl, n_uuid, record.scope);
    }

    /// Broadcast a discovery probe for `topic` and replay the connect
    /// callback for every advertiser already known.
    pub fn discover(&self, kind: EndpointKind, topic: &str) {
        let msg_type = match kind {
            EndpointKind::Msg => MsgType::Subscribe,
            EndpointKind::Srv => MsgType::SubscribeSrv,
        };
        self.inner.send_msg(msg_type, topic, "", "", "", Scope::All);

        let st = self.inner.state.lock();
        let (storage, cb) = match kind {
            EndpointKind::Msg => (&st.info_msg, &st.connection_cb),
            EndpointKind::Srv => (&st.info_srv, &st.connection_srv_cb),
        };
        let Some(cb) = cb else { return };
        let Some(addresses) = storage.get_addresses(topic) else { return };

        for (p_uuid, records) in &addresses {
            for record in records {
                cb(topic, &record.addr, &record.ctrl, p_uuid, &record.n_uuid, record.scope);
            }
        }
    }

    /// All known advertisers of a topic or service.
    pub fn addresses(&self, kind: EndpointKind, topic: &str) -> Option<AddressMap> {
        let st = self.inner.state.lock();
        match kind {
            EndpointKind::Msg => st.info_msg.get_addresses(topic),
            EndpointKind::Srv => st.info_srv.get_addresses(topic),
        }
    }

    /// Names of every topic currently advertised in the network.
    pub fn topic_list(&self) -> Vec<String> {
        self.inner.state.lock().info_msg.topic_list()
    }

    /// Names of every service currently advertised in the network.
    pub fn service_list(&self) -> Vec<String> {
        self.inner.state.lock().info_srv.topic_list()
    }

    pub fn set_connections_cb(&self, cb: DiscoveryCallback) {
        self.inner.state.lock().connection_cb = Some(cb);
    }

    pub fn set_disconnections_cb(&self, cb: DiscoveryCallback) {
        self.inner.state.lock().disconnection_cb = Some(cb);
    }

    pub fn set_connections_srv_cb(&self, cb: DiscoveryCallback) {
        self.inner.state.lock().connection_srv_cb = Some(cb);
    }

    pub fn set_disconnections_srv_cb(&self, cb: DiscoveryCallback) {
        self.inner.state.lock().disconnection_srv_cb = Some(cb);
    }

    pub fn heartbeat_interval(&self) -> Duration {
        self.inner.state.lock().heartbeat_interval
    }

    pub fn set_heartbeat_interval(&self, interval: Duration) {
        self.inner.state.lock().heartbeat_interval = interval;
    }

    pub fn silence_interval(&self) -> Duration {
        self.inner.state.lock().silence_interval
    }

    pub fn set_silence_interval(&self, interval: Duration) {
        self.inner.state.lock().silence_interval = interval;
    }

    pub fn activity_interval(&self) -> Duration {
        self.inner.state.lock().activity_interval
    }

    pub fn set_activity_interval(&self, interval: Duration) {
        self.inner.state.lock().activity_interval = interval;
    }

    pub fn advertise_interval(&self) -> Duration {
        self.inner.state.lock().advertise_interval
    }

    pub fn set_advertise_interval(&self, interval: Duration) {
        self.inner.state.lock().advertise_interval = interval;
    }

    /// Dump the current discovery state through the logger.
    pub fn log_state(&self) {
        let st = self.inner.state.lock();
        log::info!("[discovery] pUuid {}", self.inner.p_uuid);
        log::info!(
            "[discovery] heartbeat {:?} silence {:?} activity {:?}",
            st.heartbeat_interval,
            st.silence_interval,
            st.activity_interval
        );
        st.info_msg.log_state("discovery/msg");
        st.info_srv.log_state("discovery/srv");
        for (p_uuid, last) in &st.activity {
            log::info!("[discovery] peer {} heard {:?} ago", p_uuid, last.elapsed());
        }
    }
}

impl Drop for Discovery {
    fn drop(&mut self) {
        self.inner.exit.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }

        // Tell peers to cancel all our advertisements right away rather
        // than waiting out the silence interval.
        self.inner.send_msg(MsgType::Bye, "", "", "", "", Scope::All);
    }
}

impl DiscoveryInner {
    /// Reception loop: drain datagrams and run the heartbeat and
    /// liveness tasks when due.
    fn reception_loop(self: Arc<Self>) {
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
        let mut next_heartbeat = Instant::now();
        let mut next_activity = Instant::now();

        loop {
            if self.exit.load(Ordering::Relaxed) {
                break;
            }

            match self.socket.recv_from(&mut buf) {
                Ok((len, src)) => {
                    if self.verbose {
                        log::info!("[discovery] update from {} ({} bytes)", src, len);
                    }
                    self.dispatch_datagram(&src.ip().to_string(), &buf[..len]);
                }
                Err(e)
                    if e.kind() == std::io::ErrorKind::WouldBlock
                        || e.kind() == std::io::ErrorKind::TimedOut => {}
                Err(e) => log::warn!("[discovery] receive failed: {}", e),
            }

            let now = Instant::now();
            if now >= next_heartbeat {
                self.heartbeat_task();
                next_heartbeat = now + self.state.lock().heartbeat_interval;
            }
            if now >= next_activity {
                self.activity_task();
                next_activity = now + self.state.lock().activity_interval;
            }
        }
    }

    /// Decode and act on one datagram. Malformed input is logged and
    /// dropped; the loop never aborts on a decode failure.
    fn dispatch_datagram(&self, from_ip: &str, data: &[u8]) {
        let (header, consumed) = match Header::unpack(data) {
            Ok(parsed) => parsed,
            Err(e) => {
                log::debug!("[discovery] dropping datagram from {}: {}", from_ip, e);
                return;
            }
        };
        let body = &data[consumed..];

        // Discard our own discovery messages.
        if header.p_uuid == self.p_uuid {
            return;
        }

        let mut st = self.state.lock();
        st.activity.insert(header.p_uuid.clone(), Instant::now());

        let result = match header.msg_type {
            MsgType::Advertise | MsgType::AdvertiseSrv => {
                self.handle_advertise(&mut st, from_ip, &header, body)
            }
            MsgType::Subscribe | MsgType::SubscribeSrv => {
                self.handle_subscribe(&mut st, from_ip, &header, body)
            }
            MsgType::Heartbeat => Ok(()),
            MsgType::Bye => {
                self.handle_bye(&mut st, &header.p_uuid);
                Ok(())
            }
            MsgType::Unadvertise | MsgType::UnadvertiseSrv => {
                self.handle_unadvertise(&mut st, from_ip, &header, body)
            }
            MsgType::Uninitialized => Err(Error::MalformedPacket("uninitialized message type")),
        };

        if let Err(e) = result {
            log::debug!("[discovery] dropping {:?} from {}: {}", header.msg_type, from_ip, e);
        }
    }

    fn handle_advertise(
        &self,
        st: &mut DiscoveryState,
        from_ip: &str,
        header: &Header,
        body: &[u8],
    ) -> Result<()> {
        let is_srv = header.msg_type == MsgType::AdvertiseSrv;

        let (topic, addr, ctrl, n_uuid, scope) = if is_srv {
            let (msg, _) = AdvertiseSrv::unpack_body(header.clone(), body)?;
            (msg.topic, msg.addr, msg.ctrl, msg.n_uuid, msg.scope)
        } else {
            let (msg, _) = AdvertiseMsg::unpack_body(header.clone(), body)?;
            (msg.topic, msg.addr, msg.ctrl, msg.n_uuid, msg.scope)
        };

        // Scope filter: a Process-confined record from another process
        // never fires, a Host record only from our own host.
        if scope == Scope::Process || (scope == Scope::Host && from_ip != self.host_addr) {
            return Ok(());
        }

        let (storage, cb) = if is_srv {
            (&mut st.info_srv, &st.connection_srv_cb)
        } else {
            (&mut st.info_msg, &st.connection_cb)
        };

        // First sight fires the callback; duplicates are idempotent.
        let added = storage.add_address(&topic, &addr, &ctrl, &header.p_uuid, &n_uuid, scope);
        if added {
            if let Some(cb) = cb {
                cb(&topic, &addr, &ctrl, &header.p_uuid, &n_uuid, scope);
            }
        }
        Ok(())
    }

    fn handle_subscribe(
        &self,
        st: &mut DiscoveryState,
        from_ip: &str,
        header: &Header,
        body: &[u8],
    ) -> Result<()> {
        let (msg, _) = SubscriptionMsg::unpack_body(header.clone(), body)?;
        let is_srv = header.msg_type == MsgType::SubscribeSrv;

        let (storage, answer_type) = if is_srv {
            (&st.info_srv, MsgType::AdvertiseSrv)
        } else {
            (&st.info_msg, MsgType::Advertise)
        };

        // Answer only when one of my nodes advertises the topic, so the
        // prober learns the endpoint without waiting for a heartbeat.
        if !storage.has_any_addresses(&msg.topic, &self.p_uuid) {
            return Ok(());
        }
        let Some(addresses) = storage.get_addresses(&msg.topic) else {
            return Ok(());
        };
        let Some(records) = addresses.get(&self.p_uuid) else {
            return Ok(());
        };

        for record in records {
            if record.scope == Scope::Process
                || (record.scope == Scope::Host && from_ip != self.host_addr)
            {
                continue;
            }
            self.send_msg(
                answer_type,
                &msg.topic,
                &record.addr,
                &record.ctrl,
                &record.n_uuid,
                record.scope,
            );
        }
        Ok(())
    }

    fn handle_unadvertise(
        &self,
        st: &mut DiscoveryState,
        from_ip: &str,
        header: &Header,
        body: &[u8],
    ) -> Result<()> {
        let (msg, _) = AdvertiseMsg::unpack_body(header.clone(), body)?;

        if msg.scope == Scope::Process || (msg.scope == Scope::Host && from_ip != self.host_addr) {
            return Ok(());
        }

        let is_srv = header.msg_type == MsgType::UnadvertiseSrv;
        let (storage, cb) = if is_srv {
            (&mut st.info_srv, &st.disconnection_srv_cb)
        } else {
            (&mut st.info_msg, &st.disconnection_cb)
        };

        if let Some(cb) = cb {
            cb(&msg.topic, &msg.addr, &msg.ctrl, &header.p_uuid, &msg.n_uuid, msg.scope);
        }
        storage.del_address_by_node(&msg.topic, &header.p_uuid, &msg.n_uuid);
        Ok(())
    }

    /// A peer said goodbye: drop its entries and notify both planes
    /// with the process-wide disconnection shape (empty topic fields).
    fn handle_bye(&self, st: &mut DiscoveryState, p_uuid: &str) {
        st.activity.remove(p_uuid);

        if let Some(cb) = &st.disconnection_cb {
            cb("", "", "", p_uuid, "", Scope::All);
        }
        if let Some(cb) = &st.disconnection_srv_cb {
            cb("", "", "", p_uuid, "", Scope::All);
        }

        st.info_msg.del_addresses_by_proc(p_uuid);
        st.info_srv.del_addresses_by_proc(p_uuid);
    }

    /// Prove liveness and re-announce everything this process
    /// advertises, so peers that missed the original advertisement
    /// converge within one heartbeat.
    fn heartbeat_task(&self) {
        self.send_msg(MsgType::Heartbeat, "", "", "", "", Scope::All);

        let (own_msgs, own_srvs) = {
            let st = self.state.lock();
            (
                st.info_msg.get_addresses_by_proc(&self.p_uuid),
                st.info_srv.get_addresses_by_proc(&self.p_uuid),
            )
        };

        for (topic, records) in &own_msgs {
            for r in records {
                if r.scope == Scope::Process {
                    continue;
                }
                self.send_msg(MsgType::Advertise, topic, &r.addr, &r.ctrl, &r.n_uuid, r.scope);
            }
        }
        for (topic, records) in &own_srvs {
            for r in records {
                if r.scope == Scope::Process {
                    continue;
                }
                self.send_msg(MsgType::AdvertiseSrv, topic, &r.addr, &r.ctrl, &r.n_uuid, r.scope);
            }
        }
    }

    /// Evict peers that stayed silent past the silence interval.
    fn activity_task(&self) {
        let mut st = self.state.lock();
        let silence = st.silence_interval;
        let now = Instant::now();

        let expired: Vec<String> = st
            .activity
            .iter()
            .filter(|(_, last)| now.duration_since(**last) > silence)
            .map(|(p_uuid, _)| p_uuid.clone())
            .collect();

        for p_uuid in expired {
            log::debug!("[discovery] peer {} silent past {:?}, evicting", p_uuid, silence);
            st.activity.remove(&p_uuid);
            self.handle_silence(&mut st, &p_uuid);
        }
    }

    fn handle_silence(&self, st: &mut DiscoveryState, p_uuid: &str) {
        st.info_msg.del_addresses_by_proc(p_uuid);
        st.info_srv.del_addresses_by_proc(p_uuid);

        // Notify without topic information: the remote process is gone
        // even if we never subscribed to anything it advertised.
        if let Some(cb) = &st.disconnection_cb {
            cb("", "", "", p_uuid, "", Scope::All);
        }
        if let Some(cb) = &st.disconnection_srv_cb {
            cb("", "", "", p_uuid, "", Scope::All);
        }
    }

    /// Encode and multicast one discovery message. Failures are logged;
    /// discovery never aborts on a send error.
    fn send_msg(
        &self,
        msg_type: MsgType,
        topic: &str,
        addr: &str,
        ctrl: &str,
        n_uuid: &str,
        scope: Scope,
    ) {
        let header = Header::new(PACKET_VERSION, &self.p_uuid, msg_type, 0);

        let packed: Result<Vec<u8>> = match msg_type {
            MsgType::Advertise | MsgType::Unadvertise | MsgType::UnadvertiseSrv => {
                let msg = AdvertiseMsg::new(
                    header,
                    topic,
                    addr,
                    ctrl,
                    n_uuid,
                    scope,
                    config::UNKNOWN_TYPE_NAME,
                );
                let mut buf = vec![0u8; msg.encoded_len()];
                msg.pack(&mut buf).map(|_| buf)
            }
            MsgType::AdvertiseSrv => {
                // The storage keeps endpoints only; type names travel as
                // placeholders and receivers ignore them.
                let msg = AdvertiseSrv::new(
                    header,
                    topic,
                    addr,
                    ctrl,
                    n_uuid,
                    scope,
                    config::UNKNOWN_TYPE_NAME,
                    config::UNKNOWN_TYPE_NAME,
                );
                let mut buf = vec![0u8; msg.encoded_len()];
                msg.pack(&mut buf).map(|_| buf)
            }
            MsgType::Subscribe | MsgType::SubscribeSrv => {
                let msg = SubscriptionMsg::new(header, topic);
                let mut buf = vec![0u8; msg.encoded_len()];
                msg.pack(&mut buf).map(|_| buf)
            }
            MsgType::Heartbeat | MsgType::Bye => {
                let mut buf = vec![0u8; header.encoded_len()];
                header.pack(&mut buf).map(|_| buf)
            }
            MsgType::Uninitialized => {
                log::error!("[discovery] refusing to send uninitialized message");
                return;
            }
        };

        let buf = match packed {
            Ok(buf) => buf,
            Err(e) => {
                log::error!("[discovery] cannot pack {:?} for [{}]: {}", msg_type, topic, e);
                return;
            }
        };

        if let Err(e) = self.socket.send_to(&buf, self.mcast_dest) {
            log::warn!("[discovery] send {:?} for [{}] failed: {}", msg_type, topic, e);
            return;
        }

        if self.verbose {
            log::info!("[discovery] sent {:?} [{}]", msg_type, topic);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advertise_is_stored_and_queryable() {
        let d = Discovery::new("puuid-adv-test", false).expect("discovery");
        d.advertise(
            EndpointKind::Msg,
            "@@/t",
            "tcp://1.2.3.4:100",
            "tcp://1.2.3.4:101",
            "n1",
            Scope::All,
        );

        let addrs = d.addresses(EndpointKind::Msg, "@@/t").expect("addresses");
        assert_eq!(addrs["puuid-adv-test"].len(), 1);
        assert_eq!(addrs["puuid-adv-test"][0].addr, "tcp://1.2.3.4:100");
        // Sibling test instances share the multicast group, so only
        // assert on our own entry.
        assert!(d.topic_list().contains(&"@@/t".to_string()));
    }

    #[test]
    fn unadvertise_forgets_the_record() {
        let d = Discovery::new("puuid-unadv-test", false).expect("discovery");
        d.advertise(
            EndpointKind::Srv,
            "@@/svc",
            "tcp://1.2.3.4:100",
            "replier-id",
            "n1",
            Scope::All,
        );
        assert!(d.addresses(EndpointKind::Srv, "@@/svc").is_some());

        d.unadvertise(EndpointKind::Srv, "@@/svc", "n1");
        assert!(d.addresses(EndpointKind::Srv, "@@/svc").is_none());

        // Unadvertising a topic we never advertised is a no-op.
        d.unadvertise(EndpointKind::Srv, "@@/other", "n1");
    }

    #[test]
    fn discover_replays_known_addresses() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let d = Discovery::new("puuid-discover-test", false).expect("discovery");
        let hits = Arc::new(AtomicUsize::new(0));
        let hits_cb = Arc::clone(&hits);
        // Count only our topic: sibling test instances share the
        // multicast group and may fire this callback for theirs.
        d.set_connections_cb(Box::new(move |topic, addr, _, _, _, _| {
            if topic == "@@/known" && addr == "tcp://9.9.9.9:1" {
                hits_cb.fetch_add(1, Ordering::SeqCst);
            }
        }));

        d.advertise(
            EndpointKind::Msg,
            "@@/known",
            "tcp://9.9.9.9:1",
            "tcp://9.9.9.9:2",
            "n1",
            Scope::All,
        );

        d.discover(EndpointKind::Msg, "@@/known");
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        // Unknown topics replay nothing.
        d.discover(EndpointKind::Msg, "@@/unknown");
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn interval_setters_round_trip() {
        let d = Discovery::new("puuid-intervals", false).expect("discovery");
        d.set_heartbeat_interval(Duration::from_millis(50));
        assert_eq!(d.heartbeat_interval(), Duration::from_millis(50));
        d.set_silence_interval(Duration::from_millis(150));
        assert_eq!(d.silence_interval(), Duration::from_millis(150));
        d.set_activity_interval(Duration::from_millis(10));
        assert_eq!(d.activity_interval(), Duration::from_millis(10));
        d.set_advertise_interval(Duration::from_millis(75));
        assert_eq!(d.advertise_interval(), Duration::from_millis(75));
    }
}
