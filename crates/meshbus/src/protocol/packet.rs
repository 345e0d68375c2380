// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Discovery datagram codec.
//!
//! Every discovery message starts with a common [`Header`] followed by a
//! type-specific body. Integers are little-endian; every string is
//! preceded by its byte length as a `u64` LE. The length prefixes are
//! pinned to `u64` regardless of platform, a deliberate break from the
//! legacy native-`size_t` format so that peers on different
//! architectures interoperate.
//!
//! `pack` writes into a caller-provided buffer and returns the byte
//! count; `unpack` returns the decoded value plus the consumed count so
//! callers can chain header and body decoding. Any truncated buffer,
//! over-long length prefix, or invalid type byte is a decode error; the
//! caller drops the datagram and keeps running.

use crate::error::{Error, Result};

/// Discovery message type byte. The numeric values are part of the wire
/// contract and must stay stable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MsgType {
    Uninitialized = 0,
    Advertise = 1,
    Subscribe = 2,
    Unadvertise = 3,
    Heartbeat = 4,
    Bye = 5,
    AdvertiseSrv = 6,
    SubscribeSrv = 7,
    UnadvertiseSrv = 8,
}

impl MsgType {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(MsgType::Uninitialized),
            1 => Some(MsgType::Advertise),
            2 => Some(MsgType::Subscribe),
            3 => Some(MsgType::Unadvertise),
            4 => Some(MsgType::Heartbeat),
            5 => Some(MsgType::Bye),
            6 => Some(MsgType::AdvertiseSrv),
            7 => Some(MsgType::SubscribeSrv),
            8 => Some(MsgType::UnadvertiseSrv),
            _ => None,
        }
    }
}

/// Subscriber presence codes exchanged on the stream control channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ControlCode {
    NewConnection = 9,
    EndConnection = 10,
}

impl ControlCode {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            9 => Some(ControlCode::NewConnection),
            10 => Some(ControlCode::EndConnection),
            _ => None,
        }
    }
}

/// Visibility restriction attached to an advertisement.
///
/// Wire values: 0 = Process, 1 = Host, 2 = All.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum Scope {
    Process = 0,
    Host = 1,
    #[default]
    All = 2,
}

impl Scope {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Scope::Process),
            1 => Some(Scope::Host),
            2 => Some(Scope::All),
            _ => None,
        }
    }
}

// =======================================================================
// Little-endian buffer cursors
// =======================================================================

struct Writer<'a> {
    buf: &'a mut [u8],
    pos: usize,
}

impl<'a> Writer<'a> {
    fn new(buf: &'a mut [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn put_u8(&mut self, v: u8) -> Result<()> {
        self.put_bytes(&[v])
    }

    fn put_u16(&mut self, v: u16) -> Result<()> {
        self.put_bytes(&v.to_le_bytes())
    }

    fn put_u64(&mut self, v: u64) -> Result<()> {
        self.put_bytes(&v.to_le_bytes())
    }

    fn put_str(&mut self, s: &str) -> Result<()> {
        self.put_u64(s.len() as u64)?;
        self.put_bytes(s.as_bytes())
    }

    fn put_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        let end = self.pos + bytes.len();
        if end > self.buf.len() {
            return Err(Error::BufferTooSmall);
        }
        self.buf[self.pos..end].copy_from_slice(bytes);
        self.pos = end;
        Ok(())
    }
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(n)
            .ok_or(Error::MalformedPacket("length overflow"))?;
        if end > self.buf.len() {
            return Err(Error::MalformedPacket("truncated buffer"));
        }
        let out = &self.buf[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    fn get_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn get_u16(&mut self) -> Result<u16> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn get_u64(&mut self) -> Result<u64> {
        let b = self.take(8)?;
        let mut arr = [0u8; 8];
        arr.copy_from_slice(b);
        Ok(u64::from_le_bytes(arr))
    }

    fn get_str(&mut self) -> Result<String> {
        let len = self.get_u64()?;
        let len = usize::try_from(len).map_err(|_| Error::MalformedPacket("length overflow"))?;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| Error::MalformedPacket("non-UTF-8 string field"))
    }
}

// =======================================================================
// Header
// =======================================================================

/// Common header of every discovery message: protocol version, sender
/// process UUID, message type, and (reserved) flags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub version: u16,
    pub p_uuid: String,
    pub msg_type: MsgType,
    pub flags: u16,
}

impl Header {
    pub fn new(version: u16, p_uuid: &str, msg_type: MsgType, flags: u16) -> Self {
        Self {
            version,
            p_uuid: p_uuid.to_string(),
            msg_type,
            flags,
        }
    }

    /// Exact byte length `pack` will produce.
    pub fn encoded_len(&self) -> usize {
        2 + 8 + self.p_uuid.len() + 1 + 2
    }

    /// Serialize into `buf`, returning the byte count written.
    pub fn pack(&self, buf: &mut [u8]) -> Result<usize> {
        if self.version == 0 || self.p_uuid.is_empty() || self.msg_type == MsgType::Uninitialized {
            return Err(Error::IncompletePacket("header"));
        }

        let mut w = Writer::new(buf);
        w.put_u16(self.version)?;
        w.put_str(&self.p_uuid)?;
        w.put_u8(self.msg_type as u8)?;
        w.put_u16(self.flags)?;
        Ok(w.pos)
    }

    /// Deserialize from `buf`, returning the header and the byte count
    /// consumed.
    pub fn unpack(buf: &[u8]) -> Result<(Self, usize)> {
        let mut r = Reader::new(buf);
        let version = r.get_u16()?;
        let p_uuid = r.get_str()?;
        let type_byte = r.get_u8()?;
        let msg_type =
            MsgType::from_u8(type_byte).ok_or(Error::MalformedPacket("unknown message type"))?;
        let flags = r.get_u16()?;
        Ok((
            Self {
                version,
                p_uuid,
                msg_type,
                flags,
            },
            r.pos,
        ))
    }
}

// =======================================================================
// Subscription message
// =======================================================================

/// SUBSCRIBE / SUBSCRIBE_SRV probe: header plus the requested topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionMsg {
    pub header: Header,
    pub topic: String,
}

impl SubscriptionMsg {
    pub fn new(header: Header, topic: &str) -> Self {
        Self {
            header,
            topic: topic.to_string(),
        }
    }

    pub fn encoded_len(&self) -> usize {
        self.header.encoded_len() + 8 + self.topic.len()
    }

    pub fn pack(&self, buf: &mut [u8]) -> Result<usize> {
        if self.topic.is_empty() {
            return Err(Error::IncompletePacket("subscription topic"));
        }

        let n = self.header.pack(buf)?;
        let mut w = Writer::new(&mut buf[n..]);
        w.put_str(&self.topic)?;
        Ok(n + w.pos)
    }

    /// Decode the body following an already-decoded header. Returns the
    /// message and the byte count consumed from `buf`.
    pub fn unpack_body(header: Header, buf: &[u8]) -> Result<(Self, usize)> {
        let mut r = Reader::new(buf);
        let topic = r.get_str()?;
        Ok((Self { header, topic }, r.pos))
    }
}

// =======================================================================
// Advertise messages
// =======================================================================

/// Fields shared by every advertisement body: topic, data endpoint,
/// control endpoint, node UUID and scope.
#[derive(Debug, Clone, PartialEq, Eq)]
struct AdvertiseBase {
    topic: String,
    addr: String,
    ctrl: String,
    n_uuid: String,
    scope: Scope,
}

impl AdvertiseBase {
    fn encoded_len(&self) -> usize {
        8 + self.topic.len() + 8 + self.addr.len() + 8 + self.ctrl.len() + 8 + self.n_uuid.len() + 1
    }

    fn pack(&self, w: &mut Writer<'_>) -> Result<()> {
        if self.topic.is_empty() || self.addr.is_empty() || self.n_uuid.is_empty() {
            return Err(Error::IncompletePacket("advertise body"));
        }
        w.put_str(&self.topic)?;
        w.put_str(&self.addr)?;
        w.put_str(&self.ctrl)?;
        w.put_str(&self.n_uuid)?;
        w.put_u8(self.scope as u8)
    }

    fn unpack(r: &mut Reader<'_>) -> Result<Self> {
        let topic = r.get_str()?;
        let addr = r.get_str()?;
        let ctrl = r.get_str()?;
        let n_uuid = r.get_str()?;
        let scope =
            Scope::from_u8(r.get_u8()?).ok_or(Error::MalformedPacket("unknown scope value"))?;
        Ok(Self {
            topic,
            addr,
            ctrl,
            n_uuid,
            scope,
        })
    }
}

/// ADVERTISE / UNADVERTISE body: an endpoint record plus the payload
/// type name published on the topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdvertiseMsg {
    pub header: Header,
    pub topic: String,
    pub addr: String,
    pub ctrl: String,
    pub n_uuid: String,
    pub scope: Scope,
    pub msg_type_name: String,
}

impl AdvertiseMsg {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        header: Header,
        topic: &str,
        addr: &str,
        ctrl: &str,
        n_uuid: &str,
        scope: Scope,
        msg_type_name: &str,
    ) -> Self {
        Self {
            header,
            topic: topic.to_string(),
            addr: addr.to_string(),
            ctrl: ctrl.to_string(),
            n_uuid: n_uuid.to_string(),
            scope,
            msg_type_name: msg_type_name.to_string(),
        }
    }

    fn base(&self) -> AdvertiseBase {
        AdvertiseBase {
            topic: self.topic.clone(),
            addr: self.addr.clone(),
            ctrl: self.ctrl.clone(),
            n_uuid: self.n_uuid.clone(),
            scope: self.scope,
        }
    }

    pub fn encoded_len(&self) -> usize {
        self.header.encoded_len() + self.base().encoded_len() + 8 + self.msg_type_name.len()
    }

    pub fn pack(&self, buf: &mut [u8]) -> Result<usize> {
        if self.msg_type_name.is_empty() {
            return Err(Error::IncompletePacket("message type name"));
        }

        let n = self.header.pack(buf)?;
        let mut w = Writer::new(&mut buf[n..]);
        self.base().pack(&mut w)?;
        w.put_str(&self.msg_type_name)?;
        Ok(n + w.pos)
    }

    pub fn unpack_body(header: Header, buf: &[u8]) -> Result<(Self, usize)> {
        let mut r = Reader::new(buf);
        let base = AdvertiseBase::unpack(&mut r)?;
        let msg_type_name = r.get_str()?;
        Ok((
            Self {
                header,
                topic: base.topic,
                addr: base.addr,
                ctrl: base.ctrl,
                n_uuid: base.n_uuid,
                scope: base.scope,
                msg_type_name,
            },
            r.pos,
        ))
    }
}

/// ADVERTISE_SRV body: an endpoint record plus the request and response
/// payload type names of the offered service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdvertiseSrv {
    pub header: Header,
    pub topic: String,
    pub addr: String,
    pub ctrl: String,
    pub n_uuid: String,
    pub scope: Scope,
    pub req_type_name: String,
    pub rep_type_name: String,
}

impl AdvertiseSrv {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        header: Header,
        topic: &str,
        addr: &str,
        ctrl: &str,
        n_uuid: &str,
        scope: Scope,
        req_type_name: &str,
        rep_type_name: &str,
    ) -> Self {
        Self {
            header,
            topic: topic.to_string(),
            addr: addr.to_string(),
            ctrl: ctrl.to_string(),
            n_uuid: n_uuid.to_string(),
            scope,
            req_type_name: req_type_name.to_string(),
            rep_type_name: rep_type_name.to_string(),
        }
    }

    fn base(&self) -> AdvertiseBase {
        AdvertiseBase {
            topic: self.topic.clone(),
            addr: self.addr.clone(),
            ctrl: self.ctrl.clone(),
            n_uuid: self.n_uuid.clone(),
            scope: self.scope,
        }
    }

    pub fn encoded_len(&self) -> usize {
        self.header.encoded_len()
            + self.base().encoded_len()
            + 8
            + self.req_type_name.len()
            + 8
            + self.rep_type_name.len()
    }

    pub fn pack(&self, buf: &mut [u8]) -> Result<usize> {
        if self.req_type_name.is_empty() || self.rep_type_name.is_empty() {
            return Err(Error::IncompletePacket("service type names"));
        }

        let n = self.header.pack(buf)?;
        let mut w = Writer::new(&mut buf[n..]);
        self.base().pack(&mut w)?;
        w.put_str(&self.req_type_name)?;
        w.put_str(&self.rep_type_name)?;
        Ok(n + w.pos)
    }

    pub fn unpack_body(header: Header, buf: &[u8]) -> Result<(Self, usize)> {
        let mut r = Reader::new(buf);
        let base = AdvertiseBase::unpack(&mut r)?;
        let req_type_name = r.get_str()?;
        let rep_type_name = r.get_str()?;
        Ok((
            Self {
                header,
                topic: base.topic,
                addr: base.addr,
                ctrl: base.ctrl,
                n_uuid: base.n_uuid,
                scope: base.scope,
                req_type_name,
                rep_type_name,
            },
            r.pos,
        ))
    }
}
