// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Discovery wire protocol (packet codec and stable type bytes).

mod packet;

pub use packet::{
    AdvertiseMsg, AdvertiseSrv, ControlCode, Header, MsgType, Scope, SubscriptionMsg,
};
