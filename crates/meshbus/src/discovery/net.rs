// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Host IP selection for discovery and stream socket binding.
//!
//! Priority: `IGN_IP` environment override, then hostname lookup, then
//! interface enumeration preferring non-loopback addresses and public
//! over private ranges. Loopback is the last resort; it works for local
//! processes but not across machines.

use std::net::{IpAddr, Ipv4Addr, ToSocketAddrs};

use crate::config;

/// RFC1918-ish ranges the interface fallback deprioritizes.
pub fn is_private_ip(ip: &Ipv4Addr) -> bool {
    let octets = ip.octets();
    matches!(octets, [10, ..] | [192, 168, ..] | [169, 254, ..])
}

/// Resolve a hostname to its first IPv4 address.
fn hostname_to_ip(hostname: &str) -> Option<Ipv4Addr> {
    // Port 0 just satisfies the ToSocketAddrs form.
    let addrs = (hostname, 0u16).to_socket_addrs().ok()?;
    for addr in addrs {
        if let IpAddr::V4(v4) = addr.ip() {
            return Some(v4);
        }
    }
    None
}

/// Pick the preferred IPv4 address among the host's interfaces:
/// non-loopback wins, and a public address replaces a private one.
fn preferred_interface_ip() -> Option<Ipv4Addr> {
    let interfaces = match local_ip_address::list_afinet_netifas() {
        Ok(ifs) => ifs,
        Err(e) => {
            log::warn!("[net] failed to list network interfaces: {}", e);
            return None;
        }
    };

    let mut preferred: Option<Ipv4Addr> = None;
    for (name, ip) in interfaces {
        let IpAddr::V4(v4) = ip else { continue };
        if v4.is_loopback() {
            continue;
        }
        log::debug!("[net] candidate interface {} -> {}", name, v4);

        match preferred {
            None => preferred = Some(v4),
            Some(current) if is_private_ip(&current) && !is_private_ip(&v4) => {
                preferred = Some(v4);
            }
            Some(_) => {}
        }
    }

    preferred
}

/// Determine the host address this process binds and advertises.
pub fn determine_host() -> String {
    // First, did the user set IGN_IP?
    if let Some(ip) = config::ip_override() {
        log::debug!("[net] IGN_IP override: {}", ip);
        return ip;
    }

    // Second, try the hostname, unless it is plain localhost.
    if let Ok(hostname) = std::env::var("HOSTNAME") {
        if !hostname.is_empty() && hostname != "localhost" {
            if let Some(ip) = hostname_to_ip(&hostname) {
                if !ip.is_loopback() {
                    log::debug!("[net] hostname {} -> {}", hostname, ip);
                    return ip.to_string();
                }
            }
        }
    }

    // Third, fall back on interface enumeration.
    if let Some(ip) = preferred_interface_ip() {
        log::debug!("[net] selected interface address {}", ip);
        return ip.to_string();
    }

    log::warn!(
        "[net] no usable interface address found; assuming 127.0.0.1 \
         (local processes only, remote peers will not reach this host)"
    );
    "127.0.0.1".to_string()
}
