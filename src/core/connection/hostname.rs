// src/core/connection/hostname.rs

use super::Connection;
use async_trait::async_trait;
use hickory_resolver::TokioAsyncResolver;
use hickory_resolver::config::{ResolverConfig, ResolverOpts};
use once_cell::sync::Lazy;
use regex::Regex;
use std::net::{IpAddr, Ipv4Addr};
use tracing::{debug, warn};

static RE_IPV4: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d{1,3}(\.\d{1,3}){3}$").unwrap());
static RE_DOMAIN_NAME: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^ip domain[- ]name\s+(\S+)").unwrap());

/// Command used to scrape the configured domain name from a device.
pub const DOMAIN_COMMAND: &str = "show running-config | include domain";

/// PTR lookups for device addresses.
#[async_trait]
pub trait ReverseDns: Send + Sync {
    async fn reverse(&self, ip: Ipv4Addr) -> Option<String>;
}

/// Reverse DNS through the system resolver configuration, falling back to the resolver defaults.
pub struct HickoryReverseDns {
    resolver: TokioAsyncResolver,
}

impl HickoryReverseDns {
    pub fn new() -> Self {
        let resolver = TokioAsyncResolver::tokio_from_system_conf().unwrap_or_else(|e| {
            warn!(error = %e, "System resolver configuration unavailable, using defaults.");
            TokioAsyncResolver::tokio(ResolverConfig::default(), ResolverOpts::default())
        });
        Self { resolver }
    }
}

impl Default for HickoryReverseDns {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ReverseDns for HickoryReverseDns {
    async fn reverse(&self, ip: Ipv4Addr) -> Option<String> {
        match self.resolver.reverse_lookup(IpAddr::V4(ip)).await {
            Ok(lookup) => lookup
                .iter()
                .next()
                .map(|name| name.to_utf8().trim_end_matches('.').to_string()),
            Err(e) => {
                debug!(%ip, error = %e, "Reverse lookup failed.");
                None
            }
        }
    }
}

/// Display hostname for a device.
///
/// Non-IPv4 ids are returned unchanged. For an IPv4 literal, reverse DNS wins;
/// otherwise a live session is asked for its domain name (`<prompt>.<domain>`,
/// or the bare prompt if none is configured); without a session the literal id is kept.
pub async fn resolve_hostname(
    device: &str,
    conn: Option<&mut (dyn Connection + '_)>,
    dns: &dyn ReverseDns,
) -> String {
    if !RE_IPV4.is_match(device) {
        return device.to_string();
    }

    if let Ok(ip) = device.parse::<Ipv4Addr>() {
        if let Some(name) = dns.reverse(ip).await {
            debug!(device, hostname = %name, "Resolved hostname through reverse DNS.");
            return name;
        }
    }

    let Some(conn) = conn else {
        return device.to_string();
    };

    let base = conn.base_prompt().to_string();
    match conn.send(DOMAIN_COMMAND).await {
        Ok(output) => match RE_DOMAIN_NAME.captures(&output) {
            Some(caps) => format!("{}.{}", base, &caps[1]),
            None => base,
        },
        Err(e) => {
            warn!(device, error = %e, "Could not read domain name from device.");
            base
        }
    }
}
