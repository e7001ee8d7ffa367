//! DDS domain id and RTPS port helpers, used to keep parallel test runs on separate domains.

use std::net::UdpSocket;
use std::ops::Range;

use rand::Rng;
use rand::seq::SliceRandom;

use crate::prelude::*;

/// RTPS well-known port parameters, RTI Connext defaults.
const PORT_BASE: u32 = 7400;
const DOMAIN_ID_GAIN: u32 = 250;
const PARTICIPANT_ID_GAIN: u32 = 2;
const D0: u32 = 0;
const D1: u32 = 10;
const D2: u32 = 1;
const D3: u32 = 11;

/// Highest domain id before the port base overflows for the first participant.
pub const MAX_DOMAIN_ID: i64 = 232;
/// Highest participant index checked by [`validate_domain_id`].
const MAX_PARTICIPANT_ID: u32 = 119;

/// Domain ids searched by [`get_safe_domain_id`].
pub const SAFE_DOMAIN_RANGE: Range<u32> = 50..99;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DomainPorts {
    pub domain_id: u32,
    pub discovery_multicast: u32,
    pub discovery_unicast: u32,
    pub user_multicast: u32,
    pub user_unicast: u32,
}

impl DomainPorts {
    pub fn all(&self) -> [u32; 4] {
        [
            self.discovery_multicast,
            self.discovery_unicast,
            self.user_multicast,
            self.user_unicast,
        ]
    }
}

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum DomainIdError {
    #[error("Domain ID cannot be negative")]
    Negative,
    #[error("Domain ID {0} is too high (max safe value: {MAX_DOMAIN_ID})")]
    TooHigh(i64),
    #[error("Domain ID {domain_id} would use invalid port {port}")]
    PortOverflow { domain_id: i64, port: u32 },
}

pub fn calculate_rtps_ports(domain_id: u32, participant_id: u32) -> DomainPorts {
    let base = PORT_BASE + DOMAIN_ID_GAIN * domain_id;
    DomainPorts {
        domain_id,
        discovery_multicast: base + D0,
        discovery_unicast: base + D1 + PARTICIPANT_ID_GAIN * participant_id,
        user_multicast: base + D2,
        user_unicast: base + D3 + PARTICIPANT_ID_GAIN * participant_id,
    }
}

/// Whether a UDP socket can be bound to `port` on every interface.
pub fn is_port_available(port: u32) -> bool {
    let Ok(port) = u16::try_from(port) else {
        return false;
    };
    UdpSocket::bind(("0.0.0.0", port)).is_ok()
}

pub fn is_domain_available(domain_id: u32, participant_id: u32) -> bool {
    calculate_rtps_ports(domain_id, participant_id)
        .all()
        .into_iter()
        .all(is_port_available)
}

/// First domain of `range`, in random order, whose ports are all free.
pub fn find_available_domain(range: Range<u32>, participant_id: u32) -> Option<u32> {
    let mut domain_ids: Vec<u32> = range.collect();
    domain_ids.shuffle(&mut rand::thread_rng());

    domain_ids
        .into_iter()
        .find(|&domain_id| is_domain_available(domain_id, participant_id))
}

/// A domain id for a test run: a free one when possible, otherwise a random one in the same
/// range.
pub fn get_safe_domain_id() -> u32 {
    match find_available_domain(SAFE_DOMAIN_RANGE, 0) {
        Some(domain_id) => domain_id,
        None => {
            let domain_id =
                rand::thread_rng().gen_range(SAFE_DOMAIN_RANGE.start..=SAFE_DOMAIN_RANGE.end);
            debug!("No free domain found, falling back to {domain_id}");
            domain_id
        }
    }
}

/// Check that every participant of `domain_id` gets valid ports.
pub fn validate_domain_id(domain_id: i64) -> Result<u32, DomainIdError> {
    if domain_id < 0 {
        return Err(DomainIdError::Negative);
    }
    if domain_id > MAX_DOMAIN_ID {
        return Err(DomainIdError::TooHigh(domain_id));
    }
    let domain = u32::try_from(domain_id).map_err(|_| DomainIdError::TooHigh(domain_id))?;

    let max_port = calculate_rtps_ports(domain, MAX_PARTICIPANT_ID)
        .all()
        .into_iter()
        .max()
        .unwrap_or(PORT_BASE);
    if max_port > u32::from(u16::MAX) {
        return Err(DomainIdError::PortOverflow {
            domain_id,
            port: max_port,
        });
    }
    Ok(domain)
}
