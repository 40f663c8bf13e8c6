//! Compact encoding of UDP peer addresses.
//!
//! Datagram results carry the sender address appended after the payload
//! as `[protocol:1][port:2][ip:4|16]`, port and ip in network byte order.

use super::Protocol;

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

/// Encoded length of an IPv4 peer address.
pub const UDP_ADDRESS_V4_LEN: usize = 1 + 2 + 4;

/// Encoded length of an IPv6 peer address.
pub const UDP_ADDRESS_V6_LEN: usize = 1 + 2 + 16;

/// Appends the encoded form of `addr` to `out`.
pub fn encode_udp_address(addr: &SocketAddr, out: &mut Vec<u8>) {
    match addr {
        SocketAddr::V4(v4) => {
            out.push(Protocol::Udp as u8);
            out.extend_from_slice(&v4.port().to_be_bytes());
            out.extend_from_slice(&v4.ip().octets());
        }
        SocketAddr::V6(v6) => {
            out.push(Protocol::UdpV6 as u8);
            out.extend_from_slice(&v6.port().to_be_bytes());
            out.extend_from_slice(&v6.ip().octets());
        }
    }
}

/// Decodes an address produced by [`encode_udp_address`].
///
/// Trailing bytes are ignored. Returns `None` for an unknown protocol tag
/// or a truncated buffer.
pub fn decode_udp_address(bytes: &[u8]) -> Option<SocketAddr> {
    let (&tag, rest) = bytes.split_first()?;
    let port = u16::from_be_bytes(rest.get(..2)?.try_into().ok()?);
    let rest = &rest[2..];

    let ip = match tag {
        t if t == Protocol::Udp as u8 => {
            let octets: [u8; 4] = rest.get(..4)?.try_into().ok()?;
            IpAddr::V4(Ipv4Addr::from(octets))
        }
        t if t == Protocol::UdpV6 as u8 => {
            let octets: [u8; 16] = rest.get(..16)?.try_into().ok()?;
            IpAddr::V6(Ipv6Addr::from(octets))
        }
        _ => return None,
    };

    Some(SocketAddr::new(ip, port))
}

/// A received datagram: the payload followed by the encoded sender address.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UdpDatagram {
    data: Vec<u8>,
    len: usize,
}

impl UdpDatagram {
    pub(crate) fn new(payload: &[u8], from: &SocketAddr) -> Self {
        let mut data = Vec::with_capacity(payload.len() + UDP_ADDRESS_V6_LEN);
        data.extend_from_slice(payload);
        encode_udp_address(from, &mut data);

        Self {
            data,
            len: payload.len(),
        }
    }

    /// The datagram payload.
    pub fn payload(&self) -> &[u8] {
        &self.data[..self.len]
    }

    /// Payload length in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The encoded sender address that trails the payload.
    pub fn raw_address(&self) -> &[u8] {
        &self.data[self.len..]
    }

    /// The decoded sender address.
    pub fn address(&self) -> Option<SocketAddr> {
        decode_udp_address(self.raw_address())
    }

    /// The whole message, payload followed by the encoded address.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }
}
