//! PROXY protocol header decoding (v1 text and v2 binary).
//!
//! Address-tagging forwarding prepends one of these to every connection so
//! the listener learns the original client address.

use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use tokio::io::{AsyncRead, AsyncReadExt};

pub const V2_SIGNATURE: [u8; 12] = *b"\r\n\r\n\0\r\nQUIT\n";
const V1_PREFIX: &[u8] = b"PROXY ";
const V1_MAX_LEN: usize = 107;

/// Decoded header. Addresses are `None` for LOCAL/UNKNOWN connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProxyHeader {
    pub source: Option<SocketAddr>,
    pub destination: Option<SocketAddr>,
}

fn invalid(msg: impl Into<String>) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg.into())
}

/// Read exactly one header from the front of `io`, leaving the payload.
pub async fn read_proxy_header<R: AsyncRead + Unpin>(io: &mut R) -> io::Result<ProxyHeader> {
    let mut prefix = [0u8; 12];
    io.read_exact(&mut prefix).await?;

    if prefix == V2_SIGNATURE {
        let mut fixed = [0u8; 4];
        io.read_exact(&mut fixed).await?;
        let len = u16::from_be_bytes([fixed[2], fixed[3]]) as usize;
        let mut rest = vec![0u8; len];
        io.read_exact(&mut rest).await?;
        return parse_v2_body(fixed[0], fixed[1], &rest);
    }

    if !prefix.starts_with(V1_PREFIX) {
        return Err(invalid("missing PROXY protocol header"));
    }

    let mut line = prefix.to_vec();
    while !line.ends_with(b"\r\n") {
        if line.len() >= V1_MAX_LEN {
            return Err(invalid("PROXY v1 header too long"));
        }
        line.push(io.read_u8().await?);
    }
    parse_v1(&line)
}

/// Parse a complete v1 line including the trailing CRLF.
pub fn parse_v1(line: &[u8]) -> io::Result<ProxyHeader> {
    let text = std::str::from_utf8(line).map_err(|_| invalid("PROXY v1 header is not ASCII"))?;
    let text = text
        .strip_suffix("\r\n")
        .ok_or_else(|| invalid("PROXY v1 header missing CRLF"))?;
    let mut fields = text.split(' ');
    if fields.next() != Some("PROXY") {
        return Err(invalid("PROXY v1 header missing signature"));
    }

    match fields.next() {
        Some("UNKNOWN") => Ok(ProxyHeader::default()),
        Some(proto @ ("TCP4" | "TCP6")) => {
            let parts: Vec<&str> = fields.collect();
            let [src, dst, sport, dport] = parts[..] else {
                return Err(invalid("PROXY v1 header has wrong field count"));
            };
            let src: IpAddr = src.parse().map_err(|_| invalid("bad PROXY v1 source address"))?;
            let dst: IpAddr = dst.parse().map_err(|_| invalid("bad PROXY v1 destination address"))?;
            if (proto == "TCP4") != (src.is_ipv4() && dst.is_ipv4()) {
                return Err(invalid("PROXY v1 address family mismatch"));
            }
            let sport: u16 = sport.parse().map_err(|_| invalid("bad PROXY v1 source port"))?;
            let dport: u16 = dport.parse().map_err(|_| invalid("bad PROXY v1 destination port"))?;
            Ok(ProxyHeader {
                source: Some(SocketAddr::new(src, sport)),
                destination: Some(SocketAddr::new(dst, dport)),
            })
        }
        _ => Err(invalid("unsupported PROXY v1 protocol")),
    }
}

/// Parse a full v2 header, signature included.
pub fn parse_v2(buf: &[u8]) -> io::Result<ProxyHeader> {
    if buf.len() < 16 || buf[..12] != V2_SIGNATURE {
        return Err(invalid("missing PROXY v2 signature"));
    }
    let len = u16::from_be_bytes([buf[14], buf[15]]) as usize;
    let body = buf
        .get(16..16 + len)
        .ok_or_else(|| invalid("truncated PROXY v2 header"))?;
    parse_v2_body(buf[12], buf[13], body)
}

fn parse_v2_body(ver_cmd: u8, family: u8, body: &[u8]) -> io::Result<ProxyHeader> {
    if ver_cmd >> 4 != 2 {
        return Err(invalid("unsupported PROXY protocol version"));
    }
    match ver_cmd & 0x0f {
        0x0 => return Ok(ProxyHeader::default()),
        0x1 => {}
        _ => return Err(invalid("unsupported PROXY v2 command")),
    }

    match family {
        // TCP/UDP over IPv4
        0x11 | 0x12 => {
            let b = body.get(..12).ok_or_else(|| invalid("short PROXY v2 IPv4 block"))?;
            let src = Ipv4Addr::new(b[0], b[1], b[2], b[3]);
            let dst = Ipv4Addr::new(b[4], b[5], b[6], b[7]);
            let sport = u16::from_be_bytes([b[8], b[9]]);
            let dport = u16::from_be_bytes([b[10], b[11]]);
            Ok(ProxyHeader {
                source: Some(SocketAddr::new(src.into(), sport)),
                destination: Some(SocketAddr::new(dst.into(), dport)),
            })
        }
        // TCP/UDP over IPv6
        0x21 | 0x22 => {
            let b = body.get(..36).ok_or_else(|| invalid("short PROXY v2 IPv6 block"))?;
            let mut src = [0u8; 16];
            let mut dst = [0u8; 16];
            src.copy_from_slice(&b[..16]);
            dst.copy_from_slice(&b[16..32]);
            let sport = u16::from_be_bytes([b[32], b[33]]);
            let dport = u16::from_be_bytes([b[34], b[35]]);
            Ok(ProxyHeader {
                source: Some(SocketAddr::new(Ipv6Addr::from(src).into(), sport)),
                destination: Some(SocketAddr::new(Ipv6Addr::from(dst).into(), dport)),
            })
        }
        // AF_UNSPEC or unix sockets carry no usable address.
        _ => Ok(ProxyHeader::default()),
    }
}

/// Encode a v2 PROXY header for a TCP connection.
pub fn encode_v2(source: SocketAddr, destination: SocketAddr) -> Vec<u8> {
    let mut out = V2_SIGNATURE.to_vec();
    out.push(0x21);
    match (source, destination) {
        (SocketAddr::V4(s), SocketAddr::V4(d)) => {
            out.push(0x11);
            out.extend_from_slice(&12u16.to_be_bytes());
            out.extend_from_slice(&s.ip().octets());
            out.extend_from_slice(&d.ip().octets());
            out.extend_from_slice(&s.port().to_be_bytes());
            out.extend_from_slice(&d.port().to_be_bytes());
        }
        (s, d) => {
            let v6 = |a: SocketAddr| match a.ip() {
                IpAddr::V4(v4) => v4.to_ipv6_mapped(),
                IpAddr::V6(v6) => v6,
            };
            out.push(0x21);
            out.extend_from_slice(&36u16.to_be_bytes());
            out.extend_from_slice(&v6(s).octets());
            out.extend_from_slice(&v6(d).octets());
            out.extend_from_slice(&s.port().to_be_bytes());
            out.extend_from_slice(&d.port().to_be_bytes());
        }
    }
    out
}
