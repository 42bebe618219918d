//! Binary connection header carried at the start of the first frame.
//!
//! Wire format:
//!
//! ```text
//! [1 version][16 user id][1 N][N options][1 command][2 port BE]
//! [1 address type][address][inline payload ...]
//! ```
//!
//! Address encodings: IPv4 (`1`) = 4 bytes, domain (`2`, `3` accepted as an
//! alias) = 1 length byte + UTF-8 text, IPv6 (`4`) = 16 bytes. Everything
//! after the address is inline payload for the destination.

use crate::error::{RelayError, RelayResult};
use crate::identity::{UserId, USER_ID_LEN};
use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};

/// Version byte written by current clients.
pub const DEFAULT_VERSION: u8 = 0;

/// Header size with an empty options block, up to and including the
/// address type byte.
pub const MIN_HEADER_LEN: usize = 1 + USER_ID_LEN + 1 + 1 + 2 + 1;

/// Requested operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Command {
    Tcp = 1,
    Udp = 2,
    Mux = 3,
}

impl Command {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(Command::Tcp),
            2 => Some(Command::Udp),
            3 => Some(Command::Mux),
            _ => None,
        }
    }
}

/// Address type tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AddressType {
    Ipv4 = 1,
    Domain = 2,
    Ipv6 = 4,
}

impl AddressType {
    /// Tag `3` is the domain tag used by some client builds.
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(AddressType::Ipv4),
            2 | 3 => Some(AddressType::Domain),
            4 => Some(AddressType::Ipv6),
            _ => None,
        }
    }
}

/// Decoded destination address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Address {
    Ipv4(Ipv4Addr),
    Domain(String),
    Ipv6(Ipv6Addr),
}

impl Address {
    pub fn address_type(&self) -> AddressType {
        match self {
            Address::Ipv4(_) => AddressType::Ipv4,
            Address::Domain(_) => AddressType::Domain,
            Address::Ipv6(_) => AddressType::Ipv6,
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Address::Ipv4(ip) => write!(f, "{ip}"),
            Address::Domain(name) => f.write_str(name),
            Address::Ipv6(ip) => write!(f, "{ip}"),
        }
    }
}

/// A decoded connection header plus the bytes that followed it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedHeader {
    pub version: u8,
    pub user_id: UserId,
    /// Options block, carried but not interpreted.
    pub options: Vec<u8>,
    pub command: Command,
    pub port: u16,
    pub address: Address,
    pub inline_payload: Vec<u8>,
}

/// Parse the header at the start of `buf`.
///
/// Fails with [`RelayError::UnsupportedCommand`] for anything but TCP and
/// with [`RelayError::MalformedHeader`] for every layout violation,
/// including truncation at any offset.
pub fn parse(buf: &[u8], accepted_version: u8) -> RelayResult<ParsedHeader> {
    if buf.len() < MIN_HEADER_LEN {
        return Err(malformed(format!(
            "{} bytes, need at least {MIN_HEADER_LEN}",
            buf.len()
        )));
    }

    let mut r = Reader::new(buf);

    let version = r.u8("version")?;
    if version != accepted_version {
        return Err(malformed(format!(
            "version {version}, expected {accepted_version}"
        )));
    }

    let mut id = [0u8; USER_ID_LEN];
    id.copy_from_slice(r.take(USER_ID_LEN, "user id")?);
    let user_id = UserId::from_bytes(id);

    let options_len = r.u8("options length")? as usize;
    let options = r.take(options_len, "options")?.to_vec();

    let command_byte = r.u8("command")?;
    let command = match Command::from_byte(command_byte) {
        Some(Command::Tcp) => Command::Tcp,
        _ => return Err(RelayError::UnsupportedCommand(command_byte)),
    };

    let port = r.u16_be("port")?;

    let atyp = r.u8("address type")?;
    let address = match AddressType::from_byte(atyp) {
        Some(AddressType::Ipv4) => {
            let b = r.take(4, "IPv4 address")?;
            Address::Ipv4(Ipv4Addr::new(b[0], b[1], b[2], b[3]))
        }
        Some(AddressType::Domain) => {
            let len = r.u8("domain length")? as usize;
            if len == 0 {
                return Err(malformed("empty domain".into()));
            }
            let raw = r.take(len, "domain")?;
            let name = std::str::from_utf8(raw)
                .map_err(|_| malformed("domain is not valid UTF-8".into()))?;
            Address::Domain(name.to_string())
        }
        Some(AddressType::Ipv6) => {
            let mut b = [0u8; 16];
            b.copy_from_slice(r.take(16, "IPv6 address")?);
            Address::Ipv6(Ipv6Addr::from(b))
        }
        None => return Err(malformed(format!("unknown address type {atyp}"))),
    };

    Ok(ParsedHeader {
        version,
        user_id,
        options,
        command,
        port,
        address,
        inline_payload: r.rest().to_vec(),
    })
}

/// Encode a header followed by its inline payload.
///
/// Domains are written with the canonical tag `2`. Domains longer than 255
/// bytes and options blocks longer than 255 bytes are rejected.
pub fn encode(header: &ParsedHeader) -> RelayResult<Vec<u8>> {
    let options_len = u8::try_from(header.options.len())
        .map_err(|_| malformed("options block longer than 255 bytes".into()))?;

    let mut out = Vec::with_capacity(MIN_HEADER_LEN + 16 + header.inline_payload.len());
    out.push(header.version);
    out.extend_from_slice(header.user_id.as_bytes());
    out.push(options_len);
    out.extend_from_slice(&header.options);
    out.push(header.command as u8);
    out.extend_from_slice(&header.port.to_be_bytes());
    out.push(header.address.address_type() as u8);
    match &header.address {
        Address::Ipv4(ip) => out.extend_from_slice(&ip.octets()),
        Address::Domain(name) => {
            let len = u8::try_from(name.len())
                .map_err(|_| malformed("domain longer than 255 bytes".into()))?;
            out.push(len);
            out.extend_from_slice(name.as_bytes());
        }
        Address::Ipv6(ip) => out.extend_from_slice(&ip.octets()),
    }
    out.extend_from_slice(&header.inline_payload);
    Ok(out)
}

fn malformed(reason: String) -> RelayError {
    RelayError::MalformedHeader(reason)
}

/// Bounds-checked cursor over the header bytes.
struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, n: usize, field: &str) -> RelayResult<&'a [u8]> {
        let end = self.pos + n;
        if end > self.buf.len() {
            return Err(malformed(format!(
                "truncated in {field}: need {end} bytes, have {}",
                self.buf.len()
            )));
        }
        let slice = &self.buf[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u8(&mut self, field: &str) -> RelayResult<u8> {
        Ok(self.take(1, field)?[0])
    }

    fn u16_be(&mut self, field: &str) -> RelayResult<u16> {
        let b = self.take(2, field)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn rest(&self) -> &'a [u8] {
        &self.buf[self.pos..]
    }
}
