//! Minimal BER codec for SNMP v1/v2c GET exchanges.
//!
//! Covers the subset of ASN.1 needed by the SNMP prober: definite lengths,
//! INTEGER, OCTET STRING, NULL, OBJECT IDENTIFIER, SEQUENCE, the SNMP
//! application types and the v2c exception values.

use std::fmt;

pub(crate) const TAG_INTEGER: u8 = 0x02;
pub(crate) const TAG_OCTET_STRING: u8 = 0x04;
pub(crate) const TAG_NULL: u8 = 0x05;
pub(crate) const TAG_OBJECT_ID: u8 = 0x06;
pub(crate) const TAG_SEQUENCE: u8 = 0x30;

const TAG_IP_ADDRESS: u8 = 0x40;
const TAG_COUNTER32: u8 = 0x41;
const TAG_GAUGE32: u8 = 0x42;
const TAG_TIMETICKS: u8 = 0x43;
const TAG_OPAQUE: u8 = 0x44;
const TAG_COUNTER64: u8 = 0x46;
const TAG_NO_SUCH_OBJECT: u8 = 0x80;
const TAG_NO_SUCH_INSTANCE: u8 = 0x81;
const TAG_END_OF_MIB_VIEW: u8 = 0x82;

pub(crate) const PDU_GET_REQUEST: u8 = 0xA0;
pub(crate) const PDU_GET_RESPONSE: u8 = 0xA2;

pub(crate) type Oid = Vec<u32>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub(crate) enum BerError {
    #[error("message truncated")]
    Truncated,

    #[error("unexpected tag 0x{found:02x} (expected 0x{expected:02x})")]
    UnexpectedTag { expected: u8, found: u8 },

    #[error("invalid length encoding")]
    InvalidLength,

    #[error("integer does not fit in 64 bits")]
    IntegerOverflow,

    #[error("invalid object identifier '{0}'")]
    InvalidOid(String),
}

/// A decoded variable-binding value
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum SnmpValue {
    Integer(i64),
    OctetString(Vec<u8>),
    Null,
    ObjectId(Oid),
    IpAddress([u8; 4]),
    Counter32(u32),
    Gauge32(u32),
    TimeTicks(u32),
    Opaque(Vec<u8>),
    Counter64(u64),
    NoSuchObject,
    NoSuchInstance,
    EndOfMibView,
    Other(u8),
}

impl SnmpValue {
    /// Numeric view of the value. Octet strings holding a number (as UCD-SNMP
    /// reports load averages) are parsed.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            SnmpValue::Integer(v) => Some(*v as f64),
            SnmpValue::Counter32(v) | SnmpValue::Gauge32(v) | SnmpValue::TimeTicks(v) => {
                Some(*v as f64)
            }
            SnmpValue::Counter64(v) => Some(*v as f64),
            SnmpValue::OctetString(bytes) => std::str::from_utf8(bytes)
                .ok()
                .and_then(|s| s.trim().parse::<f64>().ok())
                .filter(|v| v.is_finite()),
            _ => None,
        }
    }

    pub fn is_exception(&self) -> bool {
        matches!(
            self,
            SnmpValue::NoSuchObject | SnmpValue::NoSuchInstance | SnmpValue::EndOfMibView
        )
    }
}

impl fmt::Display for SnmpValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SnmpValue::NoSuchObject => write!(f, "noSuchObject"),
            SnmpValue::NoSuchInstance => write!(f, "noSuchInstance"),
            SnmpValue::EndOfMibView => write!(f, "endOfMibView"),
            SnmpValue::OctetString(bytes) => write!(f, "\"{}\"", String::from_utf8_lossy(bytes)),
            SnmpValue::ObjectId(oid) => write!(f, "{}", format_oid(oid)),
            other => match other.as_f64() {
                Some(v) => write!(f, "{v}"),
                None => write!(f, "{other:?}"),
            },
        }
    }
}

/// A complete SNMP v1/v2c message
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct SnmpMessage {
    pub version: i64,
    pub community: Vec<u8>,
    pub pdu_type: u8,
    pub request_id: i64,
    pub error_status: i64,
    pub error_index: i64,
    pub varbinds: Vec<(Oid, SnmpValue)>,
}

/// Parse dotted notation, tolerating one leading dot
pub(crate) fn parse_oid(text: &str) -> Result<Oid, BerError> {
    let invalid = || BerError::InvalidOid(text.to_string());
    let trimmed = text.trim().trim_start_matches('.');

    let oid = trimmed
        .split('.')
        .map(|part| part.parse::<u32>().map_err(|_| invalid()))
        .collect::<Result<Oid, _>>()?;

    // the first two arcs share one subidentifier on the wire
    match oid.as_slice() {
        [first, second, ..]
            if *first <= 2
                && (*first == 2 || *second < 40)
                && first.checked_mul(40).and_then(|v| v.checked_add(*second)).is_some() =>
        {
            Ok(oid)
        }
        _ => Err(invalid()),
    }
}

pub(crate) fn format_oid(oid: &[u32]) -> String {
    oid.iter()
        .map(u32::to_string)
        .collect::<Vec<_>>()
        .join(".")
}

// ---------------------------------------------------------------------------
// Encoding
// ---------------------------------------------------------------------------

fn encode_length(len: usize, out: &mut Vec<u8>) {
    if len < 0x80 {
        out.push(len as u8);
        return;
    }

    let bytes = len.to_be_bytes();
    let skip = bytes.iter().take_while(|b| **b == 0).count();
    let significant = &bytes[skip..];
    out.push(0x80 | significant.len() as u8);
    out.extend_from_slice(significant);
}

fn encode_tlv(tag: u8, content: &[u8], out: &mut Vec<u8>) {
    out.push(tag);
    encode_length(content.len(), out);
    out.extend_from_slice(content);
}

/// Minimal two's-complement encoding
fn integer_content(value: i64) -> Vec<u8> {
    let bytes = value.to_be_bytes();
    let mut start = 0;
    while start < bytes.len() - 1 {
        let redundant = (bytes[start] == 0x00 && bytes[start + 1] & 0x80 == 0)
            || (bytes[start] == 0xff && bytes[start + 1] & 0x80 != 0);
        if !redundant {
            break;
        }
        start += 1;
    }
    bytes[start..].to_vec()
}

fn unsigned_content(value: u64) -> Vec<u8> {
    let bytes = value.to_be_bytes();
    let skip = bytes
        .iter()
        .take_while(|b| **b == 0)
        .count()
        .min(bytes.len() - 1);

    let mut content = Vec::with_capacity(9);
    if bytes[skip] & 0x80 != 0 {
        content.push(0);
    }
    content.extend_from_slice(&bytes[skip..]);
    content
}

fn push_base128(mut value: u64, out: &mut Vec<u8>) {
    let mut groups = [0u8; 10];
    let mut n = 0;
    loop {
        groups[n] = (value & 0x7f) as u8;
        n += 1;
        value >>= 7;
        if value == 0 {
            break;
        }
    }
    for i in (0..n).rev() {
        out.push(if i > 0 { groups[i] | 0x80 } else { groups[i] });
    }
}

fn oid_content(oid: &[u32]) -> Vec<u8> {
    let mut content = Vec::with_capacity(oid.len() + 4);
    match oid {
        [first, second, rest @ ..] => {
            push_base128(u64::from(*first) * 40 + u64::from(*second), &mut content);
            for arc in rest {
                push_base128(u64::from(*arc), &mut content);
            }
        }
        [only] => push_base128(u64::from(*only) * 40, &mut content),
        [] => {}
    }
    content
}

fn encode_value(value: &SnmpValue, out: &mut Vec<u8>) {
    match value {
        SnmpValue::Integer(v) => encode_tlv(TAG_INTEGER, &integer_content(*v), out),
        SnmpValue::OctetString(bytes) => encode_tlv(TAG_OCTET_STRING, bytes, out),
        SnmpValue::Null => encode_tlv(TAG_NULL, &[], out),
        SnmpValue::ObjectId(oid) => encode_tlv(TAG_OBJECT_ID, &oid_content(oid), out),
        SnmpValue::IpAddress(octets) => encode_tlv(TAG_IP_ADDRESS, octets, out),
        SnmpValue::Counter32(v) => encode_tlv(TAG_COUNTER32, &unsigned_content(*v as u64), out),
        SnmpValue::Gauge32(v) => encode_tlv(TAG_GAUGE32, &unsigned_content(*v as u64), out),
        SnmpValue::TimeTicks(v) => encode_tlv(TAG_TIMETICKS, &unsigned_content(*v as u64), out),
        SnmpValue::Opaque(bytes) => encode_tlv(TAG_OPAQUE, bytes, out),
        SnmpValue::Counter64(v) => encode_tlv(TAG_COUNTER64, &unsigned_content(*v), out),
        SnmpValue::NoSuchObject => encode_tlv(TAG_NO_SUCH_OBJECT, &[], out),
        SnmpValue::NoSuchInstance => encode_tlv(TAG_NO_SUCH_INSTANCE, &[], out),
        SnmpValue::EndOfMibView => encode_tlv(TAG_END_OF_MIB_VIEW, &[], out),
        SnmpValue::Other(tag) => encode_tlv(*tag, &[], out),
    }
}

pub(crate) fn encode_message(message: &SnmpMessage) -> Vec<u8> {
    let mut varbind_list = Vec::new();
    for (oid, value) in &message.varbinds {
        let mut varbind = Vec::new();
        encode_tlv(TAG_OBJECT_ID, &oid_content(oid), &mut varbind);
        encode_value(value, &mut varbind);
        encode_tlv(TAG_SEQUENCE, &varbind, &mut varbind_list);
    }

    let mut pdu = Vec::new();
    encode_tlv(TAG_INTEGER, &integer_content(message.request_id), &mut pdu);
    encode_tlv(TAG_INTEGER, &integer_content(message.error_status), &mut pdu);
    encode_tlv(TAG_INTEGER, &integer_content(message.error_index), &mut pdu);
    encode_tlv(TAG_SEQUENCE, &varbind_list, &mut pdu);

    let mut body = Vec::new();
    encode_tlv(TAG_INTEGER, &integer_content(message.version), &mut body);
    encode_tlv(TAG_OCTET_STRING, &message.community, &mut body);
    encode_tlv(message.pdu_type, &pdu, &mut body);

    let mut out = Vec::with_capacity(body.len() + 4);
    encode_tlv(TAG_SEQUENCE, &body, &mut out);
    out
}

/// GetRequest for `oids`, each bound to NULL
pub(crate) fn encode_get_request(
    version: i64,
    community: &str,
    request_id: i64,
    oids: &[Oid],
) -> Vec<u8> {
    encode_message(&SnmpMessage {
        version,
        community: community.as_bytes().to_vec(),
        pdu_type: PDU_GET_REQUEST,
        request_id,
        error_status: 0,
        error_index: 0,
        varbinds: oids.iter().map(|oid| (oid.clone(), SnmpValue::Null)).collect(),
    })
}

// ---------------------------------------------------------------------------
// Decoding
// ---------------------------------------------------------------------------

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn is_empty(&self) -> bool {
        self.pos >= self.buf.len()
    }

    fn byte(&mut self) -> Result<u8, BerError> {
        let b = *self.buf.get(self.pos).ok_or(BerError::Truncated)?;
        self.pos += 1;
        Ok(b)
    }

    fn length(&mut self) -> Result<usize, BerError> {
        let first = self.byte()?;
        if first & 0x80 == 0 {
            return Ok(first as usize);
        }

        let count = (first & 0x7f) as usize;
        if count == 0 || count > 4 {
            // indefinite form is not valid in SNMP
            return Err(BerError::InvalidLength);
        }

        let mut len = 0usize;
        for _ in 0..count {
            len = (len << 8) | self.byte()? as usize;
        }
        Ok(len)
    }

    fn tlv(&mut self) -> Result<(u8, &'a [u8]), BerError> {
        let tag = self.byte()?;
        let len = self.length()?;
        let end = self.pos.checked_add(len).ok_or(BerError::InvalidLength)?;
        let content = self.buf.get(self.pos..end).ok_or(BerError::Truncated)?;
        self.pos = end;
        Ok((tag, content))
    }

    fn expect(&mut self, expected: u8) -> Result<&'a [u8], BerError> {
        let (found, content) = self.tlv()?;
        if found != expected {
            return Err(BerError::UnexpectedTag { expected, found });
        }
        Ok(content)
    }

    fn integer(&mut self) -> Result<i64, BerError> {
        decode_integer(self.expect(TAG_INTEGER)?)
    }
}

fn decode_integer(content: &[u8]) -> Result<i64, BerError> {
    if content.is_empty() {
        return Err(BerError::InvalidLength);
    }
    if content.len() > 8 {
        return Err(BerError::IntegerOverflow);
    }

    let mut value: i64 = if content[0] & 0x80 != 0 { -1 } else { 0 };
    for b in content {
        value = (value << 8) | *b as i64;
    }
    Ok(value)
}

fn decode_unsigned(content: &[u8]) -> Result<u64, BerError> {
    if content.is_empty() {
        return Err(BerError::InvalidLength);
    }

    let significant = match content {
        [0, rest @ ..] if !rest.is_empty() => rest,
        other => other,
    };
    if significant.len() > 8 {
        return Err(BerError::IntegerOverflow);
    }

    Ok(significant.iter().fold(0u64, |acc, b| (acc << 8) | *b as u64))
}

fn decode_u32(content: &[u8]) -> Result<u32, BerError> {
    u32::try_from(decode_unsigned(content)?).map_err(|_| BerError::IntegerOverflow)
}

fn decode_oid(content: &[u8]) -> Result<Oid, BerError> {
    let mut arcs = Vec::with_capacity(content.len() + 1);
    let mut value: u32 = 0;

    for (i, b) in content.iter().enumerate() {
        value = value
            .checked_mul(128)
            .map(|v| v | (*b & 0x7f) as u32)
            .ok_or(BerError::IntegerOverflow)?;

        if b & 0x80 == 0 {
            if arcs.is_empty() {
                let first = (value / 40).min(2);
                arcs.push(first);
                arcs.push(value - first * 40);
            } else {
                arcs.push(value);
            }
            value = 0;
        } else if i == content.len() - 1 {
            return Err(BerError::Truncated);
        }
    }

    Ok(arcs)
}

fn decode_value(tag: u8, content: &[u8]) -> Result<SnmpValue, BerError> {
    Ok(match tag {
        TAG_INTEGER => SnmpValue::Integer(decode_integer(content)?),
        TAG_OCTET_STRING => SnmpValue::OctetString(content.to_vec()),
        TAG_NULL => SnmpValue::Null,
        TAG_OBJECT_ID => SnmpValue::ObjectId(decode_oid(content)?),
        TAG_IP_ADDRESS => {
            let octets: [u8; 4] = content.try_into().map_err(|_| BerError::InvalidLength)?;
            SnmpValue::IpAddress(octets)
        }
        TAG_COUNTER32 => SnmpValue::Counter32(decode_u32(content)?),
        TAG_GAUGE32 => SnmpValue::Gauge32(decode_u32(content)?),
        TAG_TIMETICKS => SnmpValue::TimeTicks(decode_u32(content)?),
        TAG_OPAQUE => SnmpValue::Opaque(content.to_vec()),
        TAG_COUNTER64 => SnmpValue::Counter64(decode_unsigned(content)?),
        TAG_NO_SUCH_OBJECT => SnmpValue::NoSuchObject,
        TAG_NO_SUCH_INSTANCE => SnmpValue::NoSuchInstance,
        TAG_END_OF_MIB_VIEW => SnmpValue::EndOfMibView,
        other => SnmpValue::Other(other),
    })
}

pub(crate) fn decode_message(buf: &[u8]) -> Result<SnmpMessage, BerError> {
    let mut outer = Reader::new(buf);
    let mut message = Reader::new(outer.expect(TAG_SEQUENCE)?);

    let version = message.integer()?;
    let community = message.expect(TAG_OCTET_STRING)?.to_vec();

    let (pdu_type, pdu_content) = message.tlv()?;
    let mut pdu = Reader::new(pdu_content);
    let request_id = pdu.integer()?;
    let error_status = pdu.integer()?;
    let error_index = pdu.integer()?;

    let mut list = Reader::new(pdu.expect(TAG_SEQUENCE)?);
    let mut varbinds = Vec::new();
    while !list.is_empty() {
        let mut varbind = Reader::new(list.expect(TAG_SEQUENCE)?);
        let oid = decode_oid(varbind.expect(TAG_OBJECT_ID)?)?;
        let (tag, content) = varbind.tlv()?;
        varbinds.push((oid, decode_value(tag, content)?));
    }

    Ok(SnmpMessage {
        version,
        community,
        pdu_type,
        request_id,
        error_status,
        error_index,
        varbinds,
    })
}
