//! Record codec using nom
//!
//! File format:
//! ```text
//! FEED001\n
//! [version: u32]
//! [payload_len: u32]
//! [payload: payload_len bytes]
//! ```
//!
//! Payload format (all integers little-endian):
//! ```text
//! [secs: i64][nanos: u32][item_count: u32]
//! item_count x {
//!   [id: 16 bytes]
//!   [has_description: u8][len: u32][utf-8]   (len + bytes only when has_description = 1)
//!   [has_location: u8][len: u32][utf-8]      (len + bytes only when has_location = 1)
//!   [url_len: u32][utf-8]
//! }
//! ```

use chrono::{DateTime, TimeZone, Utc};
use nom::{
    bytes::complete::{tag, take},
    combinator::{all_consuming, map, map_opt, map_res},
    error::{Error as NomError, ErrorKind},
    multi::{length_count, length_data},
    number::complete::{le_i64, le_u32, le_u8},
    sequence::tuple,
    IResult,
};
use url::Url;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::model::{CacheRecord, Item};

/// Magic header for feed store files
pub const FEED_MAGIC: &[u8] = b"FEED001\n";

/// Current on-disk format version
pub const FORMAT_VERSION: u32 = 1;

/// Header length: magic + version + payload length
pub const HEADER_LEN: usize = FEED_MAGIC.len() + 8;

/// Maximum encoded record size (64 MiB)
pub const MAX_RECORD_SIZE: usize = 64 * 1024 * 1024;

/// Feed store file header
#[derive(Debug, Clone, PartialEq)]
pub struct RecordHeader {
    /// File format version
    pub version: u32,
    /// Length of the payload following the header
    pub payload_len: u32,
}

fn header(input: &[u8]) -> IResult<&[u8], RecordHeader> {
    map(
        tuple((tag(FEED_MAGIC), le_u32, le_u32)),
        |(_, version, payload_len)| RecordHeader {
            version,
            payload_len,
        },
    )(input)
}

/// Parse a feed store file header
pub fn parse_header(input: &[u8]) -> Result<RecordHeader> {
    if input.len() < HEADER_LEN {
        return Err(Error::Corrupt("input too short for header".to_string()));
    }
    if &input[..FEED_MAGIC.len()] != FEED_MAGIC {
        return Err(Error::Corrupt("invalid magic header".to_string()));
    }

    let (_, parsed) = header(input)?;
    Ok(parsed)
}

/// Create a feed store file header
pub fn create_header(version: u32, payload_len: u32) -> Vec<u8> {
    let mut header = Vec::with_capacity(HEADER_LEN);
    header.extend_from_slice(FEED_MAGIC);
    header.extend_from_slice(&version.to_le_bytes());
    header.extend_from_slice(&payload_len.to_le_bytes());
    header
}

fn string(input: &[u8]) -> IResult<&[u8], String> {
    map_res(length_data(le_u32), |bytes: &[u8]| {
        String::from_utf8(bytes.to_vec())
    })(input)
}

fn optional_string(input: &[u8]) -> IResult<&[u8], Option<String>> {
    let (rest, present) = le_u8(input)?;
    match present {
        0 => Ok((rest, None)),
        1 => map(string, Some)(rest),
        _ => Err(nom::Err::Error(NomError::new(input, ErrorKind::Tag))),
    }
}

fn timestamp(input: &[u8]) -> IResult<&[u8], DateTime<Utc>> {
    map_opt(tuple((le_i64, le_u32)), |(secs, nanos)| {
        Utc.timestamp_opt(secs, nanos).single()
    })(input)
}

fn item(input: &[u8]) -> IResult<&[u8], Item> {
    let (input, id) = map_res(take(16usize), Uuid::from_slice)(input)?;
    let (input, description) = optional_string(input)?;
    let (input, location) = optional_string(input)?;
    let (input, url) = map_res(string, |s| Url::parse(&s))(input)?;

    Ok((
        input,
        Item {
            id,
            description,
            location,
            url,
        },
    ))
}

fn payload(input: &[u8]) -> IResult<&[u8], CacheRecord> {
    map(
        tuple((timestamp, length_count(le_u32, item))),
        |(timestamp, items)| CacheRecord { items, timestamp },
    )(input)
}

/// Decode a complete file image (header + payload) into a record
pub fn decode_record(input: &[u8]) -> Result<CacheRecord> {
    let header = parse_header(input)?;
    if header.version != FORMAT_VERSION {
        return Err(Error::Corrupt(format!(
            "unsupported format version {}",
            header.version
        )));
    }

    let body = &input[HEADER_LEN..];
    if body.len() != header.payload_len as usize {
        return Err(Error::Corrupt(format!(
            "payload length mismatch: header says {}, found {}",
            header.payload_len,
            body.len()
        )));
    }

    let (_, record) = all_consuming(payload)(body)?;
    Ok(record)
}

fn put_len(buf: &mut Vec<u8>, len: usize) -> Result<()> {
    let len = u32::try_from(len).map_err(|_| Error::RecordTooLarge(len))?;
    buf.extend_from_slice(&len.to_le_bytes());
    Ok(())
}

fn put_string(buf: &mut Vec<u8>, value: &str) -> Result<()> {
    put_len(buf, value.len())?;
    buf.extend_from_slice(value.as_bytes());
    Ok(())
}

fn put_optional_string(buf: &mut Vec<u8>, value: Option<&str>) -> Result<()> {
    match value {
        Some(value) => {
            buf.push(1);
            put_string(buf, value)
        }
        None => {
            buf.push(0);
            Ok(())
        }
    }
}

/// Encode a record into a complete file image (header + payload)
pub fn encode_record(record: &CacheRecord) -> Result<Vec<u8>> {
    let mut body = Vec::with_capacity(16 + record.items.len() * 64);
    body.extend_from_slice(&record.timestamp.timestamp().to_le_bytes());
    body.extend_from_slice(&record.timestamp.timestamp_subsec_nanos().to_le_bytes());
    put_len(&mut body, record.items.len())?;

    for item in &record.items {
        body.extend_from_slice(item.id.as_bytes());
        put_optional_string(&mut body, item.description.as_deref())?;
        put_optional_string(&mut body, item.location.as_deref())?;
        put_string(&mut body, item.url.as_str())?;

        if body.len() + HEADER_LEN > MAX_RECORD_SIZE {
            return Err(Error::RecordTooLarge(body.len() + HEADER_LEN));
        }
    }

    let mut out = create_header(FORMAT_VERSION, body.len() as u32);
    out.extend_from_slice(&body);
    Ok(out)
}
