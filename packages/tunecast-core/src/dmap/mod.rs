//! DMAP wire codec.
//!
//! DMAP is the tagged binary container format every non-audio DAAP response
//! body is written in. A node encodes as `code(4B) || length(4B, big endian)
//! || body`, where the length counts only the body and a container's body is
//! the concatenation of its encoded children.
//!
//! The server only needs the encoder; the decoder exists because round-trip
//! checks are the cheapest way to keep the two honest, and the integration
//! suite uses it to pick responses apart.

pub mod codes;

pub use codes::{default_bag, ContentCode, ContentCodeBag, ContentType};

use thiserror::Error;

/// Decode failures.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DmapError {
    /// Ran out of bytes before a field's declared length was satisfied.
    #[error("truncated dmap data")]
    Truncated,

    /// Encountered a code that is not in the registry.
    #[error("unknown content code {0}")]
    UnknownCode(String),

    /// A field's declared length does not match its type's width, or a
    /// container's declared length does not exactly cover its children.
    #[error("bad length for {0}")]
    BadLength(String),

    /// A string payload was not valid UTF-8.
    #[error("invalid utf-8 in {0}")]
    InvalidString(String),
}

/// Payload of a content node. The variant fixes the encoded width.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    Str(String),
    Bytes(Vec<u8>),
    /// Unix timestamp, seconds.
    Date(u32),
    /// Protocol version quad, encoded as major/minor/patch over four octets.
    Version(u16, u8, u8),
    Container(Vec<Node>),
}

/// A content node: a code plus a typed payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub code: ContentCode,
    pub value: Value,
}

impl Node {
    pub fn u8(code: ContentCode, v: u8) -> Self {
        Self { code, value: Value::U8(v) }
    }

    pub fn u16(code: ContentCode, v: u16) -> Self {
        Self { code, value: Value::U16(v) }
    }

    pub fn u32(code: ContentCode, v: u32) -> Self {
        Self { code, value: Value::U32(v) }
    }

    pub fn u64(code: ContentCode, v: u64) -> Self {
        Self { code, value: Value::U64(v) }
    }

    pub fn string(code: ContentCode, v: impl Into<String>) -> Self {
        Self { code, value: Value::Str(v.into()) }
    }

    pub fn date(code: ContentCode, unix_secs: u32) -> Self {
        Self { code, value: Value::Date(unix_secs) }
    }

    pub fn version(code: ContentCode, major: u16, minor: u8, patch: u8) -> Self {
        Self { code, value: Value::Version(major, minor, patch) }
    }

    pub fn container(code: ContentCode, children: Vec<Node>) -> Self {
        Self { code, value: Value::Container(children) }
    }

    /// Byte length of the encoded body (excluding the 8-byte header).
    fn body_len(&self) -> usize {
        match &self.value {
            Value::U8(_) => 1,
            Value::U16(_) => 2,
            Value::U32(_) | Value::Date(_) | Value::Version(..) => 4,
            Value::U64(_) => 8,
            Value::Str(s) => s.len(),
            Value::Bytes(b) => b.len(),
            Value::Container(children) => {
                children.iter().map(|c| 8 + c.body_len()).sum()
            }
        }
    }

    /// Encodes the node into a fresh buffer.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(8 + self.body_len());
        self.encode_into(&mut out);
        out
    }

    fn encode_into(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.code.0);
        out.extend_from_slice(&(self.body_len() as u32).to_be_bytes());
        match &self.value {
            Value::U8(v) => out.push(*v),
            Value::U16(v) => out.extend_from_slice(&v.to_be_bytes()),
            Value::U32(v) | Value::Date(v) => out.extend_from_slice(&v.to_be_bytes()),
            Value::U64(v) => out.extend_from_slice(&v.to_be_bytes()),
            Value::Version(major, minor, patch) => {
                out.extend_from_slice(&major.to_be_bytes());
                out.push(*minor);
                out.push(*patch);
            }
            Value::Str(s) => out.extend_from_slice(s.as_bytes()),
            Value::Bytes(b) => out.extend_from_slice(b),
            Value::Container(children) => {
                for child in children {
                    child.encode_into(out);
                }
            }
        }
    }

    /// Decodes a single node covering the entire buffer.
    ///
    /// Integer widths come from the registry. Rejects unknown codes,
    /// truncated payloads, containers whose declared length does not exactly
    /// cover their children, and trailing bytes after the root node.
    pub fn decode(bytes: &[u8], bag: &ContentCodeBag) -> Result<Node, DmapError> {
        let (node, consumed) = decode_one(bytes, bag)?;
        if consumed != bytes.len() {
            return Err(DmapError::BadLength(node.code.to_string()));
        }
        Ok(node)
    }

    /// First child with the given code, if this node is a container.
    #[must_use]
    pub fn child(&self, code: ContentCode) -> Option<&Node> {
        self.children().iter().find(|c| c.code == code)
    }

    /// Children of a container node; empty for scalar nodes.
    #[must_use]
    pub fn children(&self) -> &[Node] {
        match &self.value {
            Value::Container(children) => children,
            _ => &[],
        }
    }

    /// The payload widened to `u64`, for scalar integer nodes.
    #[must_use]
    pub fn as_u64(&self) -> Option<u64> {
        match self.value {
            Value::U8(v) => Some(u64::from(v)),
            Value::U16(v) => Some(u64::from(v)),
            Value::U32(v) | Value::Date(v) => Some(u64::from(v)),
            Value::U64(v) => Some(v),
            _ => None,
        }
    }

    /// The payload as a string slice, for string nodes.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match &self.value {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }
}

fn decode_one(bytes: &[u8], bag: &ContentCodeBag) -> Result<(Node, usize), DmapError> {
    if bytes.len() < 8 {
        return Err(DmapError::Truncated);
    }
    let code = ContentCode([bytes[0], bytes[1], bytes[2], bytes[3]]);
    let len = u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]) as usize;
    let body = bytes
        .get(8..8 + len)
        .ok_or(DmapError::Truncated)?;
    let ty = bag
        .content_type(code)
        .ok_or_else(|| DmapError::UnknownCode(code.to_string()))?;

    let fixed = |expected: usize| -> Result<&[u8], DmapError> {
        if body.len() == expected {
            Ok(body)
        } else {
            Err(DmapError::BadLength(code.to_string()))
        }
    };

    let value = match ty {
        ContentType::Byte => Value::U8(fixed(1)?[0]),
        ContentType::Short => {
            let b = fixed(2)?;
            Value::U16(u16::from_be_bytes([b[0], b[1]]))
        }
        ContentType::Int => {
            let b = fixed(4)?;
            Value::U32(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
        }
        ContentType::Long => {
            let b = fixed(8)?;
            let mut buf = [0u8; 8];
            buf.copy_from_slice(b);
            Value::U64(u64::from_be_bytes(buf))
        }
        ContentType::Date => {
            let b = fixed(4)?;
            Value::Date(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
        }
        ContentType::Version => {
            let b = fixed(4)?;
            Value::Version(u16::from_be_bytes([b[0], b[1]]), b[2], b[3])
        }
        ContentType::Str => Value::Str(
            String::from_utf8(body.to_vec())
                .map_err(|_| DmapError::InvalidString(code.to_string()))?,
        ),
        ContentType::Container => {
            let mut children = Vec::new();
            let mut offset = 0;
            while offset < body.len() {
                let (child, used) = decode_one(&body[offset..], bag)?;
                children.push(child);
                offset += used;
            }
            // decode_one never over-reads, so reaching here means the
            // declared length exactly covered the children
            Value::Container(children)
        }
    };

    Ok((Node { code, value }, 8 + len))
}

/// Checks that every node in a tree carries the payload variant its code is
/// registered with. Builders are expected to uphold this; tests use it to
/// prove they do.
pub fn validate(node: &Node, bag: &ContentCodeBag) -> Result<(), DmapError> {
    let ty = bag
        .content_type(node.code)
        .ok_or_else(|| DmapError::UnknownCode(node.code.to_string()))?;
    let ok = matches!(
        (ty, &node.value),
        (ContentType::Byte, Value::U8(_))
            | (ContentType::Short, Value::U16(_))
            | (ContentType::Int, Value::U32(_))
            | (ContentType::Long, Value::U64(_))
            | (ContentType::Str, Value::Str(_))
            | (ContentType::Date, Value::Date(_))
            | (ContentType::Version, Value::Version(..))
            | (ContentType::Container, Value::Container(_))
    );
    if !ok {
        return Err(DmapError::BadLength(node.code.to_string()));
    }
    for child in node.children() {
        validate(child, bag)?;
    }
    Ok(())
}
