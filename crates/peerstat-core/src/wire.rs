//! Snapshot transport framing (panic-free).
//!
//! Request:  `[version, op]`
//! Response: `[version, status, len: u32 BE]` followed by `len` payload bytes.
//! A `STATUS_OK` payload is a JSON `SnapshotData`; `STATUS_ERR` carries a
//! UTF-8 message.
//!
//! Parsing rules:
//! - Never index (`buf[0]`), always use `Buf` and `remaining()` checks.
//! - Never `unwrap()` / `expect()` / `panic!()` in production paths.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{PeerstatError, Result};
use crate::labels::LabelSet;
use crate::metric::{whole_count, Descriptor, MetricKind, MetricSet, Value};

pub const PROTOCOL_VERSION: u8 = 1;
/// The only operation: "give me your current snapshot".
pub const OP_SNAPSHOT: u8 = 0x01;

pub const STATUS_OK: u8 = 0;
pub const STATUS_ERR: u8 = 1;

pub const REQUEST_LEN: usize = 2;
pub const RESPONSE_HEADER_LEN: usize = 6;

/// Default upper bound on a response payload.
pub const DEFAULT_MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

/// Error frame messages are cut to this many bytes.
pub const MAX_ERROR_MESSAGE_BYTES: usize = 4096;

/// Serializable form of a `MetricSet`, metrics in registration order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotData {
    pub metrics: Vec<MetricData>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricData {
    #[serde(flatten)]
    pub desc: Descriptor,
    #[serde(default)]
    pub series: Vec<(LabelSet, WireValue)>,
}

/// A series value as carried in JSON.
///
/// Counts travel as integers. JSON has no `NaN` or infinities, so those
/// gauge values travel as the strings `"NaN"`, `"+Inf"` and `"-Inf"`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum WireValue {
    Int(u64),
    Float(f64),
}

impl From<Value> for WireValue {
    fn from(v: Value) -> Self {
        match v {
            Value::Count(n) => WireValue::Int(n),
            Value::Gauge(v) => WireValue::Float(v),
        }
    }
}

impl WireValue {
    /// Type the value for metric `name` of `kind`. Counters accept whole,
    /// non-negative numbers only.
    pub fn typed(self, name: &str, kind: MetricKind) -> Result<Value> {
        match (kind, self) {
            (MetricKind::Counter, WireValue::Int(n)) => Ok(Value::Count(n)),
            (MetricKind::Counter, WireValue::Float(v)) => whole_count(v)
                .map(Value::Count)
                .ok_or_else(|| PeerstatError::InvalidValue {
                    name: name.to_string(),
                    value: v,
                }),
            (MetricKind::Gauge, WireValue::Int(n)) => Ok(Value::Gauge(n as f64)),
            (MetricKind::Gauge, WireValue::Float(v)) => Ok(Value::Gauge(v)),
        }
    }
}

impl Serialize for WireValue {
    fn serialize<S: Serializer>(&self, s: S) -> std::result::Result<S::Ok, S::Error> {
        match *self {
            WireValue::Int(n) => s.serialize_u64(n),
            WireValue::Float(v) if v.is_nan() => s.serialize_str("NaN"),
            WireValue::Float(v) if v == f64::INFINITY => s.serialize_str("+Inf"),
            WireValue::Float(v) if v == f64::NEG_INFINITY => s.serialize_str("-Inf"),
            WireValue::Float(v) => s.serialize_f64(v),
        }
    }
}

impl<'de> Deserialize<'de> for WireValue {
    fn deserialize<D: Deserializer<'de>>(d: D) -> std::result::Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Int(u64),
            Float(f64),
            Text(String),
        }

        match Repr::deserialize(d)? {
            Repr::Int(n) => Ok(WireValue::Int(n)),
            Repr::Float(v) => Ok(WireValue::Float(v)),
            Repr::Text(t) => match t.as_str() {
                "NaN" => Ok(WireValue::Float(f64::NAN)),
                "+Inf" => Ok(WireValue::Float(f64::INFINITY)),
                "-Inf" => Ok(WireValue::Float(f64::NEG_INFINITY)),
                other => Err(serde::de::Error::custom(format!(
                    "unknown series value: {other:?}"
                ))),
            },
        }
    }
}

impl SnapshotData {
    pub fn from_set(set: &MetricSet) -> Self {
        let metrics = set
            .metrics()
            .into_iter()
            .map(|m| MetricData {
                desc: m.descriptor().clone(),
                series: m
                    .values()
                    .into_iter()
                    .map(|(labels, v)| (labels, WireValue::from(v)))
                    .collect(),
            })
            .collect();
        Self { metrics }
    }

    /// Rebuild through the public registry API so every definition and value
    /// is validated as if set locally.
    pub fn into_set(self) -> Result<MetricSet> {
        let set = MetricSet::new();
        for m in self.metrics {
            let name = m.desc.name.clone();
            let kind = m.desc.kind;
            set.register_descriptor(m.desc)?;
            let rows = m
                .series
                .into_iter()
                .map(|(labels, v)| Ok((labels, v.typed(&name, kind)?)))
                .collect::<Result<Vec<_>>>()?;
            set.set_values(&name, rows)?;
        }
        Ok(set)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponseHeader {
    pub status: u8,
    pub len: usize,
}

pub fn encode_request() -> [u8; REQUEST_LEN] {
    [PROTOCOL_VERSION, OP_SNAPSHOT]
}

/// Validate a request. Returns the opcode.
pub fn decode_request(mut buf: &[u8]) -> Result<u8> {
    if buf.remaining() < REQUEST_LEN {
        return Err(PeerstatError::BadFrame("request too short".into()));
    }
    if buf.get_u8() != PROTOCOL_VERSION {
        return Err(PeerstatError::UnsupportedVersion);
    }
    let op = buf.get_u8();
    if op != OP_SNAPSHOT {
        return Err(PeerstatError::BadFrame(format!("unknown op: {op:#04x}")));
    }
    Ok(op)
}

fn frame(status: u8, payload: &[u8], max: usize) -> Result<Bytes> {
    if payload.len() > max || payload.len() > u32::MAX as usize {
        return Err(PeerstatError::FrameTooLarge {
            len: payload.len(),
            max,
        });
    }
    let mut buf = BytesMut::with_capacity(RESPONSE_HEADER_LEN + payload.len());
    buf.put_u8(PROTOCOL_VERSION);
    buf.put_u8(status);
    buf.put_u32(payload.len() as u32);
    buf.put_slice(payload);
    Ok(buf.freeze())
}

pub fn encode_snapshot(set: &MetricSet, max: usize) -> Result<Bytes> {
    let payload = serde_json::to_vec(&SnapshotData::from_set(set))
        .map_err(|e| PeerstatError::Internal(format!("snapshot encode failed: {e}")))?;
    frame(STATUS_OK, &payload, max)
}

/// Error frame. Messages over `MAX_ERROR_MESSAGE_BYTES` are cut at a char
/// boundary, so the length prefix always fits.
pub fn encode_error(msg: &str) -> Bytes {
    let mut end = msg.len().min(MAX_ERROR_MESSAGE_BYTES);
    while !msg.is_char_boundary(end) {
        end -= 1;
    }
    let msg = msg.get(..end).unwrap_or_default().as_bytes();
    let mut buf = BytesMut::with_capacity(RESPONSE_HEADER_LEN + msg.len());
    buf.put_u8(PROTOCOL_VERSION);
    buf.put_u8(STATUS_ERR);
    buf.put_u32(msg.len() as u32);
    buf.put_slice(msg);
    buf.freeze()
}

pub fn decode_response_header(mut buf: &[u8], max: usize) -> Result<ResponseHeader> {
    if buf.remaining() < RESPONSE_HEADER_LEN {
        return Err(PeerstatError::BadFrame("response header too short".into()));
    }
    if buf.get_u8() != PROTOCOL_VERSION {
        return Err(PeerstatError::UnsupportedVersion);
    }
    let status = buf.get_u8();
    if status != STATUS_OK && status != STATUS_ERR {
        return Err(PeerstatError::BadFrame(format!("unknown status: {status}")));
    }
    let len = buf.get_u32() as usize;
    if len > max {
        return Err(PeerstatError::FrameTooLarge { len, max });
    }
    Ok(ResponseHeader { status, len })
}

/// Decode a response payload given its header.
pub fn decode_response(header: ResponseHeader, payload: Bytes) -> Result<MetricSet> {
    if payload.remaining() != header.len {
        return Err(PeerstatError::BadFrame(format!(
            "payload length {} does not match header {}",
            payload.remaining(),
            header.len
        )));
    }
    if header.status == STATUS_ERR {
        return Err(PeerstatError::Internal(format!(
            "peer reported: {}",
            String::from_utf8_lossy(&payload)
        )));
    }
    let data: SnapshotData = serde_json::from_slice(&payload)
        .map_err(|e| PeerstatError::BadFrame(format!("invalid snapshot json: {e}")))?;
    data.into_set()
}
