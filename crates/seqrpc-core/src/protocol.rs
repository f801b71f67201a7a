//! Wire protocol: request/response types and framing.
//!
//! Every frame is a 4-byte big-endian length prefix followed by a UTF-8 JSON
//! payload. The payload is a tagged `Frame`, so a decoder can tell requests
//! from responses without context.
//!
//! ```text
//! [u32 BE: len][UTF-8 JSON bytes of len]
//! ```

use crate::config::WireConfig;
use crate::value::{format_signature, Value, ValueKind};
use crate::{Result, RpcError};
use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// A call to `service.method(params)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub id: u64,
    pub service: String,
    pub method: String,
    #[serde(default)]
    pub params: Vec<Value>,
    /// Processing deadline requested by the caller, in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline_ms: Option<u64>,
}

impl Request {
    pub fn new(
        id: u64,
        service: impl Into<String>,
        method: impl Into<String>,
        params: Vec<Value>,
    ) -> Self {
        Self {
            id,
            service: service.into(),
            method: method.into(),
            params,
            deadline_ms: None,
        }
    }

    pub fn with_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.deadline_ms = deadline.map(|d| d.as_millis().min(u64::MAX as u128) as u64);
        self
    }

    pub fn deadline(&self) -> Option<Duration> {
        self.deadline_ms.map(Duration::from_millis)
    }

    /// Kinds of the parameters, in order. This is the dispatch signature.
    pub fn signature(&self) -> Vec<ValueKind> {
        self.params.iter().map(Value::kind).collect()
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<id: {} - {}.{}(", self.id, self.service, self.method)?;
        for (i, param) in self.params.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{} {}", param.kind(), param)?;
        }
        f.write_str(")>")
    }
}

/// Category of a failed call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultKind {
    UnknownService,
    UnknownMethod,
    InvocationFailure,
    Transport,
    DeadlineExceeded,
}

impl FaultKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FaultKind::UnknownService => "unknown_service",
            FaultKind::UnknownMethod => "unknown_method",
            FaultKind::InvocationFailure => "invocation_failure",
            FaultKind::Transport => "transport",
            FaultKind::DeadlineExceeded => "deadline_exceeded",
        }
    }

    /// Numeric code for the fault, in the JSON-RPC server-error style.
    ///
    /// - -32601: Method not found
    /// - -32603: Internal (transport) error
    /// - -32000: Invocation failure
    /// - -32001: Service not found
    /// - -32002: Deadline exceeded
    pub fn code(&self) -> i32 {
        match self {
            FaultKind::UnknownMethod => -32601,
            FaultKind::Transport => -32603,
            FaultKind::InvocationFailure => -32000,
            FaultKind::UnknownService => -32001,
            FaultKind::DeadlineExceeded => -32002,
        }
    }
}

impl fmt::Display for FaultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error value carried in a response in place of a result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fault {
    pub kind: FaultKind,
    pub message: String,
}

impl Fault {
    pub fn new(kind: FaultKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn unknown_service(service: &str) -> Self {
        Self::new(
            FaultKind::UnknownService,
            format!("Unknown service '{}'", service),
        )
    }

    pub fn unknown_method(service: &str, method: &str, signature: &[ValueKind]) -> Self {
        Self::new(
            FaultKind::UnknownMethod,
            format!(
                "Unknown method '{}{}' on service '{}'",
                method,
                format_signature(signature),
                service
            ),
        )
    }

    pub fn invocation(message: impl Into<String>) -> Self {
        Self::new(FaultKind::InvocationFailure, message)
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(FaultKind::Transport, message)
    }

    pub fn deadline(limit: Duration) -> Self {
        Self::new(
            FaultKind::DeadlineExceeded,
            format!("Processing exceeded deadline of {:?}", limit),
        )
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// Outcome of processing one request: a result (absent for void) or a fault.
pub type Outcome = std::result::Result<Option<Value>, Fault>;

/// Reply to a `Request` with the same id.
///
/// Both `result` and `error` absent means the method returned nothing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Fault>,
}

impl Response {
    /// An empty response reserving the output position of request `id`.
    pub fn placeholder(id: u64) -> Self {
        Self {
            id,
            result: None,
            error: None,
        }
    }

    pub fn success(id: u64, result: Option<Value>) -> Self {
        Self {
            id,
            result,
            error: None,
        }
    }

    pub fn failure(id: u64, fault: Fault) -> Self {
        Self {
            id,
            result: None,
            error: Some(fault),
        }
    }

    /// Fill the placeholder with the processing outcome.
    pub fn fill(&mut self, outcome: Outcome) {
        match outcome {
            Ok(result) => {
                self.result = result;
                self.error = None;
            }
            Err(fault) => {
                self.result = None;
                self.error = Some(fault);
            }
        }
    }

    /// Convert into what the caller sees: the result, or the remote fault.
    pub fn into_result(self) -> Result<Option<Value>> {
        match self.error {
            Some(fault) => Err(RpcError::Remote {
                kind: fault.kind,
                message: fault.message,
            }),
            None => Ok(self.result),
        }
    }
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.result, &self.error) {
            (_, Some(fault)) => write!(f, "<id: {} - {}>", self.id, fault),
            (Some(value), None) => write!(f, "<id: {} - {}>", self.id, value),
            (None, None) => write!(f, "<id: {} - void>", self.id),
        }
    }
}

/// Everything that travels on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Frame {
    Request(Request),
    Response(Response),
}

impl Frame {
    fn is_encodable(&self) -> bool {
        match self {
            Frame::Request(req) => req.params.iter().all(Value::is_encodable),
            Frame::Response(resp) => resp.result.as_ref().map_or(true, Value::is_encodable),
        }
    }
}

/// Encode a frame, length prefix included, ready to be written in one piece.
pub fn encode_frame(frame: &Frame) -> Result<Bytes> {
    if !frame.is_encodable() {
        return Err(RpcError::malformed(
            "non-finite float values cannot be encoded",
        ));
    }

    let payload = serde_json::to_vec(frame)?;
    if payload.len() > WireConfig::MAX_FRAME_SIZE {
        return Err(RpcError::malformed(format!(
            "frame size {} exceeds maximum {}",
            payload.len(),
            WireConfig::MAX_FRAME_SIZE
        )));
    }

    let mut buf = BytesMut::with_capacity(WireConfig::LENGTH_PREFIX_SIZE + payload.len());
    buf.put_u32(payload.len() as u32);
    buf.extend_from_slice(&payload);
    Ok(buf.freeze())
}

/// Decode a frame payload (without its length prefix).
pub fn decode_frame(payload: &[u8]) -> Result<Frame> {
    serde_json::from_slice(payload).map_err(|e| RpcError::malformed(e.to_string()))
}

/// Read one length-prefixed payload.
///
/// Returns `None` on clean EOF at a frame boundary. EOF inside a frame is a
/// truncated frame and reported as `MalformedFrame`.
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Option<Vec<u8>>> {
    let mut len_buf = [0u8; WireConfig::LENGTH_PREFIX_SIZE];

    let first = reader.read(&mut len_buf[..1]).await?;
    if first == 0 {
        return Ok(None);
    }
    read_exact_or_truncated(reader, &mut len_buf[1..]).await?;

    let len = u32::from_be_bytes(len_buf) as usize;
    if len > WireConfig::MAX_FRAME_SIZE {
        return Err(RpcError::malformed(format!(
            "frame size {} exceeds maximum {}",
            len,
            WireConfig::MAX_FRAME_SIZE
        )));
    }

    let mut payload = vec![0u8; len];
    read_exact_or_truncated(reader, &mut payload).await?;

    Ok(Some(payload))
}

async fn read_exact_or_truncated<R: AsyncRead + Unpin>(reader: &mut R, buf: &mut [u8]) -> Result<()> {
    match reader.read_exact(buf).await {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            Err(RpcError::malformed("truncated frame"))
        }
        Err(e) => Err(e.into()),
    }
}

/// Write an encoded frame (as produced by `encode_frame`) and flush.
pub async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, frame: &[u8]) -> Result<()> {
    writer.write_all(frame).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn all_kinds() -> Vec<Value> {
        vec![
            Value::Null,
            Value::Bool(true),
            Value::Int(-42),
            Value::Int(i64::MAX),
            Value::Float(0.1),
            Value::Float(-1.5e300),
            Value::Str("héllo \"world\"".to_string()),
            Value::Bytes(vec![0, 1, 255]),
        ]
    }

    fn roundtrip(frame: Frame) -> Frame {
        let encoded = encode_frame(&frame).unwrap();
        decode_frame(&encoded[WireConfig::LENGTH_PREFIX_SIZE..]).unwrap()
    }

    #[test]
    fn test_request_roundtrip_all_value_kinds() {
        let frame = Frame::Request(Request::new(1, "math", "mix", all_kinds()));
        assert_eq!(roundtrip(frame.clone()), frame);
    }

    #[test]
    fn test_request_roundtrip_empty_params_and_deadline() {
        let req = Request::new(2, "clock", "now", vec![])
            .with_deadline(Some(Duration::from_millis(250)));
        let frame = Frame::Request(req);
        assert_eq!(roundtrip(frame.clone()), frame);
    }

    #[test]
    fn test_response_roundtrip_result_fault_and_void() {
        for frame in [
            Frame::Response(Response::success(3, Some(Value::Int(5)))),
            Frame::Response(Response::success(4, None)),
            Frame::Response(Response::placeholder(5)),
            Frame::Response(Response::failure(6, Fault::unknown_service("ghost"))),
        ] {
            assert_eq!(roundtrip(frame.clone()), frame);
        }
    }

    #[test]
    fn test_prefix_matches_payload_length() {
        let encoded = encode_frame(&Frame::Response(Response::placeholder(9))).unwrap();
        let len = u32::from_be_bytes([encoded[0], encoded[1], encoded[2], encoded[3]]) as usize;
        assert_eq!(len, encoded.len() - WireConfig::LENGTH_PREFIX_SIZE);
    }

    #[test]
    fn test_decode_unknown_tag_is_malformed() {
        let result = decode_frame(br#"{"type":"gossip","id":1}"#);
        assert!(matches!(result, Err(RpcError::MalformedFrame { .. })));
    }

    #[test]
    fn test_encode_rejects_nan() {
        let frame = Frame::Request(Request::new(1, "math", "add", vec![Value::Float(f64::NAN)]));
        assert!(matches!(
            encode_frame(&frame),
            Err(RpcError::MalformedFrame { .. })
        ));
    }

    #[test]
    fn test_fault_messages_name_the_target() {
        let fault = Fault::unknown_service("ghost");
        assert!(fault.message.contains("ghost"));

        let fault = Fault::unknown_method("math", "pow", &[ValueKind::Int, ValueKind::Int]);
        assert!(fault.message.contains("pow(int, int)"));
        assert!(fault.message.contains("math"));
    }

    #[test]
    fn test_response_into_result() {
        assert_eq!(
            Response::success(1, Some(Value::Int(5))).into_result().unwrap(),
            Some(Value::Int(5))
        );

        let err = Response::failure(2, Fault::invocation("boom"))
            .into_result()
            .unwrap_err();
        assert_eq!(err.fault_kind(), Some(FaultKind::InvocationFailure));
    }

    #[test]
    fn test_request_display() {
        let req = Request::new(3, "math", "add", vec![Value::Int(2), Value::Int(3)]);
        assert_eq!(req.to_string(), "<id: 3 - math.add(int 2, int 3)>");
    }

    #[tokio::test]
    async fn test_frame_read_write_roundtrip() {
        let frame = Frame::Request(Request::new(7, "echo", "echo", vec![Value::Int(1)]));
        let encoded = encode_frame(&frame).unwrap();
        let mut buf = Vec::new();

        write_frame(&mut buf, &encoded).await.unwrap();

        let mut cursor = std::io::Cursor::new(buf);
        let payload = read_frame(&mut cursor).await.unwrap().unwrap();
        assert_eq!(decode_frame(&payload).unwrap(), frame);
        assert!(read_frame(&mut cursor).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_frame_read_empty_stream_returns_none() {
        let mut cursor = std::io::Cursor::new(Vec::<u8>::new());
        assert!(read_frame(&mut cursor).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_frame_read_truncated_payload_is_malformed() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&10u32.to_be_bytes());
        buf.extend_from_slice(b"{\"ty");

        let mut cursor = std::io::Cursor::new(buf);
        let result = read_frame(&mut cursor).await;
        assert!(matches!(result, Err(RpcError::MalformedFrame { .. })));
    }

    #[tokio::test]
    async fn test_frame_read_truncated_prefix_is_malformed() {
        let mut cursor = std::io::Cursor::new(vec![0u8, 0]);
        let result = read_frame(&mut cursor).await;
        assert!(matches!(result, Err(RpcError::MalformedFrame { .. })));
    }

    #[tokio::test]
    async fn test_frame_read_oversized_returns_error() {
        let huge_len: u32 = (WireConfig::MAX_FRAME_SIZE + 1) as u32;
        let mut buf = Vec::new();
        buf.extend_from_slice(&huge_len.to_be_bytes());
        buf.extend_from_slice(&[0u8; 8]);

        let mut cursor = std::io::Cursor::new(buf);
        let result = read_frame(&mut cursor).await;
        assert!(matches!(result, Err(RpcError::MalformedFrame { .. })));
    }
}
