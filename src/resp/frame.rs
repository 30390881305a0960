use bytes::Bytes;

/// A fully decoded RESP value. Covers the RESP2 set plus every RESP3 addition;
/// a frame is never partially constructed — the parser only ever hands out
/// complete values.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    SimpleString(Bytes),
    SimpleError(Bytes),
    Integer(i64),
    BulkString(Bytes),
    Array(Vec<Frame>),
    Null,
    Boolean(bool),
    Double(f64),
    BigNumber(Bytes),
    BulkError(Bytes),
    VerbatimString { format: [u8; 3], data: Bytes },
    Map(Vec<(Frame, Frame)>),
    Set(Vec<Frame>),
    Push(Vec<Frame>),
}

impl Frame {
    pub fn simple_string(s: impl Into<Bytes>) -> Frame {
        Frame::SimpleString(s.into())
    }

    pub fn bulk_string(s: impl Into<Bytes>) -> Frame {
        Frame::BulkString(s.into())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Frame::Null)
    }

    /// True for any of the RESP2/RESP3 error shapes.
    pub fn is_error(&self) -> bool {
        matches!(self, Frame::SimpleError(_) | Frame::BulkError(_))
    }

    /// The raw bytes of an error frame, if this is one.
    pub fn error_bytes(&self) -> Option<&Bytes> {
        match self {
            Frame::SimpleError(b) | Frame::BulkError(b) => Some(b),
            _ => None,
        }
    }

    /// True if this is a push frame (out-of-band pub/sub or invalidation message).
    pub fn is_push(&self) -> bool {
        matches!(self, Frame::Push(_))
    }

    /// Returns the frame as a byte slice when it is a bulk/simple string, for
    /// callers that don't care which shape produced the bytes.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Frame::SimpleString(b) | Frame::BulkString(b) | Frame::BigNumber(b) => Some(b),
            Frame::VerbatimString { data, .. } => Some(data),
            _ => None,
        }
    }

    /// View an Array/Set/Push frame's elements uniformly, used by the pub/sub
    /// message-shape detector and command dispatch.
    pub fn elements(&self) -> Option<&[Frame]> {
        match self {
            Frame::Array(v) | Frame::Set(v) | Frame::Push(v) => Some(v),
            _ => None,
        }
    }
}
