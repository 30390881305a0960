//! Incremental RESP2/RESP3 parser built on `nom` combinators over streaming
//! input, covering the full RESP3 frame inventory.
use super::frame::Frame;
use bytes::Bytes;
// Streaming (not complete) combinators: running off the end of the buffer
// must yield `Incomplete` so the connection can await more bytes rather than
// misreporting a partial frame as malformed.
use nom::{
    branch::alt,
    bytes::streaming::{take, take_until},
    character::streaming::{char, crlf, digit1},
    combinator::{map, opt},
    multi::count,
    sequence::{preceded, terminated, tuple},
    IResult,
};

/// Bulk payloads larger than this are rejected as a protocol violation.
pub const MAX_BULK_LEN: i64 = 512 * 1024 * 1024;
/// Aggregates with more elements than this are rejected.
pub const MAX_AGGREGATE_LEN: i64 = 1_000_000;

#[derive(Debug, Clone, PartialEq)]
pub enum ParseError {
    /// Not enough bytes yet; caller should await more input without advancing.
    Incomplete,
    /// The byte stream violates the protocol; the connection must close.
    Protocol(String),
}

pub type ParseResult<T> = Result<T, ParseError>;

fn to_parse_error(e: nom::Err<nom::error::Error<&[u8]>>) -> ParseError {
    match e {
        nom::Err::Incomplete(_) => ParseError::Incomplete,
        nom::Err::Error(err) | nom::Err::Failure(err) => {
            ParseError::Protocol(format!("{:?}", err.code))
        }
    }
}

fn read_line(bytes: &[u8]) -> IResult<&[u8], &[u8]> {
    terminated(take_until("\r\n"), crlf)(bytes)
}

fn read_i64_line(bytes: &[u8]) -> IResult<&[u8], i64> {
    let (rem, (minus, digits)) = terminated(tuple((opt(char('-')), digit1)), crlf)(bytes)?;
    // Parse sign and digits together (not magnitude-then-negate) so i64::MIN,
    // whose magnitude overflows i64, still round-trips.
    let text = std::str::from_utf8(digits).map_err(|_| {
        nom::Err::Failure(nom::error::Error::new(bytes, nom::error::ErrorKind::Digit))
    })?;
    let signed = if minus.is_some() {
        format!("-{}", text)
    } else {
        text.to_string()
    };
    let value: i64 = signed.parse().map_err(|_| {
        nom::Err::Failure(nom::error::Error::new(bytes, nom::error::ErrorKind::Digit))
    })?;
    Ok((rem, value))
}

fn read_f64_line(bytes: &[u8]) -> IResult<&[u8], f64> {
    let (rem, line) = read_line(bytes)?;
    let s = std::str::from_utf8(line)
        .map_err(|_| nom::Err::Failure(nom::error::Error::new(bytes, nom::error::ErrorKind::Char)))?;
    let v = match s {
        "inf" => f64::INFINITY,
        "-inf" => f64::NEG_INFINITY,
        "nan" => f64::NAN,
        other => other
            .parse()
            .map_err(|_| nom::Err::Failure(nom::error::Error::new(bytes, nom::error::ErrorKind::Float)))?,
    };
    Ok((rem, v))
}

fn simple_string(bytes: &[u8]) -> IResult<&[u8], Frame> {
    map(preceded(char('+'), read_line), |s: &[u8]| {
        Frame::SimpleString(Bytes::copy_from_slice(s))
    })(bytes)
}

fn simple_error(bytes: &[u8]) -> IResult<&[u8], Frame> {
    map(preceded(char('-'), read_line), |s: &[u8]| {
        Frame::SimpleError(Bytes::copy_from_slice(s))
    })(bytes)
}

fn integer(bytes: &[u8]) -> IResult<&[u8], Frame> {
    map(preceded(char(':'), read_i64_line), Frame::Integer)(bytes)
}

fn null(bytes: &[u8]) -> IResult<&[u8], Frame> {
    map(preceded(char('_'), crlf), |_| Frame::Null)(bytes)
}

fn boolean(bytes: &[u8]) -> IResult<&[u8], Frame> {
    map(preceded(char('#'), terminated(alt((char('t'), char('f'))), crlf)), |c| {
        Frame::Boolean(c == 't')
    })(bytes)
}

fn double(bytes: &[u8]) -> IResult<&[u8], Frame> {
    preceded(char(','), map(read_f64_line, Frame::Double))(bytes)
}

fn big_number(bytes: &[u8]) -> IResult<&[u8], Frame> {
    map(preceded(char('('), read_line), |s: &[u8]| {
        Frame::BigNumber(Bytes::copy_from_slice(s))
    })(bytes)
}

/// `$`, `!`, `=` share the length-prefixed bulk shape. `=` carries an extra
/// 3-byte format tag ahead of the payload.
fn length_prefixed<'a>(
    lead: char,
) -> impl Fn(&'a [u8]) -> IResult<&'a [u8], Option<&'a [u8]>> {
    move |bytes: &'a [u8]| {
        let (rem, len) = preceded(char(lead), read_i64_line)(bytes)?;
        if len == -1 {
            return Ok((rem, None));
        }
        if len < 0 || len > MAX_BULK_LEN {
            return Err(nom::Err::Failure(nom::error::Error::new(
                bytes,
                nom::error::ErrorKind::TooLarge,
            )));
        }
        let (rem, data) = terminated(take(len as usize), crlf)(rem)?;
        Ok((rem, Some(data)))
    }
}

fn bulk_string(bytes: &[u8]) -> IResult<&[u8], Frame> {
    map(length_prefixed('$'), |data| match data {
        Some(d) => Frame::BulkString(Bytes::copy_from_slice(d)),
        None => Frame::Null,
    })(bytes)
}

fn bulk_error(bytes: &[u8]) -> IResult<&[u8], Frame> {
    map(length_prefixed('!'), |data| match data {
        Some(d) => Frame::BulkError(Bytes::copy_from_slice(d)),
        None => Frame::Null,
    })(bytes)
}

fn verbatim_string(bytes: &[u8]) -> IResult<&[u8], Frame> {
    let (rem, data) = length_prefixed('=')(bytes)?;
    let data = match data {
        Some(d) => d,
        None => return Ok((rem, Frame::Null)),
    };
    if data.len() < 4 || data[3] != b':' {
        return Err(nom::Err::Failure(nom::error::Error::new(
            bytes,
            nom::error::ErrorKind::LengthValue,
        )));
    }
    let mut format = [0u8; 3];
    format.copy_from_slice(&data[0..3]);
    Ok((
        rem,
        Frame::VerbatimString {
            format,
            data: Bytes::copy_from_slice(&data[4..]),
        },
    ))
}

fn aggregate_len(bytes: &[u8], lead: char) -> IResult<&[u8], Option<i64>> {
    let (rem, n) = preceded(char(lead), read_i64_line)(bytes)?;
    if n == -1 {
        return Ok((rem, None));
    }
    if n < 0 || n > MAX_AGGREGATE_LEN {
        return Err(nom::Err::Failure(nom::error::Error::new(
            bytes,
            nom::error::ErrorKind::TooLarge,
        )));
    }
    Ok((rem, Some(n)))
}

fn array(bytes: &[u8]) -> IResult<&[u8], Frame> {
    let (rem, n) = aggregate_len(bytes, '*')?;
    match n {
        None => Ok((rem, Frame::Null)),
        Some(n) => map(count(frame, n as usize), Frame::Array)(rem),
    }
}

fn set(bytes: &[u8]) -> IResult<&[u8], Frame> {
    let (rem, n) = aggregate_len(bytes, '~')?;
    match n {
        None => Ok((rem, Frame::Null)),
        Some(n) => map(count(frame, n as usize), Frame::Set)(rem),
    }
}

fn push(bytes: &[u8]) -> IResult<&[u8], Frame> {
    let (rem, n) = aggregate_len(bytes, '>')?;
    match n {
        None => Ok((rem, Frame::Null)),
        Some(n) => map(count(frame, n as usize), Frame::Push)(rem),
    }
}

fn map_frame(bytes: &[u8]) -> IResult<&[u8], Frame> {
    let (rem, n) = aggregate_len(bytes, '%')?;
    match n {
        None => Ok((rem, Frame::Null)),
        Some(n) => {
            let (rem, pairs) = count(tuple((frame, frame)), n as usize)(rem)?;
            Ok((rem, Frame::Map(dedup_map_pairs(pairs))))
        }
    }
}

/// Later duplicate keys win but the position of first occurrence is kept,
/// matching "preserves insertion order; duplicate keys: later wins".
fn dedup_map_pairs(pairs: Vec<(Frame, Frame)>) -> Vec<(Frame, Frame)> {
    let mut out: Vec<(Frame, Frame)> = Vec::with_capacity(pairs.len());
    for (k, v) in pairs {
        if let Some(existing) = out.iter_mut().find(|(ek, _)| *ek == k) {
            existing.1 = v;
        } else {
            out.push((k, v));
        }
    }
    out
}

fn inline_command(bytes: &[u8]) -> IResult<&[u8], Frame> {
    // Inline commands ("PING\r\n") are accepted on read for RESP2 wire
    // compatibility; never emitted by the writer.
    let (rem, line) = read_line(bytes)?;
    if line.is_empty() {
        return Err(nom::Err::Error(nom::error::Error::new(
            bytes,
            nom::error::ErrorKind::NonEmpty,
        )));
    }
    let parts: Vec<Frame> = line
        .split(|b| *b == b' ')
        .filter(|p| !p.is_empty())
        .map(|p| Frame::BulkString(Bytes::copy_from_slice(p)))
        .collect();
    Ok((rem, Frame::Array(parts)))
}

fn frame(bytes: &[u8]) -> IResult<&[u8], Frame> {
    alt((
        simple_string,
        simple_error,
        integer,
        null,
        boolean,
        double,
        big_number,
        bulk_string,
        bulk_error,
        verbatim_string,
        array,
        set,
        push,
        map_frame,
    ))(bytes)
}

const TYPE_SIGILS: &[u8] = b"+-:_#,($!=*~>%";

/// Top level entry point used by the connection engine and tests. Falls back
/// to the inline-command shape only when the leading byte isn't a known RESP
/// type sigil at all (RESP2 wire compatibility); a sigil that is present but
/// malformed (oversized length, bad digits, ...) is always a protocol
/// violation and must never be reinterpreted as an inline command.
pub fn read_frame(bytes: &[u8]) -> ParseResult<(usize, Frame)> {
    match bytes.first() {
        None => Err(ParseError::Incomplete),
        Some(b) if TYPE_SIGILS.contains(b) => match frame(bytes) {
            Ok((rem, f)) => Ok((bytes.len() - rem.len(), f)),
            Err(e) => Err(to_parse_error(e)),
        },
        Some(_) => match inline_command(bytes) {
            Ok((rem, f)) => Ok((bytes.len() - rem.len(), f)),
            Err(e) => Err(to_parse_error(e)),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(input: &[u8]) -> Frame {
        read_frame(input).unwrap().1
    }

    #[test]
    fn simple_string_decodes() {
        assert_eq!(parse(b"+OK\r\n"), Frame::SimpleString(Bytes::from_static(b"OK")));
    }

    #[test]
    fn negative_one_bulk_length_is_null() {
        assert_eq!(parse(b"$-1\r\n"), Frame::Null);
    }

    #[test]
    fn negative_one_array_length_is_null() {
        assert_eq!(parse(b"*-1\r\n"), Frame::Null);
    }

    #[test]
    fn mixed_type_array_decodes() {
        let f = parse(b"*3\r\n+OK\r\n:42\r\n$5\r\nHello\r\n");
        assert_eq!(
            f,
            Frame::Array(vec![
                Frame::SimpleString(Bytes::from_static(b"OK")),
                Frame::Integer(42),
                Frame::BulkString(Bytes::from_static(b"Hello")),
            ])
        );
    }

    #[test]
    fn bulk_zero_len_is_empty_not_null() {
        assert_eq!(parse(b"$0\r\n\r\n"), Frame::BulkString(Bytes::new()));
    }

    #[test]
    fn bulk_over_limit_rejected() {
        let header = format!("${}\r\n", MAX_BULK_LEN + 1);
        match read_frame(header.as_bytes()) {
            Err(ParseError::Protocol(_)) => {}
            other => panic!("expected protocol violation, got {:?}", other),
        }
    }

    #[test]
    fn aggregate_over_limit_rejected() {
        let header = format!("*{}\r\n", MAX_AGGREGATE_LEN + 1);
        match read_frame(header.as_bytes()) {
            Err(ParseError::Protocol(_)) => {}
            other => panic!("expected protocol violation, got {:?}", other),
        }
    }

    #[test]
    fn i64_min_round_trips() {
        let line = format!(":{}\r\n", i64::MIN);
        assert_eq!(parse(line.as_bytes()), Frame::Integer(i64::MIN));
    }

    #[test]
    fn double_infinities() {
        assert_eq!(parse(b",inf\r\n"), Frame::Double(f64::INFINITY));
        assert_eq!(parse(b",-inf\r\n"), Frame::Double(f64::NEG_INFINITY));
    }

    #[test]
    fn incomplete_leaves_position() {
        match read_frame(b"$5\r\nHel") {
            Err(ParseError::Incomplete) => {}
            other => panic!("expected incomplete, got {:?}", other),
        }
    }

    #[test]
    fn map_preserves_order_and_last_wins() {
        let f = parse(b"%2\r\n+a\r\n:1\r\n+a\r\n:2\r\n");
        match f {
            Frame::Map(pairs) => {
                assert_eq!(pairs.len(), 1);
                assert_eq!(pairs[0].1, Frame::Integer(2));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn push_frame_decodes() {
        let f = parse(b">3\r\n+message\r\n+chan\r\n$5\r\nhello\r\n");
        assert!(f.is_push());
    }
}
