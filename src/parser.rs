//! An incremental parser over the memcached ASCII protocol. It owns a
//! cursor into the connection's in-buffer and tolerates arbitrary
//! fragmentation: any record may span multiple `recv()` calls.

use crate::error::{Error, ProtocolError};

/// A single parsed response record.
#[derive(Debug, Clone, PartialEq)]
pub enum Record {
    Value {
        key: Vec<u8>,
        flags: u16,
        cas: Option<u64>,
        data: Vec<u8>,
    },
    End,
    Stored,
    NotStored,
    Exists,
    NotFound,
    Deleted,
    Touched,
    Ok,
    IncrDecr(u64),
    ClientError(String),
    ServerError(String),
    Stat(String, String),
    Version(String),
}

#[derive(Debug, Clone)]
struct PendingValue {
    key: Vec<u8>,
    flags: u16,
    cas: Option<u64>,
    len: usize,
}

enum LineResult {
    Record(Record),
    ExpectValue(PendingValue),
}

/// Incremental parser state: either waiting for a header line, or
/// collecting a known-length payload for an already-parsed `VALUE`
/// header.
#[derive(Default)]
pub struct Parser {
    buf: Vec<u8>,
    pending: Option<PendingValue>,
}

impl Parser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append freshly received bytes to the parse buffer.
    pub fn feed(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Advance over all currently available complete records. Returns
    /// the records emitted; a malformed line or a lone `\n` is a fatal
    /// protocol error (caller should hard-fail the connection).
    pub fn parse_step(&mut self) -> Result<Vec<Record>, Error> {
        let mut records = Vec::new();
        loop {
            if let Some(pending) = self.pending.clone() {
                let need = pending.len + 2;
                if self.buf.len() < need {
                    break;
                }
                if &self.buf[pending.len..need] != b"\r\n" {
                    return Err(ProtocolError::Malformed(
                        "VALUE payload not terminated by CRLF".into(),
                    )
                    .into());
                }
                let data = self.buf[..pending.len].to_vec();
                self.buf.drain(..need);
                self.pending = None;
                records.push(Record::Value {
                    key: pending.key,
                    flags: pending.flags,
                    cas: pending.cas,
                    data,
                });
                continue;
            }

            let line_len = match find_line(&self.buf)? {
                Some(len) => len,
                None => break,
            };
            let line = self.buf[..line_len].to_vec();
            self.buf.drain(..line_len + 2);

            match parse_line(&line)? {
                LineResult::Record(r) => records.push(r),
                LineResult::ExpectValue(p) => self.pending = Some(p),
            }
        }
        Ok(records)
    }

    /// True while a `VALUE` payload is still being collected.
    pub fn has_pending_value(&self) -> bool {
        self.pending.is_some()
    }
}

/// Find the length of the next `\r\n`-terminated line (excluding the
/// terminator). A lone `\n` without a preceding `\r` is a protocol
/// violation.
fn find_line(buf: &[u8]) -> Result<Option<usize>, ProtocolError> {
    if let Some(nl) = buf.iter().position(|&b| b == b'\n') {
        if nl == 0 || buf[nl - 1] != b'\r' {
            return Err(ProtocolError::LoneLineFeed);
        }
        Ok(Some(nl - 1))
    } else {
        Ok(None)
    }
}

fn parse_line(line: &[u8]) -> Result<LineResult, ProtocolError> {
    let text = std::str::from_utf8(line)
        .map_err(|_| ProtocolError::Malformed("non-utf8 header line".into()))?;
    let mut tokens = text.split(' ');
    let verb = tokens.next().unwrap_or("");

    let record = match verb {
        "VALUE" => {
            let key = tokens
                .next()
                .ok_or_else(|| ProtocolError::Malformed("VALUE missing key".into()))?
                .as_bytes()
                .to_vec();
            let flags: u16 = tokens
                .next()
                .and_then(|s| s.parse().ok())
                .ok_or_else(|| ProtocolError::Malformed("VALUE missing flags".into()))?;
            let len: usize = tokens
                .next()
                .and_then(|s| s.parse().ok())
                .ok_or_else(|| ProtocolError::Malformed("VALUE missing length".into()))?;
            let cas: Option<u64> = match tokens.next() {
                Some(s) => Some(
                    s.parse()
                        .map_err(|_| ProtocolError::Malformed("VALUE bad cas".into()))?,
                ),
                None => None,
            };
            return Ok(LineResult::ExpectValue(PendingValue { key, flags, cas, len }));
        }
        "END" => Record::End,
        "STORED" => Record::Stored,
        "NOT_STORED" => Record::NotStored,
        "EXISTS" => Record::Exists,
        "NOT_FOUND" => Record::NotFound,
        "DELETED" => Record::Deleted,
        "TOUCHED" => Record::Touched,
        "OK" => Record::Ok,
        "ERROR" => return Err(ProtocolError::Malformed("ERROR".into())),
        "CLIENT_ERROR" => Record::ClientError(rest(tokens)),
        "SERVER_ERROR" => Record::ServerError(rest(tokens)),
        "STAT" => {
            let key = tokens
                .next()
                .ok_or_else(|| ProtocolError::Malformed("STAT missing key".into()))?
                .to_string();
            Record::Stat(key, rest(tokens))
        }
        "VERSION" => Record::Version(rest(tokens)),
        other => {
            // Only remaining valid shape is a bare decimal: incr/decr result.
            other
                .parse::<u64>()
                .map(Record::IncrDecr)
                .map_err(|_| ProtocolError::Malformed(format!("unrecognized line: {}", text)))?
        }
    };
    Ok(LineResult::Record(record))
}

fn rest<'a>(tokens: impl Iterator<Item = &'a str>) -> String {
    tokens.collect::<Vec<_>>().join(" ")
}
