//! Pipe-delimited line protocol spoken between ring members.
//!
//! Every connection carries exactly one line:
//!
//! - `insert|key:value`: store a replica.
//! - `delete|requester|key`: drop a replica.
//! - `query|requester|key`: read request, or a "not found" reply.
//! - `query|requester|key:value`: read reply carrying the value.
//! - `globalQuery|requester[|records]`: dump request, or a peer's dump.
//! - `recover|requester`: recovery request.
//! - `recover|requester|responder[|records]`: a peer's recovery dump.
//!
//! `records` is a space-separated list of `key:value` tokens. Keys and values
//! must not contain `|`, `:` or spaces; nothing here escapes them.

use std::io;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{DynamoError, Result};
use crate::ring::NodeId;
use crate::store::Record;

const FIELD_SEPARATOR: char = '|';
const PAIR_SEPARATOR: char = ':';
const RECORD_SEPARATOR: char = ' ';
const LINE_ENDINGS: &[char] = &['\n', '\r'];

/// Body of a `query` message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryPayload {
    /// A lookup request, or a reply meaning "not found".
    Key(String),
    Found(Record),
}

impl QueryPayload {
    pub fn key(&self) -> &str {
        match self {
            QueryPayload::Key(key) => key,
            QueryPayload::Found(record) => &record.key,
        }
    }

    pub fn into_value(self) -> Option<String> {
        match self {
            QueryPayload::Key(_) => None,
            QueryPayload::Found(record) => Some(record.value),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Insert(Record),
    Delete {
        requester: NodeId,
        key: String,
    },
    /// Read request when `requester` is someone else, reply when it is us.
    Query {
        requester: NodeId,
        payload: QueryPayload,
    },
    /// Dump request when `records` is empty and `requester` is someone else;
    /// a peer's dump when `requester` is us.
    GlobalQuery {
        requester: NodeId,
        records: Vec<Record>,
    },
    /// Recovery request when `responder` is `None`.
    Recover {
        requester: NodeId,
        responder: Option<NodeId>,
        records: Vec<Record>,
    },
}

impl Message {
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Insert(_) => "insert",
            Message::Delete { .. } => "delete",
            Message::Query { .. } => "query",
            Message::GlobalQuery { .. } => "globalQuery",
            Message::Recover { .. } => "recover",
        }
    }

    /// Renders the message as one line, without the trailing newline.
    pub fn encode(&self) -> String {
        let kind = self.kind();
        match self {
            Message::Insert(record) => format!("{kind}|{}", encode_record(record)),
            Message::Delete { requester, key } => format!("{kind}|{requester}|{key}"),
            Message::Query { requester, payload } => {
                let body = match payload {
                    QueryPayload::Key(key) => key.clone(),
                    QueryPayload::Found(record) => encode_record(record),
                };
                format!("{kind}|{requester}|{body}")
            }
            Message::GlobalQuery { requester, records } => {
                let mut line = format!("{kind}|{requester}");
                push_records(&mut line, records);
                line
            }
            Message::Recover {
                requester,
                responder,
                records,
            } => {
                let mut line = format!("{kind}|{requester}");
                if let Some(responder) = responder {
                    line.push(FIELD_SEPARATOR);
                    line.push_str(responder);
                    push_records(&mut line, records);
                }
                line
            }
        }
    }

    pub fn decode(line: &str) -> Result<Self> {
        let line = line.trim_end_matches(LINE_ENDINGS);
        let (kind, rest) = line
            .split_once(FIELD_SEPARATOR)
            .ok_or_else(|| malformed("missing field separator", line))?;

        match kind {
            "insert" => Ok(Message::Insert(decode_record(rest)?)),
            "delete" => {
                let (requester, key) = split_requester(rest, line)?;
                Ok(Message::Delete {
                    requester,
                    key: key.to_string(),
                })
            }
            "query" => {
                let (requester, body) = split_requester(rest, line)?;
                let payload = if body.contains(PAIR_SEPARATOR) {
                    QueryPayload::Found(decode_record(body)?)
                } else {
                    QueryPayload::Key(body.to_string())
                };
                Ok(Message::Query { requester, payload })
            }
            "globalQuery" => {
                let (requester, records) = match rest.split_once(FIELD_SEPARATOR) {
                    Some((requester, records)) => (requester, decode_records(records)?),
                    None => (rest, Vec::new()),
                };
                Ok(Message::GlobalQuery {
                    requester: non_empty(requester, line)?,
                    records,
                })
            }
            "recover" => {
                let mut fields = rest.splitn(3, FIELD_SEPARATOR);
                let requester = non_empty(fields.next().unwrap_or_default(), line)?;
                let responder = fields
                    .next()
                    .map(|responder| non_empty(responder, line))
                    .transpose()?;
                let records = match fields.next() {
                    Some(records) => decode_records(records)?,
                    None => Vec::new(),
                };
                Ok(Message::Recover {
                    requester,
                    responder,
                    records,
                })
            }
            other => Err(malformed(&format!("unknown kind {other:?}"), line)),
        }
    }
}

/// Serializes records as space-separated `key:value` tokens.
pub fn encode_records(records: &[Record]) -> String {
    records
        .iter()
        .map(encode_record)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Parses space-separated `key:value` tokens. Empty input yields no records.
pub fn decode_records(input: &str) -> Result<Vec<Record>> {
    input
        .split(RECORD_SEPARATOR)
        .filter(|token| !token.is_empty())
        .map(decode_record)
        .collect()
}

fn encode_record(record: &Record) -> String {
    format!("{}{PAIR_SEPARATOR}{}", record.key, record.value)
}

fn decode_record(token: &str) -> Result<Record> {
    let (key, value) = token
        .split_once(PAIR_SEPARATOR)
        .ok_or_else(|| malformed("record without ':'", token))?;
    Ok(Record::new(key, value))
}

fn push_records(line: &mut String, records: &[Record]) {
    if !records.is_empty() {
        line.push(FIELD_SEPARATOR);
        line.push_str(&encode_records(records));
    }
}

fn split_requester<'a>(rest: &'a str, line: &str) -> Result<(NodeId, &'a str)> {
    // The empty key is legal, so an empty tail is a key, not a missing field.
    let (requester, tail) = rest
        .split_once(FIELD_SEPARATOR)
        .ok_or_else(|| malformed("missing key", line))?;
    Ok((non_empty(requester, line)?, tail))
}

fn non_empty(field: &str, line: &str) -> Result<NodeId> {
    if field.is_empty() {
        return Err(malformed("empty node id", line));
    }
    Ok(field.to_string())
}

fn malformed(reason: &str, line: &str) -> DynamoError {
    DynamoError::Malformed(format!("{reason}: {line:?}"))
}

/// Reads the single line a peer sends on a connection.
///
/// Returns `Ok(None)` when the peer closed without sending anything.
pub async fn read_message<R>(reader: &mut R) -> Result<Option<Message>>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = String::new();
    let bytes = reader.read_line(&mut line).await?;
    if bytes == 0 {
        return Ok(None);
    }
    let trimmed = line.trim_end_matches(LINE_ENDINGS);
    if trimmed.is_empty() {
        return Ok(None);
    }
    Message::decode(trimmed).map(Some)
}

/// Writes one newline-terminated message and flushes it.
pub async fn write_message<W>(writer: &mut W, message: &Message) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut encoded = message.encode().into_bytes();
    encoded.push(b'\n');
    writer.write_all(&encoded).await?;
    writer.flush().await
}
