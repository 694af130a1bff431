//! Interaction-model message codecs.
//!
//! Every message is a TLV struct on the wire. Decode is tolerant of
//! unknown members (vendor extensions pass through); missing mandatory
//! members fail the parse.

use bytes::Bytes;
use trellis_tlv::{TlvTag, TlvValue, TlvWriter};
use trellis_types::{
    DataVersion, EventNumber, EventPriority, StatusCode, SubscriptionId,
};

use crate::path::{AttributePath, CommandPath, ConcretePath, DataVersionFilter, EventPath};
use crate::InteractionError;

/// Interaction-protocol opcodes.
pub mod opcodes {
    pub const STATUS_RESPONSE: u8 = 0x01;
    pub const READ_REQUEST: u8 = 0x02;
    pub const SUBSCRIBE_REQUEST: u8 = 0x03;
    pub const SUBSCRIBE_RESPONSE: u8 = 0x04;
    pub const REPORT_DATA: u8 = 0x05;
    pub const WRITE_REQUEST: u8 = 0x06;
    pub const WRITE_RESPONSE: u8 = 0x07;
    pub const INVOKE_REQUEST: u8 = 0x08;
    pub const INVOKE_RESPONSE: u8 = 0x09;
    pub const TIMED_REQUEST: u8 = 0x0A;
}

fn decode_struct(payload: &Bytes) -> Result<TlvValue, InteractionError> {
    Ok(trellis_tlv::decode(payload)?)
}

fn bool_member(value: &TlvValue, tag: u8) -> bool {
    value.member(tag).and_then(TlvValue::as_bool).unwrap_or(false)
}

// ============================================================================
// Read
// ============================================================================

/// `ReadRequest`: paths to read, optional data-version caching filters.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ReadRequest {
    pub attribute_paths: Vec<AttributePath>,
    pub event_paths: Vec<EventPath>,
    pub data_version_filters: Vec<DataVersionFilter>,
    pub fabric_filtered: bool,
}

impl ReadRequest {
    pub fn encode(&self) -> Bytes {
        let mut w = TlvWriter::new();
        w.start_struct(TlvTag::Anonymous);
        w.start_array(TlvTag::context(0));
        for path in &self.attribute_paths {
            w.value(TlvTag::Anonymous, &path.to_tlv());
        }
        w.end_container();
        w.start_array(TlvTag::context(1));
        for path in &self.event_paths {
            w.value(TlvTag::Anonymous, &path.to_tlv());
        }
        w.end_container();
        w.start_array(TlvTag::context(2));
        for filter in &self.data_version_filters {
            w.value(TlvTag::Anonymous, &filter.to_tlv());
        }
        w.end_container();
        w.boolean(TlvTag::context(3), self.fabric_filtered);
        w.end_container();
        w.finish()
    }

    pub fn decode(payload: &Bytes) -> Result<Self, InteractionError> {
        let value = decode_struct(payload)?;
        let paths = |tag: u8| -> Vec<TlvValue> {
            value
                .member(tag)
                .and_then(TlvValue::as_array)
                .map(<[TlvValue]>::to_vec)
                .unwrap_or_default()
        };
        Ok(Self {
            attribute_paths: paths(0)
                .iter()
                .filter_map(AttributePath::from_tlv)
                .collect(),
            event_paths: paths(1).iter().filter_map(EventPath::from_tlv).collect(),
            data_version_filters: paths(2)
                .iter()
                .filter_map(DataVersionFilter::from_tlv)
                .collect(),
            fabric_filtered: bool_member(&value, 3),
        })
    }
}

// ============================================================================
// Report
// ============================================================================

/// One entry of a report: attribute data or a per-path status.
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeReport {
    Data {
        path: ConcretePath,
        version: DataVersion,
        value: TlvValue,
    },
    Status {
        path: AttributePath,
        status: StatusCode,
    },
}

impl AttributeReport {
    fn to_tlv(&self) -> TlvValue {
        match self {
            Self::Data {
                path,
                version,
                value,
            } => TlvValue::Struct(vec![(
                TlvTag::context(1),
                TlvValue::Struct(vec![
                    (
                        TlvTag::context(0),
                        TlvValue::UnsignedInt(u64::from(version.as_u32())),
                    ),
                    (TlvTag::context(1), path.as_attribute_path().to_tlv()),
                    (TlvTag::context(2), value.clone()),
                ]),
            )]),
            Self::Status { path, status } => TlvValue::Struct(vec![(
                TlvTag::context(0),
                TlvValue::Struct(vec![
                    (TlvTag::context(0), path.to_tlv()),
                    (
                        TlvTag::context(1),
                        TlvValue::UnsignedInt(u64::from(status.as_byte())),
                    ),
                ]),
            )]),
        }
    }

    fn from_tlv(value: &TlvValue) -> Option<Self> {
        if let Some(data) = value.member(1) {
            let path = AttributePath::from_tlv(data.member(1)?)?;
            Some(Self::Data {
                path: ConcretePath::new(path.endpoint?, path.cluster?, path.attribute?),
                version: DataVersion::new(data.member(0)?.as_u64()? as u32),
                value: data.member(2)?.clone(),
            })
        } else if let Some(status) = value.member(0) {
            Some(Self::Status {
                path: AttributePath::from_tlv(status.member(0)?)?,
                status: StatusCode::from_byte(status.member(1)?.as_u64()? as u8),
            })
        } else {
            None
        }
    }

    /// Encoded size, used by the chunker's budget arithmetic.
    pub(crate) fn encoded_len(&self) -> usize {
        trellis_tlv::encode(&self.to_tlv()).len()
    }
}

/// One reported event occurrence.
#[derive(Debug, Clone, PartialEq)]
pub struct EventReport {
    pub path: EventPath,
    pub number: EventNumber,
    pub priority: EventPriority,
    pub payload: TlvValue,
}

impl EventReport {
    fn to_tlv(&self) -> TlvValue {
        TlvValue::Struct(vec![
            (TlvTag::context(0), self.path.to_tlv()),
            (
                TlvTag::context(1),
                TlvValue::UnsignedInt(self.number.as_u64()),
            ),
            (
                TlvTag::context(2),
                TlvValue::UnsignedInt(self.priority as u64),
            ),
            (TlvTag::context(3), self.payload.clone()),
        ])
    }

    fn from_tlv(value: &TlvValue) -> Option<Self> {
        Some(Self {
            path: EventPath::from_tlv(value.member(0)?)?,
            number: EventNumber::new(value.member(1)?.as_u64()?),
            priority: EventPriority::from_u8(value.member(2)?.as_u64()? as u8)?,
            payload: value.member(3)?.clone(),
        })
    }
}

/// `ReportData`: one chunk of a read or subscription report.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ReportData {
    pub subscription_id: Option<SubscriptionId>,
    pub attribute_reports: Vec<AttributeReport>,
    pub event_reports: Vec<EventReport>,
    /// More chunks follow; the client must answer StatusResponse.
    pub more_chunks: bool,
    pub suppress_response: bool,
}

impl ReportData {
    pub fn encode(&self) -> Bytes {
        let mut w = TlvWriter::new();
        w.start_struct(TlvTag::Anonymous);
        if let Some(id) = self.subscription_id {
            w.unsigned(TlvTag::context(0), u64::from(id.as_u32()));
        }
        w.start_array(TlvTag::context(1));
        for report in &self.attribute_reports {
            w.value(TlvTag::Anonymous, &report.to_tlv());
        }
        w.end_container();
        w.start_array(TlvTag::context(2));
        for report in &self.event_reports {
            w.value(TlvTag::Anonymous, &report.to_tlv());
        }
        w.end_container();
        w.boolean(TlvTag::context(3), self.more_chunks);
        w.boolean(TlvTag::context(4), self.suppress_response);
        w.end_container();
        w.finish()
    }

    pub fn decode(payload: &Bytes) -> Result<Self, InteractionError> {
        let value = decode_struct(payload)?;
        Ok(Self {
            subscription_id: value
                .member(0)
                .and_then(TlvValue::as_u64)
                .map(|id| SubscriptionId::new(id as u32)),
            attribute_reports: value
                .member(1)
                .and_then(TlvValue::as_array)
                .map(|items| items.iter().filter_map(AttributeReport::from_tlv).collect())
                .unwrap_or_default(),
            event_reports: value
                .member(2)
                .and_then(TlvValue::as_array)
                .map(|items| items.iter().filter_map(EventReport::from_tlv).collect())
                .unwrap_or_default(),
            more_chunks: bool_member(&value, 3),
            suppress_response: bool_member(&value, 4),
        })
    }
}

// ============================================================================
// Subscribe
// ============================================================================

/// `SubscribeRequest`.
#[derive(Debug, Clone, PartialEq)]
pub struct SubscribeRequest {
    pub keep_subscriptions: bool,
    pub min_interval_floor_s: u16,
    pub max_interval_ceiling_s: u16,
    pub attribute_paths: Vec<AttributePath>,
    pub event_paths: Vec<EventPath>,
    pub fabric_filtered: bool,
}

impl SubscribeRequest {
    pub fn encode(&self) -> Bytes {
        let mut w = TlvWriter::new();
        w.start_struct(TlvTag::Anonymous);
        w.boolean(TlvTag::context(0), self.keep_subscriptions);
        w.unsigned(TlvTag::context(1), u64::from(self.min_interval_floor_s));
        w.unsigned(TlvTag::context(2), u64::from(self.max_interval_ceiling_s));
        w.start_array(TlvTag::context(3));
        for path in &self.attribute_paths {
            w.value(TlvTag::Anonymous, &path.to_tlv());
        }
        w.end_container();
        w.start_array(TlvTag::context(4));
        for path in &self.event_paths {
            w.value(TlvTag::Anonymous, &path.to_tlv());
        }
        w.end_container();
        w.boolean(TlvTag::context(5), self.fabric_filtered);
        w.end_container();
        w.finish()
    }

    pub fn decode(payload: &Bytes) -> Result<Self, InteractionError> {
        let value = decode_struct(payload)?;
        let u16_member = |tag: u8| {
            value
                .member(tag)
                .and_then(TlvValue::as_u64)
                .unwrap_or(0) as u16
        };
        Ok(Self {
            keep_subscriptions: bool_member(&value, 0),
            min_interval_floor_s: u16_member(1),
            max_interval_ceiling_s: u16_member(2),
            attribute_paths: value
                .member(3)
                .and_then(TlvValue::as_array)
                .map(|items| items.iter().filter_map(AttributePath::from_tlv).collect())
                .unwrap_or_default(),
            event_paths: value
                .member(4)
                .and_then(TlvValue::as_array)
                .map(|items| items.iter().filter_map(EventPath::from_tlv).collect())
                .unwrap_or_default(),
            fabric_filtered: bool_member(&value, 5),
        })
    }
}

/// `SubscribeResponse`: the final ack of establishment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscribeResponse {
    pub subscription_id: SubscriptionId,
    pub max_interval_s: u16,
}

impl SubscribeResponse {
    pub fn encode(&self) -> Bytes {
        let mut w = TlvWriter::new();
        w.start_struct(TlvTag::Anonymous);
        w.unsigned(
            TlvTag::context(0),
            u64::from(self.subscription_id.as_u32()),
        );
        w.unsigned(TlvTag::context(1), u64::from(self.max_interval_s));
        w.end_container();
        w.finish()
    }

    pub fn decode(payload: &Bytes) -> Result<Self, InteractionError> {
        let value = decode_struct(payload)?;
        Ok(Self {
            subscription_id: SubscriptionId::new(
                value
                    .member(0)
                    .and_then(TlvValue::as_u64)
                    .ok_or(InteractionError::Status(StatusCode::InvalidAction))?
                    as u32,
            ),
            max_interval_s: value.member(1).and_then(TlvValue::as_u64).unwrap_or(0) as u16,
        })
    }
}

// ============================================================================
// Write
// ============================================================================

/// One write: path plus the value to write.
#[derive(Debug, Clone, PartialEq)]
pub struct AttributeData {
    pub path: AttributePath,
    pub value: TlvValue,
}

/// `WriteRequest`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct WriteRequest {
    pub suppress_response: bool,
    pub timed_request: bool,
    pub writes: Vec<AttributeData>,
}

impl WriteRequest {
    pub fn encode(&self) -> Bytes {
        let mut w = TlvWriter::new();
        w.start_struct(TlvTag::Anonymous);
        w.boolean(TlvTag::context(0), self.suppress_response);
        w.boolean(TlvTag::context(1), self.timed_request);
        w.start_array(TlvTag::context(2));
        for write in &self.writes {
            w.start_struct(TlvTag::Anonymous);
            w.value(TlvTag::context(1), &write.path.to_tlv());
            w.value(TlvTag::context(2), &write.value);
            w.end_container();
        }
        w.end_container();
        w.end_container();
        w.finish()
    }

    pub fn decode(payload: &Bytes) -> Result<Self, InteractionError> {
        let value = decode_struct(payload)?;
        let writes = value
            .member(2)
            .and_then(TlvValue::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| {
                        Some(AttributeData {
                            path: AttributePath::from_tlv(item.member(1)?)?,
                            value: item.member(2)?.clone(),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(Self {
            suppress_response: bool_member(&value, 0),
            timed_request: bool_member(&value, 1),
            writes,
        })
    }
}

/// `WriteResponse`: one status per write path.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct WriteResponse {
    pub statuses: Vec<(AttributePath, StatusCode)>,
}

impl WriteResponse {
    pub fn encode(&self) -> Bytes {
        let mut w = TlvWriter::new();
        w.start_struct(TlvTag::Anonymous);
        w.start_array(TlvTag::context(0));
        for (path, status) in &self.statuses {
            w.start_struct(TlvTag::Anonymous);
            w.value(TlvTag::context(0), &path.to_tlv());
            w.unsigned(TlvTag::context(1), u64::from(status.as_byte()));
            w.end_container();
        }
        w.end_container();
        w.end_container();
        w.finish()
    }

    pub fn decode(payload: &Bytes) -> Result<Self, InteractionError> {
        let value = decode_struct(payload)?;
        let statuses = value
            .member(0)
            .and_then(TlvValue::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| {
                        Some((
                            AttributePath::from_tlv(item.member(0)?)?,
                            StatusCode::from_byte(item.member(1)?.as_u64()? as u8),
                        ))
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(Self { statuses })
    }
}

// ============================================================================
// Invoke
// ============================================================================

/// One command invocation: path plus request fields.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandData {
    pub path: CommandPath,
    pub fields: TlvValue,
}

/// `InvokeRequest`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct InvokeRequest {
    pub suppress_response: bool,
    pub timed_request: bool,
    pub invokes: Vec<CommandData>,
}

impl InvokeRequest {
    pub fn encode(&self) -> Bytes {
        let mut w = TlvWriter::new();
        w.start_struct(TlvTag::Anonymous);
        w.boolean(TlvTag::context(0), self.suppress_response);
        w.boolean(TlvTag::context(1), self.timed_request);
        w.start_array(TlvTag::context(2));
        for invoke in &self.invokes {
            w.start_struct(TlvTag::Anonymous);
            w.value(TlvTag::context(0), &invoke.path.to_tlv());
            w.value(TlvTag::context(1), &invoke.fields);
            w.end_container();
        }
        w.end_container();
        w.end_container();
        w.finish()
    }

    pub fn decode(payload: &Bytes) -> Result<Self, InteractionError> {
        let value = decode_struct(payload)?;
        let invokes = value
            .member(2)
            .and_then(TlvValue::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| {
                        Some(CommandData {
                            path: CommandPath::from_tlv(item.member(0)?)?,
                            fields: item
                                .member(1)
                                .cloned()
                                .unwrap_or(TlvValue::Struct(Vec::new())),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(Self {
            suppress_response: bool_member(&value, 0),
            timed_request: bool_member(&value, 1),
            invokes,
        })
    }
}

/// One entry of an `InvokeResponse`.
#[derive(Debug, Clone, PartialEq)]
pub enum InvokeResponseEntry {
    Command { path: CommandPath, fields: TlvValue },
    Status { path: CommandPath, status: StatusCode },
}

/// `InvokeResponse`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct InvokeResponse {
    pub responses: Vec<InvokeResponseEntry>,
    pub more_chunks: bool,
}

impl InvokeResponse {
    pub fn encode(&self) -> Bytes {
        let mut w = TlvWriter::new();
        w.start_struct(TlvTag::Anonymous);
        w.start_array(TlvTag::context(1));
        for entry in &self.responses {
            match entry {
                InvokeResponseEntry::Command { path, fields } => {
                    w.start_struct(TlvTag::Anonymous);
                    w.start_struct(TlvTag::context(0));
                    w.value(TlvTag::context(0), &path.to_tlv());
                    w.value(TlvTag::context(1), fields);
                    w.end_container();
                    w.end_container();
                }
                InvokeResponseEntry::Status { path, status } => {
                    w.start_struct(TlvTag::Anonymous);
                    w.start_struct(TlvTag::context(1));
                    w.value(TlvTag::context(0), &path.to_tlv());
                    w.unsigned(TlvTag::context(1), u64::from(status.as_byte()));
                    w.end_container();
                    w.end_container();
                }
            }
        }
        w.end_container();
        w.boolean(TlvTag::context(2), self.more_chunks);
        w.end_container();
        w.finish()
    }

    pub fn decode(payload: &Bytes) -> Result<Self, InteractionError> {
        let value = decode_struct(payload)?;
        let responses = value
            .member(1)
            .and_then(TlvValue::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| {
                        if let Some(command) = item.member(0) {
                            Some(InvokeResponseEntry::Command {
                                path: CommandPath::from_tlv(command.member(0)?)?,
                                fields: command
                                    .member(1)
                                    .cloned()
                                    .unwrap_or(TlvValue::Struct(Vec::new())),
                            })
                        } else if let Some(status) = item.member(1) {
                            Some(InvokeResponseEntry::Status {
                                path: CommandPath::from_tlv(status.member(0)?)?,
                                status: StatusCode::from_byte(status.member(1)?.as_u64()? as u8),
                            })
                        } else {
                            None
                        }
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(Self {
            responses,
            more_chunks: bool_member(&value, 2),
        })
    }
}

// ============================================================================
// Timed + status
// ============================================================================

/// `TimedRequest`: arms a timed-interaction window on the exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimedRequest {
    pub timeout_ms: u16,
}

impl TimedRequest {
    pub fn encode(&self) -> Bytes {
        let mut w = TlvWriter::new();
        w.start_struct(TlvTag::Anonymous);
        w.unsigned(TlvTag::context(0), u64::from(self.timeout_ms));
        w.end_container();
        w.finish()
    }

    pub fn decode(payload: &Bytes) -> Result<Self, InteractionError> {
        let value = decode_struct(payload)?;
        Ok(Self {
            timeout_ms: value.member(0).and_then(TlvValue::as_u64).unwrap_or(0) as u16,
        })
    }
}

/// `StatusResponse`: a bare status, also the chunk continuation ack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusResponse {
    pub status: StatusCode,
}

impl StatusResponse {
    pub fn success() -> Self {
        Self {
            status: StatusCode::Success,
        }
    }

    pub fn encode(&self) -> Bytes {
        let mut w = TlvWriter::new();
        w.start_struct(TlvTag::Anonymous);
        w.unsigned(TlvTag::context(0), u64::from(self.status.as_byte()));
        w.end_container();
        w.finish()
    }

    pub fn decode(payload: &Bytes) -> Result<Self, InteractionError> {
        let value = decode_struct(payload)?;
        Ok(Self {
            status: StatusCode::from_byte(
                value.member(0).and_then(TlvValue::as_u64).unwrap_or(1) as u8,
            ),
        })
    }
}
