// src/types.rs
use serde::{Deserialize, Serialize};

use crate::error::{ErrorKind, NfcError};

/// MIME type of the SwahiliCard business card record.
pub const SWAHILICARD_MIME_TYPE: &str = "application/vnd.swahilicard";
/// Substring identifying our vendor tag inside a MIME type.
pub const SWAHILICARD_VENDOR_TAG: &str = "swahilicard";
/// Web link written as the last record of every card.
pub const SWAHILICARD_URI: &str = "https://swahilicard.com/";
/// Returned by the decoder whenever a tag carries no usable data.
pub const EMPTY_PAYLOAD: &str = "{}";

pub const RTD_TEXT: &[u8] = b"T";
pub const RTD_URI: &[u8] = b"U";

/// Type Name Format, the low 3 bits of a record header.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Tnf {
    Empty,
    WellKnown,
    Mime,
    AbsoluteUri,
    External,
    Unknown,
    Unchanged,
    Reserved,
}

impl Tnf {
    pub fn from_bits(bits: u8) -> Tnf {
        match bits & 0x07 {
            0x00 => Tnf::Empty,
            0x01 => Tnf::WellKnown,
            0x02 => Tnf::Mime,
            0x03 => Tnf::AbsoluteUri,
            0x04 => Tnf::External,
            0x05 => Tnf::Unknown,
            0x06 => Tnf::Unchanged,
            _ => Tnf::Reserved,
        }
    }

    pub fn bits(self) -> u8 {
        match self {
            Tnf::Empty => 0x00,
            Tnf::WellKnown => 0x01,
            Tnf::Mime => 0x02,
            Tnf::AbsoluteUri => 0x03,
            Tnf::External => 0x04,
            Tnf::Unknown => 0x05,
            Tnf::Unchanged => 0x06,
            Tnf::Reserved => 0x07,
        }
    }
}

/// What a record means to the codec.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum RecordKind {
    Mime,
    WellKnownText,
    WellKnownUri,
    Unknown,
}

/// One unit of an NDEF message. Fields are fixed once the record is built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NdefRecord {
    tnf: Tnf,
    record_type: Vec<u8>,
    id: Option<Vec<u8>>,
    payload: Vec<u8>,
}

impl NdefRecord {
    pub fn new(tnf: Tnf, record_type: Vec<u8>, id: Option<Vec<u8>>, payload: Vec<u8>) -> Self {
        Self {
            tnf,
            record_type,
            id,
            payload,
        }
    }

    pub fn mime(mime_type: &str, payload: Vec<u8>) -> Self {
        Self::new(Tnf::Mime, mime_type.as_bytes().to_vec(), None, payload)
    }

    pub fn well_known(record_type: &[u8], payload: Vec<u8>) -> Self {
        Self::new(Tnf::WellKnown, record_type.to_vec(), None, payload)
    }

    pub fn kind(&self) -> RecordKind {
        match self.tnf {
            Tnf::Mime => RecordKind::Mime,
            Tnf::WellKnown if self.record_type == RTD_TEXT => RecordKind::WellKnownText,
            Tnf::WellKnown if self.record_type == RTD_URI => RecordKind::WellKnownUri,
            _ => RecordKind::Unknown,
        }
    }

    pub fn tnf(&self) -> Tnf {
        self.tnf
    }

    pub fn record_type(&self) -> &[u8] {
        &self.record_type
    }

    pub fn id(&self) -> Option<&[u8]> {
        self.id.as_deref()
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }
}

/// Ordered records. Decode precedence follows this order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NdefMessage {
    records: Vec<NdefRecord>,
}

impl NdefMessage {
    pub fn new(records: Vec<NdefRecord>) -> Self {
        Self { records }
    }

    pub fn records(&self) -> &[NdefRecord] {
        &self.records
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }
}

impl From<Vec<NdefRecord>> for NdefMessage {
    fn from(records: Vec<NdefRecord>) -> Self {
        Self::new(records)
    }
}

/// What a session does with the tag it is handed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mode {
    Read,
    Write(String),
}

/// Immutable for the lifetime of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    pub mode: Mode,
    /// Republish every successful read to the event subscriber.
    pub continuous: bool,
}

/// Raw arguments of a start call, before validation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StartRequest {
    pub is_reading: bool,
    pub is_writing: bool,
    pub data: Option<String>,
    pub continuous: bool,
}

impl TryFrom<StartRequest> for SessionConfig {
    type Error = NfcError;

    fn try_from(request: StartRequest) -> Result<Self, Self::Error> {
        let mode = match (request.is_reading, request.is_writing, request.data) {
            (true, true, _) => {
                return Err(NfcError::invalid_args(
                    "Cannot read and write in the same session",
                ));
            }
            (false, false, _) => {
                return Err(NfcError::invalid_args(
                    "Session must either read or write",
                ));
            }
            (false, true, None) => {
                return Err(NfcError::invalid_args("Data is required for writing"));
            }
            (true, false, Some(_)) => {
                return Err(NfcError::invalid_args(
                    "Data can only be supplied to a write session",
                ));
            }
            (true, false, None) => Mode::Read,
            (false, true, Some(data)) => Mode::Write(data),
        };

        if request.continuous && mode != Mode::Read {
            return Err(NfcError::invalid_args(
                "Continuous mode is only available for reading",
            ));
        }

        Ok(SessionConfig {
            mode,
            continuous: request.continuous,
        })
    }
}

/// Terminal value of one tag encounter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionResult {
    Success(String),
    Failure(ErrorKind, String),
}

impl SessionResult {
    pub fn failure(kind: ErrorKind, message: impl Into<String>) -> Self {
        SessionResult::Failure(kind, message.into())
    }

    pub fn is_success(&self) -> bool {
        matches!(self, SessionResult::Success(_))
    }
}

impl From<NfcError> for SessionResult {
    fn from(err: NfcError) -> Self {
        SessionResult::Failure(err.kind, err.message)
    }
}

// Messages sent TO the WebSocket client (Frontend)
#[allow(non_camel_case_types)]
#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum OutgoingMessage {
    AVAILABILITY { available: bool },
    READER_STATUS { success: bool },
    SESSION_STARTED,
    SESSION_STOPPED,
    SESSION_ERROR { code: String, error: String },
    SESSION_SUCCESS { data: String },
    SESSION_FAILED { code: String, error: String },
    TAG_EVENT { data: String },
    READER_ERROR { error: String },
}

impl OutgoingMessage {
    pub fn session_error(err: &NfcError) -> Self {
        OutgoingMessage::SESSION_ERROR {
            code: err.kind.code().to_string(),
            error: err.message.clone(),
        }
    }
}

// Messages received FROM the WebSocket client
#[allow(non_camel_case_types)]
#[derive(Deserialize, Debug)]
#[serde(tag = "type")]
pub enum IncomingMessage {
    IS_AVAILABLE,
    GET_READER_STATUS,
    START_SESSION {
        #[serde(default)]
        is_reading: bool,
        #[serde(default)]
        is_writing: bool,
        #[serde(default)]
        data: Option<serde_json::Value>,
        #[serde(default)]
        continuous: bool,
    },
    STOP_SESSION,
}
