// src/ndef.rs
use std::str;

use lazy_static::lazy_static;
use log::debug;

use crate::error::{CodecError, WriteCheckError};
use crate::types::{
    EMPTY_PAYLOAD, NdefMessage, NdefRecord, RTD_TEXT, RTD_URI, RecordKind, SWAHILICARD_MIME_TYPE,
    SWAHILICARD_URI, SWAHILICARD_VENDOR_TAG, Tnf,
};

// Header flags
const FLAG_MB: u8 = 0x80;
const FLAG_ME: u8 = 0x40;
const FLAG_CF: u8 = 0x20;
const FLAG_SR: u8 = 0x10;
const FLAG_IL: u8 = 0x08;

// TLV blocks found in Type 2 / MIFARE memory
pub const TLV_NULL: u8 = 0x00;
pub const TLV_NDEF: u8 = 0x03;
pub const TLV_TERMINATOR: u8 = 0xFE;

const TEXT_LANGUAGE: &[u8] = b"en";
const TEXT_UTF16_FLAG: u8 = 0x80;
const TEXT_LANGUAGE_MASK: u8 = 0x3F;

/// URI identifier codes, NFC Forum URI RTD.
pub const URI_PREFIXES: &[&str] = &[
    "",                           // 0x00
    "http://www.",                // 0x01
    "https://www.",               // 0x02
    "http://",                    // 0x03
    "https://",                   // 0x04
    "tel:",                       // 0x05
    "mailto:",                    // 0x06
    "ftp://anonymous:anonymous@", // 0x07
    "ftp://ftp.",                 // 0x08
    "ftps://",                    // 0x09
    "sftp://",                    // 0x0A
    "smb://",                     // 0x0B
    "nfs://",                     // 0x0C
    "ftp://",                     // 0x0D
    "dav://",                     // 0x0E
    "news:",                      // 0x0F
    "telnet://",                  // 0x10
    "imap:",                      // 0x11
    "rtsp://",                    // 0x12
    "urn:",                       // 0x13
    "pop:",                       // 0x14
    "sip:",                       // 0x15
    "sips:",                      // 0x16
    "tftp:",                      // 0x17
    "btspp://",                   // 0x18
    "btl2cap://",                 // 0x19
    "btgoep://",                  // 0x1A
    "tcpobex://",                 // 0x1B
    "irdaobex://",                // 0x1C
    "file://",                    // 0x1D
    "urn:epc:id:",                // 0x1E
    "urn:epc:tag:",               // 0x1F
    "urn:epc:pat:",               // 0x20
    "urn:epc:raw:",               // 0x21
    "urn:epc:",                   // 0x22
    "urn:nfc:",                   // 0x23
];

lazy_static! {
    // Longest first, so "https://www." wins over "https://"
    static ref PREFIXES_BY_LENGTH: Vec<(u8, &'static str)> = {
        let mut prefixes: Vec<(u8, &'static str)> = URI_PREFIXES
            .iter()
            .enumerate()
            .skip(1)
            .map(|(code, prefix)| (code as u8, *prefix))
            .collect();
        prefixes.sort_by(|a, b| b.1.len().cmp(&a.1.len()));
        prefixes
    };
}

/// First 50 characters, for log lines.
pub fn preview(text: &str) -> String {
    text.chars().take(50).collect()
}

// Basic NDEF Text Record Wrapper
pub fn create_text_record_payload(text: &str) -> Vec<u8> {
    let mut payload = Vec::with_capacity(1 + TEXT_LANGUAGE.len() + text.len());
    // Status byte: UTF-8 (bit 7=0) | Lang length (bits 0-5)
    payload.push(TEXT_LANGUAGE.len() as u8 & TEXT_LANGUAGE_MASK);
    payload.extend_from_slice(TEXT_LANGUAGE);
    payload.extend_from_slice(text.as_bytes());
    payload
}

/// URI record payload: [identifier code] + URI with that prefix removed.
pub fn create_uri_record_payload(uri: &str) -> Vec<u8> {
    let (code, rest) = PREFIXES_BY_LENGTH
        .iter()
        .find(|(_, prefix)| uri.starts_with(prefix))
        .map(|(code, prefix)| (*code, &uri[prefix.len()..]))
        .unwrap_or((0x00, uri));

    let mut payload = Vec::with_capacity(1 + rest.len());
    payload.push(code);
    payload.extend_from_slice(rest.as_bytes());
    payload
}

/// Expands a URI record payload back into the full URI.
pub fn uri_from_payload(payload: &[u8]) -> Option<String> {
    let (&code, rest) = payload.split_first()?;
    let prefix = URI_PREFIXES.get(code as usize).copied().unwrap_or("");
    let rest = str::from_utf8(rest).ok()?;
    Some(format!("{prefix}{rest}"))
}

/// Builds the three record card message: our MIME record, a text record for
/// readers that don't know our type, and a link to the website.
pub fn encode(payload: &str) -> NdefMessage {
    let mime_record = NdefRecord::mime(SWAHILICARD_MIME_TYPE, payload.as_bytes().to_vec());
    let text_record = NdefRecord::well_known(RTD_TEXT, create_text_record_payload(payload));
    let uri_record = NdefRecord::well_known(RTD_URI, create_uri_record_payload(SWAHILICARD_URI));

    NdefMessage::new(vec![mime_record, text_record, uri_record])
}

/// Decodes the application payload out of a message read from a tag.
/// Never fails; a tag without usable data decodes to `"{}"`.
pub fn decode(message: &NdefMessage) -> String {
    let records = message.records();

    // 1. Our own MIME record
    let ours = records.iter().find(|record| {
        record.kind() == RecordKind::Mime
            && String::from_utf8_lossy(record.record_type()).contains(SWAHILICARD_VENDOR_TAG)
    });
    if let Some(record) = ours {
        match decode_with_fallbacks(record.payload()) {
            Some(text) => {
                debug!("Found SwahiliCard MIME record");
                return text;
            }
            None => debug!("SwahiliCard MIME record is not valid text"),
        }
    }

    // 2. Any well-known text record with text after the language code
    let text = records
        .iter()
        .filter(|record| record.kind() == RecordKind::WellKnownText)
        .find_map(|record| text_from_payload(record.payload()));
    if let Some(text) = text {
        debug!("Found TEXT record");
        return text;
    }

    // 3. Last resort, whatever the first record carries
    if let Some(first) = records.first() {
        debug!("No special record found, using first record");
        // an empty payload is valid UTF-8 and decodes to ""
        if let Some(text) = decode_with_fallbacks(first.payload()) {
            return text;
        }
        debug!("Could not convert first record payload to a string");
    } else {
        debug!("No records in NDEF message");
    }

    EMPTY_PAYLOAD.to_string()
}

/// Text of a well-known text record payload, or `None` when the record
/// holds nothing after its language code.
pub fn text_from_payload(payload: &[u8]) -> Option<String> {
    let (&status, _) = payload.split_first()?;
    let lang_len = (status & TEXT_LANGUAGE_MASK) as usize;
    let text_start = lang_len + 1;

    if payload.len() <= text_start {
        return None;
    }

    let text = &payload[text_start..];
    if status & TEXT_UTF16_FLAG != 0 {
        decode_utf16(text)
    } else {
        str::from_utf8(text).ok().map(str::to_string)
    }
}

/// UTF-8, then UTF-16, then ASCII.
pub fn decode_with_fallbacks(bytes: &[u8]) -> Option<String> {
    str::from_utf8(bytes)
        .ok()
        .map(str::to_string)
        .or_else(|| decode_utf16(bytes))
        .or_else(|| decode_ascii(bytes))
}

fn decode_utf16(bytes: &[u8]) -> Option<String> {
    if bytes.len() % 2 != 0 {
        return None;
    }

    let (little_endian, body) = match bytes {
        [0xFF, 0xFE, rest @ ..] => (true, rest),
        [0xFE, 0xFF, rest @ ..] => (false, rest),
        _ => (false, bytes),
    };

    let units = body.chunks_exact(2).map(|pair| {
        if little_endian {
            u16::from_le_bytes([pair[0], pair[1]])
        } else {
            u16::from_be_bytes([pair[0], pair[1]])
        }
    });

    char::decode_utf16(units).collect::<Result<String, _>>().ok()
}

fn decode_ascii(bytes: &[u8]) -> Option<String> {
    if bytes.is_ascii() {
        Some(bytes.iter().map(|&b| b as char).collect())
    } else {
        None
    }
}

/// Serialized size of a message, the figure compared against tag capacity.
pub fn encoded_len(message: &NdefMessage) -> usize {
    message.records().iter().map(record_len).sum()
}

fn record_len(record: &NdefRecord) -> usize {
    let payload_len = record.payload().len();
    let length_field = if payload_len < 256 { 1 } else { 4 };
    let id_field = match record.id() {
        Some(id) => 1 + id.len(),
        None => 0,
    };

    2 + length_field + record.record_type().len() + id_field + payload_len
}

pub fn encode_record(record: &NdefRecord, mb: bool, me: bool) -> Result<Vec<u8>, CodecError> {
    let type_len: u8 = field_len(record.record_type().len(), "type")?;
    let id_len = record
        .id()
        .map(|id| field_len::<u8>(id.len(), "id"))
        .transpose()?;
    let payload = record.payload();
    let short_record = payload.len() < 256;

    // Bit 7: MB, Bit 6: ME, Bit 5: CF(0), Bit 4: SR, Bit 3: IL, Bits 2-0: TNF
    let mut header = record.tnf().bits();
    if mb {
        header |= FLAG_MB;
    }
    if me {
        header |= FLAG_ME;
    }
    if short_record {
        header |= FLAG_SR;
    }
    if id_len.is_some() {
        header |= FLAG_IL;
    }

    let mut out = Vec::with_capacity(record_len(record));
    out.push(header);
    out.push(type_len);
    if short_record {
        out.push(payload.len() as u8);
    } else {
        let len: u32 = field_len(payload.len(), "payload")?;
        out.extend_from_slice(&len.to_be_bytes());
    }
    if let Some(id_len) = id_len {
        out.push(id_len);
    }
    out.extend_from_slice(record.record_type());
    if let Some(id) = record.id() {
        out.extend_from_slice(id);
    }
    out.extend_from_slice(payload);

    Ok(out)
}

fn field_len<T: TryFrom<usize>>(len: usize, field: &'static str) -> Result<T, CodecError> {
    T::try_from(len).map_err(|_| CodecError::FieldTooLong(field))
}

/// Raw bytes of a whole message, MB on the first record and ME on the last.
pub fn serialize_message(message: &NdefMessage) -> Result<Vec<u8>, CodecError> {
    let records = message.records();
    if records.is_empty() {
        return Err(CodecError::EmptyMessage);
    }

    let mut full_message = Vec::with_capacity(encoded_len(message));
    for (i, record) in records.iter().enumerate() {
        let mb = i == 0;
        let me = i == records.len() - 1;
        full_message.extend(encode_record(record, mb, me)?);
    }
    Ok(full_message)
}

pub fn wrap_in_tlv(ndef_bytes: &[u8]) -> Result<Vec<u8>, CodecError> {
    let mut tlv = Vec::with_capacity(ndef_bytes.len() + 5);
    // T = 0x03 (NDEF Message)
    tlv.push(TLV_NDEF);

    // L, one byte or 0xFF followed by two
    if ndef_bytes.len() < 0xFF {
        tlv.push(ndef_bytes.len() as u8);
    } else {
        // 0xFFFF is reserved
        let len = match u16::try_from(ndef_bytes.len()) {
            Ok(len) if len != 0xFFFF => len,
            _ => return Err(CodecError::TooLong(ndef_bytes.len())),
        };
        tlv.push(0xFF);
        tlv.extend_from_slice(&len.to_be_bytes());
    }

    // V (Value)
    tlv.extend_from_slice(ndef_bytes);

    // Terminator
    tlv.push(TLV_TERMINATOR);

    Ok(tlv)
}

/// Bytes added around a message of `ndef_len` bytes by [`wrap_in_tlv`].
pub fn tlv_overhead(ndef_len: usize) -> usize {
    if ndef_len < 0xFF { 3 } else { 5 }
}

/// Largest message that fits in `data_area` bytes of tag memory once wrapped.
pub fn max_message_len(data_area: usize) -> usize {
    let long_form = data_area.saturating_sub(5);
    if long_form >= 0xFF {
        long_form
    } else {
        data_area.saturating_sub(3).min(0xFE)
    }
}

/// Finds the NDEF TLV in tag memory. `Ok(None)` means the tag holds no message.
pub fn unwrap_tlv(buffer: &[u8]) -> Result<Option<&[u8]>, CodecError> {
    let mut cursor = 0;

    while cursor < buffer.len() {
        let tag = buffer[cursor];
        cursor += 1;

        match tag {
            TLV_NULL => continue,
            TLV_TERMINATOR => return Ok(None),
            _ => {}
        }

        let first = take(buffer, &mut cursor, 1)?[0];
        let len = if first == 0xFF {
            let bytes = take(buffer, &mut cursor, 2)?;
            u16::from_be_bytes([bytes[0], bytes[1]]) as usize
        } else {
            first as usize
        };

        let value = take(buffer, &mut cursor, len)?;
        if tag == TLV_NDEF {
            return Ok(Some(value));
        }
    }

    Ok(None)
}

fn take<'a>(data: &'a [u8], cursor: &mut usize, len: usize) -> Result<&'a [u8], CodecError> {
    let end = cursor.saturating_add(len);
    if end > data.len() {
        return Err(CodecError::Truncated {
            offset: *cursor,
            needed: end - data.len(),
        });
    }
    let slice = &data[*cursor..end];
    *cursor = end;
    Ok(slice)
}

/// Parses a serialized message, stopping at the record flagged ME.
pub fn parse_ndef_records(data: &[u8]) -> Result<Vec<NdefRecord>, CodecError> {
    let mut records = Vec::new();
    let mut cursor = 0;

    while cursor < data.len() {
        let header = take(data, &mut cursor, 1)?[0];
        let tnf = Tnf::from_bits(header); // Last 3 bits
        let is_short_record = (header & FLAG_SR) != 0;
        let has_id = (header & FLAG_IL) != 0;
        let is_me = (header & FLAG_ME) != 0;

        if header & FLAG_CF != 0 {
            return Err(CodecError::Chunked);
        }

        // 1. Get Type Length
        let type_len = take(data, &mut cursor, 1)?[0] as usize;

        // 2. Get Payload Length (1 byte for Short Record, 4 bytes otherwise)
        let payload_len = if is_short_record {
            take(data, &mut cursor, 1)?[0] as usize
        } else {
            let bytes = take(data, &mut cursor, 4)?;
            u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize
        };

        // 3. Get ID Length (if present)
        let id_len = if has_id {
            Some(take(data, &mut cursor, 1)?[0] as usize)
        } else {
            None
        };

        // 4. Type, ID, Payload
        let record_type = take(data, &mut cursor, type_len)?.to_vec();
        let id = match id_len {
            Some(len) => Some(take(data, &mut cursor, len)?.to_vec()),
            None => None,
        };
        let payload = take(data, &mut cursor, payload_len)?.to_vec();

        records.push(NdefRecord::new(tnf, record_type, id, payload));

        if is_me {
            break;
        }
    }

    Ok(records)
}

pub fn parse_message(data: &[u8]) -> Result<NdefMessage, CodecError> {
    parse_ndef_records(data).map(NdefMessage::new)
}

/// Checks a message against a tag before anything is written.
pub fn validate_for_write(
    message: &NdefMessage,
    capacity: usize,
    writable: bool,
) -> Result<(), WriteCheckError> {
    if !writable {
        return Err(WriteCheckError::NotWritable);
    }

    let encoded = encoded_len(message);
    if encoded > capacity {
        return Err(WriteCheckError::TooLarge { encoded, capacity });
    }

    Ok(())
}
