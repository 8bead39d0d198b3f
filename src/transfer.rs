// src/transfer.rs
use log::{debug, error, warn};

use crate::error::ErrorKind;
use crate::ndef;
use crate::session::{Job, Phase};
use crate::tag::{NdefSupport, TagHandle};
use crate::types::{Mode, SessionResult};

/// Runs one job against a tag: connect, check, then read or write.
/// Blocks on the hardware for the whole transfer. The tag is closed on every path.
pub fn run(tag: &mut dyn TagHandle, job: &Job, report: &mut dyn FnMut(Phase)) -> SessionResult {
    let tag_id = tag.id();
    debug!("Session {} processing tag {}", job.session, tag_id);

    if let Err(e) = tag.connect() {
        error!("Connection error on {tag_id}: {e}");
        close(tag);
        return SessionResult::failure(ErrorKind::ConnectionError, e.to_string());
    }
    debug!("Connected to tag {tag_id}");
    report(Phase::Connected);

    let result = match &job.mode {
        Mode::Read => read(tag, report),
        Mode::Write(data) => write(tag, data, report),
    };

    close(tag);
    result
}

fn close(tag: &mut dyn TagHandle) {
    if let Err(e) = tag.close() {
        warn!("Error closing NDEF connection: {e}");
    }
}

fn read(tag: &mut dyn TagHandle, report: &mut dyn FnMut(Phase)) -> SessionResult {
    let support = match tag.ndef_support() {
        Ok(support) => support,
        Err(e) => {
            return SessionResult::failure(
                ErrorKind::TagError,
                format!("Failed to query tag: {e}"),
            );
        }
    };

    match support {
        NdefSupport::Ndef { .. } => {}
        NdefSupport::Formatable { .. } | NdefSupport::Unsupported => {
            debug!("Tag doesn't support NDEF");
            return SessionResult::failure(ErrorKind::TagError, "Tag doesn't support NDEF");
        }
    }
    report(Phase::Validated);

    match tag.read_ndef() {
        Ok(message) => {
            debug!("NDEF message found with {} records", message.len());
            let result = ndef::decode(&message);
            let preview = ndef::preview(&result);
            debug!("Read result (first 50 chars): {preview}...");
            SessionResult::Success(result)
        }
        Err(e) => SessionResult::failure(
            ErrorKind::ReadError,
            format!("Error reading from tag: {e}"),
        ),
    }
}

fn write(tag: &mut dyn TagHandle, data: &str, report: &mut dyn FnMut(Phase)) -> SessionResult {
    let message = ndef::encode(data);
    debug!("Message size: {} bytes", ndef::encoded_len(&message));

    let support = match tag.ndef_support() {
        Ok(support) => support,
        Err(e) => {
            return SessionResult::failure(
                ErrorKind::TagError,
                format!("Failed to query tag: {e}"),
            );
        }
    };

    match support {
        NdefSupport::Ndef { capacity, writable } => {
            debug!("Tag capacity: {capacity} bytes");
            if let Err(e) = ndef::validate_for_write(&message, capacity, writable) {
                debug!("Error: {e}");
                return SessionResult::failure(e.kind(), e.to_string());
            }
            report(Phase::Validated);

            debug!("Writing NDEF message to tag");
            match tag.write_ndef(&message) {
                Ok(()) => {
                    debug!("Write successful");
                    SessionResult::Success(data.to_string())
                }
                Err(e) => {
                    error!("Write error: {e}");
                    SessionResult::failure(ErrorKind::WriteError, e.to_string())
                }
            }
        }
        NdefSupport::Formatable { capacity } => {
            debug!("Tag doesn't support NDEF, trying to format");
            if let Err(e) = ndef::validate_for_write(&message, capacity, true) {
                debug!("Error: {e}");
                return SessionResult::failure(e.kind(), e.to_string());
            }
            report(Phase::Validated);

            match tag.format_ndef(&message) {
                Ok(()) => {
                    debug!("Format and write successful");
                    SessionResult::Success(data.to_string())
                }
                Err(e) => {
                    error!("Format error: {e}");
                    SessionResult::failure(ErrorKind::FormatError, e.to_string())
                }
            }
        }
        NdefSupport::Unsupported => SessionResult::failure(
            ErrorKind::TagError,
            "Tag doesn't support NDEF and cannot be formatted",
        ),
    }
}
