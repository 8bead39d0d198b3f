// src/tag.rs
use std::sync::Arc;

use log::{debug, warn};

use crate::error::TagIoError;
use crate::types::NdefMessage;

/// What a connected tag can do with NDEF.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum NdefSupport {
    /// Formatted for NDEF. `capacity` is the largest message it can hold.
    Ndef { capacity: usize, writable: bool },
    /// Blank but can be formatted for NDEF.
    Formatable { capacity: usize },
    Unsupported,
}

/// A physical tag in range of the reader.
///
/// Owned by whoever discovered the tag; a transfer borrows it for the
/// duration of one read or write. Every call blocks on the hardware.
pub trait TagHandle: Send {
    /// Human readable identifier, for logs.
    fn id(&self) -> String;

    fn connect(&mut self) -> Result<(), TagIoError>;

    fn ndef_support(&mut self) -> Result<NdefSupport, TagIoError>;

    /// An empty message means the tag is formatted but holds nothing.
    fn read_ndef(&mut self) -> Result<NdefMessage, TagIoError>;

    fn write_ndef(&mut self, message: &NdefMessage) -> Result<(), TagIoError>;

    /// Formats a blank tag for NDEF and writes `message` as its first content.
    fn format_ndef(&mut self, message: &NdefMessage) -> Result<(), TagIoError>;

    fn close(&mut self) -> Result<(), TagIoError>;
}

impl<T: TagHandle + ?Sized> TagHandle for Box<T> {
    fn id(&self) -> String {
        (**self).id()
    }

    fn connect(&mut self) -> Result<(), TagIoError> {
        (**self).connect()
    }

    fn ndef_support(&mut self) -> Result<NdefSupport, TagIoError> {
        (**self).ndef_support()
    }

    fn read_ndef(&mut self) -> Result<NdefMessage, TagIoError> {
        (**self).read_ndef()
    }

    fn write_ndef(&mut self, message: &NdefMessage) -> Result<(), TagIoError> {
        (**self).write_ndef(message)
    }

    fn format_ndef(&mut self, message: &NdefMessage) -> Result<(), TagIoError> {
        (**self).format_ndef(message)
    }

    fn close(&mut self) -> Result<(), TagIoError> {
        (**self).close()
    }
}

/// The platform NFC stack as seen by the bridge.
pub trait NfcAdapter: Send + Sync {
    /// NFC hardware present and enabled.
    fn is_available(&self) -> bool;

    /// Start handing discovered tags to the bridge.
    fn enable_dispatch(&self) -> Result<(), TagIoError>;

    /// Stop handing discovered tags to the bridge.
    fn disable_dispatch(&self) -> Result<(), TagIoError>;
}

/// Tag dispatch held for as long as a session listens. Dropping it releases
/// the dispatch; a failing release is only logged.
pub struct DispatchGuard {
    adapter: Arc<dyn NfcAdapter>,
}

impl DispatchGuard {
    pub fn acquire(adapter: Arc<dyn NfcAdapter>) -> Result<Self, TagIoError> {
        adapter.enable_dispatch()?;
        debug!("Foreground dispatch enabled");
        Ok(Self { adapter })
    }
}

impl Drop for DispatchGuard {
    fn drop(&mut self) {
        match self.adapter.disable_dispatch() {
            Ok(()) => debug!("Foreground dispatch disabled"),
            Err(e) => warn!("Error disabling foreground dispatch: {e}"),
        }
    }
}
