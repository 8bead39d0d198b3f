// src/nfc_service.rs
use std::ffi::{CStr, CString};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crossbeam_channel::Sender;
use log::{debug, error, info};
use pcsc::{
    Card, Context, Disposition, PNP_NOTIFICATION, Protocols, ReaderState, Scope, ShareMode, State,
};

use crate::bridge::Bridge;
use crate::cards::{self, CapabilityContainer, CardFamily};
use crate::error::TagIoError;
use crate::ndef;
use crate::tag::{NdefSupport, NfcAdapter, TagHandle};
use crate::types::{NdefMessage, OutgoingMessage};

/// Reader state shared between the PC/SC loop and the bridge.
#[derive(Debug, Default)]
pub struct ReaderStatus {
    available: AtomicBool,
    listening: AtomicBool,
}

impl ReaderStatus {
    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    pub fn is_listening(&self) -> bool {
        self.listening.load(Ordering::SeqCst)
    }

    fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }
}

/// Tag dispatch over PC/SC: inserted cards only reach the bridge while a session listens.
#[derive(Debug, Clone)]
pub struct PcscAdapter {
    status: Arc<ReaderStatus>,
}

impl PcscAdapter {
    pub fn new(status: Arc<ReaderStatus>) -> Self {
        Self { status }
    }
}

impl NfcAdapter for PcscAdapter {
    fn is_available(&self) -> bool {
        self.status.is_available()
    }

    fn enable_dispatch(&self) -> Result<(), TagIoError> {
        self.status.listening.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn disable_dispatch(&self) -> Result<(), TagIoError> {
        self.status.listening.store(false, Ordering::SeqCst);
        Ok(())
    }
}

/// A card sitting on a PC/SC reader.
pub struct PcscTag {
    ctx: Context,
    reader: CString,
    card: Option<Card>,
    family: CardFamily,
    atr: Vec<u8>,
}

impl PcscTag {
    pub fn new(ctx: Context, reader: CString) -> Self {
        Self {
            ctx,
            reader,
            card: None,
            family: CardFamily::Ntag,
            atr: Vec::new(),
        }
    }

    fn card(&self) -> Result<&Card, TagIoError> {
        self.card.as_ref().ok_or(TagIoError::NotConnected)
    }

    fn write_tlv(&self, message: &NdefMessage) -> Result<(), TagIoError> {
        let ndef_bytes = ndef::serialize_message(message)?;
        let tlv_data = ndef::wrap_in_tlv(&ndef_bytes)?;
        let card = self.card()?;

        match self.family {
            CardFamily::MifareClassic1k => cards::write_mifare(card, &tlv_data),
            CardFamily::Ntag => cards::write_ntag(card, &tlv_data),
        }
    }
}

impl TagHandle for PcscTag {
    fn id(&self) -> String {
        let reader = self.reader.to_string_lossy();
        format!("{reader} [{}]", hex::encode(&self.atr))
    }

    fn connect(&mut self) -> Result<(), TagIoError> {
        let card = self
            .ctx
            .connect(&self.reader, ShareMode::Shared, Protocols::ANY)?;

        let mut names_buf = [0u8; 128];
        let mut atr_buf = [0u8; 64];
        let status = card.status2(&mut names_buf, &mut atr_buf)?;
        self.atr = status.atr().to_vec();
        self.family = CardFamily::from_atr(&self.atr);
        debug!("Card ATR {} ({:?})", hex::encode(&self.atr), self.family);

        self.card = Some(card);
        Ok(())
    }

    fn ndef_support(&mut self) -> Result<NdefSupport, TagIoError> {
        match self.family {
            CardFamily::MifareClassic1k => Ok(NdefSupport::Ndef {
                capacity: ndef::max_message_len(cards::MIFARE_1K_DATA_BYTES),
                writable: true,
            }),
            CardFamily::Ntag => match cards::read_capability_container(self.card()?)? {
                CapabilityContainer::Ndef {
                    data_area,
                    writable,
                } => Ok(NdefSupport::Ndef {
                    capacity: ndef::max_message_len(data_area),
                    writable,
                }),
                CapabilityContainer::Blank => Ok(NdefSupport::Formatable {
                    capacity: ndef::max_message_len(cards::NTAG213_DATA_BYTES),
                }),
                CapabilityContainer::Foreign => Ok(NdefSupport::Unsupported),
            },
        }
    }

    fn read_ndef(&mut self) -> Result<NdefMessage, TagIoError> {
        let card = self.card()?;
        let memory = match self.family {
            CardFamily::MifareClassic1k => cards::read_mifare(card)?,
            CardFamily::Ntag => {
                let data_area = match cards::read_capability_container(card)? {
                    CapabilityContainer::Ndef { data_area, .. } => data_area,
                    _ => return Err(TagIoError::Unsupported("Tag doesn't support NDEF")),
                };
                cards::read_ntag(card, data_area)?
            }
        };

        match ndef::unwrap_tlv(&memory)? {
            Some(ndef_bytes) => Ok(ndef::parse_message(ndef_bytes)?),
            None => Ok(NdefMessage::default()),
        }
    }

    fn write_ndef(&mut self, message: &NdefMessage) -> Result<(), TagIoError> {
        self.write_tlv(message)
    }

    fn format_ndef(&mut self, message: &NdefMessage) -> Result<(), TagIoError> {
        if self.family == CardFamily::Ntag {
            cards::write_capability_container(self.card()?, cards::NTAG213_DATA_BYTES)?;
        }
        self.write_tlv(message)
    }

    fn close(&mut self) -> Result<(), TagIoError> {
        if let Some(card) = self.card.take() {
            card.disconnect(Disposition::LeaveCard)
                .map_err(|(_, err)| TagIoError::Transmit(err))?;
        }
        Ok(())
    }
}

/// Watches readers and cards, handing inserted cards to the bridge while a
/// session listens. Blocks for the life of the process.
pub fn run(
    bridge: Bridge,
    status: Arc<ReaderStatus>,
    tx: Sender<OutgoingMessage>,
    poll_interval: Duration,
) {
    info!("Starting NFC Service (Event Driven)...");

    let ctx = match Context::establish(Scope::User) {
        Ok(ctx) => ctx,
        Err(err) => {
            error!("Failed to establish context: {}", err);
            status.set_available(false);
            let _ = tx.send(OutgoingMessage::READER_ERROR {
                error: err.to_string(),
            });
            return;
        }
    };

    let mut readers_buf = [0; 2048];
    let mut reader_names: Vec<CString> = Vec::new();
    let mut reader_states = vec![ReaderState::new(PNP_NOTIFICATION(), State::UNAWARE)];
    let mut readers_changed = true;

    loop {
        // Refresh the reader list on startup and after hot-plug
        if readers_changed {
            refresh_readers(
                &ctx,
                &mut readers_buf,
                &mut reader_names,
                &mut reader_states,
            );
            status.set_available(!reader_names.is_empty());
            let _ = tx.send(OutgoingMessage::READER_STATUS {
                success: !reader_names.is_empty(),
            });
        }

        // Wait for State Change
        if let Err(err) = ctx.get_status_change(poll_interval, &mut reader_states) {
            if err != pcsc::Error::Timeout {
                error!("PCSC Error: {}", err);
                std::thread::sleep(Duration::from_secs(1));
                continue;
            }
        }

        readers_changed = false;

        // Check PnP (Index 0)
        if reader_states[0].event_state().intersects(State::CHANGED) {
            info!("Hardware change detected");
            readers_changed = true;
            reader_states[0].sync_current_state();
        }

        // Check Readers (Indices 1..)
        for i in 1..reader_states.len() {
            let Some(name) = reader_names.get(i - 1).cloned() else {
                continue;
            };
            let rs = &reader_states[i];

            if rs.event_state().intersects(State::CHANGED) {
                let current = rs.event_state();

                if current.intersects(State::PRESENT)
                    && !rs.current_state().intersects(State::PRESENT)
                {
                    info!("Card Inserted on {:?}", name);
                    handle_card_insertion(&ctx, &name, &bridge, &status);
                }

                if current.intersects(State::EMPTY) && rs.current_state().intersects(State::PRESENT)
                {
                    info!("Card Removed from {:?}", name);
                }

                reader_states[i].sync_current_state();
            }
        }
    }
}

fn refresh_readers(
    ctx: &Context,
    readers_buf: &mut [u8],
    reader_names: &mut Vec<CString>,
    reader_states: &mut Vec<ReaderState>,
) {
    // keeps the PnP state (index 0) and drops everything else
    reader_states.truncate(1);

    match ctx.list_readers(readers_buf) {
        Ok(iter) => {
            *reader_names = iter.map(CString::from).collect();
            for name in reader_names.iter() {
                reader_states.push(ReaderState::new(name.clone(), State::UNAWARE));
            }
        }
        Err(err) => {
            debug!("No readers: {}", err);
            reader_names.clear();
        }
    }
}

fn handle_card_insertion(
    ctx: &Context,
    reader_name: &CStr,
    bridge: &Bridge,
    status: &ReaderStatus,
) {
    if !status.is_listening() {
        debug!("No session listening, card ignored");
        return;
    }

    let tag = PcscTag::new(ctx.clone(), reader_name.to_owned());
    bridge.on_tag_detected(Box::new(tag));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn adapter_toggles_listening() {
        let status = Arc::new(ReaderStatus::default());
        let adapter = PcscAdapter::new(status.clone());

        assert!(!adapter.is_available());
        status.set_available(true);
        assert!(adapter.is_available());

        adapter.enable_dispatch().unwrap();
        assert!(status.is_listening());
        adapter.disable_dispatch().unwrap();
        assert!(!status.is_listening());
    }
}
