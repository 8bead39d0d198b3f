// src/cards.rs
use log::{debug, warn};
use pcsc::Card;

use crate::apdu;
use crate::error::{CodecError, TagIoError};
use crate::ndef;

pub const CARD_TYPE_MIFARE_1K: u8 = 0x6A; // MIFARE Classic 1K
pub const CARD_TYPE_NTAG: u8 = 0x68; // NTAG215/Ultralight

/// 15 sectors of 3 data blocks, sector 0 and the trailers left alone.
pub const MIFARE_1K_DATA_BYTES: usize = 15 * 3 * 16;

/// Data area of the smallest NTAG (213), assumed for blank tags.
pub const NTAG213_DATA_BYTES: usize = 144;

const NTAG_CC_PAGE: u8 = 3;
const NTAG_FIRST_DATA_PAGE: u8 = 4;
const CC_MAGIC: u8 = 0xE1;
const CC_VERSION: u8 = 0x10;

// Factory defaults and widely used transport keys
pub const COMMON_KEYS: [[u8; 6]; 8] = [
    [0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF],
    [0xA0, 0xA1, 0xA2, 0xA3, 0xA4, 0xA5],
    [0xD3, 0xF7, 0xD3, 0xF7, 0xD3, 0xF7],
    [0x00, 0x00, 0x00, 0x00, 0x00, 0x00],
    [0xB0, 0xB1, 0xB2, 0xB3, 0xB4, 0xB5],
    [0x4D, 0x3A, 0x99, 0xC3, 0x51, 0xDD],
    [0x1A, 0x98, 0x2C, 0x7E, 0x45, 0x9A],
    [0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF],
];

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CardFamily {
    MifareClassic1k,
    Ntag,
}

impl CardFamily {
    /// The reader reports the card type in the last ATR byte.
    pub fn from_atr(atr: &[u8]) -> CardFamily {
        match atr.last() {
            Some(&CARD_TYPE_MIFARE_1K) => CardFamily::MifareClassic1k,
            _ => CardFamily::Ntag,
        }
    }
}

/// NTAG capability container, page 3.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CapabilityContainer {
    Ndef { data_area: usize, writable: bool },
    Blank,
    Foreign,
}

impl CapabilityContainer {
    pub fn parse(page: &[u8]) -> CapabilityContainer {
        match page {
            [CC_MAGIC, _version, size, access, ..] => CapabilityContainer::Ndef {
                data_area: *size as usize * 8,
                writable: access & 0x0F == 0x00,
            },
            [0, 0, 0, 0, ..] => CapabilityContainer::Blank,
            _ => CapabilityContainer::Foreign,
        }
    }

    /// Page written when formatting a blank NTAG.
    pub fn formatted(data_area: usize) -> [u8; 4] {
        [CC_MAGIC, CC_VERSION, (data_area / 8) as u8, 0x00]
    }
}

pub fn get_mifare_data_blocks() -> Vec<u8> {
    let mut blocks = Vec::new();
    // Sector 0 is usually read-only manufacturer data, so we start at Sector 1
    for sector in 1..16 {
        for block_in_sector in 0..3 {
            // 0, 1, 2 are data. 3 is the Trailer.
            blocks.push((sector * 4) + block_in_sector);
        }
    }
    blocks
}

fn authenticate_sector(card: &Card, block: u8, key_types: &[u8]) -> Result<(), TagIoError> {
    for key in COMMON_KEYS.iter() {
        if apdu::load_key(card, key).is_err() {
            continue;
        }
        let authenticated = key_types
            .iter()
            .any(|&kind| apdu::authenticate(card, block, kind).is_ok());
        if authenticated {
            return Ok(());
        }
    }
    Err(TagIoError::Auth(block))
}

/// True once `memory` holds a whole TLV area (or shows it holds none).
fn tlv_complete(memory: &[u8]) -> bool {
    !matches!(ndef::unwrap_tlv(memory), Err(CodecError::Truncated { .. }))
}

pub fn read_mifare(card: &Card) -> Result<Vec<u8>, TagIoError> {
    let mut full_data = Vec::new();

    for block in get_mifare_data_blocks() {
        // We must authenticate at the start of every sector (blocks 4, 8, 12, etc.)
        if block % 4 == 0 {
            if let Err(e) = authenticate_sector(card, block, &[apdu::KEY_A, apdu::KEY_B]) {
                if full_data.is_empty() {
                    return Err(e);
                }
                // the rest of the records are out of reach
                warn!("Could not authenticate sector at block {block}. Stopping.");
                break;
            }
        }

        full_data.extend(apdu::read_binary(card, block, 16)?);

        if tlv_complete(&full_data) {
            break;
        }
    }

    Ok(full_data)
}

pub fn write_mifare(card: &Card, data: &[u8]) -> Result<(), TagIoError> {
    let mut offset = 0;
    let mut current_block: u8 = 4;

    while offset < data.len() {
        if current_block >= 64 {
            return Err(TagIoError::Other("data does not fit on the card".into()));
        }

        // Skip trailers
        if (current_block + 1) % 4 == 0 {
            current_block += 1;
            continue;
        }

        if current_block % 4 == 0 {
            authenticate_sector(card, current_block, &[apdu::KEY_A])?;
        }

        // Chunking 16 bytes
        let copy_len = std::cmp::min(16, data.len() - offset);
        let mut chunk = [0u8; 16]; // Pad with 0s
        chunk[..copy_len].copy_from_slice(&data[offset..offset + copy_len]);

        apdu::update_binary(card, current_block, &chunk)?;

        offset += 16;
        current_block += 1;
    }
    Ok(())
}

pub fn read_capability_container(card: &Card) -> Result<CapabilityContainer, TagIoError> {
    let page = apdu::read_binary(card, NTAG_CC_PAGE, 4)?;
    debug!("Capability container: {}", hex::encode(&page));
    Ok(CapabilityContainer::parse(&page))
}

pub fn write_capability_container(card: &Card, data_area: usize) -> Result<(), TagIoError> {
    let page = CapabilityContainer::formatted(data_area);
    apdu::update_binary(card, NTAG_CC_PAGE, &page)
}

pub fn read_ntag(card: &Card, data_area: usize) -> Result<Vec<u8>, TagIoError> {
    let mut full_data = Vec::with_capacity(data_area);
    let mut page = NTAG_FIRST_DATA_PAGE;

    // READ returns 4 pages at a time
    while full_data.len() < data_area {
        full_data.extend(apdu::read_binary(card, page, 16)?);
        if tlv_complete(&full_data) {
            break;
        }
        page = page
            .checked_add(4)
            .ok_or_else(|| TagIoError::Other("read past the end of the tag".into()))?;
    }

    full_data.truncate(data_area);
    Ok(full_data)
}

pub fn write_ntag(card: &Card, data: &[u8]) -> Result<(), TagIoError> {
    // NTAG writes 4 bytes (1 page) at a time
    let mut padded_data = data.to_vec();
    while padded_data.len() % 4 != 0 {
        padded_data.push(0x00);
    }

    let mut current_page = NTAG_FIRST_DATA_PAGE;
    for chunk in padded_data.chunks(4) {
        apdu::update_binary(card, current_page, chunk)?;
        current_page = current_page
            .checked_add(1)
            .ok_or_else(|| TagIoError::Other("write past the end of the tag".into()))?;
    }
    Ok(())
}
