// src/apdu.rs
use pcsc::Card;

use crate::error::TagIoError;

pub const KEY_A: u8 = 0x60;
pub const KEY_B: u8 = 0x61;

// Sends one pseudo-APDU and strips the 90 00 status word
fn transmit<'buf>(
    card: &Card,
    command: &'static str,
    apdu: &[u8],
    recv_buffer: &'buf mut [u8],
) -> Result<&'buf [u8], TagIoError> {
    let resp = card.transmit(apdu, recv_buffer)?;
    match resp {
        [data @ .., 0x90, 0x00] => Ok(data),
        [.., sw1, sw2] => Err(TagIoError::Status {
            command,
            sw1: *sw1,
            sw2: *sw2,
        }),
        _ => Err(TagIoError::Status {
            command,
            sw1: 0,
            sw2: 0,
        }),
    }
}

// Load Authentication Keys into Reader Memory (Location 0x00 or 0x20)
// ACR122U standard: FF 82 00 key_num 06 [KEY]
pub fn load_key(card: &Card, key: &[u8; 6]) -> Result<(), TagIoError> {
    let mut apdu = vec![0xFF, 0x82, 0x00, 0x00, 0x06];
    apdu.extend_from_slice(key);

    let mut recv_buffer = [0u8; 256];
    transmit(card, "Load Key", &apdu, &mut recv_buffer).map(|_| ())
}

// Authenticate Block
// CMD: FF 86 00 00 05 01 00 Block KeyType KeyNumber
pub fn authenticate(card: &Card, block: u8, key_type: u8) -> Result<(), TagIoError> {
    let apdu = [
        0xFF, 0x86, 0x00, 0x00, 0x05, 0x01, 0x00, block, key_type, 0x00,
    ];

    let mut recv_buffer = [0u8; 256];
    transmit(card, "Authenticate", &apdu, &mut recv_buffer)
        .map(|_| ())
        .map_err(|_| TagIoError::Auth(block))
}

pub fn read_binary(card: &Card, block: u8, length: u8) -> Result<Vec<u8>, TagIoError> {
    // Read: FF B0 00 Block Len
    let apdu = [0xFF, 0xB0, 0x00, block, length];
    let mut recv_buffer = [0u8; 258];

    transmit(card, "Read Binary", &apdu, &mut recv_buffer).map(<[u8]>::to_vec)
}

pub fn update_binary(card: &Card, block: u8, data: &[u8]) -> Result<(), TagIoError> {
    let Ok(len) = u8::try_from(data.len()) else {
        return Err(TagIoError::Other(format!(
            "cannot write {} bytes in one command",
            data.len()
        )));
    };

    // Write: FF D6 00 Block Len [Data]
    let mut apdu = vec![0xFF, 0xD6, 0x00, block, len];
    apdu.extend_from_slice(data);

    let mut recv_buffer = [0u8; 256];
    transmit(card, "Update Binary", &apdu, &mut recv_buffer).map(|_| ())
}
