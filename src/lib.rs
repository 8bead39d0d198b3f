pub mod apdu;
pub mod bridge;
pub mod cards;
pub mod config;
pub mod error;
pub mod ndef;
pub mod nfc_service;
pub mod session;
pub mod tag;
pub mod transfer;
pub mod types;
pub mod worker;
pub mod ws;
