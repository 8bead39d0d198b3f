#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, bounded, unbounded};

use swahilicard_nfc::bridge::{Bridge, Delivery};
use swahilicard_nfc::error::TagIoError;
use swahilicard_nfc::tag::{NdefSupport, NfcAdapter, TagHandle};
use swahilicard_nfc::types::NdefMessage;

pub const TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Default)]
pub struct MockAdapter {
    pub available: AtomicBool,
    pub listening: AtomicBool,
}

impl MockAdapter {
    pub fn new(available: bool) -> Arc<Self> {
        Arc::new(Self {
            available: AtomicBool::new(available),
            listening: AtomicBool::new(false),
        })
    }

    pub fn is_listening(&self) -> bool {
        self.listening.load(Ordering::SeqCst)
    }
}

impl NfcAdapter for MockAdapter {
    fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    fn enable_dispatch(&self) -> Result<(), TagIoError> {
        self.listening.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn disable_dispatch(&self) -> Result<(), TagIoError> {
        self.listening.store(false, Ordering::SeqCst);
        Ok(())
    }
}

/// Tag memory that outlives any one `MemoryTag` handle.
#[derive(Default)]
pub struct TagMemory {
    pub message: Mutex<Option<NdefMessage>>,
    pub connects: AtomicUsize,
    pub closes: AtomicUsize,
}

impl TagMemory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

pub struct MemoryTag {
    pub name: &'static str,
    pub memory: Arc<TagMemory>,
    pub support: NdefSupport,
    /// Blocks `connect` until something is sent or the sender is dropped.
    pub gate: Option<Receiver<()>>,
}

impl MemoryTag {
    pub fn new(name: &'static str, memory: Arc<TagMemory>, capacity: usize) -> Self {
        Self {
            name,
            memory,
            support: NdefSupport::Ndef {
                capacity,
                writable: true,
            },
            gate: None,
        }
    }

    pub fn gated(mut self) -> (Self, Sender<()>) {
        let (tx, rx) = bounded(1);
        self.gate = Some(rx);
        (self, tx)
    }
}

impl TagHandle for MemoryTag {
    fn id(&self) -> String {
        self.name.to_string()
    }

    fn connect(&mut self) -> Result<(), TagIoError> {
        self.memory.connects.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            let _ = gate.recv();
        }
        Ok(())
    }

    fn ndef_support(&mut self) -> Result<NdefSupport, TagIoError> {
        Ok(self.support)
    }

    fn read_ndef(&mut self) -> Result<NdefMessage, TagIoError> {
        let stored = self.memory.message.lock().unwrap();
        Ok(stored.clone().unwrap_or_default())
    }

    fn write_ndef(&mut self, message: &NdefMessage) -> Result<(), TagIoError> {
        *self.memory.message.lock().unwrap() = Some(message.clone());
        Ok(())
    }

    fn format_ndef(&mut self, message: &NdefMessage) -> Result<(), TagIoError> {
        self.write_ndef(message)
    }

    fn close(&mut self) -> Result<(), TagIoError> {
        self.memory.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub struct Harness {
    pub bridge: Bridge,
    pub adapter: Arc<MockAdapter>,
    pub deliveries: Receiver<Delivery>,
}

impl Harness {
    pub fn new(available: bool) -> Self {
        let adapter = MockAdapter::new(available);
        let (tx, rx) = unbounded();
        let (bridge, _thread) = Bridge::spawn(adapter.clone(), tx).unwrap();
        Self {
            bridge,
            adapter,
            deliveries: rx,
        }
    }

    pub fn next_delivery(&self) -> Delivery {
        self.deliveries
            .recv_timeout(TIMEOUT)
            .expect("no delivery within timeout")
    }

    pub fn assert_no_delivery(&self) {
        if let Ok(delivery) = self.deliveries.recv_timeout(Duration::from_millis(200)) {
            panic!("unexpected delivery {delivery:?}");
        }
    }
}
