use std::process;
use std::sync::Arc;

use crossbeam_channel::{never, select, unbounded};
use log::{error, info};
use tokio::sync::broadcast;

use swahilicard_nfc::bridge::{Bridge, Delivery};
use swahilicard_nfc::config::Config;
use swahilicard_nfc::nfc_service::{self, PcscAdapter, ReaderStatus};
use swahilicard_nfc::types::OutgoingMessage;
use swahilicard_nfc::ws;

#[tokio::main]
async fn main() {
    env_logger::init();
    info!("Starting SwahiliCard NFC service...");

    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            error!("{e}");
            process::exit(1);
        }
    };

    let status = Arc::new(ReaderStatus::default());
    let adapter = Arc::new(PcscAdapter::new(status.clone()));

    // Bridge -> application (session results)
    let (delivery_tx, delivery_rx) = unbounded::<Delivery>();
    let (bridge, _bridge_thread) = match Bridge::spawn(adapter, delivery_tx) {
        Ok(spawned) => spawned,
        Err(e) => {
            error!("Failed to start the NFC bridge: {e}");
            process::exit(1);
        }
    };

    // Tokio broadcast fans every event out to the WS clients
    let (event_tx, _) = broadcast::channel::<OutgoingMessage>(config.event_capacity);

    // PC/SC thread -> reader status messages
    let (reader_tx, reader_rx) = unbounded::<OutgoingMessage>();
    let pcsc_bridge = bridge.clone();
    let poll_interval = config.poll_interval();
    std::thread::spawn(move || {
        nfc_service::run(pcsc_bridge, status, reader_tx, poll_interval);
    });

    // Sync channels -> async broadcast
    let forward_tx = event_tx.clone();
    std::thread::spawn(move || {
        let mut reader_rx = reader_rx;
        loop {
            let next = select! {
                recv(delivery_rx) -> msg => match msg {
                    Ok(delivery) => Some(OutgoingMessage::from(delivery)),
                    Err(_) => break,
                },
                recv(reader_rx) -> msg => msg.ok(),
            };
            match next {
                Some(msg) => {
                    let _ = forward_tx.send(msg);
                }
                // PC/SC loop gave up, results still flow
                None => reader_rx = never(),
            }
        }
    });

    ws::start_server(bridge, event_tx, config.listen_addr).await;
}
