// src/bridge.rs
//! The delivery domain.
//!
//! A single thread owns the [`Session`] and is the only place it is mutated.
//! Front end commands, tag detections and worker reports all arrive here as
//! messages; results leave through the `Delivery` channel.

use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender, bounded, select, unbounded};
use log::{debug, error, info, warn};

use crate::error::{ErrorKind, NfcError};
use crate::session::{Effect, Event, Session, State};
use crate::tag::{DispatchGuard, NfcAdapter, TagHandle};
use crate::types::{SessionResult, StartRequest};
use crate::worker::Worker;

/// What the bridge hands back to the application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// The single result of a session.
    Result(SessionResult),
    /// A successful continuous read.
    ContinuousEvent(String),
}

enum Control {
    Start(StartRequest, Sender<Result<(), NfcError>>),
    Stop(Sender<()>),
    TagDetected(Box<dyn TagHandle>),
    Inspect(Sender<State>),
}

/// Cheap handle to the bridge thread. The thread exits once every handle is dropped.
#[derive(Clone)]
pub struct Bridge {
    commands: Sender<Control>,
    adapter: Arc<dyn NfcAdapter>,
}

impl Bridge {
    pub fn spawn(
        adapter: Arc<dyn NfcAdapter>,
        deliveries: Sender<Delivery>,
    ) -> io::Result<(Bridge, JoinHandle<()>)> {
        let (commands_tx, commands_rx) = unbounded::<Control>();
        let (reports_tx, reports_rx) = unbounded::<Event>();

        let worker = Worker::spawn(move |event| {
            let _ = reports_tx.send(event);
        })?;

        let mut delivery = DeliveryLoop {
            session: Session::new(),
            adapter: adapter.clone(),
            dispatch: None,
            worker,
            deliveries,
        };

        let thread = thread::Builder::new()
            .name("nfc-bridge".into())
            .spawn(move || delivery.run(commands_rx, reports_rx))?;

        Ok((
            Bridge {
                commands: commands_tx,
                adapter,
            },
            thread,
        ))
    }

    pub fn is_available(&self) -> bool {
        self.adapter.is_available()
    }

    pub fn start_session(&self, request: StartRequest) -> Result<(), NfcError> {
        let (reply_tx, reply_rx) = bounded(1);
        self.commands
            .send(Control::Start(request, reply_tx))
            .map_err(|_| shut_down())?;
        reply_rx.recv().map_err(|_| shut_down())?
    }

    /// Always succeeds, also when no session is running.
    pub fn stop_session(&self) {
        let (reply_tx, reply_rx) = bounded(1);
        if self.commands.send(Control::Stop(reply_tx)).is_ok() {
            let _ = reply_rx.recv();
        }
    }

    /// Called by whoever discovers tags.
    pub fn on_tag_detected(&self, tag: Box<dyn TagHandle>) {
        if self.commands.send(Control::TagDetected(tag)).is_err() {
            warn!("Tag detected after the NFC bridge shut down");
        }
    }

    pub fn session_state(&self) -> Option<State> {
        let (reply_tx, reply_rx) = bounded(1);
        self.commands.send(Control::Inspect(reply_tx)).ok()?;
        reply_rx.recv().ok()
    }
}

fn shut_down() -> NfcError {
    NfcError::new(ErrorKind::UnknownError, "NFC bridge has shut down")
}

struct DeliveryLoop {
    session: Session,
    adapter: Arc<dyn NfcAdapter>,
    dispatch: Option<DispatchGuard>,
    worker: Worker,
    deliveries: Sender<Delivery>,
}

impl DeliveryLoop {
    fn run(&mut self, commands: Receiver<Control>, reports: Receiver<Event>) {
        info!("NFC bridge started");

        loop {
            select! {
                recv(commands) -> msg => match msg {
                    Ok(control) => self.on_command(control),
                    Err(_) => break,
                },
                recv(reports) -> msg => {
                    if let Ok(event) = msg {
                        let effects = self.session.handle(event);
                        self.apply(effects, None);
                    }
                },
            }
        }

        let effects = self.session.handle(Event::Stop);
        self.apply(effects, None);
        info!("NFC bridge stopped");
    }

    fn on_command(&mut self, control: Control) {
        match control {
            Control::Start(request, reply) => {
                let result = self.start(request);
                if let Err(e) = &result {
                    debug!("Start session failed: {e}");
                }
                let _ = reply.send(result);
            }
            Control::Stop(reply) => {
                let effects = self.session.handle(Event::Stop);
                self.apply(effects, None);
                let _ = reply.send(());
            }
            Control::TagDetected(tag) => {
                debug!("NFC tag detected: {}", tag.id());
                let effects = self.session.handle(Event::TagDetected);
                self.apply(effects, Some(tag));
            }
            Control::Inspect(reply) => {
                let _ = reply.send(self.session.state().clone());
            }
        }
    }

    fn start(&mut self, request: StartRequest) -> Result<(), NfcError> {
        let available = self.adapter.is_available();
        let effects = self.session.start(request, available)?;

        if let Err(e) = self.acquire_dispatch() {
            let effects = self.session.handle(Event::Stop);
            self.apply(effects, None);
            return Err(e);
        }

        self.apply(effects, None);
        Ok(())
    }

    fn acquire_dispatch(&mut self) -> Result<(), NfcError> {
        if self.dispatch.is_none() {
            let guard = DispatchGuard::acquire(self.adapter.clone()).map_err(|e| {
                error!("Error enabling foreground dispatch: {e}");
                NfcError::new(ErrorKind::NfcUnavailable, e.to_string())
            })?;
            self.dispatch = Some(guard);
        }
        Ok(())
    }

    fn apply(&mut self, effects: Vec<Effect>, mut tag: Option<Box<dyn TagHandle>>) {
        for effect in effects {
            match effect {
                Effect::AcquireDispatch => {
                    // failure already logged, the session then never sees a tag
                    let _ = self.acquire_dispatch();
                }
                Effect::ReleaseDispatch => {
                    self.dispatch.take();
                }
                Effect::Dispatch(job) => match tag.take() {
                    Some(handle) => {
                        if let Err(job) = self.worker.submit(job, handle) {
                            let result = SessionResult::failure(
                                ErrorKind::UnknownError,
                                "NFC worker is not running",
                            );
                            let effects = self.session.handle(Event::Completed {
                                session: job.session,
                                result,
                            });
                            self.apply(effects, None);
                        }
                    }
                    None => error!("Dispatch requested without a tag"),
                },
                Effect::IgnoreTag => {
                    if let Some(handle) = tag.take() {
                        debug!("Ignoring tag {}", handle.id());
                    }
                }
                Effect::Deliver(result) => {
                    if self.deliveries.send(Delivery::Result(result)).is_err() {
                        warn!("Result dropped, nobody is listening");
                    }
                }
                Effect::Publish(data) => {
                    let event = Delivery::ContinuousEvent(data);
                    if self.deliveries.send(event).is_err() {
                        warn!("Tag event dropped, nobody is listening");
                    }
                }
            }
        }
    }
}
