// src/session.rs
//! The read-or-write session as a pure state machine.
//!
//! Nothing in here touches hardware. Inbound events (tag detections, worker
//! progress, stop requests) go in, the new state is kept and the effects the
//! caller must carry out come back out.

use log::{debug, info, warn};

use crate::error::{ErrorKind, NfcError};
use crate::ndef::preview;
use crate::types::{Mode, SessionConfig, SessionResult, StartRequest};

/// Distinguishes sessions so late worker reports can be recognised.
pub type SessionId = u64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum State {
    Idle,
    AwaitingTag,
    Connecting,
    Validating,
    Transferring,
    Done(SessionResult),
}

/// Progress reported by the worker while a transfer runs.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Phase {
    Connected,
    Validated,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    TagDetected,
    Progress { session: SessionId, phase: Phase },
    Completed {
        session: SessionId,
        result: SessionResult,
    },
    Stop,
}

/// A transfer the worker should run against the detected tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub session: SessionId,
    pub mode: Mode,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    AcquireDispatch,
    ReleaseDispatch,
    Dispatch(Job),
    /// The detected tag is not wanted; let it go.
    IgnoreTag,
    Deliver(SessionResult),
    Publish(String),
}

#[derive(Debug)]
pub struct Session {
    id: SessionId,
    state: State,
    config: Option<SessionConfig>,
    result_pending: bool,
    listening: bool,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    pub fn new() -> Session {
        Session {
            id: 0,
            state: State::Idle,
            config: None,
            result_pending: false,
            listening: false,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn state(&self) -> &State {
        &self.state
    }

    pub fn config(&self) -> Option<&SessionConfig> {
        self.config.as_ref()
    }

    pub fn is_listening(&self) -> bool {
        self.listening
    }

    /// Waiting for a tag or in the middle of a transfer.
    pub fn is_busy(&self) -> bool {
        matches!(
            self.state,
            State::AwaitingTag | State::Connecting | State::Validating | State::Transferring
        )
    }

    fn in_flight(&self) -> bool {
        matches!(
            self.state,
            State::Connecting | State::Validating | State::Transferring
        )
    }

    /// Begins a new session. Arguments are checked before availability so a
    /// contradictory request never reaches the hardware.
    pub fn start(
        &mut self,
        request: StartRequest,
        nfc_available: bool,
    ) -> Result<Vec<Effect>, NfcError> {
        if self.is_busy() {
            return Err(NfcError::invalid_args("Another operation is in progress"));
        }

        let config = SessionConfig::try_from(request)?;

        if !nfc_available {
            self.state = State::Idle;
            self.config = None;
            return Err(NfcError::new(
                ErrorKind::NfcUnavailable,
                "NFC is not available or disabled",
            ));
        }

        self.id += 1;
        self.state = State::AwaitingTag;
        self.result_pending = true;
        self.listening = true;

        match &config.mode {
            Mode::Read => info!("Read session {} started - waiting for tag", self.id),
            Mode::Write(data) => info!(
                "Write session {} started - waiting for tag, data: {}",
                self.id,
                preview(data)
            ),
        }
        self.config = Some(config);

        Ok(vec![Effect::AcquireDispatch])
    }

    pub fn handle(&mut self, event: Event) -> Vec<Effect> {
        match event {
            Event::TagDetected => self.on_tag_detected(),
            Event::Progress { session, phase } => self.on_progress(session, phase),
            Event::Completed { session, result } => self.on_completed(session, result),
            Event::Stop => self.stop(),
        }
    }

    fn on_tag_detected(&mut self) -> Vec<Effect> {
        let config = match (&self.state, &self.config) {
            (State::AwaitingTag, Some(config)) => config,
            _ => {
                debug!("Ignoring tag, session is {:?}", self.state);
                return vec![Effect::IgnoreTag];
            }
        };

        let job = Job {
            session: self.id,
            mode: config.mode.clone(),
        };
        self.state = State::Connecting;

        vec![Effect::Dispatch(job)]
    }

    fn on_progress(&mut self, session: SessionId, phase: Phase) -> Vec<Effect> {
        if session != self.id {
            debug!("Dropping progress of stale session {session}");
            return Vec::new();
        }

        match (&self.state, phase) {
            (State::Connecting, Phase::Connected) => self.state = State::Validating,
            (State::Validating, Phase::Validated) => self.state = State::Transferring,
            (state, phase) => debug!("Ignoring {phase:?} while {state:?}"),
        }

        Vec::new()
    }

    fn on_completed(&mut self, session: SessionId, result: SessionResult) -> Vec<Effect> {
        if session != self.id || !self.in_flight() {
            debug!("Dropping late result of session {session}");
            return Vec::new();
        }

        let continuous = self.config.as_ref().is_some_and(|c| c.continuous);
        let mut effects = Vec::new();

        if continuous {
            if let SessionResult::Success(data) = &result {
                effects.push(Effect::Publish(data.clone()));
            }

            if !self.result_pending {
                // slot already used by an earlier tap, keep listening
                if let SessionResult::Failure(kind, message) = &result {
                    warn!("Continuous read failed ({kind}): {message}");
                }
                self.state = State::AwaitingTag;
                return effects;
            }

            if result.is_success() {
                self.result_pending = false;
                effects.push(Effect::Deliver(result));
                self.state = State::AwaitingTag;
                return effects;
            }
        }

        self.result_pending = false;
        self.listening = false;
        // listening ends before the caller hears the result
        effects.push(Effect::ReleaseDispatch);
        effects.push(Effect::Deliver(result.clone()));
        self.state = State::Done(result);

        effects
    }

    fn stop(&mut self) -> Vec<Effect> {
        let had_session = self.state != State::Idle || self.listening;
        if !had_session {
            return Vec::new();
        }

        // anything still owed to the caller is discarded
        self.id += 1;
        self.state = State::Idle;
        self.config = None;
        self.result_pending = false;

        if std::mem::take(&mut self.listening) {
            info!("Session stopped");
            vec![Effect::ReleaseDispatch]
        } else {
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read_request() -> StartRequest {
        StartRequest {
            is_reading: true,
            ..Default::default()
        }
    }

    fn write_request(data: &str) -> StartRequest {
        StartRequest {
            is_writing: true,
            data: Some(data.to_string()),
            ..Default::default()
        }
    }

    fn continuous_request() -> StartRequest {
        StartRequest {
            continuous: true,
            ..read_request()
        }
    }

    fn dispatched_job(effects: Vec<Effect>) -> Job {
        match effects.as_slice() {
            [Effect::Dispatch(job)] => job.clone(),
            other => panic!("expected a dispatch, got {other:?}"),
        }
    }

    #[test]
    fn start_moves_to_awaiting_tag_and_acquires_dispatch() {
        let mut session = Session::new();
        let effects = session.start(read_request(), true).unwrap();
        assert_eq!(effects, vec![Effect::AcquireDispatch]);
        assert_eq!(session.state(), &State::AwaitingTag);
        assert!(session.is_listening());
    }

    #[test]
    fn contradictory_request_fails_before_availability_is_considered() {
        let mut session = Session::new();
        let request = StartRequest {
            is_reading: true,
            is_writing: true,
            data: Some("x".into()),
            continuous: false,
        };
        let err = session.start(request, false).unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidArgs);
        assert_eq!(session.state(), &State::Idle);
    }

    #[test]
    fn unavailable_nfc_keeps_session_idle() {
        let mut session = Session::new();
        let err = session.start(read_request(), false).unwrap_err();
        assert_eq!(err.kind, ErrorKind::NfcUnavailable);
        assert_eq!(session.state(), &State::Idle);
        assert!(!session.is_listening());
    }

    #[test]
    fn read_session_walks_every_state() {
        let mut session = Session::new();
        session.start(read_request(), true).unwrap();

        let job = dispatched_job(session.handle(Event::TagDetected));
        assert_eq!(job.mode, Mode::Read);
        assert_eq!(session.state(), &State::Connecting);

        session.handle(Event::Progress {
            session: job.session,
            phase: Phase::Connected,
        });
        assert_eq!(session.state(), &State::Validating);

        session.handle(Event::Progress {
            session: job.session,
            phase: Phase::Validated,
        });
        assert_eq!(session.state(), &State::Transferring);

        let result = SessionResult::Success("{\"name\":\"Asha\"}".into());
        let effects = session.handle(Event::Completed {
            session: job.session,
            result: result.clone(),
        });
        assert_eq!(
            effects,
            vec![Effect::ReleaseDispatch, Effect::Deliver(result.clone())]
        );
        assert_eq!(session.state(), &State::Done(result));
        assert!(!session.is_listening());
    }

    #[test]
    fn failure_is_delivered_once_and_releases_dispatch() {
        let mut session = Session::new();
        session.start(write_request("data"), true).unwrap();
        let job = dispatched_job(session.handle(Event::TagDetected));
        assert_eq!(job.mode, Mode::Write("data".into()));

        let failure = SessionResult::failure(ErrorKind::ConnectionError, "Tag was lost");
        let effects = session.handle(Event::Completed {
            session: job.session,
            result: failure.clone(),
        });
        assert_eq!(
            effects,
            vec![Effect::ReleaseDispatch, Effect::Deliver(failure.clone())]
        );

        // a duplicate completion must not deliver again
        let effects = session.handle(Event::Completed {
            session: job.session,
            result: failure,
        });
        assert!(effects.is_empty());
    }

    #[test]
    fn tag_during_transfer_is_ignored() {
        let mut session = Session::new();
        session.start(read_request(), true).unwrap();
        let job = dispatched_job(session.handle(Event::TagDetected));
        session.handle(Event::Progress {
            session: job.session,
            phase: Phase::Connected,
        });
        session.handle(Event::Progress {
            session: job.session,
            phase: Phase::Validated,
        });
        assert_eq!(session.state(), &State::Transferring);

        assert_eq!(session.handle(Event::TagDetected), vec![Effect::IgnoreTag]);
        assert_eq!(session.state(), &State::Transferring);

        let result = SessionResult::Success("first".into());
        let effects = session.handle(Event::Completed {
            session: job.session,
            result: result.clone(),
        });
        assert_eq!(
            effects,
            vec![Effect::ReleaseDispatch, Effect::Deliver(result)]
        );
    }

    #[test]
    fn tag_without_session_is_ignored() {
        let mut session = Session::new();
        assert_eq!(session.handle(Event::TagDetected), vec![Effect::IgnoreTag]);
        assert_eq!(session.state(), &State::Idle);
    }

    #[test]
    fn stop_discards_in_flight_result() {
        let mut session = Session::new();
        session.start(read_request(), true).unwrap();
        let job = dispatched_job(session.handle(Event::TagDetected));

        assert_eq!(session.handle(Event::Stop), vec![Effect::ReleaseDispatch]);
        assert_eq!(session.state(), &State::Idle);

        let late = session.handle(Event::Completed {
            session: job.session,
            result: SessionResult::Success("late".into()),
        });
        assert!(late.is_empty());
        assert_eq!(session.state(), &State::Idle);
    }

    #[test]
    fn late_completion_does_not_leak_into_next_session() {
        let mut session = Session::new();
        session.start(read_request(), true).unwrap();
        let stale = dispatched_job(session.handle(Event::TagDetected));
        session.handle(Event::Stop);

        session.start(read_request(), true).unwrap();
        let fresh = dispatched_job(session.handle(Event::TagDetected));
        assert_ne!(stale.session, fresh.session);

        assert!(
            session
                .handle(Event::Completed {
                    session: stale.session,
                    result: SessionResult::Success("stale".into()),
                })
                .is_empty()
        );
        assert_eq!(session.state(), &State::Connecting);

        let effects = session.handle(Event::Completed {
            session: fresh.session,
            result: SessionResult::Success("fresh".into()),
        });
        assert_eq!(
            effects,
            vec![
                Effect::ReleaseDispatch,
                Effect::Deliver(SessionResult::Success("fresh".into()))
            ]
        );
    }

    #[test]
    fn stop_twice_and_stop_when_idle_are_no_ops() {
        let mut session = Session::new();
        assert!(session.handle(Event::Stop).is_empty());

        session.start(read_request(), true).unwrap();
        assert_eq!(session.handle(Event::Stop), vec![Effect::ReleaseDispatch]);
        assert!(session.handle(Event::Stop).is_empty());
        assert_eq!(session.state(), &State::Idle);
    }

    #[test]
    fn start_while_busy_is_rejected_but_done_can_restart() {
        let mut session = Session::new();
        session.start(read_request(), true).unwrap();
        let err = session.start(read_request(), true).unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidArgs);

        let job = dispatched_job(session.handle(Event::TagDetected));
        session.handle(Event::Completed {
            session: job.session,
            result: SessionResult::Success("{}".into()),
        });
        assert!(matches!(session.state(), State::Done(_)));

        assert!(session.start(read_request(), true).is_ok());
        assert_eq!(session.state(), &State::AwaitingTag);
    }

    #[test]
    fn continuous_read_publishes_every_success_but_delivers_once() {
        let mut session = Session::new();
        session.start(continuous_request(), true).unwrap();

        let first = dispatched_job(session.handle(Event::TagDetected));
        let effects = session.handle(Event::Completed {
            session: first.session,
            result: SessionResult::Success("one".into()),
        });
        assert_eq!(
            effects,
            vec![
                Effect::Publish("one".into()),
                Effect::Deliver(SessionResult::Success("one".into()))
            ]
        );
        assert_eq!(session.state(), &State::AwaitingTag);
        assert!(session.is_listening());

        let second = dispatched_job(session.handle(Event::TagDetected));
        let effects = session.handle(Event::Completed {
            session: second.session,
            result: SessionResult::Success("two".into()),
        });
        assert_eq!(effects, vec![Effect::Publish("two".into())]);

        let third = dispatched_job(session.handle(Event::TagDetected));
        let effects = session.handle(Event::Completed {
            session: third.session,
            result: SessionResult::failure(ErrorKind::ReadError, "moved too quickly"),
        });
        assert!(effects.is_empty());
        assert_eq!(session.state(), &State::AwaitingTag);

        assert_eq!(session.handle(Event::Stop), vec![Effect::ReleaseDispatch]);
    }

    #[test]
    fn continuous_read_failure_before_any_success_ends_the_session() {
        let mut session = Session::new();
        session.start(continuous_request(), true).unwrap();
        let job = dispatched_job(session.handle(Event::TagDetected));

        let failure = SessionResult::failure(ErrorKind::TagError, "Tag doesn't support NDEF");
        let effects = session.handle(Event::Completed {
            session: job.session,
            result: failure.clone(),
        });
        assert_eq!(
            effects,
            vec![Effect::ReleaseDispatch, Effect::Deliver(failure.clone())]
        );
        assert_eq!(session.state(), &State::Done(failure));
    }

    #[test]
    fn out_of_order_progress_is_ignored() {
        let mut session = Session::new();
        session.start(read_request(), true).unwrap();
        let job = dispatched_job(session.handle(Event::TagDetected));

        session.handle(Event::Progress {
            session: job.session,
            phase: Phase::Validated,
        });
        assert_eq!(session.state(), &State::Connecting);
    }
}
