// src/worker.rs
use std::io;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Sender, unbounded};
use log::{error, info};

use crate::session::{Event, Job};
use crate::tag::TagHandle;
use crate::transfer;

type Task = (Job, Box<dyn TagHandle>);

/// One thread running tag transfers, one at a time, in submission order.
pub struct Worker {
    jobs: Option<Sender<Task>>,
    thread: Option<JoinHandle<()>>,
}

impl Worker {
    /// `report` receives progress and the final result of every job, tagged
    /// with the job's session id.
    pub fn spawn<F>(report: F) -> io::Result<Worker>
    where
        F: Fn(Event) + Send + 'static,
    {
        let (jobs_tx, jobs_rx) = unbounded::<Task>();

        let thread = thread::Builder::new()
            .name("nfc-worker".into())
            .spawn(move || {
                while let Ok((job, mut tag)) = jobs_rx.recv() {
                    let session = job.session;
                    let result = transfer::run(tag.as_mut(), &job, &mut |phase| {
                        report(Event::Progress { session, phase })
                    });
                    report(Event::Completed { session, result });
                }
                info!("NFC worker stopped");
            })?;

        Ok(Worker {
            jobs: Some(jobs_tx),
            thread: Some(thread),
        })
    }

    /// Queues a transfer. Hands the job back if the worker thread is gone.
    pub fn submit(&self, job: Job, tag: Box<dyn TagHandle>) -> Result<(), Job> {
        let Some(jobs) = &self.jobs else {
            return Err(job);
        };

        jobs.send((job, tag)).map_err(|err| {
            error!("NFC worker is not running");
            err.into_inner().0
        })
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        // closing the queue lets the thread finish its current transfer and exit
        self.jobs.take();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("NFC worker panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TagIoError;
    use crate::session::Phase;
    use crate::tag::NdefSupport;
    use crate::types::{Mode, NdefMessage, SessionResult};
    use crossbeam_channel::unbounded;
    use std::time::Duration;

    struct EmptyTag;

    impl TagHandle for EmptyTag {
        fn id(&self) -> String {
            "empty".into()
        }
        fn connect(&mut self) -> Result<(), TagIoError> {
            Ok(())
        }
        fn ndef_support(&mut self) -> Result<NdefSupport, TagIoError> {
            Ok(NdefSupport::Ndef {
                capacity: 48,
                writable: true,
            })
        }
        fn read_ndef(&mut self) -> Result<NdefMessage, TagIoError> {
            Ok(NdefMessage::default())
        }
        fn write_ndef(&mut self, _message: &NdefMessage) -> Result<(), TagIoError> {
            Ok(())
        }
        fn format_ndef(&mut self, _message: &NdefMessage) -> Result<(), TagIoError> {
            Ok(())
        }
        fn close(&mut self) -> Result<(), TagIoError> {
            Ok(())
        }
    }

    #[test]
    fn jobs_report_progress_then_completion_in_order() {
        let (tx, rx) = unbounded();
        let worker = Worker::spawn(move |event| {
            let _ = tx.send(event);
        })
        .unwrap();

        for session in [1, 2] {
            let job = Job {
                session,
                mode: Mode::Read,
            };
            worker.submit(job, Box::new(EmptyTag)).unwrap();
        }

        let timeout = Duration::from_secs(5);
        for session in [1, 2] {
            assert_eq!(
                rx.recv_timeout(timeout).unwrap(),
                Event::Progress {
                    session,
                    phase: Phase::Connected
                }
            );
            assert_eq!(
                rx.recv_timeout(timeout).unwrap(),
                Event::Progress {
                    session,
                    phase: Phase::Validated
                }
            );
            assert_eq!(
                rx.recv_timeout(timeout).unwrap(),
                Event::Completed {
                    session,
                    result: SessionResult::Success("{}".into())
                }
            );
        }

        drop(worker);
    }
}
