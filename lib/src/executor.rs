// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Command executor
//!
//! A single worker thread owns the device [Transport] and drains a FIFO job
//! queue, so at most one report exchange is outstanding at any time. Callers
//! may enqueue from any thread and never block, results are delivered to a
//! continuation (or awaited through [Executor::execute]) exactly once per job.
//!
//! Commands carrying a non-empty password are wrapped with the envelope codec
//! before transmission and unwrapped on receipt. At the continuation boundary
//! of [Executor::enqueue] failures are converted to a textual
//! [failure marker][dbb_proto::reply::failure_marker], structured errors are
//! retained for [Executor::enqueue_with] and the async API.

use std::{
    panic::{catch_unwind, AssertUnwindSafe},
    sync::{
        atomic::{AtomicUsize, Ordering},
        mpsc, Arc,
    },
    thread,
};

use log::{debug, error, trace, warn};
use strum::Display;
use tokio::sync::oneshot;
use zeroize::Zeroizing;

use dbb_core::{envelope, DecryptError};
use dbb_proto::{reply::failure_marker, report, Command, Reply, ReportSizes};

use crate::{Error, Transport};

/// Continuation receiving a command result
pub type Continuation = Box<dyn FnOnce(Result<String, Error>) + Send + 'static>;

/// Continuation receiving a raw report
type RawContinuation = Box<dyn FnOnce(Result<Vec<u8>, Error>) + Send + 'static>;

/// Executor state
#[derive(Copy, Clone, PartialEq, Eq, Debug, Display)]
#[strum(serialize_all = "snake_case")]
pub enum State {
    /// No jobs queued or in progress
    Idle,
    /// Worker is processing queued jobs
    Draining,
}

/// Queued worker jobs
enum Job {
    /// JSON command, optionally encrypted
    Command {
        command: String,
        password: Option<Zeroizing<String>>,
        done: Continuation,
    },
    /// Raw report exchange (bootloader protocol)
    Raw {
        payload: Vec<u8>,
        sizes: ReportSizes,
        done: RawContinuation,
    },
    /// Replace the worker transport
    Attach {
        transport: Box<dyn Transport>,
        done: oneshot::Sender<()>,
    },
    /// Close and drop the worker transport
    Detach { done: oneshot::Sender<()> },
    /// Query transport liveness
    IsOpen { done: oneshot::Sender<bool> },
}

impl Job {
    /// Resolve a job that could not be run
    fn fail(self, e: Error) {
        match self {
            Job::Command { done, .. } => complete(done, Err(e)),
            Job::Raw { done, .. } => complete(done, Err(e)),
            Job::Attach { .. } | Job::Detach { .. } | Job::IsOpen { .. } => (),
        }
    }
}

/// Handle to the command executor worker, cheap to clone and share between threads
#[derive(Clone)]
pub struct Executor {
    tx: mpsc::Sender<Job>,
    pending: Arc<AtomicUsize>,
}

impl Executor {
    /// Start an executor worker owning the provided transport
    pub fn new(transport: impl Transport + 'static) -> Result<Self, Error> {
        Self::spawn(Some(Box::new(transport)))
    }

    /// Start an executor worker without a transport, see [Executor::attach]
    pub fn detached() -> Result<Self, Error> {
        Self::spawn(None)
    }

    fn spawn(transport: Option<Box<dyn Transport>>) -> Result<Self, Error> {
        let (tx, rx) = mpsc::channel();
        let pending = Arc::new(AtomicUsize::new(0));

        let p = pending.clone();
        thread::Builder::new()
            .name("dbb-executor".to_string())
            .spawn(move || worker(transport, rx, p))?;

        Ok(Self { tx, pending })
    }

    /// Fetch the executor state
    pub fn state(&self) -> State {
        match self.pending.load(Ordering::SeqCst) {
            0 => State::Idle,
            _ => State::Draining,
        }
    }

    /// Enqueue a command, `done` receives the reply or a failure marker
    pub fn enqueue(
        &self,
        command: impl Into<String>,
        password: Option<&str>,
        done: impl FnOnce(String) + Send + 'static,
    ) {
        self.enqueue_with(command, password, move |r| {
            let s = match r {
                Ok(v) => v,
                Err(e) => failure_marker(&e.to_string()),
            };
            done(s)
        })
    }

    /// Enqueue a command, `done` receives the structured result
    pub fn enqueue_with(
        &self,
        command: impl Into<String>,
        password: Option<&str>,
        done: impl FnOnce(Result<String, Error>) + Send + 'static,
    ) {
        self.submit(Job::Command {
            command: command.into(),
            password: password.map(|p| Zeroizing::new(p.to_string())),
            done: Box::new(done),
        })
    }

    /// Execute a command, returning the plaintext reply
    pub async fn execute(
        &self,
        command: impl Into<String>,
        password: Option<&str>,
    ) -> Result<String, Error> {
        let (tx, rx) = oneshot::channel();

        self.enqueue_with(command, password, move |r| {
            let _ = tx.send(r);
        });

        rx.await.map_err(|_| Error::ExecutorStopped)?
    }

    /// Execute a typed command, returning the parsed reply
    ///
    /// Device errors are returned as [Error::UserAborted] or [Error::DeviceReported]
    pub async fn request(&self, command: &Command, password: Option<&str>) -> Result<Reply, Error> {
        debug!("Request: {}", command.name());

        let r = self.execute(command.encode()?, password).await?;
        let reply = Reply::parse(&r)?;

        Ok(reply.into_result()?)
    }

    /// Exchange a raw report through the worker
    pub async fn exchange(&self, payload: Vec<u8>, sizes: ReportSizes) -> Result<Vec<u8>, Error> {
        let (tx, rx) = oneshot::channel();

        self.submit(Job::Raw {
            payload,
            sizes,
            done: Box::new(move |r| {
                let _ = tx.send(r);
            }),
        });

        rx.await.map_err(|_| Error::ExecutorStopped)?
    }

    /// Attach a transport, replacing (and closing) any existing one
    ///
    /// Jobs queued earlier complete on the previous transport
    pub async fn attach(&self, transport: Box<dyn Transport>) -> Result<(), Error> {
        let (done, rx) = oneshot::channel();
        self.submit(Job::Attach { transport, done });
        rx.await.map_err(|_| Error::ExecutorStopped)
    }

    /// Close and drop the current transport
    pub async fn detach(&self) -> Result<(), Error> {
        let (done, rx) = oneshot::channel();
        self.submit(Job::Detach { done });
        rx.await.map_err(|_| Error::ExecutorStopped)
    }

    /// Check whether the worker transport is open
    pub async fn is_open(&self) -> bool {
        let (done, rx) = oneshot::channel();
        self.submit(Job::IsOpen { done });
        rx.await.unwrap_or(false)
    }

    fn submit(&self, job: Job) {
        self.pending.fetch_add(1, Ordering::SeqCst);

        if let Err(mpsc::SendError(job)) = self.tx.send(job) {
            self.pending.fetch_sub(1, Ordering::SeqCst);
            warn!("Executor stopped, rejecting job");
            job.fail(Error::ExecutorStopped);
        }
    }
}

/// Worker loop, exits once every [Executor] handle is dropped
fn worker(
    mut transport: Option<Box<dyn Transport>>,
    rx: mpsc::Receiver<Job>,
    pending: Arc<AtomicUsize>,
) {
    debug!("Executor started");

    while let Ok(job) = rx.recv() {
        match job {
            Job::Command {
                command,
                password,
                done,
            } => {
                let password = password.as_deref().map(String::as_str);

                let r = run_command(&mut transport, &command, password);
                if let Err(e) = &r {
                    debug!("Command failed: {}", e);
                }
                complete(done, r);
            }
            Job::Raw {
                payload,
                sizes,
                done,
            } => {
                let r = match transport.as_mut() {
                    Some(t) => t.exchange(&payload, sizes),
                    None => Err(Error::DeviceNotFound),
                };
                complete(done, r);
            }
            Job::Attach { transport: t, done } => {
                if let Some(mut old) = transport.replace(t) {
                    old.close();
                }
                debug!("Transport attached");
                let _ = done.send(());
            }
            Job::Detach { done } => {
                if let Some(mut old) = transport.take() {
                    old.close();
                    debug!("Transport detached");
                }
                let _ = done.send(());
            }
            Job::IsOpen { done } => {
                let open = transport.as_ref().map(|t| t.is_open()).unwrap_or(false);
                let _ = done.send(open);
            }
        }

        pending.fetch_sub(1, Ordering::SeqCst);
    }

    if let Some(mut t) = transport.take() {
        t.close();
    }

    debug!("Executor stopped");
}

/// Run a single command against the transport
fn run_command(
    transport: &mut Option<Box<dyn Transport>>,
    command: &str,
    password: Option<&str>,
) -> Result<String, Error> {
    let t = transport.as_mut().ok_or(Error::DeviceNotFound)?;

    // Empty passwords send plaintext
    let password = match password {
        Some(p) if !p.is_empty() => p,
        _ => {
            trace!("Sending plaintext command");
            let r = t.send(command.as_bytes())?;
            return reply_string(&r);
        }
    };

    let e = envelope::encrypt(command, password)?;
    let r = t.send(e.as_bytes())?;
    let s = reply_string(&r)?;

    match envelope::decrypt(&s, password) {
        Ok(v) => Ok(v),
        // Device errors may be returned without an envelope
        Err(dbb_core::Error::Decrypt(DecryptError::Envelope))
            if Reply::parse(&s).map(|r| r.error().is_some()).unwrap_or(false) =>
        {
            Ok(s)
        }
        Err(e) => Err(e.into()),
    }
}

/// Extract the reply string from a received report
fn reply_string(r: &[u8]) -> Result<String, Error> {
    String::from_utf8(report::payload(r).to_vec())
        .map_err(|_| Error::UnexpectedResponse("reply is not valid UTF-8".to_string()))
}

/// Invoke a continuation, containing panics to the job
fn complete<T>(done: Box<dyn FnOnce(T) + Send>, v: T) {
    if catch_unwind(AssertUnwindSafe(move || done(v))).is_err() {
        error!("Executor continuation panicked");
    }
}
