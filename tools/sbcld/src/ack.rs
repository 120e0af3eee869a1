//! Operator handshakes
//!
//! The AVR-SBC has no flow control; a human types `SERLOAD` before each batch
//! and `RUN` after it. A session asks an [`Acknowledger`] to block until that
//! happened.

use std::fmt;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use crossbeam_channel::{RecvTimeoutError, bounded};
use dialoguer::Input;
use dialoguer::console::style;
use tracing::{debug, warn};

use crate::error::{LoadError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Ack {
    /// Device is in load mode and will accept numbered lines.
    LoadReady,
    /// Device has executed the lines it just received.
    RunComplete,
}

impl Ack {
    /// What the operator types on the device.
    pub fn token(self) -> &'static str {
        match self {
            Ack::LoadReady => "SERLOAD",
            Ack::RunComplete => "RUN",
        }
    }
}

impl fmt::Display for Ack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

pub trait Acknowledger {
    /// Block until `ack` has been given.
    fn wait(&mut self, ack: Ack) -> Result<()>;
}

impl<A: Acknowledger + ?Sized> Acknowledger for &mut A {
    fn wait(&mut self, ack: Ack) -> Result<()> {
        (**self).wait(ack)
    }
}

impl<A: Acknowledger + ?Sized> Acknowledger for Box<A> {
    fn wait(&mut self, ack: Ack) -> Result<()> {
        (**self).wait(ack)
    }
}

/// Asks the operator on the terminal and waits for Enter, however long it takes.
#[derive(Debug, Default, Clone, Copy)]
pub struct PromptAcknowledger;

impl Acknowledger for PromptAcknowledger {
    fn wait(&mut self, ack: Ack) -> Result<()> {
        let prompt = format!(
            "Type {} on the AVR-SBC and press Enter to continue...",
            style(ack.token()).bold()
        );
        Input::<String>::new()
            .with_prompt(prompt)
            .allow_empty(true)
            .interact_text()
            .map_err(|e| LoadError::AckUnavailable(ack, e.to_string()))?;
        Ok(())
    }
}

/// Grants every acknowledgment straight away.
#[derive(Debug, Default, Clone, Copy)]
pub struct Immediate;

impl Acknowledger for Immediate {
    fn wait(&mut self, ack: Ack) -> Result<()> {
        debug!(%ack, "acknowledged");
        Ok(())
    }
}

/// Gives up on an inner acknowledger after `timeout`.
///
/// The inner wait runs on its own thread. On timeout the session fails with
/// [`LoadError::AckTimeout`]; the abandoned wait is left to finish (or not) on
/// its own and any further waits report the acknowledger as busy.
pub struct TimedAcknowledger<A> {
    inner: Arc<Mutex<A>>,
    timeout: Duration,
}

impl<A: Acknowledger + Send + 'static> TimedAcknowledger<A> {
    pub fn new(inner: A, timeout: Duration) -> Self {
        Self {
            inner: Arc::new(Mutex::new(inner)),
            timeout,
        }
    }
}

impl<A: Acknowledger + Send + 'static> Acknowledger for TimedAcknowledger<A> {
    fn wait(&mut self, ack: Ack) -> Result<()> {
        let (tx, rx) = bounded(1);
        let inner = Arc::clone(&self.inner);

        thread::spawn(move || {
            let result = match inner.try_lock() {
                Ok(mut inner) => inner.wait(ack),
                Err(_) => Err(LoadError::AckUnavailable(
                    ack,
                    "a previous wait is still pending".to_string(),
                )),
            };
            // receiver is gone if we timed out
            let _ = tx.send(result);
        });

        match rx.recv_timeout(self.timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => {
                warn!(%ack, timeout = ?self.timeout, "acknowledgment timed out");
                Err(LoadError::AckTimeout {
                    ack,
                    waited: self.timeout,
                })
            }
            Err(RecvTimeoutError::Disconnected) => Err(LoadError::AckUnavailable(
                ack,
                "acknowledger thread panicked".to_string(),
            )),
        }
    }
}
