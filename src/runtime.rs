//! The real-time tick task.
//!
//! [`Runtime`] owns one dedicated thread that drives a [`Sequencer`] at
//! its tempo-derived cadence: evaluate a tick, drain the control queue,
//! then sleep off the remainder of the tick budget. A tick that overruns
//! its budget is logged and the loop continues without sleeping, so tempo
//! drifts forward under load instead of dropping events.
//!
//! The outbound event channel is owned by the caller and assumed to keep
//! up; a full channel blocks the tick task, which backpressures the
//! sequencer rather than dropping events.

use std::thread::{self, JoinHandle};
use std::time::Instant;

use anyhow::{anyhow, Result};
use crossbeam_channel::Sender;

use crate::events::Event;
use crate::sequencer::{ControlMessage, Sequencer};

/// Cloneable sender for control messages to a running sequencer.
#[derive(Clone)]
pub struct ControlHandle {
    tx: Sender<ControlMessage>,
}

impl ControlHandle {
    /// Send a control message. Blocks if the queue is full; fails only
    /// when the tick task is gone.
    pub fn send(&self, msg: ControlMessage) -> Result<()> {
        self.tx
            .send(msg)
            .map_err(|_| anyhow!("sequencer is not running"))
    }

    pub fn restart(&self) -> Result<()> {
        self.send(ControlMessage::Restart)
    }

    pub fn reload(&self) -> Result<()> {
        self.send(ControlMessage::Reload)
    }

    pub fn forward(&self) -> Result<()> {
        self.send(ControlMessage::Forward)
    }

    pub fn backward(&self) -> Result<()> {
        self.send(ControlMessage::Backward)
    }

    pub fn increase_bpm(&self) -> Result<()> {
        self.send(ControlMessage::IncreaseBpm)
    }

    pub fn decrease_bpm(&self) -> Result<()> {
        self.send(ControlMessage::DecreaseBpm)
    }

    pub fn quit(&self) -> Result<()> {
        self.send(ControlMessage::Quit)
    }
}

/// Owns the tick thread for one sequencer.
///
/// `start` is idempotent: the first call spawns the tick task, any later
/// call logs a warning and does nothing. A new engine must be constructed
/// to run again after a quit.
pub struct Runtime {
    sequencer: Option<Sequencer>,
    control_tx: Sender<ControlMessage>,
    thread: Option<JoinHandle<()>>,
    started: bool,
}

impl Runtime {
    /// Wrap a sequencer, ready to start.
    pub fn new(sequencer: Sequencer) -> Self {
        let control_tx = sequencer.control_sender();
        Self {
            sequencer: Some(sequencer),
            control_tx,
            thread: None,
            started: false,
        }
    }

    /// Spawn the tick task, emitting events on `out`.
    pub fn start(&mut self, out: Sender<Event>) {
        if self.started {
            log::warn!("sequencer already started");
            return;
        }
        let Some(sequencer) = self.sequencer.take() else {
            log::warn!("sequencer already started");
            return;
        };
        self.started = true;
        log::info!("starting sequencer");
        self.thread = Some(thread::spawn(move || run_loop(sequencer, out)));
    }

    /// A cloneable handle for sending control messages.
    pub fn handle(&self) -> ControlHandle {
        ControlHandle {
            tx: self.control_tx.clone(),
        }
    }

    /// Ask the tick task to quit and wait for it to finish.
    pub fn quit(&mut self) -> Result<()> {
        let _ = self.handle().quit();
        self.join()
    }

    /// Wait for the tick task to finish.
    pub fn join(&mut self) -> Result<()> {
        match self.thread.take() {
            Some(handle) => handle.join().map_err(|_| anyhow!("tick thread panicked")),
            None => Ok(()),
        }
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        if self.thread.is_some() {
            // try_send: the queue may be full and the thread already gone.
            let _ = self.control_tx.try_send(ControlMessage::Quit);
            let _ = self.join();
        }
    }
}

/// The tick loop. Runs until a quit message arrives.
fn run_loop(mut sequencer: Sequencer, out: Sender<Event>) {
    loop {
        let start = Instant::now();
        sequencer.run_tick(&out);
        if !sequencer.drain_control() {
            log::info!("quitting sequencer");
            return;
        }
        let budget = sequencer.tick_interval();
        let elapsed = start.elapsed();
        if elapsed > budget {
            log::warn!("sequencer underrun: tick took {elapsed:?}, budget {budget:?}");
        } else {
            thread::sleep(budget - elapsed);
        }
    }
}
