//! Tactus - a declarative, tick-driven music sequencer core.
//!
//! A YAML document describes channels, tempo and a tree of composable
//! sequence expressions; a tick thread evaluates the tree at a
//! tempo-derived cadence and emits synthesizer control events on a
//! channel. The synthesizer on the other end is a black box.
//!
//! The crate is built from four layers:
//!
//! - **Automations** - pure `tick -> value` functions that parameterise
//!   sequences over time (cycles, ranges, sweeps, fade-ins, chord cycles)
//! - **Sequences** - a closed sum type of emission primitives and
//!   combinators, evaluated once per tick
//! - **Definitions** - the serde schema that compiles a document into a
//!   sequencer, with breadcrumbed all-or-nothing errors
//! - **Runtime** - the soft-realtime tick task: evaluate, drain control
//!   messages, sleep off the tick budget, log underruns
//!
//! # Example
//!
//! ```no_run
//! use crossbeam_channel::unbounded;
//! use tactus::{Runtime, Sequencer};
//!
//! fn main() -> anyhow::Result<()> {
//!     let sequencer = Sequencer::from_file("demos/basic.yaml")?;
//!     let (events_tx, events_rx) = unbounded();
//!     let mut runtime = Runtime::new(sequencer);
//!     let handle = runtime.handle();
//!     runtime.start(events_tx);
//!     for event in events_rx.iter().take(32) {
//!         println!("{event:?}"); // hand these to the synthesizer
//!     }
//!     handle.quit()?;
//!     runtime.join()?;
//!     Ok(())
//! }
//! ```

pub mod automation;
pub mod channels;
pub mod definition;
pub mod errors;
pub mod euclid;
pub mod events;
pub mod runtime;
pub mod sequence;
pub mod sequencer;

// Re-export the main types for convenience.
pub use automation::{FloatAutomation, IntArrayAutomation, IntAutomation};
pub use channels::{ChannelDef, GrainDef, InstrumentDef, PERCUSSION_CHANNEL};
pub use definition::{AutomationDef, DurationDef, SequenceDef, SequencerDef};
pub use errors::CompileError;
pub use euclid::bjorklund;
pub use events::{Event, EventKind, EventPayload, Note, Tick};
pub use runtime::{ControlHandle, Runtime};
pub use sequence::{
    FloatChannelParam, IntChannelParam, NoteOffSchedule, Registers, Sequence, SharedState,
    REGISTER_COUNT,
};
pub use sequencer::{ControlMessage, Sequencer, CONTROL_QUEUE_CAPACITY};

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::unbounded;

    #[test]
    fn test_programmatic_sequencer() {
        let mut seq = Sequencer::new(120.0, 8);
        seq.push_sequence(Sequence::Repeat {
            every: 8,
            body: Box::new(Sequence::PlayNote {
                every: 1,
                duration: 4,
                channel: 0,
                note: IntAutomation::id(60),
                velocity: IntAutomation::id(100),
            }),
        });
        let (tx, rx) = unbounded();
        seq.run_tick(&tx);
        let events: Vec<Event> = rx.try_iter().collect();
        assert_eq!(events[0].kind, EventKind::SilenceAllChannels);
        assert!(events.iter().any(|e| e.kind == EventKind::NoteOn));
    }

    #[test]
    fn test_document_to_events() {
        let doc = "\
bpm: 120
granularity: 8
sequences:
  - euclidian:
      pulses: 3
      over: 8
      duration: Thirtysecond
      sequence:
        play_note: {note: 36, velocity: 100, channel: 9,
                    duration: Thirtysecond, every: Thirtysecond}
";
        let mut seq = Sequencer::from_def(SequencerDef::parse(doc).unwrap()).unwrap();
        let (tx, rx) = unbounded();
        for _ in 0..8 {
            seq.run_tick(&tx);
        }
        let ons = rx.try_iter().filter(|e| e.kind == EventKind::NoteOn).count();
        assert_eq!(ons, 3);
    }

    #[test]
    fn test_control_queue_capacity() {
        let seq = Sequencer::new(120.0, 8);
        let tx = seq.control_sender();
        for _ in 0..CONTROL_QUEUE_CAPACITY {
            tx.try_send(ControlMessage::Forward).unwrap();
        }
        // The queue is bounded; the 33rd message does not fit.
        assert!(tx.try_send(ControlMessage::Forward).is_err());
    }
}
