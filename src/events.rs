//! Synthesizer control events.
//!
//! The sequencer's only output is a stream of [`Event`] records pushed onto
//! a channel owned by the caller. The synthesizer on the other end is a
//! black box: notes, channel parameters and instrument assignments all
//! travel through this one vocabulary.

use crate::channels::InstrumentDef;

/// Tick counter type. One tick is `60000 / (bpm * granularity)` ms.
pub type Tick = u64;

/// MIDI-style note number (0 = C-1).
pub type Note = i32;

/// What an event instructs the synthesizer to do.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// Cut all sound on every channel.
    SilenceAllChannels,
    /// Start a note: payload `[note, velocity]`.
    NoteOn,
    /// Stop a note: payload `[note]`.
    NoteOff,
    /// Select a General MIDI program: payload `[program]`.
    ProgramChange,
    /// Assign a custom instrument: payload is the descriptor.
    SetInstrument,
    SetTremelo,
    SetReverb,
    SetReverbTime,
    SetReverbFeedback,
    SetLpfCutoff,
    SetHpfCutoff,
    SetChannelVolume,
    SetChannelPanning,
    /// Load a grain source file: payload is the file path.
    SetGrain,
    SetGrainGain,
    SetGrainSize,
    SetGrainBirthRate,
    SetGrainSpread,
    SetGrainSpeed,
    SetGrainDensity,
}

/// Typed payload carried by an [`Event`].
#[derive(Clone, Debug, PartialEq)]
pub enum EventPayload {
    /// No payload (e.g. [`EventKind::SilenceAllChannels`]).
    None,
    /// Small integer vector (notes, velocities, levels).
    Ints(Vec<i32>),
    /// Small float vector (times, rates, gains).
    Floats(Vec<f64>),
    /// A file path or name.
    Text(String),
    /// An instrument descriptor.
    Instrument(InstrumentDef),
}

/// A single instruction for the synthesizer.
#[derive(Clone, Debug, PartialEq)]
pub struct Event {
    pub kind: EventKind,
    /// Logical synth channel, 0-15. Channel 9 is percussion by convention.
    pub channel: u8,
    pub payload: EventPayload,
}

impl Event {
    /// Create an event with no payload.
    pub fn signal(kind: EventKind) -> Self {
        Self {
            kind,
            channel: 0,
            payload: EventPayload::None,
        }
    }

    /// Create an event with an integer-vector payload.
    pub fn ints(kind: EventKind, channel: u8, values: Vec<i32>) -> Self {
        Self {
            kind,
            channel,
            payload: EventPayload::Ints(values),
        }
    }

    /// Create an event with a float-vector payload.
    pub fn floats(kind: EventKind, channel: u8, values: Vec<f64>) -> Self {
        Self {
            kind,
            channel,
            payload: EventPayload::Floats(values),
        }
    }

    /// Create an event with a text payload.
    pub fn text(kind: EventKind, channel: u8, value: impl Into<String>) -> Self {
        Self {
            kind,
            channel,
            payload: EventPayload::Text(value.into()),
        }
    }

    /// Create an event carrying an instrument descriptor.
    pub fn instrument(kind: EventKind, channel: u8, def: InstrumentDef) -> Self {
        Self {
            kind,
            channel,
            payload: EventPayload::Instrument(def),
        }
    }

    /// Shorthand for a `NoteOn` with note and velocity.
    pub fn note_on(channel: u8, note: Note, velocity: i32) -> Self {
        Self::ints(EventKind::NoteOn, channel, vec![note, velocity])
    }

    /// Shorthand for a `NoteOff` for a single note.
    pub fn note_off(channel: u8, note: Note) -> Self {
        Self::ints(EventKind::NoteOff, channel, vec![note])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_note_constructors() {
        let on = Event::note_on(3, 60, 100);
        assert_eq!(on.kind, EventKind::NoteOn);
        assert_eq!(on.channel, 3);
        assert_eq!(on.payload, EventPayload::Ints(vec![60, 100]));

        let off = Event::note_off(3, 60);
        assert_eq!(off.kind, EventKind::NoteOff);
        assert_eq!(off.payload, EventPayload::Ints(vec![60]));
    }

    #[test]
    fn test_signal_has_no_payload() {
        let ev = Event::signal(EventKind::SilenceAllChannels);
        assert_eq!(ev.channel, 0);
        assert_eq!(ev.payload, EventPayload::None);
    }
}
