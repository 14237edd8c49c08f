//! The composable sequence tree.
//!
//! A [`Sequence`] is a node in a closed sum type: primitives that emit
//! events ([`Sequence::PlayNote`], [`Sequence::PlayNotes`], the channel
//! automations) and combinators that gate or reshape the tick counter for
//! their body ([`Sequence::Repeat`], [`Sequence::Euclidian`],
//! [`Sequence::After`], [`Sequence::Before`], [`Sequence::Offset`],
//! [`Sequence::Combine`]).
//!
//! Evaluation is referentially transparent in `(shared, tick)`: the only
//! effects are events pushed to the outbound channel and note-offs queued
//! in the shared schedule.

use std::collections::BTreeMap;

use crossbeam_channel::Sender;

use crate::automation::{FloatAutomation, IntArrayAutomation, IntAutomation};
use crate::euclid::bjorklund;
use crate::events::{Event, EventKind, Note, Tick};

/// Number of slots in each of the sequencer's register banks.
pub const REGISTER_COUNT: usize = 128;

/// Scratch storage addressable by automations that share state across
/// sequences. Written only from the tick task.
#[derive(Clone, Debug)]
pub struct Registers {
    ints: Vec<i32>,
    int_arrays: Vec<Vec<i32>>,
    floats: Vec<f64>,
}

impl Default for Registers {
    fn default() -> Self {
        Self::new()
    }
}

impl Registers {
    /// Create zeroed register banks.
    pub fn new() -> Self {
        Self {
            ints: vec![0; REGISTER_COUNT],
            int_arrays: vec![Vec::new(); REGISTER_COUNT],
            floats: vec![0.0; REGISTER_COUNT],
        }
    }

    pub fn int(&self, slot: usize) -> i32 {
        self.ints[slot]
    }

    pub fn set_int(&mut self, slot: usize, value: i32) {
        self.ints[slot] = value;
    }

    pub fn int_array(&self, slot: usize) -> &[i32] {
        &self.int_arrays[slot]
    }

    pub fn set_int_array(&mut self, slot: usize, values: Vec<i32>) {
        self.int_arrays[slot] = values;
    }

    pub fn float(&self, slot: usize) -> f64 {
        self.floats[slot]
    }

    pub fn set_float(&mut self, slot: usize, value: f64) {
        self.floats[slot] = value;
    }
}

/// Pending note-offs keyed by the absolute tick they are due.
///
/// `PlayNote` emits its `NoteOn` immediately and queues the matching
/// `NoteOff` here; the engine drains due entries at the start of every
/// tick, so an expiring note is released before a same-tick re-strike.
#[derive(Clone, Debug, Default)]
pub struct NoteOffSchedule {
    due: BTreeMap<Tick, Vec<(u8, Note)>>,
}

impl NoteOffSchedule {
    /// Create an empty schedule.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a note-off for `channel`/`note` at the given absolute tick.
    pub fn schedule(&mut self, at: Tick, channel: u8, note: Note) {
        self.due.entry(at).or_default().push((channel, note));
    }

    /// Emit every note-off due at or before `now`, in schedule order.
    pub fn emit_due(&mut self, now: Tick, out: &Sender<Event>) {
        while let Some((&tick, _)) = self.due.first_key_value() {
            if tick > now {
                break;
            }
            let offs = self.due.remove(&tick).unwrap_or_default();
            for (channel, note) in offs {
                let _ = out.send(Event::note_off(channel, note));
            }
        }
    }

    /// Drop every pending note-off.
    pub fn clear(&mut self) {
        self.due.clear();
    }

    /// Number of ticks with pending note-offs.
    pub fn len(&self) -> usize {
        self.due.len()
    }

    /// True when nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.due.is_empty()
    }
}

/// Mutable state visible to every sequence node during a tick.
#[derive(Clone, Debug, Default)]
pub struct SharedState {
    pub registers: Registers,
    pub note_offs: NoteOffSchedule,
}

impl SharedState {
    /// Create fresh shared state.
    pub fn new() -> Self {
        Self::default()
    }
}

/// Integer-valued channel parameters a sequence can automate.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IntChannelParam {
    Panning,
    Reverb,
    Tremelo,
    LpfCutoff,
    Volume,
}

impl IntChannelParam {
    fn event_kind(self) -> EventKind {
        match self {
            IntChannelParam::Panning => EventKind::SetChannelPanning,
            IntChannelParam::Reverb => EventKind::SetReverb,
            IntChannelParam::Tremelo => EventKind::SetTremelo,
            IntChannelParam::LpfCutoff => EventKind::SetLpfCutoff,
            IntChannelParam::Volume => EventKind::SetChannelVolume,
        }
    }
}

/// Float-valued channel parameters a sequence can automate.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FloatChannelParam {
    ReverbTime,
    GrainSize,
    GrainBirthRate,
    GrainSpread,
    GrainSpeed,
}

impl FloatChannelParam {
    fn event_kind(self) -> EventKind {
        match self {
            FloatChannelParam::ReverbTime => EventKind::SetReverbTime,
            FloatChannelParam::GrainSize => EventKind::SetGrainSize,
            FloatChannelParam::GrainBirthRate => EventKind::SetGrainBirthRate,
            FloatChannelParam::GrainSpread => EventKind::SetGrainSpread,
            FloatChannelParam::GrainSpeed => EventKind::SetGrainSpeed,
        }
    }
}

/// A node in the emission tree. Invoked once per tick.
///
/// `counter` is the (possibly offset-shifted) tick the node reasons about;
/// `now` is the absolute tick used for note-off scheduling. Top-level
/// sequences are invoked with both set to the engine time.
#[derive(Clone, Debug)]
pub enum Sequence {
    /// Invoke `body` on every tick where `counter % every == 0`.
    Repeat { every: Tick, body: Box<Sequence> },
    /// Invoke `body` on the Bjorklund-distributed slots of a repeating
    /// period of `pattern.len() * duration` ticks.
    Euclidian {
        pattern: Vec<bool>,
        duration: Tick,
        body: Box<Sequence>,
    },
    /// Emit a `NoteOn` every `every`-aligned tick and queue the matching
    /// `NoteOff` after `duration` ticks.
    PlayNote {
        every: Tick,
        duration: Tick,
        channel: u8,
        note: IntAutomation,
        velocity: IntAutomation,
    },
    /// As `PlayNote`, but one on/off pair per element of the chord.
    PlayNotes {
        every: Tick,
        duration: Tick,
        channel: u8,
        notes: IntArrayAutomation,
        velocity: IntAutomation,
    },
    /// Emit an integer parameter event every tick.
    IntChannelAutomation {
        channel: u8,
        param: IntChannelParam,
        automation: IntAutomation,
    },
    /// Emit a float parameter event every tick.
    FloatChannelAutomation {
        channel: u8,
        param: FloatChannelParam,
        automation: FloatAutomation,
    },
    /// Gate `body` to ticks at or after `offset`.
    After { offset: Tick, body: Box<Sequence> },
    /// Gate `body` to ticks before `limit`.
    Before { limit: Tick, body: Box<Sequence> },
    /// Evaluate `body` with the counter shifted back by `delta`; inert
    /// before `delta`. The emission tick stays absolute.
    Offset { delta: Tick, body: Box<Sequence> },
    /// Evaluate each child in order with the same tick.
    Combine(Vec<Sequence>),
}

impl Sequence {
    /// Build a `Euclidian` node, precompiling the pulse distribution of
    /// `pulses` over `over` slots.
    pub fn euclidian(pulses: usize, over: usize, duration: Tick, body: Sequence) -> Self {
        Sequence::Euclidian {
            pattern: bjorklund(pulses, over),
            duration,
            body: Box::new(body),
        }
    }

    /// Evaluate this node for one tick.
    pub fn run(&self, shared: &mut SharedState, counter: Tick, now: Tick, out: &Sender<Event>) {
        match self {
            Sequence::Repeat { every, body } => {
                if *every > 0 && counter % every == 0 {
                    body.run(shared, counter, now, out);
                }
            }
            Sequence::Euclidian {
                pattern,
                duration,
                body,
            } => {
                if pattern.is_empty() || *duration == 0 {
                    return;
                }
                let period = pattern.len() as u64 * duration;
                let phase = counter % period;
                if phase % duration == 0 && pattern[(phase / duration) as usize] {
                    body.run(shared, counter, now, out);
                }
            }
            Sequence::PlayNote {
                every,
                duration,
                channel,
                note,
                velocity,
            } => {
                if *every > 0 && counter % every == 0 {
                    let n = note.at(counter);
                    let v = velocity.at(counter);
                    let _ = out.send(Event::note_on(*channel, n, v));
                    shared.note_offs.schedule(now + duration, *channel, n);
                }
            }
            Sequence::PlayNotes {
                every,
                duration,
                channel,
                notes,
                velocity,
            } => {
                if *every > 0 && counter % every == 0 {
                    let v = velocity.at(counter);
                    for &n in notes.at(counter) {
                        let _ = out.send(Event::note_on(*channel, n, v));
                        shared.note_offs.schedule(now + duration, *channel, n);
                    }
                }
            }
            Sequence::IntChannelAutomation {
                channel,
                param,
                automation,
            } => {
                let value = automation.at(counter);
                let _ = out.send(Event::ints(param.event_kind(), *channel, vec![value]));
            }
            Sequence::FloatChannelAutomation {
                channel,
                param,
                automation,
            } => {
                let value = automation.at(counter);
                let _ = out.send(Event::floats(param.event_kind(), *channel, vec![value]));
            }
            Sequence::After { offset, body } => {
                if counter >= *offset {
                    body.run(shared, counter, now, out);
                }
            }
            Sequence::Before { limit, body } => {
                if counter < *limit {
                    body.run(shared, counter, now, out);
                }
            }
            Sequence::Offset { delta, body } => {
                if counter >= *delta {
                    body.run(shared, counter - delta, now, out);
                }
            }
            Sequence::Combine(children) => {
                for child in children {
                    child.run(shared, counter, now, out);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventPayload;
    use crossbeam_channel::unbounded;

    fn play_note(every: Tick, duration: Tick, note: i32, velocity: i32) -> Sequence {
        Sequence::PlayNote {
            every,
            duration,
            channel: 0,
            note: IntAutomation::id(note),
            velocity: IntAutomation::id(velocity),
        }
    }

    /// Drive a tree for `ticks` ticks the way the engine does: due
    /// note-offs first, then the tree. Returns (tick, event) pairs.
    fn collect(seq: &Sequence, ticks: Tick) -> Vec<(Tick, Event)> {
        let (tx, rx) = unbounded();
        let mut shared = SharedState::new();
        let mut log = Vec::new();
        for t in 0..ticks {
            shared.note_offs.emit_due(t, &tx);
            seq.run(&mut shared, t, t, &tx);
            while let Ok(ev) = rx.try_recv() {
                log.push((t, ev));
            }
        }
        log
    }

    #[test]
    fn test_repeat_play_note_pairing() {
        let seq = Sequence::Repeat {
            every: 4,
            body: Box::new(play_note(1, 2, 60, 100)),
        };
        let log = collect(&seq, 12);
        let ons: Vec<Tick> = log
            .iter()
            .filter(|(_, e)| e.kind == EventKind::NoteOn)
            .map(|(t, _)| *t)
            .collect();
        let offs: Vec<Tick> = log
            .iter()
            .filter(|(_, e)| e.kind == EventKind::NoteOff)
            .map(|(t, _)| *t)
            .collect();
        assert_eq!(ons, vec![0, 4, 8]);
        assert_eq!(offs, vec![2, 6, 10]);
        for (_, ev) in log.iter().filter(|(_, e)| e.kind == EventKind::NoteOn) {
            assert_eq!(ev.payload, EventPayload::Ints(vec![60, 100]));
        }
    }

    #[test]
    fn test_combine_preserves_child_order() {
        // Durations beyond the window keep note-offs out of the logs, so
        // the per-tick emissions are purely the tree's.
        let a = play_note(1, 10, 10, 50);
        let b = play_note(1, 10, 20, 50);
        let combined = Sequence::Combine(vec![a.clone(), b.clone()]);

        let log_a = collect(&a, 3);
        let log_b = collect(&b, 3);
        let log_ab = collect(&combined, 3);

        // Per tick, the combined log is A's emissions followed by B's.
        for t in 0..3u64 {
            let per_tick: Vec<&Event> =
                log_ab.iter().filter(|(tt, _)| *tt == t).map(|(_, e)| e).collect();
            let expect: Vec<&Event> = log_a
                .iter()
                .filter(|(tt, _)| *tt == t)
                .chain(log_b.iter().filter(|(tt, _)| *tt == t))
                .map(|(_, e)| e)
                .collect();
            assert_eq!(per_tick, expect, "tick {t}");
        }
    }

    #[test]
    fn test_offset_shifts_alignment() {
        let seq = Sequence::Offset {
            delta: 10,
            body: Box::new(play_note(4, 1, 60, 80)),
        };
        let log = collect(&seq, 20);
        let ons: Vec<Tick> = log
            .iter()
            .filter(|(_, e)| e.kind == EventKind::NoteOn)
            .map(|(t, _)| *t)
            .collect();
        assert_eq!(ons, vec![10, 14, 18]);
    }

    #[test]
    fn test_before_cuts_off() {
        let seq = Sequence::Before {
            limit: 5,
            body: Box::new(play_note(1, 1, 60, 1)),
        };
        let log = collect(&seq, 20);
        let ons: Vec<Tick> = log
            .iter()
            .filter(|(_, e)| e.kind == EventKind::NoteOn)
            .map(|(t, _)| *t)
            .collect();
        assert_eq!(ons, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_after_gates_start() {
        let seq = Sequence::After {
            offset: 8,
            body: Box::new(play_note(4, 1, 60, 1)),
        };
        let log = collect(&seq, 17);
        let ons: Vec<Tick> = log
            .iter()
            .filter(|(_, e)| e.kind == EventKind::NoteOn)
            .map(|(t, _)| *t)
            .collect();
        // After passes the counter through unchanged, so alignment holds.
        assert_eq!(ons, vec![8, 12, 16]);
    }

    #[test]
    fn test_euclidian_three_over_eight() {
        let seq = Sequence::euclidian(3, 8, 1, play_note(1, 1, 42, 9));
        let log = collect(&seq, 16);
        let ons: Vec<Tick> = log
            .iter()
            .filter(|(_, e)| e.kind == EventKind::NoteOn)
            .map(|(t, _)| *t)
            .collect();
        assert_eq!(ons, vec![0, 3, 6, 8, 11, 14]);
    }

    #[test]
    fn test_euclidian_slot_duration() {
        // Two-tick slots: pulses fire on slot boundaries only.
        let seq = Sequence::euclidian(3, 8, 2, play_note(1, 1, 42, 9));
        let log = collect(&seq, 16);
        let ons: Vec<Tick> = log
            .iter()
            .filter(|(_, e)| e.kind == EventKind::NoteOn)
            .map(|(t, _)| *t)
            .collect();
        assert_eq!(ons, vec![0, 6, 12]);
    }

    #[test]
    fn test_play_notes_chord() {
        let seq = Sequence::PlayNotes {
            every: 4,
            duration: 2,
            channel: 1,
            notes: IntArrayAutomation::id(vec![60, 64, 67]),
            velocity: IntAutomation::id(90),
        };
        let log = collect(&seq, 4);
        let ons: Vec<&Event> = log
            .iter()
            .filter(|(_, e)| e.kind == EventKind::NoteOn)
            .map(|(_, e)| e)
            .collect();
        assert_eq!(ons.len(), 3);
        assert_eq!(ons[0].payload, EventPayload::Ints(vec![60, 90]));
        assert_eq!(ons[2].payload, EventPayload::Ints(vec![67, 90]));
        let offs: Vec<(Tick, &Event)> = log
            .iter()
            .filter(|(_, e)| e.kind == EventKind::NoteOff)
            .map(|(t, e)| (*t, e))
            .collect();
        assert_eq!(offs.len(), 3);
        assert!(offs.iter().all(|(t, _)| *t == 2));
    }

    #[test]
    fn test_channel_automation_emits_every_tick() {
        let seq = Sequence::IntChannelAutomation {
            channel: 2,
            param: IntChannelParam::Panning,
            automation: IntAutomation::cycle(vec![0, 64, 127]).unwrap(),
        };
        let log = collect(&seq, 6);
        assert_eq!(log.len(), 6);
        assert!(log
            .iter()
            .all(|(_, e)| e.kind == EventKind::SetChannelPanning && e.channel == 2));
        assert_eq!(log[1].1.payload, EventPayload::Ints(vec![64]));
        assert_eq!(log[5].1.payload, EventPayload::Ints(vec![127]));
    }

    #[test]
    fn test_float_automation_payload() {
        let seq = Sequence::FloatChannelAutomation {
            channel: 0,
            param: FloatChannelParam::GrainSize,
            automation: FloatAutomation::back_and_forth(vec![0.1, 0.2]).unwrap(),
        };
        let log = collect(&seq, 2);
        assert_eq!(log[0].1.kind, EventKind::SetGrainSize);
        assert_eq!(log[0].1.payload, EventPayload::Floats(vec![0.1]));
        assert_eq!(log[1].1.payload, EventPayload::Floats(vec![0.2]));
    }

    #[test]
    fn test_registers_round_trip() {
        let mut shared = SharedState::new();
        shared.registers.set_int(5, -3);
        shared.registers.set_float(7, 0.25);
        shared.registers.set_int_array(0, vec![1, 2, 3]);
        assert_eq!(shared.registers.int(5), -3);
        assert_eq!(shared.registers.float(7), 0.25);
        assert_eq!(shared.registers.int_array(0), &[1, 2, 3]);
        assert_eq!(shared.registers.int(6), 0);
    }
}
