//! The sequencer state machine.
//!
//! A [`Sequencer`] owns everything a tick needs: tempo, granularity, the
//! compiled sequence tree, the initial channel setup, the register banks
//! and the pending note-off schedule. It is deliberately free of threads
//! and clocks - [`Sequencer::run_tick`] advances exactly one tick, and
//! [`Sequencer::handle_control`] applies exactly one control message, so
//! the whole machine can be driven deterministically (tests, offline
//! rendering) or paced in real time by [`crate::runtime::Runtime`].

use std::path::{Path, PathBuf};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, Sender};

use crate::channels::{note_duration_seconds, ChannelDef, PERCUSSION_CHANNEL};
use crate::definition::SequencerDef;
use crate::errors::Result;
use crate::events::{Event, EventKind, Tick};
use crate::sequence::{Sequence, SharedState};

/// Capacity of the inbound control queue.
pub const CONTROL_QUEUE_CAPACITY: usize = 32;

/// Control messages accepted by a running sequencer.
///
/// Messages are drained non-blockingly once per tick, in FIFO order, and
/// take effect between ticks - never mid-tick.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ControlMessage {
    /// Rewind to tick 0 (re-runs the channel setup on the next tick).
    Restart,
    /// Re-parse the source document and swap the compiled state wholesale.
    Reload,
    /// Jump forward 16 beats.
    Forward,
    /// Jump backward 16 beats, clamped at tick 0.
    Backward,
    /// Raise the tempo by 10 BPM.
    IncreaseBpm,
    /// Lower the tempo by 10 BPM, floored at 1.
    DecreaseBpm,
    /// Terminate the tick task.
    Quit,
}

/// Tick-driven sequencer state.
pub struct Sequencer {
    /// Beats per minute. Positive.
    pub bpm: f64,
    /// Ticks per quarter note. Positive.
    pub granularity: u32,
    time: Tick,
    sequences: Vec<Sequence>,
    initial_channel_setup: Vec<ChannelDef>,
    from_file: Option<PathBuf>,
    shared: SharedState,
    control_tx: Sender<ControlMessage>,
    control_rx: Receiver<ControlMessage>,
}

impl Sequencer {
    /// Create an empty sequencer at the given tempo and granularity.
    pub fn new(bpm: f64, granularity: u32) -> Self {
        let (control_tx, control_rx) = bounded(CONTROL_QUEUE_CAPACITY);
        Self {
            bpm,
            granularity,
            time: 0,
            sequences: Vec::new(),
            initial_channel_setup: Vec::new(),
            from_file: None,
            shared: SharedState::new(),
            control_tx,
            control_rx,
        }
    }

    /// Build a sequencer from a parsed definition document.
    pub fn from_def(def: SequencerDef) -> Result<Self> {
        let sequences = def.compile()?;
        let mut seq = Self::new(def.bpm, def.granularity);
        seq.sequences = sequences;
        seq.initial_channel_setup = def.channels;
        Ok(seq)
    }

    /// Load, compile and remember a definition file. The path is kept so
    /// [`ControlMessage::Reload`] can re-parse it later.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let def = SequencerDef::from_file(path)?;
        let mut seq = Self::from_def(def)?;
        seq.from_file = Some(path.to_path_buf());
        Ok(seq)
    }

    /// Append a top-level sequence.
    pub fn push_sequence(&mut self, sequence: Sequence) {
        self.sequences.push(sequence);
    }

    /// Replace the initial channel setup.
    pub fn set_channel_setup(&mut self, channels: Vec<ChannelDef>) {
        self.initial_channel_setup = channels;
    }

    /// Current tick counter.
    pub fn time(&self) -> Tick {
        self.time
    }

    /// Sender half of the control queue.
    pub fn control_sender(&self) -> Sender<ControlMessage> {
        self.control_tx.clone()
    }

    /// Receiver half of the control queue, for the tick task.
    pub(crate) fn control_receiver(&self) -> Receiver<ControlMessage> {
        self.control_rx.clone()
    }

    /// Register banks shared across sequences.
    pub fn registers(&self) -> &crate::sequence::Registers {
        &self.shared.registers
    }

    /// Mutable register banks. Only the tick task may hold this.
    pub fn registers_mut(&mut self) -> &mut crate::sequence::Registers {
        &mut self.shared.registers
    }

    /// Nominal wall-clock duration of one tick at the current tempo.
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs_f64(60.0 / (self.bpm * self.granularity as f64))
    }

    /// Evaluate one tick: tick-0 setup if due, released notes, then every
    /// top-level sequence in declared order. Increments the tick counter.
    pub fn run_tick(&mut self, out: &Sender<Event>) {
        if self.time == 0 {
            let _ = out.send(Event::signal(EventKind::SilenceAllChannels));
            self.shared.note_offs.clear();
            self.apply_channel_setup(out);
        }
        self.shared.note_offs.emit_due(self.time, out);
        for sequence in &self.sequences {
            sequence.run(&mut self.shared, self.time, self.time, out);
        }
        self.time += 1;
    }

    /// Drain the control queue without blocking. Returns `false` when a
    /// quit was seen; messages queued behind a quit are discarded.
    pub fn drain_control(&mut self) -> bool {
        let rx = self.control_rx.clone();
        while let Ok(msg) = rx.try_recv() {
            if !self.handle_control(msg) {
                return false;
            }
        }
        true
    }

    /// Apply a single control message. Returns `false` on `Quit`.
    pub fn handle_control(&mut self, msg: ControlMessage) -> bool {
        match msg {
            ControlMessage::Restart => {
                self.time = 0;
                self.shared.note_offs.clear();
                log::info!("restarting sequencer");
            }
            ControlMessage::Reload => self.reload(),
            ControlMessage::Forward => {
                self.time += self.granularity as u64 * 16;
                log::info!("t = {}", self.time);
            }
            ControlMessage::Backward => {
                self.time = self.time.saturating_sub(self.granularity as u64 * 16);
                log::info!("t = {}", self.time);
            }
            ControlMessage::IncreaseBpm => {
                self.bpm += 10.0;
                log::info!("bpm = {}", self.bpm);
            }
            ControlMessage::DecreaseBpm => {
                self.bpm = (self.bpm - 10.0).max(1.0);
                log::info!("bpm = {}", self.bpm);
            }
            ControlMessage::Quit => return false,
        }
        true
    }

    /// Re-parse the source document and swap in the new state. A failed
    /// reload logs and leaves the current state untouched.
    fn reload(&mut self) {
        let Some(path) = self.from_file.clone() else {
            log::warn!("reload requested but sequencer was not loaded from a file");
            return;
        };
        log::info!("reloading {}", path.display());
        let def = match SequencerDef::from_file(&path) {
            Ok(def) => def,
            Err(err) => {
                log::error!("failed to reload sequencer: {err}");
                return;
            }
        };
        let sequences = match def.compile() {
            Ok(sequences) => sequences,
            Err(err) => {
                log::error!("failed to reload sequencer: {err}");
                return;
            }
        };
        self.bpm = def.bpm;
        self.granularity = def.granularity;
        self.initial_channel_setup = def.channels;
        self.sequences = sequences;
        self.time = 0;
        self.shared.note_offs.clear();
    }

    /// Emit the full channel parameter snapshot and instrument
    /// assignments. Runs at tick 0 and again after a restart or reload.
    fn apply_channel_setup(&self, out: &Sender<Event>) {
        for def in &self.initial_channel_setup {
            let ch = def.channel;
            // Percussion instruments are indexed by note number, so the
            // percussion channel never gets an instrument assignment.
            if ch != PERCUSSION_CHANNEL {
                match &def.generator {
                    Some(generator) => match generator.validate() {
                        Ok(()) => {
                            let _ = out.send(Event::instrument(
                                EventKind::SetInstrument,
                                ch,
                                generator.clone(),
                            ));
                        }
                        Err(err) => {
                            log::warn!("failed to load generator for channel {ch}: {err}");
                        }
                    },
                    None => {
                        let _ = out.send(Event::ints(
                            EventKind::ProgramChange,
                            ch,
                            vec![def.instrument],
                        ));
                    }
                }
            }
            let _ = out.send(Event::ints(EventKind::SetTremelo, ch, vec![def.tremelo]));
            let _ = out.send(Event::ints(EventKind::SetReverb, ch, vec![def.reverb]));
            let _ = out.send(Event::ints(EventKind::SetLpfCutoff, ch, vec![def.lpf_cutoff]));
            let _ = out.send(Event::ints(EventKind::SetHpfCutoff, ch, vec![def.hpf_cutoff]));
            let _ = out.send(Event::ints(EventKind::SetChannelVolume, ch, vec![def.volume]));
            let _ = out.send(Event::ints(EventKind::SetChannelPanning, ch, vec![def.panning]));
            let _ = out.send(Event::floats(
                EventKind::SetReverbFeedback,
                ch,
                vec![def.reverb_feedback],
            ));
            if let Some(token) = &def.reverb_time {
                match note_duration_seconds(token, self.bpm) {
                    Ok(seconds) => {
                        let _ = out.send(Event::floats(EventKind::SetReverbTime, ch, vec![seconds]));
                    }
                    Err(err) => log::warn!("invalid reverb time on channel {ch}: {err}"),
                }
            }
            if let Some(grain) = &def.grain {
                let _ = out.send(Event::text(EventKind::SetGrain, ch, grain.file.clone()));
                let _ = out.send(Event::floats(EventKind::SetGrainGain, ch, vec![grain.gain]));
                let _ = out.send(Event::floats(EventKind::SetGrainSize, ch, vec![grain.grain_size]));
                let _ = out.send(Event::floats(
                    EventKind::SetGrainBirthRate,
                    ch,
                    vec![grain.birth_rate],
                ));
                let _ = out.send(Event::floats(EventKind::SetGrainSpread, ch, vec![grain.spread]));
                let _ = out.send(Event::floats(EventKind::SetGrainSpeed, ch, vec![grain.speed]));
                let _ = out.send(Event::ints(EventKind::SetGrainDensity, ch, vec![grain.density]));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventPayload;
    use crossbeam_channel::unbounded;
    use std::io::Write;

    const BASIC: &str = include_str!("../demos/basic.yaml");

    fn basic_sequencer() -> Sequencer {
        Sequencer::from_def(SequencerDef::parse(BASIC).unwrap()).unwrap()
    }

    /// Run `ticks` ticks and return (tick, event) pairs.
    fn collect(seq: &mut Sequencer, ticks: u64) -> Vec<(Tick, Event)> {
        let (tx, rx) = unbounded();
        let mut log = Vec::new();
        for _ in 0..ticks {
            let t = seq.time();
            seq.run_tick(&tx);
            while let Ok(ev) = rx.try_recv() {
                log.push((t, ev));
            }
        }
        log
    }

    fn notes(log: &[(Tick, Event)]) -> Vec<(Tick, EventKind)> {
        log.iter()
            .filter(|(_, e)| matches!(e.kind, EventKind::NoteOn | EventKind::NoteOff))
            .map(|(t, e)| (*t, e.kind))
            .collect()
    }

    #[test]
    fn test_first_event_is_silence() {
        let mut seq = basic_sequencer();
        let log = collect(&mut seq, 1);
        assert_eq!(log[0].1.kind, EventKind::SilenceAllChannels);
    }

    #[test]
    fn test_setup_snapshot_order() {
        let mut seq = basic_sequencer();
        let log = collect(&mut seq, 1);
        let kinds: Vec<EventKind> = log.iter().map(|(_, e)| e.kind).collect();
        assert_eq!(
            &kinds[..9],
            &[
                EventKind::SilenceAllChannels,
                EventKind::ProgramChange,
                EventKind::SetTremelo,
                EventKind::SetReverb,
                EventKind::SetLpfCutoff,
                EventKind::SetHpfCutoff,
                EventKind::SetChannelVolume,
                EventKind::SetChannelPanning,
                EventKind::SetReverbFeedback,
            ]
        );
    }

    #[test]
    fn test_end_to_end_scenario() {
        // bpm 60, granularity 4: a quarter-note repeat of an eighth-note
        // C4 gives on/off pairs two ticks apart.
        let mut seq = basic_sequencer();
        let log = collect(&mut seq, 9);
        assert_eq!(
            notes(&log),
            vec![
                (0, EventKind::NoteOn),
                (2, EventKind::NoteOff),
                (4, EventKind::NoteOn),
                (6, EventKind::NoteOff),
                (8, EventKind::NoteOn),
            ]
        );
        let first_on = log
            .iter()
            .find(|(_, e)| e.kind == EventKind::NoteOn)
            .unwrap();
        assert_eq!(first_on.1.payload, EventPayload::Ints(vec![60, 100]));
        assert_eq!(first_on.1.channel, 0);
    }

    #[test]
    fn test_restart_resets_and_reruns_setup() {
        let mut seq = basic_sequencer();
        collect(&mut seq, 3);
        assert_eq!(seq.time(), 3);
        assert!(seq.handle_control(ControlMessage::Restart));
        assert_eq!(seq.time(), 0);
        let log = collect(&mut seq, 1);
        assert_eq!(log[0].1.kind, EventKind::SilenceAllChannels);
    }

    #[test]
    fn test_forward_backward() {
        let mut seq = basic_sequencer();
        collect(&mut seq, 2);
        seq.handle_control(ControlMessage::Forward);
        assert_eq!(seq.time(), 2 + 16 * 4);
        seq.handle_control(ControlMessage::Backward);
        assert_eq!(seq.time(), 2);
        seq.handle_control(ControlMessage::Backward);
        assert_eq!(seq.time(), 0);
    }

    #[test]
    fn test_bpm_stepping_changes_tick_interval() {
        let mut seq = Sequencer::new(120.0, 4);
        assert_eq!(seq.tick_interval(), Duration::from_millis(125));
        seq.handle_control(ControlMessage::IncreaseBpm);
        assert_eq!(seq.bpm, 130.0);
        assert!(seq.tick_interval() < Duration::from_millis(125));
        for _ in 0..20 {
            seq.handle_control(ControlMessage::DecreaseBpm);
        }
        assert_eq!(seq.bpm, 1.0);
    }

    #[test]
    fn test_drain_control_fifo_and_quit() {
        let mut seq = basic_sequencer();
        let tx = seq.control_sender();
        tx.send(ControlMessage::IncreaseBpm).unwrap();
        tx.send(ControlMessage::Quit).unwrap();
        tx.send(ControlMessage::IncreaseBpm).unwrap();
        assert!(!seq.drain_control());
        // The message behind the quit was discarded with the engine.
        assert_eq!(seq.bpm, 70.0);
    }

    #[test]
    fn test_reload_swaps_state() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(BASIC.as_bytes()).unwrap();
        file.flush().unwrap();

        let mut seq = Sequencer::from_file(file.path()).unwrap();
        collect(&mut seq, 5);
        assert_eq!(seq.bpm, 60.0);

        let faster = BASIC.replace("bpm: 60", "bpm: 90");
        std::fs::write(file.path(), faster).unwrap();
        seq.handle_control(ControlMessage::Reload);
        assert_eq!(seq.bpm, 90.0);
        assert_eq!(seq.time(), 0);
    }

    #[test]
    fn test_reload_without_source_file_keeps_state() {
        // Built from a parsed def, not a file: nothing to re-parse, so
        // the reload is a no-op failure and leaves state intact.
        let mut seq = basic_sequencer();
        collect(&mut seq, 5);
        seq.handle_control(ControlMessage::Reload);
        assert_eq!(seq.time(), 5);
        assert_eq!(seq.bpm, 60.0);
    }

    #[test]
    fn test_failed_reload_keeps_state() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(BASIC.as_bytes()).unwrap();
        file.flush().unwrap();

        let mut seq = Sequencer::from_file(file.path()).unwrap();
        collect(&mut seq, 5);

        std::fs::write(file.path(), "bpm: [broken").unwrap();
        seq.handle_control(ControlMessage::Reload);
        assert_eq!(seq.bpm, 60.0);
        assert_eq!(seq.time(), 5);
        let log = collect(&mut seq, 4);
        // Still playing: the tick-6 note-off from the tick-4 strike.
        assert!(notes(&log).contains(&(6, EventKind::NoteOff)));
    }

    #[test]
    fn test_setup_skips_percussion_instrument() {
        let mut seq = Sequencer::new(120.0, 8);
        seq.set_channel_setup(vec![
            ChannelDef {
                channel: 9,
                instrument: 40,
                ..Default::default()
            },
            ChannelDef {
                channel: 1,
                instrument: 40,
                ..Default::default()
            },
        ]);
        let log = collect(&mut seq, 1);
        let programs: Vec<u8> = log
            .iter()
            .filter(|(_, e)| e.kind == EventKind::ProgramChange)
            .map(|(_, e)| e.channel)
            .collect();
        assert_eq!(programs, vec![1]);
        // The rest of the percussion snapshot is still emitted.
        assert!(log
            .iter()
            .any(|(_, e)| e.kind == EventKind::SetChannelVolume && e.channel == 9));
    }

    #[test]
    fn test_grain_setup_events() {
        let yaml = "\
channel: 4
grain:
  file: rain.wav
  gain: 0.9
  grain_size: 0.1
  birth_rate: 20.0
  spread: 0.5
  speed: 1.0
  density: 3
";
        let def: ChannelDef = serde_yaml::from_str(yaml).unwrap();
        let mut seq = Sequencer::new(120.0, 8);
        seq.set_channel_setup(vec![def]);
        let log = collect(&mut seq, 1);
        let kinds: Vec<EventKind> = log
            .iter()
            .filter(|(_, e)| e.channel == 4)
            .map(|(_, e)| e.kind)
            .collect();
        let grain_start = kinds
            .iter()
            .position(|k| *k == EventKind::SetGrain)
            .unwrap();
        assert_eq!(
            &kinds[grain_start..],
            &[
                EventKind::SetGrain,
                EventKind::SetGrainGain,
                EventKind::SetGrainSize,
                EventKind::SetGrainBirthRate,
                EventKind::SetGrainSpread,
                EventKind::SetGrainSpeed,
                EventKind::SetGrainDensity,
            ]
        );
        assert!(log
            .iter()
            .any(|(_, e)| e.payload == EventPayload::Text("rain.wav".to_string())));
    }

    #[test]
    fn test_invalid_reverb_time_is_skipped() {
        let mut seq = Sequencer::new(120.0, 8);
        seq.set_channel_setup(vec![ChannelDef {
            channel: 0,
            reverb_time: Some("Eleventh".to_string()),
            ..Default::default()
        }]);
        let log = collect(&mut seq, 1);
        assert!(!log.iter().any(|(_, e)| e.kind == EventKind::SetReverbTime));
        // Setup continued past the bad field.
        assert!(log.iter().any(|(_, e)| e.kind == EventKind::SetChannelPanning));
    }
}
