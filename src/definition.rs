//! The definition document schema and its compilation.
//!
//! A sequencer is described by a YAML document: tempo, granularity, channel
//! setup and a list of sequence expressions. Every union in the schema
//! ("exactly one of") is a struct of `Option` fields validated at compile
//! time, so a document that sets zero or two variants fails with the
//! offending tags named.
//!
//! Compilation is a pure transformation from the parsed document into a
//! [`Sequence`] tree closing over pre-built automations. It is
//! all-or-nothing: the first error aborts the build, wrapped with a
//! breadcrumb path like `sequence[3] > combine > play_note > missing note
//! or auto_note`.

use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::automation::{FloatAutomation, IntArrayAutomation, IntAutomation};
use crate::channels::ChannelDef;
use crate::errors::{CompileError, Result};
use crate::events::Tick;
use crate::sequence::{FloatChannelParam, IntChannelParam, Sequence};

/// A duration expressed in the document: a note-value token, a whole
/// number of beats, or a fractional number of beats.
#[derive(Clone, Debug, Deserialize)]
#[serde(untagged)]
pub enum DurationDef {
    /// Whole beats; one beat is `granularity` ticks.
    Beats(i64),
    /// Fractional beats, floored to ticks.
    Fraction(f64),
    /// A note-value token: `Whole`, `Half`, `Quarter`, `Eight`,
    /// `Sixteenth` or `Thirtysecond`.
    Note(String),
}

impl DurationDef {
    /// Resolve to a tick count for the given granularity.
    pub fn resolve(&self, granularity: u32) -> Result<Tick> {
        let g = granularity as u64;
        match self {
            DurationDef::Note(token) => match token.as_str() {
                "Whole" => Ok(g * 4),
                "Half" => Ok(g * 2),
                "Quarter" => Ok(g),
                "Eight" => Ok(g / 2),
                "Sixteenth" => Ok(g / 4),
                "Thirtysecond" => Ok(g / 8),
                _ => Err(CompileError::UnknownDuration(token.clone())),
            },
            DurationDef::Beats(n) => {
                if *n < 0 {
                    return Err(CompileError::InvalidDuration(*n as f64));
                }
                Ok(*n as u64 * g)
            }
            DurationDef::Fraction(x) => {
                if *x < 0.0 || !x.is_finite() {
                    return Err(CompileError::InvalidDuration(*x));
                }
                Ok((x * granularity as f64).floor() as u64)
            }
        }
    }
}

/// Range parameters shared by `range`, `sweep` and `fade_in`.
#[derive(Clone, Debug, Deserialize)]
pub struct RangeDef {
    pub from: i32,
    pub to: i32,
    #[serde(default)]
    pub change_every: u32,
}

/// Integer automation union: exactly one variant must be set.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct AutomationDef {
    #[serde(default)]
    pub back_and_forth: Option<Vec<i32>>,
    #[serde(default)]
    pub cycle: Option<Vec<i32>>,
    #[serde(default)]
    pub range: Option<RangeDef>,
    #[serde(default)]
    pub sweep: Option<RangeDef>,
    #[serde(default)]
    pub fade_in: Option<RangeDef>,
}

impl AutomationDef {
    fn set_tags(&self) -> Vec<&'static str> {
        let mut tags = Vec::new();
        if self.back_and_forth.is_some() {
            tags.push("back_and_forth");
        }
        if self.cycle.is_some() {
            tags.push("cycle");
        }
        if self.range.is_some() {
            tags.push("range");
        }
        if self.sweep.is_some() {
            tags.push("sweep");
        }
        if self.fade_in.is_some() {
            tags.push("fade_in");
        }
        tags
    }

    /// Build the automation this union describes.
    pub fn build(&self) -> Result<IntAutomation> {
        let tags = self.set_tags();
        if tags.len() > 1 {
            return Err(CompileError::AmbiguousAutomation(tags[0], tags[1]));
        }
        if let Some(values) = &self.back_and_forth {
            IntAutomation::back_and_forth(values.clone())
        } else if let Some(values) = &self.cycle {
            IntAutomation::cycle(values.clone())
        } else if let Some(r) = &self.range {
            IntAutomation::range(r.from, r.to)
        } else if let Some(r) = &self.sweep {
            IntAutomation::sweep(r.from, r.to, r.change_every)
        } else if let Some(r) = &self.fade_in {
            IntAutomation::fade_in(r.from, r.to, r.change_every)
        } else {
            Err(CompileError::MissingAutomation)
        }
    }
}

/// Float automation union.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct FloatAutomationDef {
    #[serde(default)]
    pub back_and_forth: Option<Vec<f64>>,
}

impl FloatAutomationDef {
    /// Build the automation this union describes.
    pub fn build(&self) -> Result<FloatAutomation> {
        if let Some(values) = &self.back_and_forth {
            FloatAutomation::back_and_forth(values.clone())
        } else {
            Err(CompileError::MissingAutomation)
        }
    }
}

/// Chord cycle parameters.
#[derive(Clone, Debug, Deserialize)]
pub struct ChordCycleDef {
    pub count: u32,
    pub chords: Vec<Vec<i32>>,
}

/// Integer-array automation union.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct ArrayAutomationDef {
    #[serde(default)]
    pub cycle_chords: Option<ChordCycleDef>,
}

impl ArrayAutomationDef {
    /// Build the automation this union describes.
    pub fn build(&self) -> Result<IntArrayAutomation> {
        if let Some(def) = &self.cycle_chords {
            IntArrayAutomation::chord_cycle(def.count, def.chords.clone())
        } else {
            Err(CompileError::MissingArrayAutomation)
        }
    }
}

/// `repeat { every, sequence }`.
#[derive(Clone, Debug, Deserialize)]
pub struct RepeatDef {
    pub every: DurationDef,
    pub sequence: Box<SequenceDef>,
}

/// `euclidian { pulses, over, duration, sequence }`.
#[derive(Clone, Debug, Deserialize)]
pub struct EuclidianDef {
    pub pulses: usize,
    pub over: usize,
    pub duration: DurationDef,
    pub sequence: Box<SequenceDef>,
}

/// `play_note { note | auto_note, channel, velocity | auto_velocity,
/// duration, every }`.
#[derive(Clone, Debug, Deserialize)]
pub struct PlayNoteDef {
    #[serde(default)]
    pub note: Option<i32>,
    #[serde(default)]
    pub auto_note: Option<AutomationDef>,
    pub channel: u8,
    #[serde(default)]
    pub velocity: Option<i32>,
    #[serde(default)]
    pub auto_velocity: Option<AutomationDef>,
    pub duration: DurationDef,
    pub every: DurationDef,
}

/// `play_notes { notes | auto_notes, channel, velocity | auto_velocity,
/// duration, every }`.
#[derive(Clone, Debug, Deserialize)]
pub struct PlayNotesDef {
    #[serde(default)]
    pub notes: Option<Vec<i32>>,
    #[serde(default)]
    pub auto_notes: Option<ArrayAutomationDef>,
    pub channel: u8,
    #[serde(default)]
    pub velocity: Option<i32>,
    #[serde(default)]
    pub auto_velocity: Option<AutomationDef>,
    pub duration: DurationDef,
    pub every: DurationDef,
}

/// An integer channel parameter with an inline automation.
#[derive(Clone, Debug, Deserialize)]
pub struct ChannelAutomationDef {
    pub channel: u8,
    #[serde(flatten)]
    pub automation: AutomationDef,
}

/// A float channel parameter with an inline automation.
#[derive(Clone, Debug, Deserialize)]
pub struct FloatChannelAutomationDef {
    pub channel: u8,
    #[serde(flatten)]
    pub automation: FloatAutomationDef,
}

/// `after { after, sequence }`.
#[derive(Clone, Debug, Deserialize)]
pub struct AfterDef {
    pub after: DurationDef,
    pub sequence: Box<SequenceDef>,
}

/// `before { before, sequence }`.
#[derive(Clone, Debug, Deserialize)]
pub struct BeforeDef {
    pub before: DurationDef,
    pub sequence: Box<SequenceDef>,
}

/// `offset { offset, sequence }`.
#[derive(Clone, Debug, Deserialize)]
pub struct OffsetDef {
    pub offset: DurationDef,
    pub sequence: Box<SequenceDef>,
}

/// One sequence expression: exactly one variant field must be set.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct SequenceDef {
    #[serde(default)]
    pub repeat: Option<RepeatDef>,
    #[serde(default)]
    pub euclidian: Option<EuclidianDef>,
    #[serde(default)]
    pub play_note: Option<PlayNoteDef>,
    #[serde(default)]
    pub play_notes: Option<PlayNotesDef>,
    #[serde(default)]
    pub panning: Option<ChannelAutomationDef>,
    #[serde(default)]
    pub reverb: Option<ChannelAutomationDef>,
    #[serde(default)]
    pub reverb_time: Option<FloatChannelAutomationDef>,
    #[serde(default)]
    pub tremelo: Option<ChannelAutomationDef>,
    #[serde(default)]
    pub lpf_cutoff: Option<ChannelAutomationDef>,
    #[serde(default)]
    pub volume: Option<ChannelAutomationDef>,
    #[serde(default)]
    pub grain_size: Option<FloatChannelAutomationDef>,
    #[serde(default)]
    pub grain_birth_rate: Option<FloatChannelAutomationDef>,
    #[serde(default)]
    pub grain_spread: Option<FloatChannelAutomationDef>,
    #[serde(default)]
    pub grain_speed: Option<FloatChannelAutomationDef>,
    #[serde(default)]
    pub after: Option<AfterDef>,
    #[serde(default)]
    pub before: Option<BeforeDef>,
    #[serde(default)]
    pub offset: Option<OffsetDef>,
    #[serde(default)]
    pub combine: Option<Vec<SequenceDef>>,
}

impl SequenceDef {
    fn set_tags(&self) -> Vec<&'static str> {
        let mut tags = Vec::new();
        if self.repeat.is_some() {
            tags.push("repeat");
        }
        if self.euclidian.is_some() {
            tags.push("euclidian");
        }
        if self.play_note.is_some() {
            tags.push("play_note");
        }
        if self.play_notes.is_some() {
            tags.push("play_notes");
        }
        if self.panning.is_some() {
            tags.push("panning");
        }
        if self.reverb.is_some() {
            tags.push("reverb");
        }
        if self.reverb_time.is_some() {
            tags.push("reverb_time");
        }
        if self.tremelo.is_some() {
            tags.push("tremelo");
        }
        if self.lpf_cutoff.is_some() {
            tags.push("lpf_cutoff");
        }
        if self.volume.is_some() {
            tags.push("volume");
        }
        if self.grain_size.is_some() {
            tags.push("grain_size");
        }
        if self.grain_birth_rate.is_some() {
            tags.push("grain_birth_rate");
        }
        if self.grain_spread.is_some() {
            tags.push("grain_spread");
        }
        if self.grain_speed.is_some() {
            tags.push("grain_speed");
        }
        if self.after.is_some() {
            tags.push("after");
        }
        if self.before.is_some() {
            tags.push("before");
        }
        if self.offset.is_some() {
            tags.push("offset");
        }
        if self.combine.is_some() {
            tags.push("combine");
        }
        tags
    }

    /// Compile this expression into a sequence node.
    pub fn build(&self, granularity: u32) -> Result<Sequence> {
        let tags = self.set_tags();
        match tags.len() {
            0 => return Err(CompileError::MissingSequence),
            1 => {}
            _ => return Err(CompileError::AmbiguousSequence(tags[0], tags[1])),
        }

        if let Some(def) = &self.repeat {
            let every = def.every.resolve(granularity).map_err(|e| e.context("repeat"))?;
            let body = def.sequence.build(granularity).map_err(|e| e.context("repeat"))?;
            Ok(Sequence::Repeat {
                every,
                body: Box::new(body),
            })
        } else if let Some(def) = &self.euclidian {
            let duration = def
                .duration
                .resolve(granularity)
                .map_err(|e| e.context("euclidian"))?;
            let body = def
                .sequence
                .build(granularity)
                .map_err(|e| e.context("euclidian"))?;
            Ok(Sequence::euclidian(def.pulses, def.over, duration, body))
        } else if let Some(def) = &self.play_note {
            def.build(granularity)
        } else if let Some(def) = &self.play_notes {
            def.build(granularity)
        } else if let Some(def) = &self.panning {
            def.build(IntChannelParam::Panning, "panning")
        } else if let Some(def) = &self.reverb {
            def.build(IntChannelParam::Reverb, "reverb")
        } else if let Some(def) = &self.reverb_time {
            def.build(FloatChannelParam::ReverbTime, "reverb_time")
        } else if let Some(def) = &self.tremelo {
            def.build(IntChannelParam::Tremelo, "tremelo")
        } else if let Some(def) = &self.lpf_cutoff {
            def.build(IntChannelParam::LpfCutoff, "lpf_cutoff")
        } else if let Some(def) = &self.volume {
            def.build(IntChannelParam::Volume, "volume")
        } else if let Some(def) = &self.grain_size {
            def.build(FloatChannelParam::GrainSize, "grain_size")
        } else if let Some(def) = &self.grain_birth_rate {
            def.build(FloatChannelParam::GrainBirthRate, "grain_birth_rate")
        } else if let Some(def) = &self.grain_spread {
            def.build(FloatChannelParam::GrainSpread, "grain_spread")
        } else if let Some(def) = &self.grain_speed {
            def.build(FloatChannelParam::GrainSpeed, "grain_speed")
        } else if let Some(def) = &self.after {
            let offset = def.after.resolve(granularity).map_err(|e| e.context("after"))?;
            let body = def.sequence.build(granularity).map_err(|e| e.context("after"))?;
            Ok(Sequence::After {
                offset,
                body: Box::new(body),
            })
        } else if let Some(def) = &self.before {
            let limit = def
                .before
                .resolve(granularity)
                .map_err(|e| e.context("before"))?;
            let body = def.sequence.build(granularity).map_err(|e| e.context("before"))?;
            Ok(Sequence::Before {
                limit,
                body: Box::new(body),
            })
        } else if let Some(def) = &self.offset {
            let delta = def
                .offset
                .resolve(granularity)
                .map_err(|e| e.context("offset"))?;
            let body = def.sequence.build(granularity).map_err(|e| e.context("offset"))?;
            Ok(Sequence::Offset {
                delta,
                body: Box::new(body),
            })
        } else if let Some(children) = &self.combine {
            let mut built = Vec::with_capacity(children.len());
            for child in children {
                built.push(child.build(granularity).map_err(|e| e.context("combine"))?);
            }
            Ok(Sequence::Combine(built))
        } else {
            unreachable!("set_tags covered every variant")
        }
    }
}

impl PlayNoteDef {
    fn build(&self, granularity: u32) -> Result<Sequence> {
        let wrap = |e: CompileError| e.context("play_note");
        let every = self.every.resolve(granularity).map_err(wrap)?;
        let duration = self.duration.resolve(granularity).map_err(wrap)?;

        let note = if let Some(def) = &self.auto_note {
            def.build().map_err(|e| wrap(e.context("auto_note")))?
        } else if let Some(n) = self.note {
            IntAutomation::id(n)
        } else {
            return Err(wrap(CompileError::MissingNote));
        };
        let velocity = if let Some(def) = &self.auto_velocity {
            def.build().map_err(|e| wrap(e.context("auto_velocity")))?
        } else if let Some(v) = self.velocity {
            IntAutomation::id(v)
        } else {
            return Err(wrap(CompileError::MissingVelocity));
        };

        Ok(Sequence::PlayNote {
            every,
            duration,
            channel: self.channel,
            note,
            velocity,
        })
    }
}

impl PlayNotesDef {
    fn build(&self, granularity: u32) -> Result<Sequence> {
        let wrap = |e: CompileError| e.context("play_notes");
        let every = self.every.resolve(granularity).map_err(wrap)?;
        let duration = self.duration.resolve(granularity).map_err(wrap)?;

        let notes = if let Some(def) = &self.auto_notes {
            def.build().map_err(|e| wrap(e.context("auto_notes")))?
        } else {
            IntArrayAutomation::id(self.notes.clone().unwrap_or_default())
        };
        let velocity = if let Some(def) = &self.auto_velocity {
            def.build().map_err(|e| wrap(e.context("auto_velocity")))?
        } else {
            IntAutomation::id(self.velocity.unwrap_or(0))
        };

        Ok(Sequence::PlayNotes {
            every,
            duration,
            channel: self.channel,
            notes,
            velocity,
        })
    }
}

impl ChannelAutomationDef {
    fn build(&self, param: IntChannelParam, tag: &'static str) -> Result<Sequence> {
        let automation = self.automation.build().map_err(|e| e.context(tag))?;
        Ok(Sequence::IntChannelAutomation {
            channel: self.channel,
            param,
            automation,
        })
    }
}

impl FloatChannelAutomationDef {
    fn build(&self, param: FloatChannelParam, tag: &'static str) -> Result<Sequence> {
        let automation = self.automation.build().map_err(|e| e.context(tag))?;
        Ok(Sequence::FloatChannelAutomation {
            channel: self.channel,
            param,
            automation,
        })
    }
}

/// The top-level definition document.
#[derive(Clone, Debug, Deserialize)]
pub struct SequencerDef {
    pub bpm: f64,
    pub granularity: u32,
    #[serde(default)]
    pub channels: Vec<ChannelDef>,
    #[serde(default)]
    pub sequences: Vec<SequenceDef>,
}

impl SequencerDef {
    /// Parse and validate a definition document.
    pub fn parse(document: &str) -> Result<Self> {
        let def: SequencerDef = serde_yaml::from_str(document)?;
        def.validate()?;
        Ok(def)
    }

    /// Read, parse and validate a definition document from a file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    fn validate(&self) -> Result<()> {
        if !(self.bpm > 0.0) {
            return Err(CompileError::InvalidBpm(self.bpm));
        }
        if self.granularity == 0 {
            return Err(CompileError::InvalidGranularity);
        }
        if self.granularity % 8 != 0 {
            log::warn!(
                "granularity {} is not a multiple of 8; sub-quarter note tokens will truncate",
                self.granularity
            );
        }
        if self.sequences.is_empty() {
            return Err(CompileError::NoSequences);
        }
        Ok(())
    }

    /// Compile every sequence expression into its node tree.
    pub fn compile(&self) -> Result<Vec<Sequence>> {
        let mut sequences = Vec::with_capacity(self.sequences.len());
        for (i, def) in self.sequences.iter().enumerate() {
            let seq = def
                .build(self.granularity)
                .map_err(|e| e.context(format!("sequence[{i}]")))?;
            sequences.push(seq);
        }
        Ok(sequences)
    }
}
