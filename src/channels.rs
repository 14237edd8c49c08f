//! Channel configuration.
//!
//! Each channel entry in the definition document describes the instrument
//! and the parameter snapshot the engine pushes to the synthesizer at tick
//! 0 (and again after a reload). The synthesizer interprets the values; the
//! engine only carries them.

use serde::Deserialize;
use std::collections::BTreeMap;

use crate::errors::{CompileError, Result};

/// The percussion channel. Its instruments are indexed by note number, so
/// it never receives an instrument assignment at setup time.
pub const PERCUSSION_CHANNEL: u8 = 9;

/// Descriptor for a custom (non-General-MIDI) instrument.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct InstrumentDef {
    /// Name of the generator the synthesizer should instantiate.
    pub name: String,
    /// Generator parameters, passed through untouched.
    #[serde(default)]
    pub params: BTreeMap<String, f64>,
}

impl InstrumentDef {
    /// Check the descriptor before handing it to the synthesizer.
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(CompileError::InvalidInstrument(
                "generator name is empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Granular synthesis settings for a channel.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct GrainDef {
    /// Source sample file.
    pub file: String,
    #[serde(default)]
    pub gain: f64,
    #[serde(default)]
    pub grain_size: f64,
    #[serde(default)]
    pub birth_rate: f64,
    #[serde(default)]
    pub spread: f64,
    #[serde(default)]
    pub speed: f64,
    #[serde(default)]
    pub density: i32,
}

/// Initial configuration for one synthesizer channel.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct ChannelDef {
    pub channel: u8,
    /// General MIDI program number, used when no generator is set.
    #[serde(default)]
    pub instrument: i32,
    /// Custom generator; takes precedence over `instrument`.
    #[serde(default)]
    pub generator: Option<InstrumentDef>,
    #[serde(default)]
    pub tremelo: i32,
    #[serde(default)]
    pub reverb: i32,
    #[serde(default)]
    pub lpf_cutoff: i32,
    #[serde(default)]
    pub hpf_cutoff: i32,
    #[serde(default)]
    pub volume: i32,
    #[serde(default)]
    pub panning: i32,
    #[serde(default)]
    pub reverb_feedback: f64,
    /// Reverb decay as a note-duration token; invalid tokens are logged
    /// and skipped at setup time.
    #[serde(default)]
    pub reverb_time: Option<String>,
    #[serde(default)]
    pub grain: Option<GrainDef>,
}

/// Convert a note-duration token to seconds at the given tempo.
///
/// `Quarter` is one beat, i.e. `60 / bpm` seconds.
pub fn note_duration_seconds(token: &str, bpm: f64) -> Result<f64> {
    let beats = match token {
        "Whole" => 4.0,
        "Half" => 2.0,
        "Quarter" => 1.0,
        "Eight" => 0.5,
        "Sixteenth" => 0.25,
        "Thirtysecond" => 0.125,
        _ => return Err(CompileError::UnknownDuration(token.to_string())),
    };
    Ok(beats * 60.0 / bpm)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_note_duration_seconds() {
        assert_eq!(note_duration_seconds("Quarter", 60.0).unwrap(), 1.0);
        assert_eq!(note_duration_seconds("Whole", 120.0).unwrap(), 2.0);
        assert_eq!(note_duration_seconds("Thirtysecond", 60.0).unwrap(), 0.125);
        assert!(note_duration_seconds("Eighth", 60.0).is_err());
    }

    #[test]
    fn test_instrument_validation() {
        assert!(InstrumentDef::default().validate().is_err());
        let def = InstrumentDef {
            name: "warm_pad".to_string(),
            params: BTreeMap::new(),
        };
        assert!(def.validate().is_ok());
    }

    #[test]
    fn test_channel_def_yaml_defaults() {
        let def: ChannelDef = serde_yaml::from_str("channel: 3\nvolume: 90\n").unwrap();
        assert_eq!(def.channel, 3);
        assert_eq!(def.volume, 90);
        assert_eq!(def.panning, 0);
        assert!(def.generator.is_none());
        assert!(def.reverb_time.is_none());
        assert!(def.grain.is_none());
    }

    #[test]
    fn test_grain_yaml() {
        let yaml = "channel: 2\ngrain:\n  file: pad.wav\n  gain: 0.8\n  density: 3\n";
        let def: ChannelDef = serde_yaml::from_str(yaml).unwrap();
        let grain = def.grain.unwrap();
        assert_eq!(grain.file, "pad.wav");
        assert_eq!(grain.gain, 0.8);
        assert_eq!(grain.density, 3);
        assert_eq!(grain.spread, 0.0);
    }
}
