//! Tick-indexed automation functions.
//!
//! An automation is a total, pure function of the tick counter. Sequence
//! nodes close over automations to vary note pitch, velocity and channel
//! parameters over time. Three value shapes exist:
//!
//! - [`IntAutomation`] - integer values (notes, velocities, int parameters)
//! - [`FloatAutomation`] - float values (times, rates, gains)
//! - [`IntArrayAutomation`] - integer arrays (chords)
//!
//! Constructors validate their arguments; a malformed automation is a
//! compile-time error, never a runtime surprise.

use crate::errors::{CompileError, Result};
use crate::events::Tick;

/// Ping-pong index into a list of `n` values with period `2n - 2`.
///
/// `[v0, .., v_{n-1}, v_{n-2}, .., v1]` repeating; a singleton list is
/// constant.
fn ping_pong(len: usize, tick: Tick) -> usize {
    if len <= 1 {
        return 0;
    }
    let period = 2 * len - 2;
    let pos = (tick % period as u64) as usize;
    if pos < len {
        pos
    } else {
        period - pos
    }
}

/// An integer-valued function of the tick counter.
#[derive(Clone, Debug, PartialEq)]
pub enum IntAutomation {
    /// Constant value.
    Id(i32),
    /// Ping-pong through the list: `v0, v1, .., v_{n-1}, v_{n-2}, .., v1, v0, ..`
    BackAndForth(Vec<i32>),
    /// Cycle through the list with period `n`.
    Cycle(Vec<i32>),
    /// `from + (tick mod (to - from))`.
    Range { from: i32, to: i32 },
    /// Hold each value in `[from, to)` for `change_every` ticks, wrapping.
    Sweep {
        from: i32,
        to: i32,
        change_every: u32,
    },
    /// Like `Sweep` but holds the top ramp value instead of wrapping.
    FadeIn {
        from: i32,
        to: i32,
        change_every: u32,
    },
}

impl IntAutomation {
    /// Constant automation.
    pub fn id(value: i32) -> Self {
        IntAutomation::Id(value)
    }

    /// Ping-pong automation. The list must be non-empty.
    pub fn back_and_forth(values: Vec<i32>) -> Result<Self> {
        if values.is_empty() {
            return Err(CompileError::InvalidAutomation(
                "back_and_forth needs at least one value".to_string(),
            ));
        }
        Ok(IntAutomation::BackAndForth(values))
    }

    /// Cycling automation. The list must be non-empty.
    pub fn cycle(values: Vec<i32>) -> Result<Self> {
        if values.is_empty() {
            return Err(CompileError::InvalidAutomation(
                "cycle needs at least one value".to_string(),
            ));
        }
        Ok(IntAutomation::Cycle(values))
    }

    /// Modular ramp over `[from, to)`. Requires `to > from`.
    pub fn range(from: i32, to: i32) -> Result<Self> {
        if to <= from {
            return Err(CompileError::InvalidAutomation(format!(
                "range requires to > from, got {from}..{to}"
            )));
        }
        Ok(IntAutomation::Range { from, to })
    }

    /// Stepped ramp over `[from, to)`, wrapping. Requires `to > from` and
    /// `change_every >= 1`.
    pub fn sweep(from: i32, to: i32, change_every: u32) -> Result<Self> {
        Self::check_ramp("sweep", from, to, change_every)?;
        Ok(IntAutomation::Sweep {
            from,
            to,
            change_every,
        })
    }

    /// Stepped ramp over `[from, to)` that saturates at the top value.
    /// Requires `to > from` and `change_every >= 1`.
    pub fn fade_in(from: i32, to: i32, change_every: u32) -> Result<Self> {
        Self::check_ramp("fade_in", from, to, change_every)?;
        Ok(IntAutomation::FadeIn {
            from,
            to,
            change_every,
        })
    }

    fn check_ramp(tag: &str, from: i32, to: i32, change_every: u32) -> Result<()> {
        if to <= from {
            return Err(CompileError::InvalidAutomation(format!(
                "{tag} requires to > from, got {from}..{to}"
            )));
        }
        if change_every == 0 {
            return Err(CompileError::InvalidAutomation(format!(
                "{tag} requires change_every >= 1"
            )));
        }
        Ok(())
    }

    /// Evaluate the automation at the given tick.
    ///
    /// Total for automations built through the validating constructors;
    /// hand-built out-of-contract variants fall back to the `from` value
    /// (or 0) rather than panicking.
    pub fn at(&self, tick: Tick) -> i32 {
        match self {
            IntAutomation::Id(v) => *v,
            IntAutomation::BackAndForth(values) => {
                values.get(ping_pong(values.len(), tick)).copied().unwrap_or(0)
            }
            IntAutomation::Cycle(values) => {
                if values.is_empty() {
                    return 0;
                }
                values[(tick % values.len() as u64) as usize]
            }
            IntAutomation::Range { from, to } => {
                let span = (to - from).max(1) as u64;
                from + (tick % span) as i32
            }
            IntAutomation::Sweep {
                from,
                to,
                change_every,
            } => {
                let span = (to - from).max(1) as u64;
                let step = tick / (*change_every).max(1) as u64;
                from + (step % span) as i32
            }
            IntAutomation::FadeIn {
                from,
                to,
                change_every,
            } => {
                let top = (to - from - 1).max(0) as u64;
                let step = tick / (*change_every).max(1) as u64;
                from + step.min(top) as i32
            }
        }
    }
}

/// A float-valued function of the tick counter.
#[derive(Clone, Debug, PartialEq)]
pub enum FloatAutomation {
    /// Ping-pong through the list, same indexing as the int variant.
    BackAndForth(Vec<f64>),
}

impl FloatAutomation {
    /// Ping-pong automation. The list must be non-empty.
    pub fn back_and_forth(values: Vec<f64>) -> Result<Self> {
        if values.is_empty() {
            return Err(CompileError::InvalidAutomation(
                "back_and_forth needs at least one value".to_string(),
            ));
        }
        Ok(FloatAutomation::BackAndForth(values))
    }

    /// Evaluate the automation at the given tick.
    pub fn at(&self, tick: Tick) -> f64 {
        match self {
            FloatAutomation::BackAndForth(values) => {
                values.get(ping_pong(values.len(), tick)).copied().unwrap_or(0.0)
            }
        }
    }
}

/// An integer-array-valued function of the tick counter.
#[derive(Clone, Debug, PartialEq)]
pub enum IntArrayAutomation {
    /// Constant array.
    Id(Vec<i32>),
    /// Switch chord every `count` ticks, cycling through `chords`.
    ChordCycle { count: u32, chords: Vec<Vec<i32>> },
}

impl IntArrayAutomation {
    /// Constant array automation.
    pub fn id(values: Vec<i32>) -> Self {
        IntArrayAutomation::Id(values)
    }

    /// Chord cycle automation. Requires `count >= 1` and at least one chord.
    pub fn chord_cycle(count: u32, chords: Vec<Vec<i32>>) -> Result<Self> {
        if count == 0 {
            return Err(CompileError::InvalidAutomation(
                "cycle_chords requires count >= 1".to_string(),
            ));
        }
        if chords.is_empty() {
            return Err(CompileError::InvalidAutomation(
                "cycle_chords needs at least one chord".to_string(),
            ));
        }
        Ok(IntArrayAutomation::ChordCycle { count, chords })
    }

    /// Evaluate the automation at the given tick.
    pub fn at(&self, tick: Tick) -> &[i32] {
        match self {
            IntArrayAutomation::Id(values) => values,
            IntArrayAutomation::ChordCycle { count, chords } => {
                if chords.is_empty() {
                    return &[];
                }
                let idx = (tick / (*count).max(1) as u64) % chords.len() as u64;
                &chords[idx as usize]
            }
        }
    }
}
