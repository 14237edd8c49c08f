//! Error types for definition loading and compilation.

use thiserror::Error;

/// Errors raised while turning a definition document into a sequencer.
///
/// Compilation is all-or-nothing: the first error aborts the build and is
/// wrapped with a breadcrumb of node tags on the way out, so a failure deep
/// in a nested document reads like
/// `sequence[3] > combine > play_note > missing note or auto_note`.
#[derive(Error, Debug)]
pub enum CompileError {
    /// A wrapped error carrying one breadcrumb segment.
    #[error("{tag} > {source}")]
    Context {
        tag: String,
        #[source]
        source: Box<CompileError>,
    },

    /// A union node had none of its variant fields set.
    #[error("missing sequence")]
    MissingSequence,

    /// A union node had more than one variant field set.
    #[error("ambiguous sequence: '{0}' and '{1}' are both set")]
    AmbiguousSequence(&'static str, &'static str),

    /// An automation union had none of its variant fields set.
    #[error("missing automation")]
    MissingAutomation,

    /// An automation union had more than one variant field set.
    #[error("ambiguous automation: '{0}' and '{1}' are both set")]
    AmbiguousAutomation(&'static str, &'static str),

    /// An array automation union had none of its variant fields set.
    #[error("missing array automation")]
    MissingArrayAutomation,

    /// `play_note` with neither a literal note nor an automation.
    #[error("missing note or auto_note")]
    MissingNote,

    /// `play_note` with neither a literal velocity nor an automation.
    #[error("missing velocity or auto_velocity")]
    MissingVelocity,

    /// A duration token that is not in the note-value table.
    #[error("unknown duration '{0}'")]
    UnknownDuration(String),

    /// A numeric duration that does not map to a non-negative tick count.
    #[error("invalid duration {0}")]
    InvalidDuration(f64),

    /// An automation constructed with out-of-contract arguments.
    #[error("invalid automation: {0}")]
    InvalidAutomation(String),

    /// An instrument descriptor that fails validation.
    #[error("invalid instrument: {0}")]
    InvalidInstrument(String),

    /// Granularity must be positive. Values not divisible by 8 truncate
    /// sub-quarter note tokens and are warned about at load time.
    #[error("granularity must be positive")]
    InvalidGranularity,

    /// BPM must be positive.
    #[error("bpm must be positive, got {0}")]
    InvalidBpm(f64),

    /// A sequencer definition with no sequences at all.
    #[error("no sequences defined")]
    NoSequences,

    /// The document could not be parsed as YAML.
    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    /// The document could not be read.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl CompileError {
    /// Wrap this error with a breadcrumb segment.
    pub fn context(self, tag: impl Into<String>) -> Self {
        CompileError::Context {
            tag: tag.into(),
            source: Box::new(self),
        }
    }
}

/// Result type alias using CompileError.
pub type Result<T> = std::result::Result<T, CompileError>;
