use std::error::Error;
use std::fmt::{Display, Formatter};
use std::io;

#[derive(Debug)]
pub enum PoaError {
    /// The size of the weights vector is not equal to the length of the sequence
    WeightsUnequalSize(usize, usize),

    /// The alignment did not include any valid positions
    InvalidAlignment,

    /// The alignment referenced a sequence position beyond the end of the sequence
    AlignmentOutOfBounds { pos: usize, len: usize },

    /// A node index that does not exist in the graph
    InvalidNode(usize),

    /// A window was created with an empty backbone
    EmptyBackbone,

    /// The backbone quality string does not match the backbone length
    QualityLengthMismatch { seq_len: usize, qual_len: usize },

    /// A layer could not be added to a window
    InvalidLayer(String),

    /// The window already produced its consensus
    WindowConsumed,

    /// Error variant when the configuration could not be parsed
    ConfigError { source: serde_json::Error },

    /// Malformed input records
    InvalidInput(String),

    /// Other IO errors
    IOError(io::Error),
}

impl Error for PoaError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match *self {
            Self::ConfigError { ref source } => Some(source),
            Self::IOError(ref source) => Some(source),
            _ => None
        }
    }
}

impl From<io::Error> for PoaError {
    fn from(value: io::Error) -> Self {
        Self::IOError(value)
    }
}

impl From<serde_json::Error> for PoaError {
    fn from(value: serde_json::Error) -> Self {
        Self::ConfigError {
            source: value
        }
    }
}

impl Display for PoaError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match *self {
            Self::WeightsUnequalSize(seq_len, weights_len) =>
                write!(f, "The length of the weights vector ({weights_len}) does not match the length of the sequence ({seq_len})!"),
            Self::InvalidAlignment =>
                write!(f, "The specified alignment did not include any valid sequence positions!"),
            Self::AlignmentOutOfBounds { pos, len } =>
                write!(f, "The alignment references sequence position {pos}, but the sequence has length {len}!"),
            Self::InvalidNode(ix) =>
                write!(f, "Node {ix} does not exist in the graph!"),
            Self::EmptyBackbone =>
                write!(f, "Can not create a window with an empty backbone sequence!"),
            Self::QualityLengthMismatch { seq_len, qual_len } =>
                write!(f, "Backbone quality length ({qual_len}) does not match the backbone length ({seq_len})!"),
            Self::InvalidLayer(ref reason) =>
                write!(f, "Invalid layer: {reason}"),
            Self::WindowConsumed =>
                write!(f, "The window consensus was already generated!"),
            Self::ConfigError { source: _ } =>
                write!(f, "Could not parse the configuration!"),
            Self::InvalidInput(ref reason) =>
                write!(f, "Invalid input: {reason}"),
            Self::IOError(ref err) =>
                err.fmt(f),
        }
    }
}
