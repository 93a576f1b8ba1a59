use std::error::Error;
use std::fmt;

/// All errors which may be raised by this crate.
///
/// Solver outcomes which are part of normal operation (an event which was not
/// reached within its bound, a root or least-squares iteration cap) are *not*
/// errors: they are reported as flags on the returned solution records.
#[derive(Clone, Debug, PartialEq)]
pub enum AstroError {
    /// A required input was missing or undefined
    UndefinedInput(String),
    /// The celestial body lacks a required sub-model (gravity, atmosphere, ephemeris)
    ModelUndefined(String),
    /// The dynamics composition or solver setup violates a validity rule
    SetupInvalid(String),
    /// The integrator could not meet its tolerance within the retry budget
    IntegrationFailed(String),
    /// The propagated mass would cross zero
    MassDepleted,
    /// A multi-instant request was not sorted in time
    UnsortedInstants,
    /// The frame service could not provide the requested transform
    FrameConversionFailed(String),
    /// The least-squares normal equations could not be inverted
    SingularNormalEquations,
}

impl fmt::Display for AstroError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::UndefinedInput(msg) => write!(f, "undefined input: {}", msg),
            Self::ModelUndefined(msg) => write!(f, "model undefined: {}", msg),
            Self::SetupInvalid(msg) => write!(f, "invalid setup: {}", msg),
            Self::IntegrationFailed(msg) => write!(f, "integration failed: {}", msg),
            Self::MassDepleted => write!(f, "propagated mass would cross zero"),
            Self::UnsortedInstants => write!(f, "instants must be sorted in time"),
            Self::FrameConversionFailed(msg) => write!(f, "frame conversion failed: {}", msg),
            Self::SingularNormalEquations => {
                write!(f, "least-squares normal equations are singular")
            }
        }
    }
}

impl Error for AstroError {}
