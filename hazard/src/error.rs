use core::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// Every hazard slot of the calling thread already backs a live [`crate::HazardPointer`].
    SlotsExhausted { capacity: usize },
    InvalidConfig(&'static str),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::SlotsExhausted { capacity } => {
                write!(f, "all {} hazard slots of this thread are in use", capacity)
            }
            Error::InvalidConfig(reason) => write!(f, "invalid domain config: {}", reason),
        }
    }
}

impl std::error::Error for Error {}
