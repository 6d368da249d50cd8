//! Validated TCP port numbers.

use std::fmt;

use crate::error::ConnectionError;

/// A TCP port in `0..=65535`.
///
/// Port `0` is valid and asks the OS for an ephemeral port when binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Port(u16);

impl Port {
    /// Lowest valid port.
    pub const MIN: u16 = 0;

    /// Highest valid port.
    pub const MAX: u16 = u16::MAX;

    /// Validate a port number.
    ///
    /// # Errors
    ///
    /// - `ConnectionError::InvalidPort` if `value` is outside `0..=65535`
    pub fn new(value: i64) -> Result<Self, ConnectionError> {
        u16::try_from(value).map(Self).map_err(|_| ConnectionError::InvalidPort {
            value,
            min: Self::MIN,
            max: Self::MAX,
        })
    }

    /// Port as a plain integer.
    pub fn get(self) -> u16 {
        self.0
    }
}

impl From<u16> for Port {
    fn from(value: u16) -> Self {
        Self(value)
    }
}

impl TryFrom<i64> for Port {
    type Error = ConnectionError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl fmt::Display for Port {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
