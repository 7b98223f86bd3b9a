use std::fmt;
use thiserror::Error;

#[derive(Clone, PartialEq, Eq)]
pub struct Pin(Vec<u8>);

impl Pin {
    pub const MIN_LENGTH: usize = 1;

    pub fn new(pin: Vec<u8>) -> Result<Self, PinError> {
        if pin.len() < Self::MIN_LENGTH {
            return Err(PinError::Empty);
        }
        if pin.contains(&0) {
            return Err(PinError::EmbeddedNul);
        }
        Ok(Self(pin))
    }

    pub fn from_str(pin: &str) -> Result<Self, PinError> {
        Self::new(pin.as_bytes().to_vec())
    }

    /// Reads a NUL-terminated PIN from a driver buffer.
    pub fn from_buffer(buffer: &[u8]) -> Result<Self, PinError> {
        let end = buffer.iter().position(|&b| b == 0).unwrap_or(buffer.len());
        Self::new(buffer[..end].to_vec())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Copies the PIN into a driver buffer, NUL-terminated.
    ///
    /// Fits only when `len < capacity - 1`; the buffer is untouched otherwise.
    pub fn copy_to_buffer(&self, buffer: &mut [u8]) -> Result<(), PinError> {
        let capacity = buffer.len();
        if self.0.len() + 1 >= capacity {
            return Err(PinError::DoesNotFit {
                length: self.0.len(),
                capacity,
            });
        }
        buffer[..self.0.len()].copy_from_slice(&self.0);
        buffer[self.0.len()] = 0;
        Ok(())
    }
}

impl fmt::Debug for Pin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Pin([REDACTED])")
    }
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinError {
    #[error("PIN must not be empty")]
    Empty,

    #[error("PIN must not contain NUL bytes")]
    EmbeddedNul,

    #[error("PIN of {length} bytes does not fit a {capacity}-byte buffer")]
    DoesNotFit { length: usize, capacity: usize },
}
