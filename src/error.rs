use core::fmt;

use crate::card::CardFailure;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SdError<E> {
    Transport(E),
    NotReady,
    // outside the sector or the caller's buffer
    OutOfRange { offset: usize, len: usize },
    Card(CardFailure),
}

impl<E> SdError<E> {
    pub fn card_failure(&self) -> Option<CardFailure> {
        match self {
            Self::Card(failure) => Some(*failure),
            _ => None,
        }
    }
}

impl<E> From<E> for SdError<E> {
    fn from(value: E) -> Self {
        Self::Transport(value)
    }
}

impl<E: fmt::Debug> fmt::Display for SdError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transport(err) => write!(f, "spi transport error: {:?}", err),
            Self::NotReady => f.write_str("card not ready"),
            Self::OutOfRange { offset, len } => {
                write!(f, "byte range out of sector: offset={} len={}", offset, len)
            }
            Self::Card(failure) => f.write_str(failure.label()),
        }
    }
}
