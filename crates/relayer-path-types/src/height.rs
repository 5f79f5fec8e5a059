use core::cmp::Ordering;
use core::fmt::{Display, Error as FmtError, Formatter};

use serde_derive::{Deserialize, Serialize};

/// A block height qualified by the chain revision it belongs to.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Height {
    pub revision_number: u64,
    pub revision_height: u64,
}

impl Height {
    pub fn new(revision_number: u64, revision_height: u64) -> Self {
        Self {
            revision_number,
            revision_height,
        }
    }

    pub fn increment(&self) -> Self {
        Self {
            revision_number: self.revision_number,
            revision_height: self.revision_height + 1,
        }
    }
}

impl PartialOrd for Height {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Height {
    fn cmp(&self, other: &Self) -> Ordering {
        self.revision_number
            .cmp(&other.revision_number)
            .then(self.revision_height.cmp(&other.revision_height))
    }
}

impl Display for Height {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), FmtError> {
        write!(f, "{}-{}", self.revision_number, self.revision_height)
    }
}

/// Consensus height on the destination chain after which a packet will no
/// longer be accepted and instead counts as having timed out.
///
/// The all-zero height on the wire means "no timeout", so it is parsed into
/// a dedicated variant rather than an ordinary [`Height`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TimeoutHeight {
    #[default]
    Never,
    At(Height),
}

impl TimeoutHeight {
    pub fn no_timeout() -> Self {
        Self::Never
    }

    /// Whether a packet with this timeout has expired once the destination
    /// chain has reached `height`. Revision numbers are not compared; a path
    /// spans a single revision of each chain.
    pub fn has_expired(&self, height: u64) -> bool {
        match self {
            Self::At(timeout) => height >= timeout.revision_height,
            Self::Never => false,
        }
    }
}

impl From<Height> for TimeoutHeight {
    fn from(height: Height) -> Self {
        if height.revision_number == 0 && height.revision_height == 0 {
            Self::Never
        } else {
            Self::At(height)
        }
    }
}

impl Display for TimeoutHeight {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), FmtError> {
        match self {
            TimeoutHeight::At(height) => write!(f, "{height}"),
            TimeoutHeight::Never => write!(f, "no timeout"),
        }
    }
}
