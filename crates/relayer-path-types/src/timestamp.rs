use core::fmt::{Display, Error as FmtError, Formatter};

use serde_derive::{Deserialize, Serialize};

/// A point in time expressed as nanoseconds since the unix epoch.
///
/// Zero means "unset": a packet with a zero timeout timestamp never times
/// out on time, and a block observed before any header has been parsed has
/// a zero time.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Timestamp(u64);

impl Timestamp {
    pub fn from_nanoseconds(nanos: u64) -> Self {
        Self(nanos)
    }

    pub fn nanoseconds(&self) -> u64 {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Whether a deadline expressed by this timestamp has passed at `now`.
    /// An unset timestamp never expires.
    pub fn has_elapsed(&self, now: Timestamp) -> bool {
        !self.is_zero() && now.0 >= self.0
    }
}

impl Display for Timestamp {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), FmtError> {
        write!(f, "{}ns", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unset_timestamp_never_elapses() {
        let unset = Timestamp::default();
        assert!(!unset.has_elapsed(Timestamp::from_nanoseconds(u64::MAX)));
    }

    #[test]
    fn elapsed_is_inclusive() {
        let deadline = Timestamp::from_nanoseconds(1_000);
        assert!(!deadline.has_elapsed(Timestamp::from_nanoseconds(999)));
        assert!(deadline.has_elapsed(Timestamp::from_nanoseconds(1_000)));
        assert!(deadline.has_elapsed(Timestamp::from_nanoseconds(2_000)));
    }
}
