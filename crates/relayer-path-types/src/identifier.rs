//! Identifier newtypes for the objects a path processor coordinates.
//!
//! Identifiers are carried exactly as observed on chain. The empty string is
//! a valid *internal* value (handshake init messages do not yet know their
//! counterparty identifier), but parsing an empty identifier from external
//! input is rejected.

use core::fmt::{Display, Error as FmtError, Formatter};
use core::str::FromStr;

use flex_error::define_error;
use serde_derive::{Deserialize, Serialize};

define_error! {
    ValidationError {
        Empty
            { id_type: &'static str }
            |e| { format_args!("{} identifier cannot be empty", e.id_type) },
    }
}

macro_rules! define_identifier {
    ($(#[$doc:meta])* $name:ident, $id_type:expr) => {
        $(#[$doc])*
        #[derive(
            Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// True for the zero value used before a counterparty has
            /// assigned this identifier.
            pub fn is_empty(&self) -> bool {
                self.0.is_empty()
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), FmtError> {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = ValidationError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                if s.is_empty() {
                    return Err(ValidationError::empty($id_type));
                }
                Ok(Self(s.to_string()))
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

define_identifier!(
    /// Identifier of a light client hosted on a chain.
    ClientId,
    "client"
);
define_identifier!(
    /// Identifier of a connection end.
    ConnectionId,
    "connection"
);
define_identifier!(
    /// Identifier of a channel end.
    ChannelId,
    "channel"
);
define_identifier!(
    /// Identifier of a port bound by an application module.
    PortId,
    "port"
);

/// Chain identifier, e.g. `ibc-1` or `cosmoshub-4`.
///
/// The trailing numeric suffix, when present, is the revision number used in
/// heights on that chain.
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChainId(String);

impl ChainId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Extract the revision number from the chain identifier, or 0 if the
    /// identifier carries no `-<number>` suffix.
    pub fn version(&self) -> u64 {
        match self.0.rsplit_once('-') {
            Some((_, suffix)) => suffix.parse().unwrap_or(0),
            None => 0,
        }
    }
}

impl Display for ChainId {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), FmtError> {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ChainId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(ValidationError::empty("chain"));
        }
        Ok(Self(s.to_string()))
    }
}

impl AsRef<str> for ChainId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
