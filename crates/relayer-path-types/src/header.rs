use core::fmt::Debug;
use std::any::Any;

/// A light-client header observed on a chain, kept opaque to coordination
/// code.
///
/// The path processor only ever inspects the height; a chain provider
/// downcasts via [`IbcHeader::as_any`] to recover its concrete header type
/// when assembling a client update.
pub trait IbcHeader: Debug + Send + Sync {
    fn height(&self) -> u64;

    fn timestamp_nanos(&self) -> u64;

    fn as_any(&self) -> &dyn Any;
}
