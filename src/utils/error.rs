//! Customized unified error type.

use std::fmt;
use std::io;

use crate::recovery::{CatchUpCommand, PeerMsg};
use crate::utils::Bitmap;

/// Customized error type for Winterset.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct WintersetError(pub String);

impl fmt::Display for WintersetError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0) // do not display literal quotes
    }
}

// Helper macro for saving boiler-plate `impl From<T>`s for transparent
// conversion from various common error types to `WintersetError`.
macro_rules! impl_from_error {
    ($error:ty) => {
        impl From<$error> for WintersetError {
            fn from(e: $error) -> Self {
                // just store the source error's string representation
                WintersetError(e.to_string())
            }
        }
    };
}

impl_from_error!(io::Error);
impl_from_error!(toml::ser::Error);
impl_from_error!(toml::de::Error);
impl_from_error!(rmp_serde::encode::Error);
impl_from_error!(rmp_serde::decode::Error);
impl_from_error!(tokio::sync::watch::error::SendError<bool>);
impl_from_error!(tokio::sync::mpsc::error::SendError<(Bitmap, PeerMsg)>);
impl_from_error!(tokio::sync::mpsc::error::SendError<CatchUpCommand>);
