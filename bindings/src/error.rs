use std::ffi::NulError;

use snafu::Snafu;

use crate::native::NativeLibrary;

/// Convenience return type for most operations which can return an `XGBError`.
pub type XGBResult<T> = std::result::Result<T, XGBError>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
#[snafu(context(suffix(false)))] // disables default `Snafu` suffix
pub enum XGBError {
    /// A native call returned a non-zero status; the message is the one reported by XGBoost.
    #[snafu(display("XGBoost call failed: {message}"))]
    Native { message: String },

    /// A precondition checked before reaching the native boundary did not hold.
    #[snafu(display("Invalid argument: {reason}"))]
    Validation { reason: String },

    #[snafu(display("Operation not supported: {operation}"))]
    Unsupported { operation: String },

    #[snafu(display("{kind} handle was already released"))]
    Released { kind: &'static str },

    #[snafu(display("Unable to parse XGBoost evaluation output: {eval:?}"))]
    MalformedEvaluation { eval: String },

    #[snafu(display("Argument can't be passed to XGBoost: {source}"))]
    InvalidString { source: NulError },

    #[snafu(display("I/O error: {source}"))]
    Io { source: std::io::Error },
}

impl XGBError {
    /// Translate a native status code into a result.
    ///
    /// `0` is success. Anything else fetches the last error message from the library and
    /// returns it unchanged.
    pub(crate) fn check_return_value(lib: &dyn NativeLibrary, ret_val: i32) -> XGBResult<()> {
        if ret_val == 0 {
            Ok(())
        } else {
            Native {
                message: lib.last_error(),
            }
            .fail()
        }
    }

    pub fn is_native(&self) -> bool {
        matches!(self, XGBError::Native { .. })
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, XGBError::Validation { .. })
    }

    pub fn is_unsupported(&self) -> bool {
        matches!(self, XGBError::Unsupported { .. })
    }

    pub fn is_released(&self) -> bool {
        matches!(self, XGBError::Released { .. })
    }
}
