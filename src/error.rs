//! Grepable error codes shared by every error enum in the crate.

/// Maps an error variant to a stable `E_*` code for logs and host surfaces.
pub trait ErrorCode {
    fn error_code(&self) -> &'static str;
}
