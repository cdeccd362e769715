//! Base types and error handling.
//!
//! Provides foundational types mirroring Chromium's `net/base/`:
//! - [`NetError`](neterror::NetError): Network error codes matching `net_error_list.h`
//! - [`IoResultExt`](context::IoResultExt): Mapping I/O errors to network errors

pub mod context;
pub mod neterror;
