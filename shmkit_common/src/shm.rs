//! Shared memory definitions.
//!
//! This module contains:
//! - `consts`: OS flag values, key/length limits and the POSIX size header width.
//! - `element`: The element-type enumeration and its byte widths.
//! - `flags`: Typed flag sets for System-V and POSIX calls.

pub mod consts;
pub mod element;
pub mod flags;
