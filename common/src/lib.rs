#![allow(clippy::module_inception)]
#![allow(clippy::too_many_arguments)]
#![allow(clippy::field_reassign_with_default)]

pub mod account;
pub mod catchpoint;
pub mod config;
pub mod crypto;
pub mod error;
pub mod serializer;
pub mod time;

/// Compile-time assertion, evaluated as a `const` so a violated invariant
/// fails the build rather than a runtime check.
#[macro_export]
macro_rules! static_assert {
    ($cond:expr, $msg:expr) => {
        const _: () = assert!($cond, $msg);
    };
}
