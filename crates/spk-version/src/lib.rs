//! Version numbers, compatibility contracts and version ranges for
//! spk packages.
//!
//! Versions are dot-separated integer tuples of any arity with
//! optional pre and post release tags. How two versions of a package
//! relate is declared by the package itself through a [`Compat`]
//! contract, and requested through [`VersionFilter`] range
//! expressions.

mod compat;
mod error;
mod range;
mod version;

pub use compat::{
    parse_compat, Compat, CompatRule, CompatRuleSet, Compatibility, API_STR, BINARY_STR,
    COMPATIBLE, NONE_STR,
};
pub use error::{Error, Result};
pub use range::{
    parse_version_range, CompatRange, VersionFilter, VersionRange, VERSION_RANGE_SEP,
};
pub use version::{parse_version, TagSet, Version, VERSION_SEP};
