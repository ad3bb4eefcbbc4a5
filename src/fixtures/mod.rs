//! JSON fixtures shared by tests.
//!
//! `CATALOG` is a small pet shop: locations, users with groups and
//! permissions, profiles, cats and dogs. It names the `number_of_cats`
//! method, so it has to be loaded through `test_utils::catalog`, which
//! registers it.

pub const CATALOG: &str = include_str!("catalog.json");
