//! A benchmark builder for breaking dependency updates in Java/Maven
//! projects.
//!
//! A breaking update is a pair of consecutive commits where the first builds
//! green, the second fails, and the difference is a single-line version bump
//! in a Maven POM. The [`miner`] discovers such pairs on GitHub; the
//! [`reproducer`] verifies each one inside containers, classifies the
//! failure, and publishes two images that replay the green and the broken
//! build offline.

#[cfg(test)]
pub mod test_utils;

pub mod container;
pub mod github;
pub mod miner;
pub mod reproducer;
pub mod store;
pub mod types;
