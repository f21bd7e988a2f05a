//! modscan-core: static malware classifier for Minecraft mod archives.
//!
//! Walks a JAR/ZIP (or a decompiled source tree), turns its content into a
//! fixed 30-field feature vector, scores it with a random-forest model, and
//! fuses the score with legitimacy evidence into a safe/malicious verdict.
//!
//! - [`archive`]: container and directory walkers
//! - [`entropy`], [`patterns`]: text analyses over the walked content
//! - [`features`]: the closed schema and vector assembly
//! - [`model`], [`verdict`]: scoring and the decision policy
//! - [`decompile`]: optional external decompiler
//! - [`scan`], [`report`]: orchestration and output

pub mod archive;
pub mod config;
pub mod decompile;
pub mod entropy;
pub mod error;
pub mod features;
pub mod hash;
pub mod model;
pub mod patterns;
pub mod report;
pub mod scan;
pub mod verdict;

pub use error::{Result, ScanError};
