//! Skill tools: SKILL.md-described capabilities an agent can enable by name
//! (spec §4.3). Installation, remote fetch, and node-affinity scheduling of
//! skills are out of scope — a skill here is just a directory the hub reads.

pub mod loader;
pub mod manifest;
pub mod registry;
pub mod types;

pub use registry::SkillsRegistry;
pub use types::{RiskTier, SkillEntry};
