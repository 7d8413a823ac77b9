use std::path::{Path, PathBuf};

use parking_lot::RwLock;

use hub_domain::error::{Error, Result};

use crate::loader;
use crate::types::SkillEntry;

/// In-memory registry of the skill tools discoverable under a skills root
/// directory (spec §4.3 "skill tools — registered dynamically from the
/// agent's enabled skills").
pub struct SkillsRegistry {
    entries: RwLock<Vec<SkillEntry>>,
    skills_root: PathBuf,
}

impl SkillsRegistry {
    pub fn load(skills_root: &Path) -> Result<Self> {
        let entries = loader::scan_skills(skills_root)?;
        tracing::info!(skills_count = entries.len(), "skills registry loaded");
        Ok(Self {
            entries: RwLock::new(entries),
            skills_root: skills_root.to_path_buf(),
        })
    }

    pub fn empty() -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
            skills_root: PathBuf::new(),
        }
    }

    /// Render the full skill index for LLM injection, one line per skill.
    pub fn render_index(&self) -> String {
        let entries = self.entries.read();
        entries
            .iter()
            .map(|e| e.render_index_line())
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Render the index restricted to the names an agent has enabled.
    pub fn render_index_for(&self, enabled: &[String]) -> String {
        let entries = self.entries.read();
        entries
            .iter()
            .filter(|e| enabled.iter().any(|n| n == &e.name))
            .map(|e| e.render_index_line())
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn read_doc(&self, skill_name: &str) -> Result<String> {
        let exists = self.entries.read().iter().any(|e| e.name == skill_name);
        if !exists {
            return Err(Error::validation(format!("unknown skill: {skill_name}")));
        }
        match loader::load_skill_doc(&self.skills_root, skill_name)? {
            Some(doc) => Ok(doc),
            None => Err(Error::validation(format!(
                "SKILL.md not found for {skill_name}"
            ))),
        }
    }

    /// Read a bundled resource from within a skill's directory. Only
    /// `references/`, `scripts/`, `assets/` subdirs are reachable; traversal
    /// and symlink escapes are rejected.
    pub fn read_resource(&self, skill_name: &str, relative_path: &str) -> Result<String> {
        let exists = self.entries.read().iter().any(|e| e.name == skill_name);
        if !exists {
            return Err(Error::validation(format!("unknown skill: {skill_name}")));
        }

        if relative_path.contains("..") || relative_path.starts_with('/') {
            return Err(Error::authorization("path traversal blocked"));
        }

        let allowed_prefixes = ["references/", "scripts/", "assets/"];
        if !allowed_prefixes.iter().any(|p| relative_path.starts_with(p)) {
            return Err(Error::authorization(format!(
                "resource path must start with references/, scripts/, or assets/ (got: {relative_path})"
            )));
        }

        let skill_dir = self.skills_root.join(skill_name);
        let full_path = skill_dir.join(relative_path);

        let canonical = full_path
            .canonicalize()
            .map_err(|_| Error::validation(format!("resource not found: {relative_path}")))?;
        let canonical_root = skill_dir
            .canonicalize()
            .map_err(|_| Error::validation(format!("unknown skill: {skill_name}")))?;
        if !canonical.starts_with(&canonical_root) {
            return Err(Error::authorization("path traversal blocked (symlink)"));
        }

        std::fs::read_to_string(&canonical)
            .map_err(|_| Error::validation(format!("resource not found: {relative_path}")))
    }

    pub fn list(&self) -> Vec<SkillEntry> {
        self.entries.read().clone()
    }

    pub fn reload(&self) -> Result<usize> {
        let new_entries = loader::scan_skills(&self.skills_root)?;
        let count = new_entries.len();
        *self.entries.write() = new_entries;
        tracing::info!(skills_count = count, "skills registry reloaded");
        Ok(count)
    }
}
