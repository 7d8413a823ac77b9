use std::path::Path;

use hub_domain::error::Result;

use crate::manifest;
use crate::types::SkillEntry;

/// Load one skill directory's `SKILL.md` into a [`SkillEntry`].
fn load_skill_dir(skill_dir: &Path) -> Result<Option<SkillEntry>> {
    let md_path = skill_dir.join("SKILL.md");
    if !md_path.exists() {
        return Ok(None);
    }
    let md_content = std::fs::read_to_string(&md_path)?;
    let (parsed, _body) = manifest::parse_frontmatter(&md_content);
    let Some(m) = parsed else {
        return Ok(None);
    };

    let name = m.name.clone().unwrap_or_else(|| {
        skill_dir
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "unknown".to_string())
    });
    let description = m.description.clone().unwrap_or_default();
    let risk = m.risk_tier();

    Ok(Some(SkillEntry {
        name,
        description,
        location: skill_dir.display().to_string(),
        risk,
        inputs: m.inputs.clone(),
        outputs: m.outputs.clone(),
        permission_scope: m.permission_scope.clone(),
    }))
}

/// Load the on-demand SKILL.md documentation for a skill.
pub fn load_skill_doc(skills_root: &Path, skill_name: &str) -> Result<Option<String>> {
    let doc_path = skills_root.join(skill_name).join("SKILL.md");
    if !doc_path.exists() {
        return Ok(None);
    }
    Ok(Some(std::fs::read_to_string(&doc_path)?))
}

/// Scan the skills root directory and load every `SKILL.md`-bearing
/// subdirectory, sorted by name.
pub fn scan_skills(skills_root: &Path) -> Result<Vec<SkillEntry>> {
    let mut entries = Vec::new();
    if !skills_root.exists() {
        return Ok(entries);
    }
    for entry in std::fs::read_dir(skills_root)? {
        let entry = entry?;
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        match load_skill_dir(&path) {
            Ok(Some(skill)) => entries.push(skill),
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(
                    skill_dir = %path.display(),
                    error = %e,
                    "skipping skill directory with invalid SKILL.md"
                );
            }
        }
    }
    entries.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_skill(root: &Path, name: &str, risk: &str) {
        let dir = root.join(name);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join("SKILL.md"),
            format!("---\nname: {name}\ndescription: does things\nrisk: {risk}\n---\n\nBody."),
        )
        .unwrap();
    }

    #[test]
    fn scans_and_sorts_skills() {
        let root = tempfile::tempdir().unwrap();
        write_skill(root.path(), "zeta", "io");
        write_skill(root.path(), "alpha", "net");
        let entries = scan_skills(root.path()).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].name, "alpha");
        assert_eq!(entries[1].name, "zeta");
    }

    #[test]
    fn missing_root_yields_empty() {
        let entries = scan_skills(Path::new("/nonexistent/skills/root")).unwrap();
        assert!(entries.is_empty());
    }

    #[test]
    fn load_skill_doc_reads_markdown() {
        let root = tempfile::tempdir().unwrap();
        write_skill(root.path(), "alpha", "io");
        let doc = load_skill_doc(root.path(), "alpha").unwrap().unwrap();
        assert!(doc.contains("Body."));
    }
}
