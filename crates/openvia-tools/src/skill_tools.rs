//! Skill tools: list and read user-supplied knowledge documents.
//!
//! Skills are markdown files dropped into the skills directory
//! (`~/.openvia/skills` by default). The model discovers them with
//! `list_skills` and pulls one in with `read_skill`; nothing is injected
//! into the system prompt.

use std::path::PathBuf;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use openvia_core::{ExecContext, FieldType, Tool, ToolError, ToolInputSchema};

/// List available skill documents with one-line summaries.
pub struct ListSkillsTool {
    skills_dir: PathBuf,
}

impl ListSkillsTool {
    /// Create the tool over the given skills directory.
    pub fn new(skills_dir: PathBuf) -> Self {
        Self { skills_dir }
    }
}

#[async_trait]
impl Tool for ListSkillsTool {
    fn name(&self) -> &str {
        "list_skills"
    }

    fn description(&self) -> &str {
        "List available skill documents with a one-line summary of each."
    }

    fn input_schema(&self) -> ToolInputSchema {
        ToolInputSchema::new()
    }

    fn permission_tags(&self) -> Vec<String> {
        vec!["skills".into(), "read".into()]
    }

    async fn execute(&self, _args: Value, _ctx: &ExecContext) -> Result<Value, ToolError> {
        let mut skills = Vec::new();

        let mut entries = match tokio::fs::read_dir(&self.skills_dir).await {
            Ok(entries) => entries,
            // A missing skills directory just means no skills yet.
            Err(_) => return Ok(json!({ "skills": [] })),
        };

        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("md") {
                continue;
            }
            let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let summary = tokio::fs::read_to_string(&path)
                .await
                .ok()
                .and_then(|content| {
                    content
                        .lines()
                        .find(|l| !l.trim().is_empty())
                        .map(|l| l.trim_start_matches('#').trim().to_string())
                })
                .unwrap_or_default();
            skills.push(json!({ "name": name, "summary": summary }));
        }

        skills.sort_by(|a, b| a["name"].as_str().cmp(&b["name"].as_str()));
        debug!(count = skills.len(), "listed skills");
        Ok(json!({ "skills": skills }))
    }
}

/// Read one skill document by name.
pub struct ReadSkillTool {
    skills_dir: PathBuf,
}

impl ReadSkillTool {
    /// Create the tool over the given skills directory.
    pub fn new(skills_dir: PathBuf) -> Self {
        Self { skills_dir }
    }
}

#[async_trait]
impl Tool for ReadSkillTool {
    fn name(&self) -> &str {
        "read_skill"
    }

    fn description(&self) -> &str {
        "Read the full content of a named skill document."
    }

    fn input_schema(&self) -> ToolInputSchema {
        ToolInputSchema::new().required(
            "name",
            FieldType::String,
            "The skill name as returned by list_skills",
        )
    }

    fn permission_tags(&self) -> Vec<String> {
        vec!["skills".into(), "read".into()]
    }

    async fn execute(&self, args: Value, _ctx: &ExecContext) -> Result<Value, ToolError> {
        let name = args
            .get("name")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ToolError::InvalidArgs("missing required field: name".into()))?;

        // Skill names are bare stems; separators would allow escaping the
        // skills directory.
        if name.contains('/') || name.contains('\\') || name.contains("..") {
            return Err(ToolError::InvalidPath(format!("invalid skill name: {name}")));
        }

        let path = self.skills_dir.join(format!("{name}.md"));
        let content = tokio::fs::read_to_string(&path)
            .await
            .map_err(|_| ToolError::FileNotFound(format!("skill not found: {name}")))?;

        Ok(json!({ "name": name, "content": content }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    static COUNTER: AtomicU64 = AtomicU64::new(0);

    fn ctx() -> ExecContext {
        ExecContext {
            user_id: "u".into(),
            chat_id: "c".into(),
            work_dir: std::env::temp_dir(),
        }
    }

    async fn skills_dir() -> PathBuf {
        let id = COUNTER.fetch_add(1, Ordering::Relaxed);
        let pid = std::process::id();
        let dir = std::env::temp_dir().join(format!("openvia_skills_test_{pid}_{id}"));
        tokio::fs::create_dir_all(&dir).await.unwrap();
        dir
    }

    #[tokio::test]
    async fn list_empty_when_dir_missing() {
        let tool = ListSkillsTool::new(PathBuf::from("/nonexistent/skills/dir"));
        let result = tool.execute(json!({}), &ctx()).await.unwrap();
        assert_eq!(result["skills"].as_array().unwrap().len(), 0);
    }

    #[tokio::test]
    async fn list_returns_names_and_summaries() {
        let dir = skills_dir().await;
        tokio::fs::write(dir.join("deploy.md"), "# Deploying\nSteps...")
            .await
            .unwrap();
        tokio::fs::write(dir.join("billing.md"), "Billing runbook\n...")
            .await
            .unwrap();
        tokio::fs::write(dir.join("ignore.txt"), "not a skill")
            .await
            .unwrap();

        let tool = ListSkillsTool::new(dir.clone());
        let result = tool.execute(json!({}), &ctx()).await.unwrap();
        let skills = result["skills"].as_array().unwrap();
        assert_eq!(skills.len(), 2);
        assert_eq!(skills[0]["name"], "billing");
        assert_eq!(skills[0]["summary"], "Billing runbook");
        assert_eq!(skills[1]["name"], "deploy");
        assert_eq!(skills[1]["summary"], "Deploying");

        let _ = tokio::fs::remove_dir_all(&dir).await;
    }

    #[tokio::test]
    async fn read_skill_roundtrip() {
        let dir = skills_dir().await;
        tokio::fs::write(dir.join("deploy.md"), "# Deploying\nrun the thing")
            .await
            .unwrap();

        let tool = ReadSkillTool::new(dir.clone());
        let result = tool.execute(json!({"name": "deploy"}), &ctx()).await.unwrap();
        assert_eq!(result["name"], "deploy");
        assert!(result["content"].as_str().unwrap().contains("run the thing"));

        let _ = tokio::fs::remove_dir_all(&dir).await;
    }

    #[tokio::test]
    async fn read_unknown_skill_fails() {
        let dir = skills_dir().await;
        let tool = ReadSkillTool::new(dir.clone());
        let err = tool
            .execute(json!({"name": "ghost"}), &ctx())
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::FileNotFound(_)));
        let _ = tokio::fs::remove_dir_all(&dir).await;
    }

    #[tokio::test]
    async fn read_rejects_path_separators() {
        let dir = skills_dir().await;
        let tool = ReadSkillTool::new(dir.clone());
        for name in ["../secrets", "a/b", "a\\b"] {
            let err = tool
                .execute(json!({"name": name}), &ctx())
                .await
                .unwrap_err();
            assert!(matches!(err, ToolError::InvalidPath(_)), "{name}");
        }
        let _ = tokio::fs::remove_dir_all(&dir).await;
    }
}
