//! File tools: read, write, and edit.
//!
//! All three enforce workspace containment: paths resolve relative to the
//! session working directory, are canonicalized, and must remain inside
//! it. Reads are capped at [`MAX_READ_BYTES`].

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use openvia_core::{ExecContext, FieldType, Tool, ToolError, ToolInputSchema};

/// Maximum file size `read_file` will return.
pub const MAX_READ_BYTES: u64 = 10 * 1024 * 1024;

/// Resolve `path` against `workspace` and verify it stays inside.
///
/// Used for paths that must already exist (reads, edits).
fn validate_path(path: &str, workspace: &Path) -> Result<PathBuf, ToolError> {
    let resolved = workspace.join(path);
    let canonical = std::fs::canonicalize(&resolved)
        .map_err(|_| ToolError::FileNotFound(path.to_string()))?;

    let workspace_canonical = std::fs::canonicalize(workspace)
        .map_err(|e| ToolError::ExecutionFailed(e.to_string()))?;

    if !canonical.starts_with(&workspace_canonical) {
        return Err(ToolError::InvalidPath(format!(
            "path escapes workspace: {path}"
        )));
    }
    Ok(canonical)
}

/// Containment check for paths that may not exist yet (writes): the
/// deepest existing ancestor must canonicalize inside the workspace.
fn validate_parent_path(path: &str, workspace: &Path) -> Result<PathBuf, ToolError> {
    let resolved = workspace.join(path);

    let mut ancestor = resolved.as_path();
    loop {
        if ancestor.exists() {
            break;
        }
        ancestor = ancestor
            .parent()
            .ok_or_else(|| ToolError::InvalidPath(format!("path escapes workspace: {path}")))?;
    }

    let canonical_ancestor = std::fs::canonicalize(ancestor)
        .map_err(|e| ToolError::ExecutionFailed(e.to_string()))?;
    let workspace_canonical = std::fs::canonicalize(workspace)
        .map_err(|e| ToolError::ExecutionFailed(e.to_string()))?;

    if !canonical_ancestor.starts_with(&workspace_canonical) {
        return Err(ToolError::InvalidPath(format!(
            "path escapes workspace: {path}"
        )));
    }
    Ok(resolved)
}

/// Extract a required string field from the arguments object.
fn required_str(args: &Value, field: &str) -> Result<String, ToolError> {
    args.get(field)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| ToolError::InvalidArgs(format!("missing required field: {field}")))
}

async fn ensure_workspace(ctx: &ExecContext) -> Result<(), ToolError> {
    tokio::fs::create_dir_all(&ctx.work_dir)
        .await
        .map_err(|e| ToolError::ExecutionFailed(format!("workspace unavailable: {e}")))
}

// ---------------------------------------------------------------------------
// read_file
// ---------------------------------------------------------------------------

/// Read a file from the session workspace.
pub struct ReadFileTool;

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read the contents of a file at the given path (relative to the session workspace)."
    }

    fn input_schema(&self) -> ToolInputSchema {
        ToolInputSchema::new().required("path", FieldType::String, "The file path to read")
    }

    fn permission_tags(&self) -> Vec<String> {
        vec!["fs".into(), "read".into()]
    }

    async fn execute(&self, args: Value, ctx: &ExecContext) -> Result<Value, ToolError> {
        let path = required_str(&args, "path")?;
        ensure_workspace(ctx).await?;
        let canonical = validate_path(&path, &ctx.work_dir)?;

        let meta = tokio::fs::metadata(&canonical)
            .await
            .map_err(|e| ToolError::ExecutionFailed(format!("stat failed: {e}")))?;
        if meta.len() > MAX_READ_BYTES {
            return Err(ToolError::ExecutionFailed(format!(
                "file too large: {} bytes (limit {MAX_READ_BYTES})",
                meta.len()
            )));
        }

        debug!(path = %canonical.display(), "reading file");
        let content = tokio::fs::read_to_string(&canonical)
            .await
            .map_err(|e| ToolError::ExecutionFailed(format!("read failed: {e}")))?;

        Ok(json!({ "content": content }))
    }
}

// ---------------------------------------------------------------------------
// write_file
// ---------------------------------------------------------------------------

/// Write (or overwrite) a file in the session workspace, creating parent
/// directories as needed.
pub struct WriteFileTool;

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Write content to a file, creating parent directories if needed. Overwrites existing files."
    }

    fn input_schema(&self) -> ToolInputSchema {
        ToolInputSchema::new()
            .required("path", FieldType::String, "The file path to write")
            .required("content", FieldType::String, "The content to write")
    }

    fn permission_tags(&self) -> Vec<String> {
        vec!["fs".into(), "write".into()]
    }

    async fn execute(&self, args: Value, ctx: &ExecContext) -> Result<Value, ToolError> {
        let path = required_str(&args, "path")?;
        let content = required_str(&args, "content")?;
        ensure_workspace(ctx).await?;
        let resolved = validate_parent_path(&path, &ctx.work_dir)?;

        if let Some(parent) = resolved.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| ToolError::ExecutionFailed(format!("mkdir failed: {e}")))?;
        }

        debug!(path = %resolved.display(), bytes = content.len(), "writing file");
        tokio::fs::write(&resolved, &content)
            .await
            .map_err(|e| ToolError::ExecutionFailed(format!("write failed: {e}")))?;

        Ok(json!({ "bytes_written": content.len() }))
    }
}

// ---------------------------------------------------------------------------
// edit_file
// ---------------------------------------------------------------------------

/// Replace a unique occurrence of `old_text` with `new_text` in a file.
/// Ambiguous matches are rejected so an edit never lands on the wrong
/// site.
pub struct EditFileTool;

#[async_trait]
impl Tool for EditFileTool {
    fn name(&self) -> &str {
        "edit_file"
    }

    fn description(&self) -> &str {
        "Replace old_text with new_text in a file. old_text must match exactly one location."
    }

    fn input_schema(&self) -> ToolInputSchema {
        ToolInputSchema::new()
            .required("path", FieldType::String, "The file path to edit")
            .required("old_text", FieldType::String, "The exact text to replace")
            .required("new_text", FieldType::String, "The replacement text")
    }

    fn permission_tags(&self) -> Vec<String> {
        vec!["fs".into(), "write".into()]
    }

    async fn execute(&self, args: Value, ctx: &ExecContext) -> Result<Value, ToolError> {
        let path = required_str(&args, "path")?;
        let old_text = required_str(&args, "old_text")?;
        let new_text = required_str(&args, "new_text")?;

        if old_text.is_empty() {
            return Err(ToolError::InvalidArgs("old_text must not be empty".into()));
        }

        ensure_workspace(ctx).await?;
        let canonical = validate_path(&path, &ctx.work_dir)?;

        let content = tokio::fs::read_to_string(&canonical)
            .await
            .map_err(|e| ToolError::ExecutionFailed(format!("read failed: {e}")))?;

        let count = content.matches(&old_text).count();
        if count == 0 {
            return Err(ToolError::ExecutionFailed(format!(
                "old_text not found in {path}"
            )));
        }
        if count > 1 {
            return Err(ToolError::InvalidArgs(format!(
                "old_text matches {count} locations in {path}; include more context to make it unique"
            )));
        }

        let updated = content.replacen(&old_text, &new_text, 1);

        debug!(path = %canonical.display(), "editing file");
        tokio::fs::write(&canonical, &updated)
            .await
            .map_err(|e| ToolError::ExecutionFailed(format!("write failed: {e}")))?;

        Ok(json!({ "replaced": true }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    static COUNTER: AtomicU64 = AtomicU64::new(0);

    fn ctx() -> ExecContext {
        let id = COUNTER.fetch_add(1, Ordering::Relaxed);
        let pid = std::process::id();
        ExecContext {
            user_id: "u".into(),
            chat_id: "c".into(),
            work_dir: std::env::temp_dir().join(format!("openvia_file_test_{pid}_{id}")),
        }
    }

    async fn cleanup(ctx: &ExecContext) {
        let _ = tokio::fs::remove_dir_all(&ctx.work_dir).await;
    }

    #[tokio::test]
    async fn write_then_read_roundtrip() {
        let ctx = ctx();
        let written = WriteFileTool
            .execute(json!({"path": "notes.txt", "content": "hello"}), &ctx)
            .await
            .unwrap();
        assert_eq!(written["bytes_written"], 5);

        let read = ReadFileTool
            .execute(json!({"path": "notes.txt"}), &ctx)
            .await
            .unwrap();
        assert_eq!(read["content"], "hello");
        cleanup(&ctx).await;
    }

    #[tokio::test]
    async fn write_creates_parent_dirs() {
        let ctx = ctx();
        WriteFileTool
            .execute(json!({"path": "a/b/c.txt", "content": "deep"}), &ctx)
            .await
            .unwrap();
        let read = ReadFileTool
            .execute(json!({"path": "a/b/c.txt"}), &ctx)
            .await
            .unwrap();
        assert_eq!(read["content"], "deep");
        cleanup(&ctx).await;
    }

    #[tokio::test]
    async fn read_missing_file_fails() {
        let ctx = ctx();
        tokio::fs::create_dir_all(&ctx.work_dir).await.unwrap();
        let err = ReadFileTool
            .execute(json!({"path": "missing.txt"}), &ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::FileNotFound(_)));
        cleanup(&ctx).await;
    }

    #[tokio::test]
    async fn path_traversal_rejected() {
        let ctx = ctx();
        tokio::fs::create_dir_all(&ctx.work_dir).await.unwrap();

        let err = WriteFileTool
            .execute(
                json!({"path": "../outside.txt", "content": "nope"}),
                &ctx,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidPath(_)), "got: {err}");

        // Reads through traversal are rejected too (the file exists).
        let err = ReadFileTool
            .execute(json!({"path": "../../etc/hostname"}), &ctx)
            .await
            .unwrap_err();
        assert!(
            matches!(err, ToolError::InvalidPath(_) | ToolError::FileNotFound(_)),
            "got: {err}"
        );
        cleanup(&ctx).await;
    }

    #[tokio::test]
    async fn edit_replaces_unique_occurrence() {
        let ctx = ctx();
        WriteFileTool
            .execute(
                json!({"path": "f.txt", "content": "one two three"}),
                &ctx,
            )
            .await
            .unwrap();

        EditFileTool
            .execute(
                json!({"path": "f.txt", "old_text": "two", "new_text": "2"}),
                &ctx,
            )
            .await
            .unwrap();

        let read = ReadFileTool.execute(json!({"path": "f.txt"}), &ctx).await.unwrap();
        assert_eq!(read["content"], "one 2 three");
        cleanup(&ctx).await;
    }

    #[tokio::test]
    async fn edit_rejects_ambiguous_match() {
        let ctx = ctx();
        WriteFileTool
            .execute(
                json!({"path": "f.txt", "content": "one two one"}),
                &ctx,
            )
            .await
            .unwrap();

        let err = EditFileTool
            .execute(
                json!({"path": "f.txt", "old_text": "one", "new_text": "1"}),
                &ctx,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidArgs(_)), "got: {err}");
        assert!(err.to_string().contains("2 locations"), "got: {err}");

        // The file is untouched after a rejected edit.
        let read = ReadFileTool.execute(json!({"path": "f.txt"}), &ctx).await.unwrap();
        assert_eq!(read["content"], "one two one");
        cleanup(&ctx).await;
    }

    #[tokio::test]
    async fn edit_missing_old_text_fails() {
        let ctx = ctx();
        WriteFileTool
            .execute(json!({"path": "f.txt", "content": "abc"}), &ctx)
            .await
            .unwrap();
        let err = EditFileTool
            .execute(
                json!({"path": "f.txt", "old_text": "zzz", "new_text": "y"}),
                &ctx,
            )
            .await
            .unwrap_err();
        assert!(err.to_string().contains("not found"));
        cleanup(&ctx).await;
    }

    #[tokio::test]
    async fn edit_rejects_empty_old_text() {
        let ctx = ctx();
        let err = EditFileTool
            .execute(
                json!({"path": "f.txt", "old_text": "", "new_text": "y"}),
                &ctx,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidArgs(_)));
        cleanup(&ctx).await;
    }

}
