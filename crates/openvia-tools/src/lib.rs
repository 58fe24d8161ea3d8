//! Built-in tools for the openvia agent.
//!
//! - [`shell_tool`] -- `bash`: shell execution with timeout enforcement
//!   and a bounded output buffer.
//! - [`file_tools`] -- `read_file` / `write_file` / `edit_file`, all
//!   sandboxed to the session working directory.
//! - [`skill_tools`] -- `list_skills` / `read_skill` over the user's
//!   skill document directory.

use std::path::PathBuf;
use std::sync::Arc;

use openvia_core::Tool;

pub mod file_tools;
pub mod shell_tool;
pub mod skill_tools;

pub use file_tools::{EditFileTool, ReadFileTool, WriteFileTool};
pub use shell_tool::ShellTool;
pub use skill_tools::{ListSkillsTool, ReadSkillTool};

/// The standard tool set registered by the gateway at startup.
pub fn builtin_tools(skills_dir: PathBuf) -> Vec<Arc<dyn Tool>> {
    vec![
        Arc::new(ShellTool::new()),
        Arc::new(ReadFileTool),
        Arc::new(WriteFileTool),
        Arc::new(EditFileTool),
        Arc::new(ListSkillsTool::new(skills_dir.clone())),
        Arc::new(ReadSkillTool::new(skills_dir)),
    ]
}
