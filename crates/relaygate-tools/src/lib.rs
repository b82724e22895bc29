// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
pub mod builtin;
pub mod registry;
pub mod sandbox;
pub mod tool;

pub use registry::{BuiltinTools, ToolSchema};
pub use sandbox::{RequestContext, SandboxError};
pub use tool::{Mutating, OutputCategory, Tool, ToolCall, ToolOutput, ToolOutputPart};

pub use builtin::apply_patch::ApplyPatchTool;
pub use builtin::code_structure::CodeStructureTool;
pub use builtin::grep::GrepTool;
pub use builtin::list_dir::ListDirTool;
pub use builtin::read_file::{DiffFilesTool, ReadFileTool};
pub use builtin::shell::ShellTool;
pub use builtin::vcs::VcsTool;
pub use builtin::write::{CreateFileTool, WriteFileTool};
