//! Utility helpers shared by adapters.

pub mod tool_call_assembler;

pub use tool_call_assembler::{parse_arguments, ToolCallAssembler};
