//! API 模块
//!
//! 对外提供的上下文接口。
//!
//! # 模块概览
//!
//! - `context`: [`ModuleContext`] 对象安全接口，由 [`crate::ModuleRegistry`] 实现

pub mod context;

pub use context::ModuleContext;
