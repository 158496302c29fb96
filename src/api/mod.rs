//! API 模块
//!
//! 对外提供的控制器接口。
//!
//! # 模块概览
//!
//! - `controller`: AutomationController 主接口，提供控制器的所有功能访问

pub mod controller;

// 重导出主要类型
pub use controller::{AutomationController, ControllerState, RESTART_MESSAGE};
