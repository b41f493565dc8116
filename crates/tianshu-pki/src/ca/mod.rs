//! CA管理
//!
//! CA记录、对外信息快照与生命周期编排。状态机与全部管理操作
//! 见 `admin`。

pub mod admin;
pub mod info;

pub use admin::CaAdmin;
pub use info::{CaCreateConfig, CaInfo, CaRecord, OcspSignerConfig};
