//! 授权上下文
//!
//! CA生命周期操作要求管理员权限，令牌激活/停用使用更窄的操作员权限。
//! 拒绝总是先记录操作者身份再返回错误，绝不静默降级。

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{PkiError, Result};

/// 角色
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Role {
    /// CA管理员（创建/更名/删除/续期/撤销CA）
    CaAdmin,
    /// 令牌操作员（仅激活/停用CA令牌）
    TokenOperator,
    /// RA操作员（证书签发/撤销）
    RaOperator,
}

/// 调用者授权上下文
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthContext {
    /// 操作者身份
    pub admin: String,
    /// 被授予的角色
    pub roles: Vec<Role>,
}

impl AuthContext {
    pub fn new(admin: impl Into<String>, roles: Vec<Role>) -> Self {
        Self { admin: admin.into(), roles }
    }

    /// 具备全部权限的管理员上下文
    pub fn super_admin(admin: impl Into<String>) -> Self {
        Self::new(admin, vec![Role::CaAdmin, Role::TokenOperator, Role::RaOperator])
    }

    /// 检查角色，不满足时记录并返回 AuthorizationDenied
    pub fn require(&self, role: Role, operation: &str) -> Result<()> {
        if self.roles.contains(&role) {
            return Ok(());
        }
        warn!(admin = %self.admin, operation, ?role, "authorization denied");
        Err(PkiError::AuthorizationDenied {
            admin: self.admin.clone(),
            operation: operation.to_string(),
        })
    }
}
