//! CMP适配层
//!
//! 把证书签发/撤销请求映射到编排器操作，把内部错误无损地映射为
//! CMP失败信息码。适配层自身不做签发决策：消息保护检查通过后，
//! 权限与状态检查全部由下层完成。

use tracing::{info, warn};

use crate::auth::AuthContext;
use crate::ca::CaAdmin;
use crate::cert::{CertificateData, ExtensionOverride, IssuanceRequest, SubjectInfo};
use crate::dn::SubjectDn;
use crate::error::PkiError;
use crate::profile::KeyUsage;
use crate::store::RevocationOutcome;
use crate::types::RevocationReason;

/// CMP失败信息码
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpFailInfo {
    /// 请求本身非法
    BadRequest,
    /// 消息保护校验失败
    BadMessageCheck,
    /// 请求指向的CA不存在或不由本系统管理
    WrongAuthority,
    /// 撤销请求指向的证书不存在
    BadCertificateId,
    /// 调用者无权执行该操作
    NotAuthorized,
    /// 系统内部失败
    SystemFailure,
}

/// 失败响应
#[derive(Debug, Clone)]
pub struct CmpFailure {
    pub fail_info: CmpFailInfo,
    /// 人类可读的失败说明（内部错误的完整文本）
    pub status_text: String,
}

/// 签发请求
#[derive(Debug, Clone)]
pub struct CmpCertRequest {
    /// 目标CA
    pub ca_id: i32,
    /// 证书profile
    pub profile_id: i32,
    /// 主体DN
    pub subject_dn: SubjectDn,
    /// 终端实体用户名
    pub username: String,
    /// 主体公钥（SPKI DER）
    pub spki_der: Vec<u8>,
    /// DNS主体备用名
    pub dns_names: Vec<String>,
    /// 请求的有效期（profile允许时生效）
    pub validity: Option<(time::OffsetDateTime, time::OffsetDateTime)>,
    /// 请求的密钥用途（profile允许时生效）
    pub key_usages: Option<Vec<KeyUsage>>,
    /// 扩展覆盖
    pub extension_overrides: Vec<ExtensionOverride>,
    /// 消息保护口令
    pub auth_secret: Option<String>,
}

/// 撤销请求
#[derive(Debug, Clone)]
pub struct CmpRevocationRequest {
    pub ca_id: i32,
    /// 证书序列号（十六进制）
    pub serial_hex: String,
    pub reason: RevocationReason,
    pub auth_secret: Option<String>,
}

/// 签发响应
#[derive(Debug, Clone)]
pub enum CmpCertResponse {
    Granted(CertificateData),
    Rejected(CmpFailure),
}

/// 撤销响应
#[derive(Debug, Clone)]
pub enum CmpRevocationResponse {
    Granted(RevocationOutcome),
    Rejected(CmpFailure),
}

/// CMP适配器
///
/// 持有RA身份（下层权限检查用）与可选的消息保护口令。
pub struct CmpAdapter {
    auth: AuthContext,
    shared_secret: Option<String>,
}

impl CmpAdapter {
    pub fn new(auth: AuthContext) -> Self {
        Self {
            auth,
            shared_secret: None,
        }
    }

    /// 启用共享口令消息保护
    pub fn with_shared_secret(mut self, secret: &str) -> Self {
        self.shared_secret = Some(secret.to_string());
        self
    }

    /// 处理签发请求
    pub fn certify(&self, admin: &mut CaAdmin, request: CmpCertRequest) -> CmpCertResponse {
        if let Err(failure) = self.check_protection(request.auth_secret.as_deref()) {
            return CmpCertResponse::Rejected(failure);
        }

        let mut subject = SubjectInfo::new(request.subject_dn, request.username);
        for name in &request.dns_names {
            subject = subject.with_dns_name(name);
        }
        let mut issuance =
            IssuanceRequest::new(subject).with_public_key(request.spki_der);
        if let Some((not_before, not_after)) = request.validity {
            issuance = issuance.with_validity(not_before, not_after);
        }
        if let Some(usages) = request.key_usages {
            issuance = issuance.with_key_usages(usages);
        }
        for ext in request.extension_overrides {
            issuance = issuance.with_extension_override(ext);
        }

        match admin.issue_certificate(&self.auth, request.ca_id, request.profile_id, issuance) {
            Ok(cert) => {
                info!(serial = %cert.serial_hex, "CMP certificate request granted");
                CmpCertResponse::Granted(cert)
            }
            Err(e) => CmpCertResponse::Rejected(reject(&e)),
        }
    }

    /// 处理撤销请求
    pub fn revoke(
        &self,
        admin: &mut CaAdmin,
        request: CmpRevocationRequest,
    ) -> CmpRevocationResponse {
        if let Err(failure) = self.check_protection(request.auth_secret.as_deref()) {
            return CmpRevocationResponse::Rejected(failure);
        }

        match admin.revoke_certificate(
            &self.auth,
            request.ca_id,
            &request.serial_hex,
            request.reason,
        ) {
            Ok(outcome) => {
                info!(serial = %request.serial_hex, ?outcome, "CMP revocation request granted");
                CmpRevocationResponse::Granted(outcome)
            }
            Err(e) => CmpRevocationResponse::Rejected(reject(&e)),
        }
    }

    /// 消息保护检查（适配器配置口令时必须匹配）
    fn check_protection(&self, provided: Option<&str>) -> Result<(), CmpFailure> {
        let Some(expected) = &self.shared_secret else {
            return Ok(());
        };
        if provided == Some(expected.as_str()) {
            return Ok(());
        }
        warn!("CMP message protection check failed");
        Err(CmpFailure {
            fail_info: CmpFailInfo::BadMessageCheck,
            status_text: "message protection verification failed".to_string(),
        })
    }
}

/// 内部错误到CMP失败信息的无损映射
///
/// 分类映射到对应信息码，完整错误文本保留在status_text中。
fn reject(err: &PkiError) -> CmpFailure {
    let fail_info = match err {
        PkiError::AuthorizationDenied { .. } => CmpFailInfo::NotAuthorized,
        PkiError::CaDoesNotExist(_) => CmpFailInfo::WrongAuthority,
        PkiError::CertificateNotFound(_) => CmpFailInfo::BadCertificateId,
        PkiError::BadRequest(_) | PkiError::ParseError(_) | PkiError::ProfileError(_) => {
            CmpFailInfo::BadRequest
        }
        PkiError::TokenAuthFailed(_) => CmpFailInfo::BadMessageCheck,
        _ => CmpFailInfo::SystemFailure,
    };
    warn!(?fail_info, error = %err, "CMP request rejected");
    CmpFailure {
        fail_info,
        status_text: err.to_string(),
    }
}
