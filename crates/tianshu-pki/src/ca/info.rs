//! CA记录与信息快照
//!
//! `CaRecord` 是编排器内部持有的完整状态（含令牌与签发句柄），
//! `CaInfo` 是可序列化的只读快照。CA ID从规范化主体DN派生，
//! 整个生命周期不变。

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::cert::{CertificateData, IssuingCa};
use crate::crl::{CrlInfo, CrlPolicy};
use crate::dn::SubjectDn;
use crate::error::{PkiError, Result};
use crate::token::{CaToken, KeyAlgorithm};
use crate::types::{CaStatus, RevocationReason, SignedBy};

/// OCSP签名者子服务配置
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct OcspSignerConfig {
    /// 是否在CA激活时签发OCSP签名者证书
    pub enabled: bool,
    /// 已签发的OCSP签名者证书指纹
    pub signer_fingerprint: Option<String>,
}

/// 创建CA的配置
#[derive(Debug, Clone)]
pub struct CaCreateConfig {
    /// CA名称（管理用，唯一）
    pub name: String,
    /// 主体DN
    pub subject_dn: SubjectDn,
    /// 签名关系
    pub signed_by: SignedBy,
    /// 密钥算法
    pub key_algorithm: KeyAlgorithm,
    /// 令牌激活码
    pub auth_code: String,
    /// CRL签发策略
    pub crl_policy: CrlPolicy,
    /// 发布目标
    pub publisher_ids: Vec<i32>,
    /// CA级默认CRL分发点
    pub default_cdp: Option<String>,
    /// OCSP签名者子服务
    pub ocsp_signer_enabled: bool,
}

impl CaCreateConfig {
    pub fn new(name: impl Into<String>, subject_dn: SubjectDn, auth_code: &str) -> Self {
        Self {
            name: name.into(),
            subject_dn,
            signed_by: SignedBy::SelfSigned,
            key_algorithm: KeyAlgorithm::Ed25519,
            auth_code: auth_code.to_string(),
            crl_policy: CrlPolicy::default(),
            publisher_ids: Vec::new(),
            default_cdp: None,
            ocsp_signer_enabled: false,
        }
    }

    /// 设置签名关系
    pub fn with_signed_by(mut self, signed_by: SignedBy) -> Self {
        self.signed_by = signed_by;
        self
    }

    /// 设置密钥算法
    pub fn with_key_algorithm(mut self, algorithm: KeyAlgorithm) -> Self {
        self.key_algorithm = algorithm;
        self
    }

    /// 设置CRL策略
    pub fn with_crl_policy(mut self, policy: CrlPolicy) -> Self {
        self.crl_policy = policy;
        self
    }

    /// 设置发布目标
    pub fn with_publishers(mut self, ids: Vec<i32>) -> Self {
        self.publisher_ids = ids;
        self
    }

    /// 启用OCSP签名者子服务
    pub fn with_ocsp_signer(mut self) -> Self {
        self.ocsp_signer_enabled = true;
        self
    }
}

/// CA的内部记录
///
/// 外部签发的CA（`SignedBy::ExternalCa`处理对端请求产生的条目）
/// 没有本地令牌；等待响应期间证书链为空。
pub struct CaRecord {
    pub ca_id: i32,
    pub name: String,
    pub subject_dn: SubjectDn,
    pub status: CaStatus,
    pub signed_by: SignedBy,
    pub key_algorithm: KeyAlgorithm,
    /// 本地令牌（托管外部CA时为None）
    pub token: Option<CaToken>,
    /// 证书链，叶（CA自身证书）在前
    pub chain: Vec<CertificateData>,
    /// rcgen签发句柄（激活后可用）
    pub(crate) signer_handle: Option<rcgen::Certificate>,
    pub crl_policy: CrlPolicy,
    /// 下一个CRL号（全量与增量共用同一序列）
    pub next_crl_number: u32,
    pub last_full_crl: Option<CrlInfo>,
    pub last_delta_crl: Option<CrlInfo>,
    pub publisher_ids: Vec<i32>,
    pub default_cdp: Option<String>,
    pub ocsp_signer: OcspSignerConfig,
    /// 撤销原因（仅Revoked状态下为Some）
    pub revocation_reason: Option<RevocationReason>,
    /// 撤销时间（仅Revoked状态下为Some）
    pub revocation_date: Option<OffsetDateTime>,
}

impl CaRecord {
    /// CA自身的证书（链首）
    pub fn ca_certificate(&self) -> Option<&CertificateData> {
        self.chain.first()
    }

    /// CA证书过期时间
    pub fn expires_at(&self) -> Option<OffsetDateTime> {
        self.ca_certificate().map(|c| c.not_after)
    }

    /// 组装签发材料；证书链/句柄/令牌任一缺失时按状态错误处理
    pub(crate) fn issuing_ca(&self) -> Result<IssuingCa<'_>> {
        let data = self.ca_certificate().ok_or_else(|| {
            PkiError::IllegalCaStatus(format!("CA '{}' has no certificate", self.name))
        })?;
        let certificate = self.signer_handle.as_ref().ok_or_else(|| {
            PkiError::IllegalCaStatus(format!("CA '{}' has no signing identity", self.name))
        })?;
        let token = self.token.as_ref().ok_or_else(|| {
            PkiError::IllegalCaStatus(format!("CA '{}' has no local key token", self.name))
        })?;
        Ok(IssuingCa {
            certificate,
            data,
            token,
            default_cdp: self.default_cdp.clone(),
        })
    }

    /// 对外快照
    pub fn info(&self) -> CaInfo {
        CaInfo {
            ca_id: self.ca_id,
            name: self.name.clone(),
            subject_dn: self.subject_dn.canonical(),
            status: self.status,
            signed_by: self.signed_by.clone(),
            key_algorithm: self.key_algorithm,
            not_after: self.expires_at(),
            chain: self.chain.clone(),
            crl_policy: self.crl_policy.clone(),
            publisher_ids: self.publisher_ids.clone(),
            ocsp_signer_enabled: self.ocsp_signer.enabled,
            revocation_reason: self.revocation_reason,
            revocation_date: self.revocation_date,
        }
    }
}

/// CA信息快照
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaInfo {
    pub ca_id: i32,
    pub name: String,
    /// 规范化主体DN
    pub subject_dn: String,
    pub status: CaStatus,
    pub signed_by: SignedBy,
    pub key_algorithm: KeyAlgorithm,
    /// CA证书过期时间（等待响应期间为None）
    #[serde(with = "time::serde::rfc3339::option")]
    pub not_after: Option<OffsetDateTime>,
    /// 证书链，叶在前
    pub chain: Vec<CertificateData>,
    pub crl_policy: CrlPolicy,
    pub publisher_ids: Vec<i32>,
    pub ocsp_signer_enabled: bool,
    /// 撤销原因（仅Revoked状态下为Some）
    pub revocation_reason: Option<RevocationReason>,
    /// 撤销时间（仅Revoked状态下为Some）
    #[serde(with = "time::serde::rfc3339::option")]
    pub revocation_date: Option<OffsetDateTime>,
}
