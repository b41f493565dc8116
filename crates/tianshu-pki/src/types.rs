//! 核心公共类型
//!
//! 证书状态、撤销原因、证书类型等贯穿各模块的枚举定义。

use serde::{Deserialize, Serialize};

/// 证书记录状态
///
/// 状态转移除 CertificateHold 的解除外单向：
/// Active -> Revoked / NotifiedAboutExpiration -> Archived。
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum CertificateStatus {
    /// 有效
    Active,
    /// 已撤销（含暂停：撤销原因为 CertificateHold 时可恢复）
    Revoked,
    /// 已发送过期通知
    NotifiedAboutExpiration,
    /// 已归档（过期且已上CRL）
    Archived,
}

/// 撤销原因（RFC 5280 子集）
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum RevocationReason {
    /// 未撤销（存储层用于表示"无撤销状态"）
    NotRevoked,
    /// 未指定
    Unspecified,
    /// 密钥泄露
    KeyCompromise,
    /// CA密钥泄露
    CaCompromise,
    /// 从属关系改变
    AffiliationChanged,
    /// 被取代
    Superseded,
    /// 停止运营
    CessationOfOperation,
    /// 证书暂停（唯一可逆的撤销原因）
    CertificateHold,
    /// 从CRL移除（仅用于解除 CertificateHold）
    RemoveFromCrl,
}

impl RevocationReason {
    /// 是否为"真实"撤销原因（会导致状态进入 Revoked）
    pub fn is_revoking(&self) -> bool {
        !matches!(self, RevocationReason::NotRevoked | RevocationReason::RemoveFromCrl)
    }

    /// 转换为 rcgen 的CRL条目原因码
    pub fn to_rcgen(self) -> Option<rcgen::RevocationReason> {
        match self {
            RevocationReason::NotRevoked | RevocationReason::RemoveFromCrl => None,
            RevocationReason::Unspecified => Some(rcgen::RevocationReason::Unspecified),
            RevocationReason::KeyCompromise => Some(rcgen::RevocationReason::KeyCompromise),
            RevocationReason::CaCompromise => Some(rcgen::RevocationReason::CaCompromise),
            RevocationReason::AffiliationChanged => {
                Some(rcgen::RevocationReason::AffiliationChanged)
            }
            RevocationReason::Superseded => Some(rcgen::RevocationReason::Superseded),
            RevocationReason::CessationOfOperation => {
                Some(rcgen::RevocationReason::CessationOfOperation)
            }
            RevocationReason::CertificateHold => Some(rcgen::RevocationReason::CertificateHold),
        }
    }
}

/// 证书类型
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum CertificateType {
    /// 终端实体证书
    EndEntity,
    /// 下级CA证书
    SubCa,
    /// 根CA证书
    RootCa,
}

/// CA状态
///
/// 状态机转移见 `ca::admin`。
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum CaStatus {
    /// 离线（令牌未激活）
    Offline,
    /// 在线可签发
    Active,
    /// 等待外部CA的证书响应
    WaitingForCertificateResponse,
    /// 外部CA（本系统无其密钥材料）
    External,
    /// 已过期
    Expired,
    /// 已撤销（不可逆）
    Revoked,
}

/// CA的签名关系
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum SignedBy {
    /// 自签名
    SelfSigned,
    /// 由本系统内的CA签发（值为签发CA的ID）
    Ca(i32),
    /// 由外部CA签发（等待响应）
    ExternalCa,
}
