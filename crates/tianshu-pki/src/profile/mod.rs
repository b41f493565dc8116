//! 证书配置文件（profile）
//!
//! 声明式策略对象：控制有效期、密钥用途、扩展集合、DN处理与
//! CRL分发点。签发过程只读取不修改；带版本号支持读取时升级。

use serde::{Deserialize, Serialize};

use crate::dn::{DnEncoding, DnOrder, SubjectDn};
use crate::error::{PkiError, Result};

/// 当前profile结构版本
pub const LATEST_PROFILE_VERSION: u32 = 2;

/// 内置固定profile的ID与名称（不可添加同名/更名为同名/删除）
pub const FIXED_PROFILE_ROOTCA: (i32, &str) = (1, "ROOTCA");
pub const FIXED_PROFILE_SUBCA: (i32, &str) = (2, "SUBCA");
pub const FIXED_PROFILE_ENDUSER: (i32, &str) = (3, "ENDUSER");

/// 固定profile名称列表
pub fn fixed_profile_names() -> [&'static str; 3] {
    [
        FIXED_PROFILE_ROOTCA.1,
        FIXED_PROFILE_SUBCA.1,
        FIXED_PROFILE_ENDUSER.1,
    ]
}

/// profile类型
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ProfileType {
    /// 根CA
    RootCa,
    /// 下级CA
    SubCa,
    /// 终端实体
    EndEntity,
}

/// 密钥用途位
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum KeyUsage {
    DigitalSignature,
    ContentCommitment,
    KeyEncipherment,
    DataEncipherment,
    KeyAgreement,
    KeyCertSign,
    CrlSign,
}

impl KeyUsage {
    /// 转换为 rcgen 的密钥用途
    pub fn to_rcgen(self) -> rcgen::KeyUsagePurpose {
        match self {
            KeyUsage::DigitalSignature => rcgen::KeyUsagePurpose::DigitalSignature,
            KeyUsage::ContentCommitment => rcgen::KeyUsagePurpose::ContentCommitment,
            KeyUsage::KeyEncipherment => rcgen::KeyUsagePurpose::KeyEncipherment,
            KeyUsage::DataEncipherment => rcgen::KeyUsagePurpose::DataEncipherment,
            KeyUsage::KeyAgreement => rcgen::KeyUsagePurpose::KeyAgreement,
            KeyUsage::KeyCertSign => rcgen::KeyUsagePurpose::KeyCertSign,
            KeyUsage::CrlSign => rcgen::KeyUsagePurpose::CrlSign,
        }
    }
}

/// 标准扩展（profile中按序启用）
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum StandardExtension {
    BasicConstraints,
    KeyUsage,
    ExtendedKeyUsage,
    SubjectKeyIdentifier,
    AuthorityKeyIdentifier,
    CrlDistributionPoints,
}

impl StandardExtension {
    /// 扩展OID（点分字符串）
    pub fn oid(&self) -> &'static str {
        match self {
            StandardExtension::BasicConstraints => "2.5.29.19",
            StandardExtension::KeyUsage => "2.5.29.15",
            StandardExtension::ExtendedKeyUsage => "2.5.29.37",
            StandardExtension::SubjectKeyIdentifier => "2.5.29.14",
            StandardExtension::AuthorityKeyIdentifier => "2.5.29.35",
            StandardExtension::CrlDistributionPoints => "2.5.29.31",
        }
    }
}

/// DN子集保留的组件
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum DnComponent {
    Cn,
    Ou,
    O,
    L,
    St,
    C,
}

/// 证书配置文件
///
/// 每次签发视为不可变；注册表写操作整体替换并使缓存失效。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CertificateProfile {
    /// 结构版本（读取时升级）
    pub version: u32,
    /// profile类型
    pub profile_type: ProfileType,
    /// 默认有效期（天）
    pub validity_days: u32,
    /// 是否允许调用方覆盖有效期
    pub allow_validity_override: bool,
    /// 是否允许调用方覆盖密钥用途
    pub allow_key_usage_override: bool,
    /// 默认密钥用途
    pub key_usages: Vec<KeyUsage>,
    /// 启用的标准扩展（有序）
    pub enabled_extensions: Vec<StandardExtension>,
    /// CRL分发点URI列表（分号分隔的多值在注册时已拆开）
    pub crl_distribution_point_uris: Vec<String>,
    /// CDP使用CA默认值替换
    pub use_ca_defined_cdp: bool,
    /// CRL本身是否携带CDP扩展
    pub crl_dp_on_crl: bool,
    /// RDN顺序
    pub dn_order: DnOrder,
    /// 主体DN使用PrintableString（否则UTF8）
    pub use_printable_string_dn: bool,
    /// CN后缀注入（如" (signer)"）
    pub cn_postfix: Option<String>,
    /// DN子集（None表示保留全部组件）
    pub dn_subset: Option<Vec<DnComponent>>,
    /// 可用CA范围（空表示不限制）
    pub available_cas: Vec<i32>,
    /// 发布目标ID
    pub publisher_ids: Vec<i32>,
}

impl Default for CertificateProfile {
    fn default() -> Self {
        Self::end_entity()
    }
}

impl CertificateProfile {
    /// 终端实体默认profile（1年）
    pub fn end_entity() -> Self {
        Self {
            version: LATEST_PROFILE_VERSION,
            profile_type: ProfileType::EndEntity,
            validity_days: 365,
            allow_validity_override: false,
            allow_key_usage_override: false,
            key_usages: vec![KeyUsage::DigitalSignature, KeyUsage::KeyEncipherment],
            enabled_extensions: vec![
                StandardExtension::BasicConstraints,
                StandardExtension::KeyUsage,
                StandardExtension::SubjectKeyIdentifier,
                StandardExtension::AuthorityKeyIdentifier,
                StandardExtension::CrlDistributionPoints,
            ],
            crl_distribution_point_uris: Vec::new(),
            use_ca_defined_cdp: false,
            crl_dp_on_crl: false,
            dn_order: DnOrder::Ldap,
            use_printable_string_dn: false,
            cn_postfix: None,
            dn_subset: None,
            available_cas: Vec::new(),
            publisher_ids: Vec::new(),
        }
    }

    /// 根CA profile（10年）
    pub fn root_ca() -> Self {
        Self {
            profile_type: ProfileType::RootCa,
            validity_days: 3650,
            key_usages: vec![
                KeyUsage::DigitalSignature,
                KeyUsage::KeyCertSign,
                KeyUsage::CrlSign,
            ],
            ..Self::end_entity()
        }
    }

    /// 下级CA profile（5年）
    pub fn sub_ca() -> Self {
        Self {
            profile_type: ProfileType::SubCa,
            validity_days: 1825,
            key_usages: vec![
                KeyUsage::DigitalSignature,
                KeyUsage::KeyCertSign,
                KeyUsage::CrlSign,
            ],
            ..Self::end_entity()
        }
    }

    /// 设置有效期
    pub fn with_validity_days(mut self, days: u32) -> Self {
        self.validity_days = days;
        self
    }

    /// 允许调用方覆盖有效期
    pub fn with_validity_override(mut self, allow: bool) -> Self {
        self.allow_validity_override = allow;
        self
    }

    /// 允许调用方覆盖密钥用途
    pub fn with_key_usage_override(mut self, allow: bool) -> Self {
        self.allow_key_usage_override = allow;
        self
    }

    /// 设置CRL分发点（接受分号分隔的多值）
    pub fn with_crl_distribution_points(mut self, uris: &str) -> Self {
        self.crl_distribution_point_uris = uris
            .split(';')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        self
    }

    /// 设置DN策略
    pub fn with_dn_policy(mut self, order: DnOrder, printable: bool) -> Self {
        self.dn_order = order;
        self.use_printable_string_dn = printable;
        self
    }

    /// DN编码选择
    pub fn dn_encoding(&self) -> DnEncoding {
        if self.use_printable_string_dn {
            DnEncoding::Printable
        } else {
            DnEncoding::Utf8
        }
    }

    /// 按profile策略改写主体DN（子集裁剪 + CN后缀注入），编码前调用
    pub fn rewrite_subject_dn(&self, dn: &SubjectDn) -> SubjectDn {
        let mut out = dn.clone();
        if let Some(keep) = &self.dn_subset {
            if !keep.contains(&DnComponent::Ou) {
                out.organizational_unit = None;
            }
            if !keep.contains(&DnComponent::O) {
                out.organization = None;
            }
            if !keep.contains(&DnComponent::L) {
                out.locality = None;
            }
            if !keep.contains(&DnComponent::St) {
                out.state = None;
            }
            if !keep.contains(&DnComponent::C) {
                out.country = None;
            }
        }
        if let Some(postfix) = &self.cn_postfix {
            out.common_name = format!("{}{}", out.common_name, postfix);
        }
        out
    }

    /// profile是否允许该CA使用
    pub fn is_ca_allowed(&self, ca_id: i32) -> bool {
        self.available_cas.is_empty() || self.available_cas.contains(&ca_id)
    }

    /// 是否CA类型profile
    pub fn is_ca_profile(&self) -> bool {
        matches!(self.profile_type, ProfileType::RootCa | ProfileType::SubCa)
    }

    /// 读取时升级到当前版本
    ///
    /// 版本1没有 `crl_dp_on_crl` 与 `dn_subset` 概念，升级时取默认值。
    pub fn upgrade(&mut self) {
        if self.version < LATEST_PROFILE_VERSION {
            self.version = LATEST_PROFILE_VERSION;
        }
    }

    /// 校验profile的一致性
    pub fn validate(&self) -> Result<()> {
        if self.validity_days == 0 {
            return Err(PkiError::ProfileError(
                "validity_days must be greater than 0".to_string(),
            ));
        }
        if self.key_usages.is_empty() {
            return Err(PkiError::ProfileError(
                "at least one key usage is required".to_string(),
            ));
        }
        if self.is_ca_profile()
            && !self.key_usages.contains(&KeyUsage::KeyCertSign)
        {
            return Err(PkiError::ProfileError(
                "CA profile must include KeyCertSign usage".to_string(),
            ));
        }
        Ok(())
    }
}
