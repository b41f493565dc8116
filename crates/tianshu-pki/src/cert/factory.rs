//! 证书签发工厂
//!
//! 把主体信息、profile策略与签发CA材料组装成X.509证书：
//! 有效期裁剪、DN改写与编码、扩展装配（覆盖优先）、随机序列号、
//! 签名与签发后自检。所有策略读取profile，工厂自身不保存状态。

use std::collections::HashSet;

use time::{Duration, OffsetDateTime};
use tracing::{debug, error, info, warn};

use crate::dn::SubjectDn;
use crate::error::{PkiError, Result};
use crate::profile::{CertificateProfile, KeyUsage, ProfileType, StandardExtension};
use crate::serial::SerialSource;
use crate::token::{CaToken, KeyPurpose};

use super::verify::{self, OID_EC_PUBLIC_KEY, OID_ED25519};
use super::CertificateData;

/// 默认的notBefore回退量（时钟偏移容忍）
const DEFAULT_BACKDATE_MINUTES: i64 = 10;

/// 签发请求的主体信息与可选覆盖
#[derive(Debug, Clone)]
pub struct SubjectInfo {
    /// 主体DN（签发时按profile改写）
    pub dn: SubjectDn,
    /// 关联的终端实体用户名
    pub username: String,
    /// DNS主体备用名
    pub dns_names: Vec<String>,
}

impl SubjectInfo {
    pub fn new(dn: SubjectDn, username: impl Into<String>) -> Self {
        Self {
            dn,
            username: username.into(),
            dns_names: Vec::new(),
        }
    }

    /// 追加DNS主体备用名
    pub fn with_dns_name(mut self, name: &str) -> Self {
        self.dns_names.push(name.to_string());
        self
    }
}

/// 扩展覆盖（请求方提供的完整扩展值，优先于profile合成值）
#[derive(Debug, Clone)]
pub struct ExtensionOverride {
    /// 扩展OID（点分字符串）
    pub oid: String,
    /// 是否关键
    pub critical: bool,
    /// 扩展值字节（SKI为裸keyIdentifier，其余为extnValue内容DER）
    pub value: Vec<u8>,
}

/// 一次签发请求
#[derive(Debug, Clone)]
pub struct IssuanceRequest {
    /// 主体信息
    pub subject: SubjectInfo,
    /// 主体公钥（SPKI DER）；None表示使用签名令牌自身的证书签名公钥
    pub subject_spki_der: Option<Vec<u8>>,
    /// 请求的密钥用途（profile允许覆盖时生效）
    pub key_usages: Option<Vec<KeyUsage>>,
    /// 请求的生效时间（profile允许覆盖时生效）
    pub not_before: Option<OffsetDateTime>,
    /// 请求的过期时间（profile允许覆盖时生效）
    pub not_after: Option<OffsetDateTime>,
    /// 扩展覆盖
    pub extension_overrides: Vec<ExtensionOverride>,
    /// 可选标签（随证书记录入库）
    pub tag: Option<String>,
}

impl IssuanceRequest {
    pub fn new(subject: SubjectInfo) -> Self {
        Self {
            subject,
            subject_spki_der: None,
            key_usages: None,
            not_before: None,
            not_after: None,
            extension_overrides: Vec::new(),
            tag: None,
        }
    }

    /// 设置主体公钥
    pub fn with_public_key(mut self, spki_der: Vec<u8>) -> Self {
        self.subject_spki_der = Some(spki_der);
        self
    }

    /// 请求有效期
    pub fn with_validity(mut self, not_before: OffsetDateTime, not_after: OffsetDateTime) -> Self {
        self.not_before = Some(not_before);
        self.not_after = Some(not_after);
        self
    }

    /// 请求密钥用途
    pub fn with_key_usages(mut self, usages: Vec<KeyUsage>) -> Self {
        self.key_usages = Some(usages);
        self
    }

    /// 追加扩展覆盖
    pub fn with_extension_override(mut self, ext: ExtensionOverride) -> Self {
        self.extension_overrides.push(ext);
        self
    }

    /// 设置入库标签
    pub fn with_tag(mut self, tag: &str) -> Self {
        self.tag = Some(tag.to_string());
        self
    }
}

/// 签发CA材料
///
/// `certificate` 是CA证书的 rcgen 句柄，签发时颁发者名称从它
/// 逐位复制；`data` 为同一证书的解析形式，用于自检与有效期裁剪。
pub struct IssuingCa<'a> {
    pub certificate: &'a rcgen::Certificate,
    pub data: &'a CertificateData,
    pub token: &'a CaToken,
    /// CA级默认CRL分发点（profile声明使用CA默认时替换profile值）
    pub default_cdp: Option<String>,
}

/// 证书签发工厂
#[derive(Default)]
pub struct CertificateFactory {
    serial: SerialSource,
}

impl CertificateFactory {
    pub fn new() -> Self {
        Self {
            serial: SerialSource::new(),
        }
    }

    /// 签发自签名CA证书（根CA引导）
    ///
    /// 主体公钥与签名密钥都取令牌的证书签名密钥对；不做签发CA
    /// 有效期裁剪。
    pub fn issue_self_signed(
        &self,
        request: &IssuanceRequest,
        profile: &CertificateProfile,
        token: &CaToken,
    ) -> Result<CertificateData> {
        let key = token.signing_key(KeyPurpose::CertSign)?;
        let params = self.build_params(request, profile, None)?;
        let cert = params
            .self_signed(key)
            .map_err(|e| PkiError::wrap_internal("Certificate signing failed", e))?;
        let data = CertificateData::from_der(cert.der().to_vec())?;

        verify::verify_certificate(&data.der, &token.public_key_der(KeyPurpose::CertSign)?)?;
        info!(
            subject_dn = %data.subject_dn,
            serial = %data.serial_hex,
            "self-signed certificate issued"
        );
        Ok(data)
    }

    /// 由CA签发证书
    ///
    /// 令牌离线错误原样向上传播；签发成功后用CA公钥自检签名，
    /// 并对AKI/SKI与颁发者名称做非致命交叉检查。
    pub fn issue(
        &self,
        request: &IssuanceRequest,
        profile: &CertificateProfile,
        issuer: &IssuingCa,
    ) -> Result<CertificateData> {
        let issuer_key = issuer.token.signing_key(KeyPurpose::CertSign)?;
        let spki = request.subject_spki_der.as_deref().ok_or_else(|| {
            PkiError::BadRequest("issuance request is missing the subject public key".to_string())
        })?;
        let subject_key = remote_public_key(spki)?;

        let params = self.build_params(request, profile, Some(issuer))?;
        let cert = params
            .signed_by(&subject_key, issuer.certificate, issuer_key)
            .map_err(|e| PkiError::wrap_internal("Certificate signing failed", e))?;
        let data = CertificateData::from_der(cert.der().to_vec())?;

        verify::verify_certificate(&data.der, &issuer.data.public_key_spki_der()?)?;
        self.cross_check(&data, issuer);
        info!(
            subject_dn = %data.subject_dn,
            issuer_dn = %data.issuer_dn,
            serial = %data.serial_hex,
            username = %request.subject.username,
            "certificate issued"
        );
        Ok(data)
    }

    /// 组装证书参数：有效期、DN、序列号、SAN与扩展
    fn build_params(
        &self,
        request: &IssuanceRequest,
        profile: &CertificateProfile,
        issuer: Option<&IssuingCa>,
    ) -> Result<rcgen::CertificateParams> {
        let mut params = rcgen::CertificateParams::new(Vec::new())
            .map_err(|e| PkiError::Internal(format!("Failed to create parameters: {e}")))?;

        let issuer_not_after = match issuer {
            // 根CA自签名不受签发者有效期约束
            Some(ca) => Some(ca.data.not_after),
            None => None,
        };
        let (not_before, not_after) =
            resolve_validity(request, profile, issuer_not_after);
        params.not_before = not_before;
        params.not_after = not_after;

        let rewritten = profile.rewrite_subject_dn(&request.subject.dn);
        params.distinguished_name = rewritten.to_rcgen(profile.dn_order, profile.dn_encoding())?;

        params.serial_number = Some(rcgen::SerialNumber::from(self.serial.next_serial()?));

        for name in &request.subject.dns_names {
            let ia5 = rcgen::Ia5String::try_from(name.as_str())
                .map_err(|e| PkiError::BadRequest(format!("Invalid DNS name '{name}': {e}")))?;
            params.subject_alt_names.push(rcgen::SanType::DnsName(ia5));
        }

        self.apply_extensions(&mut params, request, profile, issuer)?;
        Ok(params)
    }

    /// 扩展装配：请求覆盖的扩展优先，profile启用的标准扩展按序合成
    fn apply_extensions(
        &self,
        params: &mut rcgen::CertificateParams,
        request: &IssuanceRequest,
        profile: &CertificateProfile,
        issuer: Option<&IssuingCa>,
    ) -> Result<()> {
        let overridden: HashSet<&str> = request
            .extension_overrides
            .iter()
            .map(|e| e.oid.as_str())
            .collect();
        let enabled =
            |ext: StandardExtension| -> bool { profile.enabled_extensions.contains(&ext) };
        let synthesize = |ext: StandardExtension| -> bool {
            enabled(ext) && !overridden.contains(ext.oid())
        };

        params.is_ca = if synthesize(StandardExtension::BasicConstraints) {
            match profile.profile_type {
                ProfileType::RootCa | ProfileType::SubCa => {
                    rcgen::IsCa::Ca(rcgen::BasicConstraints::Unconstrained)
                }
                ProfileType::EndEntity => rcgen::IsCa::ExplicitNoCa,
            }
        } else {
            rcgen::IsCa::NoCa
        };

        if synthesize(StandardExtension::KeyUsage) {
            let usages = match (&request.key_usages, profile.allow_key_usage_override) {
                (Some(requested), true) => requested.clone(),
                (Some(_), false) => {
                    debug!("requested key usages ignored, profile forbids override");
                    profile.key_usages.clone()
                }
                (None, _) => profile.key_usages.clone(),
            };
            params.key_usages = usages.into_iter().map(KeyUsage::to_rcgen).collect();
        }

        if synthesize(StandardExtension::ExtendedKeyUsage)
            && profile.profile_type == ProfileType::EndEntity
        {
            params.extended_key_usages = vec![
                rcgen::ExtendedKeyUsagePurpose::ServerAuth,
                rcgen::ExtendedKeyUsagePurpose::ClientAuth,
            ];
        }

        params.key_identifier_method = rcgen::KeyIdMethod::Sha256;
        params.use_authority_key_identifier_extension =
            enabled(StandardExtension::AuthorityKeyIdentifier) && issuer.is_some();

        if synthesize(StandardExtension::CrlDistributionPoints) {
            let uris = ca_or_profile_cdp(profile, issuer);
            if !uris.is_empty() {
                params.crl_distribution_points = vec![rcgen::CrlDistributionPoint { uris }];
            }
        }

        for ext in &request.extension_overrides {
            if ext.oid == StandardExtension::SubjectKeyIdentifier.oid() {
                // SKI覆盖走key identifier通道而非自定义扩展
                params.key_identifier_method =
                    rcgen::KeyIdMethod::PreSpecified(ext.value.clone());
                continue;
            }
            let oid = parse_oid(&ext.oid)?;
            let mut custom = rcgen::CustomExtension::from_oid_content(&oid, ext.value.clone());
            custom.set_criticality(ext.critical);
            params.custom_extensions.push(custom);
        }

        Ok(())
    }

    /// 签发后交叉检查（记录不中断）
    fn cross_check(&self, data: &CertificateData, issuer: &IssuingCa) {
        match (
            data.authority_key_identifier(),
            issuer.data.subject_key_identifier(),
        ) {
            (Ok(Some(aki)), Ok(Some(ski))) if aki != ski => {
                error!(
                    serial = %data.serial_hex,
                    "issued certificate AKI does not match issuing CA SKI"
                );
            }
            _ => {}
        }
        match (data.issuer_name_der(), issuer.data.subject_name_der()) {
            (Ok(issuer_name), Ok(ca_subject)) if issuer_name != ca_subject => {
                error!(
                    serial = %data.serial_hex,
                    "issued certificate issuer name is not byte-identical to CA subject"
                );
            }
            _ => {}
        }
    }
}

/// 有效期解析
///
/// 请求值仅在profile允许覆盖时生效；过去的起始时间收紧到当前时间，
/// 结束时间依次受profile最大有效期与签发CA过期时间约束。万一结束
/// 早于起始则交换并告警。
fn resolve_validity(
    request: &IssuanceRequest,
    profile: &CertificateProfile,
    issuer_not_after: Option<OffsetDateTime>,
) -> (OffsetDateTime, OffsetDateTime) {
    let now = OffsetDateTime::now_utc();
    let (requested_start, requested_end) = if profile.allow_validity_override {
        (request.not_before, request.not_after)
    } else {
        if request.not_before.is_some() || request.not_after.is_some() {
            debug!("requested validity ignored, profile forbids override");
        }
        (None, None)
    };

    let mut start = match requested_start {
        Some(s) if s < now => {
            warn!("requested notBefore is in the past, clamped to current time");
            now
        }
        Some(s) => s,
        None => now - Duration::minutes(DEFAULT_BACKDATE_MINUTES),
    };

    let profile_end = start + Duration::days(i64::from(profile.validity_days));
    let mut end = match requested_end {
        Some(e) if e > profile_end => {
            debug!("requested notAfter exceeds profile validity, clamped");
            profile_end
        }
        Some(e) => e,
        None => profile_end,
    };

    if let Some(ca_end) = issuer_not_after {
        if end > ca_end {
            info!("notAfter clamped to issuing CA expiration");
            end = ca_end;
        }
    }

    if end <= start {
        warn!("resolved notAfter precedes notBefore, swapping");
        std::mem::swap(&mut start, &mut end);
    }

    (start, end)
}

/// CDP来源选择：profile声明使用CA默认且CA有值时替换profile列表
fn ca_or_profile_cdp(profile: &CertificateProfile, issuer: Option<&IssuingCa>) -> Vec<String> {
    if profile.use_ca_defined_cdp {
        if let Some(cdp) = issuer.and_then(|ca| ca.default_cdp.clone()) {
            return vec![cdp];
        }
    }
    profile.crl_distribution_point_uris.clone()
}

/// 用CA证书DER与令牌密钥重建 rcgen 签发者句柄
///
/// 句柄只提供签发时的颁发者身份（名称字节与密钥标识），自身的
/// DER编码不对外使用。令牌离线时失败。
pub fn issuer_handle(data: &CertificateData, token: &CaToken) -> Result<rcgen::Certificate> {
    let key = token.signing_key(KeyPurpose::CertSign)?;
    let params = rcgen::CertificateParams::from_ca_cert_der(&data.der.clone().into())
        .map_err(|e| PkiError::ParseError(format!("Failed to reload CA certificate: {e}")))?;
    params
        .self_signed(key)
        .map_err(|e| PkiError::Internal(format!("Failed to rebuild issuer handle: {e}")))
}

/// 仅持公钥的远程密钥占位（外部主体密钥，签名由签发CA完成）
struct ExternalPublicKey {
    raw: Vec<u8>,
    alg: &'static rcgen::SignatureAlgorithm,
}

impl rcgen::RemoteKeyPair for ExternalPublicKey {
    fn public_key(&self) -> &[u8] {
        &self.raw
    }

    fn sign(&self, _msg: &[u8]) -> std::result::Result<Vec<u8>, rcgen::Error> {
        Err(rcgen::Error::RemoteKeyError)
    }

    fn algorithm(&self) -> &'static rcgen::SignatureAlgorithm {
        self.alg
    }
}

/// 把SPKI DER包装成 rcgen 可用的主体密钥
fn remote_public_key(spki_der: &[u8]) -> Result<rcgen::KeyPair> {
    let (oid, raw) = verify::spki_raw_parts(spki_der)?;
    let alg = if oid == OID_ED25519 {
        &rcgen::PKCS_ED25519
    } else if oid == OID_EC_PUBLIC_KEY {
        &rcgen::PKCS_ECDSA_P256_SHA256
    } else {
        return Err(PkiError::BadRequest(format!(
            "unsupported subject key algorithm: {oid}"
        )));
    };
    rcgen::KeyPair::from_remote(Box::new(ExternalPublicKey { raw, alg }))
        .map_err(|e| PkiError::Internal(format!("Failed to wrap subject public key: {e}")))
}

/// 点分OID字符串解析
fn parse_oid(oid: &str) -> Result<Vec<u64>> {
    oid.split('.')
        .map(|part| {
            part.parse::<u64>()
                .map_err(|_| PkiError::BadRequest(format!("Invalid extension OID: {oid}")))
        })
        .collect()
}
