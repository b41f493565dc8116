//! CRL生成
//!
//! 全量CRL与增量CRL共用同一条生成路径：快照撤销集合、计算
//! thisUpdate/nextUpdate、装配扩展并由CA密钥签名。CRL号单调性
//! 由CA记录维护，这里只负责写入。rcgen不输出DeltaCRLIndicator，
//! 增量CRL在签出后补入该关键扩展并重签。

use der::asn1::{BitString, ObjectIdentifier, OctetString};
use der::{Decode, Encode};
use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};
use tracing::info;
use x509_cert::crl::CertificateList;
use x509_cert::ext::Extension;

use crate::cert::verify;
use crate::cert::{fingerprint_hex, IssuingCa};
use crate::error::{PkiError, Result};
use crate::profile::CertificateProfile;
use crate::token::{CaToken, KeyAlgorithm, KeyPurpose};
use crate::types::RevocationReason;

/// DeltaCRLIndicator 扩展OID
pub const OID_DELTA_CRL_INDICATOR: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.5.29.27");

/// CRL撤销条目快照
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrlEntry {
    /// 证书序列号
    pub serial: Vec<u8>,
    /// 撤销时间
    #[serde(with = "time::serde::rfc3339")]
    pub revocation_date: OffsetDateTime,
    /// 撤销原因
    pub reason: RevocationReason,
}

/// 生成的CRL及其元数据
///
/// 增量CRL的DER带关键的DeltaCRLIndicator扩展；`base_crl_number`
/// 为Some即增量，并指向生成时刻的最新全量CRL号。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrlInfo {
    /// 颁发者规范化DN
    pub issuer_dn: String,
    /// CRL号
    pub crl_number: u32,
    /// 增量CRL指向的基线全量CRL号
    pub base_crl_number: Option<u32>,
    /// 本次更新时间
    #[serde(with = "time::serde::rfc3339")]
    pub this_update: OffsetDateTime,
    /// 下次更新时间
    #[serde(with = "time::serde::rfc3339")]
    pub next_update: OffsetDateTime,
    /// 条目序列号（十六进制）
    pub entry_serials: Vec<String>,
    /// DER编码原文
    pub der: Vec<u8>,
    /// SHA-256指纹
    pub fingerprint: String,
}

impl CrlInfo {
    /// 是否增量CRL
    pub fn is_delta(&self) -> bool {
        self.base_crl_number.is_some()
    }
}

/// CRL签发策略
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrlPolicy {
    /// 全量CRL有效期（小时）
    pub period_hours: u32,
    /// 自动签发间隔（小时，0表示仅手动签发）
    pub issue_interval_hours: u32,
    /// 新旧CRL重叠时间（分钟）
    pub overlap_minutes: u32,
    /// 增量CRL有效期（小时，0表示不签发增量）
    pub delta_period_hours: u32,
    /// CRL本身携带的分发点URI（分号分隔多值；profile未接管时使用）
    pub distribution_point_uri: Option<String>,
}

impl Default for CrlPolicy {
    fn default() -> Self {
        Self {
            period_hours: 24,
            issue_interval_hours: 0,
            overlap_minutes: 10,
            delta_period_hours: 0,
            distribution_point_uri: None,
        }
    }
}

impl CrlPolicy {
    /// 是否启用增量CRL
    pub fn delta_enabled(&self) -> bool {
        self.delta_period_hours > 0
    }
}

/// CRL生成器
#[derive(Default)]
pub struct CrlFactory;

impl CrlFactory {
    pub fn new() -> Self {
        Self
    }

    /// 生成全量CRL
    ///
    /// `entries` 为撤销集合的完整快照（含暂停条目）。
    pub fn generate_full(
        &self,
        issuer: &IssuingCa,
        policy: &CrlPolicy,
        profile: &CertificateProfile,
        entries: &[CrlEntry],
        crl_number: u32,
    ) -> Result<CrlInfo> {
        self.generate(issuer, policy, profile, entries, crl_number, None, policy.period_hours)
    }

    /// 生成增量CRL
    ///
    /// `entries` 只包含基线全量CRL之后的撤销变化。
    pub fn generate_delta(
        &self,
        issuer: &IssuingCa,
        policy: &CrlPolicy,
        profile: &CertificateProfile,
        entries: &[CrlEntry],
        crl_number: u32,
        base_crl_number: u32,
    ) -> Result<CrlInfo> {
        if !policy.delta_enabled() {
            return Err(PkiError::BadRequest(
                "delta CRL issuance is disabled for this CA".to_string(),
            ));
        }
        self.generate(
            issuer,
            policy,
            profile,
            entries,
            crl_number,
            Some(base_crl_number),
            policy.delta_period_hours,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn generate(
        &self,
        issuer: &IssuingCa,
        policy: &CrlPolicy,
        profile: &CertificateProfile,
        entries: &[CrlEntry],
        crl_number: u32,
        base_crl_number: Option<u32>,
        period_hours: u32,
    ) -> Result<CrlInfo> {
        // CRL签名使用证书签名密钥，保证能用CA证书内的公钥验证
        let signing_key = issuer.token.signing_key(KeyPurpose::CertSign)?;

        let now = OffsetDateTime::now_utc();
        let next_update = now + Duration::hours(i64::from(period_hours));

        let revoked_certs = entries
            .iter()
            .map(|entry| rcgen::RevokedCertParams {
                serial_number: rcgen::SerialNumber::from(entry.serial.clone()),
                revocation_time: entry.revocation_date,
                reason_code: entry.reason.to_rcgen(),
                invalidity_date: None,
            })
            .collect();

        let uris = distribution_point_uris(issuer, policy, profile);
        let issuing_distribution_point = if uris.is_empty() {
            None
        } else {
            Some(rcgen::CrlIssuingDistributionPoint {
                distribution_point: rcgen::CrlDistributionPoint { uris },
                scope: None,
            })
        };

        let params = rcgen::CertificateRevocationListParams {
            this_update: now,
            next_update,
            crl_number: rcgen::SerialNumber::from(crl_number.to_be_bytes().to_vec()),
            issuing_distribution_point,
            revoked_certs,
            key_identifier_method: rcgen::KeyIdMethod::Sha256,
        };
        let crl = params
            .signed_by(issuer.certificate, signing_key)
            .map_err(|e| PkiError::wrap_internal("CRL signing failed", e))?;
        let der = match base_crl_number {
            Some(base) => mark_delta(crl.der(), base, issuer.token)?,
            None => crl.der().to_vec(),
        };

        verify::verify_crl(&der, &issuer.data.public_key_spki_der()?)?;

        let info = CrlInfo {
            issuer_dn: issuer.data.subject_dn.clone(),
            crl_number,
            base_crl_number,
            this_update: now,
            next_update,
            entry_serials: entries.iter().map(|e| hex::encode(&e.serial)).collect(),
            fingerprint: fingerprint_hex(&der),
            der,
        };
        info!(
            issuer_dn = %info.issuer_dn,
            crl_number,
            delta = info.is_delta(),
            entries = entries.len(),
            "CRL generated"
        );
        Ok(info)
    }
}

/// 解析CRL自身携带的分发点URI
///
/// profile接管（`crl_dp_on_crl`）时优先CA默认分发点
/// （`use_ca_defined_cdp`）或profile的URI列表；否则退回策略URI。
fn distribution_point_uris(
    issuer: &IssuingCa,
    policy: &CrlPolicy,
    profile: &CertificateProfile,
) -> Vec<String> {
    if profile.crl_dp_on_crl {
        if profile.use_ca_defined_cdp {
            if let Some(cdp) = &issuer.default_cdp {
                return split_uris(cdp);
            }
        }
        if !profile.crl_distribution_point_uris.is_empty() {
            return profile.crl_distribution_point_uris.clone();
        }
    }
    policy
        .distribution_point_uri
        .as_deref()
        .map(split_uris)
        .unwrap_or_default()
}

fn split_uris(uris: &str) -> Vec<String> {
    uris.split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// 在TBS中补入关键的DeltaCRLIndicator扩展并重签
fn mark_delta(crl_der: &[u8], base_crl_number: u32, token: &CaToken) -> Result<Vec<u8>> {
    let mut list = CertificateList::from_der(crl_der)
        .map_err(|e| PkiError::ParseError(format!("Failed to parse CRL DER: {e}")))?;
    let value = base_crl_number
        .to_der()
        .map_err(|e| PkiError::wrap_internal("Failed to encode base CRL number", e))?;
    let indicator = Extension {
        extn_id: OID_DELTA_CRL_INDICATOR,
        critical: true,
        extn_value: OctetString::new(value)
            .map_err(|e| PkiError::wrap_internal("Failed to wrap extension value", e))?,
    };
    match list.tbs_cert_list.crl_extensions.as_mut() {
        Some(extensions) => extensions.push(indicator),
        None => list.tbs_cert_list.crl_extensions = Some(vec![indicator]),
    }

    let tbs = list
        .tbs_cert_list
        .to_der()
        .map_err(|e| PkiError::wrap_internal("Failed to encode TBS cert list", e))?;
    let signature = sign_with_token(token, &tbs)?;
    list.signature = BitString::from_bytes(&signature)
        .map_err(|e| PkiError::wrap_internal("Failed to encode CRL signature", e))?;
    list.to_der()
        .map_err(|e| PkiError::wrap_internal("Failed to encode CRL", e))
}

/// 用令牌的证书签名密钥在消息字节上签名
///
/// Ed25519输出原始64字节，ECDSA P-256输出DER编码，与对应证书/CRL
/// 签名字段的格式一致。
fn sign_with_token(token: &CaToken, message: &[u8]) -> Result<Vec<u8>> {
    let pkcs8 = token.signing_key(KeyPurpose::CertSign)?.serialize_der();
    match token.algorithm() {
        KeyAlgorithm::Ed25519 => {
            use ed25519_dalek::pkcs8::DecodePrivateKey;
            use ed25519_dalek::Signer;
            let key = ed25519_dalek::SigningKey::from_pkcs8_der(&pkcs8).map_err(|e| {
                PkiError::SignatureError(format!("Invalid Ed25519 private key: {e}"))
            })?;
            Ok(key.sign(message).to_bytes().to_vec())
        }
        KeyAlgorithm::EcdsaP256 => {
            use p256::ecdsa::signature::Signer;
            use p256::pkcs8::DecodePrivateKey;
            let key = p256::ecdsa::SigningKey::from_pkcs8_der(&pkcs8).map_err(|e| {
                PkiError::SignatureError(format!("Invalid P-256 private key: {e}"))
            })?;
            let signature: p256::ecdsa::Signature = key.sign(message);
            Ok(signature.to_der().as_bytes().to_vec())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cert::CertificateData;

    fn ca_setup() -> (CaToken, rcgen::Certificate, CertificateData) {
        let token = CaToken::generate("foo123", KeyAlgorithm::Ed25519).unwrap();
        let key = token.signing_key(KeyPurpose::CertSign).unwrap();
        let mut params = rcgen::CertificateParams::new(Vec::new()).unwrap();
        let mut dn = rcgen::DistinguishedName::new();
        dn.push(rcgen::DnType::CommonName, "CRL Test CA");
        params.distinguished_name = dn;
        params.is_ca = rcgen::IsCa::Ca(rcgen::BasicConstraints::Unconstrained);
        params.key_usages = vec![
            rcgen::KeyUsagePurpose::KeyCertSign,
            rcgen::KeyUsagePurpose::CrlSign,
        ];
        let cert = params.self_signed(key).unwrap();
        let data = CertificateData::from_der(cert.der().to_vec()).unwrap();
        (token, cert, data)
    }

    fn entry(serial: u8, reason: RevocationReason) -> CrlEntry {
        CrlEntry {
            serial: vec![serial],
            revocation_date: OffsetDateTime::now_utc(),
            reason,
        }
    }

    fn crl_extension(der_bytes: &[u8], oid: ObjectIdentifier) -> Option<Extension> {
        let list = CertificateList::from_der(der_bytes).unwrap();
        list.tbs_cert_list
            .crl_extensions
            .unwrap()
            .into_iter()
            .find(|e| e.extn_id == oid)
    }

    fn contains(haystack: &[u8], needle: &str) -> bool {
        haystack
            .windows(needle.len())
            .any(|window| window == needle.as_bytes())
    }

    #[test]
    fn test_empty_full_crl() {
        let (token, cert, data) = ca_setup();
        let issuer = IssuingCa {
            certificate: &cert,
            data: &data,
            token: &token,
            default_cdp: None,
        };
        let info = CrlFactory::new()
            .generate_full(
                &issuer,
                &CrlPolicy::default(),
                &CertificateProfile::root_ca(),
                &[],
                1,
            )
            .unwrap();
        assert_eq!(info.crl_number, 1);
        assert!(!info.is_delta());
        assert!(info.entry_serials.is_empty());
        assert_eq!(info.issuer_dn, "CN=CRL Test CA");
        assert!(info.next_update > info.this_update);
        // 全量CRL不带DeltaCRLIndicator
        assert!(crl_extension(&info.der, OID_DELTA_CRL_INDICATOR).is_none());
    }

    #[test]
    fn test_full_crl_with_entries() {
        let (token, cert, data) = ca_setup();
        let issuer = IssuingCa {
            certificate: &cert,
            data: &data,
            token: &token,
            default_cdp: None,
        };
        let entries = vec![
            entry(0x11, RevocationReason::KeyCompromise),
            entry(0x22, RevocationReason::CertificateHold),
        ];
        let info = CrlFactory::new()
            .generate_full(
                &issuer,
                &CrlPolicy::default(),
                &CertificateProfile::root_ca(),
                &entries,
                2,
            )
            .unwrap();
        assert_eq!(info.entry_serials, vec!["11", "22"]);
    }

    #[test]
    fn test_delta_crl_requires_policy() {
        let (token, cert, data) = ca_setup();
        let issuer = IssuingCa {
            certificate: &cert,
            data: &data,
            token: &token,
            default_cdp: None,
        };
        let factory = CrlFactory::new();
        let profile = CertificateProfile::root_ca();

        let err = factory
            .generate_delta(&issuer, &CrlPolicy::default(), &profile, &[], 3, 2)
            .unwrap_err();
        assert!(matches!(err, PkiError::BadRequest(_)));

        let policy = CrlPolicy {
            delta_period_hours: 1,
            ..CrlPolicy::default()
        };
        let info = factory
            .generate_delta(&issuer, &policy, &profile, &[], 3, 2)
            .unwrap();
        assert!(info.is_delta());
        assert_eq!(info.base_crl_number, Some(2));
    }

    #[test]
    fn test_delta_crl_carries_critical_indicator() {
        let (token, cert, data) = ca_setup();
        let issuer = IssuingCa {
            certificate: &cert,
            data: &data,
            token: &token,
            default_cdp: None,
        };
        let policy = CrlPolicy {
            delta_period_hours: 1,
            ..CrlPolicy::default()
        };
        let info = CrlFactory::new()
            .generate_delta(
                &issuer,
                &policy,
                &CertificateProfile::root_ca(),
                &[entry(0x33, RevocationReason::Superseded)],
                5,
                4,
            )
            .unwrap();

        let indicator = crl_extension(&info.der, OID_DELTA_CRL_INDICATOR).unwrap();
        assert!(indicator.critical);
        assert_eq!(u32::from_der(indicator.extn_value.as_bytes()).unwrap(), 4);
        // 补入扩展重签后签名仍可用CA公钥验证
        verify::verify_crl(&info.der, &data.public_key_spki_der().unwrap()).unwrap();
    }

    #[test]
    fn test_distribution_point_follows_profile() {
        let oid_idp = ObjectIdentifier::new_unwrap("2.5.29.28");
        let (token, cert, data) = ca_setup();
        let issuer = IssuingCa {
            certificate: &cert,
            data: &data,
            token: &token,
            default_cdp: Some("http://cdp.tianshu.dev/root.crl".to_string()),
        };
        let factory = CrlFactory::new();

        // profile未接管：策略URI（分号多值拆开）
        let policy = CrlPolicy {
            distribution_point_uri: Some(
                "http://a.example/ca.crl;http://b.example/ca.crl".to_string(),
            ),
            ..CrlPolicy::default()
        };
        let info = factory
            .generate_full(&issuer, &policy, &CertificateProfile::root_ca(), &[], 1)
            .unwrap();
        let idp = crl_extension(&info.der, oid_idp).unwrap();
        assert!(contains(idp.extn_value.as_bytes(), "http://a.example/ca.crl"));
        assert!(contains(idp.extn_value.as_bytes(), "http://b.example/ca.crl"));

        // profile接管：使用profile的URI列表
        let mut profile = CertificateProfile::root_ca()
            .with_crl_distribution_points("http://p1.example/crl;http://p2.example/crl");
        profile.crl_dp_on_crl = true;
        let info = factory
            .generate_full(&issuer, &policy, &profile, &[], 2)
            .unwrap();
        let idp = crl_extension(&info.der, oid_idp).unwrap();
        assert!(contains(idp.extn_value.as_bytes(), "http://p1.example/crl"));
        assert!(!contains(idp.extn_value.as_bytes(), "http://a.example/ca.crl"));

        // CA默认分发点替换
        profile.use_ca_defined_cdp = true;
        let info = factory
            .generate_full(&issuer, &policy, &profile, &[], 3)
            .unwrap();
        let idp = crl_extension(&info.der, oid_idp).unwrap();
        assert!(contains(
            idp.extn_value.as_bytes(),
            "http://cdp.tianshu.dev/root.crl"
        ));
        assert!(!contains(idp.extn_value.as_bytes(), "http://p1.example/crl"));
    }

    #[test]
    fn test_offline_token_blocks_crl() {
        let (mut token, cert, data) = ca_setup();
        token.deactivate();
        let issuer = IssuingCa {
            certificate: &cert,
            data: &data,
            token: &token,
            default_cdp: None,
        };
        let err = CrlFactory::new()
            .generate_full(
                &issuer,
                &CrlPolicy::default(),
                &CertificateProfile::root_ca(),
                &[],
                1,
            )
            .unwrap_err();
        assert!(matches!(err, PkiError::CaTokenOffline(_)));
    }

    #[test]
    fn test_crl_signature_bound_to_issuer_key() {
        let (token, cert, data) = ca_setup();
        let issuer = IssuingCa {
            certificate: &cert,
            data: &data,
            token: &token,
            default_cdp: None,
        };
        let info = CrlFactory::new()
            .generate_full(
                &issuer,
                &CrlPolicy::default(),
                &CertificateProfile::root_ca(),
                &[],
                1,
            )
            .unwrap();

        verify::verify_crl(&info.der, &data.public_key_spki_der().unwrap()).unwrap();
        let other = rcgen::KeyPair::generate_for(&rcgen::PKCS_ED25519).unwrap();
        assert!(verify::verify_crl(&info.der, &other.public_key_der()).is_err());
    }
}
