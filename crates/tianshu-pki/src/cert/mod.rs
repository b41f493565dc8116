//! 证书数据与解析
//!
//! `CertificateData` 是签发结果与存储之间的通用载体：DER原文加上
//! 解析出的关键字段（指纹、序列号、DN、有效期）。

pub mod factory;
pub mod verify;

pub use factory::{
    issuer_handle, CertificateFactory, ExtensionOverride, IssuanceRequest, IssuingCa, SubjectInfo,
};

use der::asn1::ObjectIdentifier;
use der::{Decode, Encode};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use time::OffsetDateTime;

use crate::dn::SubjectDn;
use crate::error::{PkiError, Result};

/// SubjectKeyIdentifier 扩展OID
pub const OID_SUBJECT_KEY_IDENTIFIER: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.5.29.14");
/// AuthorityKeyIdentifier 扩展OID
pub const OID_AUTHORITY_KEY_IDENTIFIER: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("2.5.29.35");

/// 解析后的X.509证书载体
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CertificateData {
    /// DER编码原文
    pub der: Vec<u8>,
    /// SHA-256指纹（十六进制，存储主键）
    pub fingerprint: String,
    /// 序列号（十六进制）
    pub serial_hex: String,
    /// 规范化主体DN
    pub subject_dn: String,
    /// 规范化颁发者DN
    pub issuer_dn: String,
    /// 生效时间
    #[serde(with = "time::serde::rfc3339")]
    pub not_before: OffsetDateTime,
    /// 过期时间
    #[serde(with = "time::serde::rfc3339")]
    pub not_after: OffsetDateTime,
}

impl CertificateData {
    /// 从DER解析
    pub fn from_der(der: Vec<u8>) -> Result<Self> {
        let cert = parse_der(&der)?;
        let tbs = &cert.tbs_certificate;

        let subject_dn = SubjectDn::from_x509_name(&tbs.subject)?.canonical();
        let issuer_dn = SubjectDn::from_x509_name(&tbs.issuer)?.canonical();
        let not_before = x509_time_to_offset(&tbs.validity.not_before)?;
        let not_after = x509_time_to_offset(&tbs.validity.not_after)?;

        Ok(Self {
            fingerprint: fingerprint_hex(&der),
            serial_hex: hex::encode(tbs.serial_number.as_bytes()),
            subject_dn,
            issuer_dn,
            not_before,
            not_after,
            der,
        })
    }

    /// 从PEM或DER字节导入
    pub fn import(data: &[u8]) -> Result<Self> {
        let der = if data.starts_with(b"-----BEGIN CERTIFICATE-----") {
            pem::parse(data)
                .map_err(|e| PkiError::ParseError(format!("Failed to parse PEM: {e}")))?
                .contents()
                .to_vec()
        } else {
            data.to_vec()
        };
        Self::from_der(der)
    }

    /// 导出PEM
    pub fn to_pem(&self) -> String {
        pem::encode(&pem::Pem::new("CERTIFICATE", self.der.clone()))
    }

    /// 是否自签名（主体DN与颁发者DN的规范化形式相等）
    pub fn is_self_signed(&self) -> bool {
        self.subject_dn == self.issuer_dn
    }

    /// 当前时间是否在有效期内
    pub fn is_currently_valid(&self) -> bool {
        let now = OffsetDateTime::now_utc();
        now >= self.not_before && now <= self.not_after
    }

    /// 主体名称的DER字节（逐位比较用）
    pub fn subject_name_der(&self) -> Result<Vec<u8>> {
        let cert = parse_der(&self.der)?;
        cert.tbs_certificate
            .subject
            .to_der()
            .map_err(|e| PkiError::ParseError(format!("Failed to encode subject name: {e}")))
    }

    /// 颁发者名称的DER字节
    pub fn issuer_name_der(&self) -> Result<Vec<u8>> {
        let cert = parse_der(&self.der)?;
        cert.tbs_certificate
            .issuer
            .to_der()
            .map_err(|e| PkiError::ParseError(format!("Failed to encode issuer name: {e}")))
    }

    /// 主体公钥（SPKI DER）
    pub fn public_key_spki_der(&self) -> Result<Vec<u8>> {
        let cert = parse_der(&self.der)?;
        cert.tbs_certificate
            .subject_public_key_info
            .to_der()
            .map_err(|e| PkiError::ParseError(format!("Failed to encode SPKI: {e}")))
    }

    /// 提取SubjectKeyIdentifier（无该扩展时返回None）
    pub fn subject_key_identifier(&self) -> Result<Option<Vec<u8>>> {
        let cert = parse_der(&self.der)?;
        let Some(extensions) = &cert.tbs_certificate.extensions else {
            return Ok(None);
        };
        for ext in extensions {
            if ext.extn_id == OID_SUBJECT_KEY_IDENTIFIER {
                let ski =
                    x509_cert::ext::pkix::SubjectKeyIdentifier::from_der(ext.extn_value.as_bytes())
                        .map_err(|e| PkiError::ParseError(format!("Invalid SKI: {e}")))?;
                return Ok(Some(ski.0.as_bytes().to_vec()));
            }
        }
        Ok(None)
    }

    /// 提取AuthorityKeyIdentifier的keyIdentifier字段
    pub fn authority_key_identifier(&self) -> Result<Option<Vec<u8>>> {
        let cert = parse_der(&self.der)?;
        let Some(extensions) = &cert.tbs_certificate.extensions else {
            return Ok(None);
        };
        for ext in extensions {
            if ext.extn_id == OID_AUTHORITY_KEY_IDENTIFIER {
                let aki = x509_cert::ext::pkix::AuthorityKeyIdentifier::from_der(
                    ext.extn_value.as_bytes(),
                )
                .map_err(|e| PkiError::ParseError(format!("Invalid AKI: {e}")))?;
                return Ok(aki.key_identifier.map(|id| id.as_bytes().to_vec()));
            }
        }
        Ok(None)
    }
}

/// 证书指纹：DER的SHA-256十六进制
pub fn fingerprint_hex(der: &[u8]) -> String {
    hex::encode(Sha256::digest(der))
}

/// 解析DER证书
pub(crate) fn parse_der(der: &[u8]) -> Result<x509_cert::Certificate> {
    x509_cert::Certificate::from_der(der)
        .map_err(|e| PkiError::ParseError(format!("Failed to parse certificate DER: {e}")))
}

/// X.509时间转换
fn x509_time_to_offset(time: &x509_cert::time::Time) -> Result<OffsetDateTime> {
    let duration = match time {
        x509_cert::time::Time::UtcTime(t) => t.to_unix_duration(),
        x509_cert::time::Time::GeneralTime(t) => t.to_unix_duration(),
    };
    OffsetDateTime::from_unix_timestamp(duration.as_secs() as i64)
        .map_err(|e| PkiError::ParseError(format!("Invalid certificate time: {e}")))
}
