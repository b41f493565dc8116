//! 证书链排序与路径校验
//!
//! 排序以规范化DN为键从唯一的自签名根向下游走，输出叶在前的
//! 顺序；路径校验在排序结果上逐级检查连接性、有效期、CA标志
//! 与签名。两类失败使用不同错误：排序失败是 `BrokenChain` /
//! `NoRootFound`，校验失败是 `PathValidation`。
//!
//! 已知限制：同一输入中不能出现两个颁发者DN相同的证书（兄弟
//! 证书），这种输入按 `BrokenChain` 拒绝。

use std::collections::HashMap;

use der::asn1::ObjectIdentifier;
use der::Decode;
use tracing::debug;

use crate::cert::{verify, CertificateData};
use crate::error::{PkiError, Result};

/// BasicConstraints 扩展OID
const OID_BASIC_CONSTRAINTS: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.5.29.19");

/// 把无序证书集合排成叶在前的证书链
///
/// 要求恰好一个自签名根；每个颁发者DN最多出现一次；所有证书
/// 必须连成一条路径。对已排序的输入幂等。
pub fn order_chain(certs: Vec<CertificateData>) -> Result<Vec<CertificateData>> {
    if certs.is_empty() {
        return Err(PkiError::BrokenChain(
            "certificate chain input is empty".to_string(),
        ));
    }

    let roots: Vec<usize> = certs
        .iter()
        .enumerate()
        .filter(|(_, c)| c.is_self_signed())
        .map(|(i, _)| i)
        .collect();
    if roots.len() != 1 {
        debug!(roots = roots.len(), "chain ordering requires exactly one self-signed root");
        return Err(PkiError::NoRootFound);
    }
    let root_index = roots[0];

    // 颁发者DN → 证书下标；重复键说明存在兄弟证书，无法排成单链
    let mut by_issuer: HashMap<&str, usize> = HashMap::new();
    for (i, cert) in certs.iter().enumerate() {
        if i == root_index {
            continue;
        }
        if by_issuer.insert(cert.issuer_dn.as_str(), i).is_some() {
            return Err(PkiError::BrokenChain(format!(
                "multiple certificates issued by '{}'",
                cert.issuer_dn
            )));
        }
    }

    // 从根向下游走，迭代次数以输入长度为界
    let mut ordered_indices = vec![root_index];
    let mut current_subject = certs[root_index].subject_dn.as_str();
    for _ in 0..certs.len() {
        match by_issuer.remove(current_subject) {
            Some(child) => {
                current_subject = certs[child].subject_dn.as_str();
                ordered_indices.push(child);
            }
            None => break,
        }
    }
    if ordered_indices.len() != certs.len() {
        return Err(PkiError::BrokenChain(format!(
            "{} certificate(s) not connected to the chain",
            certs.len() - ordered_indices.len()
        )));
    }

    // 叶在前
    ordered_indices.reverse();
    let mut slots: Vec<Option<CertificateData>> = certs.into_iter().map(Some).collect();
    let ordered = ordered_indices
        .into_iter()
        .map(|i| slots[i].take().ok_or_else(|| {
            PkiError::Internal("certificate slot consumed twice".to_string())
        }))
        .collect::<Result<Vec<_>>>()?;
    debug!(length = ordered.len(), "certificate chain ordered");
    Ok(ordered)
}

/// 排序并校验整条证书路径
///
/// 校验每张证书当前有效、每个签发者带CA标志、每级签名可用上级
/// 公钥验证（根用自身公钥）。
pub fn build_validated_path(certs: Vec<CertificateData>) -> Result<Vec<CertificateData>> {
    let ordered = order_chain(certs)?;

    for (i, cert) in ordered.iter().enumerate() {
        if !cert.is_currently_valid() {
            return Err(PkiError::PathValidation(format!(
                "certificate '{}' is expired or not yet valid",
                cert.subject_dn
            )));
        }

        // 最后一个元素是根，签发者为其自身
        let issuer = ordered.get(i + 1).unwrap_or(cert);
        if cert.issuer_dn != issuer.subject_dn {
            return Err(PkiError::PathValidation(format!(
                "issuer mismatch at '{}'",
                cert.subject_dn
            )));
        }
        if !is_ca_certificate(issuer)? {
            return Err(PkiError::PathValidation(format!(
                "issuer '{}' is not a CA certificate",
                issuer.subject_dn
            )));
        }
        verify::verify_certificate(&cert.der, &issuer.public_key_spki_der()?).map_err(|e| {
            PkiError::PathValidation(format!(
                "signature verification failed at '{}': {e}",
                cert.subject_dn
            ))
        })?;
    }

    Ok(ordered)
}

/// BasicConstraints的cA标志（无扩展视为非CA）
fn is_ca_certificate(cert: &CertificateData) -> Result<bool> {
    let parsed = crate::cert::parse_der(&cert.der)?;
    let Some(extensions) = &parsed.tbs_certificate.extensions else {
        return Ok(false);
    };
    for ext in extensions {
        if ext.extn_id == OID_BASIC_CONSTRAINTS {
            let bc = x509_cert::ext::pkix::BasicConstraints::from_der(ext.extn_value.as_bytes())
                .map_err(|e| {
                    PkiError::ParseError(format!("Invalid BasicConstraints extension: {e}"))
                })?;
            return Ok(bc.ca);
        }
    }
    Ok(false)
}
