//! 签名验证
//!
//! 按签名算法OID分发到对应的验证实现（Ed25519 / ECDSA P-256），
//! 在TBS的DER字节上验证。证书链校验与签发后自检共用这里的入口。

use der::asn1::ObjectIdentifier;
use der::{Decode, Encode};

use crate::error::{PkiError, Result};

/// Ed25519签名算法OID
pub const OID_ED25519: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.3.101.112");
/// ecdsa-with-SHA256 签名算法OID
pub const OID_ECDSA_WITH_SHA256: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.2.840.10045.4.3.2");
/// ecPublicKey 公钥算法OID
pub const OID_EC_PUBLIC_KEY: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.10045.2.1");

/// 从SPKI DER提取公钥算法OID与原始公钥字节
pub fn spki_raw_parts(spki_der: &[u8]) -> Result<(ObjectIdentifier, Vec<u8>)> {
    let spki = x509_cert::spki::SubjectPublicKeyInfoOwned::from_der(spki_der)
        .map_err(|e| PkiError::ParseError(format!("Failed to parse SPKI: {e}")))?;
    let raw = spki
        .subject_public_key
        .as_bytes()
        .ok_or_else(|| PkiError::ParseError("SPKI public key has unused bits".to_string()))?
        .to_vec();
    Ok((spki.algorithm.oid, raw))
}

/// 在消息字节上验证签名
///
/// `spki_der` 为签名者公钥（SPKI DER），`sig_oid` 为证书/CRL声明的
/// 签名算法。不支持的算法返回 `SignatureError`。
pub fn verify_raw(
    spki_der: &[u8],
    message: &[u8],
    signature: &[u8],
    sig_oid: &ObjectIdentifier,
) -> Result<()> {
    let (key_oid, raw_key) = spki_raw_parts(spki_der)?;

    if *sig_oid == OID_ED25519 {
        if key_oid != OID_ED25519 {
            return Err(PkiError::SignatureError(
                "signature algorithm does not match signer key type".to_string(),
            ));
        }
        let key_bytes: [u8; 32] = raw_key.as_slice().try_into().map_err(|_| {
            PkiError::SignatureError("Ed25519 public key must be 32 bytes".to_string())
        })?;
        let verifying_key = ed25519_dalek::VerifyingKey::from_bytes(&key_bytes)
            .map_err(|e| PkiError::SignatureError(format!("Invalid Ed25519 public key: {e}")))?;
        let sig = ed25519_dalek::Signature::from_slice(signature)
            .map_err(|e| PkiError::SignatureError(format!("Invalid Ed25519 signature: {e}")))?;
        use ed25519_dalek::Verifier;
        verifying_key
            .verify(message, &sig)
            .map_err(|e| PkiError::SignatureError(format!("Ed25519 verification failed: {e}")))
    } else if *sig_oid == OID_ECDSA_WITH_SHA256 {
        if key_oid != OID_EC_PUBLIC_KEY {
            return Err(PkiError::SignatureError(
                "signature algorithm does not match signer key type".to_string(),
            ));
        }
        let verifying_key = p256::ecdsa::VerifyingKey::from_sec1_bytes(&raw_key)
            .map_err(|e| PkiError::SignatureError(format!("Invalid P-256 public key: {e}")))?;
        let sig = p256::ecdsa::Signature::from_der(signature)
            .map_err(|e| PkiError::SignatureError(format!("Invalid ECDSA signature: {e}")))?;
        use p256::ecdsa::signature::Verifier;
        verifying_key
            .verify(message, &sig)
            .map_err(|e| PkiError::SignatureError(format!("ECDSA verification failed: {e}")))
    } else {
        Err(PkiError::SignatureError(format!(
            "unsupported signature algorithm: {sig_oid}"
        )))
    }
}

/// 验证证书签名
///
/// `issuer_spki_der` 为签名CA的公钥；自签名证书传自身公钥。
pub fn verify_certificate(cert_der: &[u8], issuer_spki_der: &[u8]) -> Result<()> {
    let cert = super::parse_der(cert_der)?;
    let tbs = cert
        .tbs_certificate
        .to_der()
        .map_err(|e| PkiError::ParseError(format!("Failed to encode TBS certificate: {e}")))?;
    let signature = cert
        .signature
        .as_bytes()
        .ok_or_else(|| PkiError::SignatureError("signature has unused bits".to_string()))?;
    verify_raw(issuer_spki_der, &tbs, signature, &cert.signature_algorithm.oid)
}

/// 验证CRL签名
pub fn verify_crl(crl_der: &[u8], issuer_spki_der: &[u8]) -> Result<()> {
    let crl = x509_cert::crl::CertificateList::from_der(crl_der)
        .map_err(|e| PkiError::ParseError(format!("Failed to parse CRL DER: {e}")))?;
    let tbs = crl
        .tbs_cert_list
        .to_der()
        .map_err(|e| PkiError::ParseError(format!("Failed to encode TBS cert list: {e}")))?;
    let signature = crl
        .signature
        .as_bytes()
        .ok_or_else(|| PkiError::SignatureError("signature has unused bits".to_string()))?;
    verify_raw(issuer_spki_der, &tbs, signature, &crl.signature_algorithm.oid)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn self_signed(alg: &'static rcgen::SignatureAlgorithm) -> (Vec<u8>, rcgen::KeyPair) {
        let key = rcgen::KeyPair::generate_for(alg).unwrap();
        let mut params = rcgen::CertificateParams::new(Vec::new()).unwrap();
        let mut dn = rcgen::DistinguishedName::new();
        dn.push(rcgen::DnType::CommonName, "Verify Test");
        params.distinguished_name = dn;
        let cert = params.self_signed(&key).unwrap();
        (cert.der().to_vec(), key)
    }

    #[test]
    fn test_verify_ed25519_self_signed() {
        let (der, key) = self_signed(&rcgen::PKCS_ED25519);
        verify_certificate(&der, &key.public_key_der()).unwrap();
    }

    #[test]
    fn test_verify_p256_self_signed() {
        let (der, key) = self_signed(&rcgen::PKCS_ECDSA_P256_SHA256);
        verify_certificate(&der, &key.public_key_der()).unwrap();
    }

    #[test]
    fn test_verify_with_wrong_key_fails() {
        let (der, _) = self_signed(&rcgen::PKCS_ED25519);
        let other = rcgen::KeyPair::generate_for(&rcgen::PKCS_ED25519).unwrap();
        let err = verify_certificate(&der, &other.public_key_der()).unwrap_err();
        assert!(matches!(err, PkiError::SignatureError(_)));
    }

    #[test]
    fn test_key_type_mismatch_rejected() {
        let (der, _) = self_signed(&rcgen::PKCS_ED25519);
        let ec_key = rcgen::KeyPair::generate_for(&rcgen::PKCS_ECDSA_P256_SHA256).unwrap();
        let err = verify_certificate(&der, &ec_key.public_key_der()).unwrap_err();
        assert!(matches!(err, PkiError::SignatureError(_)));
    }
}
