//! CA令牌（密钥材料句柄）
//!
//! 按逻辑用途（证书签名、CRL签名、密钥加密等）持有密钥对，
//! 带激活/停用与在线/离线状态。软令牌实现基于 rcgen 的密钥对；
//! 接口保留给硬件令牌的接入缝隙。

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::info;

use crate::error::{PkiError, Result};

/// 密钥用途
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum KeyPurpose {
    /// 证书签名
    CertSign,
    /// CRL签名
    CrlSign,
    /// 密钥加密
    KeyEncrypt,
    /// 默认
    Default,
    /// 测试
    Test,
}

/// 密钥算法
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum KeyAlgorithm {
    /// Ed25519（默认）
    Ed25519,
    /// ECDSA P-256 with SHA-256
    EcdsaP256,
}

impl KeyAlgorithm {
    /// 对应的 rcgen 签名算法
    pub fn rcgen_algorithm(&self) -> &'static rcgen::SignatureAlgorithm {
        match self {
            KeyAlgorithm::Ed25519 => &rcgen::PKCS_ED25519,
            KeyAlgorithm::EcdsaP256 => &rcgen::PKCS_ECDSA_P256_SHA256,
        }
    }

    /// 签名算法名称（审计日志用）
    pub fn name(&self) -> &'static str {
        match self {
            KeyAlgorithm::Ed25519 => "Ed25519",
            KeyAlgorithm::EcdsaP256 => "ECDSA_P256_SHA256",
        }
    }
}

/// 令牌状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum TokenStatus {
    /// 已激活，可签名
    Active,
    /// 离线，签名访问失败
    Offline,
}

/// CA令牌（软实现）
///
/// 激活码以SHA-256摘要保存；私钥访问在离线状态下立即失败
/// （`CaTokenOffline`），不重试等待。
pub struct CaToken {
    status: TokenStatus,
    algorithm: KeyAlgorithm,
    auth_code_digest: [u8; 32],
    keys: HashMap<KeyPurpose, rcgen::KeyPair>,
}

impl CaToken {
    /// 生成新的软令牌，默认生成证书签名与CRL签名密钥对，初始为激活状态
    pub fn generate(auth_code: &str, algorithm: KeyAlgorithm) -> Result<Self> {
        let mut token = Self {
            status: TokenStatus::Active,
            algorithm,
            auth_code_digest: Sha256::digest(auth_code.as_bytes()).into(),
            keys: HashMap::new(),
        };
        token.generate_key_pair(KeyPurpose::CertSign)?;
        token.generate_key_pair(KeyPurpose::CrlSign)?;
        token.generate_key_pair(KeyPurpose::Default)?;
        Ok(token)
    }

    /// 当前状态
    pub fn status(&self) -> TokenStatus {
        self.status
    }

    /// 密钥算法
    pub fn algorithm(&self) -> KeyAlgorithm {
        self.algorithm
    }

    /// 激活令牌
    ///
    /// 激活码错误返回 `TokenAuthFailed`，状态保持不变。
    pub fn activate(&mut self, auth_code: &str) -> Result<()> {
        let digest: [u8; 32] = Sha256::digest(auth_code.as_bytes()).into();
        if digest != self.auth_code_digest {
            return Err(PkiError::TokenAuthFailed(
                "activation code does not match".to_string(),
            ));
        }
        self.status = TokenStatus::Active;
        info!("CA token activated");
        Ok(())
    }

    /// 停用令牌
    pub fn deactivate(&mut self) {
        self.status = TokenStatus::Offline;
        info!("CA token deactivated");
    }

    /// 为指定用途重新生成密钥对（软令牌换钥）
    pub fn generate_key_pair(&mut self, purpose: KeyPurpose) -> Result<()> {
        let key = rcgen::KeyPair::generate_for(self.algorithm.rcgen_algorithm())
            .map_err(|e| PkiError::Internal(format!("Key generation failed: {e}")))?;
        self.keys.insert(purpose, key);
        Ok(())
    }

    /// 获取签名密钥；令牌离线时失败
    pub fn signing_key(&self, purpose: KeyPurpose) -> Result<&rcgen::KeyPair> {
        if self.status == TokenStatus::Offline {
            return Err(PkiError::CaTokenOffline(format!(
                "token offline, {purpose:?} key unavailable"
            )));
        }
        self.keys.get(&purpose).ok_or_else(|| {
            PkiError::CaTokenOffline(format!("no key pair for purpose {purpose:?}"))
        })
    }

    /// 获取公钥（SPKI DER）；公钥读取不受离线状态限制
    pub fn public_key_der(&self, purpose: KeyPurpose) -> Result<Vec<u8>> {
        self.keys
            .get(&purpose)
            .map(|k| k.public_key_der())
            .ok_or_else(|| {
                PkiError::CaTokenOffline(format!("no key pair for purpose {purpose:?}"))
            })
    }

    /// 导出指定用途私钥的PKCS#8 PEM（软令牌托管）
    pub fn export_key_pem(&self, purpose: KeyPurpose) -> Result<String> {
        let key = self.signing_key(purpose)?;
        Ok(key.serialize_pem())
    }

    /// 从PKCS#8 PEM恢复指定用途的密钥对
    pub fn import_key_pem(&mut self, purpose: KeyPurpose, pem: &str) -> Result<()> {
        let key =
            rcgen::KeyPair::from_pkcs8_pem_and_sign_algo(pem, self.algorithm.rcgen_algorithm())
                .map_err(|e| PkiError::ParseError(format!("Failed to import key pair: {e}")))?;
        self.keys.insert(purpose, key);
        Ok(())
    }
}
