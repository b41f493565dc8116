//! 签发请求历史
//!
//! 按指纹保存签发时刻的请求快照，供审计与事后追溯。快照是
//! 请求的JSON文本，不参与任何签发决策。

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::info;

use crate::error::{PkiError, Result};
use crate::store::backend::StorageBackend;

/// 一条请求历史
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CertReqHistory {
    /// 签出证书的指纹
    pub fingerprint: String,
    /// 终端实体用户名
    pub username: String,
    /// 主体规范化DN
    pub subject_dn: String,
    /// 请求快照（JSON文本）
    pub request_snapshot: String,
    /// 记录时间
    #[serde(with = "time::serde::rfc3339")]
    pub recorded_at: OffsetDateTime,
}

/// 请求历史存储
pub struct RequestHistoryStore {
    backend: Box<dyn StorageBackend>,
}

impl RequestHistoryStore {
    pub fn new(backend: Box<dyn StorageBackend>) -> Self {
        Self { backend }
    }

    fn key(fingerprint: &str) -> String {
        format!("reqhist-{fingerprint}")
    }

    /// 记录一次签发
    pub fn add(
        &mut self,
        fingerprint: &str,
        username: &str,
        subject_dn: &str,
        request_snapshot: String,
    ) -> Result<()> {
        let entry = CertReqHistory {
            fingerprint: fingerprint.to_string(),
            username: username.to_string(),
            subject_dn: subject_dn.to_string(),
            request_snapshot,
            recorded_at: OffsetDateTime::now_utc(),
        };
        let bytes = serde_json::to_vec(&entry)?;
        self.backend.put(&Self::key(fingerprint), &bytes)
    }

    /// 按指纹读取
    pub fn get(&self, fingerprint: &str) -> Result<Option<CertReqHistory>> {
        let Some(bytes) = self.backend.get(&Self::key(fingerprint))? else {
            return Ok(None);
        };
        Ok(Some(serde_json::from_slice(&bytes)?))
    }

    /// 某用户的全部历史
    pub fn find_by_username(&self, username: &str) -> Result<Vec<CertReqHistory>> {
        let mut entries = Vec::new();
        for key in self.backend.list_keys()? {
            if !key.starts_with("reqhist-") {
                continue;
            }
            if let Some(bytes) = self.backend.get(&key)? {
                let entry: CertReqHistory = serde_json::from_slice(&bytes)?;
                if entry.username == username {
                    entries.push(entry);
                }
            }
        }
        entries.sort_by_key(|e| e.recorded_at);
        Ok(entries)
    }

    /// 删除一条历史
    pub fn remove(&mut self, fingerprint: &str) -> Result<()> {
        if !self.backend.contains(&Self::key(fingerprint))? {
            return Err(PkiError::CertificateNotFound(format!(
                "no request history for {fingerprint}"
            )));
        }
        self.backend.delete(&Self::key(fingerprint))?;
        info!(fingerprint, "request history removed");
        Ok(())
    }
}
