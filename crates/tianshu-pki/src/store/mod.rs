//! 证书状态存储
//!
//! 权威的证书状态真相源：撤销检查、CRL条目快照、到期归档都从
//! 这里读。记录以指纹为主键，按(颁发者DN, 序列号)去重；每行带
//! 防篡改摘要，读取时校验。所有DN键使用规范化形式。

pub mod backend;
pub mod history;
pub mod profiles;

pub use backend::{FileSystemBackend, MemoryBackend, StorageBackend};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use time::{Duration, OffsetDateTime};
use tracing::{info, warn};

use crate::cert::CertificateData;
use crate::crl::CrlEntry;
use crate::error::{PkiError, Result};
use crate::types::{CertificateStatus, CertificateType, RevocationReason};

/// 证书存储记录
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CertificateRecord {
    /// SHA-256指纹（主键）
    pub fingerprint: String,
    /// 证书DER（十六进制，解除暂停后重新发布时需要）
    pub cert_hex: String,
    /// 序列号（十六进制）
    pub serial_hex: String,
    /// 颁发者规范化DN
    pub issuer_dn: String,
    /// 主体规范化DN
    pub subject_dn: String,
    /// 证书状态
    pub status: CertificateStatus,
    /// 证书类型
    pub cert_type: CertificateType,
    /// 签发使用的profile ID
    pub profile_id: i32,
    /// 关联的终端实体用户名
    pub username: String,
    /// 可选标签（调用方自定义的检索标记）
    pub tag: Option<String>,
    /// 签发CA证书的指纹（根CA记录指向自身）
    pub ca_fingerprint: String,
    /// 过期时间
    #[serde(with = "time::serde::rfc3339")]
    pub expire_date: OffsetDateTime,
    /// 撤销时间
    #[serde(with = "time::serde::rfc3339::option")]
    pub revocation_date: Option<OffsetDateTime>,
    /// 撤销原因
    pub revocation_reason: RevocationReason,
    /// 行级防篡改摘要
    pub protection: String,
    /// 最后更新时间
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl CertificateRecord {
    /// 证书DER字节
    pub fn certificate_der(&self) -> Result<Vec<u8>> {
        hex::decode(&self.cert_hex)
            .map_err(|e| PkiError::ParseError(format!("stored certificate is not valid hex: {e}")))
    }

    /// 计算行保护摘要（覆盖状态相关字段）
    fn compute_protection(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.fingerprint.as_bytes());
        hasher.update(self.serial_hex.as_bytes());
        hasher.update(self.issuer_dn.as_bytes());
        hasher.update(self.subject_dn.as_bytes());
        hasher.update(format!("{:?}", self.status).as_bytes());
        hasher.update(format!("{:?}", self.revocation_reason).as_bytes());
        hasher.update(
            self.revocation_date
                .map(|d| d.unix_timestamp())
                .unwrap_or(0)
                .to_be_bytes(),
        );
        hex::encode(hasher.finalize())
    }

    fn seal(&mut self) {
        self.updated_at = OffsetDateTime::now_utc();
        self.protection = self.compute_protection();
    }
}

/// 撤销状态变更的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevocationOutcome {
    /// 证书被撤销（或暂停）
    Revoked,
    /// 暂停被解除，证书恢复激活
    Reactivated,
    /// 状态未变（重复撤销或不允许的解除）
    Unchanged,
}

/// 证书状态存储
pub struct CertificateStore {
    backend: Box<dyn StorageBackend>,
}

impl CertificateStore {
    pub fn new(backend: Box<dyn StorageBackend>) -> Self {
        Self { backend }
    }

    /// 内存存储（测试与嵌入场景）
    pub fn in_memory() -> Self {
        Self::new(Box::new(MemoryBackend::new()))
    }

    /// 写入新签发的证书
    ///
    /// 同一(颁发者DN, 序列号)或同一指纹已存在时拒绝写入。
    pub fn store_certificate(
        &mut self,
        cert: &CertificateData,
        cert_type: CertificateType,
        profile_id: i32,
        username: &str,
        ca_fingerprint: &str,
        tag: Option<&str>,
    ) -> Result<CertificateRecord> {
        if self.backend.contains(&cert.fingerprint)? {
            return Err(PkiError::DuplicateOrWrite(format!(
                "certificate already stored: {}",
                cert.fingerprint
            )));
        }
        if self
            .find_by_issuer_and_serial(&cert.issuer_dn, &cert.serial_hex)?
            .is_some()
        {
            return Err(PkiError::DuplicateOrWrite(format!(
                "issuer '{}' already has a certificate with serial {}",
                cert.issuer_dn, cert.serial_hex
            )));
        }

        let mut record = CertificateRecord {
            fingerprint: cert.fingerprint.clone(),
            cert_hex: hex::encode(&cert.der),
            serial_hex: cert.serial_hex.clone(),
            issuer_dn: cert.issuer_dn.clone(),
            subject_dn: cert.subject_dn.clone(),
            status: CertificateStatus::Active,
            cert_type,
            profile_id,
            username: username.to_string(),
            tag: tag.map(str::to_string),
            ca_fingerprint: ca_fingerprint.to_string(),
            expire_date: cert.not_after,
            revocation_date: None,
            revocation_reason: RevocationReason::NotRevoked,
            protection: String::new(),
            updated_at: OffsetDateTime::now_utc(),
        };
        record.seal();
        self.write(&record)?;
        info!(
            fingerprint = %record.fingerprint,
            subject_dn = %record.subject_dn,
            "certificate stored"
        );
        Ok(record)
    }

    /// 按指纹读取
    pub fn find_by_fingerprint(&self, fingerprint: &str) -> Result<Option<CertificateRecord>> {
        let Some(bytes) = self.backend.get(fingerprint)? else {
            return Ok(None);
        };
        let record: CertificateRecord = serde_json::from_slice(&bytes)?;
        if record.protection != record.compute_protection() {
            warn!(fingerprint, "certificate record failed protection check");
        }
        Ok(Some(record))
    }

    /// 按(颁发者DN, 序列号)查找
    pub fn find_by_issuer_and_serial(
        &self,
        issuer_dn: &str,
        serial_hex: &str,
    ) -> Result<Option<CertificateRecord>> {
        for record in self.scan()? {
            if record.issuer_dn == issuer_dn && record.serial_hex == serial_hex {
                return Ok(Some(record));
            }
        }
        Ok(None)
    }

    /// 按主体DN查找（规范化形式）
    pub fn find_by_subject(&self, subject_dn: &str) -> Result<Vec<CertificateRecord>> {
        Ok(self
            .scan()?
            .into_iter()
            .filter(|r| r.subject_dn == subject_dn)
            .collect())
    }

    /// 某CA签发的全部记录
    pub fn find_by_ca_fingerprint(&self, ca_fingerprint: &str) -> Result<Vec<CertificateRecord>> {
        Ok(self
            .scan()?
            .into_iter()
            .filter(|r| r.ca_fingerprint == ca_fingerprint)
            .collect())
    }

    /// 在窗口内到期、仍有效且尚未通知过的记录
    pub fn find_expiring_within(&self, window: Duration) -> Result<Vec<CertificateRecord>> {
        let deadline = OffsetDateTime::now_utc() + window;
        Ok(self
            .scan()?
            .into_iter()
            .filter(|r| r.status == CertificateStatus::Active && r.expire_date <= deadline)
            .collect())
    }

    /// 标记已发送到期通知
    pub fn mark_expiration_notified(&mut self, fingerprint: &str) -> Result<()> {
        let mut record = self.require(fingerprint)?;
        record.status = CertificateStatus::NotifiedAboutExpiration;
        record.seal();
        self.write(&record)
    }

    /// 归档已过期的证书（包括已过期的被撤销证书），返回归档数量
    pub fn archive_expired(&mut self) -> Result<usize> {
        let now = OffsetDateTime::now_utc();
        let mut archived = 0;
        for mut record in self.scan()? {
            let eligible = matches!(
                record.status,
                CertificateStatus::Active
                    | CertificateStatus::NotifiedAboutExpiration
                    | CertificateStatus::Revoked
            );
            if eligible && record.expire_date < now {
                record.status = CertificateStatus::Archived;
                record.seal();
                self.write(&record)?;
                archived += 1;
            }
        }
        if archived > 0 {
            info!(archived, "expired certificates archived");
        }
        Ok(archived)
    }

    /// 变更撤销状态
    ///
    /// 撤销方向幂等：已撤销证书再次撤销不改变状态。解除方向只允许
    /// 从暂停（`CertificateHold`）恢复；其它情形记录日志后原样返回。
    pub fn set_revoke_status(
        &mut self,
        issuer_dn: &str,
        serial_hex: &str,
        reason: RevocationReason,
    ) -> Result<RevocationOutcome> {
        let Some(mut record) = self.find_by_issuer_and_serial(issuer_dn, serial_hex)? else {
            return Err(PkiError::CertificateNotFound(format!(
                "issuer '{issuer_dn}' serial {serial_hex}"
            )));
        };

        if reason.is_revoking() {
            if record.status == CertificateStatus::Revoked {
                info!(
                    serial = serial_hex,
                    "certificate already revoked, revocation unchanged"
                );
                return Ok(RevocationOutcome::Unchanged);
            }
            record.status = CertificateStatus::Revoked;
            record.revocation_date = Some(OffsetDateTime::now_utc());
            record.revocation_reason = reason;
            record.seal();
            self.write(&record)?;
            info!(serial = serial_hex, reason = ?reason, "certificate revoked");
            return Ok(RevocationOutcome::Revoked);
        }

        // 解除撤销：仅暂停可恢复
        if record.status == CertificateStatus::Revoked
            && record.revocation_reason == RevocationReason::CertificateHold
        {
            record.status = CertificateStatus::Active;
            record.revocation_date = None;
            record.revocation_reason = RevocationReason::NotRevoked;
            record.seal();
            self.write(&record)?;
            info!(serial = serial_hex, "certificate hold released");
            return Ok(RevocationOutcome::Reactivated);
        }

        info!(
            serial = serial_hex,
            status = ?record.status,
            "unrevoke requested but certificate is not on hold, no change"
        );
        Ok(RevocationOutcome::Unchanged)
    }

    /// 撤销检查（故障安全：查无记录视为已撤销）
    pub fn is_revoked(&self, issuer_dn: &str, serial_hex: &str) -> Result<bool> {
        match self.find_by_issuer_and_serial(issuer_dn, serial_hex)? {
            Some(record) => Ok(record.status == CertificateStatus::Revoked),
            None => {
                warn!(
                    issuer_dn,
                    serial = serial_hex,
                    "revocation check for unknown certificate, treated as revoked"
                );
                Ok(true)
            }
        }
    }

    /// 查询证书状态
    pub fn get_status(
        &self,
        issuer_dn: &str,
        serial_hex: &str,
    ) -> Result<Option<CertificateStatus>> {
        Ok(self
            .find_by_issuer_and_serial(issuer_dn, serial_hex)?
            .map(|r| r.status))
    }

    /// 某颁发者的CRL条目快照（含暂停条目）
    pub fn revoked_entries(&self, issuer_dn: &str) -> Result<Vec<CrlEntry>> {
        self.revoked_entries_filtered(issuer_dn, None)
    }

    /// 基线时间之后变更的CRL条目（增量CRL用）
    pub fn revoked_entries_since(
        &self,
        issuer_dn: &str,
        since: OffsetDateTime,
    ) -> Result<Vec<CrlEntry>> {
        self.revoked_entries_filtered(issuer_dn, Some(since))
    }

    fn revoked_entries_filtered(
        &self,
        issuer_dn: &str,
        since: Option<OffsetDateTime>,
    ) -> Result<Vec<CrlEntry>> {
        let mut entries = Vec::new();
        for record in self.scan()? {
            if record.issuer_dn != issuer_dn || record.status != CertificateStatus::Revoked {
                continue;
            }
            let Some(date) = record.revocation_date else {
                continue;
            };
            if let Some(since) = since {
                if date <= since {
                    continue;
                }
            }
            let serial = hex::decode(&record.serial_hex).map_err(|e| {
                PkiError::ParseError(format!(
                    "stored serial '{}' is not valid hex: {e}",
                    record.serial_hex
                ))
            })?;
            entries.push(CrlEntry {
                serial,
                revocation_date: date,
                reason: record.revocation_reason,
            });
        }
        entries.sort_by(|a, b| a.serial.cmp(&b.serial));
        Ok(entries)
    }

    fn require(&self, fingerprint: &str) -> Result<CertificateRecord> {
        self.find_by_fingerprint(fingerprint)?
            .ok_or_else(|| PkiError::CertificateNotFound(fingerprint.to_string()))
    }

    fn write(&mut self, record: &CertificateRecord) -> Result<()> {
        let bytes = serde_json::to_vec(record)?;
        self.backend.put(&record.fingerprint, &bytes)
    }

    fn scan(&self) -> Result<Vec<CertificateRecord>> {
        let mut records = Vec::new();
        for key in self.backend.list_keys()? {
            if let Some(record) = self.find_by_fingerprint(&key)? {
                records.push(record);
            }
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cert::{CertificateFactory, IssuanceRequest, SubjectInfo};
    use crate::dn::SubjectDn;
    use crate::profile::CertificateProfile;
    use crate::token::{CaToken, KeyAlgorithm};

    fn sample_cert(cn: &str) -> CertificateData {
        let factory = CertificateFactory::new();
        let token = CaToken::generate("foo123", KeyAlgorithm::Ed25519).unwrap();
        let request = IssuanceRequest::new(SubjectInfo::new(SubjectDn::new(cn), cn));
        factory
            .issue_self_signed(&request, &CertificateProfile::root_ca(), &token)
            .unwrap()
    }

    fn store_sample(store: &mut CertificateStore, cn: &str) -> CertificateRecord {
        let cert = sample_cert(cn);
        store
            .store_certificate(&cert, CertificateType::EndEntity, 3, cn, "ca-fp", None)
            .unwrap()
    }

    #[test]
    fn test_store_and_lookup() {
        let mut store = CertificateStore::in_memory();
        let record = store_sample(&mut store, "lookup-test");

        let by_fp = store
            .find_by_fingerprint(&record.fingerprint)
            .unwrap()
            .unwrap();
        assert_eq!(by_fp.status, CertificateStatus::Active);

        let by_serial = store
            .find_by_issuer_and_serial(&record.issuer_dn, &record.serial_hex)
            .unwrap()
            .unwrap();
        assert_eq!(by_serial.fingerprint, record.fingerprint);

        let by_subject = store.find_by_subject(&record.subject_dn).unwrap();
        assert_eq!(by_subject.len(), 1);
    }

    #[test]
    fn test_duplicate_store_rejected() {
        let mut store = CertificateStore::in_memory();
        let cert = sample_cert("dup-test");
        store
            .store_certificate(&cert, CertificateType::EndEntity, 3, "dup", "ca-fp", None)
            .unwrap();
        let err = store
            .store_certificate(&cert, CertificateType::EndEntity, 3, "dup", "ca-fp", None)
            .unwrap_err();
        assert!(matches!(err, PkiError::DuplicateOrWrite(_)));
    }

    #[test]
    fn test_tag_is_stored_with_record() {
        let mut store = CertificateStore::in_memory();
        let cert = sample_cert("tag-test");
        let record = store
            .store_certificate(
                &cert,
                CertificateType::EndEntity,
                3,
                "tag",
                "ca-fp",
                Some("batch-2026-08"),
            )
            .unwrap();
        assert_eq!(record.tag.as_deref(), Some("batch-2026-08"));

        let loaded = store
            .find_by_fingerprint(&record.fingerprint)
            .unwrap()
            .unwrap();
        assert_eq!(loaded.tag.as_deref(), Some("batch-2026-08"));
    }

    #[test]
    fn test_revocation_is_idempotent_forward() {
        let mut store = CertificateStore::in_memory();
        let record = store_sample(&mut store, "revoke-test");

        let outcome = store
            .set_revoke_status(
                &record.issuer_dn,
                &record.serial_hex,
                RevocationReason::KeyCompromise,
            )
            .unwrap();
        assert_eq!(outcome, RevocationOutcome::Revoked);
        assert!(store
            .is_revoked(&record.issuer_dn, &record.serial_hex)
            .unwrap());

        // 再次撤销不改变状态
        let outcome = store
            .set_revoke_status(
                &record.issuer_dn,
                &record.serial_hex,
                RevocationReason::Superseded,
            )
            .unwrap();
        assert_eq!(outcome, RevocationOutcome::Unchanged);
        let current = store
            .find_by_issuer_and_serial(&record.issuer_dn, &record.serial_hex)
            .unwrap()
            .unwrap();
        assert_eq!(current.revocation_reason, RevocationReason::KeyCompromise);
    }

    #[test]
    fn test_hold_can_be_released() {
        let mut store = CertificateStore::in_memory();
        let record = store_sample(&mut store, "hold-test");

        store
            .set_revoke_status(
                &record.issuer_dn,
                &record.serial_hex,
                RevocationReason::CertificateHold,
            )
            .unwrap();
        let outcome = store
            .set_revoke_status(
                &record.issuer_dn,
                &record.serial_hex,
                RevocationReason::RemoveFromCrl,
            )
            .unwrap();
        assert_eq!(outcome, RevocationOutcome::Reactivated);
        assert_eq!(
            store
                .get_status(&record.issuer_dn, &record.serial_hex)
                .unwrap(),
            Some(CertificateStatus::Active)
        );
    }

    #[test]
    fn test_permanent_revocation_cannot_be_released() {
        let mut store = CertificateStore::in_memory();
        let record = store_sample(&mut store, "permanent-test");

        store
            .set_revoke_status(
                &record.issuer_dn,
                &record.serial_hex,
                RevocationReason::KeyCompromise,
            )
            .unwrap();
        let outcome = store
            .set_revoke_status(
                &record.issuer_dn,
                &record.serial_hex,
                RevocationReason::RemoveFromCrl,
            )
            .unwrap();
        assert_eq!(outcome, RevocationOutcome::Unchanged);
        assert!(store
            .is_revoked(&record.issuer_dn, &record.serial_hex)
            .unwrap());
    }

    #[test]
    fn test_unknown_serial_is_fail_safe_revoked() {
        let store = CertificateStore::in_memory();
        assert!(store.is_revoked("CN=Nobody", "deadbeef").unwrap());
        assert_eq!(store.get_status("CN=Nobody", "deadbeef").unwrap(), None);
    }

    #[test]
    fn test_unknown_serial_revocation_fails() {
        let mut store = CertificateStore::in_memory();
        let err = store
            .set_revoke_status("CN=Nobody", "deadbeef", RevocationReason::KeyCompromise)
            .unwrap_err();
        assert!(matches!(err, PkiError::CertificateNotFound(_)));
    }

    #[test]
    fn test_crl_entry_snapshot_includes_holds() {
        let mut store = CertificateStore::in_memory();
        let a = store_sample(&mut store, "entry-a");
        let b = store_sample(&mut store, "entry-b");
        // 两条记录同为自签名证书，颁发者不同，这里只看entry-a的颁发者
        store
            .set_revoke_status(&a.issuer_dn, &a.serial_hex, RevocationReason::CertificateHold)
            .unwrap();
        store
            .set_revoke_status(&b.issuer_dn, &b.serial_hex, RevocationReason::KeyCompromise)
            .unwrap();

        let entries = store.revoked_entries(&a.issuer_dn).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].reason, RevocationReason::CertificateHold);
    }

    #[test]
    fn test_archive_expired_leaves_valid_certificates() {
        let mut store = CertificateStore::in_memory();
        let record = store_sample(&mut store, "archive-test");
        assert_eq!(store.archive_expired().unwrap(), 0);
        let current = store
            .find_by_fingerprint(&record.fingerprint)
            .unwrap()
            .unwrap();
        assert_eq!(current.status, CertificateStatus::Active);
    }

    #[test]
    fn test_filesystem_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let record = {
            let backend = FileSystemBackend::new(dir.path()).unwrap();
            let mut store = CertificateStore::new(Box::new(backend));
            store_sample(&mut store, "fs-test")
        };

        let backend = FileSystemBackend::new(dir.path()).unwrap();
        let store = CertificateStore::new(Box::new(backend));
        let loaded = store
            .find_by_fingerprint(&record.fingerprint)
            .unwrap()
            .unwrap();
        assert_eq!(loaded.subject_dn, record.subject_dn);
        assert_eq!(loaded.protection, record.protection);
    }
}
