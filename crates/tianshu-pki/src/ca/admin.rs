//! CA生命周期编排
//!
//! 状态机：Offline、Active、WaitingForCertificateResponse、External、
//! Expired、Revoked。所有操作经过`&mut self`串行化，单次调用即单个
//! 事务边界：签发失败不会留下半激活的CA。权限检查先行，拒绝记录
//! 操作者身份；令牌离线的操作立即失败且不改变状态。

use std::collections::HashMap;

use time::OffsetDateTime;
use tracing::{info, warn};

use crate::auth::{AuthContext, Role};
use crate::cert::{
    issuer_handle, verify, CertificateData, CertificateFactory, IssuanceRequest, SubjectInfo,
};
use crate::chain;
use crate::crl::{CrlFactory, CrlInfo, CrlPolicy};
use crate::dn::SubjectDn;
use crate::error::{PkiError, Result};
use crate::profile::{
    CertificateProfile, FIXED_PROFILE_ENDUSER, FIXED_PROFILE_ROOTCA, FIXED_PROFILE_SUBCA,
};
use crate::publish::{PublisherRegistry, PublisherSink};
use crate::store::history::RequestHistoryStore;
use crate::store::profiles::ProfileRegistry;
use crate::store::{CertificateStore, MemoryBackend, RevocationOutcome};
use crate::token::{CaToken, KeyAlgorithm, KeyPurpose, TokenStatus};
use crate::types::{CaStatus, CertificateType, RevocationReason, SignedBy};

use super::info::{CaCreateConfig, CaInfo, CaRecord, OcspSignerConfig};

/// CA生命周期编排器
///
/// 持有全部CA记录与下层组件。方法内部对字段的借用保持各自独立，
/// 需要同时操作两条CA记录（如续期时的上级CA）时先把目标记录从
/// 映射中取出，结束后放回。
pub struct CaAdmin {
    cas: HashMap<i32, CaRecord>,
    names: HashMap<String, i32>,
    store: CertificateStore,
    profiles: ProfileRegistry,
    history: RequestHistoryStore,
    publishers: PublisherRegistry,
    cert_factory: CertificateFactory,
    crl_factory: CrlFactory,
}

impl CaAdmin {
    pub fn new(
        store: CertificateStore,
        profiles: ProfileRegistry,
        history: RequestHistoryStore,
        publishers: PublisherRegistry,
    ) -> Self {
        Self {
            cas: HashMap::new(),
            names: HashMap::new(),
            store,
            profiles,
            history,
            publishers,
            cert_factory: CertificateFactory::new(),
            crl_factory: CrlFactory::new(),
        }
    }

    /// 全内存的编排器（测试与嵌入场景）
    pub fn in_memory() -> Result<Self> {
        Ok(Self::new(
            CertificateStore::in_memory(),
            ProfileRegistry::new(Box::new(MemoryBackend::new()))?,
            RequestHistoryStore::new(Box::new(MemoryBackend::new())),
            PublisherRegistry::new(),
        ))
    }

    /// 注册发布器
    pub fn register_publisher(&mut self, id: i32, sink: Box<dyn PublisherSink>) {
        self.publishers.register(id, sink);
    }

    /// 证书状态存储（只读访问）
    pub fn store(&self) -> &CertificateStore {
        &self.store
    }

    /// profile注册表
    pub fn profiles(&mut self) -> &mut ProfileRegistry {
        &mut self.profiles
    }

    /// 请求历史
    pub fn history(&self) -> &RequestHistoryStore {
        &self.history
    }

    /// 创建CA
    ///
    /// 自签名 → Active并签出初始CRL；由本系统CA签发 → 校验上级CA
    /// 状态与有效期后签出，Active；外部签发 → 生成密钥后进入
    /// WaitingForCertificateResponse，等待 `receive_response`。
    pub fn create_ca(&mut self, auth: &AuthContext, config: CaCreateConfig) -> Result<CaInfo> {
        auth.require(Role::CaAdmin, "create_ca")?;
        let ca_id = config.subject_dn.ca_id();
        if self.cas.contains_key(&ca_id) {
            return Err(PkiError::CaAlreadyExists(format!(
                "subject DN '{}' (id {ca_id})",
                config.subject_dn.canonical()
            )));
        }
        if self.names.contains_key(&config.name) {
            return Err(PkiError::CaAlreadyExists(config.name.clone()));
        }

        let token = CaToken::generate(&config.auth_code, config.key_algorithm)?;
        let mut record = CaRecord {
            ca_id,
            name: config.name.clone(),
            subject_dn: config.subject_dn.clone(),
            status: CaStatus::Offline,
            signed_by: config.signed_by.clone(),
            key_algorithm: config.key_algorithm,
            token: Some(token),
            chain: Vec::new(),
            signer_handle: None,
            crl_policy: config.crl_policy.clone(),
            next_crl_number: 1,
            last_full_crl: None,
            last_delta_crl: None,
            publisher_ids: config.publisher_ids.clone(),
            default_cdp: config.default_cdp.clone(),
            ocsp_signer: OcspSignerConfig {
                enabled: config.ocsp_signer_enabled,
                signer_fingerprint: None,
            },
            revocation_reason: None,
            revocation_date: None,
        };

        match &config.signed_by {
            SignedBy::SelfSigned => self.activate_self_signed(&mut record)?,
            SignedBy::Ca(signer_id) => self.activate_internally_signed(&mut record, *signer_id)?,
            SignedBy::ExternalCa => {
                record.status = CaStatus::WaitingForCertificateResponse;
                info!(ca = %record.name, "CA created, waiting for external certificate response");
            }
        }

        let info = record.info();
        self.names.insert(config.name, ca_id);
        self.cas.insert(ca_id, record);
        Ok(info)
    }

    fn activate_self_signed(&mut self, record: &mut CaRecord) -> Result<()> {
        let profile = self.profile_or_err(FIXED_PROFILE_ROOTCA.0)?;
        let token = record
            .token
            .as_ref()
            .ok_or_else(|| PkiError::Internal("newly created CA has no token".to_string()))?;
        let request = IssuanceRequest::new(SubjectInfo::new(
            record.subject_dn.clone(),
            record.name.clone(),
        ));
        let cert = self.cert_factory.issue_self_signed(&request, &profile, token)?;
        let handle = issuer_handle(&cert, token)?;
        self.store.store_certificate(
            &cert,
            CertificateType::RootCa,
            FIXED_PROFILE_ROOTCA.0,
            &record.name,
            &cert.fingerprint,
            None,
        )?;
        self.publishers.publish_certificate(
            &record.publisher_ids,
            &cert.der,
            &cert.subject_dn,
            &record.name,
        )?;

        record.chain = vec![cert];
        record.signer_handle = Some(handle);
        record.status = CaStatus::Active;
        self.issue_full_crl_for(record)?;
        self.init_extended_services(record)?;
        info!(ca = %record.name, ca_id = record.ca_id, "root CA created and activated");
        Ok(())
    }

    fn activate_internally_signed(&mut self, record: &mut CaRecord, signer_id: i32) -> Result<()> {
        // 上级CA过期时就地翻转其状态并拒绝签发
        {
            let signer = self.cas.get_mut(&signer_id).ok_or_else(|| {
                PkiError::CaDoesNotExist(format!("signing CA id {signer_id}"))
            })?;
            if let Some(expires) = signer.expires_at() {
                if expires < OffsetDateTime::now_utc() {
                    warn!(ca = %signer.name, "signing CA certificate has expired");
                    signer.status = CaStatus::Expired;
                }
            }
            if signer.status != CaStatus::Active {
                return Err(PkiError::IllegalCaStatus(format!(
                    "signing CA '{}' is {:?}",
                    signer.name, signer.status
                )));
            }
        }

        let profile = self.profile_or_err(FIXED_PROFILE_SUBCA.0)?;
        let token = record
            .token
            .as_ref()
            .ok_or_else(|| PkiError::Internal("newly created CA has no token".to_string()))?;
        let spki = token.public_key_der(KeyPurpose::CertSign)?;

        let signer = self
            .cas
            .get(&signer_id)
            .ok_or_else(|| PkiError::CaDoesNotExist(format!("signing CA id {signer_id}")))?;
        let issuer = signer.issuing_ca()?;
        let request = IssuanceRequest::new(SubjectInfo::new(
            record.subject_dn.clone(),
            record.name.clone(),
        ))
        .with_public_key(spki);
        let cert = self.cert_factory.issue(&request, &profile, &issuer)?;
        let parent_fingerprint = issuer.data.fingerprint.clone();
        let mut new_chain = vec![cert.clone()];
        new_chain.extend(signer.chain.iter().cloned());

        self.store.store_certificate(
            &cert,
            CertificateType::SubCa,
            FIXED_PROFILE_SUBCA.0,
            &record.name,
            &parent_fingerprint,
            None,
        )?;
        self.publishers.publish_certificate(
            &record.publisher_ids,
            &cert.der,
            &cert.subject_dn,
            &record.name,
        )?;

        let handle = issuer_handle(&cert, token)?;
        record.chain = new_chain;
        record.signer_handle = Some(handle);
        record.status = CaStatus::Active;
        self.issue_full_crl_for(record)?;
        self.init_extended_services(record)?;
        info!(ca = %record.name, ca_id = record.ca_id, signer_id, "subordinate CA created and activated");
        Ok(())
    }

    /// 导出待签发CA的公钥（SPKI DER），交给外部CA签发
    pub fn make_certificate_request(&mut self, auth: &AuthContext, ca_id: i32) -> Result<Vec<u8>> {
        auth.require(Role::CaAdmin, "make_certificate_request")?;
        let record = self.record(ca_id)?;
        if record.status != CaStatus::WaitingForCertificateResponse {
            return Err(PkiError::IllegalCaStatus(format!(
                "CA '{}' is not waiting for a certificate response",
                record.name
            )));
        }
        let token = record.token.as_ref().ok_or_else(|| {
            PkiError::IllegalCaStatus(format!("CA '{}' has no local key token", record.name))
        })?;
        token.public_key_der(KeyPurpose::CertSign)
    }

    /// 接收外部CA签回的证书链
    ///
    /// 校验链路径、主体DN一致性与公钥归属后转入Active，签出初始CRL。
    pub fn receive_response(
        &mut self,
        auth: &AuthContext,
        ca_id: i32,
        certs: Vec<CertificateData>,
    ) -> Result<CaInfo> {
        auth.require(Role::CaAdmin, "receive_response")?;
        let mut record = self.take_record(ca_id)?;
        let result = self.receive_response_inner(&mut record, certs);
        let info = record.info();
        self.cas.insert(ca_id, record);
        result.map(|()| info)
    }

    fn receive_response_inner(
        &mut self,
        record: &mut CaRecord,
        certs: Vec<CertificateData>,
    ) -> Result<()> {
        if record.status != CaStatus::WaitingForCertificateResponse {
            return Err(PkiError::IllegalCaStatus(format!(
                "CA '{}' is not waiting for a certificate response",
                record.name
            )));
        }
        let ordered = chain::build_validated_path(certs)?;
        let leaf = &ordered[0];
        if leaf.subject_dn != record.subject_dn.canonical() {
            return Err(PkiError::BadRequest(format!(
                "response subject '{}' does not match CA subject '{}'",
                leaf.subject_dn,
                record.subject_dn.canonical()
            )));
        }
        let token = record.token.as_ref().ok_or_else(|| {
            PkiError::IllegalCaStatus(format!("CA '{}' has no local key token", record.name))
        })?;
        if leaf.public_key_spki_der()? != token.public_key_der(KeyPurpose::CertSign)? {
            return Err(PkiError::BadRequest(
                "response certificate does not carry this CA's public key".to_string(),
            ));
        }

        let parent_fingerprint = ordered
            .get(1)
            .map(|c| c.fingerprint.clone())
            .unwrap_or_else(|| leaf.fingerprint.clone());
        self.store.store_certificate(
            leaf,
            CertificateType::SubCa,
            FIXED_PROFILE_SUBCA.0,
            &record.name,
            &parent_fingerprint,
            None,
        )?;
        self.publishers.publish_certificate(
            &record.publisher_ids,
            &leaf.der,
            &leaf.subject_dn,
            &record.name,
        )?;

        let handle = issuer_handle(leaf, token)?;
        record.chain = ordered;
        record.signer_handle = Some(handle);
        record.status = CaStatus::Active;
        self.issue_full_crl_for(record)?;
        self.init_extended_services(record)?;
        info!(ca = %record.name, "external certificate response accepted, CA activated");
        Ok(())
    }

    /// 处理外部下级CA的签发请求
    ///
    /// 用本系统的CA为对方的公钥签出下级CA证书，并把对方登记为
    /// External状态的CA（无本地密钥材料）。
    pub fn process_request(
        &mut self,
        auth: &AuthContext,
        signer_id: i32,
        name: &str,
        subject_dn: SubjectDn,
        spki_der: &[u8],
    ) -> Result<(CaInfo, CertificateData)> {
        auth.require(Role::CaAdmin, "process_request")?;
        let ca_id = subject_dn.ca_id();
        if self.cas.contains_key(&ca_id) || self.names.contains_key(name) {
            return Err(PkiError::CaAlreadyExists(name.to_string()));
        }

        let profile = self.profile_or_err(FIXED_PROFILE_SUBCA.0)?;
        let signer = self
            .cas
            .get(&signer_id)
            .ok_or_else(|| PkiError::CaDoesNotExist(format!("signing CA id {signer_id}")))?;
        if signer.status != CaStatus::Active {
            return Err(PkiError::IllegalCaStatus(format!(
                "signing CA '{}' is {:?}",
                signer.name, signer.status
            )));
        }
        let issuer = signer.issuing_ca()?;
        let request = IssuanceRequest::new(SubjectInfo::new(subject_dn.clone(), name.to_string()))
            .with_public_key(spki_der.to_vec());
        let cert = self.cert_factory.issue(&request, &profile, &issuer)?;
        let parent_fingerprint = issuer.data.fingerprint.clone();
        let mut chain = vec![cert.clone()];
        chain.extend(signer.chain.iter().cloned());
        let publisher_ids = signer.publisher_ids.clone();

        self.store.store_certificate(
            &cert,
            CertificateType::SubCa,
            FIXED_PROFILE_SUBCA.0,
            name,
            &parent_fingerprint,
            None,
        )?;
        self.publishers
            .publish_certificate(&publisher_ids, &cert.der, &cert.subject_dn, name)?;

        let record = CaRecord {
            ca_id,
            name: name.to_string(),
            subject_dn,
            status: CaStatus::External,
            signed_by: SignedBy::Ca(signer_id),
            key_algorithm: key_algorithm_of(spki_der)?,
            token: None,
            chain,
            signer_handle: None,
            crl_policy: CrlPolicy::default(),
            next_crl_number: 1,
            last_full_crl: None,
            last_delta_crl: None,
            publisher_ids,
            default_cdp: None,
            ocsp_signer: OcspSignerConfig::default(),
            revocation_reason: None,
            revocation_date: None,
        };
        let info = record.info();
        self.names.insert(name.to_string(), ca_id);
        self.cas.insert(ca_id, record);
        info!(ca = name, ca_id, signer_id, "external CA request processed");
        Ok((info, cert))
    }

    /// 续期CA证书
    ///
    /// 令牌离线立即失败且不改变任何状态；`re_key`为真时先换签名
    /// 密钥对再签发。
    pub fn renew_ca(&mut self, auth: &AuthContext, ca_id: i32, re_key: bool) -> Result<CaInfo> {
        auth.require(Role::CaAdmin, "renew_ca")?;
        let mut record = self.take_record(ca_id)?;
        let result = self.renew_ca_inner(&mut record, re_key);
        let info = record.info();
        self.cas.insert(ca_id, record);
        result.map(|()| info)
    }

    fn renew_ca_inner(&mut self, record: &mut CaRecord, re_key: bool) -> Result<()> {
        if record.status != CaStatus::Active {
            return Err(PkiError::IllegalCaStatus(format!(
                "CA '{}' is {:?}, renewal requires Active",
                record.name, record.status
            )));
        }
        {
            let token = record.token.as_mut().ok_or_else(|| {
                PkiError::IllegalCaStatus(format!("CA '{}' has no local key token", record.name))
            })?;
            // 先探测令牌在线再做任何改动
            token.signing_key(KeyPurpose::CertSign)?;
            if re_key {
                token.generate_key_pair(KeyPurpose::CertSign)?;
            }
        }

        match record.signed_by.clone() {
            SignedBy::SelfSigned => {
                let profile = self.profile_or_err(FIXED_PROFILE_ROOTCA.0)?;
                let token = record.token.as_ref().ok_or_else(|| {
                    PkiError::Internal("token disappeared during renewal".to_string())
                })?;
                let request = IssuanceRequest::new(SubjectInfo::new(
                    record.subject_dn.clone(),
                    record.name.clone(),
                ));
                let cert = self.cert_factory.issue_self_signed(&request, &profile, token)?;
                let handle = issuer_handle(&cert, token)?;
                self.store.store_certificate(
                    &cert,
                    CertificateType::RootCa,
                    FIXED_PROFILE_ROOTCA.0,
                    &record.name,
                    &cert.fingerprint,
                    None,
                )?;
                record.chain = vec![cert];
                record.signer_handle = Some(handle);
            }
            SignedBy::Ca(signer_id) => {
                let profile = self.profile_or_err(FIXED_PROFILE_SUBCA.0)?;
                let token = record.token.as_ref().ok_or_else(|| {
                    PkiError::Internal("token disappeared during renewal".to_string())
                })?;
                let spki = token.public_key_der(KeyPurpose::CertSign)?;
                let signer = self.cas.get(&signer_id).ok_or_else(|| {
                    PkiError::CaDoesNotExist(format!("signing CA id {signer_id}"))
                })?;
                let issuer = signer.issuing_ca()?;
                let request = IssuanceRequest::new(SubjectInfo::new(
                    record.subject_dn.clone(),
                    record.name.clone(),
                ))
                .with_public_key(spki);
                let cert = self.cert_factory.issue(&request, &profile, &issuer)?;
                let parent_fingerprint = issuer.data.fingerprint.clone();
                let mut new_chain = vec![cert.clone()];
                new_chain.extend(signer.chain.iter().cloned());
                self.store.store_certificate(
                    &cert,
                    CertificateType::SubCa,
                    FIXED_PROFILE_SUBCA.0,
                    &record.name,
                    &parent_fingerprint,
                    None,
                )?;
                let handle = issuer_handle(&cert, token)?;
                record.chain = new_chain;
                record.signer_handle = Some(handle);
            }
            SignedBy::ExternalCa => {
                return Err(PkiError::IllegalCaStatus(
                    "externally signed CA is renewed through a new certificate response"
                        .to_string(),
                ));
            }
        }
        info!(ca = %record.name, re_key, "CA certificate renewed");
        Ok(())
    }

    /// 撤销CA（不可逆）
    ///
    /// 级联撤销该CA签发的所有证书与CA自身证书，在状态落为Revoked
    /// 前尽力签出一份最终CRL。
    pub fn revoke_ca(
        &mut self,
        auth: &AuthContext,
        ca_id: i32,
        reason: RevocationReason,
    ) -> Result<()> {
        auth.require(Role::CaAdmin, "revoke_ca")?;
        if !reason.is_revoking() {
            return Err(PkiError::BadRequest(format!(
                "'{reason:?}' is not a revocation reason"
            )));
        }
        let mut record = self.take_record(ca_id)?;
        let result = self.revoke_ca_inner(&mut record, reason);
        self.cas.insert(ca_id, record);
        result
    }

    fn revoke_ca_inner(&mut self, record: &mut CaRecord, reason: RevocationReason) -> Result<()> {
        if record.status == CaStatus::Revoked {
            return Err(PkiError::IllegalCaStatus(format!(
                "CA '{}' is already revoked",
                record.name
            )));
        }
        let Some(ca_cert) = record.ca_certificate().cloned() else {
            record.status = CaStatus::Revoked;
            record.revocation_reason = Some(reason);
            record.revocation_date = Some(OffsetDateTime::now_utc());
            warn!(ca = %record.name, "CA revoked before receiving its certificate");
            return Ok(());
        };

        // 级联撤销全部签发的证书，原因一律按CA密钥失陷处理；
        // 根CA自身的记录挂在自己的指纹下，跳过留给下面的显式撤销
        for issued in self.store.find_by_ca_fingerprint(&ca_cert.fingerprint)? {
            if issued.fingerprint == ca_cert.fingerprint {
                continue;
            }
            self.store.set_revoke_status(
                &issued.issuer_dn,
                &issued.serial_hex,
                RevocationReason::CaCompromise,
            )?;
        }
        // CA自身证书保留调用方给出的原因（下级CA的记录挂在上级指纹下）
        match self
            .store
            .set_revoke_status(&ca_cert.issuer_dn, &ca_cert.serial_hex, reason)
        {
            Ok(_) | Err(PkiError::CertificateNotFound(_)) => {}
            Err(e) => return Err(e),
        }

        // 最终CRL：令牌离线不阻塞撤销本身
        match self.issue_full_crl_for(record) {
            Ok(_) => {}
            Err(PkiError::CaTokenOffline(msg)) => {
                warn!(ca = %record.name, "final CRL skipped, token offline: {msg}");
            }
            Err(e) => return Err(e),
        }

        self.publishers.revoke_certificate(
            &record.publisher_ids,
            &ca_cert.der,
            &ca_cert.subject_dn,
            reason,
        );
        record.status = CaStatus::Revoked;
        record.revocation_reason = Some(reason);
        record.revocation_date = Some(OffsetDateTime::now_utc());
        info!(ca = %record.name, reason = ?reason, "CA revoked");
        Ok(())
    }

    /// 激活CA令牌（仅令牌操作员）
    ///
    /// 接受两种来源状态：Offline的CA，以及状态为Active但令牌已
    /// 离线的CA（异常掉线后的恢复）。
    pub fn activate_ca_token(
        &mut self,
        auth: &AuthContext,
        ca_id: i32,
        auth_code: &str,
    ) -> Result<()> {
        auth.require(Role::TokenOperator, "activate_ca_token")?;
        let record = self.record_mut(ca_id)?;
        let token_offline = record
            .token
            .as_ref()
            .map(|t| t.status() == TokenStatus::Offline)
            .unwrap_or(false);
        let activatable = record.status == CaStatus::Offline
            || (record.status == CaStatus::Active && token_offline);
        if !activatable {
            return Err(PkiError::IllegalCaStatus(format!(
                "token activation requires an offline CA or an offline token, '{}' is {:?}",
                record.name, record.status
            )));
        }
        let token = record.token.as_mut().ok_or_else(|| {
            PkiError::IllegalCaStatus(format!("CA '{}' has no local key token", record.name))
        })?;
        token.activate(auth_code)?;
        record.status = CaStatus::Active;
        info!(ca = %record.name, "CA token activated");
        Ok(())
    }

    /// 停用CA令牌（仅令牌操作员）
    pub fn deactivate_ca_token(&mut self, auth: &AuthContext, ca_id: i32) -> Result<()> {
        auth.require(Role::TokenOperator, "deactivate_ca_token")?;
        let record = self.record_mut(ca_id)?;
        if record.status != CaStatus::Active {
            return Err(PkiError::IllegalCaStatus(format!(
                "token deactivation requires an active CA, '{}' is {:?}",
                record.name, record.status
            )));
        }
        let token = record.token.as_mut().ok_or_else(|| {
            PkiError::IllegalCaStatus(format!("CA '{}' has no local key token", record.name))
        })?;
        token.deactivate();
        record.status = CaStatus::Offline;
        info!(ca = %record.name, "CA token deactivated");
        Ok(())
    }

    /// CA更名（不影响主体DN与ID）
    pub fn rename_ca(&mut self, auth: &AuthContext, old_name: &str, new_name: &str) -> Result<()> {
        auth.require(Role::CaAdmin, "rename_ca")?;
        if self.names.contains_key(new_name) {
            return Err(PkiError::CaAlreadyExists(new_name.to_string()));
        }
        let Some(ca_id) = self.names.remove(old_name) else {
            return Err(PkiError::CaDoesNotExist(old_name.to_string()));
        };
        self.names.insert(new_name.to_string(), ca_id);
        if let Some(record) = self.cas.get_mut(&ca_id) {
            record.name = new_name.to_string();
        }
        info!(from = old_name, to = new_name, "CA renamed");
        Ok(())
    }

    /// 删除CA记录（已签发的证书与状态记录保留）
    pub fn remove_ca(&mut self, auth: &AuthContext, ca_id: i32) -> Result<()> {
        auth.require(Role::CaAdmin, "remove_ca")?;
        let Some(record) = self.cas.remove(&ca_id) else {
            return Err(PkiError::CaDoesNotExist(format!("id {ca_id}")));
        };
        if record.status == CaStatus::Active {
            warn!(ca = %record.name, "removing an active CA");
        }
        self.names.remove(&record.name);
        info!(ca = %record.name, "CA removed");
        Ok(())
    }

    /// 修改CA的CRL策略、发布目标与默认分发点
    pub fn edit_ca(
        &mut self,
        auth: &AuthContext,
        ca_id: i32,
        crl_policy: CrlPolicy,
        publisher_ids: Vec<i32>,
        default_cdp: Option<String>,
    ) -> Result<()> {
        auth.require(Role::CaAdmin, "edit_ca")?;
        let record = self.record_mut(ca_id)?;
        record.crl_policy = crl_policy;
        record.publisher_ids = publisher_ids;
        record.default_cdp = default_cdp;
        info!(ca = %record.name, "CA configuration updated");
        Ok(())
    }

    /// 签发终端实体证书
    pub fn issue_certificate(
        &mut self,
        auth: &AuthContext,
        ca_id: i32,
        profile_id: i32,
        request: IssuanceRequest,
    ) -> Result<CertificateData> {
        auth.require(Role::RaOperator, "issue_certificate")?;
        let profile = self.profile_or_err(profile_id)?;
        if !profile.is_ca_allowed(ca_id) {
            return Err(PkiError::ProfileError(format!(
                "profile {profile_id} does not allow CA {ca_id}"
            )));
        }

        let record = self.record(ca_id)?;
        if record.status != CaStatus::Active {
            return Err(PkiError::IllegalCaStatus(format!(
                "CA '{}' is {:?}, issuance requires Active",
                record.name, record.status
            )));
        }
        let issuer = record.issuing_ca()?;
        let cert = self.cert_factory.issue(&request, &profile, &issuer)?;
        let ca_fingerprint = issuer.data.fingerprint.clone();
        let publisher_ids = if profile.publisher_ids.is_empty() {
            record.publisher_ids.clone()
        } else {
            profile.publisher_ids.clone()
        };
        let username = request.subject.username.clone();

        self.store.store_certificate(
            &cert,
            CertificateType::EndEntity,
            profile_id,
            &username,
            &ca_fingerprint,
            request.tag.as_deref(),
        )?;
        let snapshot = serde_json::json!({
            "subject_dn": cert.subject_dn,
            "username": username,
            "profile_id": profile_id,
            "ca_id": ca_id,
        })
        .to_string();
        self.history
            .add(&cert.fingerprint, &username, &cert.subject_dn, snapshot)?;
        self.publishers
            .publish_certificate(&publisher_ids, &cert.der, &cert.subject_dn, &username)?;
        Ok(cert)
    }

    /// 撤销/解除暂停某CA签发的证书
    pub fn revoke_certificate(
        &mut self,
        auth: &AuthContext,
        ca_id: i32,
        serial_hex: &str,
        reason: RevocationReason,
    ) -> Result<RevocationOutcome> {
        auth.require(Role::RaOperator, "revoke_certificate")?;
        let record = self.record(ca_id)?;
        let issuer_dn = record.subject_dn.canonical();
        let publisher_ids = record.publisher_ids.clone();

        let outcome = self.store.set_revoke_status(&issuer_dn, serial_hex, reason)?;
        if let Some(stored) = self.store.find_by_issuer_and_serial(&issuer_dn, serial_hex)? {
            let der = stored.certificate_der()?;
            match outcome {
                RevocationOutcome::Revoked => {
                    self.publishers.revoke_certificate(
                        &publisher_ids,
                        &der,
                        &stored.subject_dn,
                        reason,
                    );
                }
                RevocationOutcome::Reactivated => {
                    // 解除暂停后的重新发布是尽力而为
                    self.publishers.publish_certificate(
                        &publisher_ids,
                        &der,
                        &stored.subject_dn,
                        &stored.username,
                    )?;
                }
                RevocationOutcome::Unchanged => {}
            }
        }
        Ok(outcome)
    }

    /// 签发全量CRL
    pub fn generate_crl(&mut self, auth: &AuthContext, ca_id: i32) -> Result<CrlInfo> {
        auth.require(Role::CaAdmin, "generate_crl")?;
        let mut record = self.take_record(ca_id)?;
        let result = if record.status == CaStatus::Active {
            self.issue_full_crl_for(&mut record)
        } else {
            Err(PkiError::IllegalCaStatus(format!(
                "CA '{}' is {:?}, CRL generation requires Active",
                record.name, record.status
            )))
        };
        self.cas.insert(ca_id, record);
        result
    }

    /// 签发增量CRL（需要已有基线全量CRL）
    pub fn generate_delta_crl(&mut self, auth: &AuthContext, ca_id: i32) -> Result<CrlInfo> {
        auth.require(Role::CaAdmin, "generate_delta_crl")?;
        let mut record = self.take_record(ca_id)?;
        let result = self.generate_delta_crl_inner(&mut record);
        self.cas.insert(ca_id, record);
        result
    }

    fn generate_delta_crl_inner(&mut self, record: &mut CaRecord) -> Result<CrlInfo> {
        if record.status != CaStatus::Active {
            return Err(PkiError::IllegalCaStatus(format!(
                "CA '{}' is {:?}, CRL generation requires Active",
                record.name, record.status
            )));
        }
        let Some(base) = record.last_full_crl.clone() else {
            return Err(PkiError::BadRequest(
                "delta CRL requires an existing full CRL".to_string(),
            ));
        };
        let profile = self.crl_profile_for(record)?;
        let issuer_dn = record.subject_dn.canonical();
        let entries = self.store.revoked_entries_since(&issuer_dn, base.this_update)?;
        let issuer = record.issuing_ca()?;
        let info = self.crl_factory.generate_delta(
            &issuer,
            &record.crl_policy,
            &profile,
            &entries,
            record.next_crl_number,
            base.crl_number,
        )?;
        record.next_crl_number += 1;
        record.last_delta_crl = Some(info.clone());
        self.publishers
            .publish_crl(&record.publisher_ids, &info.der, &info.issuer_dn);
        Ok(info)
    }

    /// 查询CA信息（读取时把已过期的Active CA翻转为Expired）
    pub fn get_ca_info(&mut self, ca_id: i32) -> Result<CaInfo> {
        let record = self.record_mut(ca_id)?;
        if record.status == CaStatus::Active {
            if let Some(expires) = record.expires_at() {
                if expires < OffsetDateTime::now_utc() {
                    warn!(ca = %record.name, "CA certificate has expired");
                    record.status = CaStatus::Expired;
                }
            }
        }
        Ok(record.info())
    }

    /// 按名称查CA ID
    pub fn ca_id_by_name(&self, name: &str) -> Option<i32> {
        self.names.get(name).copied()
    }

    /// CA证书链（叶在前）
    pub fn get_certificate_chain(&self, ca_id: i32) -> Result<Vec<CertificateData>> {
        Ok(self.record(ca_id)?.chain.clone())
    }

    /// 最近一次CRL的元数据
    pub fn get_last_crl_info(&self, ca_id: i32, delta: bool) -> Result<Option<CrlInfo>> {
        let record = self.record(ca_id)?;
        Ok(if delta {
            record.last_delta_crl.clone()
        } else {
            record.last_full_crl.clone()
        })
    }

    /// 为记录签出一份全量CRL并更新CRL号
    fn issue_full_crl_for(&mut self, record: &mut CaRecord) -> Result<CrlInfo> {
        let profile = self.crl_profile_for(record)?;
        let issuer_dn = record.subject_dn.canonical();
        let entries = self.store.revoked_entries(&issuer_dn)?;
        let issuer = record.issuing_ca()?;
        let info = self.crl_factory.generate_full(
            &issuer,
            &record.crl_policy,
            &profile,
            &entries,
            record.next_crl_number,
        )?;
        record.next_crl_number += 1;
        record.last_full_crl = Some(info.clone());
        self.publishers
            .publish_crl(&record.publisher_ids, &info.der, &info.issuer_dn);
        Ok(info)
    }

    /// 扩展服务初始化：签发并发布OCSP签名者证书
    ///
    /// 签名者使用令牌的默认用途密钥对，CN在CA通用名后缀" OCSP Signer"。
    fn init_extended_services(&mut self, record: &mut CaRecord) -> Result<()> {
        if !record.ocsp_signer.enabled {
            return Ok(());
        }
        let profile = self.profile_or_err(FIXED_PROFILE_ENDUSER.0)?;
        let token = record.token.as_ref().ok_or_else(|| {
            PkiError::IllegalCaStatus(format!("CA '{}' has no local key token", record.name))
        })?;
        let spki = token.public_key_der(KeyPurpose::Default)?;
        let signer_dn = SubjectDn::new(format!(
            "{} OCSP Signer",
            record.subject_dn.common_name
        ));
        let issuer = record.issuing_ca()?;
        let request = IssuanceRequest::new(SubjectInfo::new(signer_dn, record.name.clone()))
            .with_public_key(spki);
        let cert = self.cert_factory.issue(&request, &profile, &issuer)?;
        let ca_fingerprint = issuer.data.fingerprint.clone();

        self.store.store_certificate(
            &cert,
            CertificateType::EndEntity,
            FIXED_PROFILE_ENDUSER.0,
            &record.name,
            &ca_fingerprint,
            None,
        )?;
        self.publishers.publish_certificate(
            &record.publisher_ids,
            &cert.der,
            &cert.subject_dn,
            &record.name,
        )?;
        record.ocsp_signer.signer_fingerprint = Some(cert.fingerprint.clone());
        info!(ca = %record.name, "OCSP signer certificate issued");
        Ok(())
    }

    /// CRL生成引用的profile（CA自身证书对应的内置profile）
    fn crl_profile_for(&mut self, record: &CaRecord) -> Result<CertificateProfile> {
        let profile_id = match record.signed_by {
            SignedBy::SelfSigned => FIXED_PROFILE_ROOTCA.0,
            SignedBy::Ca(_) | SignedBy::ExternalCa => FIXED_PROFILE_SUBCA.0,
        };
        self.profile_or_err(profile_id)
    }

    fn profile_or_err(&mut self, profile_id: i32) -> Result<CertificateProfile> {
        self.profiles.get(profile_id)?.ok_or_else(|| {
            PkiError::ProfileError(format!("no certificate profile with id {profile_id}"))
        })
    }

    fn record(&self, ca_id: i32) -> Result<&CaRecord> {
        self.cas
            .get(&ca_id)
            .ok_or_else(|| PkiError::CaDoesNotExist(format!("id {ca_id}")))
    }

    fn record_mut(&mut self, ca_id: i32) -> Result<&mut CaRecord> {
        self.cas
            .get_mut(&ca_id)
            .ok_or_else(|| PkiError::CaDoesNotExist(format!("id {ca_id}")))
    }

    fn take_record(&mut self, ca_id: i32) -> Result<CaRecord> {
        self.cas
            .remove(&ca_id)
            .ok_or_else(|| PkiError::CaDoesNotExist(format!("id {ca_id}")))
    }
}

/// 从SPKI推断密钥算法
fn key_algorithm_of(spki_der: &[u8]) -> Result<KeyAlgorithm> {
    let (oid, _) = verify::spki_raw_parts(spki_der)?;
    if oid == verify::OID_ED25519 {
        Ok(KeyAlgorithm::Ed25519)
    } else if oid == verify::OID_EC_PUBLIC_KEY {
        Ok(KeyAlgorithm::EcdsaP256)
    } else {
        Err(PkiError::BadRequest(format!(
            "unsupported key algorithm: {oid}"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cert::IssuingCa;
    use crate::types::CertificateStatus;

    fn admin() -> CaAdmin {
        CaAdmin::in_memory().unwrap()
    }

    fn super_admin() -> AuthContext {
        AuthContext::super_admin("ops")
    }

    fn root_config(name: &str) -> CaCreateConfig {
        CaCreateConfig::new(
            name,
            SubjectDn::new(format!("{name} Root")).with_organization("Tianshu PKI"),
            "foo123",
        )
    }

    #[test]
    fn test_create_root_ca_active_with_initial_crl() {
        let mut admin = admin();
        let auth = super_admin();
        let info = admin.create_ca(&auth, root_config("test-root")).unwrap();

        assert_eq!(info.status, CaStatus::Active);
        assert_eq!(info.chain.len(), 1);
        assert!(info.chain[0].is_self_signed());

        let crl = admin.get_last_crl_info(info.ca_id, false).unwrap().unwrap();
        assert_eq!(crl.crl_number, 1);
        assert!(crl.entry_serials.is_empty());

        // CA自身证书已入库
        let stored = admin
            .store()
            .find_by_fingerprint(&info.chain[0].fingerprint)
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, CertificateStatus::Active);
    }

    #[test]
    fn test_duplicate_ca_rejected() {
        let mut admin = admin();
        let auth = super_admin();
        admin.create_ca(&auth, root_config("dup-root")).unwrap();
        let err = admin.create_ca(&auth, root_config("dup-root")).unwrap_err();
        assert!(matches!(err, PkiError::CaAlreadyExists(_)));
    }

    #[test]
    fn test_authorization_checked_first() {
        let mut admin = admin();
        let nobody = AuthContext::new("nobody", vec![]);
        let err = admin.create_ca(&nobody, root_config("denied")).unwrap_err();
        assert!(matches!(err, PkiError::AuthorizationDenied { .. }));
    }

    #[test]
    fn test_end_to_end_root_sub_end_entity() {
        let mut admin = admin();
        let auth = super_admin();
        let root = admin.create_ca(&auth, root_config("e2e-root")).unwrap();

        let sub_config = CaCreateConfig::new(
            "e2e-sub",
            SubjectDn::new("E2E Sub CA").with_organization("Tianshu PKI"),
            "bar456",
        )
        .with_signed_by(SignedBy::Ca(root.ca_id));
        let sub = admin.create_ca(&auth, sub_config).unwrap();
        assert_eq!(sub.status, CaStatus::Active);
        assert_eq!(sub.chain.len(), 2);

        // 链路径可验证
        let path = chain::build_validated_path(sub.chain.clone()).unwrap();
        assert_eq!(path[0].subject_dn, sub.subject_dn);

        // 终端实体签发
        let key = rcgen::KeyPair::generate_for(&rcgen::PKCS_ED25519).unwrap();
        let request = IssuanceRequest::new(SubjectInfo::new(SubjectDn::new("alice"), "alice"))
            .with_public_key(key.public_key_der());
        let cert = admin
            .issue_certificate(&auth, sub.ca_id, FIXED_PROFILE_ENDUSER.0, request)
            .unwrap();
        assert_eq!(cert.issuer_dn, sub.subject_dn);

        // 请求历史已记录
        assert!(admin.history().get(&cert.fingerprint).unwrap().is_some());

        // 撤销后上CRL
        let outcome = admin
            .revoke_certificate(
                &auth,
                sub.ca_id,
                &cert.serial_hex,
                RevocationReason::KeyCompromise,
            )
            .unwrap();
        assert_eq!(outcome, RevocationOutcome::Revoked);
        let crl = admin.generate_crl(&auth, sub.ca_id).unwrap();
        assert!(crl.entry_serials.contains(&cert.serial_hex));

        // 增量CRL此后无新变化
        let delta_policy = CrlPolicy {
            delta_period_hours: 1,
            ..CrlPolicy::default()
        };
        admin
            .edit_ca(&auth, sub.ca_id, delta_policy, vec![], None)
            .unwrap();
        let delta = admin.generate_delta_crl(&auth, sub.ca_id).unwrap();
        assert!(delta.is_delta());
        assert_eq!(delta.base_crl_number, Some(crl.crl_number));
        assert!(delta.entry_serials.is_empty());
    }

    #[test]
    fn test_hold_and_release_cycle() {
        let mut admin = admin();
        let auth = super_admin();
        let root = admin.create_ca(&auth, root_config("hold-root")).unwrap();

        let key = rcgen::KeyPair::generate_for(&rcgen::PKCS_ED25519).unwrap();
        let request = IssuanceRequest::new(SubjectInfo::new(SubjectDn::new("bob"), "bob"))
            .with_public_key(key.public_key_der());
        let cert = admin
            .issue_certificate(&auth, root.ca_id, FIXED_PROFILE_ENDUSER.0, request)
            .unwrap();

        admin
            .revoke_certificate(
                &auth,
                root.ca_id,
                &cert.serial_hex,
                RevocationReason::CertificateHold,
            )
            .unwrap();
        assert!(admin
            .store()
            .is_revoked(&cert.issuer_dn, &cert.serial_hex)
            .unwrap());

        let outcome = admin
            .revoke_certificate(
                &auth,
                root.ca_id,
                &cert.serial_hex,
                RevocationReason::RemoveFromCrl,
            )
            .unwrap();
        assert_eq!(outcome, RevocationOutcome::Reactivated);
        assert!(!admin
            .store()
            .is_revoked(&cert.issuer_dn, &cert.serial_hex)
            .unwrap());
    }

    #[test]
    fn test_token_activation_cycle() {
        let mut admin = admin();
        let auth = super_admin();
        let root = admin.create_ca(&auth, root_config("token-root")).unwrap();

        admin.deactivate_ca_token(&auth, root.ca_id).unwrap();
        assert_eq!(
            admin.get_ca_info(root.ca_id).unwrap().status,
            CaStatus::Offline
        );

        // 离线CA拒绝签发
        let key = rcgen::KeyPair::generate_for(&rcgen::PKCS_ED25519).unwrap();
        let request = IssuanceRequest::new(SubjectInfo::new(SubjectDn::new("carol"), "carol"))
            .with_public_key(key.public_key_der());
        let err = admin
            .issue_certificate(&auth, root.ca_id, FIXED_PROFILE_ENDUSER.0, request)
            .unwrap_err();
        assert!(matches!(err, PkiError::IllegalCaStatus(_)));

        // 错误激活码失败且状态不变
        let err = admin
            .activate_ca_token(&auth, root.ca_id, "wrong")
            .unwrap_err();
        assert!(matches!(err, PkiError::TokenAuthFailed(_)));
        assert_eq!(
            admin.get_ca_info(root.ca_id).unwrap().status,
            CaStatus::Offline
        );

        admin.activate_ca_token(&auth, root.ca_id, "foo123").unwrap();
        assert_eq!(
            admin.get_ca_info(root.ca_id).unwrap().status,
            CaStatus::Active
        );
    }

    #[test]
    fn test_activate_token_recovers_active_ca_with_offline_token() {
        let mut admin = admin();
        let auth = super_admin();
        let root = admin.create_ca(&auth, root_config("recover-root")).unwrap();

        // Active的CA不接受重复激活
        let err = admin
            .activate_ca_token(&auth, root.ca_id, "foo123")
            .unwrap_err();
        assert!(matches!(err, PkiError::IllegalCaStatus(_)));

        // 模拟令牌异常掉线而CA状态仍为Active
        admin
            .cas
            .get_mut(&root.ca_id)
            .unwrap()
            .token
            .as_mut()
            .unwrap()
            .deactivate();
        let err = admin
            .renew_ca(&auth, root.ca_id, false)
            .unwrap_err();
        assert!(matches!(err, PkiError::CaTokenOffline(_)));

        admin.activate_ca_token(&auth, root.ca_id, "foo123").unwrap();
        assert_eq!(
            admin.get_ca_info(root.ca_id).unwrap().status,
            CaStatus::Active
        );
        admin.renew_ca(&auth, root.ca_id, false).unwrap();
    }

    #[test]
    fn test_revoke_ca_cascades_and_is_irreversible() {
        let mut admin = admin();
        let auth = super_admin();
        let root = admin.create_ca(&auth, root_config("revoke-root")).unwrap();

        let mut serials = Vec::new();
        for user in ["u1", "u2"] {
            let key = rcgen::KeyPair::generate_for(&rcgen::PKCS_ED25519).unwrap();
            let request = IssuanceRequest::new(SubjectInfo::new(SubjectDn::new(user), user))
                .with_public_key(key.public_key_der());
            let cert = admin
                .issue_certificate(&auth, root.ca_id, FIXED_PROFILE_ENDUSER.0, request)
                .unwrap();
            serials.push((cert.issuer_dn.clone(), cert.serial_hex.clone()));
        }

        admin
            .revoke_ca(&auth, root.ca_id, RevocationReason::Superseded)
            .unwrap();
        let info = admin.get_ca_info(root.ca_id).unwrap();
        assert_eq!(info.status, CaStatus::Revoked);
        assert_eq!(info.revocation_reason, Some(RevocationReason::Superseded));
        assert!(info.revocation_date.is_some());
        // 级联条目的撤销原因一律为CA密钥失陷，与CA自身的原因无关
        for (issuer, serial) in &serials {
            assert!(admin.store().is_revoked(issuer, serial).unwrap());
            let stored = admin
                .store()
                .find_by_issuer_and_serial(issuer, serial)
                .unwrap()
                .unwrap();
            assert_eq!(stored.revocation_reason, RevocationReason::CaCompromise);
        }
        // CA自身证书也被撤销，保留调用方给出的原因
        let ca_cert = &info.chain[0];
        assert!(admin
            .store()
            .is_revoked(&ca_cert.issuer_dn, &ca_cert.serial_hex)
            .unwrap());
        let own = admin
            .store()
            .find_by_issuer_and_serial(&ca_cert.issuer_dn, &ca_cert.serial_hex)
            .unwrap()
            .unwrap();
        assert_eq!(own.revocation_reason, RevocationReason::Superseded);

        // 不可逆
        let err = admin
            .revoke_ca(&auth, root.ca_id, RevocationReason::CaCompromise)
            .unwrap_err();
        assert!(matches!(err, PkiError::IllegalCaStatus(_)));
        let err = admin
            .issue_certificate(
                &auth,
                root.ca_id,
                FIXED_PROFILE_ENDUSER.0,
                IssuanceRequest::new(SubjectInfo::new(SubjectDn::new("late"), "late")),
            )
            .unwrap_err();
        assert!(matches!(err, PkiError::IllegalCaStatus(_)));
    }

    #[test]
    fn test_external_ca_request_response_flow() {
        let mut admin = admin();
        let auth = super_admin();

        let pending_config = CaCreateConfig::new(
            "ext-signed",
            SubjectDn::new("Externally Signed CA").with_organization("Tianshu PKI"),
            "baz789",
        )
        .with_signed_by(SignedBy::ExternalCa);
        let pending = admin.create_ca(&auth, pending_config).unwrap();
        assert_eq!(pending.status, CaStatus::WaitingForCertificateResponse);
        assert!(pending.chain.is_empty());

        // 等待期间拒绝签发
        let err = admin
            .issue_certificate(
                &auth,
                pending.ca_id,
                FIXED_PROFILE_ENDUSER.0,
                IssuanceRequest::new(SubjectInfo::new(SubjectDn::new("early"), "early")),
            )
            .unwrap_err();
        assert!(matches!(err, PkiError::IllegalCaStatus(_)));

        let spki = admin
            .make_certificate_request(&auth, pending.ca_id)
            .unwrap();

        // 模拟外部CA签发
        let factory = CertificateFactory::new();
        let ext_token = CaToken::generate("extroot", KeyAlgorithm::Ed25519).unwrap();
        let ext_request = IssuanceRequest::new(SubjectInfo::new(
            SubjectDn::new("External Root").with_organization("Other PKI"),
            "external",
        ));
        let ext_root = factory
            .issue_self_signed(&ext_request, &CertificateProfile::root_ca(), &ext_token)
            .unwrap();
        let ext_handle = issuer_handle(&ext_root, &ext_token).unwrap();
        let issuer = IssuingCa {
            certificate: &ext_handle,
            data: &ext_root,
            token: &ext_token,
            default_cdp: None,
        };
        let signed = factory
            .issue(
                &IssuanceRequest::new(SubjectInfo::new(
                    SubjectDn::new("Externally Signed CA").with_organization("Tianshu PKI"),
                    "ext-signed",
                ))
                .with_public_key(spki),
                &CertificateProfile::sub_ca(),
                &issuer,
            )
            .unwrap();

        let info = admin
            .receive_response(&auth, pending.ca_id, vec![ext_root.clone(), signed])
            .unwrap();
        assert_eq!(info.status, CaStatus::Active);
        assert_eq!(info.chain.len(), 2);
        assert!(admin
            .get_last_crl_info(info.ca_id, false)
            .unwrap()
            .is_some());
    }

    #[test]
    fn test_receive_response_subject_mismatch_rejected() {
        let mut admin = admin();
        let auth = super_admin();
        let pending = admin
            .create_ca(
                &auth,
                CaCreateConfig::new("mismatch", SubjectDn::new("Pending CA"), "pw")
                    .with_signed_by(SignedBy::ExternalCa),
            )
            .unwrap();

        // 签给别的主体的链
        let factory = CertificateFactory::new();
        let ext_token = CaToken::generate("pw2", KeyAlgorithm::Ed25519).unwrap();
        let other = factory
            .issue_self_signed(
                &IssuanceRequest::new(SubjectInfo::new(SubjectDn::new("Somebody Else"), "x")),
                &CertificateProfile::root_ca(),
                &ext_token,
            )
            .unwrap();
        let err = admin
            .receive_response(&auth, pending.ca_id, vec![other])
            .unwrap_err();
        assert!(matches!(err, PkiError::BadRequest(_)));
        // 状态保持等待
        assert_eq!(
            admin.get_ca_info(pending.ca_id).unwrap().status,
            CaStatus::WaitingForCertificateResponse
        );
    }

    #[test]
    fn test_process_request_registers_external_ca() {
        let mut admin = admin();
        let auth = super_admin();
        let root = admin.create_ca(&auth, root_config("proc-root")).unwrap();

        let key = rcgen::KeyPair::generate_for(&rcgen::PKCS_ED25519).unwrap();
        let (info, cert) = admin
            .process_request(
                &auth,
                root.ca_id,
                "partner-ca",
                SubjectDn::new("Partner CA").with_organization("Partner"),
                &key.public_key_der(),
            )
            .unwrap();
        assert_eq!(info.status, CaStatus::External);
        assert_eq!(cert.issuer_dn, root.subject_dn);
        assert_eq!(admin.ca_id_by_name("partner-ca"), Some(info.ca_id));

        // 外部CA无本地令牌，不能签发
        let err = admin
            .issue_certificate(
                &auth,
                info.ca_id,
                FIXED_PROFILE_ENDUSER.0,
                IssuanceRequest::new(SubjectInfo::new(SubjectDn::new("x"), "x")),
            )
            .unwrap_err();
        assert!(matches!(err, PkiError::IllegalCaStatus(_)));
    }

    #[test]
    fn test_renew_replaces_ca_certificate() {
        let mut admin = admin();
        let auth = super_admin();
        let root = admin.create_ca(&auth, root_config("renew-root")).unwrap();
        let old_fingerprint = root.chain[0].fingerprint.clone();

        let renewed = admin.renew_ca(&auth, root.ca_id, false).unwrap();
        assert_ne!(renewed.chain[0].fingerprint, old_fingerprint);
        assert_eq!(renewed.subject_dn, root.subject_dn);

        // 换钥续期后仍可签发
        let rekeyed = admin.renew_ca(&auth, root.ca_id, true).unwrap();
        assert_ne!(rekeyed.chain[0].fingerprint, renewed.chain[0].fingerprint);
        let key = rcgen::KeyPair::generate_for(&rcgen::PKCS_ED25519).unwrap();
        let request = IssuanceRequest::new(SubjectInfo::new(SubjectDn::new("post"), "post"))
            .with_public_key(key.public_key_der());
        admin
            .issue_certificate(&auth, root.ca_id, FIXED_PROFILE_ENDUSER.0, request)
            .unwrap();
    }

    #[test]
    fn test_renew_offline_token_fails_without_state_change() {
        let mut admin = admin();
        let auth = super_admin();
        let root = admin.create_ca(&auth, root_config("renew-off")).unwrap();
        admin.deactivate_ca_token(&auth, root.ca_id).unwrap();

        let err = admin.renew_ca(&auth, root.ca_id, true).unwrap_err();
        assert!(matches!(err, PkiError::IllegalCaStatus(_)));
        // 证书链未被改动
        let chain = admin.get_certificate_chain(root.ca_id).unwrap();
        assert_eq!(chain[0].fingerprint, root.chain[0].fingerprint);
    }

    #[test]
    fn test_rename_and_remove() {
        let mut admin = admin();
        let auth = super_admin();
        let root = admin.create_ca(&auth, root_config("old-name")).unwrap();

        admin.rename_ca(&auth, "old-name", "new-name").unwrap();
        assert_eq!(admin.ca_id_by_name("old-name"), None);
        assert_eq!(admin.ca_id_by_name("new-name"), Some(root.ca_id));

        admin.remove_ca(&auth, root.ca_id).unwrap();
        assert!(matches!(
            admin.get_ca_info(root.ca_id),
            Err(PkiError::CaDoesNotExist(_))
        ));
        // 证书状态记录保留
        assert!(admin
            .store()
            .find_by_fingerprint(&root.chain[0].fingerprint)
            .unwrap()
            .is_some());
    }

    #[test]
    fn test_ocsp_signer_minted_on_activation() {
        let mut admin = admin();
        let auth = super_admin();
        let config = root_config("ocsp-root").with_ocsp_signer();
        let info = admin.create_ca(&auth, config).unwrap();
        assert!(info.ocsp_signer_enabled);

        let signers = admin
            .store()
            .find_by_subject("CN=ocsp-root Root OCSP Signer")
            .unwrap();
        assert_eq!(signers.len(), 1);
    }
}
