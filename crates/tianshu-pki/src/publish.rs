//! 发布器接口
//!
//! 证书与CRL镜像到外部系统（LDAP、OCSP响应器等）。发布失败由调用方
//! 决定语义：暂停恢复时的重新发布是尽力而为，失败只记录不回滚。

use std::collections::HashMap;

use tracing::{info, warn};

use crate::error::Result;
use crate::types::RevocationReason;

/// 发布目标接口
pub trait PublisherSink: Send + Sync {
    /// 发布证书，返回是否成功
    fn publish_certificate(&self, cert_der: &[u8], subject_dn: &str, username: &str) -> bool;

    /// 通知撤销
    fn revoke_certificate(&self, cert_der: &[u8], subject_dn: &str, reason: RevocationReason);

    /// 发布CRL
    fn publish_crl(&self, crl_der: &[u8], issuer_dn: &str) -> bool;
}

/// 按ID注册的发布器集合
#[derive(Default)]
pub struct PublisherRegistry {
    sinks: HashMap<i32, Box<dyn PublisherSink>>,
}

impl PublisherRegistry {
    pub fn new() -> Self {
        Self { sinks: HashMap::new() }
    }

    /// 注册发布器
    pub fn register(&mut self, id: i32, sink: Box<dyn PublisherSink>) {
        self.sinks.insert(id, sink);
    }

    /// 向指定目标发布证书（尽力而为）
    ///
    /// 返回是否全部成功；失败的目标记录警告。
    pub fn publish_certificate(
        &self,
        targets: &[i32],
        cert_der: &[u8],
        subject_dn: &str,
        username: &str,
    ) -> Result<bool> {
        let mut all_ok = true;
        for id in targets {
            match self.sinks.get(id) {
                Some(sink) => {
                    if sink.publish_certificate(cert_der, subject_dn, username) {
                        info!(publisher = id, subject_dn, "certificate published");
                    } else {
                        warn!(publisher = id, subject_dn, "certificate publish failed");
                        all_ok = false;
                    }
                }
                None => {
                    warn!(publisher = id, "unknown publisher id, skipping");
                    all_ok = false;
                }
            }
        }
        Ok(all_ok)
    }

    /// 向指定目标通知撤销
    pub fn revoke_certificate(
        &self,
        targets: &[i32],
        cert_der: &[u8],
        subject_dn: &str,
        reason: RevocationReason,
    ) {
        for id in targets {
            if let Some(sink) = self.sinks.get(id) {
                sink.revoke_certificate(cert_der, subject_dn, reason);
            }
        }
    }

    /// 向指定目标发布CRL
    pub fn publish_crl(&self, targets: &[i32], crl_der: &[u8], issuer_dn: &str) {
        for id in targets {
            if let Some(sink) = self.sinks.get(id) {
                if !sink.publish_crl(crl_der, issuer_dn) {
                    warn!(publisher = id, issuer_dn, "CRL publish failed");
                }
            }
        }
    }
}
