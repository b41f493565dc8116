//! Tianshu PKI - CA生命周期管理核心
//!
//! 提供CA生命周期状态机、X.509证书与CRL签发、证书链排序与路径
//! 校验、证书状态存储以及CMP适配层。
//!
//! ## 模块
//!
//! - `ca` - CA记录与生命周期编排
//! - `cert` - 证书签发、解析与签名验证
//! - `crl` - 全量/增量CRL生成
//! - `chain` - 证书链排序与路径校验
//! - `store` - 证书状态、profile与请求历史存储
//! - `cmp` - CMP请求/响应适配
//! - `token` - CA密钥令牌
//! - `profile` - 证书配置文件
//! - `publish` - 证书/CRL发布接口

pub mod auth;
pub mod ca;
pub mod cache;
pub mod cert;
pub mod chain;
pub mod cmp;
pub mod crl;
pub mod dn;
pub mod error;
pub mod profile;
pub mod publish;
pub mod serial;
pub mod store;
pub mod token;
pub mod types;

// 重新导出常用类型
pub use auth::{AuthContext, Role};
pub use ca::{CaAdmin, CaCreateConfig, CaInfo};
pub use cert::{CertificateData, CertificateFactory, IssuanceRequest, SubjectInfo};
pub use chain::{build_validated_path, order_chain};
pub use crl::{CrlInfo, CrlPolicy};
pub use dn::SubjectDn;
pub use error::{PkiError, Result};
pub use profile::CertificateProfile;
pub use store::{CertificateStore, RevocationOutcome};
pub use token::{CaToken, KeyAlgorithm};
pub use types::{CaStatus, CertificateStatus, RevocationReason, SignedBy};

/// 预导入模块，包含最常用的类型
pub mod prelude {
    pub use crate::{
        auth::{AuthContext, Role},
        ca::{CaAdmin, CaCreateConfig, CaInfo},
        cert::{CertificateData, IssuanceRequest, SubjectInfo},
        crl::{CrlInfo, CrlPolicy},
        dn::SubjectDn,
        error::{PkiError, Result},
        profile::CertificateProfile,
        types::{CaStatus, CertificateStatus, RevocationReason, SignedBy},
    };
}
