use thiserror::Error;

/// PKI核心的错误类型
///
/// 闭合的错误分类：调用方（GUI/CLI/CMP适配层）通过模式匹配处理，
/// 不暴露底层实现的异常类型。
#[derive(Error, Debug)]
pub enum PkiError {
    /// 调用者权限不足（总是先记录日志再返回）
    #[error("Authorization denied for '{admin}': {operation}")]
    AuthorizationDenied { admin: String, operation: String },

    /// CA令牌离线，签名/加密密钥不可用（可恢复：激活后重试）
    #[error("CA token is offline: {0}")]
    CaTokenOffline(String),

    /// 令牌激活失败（激活码错误）
    #[error("CA token authentication failed: {0}")]
    TokenAuthFailed(String),

    /// CA已存在（按ID或名称冲突）
    #[error("CA already exists: {0}")]
    CaAlreadyExists(String),

    /// CA不存在
    #[error("CA does not exist: {0}")]
    CaDoesNotExist(String),

    /// CA状态不允许该操作
    #[error("Illegal CA status for operation: {0}")]
    IllegalCaStatus(String),

    /// 证书集合中没有自签名根证书
    #[error("No self-signed root certificate found in the supplied set")]
    NoRootFound,

    /// 证书链不完整（无法从根走到叶）
    #[error("Broken certificate chain: {0}")]
    BrokenChain(String),

    /// 证书链路径验证失败（排序成功但验证不通过）
    #[error("Path validation error: {0}")]
    PathValidation(String),

    /// 存储层约束冲突（如唯一索引）或写入失败
    #[error("Duplicate or write error: {0}")]
    DuplicateOrWrite(String),

    /// 证书未找到
    #[error("Certificate not found: {0}")]
    CertificateNotFound(String),

    /// 证书配置文件（profile）错误
    #[error("Certificate profile error: {0}")]
    ProfileError(String),

    /// 签名生成或自校验失败
    #[error("Signature error: {0}")]
    SignatureError(String),

    /// 解析错误（DER/PEM/DN）
    #[error("Parse error: {0}")]
    ParseError(String),

    /// 请求本身非法（CMP适配层映射为 BadRequest）
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// 内部错误：包装未预期的底层失败，包装前已记录完整原因链
    #[error("Internal error: {0}")]
    Internal(String),

    /// IO错误
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// 序列化错误
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

/// Result类型别名
pub type Result<T> = std::result::Result<T, PkiError>;

impl PkiError {
    /// 包装未预期的底层错误为内部错误，并记录原因链
    ///
    /// 权限、令牌离线、链验证等已分类错误原样透传，不做二次包装。
    pub fn wrap_internal<E: std::fmt::Display>(context: &str, err: E) -> Self {
        tracing::error!("{context}: {err}");
        PkiError::Internal(format!("{context}: {err}"))
    }
}
