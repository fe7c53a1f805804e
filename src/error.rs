use thiserror::Error;

#[derive(Error, Debug)]
pub enum FuiouError {
    /// 接口名不存在
    #[error("unknown operation: {0}")]
    UnknownOperation(String),

    /// 密钥格式错误
    #[error("key format error: {0}")]
    KeyFormat(String),

    #[error("signature computation failed: {0}")]
    SignatureComputation(String),

    /// 返回报文没有 sign 字段
    #[error("response carries no sign field")]
    MissingSignature,

    #[error("response signature verification failed")]
    SignatureInvalid,

    /// HTTP 请求错误
    #[error("transport error: {0}")]
    Transport(String),

    /// GBK 转换错误
    #[error("encoding error: {0}")]
    Encoding(String),

    #[error("malformed xml: {0}")]
    Xml(String),

    /// 没有规范文本形式的值
    #[error("field {0} holds a value that cannot be signed")]
    UnsupportedValue(String),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<reqwest::Error> for FuiouError {
    fn from(e: reqwest::Error) -> Self {
        FuiouError::Transport(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, FuiouError>;
