// 全局常量
pub const FUIOU_API_HOST: &str = "https://fundwx.fuiou.com";
pub const FUIOU_API_SANDBOX_HOST: &str = "https://fundwx.fuiou.com";

pub const CHANNEL: &str = "fuiou";
pub const DEFAULT_VERSION: &str = "1.0";
pub const DEFAULT_TERM_ID: &str = "88888888";
pub const NONCE_LEN: usize = 32;

/// 不参与签名、签名后再放回报文的字段前缀
pub const RESERVED_PREFIX: &str = "reserved";
pub const SIGN_FIELD: &str = "sign";

/// 需要转成 GBK 的自由文本字段
pub const LEGACY_TEXT_FIELDS: [&str; 4] = ["goods_des", "goods_detail", "goods_tag", "addn_inf"];
