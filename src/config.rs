use serde::{Deserialize, Serialize};

use crate::constants::{DEFAULT_TERM_ID, DEFAULT_VERSION, FUIOU_API_HOST, FUIOU_API_SANDBOX_HOST};
use crate::error::Result;

/// 富友支付配置，构造后不再修改
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    pub ins_cd: String,           // 机构号
    pub mchnt_cd: String,         // 商户号
    pub private_key: String,      // 商户私钥，PKCS8 DER 的 base64，不带 PEM 头
    pub fuiou_public_key: String, // 富友公钥
    #[serde(default)]
    pub term_id: Option<String>, // 终端号，默认 88888888
    #[serde(default)]
    pub version: Option<String>, // 协议版本，默认 1.0
    #[serde(default)]
    pub notify_url: Option<String>,
    #[serde(default)]
    pub wechat_app_id: Option<String>, // 微信支付时绑定的公众号
    #[serde(default)]
    pub sandbox: bool,
}

impl Config {
    pub fn new(ins_cd: &str, mchnt_cd: &str, private_key: &str, fuiou_public_key: &str) -> Self {
        Config {
            ins_cd: ins_cd.to_string(),
            mchnt_cd: mchnt_cd.to_string(),
            private_key: private_key.to_string(),
            fuiou_public_key: fuiou_public_key.to_string(),
            ..Default::default()
        }
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn term_id(mut self, term_id: &str) -> Self {
        self.term_id = Some(term_id.to_string());
        self
    }

    pub fn version(mut self, version: &str) -> Self {
        self.version = Some(version.to_string());
        self
    }

    pub fn notify_url(mut self, notify_url: &str) -> Self {
        self.notify_url = Some(notify_url.to_string());
        self
    }

    pub fn wechat_app_id(mut self, app_id: &str) -> Self {
        self.wechat_app_id = Some(app_id.to_string());
        self
    }

    pub fn sandbox(mut self, sandbox: bool) -> Self {
        self.sandbox = sandbox;
        self
    }

    pub(crate) fn effective_version(&self) -> &str {
        match self.version.as_deref() {
            Some(v) if !v.is_empty() => v,
            _ => DEFAULT_VERSION,
        }
    }

    pub(crate) fn effective_term_id(&self) -> &str {
        match self.term_id.as_deref() {
            Some(v) if !v.is_empty() => v,
            _ => DEFAULT_TERM_ID,
        }
    }

    // TODO: 容灾切换备用网关
    pub fn api_base_url(&self) -> &'static str {
        if self.sandbox {
            FUIOU_API_SANDBOX_HOST
        } else {
            FUIOU_API_HOST
        }
    }
}

#[cfg(test)]
mod test {
    use super::Config;

    #[test]
    fn test_defaults() {
        let config = Config::new("08A9999999", "0002900F0370542", "key", "pub");
        assert_eq!(config.effective_version(), "1.0");
        assert_eq!(config.effective_term_id(), "88888888");

        let config = config.term_id("263575187").version("1.1").term_id("");
        assert_eq!(config.effective_version(), "1.1");
        assert_eq!(config.effective_term_id(), "88888888");
    }

    #[test]
    fn test_from_json() {
        let config = Config::from_json(
            r#"{"ins_cd":"08A9999999","mchnt_cd":"0002900F0370542",
                "private_key":"abc","fuiou_public_key":"def","sandbox":true}"#,
        )
        .unwrap();
        assert_eq!(config.mchnt_cd, "0002900F0370542");
        assert!(config.sandbox);
        assert!(config.term_id.is_none());
        assert_eq!(config.api_base_url(), "https://fundwx.fuiou.com");
    }
}
