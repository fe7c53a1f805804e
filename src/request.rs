use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use log::debug;
use rand::{distributions::Alphanumeric, Rng};

use crate::config::Config;
use crate::constants::{LEGACY_TEXT_FIELDS, NONCE_LEN, RESERVED_PREFIX, SIGN_FIELD};
use crate::encoding::{to_legacy, url_encode};
use crate::error::{FuiouError, Result};
pub use crate::sign::ParamValue;
use crate::sign::{self, CanonicalValue, SignType};

/// 富友接口
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Pay,
    OrderQuery,
    HisOrderQuery,
    Refund,
    RefundQuery,
    QrCode,
    JsApi,
    OpenId,
}

impl Operation {
    pub const ALL: [Operation; 8] = [
        Operation::Pay,
        Operation::OrderQuery,
        Operation::HisOrderQuery,
        Operation::Refund,
        Operation::RefundQuery,
        Operation::QrCode,
        Operation::JsApi,
        Operation::OpenId,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Operation::Pay => "pay.pay",
            Operation::OrderQuery => "pay.orderquery",
            Operation::HisOrderQuery => "pay.hisorderquery",
            Operation::Refund => "pay.refund",
            Operation::RefundQuery => "pay.refundquery",
            Operation::QrCode => "pay.qrcode",
            Operation::JsApi => "pay.jsapi",
            Operation::OpenId => "pay.openid",
        }
    }

    pub fn path(self) -> &'static str {
        match self {
            Operation::Pay => "/micropay",             // 付款码支付
            Operation::OrderQuery => "/commonQuery",   // 付款码支付查询
            Operation::HisOrderQuery => "/hisTradeQuery",
            Operation::Refund => "/commonRefund",      // 退款
            Operation::RefundQuery => "/refundQuery",  // 退款查询
            Operation::QrCode => "/preCreate",         // 生成二维码
            Operation::JsApi => "/wxPreCreate",        // 公众号/服务窗下单
            Operation::OpenId => "/auth2Openid",       // 第三方用户标识查询
        }
    }
}

impl FromStr for Operation {
    type Err = FuiouError;

    fn from_str(s: &str) -> Result<Self> {
        Operation::ALL
            .iter()
            .copied()
            .find(|op| op.name() == s)
            .ok_or_else(|| FuiouError::UnknownOperation(s.to_string()))
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// 一次调用的接口名和业务参数
#[derive(Debug, Clone)]
pub struct Request {
    pub api_name: String,
    pub biz_content: BTreeMap<String, ParamValue>,
}

impl Request {
    pub fn new(api_name: &str) -> Self {
        Request {
            api_name: api_name.to_string(),
            biz_content: BTreeMap::new(),
        }
    }

    pub fn param(mut self, key: &str, value: impl Into<ParamValue>) -> Self {
        self.set(key, value);
        self
    }

    pub fn set(&mut self, key: &str, value: impl Into<ParamValue>) {
        self.biz_content.insert(key.to_string(), value.into());
    }
}

/// 签好名、编码好，可以直接 POST 的请求
#[derive(Debug, Clone)]
pub struct WireRequest {
    pub operation: Operation,
    pub url: String,
    pub params: BTreeMap<String, ParamValue>,
    pub xml: Vec<u8>,
    /// `req=<两次 URL 编码的 XML>`
    pub body: String,
}

fn rand_string(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(Alphanumeric)
        .take(len)
        .map(char::from)
        .collect::<String>()
}

/// 交易起始时间，格式 yyyyMMddHHmmss
pub fn txn_begin_ts() -> String {
    chrono::Local::now().format("%Y%m%d%H%M%S").to_string()
}

pub fn build(request: &Request, config: &Config) -> Result<WireRequest> {
    let operation: Operation = request.api_name.parse()?;
    let url = format!("{}{}", config.api_base_url(), operation.path());

    let mut params: BTreeMap<String, ParamValue> = BTreeMap::new();
    params.insert("version".into(), config.effective_version().into());
    params.insert("ins_cd".into(), config.ins_cd.as_str().into());
    params.insert("mchnt_cd".into(), config.mchnt_cd.as_str().into());
    params.insert("random_str".into(), rand_string(NONCE_LEN).into());
    if operation != Operation::OpenId {
        params.insert("term_id".into(), config.effective_term_id().into());
    }

    let mut reserved = Vec::new();
    for (k, v) in &request.biz_content {
        if k.starts_with(RESERVED_PREFIX) {
            reserved.push((k.clone(), v.clone()));
            continue;
        }
        let v = if LEGACY_TEXT_FIELDS.contains(&k.as_str()) {
            legacy_value(v)?
        } else {
            v.clone()
        };
        params.insert(k.clone(), v);
    }

    let signature = sign::sign(&params, &config.private_key, SignType::Md5)?;
    params.insert(SIGN_FIELD.to_string(), ParamValue::Text(signature));
    // reserved 字段不参与签名，签名后再放回
    params.extend(reserved);

    let xml = to_xml(&params)?;
    let body = format!("req={}", url_encode(url_encode(&xml).as_bytes()));
    debug!("fuiou {} params:{:?}", operation, params.keys().collect::<Vec<_>>());

    Ok(WireRequest {
        operation,
        url,
        params,
        xml,
        body,
    })
}

fn legacy_value(v: &ParamValue) -> Result<ParamValue> {
    match v {
        ParamValue::Text(s) => Ok(ParamValue::Encoded(to_legacy(s)?)),
        other => Ok(other.clone()),
    }
}

/// 整个 XML 文档都是 GBK 编码
pub fn to_xml(params: &BTreeMap<String, ParamValue>) -> Result<Vec<u8>> {
    let mut xml = br#"<?xml version="1.0" encoding="GBK" standalone="yes"?><xml>"#.to_vec();
    for (k, v) in params {
        let text: Cow<[u8]> = match v {
            ParamValue::Text(s) => Cow::Owned(to_legacy(s)?),
            other => other.canonical_bytes(k)?,
        };
        xml.push(b'<');
        xml.extend_from_slice(k.as_bytes());
        xml.push(b'>');
        escape_into(&mut xml, &text);
        xml.extend_from_slice(b"</");
        xml.extend_from_slice(k.as_bytes());
        xml.push(b'>');
    }
    xml.extend_from_slice(b"</xml>");
    Ok(xml)
}

// GBK 双字节的尾字节 >= 0x40，不会和这些 ASCII 符号冲突
fn escape_into(out: &mut Vec<u8>, text: &[u8]) {
    for &b in text {
        match b {
            b'&' => out.extend_from_slice(b"&amp;"),
            b'<' => out.extend_from_slice(b"&lt;"),
            b'>' => out.extend_from_slice(b"&gt;"),
            b'"' => out.extend_from_slice(b"&quot;"),
            b'\'' => out.extend_from_slice(b"&apos;"),
            _ => out.push(b),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::encoding::{from_legacy, url_decode};
    use crate::sign::{canonicalize, testkeys, verify_bytes};

    fn config() -> Config {
        let (private_key, _) = testkeys::merchant();
        Config::new("08A9999999", "0002900F0370542", private_key, "")
    }

    fn pay_request() -> Request {
        Request::new("pay.pay")
            .param("order_type", "ALIPAY")
            .param("goods_des", "测试商品")
            .param("mchnt_order_no", "513457061273811818896")
            .param("order_amt", "1")
            .param("term_ip", "127.0.0.1")
            .param("txn_begin_ts", txn_begin_ts())
            .param("auth_code", "289200593914815731")
            .param("reserved_terminal_info", r#"{"serial_num":"12345678901SN012"}"#)
            .param("goods_detail", "")
            .param("addn_inf", "")
    }

    #[test]
    fn test_operation_catalog() {
        for op in Operation::ALL {
            assert_eq!(op.name().parse::<Operation>().unwrap(), op);
        }
        assert_eq!(Operation::QrCode.path(), "/preCreate");
        match "pay.close".parse::<Operation>() {
            Err(FuiouError::UnknownOperation(name)) => assert_eq!(name, "pay.close"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_unknown_operation_aborts_build() {
        let err = build(&Request::new("pay.unknown"), &config()).unwrap_err();
        assert!(matches!(err, FuiouError::UnknownOperation(_)));
    }

    #[test]
    fn test_base_params() {
        let wire = build(&pay_request(), &config()).unwrap();
        assert_eq!(wire.url, "https://fundwx.fuiou.com/micropay");
        assert_eq!(wire.params["version"], ParamValue::from("1.0"));
        assert_eq!(wire.params["term_id"], ParamValue::from("88888888"));
        assert_eq!(wire.params["ins_cd"], ParamValue::from("08A9999999"));

        let nonce = match &wire.params["random_str"] {
            ParamValue::Text(s) => s.clone(),
            other => panic!("unexpected {:?}", other),
        };
        assert_eq!(nonce.len(), 32);
        assert!(nonce.chars().all(|c| c.is_ascii_alphanumeric()));

        let again = build(&pay_request(), &config()).unwrap();
        assert_ne!(again.params["random_str"], wire.params["random_str"]);
    }

    #[test]
    fn test_config_overrides_and_openid() {
        let config = config().term_id("263575187").version("1.1");
        let wire = build(&pay_request(), &config).unwrap();
        assert_eq!(wire.params["term_id"], ParamValue::from("263575187"));
        assert_eq!(wire.params["version"], ParamValue::from("1.1"));

        let openid = Request::new("pay.openid")
            .param("auth_code", "133149051993393767")
            .param("order_type", "WECHAT");
        let wire = build(&openid, &config).unwrap();
        assert!(!wire.params.contains_key("term_id"));
        assert_eq!(wire.url, "https://fundwx.fuiou.com/auth2Openid");
    }

    #[test]
    fn test_legacy_fields_are_transcoded() {
        let wire = build(&pay_request(), &config()).unwrap();
        assert_eq!(
            wire.params["goods_des"],
            ParamValue::Encoded(to_legacy("测试商品").unwrap())
        );
        assert_eq!(wire.params["order_type"], ParamValue::from("ALIPAY"));
    }

    #[test]
    fn test_reserved_fields_signed_out_sent_in() {
        let (_, public_key) = testkeys::merchant();
        let wire = build(&pay_request(), &config()).unwrap();
        assert!(wire.params.contains_key("reserved_terminal_info"));

        let data = canonicalize(&wire.params).unwrap();
        assert!(!data.windows(8).any(|w| w == b"reserved"));

        let signature = match &wire.params["sign"] {
            ParamValue::Text(s) => s.clone(),
            other => panic!("unexpected {:?}", other),
        };
        assert!(verify_bytes(&data, &signature, public_key, SignType::Md5).unwrap());
    }

    #[test]
    fn test_form_body() {
        let wire = build(&pay_request(), &config()).unwrap();
        let encoded = wire.body.strip_prefix("req=").unwrap();
        let xml = url_decode(&url_decode(encoded.as_bytes()));
        assert_eq!(xml, wire.xml);

        let text = from_legacy(&xml).unwrap();
        assert!(text.starts_with(r#"<?xml version="1.0" encoding="GBK" standalone="yes"?><xml>"#));
        assert!(text.contains("<goods_des>测试商品</goods_des>"));
        assert!(text.contains(
            "<reserved_terminal_info>{&quot;serial_num&quot;:&quot;12345678901SN012&quot;}</reserved_terminal_info>"
        ));
        assert!(text.contains("<sign>"));
        assert!(text.ends_with("</xml>"));
    }

    #[test]
    fn test_numeric_params_in_xml() {
        let mut params = BTreeMap::new();
        params.insert("order_amt".to_string(), ParamValue::Int(100));
        params.insert("rate".to_string(), ParamValue::Float(0.5));
        let text = from_legacy(&to_xml(&params).unwrap()).unwrap();
        assert!(text.contains("<order_amt>100</order_amt><rate>5E-01</rate>"));
    }
}
