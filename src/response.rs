use std::fmt;

use log::{debug, info};
use quick_xml::{events::Event, Reader};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::constants::{CHANNEL, SIGN_FIELD};
use crate::encoding::{from_legacy, normalize_xml_declaration, url_decode};
use crate::error::{FuiouError, Result};
use crate::request::Operation;
use crate::sign::{self, SignType};

/// 归一化后的交易状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradeStatus {
    Success,    // 订单支付成功
    Closed,     // 订单关闭
    UserPaying, // 订单支付中
    Waiting,    // 系统执行中请等待
}

impl TradeStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TradeStatus::Success => "SUCCESS",
            TradeStatus::Closed => "CLOSED",
            TradeStatus::UserPaying => "USERPAYING",
            TradeStatus::Waiting => "WAITING",
        }
    }
}

impl fmt::Display for TradeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ReturnCode {
    Success,
    Fail,
}

/// 归一化结果，`content` 保留原始报文
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TradeResult {
    pub channel: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub return_code: Option<ReturnCode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub return_msg: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<TradeStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trade_no: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub out_trade_no: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bank_trade_no: Option<String>, // 富友订单号
    #[serde(skip_serializing_if = "Option::is_none")]
    pub out_refund_no: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_fee: Option<i64>, // 分
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refund_fee: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub buyer_pay_fee: Option<i64>, // 用户实际扣减金额
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_end: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wechat_open_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wechat_sub_open_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alipay_open_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alipay_user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alipay_logon_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub qr_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prepay_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wechat_package: Option<String>, // 微信 JSAPI 调起支付参数
    pub content: Map<String, Value>,
}

/// 解码后的返回报文
#[derive(Debug, Clone)]
pub struct Response {
    pub api_name: String,
    content: Map<String, Value>,
}

impl Response {
    pub fn new(api_name: &str, content: Map<String, Value>) -> Self {
        Response {
            api_name: api_name.to_string(),
            content,
        }
    }

    pub fn content(&self) -> &Map<String, Value> {
        &self.content
    }

    pub fn into_content(self) -> Map<String, Value> {
        self.content
    }

    pub fn content_json(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.content)?)
    }

    pub fn sign(&self) -> Option<&str> {
        self.content.get(SIGN_FIELD).and_then(Value::as_str)
    }

    /// 验签并归一化
    pub fn verify(&self, fuiou_public_key: &str) -> Result<TradeResult> {
        verify_and_extract(&self.content, &self.api_name, fuiou_public_key)
    }
}

/// URL 解码一次 -> GBK 转 UTF-8 -> 修正 XML 声明 -> 解析，去掉外层 `<xml>`
pub fn receive(raw: &[u8]) -> Result<Map<String, Value>> {
    let decoded = url_decode(raw);
    let text = from_legacy(&decoded)?;
    let text = normalize_xml_declaration(&text);
    let mut tree = parse_xml(&text)?;
    let content = match tree.remove("xml") {
        Some(Value::Object(m)) => m,
        Some(Value::String(s)) if s.is_empty() => Map::new(),
        Some(other) => {
            return Err(FuiouError::Xml(format!("unexpected xml root: {}", other)));
        }
        None => tree,
    };
    info!("Fuiou[PostForm]res {}", Value::Object(content.clone()));
    Ok(content)
}

/// XML 解析成树：叶子是字符串，重复的元素合并成数组，属性忽略
pub fn parse_xml(text: &str) -> Result<Map<String, Value>> {
    let mut reader = Reader::from_str(text);
    reader.trim_text(true);

    // (元素名, 子元素, 文本)
    let mut stack: Vec<(String, Map<String, Value>, String)> =
        vec![(String::new(), Map::new(), String::new())];
    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                stack.push((element_name(e.name().as_ref())?, Map::new(), String::new()));
            }
            Ok(Event::Empty(e)) => {
                let key = element_name(e.name().as_ref())?;
                if let Some(top) = stack.last_mut() {
                    insert_child(&mut top.1, key, Value::String(String::new()));
                }
            }
            Ok(Event::Text(e)) => {
                let text = e.unescape().map_err(|e| FuiouError::Xml(e.to_string()))?;
                if let Some(top) = stack.last_mut() {
                    top.2.push_str(&text);
                }
            }
            Ok(Event::CData(e)) => {
                let inner = e.into_inner();
                let text = std::str::from_utf8(&inner).map_err(|e| FuiouError::Xml(e.to_string()))?;
                if let Some(top) = stack.last_mut() {
                    top.2.push_str(text);
                }
            }
            Ok(Event::End(_)) => {
                if stack.len() < 2 {
                    return Err(FuiouError::Xml("unbalanced end tag".to_string()));
                }
                if let Some((key, children, text)) = stack.pop() {
                    let value = if children.is_empty() {
                        Value::String(text)
                    } else {
                        Value::Object(children)
                    };
                    if let Some(parent) = stack.last_mut() {
                        insert_child(&mut parent.1, key, value);
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(FuiouError::Xml(e.to_string())),
            _ => {}
        }
    }

    if stack.len() != 1 {
        return Err(FuiouError::Xml("unclosed element".to_string()));
    }
    match stack.pop() {
        Some((_, root, _)) if !root.is_empty() => Ok(root),
        _ => Err(FuiouError::Xml("empty document".to_string())),
    }
}

fn element_name(raw: &[u8]) -> Result<String> {
    String::from_utf8(raw.to_vec()).map_err(|e| FuiouError::Xml(e.to_string()))
}

fn insert_child(map: &mut Map<String, Value>, key: String, value: Value) {
    match map.get_mut(&key) {
        Some(Value::Array(items)) => items.push(value),
        Some(existing) => {
            let first = existing.take();
            *existing = Value::Array(vec![first, value]);
        }
        None => {
            map.insert(key, value);
        }
    }
}

/// 验签后按接口名归一化。没有 sign 或验签不过都直接报错。
pub fn verify_and_extract(
    content: &Map<String, Value>,
    api_name: &str,
    fuiou_public_key: &str,
) -> Result<TradeResult> {
    let signature = match content.get(SIGN_FIELD) {
        Some(Value::String(s)) => s,
        Some(_) => return Err(FuiouError::SignatureInvalid),
        None => return Err(FuiouError::MissingSignature),
    };
    if !sign::verify(content, signature, fuiou_public_key, SignType::Md5)? {
        return Err(FuiouError::SignatureInvalid);
    }
    Ok(normalize(content.clone(), api_name))
}

/// 不认识的接口名只返回 channel 和 content
pub fn normalize(content: Map<String, Value>, api_name: &str) -> TradeResult {
    let normalizer = api_name.parse::<Operation>().ok().and_then(normalizer_for);
    let mut result = match normalizer {
        Some(n) => n.apply(&content),
        None => TradeResult::default(),
    };
    debug!("fuiou {} status:{:?}", api_name, result.status);
    result.channel = CHANNEL.to_string();
    result.content = content;
    result
}

/// 异步通知
pub fn normalize_notify(content: Map<String, Value>) -> TradeResult {
    let mut result = NOTIFY.apply(&content);
    result.channel = CHANNEL.to_string();
    result.content = content;
    result
}

type StatusTable = &'static [(&'static str, TradeStatus)];

// 失败时可重试的返回码，其余都按 CLOSED 处理
const PENDING_CODES: StatusTable = &[
    ("030010", TradeStatus::UserPaying),
    ("010002", TradeStatus::Waiting),
    ("9999", TradeStatus::Waiting),
    ("010001", TradeStatus::Waiting),
    ("2002", TradeStatus::Waiting),
    ("030003", TradeStatus::Waiting),
    ("030004", TradeStatus::Waiting),
    ("1013", TradeStatus::Waiting),
];

const REFUND_PENDING_CODES: StatusTable = &[
    ("030010", TradeStatus::UserPaying),
    ("010002", TradeStatus::Waiting),
    ("9999", TradeStatus::Waiting),
    ("010001", TradeStatus::Waiting),
    ("2002", TradeStatus::Waiting),
    ("030003", TradeStatus::Waiting),
    ("030004", TradeStatus::Waiting),
    ("1013", TradeStatus::Waiting),
    ("1011", TradeStatus::UserPaying),
];

// 支付、退款成功时 result_msg 的补充状态
const RESULT_MSG_STATUS: StatusTable = &[
    ("USERPAYING", TradeStatus::UserPaying),
    ("CLOSED", TradeStatus::Closed),
    ("REVOKED", TradeStatus::Closed),
    ("NOTPAY", TradeStatus::UserPaying),
];

const ORDER_TRANS_STAT: StatusTable = &[
    ("SUCCESS", TradeStatus::Success),
    ("REFUND", TradeStatus::Success),
    ("USERPAYING", TradeStatus::UserPaying),
    ("PAYERROR", TradeStatus::Closed),
    ("CLOSED", TradeStatus::Closed),
    ("REVOKED", TradeStatus::Closed),
    ("NOTPAY", TradeStatus::UserPaying),
];

const REFUND_TRANS_STAT: StatusTable = &[
    ("SUCCESS", TradeStatus::Success),
    ("USERPAYING", TradeStatus::UserPaying),
    ("PAYERROR", TradeStatus::Closed),
    ("CLOSED", TradeStatus::Closed),
    ("REVOKED", TradeStatus::Closed),
    ("NOTPAY", TradeStatus::UserPaying),
];

/// 每个接口只在这几个字段上不同
struct Normalizer {
    code_field: &'static str,
    msg_field: &'static str,
    success_code: &'static str,
    status_field: Option<&'static str>,
    status_table: StatusTable,
    /// 成功但状态字段缺失或不认识时的状态
    success_status: Option<TradeStatus>,
    /// 失败时的返回码表，None 表示失败不给状态
    pending_codes: Option<StatusTable>,
    extract: fn(&Map<String, Value>, &mut TradeResult),
}

impl Normalizer {
    fn apply(&self, content: &Map<String, Value>) -> TradeResult {
        let mut result = TradeResult {
            return_msg: text(content, self.msg_field),
            ..Default::default()
        };
        if text(content, self.code_field).as_deref() == Some(self.success_code) {
            result.return_code = Some(ReturnCode::Success);
            result.status = self
                .status_field
                .and_then(|field| text(content, field))
                .and_then(|value| lookup(self.status_table, &value))
                .or(self.success_status);
            (self.extract)(content, &mut result);
        } else {
            result.return_code = Some(ReturnCode::Fail);
            result.status = self.pending_codes.map(|codes| {
                text(content, self.code_field)
                    .and_then(|code| lookup(codes, &code))
                    .unwrap_or(TradeStatus::Closed)
            });
        }
        result
    }
}

fn lookup(table: StatusTable, key: &str) -> Option<TradeStatus> {
    table.iter().find(|(k, _)| *k == key).map(|(_, status)| *status)
}

const SYNC_SUCCESS: &str = "000000";

static PAY: Normalizer = Normalizer {
    code_field: "result_code",
    msg_field: "result_msg",
    success_code: SYNC_SUCCESS,
    status_field: Some("result_msg"),
    status_table: RESULT_MSG_STATUS,
    success_status: Some(TradeStatus::Success),
    pending_codes: Some(PENDING_CODES),
    extract: extract_pay,
};

static ORDER_QUERY: Normalizer = Normalizer {
    code_field: "result_code",
    msg_field: "result_msg",
    success_code: SYNC_SUCCESS,
    status_field: Some("trans_stat"),
    status_table: ORDER_TRANS_STAT,
    success_status: Some(TradeStatus::Waiting),
    pending_codes: Some(PENDING_CODES),
    extract: extract_order_query,
};

static REFUND: Normalizer = Normalizer {
    code_field: "result_code",
    msg_field: "result_msg",
    success_code: SYNC_SUCCESS,
    status_field: Some("result_msg"),
    status_table: RESULT_MSG_STATUS,
    success_status: Some(TradeStatus::Success),
    pending_codes: Some(REFUND_PENDING_CODES),
    extract: extract_refund,
};

static REFUND_QUERY: Normalizer = Normalizer {
    code_field: "result_code",
    msg_field: "result_msg",
    success_code: SYNC_SUCCESS,
    status_field: Some("trans_stat"),
    status_table: REFUND_TRANS_STAT,
    success_status: Some(TradeStatus::Waiting),
    pending_codes: Some(REFUND_PENDING_CODES),
    extract: extract_refund,
};

static QR_CODE: Normalizer = Normalizer {
    code_field: "result_code",
    msg_field: "result_msg",
    success_code: SYNC_SUCCESS,
    status_field: None,
    status_table: &[],
    success_status: Some(TradeStatus::UserPaying),
    pending_codes: Some(REFUND_PENDING_CODES),
    extract: extract_qr_code,
};

static JS_API: Normalizer = Normalizer {
    code_field: "result_code",
    msg_field: "result_msg",
    success_code: SYNC_SUCCESS,
    status_field: None,
    status_table: &[],
    success_status: Some(TradeStatus::UserPaying),
    pending_codes: Some(REFUND_PENDING_CODES),
    extract: extract_js_api,
};

static OPEN_ID: Normalizer = Normalizer {
    code_field: "result_code",
    msg_field: "result_msg",
    success_code: SYNC_SUCCESS,
    status_field: None,
    status_table: &[],
    success_status: None,
    pending_codes: None,
    extract: extract_open_id,
};

static NOTIFY: Normalizer = Normalizer {
    code_field: "return_code",
    msg_field: "return_msg",
    success_code: "0",
    status_field: None,
    status_table: &[],
    success_status: Some(TradeStatus::Success),
    pending_codes: None,
    extract: extract_notify,
};

fn normalizer_for(operation: Operation) -> Option<&'static Normalizer> {
    match operation {
        Operation::Pay => Some(&PAY),
        Operation::OrderQuery => Some(&ORDER_QUERY),
        Operation::Refund => Some(&REFUND),
        Operation::RefundQuery => Some(&REFUND_QUERY),
        Operation::QrCode => Some(&QR_CODE),
        Operation::JsApi => Some(&JS_API),
        Operation::OpenId => Some(&OPEN_ID),
        Operation::HisOrderQuery => None,
    }
}

/// 字段的文本值，数字也转成文本
fn text(content: &Map<String, Value>, key: &str) -> Option<String> {
    match content.get(key)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn non_empty(content: &Map<String, Value>, key: &str) -> Option<String> {
    text(content, key).filter(|v| !v.is_empty())
}

/// 金额，单位分
fn amount(content: &Map<String, Value>, key: &str) -> Option<i64> {
    match content.get(key)? {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn buyer_ids(content: &Map<String, Value>, result: &mut TradeResult) {
    match text(content, "order_type").as_deref() {
        Some("WECHAT") => result.wechat_open_id = text(content, "buyer_id"),
        Some("ALIPAY") => result.alipay_open_id = text(content, "buyer_id"),
        _ => {}
    }
}

fn extract_pay(content: &Map<String, Value>, result: &mut TradeResult) {
    result.total_fee = amount(content, "total_amount");
    result.bank_trade_no = text(content, "reserved_fy_order_no");
    result.trade_no = text(content, "transaction_id");
    result.out_trade_no = text(content, "reserved_mchnt_order_no");
    result.time_end = non_empty(content, "reserved_txn_fin_ts");
    buyer_ids(content, result);
}

fn extract_order_query(content: &Map<String, Value>, result: &mut TradeResult) {
    result.total_fee = amount(content, "order_amt");
    result.bank_trade_no = text(content, "reserved_fy_order_no");
    result.trade_no = text(content, "transaction_id");
    result.out_trade_no = text(content, "mchnt_order_no");
    result.time_end = non_empty(content, "reserved_txn_fin_ts");
    buyer_ids(content, result);
}

fn extract_refund(content: &Map<String, Value>, result: &mut TradeResult) {
    result.refund_fee = amount(content, "reserved_refund_amt");
    result.out_trade_no = text(content, "mchnt_order_no");
    result.out_refund_no = text(content, "refund_order_no");
    result.time_end = non_empty(content, "reserved_fy_settle_dt");
}

fn extract_qr_code(content: &Map<String, Value>, result: &mut TradeResult) {
    result.qr_code = text(content, "qr_code");
}

fn extract_js_api(content: &Map<String, Value>, result: &mut TradeResult) {
    result.time_end = text(content, "pay_time");
    if content.contains_key("sdk_appid") {
        let field = |key: &str| content.get(key).cloned().unwrap_or(Value::Null);
        let package = json!({
            "appId": field("sdk_appid"),
            "nonceStr": field("sdk_noncestr"),
            "package": field("sdk_package"),
            "paySign": field("sdk_paysign"),
            "signType": field("sdk_signtype"),
            "timeStamp": field("sdk_timestamp"),
        });
        result.wechat_package = Some(package.to_string());
    }
    result.prepay_id = text(content, "session_id");
}

fn extract_open_id(content: &Map<String, Value>, result: &mut TradeResult) {
    result.wechat_open_id = text(content, "openid");
    result.wechat_sub_open_id = text(content, "sub_openid");
    result.alipay_user_id = non_empty(content, "userId");
}

fn extract_notify(content: &Map<String, Value>, result: &mut TradeResult) {
    if let Some(total) = amount(content, "total_amt") {
        result.total_fee = Some(total);
        result.buyer_pay_fee = Some(amount(content, "payment_amt").unwrap_or(total));
    }
    result.bank_trade_no = text(content, "order_id"); // 银行订单
    result.trade_no = Some(String::new());
    result.out_trade_no = text(content, "out_trade_no");
    result.time_end = text(content, "pay_time");
    match text(content, "channel").as_deref() {
        Some("91") => {
            result.method = Some("wechat".to_string());
            result.wechat_open_id = text(content, "cust_id");
        }
        Some("92") => {
            result.method = Some("alipay".to_string());
            result.alipay_logon_id = text(content, "buyer_logon_id");
            result.alipay_user_id = text(content, "cust_id");
        }
        Some("93") | Some("99") => result.method = Some("unionpay".to_string()),
        Some("94") => result.method = Some("digital".to_string()),
        _ => {}
    }
}

#[cfg(test)]
pub(crate) mod testutil {
    use serde_json::{Map, Value};

    use crate::encoding::{to_legacy, url_encode};
    use crate::sign::{canonicalize, sign_bytes, testkeys, SignType};

    /// 模拟富友：对报文签名，生成 GBK XML，再 URL 编码一次
    pub(crate) fn fuiou_response(mut content: Map<String, Value>) -> Vec<u8> {
        let (fuiou_private, _) = testkeys::fuiou();
        let data = canonicalize(&content).unwrap();
        let gbk = to_legacy(std::str::from_utf8(&data).unwrap()).unwrap();
        let signature = sign_bytes(&gbk, fuiou_private, SignType::Md5).unwrap();
        content.insert("sign".to_string(), Value::String(signature));
        encode(&content)
    }

    pub(crate) fn encode(content: &Map<String, Value>) -> Vec<u8> {
        let mut xml = String::from(r#"<?xml version="1.0" encoding="GBK" standalone="yes"?><xml>"#);
        for (k, v) in content {
            let v = v.as_str().unwrap();
            xml.push_str(&format!("<{k}>{v}</{k}>", k = k, v = v));
        }
        xml.push_str("</xml>");
        url_encode(&to_legacy(&xml).unwrap()).into_bytes()
    }
}
