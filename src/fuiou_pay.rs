use std::time::Duration;

use log::{error, info};
use reqwest::header::CONTENT_TYPE;

use crate::config::Config;
use crate::error::{FuiouError, Result};
use crate::request::{self, Request, WireRequest};
use crate::response::{normalize_notify, receive, Response, TradeResult};

/// 发送表单 POST，返回原始报文
pub trait Transport {
    fn post_form(&self, url: &str, body: &str) -> Result<Vec<u8>>;
}

#[derive(Debug, Clone, Default)]
pub struct HttpTransport {
    client: reqwest::blocking::Client,
}

impl HttpTransport {
    pub fn new() -> Self {
        HttpTransport {
            client: reqwest::blocking::Client::new(),
        }
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()?;
        Ok(HttpTransport { client })
    }
}

impl Transport for HttpTransport {
    fn post_form(&self, url: &str, body: &str) -> Result<Vec<u8>> {
        let res = self
            .client
            .post(url)
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(body.to_string())
            .send()?;

        let status = res.status();
        if !status.is_success() {
            let text = res.text().unwrap_or_default();
            error!("Fuiou[PostForm]err {}:{:?}", status, text);
            return Err(FuiouError::Transport(format!("{} {}", status, text)));
        }
        Ok(res.bytes()?.to_vec())
    }
}

/// 富友支付
#[derive(Debug, Clone)]
pub struct FuiouPay<T = HttpTransport> {
    config: Config,
    transport: T,
}

impl FuiouPay<HttpTransport> {
    pub fn new(config: Config) -> Self {
        FuiouPay {
            config,
            transport: HttpTransport::new(),
        }
    }
}

impl<T: Transport> FuiouPay<T> {
    pub fn with_transport(config: Config, transport: T) -> Self {
        FuiouPay { config, transport }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// 组装、签名、编码，不发送
    pub fn build(&self, request: &Request) -> Result<WireRequest> {
        request::build(request, &self.config)
    }

    /// 发送请求并解码返回报文，不验签
    pub fn execute(&self, request: &Request) -> Result<Response> {
        let wire = self.build(request)?;
        info!("Fuiou[PostForm] {} {}", wire.operation, wire.url);
        let raw = self.transport.post_form(&wire.url, &wire.body)?;
        let content = receive(&raw)?;
        Ok(Response::new(&request.api_name, content))
    }

    /// 发送请求，验签并归一化
    pub fn process(&self, request: &Request) -> Result<TradeResult> {
        self.execute(request)?.verify(&self.config.fuiou_public_key)
    }

    /// 解析异步通知报文
    pub fn parse_notify(&self, raw: &[u8]) -> Result<TradeResult> {
        Ok(normalize_notify(receive(raw)?))
    }
}
