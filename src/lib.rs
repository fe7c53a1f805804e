//! 富友支付接口 SDK：付款码支付、查询、退款、二维码、公众号下单、用户标识查询。

mod constants;

pub mod config;
pub mod encoding;
pub mod error;
pub mod fuiou_pay;
pub mod request;
pub mod response;
pub mod sign;

pub use config::Config;
pub use error::{FuiouError, Result};
pub use fuiou_pay::{FuiouPay, HttpTransport, Transport};
pub use request::{Operation, ParamValue, Request, WireRequest};
pub use response::{Response, ReturnCode, TradeResult, TradeStatus};
pub use sign::SignType;
