//! Order payload validation and normalization
//!
//! The browser submits an order its wallet has already signed. Nothing here
//! re-signs it; the job is to check its shape, settle every field on one
//! canonical representation, and build the venue payload from that. Code
//! downstream of [`validate_order`] only ever sees [`ValidatedOrder`].

use crate::error::{GatewayError, GatewayResult};
use serde::{Deserialize, Serialize};

const SIGNATURE_HEX_LEN: usize = 130;
const ADDRESS_HEX_LEN: usize = 40;

/// `side` as the client may send it
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum SideInput {
    Numeric(u64),
    Symbolic(String),
}

/// `salt` as the client may send it
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum SaltInput {
    Number(u64),
    Text(String),
}

/// Wire payload posted by the browser
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderRequest {
    pub trade_mode: String,
    pub execution: String,
    pub token_id: String,
    pub side: SideInput,
    pub signature_type: u8,
    pub funder_address: String,
    pub order: OrderInput,
}

/// Nested wallet-signed order as posted by the browser
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderInput {
    pub salt: SaltInput,
    pub maker: String,
    pub signer: String,
    pub taker: String,
    pub token_id: String,
    pub maker_amount: String,
    pub taker_amount: String,
    pub expiration: String,
    pub nonce: String,
    pub fee_rate_bps: String,
    pub side: SideInput,
    pub signature_type: u8,
    pub signature: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeMode {
    Market,
    Limit,
}

/// Venue time-in-force
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderType {
    Gtc,
    Gtd,
    Fok,
    Fak,
}

impl OrderType {
    fn allowed_for(self, mode: TradeMode) -> bool {
        match mode {
            TradeMode::Limit => matches!(self, OrderType::Gtc | OrderType::Gtd),
            TradeMode::Market => matches!(self, OrderType::Fok | OrderType::Fak),
        }
    }
}

/// Canonical side: the venue's numeric encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Buy = 0,
    Sell = 1,
}

impl Side {
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SideEncoding {
    Numeric,
    Symbolic,
}

fn parse_side(input: &SideInput, field: &str) -> GatewayResult<(Side, SideEncoding)> {
    match input {
        SideInput::Numeric(0) => Ok((Side::Buy, SideEncoding::Numeric)),
        SideInput::Numeric(1) => Ok((Side::Sell, SideEncoding::Numeric)),
        SideInput::Symbolic(s) if s.eq_ignore_ascii_case("BUY") => {
            Ok((Side::Buy, SideEncoding::Symbolic))
        }
        SideInput::Symbolic(s) if s.eq_ignore_ascii_case("SELL") => {
            Ok((Side::Sell, SideEncoding::Symbolic))
        }
        _ => Err(GatewayError::malformed(format!("{} must be 0, 1, BUY or SELL", field))),
    }
}

/// Order as forwarded: numeric side/signatureType, everything else a string
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedOrder {
    pub salt: String,
    pub maker: String,
    pub signer: String,
    pub taker: String,
    pub token_id: String,
    pub maker_amount: String,
    pub taker_amount: String,
    pub expiration: String,
    pub nonce: String,
    pub fee_rate_bps: String,
    pub side: u8,
    pub signature_type: u8,
    pub signature: String,
}

/// A request that passed validation, in canonical form
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidatedOrder {
    pub trade_mode: TradeMode,
    pub execution: OrderType,
    pub token_id: String,
    pub side: u8,
    pub signature_type: u8,
    pub funder_address: String,
    pub order: SignedOrder,
}

/// Body posted to the venue's order endpoint
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VenueOrderPayload<'a> {
    pub order: &'a SignedOrder,
    pub owner: &'a str,
    pub order_type: OrderType,
}

impl ValidatedOrder {
    /// Venue payload owned by the L2 key `owner`
    pub fn venue_payload<'a>(&'a self, owner: &'a str) -> VenueOrderPayload<'a> {
        VenueOrderPayload { order: &self.order, owner, order_type: self.execution }
    }

    /// Serialized venue payload; this exact string is what gets signed
    pub fn venue_body(&self, owner: &str) -> GatewayResult<String> {
        serde_json::to_string(&self.venue_payload(owner))
            .map_err(|e| GatewayError::malformed(format!("order not serializable: {}", e)))
    }
}

fn is_decimal(value: &str) -> bool {
    !value.is_empty() && value.bytes().all(|b| b.is_ascii_digit())
}

fn is_hex_with_prefix(value: &str, hex_len: usize) -> bool {
    value.len() == hex_len + 2
        && value.starts_with("0x")
        && value[2..].bytes().all(|b| b.is_ascii_hexdigit())
}

/// Whether `value` is a `0x`-prefixed 20-byte account
pub fn is_address(value: &str) -> bool {
    is_hex_with_prefix(value, ADDRESS_HEX_LEN)
}

fn decimal(value: &str, field: &str) -> GatewayResult<String> {
    if is_decimal(value) {
        Ok(value.to_string())
    } else {
        Err(GatewayError::malformed(format!("{} must be a decimal string", field)))
    }
}

fn address(value: &str, field: &str) -> GatewayResult<String> {
    if is_address(value) {
        Ok(value.to_string())
    } else {
        Err(GatewayError::malformed(format!("{} must be a 0x-prefixed address", field)))
    }
}

fn signature_type(value: u8, field: &str) -> GatewayResult<u8> {
    if value <= 2 {
        Ok(value)
    } else {
        Err(GatewayError::malformed(format!("{} must be 0, 1 or 2", field)))
    }
}

/// Parse and validate a raw request body
pub fn parse_order(body: &[u8]) -> GatewayResult<ValidatedOrder> {
    let request: OrderRequest = serde_json::from_slice(body)
        .map_err(|e| GatewayError::malformed(format!("invalid order payload: {}", e)))?;
    validate_order(&request)
}

/// Validate a request and normalize it to canonical form
pub fn validate_order(request: &OrderRequest) -> GatewayResult<ValidatedOrder> {
    let trade_mode = match request.trade_mode.to_ascii_lowercase().as_str() {
        "market" => TradeMode::Market,
        "limit" => TradeMode::Limit,
        _ => return Err(GatewayError::malformed("tradeMode must be market or limit")),
    };

    let execution = match request.execution.to_ascii_uppercase().as_str() {
        "GTC" => OrderType::Gtc,
        "GTD" => OrderType::Gtd,
        "FOK" => OrderType::Fok,
        "FAK" => OrderType::Fak,
        _ => return Err(GatewayError::malformed("execution must be GTC, GTD, FOK or FAK")),
    };
    if !execution.allowed_for(trade_mode) {
        return Err(GatewayError::malformed("execution does not match tradeMode"));
    }

    let (outer_side, outer_encoding) = parse_side(&request.side, "side")?;
    let (inner_side, inner_encoding) = parse_side(&request.order.side, "order.side")?;
    if outer_encoding != inner_encoding || outer_side != inner_side {
        return Err(GatewayError::malformed("side and order.side must agree"));
    }

    let token_id = decimal(&request.token_id, "tokenId")?;
    let order = &request.order;
    if order.token_id != token_id {
        return Err(GatewayError::malformed("tokenId and order.tokenId must agree"));
    }

    let outer_signature_type = signature_type(request.signature_type, "signatureType")?;
    let inner_signature_type = signature_type(order.signature_type, "order.signatureType")?;
    if outer_signature_type != inner_signature_type {
        return Err(GatewayError::malformed("signatureType and order.signatureType must agree"));
    }

    let funder_address = address(&request.funder_address, "funderAddress")?;
    let maker = address(&order.maker, "order.maker")?;
    if !maker.eq_ignore_ascii_case(&funder_address) {
        return Err(GatewayError::malformed("order.maker must be funderAddress"));
    }

    let salt = match &order.salt {
        SaltInput::Number(n) => n.to_string(),
        SaltInput::Text(s) => decimal(s, "order.salt")?,
    };

    let expiration = decimal(&order.expiration, "order.expiration")?;
    if execution != OrderType::Gtd && expiration.bytes().any(|b| b != b'0') {
        return Err(GatewayError::malformed("only GTD orders may have a non-zero expiration"));
    }

    if !is_hex_with_prefix(&order.signature, SIGNATURE_HEX_LEN) {
        return Err(GatewayError::malformed("order.signature must be 0x-prefixed 65-byte hex"));
    }

    Ok(ValidatedOrder {
        trade_mode,
        execution,
        token_id: token_id.clone(),
        side: outer_side.as_u8(),
        signature_type: outer_signature_type,
        funder_address,
        order: SignedOrder {
            salt,
            maker,
            signer: address(&order.signer, "order.signer")?,
            taker: address(&order.taker, "order.taker")?,
            token_id,
            maker_amount: decimal(&order.maker_amount, "order.makerAmount")?,
            taker_amount: decimal(&order.taker_amount, "order.takerAmount")?,
            expiration,
            nonce: decimal(&order.nonce, "order.nonce")?,
            fee_rate_bps: decimal(&order.fee_rate_bps, "order.feeRateBps")?,
            side: inner_side.as_u8(),
            signature_type: inner_signature_type,
            signature: order.signature.clone(),
        },
    })
}

#[cfg(test)]
pub(crate) mod testing {
    use serde_json::{json, Value};

    pub const FUNDER: &str = "0x1111111111111111111111111111111111111111";
    pub const SIGNER: &str = "0x2222222222222222222222222222222222222222";

    /// A valid limit order payload with the given outer and nested side
    pub fn order_json(outer_side: Value, inner_side: Value) -> Value {
        json!({
            "tradeMode": "limit",
            "execution": "GTC",
            "tokenId": "71321045679252212594626385532706912750332728571942532289631379312455583992563",
            "side": outer_side,
            "signatureType": 1,
            "funderAddress": FUNDER,
            "order": {
                "salt": "123456789",
                "maker": FUNDER,
                "signer": SIGNER,
                "taker": "0x0000000000000000000000000000000000000000",
                "tokenId": "71321045679252212594626385532706912750332728571942532289631379312455583992563",
                "makerAmount": "5000000",
                "takerAmount": "10000000",
                "expiration": "0",
                "nonce": "0",
                "feeRateBps": "0",
                "side": inner_side,
                "signatureType": 1,
                "signature": format!("0x{}", "ab".repeat(65)),
            }
        })
    }

    pub fn valid_order_json() -> Value {
        order_json(json!(0), json!(0))
    }
}
