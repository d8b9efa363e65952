//! Typed status details (`google.rpc` error model).
//!
//! Details travel in the `grpc-status-details-bin` trailer as an encoded
//! `google.rpc.Status` whose `details` field is a list of
//! `google.protobuf.Any`. Known type URLs are parsed into [`ErrorDetail`]
//! variants through a dispatch table; anything else is kept as an opaque
//! [`ErrorDetail::Unknown`] so it can be forwarded unchanged.

use std::collections::HashMap;
use std::sync::LazyLock;

use prost::Message;
use prost_types::Any;

/// Prefix used for every `google.rpc` type URL.
pub const TYPE_URL_PREFIX: &str = "type.googleapis.com/";

/// The `google.rpc.Status` wire message.
#[derive(Clone, PartialEq, Message)]
pub struct RpcStatus {
    /// Status code.
    #[prost(int32, tag = "1")]
    pub code: i32,
    /// Developer-facing message.
    #[prost(string, tag = "2")]
    pub message: String,
    /// Packed detail records.
    #[prost(message, repeated, tag = "3")]
    pub details: Vec<Any>,
}

/// The reason of an error, with structured metadata.
#[derive(Clone, PartialEq, Message)]
pub struct ErrorInfo {
    /// UPPER_SNAKE_CASE reason.
    #[prost(string, tag = "1")]
    pub reason: String,
    /// Logical grouping the reason belongs to.
    #[prost(string, tag = "2")]
    pub domain: String,
    /// Additional structured details.
    #[prost(map = "string, string", tag = "3")]
    pub metadata: HashMap<String, String>,
}

/// When the client may retry.
#[derive(Clone, PartialEq, Message)]
pub struct RetryInfo {
    /// Minimum delay before retrying.
    #[prost(message, optional, tag = "1")]
    pub retry_delay: Option<prost_types::Duration>,
}

/// Debugging information from the server.
#[derive(Clone, PartialEq, Message)]
pub struct DebugInfo {
    /// Stack trace entries.
    #[prost(string, repeated, tag = "1")]
    pub stack_entries: Vec<String>,
    /// Additional debugging detail.
    #[prost(string, tag = "2")]
    pub detail: String,
}

/// A quota check failure.
#[derive(Clone, PartialEq, Message)]
pub struct QuotaFailure {
    /// Every quota violation.
    #[prost(message, repeated, tag = "1")]
    pub violations: Vec<QuotaViolation>,
}

/// One quota violation.
#[derive(Clone, PartialEq, Message)]
pub struct QuotaViolation {
    /// Subject on which the check failed.
    #[prost(string, tag = "1")]
    pub subject: String,
    /// Description of the failure.
    #[prost(string, tag = "2")]
    pub description: String,
}

/// Failed preconditions.
#[derive(Clone, PartialEq, Message)]
pub struct PreconditionFailure {
    /// Every precondition violation.
    #[prost(message, repeated, tag = "1")]
    pub violations: Vec<PreconditionViolation>,
}

/// One precondition violation.
#[derive(Clone, PartialEq, Message)]
pub struct PreconditionViolation {
    /// Service-specific precondition type.
    #[prost(string, tag = "1")]
    pub r#type: String,
    /// Subject that failed the check.
    #[prost(string, tag = "2")]
    pub subject: String,
    /// Description of the failure.
    #[prost(string, tag = "3")]
    pub description: String,
}

/// Violations in a client request.
#[derive(Clone, PartialEq, Message)]
pub struct BadRequest {
    /// Every field violation.
    #[prost(message, repeated, tag = "1")]
    pub field_violations: Vec<FieldViolation>,
}

/// One bad request field.
#[derive(Clone, PartialEq, Message)]
pub struct FieldViolation {
    /// Path to the offending field.
    #[prost(string, tag = "1")]
    pub field: String,
    /// Why the field is bad.
    #[prost(string, tag = "2")]
    pub description: String,
}

/// Identifies the request, for bug reports.
#[derive(Clone, PartialEq, Message)]
pub struct RequestInfo {
    /// Opaque request id.
    #[prost(string, tag = "1")]
    pub request_id: String,
    /// Data used while serving the request.
    #[prost(string, tag = "2")]
    pub serving_data: String,
}

/// The resource being accessed.
#[derive(Clone, PartialEq, Message)]
pub struct ResourceInfo {
    /// Resource type name.
    #[prost(string, tag = "1")]
    pub resource_type: String,
    /// Resource name.
    #[prost(string, tag = "2")]
    pub resource_name: String,
    /// Owner of the resource.
    #[prost(string, tag = "3")]
    pub owner: String,
    /// What error is encountered when accessing it.
    #[prost(string, tag = "4")]
    pub description: String,
}

/// Links to documentation.
#[derive(Clone, PartialEq, Message)]
pub struct Help {
    /// Relevant links.
    #[prost(message, repeated, tag = "1")]
    pub links: Vec<HelpLink>,
}

/// One documentation link.
#[derive(Clone, PartialEq, Message)]
pub struct HelpLink {
    /// What the link offers.
    #[prost(string, tag = "1")]
    pub description: String,
    /// The link.
    #[prost(string, tag = "2")]
    pub url: String,
}

/// A localized, user-facing error message.
#[derive(Clone, PartialEq, Message)]
pub struct LocalizedMessage {
    /// BCP-47 locale, e.g. `en-US`.
    #[prost(string, tag = "1")]
    pub locale: String,
    /// The localized message.
    #[prost(string, tag = "2")]
    pub message: String,
}

/// One typed detail record attached to a [`Status`](crate::Status).
#[derive(Debug, Clone, PartialEq)]
pub enum ErrorDetail {
    /// `google.rpc.ErrorInfo`
    ErrorInfo(ErrorInfo),
    /// `google.rpc.RetryInfo`
    RetryInfo(RetryInfo),
    /// `google.rpc.DebugInfo`
    DebugInfo(DebugInfo),
    /// `google.rpc.QuotaFailure`
    QuotaFailure(QuotaFailure),
    /// `google.rpc.PreconditionFailure`
    PreconditionFailure(PreconditionFailure),
    /// `google.rpc.BadRequest`
    BadRequest(BadRequest),
    /// `google.rpc.RequestInfo`
    RequestInfo(RequestInfo),
    /// `google.rpc.ResourceInfo`
    ResourceInfo(ResourceInfo),
    /// `google.rpc.Help`
    Help(Help),
    /// `google.rpc.LocalizedMessage`
    LocalizedMessage(LocalizedMessage),
    /// A record whose type URL has no registered parser, kept verbatim.
    Unknown(Any),
}

type Parser = fn(&[u8]) -> Result<ErrorDetail, prost::DecodeError>;

macro_rules! parser {
    ($variant:ident) => {
        (
            concat!("type.googleapis.com/google.rpc.", stringify!($variant)),
            (|bytes: &[u8]| $variant::decode(bytes).map(ErrorDetail::$variant)) as Parser,
        )
    };
}

static PARSERS: LazyLock<HashMap<&'static str, Parser>> = LazyLock::new(|| {
    HashMap::from([
        parser!(ErrorInfo),
        parser!(RetryInfo),
        parser!(DebugInfo),
        parser!(QuotaFailure),
        parser!(PreconditionFailure),
        parser!(BadRequest),
        parser!(RequestInfo),
        parser!(ResourceInfo),
        parser!(Help),
        parser!(LocalizedMessage),
    ])
});

impl ErrorDetail {
    /// The type URL identifying this record.
    pub fn type_url(&self) -> String {
        let name = match self {
            Self::ErrorInfo(_) => "ErrorInfo",
            Self::RetryInfo(_) => "RetryInfo",
            Self::DebugInfo(_) => "DebugInfo",
            Self::QuotaFailure(_) => "QuotaFailure",
            Self::PreconditionFailure(_) => "PreconditionFailure",
            Self::BadRequest(_) => "BadRequest",
            Self::RequestInfo(_) => "RequestInfo",
            Self::ResourceInfo(_) => "ResourceInfo",
            Self::Help(_) => "Help",
            Self::LocalizedMessage(_) => "LocalizedMessage",
            Self::Unknown(any) => return any.type_url.clone(),
        };
        format!("{TYPE_URL_PREFIX}google.rpc.{name}")
    }

    /// Pack into a `google.protobuf.Any`.
    pub fn to_any(&self) -> Any {
        let value = match self {
            Self::ErrorInfo(m) => m.encode_to_vec(),
            Self::RetryInfo(m) => m.encode_to_vec(),
            Self::DebugInfo(m) => m.encode_to_vec(),
            Self::QuotaFailure(m) => m.encode_to_vec(),
            Self::PreconditionFailure(m) => m.encode_to_vec(),
            Self::BadRequest(m) => m.encode_to_vec(),
            Self::RequestInfo(m) => m.encode_to_vec(),
            Self::ResourceInfo(m) => m.encode_to_vec(),
            Self::Help(m) => m.encode_to_vec(),
            Self::LocalizedMessage(m) => m.encode_to_vec(),
            Self::Unknown(any) => return any.clone(),
        };
        Any {
            type_url: self.type_url(),
            value,
        }
    }

    /// Unpack a `google.protobuf.Any`.
    ///
    /// Unregistered type URLs, and registered ones whose payload does not
    /// decode, are passed through as [`ErrorDetail::Unknown`].
    pub fn from_any(any: Any) -> Self {
        match PARSERS.get(any.type_url.as_str()) {
            Some(parse) => parse(&any.value).unwrap_or(Self::Unknown(any)),
            None => Self::Unknown(any),
        }
    }
}

/// Encode a `google.rpc.Status` for the `grpc-status-details-bin` trailer.
pub fn encode_status_details(code: i32, message: &str, details: &[ErrorDetail]) -> Vec<u8> {
    RpcStatus {
        code,
        message: message.to_string(),
        details: details.iter().map(ErrorDetail::to_any).collect(),
    }
    .encode_to_vec()
}

/// Decode the `grpc-status-details-bin` trailer into detail records.
pub fn decode_status_details(bytes: &[u8]) -> Result<Vec<ErrorDetail>, prost::DecodeError> {
    let status = RpcStatus::decode(bytes)?;
    Ok(status.details.into_iter().map(ErrorDetail::from_any).collect())
}
