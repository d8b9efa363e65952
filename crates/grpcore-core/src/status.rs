//! The structured RPC outcome carried in trailers.

use std::fmt;

use percent_encoding::{AsciiSet, CONTROLS, percent_decode_str, utf8_percent_encode};
use tracing::debug;

use grpcore_transport_traits::{Metadata, TransportError};

use crate::code::Code;
use crate::details::{ErrorDetail, decode_status_details, encode_status_details};
use crate::headers::{GRPC_MESSAGE, GRPC_STATUS, GRPC_STATUS_DETAILS};

/// Bytes escaped in `grpc-message`: controls, DEL, `%`, and all non-ASCII.
const MESSAGE_ESCAPE: &AsciiSet = &CONTROLS.add(b'%');

/// gRPC status returned from an RPC.
///
/// Equality compares the code and message only; details are ignored.
#[derive(Debug, Clone)]
pub struct Status {
    code: Code,
    message: Option<String>,
    details: Vec<ErrorDetail>,
}

macro_rules! status_constructors {
    ($($(#[$doc:meta])* $name:ident => $code:ident,)*) => {
        $(
            $(#[$doc])*
            pub fn $name(message: impl Into<String>) -> Self {
                Self::new(Code::$code, message)
            }
        )*
    };
}

impl Status {
    /// Create a new status.
    pub fn new(code: Code, message: impl Into<String>) -> Self {
        Self {
            code,
            message: Some(message.into()),
            details: Vec::new(),
        }
    }

    /// Create an OK status.
    pub fn ok() -> Self {
        Self::from_code(Code::Ok)
    }

    /// Create a status from just a code.
    pub fn from_code(code: Code) -> Self {
        Self {
            code,
            message: None,
            details: Vec::new(),
        }
    }

    /// Create a status carrying detail records.
    pub fn with_details(
        code: Code,
        message: impl Into<String>,
        details: impl IntoIterator<Item = ErrorDetail>,
    ) -> Self {
        Self {
            code,
            message: Some(message.into()),
            details: details.into_iter().collect(),
        }
    }

    status_constructors! {
        /// `CANCELLED` with a message.
        cancelled => Cancelled,
        /// `UNKNOWN` with a message.
        unknown => Unknown,
        /// `INVALID_ARGUMENT` with a message.
        invalid_argument => InvalidArgument,
        /// `DEADLINE_EXCEEDED` with a message.
        deadline_exceeded => DeadlineExceeded,
        /// `NOT_FOUND` with a message.
        not_found => NotFound,
        /// `ALREADY_EXISTS` with a message.
        already_exists => AlreadyExists,
        /// `PERMISSION_DENIED` with a message.
        permission_denied => PermissionDenied,
        /// `RESOURCE_EXHAUSTED` with a message.
        resource_exhausted => ResourceExhausted,
        /// `FAILED_PRECONDITION` with a message.
        failed_precondition => FailedPrecondition,
        /// `ABORTED` with a message.
        aborted => Aborted,
        /// `OUT_OF_RANGE` with a message.
        out_of_range => OutOfRange,
        /// `UNIMPLEMENTED` with a message.
        unimplemented => Unimplemented,
        /// `INTERNAL` with a message.
        internal => Internal,
        /// `UNAVAILABLE` with a message.
        unavailable => Unavailable,
        /// `DATA_LOSS` with a message.
        data_loss => DataLoss,
        /// `UNAUTHENTICATED` with a message.
        unauthenticated => Unauthenticated,
    }

    /// Get the status code.
    pub fn code(&self) -> Code {
        self.code
    }

    /// Get the status message, if any.
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    /// Get the detail records, in order.
    pub fn details(&self) -> &[ErrorDetail] {
        &self.details
    }

    /// Append a detail record.
    #[must_use]
    pub fn with_detail(mut self, detail: ErrorDetail) -> Self {
        self.details.push(detail);
        self
    }

    /// Check if this is a successful status.
    pub fn is_ok(&self) -> bool {
        self.code.is_ok()
    }

    /// Map a transport failure onto the status a call observes.
    pub fn from_transport_error(err: &TransportError) -> Self {
        match err {
            TransportError::StreamReset(_) => Self::cancelled(err.to_string()),
            TransportError::ProtocolError(_) => Self::internal(err.to_string()),
            _ => Self::unavailable(err.to_string()),
        }
    }

    /// Append `grpc-status`, `grpc-message`, and `grpc-status-details-bin`
    /// to a trailer block.
    pub fn append_to(&self, trailers: &mut Metadata) {
        trailers.append(GRPC_STATUS, self.code.as_u32().to_string());
        if !self.is_ok()
            && let Some(message) = self.message.as_deref()
        {
            trailers.append(
                GRPC_MESSAGE,
                utf8_percent_encode(message, MESSAGE_ESCAPE).to_string(),
            );
        }
        if !self.details.is_empty() {
            let encoded = encode_status_details(
                self.code.as_u32() as i32,
                self.message.as_deref().unwrap_or_default(),
                &self.details,
            );
            trailers.append_bin(GRPC_STATUS_DETAILS, &encoded);
        }
    }

    /// Build a trailer block holding only this status.
    pub fn to_trailers(&self) -> Metadata {
        let mut trailers = Metadata::with_capacity(3);
        self.append_to(&mut trailers);
        trailers
    }

    /// Read the status out of a trailer (or trailers-only header) block.
    ///
    /// Returns `None` if `grpc-status` is absent.
    pub fn from_trailers(trailers: &Metadata) -> Option<Self> {
        let code = Code::from_header(trailers.get(GRPC_STATUS)?);
        let message = trailers
            .get(GRPC_MESSAGE)
            .map(|raw| percent_decode_str(raw).decode_utf8_lossy().into_owned());

        let details = match trailers.get_bin(GRPC_STATUS_DETAILS) {
            Some(bytes) => decode_status_details(&bytes).unwrap_or_else(|e| {
                debug!("Ignoring undecodable status details: {}", e);
                Vec::new()
            }),
            None => Vec::new(),
        };

        Some(Self {
            code,
            message,
            details,
        })
    }
}

impl PartialEq for Status {
    fn eq(&self, other: &Self) -> bool {
        self.code == other.code && self.message == other.message
    }
}

impl Eq for Status {}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.message {
            Some(message) => write!(f, "status: {}, message: {:?}", self.code, message),
            None => write!(f, "status: {}", self.code),
        }
    }
}

impl std::error::Error for Status {}

impl From<Code> for Status {
    fn from(code: Code) -> Self {
        Self::from_code(code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::details::{ErrorInfo, LocalizedMessage};

    #[test]
    fn test_status_equality_ignores_details() {
        let plain = Status::not_found("missing");
        let detailed = Status::with_details(
            Code::NotFound,
            "missing",
            [ErrorDetail::LocalizedMessage(LocalizedMessage {
                locale: "en".into(),
                message: "gone".into(),
            })],
        );
        assert_eq!(plain, detailed);
        assert_ne!(plain, Status::not_found("other"));
        assert_ne!(plain, Status::internal("missing"));
    }

    #[test]
    fn test_ok_trailers_have_no_message() {
        let trailers = Status::new(Code::Ok, "fine").to_trailers();
        assert_eq!(trailers.get(GRPC_STATUS), Some("0"));
        assert!(!trailers.contains_key(GRPC_MESSAGE));
    }

    #[test]
    fn test_message_is_percent_encoded() {
        let status = Status::internal("100% broken\nnewline ünïcode");
        let trailers = status.to_trailers();

        let raw = trailers.get(GRPC_MESSAGE).unwrap();
        assert!(raw.is_ascii());
        assert!(raw.contains("%25"));
        assert!(raw.contains("%0A"));

        let back = Status::from_trailers(&trailers).unwrap();
        assert_eq!(back, status);
    }

    #[test]
    fn test_details_survive_trailers() {
        let info = ErrorDetail::ErrorInfo(ErrorInfo {
            reason: "STOCKOUT".into(),
            domain: "shop.example".into(),
            metadata: Default::default(),
        });
        let status = Status::with_details(Code::FailedPrecondition, "no stock", [info.clone()]);
        let back = Status::from_trailers(&status.to_trailers()).unwrap();

        assert_eq!(back.code(), Code::FailedPrecondition);
        assert_eq!(back.details(), &[info]);
    }

    #[test]
    fn test_missing_grpc_status() {
        let mut trailers = Metadata::new();
        trailers.append(GRPC_MESSAGE, "orphan");
        assert!(Status::from_trailers(&trailers).is_none());
    }

    #[test]
    fn test_unrecognized_code_maps_to_unknown() {
        let mut trailers = Metadata::new();
        trailers.append(GRPC_STATUS, "42");
        assert_eq!(Status::from_trailers(&trailers).unwrap().code(), Code::Unknown);
    }

    #[test]
    fn test_transport_error_mapping() {
        let reset = Status::from_transport_error(&TransportError::StreamReset("x".into()));
        assert_eq!(reset.code(), Code::Cancelled);
        let lost = Status::from_transport_error(&TransportError::ConnectionLost("x".into()));
        assert_eq!(lost.code(), Code::Unavailable);
    }

    #[test]
    fn test_display() {
        assert_eq!(Status::ok().to_string(), "status: OK");
        assert_eq!(
            Status::not_found("nope").to_string(),
            "status: NOT_FOUND, message: \"nope\""
        );
    }
}
