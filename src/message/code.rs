use std::fmt;

/// An SIP status code.
///
/// Only the codes this stack originates or inspects are enumerated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd)]
#[repr(i32)]
pub enum StatusCode {
    /// `Trying` status code.
    Trying = 100,
    /// `Ringing` status code.
    Ringing = 180,
    /// `OK` status code.
    Ok = 200,
    /// `Bad Request` status code.
    BadRequest = 400,
    /// `Unauthorized` status code.
    Unauthorized = 401,
    /// `Forbidden` status code.
    Forbidden = 403,
    /// `Not Found` status code.
    NotFound = 404,
    /// `Request Timeout` status code.
    RequestTimeout = 408,
    /// `Temporarily Unavailable` status code.
    TemporarilyUnavailable = 480,
    /// `Call or Transaction Does Not Exist` status code.
    CallOrTransactionDoesNotExist = 481,
    /// `Busy Here` status code.
    BusyHere = 486,
    /// `Request Terminated` status code.
    RequestTerminated = 487,
    /// `Server Internal Error` status code.
    ServerInternalError = 500,
    /// `Not Implemented` status code.
    NotImplemented = 501,
    /// `Service Unavailable` status code.
    ServiceUnavailable = 503,
}

impl StatusCode {
    /// Returns the numeric value of the status code.
    pub fn into_i32(self) -> i32 {
        self as i32
    }

    /// Returns the default reason phrase for this status code.
    pub fn reason(&self) -> &'static str {
        match self {
            StatusCode::Trying => "Trying",
            StatusCode::Ringing => "Ringing",
            StatusCode::Ok => "OK",
            StatusCode::BadRequest => "Bad Request",
            StatusCode::Unauthorized => "Unauthorized",
            StatusCode::Forbidden => "Forbidden",
            StatusCode::NotFound => "Not Found",
            StatusCode::RequestTimeout => "Request Timeout",
            StatusCode::TemporarilyUnavailable => "Temporarily Unavailable",
            StatusCode::CallOrTransactionDoesNotExist => "Call/Transaction Does Not Exist",
            StatusCode::BusyHere => "Busy Here",
            StatusCode::RequestTerminated => "Request Terminated",
            StatusCode::ServerInternalError => "Server Internal Error",
            StatusCode::NotImplemented => "Not Implemented",
            StatusCode::ServiceUnavailable => "Service Unavailable",
        }
    }

    /// Returns `true` for 1xx codes.
    pub fn is_provisional(&self) -> bool {
        let code = self.into_i32();
        (100..200).contains(&code)
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.into_i32())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reason() {
        assert_eq!(
            StatusCode::CallOrTransactionDoesNotExist.reason(),
            "Call/Transaction Does Not Exist"
        );
        assert_eq!(StatusCode::NotImplemented.into_i32(), 501);
        assert!(StatusCode::Trying.is_provisional());
        assert!(!StatusCode::Unauthorized.is_provisional());
    }
}
