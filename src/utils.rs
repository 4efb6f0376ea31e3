use std::{
    io,
    fmt,
    net::AddrParseError
};

#[derive(Debug)]
pub enum MidnightError {
    IOError(String),
    ConfigError(String),
    CertificateError(String),
    InvalidDomainFormat(String),
    HudSuckerError(String),
    HttpError(String),
    TransformError(String),
    UndefinedError(String)
}

impl From<io::Error> for MidnightError {
    fn from(e: io::Error) -> Self { Self::IOError(e.to_string()) }
}

impl From<serde_yaml::Error> for MidnightError {
    fn from(e: serde_yaml::Error) -> Self { Self::ConfigError(e.to_string()) }
}

impl From<serde_json::Error> for MidnightError {
    fn from(e: serde_json::Error) -> Self { Self::TransformError(e.to_string()) }
}

impl From<AddrParseError> for MidnightError {
    fn from(e: AddrParseError) -> Self { Self::ConfigError(e.to_string()) }
}

impl From<regex::Error> for MidnightError {
    fn from(e: regex::Error) -> Self { Self::InvalidDomainFormat(e.to_string()) }
}

impl From<hudsucker::Error> for MidnightError {
    fn from(e: hudsucker::Error) -> Self { Self::HudSuckerError(e.to_string()) }
}

impl From<hyper::Error> for MidnightError {
    fn from(e: hyper::Error) -> Self { Self::HttpError(e.to_string()) }
}

impl From<rcgen::RcgenError> for MidnightError {
    fn from(e: rcgen::RcgenError) -> Self { Self::CertificateError(e.to_string()) }
}

impl fmt::Display for MidnightError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            MidnightError::IOError(s) => write!(f, "I/O error: {}", s),
            MidnightError::ConfigError(s) => write!(f, "Configuration error: {}", s),
            MidnightError::CertificateError(s) => write!(f, "Certificate error: {}", s),
            MidnightError::InvalidDomainFormat(s) => write!(f, "Invalid domain format: {}", s),
            MidnightError::HudSuckerError(s) => write!(f, "Proxy error: {}", s),
            MidnightError::HttpError(s) => write!(f, "HTTP error: {}", s),
            MidnightError::TransformError(s) => write!(f, "Transform error: {}", s),
            MidnightError::UndefinedError(s) => write!(f, "{}", s)
        }
    }
}

impl std::error::Error for MidnightError {}

// ---------------------------------------------------------------------------------------------- //
