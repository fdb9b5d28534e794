//! HTTP vocabulary shared across the engine.
//!
//! Pure data: no behavior beyond string conversion.

use std::fmt;

/// Header names the engine and its callers commonly set.
pub mod header {
    pub const AUTHORIZATION: &str = "Authorization";
    pub const ACCEPT: &str = "Accept";
    pub const CONTENT_TYPE: &str = "Content-Type";
}

/// Request methods supported by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Response content types the engine recognizes. JSON is the only structured
/// format that is decoded; everything else is handed back as raw bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MimeType {
    Html,
    Json,
    Pdf,
}

impl MimeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MimeType::Html => "text/html",
            MimeType::Json => "application/json",
            MimeType::Pdf => "application/pdf",
        }
    }

    /// Parses a `Content-Type` value, ignoring parameters such as `charset`.
    pub fn parse(raw: &str) -> Option<Self> {
        let essence = raw.split(';').next().unwrap_or(raw).trim();
        match essence.to_ascii_lowercase().as_str() {
            "text/html" => Some(MimeType::Html),
            "application/json" => Some(MimeType::Json),
            "application/pdf" => Some(MimeType::Pdf),
            _ => None,
        }
    }
}

impl fmt::Display for MimeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
