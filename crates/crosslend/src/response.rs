//! result envelope handed to the routing layer

use crate::error::{Error, ErrorKind};
use serde::Serialize;

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Response<T> {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    /// set on failure; the router maps it to a status code
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorKind>,
}

impl<T> Response<T> {
    pub fn ok(message: impl Into<String>, data: T) -> Self {
        Self {
            success: true,
            message: message.into(),
            data: Some(data),
            error: None,
        }
    }

    pub fn err(error: &Error) -> Self {
        Self {
            success: false,
            message: error.to_string(),
            data: None,
            error: Some(error.kind()),
        }
    }

    pub fn from_result(result: crate::Result<T>, message: impl Into<String>) -> Self {
        match result {
            Ok(data) => Self::ok(message, data),
            Err(e) => Self::err(&e),
        }
    }
}
