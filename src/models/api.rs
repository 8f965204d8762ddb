//! Typed request and response bodies for the JSON endpoints.
//!
//! Every non-binary response is wrapped in [`ApiResponse`], whose `code` is
//! `0` on success and one of the [`crate::errors::AppError`] codes otherwise.

use serde::{Deserialize, Serialize};

pub const SUCCESS_CODE: i32 = 0;

/// The `{code, message, data}` envelope.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ApiResponse<T> {
    pub code: i32,
    pub message: String,
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self::with_message(data, "success")
    }

    pub fn with_message(data: T, message: impl Into<String>) -> Self {
        Self {
            code: SUCCESS_CODE,
            message: message.into(),
            data: Some(data),
        }
    }
}

/// `POST /checkToken`
#[derive(Deserialize, Debug, Default)]
pub struct CheckTokenReq {
    pub token: Option<String>,
}

/// `POST /list`
#[derive(Deserialize, Debug, Default)]
pub struct ListReq {
    pub limit: Option<i64>,
    pub cursor: Option<String>,
    pub delimiter: Option<String>,
}

/// `POST /folder`
#[derive(Deserialize, Debug)]
pub struct FolderReq {
    pub name: String,
}

/// `DELETE /`: keys arrive as one comma separated string.
#[derive(Deserialize, Debug, Default)]
pub struct DeleteReq {
    pub keys: Option<String>,
}

/// A stored image as exposed to clients.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ImageItem {
    /// Path relative to this gateway (`/rest/<key>`).
    pub url: String,
    /// Public base URL joined with the key.
    pub external_url: String,
    pub key: String,
    pub size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ListPageResponse {
    pub items: Vec<ImageItem>,
    pub truncated: bool,
    pub cursor: Option<String>,
    pub prefixes: Vec<String>,
}

/// Result of a batch upload. `accepted` and `errors` are independent lists,
/// each in input order.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct UploadResult {
    pub accepted: Vec<ImageItem>,
    pub errors: Vec<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct DeleteResult {
    pub deleted: Vec<String>,
    pub errors: Vec<String>,
}
