//! Typed payloads for structured frames.
//!
//! Structured payloads are MessagePack maps encoded with
//! [`MsgPackCodec`](crate::codec::MsgPackCodec). Raw payloads (`DATA`,
//! `WRITE`, `SPECIAL`, `MULTI_GET`) are passed through untouched.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::ErrorCode;

/// String key/value metadata exchanged alongside jobs.
pub type MetaData = BTreeMap<String, String>;

/// `HOST`: the identity a worker should talk to next.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostArgs {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub passwd: String,
}

/// `PUT` arguments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PutArgs {
    pub url: Url,
    pub permissions: Option<u32>,
    pub overwrite: bool,
    pub resume: bool,
}

/// `MKDIR` arguments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MkdirArgs {
    pub url: Url,
    pub permissions: Option<u32>,
}

/// `RENAME` arguments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenameArgs {
    pub src: Url,
    pub dest: Url,
    pub overwrite: bool,
}

/// `SYMLINK` arguments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymlinkArgs {
    pub target: String,
    pub dest: Url,
    pub overwrite: bool,
}

/// `COPY` arguments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CopyArgs {
    pub src: Url,
    pub dest: Url,
    pub permissions: Option<u32>,
    pub overwrite: bool,
}

/// `DEL` arguments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelArgs {
    pub url: Url,
    pub is_file: bool,
}

/// `CHMOD` arguments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChmodArgs {
    pub url: Url,
    pub permissions: u32,
}

/// `CHOWN` arguments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChownArgs {
    pub url: Url,
    pub owner: String,
    pub group: String,
}

/// Access mode requested by `OPEN`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OpenMode {
    Read,
    Write,
    ReadWrite,
    Append,
}

/// `OPEN` arguments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenArgs {
    pub url: Url,
    pub mode: OpenMode,
}

/// `MSG_ERROR` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub code: ErrorCode,
    pub text: String,
}

/// `MSG_SLAVE_STATUS` payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlaveStatus {
    pub pid: u32,
    pub protocol: String,
    pub host: String,
    pub connected: bool,
}

/// Kind of question a worker asks through `INF_MESSAGEBOX`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageBoxKind {
    QuestionYesNo,
    WarningYesNo,
    WarningContinueCancel,
    WarningYesNoCancel,
    Information,
    SslMessageBox,
}

/// `INF_MESSAGEBOX` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageBoxRequest {
    pub kind: MessageBoxKind,
    pub text: String,
    pub caption: String,
    pub button_yes: String,
    pub button_no: String,
    pub dont_ask_again: String,
}

/// `MSG_AUTH_KEY` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthKeyPayload {
    pub key: String,
    pub group: String,
    pub keep: bool,
}

/// Well-known [`UdsEntry`] field ids.
pub mod uds {
    pub const SIZE: u32 = 1;
    pub const USER: u32 = 2;
    pub const ICON_NAME: u32 = 3;
    pub const GROUP: u32 = 4;
    pub const NAME: u32 = 5;
    pub const LOCAL_PATH: u32 = 6;
    pub const HIDDEN: u32 = 7;
    pub const ACCESS: u32 = 8;
    pub const MODIFICATION_TIME: u32 = 9;
    pub const ACCESS_TIME: u32 = 10;
    pub const CREATION_TIME: u32 = 11;
    pub const FILE_TYPE: u32 = 12;
    pub const LINK_DEST: u32 = 13;
    pub const URL: u32 = 14;
    pub const MIME_TYPE: u32 = 15;
    pub const GUESSED_MIME_TYPE: u32 = 16;
}

/// A single value in a [`UdsEntry`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum UdsValue {
    Number(i64),
    Text(String),
}

/// One stat/list result: a sparse map of field id to value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UdsEntry {
    fields: BTreeMap<u32, UdsValue>,
}

impl UdsEntry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_number(&mut self, field: u32, value: i64) {
        self.fields.insert(field, UdsValue::Number(value));
    }

    pub fn insert_text(&mut self, field: u32, value: impl Into<String>) {
        self.fields.insert(field, UdsValue::Text(value.into()));
    }

    pub fn number(&self, field: u32) -> Option<i64> {
        match self.fields.get(&field) {
            Some(UdsValue::Number(n)) => Some(*n),
            _ => None,
        }
    }

    pub fn text(&self, field: u32) -> Option<&str> {
        match self.fields.get(&field) {
            Some(UdsValue::Text(s)) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn name(&self) -> Option<&str> {
        self.text(uds::NAME)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::MsgPackCodec;

    #[test]
    fn test_uds_entry_accessors() {
        let mut entry = UdsEntry::new();
        entry.insert_text(uds::NAME, "readme.txt");
        entry.insert_number(uds::SIZE, 1234);

        assert_eq!(entry.name(), Some("readme.txt"));
        assert_eq!(entry.number(uds::SIZE), Some(1234));
        assert_eq!(entry.text(uds::SIZE), None);
        assert_eq!(entry.number(uds::USER), None);
        assert_eq!(entry.len(), 2);
    }

    #[test]
    fn test_put_args_carry_url() {
        let args = PutArgs {
            url: Url::parse("ftp://user@example.org:2121/upload.bin").unwrap(),
            permissions: Some(0o644),
            overwrite: true,
            resume: false,
        };
        let bytes = MsgPackCodec::encode(&args).unwrap();
        let decoded: PutArgs = MsgPackCodec::decode(&bytes).unwrap();

        assert_eq!(decoded.url.port(), Some(2121));
        assert_eq!(decoded.url.username(), "user");
        assert_eq!(decoded, args);
    }

    #[test]
    fn test_error_payload_code_is_plain_integer() {
        let payload = ErrorPayload {
            code: ErrorCode::UNSUPPORTED_ACTION,
            text: "nope".into(),
        };
        let bytes = MsgPackCodec::encode(&payload).unwrap();

        let value: serde_json::Value = rmp_serde::from_slice(&bytes).unwrap();
        assert_eq!(value["code"], 108);
    }
}
