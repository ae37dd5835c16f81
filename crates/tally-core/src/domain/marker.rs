//! QueryMarker - 継続トークン（opaque な cursor の外部表現）
//!
//! Storage が返す cursor（バイト列）を、URL に載せられる文字列へ変換します。
//!
//! # 形式
//! `base64url(TAG || cursor bytes)`（padding なし）
//!
//! - TAG は 1 バイト。自分が発行したトークンかどうかの判定にだけ使う
//! - cursor の中身はここでは解釈しない（Storage 実装の責務）

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

const MARKER_TAG: u8 = 0xC5;

/// Storage-native position in a query result stream.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Cursor(Vec<u8>);

impl Cursor {
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn is_start(&self) -> bool {
        self.0.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MarkerError {
    #[error("cursor token is not valid base64: {0}")]
    Malformed(#[from] base64::DecodeError),

    #[error("cursor token was not issued by this service")]
    Foreign,
}

/// Opaque continuation token handed to callers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryMarker {
    cursor: Cursor,
}

impl QueryMarker {
    pub fn new(cursor: Cursor) -> Self {
        Self { cursor }
    }

    pub fn cursor(&self) -> &Cursor {
        &self.cursor
    }

    pub fn into_cursor(self) -> Cursor {
        self.cursor
    }

    pub fn encode(&self) -> String {
        let mut buf = Vec::with_capacity(self.cursor.0.len() + 1);
        buf.push(MARKER_TAG);
        buf.extend_from_slice(&self.cursor.0);
        URL_SAFE_NO_PAD.encode(buf)
    }

    pub fn decode(token: &str) -> Result<Self, MarkerError> {
        let bytes = URL_SAFE_NO_PAD.decode(token.trim())?;
        match bytes.split_first() {
            Some((&MARKER_TAG, rest)) => Ok(Self::new(Cursor::from_bytes(rest))),
            _ => Err(MarkerError::Foreign),
        }
    }
}

impl fmt::Display for QueryMarker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

impl FromStr for QueryMarker {
    type Err = MarkerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::decode(s)
    }
}

impl Serialize for QueryMarker {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.encode())
    }
}

impl<'de> Deserialize<'de> for QueryMarker {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let token = String::deserialize(deserializer)?;
        Self::decode(&token).map_err(serde::de::Error::custom)
    }
}
