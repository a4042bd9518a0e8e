use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};
use clap::ValueEnum;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Lower bound (inclusive) of randomly drawn command ids.
///
/// Zero is excluded because the bulb echoes `id: 0` the same way as an
/// unsolicited notification.
pub const MIN_RANDOM_ID: u32 = 1;
/// Upper bound (exclusive) of randomly drawn command ids.
pub const MAX_RANDOM_ID: u32 = 9999;

const FRAME_TERMINATOR: &[u8] = b"\r\n";

/// Methods understood by the bulb firmware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum Method {
    GetProp,
    SetRgb,
    SetHsv,
    SetBright,
    SetPower,
    Toggle,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::GetProp => "get_prop",
            Method::SetRgb => "set_rgb",
            Method::SetHsv => "set_hsv",
            Method::SetBright => "set_bright",
            Method::SetPower => "set_power",
            Method::Toggle => "toggle",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single positional parameter of a command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Param {
    Int(i64),
    Str(String),
    Bool(bool),
}

impl From<i64> for Param {
    fn from(value: i64) -> Self {
        Param::Int(value)
    }
}

impl From<u32> for Param {
    fn from(value: u32) -> Self {
        Param::Int(i64::from(value))
    }
}

impl From<u16> for Param {
    fn from(value: u16) -> Self {
        Param::Int(i64::from(value))
    }
}

impl From<u8> for Param {
    fn from(value: u8) -> Self {
        Param::Int(i64::from(value))
    }
}

impl From<&str> for Param {
    fn from(value: &str) -> Self {
        Param::Str(value.to_string())
    }
}

impl From<String> for Param {
    fn from(value: String) -> Self {
        Param::Str(value)
    }
}

impl From<bool> for Param {
    fn from(value: bool) -> Self {
        Param::Bool(value)
    }
}

/// Source of command ids.
pub trait IdSource: Send + Sync {
    fn next_id(&mut self) -> u32;
}

/// Draws ids uniformly from `[MIN_RANDOM_ID, MAX_RANDOM_ID)`.
///
/// Two commands may get the same id. Callers that correlate responses
/// strictly should pass explicit ids or use [`SequentialIds`].
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomIds;

impl IdSource for RandomIds {
    fn next_id(&mut self) -> u32 {
        rand::thread_rng().gen_range(MIN_RANDOM_ID..MAX_RANDOM_ID)
    }
}

/// Deterministic, increasing ids starting from a given value.
#[derive(Debug, Clone)]
pub struct SequentialIds {
    next: u32,
}

impl SequentialIds {
    pub fn starting_at(first: u32) -> Self {
        SequentialIds { next: first }
    }
}

impl IdSource for SequentialIds {
    fn next_id(&mut self) -> u32 {
        let id = self.next;
        self.next = self.next.wrapping_add(1);
        id
    }
}

/// A request to the bulb.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Command {
    pub id: u32,
    pub method: Method,
    pub params: Vec<Param>,
}

impl Command {
    pub fn new(method: Method, params: Vec<Param>, id: u32) -> Self {
        Command { id, method, params }
    }

    /// Builds a command, drawing an id from `ids` when none is given.
    ///
    /// Parameters are passed through untouched; range checks belong to the
    /// typed helpers on [`crate::device::Device`].
    pub fn build(
        method: Method,
        params: Vec<Param>,
        id: Option<u32>,
        ids: &mut dyn IdSource,
    ) -> Self {
        let id = id.unwrap_or_else(|| ids.next_id());
        Command::new(method, params, id)
    }

    /// Serializes the command into a single CRLF terminated wire frame.
    pub fn encode(&self) -> Result<Bytes> {
        let json = serde_json::to_vec(self).map_err(Error::Encoding)?;
        let mut frame = BytesMut::with_capacity(json.len() + FRAME_TERMINATOR.len());
        frame.put_slice(&json);
        frame.put_slice(FRAME_TERMINATOR);
        Ok(frame.freeze())
    }
}
