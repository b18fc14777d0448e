//! Control protocol: one JSON request per line over the local socket,
//! one JSON response per line back.

use serde::{Deserialize, Serialize};

use crate::codec::Position;

fn one() -> u32 {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    Walk {
        direction: String,
        #[serde(default = "one")]
        steps: u32,
    },
    Turn {
        direction: String,
    },
    Say {
        text: String,
    },
    Attack {
        creature_id: u32,
    },
    Follow {
        creature_id: u32,
    },
    StopWalk,
    Ping,
    UseItem {
        pos: Position,
        item_id: u16,
        #[serde(default)]
        stack_pos: u8,
        #[serde(default)]
        index: u8,
    },
    MoveItem {
        from: Position,
        item_id: u16,
        #[serde(default)]
        stack_pos: u8,
        to: Position,
        #[serde(default = "one_u8")]
        count: u8,
    },
    LookAt {
        pos: Position,
        item_id: u16,
        #[serde(default)]
        stack_pos: u8,
    },
    SetFightModes {
        fight: u8,
        chase: u8,
        safe: u8,
    },
    Logout,
    ToggleAction {
        name: String,
        enabled: bool,
    },
    RestartAction {
        name: String,
    },
    ListActions,
    StartRecording {
        name: String,
    },
    StopRecording {
        #[serde(default)]
        discard: bool,
    },
    PlayRecording {
        name: String,
        #[serde(default, rename = "loop")]
        looped: bool,
    },
    StopPlayback,
    ListRecordings,
    DeleteRecording {
        name: String,
    },
    GetStatus,
}

fn one_u8() -> u8 {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Response {
    pub fn ok(result: serde_json::Value) -> Self {
        Self {
            success: true,
            result: Some(result),
            error: None,
        }
    }

    pub fn ok_empty() -> Self {
        Self {
            success: true,
            result: None,
            error: None,
        }
    }

    pub fn err(message: impl Into<String>) -> Self {
        Self {
            success: false,
            result: None,
            error: Some(message.into()),
        }
    }
}
