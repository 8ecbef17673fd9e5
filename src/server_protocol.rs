use serde_json::Value;

/// Commands a client sends over the room websocket.
#[derive(Debug, PartialEq)]
pub enum ParsedClientMessage {
    Create {
        player_id: String,
        name: String,
    },
    Join {
        code: String,
        player_id: String,
        name: String,
    },
    Start,
    RoundWin {
        time_ms: u64,
    },
    LifeLoss {
        winner_id: Option<String>,
    },
    Progress {
        value: f64,
    },
    Power {
        kind: String,
    },
    Reset,
    Leave,
    Ping {
        t: f64,
    },
}

pub fn parse_client_message(raw: &str) -> Option<ParsedClientMessage> {
    let value: Value = serde_json::from_str(raw).ok()?;
    let object = value.as_object()?;
    let message_type = object.get("type")?.as_str()?;

    match message_type {
        "create" => Some(ParsedClientMessage::Create {
            player_id: object.get("playerId")?.as_str()?.to_string(),
            name: object.get("name")?.as_str()?.to_string(),
        }),
        "join" => Some(ParsedClientMessage::Join {
            code: object.get("code")?.as_str()?.to_string(),
            player_id: object.get("playerId")?.as_str()?.to_string(),
            name: object.get("name")?.as_str()?.to_string(),
        }),
        "start" => Some(ParsedClientMessage::Start),
        "round_win" => {
            let time_ms = parse_optional_u64(object.get("timeMs"))??;
            Some(ParsedClientMessage::RoundWin { time_ms })
        }
        "life_loss" => {
            let winner_id = match object.get("winnerId") {
                None | Some(Value::Null) => None,
                Some(value) => Some(value.as_str()?.to_string()),
            };
            Some(ParsedClientMessage::LifeLoss { winner_id })
        }
        "progress" => {
            let value = object.get("value")?.as_f64()?;
            if !value.is_finite() {
                return None;
            }
            Some(ParsedClientMessage::Progress { value })
        }
        "power" => Some(ParsedClientMessage::Power {
            kind: object.get("power")?.as_str()?.to_string(),
        }),
        "reset" => Some(ParsedClientMessage::Reset),
        "leave" => Some(ParsedClientMessage::Leave),
        "ping" => {
            let t = object.get("t")?.as_f64()?;
            if !t.is_finite() {
                return None;
            }
            Some(ParsedClientMessage::Ping { t })
        }
        _ => None,
    }
}

/// Accepts integers and non-negative finite floats (floored). `Some(None)`
/// means the field was absent.
fn parse_optional_u64(value: Option<&Value>) -> Option<Option<u64>> {
    const MAX_SAFE_INTEGER_F64: f64 = 9_007_199_254_740_991.0;

    let Some(value) = value else {
        return Some(None);
    };
    if let Some(number) = value.as_u64() {
        return Some(Some(number));
    }
    if let Some(number) = value.as_f64() {
        if number.is_finite() && number >= 0.0 {
            let floored = number.floor();
            if floored > MAX_SAFE_INTEGER_F64 {
                return None;
            }
            return Some(Some(floored as u64));
        }
    }
    None
}
