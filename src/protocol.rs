use serde::Serialize;
use serde_json::Value;

use crate::lobby::LobbyStatus;
use crate::types::{
    CinematicKind, ClientId, ColorIdentity, EntityId, FadeDirection, MatchSummary, PhaseEffects,
    Role, SessionPhase, SlotTransform,
};

/// What a connection said it is in its hello. Only the engine collaborator
/// may report gameplay triggers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionKind {
    Player,
    Engine,
}

impl ConnectionKind {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "player" => Some(Self::Player),
            "engine" => Some(Self::Engine),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ParsedClientMessage {
    Hello {
        name: String,
        kind: ConnectionKind,
        token: Option<String>,
    },
    Ready,
    FadeComplete,
    SceneLoaded { scene: String },
    RequestPhase { phase: SessionPhase },
    Ping { t: f64 },
    CenterEnter { entity: EntityId },
    CenterExit { entity: EntityId },
    Died { entity: EntityId },
    Fell { entity: EntityId },
}

impl ParsedClientMessage {
    pub fn is_gameplay_trigger(&self) -> bool {
        matches!(
            self,
            Self::CenterEnter { .. } | Self::CenterExit { .. } | Self::Died { .. } | Self::Fell { .. }
        )
    }
}

pub fn parse_client_message(raw: &str) -> Option<ParsedClientMessage> {
    let value: Value = serde_json::from_str(raw).ok()?;
    let object = value.as_object()?;
    let message_type = object.get("type")?.as_str()?;

    match message_type {
        "hello" => {
            let name = object.get("name")?.as_str()?.to_string();
            let kind = match object.get("kind") {
                None => ConnectionKind::Player,
                Some(value) => ConnectionKind::parse(value.as_str()?)?,
            };
            let token = match object.get("token") {
                None | Some(Value::Null) => None,
                Some(value) => Some(value.as_str()?.to_string()),
            };
            Some(ParsedClientMessage::Hello { name, kind, token })
        }
        "ready" => Some(ParsedClientMessage::Ready),
        "fade_complete" => Some(ParsedClientMessage::FadeComplete),
        "scene_loaded" => {
            let scene = object.get("scene")?.as_str()?.to_string();
            Some(ParsedClientMessage::SceneLoaded { scene })
        }
        "request_phase" => {
            let phase = SessionPhase::parse(object.get("phase")?.as_str()?)?;
            Some(ParsedClientMessage::RequestPhase { phase })
        }
        "ping" => {
            let t = object.get("t")?.as_f64()?;
            if !t.is_finite() {
                return None;
            }
            Some(ParsedClientMessage::Ping { t })
        }
        "center_enter" => Some(ParsedClientMessage::CenterEnter {
            entity: parse_entity(object.get("entity"))?,
        }),
        "center_exit" => Some(ParsedClientMessage::CenterExit {
            entity: parse_entity(object.get("entity"))?,
        }),
        "died" => Some(ParsedClientMessage::Died {
            entity: parse_entity(object.get("entity"))?,
        }),
        "fell" => Some(ParsedClientMessage::Fell {
            entity: parse_entity(object.get("entity"))?,
        }),
        _ => None,
    }
}

fn parse_entity(value: Option<&Value>) -> Option<EntityId> {
    value?.as_u64()
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Welcome {
        #[serde(rename = "clientId")]
        client_id: ClientId,
        kind: ConnectionKind,
        phase: SessionPhase,
        #[serde(rename = "loadedScene")]
        loaded_scene: Option<&'static str>,
    },
    Lobby {
        status: LobbyStatus,
    },
    Phase {
        phase: SessionPhase,
        effects: PhaseEffects,
        version: u64,
    },
    Transition {
        scene: &'static str,
    },
    Fade {
        direction: FadeDirection,
    },
    Spawned {
        #[serde(rename = "clientId")]
        client_id: ClientId,
        #[serde(rename = "entityId")]
        entity_id: Option<EntityId>,
        spawn: SlotTransform,
        respawn: bool,
    },
    Role {
        role: Role,
    },
    PlayerColor {
        #[serde(rename = "clientId")]
        client_id: ClientId,
        color: ColorIdentity,
    },
    Cinematic {
        kind: CinematicKind,
        #[serde(rename = "focalPoint")]
        focal_point: SlotTransform,
    },
    MatchEnd {
        summary: MatchSummary,
        version: u64,
    },
    /// The previous result was cleared for the next match.
    MatchReset {
        version: u64,
    },
    Pong {
        t: f64,
    },
    Error {
        message: String,
    },
}

impl ServerMessage {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            r#"{"type":"error","message":"failed to encode message"}"#.to_string()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_hello_defaults_to_player() {
        let parsed = parse_client_message(r#"{"type":"hello","name":"A"}"#)
            .expect("hello message should parse");
        match parsed {
            ParsedClientMessage::Hello { name, kind, token } => {
                assert_eq!(name, "A");
                assert_eq!(kind, ConnectionKind::Player);
                assert_eq!(token, None);
            }
            _ => panic!("expected hello message"),
        }
    }

    #[test]
    fn parse_hello_engine_kind() {
        let parsed = parse_client_message(r#"{"type":"hello","name":"unity","kind":"engine"}"#);
        assert!(matches!(
            parsed,
            Some(ParsedClientMessage::Hello {
                kind: ConnectionKind::Engine,
                ..
            })
        ));
    }

    #[test]
    fn parse_hello_carries_engine_token() {
        let parsed =
            parse_client_message(r#"{"type":"hello","name":"unity","kind":"engine","token":"s3cret"}"#);
        assert!(matches!(
            parsed,
            Some(ParsedClientMessage::Hello { token: Some(ref token), .. }) if token == "s3cret"
        ));
        assert!(parse_client_message(r#"{"type":"hello","name":"A","token":7}"#).is_none());
    }

    #[test]
    fn parse_hello_rejects_unknown_kind() {
        let parsed = parse_client_message(r#"{"type":"hello","name":"A","kind":"admin"}"#);
        assert!(parsed.is_none());
    }

    #[test]
    fn parse_scene_loaded_requires_scene() {
        assert!(parse_client_message(r#"{"type":"scene_loaded"}"#).is_none());
        assert_eq!(
            parse_client_message(r#"{"type":"scene_loaded","scene":"GameScene"}"#),
            Some(ParsedClientMessage::SceneLoaded {
                scene: "GameScene".to_string()
            })
        );
    }

    #[test]
    fn parse_request_phase_message() {
        assert_eq!(
            parse_client_message(r#"{"type":"request_phase","phase":"end"}"#),
            Some(ParsedClientMessage::RequestPhase {
                phase: SessionPhase::End
            })
        );
        assert!(parse_client_message(r#"{"type":"request_phase","phase":"credits"}"#).is_none());
    }

    #[test]
    fn parse_ping_requires_finite_number() {
        let parsed = parse_client_message(r#"{"type":"ping","t":12.5}"#);
        assert!(matches!(parsed, Some(ParsedClientMessage::Ping { .. })));
        assert!(parse_client_message(r#"{"type":"ping","t":"soon"}"#).is_none());
    }

    #[test]
    fn parse_gameplay_triggers() {
        let parsed = parse_client_message(r#"{"type":"center_enter","entity":7}"#)
            .expect("trigger should parse");
        assert_eq!(parsed, ParsedClientMessage::CenterEnter { entity: 7 });
        assert!(parsed.is_gameplay_trigger());

        assert_eq!(
            parse_client_message(r#"{"type":"fell","entity":3}"#),
            Some(ParsedClientMessage::Fell { entity: 3 })
        );
        assert!(!ParsedClientMessage::Ready.is_gameplay_trigger());
    }

    #[test]
    fn parse_trigger_rejects_bad_entity() {
        assert!(parse_client_message(r#"{"type":"died","entity":-1}"#).is_none());
        assert!(parse_client_message(r#"{"type":"died","entity":1.5}"#).is_none());
        assert!(parse_client_message(r#"{"type":"died"}"#).is_none());
    }

    #[test]
    fn unknown_type_is_rejected() {
        assert!(parse_client_message(r#"{"type":"teleport"}"#).is_none());
        assert!(parse_client_message("not json").is_none());
    }

    #[test]
    fn server_messages_are_tagged_by_type() {
        let value: Value = serde_json::from_str(
            &ServerMessage::Fade {
                direction: FadeDirection::In,
            }
            .to_json(),
        )
        .expect("valid json");
        assert_eq!(value["type"], "fade");
        assert_eq!(value["direction"], "in");

        let value: Value = serde_json::from_str(
            &ServerMessage::PlayerColor {
                client_id: 4,
                color: ColorIdentity {
                    id: "red".to_string(),
                    rgba: [1.0, 0.0, 0.0, 1.0],
                    intensity: 2.0,
                    mesh_variant: crate::types::MeshVariant::Cube,
                },
            }
            .to_json(),
        )
        .expect("valid json");
        assert_eq!(value["type"], "player_color");
        assert_eq!(value["clientId"], 4);
        assert_eq!(value["color"]["meshVariant"], "cube");
    }
}
