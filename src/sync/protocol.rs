//! Wire messages between the canonical-state server and viewing clients.
//!
//! Every message is a JSON object tagged by `"type"`, one message per line.

use serde::{Deserialize, Serialize};

use crate::color::Palette;
use crate::heightfield::SeedPoint;

/// Errors from encoding or decoding a protocol line.
#[derive(Debug)]
pub enum ProtocolError {
    Decode(String),
    Encode(String),
}

impl std::fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProtocolError::Decode(msg) => write!(f, "Undecodable message: {}", msg),
            ProtocolError::Encode(msg) => write!(f, "Failed to encode message: {}", msg),
        }
    }
}

impl std::error::Error for ProtocolError {}

/// Lightweight frequent tick carrying only the derived seed.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeedTick {
    pub shared_seed: u32,
}

/// Periodic authoritative snapshot of the canonical scalars.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Checkpoint {
    pub global_time: f64,
    /// In [0, 1)
    pub color_shift: f64,
    pub shared_seed: u32,
    #[serde(default = "default_true")]
    pub is_sync_checkpoint: bool,
    /// Clients run one micro-evolution step when set
    #[serde(default)]
    pub micro_evolve: bool,
}

fn default_true() -> bool {
    true
}

/// Complete session configuration, sent on demand and after every edit.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FullState {
    pub seed_points: Vec<SeedPoint>,
    pub evolve_speed: u32,
    pub roughness: f32,
    pub palette: Palette,
    pub terrain_seed: u64,
}

/// Partial option edit; absent fields are left unchanged.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptionUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub roughness: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub palette: Option<Palette>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evolve_speed: Option<u32>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerMessage {
    SeedTick(SeedTick),
    Checkpoint(Checkpoint),
    FullState(FullState),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientMessage {
    AddSeed { x: f32, y: f32, value: f32 },
    UpdateOption(OptionUpdate),
    SetEvolveSpeed { n: u32 },
    RequestFullState,
}

/// Serialize one message as a single JSON line without the trailing newline.
pub fn encode_line<T: Serialize>(message: &T) -> Result<String, ProtocolError> {
    serde_json::to_string(message).map_err(|e| ProtocolError::Encode(e.to_string()))
}

/// Parse one JSON line. Surrounding whitespace is ignored.
pub fn decode_line<T: for<'de> Deserialize<'de>>(line: &str) -> Result<T, ProtocolError> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Err(ProtocolError::Decode("empty line".to_string()));
    }
    serde_json::from_str(trimmed).map_err(|e| ProtocolError::Decode(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checkpoint_json_shape() {
        let msg = ServerMessage::Checkpoint(Checkpoint {
            global_time: 12.5,
            color_shift: 0.25,
            shared_seed: 7,
            is_sync_checkpoint: true,
            micro_evolve: false,
        });
        let value: serde_json::Value = serde_json::from_str(&encode_line(&msg).unwrap()).unwrap();
        assert_eq!(value["type"], "checkpoint");
        assert_eq!(value["globalTime"], 12.5);
        assert_eq!(value["colorShift"], 0.25);
        assert_eq!(value["sharedSeed"], 7);
        assert_eq!(value["isSyncCheckpoint"], true);
        assert_eq!(value["microEvolve"], false);
    }

    #[test]
    fn test_decodes_seed_tick() {
        let msg: ServerMessage = decode_line(r#"{"type":"seedTick","sharedSeed":42}"#).unwrap();
        assert_eq!(msg, ServerMessage::SeedTick(SeedTick { shared_seed: 42 }));
    }

    #[test]
    fn test_full_state_round_trip() {
        let msg = ServerMessage::FullState(FullState {
            seed_points: vec![SeedPoint::new(0.5, 0.25, 1.0)],
            evolve_speed: 3,
            roughness: 0.6,
            palette: Palette::Ocean,
            terrain_seed: 99,
        });
        let line = encode_line(&msg).unwrap();
        assert!(line.contains(r#""seedPoints":[{"x":0.5,"y":0.25,"value":1.0}]"#));
        assert!(line.contains(r#""palette":"ocean""#));
        assert_eq!(decode_line::<ServerMessage>(&line).unwrap(), msg);
    }

    #[test]
    fn test_client_messages_decode() {
        let add: ClientMessage = decode_line(r#"{"type":"addSeed","x":0.1,"y":0.2,"value":0.9}"#).unwrap();
        assert_eq!(add, ClientMessage::AddSeed { x: 0.1, y: 0.2, value: 0.9 });

        let speed: ClientMessage = decode_line(r#"{"type":"setEvolveSpeed","n":5}"#).unwrap();
        assert_eq!(speed, ClientMessage::SetEvolveSpeed { n: 5 });

        let partial: ClientMessage = decode_line(r#"{"type":"updateOption","palette":"ember"}"#).unwrap();
        assert_eq!(
            partial,
            ClientMessage::UpdateOption(OptionUpdate {
                palette: Some(Palette::Ember),
                ..OptionUpdate::default()
            })
        );

        let request: ClientMessage = decode_line("{\"type\":\"requestFullState\"}\n").unwrap();
        assert_eq!(request, ClientMessage::RequestFullState);
    }

    #[test]
    fn test_rejects_unknown_and_malformed() {
        assert!(matches!(
            decode_line::<ServerMessage>(r#"{"type":"teleport","x":1}"#),
            Err(ProtocolError::Decode(_))
        ));
        assert!(matches!(decode_line::<ServerMessage>("{not json"), Err(ProtocolError::Decode(_))));
        assert!(matches!(decode_line::<ClientMessage>("   "), Err(ProtocolError::Decode(_))));
    }

    #[test]
    fn test_checkpoint_flags_default() {
        let msg: ServerMessage =
            decode_line(r#"{"type":"checkpoint","globalTime":1.0,"colorShift":0.5,"sharedSeed":3}"#).unwrap();
        match msg {
            ServerMessage::Checkpoint(c) => {
                assert!(c.is_sync_checkpoint);
                assert!(!c.micro_evolve);
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
