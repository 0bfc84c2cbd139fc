use serde::{Deserialize, Deserializer, Serialize};

use crate::library::{PlaylistPage, SearchKind, SearchResults};
use crate::playback::{PlaybackView, TransportAction};

/// Current protocol version.  Bump this when the wire format changes in a
/// breaking way.  Sent to the host in `Hello` on connect.
pub const PROTOCOL_VERSION: u32 = 1;

/// Largest frame body either side may send.
pub const MAX_FRAME_LEN: usize = 1024 * 1024;

/// One key as the host describes it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HostKey {
    #[serde(deserialize_with = "uid_from_string_or_number")]
    pub uid: String,
    pub cid: String,
    #[serde(default)]
    pub width: Option<u32>,
    /// Saved per-key preferences, owned and persisted by the host.
    #[serde(default)]
    pub data: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeviceInfo {
    #[serde(deserialize_with = "uid_from_string_or_number")]
    pub serial_number: String,
}

/// A press (or other gesture) on a key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Interaction {
    /// Gesture name as reported by the host, e.g. "click".
    pub evt: String,
    #[serde(default)]
    pub state: Option<i64>,
}

impl Interaction {
    pub fn is_click(&self) -> bool {
        self.evt == "click"
    }
}

/// Requests from the host's settings UI.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum UiRequest {
    GetPlayback,
    Control {
        action: TransportAction,
    },
    Refresh,
    /// The user's playlists, one page at a time.
    Playlists {
        #[serde(default)]
        limit: Option<u32>,
        #[serde(default)]
        offset: Option<u32>,
    },
    Search {
        #[serde(default)]
        query: String,
        /// Empty means the default kinds.
        #[serde(default)]
        types: Vec<SearchKind>,
        #[serde(default)]
        limit: Option<u32>,
        #[serde(default)]
        offset: Option<u32>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum UiResponse {
    Playback {
        playback: PlaybackView,
    },
    Playlists {
        playlists: PlaylistPage,
    },
    Search {
        results: SearchResults,
    },
    Ok {
        message: String,
    },
    Error {
        message: String,
        #[serde(default)]
        needs_auth: bool,
    },
}

/// Messages sent from the host runtime to the plugin.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event")]
pub enum HostEvent {
    /// The full set of keys currently assigned to this plugin on a device.
    KeysPresent {
        device_id: String,
        keys: Vec<HostKey>,
    },
    KeyInteraction {
        device_id: String,
        key: HostKey,
        interaction: Interaction,
    },
    /// The full list of connected devices.
    DeviceStatus { devices: Vec<DeviceInfo> },
    /// A draw command could not be applied.
    DrawFailed {
        device_id: String,
        key_uid: String,
        error: String,
    },
    UiRequest {
        request_id: u64,
        request: UiRequest,
    },
}

/// Messages sent from the plugin to the host runtime.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "cmd")]
pub enum PluginCommand {
    Hello {
        protocol_version: u32,
    },
    /// `image` is a `data:image/png;base64,...` URL.
    DrawImage {
        device_id: String,
        key_uid: String,
        image: String,
    },
    DrawText {
        device_id: String,
        key_uid: String,
        text: String,
    },
    UiResponse {
        request_id: u64,
        response: UiResponse,
    },
    /// WARN/ERROR log lines forwarded to the host's log view.
    Log {
        level: String,
        message: String,
    },
}

impl PluginCommand {
    /// The (device, key) this command draws to, if it is a draw.
    pub fn draw_target(&self) -> Option<(&str, &str)> {
        match self {
            Self::DrawImage {
                device_id, key_uid, ..
            }
            | Self::DrawText {
                device_id, key_uid, ..
            } => Some((device_id, key_uid)),
            _ => None,
        }
    }
}

/// Wrapper for socket communication
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Message {
    Host(HostEvent),
    Plugin(PluginCommand),
}

impl Message {
    /// Body length announced by the header at the start of `data`, once
    /// the header has arrived.
    pub fn declared_len(data: &[u8]) -> Option<usize> {
        let header: [u8; 4] = data.get(..4)?.try_into().ok()?;
        Some(u32::from_be_bytes(header) as usize)
    }

    pub fn encode(&self) -> anyhow::Result<Vec<u8>> {
        let json = serde_json::to_vec(self)?;
        let len = json.len() as u32;
        let mut result = Vec::with_capacity(4 + json.len());
        result.extend_from_slice(&len.to_be_bytes());
        result.extend_from_slice(&json);
        Ok(result)
    }

    pub fn decode(data: &[u8]) -> anyhow::Result<(Self, usize)> {
        if data.len() < 4 {
            anyhow::bail!("Insufficient data for length header");
        }
        let len = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as usize;
        if len > MAX_FRAME_LEN {
            anyhow::bail!("Frame of {} bytes exceeds the {} byte limit", len, MAX_FRAME_LEN);
        }
        if data.len() < 4 + len {
            anyhow::bail!("Insufficient data for message");
        }
        let msg: Self = serde_json::from_slice(&data[4..4 + len])?;
        Ok((msg, 4 + len))
    }
}

/// Hosts send key uids and serial numbers as either numbers or strings.
fn uid_from_string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number id, got {}",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_keys_present_accepts_numeric_uid() {
        let raw = json!({
            "event": "KeysPresent",
            "device_id": "SN1",
            "keys": [
                { "uid": 7, "cid": "com.x.nowplaying", "width": 360, "data": { "showTitle": false } },
                { "uid": "8", "cid": "com.x.like" }
            ]
        });
        let event: HostEvent = serde_json::from_value(raw).unwrap();
        match event {
            HostEvent::KeysPresent { device_id, keys } => {
                assert_eq!(device_id, "SN1");
                assert_eq!(keys[0].uid, "7");
                assert_eq!(keys[0].width, Some(360));
                assert_eq!(keys[1].uid, "8");
                assert!(keys[1].data.is_null());
            }
            other => panic!("Wrong event: {:?}", other),
        }
    }

    #[test]
    fn test_message_encode_decode() {
        let msg = Message::Plugin(PluginCommand::DrawText {
            device_id: "SN1".into(),
            key_uid: "3".into(),
            text: "Count: 1".into(),
        });
        let encoded = msg.encode().unwrap();
        let (decoded, len) = Message::decode(&encoded).unwrap();
        assert_eq!(len, encoded.len());
        match decoded {
            Message::Plugin(cmd) => assert_eq!(cmd.draw_target(), Some(("SN1", "3"))),
            _ => panic!("Wrong message type"),
        }
    }

    #[test]
    fn test_decode_waits_for_full_frame() {
        let msg = Message::Host(HostEvent::DeviceStatus { devices: vec![] });
        let encoded = msg.encode().unwrap();
        assert!(Message::decode(&encoded[..encoded.len() - 1]).is_err());
        assert!(Message::decode(&encoded[..3]).is_err());
    }

    #[test]
    fn test_ui_request_wire_format() {
        let req: UiRequest =
            serde_json::from_value(json!({ "type": "control", "action": "next" })).unwrap();
        assert_eq!(
            req,
            UiRequest::Control {
                action: TransportAction::Next
            }
        );
        let req: UiRequest = serde_json::from_value(json!({ "type": "get-playback" })).unwrap();
        assert_eq!(req, UiRequest::GetPlayback);
        let req: UiRequest = serde_json::from_value(json!({
            "type": "search", "query": "daft punk", "types": ["artist"], "limit": 5
        }))
        .unwrap();
        assert_eq!(
            req,
            UiRequest::Search {
                query: "daft punk".into(),
                types: vec![SearchKind::Artist],
                limit: Some(5),
                offset: None,
            }
        );
        let req: UiRequest = serde_json::from_value(json!({ "type": "playlists" })).unwrap();
        assert_eq!(
            req,
            UiRequest::Playlists {
                limit: None,
                offset: None
            }
        );
    }

    #[test]
    fn test_decode_rejects_oversized_header() {
        let mut data = (MAX_FRAME_LEN as u32 + 1).to_be_bytes().to_vec();
        data.extend_from_slice(b"{}");
        assert!(Message::decode(&data).is_err());
        assert_eq!(Message::declared_len(&data), Some(MAX_FRAME_LEN + 1));
        assert_eq!(Message::declared_len(&data[..3]), None);
    }
}
