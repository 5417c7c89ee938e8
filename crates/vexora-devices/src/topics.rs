//! Topic layout of the `v1/dev/{deviceId}/...` namespace.

pub const TOPIC_TELEMETRY: &str = "v1/dev/+/telemetry";
pub const TOPIC_EVENT: &str = "v1/dev/+/event";
pub const TOPIC_STATE: &str = "v1/dev/+/state";
pub const TOPIC_ACK: &str = "v1/dev/+/ack";
pub const TOPIC_CFG_STATUS: &str = "v1/dev/+/cfg/status";
pub const TOPIC_LWT: &str = "v1/dev/+/lwt";

/// Fixed subscription set, re-issued after every (re)connect.
pub const SUBSCRIPTIONS: [&str; 6] = [
    TOPIC_TELEMETRY,
    TOPIC_EVENT,
    TOPIC_STATE,
    TOPIC_ACK,
    TOPIC_CFG_STATUS,
    TOPIC_LWT,
];

const DEVICE_PREFIX: &str = "v1/dev/";

/// Message kind derived from the topic suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopicKind {
    Telemetry,
    Event,
    State,
    Ack,
    ConfigStatus,
    LastWill,
    Other,
}

impl TopicKind {
    pub fn classify(topic: &str) -> Self {
        if topic.ends_with("/cfg/status") {
            Self::ConfigStatus
        } else if topic.ends_with("/telemetry") {
            Self::Telemetry
        } else if topic.ends_with("/event") {
            Self::Event
        } else if topic.ends_with("/state") {
            Self::State
        } else if topic.ends_with("/ack") {
            Self::Ack
        } else if topic.ends_with("/lwt") {
            Self::LastWill
        } else {
            Self::Other
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Telemetry => "telemetry",
            Self::Event => "event",
            Self::State => "state",
            Self::Ack => "ack",
            Self::ConfigStatus => "cfg_status",
            Self::LastWill => "lwt",
            Self::Other => "other",
        }
    }
}

/// Topic a device listens on for commands.
pub fn command_topic(device_id: &str) -> String {
    format!("{DEVICE_PREFIX}{device_id}/cmd")
}

/// Device id segment of a `v1/dev/{deviceId}/...` topic.
pub fn device_id_from_topic(topic: &str) -> Option<&str> {
    let rest = topic.strip_prefix(DEVICE_PREFIX)?;
    let (device_id, _) = rest.split_once('/')?;
    if device_id.is_empty() {
        None
    } else {
        Some(device_id)
    }
}
