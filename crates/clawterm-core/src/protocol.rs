//! Wire protocol spoken between the daemon and terminal viewers.
//!
//! Control messages are JSON objects tagged by `type`. Raw terminal bytes
//! (`output` from the daemon, `input` from a viewer) travel as binary
//! WebSocket frames and never pass through these types on the hot path.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Terminal geometry in character cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Geometry {
    pub cols: u16,
    pub rows: u16,
}

impl Geometry {
    /// Geometry used when creating the backing session.
    pub const DEFAULT: Self = Self {
        cols: 120,
        rows: 40,
    };

    /// Build a geometry, rejecting zero-sized dimensions.
    pub const fn new(cols: u16, rows: u16) -> Option<Self> {
        if cols == 0 || rows == 0 {
            None
        } else {
            Some(Self { cols, rows })
        }
    }
}

impl Default for Geometry {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl fmt::Display for Geometry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.cols, self.rows)
    }
}

/// Coarse viewer category used to arbitrate resize authority.
///
/// A primary viewer (an interactive browser tab) always wins a resize. A
/// secondary viewer (an installed app left open on another device) may only
/// resize while no primary viewer is connected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceClass {
    #[default]
    #[serde(alias = "browser")]
    Primary,
    #[serde(alias = "pwa")]
    Secondary,
}

impl DeviceClass {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::Secondary => "secondary",
        }
    }
}

impl fmt::Display for DeviceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Category of a noteworthy event detected in terminal output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertCategory {
    Permission,
    Error,
    Completion,
}

impl AlertCategory {
    /// All categories in evaluation order.
    pub const ALL: [Self; 3] = [Self::Permission, Self::Error, Self::Completion];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Permission => "permission",
            Self::Error => "error",
            Self::Completion => "completion",
        }
    }

    /// Whether alerts of this category are forwarded to the notification sink.
    pub const fn notifies(self) -> bool {
        matches!(self, Self::Permission | Self::Error)
    }
}

impl fmt::Display for AlertCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A cooldown-gated event extracted from live output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    pub category: AlertCategory,
    pub matched_text: String,
    pub timestamp: DateTime<Utc>,
}

impl Alert {
    pub fn new(category: AlertCategory, matched_text: impl Into<String>) -> Self {
        Self {
            category,
            matched_text: matched_text.into(),
            timestamp: Utc::now(),
        }
    }

    /// One-line text handed to notification sinks.
    pub fn notification_text(&self) -> String {
        format!(
            "[{}] {}",
            self.category.as_str().to_uppercase(),
            self.matched_text
        )
    }
}

/// Control message sent by a viewer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientMessage {
    /// Late registration of the viewer's device class.
    Register {
        #[serde(rename = "deviceClass", alias = "deviceType")]
        device_class: DeviceClass,
    },
    /// Keystrokes as text, for viewers that cannot send binary frames.
    Input { data: String },
    /// Request to change the shared terminal geometry.
    Resize { cols: u16, rows: u16 },
}

impl ClientMessage {
    /// Parse a text frame.
    pub fn parse(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| Error::Protocol(e.to_string()))
    }
}

/// Control message sent by the daemon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerMessage {
    /// Authoritative geometry, sent on join and on a rejected resize.
    PtyDimensions { cols: u16, rows: u16 },
    /// The backing process exited; a respawn is scheduled.
    PtyExit,
    /// An accepted alert.
    Alert(Alert),
}

impl ServerMessage {
    pub const fn dimensions(geometry: Geometry) -> Self {
        Self::PtyDimensions {
            cols: geometry.cols,
            rows: geometry.rows,
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn geometry_rejects_zero() {
        assert!(Geometry::new(0, 40).is_none());
        assert!(Geometry::new(80, 0).is_none());
        assert_eq!(Geometry::new(80, 24).unwrap().to_string(), "80x24");
    }

    #[test]
    fn register_accepts_legacy_device_names() {
        let msg = ClientMessage::parse(r#"{"type":"register","deviceClass":"pwa"}"#).unwrap();
        assert_eq!(
            msg,
            ClientMessage::Register {
                device_class: DeviceClass::Secondary
            }
        );

        let msg = ClientMessage::parse(r#"{"type":"register","deviceType":"browser"}"#).unwrap();
        assert_eq!(
            msg,
            ClientMessage::Register {
                device_class: DeviceClass::Primary
            }
        );
    }

    #[test]
    fn resize_parses() {
        let msg = ClientMessage::parse(r#"{"type":"resize","cols":100,"rows":30}"#).unwrap();
        assert_eq!(msg, ClientMessage::Resize { cols: 100, rows: 30 });
    }

    #[test]
    fn malformed_messages_are_errors() {
        assert!(ClientMessage::parse("not json").is_err());
        assert!(ClientMessage::parse(r#"{"type":"resize","cols":-1,"rows":30}"#).is_err());
        assert!(ClientMessage::parse(r#"{"type":"launch-missiles"}"#).is_err());
    }

    #[test]
    fn server_messages_use_kebab_case_tags() {
        let json = ServerMessage::dimensions(Geometry::DEFAULT).to_json().unwrap();
        assert_eq!(json, r#"{"type":"pty-dimensions","cols":120,"rows":40}"#);
        assert_eq!(ServerMessage::PtyExit.to_json().unwrap(), r#"{"type":"pty-exit"}"#);
    }

    #[test]
    fn alert_message_flattens_fields() {
        let alert = Alert::new(AlertCategory::Permission, "(y/n)");
        let value: serde_json::Value =
            serde_json::from_str(&ServerMessage::Alert(alert).to_json().unwrap()).unwrap();
        assert_eq!(value["type"], "alert");
        assert_eq!(value["category"], "permission");
        assert_eq!(value["matchedText"], "(y/n)");
        assert!(value["timestamp"].is_string());
    }

    #[test]
    fn notification_text_uppercases_category() {
        let alert = Alert::new(AlertCategory::Error, "fatal: not a git repository");
        assert_eq!(
            alert.notification_text(),
            "[ERROR] fatal: not a git repository"
        );
    }

    #[test]
    fn only_permission_and_error_notify() {
        assert!(AlertCategory::Permission.notifies());
        assert!(AlertCategory::Error.notifies());
        assert!(!AlertCategory::Completion.notifies());
    }
}
