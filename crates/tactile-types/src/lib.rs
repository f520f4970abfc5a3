//! `tactile-types` – shared vocabulary of the touch bridge.
//!
//! Structured touch messages (bumper, head, hand), the raw values delivered
//! by the sensor bus, and the error types every other crate speaks.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Raw level above which a contact sensor is considered pressed.
pub const PRESSED_THRESHOLD: f64 = 0.5;

/// The three families of contact sensors bridged by the adapters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TouchKind {
    Bumper,
    HeadTouch,
    HandTouch,
}

impl TouchKind {
    /// Default topic name used by publishers and recordings.
    pub fn topic(self) -> &'static str {
        match self {
            TouchKind::Bumper => "bumper",
            TouchKind::HeadTouch => "head_touch",
            TouchKind::HandTouch => "hand_touch",
        }
    }
}

impl fmt::Display for TouchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.topic())
    }
}

/// Pressed / released state shared by every touch message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContactState {
    Released,
    Pressed,
}

impl ContactState {
    /// Map a raw sensor level to a contact state.
    pub fn from_level(level: f64) -> Self {
        if level > PRESSED_THRESHOLD {
            ContactState::Pressed
        } else {
            ContactState::Released
        }
    }

    pub fn is_pressed(self) -> bool {
        self == ContactState::Pressed
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Sensor identifiers
// ─────────────────────────────────────────────────────────────────────────────

/// Which bumper changed state.  Ordered like the default bumper key list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BumperSide {
    Right,
    Left,
    Back,
}

impl BumperSide {
    pub fn from_index(index: usize) -> Option<Self> {
        match index {
            0 => Some(BumperSide::Right),
            1 => Some(BumperSide::Left),
            2 => Some(BumperSide::Back),
            _ => None,
        }
    }
}

/// Which tactile head button changed state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HeadButton {
    Front,
    Middle,
    Rear,
}

impl HeadButton {
    pub fn from_index(index: usize) -> Option<Self> {
        match index {
            0 => Some(HeadButton::Front),
            1 => Some(HeadButton::Middle),
            2 => Some(HeadButton::Rear),
            _ => None,
        }
    }
}

/// Which hand contact sensor changed state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandSensor {
    RightBack,
    RightLeft,
    RightRight,
    LeftBack,
    LeftLeft,
    LeftRight,
}

impl HandSensor {
    pub fn from_index(index: usize) -> Option<Self> {
        match index {
            0 => Some(HandSensor::RightBack),
            1 => Some(HandSensor::RightLeft),
            2 => Some(HandSensor::RightRight),
            3 => Some(HandSensor::LeftBack),
            4 => Some(HandSensor::LeftLeft),
            5 => Some(HandSensor::LeftRight),
            _ => None,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Structured messages
// ─────────────────────────────────────────────────────────────────────────────

/// A bumper was pressed or released.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bumper {
    pub stamp: DateTime<Utc>,
    pub bumper: BumperSide,
    pub state: ContactState,
}

/// A tactile head button was touched or released.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeadTouch {
    pub stamp: DateTime<Utc>,
    pub button: HeadButton,
    pub state: ContactState,
}

/// A hand contact sensor was touched or released.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandTouch {
    pub stamp: DateTime<Utc>,
    pub hand: HandSensor,
    pub state: ContactState,
}

/// Shape-specific construction of a touch message.
///
/// The adapter logic is shared by every message type; only the mapping from
/// `(sensor index, state)` to the message's own fields differs, and lives in
/// the implementations of this trait.
pub trait TouchMessage:
    Clone + fmt::Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
    const KIND: TouchKind;

    /// Build a message for the sensor at `sensor` (its position in the
    /// adapter's key list).
    ///
    /// # Errors
    ///
    /// Returns [`ConversionError::SensorOutOfRange`] when `sensor` does not
    /// name a sensor of this kind.
    fn from_contact(
        sensor: usize,
        state: ContactState,
        stamp: DateTime<Utc>,
    ) -> Result<Self, ConversionError>;

    fn state(&self) -> ContactState;

    fn stamp(&self) -> DateTime<Utc>;
}

impl TouchMessage for Bumper {
    const KIND: TouchKind = TouchKind::Bumper;

    fn from_contact(
        sensor: usize,
        state: ContactState,
        stamp: DateTime<Utc>,
    ) -> Result<Self, ConversionError> {
        let bumper = BumperSide::from_index(sensor).ok_or(ConversionError::SensorOutOfRange {
            kind: Self::KIND,
            index: sensor,
        })?;
        Ok(Self { stamp, bumper, state })
    }

    fn state(&self) -> ContactState {
        self.state
    }

    fn stamp(&self) -> DateTime<Utc> {
        self.stamp
    }
}

impl TouchMessage for HeadTouch {
    const KIND: TouchKind = TouchKind::HeadTouch;

    fn from_contact(
        sensor: usize,
        state: ContactState,
        stamp: DateTime<Utc>,
    ) -> Result<Self, ConversionError> {
        let button = HeadButton::from_index(sensor).ok_or(ConversionError::SensorOutOfRange {
            kind: Self::KIND,
            index: sensor,
        })?;
        Ok(Self { stamp, button, state })
    }

    fn state(&self) -> ContactState {
        self.state
    }

    fn stamp(&self) -> DateTime<Utc> {
        self.stamp
    }
}

impl TouchMessage for HandTouch {
    const KIND: TouchKind = TouchKind::HandTouch;

    fn from_contact(
        sensor: usize,
        state: ContactState,
        stamp: DateTime<Utc>,
    ) -> Result<Self, ConversionError> {
        let hand = HandSensor::from_index(sensor).ok_or(ConversionError::SensorOutOfRange {
            kind: Self::KIND,
            index: sensor,
        })?;
        Ok(Self { stamp, hand, state })
    }

    fn state(&self) -> ContactState {
        self.state
    }

    fn stamp(&self) -> DateTime<Utc> {
        self.stamp
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Bus-side values
// ─────────────────────────────────────────────────────────────────────────────

/// Dynamically typed value delivered by the sensor bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum RawValue {
    Float(f64),
    Int(i64),
    Bool(bool),
    Text(String),
    Empty,
}

impl RawValue {
    /// Numeric level of the value, if it has one.  Text is parsed as a float.
    pub fn as_level(&self) -> Option<f64> {
        match self {
            RawValue::Float(v) if v.is_finite() => Some(*v),
            RawValue::Float(_) => None,
            RawValue::Int(v) => Some(*v as f64),
            RawValue::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            RawValue::Text(s) => s.trim().parse::<f64>().ok().filter(|v| v.is_finite()),
            RawValue::Empty => None,
        }
    }
}

impl From<f64> for RawValue {
    fn from(v: f64) -> Self {
        RawValue::Float(v)
    }
}

impl From<i64> for RawValue {
    fn from(v: i64) -> Self {
        RawValue::Int(v)
    }
}

impl From<bool> for RawValue {
    fn from(v: bool) -> Self {
        RawValue::Bool(v)
    }
}

/// Opaque handle returned by the bus for an active subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscriptionId(pub u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub#{}", self.0)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Errors
// ─────────────────────────────────────────────────────────────────────────────

/// Why a raw bus value could not become a structured message.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ConversionError {
    #[error("key '{key}' is not part of event '{event}'")]
    UnknownKey { event: String, key: String },

    #[error("malformed value for '{key}': {details}")]
    Malformed { key: String, details: String },

    #[error("no {kind} sensor at index {index}")]
    SensorOutOfRange { kind: TouchKind, index: usize },
}

/// Error type spanning bus subscriptions, conversions and sink failures.
#[derive(Error, Debug, Clone, Serialize, Deserialize)]
pub enum BridgeError {
    #[error("Subscription Error on {event}: {details}")]
    Subscription { event: String, details: String },

    #[error("Conversion Error: {0}")]
    Conversion(#[from] ConversionError),

    #[error("Publish Error on {topic}: {details}")]
    Publish { topic: String, details: String },

    #[error("Recorder Error: {0}")]
    Recorder(String),

    #[error("Config Error: {0}")]
    Config(String),
}

impl BridgeError {
    pub fn subscription(event: impl Into<String>, details: impl Into<String>) -> Self {
        Self::Subscription {
            event: event.into(),
            details: details.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_above_threshold_is_pressed() {
        assert_eq!(ContactState::from_level(1.0), ContactState::Pressed);
        assert_eq!(ContactState::from_level(0.51), ContactState::Pressed);
        assert_eq!(ContactState::from_level(0.5), ContactState::Released);
        assert_eq!(ContactState::from_level(0.0), ContactState::Released);
    }

    #[test]
    fn raw_value_levels() {
        assert_eq!(RawValue::Float(0.75).as_level(), Some(0.75));
        assert_eq!(RawValue::Int(1).as_level(), Some(1.0));
        assert_eq!(RawValue::Bool(true).as_level(), Some(1.0));
        assert_eq!(RawValue::Text(" 0.0 ".into()).as_level(), Some(0.0));
        assert_eq!(RawValue::Text("pressed".into()).as_level(), None);
        assert_eq!(RawValue::Float(f64::NAN).as_level(), None);
        assert_eq!(RawValue::Empty.as_level(), None);
    }

    #[test]
    fn bumper_from_contact_maps_index_to_side() {
        let stamp = Utc::now();
        let msg = Bumper::from_contact(2, ContactState::Pressed, stamp).unwrap();
        assert_eq!(msg.bumper, BumperSide::Back);
        assert!(msg.state().is_pressed());
        assert_eq!(msg.stamp(), stamp);
    }

    #[test]
    fn out_of_range_sensor_is_rejected() {
        let err = HeadTouch::from_contact(3, ContactState::Pressed, Utc::now()).unwrap_err();
        assert_eq!(
            err,
            ConversionError::SensorOutOfRange {
                kind: TouchKind::HeadTouch,
                index: 3
            }
        );
        assert!(HandTouch::from_contact(5, ContactState::Released, Utc::now()).is_ok());
        assert!(HandTouch::from_contact(6, ContactState::Released, Utc::now()).is_err());
    }

    #[test]
    fn hand_touch_serializes_with_snake_case_sensor() {
        let msg = HandTouch::from_contact(4, ContactState::Pressed, Utc::now()).unwrap();
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["hand"], "left_left");
        assert_eq!(json["state"], "pressed");
    }

    #[test]
    fn bridge_error_display() {
        let err = BridgeError::subscription("BumperTouched", "bus closed");
        assert!(err.to_string().contains("BumperTouched"));

        let err: BridgeError = ConversionError::UnknownKey {
            event: "HeadTouched".into(),
            key: "Nope".into(),
        }
        .into();
        assert!(err.to_string().contains("Nope"));
    }
}
