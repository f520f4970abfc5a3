//! Raw bus value → typed touch message.

use std::marker::PhantomData;

use chrono::Utc;
use tactile_types::{ContactState, ConversionError, RawValue, TouchMessage};

/// Converts one raw bus value into a structured message.
pub trait Converter<M>: Send + Sync {
    /// # Errors
    ///
    /// Returns a [`ConversionError`] for unknown keys or malformed values.
    fn convert(&self, key: &str, raw: &RawValue) -> Result<M, ConversionError>;
}

impl<M, F> Converter<M> for F
where
    F: Fn(&str, &RawValue) -> Result<M, ConversionError> + Send + Sync,
{
    fn convert(&self, key: &str, raw: &RawValue) -> Result<M, ConversionError> {
        self(key, raw)
    }
}

/// Key-indexed converter for contact sensors.
///
/// The sensor reported in the message is the position of the delivered key
/// in the event's key list; the contact is pressed when the raw level
/// exceeds [`PRESSED_THRESHOLD`][tactile_types::PRESSED_THRESHOLD].
pub struct TouchEventConverter<M> {
    event: String,
    keys: Vec<String>,
    _message: PhantomData<fn() -> M>,
}

impl<M: TouchMessage> TouchEventConverter<M> {
    pub fn new(event: impl Into<String>, keys: Vec<String>) -> Self {
        Self {
            event: event.into(),
            keys,
            _message: PhantomData,
        }
    }
}

impl<M: TouchMessage> Converter<M> for TouchEventConverter<M> {
    fn convert(&self, key: &str, raw: &RawValue) -> Result<M, ConversionError> {
        let sensor = self
            .keys
            .iter()
            .position(|k| k == key)
            .ok_or_else(|| ConversionError::UnknownKey {
                event: self.event.clone(),
                key: key.to_string(),
            })?;
        let level = raw.as_level().ok_or_else(|| ConversionError::Malformed {
            key: key.to_string(),
            details: format!("expected a numeric level, got {raw:?}"),
        })?;
        M::from_contact(sensor, ContactState::from_level(level), Utc::now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tactile_types::{Bumper, BumperSide, HandSensor, HandTouch, TouchKind};

    fn bumper_converter() -> TouchEventConverter<Bumper> {
        TouchEventConverter::new(
            "bumper",
            vec![
                "RightBumperPressed".to_string(),
                "LeftBumperPressed".to_string(),
                "BackBumperPressed".to_string(),
            ],
        )
    }

    #[test]
    fn key_position_selects_bumper() {
        let conv = bumper_converter();
        let msg = conv.convert("LeftBumperPressed", &RawValue::Float(1.0)).unwrap();
        assert_eq!(msg.bumper, BumperSide::Left);
        assert!(msg.state.is_pressed());

        let msg = conv.convert("BackBumperPressed", &RawValue::Int(0)).unwrap();
        assert_eq!(msg.bumper, BumperSide::Back);
        assert!(!msg.state.is_pressed());
    }

    #[test]
    fn unknown_key_is_rejected() {
        let err = bumper_converter()
            .convert("FrontTactilTouched", &RawValue::Float(1.0))
            .unwrap_err();
        assert!(matches!(err, ConversionError::UnknownKey { .. }));
    }

    #[test]
    fn non_numeric_value_is_malformed() {
        let err = bumper_converter()
            .convert("RightBumperPressed", &RawValue::Text("yes".into()))
            .unwrap_err();
        assert!(matches!(err, ConversionError::Malformed { .. }));
    }

    #[test]
    fn more_keys_than_sensors_is_out_of_range() {
        let conv: TouchEventConverter<Bumper> = TouchEventConverter::new(
            "bumper",
            vec!["a".into(), "b".into(), "c".into(), "d".into()],
        );
        let err = conv.convert("d", &RawValue::Float(1.0)).unwrap_err();
        assert_eq!(
            err,
            ConversionError::SensorOutOfRange {
                kind: TouchKind::Bumper,
                index: 3
            }
        );
    }

    #[test]
    fn hand_keys_map_in_order() {
        let conv: TouchEventConverter<HandTouch> = TouchEventConverter::new(
            "hand_touch",
            vec![
                "HandRightBackTouched".into(),
                "HandRightLeftTouched".into(),
                "HandRightRightTouched".into(),
                "HandLeftBackTouched".into(),
            ],
        );
        let msg = conv.convert("HandLeftBackTouched", &RawValue::Bool(true)).unwrap();
        assert_eq!(msg.hand, HandSensor::LeftBack);
    }

    #[test]
    fn closures_are_converters() {
        let conv = |_key: &str, raw: &RawValue| -> Result<f64, ConversionError> {
            raw.as_level().ok_or(ConversionError::Malformed {
                key: "k".into(),
                details: "none".into(),
            })
        };
        assert_eq!(Converter::convert(&conv, "k", &RawValue::Int(3)).unwrap(), 3.0);
    }
}
