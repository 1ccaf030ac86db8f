//! LED Controller Protocol Library
//!
//! This crate provides decoding and encoding for the line-delimited JSON
//! protocol spoken by the LED controller boards:
//!
//! - **Outbound commands**: `{"cm":"led"|"can"|"status", ...}` envelopes,
//!   one per line, serialized compactly
//! - **Inbound events**: `{"t":"event","ev":"led.fault",...}` notifications
//!   routed by event name
//! - **Inbound status**: `{"t":"status",...}` telemetry snapshots carrying
//!   fan, current-sense and per-channel confirmation data
//!
//! # Architecture
//!
//! Firmware revisions disagree on key names (`dvr` vs `driver`, `sa` vs
//! `state`, ...) and on scalar types (numbers sometimes arrive as strings).
//! All of that is resolved once, at the decode boundary, by the
//! [`fields`] module. Everything past [`decode_line`] works with canonical
//! structs.
//!
//! # Example
//!
//! ```rust
//! use led_protocol::{decode_line, Command, DriverChannels, Inbound};
//!
//! let line = r#"{"t":"event","ev":"led.fault","dvr":0,"c":2}"#;
//! let message = decode_line(line).unwrap().unwrap();
//! assert_eq!(message.route_key(), "led.fault");
//! if let Inbound::Event(event) = &message.body {
//!     assert_eq!(event.channel, Some(2));
//! }
//!
//! let off = Command::led_off(vec![DriverChannels::new(0, vec![1, 2])]);
//! assert_eq!(
//!     off.to_line().unwrap(),
//!     r#"{"cm":"led","a":"off","drvs":[{"drv":0,"cs":[1,2]}]}"#
//! );
//! ```

pub mod command;
pub mod error;
pub mod event;
pub mod fields;
pub mod status;

pub use command::{CanAction, Command, DriverChannels, LedAction, CHANNELS_PER_DRIVER, UNADDRESSED};
pub use error::ProtocolError;
pub use event::{events, ButtonReport, DeviceEvent};
pub use status::{ChannelReport, DriverReport, DriverStatus, FanStatus, SensorReading, StatusReport};

use serde_json::Value;

/// Listener key under which status snapshots are routed
pub const STATUS_ROUTE: &str = "status";

/// Decoded body of an inbound line
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// Asynchronous notification, routed by event name
    Event(DeviceEvent),
    /// Periodic telemetry snapshot
    Status(StatusReport),
}

/// An inbound line after classification
///
/// The raw JSON object is kept alongside the decoded body so it can be
/// recorded verbatim in diagnostic logs.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    pub payload: Value,
    pub body: Inbound,
}

impl InboundMessage {
    /// Key used to look up interested listeners
    pub fn route_key(&self) -> &str {
        match &self.body {
            Inbound::Event(event) => &event.name,
            Inbound::Status(_) => STATUS_ROUTE,
        }
    }
}

/// Decode one line received from a controller
///
/// Returns `Ok(None)` for well-formed objects that carry no routable type
/// (unknown `t`, or an event without a string `ev`). Those are dropped
/// silently by callers; errors are reserved for input that is not a JSON
/// object at all.
pub fn decode_line(line: &str) -> Result<Option<InboundMessage>, ProtocolError> {
    let payload: Value = serde_json::from_str(line.trim())?;
    let object = payload
        .as_object()
        .ok_or(ProtocolError::NotAnObject(fields::kind_name(&payload)))?;
    let fields = fields::Fields::new(object);

    let body = match fields.text(&["t", "type"]).as_deref() {
        Some("event") => match object.get("ev").and_then(Value::as_str) {
            Some(name) => Inbound::Event(DeviceEvent::from_fields(name, &fields)),
            None => return Ok(None),
        },
        Some("status") => Inbound::Status(StatusReport::from_fields(&fields)),
        other => {
            tracing::trace!("Dropping line with message type {:?}", other);
            return Ok(None);
        }
    };

    Ok(Some(InboundMessage { payload, body }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_routed_by_name() {
        let msg = decode_line(r#"{"t":"event","ev":"led.enable","dvr":1,"i":3}"#)
            .unwrap()
            .unwrap();
        assert_eq!(msg.route_key(), "led.enable");
    }

    #[test]
    fn test_long_type_key_accepted() {
        let msg = decode_line(r#"{"type":"status","um":12}"#).unwrap().unwrap();
        assert_eq!(msg.route_key(), STATUS_ROUTE);
    }

    #[test]
    fn test_unknown_type_dropped() {
        assert!(decode_line(r#"{"t":"ack","id":4}"#).unwrap().is_none());
        assert!(decode_line(r#"{"cm":"led"}"#).unwrap().is_none());
    }

    #[test]
    fn test_event_without_string_name_dropped() {
        assert!(decode_line(r#"{"t":"event","ev":5}"#).unwrap().is_none());
        assert!(decode_line(r#"{"t":"event"}"#).unwrap().is_none());
    }

    #[test]
    fn test_malformed_line_is_error() {
        assert!(matches!(
            decode_line("{\"t\":\"event\""),
            Err(ProtocolError::Json(_))
        ));
        assert!(matches!(
            decode_line("[1,2,3]"),
            Err(ProtocolError::NotAnObject("array"))
        ));
    }

    #[test]
    fn test_payload_preserved() {
        let msg = decode_line(r#"{"t":"event","ev":"can.message","d":[1,0,0,0,0,4]}"#)
            .unwrap()
            .unwrap();
        assert_eq!(msg.payload["d"][5], 4);
    }
}

#[cfg(test)]
mod proptest_tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    proptest! {
        #[test]
        fn arbitrary_lines_never_panic(line in ".{0,64}") {
            let _ = decode_line(&line);
        }

        #[test]
        fn channel_state_synonyms_agree(
            driver in 0i64..8,
            channel in 0i64..4,
            pwm in 0i64..256,
            on in any::<bool>(),
            long_keys in any::<bool>(),
            stringly in any::<bool>(),
        ) {
            let number = |n: i64| if stringly { json!(n.to_string()) } else { json!(n) };
            let state = if on { "on" } else { "off" };
            let line = if long_keys {
                json!({"type": "event", "ev": "led.channel_state", "driver": number(driver),
                       "channel": number(channel), "state": state, "pwm": number(pwm)})
            } else {
                json!({"t": "event", "ev": "led.channel_state", "dvr": number(driver),
                       "c": number(channel), "sa": state, "pwm": number(pwm)})
            };

            let message = decode_line(&line.to_string()).unwrap().unwrap();
            let Inbound::Event(event) = message.body else {
                panic!("expected an event");
            };
            prop_assert_eq!(event.driver_index, Some(driver));
            prop_assert_eq!(event.channel, Some(channel));
            prop_assert_eq!(event.pwm, Some(pwm));
            prop_assert_eq!(event.resolved_level(), Some(i64::from(on)));
        }
    }
}
