//! Unit conversion from raw wire values to canonical values.
//!
//! A [`Converter`] names a conversion the way device tables refer to it. It is
//! bound to one model with [`Converter::bind`], which resolves every per-model
//! exception up front and yields plain [`Conversion`] steps. Applying the steps
//! is pure arithmetic over `serde_json::Value`; a step that cannot handle its
//! input returns `None`, which means "no value produced" and is never an error.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

/// Zigbee models that already report temperature, humidity and pressure in
/// final units.
const PRESCALED_MODELS: &[&str] = &["lumi.airmonitor.acn01", "lumi.sensor_ht.agl02"];

/// BLE products whose humidity reading drifts up by 0.1 on every report.
const HUMIDITY_FLOOR_PDIDS: &[u32] = &[903, 1371];

/// Night Light 2: illuminance is only meaningful as light/no light.
const NIGHT_LIGHT_PDID: u32 = 2038;

/// Qingping Motion Sensor reports real illuminance with motion events.
const QINGPING_MOTION_PDID: u32 = 2691;

/// Raw light level at or above which a light flag is reported.
const LIGHT_THRESHOLD: f64 = 100.0;

/// The model a converter is bound for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelRef<'a> {
    /// Property-bag (zigbee) model id, version suffix already stripped
    Zigbee(&'a str),
    /// Binary-event product id
    Ble(u32),
}

impl ModelRef<'_> {
    fn as_value(&self) -> Value {
        match self {
            ModelRef::Zigbee(model) => Value::String((*model).to_string()),
            ModelRef::Ble(pdid) => json!(pdid),
        }
    }
}

/// Conversion factories referenced by device tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Converter {
    /// Raw value passes through unchanged
    Default,
    /// Synthetic state, never produced from the wire
    Nothing,
    /// Any message proves the device is alive
    Available,
    /// Battery percent from percent or millivolts
    Battery,
    /// Millivolts to volts
    Voltage,
    Temperature,
    Humidity,
    Pressure,
    /// "on"/"off" to 1/0
    Switch,
    /// "open"/"close" to 1/0
    Contact,
    /// Curtain motor run state
    RunState,
    /// 1 when the raw button code equals the given press count
    Press(u8),
    /// Summary of which wire keys a message carried
    DebugOutput,
    /// Message statistics object serialized to JSON
    MessagesStat,
    /// First payload byte, any length
    BleByte,
    /// Second payload byte, any length
    BleSecondByte,
    BleTemperature,
    BleHumidity,
    BleIlluminanceOrLight,
    BleConductivity,
    /// First half of a combined temperature/humidity payload
    BleClimateTemperature,
    /// Second half of a combined temperature/humidity payload
    BleClimateHumidity,
    BleFormaldehyde,
    /// Single byte payload taken as is
    BleSingleByte,
    BleIdleTime,
    BleLight,
    BleContact,
    BleOccupancy,
    /// Light level carried in a motion event
    BleMotionLight,
}

impl Converter {
    /// Resolve this converter for one model.
    pub fn bind(self, model: ModelRef<'_>) -> Vec<Conversion> {
        let prescaled = matches!(model, ModelRef::Zigbee(m) if PRESCALED_MODELS.contains(&m));
        let pdid = match model {
            ModelRef::Ble(pdid) => Some(pdid),
            ModelRef::Zigbee(_) => None,
        };

        match self {
            Converter::Default => vec![],
            Converter::Nothing => vec![Conversion::Discard],
            Converter::Available => vec![Conversion::Constant(json!(1))],
            Converter::Battery => vec![Conversion::BatteryPercent],
            Converter::Voltage => vec![Conversion::Scale {
                divisor: 1000.0,
                rounding: Rounding::Fixed(3),
            }],
            Converter::Temperature | Converter::Humidity if prescaled => vec![],
            Converter::Temperature | Converter::Humidity => vec![Conversion::Scale {
                divisor: 100.0,
                rounding: Rounding::Round,
            }],
            Converter::Pressure if prescaled => vec![],
            Converter::Pressure => vec![Conversion::Scale {
                divisor: 100.0,
                rounding: Rounding::Exact,
            }],
            Converter::Switch | Converter::Contact => vec![Conversion::OnOff],
            Converter::RunState => vec![Conversion::RunState],
            Converter::Press(count) => vec![Conversion::Matches(i64::from(count))],
            Converter::DebugOutput => vec![Conversion::KeySummary {
                model: model.as_value(),
                section: match model {
                    ModelRef::Zigbee(_) => "lumi",
                    ModelRef::Ble(_) => "bluetooth",
                },
            }],
            Converter::MessagesStat => vec![Conversion::StatsJson],
            Converter::BleByte => vec![Conversion::Field(ByteField::unsigned(Length::Any, 0, 1))],
            Converter::BleSecondByte => {
                vec![Conversion::Field(ByteField::unsigned(Length::Any, 1, 1))]
            }
            Converter::BleTemperature => vec![
                Conversion::Field(ByteField::signed(Length::Exactly(2), 0, 2)),
                Conversion::Scale {
                    divisor: 10.0,
                    rounding: Rounding::Exact,
                },
            ],
            Converter::BleHumidity => vec![
                Conversion::Field(ByteField::signed(Length::Exactly(2), 0, 2)),
                Conversion::Scale {
                    divisor: 10.0,
                    rounding: match pdid {
                        Some(p) if HUMIDITY_FLOOR_PDIDS.contains(&p) => Rounding::Floor,
                        _ => Rounding::Exact,
                    },
                },
            ],
            Converter::BleIlluminanceOrLight => {
                let mut steps = vec![Conversion::Field(ByteField::signed(Length::Exactly(3), 0, 3))];
                if pdid == Some(NIGHT_LIGHT_PDID) {
                    steps.push(Conversion::Threshold(LIGHT_THRESHOLD));
                }
                steps
            }
            Converter::BleConductivity => {
                vec![Conversion::Field(ByteField::signed(Length::Exactly(2), 0, 2))]
            }
            Converter::BleClimateTemperature => vec![
                Conversion::Field(ByteField::signed(Length::Exactly(4), 0, 2)),
                Conversion::Scale {
                    divisor: 10.0,
                    rounding: Rounding::Exact,
                },
            ],
            Converter::BleClimateHumidity => vec![
                Conversion::Field(ByteField::signed(Length::Exactly(4), 2, 2)),
                Conversion::Scale {
                    divisor: 10.0,
                    rounding: Rounding::Exact,
                },
            ],
            Converter::BleFormaldehyde => vec![
                Conversion::Field(ByteField::signed(Length::Exactly(2), 0, 2)),
                Conversion::Scale {
                    divisor: 100.0,
                    rounding: Rounding::Exact,
                },
            ],
            Converter::BleSingleByte => {
                vec![Conversion::Field(ByteField::unsigned(Length::Exactly(1), 0, 1))]
            }
            Converter::BleIdleTime => {
                vec![Conversion::Field(ByteField::signed(Length::Exactly(4), 0, 4))]
            }
            Converter::BleLight => vec![
                Conversion::Field(ByteField::unsigned(Length::Exactly(1), 0, 1)),
                Conversion::Truthy,
            ],
            Converter::BleContact => vec![
                Conversion::Field(ByteField::unsigned(Length::Exactly(1), 0, 1)),
                // 0x00 door opened, 0x01 door closed; timeouts and resets carry no state
                Conversion::Lookup(&[(0, 1), (1, 0)]),
            ],
            Converter::BleOccupancy => vec![Conversion::Constant(json!(1))],
            Converter::BleMotionLight => {
                let mut steps = vec![Conversion::Field(ByteField::rest(Length::AtMost(6)))];
                if pdid != Some(QINGPING_MOTION_PDID) {
                    steps.push(Conversion::Threshold(LIGHT_THRESHOLD));
                }
                steps
            }
        }
    }
}

/// Rounding applied after a fixed-point divide.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Rounding {
    Exact,
    /// Half rounds toward positive infinity
    Round,
    Floor,
    /// Round to the given number of decimals
    Fixed(u32),
}

/// Expected payload length for a byte field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Length {
    Any,
    Exactly(usize),
    AtMost(usize),
}

impl Length {
    pub fn accepts(self, len: usize) -> bool {
        match self {
            Length::Any => true,
            Length::Exactly(n) => len == n,
            Length::AtMost(n) => len <= n,
        }
    }
}

/// A little-endian integer read from a hex payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteField {
    pub length: Length,
    pub offset: usize,
    /// Bytes to read; `None` reads to the end of the payload
    pub width: Option<usize>,
    pub signed: bool,
}

impl ByteField {
    pub const fn signed(length: Length, offset: usize, width: usize) -> Self {
        Self {
            length,
            offset,
            width: Some(width),
            signed: true,
        }
    }

    pub const fn unsigned(length: Length, offset: usize, width: usize) -> Self {
        Self {
            length,
            offset,
            width: Some(width),
            signed: false,
        }
    }

    /// Signed read of the whole payload.
    pub const fn rest(length: Length) -> Self {
        Self {
            length,
            offset: 0,
            width: None,
            signed: true,
        }
    }

    /// Read the field from raw bytes, `None` when the payload shape differs.
    pub fn read(&self, data: &[u8]) -> Option<i64> {
        if !self.length.accepts(data.len()) {
            return None;
        }

        let end = match self.width {
            Some(width) => self.offset.checked_add(width)?,
            None => data.len(),
        };
        read_int_le(data.get(self.offset..end)?, self.signed)
    }
}

/// Little-endian integer of 1 to 8 bytes.
pub fn read_int_le(bytes: &[u8], signed: bool) -> Option<i64> {
    if bytes.is_empty() || bytes.len() > 8 {
        return None;
    }

    let mut value: u64 = 0;
    for (i, byte) in bytes.iter().enumerate() {
        value |= u64::from(*byte) << (8 * i);
    }

    let bits = 8 * bytes.len() as u32;
    if signed && bits < 64 && value & (1 << (bits - 1)) != 0 {
        value |= u64::MAX << bits;
    }
    Some(value as i64)
}

/// One resolved conversion step.
#[derive(Debug, Clone, PartialEq)]
pub enum Conversion {
    /// Always produces no value
    Discard,
    /// Ignores the input
    Constant(Value),
    Scale { divisor: f64, rounding: Rounding },
    BatteryPercent,
    /// "on"/"open" to 1, "off"/"close" to 0, anything else unchanged
    OnOff,
    /// "offing" to 0, "oning" to 1, anything else to 2
    RunState,
    /// 1 when the input equals the number, else 0
    Matches(i64),
    /// Integer field of a hex payload
    Field(ByteField),
    /// 1 when the input is at least the threshold, else 0
    Threshold(f64),
    /// 1 for a non-zero input, else 0
    Truthy,
    /// Input mapped through pairs, no value when absent
    Lookup(&'static [(i64, i64)]),
    /// JSON summary `{"model": .., <section>: [keys..]}` of a key/value list
    KeySummary { model: Value, section: &'static str },
    /// Statistics object serialized when it carries a network address
    StatsJson,
}

impl Conversion {
    pub fn apply(&self, raw: &Value) -> Option<Value> {
        match self {
            Conversion::Discard => None,
            Conversion::Constant(value) => Some(value.clone()),
            Conversion::Scale { divisor, rounding } => {
                let scaled = as_number(raw)? / divisor;
                Some(number(match rounding {
                    Rounding::Exact => scaled,
                    Rounding::Round => (scaled + 0.5).floor(),
                    Rounding::Floor => scaled.floor(),
                    Rounding::Fixed(decimals) => {
                        let factor = 10f64.powi(*decimals as i32);
                        (scaled * factor).round() / factor
                    }
                }))
            }
            Conversion::BatteryPercent => {
                let v = as_number(raw)?;
                Some(if v <= 100.0 {
                    number(v)
                } else if v <= 2700.0 {
                    json!(0)
                } else if v >= 3200.0 {
                    json!(100)
                } else {
                    number(((v - 2700.0) / 5.0 + 0.5).floor())
                })
            }
            Conversion::OnOff => Some(match raw.as_str() {
                Some("on") | Some("open") => json!(1),
                Some("off") | Some("close") => json!(0),
                _ => raw.clone(),
            }),
            Conversion::RunState => Some(match raw.as_str() {
                Some("offing") => json!(0),
                Some("oning") => json!(1),
                _ => json!(2),
            }),
            Conversion::Matches(n) => Some(flag(as_number(raw) == Some(*n as f64))),
            Conversion::Field(field) => {
                let bytes = hex::decode(raw.as_str()?).ok()?;
                field.read(&bytes).map(Value::from)
            }
            Conversion::Threshold(limit) => Some(flag(as_number(raw)? >= *limit)),
            Conversion::Truthy => Some(flag(as_number(raw)? != 0.0)),
            Conversion::Lookup(pairs) => {
                let v = as_number(raw)?;
                pairs
                    .iter()
                    .find(|(from, _)| *from as f64 == v)
                    .map(|(_, to)| json!(to))
            }
            Conversion::KeySummary { model, section } => {
                let keys: Vec<Value> = raw
                    .as_array()?
                    .iter()
                    .filter_map(|pair| pair.as_array().and_then(|p| p.first()).cloned())
                    .collect();
                let mut summary = Map::new();
                summary.insert("model".to_string(), model.clone());
                summary.insert((*section).to_string(), Value::Array(keys));
                Some(Value::String(Value::Object(summary).to_string()))
            }
            Conversion::StatsJson => match raw {
                Value::Object(stats) if stats.contains_key("nwk") => {
                    Some(Value::String(raw.to_string()))
                }
                _ => None,
            },
        }
    }
}

/// Run a chain of conversion steps, stopping at the first missing value.
pub fn apply_chain(chain: &[Conversion], raw: &Value) -> Option<Value> {
    chain
        .iter()
        .try_fold(raw.clone(), |value, step| step.apply(&value))
}

/// Canonical JSON number: integral values become integers.
pub fn number(value: f64) -> Value {
    if value.is_finite() && value.fract() == 0.0 && value.abs() < 9_007_199_254_740_992.0 {
        Value::from(value as i64)
    } else {
        Value::from(value)
    }
}

/// Numeric view of a raw value, accepting numeric strings.
pub fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}

/// Equality that treats `1` and `1.0` as the same value.
pub fn loose_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

/// JSON truthiness of a state value.
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

fn flag(on: bool) -> Value {
    json!(if on { 1 } else { 0 })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(converter: Converter, model: ModelRef<'_>, raw: Value) -> Option<Value> {
        apply_chain(&converter.bind(model), &raw)
    }

    const PLAIN: ModelRef<'static> = ModelRef::Zigbee("lumi.weather");

    #[test]
    fn test_read_int_le_sign_extension() {
        assert_eq!(read_int_le(&[0x27, 0x01], true), Some(295));
        assert_eq!(read_int_le(&[0xff, 0xff], true), Some(-1));
        assert_eq!(read_int_le(&[0xff, 0xff], false), Some(65535));
        assert_eq!(read_int_le(&[0xa0, 0x86, 0x01], true), Some(100_000));
        assert_eq!(read_int_le(&[], true), None);
        assert_eq!(read_int_le(&[0; 9], false), None);
    }

    #[test]
    fn test_battery_curve() {
        let bind = |raw: Value| run(Converter::Battery, PLAIN, raw);
        assert_eq!(bind(json!(87)), Some(json!(87)));
        assert_eq!(bind(json!(2500)), Some(json!(0)));
        assert_eq!(bind(json!(2700)), Some(json!(0)));
        assert_eq!(bind(json!(3000)), Some(json!(60)));
        assert_eq!(bind(json!(3002)), Some(json!(60)));
        assert_eq!(bind(json!(3003)), Some(json!(61)));
        assert_eq!(bind(json!(3300)), Some(json!(100)));
        assert_eq!(bind(Value::Null), None);
    }

    #[test]
    fn test_voltage_fixed_three_decimals() {
        assert_eq!(run(Converter::Voltage, PLAIN, json!(3005)), Some(json!(3.005)));
        assert_eq!(run(Converter::Voltage, PLAIN, json!(3000)), Some(json!(3)));
    }

    #[test]
    fn test_climate_scaling_respects_prescaled_models() {
        assert_eq!(run(Converter::Temperature, PLAIN, json!(2345)), Some(json!(23)));
        assert_eq!(run(Converter::Temperature, PLAIN, json!(2350)), Some(json!(24)));
        assert_eq!(run(Converter::Humidity, PLAIN, json!(5512)), Some(json!(55)));
        assert_eq!(run(Converter::Pressure, PLAIN, json!(100125)), Some(json!(1001.25)));

        let agl02 = ModelRef::Zigbee("lumi.sensor_ht.agl02");
        assert_eq!(run(Converter::Temperature, agl02, json!(23.4)), Some(json!(23.4)));
        assert_eq!(run(Converter::Pressure, agl02, json!(1001)), Some(json!(1001)));
    }

    #[test]
    fn test_on_off_and_contact() {
        assert_eq!(run(Converter::Switch, PLAIN, json!("on")), Some(json!(1)));
        assert_eq!(run(Converter::Switch, PLAIN, json!("off")), Some(json!(0)));
        assert_eq!(run(Converter::Switch, PLAIN, json!(1)), Some(json!(1)));
        assert_eq!(run(Converter::Contact, PLAIN, json!("open")), Some(json!(1)));
        assert_eq!(run(Converter::Contact, PLAIN, json!("close")), Some(json!(0)));
        assert_eq!(run(Converter::Contact, PLAIN, json!("ajar")), Some(json!("ajar")));
    }

    #[test]
    fn test_run_state_and_presses() {
        assert_eq!(run(Converter::RunState, PLAIN, json!("offing")), Some(json!(0)));
        assert_eq!(run(Converter::RunState, PLAIN, json!("oning")), Some(json!(1)));
        assert_eq!(run(Converter::RunState, PLAIN, json!("idle")), Some(json!(2)));

        assert_eq!(run(Converter::Press(2), PLAIN, json!(2)), Some(json!(1)));
        assert_eq!(run(Converter::Press(2), PLAIN, json!(1)), Some(json!(0)));
        assert_eq!(run(Converter::Press(128), PLAIN, json!("128")), Some(json!(1)));
    }

    #[test]
    fn test_ble_length_gates() {
        let ble = ModelRef::Ble(0);
        assert_eq!(run(Converter::BleTemperature, ble, json!("2701")), Some(json!(29.5)));
        assert_eq!(run(Converter::BleTemperature, ble, json!("270100")), None);
        assert_eq!(run(Converter::BleTemperature, ble, json!("zz01")), None);
        assert_eq!(run(Converter::BleMotionLight, ble, json!("")), None);
        assert_eq!(
            run(Converter::BleMotionLight, ble, json!("00000000000000")),
            None
        );
    }

    #[test]
    fn test_ble_model_exceptions() {
        assert_eq!(
            run(Converter::BleHumidity, ModelRef::Ble(0), json!("7701")),
            Some(json!(37.5))
        );
        assert_eq!(
            run(Converter::BleHumidity, ModelRef::Ble(1371), json!("7701")),
            Some(json!(37))
        );
        assert_eq!(
            run(Converter::BleIlluminanceOrLight, ModelRef::Ble(0), json!("a08601")),
            Some(json!(100_000))
        );
        assert_eq!(
            run(Converter::BleIlluminanceOrLight, ModelRef::Ble(2038), json!("a08601")),
            Some(json!(1))
        );
        assert_eq!(
            run(Converter::BleMotionLight, ModelRef::Ble(2691), json!("a08601")),
            Some(json!(100_000))
        );
        assert_eq!(
            run(Converter::BleMotionLight, ModelRef::Ble(2701), json!("6300")),
            Some(json!(0))
        );
    }

    #[test]
    fn test_ble_contact_lookup() {
        let ble = ModelRef::Ble(0);
        assert_eq!(run(Converter::BleContact, ble, json!("00")), Some(json!(1)));
        assert_eq!(run(Converter::BleContact, ble, json!("01")), Some(json!(0)));
        assert_eq!(run(Converter::BleContact, ble, json!("02")), None);
    }

    #[test]
    fn test_key_summary() {
        let pairs = json!([["4.1.85", "on"], ["8.0.2007", 120]]);
        let summary = run(Converter::DebugOutput, ModelRef::Zigbee("lumi.plug"), pairs).unwrap();
        let parsed: Value = serde_json::from_str(summary.as_str().unwrap()).unwrap();
        assert_eq!(parsed, json!({"model": "lumi.plug", "lumi": ["4.1.85", "8.0.2007"]}));

        let ble = run(Converter::DebugOutput, ModelRef::Ble(2701), json!([[15, "00"]])).unwrap();
        let parsed: Value = serde_json::from_str(ble.as_str().unwrap()).unwrap();
        assert_eq!(parsed, json!({"model": 2701, "bluetooth": [15]}));

        assert_eq!(run(Converter::DebugOutput, PLAIN, json!("x")), None);
    }

    #[test]
    fn test_stats_json_requires_nwk() {
        assert_eq!(
            run(Converter::MessagesStat, PLAIN, json!({"nwk": "0x1234"})),
            Some(json!("{\"nwk\":\"0x1234\"}"))
        );
        assert_eq!(run(Converter::MessagesStat, PLAIN, json!({"lqi": 1})), None);
    }

    #[test]
    fn test_number_normalization() {
        assert_eq!(number(100.0), json!(100));
        assert_eq!(number(29.5), json!(29.5));
        assert!(loose_eq(&json!(1), &json!(1.0)));
        assert!(!loose_eq(&json!(1), &json!("1")));
        assert!(truthy(&json!(true)));
        assert!(!truthy(&json!(0)));
        assert!(!truthy(&Value::Null));
    }
}
