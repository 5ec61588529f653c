//! Property-bag (lumi/MIoT) model registry.

use super::{ModelFamily, ResolvedModel, SpecEntry, resolve};
use crate::convert::{Converter, ModelRef};
use crate::error::Result;
use crate::state::{StateKind, ValueMap};
use log::{info, warn};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::json;
use std::fs;
use std::path::Path;

/// Firmware revision suffix on model ids, e.g. `lumi.sensor_motion.v2`.
static MODEL_VERSION_TAIL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\.v\d$").expect("valid model regex"));

static BUILT_IN: Lazy<Vec<ModelFamily>> = Lazy::new(built_in_families);

pub fn built_in() -> &'static [ModelFamily] {
    &BUILT_IN
}

/// Model id without its version suffix.
pub fn strip_version(model: &str) -> &str {
    match MODEL_VERSION_TAIL.find(model) {
        Some(tail) => &model[..tail.start()],
        None => model,
    }
}

/// Resolve a model id against the built-in table followed by `external`.
/// Unknown models get a generic entry with an empty spec.
pub fn get_device(model: &str, external: &[ModelFamily]) -> ResolvedModel {
    let model = strip_version(model);

    let found = BUILT_IN
        .iter()
        .chain(external)
        .find_map(|family| family.info(model).map(|info| (family, info)));

    match found {
        Some((family, info)) => resolve(family, model, info, ModelRef::Zigbee(model)),
        None => {
            warn!("[Zigbee] Unsupported model {}", model);
            ResolvedModel {
                manufacturer: None,
                name: "Zigbee".to_string(),
                model: model.to_string(),
                spec: Vec::new(),
            }
        }
    }
}

/// Read additional model families from a JSON file.
pub fn load_external(path: &Path) -> Result<Vec<ModelFamily>> {
    let content = fs::read_to_string(path)?;
    let families: Vec<ModelFamily> = serde_json::from_str(&content)?;
    info!(
        "[Zigbee] Loaded {} external model families from {:?}",
        families.len(),
        path
    );
    Ok(families)
}

fn alive() -> SpecEntry {
    SpecEntry::new(None, Some("alive"), StateKind::Available).converters(&[Converter::Available])
}

fn lqi() -> SpecEntry {
    SpecEntry::new(Some("8.0.2007"), Some("lqi"), StateKind::LinkQuality)
        .converters(&[Converter::Default])
}

fn debug_output() -> SpecEntry {
    SpecEntry::new(None, None, StateKind::DebugOutput).converters(&[Converter::DebugOutput])
}

fn messages_stat() -> SpecEntry {
    SpecEntry::new(None, None, StateKind::MessagesStat).converters(&[Converter::MessagesStat])
}

fn voltage() -> SpecEntry {
    SpecEntry::new(Some("8.0.2008"), Some("voltage"), StateKind::Voltage)
        .converters(&[Converter::Voltage])
}

fn battery() -> SpecEntry {
    SpecEntry::new(Some("8.0.2008"), Some("voltage"), StateKind::Battery)
        .converters(&[Converter::Battery])
}

fn load_power() -> SpecEntry {
    SpecEntry::new(Some("0.12.85"), Some("load_power"), StateKind::LoadPower)
        .converters(&[Converter::Default])
}

fn switch(resource: &str, property: &str) -> SpecEntry {
    SpecEntry::new(Some(resource), Some(property), StateKind::Switch)
        .converters(&[Converter::Switch])
}

fn channel(resource: &str, property: &str, index: u8) -> SpecEntry {
    SpecEntry::new(Some(resource), Some(property), StateKind::Channel)
        .named(
            &format!("channel_{}", index),
            &format!("Channel {} state", index),
        )
        .converters(&[Converter::Default])
}

fn press(name: &str, label: &str, code: u8) -> SpecEntry {
    SpecEntry::new(Some("13.1.85"), None, StateKind::Button)
        .named(name, label)
        .converters(&[Converter::Press(code)])
}

fn long_press() -> SpecEntry {
    SpecEntry::new(Some("13.1.85"), None, StateKind::Button)
        .named("long_press", "Button long press")
        .value_map(ValueMap::from_pairs(vec![
            (json!(16), json!(true)),
            (json!(17), json!(false)),
        ]))
        .depends_on(&["long_timeout"])
        .converters(&[Converter::Default])
}

fn long_timeout() -> SpecEntry {
    SpecEntry::new(None, None, StateKind::Timeout).named("long_timeout", "Long press timeout")
}

fn single_press() -> SpecEntry {
    press("single_press", "Button single press", 1)
}

fn double_press() -> SpecEntry {
    press("double_press", "Button double press", 2)
}

fn triple_press() -> SpecEntry {
    press("triple_press", "Button triple press", 3)
}

fn miot(resource: &str, kind: StateKind, converter: Converter) -> SpecEntry {
    SpecEntry::new(Some(resource), Some(resource), kind).converters(&[converter])
}

/// Assemble a spec: the given entries followed by the diagnostic states.
fn spec(mut entries: Vec<SpecEntry>) -> Vec<SpecEntry> {
    entries.push(debug_output());
    entries.push(messages_stat());
    entries
}

/// Mains-powered device: availability and link quality first.
fn powered(entries: Vec<SpecEntry>) -> Vec<SpecEntry> {
    let mut all = vec![alive(), lqi()];
    all.extend(entries);
    spec(all)
}

/// Battery device: availability, link quality, then voltage and battery last.
fn battery_powered(entries: Vec<SpecEntry>) -> Vec<SpecEntry> {
    let mut all = vec![alive(), lqi()];
    all.extend(entries);
    all.push(voltage());
    all.push(battery());
    spec(all)
}

fn built_in_families() -> Vec<ModelFamily> {
    vec![
        ModelFamily::new(
            &[("lumi.gateway.mgl03", "Xiaomi", "Gateway 3", Some("ZNDMWG03LM"))],
            Vec::new(),
        ),
        // on/off with power measurement
        ModelFamily::new(
            &[
                ("lumi.plug", "Xiaomi", "Plug", Some("ZNCZ02LM")),
                ("lumi.plug.mitw01", "Xiaomi", "Plug TW", Some("ZNCZ03LM")),
                ("lumi.plug.maus01", "Xiaomi", "Plug US", Some("ZNCZ12LM")),
                ("lumi.ctrl_86plug", "Aqara", "Socket", Some("QBCZ11LM")),
            ],
            powered(vec![load_power(), switch("4.1.85", "neutral_0")]),
        ),
        ModelFamily::new(
            &[("lumi.plug.mmeu01", "Xiaomi", "Plug EU", Some("ZNCZ04LM"))],
            powered(vec![
                SpecEntry::new(Some("0.11.85"), Some("load_voltage"), StateKind::LoadVoltage)
                    .converters(&[Converter::Default]),
                load_power(),
                switch("4.1.85", "neutral_0"),
            ]),
        ),
        ModelFamily::new(
            &[("lumi.ctrl_86plug.aq1", "Aqara", "Socket", Some("QBCZ11LM"))],
            powered(vec![load_power(), switch("4.1.85", "channel_0")]),
        ),
        ModelFamily::new(
            &[
                ("lumi.ctrl_ln1", "Aqara", "Single Wall Switch", Some("QBKG11LM")),
                ("lumi.ctrl_ln1.aq1", "Aqara", "Single Wall Switch", Some("QBKG11LM")),
                ("lumi.switch.b1nacn02", "Aqara", "Single Wall Switch D1", Some("QBKG23LM")),
            ],
            powered(vec![load_power(), switch("4.1.85", "neutral_0")]),
        ),
        // dual channel on/off with power measurement
        ModelFamily::new(
            &[
                ("lumi.relay.c2acn01", "Aqara", "Relay", Some("LLKZMK11LM")),
                ("lumi.ctrl_ln2", "Aqara", "Double Wall Switch", Some("QBKG12LM")),
                ("lumi.ctrl_ln2.aq1", "Aqara", "Double Wall Switch", Some("QBKG12LM")),
                ("lumi.switch.b2nacn02", "Aqara", "Double Wall Switch D1", Some("QBKG24LM")),
            ],
            powered(vec![
                load_power(),
                channel("4.1.85", "channel_0", 1),
                channel("4.2.85", "channel_1", 2),
            ]),
        ),
        ModelFamily::new(
            &[("lumi.ctrl_neutral1", "Aqara", "Single Wall Switch", Some("QBKG04LM"))],
            powered(vec![switch("4.1.85", "neutral_0")]),
        ),
        ModelFamily::new(
            &[("lumi.switch.b1lacn02", "Aqara", "Single Wall Switch D1", Some("QBKG21LM"))],
            powered(vec![switch("4.1.85", "channel_0")]),
        ),
        ModelFamily::new(
            &[("lumi.ctrl_neutral2", "Aqara", "Double Wall Switch", Some("QBKG03LM"))],
            powered(vec![
                channel("4.1.85", "neutral_0", 1),
                channel("4.2.85", "neutral_1", 2),
            ]),
        ),
        ModelFamily::new(
            &[("lumi.switch.b2lacn02", "Aqara", "Double Wall Switch D1", Some("QBKG22LM"))],
            powered(vec![
                channel("4.1.85", "channel_0", 1),
                channel("4.2.85", "channel_1", 2),
            ]),
        ),
        // triple channel, no neutral wire
        ModelFamily::new(
            &[("lumi.switch.l3acn3", "Aqara", "Triple Wall Switch D1", Some("QBKG25LM"))],
            powered(vec![
                channel("4.1.85", "neutral_0", 1),
                channel("4.2.85", "neutral_1", 2),
                channel("4.3.85", "neutral_2", 3),
            ]),
        ),
        ModelFamily::new(
            &[("lumi.switch.n3acn3", "Aqara", "Triple Wall Switch D1", Some("QBKG26LM"))],
            powered(vec![
                load_power(),
                channel("4.1.85", "channel_0", 1),
                channel("4.2.85", "channel_1", 2),
                channel("4.3.85", "channel_2", 3),
            ]),
        ),
        ModelFamily::new(
            &[
                ("lumi.sensor_cube", "Aqara", "Cube", Some("MFKZQ01LM")),
                ("lumi.sensor_cube.aqgl01", "Aqara", "Cube", Some("MFKZQ01LM")),
            ],
            battery_powered(vec![]),
        ),
        // brightness and color temperature
        ModelFamily::new(
            &[
                ("lumi.light.aqcn02", "Aqara", "Bulb", Some("ZNLDP12LM")),
                ("lumi.light.cwopcn02", "Aqara", "Opple MX650", Some("XDD12LM")),
                ("lumi.light.cwopcn03", "Aqara", "Opple MX480", Some("XDD13LM")),
                ("ikea.light.led1545g12", "IKEA", "Bulb E27 980 lm", Some("LED1545G12")),
                ("ikea.light.led1546g12", "IKEA", "Bulb E27 950 lm", Some("LED1546G12")),
                ("ikea.light.led1536g5", "IKEA", "Bulb E14 400 lm", Some("LED1536G5")),
                ("ikea.light.led1537r6", "IKEA", "Bulb GU10 400 lm", Some("LED1537R6")),
            ],
            powered(vec![
                switch("4.1.85", "power_status"),
                SpecEntry::new(Some("14.1.85"), Some("light_level"), StateKind::Brightness)
                    .converters(&[Converter::Default]),
                SpecEntry::new(
                    Some("14.2.85"),
                    Some("colour_temperature"),
                    StateKind::ColorTemperature,
                )
                .converters(&[Converter::Default]),
            ]),
        ),
        ModelFamily::new(
            &[
                ("ikea.light.led1623g12", "IKEA", "Bulb E27 1000 lm", Some("LED1623G12")),
                ("ikea.light.led1650r5", "IKEA", "Bulb GU10 400 lm", Some("LED1650R5")),
                ("ikea.light.led1649c5", "IKEA", "Bulb E14", Some("LED1649C5")),
            ],
            powered(vec![
                switch("4.1.85", "power_status"),
                SpecEntry::new(Some("14.1.85"), Some("light_level"), StateKind::Brightness)
                    .converters(&[Converter::Default]),
            ]),
        ),
        ModelFamily::new(
            &[("lumi.sensor_switch", "Xiaomi", "Button", Some("WXKG01LM"))],
            battery_powered(vec![
                single_press(),
                double_press(),
                triple_press(),
                press("quadruple_press", "Button quadruple press", 4),
                press("multiple_press", "Button multiple press", 128),
                long_press(),
                long_timeout(),
            ]),
        ),
        // not every WXKG11LM revision reports more than triple presses
        ModelFamily::new(
            &[
                ("lumi.sensor_switch.aq2", "Aqara", "Button", Some("WXKG11LM")),
                ("lumi.remote.b1acn01", "Aqara", "Button", Some("WXKG11LM")),
            ],
            battery_powered(vec![single_press(), double_press(), triple_press()]),
        ),
        ModelFamily::new(
            &[("lumi.sensor_switch.aq3", "Aqara", "Shake Button", Some("WXKG12LM"))],
            battery_powered(vec![
                single_press(),
                double_press(),
                long_press(),
                long_timeout(),
            ]),
        ),
        ModelFamily::new(
            &[("lumi.sensor_86sw1", "Aqara", "Single Wall Button", Some("WXKG03LM"))],
            battery_powered(vec![single_press()]),
        ),
        ModelFamily::new(
            &[
                ("lumi.remote.b186acn01", "Aqara", "Single Wall Button", Some("WXKG03LM")),
                ("lumi.remote.b186acn02", "Aqara", "Single Wall Button D1", Some("WXKG06LM")),
            ],
            battery_powered(vec![
                single_press(),
                double_press(),
                long_press(),
                long_timeout(),
            ]),
        ),
        ModelFamily::new(
            &[
                ("lumi.sensor_86sw2", "Aqara", "Double Wall Button", Some("WXKG02LM")),
                ("lumi.remote.b286acn01", "Aqara", "Double Wall Button", Some("WXKG02LM")),
                ("lumi.sensor_86sw2.es1", "Aqara", "Double Wall Button", Some("WXKG02LM")),
                ("lumi.remote.b286acn02", "Aqara", "Double Wall Button D1", Some("WXKG07LM")),
                ("lumi.remote.b286opcn01", "Aqara", "Opple Two Button", Some("WXCJKG11LM")),
                ("lumi.remote.b486opcn01", "Aqara", "Opple Four Button", Some("WXCJKG12LM")),
                ("lumi.remote.b686opcn01", "Aqara", "Opple Six Button", Some("WXCJKG13LM")),
            ],
            battery_powered(vec![]),
        ),
        ModelFamily::new(
            &[("lumi.sensor_ht", "Xiaomi", "TH Sensor", Some("WSDCGQ01LM"))],
            battery_powered(vec![
                SpecEntry::new(Some("0.1.85"), Some("temperature"), StateKind::Temperature)
                    .converters(&[Converter::Temperature]),
                SpecEntry::new(Some("0.2.85"), Some("humidity"), StateKind::Humidity)
                    .converters(&[Converter::Humidity]),
            ]),
        ),
        ModelFamily::new(
            &[("lumi.weather", "Aqara", "TH Sensor", Some("WSDCGQ11LM"))],
            battery_powered(vec![
                SpecEntry::new(Some("0.1.85"), Some("temperature"), StateKind::Temperature)
                    .converters(&[Converter::Temperature]),
                SpecEntry::new(Some("0.2.85"), Some("humidity"), StateKind::Humidity)
                    .converters(&[Converter::Humidity]),
                SpecEntry::new(Some("0.3.85"), Some("pressure"), StateKind::Pressure)
                    .converters(&[Converter::Pressure]),
            ]),
        ),
        ModelFamily::new(
            &[("lumi.sensor_ht.agl02", "Aqara", "TH Sensor", Some("WSDCGQ12LM"))],
            spec(vec![
                miot("2.1", StateKind::Temperature, Converter::Temperature),
                miot("2.2", StateKind::Humidity, Converter::Humidity),
                miot("2.3", StateKind::Pressure, Converter::Pressure),
                miot("3.1", StateKind::Battery, Converter::Battery),
            ]),
        ),
        ModelFamily::new(
            &[
                ("lumi.sensor_magnet", "Xiaomi", "Door Sensor", Some("MCCGQ01LM")),
                ("lumi.sensor_magnet.aq2", "Aqara", "Door Sensor", Some("MCCGQ11LM")),
            ],
            battery_powered(vec![SpecEntry::new(Some("3.1.85"), Some("status"), StateKind::Contact)
                .converters(&[Converter::Contact])]),
        ),
        ModelFamily::new(
            &[("lumi.sensor_motion", "Xiaomi", "Motion Sensor", Some("RTCGQ01LM"))],
            battery_powered(vec![SpecEntry::new(Some("3.1.85"), None, StateKind::Occupancy)
                .converters(&[Converter::Default])]),
        ),
        ModelFamily::new(
            &[("lumi.sensor_motion.aq2", "Aqara", "Motion Sensor", Some("RTCGQ11LM"))],
            spec(vec![
                alive(),
                lqi(),
                SpecEntry::new(Some("0.4.85"), Some("illumination"), StateKind::Illuminance)
                    .converters(&[Converter::Default]),
                SpecEntry::new(Some("3.1.85"), None, StateKind::Occupancy)
                    .converters(&[Converter::Default]),
                voltage(),
                battery(),
                SpecEntry::new(None, None, StateKind::NoMotion),
                SpecEntry::new(None, None, StateKind::Timeout)
                    .named("occupancy_timeout", "Occupancy timeout"),
            ]),
        ),
        ModelFamily::new(
            &[("lumi.sensor_wleak.aq1", "Aqara", "Water Leak Sensor", Some("SJCGQ11LM"))],
            battery_powered(vec![SpecEntry::new(Some("3.1.85"), Some("alarm"), StateKind::Alarm)
                .named("water_leak", "Water leak detected")
                .converters(&[Converter::Default])]),
        ),
        ModelFamily::new(
            &[("lumi.vibration.aq1", "Aqara", "Vibration Sensor", Some("DJT11LM"))],
            battery_powered(vec![]),
        ),
        ModelFamily::new(
            &[("lumi.sen_ill.mgl01", "Xiaomi", "Light Sensor", Some("GZCGQ01LM"))],
            spec(vec![
                alive(),
                miot("2.1", StateKind::Illuminance, Converter::Default),
                miot("3.1", StateKind::Battery, Converter::Battery),
            ]),
        ),
        ModelFamily::new(
            &[("lumi.sensor_smoke", "Honeywell", "Smoke Sensor", Some("JTYJ-GD-01LM/BW"))],
            battery_powered(vec![SpecEntry::new(Some("13.1.85"), Some("alarm"), StateKind::Alarm)
                .named("smoke", "Smoke detected")
                .converters(&[Converter::Default])]),
        ),
        ModelFamily::new(
            &[("lumi.sensor_natgas", "Honeywell", "Gas Sensor", Some("JTQJ-BF-01LM/BW"))],
            spec(vec![
                lqi(),
                SpecEntry::new(Some("13.1.85"), Some("alarm"), StateKind::Alarm)
                    .named("gas", "Gas detected")
                    .converters(&[Converter::Default]),
            ]),
        ),
        ModelFamily::new(
            &[
                ("lumi.curtain", "Aqara", "Curtain", Some("ZNCLDJ11LM")),
                ("lumi.curtain.aq2", "Aqara", "Roller Shade", Some("ZNGZDJ11LM")),
            ],
            powered(curtain()),
        ),
        ModelFamily::new(
            &[("lumi.curtain.hagl04", "Aqara", "Curtain B1", Some("ZNCLDJ12LM"))],
            battery_powered(curtain()),
        ),
        ModelFamily::new(
            &[
                ("lumi.lock.aq1", "Aqara", "Door Lock S1", Some("ZNMS11LM")),
                ("lumi.lock.acn02", "Aqara", "Door Lock S2", Some("ZNMS12LM")),
                ("lumi.lock.acn03", "Aqara", "Door Lock S2 Pro", Some("ZNMS12LM")),
            ],
            battery_powered(vec![SpecEntry::new(
                Some("13.20.85"),
                Some("lock_state"),
                StateKind::LockState,
            )
            .converters(&[Converter::Default])]),
        ),
        ModelFamily::new(
            &[("lumi.airrtc.tcpecn02", "Aqara", "Thermostat S2", Some("KTWKQ03ES"))],
            powered(vec![]),
        ),
        ModelFamily::new(
            &[("lumi.airrtc.vrfegl01", "Xiaomi", "VRF Air Conditioning", None)],
            powered(vec![]),
        ),
        ModelFamily::new(
            &[("lumi.switch.l0agl1", "Aqara", "Relay T1", Some("SSM-U02"))],
            spec(vec![miot("2.1", StateKind::Switch, Converter::Switch)]),
        ),
        ModelFamily::new(
            &[
                ("lumi.switch.n0agl1", "Aqara", "Relay T1", Some("SSM-U01")),
                ("lumi.plug.maeu01", "Aqara", "Plug", Some("SP-EUC01")),
            ],
            spec(vec![
                miot("2.1", StateKind::Switch, Converter::Switch),
                miot("3.2", StateKind::LoadPower, Converter::Default),
            ]),
        ),
        ModelFamily::new(
            &[(
                "lumi.airmonitor.acn01",
                "Aqara",
                "TVOC Air Quality Monitor",
                Some("VOCKQJK11LM"),
            )],
            spec(vec![
                miot("3.1", StateKind::Temperature, Converter::Temperature),
                miot("3.2", StateKind::Humidity, Converter::Humidity),
                miot("4.1", StateKind::Alarm, Converter::Default),
                miot("4.2", StateKind::Battery, Converter::Battery),
            ]),
        ),
        ModelFamily::new(
            &[("lumi.switch.b1lc04", "Aqara", "Single Wall Switch E1", Some("QBKG38LM"))],
            spec(vec![miot("2.1", StateKind::Switch, Converter::Switch)]),
        ),
        ModelFamily::new(
            &[("lumi.switch.b2lc04", "Aqara", "Double Wall Switch E1", Some("QBKG39LM"))],
            spec(vec![
                SpecEntry::new(Some("2.1"), Some("2.1"), StateKind::Channel)
                    .named("channel_1", "Channel 1 state")
                    .converters(&[Converter::Default]),
                SpecEntry::new(Some("3.1"), Some("3.1"), StateKind::Channel)
                    .named("channel_2", "Channel 2 state")
                    .converters(&[Converter::Default]),
            ]),
        ),
    ]
}

fn curtain() -> Vec<SpecEntry> {
    vec![
        SpecEntry::new(Some("1.1.85"), Some("curtain_level"), StateKind::CurtainLevel)
            .converters(&[Converter::Default]),
        SpecEntry::new(Some("14.2.85"), None, StateKind::CurtainMotor)
            .converters(&[Converter::Default]),
        SpecEntry::new(Some("14.4.85"), Some("run_state"), StateKind::RunState)
            .converters(&[Converter::Default]),
    ]
}
