//! Offline decoder for Gateway 3 messages.
//!
//! Usage:
//!   cargo run --bin gw3-decode -- ble --pdid 1371 --eid 0x1004 --edata 2701
//!   cargo run --bin gw3-decode -- lumi --model lumi.weather '{"cmd":"report","params":[...]}'
//!   cargo run --bin gw3-decode -- model lumi.sensor_motion.aq2
//!   cargo run --bin gw3-decode -- models

use clap::{Parser, Subcommand};
use gateway3_bridge::decoder::{self, BleEvent, Command, PropertyBagMessage};
use gateway3_bridge::registry::{ModelFamily, ResolvedModel, ble, zigbee};
use gateway3_bridge::state::DecodedState;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "gw3-decode")]
#[command(about = "Decode Xiaomi Gateway 3 messages without a gateway")]
struct Cli {
    /// Extra property-bag model families (JSON)
    #[arg(long, env = "GW3_EXTERNAL_DEVICES")]
    external: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Decode one BLE event
    Ble {
        /// Product id
        #[arg(long, default_value_t = 0)]
        pdid: u32,
        /// Event id, decimal or 0x-prefixed hex
        #[arg(long, value_parser = parse_eid)]
        eid: u32,
        /// Hex payload
        #[arg(long)]
        edata: String,
    },
    /// Decode one property-bag message against a model
    Lumi {
        /// Model id, e.g. lumi.weather
        #[arg(long)]
        model: String,
        /// Message JSON
        message: String,
    },
    /// Print the resolved spec of a model id or BLE product id
    Model { model: String },
    /// List every registered model
    Models,
}

fn parse_eid(value: &str) -> Result<u32, String> {
    let parsed = match value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => value.parse(),
    };
    parsed.map_err(|e| format!("invalid event id {:?}: {}", value, e))
}

fn print_states(states: &[DecodedState]) {
    if states.is_empty() {
        println!("(nothing decoded)");
    }
    for state in states {
        match &state.value {
            Some(value) => println!("{} = {}", state.name(), value),
            None => println!("{} (dependent)", state.name()),
        }
    }
}

fn print_model(model: &ResolvedModel) -> Result<(), Box<dyn std::error::Error>> {
    println!("{} ({})", model.name, model.model);
    for entry in &model.spec {
        let resource = entry
            .resource()
            .map(|r| r.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "  {:<20} {:<12} {:<16} {}",
            entry.state.name(),
            resource,
            entry.property.as_deref().unwrap_or("-"),
            serde_json::to_string(&entry.state.state_object())?
        );
    }
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"))
        .format_timestamp_millis()
        .init();

    let cli = Cli::parse();
    let external: Vec<ModelFamily> = match &cli.external {
        Some(path) => zigbee::load_external(path)?,
        None => Vec::new(),
    };

    match cli.command {
        Commands::Ble { pdid, eid, edata } => {
            let spec = ble::get_device(pdid).map(|m| m.spec).unwrap_or_default();
            let event = BleEvent {
                did: String::new(),
                eid,
                edata,
                pdid,
                seq: None,
            };
            let (states, used_fallback) = decoder::decode_ble(&spec, &event);
            if used_fallback {
                println!("(hardwired table)");
            }
            print_states(&states);
        }
        Commands::Lumi { model, message } => {
            let device = zigbee::get_device(&model, &external);
            let mut message: PropertyBagMessage = serde_json::from_str(&message)?;
            if message.command() == Some(Command::Heartbeat)
                && let Some(report) = message.heartbeat_report()
            {
                message = report;
            }
            let states = decoder::decode_pairs(&device.spec, &message.pairs());
            print_states(&states);
        }
        Commands::Model { model } => {
            let resolved = match model.parse::<u32>() {
                Ok(pdid) => ble::get_device(pdid)
                    .ok_or_else(|| format!("unknown BLE product id {}", pdid))?,
                Err(_) => zigbee::get_device(&model, &external),
            };
            print_model(&resolved)?;
        }
        Commands::Models => {
            for family in zigbee::built_in().iter().chain(&external) {
                for (id, info) in &family.models {
                    println!("zigbee {:<32} {}", id, info.display_name());
                }
            }
            for family in ble::built_in() {
                for (id, info) in &family.models {
                    println!("ble    {:<32} {}", id, info.display_name());
                }
            }
        }
    }

    Ok(())
}
