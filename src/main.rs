use gateway3_bridge::config::{Config, load_dotenv};
use gateway3_bridge::device::Inventory;
use gateway3_bridge::gateway::Gateway;
use gateway3_bridge::input::mqtt::{MqttClient, MqttMessage, SUBSCRIPTION};
use gateway3_bridge::registry::zigbee;
use gateway3_bridge::state::{MemoryStore, StateSink, TimerRegistry};
use log::{error, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::{mpsc, oneshot};

fn init_logger() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();
}

#[tokio::main]
async fn main() {
    load_dotenv();
    init_logger();
    info!("Starting Gateway 3 bridge");

    let config = Config::from_env();
    info!("Configuration loaded:");
    info!(
        "  Broker: {}:{}",
        config.mqtt.broker_host, config.mqtt.broker_port
    );
    info!("  Inventory: {:?}", config.gateway.inventory_path);
    info!("  State prefix: {}", config.gateway.state_prefix);
    info!(
        "  debug_output: {}, messages_stat: {}",
        config.gateway.debug_output, config.gateway.messages_stat
    );

    let external = match &config.gateway.external_devices_path {
        Some(path) => zigbee::load_external(path).unwrap_or_else(|e| {
            error!("[Zigbee] Failed to load external devices {:?}: {}", path, e);
            Vec::new()
        }),
        None => Vec::new(),
    };

    let inventory = match Inventory::load(&config.gateway.inventory_path) {
        Ok(inventory) => inventory,
        Err(e) => {
            error!(
                "[Gateway] Failed to load inventory {:?}: {}",
                config.gateway.inventory_path, e
            );
            std::process::exit(1);
        }
    };

    let mqtt_client = MqttClient::new(&config.mqtt);
    let publisher = mqtt_client.publisher();

    let store = MemoryStore::new().with_publisher(mqtt_client.client(), &config.gateway.state_prefix);
    let sink: Arc<dyn StateSink> = Arc::new(store);

    let mut gateway = Gateway::new(&config.gateway, external);
    gateway.setup_devices(&inventory, &sink);

    if let Err(e) = mqtt_client.subscribe(SUBSCRIPTION).await {
        error!("[MQTT] Failed to subscribe to {}: {:?}", SUBSCRIPTION, e);
    }

    let (msg_tx, mut msg_rx) = mpsc::channel::<MqttMessage>(100);
    let (connected_tx, connected_rx) = oneshot::channel();
    let mqtt_loop = tokio::spawn(mqtt_client.run(msg_tx, Some(connected_tx)));

    match tokio::time::timeout(Duration::from_secs(10), connected_rx).await {
        Ok(Ok(())) => info!(
            "[MQTT] Listening on {}:{}",
            config.mqtt.broker_host, config.mqtt.broker_port
        ),
        Ok(Err(_)) => warn!("[MQTT] Connection signal channel dropped"),
        Err(_) => warn!("[MQTT] No connection after 10 seconds, still retrying"),
    }

    let mut timers = TimerRegistry::new();
    let shutdown = signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            message = msg_rx.recv() => {
                let Some(message) = message else {
                    warn!("[MQTT] Event loop ended");
                    break;
                };
                match gateway.handle_message(&message.topic, &message.payload, &sink, &mut timers) {
                    Ok(Some(command)) => {
                        info!("[Gateway] {} <- {}", command.topic, command.payload);
                        if let Err(e) = publisher.publish(&command).await {
                            error!("[MQTT] Failed to publish command: {:?}", e);
                        }
                    }
                    Ok(None) => {}
                    Err(e) => error!("[Gateway] {} ({})", e, message.topic),
                }
            }
            result = &mut shutdown => {
                match result {
                    Ok(()) => info!("Received shutdown signal"),
                    Err(e) => error!("Failed to listen for shutdown signal: {}", e),
                }
                break;
            }
        }
    }

    let cancelled = timers.cancel_all();
    info!("[Timers] Cancelled {} pending timer(s)", cancelled);
    mqtt_loop.abort();

    info!("Gateway 3 bridge stopped");
}
