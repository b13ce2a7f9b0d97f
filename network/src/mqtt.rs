use anyhow::Result;
use esp_idf_svc::mqtt::client::{EspMqttClient, EventPayload, MqttClientConfiguration, QoS};
use log::*;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::telemetry::Publisher;

pub struct Mqtt {
    client: EspMqttClient<'static>,
    connected: Arc<AtomicBool>,
}

impl Mqtt {
    pub fn new_mqtt(
        broker_url: &str,
        client_id: &str,
        user: Option<&str>,
        pass: Option<&str>,
    ) -> Result<Self> {
        let mqtt_config = MqttClientConfiguration {
            client_id: Some(client_id),
            username: user,
            password: pass,
            keep_alive_interval: Some(Duration::from_secs(60)),
            ..Default::default()
        };

        info!("Connecting to MQTT broker {}", broker_url);

        let connected = Arc::new(AtomicBool::new(false));
        let connected_clone = connected.clone();

        let (client, mut connection) = EspMqttClient::new(broker_url, &mqtt_config)?;

        thread::Builder::new()
            .stack_size(4096)
            .spawn(move || {
                while let Ok(event) = connection.next() {
                    match event.payload() {
                        EventPayload::Connected(_) => {
                            info!("MQTT Connected");
                            connected_clone.store(true, Ordering::SeqCst);
                        }
                        EventPayload::Disconnected => {
                            warn!("MQTT Disconnected");
                            connected_clone.store(false, Ordering::SeqCst);
                        }
                        EventPayload::Published(id) => debug!("MQTT Publish Message {} confirmed", id),
                        EventPayload::Error(e) => error!("MQTT error: {:?}", e),
                        _ => {}
                    }
                }
                info!("MQTT connection closed");
            })?;

        Ok(Self { client, connected })
    }

    /// Block until the broker accepts the session or `timeout` runs out.
    pub fn wait_connected(&self, timeout: Duration) -> bool {
        let started = Instant::now();
        while !self.is_connected() {
            if started.elapsed() >= timeout {
                warn!("MQTT broker not reachable within {:?}", timeout);
                return false;
            }
            thread::sleep(Duration::from_millis(100));
        }
        true
    }
}

impl Publisher for Mqtt {
    fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<()> {
        self.client.publish(topic, QoS::AtLeastOnce, false, payload)?;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}
