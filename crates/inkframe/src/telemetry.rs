//! Battery telemetry over MQTT.
//!
//! When an `[mqtt]` section is configured the frame announces itself to
//! Home Assistant via the discovery topic and publishes the battery
//! percentage each cycle. Telemetry is strictly best-effort: a broker or
//! battery read failure is logged and the cycle carries on.

use std::time::Duration;

use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use tracing::{debug, warn};

use crate::config::MqttSection;
use crate::power::PowerModuleClient;

const DISCOVERY_TOPIC: &str = "homeassistant/sensor/inkframe_battery/config";
const DEFAULT_STATE_TOPIC: &str = "homeassistant/sensor/inkframe_battery/state";
const ACK_TIMEOUT: Duration = Duration::from_secs(10);

/// Home Assistant discovery document for the battery sensor.
fn discovery_payload(state_topic: &str) -> String {
    serde_json::json!({
        "name": "Picture Frame Battery",
        "unique_id": "inkframe_battery",
        "device_class": "battery",
        "unit_of_measurement": "%",
        "state_topic": state_topic,
    })
    .to_string()
}

pub struct Telemetry {
    mqtt: Option<MqttSection>,
}

impl Telemetry {
    pub fn new(mqtt: Option<MqttSection>) -> Self {
        Self { mqtt }
    }

    pub fn disabled() -> Self {
        Self { mqtt: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.mqtt.is_some()
    }

    fn state_topic(cfg: &MqttSection) -> String {
        cfg.topic
            .clone()
            .unwrap_or_else(|| DEFAULT_STATE_TOPIC.to_string())
    }

    /// Announce the battery sensor to Home Assistant. Retained, so the
    /// sensor survives broker and HA restarts.
    pub async fn publish_discovery(&self) {
        let Some(cfg) = &self.mqtt else {
            return;
        };
        let payload = discovery_payload(&Self::state_topic(cfg));
        if let Err(e) = publish(cfg, DISCOVERY_TOPIC, &payload).await {
            warn!("MQTT discovery publish failed: {}", e);
        }
    }

    /// Read the battery level and publish it retained to the state topic.
    pub async fn publish_battery(&self, client: &mut PowerModuleClient) {
        let Some(cfg) = &self.mqtt else {
            return;
        };

        let level = match client.battery_level().await {
            Ok(level) => level,
            Err(e) => {
                warn!("battery level read failed, skipping telemetry: {}", e);
                return;
            }
        };

        let topic = Self::state_topic(cfg);
        match publish(cfg, &topic, &level.to_string()).await {
            Ok(()) => debug!("battery level {}% published to {}", level, topic),
            Err(e) => warn!("battery telemetry publish failed: {}", e),
        }
    }
}

/// Connection options for one publish. A configured username is sent even
/// without a password; the password then defaults to empty.
fn mqtt_options(cfg: &MqttSection) -> MqttOptions {
    let mut options = MqttOptions::new("inkframe", &cfg.host, cfg.port);
    options.set_keep_alive(Duration::from_secs(5));
    if let Some(user) = &cfg.username {
        options.set_credentials(user, cfg.password.as_deref().unwrap_or(""));
    }
    options
}

/// One retained at-least-once publish: connect, send, wait for the ack,
/// disconnect. The whole exchange runs under a single deadline so a dead
/// broker cannot stall an update cycle.
async fn publish(cfg: &MqttSection, topic: &str, payload: &str) -> Result<(), String> {
    let (client, mut eventloop) = AsyncClient::new(mqtt_options(cfg), 10);
    client
        .publish(topic, QoS::AtLeastOnce, true, payload.as_bytes())
        .await
        .map_err(|e| format!("publish to {}: {}", topic, e))?;

    let acked = async {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Packet::PubAck(_))) => return Ok(()),
                Ok(_) => continue,
                Err(e) => return Err(format!("broker {}:{}: {}", cfg.host, cfg.port, e)),
            }
        }
    };
    match tokio::time::timeout(ACK_TIMEOUT, acked).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => return Err(e),
        Err(_) => return Err(format!("publish to {} not acknowledged in time", topic)),
    }

    let _ = client.disconnect().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::ScriptedTransport;
    use ink_common::{FrameError, RetryPolicy};

    #[test]
    fn test_discovery_payload_describes_a_battery_sensor() {
        let payload = discovery_payload("homeassistant/sensor/inkframe_battery/state");
        let doc: serde_json::Value = serde_json::from_str(&payload).unwrap();

        assert_eq!(doc["device_class"], "battery");
        assert_eq!(doc["unit_of_measurement"], "%");
        assert_eq!(doc["unique_id"], "inkframe_battery");
        assert_eq!(
            doc["state_topic"],
            "homeassistant/sensor/inkframe_battery/state"
        );
    }

    #[test]
    fn test_enabled_only_with_an_mqtt_section() {
        assert!(!Telemetry::disabled().is_enabled());
        assert!(Telemetry::new(Some(MqttSection {
            host: "broker.local".into(),
            port: 1883,
            username: None,
            password: None,
            topic: None,
        }))
        .is_enabled());
    }

    #[test]
    fn test_username_without_password_still_authenticates() {
        let cfg = MqttSection {
            host: "broker.local".into(),
            port: 1883,
            username: Some("frame".into()),
            password: None,
            topic: None,
        };

        let login = mqtt_options(&cfg).credentials().unwrap();
        assert_eq!(login.username, "frame");
        assert_eq!(login.password, "");
    }

    #[test]
    fn test_no_username_connects_anonymously() {
        let cfg = MqttSection {
            host: "broker.local".into(),
            port: 1883,
            username: None,
            password: Some("orphaned".into()),
            topic: None,
        };

        assert!(mqtt_options(&cfg).credentials().is_none());
    }

    #[test]
    fn test_state_topic_override_wins() {
        let cfg = MqttSection {
            host: "broker.local".into(),
            port: 1883,
            username: None,
            password: None,
            topic: Some("frames/living-room/battery".into()),
        };
        assert_eq!(Telemetry::state_topic(&cfg), "frames/living-room/battery");
    }

    #[tokio::test]
    async fn test_disabled_telemetry_never_touches_the_power_module() {
        let transport = ScriptedTransport::new();
        let wire = transport.wire_log();
        let mut client = PowerModuleClient::new(
            Box::new(transport),
            RetryPolicy::new(3, Duration::from_millis(1)),
        );

        Telemetry::disabled().publish_battery(&mut client).await;
        assert!(wire.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_battery_read_failure_skips_the_publish() {
        let transport = ScriptedTransport::new()
            .always_fail("battery", FrameError::Module("gauge offline".into()));
        let wire = transport.wire_log();
        let mut client = PowerModuleClient::new(
            Box::new(transport),
            RetryPolicy::new(2, Duration::from_millis(1)),
        );

        let telemetry = Telemetry::new(Some(MqttSection {
            host: "127.0.0.1".into(),
            port: 1,
            username: None,
            password: None,
            topic: None,
        }));

        // Returns without contacting the broker once the read fails.
        telemetry.publish_battery(&mut client).await;
        assert_eq!(wire.lock().unwrap().len(), 2);
    }
}
