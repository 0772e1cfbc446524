//! MQTT feed of bus traffic and request injection.
//!
//! Broadcasts are published as the hex dump of the request frame, exchanges
//! as `<request hex> <response hex>`. Requests arrive as `ddCCccll<data>` hex
//! on the request topic and are sent with the local master address.

use std::sync::Arc;
use std::time::Duration;

use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, info, warn};

use crate::bus::EbusSender;
use crate::config::MqttConfig;
use crate::error::{ConfigError, EbusError, FrameError};
use crate::frame::{hex_string, Message, Response};
use crate::monitor::BusEvent;

pub const DEFAULT_MQTT_PORT: u16 = 1883;
const KEEP_ALIVE: Duration = Duration::from_secs(30);
const RECONNECT_DELAY: Duration = Duration::from_secs(1);
const CLIENT_CAPACITY: usize = 10;

/// Splits `mqtt://host[:port]` (scheme optional) into host and port.
pub fn parse_broker_url(url: &str) -> Result<(String, u16), ConfigError> {
    let invalid = |reason: &str| ConfigError::Invalid {
        key: "mqtt.url",
        reason: format!("{url}: {reason}"),
    };
    let rest = match url.split_once("://") {
        Some(("mqtt" | "tcp", rest)) => rest,
        Some((scheme, _)) => return Err(invalid(&format!("unsupported scheme {scheme}"))),
        None => url,
    };
    let rest = rest.trim_end_matches('/');
    let (host, port) = match rest.rsplit_once(':') {
        Some((host, port)) => (host, port.parse().map_err(|_| invalid("bad port"))?),
        None => (rest, DEFAULT_MQTT_PORT),
    };
    if host.is_empty() {
        return Err(invalid("missing host"));
    }
    Ok((host.to_string(), port))
}

pub fn format_broadcast(msg: &Message) -> String {
    hex_string(&msg.to_bytes())
}

pub fn format_exchange(msg: &Message, response: &Response) -> String {
    format!("{} {}", hex_string(&msg.to_bytes()), hex_string(&response.to_bytes()))
}

/// Parses an injected request payload into a message from `master`.
pub fn parse_request(master: u8, payload: &[u8]) -> Result<Message, EbusError> {
    let text = std::str::from_utf8(payload).map_err(|_| FrameError::InvalidHex)?;
    Ok(Message::parse_hex_request(master, text)?)
}

fn options(config: &MqttConfig, url: &str) -> Result<MqttOptions, ConfigError> {
    let (host, port) = parse_broker_url(url)?;
    let mut opts = MqttOptions::new(config.client_id.clone(), host, port);
    opts.set_keep_alive(KEEP_ALIVE);
    if let Some(username) = &config.username {
        opts.set_credentials(username.clone(), config.password.clone().unwrap_or_default());
    }
    Ok(opts)
}

fn publish(client: &AsyncClient, topic: &str, event: &BusEvent) {
    let payload = match event {
        BusEvent::Broadcast(msg) => format_broadcast(msg),
        BusEvent::Exchange(msg, response) => format_exchange(msg, response),
    };
    debug!("mqtt: {} <- {}", topic, payload);
    if let Err(e) = client.try_publish(topic, QoS::AtLeastOnce, false, payload) {
        warn!("mqtt: publish failed: {}", e);
    }
}

/// Runs the MQTT bridge until the bus event channel closes. Returns at
/// once when no broker URL is configured.
pub async fn run_mqtt(
    config: MqttConfig,
    master: u8,
    sender: Arc<dyn EbusSender>,
    mut events: broadcast::Receiver<BusEvent>,
) -> Result<(), EbusError> {
    let Some(url) = config.url.clone() else {
        info!("mqtt: no broker configured, disabled");
        return Ok(());
    };
    let opts = options(&config, &url)?;
    let (client, mut eventloop) = AsyncClient::new(opts, CLIENT_CAPACITY);
    info!("mqtt: connecting to {}", url);

    loop {
        tokio::select! {
            notification = eventloop.poll() => match notification {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    info!("mqtt: connected");
                    if let Err(e) = client.try_subscribe(config.request_topic.as_str(), QoS::AtLeastOnce) {
                        warn!("mqtt: subscribe failed: {}", e);
                    }
                }
                Ok(Event::Incoming(Packet::Publish(p))) if p.topic == config.request_topic => {
                    match parse_request(master, &p.payload) {
                        Ok(msg) => {
                            info!("mqtt: request {}", msg);
                            if let Err(e) = sender.send(&msg) {
                                warn!("mqtt: {}", e);
                            }
                        }
                        Err(e) => warn!("mqtt: bad request: {}", e),
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    warn!("mqtt: connection error: {}", e);
                    tokio::time::sleep(RECONNECT_DELAY).await;
                }
            },
            event = events.recv() => match event {
                Ok(event) => publish(&client, &config.data_topic, &event),
                Err(RecvError::Lagged(n)) => warn!("mqtt: missed {} bus events", n),
                Err(RecvError::Closed) => {
                    info!("mqtt: bus closed");
                    return Ok(());
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_broker_url() {
        assert_eq!(parse_broker_url("mqtt://broker:1884").unwrap(), ("broker".to_string(), 1884));
        assert_eq!(parse_broker_url("broker").unwrap(), ("broker".to_string(), 1883));
        assert!(parse_broker_url("mqtts://broker").is_err());
        assert!(parse_broker_url("mqtt://:1883").is_err());
        assert!(parse_broker_url("mqtt://broker:x").is_err());
    }

    #[test]
    fn test_exchange_format() {
        let msg = Message::with_payload(0x10, 0x08, 0xb511, &[0x01]).unwrap();
        let rsp = Response::with_payload(&[0x00]).unwrap();
        let text = format_exchange(&msg, &rsp);
        assert!(text.starts_with("1008b5110101"));
        assert_eq!(text.split(' ').count(), 2);
        assert_eq!(format_broadcast(&msg), "1008b511010189");
    }

    #[test]
    fn test_parse_request_rejects_binary() {
        assert!(parse_request(0x71, &[0xff, 0xfe]).is_err());
        let msg = parse_request(0x71, b"08b5110101").unwrap();
        assert_eq!(msg.source, 0x71);
    }
}
