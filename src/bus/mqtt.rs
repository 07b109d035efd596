//! MQTT transport over `rumqttc`
//!
//! Supports plain TCP (`mqtt://`), TLS (`mqtts://`) and WebSocket
//! (`ws://`, `wss://`) brokers. All traffic uses QoS 0.

use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use std::fmt;
use tracing::{debug, trace, warn};

use super::error::BusError;
use super::message::InboundMessage;
use super::transport::{Transport, TransportEvent};
use crate::codec::{TopicFilter, TopicPath};
use crate::config::ConnectionConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrokerScheme {
    Tcp,
    Tls,
    Ws,
    Wss,
}

impl BrokerScheme {
    fn default_port(self) -> u16 {
        match self {
            BrokerScheme::Tcp => 1883,
            BrokerScheme::Tls => 8883,
            BrokerScheme::Ws => 80,
            BrokerScheme::Wss => 443,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            BrokerScheme::Tcp => "mqtt",
            BrokerScheme::Tls => "mqtts",
            BrokerScheme::Ws => "ws",
            BrokerScheme::Wss => "wss",
        }
    }
}

/// Parsed broker URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerAddress {
    pub scheme: BrokerScheme,
    pub host: String,
    pub port: u16,
    /// WebSocket path including the leading `/`, empty for TCP
    pub path: String,
}

impl BrokerAddress {
    pub fn parse(url: &str) -> Result<Self, BusError> {
        let (scheme, rest) = url
            .split_once("://")
            .ok_or_else(|| BusError::Config(format!("broker URL has no scheme: {url}")))?;

        let scheme = match scheme {
            "mqtt" | "tcp" => BrokerScheme::Tcp,
            "mqtts" | "ssl" => BrokerScheme::Tls,
            "ws" => BrokerScheme::Ws,
            "wss" => BrokerScheme::Wss,
            other => {
                return Err(BusError::Config(format!(
                    "unsupported broker scheme {other:?} in {url}"
                )))
            }
        };

        let (authority, path) = match rest.find('/') {
            Some(index) => rest.split_at(index),
            None => (rest, ""),
        };

        let (host, port) = match authority.rsplit_once(':') {
            Some((host, port)) => {
                let port = port
                    .parse::<u16>()
                    .map_err(|e| BusError::Config(format!("invalid port in {url}: {e}")))?;
                (host, port)
            }
            None => (authority, scheme.default_port()),
        };

        if host.is_empty() {
            return Err(BusError::Config(format!("broker URL has no host: {url}")));
        }

        Ok(Self {
            scheme,
            host: host.to_string(),
            port,
            path: path.to_string(),
        })
    }

    /// Host argument for `MqttOptions`: the bare host for TCP, the full URL
    /// for WebSocket transports
    fn options_host(&self) -> String {
        match self.scheme {
            BrokerScheme::Tcp | BrokerScheme::Tls => self.host.clone(),
            BrokerScheme::Ws | BrokerScheme::Wss => self.to_string(),
        }
    }
}

impl fmt::Display for BrokerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}://{}:{}{}",
            self.scheme.as_str(),
            self.host,
            self.port,
            self.path
        )
    }
}

pub struct MqttTransport {
    client: AsyncClient,
    eventloop: EventLoop,
    closed: bool,
}

impl MqttTransport {
    pub fn new(config: &ConnectionConfig, client_id: &str) -> Result<Self, BusError> {
        let address = BrokerAddress::parse(&config.broker_url)?;
        debug!("Creating MQTT transport for {} as {}", address, client_id);

        let mut mqtt_options = MqttOptions::new(client_id, address.options_host(), address.port);
        mqtt_options
            .set_keep_alive(config.keep_alive())
            .set_clean_session(config.clean_session);

        match address.scheme {
            BrokerScheme::Tcp => {}
            BrokerScheme::Tls => {
                mqtt_options.set_transport(rumqttc::Transport::tls_with_default_config());
            }
            BrokerScheme::Ws => {
                mqtt_options.set_transport(rumqttc::Transport::Ws);
            }
            BrokerScheme::Wss => {
                mqtt_options.set_transport(rumqttc::Transport::wss_with_default_config());
            }
        }

        let (client, mut eventloop) = AsyncClient::new(mqtt_options, config.request_capacity);

        // rumqttc gives up on a handshake after its own 5 s default otherwise
        let mut network_options = eventloop.network_options();
        network_options.set_connection_timeout(config.connect_timeout_secs);
        eventloop.set_network_options(network_options);

        Ok(Self {
            client,
            eventloop,
            closed: false,
        })
    }
}

#[async_trait]
impl Transport for MqttTransport {
    async fn next_event(&mut self) -> Result<TransportEvent, BusError> {
        match self.eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                debug!("ConnAck received: {:?}", ack.code);
                Ok(TransportEvent::Connected)
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => Ok(TransportEvent::Message(
                InboundMessage::from_topic(publish.topic, publish.payload.to_vec()),
            )),
            Ok(other) => {
                trace!("MQTT event ignored: {:?}", other);
                Ok(TransportEvent::Idle)
            }
            Err(e) => Err(BusError::Connection(e.to_string())),
        }
    }

    fn subscribe(&mut self, filter: &TopicFilter) -> Result<(), BusError> {
        self.client
            .try_subscribe(filter.as_str(), QoS::AtMostOnce)
            .map_err(|e| BusError::Request(e.to_string()))
    }

    fn unsubscribe(&mut self, filter: &TopicFilter) -> Result<(), BusError> {
        self.client
            .try_unsubscribe(filter.as_str())
            .map_err(|e| BusError::Request(e.to_string()))
    }

    fn publish(&mut self, topic: &TopicPath, payload: Vec<u8>) -> Result<(), BusError> {
        self.client
            .try_publish(topic.to_string(), QoS::AtMostOnce, false, payload)
            .map_err(|e| BusError::Request(e.to_string()))
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Err(e) = self.client.try_disconnect() {
            warn!("Failed to queue MQTT disconnect: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_websocket_url_with_path() {
        let address = BrokerAddress::parse("wss://broker.hivemq.com:8884/mqtt").unwrap();
        assert_eq!(address.scheme, BrokerScheme::Wss);
        assert_eq!(address.host, "broker.hivemq.com");
        assert_eq!(address.port, 8884);
        assert_eq!(address.path, "/mqtt");
        assert_eq!(
            address.options_host(),
            "wss://broker.hivemq.com:8884/mqtt"
        );
    }

    #[test]
    fn tcp_url_uses_bare_host_and_default_port() {
        let address = BrokerAddress::parse("mqtt://localhost").unwrap();
        assert_eq!(address.scheme, BrokerScheme::Tcp);
        assert_eq!(address.port, 1883);
        assert_eq!(address.options_host(), "localhost");
    }

    #[test]
    fn handshake_timeout_follows_connection_config() {
        let config = ConnectionConfig {
            broker_url: "mqtt://localhost:1883".to_string(),
            connect_timeout_secs: 30,
            ..ConnectionConfig::default()
        };
        let transport = MqttTransport::new(&config, "timeout-test").unwrap();
        assert_eq!(transport.eventloop.network_options().connection_timeout(), 30);
    }

    #[test]
    fn rejects_malformed_urls() {
        for url in [
            "broker.hivemq.com:8884",
            "http://broker",
            "mqtt://:1883",
            "mqtt://host:notaport",
        ] {
            assert!(
                matches!(BrokerAddress::parse(url), Err(BusError::Config(_))),
                "{url}"
            );
        }
    }
}
