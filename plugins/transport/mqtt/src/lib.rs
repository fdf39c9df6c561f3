use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use rumqttc::v5::mqttbytes::v5::{ConnectReturnCode, Packet, Publish, SubscribeReasonCode};
use rumqttc::v5::mqttbytes::QoS as MqttQoS;
use rumqttc::v5::{AsyncClient, ConnectionError, Event, EventLoop, MqttOptions};

use bridge_api::{BridgeError, ConnAck, InboundMessage, MessageTransport, QoS, SubAck};

const KEEP_ALIVE: Duration = Duration::from_secs(30);
const RETRY_DELAY: Duration = Duration::from_secs(1);
const FLUSH_TIMEOUT: Duration = Duration::from_secs(1);
const REQUEST_CAPACITY: usize = 10;

/// Reason code для отказа без более точной причины.
const UNSPECIFIED_ERROR: u8 = 0x80;

/// MQTT v5 транспорт на rumqttc.
///
/// Event loop rumqttc сам переподключается при следующем `poll`, поэтому
/// после повторного ConnAck подписка восстанавливается здесь же, и
/// SubAck повторной подписки проверяется так же строго, как первый.
/// Publish'и, пришедшие до SubAck, буферизуются.
pub struct MqttTransport {
    client: AsyncClient,
    eventloop: EventLoop,
    pending: VecDeque<InboundMessage>,
    subscription: Option<(String, QoS)>,
    /// Повторная подписка отправлена, SubAck ещё не пришёл.
    resubscribe_pending: bool,
}

impl MqttTransport {
    pub fn new(cfg: &MqttConfig) -> Self {
        let mut options = MqttOptions::new(cfg.client_id.clone(), cfg.host.clone(), cfg.port);
        options.set_keep_alive(KEEP_ALIVE);
        options.set_clean_start(true);
        if let Some(user) = cfg.user.as_deref().filter(|u| !u.is_empty()) {
            options.set_credentials(user, cfg.password.clone().unwrap_or_default());
        }

        let (client, eventloop) = AsyncClient::new(options, REQUEST_CAPACITY);
        Self {
            client,
            eventloop,
            pending: VecDeque::new(),
            subscription: None,
            resubscribe_pending: false,
        }
    }

    async fn resubscribe(&mut self) -> Result<(), BridgeError> {
        if let Some((filter, qos)) = &self.subscription {
            tracing::info!(topic = %filter, "re-subscribing after reconnect");
            self.client
                .subscribe(filter.clone(), to_mqtt_qos(*qos))
                .await
                .map_err(|e| BridgeError::connection(format!("MQTT subscribe: {e}")))?;
            self.resubscribe_pending = true;
        }
        Ok(())
    }

    fn on_resubscribe_ack(&mut self, ack: SubAck) -> Result<(), BridgeError> {
        if !std::mem::take(&mut self.resubscribe_pending) {
            return Ok(());
        }
        match &self.subscription {
            Some((filter, qos)) => check_regranted(filter, *qos, &ack),
            None => Ok(()),
        }
    }
}

/// Брокер должен выдать при повторной подписке тот же QoS, что и при первой.
fn check_regranted(filter: &str, requested: QoS, ack: &SubAck) -> Result<(), BridgeError> {
    if ack.granted_qos() == Some(requested) {
        tracing::info!(topic = %filter, qos = %requested, "re-subscribed");
        return Ok(());
    }
    Err(BridgeError::connection(format!(
        "MQTT re-subscribe to '{filter}' rejected: requested qos {requested}, broker answered {:#04x}",
        ack.reason_code
    )))
}

fn to_mqtt_qos(qos: QoS) -> MqttQoS {
    match qos {
        QoS::AtMostOnce => MqttQoS::AtMostOnce,
        QoS::AtLeastOnce => MqttQoS::AtLeastOnce,
        QoS::ExactlyOnce => MqttQoS::ExactlyOnce,
    }
}

fn conn_ack(code: ConnectReturnCode) -> ConnAck {
    match code {
        ConnectReturnCode::Success => ConnAck::success(),
        other => ConnAck {
            reason_code: UNSPECIFIED_ERROR,
            reason: Some(format!("{other:?}")),
        },
    }
}

fn sub_ack(code: Option<&SubscribeReasonCode>) -> SubAck {
    match code {
        Some(SubscribeReasonCode::Success(qos)) => SubAck { reason_code: *qos as u8 },
        _ => SubAck { reason_code: UNSPECIFIED_ERROR },
    }
}

fn inbound(publish: Publish) -> InboundMessage {
    InboundMessage {
        topic: String::from_utf8_lossy(&publish.topic).into_owned(),
        payload: publish.payload.to_vec(),
        properties: publish
            .properties
            .map(|p| p.user_properties)
            .unwrap_or_default(),
    }
}

impl MessageTransport for MqttTransport {
    fn connect(&mut self) -> Pin<Box<dyn Future<Output = Result<ConnAck, BridgeError>> + Send + '_>> {
        Box::pin(async move {
            loop {
                match self.eventloop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(ack))) => return Ok(conn_ack(ack.code)),
                    Ok(_) => {}
                    Err(ConnectionError::ConnectionRefused(code)) => return Ok(conn_ack(code)),
                    Err(e) => return Err(BridgeError::connection(format!("MQTT connect: {e}"))),
                }
            }
        })
    }

    fn subscribe(
        &mut self,
        filter: &str,
        qos: QoS,
    ) -> Pin<Box<dyn Future<Output = Result<SubAck, BridgeError>> + Send + '_>> {
        let filter = filter.to_string();
        Box::pin(async move {
            self.client
                .subscribe(filter.clone(), to_mqtt_qos(qos))
                .await
                .map_err(|e| BridgeError::connection(format!("MQTT subscribe: {e}")))?;

            loop {
                match self.eventloop.poll().await {
                    Ok(Event::Incoming(Packet::SubAck(ack))) => {
                        let ack = sub_ack(ack.return_codes.first());
                        if ack.granted_qos().is_some() {
                            self.subscription = Some((filter, qos));
                        }
                        return Ok(ack);
                    }
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        self.pending.push_back(inbound(publish));
                    }
                    Ok(_) => {}
                    Err(e) => return Err(BridgeError::connection(format!("MQTT subscribe: {e}"))),
                }
            }
        })
    }

    fn next_message(
        &mut self,
    ) -> Pin<Box<dyn Future<Output = Result<Option<InboundMessage>, BridgeError>> + Send + '_>> {
        Box::pin(async move {
            if let Some(message) = self.pending.pop_front() {
                return Ok(Some(message));
            }

            loop {
                match self.eventloop.poll().await {
                    Ok(Event::Incoming(Packet::Publish(publish))) => return Ok(Some(inbound(publish))),
                    Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                        let ack = conn_ack(ack.code);
                        if !ack.is_success() {
                            return Err(BridgeError::connection(format!(
                                "MQTT reconnect rejected: {}",
                                ack.reason.unwrap_or_default()
                            )));
                        }
                        self.resubscribe().await?;
                    }
                    Ok(Event::Incoming(Packet::SubAck(ack))) => {
                        self.on_resubscribe_ack(sub_ack(ack.return_codes.first()))?;
                    }
                    Ok(Event::Incoming(Packet::Disconnect(_))) => {
                        tracing::warn!("broker sent disconnect");
                    }
                    Ok(_) => {}
                    Err(ConnectionError::ConnectionRefused(code)) => {
                        return Err(BridgeError::connection(format!("MQTT reconnect refused: {code:?}")));
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "MQTT connection error, retrying");
                        tokio::time::sleep(RETRY_DELAY).await;
                    }
                }
            }
        })
    }

    fn disconnect(&mut self) -> Pin<Box<dyn Future<Output = Result<(), BridgeError>> + Send + '_>> {
        Box::pin(async move {
            self.client
                .disconnect()
                .await
                .map_err(|e| BridgeError::connection(format!("MQTT disconnect: {e}")))?;

            // отдать DISCONNECT в сокет; event loop вернёт ошибку после отправки
            let flush = async {
                while self.eventloop.poll().await.is_ok() {}
            };
            let _ = tokio::time::timeout(FLUSH_TIMEOUT, flush).await;
            tracing::info!("MQTT disconnected");
            Ok(())
        })
    }
}

// ---- Config ----

#[derive(Debug, Clone, serde::Deserialize)]
pub struct MqttConfig {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_client_id")]
    pub client_id: String,
    /// Topic filter подписки, например `+/+`.
    pub topic: String,
    #[serde(default = "default_qos")]
    pub qos: QoS,
}

pub fn default_port() -> u16 {
    1883
}
pub fn default_client_id() -> String {
    "taos-bridge".into()
}
pub fn default_qos() -> QoS {
    QoS::AtLeastOnce
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults() {
        let cfg: MqttConfig = serde_json::from_str(r#"{"host": "broker", "topic": "+/+"}"#).unwrap();
        assert_eq!(cfg.port, 1883);
        assert_eq!(cfg.client_id, "taos-bridge");
        assert_eq!(cfg.qos, QoS::AtLeastOnce);
        assert!(cfg.user.is_none());
    }

    #[test]
    fn qos_out_of_range_is_rejected() {
        let res: Result<MqttConfig, _> = serde_json::from_str(r#"{"host": "b", "topic": "t", "qos": 3}"#);
        assert!(res.is_err());
    }

    #[test]
    fn refused_connack_keeps_reason() {
        let ack = conn_ack(ConnectReturnCode::NotAuthorized);
        assert!(!ack.is_success());
        assert_eq!(ack.reason.as_deref(), Some("NotAuthorized"));
        assert!(conn_ack(ConnectReturnCode::Success).is_success());
    }

    #[test]
    fn suback_maps_granted_qos() {
        let ack = sub_ack(Some(&SubscribeReasonCode::Success(MqttQoS::AtLeastOnce)));
        assert_eq!(ack.granted_qos(), Some(QoS::AtLeastOnce));

        let ack = sub_ack(Some(&SubscribeReasonCode::NotAuthorized));
        assert_eq!(ack.granted_qos(), None);

        assert_eq!(sub_ack(None).granted_qos(), None);
    }

    #[test]
    fn regranted_qos_must_match() {
        assert!(check_regranted("+/+", QoS::AtLeastOnce, &SubAck::granted(QoS::AtLeastOnce)).is_ok());

        let err = check_regranted("+/+", QoS::ExactlyOnce, &SubAck::granted(QoS::AtMostOnce)).unwrap_err();
        assert!(err.is_connection());
        assert_eq!(
            err.message(),
            "MQTT re-subscribe to '+/+' rejected: requested qos 2, broker answered 0x00"
        );

        let denied = sub_ack(Some(&SubscribeReasonCode::NotAuthorized));
        assert!(check_regranted("+/+", QoS::AtLeastOnce, &denied).unwrap_err().is_connection());
    }

    #[test]
    fn only_a_pending_resubscribe_is_checked() {
        let cfg: MqttConfig = serde_json::from_str(r#"{"host": "broker", "topic": "+/+"}"#).unwrap();
        let mut transport = MqttTransport::new(&cfg);
        transport.subscription = Some(("+/+".into(), QoS::ExactlyOnce));
        let downgraded = SubAck::granted(QoS::AtMostOnce);

        assert!(transport.on_resubscribe_ack(downgraded.clone()).is_ok());

        transport.resubscribe_pending = true;
        let err = transport.on_resubscribe_ack(downgraded.clone()).unwrap_err();
        assert!(err.is_connection());
        assert!(!transport.resubscribe_pending);

        transport.resubscribe_pending = true;
        assert!(transport.on_resubscribe_ack(SubAck::granted(QoS::ExactlyOnce)).is_ok());
    }
}
