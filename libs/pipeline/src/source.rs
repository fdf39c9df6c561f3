use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use bridge_api::{MessageTransport, NormalizedRecord, QoS};

use crate::error::PipelineError;
use crate::normalize::normalize;

const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(5);

// ═══════════════════════════════════════════════════════════════
//  Session state
// ═══════════════════════════════════════════════════════════════

/// Состояние транспортной сессии subscription loop'а.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Subscribed,
    Draining,
    Closed,
}

// ═══════════════════════════════════════════════════════════════
//  Subscription loop: transport → normalize → channel
// ═══════════════════════════════════════════════════════════════

/// Владеет транспортной сессией: подписывается на topic filter,
/// нормализует каждое сообщение и отправляет запись в bounded канал.
///
/// Битое сообщение логируется и пропускается, цикл не останавливается.
pub struct SubscriptionLoop {
    transport: Box<dyn MessageTransport>,
    filter: String,
    qos: QoS,
    state: SessionState,
}

impl SubscriptionLoop {
    pub fn new(transport: Box<dyn MessageTransport>, filter: impl Into<String>, qos: QoS) -> Self {
        Self {
            transport,
            filter: filter.into(),
            qos,
            state: SessionState::Disconnected,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Работать до отмены, закрытия сессии или фатальной ошибки.
    /// Сессия закрывается в любом случае.
    pub async fn run(
        &mut self,
        tx: mpsc::Sender<NormalizedRecord>,
        token: CancellationToken,
    ) -> Result<(), PipelineError> {
        let result = self.session(&tx, &token).await;
        self.close().await;
        result
    }

    async fn session(
        &mut self,
        tx: &mpsc::Sender<NormalizedRecord>,
        token: &CancellationToken,
    ) -> Result<(), PipelineError> {
        self.transition(SessionState::Connecting);

        let ack = tokio::select! {
            biased;
            _ = token.cancelled() => return Ok(()),
            ack = self.transport.connect() => ack.map_err(PipelineError::Transport)?,
        };
        if !ack.is_success() {
            return Err(PipelineError::TransportHandshake {
                reason_code: ack.reason_code,
                reason: ack.reason.unwrap_or_default(),
            });
        }
        tracing::info!("transport connected");

        let sub = tokio::select! {
            biased;
            _ = token.cancelled() => return Ok(()),
            sub = self.transport.subscribe(&self.filter, self.qos) => sub.map_err(PipelineError::Transport)?,
        };
        if sub.granted_qos() != Some(self.qos) {
            return Err(PipelineError::SubscriptionRejected {
                topic: self.filter.clone(),
                requested: self.qos,
                granted: sub.reason_code,
            });
        }
        self.transition(SessionState::Subscribed);
        tracing::info!(topic = %self.filter, qos = %self.qos, "subscribed");

        loop {
            let message = tokio::select! {
                biased;
                _ = token.cancelled() => break,
                message = self.transport.next_message() => message.map_err(PipelineError::Transport)?,
            };
            let Some(message) = message else {
                tracing::info!("transport session closed");
                break;
            };

            let record = match normalize(&message) {
                Ok(record) => record,
                Err(e) => {
                    tracing::warn!(topic = %message.topic, error = %e, "discarding message");
                    continue;
                }
            };
            tracing::debug!(
                database = %record.database,
                table = %record.table,
                metrics = record.metrics.len(),
                tags = record.tags.len(),
                "normalized"
            );

            // back-pressure: ждём место в канале, но не дольше отмены
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                sent = tx.send(record) => {
                    if sent.is_err() {
                        tracing::info!("record channel closed");
                        break;
                    }
                }
            }
        }

        Ok(())
    }

    async fn close(&mut self) {
        if self.state == SessionState::Disconnected {
            self.transition(SessionState::Closed);
            return;
        }

        self.transition(SessionState::Draining);
        match tokio::time::timeout(DISCONNECT_TIMEOUT, self.transport.disconnect()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!(error = %e, "failed to disconnect transport"),
            Err(_) => tracing::warn!("transport disconnect timed out"),
        }
        self.transition(SessionState::Closed);
    }

    fn transition(&mut self, next: SessionState) {
        tracing::debug!(from = ?self.state, to = ?next, "session state");
        self.state = next;
    }
}

/// Запустить subscription loop отдельной задачей. Фатальная ошибка
/// уходит в `fatal`, всё остальное остаётся внутри задачи.
pub fn spawn_subscription(
    mut subscription: SubscriptionLoop,
    tx: mpsc::Sender<NormalizedRecord>,
    fatal: mpsc::Sender<PipelineError>,
    token: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        tracing::info!(topic = %subscription.filter, "subscription starting");
        if let Err(e) = subscription.run(tx, token).await {
            tracing::error!(error = %e, "subscription failed");
            let _ = fatal.send(e).await;
        }
        tracing::info!("subscription stopped");
    })
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::future::Future;
    use std::pin::Pin;

    use bridge_api::{BridgeError, ConnAck, InboundMessage, SubAck};

    use super::*;

    /// Отдаёт заготовленные сообщения, затем закрывает сессию.
    struct ScriptedTransport {
        connack: ConnAck,
        granted: u8,
        messages: VecDeque<InboundMessage>,
    }

    impl ScriptedTransport {
        fn new(messages: Vec<InboundMessage>) -> Self {
            Self {
                connack: ConnAck::success(),
                granted: 1,
                messages: messages.into(),
            }
        }
    }

    impl MessageTransport for ScriptedTransport {
        fn connect(&mut self) -> Pin<Box<dyn Future<Output = Result<ConnAck, BridgeError>> + Send + '_>> {
            Box::pin(async move { Ok(self.connack.clone()) })
        }

        fn subscribe(
            &mut self,
            _filter: &str,
            _qos: QoS,
        ) -> Pin<Box<dyn Future<Output = Result<SubAck, BridgeError>> + Send + '_>> {
            Box::pin(async move { Ok(SubAck { reason_code: self.granted }) })
        }

        fn next_message(
            &mut self,
        ) -> Pin<Box<dyn Future<Output = Result<Option<InboundMessage>, BridgeError>> + Send + '_>> {
            Box::pin(async move { Ok(self.messages.pop_front()) })
        }

        fn disconnect(&mut self) -> Pin<Box<dyn Future<Output = Result<(), BridgeError>> + Send + '_>> {
            Box::pin(async move { Ok(()) })
        }
    }

    #[tokio::test]
    async fn negative_connack_is_fatal() {
        let mut transport = ScriptedTransport::new(Vec::new());
        transport.connack = ConnAck { reason_code: 0x86, reason: Some("bad user name or password".into()) };
        let mut sub = SubscriptionLoop::new(Box::new(transport), "sensors/#", QoS::AtLeastOnce);
        let (tx, _rx) = mpsc::channel(1);

        let err = sub.run(tx, CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, PipelineError::TransportHandshake { reason_code: 0x86, .. }));
        assert!(err.is_fatal());
        assert_eq!(sub.state(), SessionState::Closed);
    }

    #[tokio::test]
    async fn downgraded_qos_is_fatal() {
        let mut transport = ScriptedTransport::new(Vec::new());
        transport.granted = 0;
        let mut sub = SubscriptionLoop::new(Box::new(transport), "sensors/#", QoS::AtLeastOnce);
        let (tx, _rx) = mpsc::channel(1);

        let err = sub.run(tx, CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, PipelineError::SubscriptionRejected { granted: 0, .. }));
    }

    #[tokio::test]
    async fn bad_messages_are_skipped() {
        let transport = ScriptedTransport::new(vec![
            InboundMessage::new("sensors/room1", b"timestamp;temp\n1257894000;12.34;99".to_vec()),
            InboundMessage::new("sensors", b"temp\n1".to_vec()),
            InboundMessage::new("sensors/room2", b"timestamp;temp\n1257894000;12.34".to_vec()),
        ]);
        let mut sub = SubscriptionLoop::new(Box::new(transport), "sensors/#", QoS::AtLeastOnce);
        let (tx, mut rx) = mpsc::channel(8);

        sub.run(tx, CancellationToken::new()).await.unwrap();

        let record = rx.recv().await.unwrap();
        assert_eq!(record.table, "room2");
        assert!(rx.recv().await.is_none());
        assert_eq!(sub.state(), SessionState::Closed);
    }

    #[tokio::test]
    async fn cancelled_before_connect_still_closes() {
        let token = CancellationToken::new();
        token.cancel();
        let mut sub = SubscriptionLoop::new(
            Box::new(ScriptedTransport::new(Vec::new())),
            "sensors/#",
            QoS::AtLeastOnce,
        );
        let (tx, _rx) = mpsc::channel(1);

        sub.run(tx, token).await.unwrap();
        assert_eq!(sub.state(), SessionState::Closed);
    }
}
