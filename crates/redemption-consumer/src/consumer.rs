//! 队列监听
//!
//! 状态：Disconnected → Connected → Consuming，会话中断后回到 Disconnected，
//! 固定间隔后无限重连。每条消息处理完（无论结果）都会确认，从不重新入队。
//! 关闭信号只在消息之间和重连等待期间生效，处理中的消息总会完成并确认。

use std::sync::Arc;
use std::time::Duration;

use redemption_shared::amqp::{AmqpMessage, QueueConnector, QueueSession};
use redemption_shared::observability::metrics::{record_connect_attempt, record_message_outcome};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::processor::RedemptionProcessor;

pub struct RedemptionConsumer<C: QueueConnector> {
    connector: C,
    processor: Arc<RedemptionProcessor>,
    reconnect_delay: Duration,
}

/// 会话结束的原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionEnd {
    Shutdown,
    Interrupted,
}

fn shutdown_requested(shutdown: &watch::Receiver<bool>) -> bool {
    *shutdown.borrow()
}

/// 等待重连间隔，期间收到关闭信号返回 true
async fn wait_or_shutdown(shutdown: &mut watch::Receiver<bool>, delay: Duration) -> bool {
    if shutdown_requested(shutdown) {
        return true;
    }
    tokio::select! {
        biased;

        changed = shutdown.changed() => changed.is_err() || shutdown_requested(shutdown),
        _ = tokio::time::sleep(delay) => false,
    }
}

impl<C: QueueConnector> RedemptionConsumer<C> {
    pub fn new(connector: C, processor: Arc<RedemptionProcessor>, reconnect_delay: Duration) -> Self {
        Self {
            connector,
            processor,
            reconnect_delay,
        }
    }

    /// 启动监听循环，直到收到关闭信号
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!("兑换消费者已启动");

        loop {
            if shutdown_requested(&shutdown) {
                break;
            }

            let mut session = match self.connector.connect().await {
                Ok(session) => {
                    record_connect_attempt(true);
                    session
                }
                Err(e) => {
                    record_connect_attempt(false);
                    error!(
                        error = %e,
                        retry_in_secs = self.reconnect_delay.as_secs_f64(),
                        "连接 RabbitMQ 失败，稍后重试"
                    );
                    if wait_or_shutdown(&mut shutdown, self.reconnect_delay).await {
                        break;
                    }
                    continue;
                }
            };

            info!("等待兑换消息");
            let end = self.consume(&mut session, &mut shutdown).await;
            session.close().await;

            if end == SessionEnd::Shutdown {
                break;
            }
            warn!(
                retry_in_secs = self.reconnect_delay.as_secs_f64(),
                "消费会话中断，稍后重连"
            );
            if wait_or_shutdown(&mut shutdown, self.reconnect_delay).await {
                break;
            }
        }

        info!("兑换消费者已停止");
    }

    async fn consume(
        &self,
        session: &mut C::Session,
        shutdown: &mut watch::Receiver<bool>,
    ) -> SessionEnd {
        loop {
            tokio::select! {
                // 偏向关闭信号，保证收到关闭时不再取新消息
                biased;

                changed = shutdown.changed() => {
                    if changed.is_err() || shutdown_requested(shutdown) {
                        info!("收到关闭信号，停止消费");
                        return SessionEnd::Shutdown;
                    }
                }

                next = session.next_message() => {
                    match next {
                        Some(Ok(message)) => self.handle(message).await,
                        Some(Err(e)) => {
                            error!(error = %e, "接收消息出错");
                            return SessionEnd::Interrupted;
                        }
                        None => {
                            warn!("消息流已结束");
                            return SessionEnd::Interrupted;
                        }
                    }
                }
            }
        }
    }

    /// 处理并确认一条消息
    async fn handle(&self, message: AmqpMessage) {
        let delivery_tag = message.delivery_tag;
        debug!(
            delivery_tag,
            routing_key = %message.routing_key,
            redelivered = message.redelivered,
            "收到消息"
        );

        match self.processor.process(&message.payload).await {
            Ok(outcome) => {
                record_message_outcome(outcome.label());
                info!(delivery_tag, outcome = outcome.label(), "消息处理完成");
            }
            Err(e) => {
                record_message_outcome("error");
                error!(delivery_tag, error = %e, "消息处理失败");
            }
        }

        if let Err(e) = message.ack().await {
            error!(delivery_tag, error = %e, "确认消息失败");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processor::tests::{sample_claim, signed_payload, untouched_processor};
    use async_trait::async_trait;
    use redemption_shared::amqp::Acknowledger;
    use redemption_shared::error::{Result as SharedResult, SharedError};
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingAcker {
        acks: AtomicUsize,
    }

    #[async_trait]
    impl Acknowledger for CountingAcker {
        async fn ack(&self) -> SharedResult<()> {
            self.acks.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct FakeSession {
        messages: VecDeque<AmqpMessage>,
    }

    #[async_trait]
    impl QueueSession for FakeSession {
        async fn next_message(&mut self) -> Option<SharedResult<AmqpMessage>> {
            self.messages.pop_front().map(Ok)
        }

        async fn close(&mut self) {}
    }

    /// 前 `failures` 次连接失败，之后每次连接依次取出一个会话；
    /// 会话用尽时发出关闭信号
    struct FakeConnector {
        failures: usize,
        attempts: AtomicUsize,
        declared: Arc<AtomicUsize>,
        sessions: Mutex<VecDeque<Vec<AmqpMessage>>>,
        shutdown: watch::Sender<bool>,
    }

    #[async_trait]
    impl QueueConnector for FakeConnector {
        type Session = FakeSession;

        async fn connect(&self) -> SharedResult<FakeSession> {
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
            if attempt < self.failures {
                return Err(SharedError::Amqp("connection refused".to_string()));
            }
            let next = self.sessions.lock().unwrap().pop_front();
            match next {
                Some(messages) => {
                    self.declared.fetch_add(1, Ordering::SeqCst);
                    Ok(FakeSession {
                        messages: messages.into(),
                    })
                }
                None => {
                    let _ = self.shutdown.send(true);
                    Err(SharedError::Amqp("no more sessions".to_string()))
                }
            }
        }
    }

    fn message(tag: u64, payload: &[u8], acker: &Arc<CountingAcker>) -> AmqpMessage {
        AmqpMessage::new(tag, "service.redemption", payload.to_vec(), acker.clone())
    }

    fn connector(
        failures: usize,
        sessions: Vec<Vec<AmqpMessage>>,
    ) -> (FakeConnector, Arc<AtomicUsize>, watch::Receiver<bool>) {
        let (tx, rx) = watch::channel(false);
        let declared = Arc::new(AtomicUsize::new(0));
        let connector = FakeConnector {
            failures,
            attempts: AtomicUsize::new(0),
            declared: declared.clone(),
            sessions: Mutex::new(sessions.into()),
            shutdown: tx,
        };
        (connector, declared, rx)
    }

    #[tokio::test]
    async fn test_reconnect_declares_once_after_failure() {
        let dir = tempfile::tempdir().unwrap();
        let acker = Arc::new(CountingAcker::default());
        let (connector, declared, shutdown) =
            connector(1, vec![vec![message(1, b"not json", &acker)]]);

        let consumer = RedemptionConsumer::new(
            connector,
            Arc::new(untouched_processor(dir.path()).await),
            Duration::from_millis(5),
        );
        tokio::time::timeout(Duration::from_secs(5), consumer.run(shutdown))
            .await
            .unwrap();

        assert_eq!(declared.load(Ordering::SeqCst), 1);
        assert_eq!(acker.acks.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_every_message_is_acked() {
        let dir = tempfile::tempdir().unwrap();
        let acker = Arc::new(CountingAcker::default());
        let expired = signed_payload(&sample_claim(), Some(-60));
        let messages = vec![
            message(1, b"not json", &acker),
            message(2, br#"{"request_type":"service_redemption"}"#, &acker),
            message(3, br#"{"request_type":"x","apikey":"bad.token.value"}"#, &acker),
            message(4, &expired, &acker),
        ];
        let (connector, _, shutdown) = connector(0, vec![messages]);

        let consumer = RedemptionConsumer::new(
            connector,
            Arc::new(untouched_processor(dir.path()).await),
            Duration::from_millis(5),
        );
        tokio::time::timeout(Duration::from_secs(5), consumer.run(shutdown))
            .await
            .unwrap();

        assert_eq!(acker.acks.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_shutdown_before_start_never_connects() {
        let dir = tempfile::tempdir().unwrap();
        let (connector, declared, _) = connector(0, vec![vec![]]);
        let (tx, rx) = watch::channel(false);
        tx.send(true).unwrap();

        let consumer = RedemptionConsumer::new(
            connector,
            Arc::new(untouched_processor(dir.path()).await),
            Duration::from_secs(60),
        );
        tokio::time::timeout(Duration::from_secs(5), consumer.run(rx))
            .await
            .unwrap();

        assert_eq!(declared.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_shutdown_interrupts_reconnect_wait() {
        let (tx, mut rx) = watch::channel(false);
        let waiter = tokio::spawn(async move {
            wait_or_shutdown(&mut rx, Duration::from_secs(3600)).await
        });
        tx.send(true).unwrap();

        let stopped = tokio::time::timeout(Duration::from_secs(5), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(stopped);
    }
}
