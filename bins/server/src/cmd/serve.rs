use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use bridge_api::Readiness;
use pipeline::{PipelineError, SubscriptionLoop, WritePipeline, spawn_subscription, spawn_writer};
use storage_tdengine::TdengineBackend;
use transport_mqtt::MqttTransport;

use crate::config::{Effective, ServeArgs};
use crate::error::ServerError;

pub async fn run(args: ServeArgs) -> Result<(), ServerError> {
    tracing::info!("bridge-server starting");

    // --- Load config ---
    let eff = Effective::new(&args)?;
    tracing::info!(
        config = %args.config,
        mqtt = %format!("{}:{}", eff.mqtt.host, eff.mqtt.port),
        topic = %eff.mqtt.topic,
        qos = %eff.mqtt.qos,
        tdengine = %format!("{}:{}", eff.tdengine.host, eff.tdengine.port),
        "loaded config"
    );

    // --- CancellationToken for graceful shutdown ---
    let token = CancellationToken::new();
    let readiness = Readiness::new();

    let (record_tx, record_rx) = mpsc::channel(eff.pipeline.buffer);
    let (fatal_tx, mut fatal_rx) = mpsc::channel::<PipelineError>(2);

    // --- Writer ---
    let backend = TdengineBackend::new(&eff.tdengine)?;
    let writer = WritePipeline::new(Box::new(backend), readiness.clone());

    // --- Subscription ---
    let transport = MqttTransport::new(&eff.mqtt);
    let subscription = SubscriptionLoop::new(Box::new(transport), eff.mqtt.topic.clone(), eff.mqtt.qos);

    let mut handles: Vec<JoinHandle<()>> = vec![
        spawn_writer(writer, record_rx, fatal_tx.clone(), token.clone()),
        spawn_subscription(subscription, record_tx, fatal_tx, token.clone()),
    ];

    // --- Status API ---
    let api_port = eff.api_port;
    let api_readiness = readiness.clone();
    let api_token = token.clone();
    handles.push(tokio::spawn(async move {
        if let Err(e) = status_api_server::run(api_port, api_readiness, api_token).await {
            tracing::error!(error = %e, "status api error");
        }
    }));

    tracing::info!("bridge ready");

    // --- Ожидание сигнала или фатальной ошибки ---
    let fatal = tokio::select! {
        signal = shutdown_signal() => {
            signal?;
            tracing::info!("shutdown signal received");
            None
        }
        fatal = fatal_rx.recv() => {
            if fatal.is_none() {
                tracing::info!("pipeline tasks finished");
            }
            fatal
        }
    };
    tracing::info!("shutting down...");

    // Signal all tasks to stop cooperatively
    token.cancel();
    drain(handles, eff.pipeline.drain_timeout()).await;

    match fatal {
        Some(e) => Err(e.into()),
        None => {
            tracing::info!("shutdown complete");
            Ok(())
        }
    }
}

/// Ждать задачи не дольше `timeout`, оставшиеся прервать.
async fn drain(mut handles: Vec<JoinHandle<()>>, timeout: Duration) {
    // завершённый JoinHandle нельзя опрашивать повторно
    let mut joined = 0;
    let wait_all = async {
        for h in handles.iter_mut() {
            let _ = h.await;
            joined += 1;
        }
    };
    if tokio::time::timeout(timeout, wait_all).await.is_ok() {
        return;
    }

    tracing::warn!(?timeout, remaining = handles.len() - joined, "drain timed out, aborting tasks");
    for h in handles.into_iter().skip(joined) {
        h.abort();
        let _ = h.await;
    }
}

/// Ctrl+C или SIGTERM.
async fn shutdown_signal() -> Result<(), ServerError> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut terminate = signal(SignalKind::terminate())?;
        tokio::select! {
            res = tokio::signal::ctrl_c() => res?,
            _ = terminate.recv() => {}
        }
    }

    #[cfg(not(unix))]
    tokio::signal::ctrl_c().await?;

    Ok(())
}
