//! Bridge runtime: start the configured channel, feed the dispatcher, stop on signal.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::channels::{ChannelHandle, InboundEvent, SlackChannel, TelegramChannel};
use crate::config::{BridgeSettings, TransportSettings};
use crate::dispatch::Dispatcher;

/// Inbound queue depth between the channel task and the dispatcher.
const INBOUND_QUEUE: usize = 64;
/// Extra time given to an in-flight command after shutdown, on top of its timeout.
const DRAIN_GRACE: Duration = Duration::from_secs(5);

/// Start the selected transport and its inbound task.
fn start_channel(
    transport: &TransportSettings,
    inbound_tx: mpsc::Sender<InboundEvent>,
) -> Result<(Arc<dyn ChannelHandle>, JoinHandle<()>)> {
    match transport {
        TransportSettings::Slack {
            bot_token,
            app_token,
            api_base,
        } => {
            let slack = Arc::new(
                SlackChannel::new(api_base, app_token, bot_token).context("creating slack client")?,
            );
            let task = slack.clone().start_inbound(inbound_tx);
            let handle: Arc<dyn ChannelHandle> = slack;
            Ok((handle, task))
        }
        TransportSettings::Telegram { bot_token, api_base } => {
            let telegram = Arc::new(TelegramChannel::new(bot_token.clone(), api_base.clone()));
            let task = telegram.clone().start_inbound(inbound_tx);
            let handle: Arc<dyn ChannelHandle> = telegram;
            Ok((handle, task))
        }
    }
}

/// Run until SIGINT or SIGTERM. Commands already running are allowed to finish
/// (bounded by their own timeout) before the function returns.
pub async fn run_bridge(settings: BridgeSettings) -> Result<()> {
    let (inbound_tx, inbound_rx) = mpsc::channel::<InboundEvent>(INBOUND_QUEUE);
    let (channel, channel_task) = start_channel(&settings.transport, inbound_tx)?;
    log::info!(
        "{} channel started; accepting commands from conversation {}",
        channel.id(),
        settings.conversation_id
    );

    let dispatcher = Dispatcher::from_settings(&settings);
    let command_timeout = settings.local.command.timeout;
    let dispatch_channel = channel.clone();
    let mut dispatch_task = tokio::spawn(async move {
        dispatcher.run(inbound_rx, dispatch_channel).await;
    });

    shutdown_signal().await?;
    log::info!("shutdown signal received, stopping {} channel", channel.id());

    channel.stop();
    if let Err(e) = channel_task.await {
        log::debug!("channel task ended abnormally: {}", e);
    }

    // The channel task owned the only sender; the dispatcher exits once the queue is drained.
    match tokio::time::timeout(drain_window(command_timeout), &mut dispatch_task).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => log::warn!("dispatcher task failed: {}", e),
        Err(_) => {
            log::warn!("dispatcher did not drain in time, aborting");
            dispatch_task.abort();
        }
    }
    log::info!("bridge stopped");
    Ok(())
}

/// How long the dispatcher may keep running after shutdown starts.
fn drain_window(command_timeout: Duration) -> Duration {
    command_timeout.saturating_add(DRAIN_GRACE)
}

/// Completes on Ctrl+C or SIGTERM.
async fn shutdown_signal() -> Result<()> {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .context("installing Ctrl+C handler")
    };

    #[cfg(unix)]
    let terminate = async {
        let mut signal = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .context("installing SIGTERM handler")?;
        signal.recv().await;
        Ok::<(), anyhow::Error>(())
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<Result<()>>();

    tokio::select! {
        res = ctrl_c => res,
        res = terminate => res,
    }
}
