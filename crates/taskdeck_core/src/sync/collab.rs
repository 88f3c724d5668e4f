//! Collaboration channel: persistent reconnecting push connection.
//!
//! # Responsibility
//! - Hold a WebSocket open against the remote authority and translate
//!   inbound `REFRESH_MERGE` envelopes into partial resync commands.
//! - Deliver outbound envelopes notifying peers after local mutations.
//!
//! # Invariants
//! - Reconnects use exponential backoff with a capped attempt count; a
//!   clean server close resets the counter.
//! - Duplicate or late refresh signals are harmless: they trigger another
//!   idempotent partial cycle.
//! - Unknown envelope types are logged and dropped at the boundary.
//!
//! # See also
//! - docs/architecture/sync-protocol.md

use crate::notify::{ChangeEvent, NotificationBus};
use crate::session::{SessionContext, SyncConfig};
use crate::sync::protocol::{decode_envelope, encode_envelope, Envelope};
use crate::sync::SyncCommand;
use futures_util::{SinkExt, StreamExt};
use log::{debug, info, warn};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};

const PING_INTERVAL: Duration = Duration::from_secs(30);
const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// How one serve loop ended.
enum ChannelExit {
    /// Server closed or the stream ended cleanly; reconnect applies.
    ServerClosed,
    /// Local side shut down; stop for good.
    LocalShutdown,
}

/// The channel's execution context. Communicates with the engine context
/// exclusively through typed messages.
pub struct CollabChannel {
    url: String,
    config: SyncConfig,
    commands: mpsc::Sender<SyncCommand>,
    outbound: mpsc::Receiver<Envelope>,
    bus: NotificationBus,
}

impl CollabChannel {
    /// Builds the channel from session data. Returns `None` for offline
    /// sessions, leaving the channel inert.
    pub fn from_session(
        session: &SessionContext,
        config: SyncConfig,
        commands: mpsc::Sender<SyncCommand>,
        outbound: mpsc::Receiver<Envelope>,
        bus: NotificationBus,
    ) -> Option<Self> {
        let url = channel_url(session)?;
        Some(Self {
            url,
            config,
            commands,
            outbound,
            bus,
        })
    }

    /// Runs the reconnect loop until shutdown or the attempt cap.
    pub async fn run(mut self) {
        let mut attempts = 0u32;

        loop {
            info!("event=collab_connect module=collab status=start attempt={attempts}");

            let served = serve_connection(
                &self.url,
                &self.commands,
                &mut self.outbound,
                &self.bus,
            )
            .await;

            match served {
                Ok(ChannelExit::LocalShutdown) => {
                    info!("event=collab_channel module=collab status=stopped");
                    return;
                }
                Ok(ChannelExit::ServerClosed) => {
                    attempts = 0;
                }
                Err(message) => {
                    warn!(
                        "event=collab_connect module=collab status=error attempt={attempts} error={message}"
                    );
                    attempts += 1;
                    if attempts >= self.config.max_reconnect_attempts {
                        warn!(
                            "event=collab_channel module=collab status=gave_up attempts={attempts}"
                        );
                        self.bus.publish(ChangeEvent::ChannelDown);
                        return;
                    }
                }
            }

            self.bus.publish(ChangeEvent::ChannelDown);
            let delay = backoff_delay(self.config.reconnect_base_delay, attempts);
            debug!(
                "event=collab_reconnect module=collab status=waiting delay_ms={}",
                delay.as_millis()
            );
            tokio::time::sleep(delay).await;
        }
    }
}

/// One connection lifetime: connect, then shuttle frames until the server
/// closes, an error occurs, or the local side shuts down.
async fn serve_connection(
    url: &str,
    commands: &mpsc::Sender<SyncCommand>,
    outbound: &mut mpsc::Receiver<Envelope>,
    bus: &NotificationBus,
) -> Result<ChannelExit, String> {
    let (stream, _) = connect_async(url)
        .await
        .map_err(|err| format!("websocket connect failed: {err}"))?;

    info!("event=collab_connect module=collab status=ok");
    bus.publish(ChangeEvent::ChannelUp);

    let (mut write, mut read) = stream.split();
    let mut ping = tokio::time::interval(PING_INTERVAL);
    ping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // Consume the immediate first tick so pings start one interval in.
    ping.tick().await;

    loop {
        tokio::select! {
            _ = ping.tick() => {
                if let Err(err) = write.send(Message::Ping(Vec::new())).await {
                    return Err(format!("ping failed: {err}"));
                }
            }

            envelope = outbound.recv() => match envelope {
                Some(envelope) => {
                    let frame = encode_envelope(&envelope);
                    if let Err(err) = write.send(Message::Binary(frame)).await {
                        return Err(format!("outbound send failed: {err}"));
                    }
                }
                // All outbound senders dropped: the session is over.
                None => {
                    let _ = write.close().await;
                    return Ok(ChannelExit::LocalShutdown);
                }
            },

            frame = read.next() => match frame {
                Some(Ok(Message::Binary(data))) => {
                    if !handle_frame(commands, &data).await {
                        return Ok(ChannelExit::LocalShutdown);
                    }
                }
                Some(Ok(Message::Text(text))) => {
                    if !handle_frame(commands, text.as_bytes()).await {
                        return Ok(ChannelExit::LocalShutdown);
                    }
                }
                Some(Ok(Message::Close(_))) => {
                    info!("event=collab_channel module=collab status=server_closed");
                    return Ok(ChannelExit::ServerClosed);
                }
                Some(Ok(_)) => {}
                Some(Err(err)) => return Err(format!("websocket error: {err}")),
                None => return Err("websocket stream ended".to_string()),
            },
        }
    }
}

/// Decodes one inbound frame. Returns `false` when the engine side is gone
/// and the channel should shut down.
async fn handle_frame(commands: &mpsc::Sender<SyncCommand>, data: &[u8]) -> bool {
    match decode_envelope(data) {
        Some(Envelope::RefreshMerge { origin }) => {
            debug!(
                "event=collab_refresh module=collab status=ok origin={}",
                origin.as_deref().unwrap_or("unknown")
            );
            commands.send(SyncCommand::Partial).await.is_ok()
        }
        None => {
            debug!(
                "event=collab_frame module=collab status=dropped reason=unknown_envelope bytes={}",
                data.len()
            );
            true
        }
    }
}

/// Derives the channel URL from the session endpoint: http(s) becomes
/// ws(s), with the session token carried as a query parameter.
fn channel_url(session: &SessionContext) -> Option<String> {
    let endpoint = session.endpoint()?;
    let ws_base = if let Some(rest) = endpoint.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = endpoint.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        endpoint.to_string()
    };
    let ws_base = ws_base.trim_end_matches('/');

    match session.session_token.as_deref() {
        Some(token) if !token.is_empty() => Some(format!("{ws_base}/ws?sessionToken={token}")),
        _ => Some(format!("{ws_base}/ws")),
    }
}

fn backoff_delay(base: Duration, attempts: u32) -> Duration {
    let shift = attempts.saturating_sub(1).min(16);
    let delay = base.saturating_mul(1u32 << shift);
    delay.min(MAX_BACKOFF)
}
