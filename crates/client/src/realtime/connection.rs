//! Realtime socket state and the native transport loop with auto-reconnect.

use thiserror::Error;

/// Connection state for the realtime socket
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting { attempt: u32 },
    Failed { reason: String },
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }

    pub fn is_connecting(&self) -> bool {
        matches!(
            self,
            ConnectionState::Connecting | ConnectionState::Reconnecting { .. }
        )
    }
}

/// Configuration for auto-reconnect behavior
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectConfig {
    /// Maximum number of reconnect attempts (0 = infinite)
    pub max_attempts: u32,
    /// Initial delay in milliseconds
    pub initial_delay_ms: u32,
    /// Maximum delay in milliseconds
    pub max_delay_ms: u32,
    /// Multiplier for exponential backoff
    pub backoff_multiplier: f32,
    /// Interval between `phoenix` heartbeats in milliseconds
    pub heartbeat_interval_ms: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            initial_delay_ms: 1000,
            max_delay_ms: 30000,
            backoff_multiplier: 1.5,
            heartbeat_interval_ms: 25000,
        }
    }
}

impl ReconnectConfig {
    /// Calculate delay for a given attempt number
    pub fn delay_for_attempt(&self, attempt: u32) -> u32 {
        let delay = self.initial_delay_ms as f32 * self.backoff_multiplier.powi(attempt as i32);
        (delay as u32).min(self.max_delay_ms)
    }

    /// Attempt counter to back off with after a socket that stayed open for
    /// `uptime` closes. Only a connection that outlived one heartbeat
    /// interval starts the backoff over.
    pub fn attempt_after_close(&self, attempt: u32, uptime: std::time::Duration) -> u32 {
        if uptime.as_millis() >= u128::from(self.heartbeat_interval_ms) {
            0
        } else {
            attempt
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RealtimeError {
    #[error("Channel {0} is already open")]
    DuplicateChannel(String),
    #[error("Realtime connection is not open")]
    NotConnected,
    #[error("Failed to queue realtime message: {0}")]
    Send(String),
}

#[cfg(not(target_arch = "wasm32"))]
pub(crate) use native::spawn_transport;

#[cfg(not(target_arch = "wasm32"))]
mod native {
    use std::sync::Arc;

    use futures_channel::mpsc::UnboundedReceiver;
    use futures_util::{SinkExt, StreamExt};
    use tokio_tungstenite::{connect_async, tungstenite::Message};
    use toologist_shared::PhoenixMessage;

    use super::{ConnectionState, ReconnectConfig};
    use crate::realtime::client::WeakClient;

    /// Start the connection management loop in a background tokio task.
    ///
    /// The loop ends once every [`RealtimeClient`](crate::realtime::RealtimeClient)
    /// clone is dropped.
    pub(crate) fn spawn_transport(
        client: WeakClient,
        url: String,
        receiver: UnboundedReceiver<PhoenixMessage>,
        reconnect_config: ReconnectConfig,
    ) {
        tokio::spawn(async move {
            let receiver = Arc::new(tokio::sync::Mutex::new(receiver));
            let mut attempt = 0u32;

            loop {
                let Some(handle) = client.upgrade() else {
                    crate::log_debug!("Realtime client dropped, stopping transport");
                    break;
                };

                if attempt == 0 {
                    handle.set_state(ConnectionState::Connecting);
                } else {
                    handle.set_state(ConnectionState::Reconnecting { attempt });
                }
                drop(handle);

                match connect_async(url.as_str()).await {
                    Ok((ws_stream, _response)) => {
                        let connected_at = std::time::Instant::now();
                        let Some(handle) = client.upgrade() else {
                            break;
                        };
                        handle.set_state(ConnectionState::Connected);
                        crate::log_info!("Realtime socket connected");
                        // Channels opened while offline, or joined before a drop.
                        handle.join_all();
                        drop(handle);

                        let (mut write, mut read) = ws_stream.split();
                        let (close_tx, mut close_rx) = tokio::sync::mpsc::unbounded_channel::<()>();

                        // Read task
                        let client_for_read = client.clone();
                        let close_tx_for_read = close_tx.clone();
                        let read_task = tokio::spawn(async move {
                            while let Some(msg_result) = read.next().await {
                                match msg_result {
                                    Ok(Message::Text(text)) => {
                                        match serde_json::from_str::<PhoenixMessage>(text.as_str()) {
                                            Ok(msg) => match client_for_read.upgrade() {
                                                Some(handle) => handle.dispatch(msg),
                                                None => break,
                                            },
                                            Err(e) => {
                                                crate::log_error!("Failed to parse realtime frame: {}", e)
                                            }
                                        }
                                    }
                                    Ok(Message::Close(_)) => {
                                        crate::log_info!("Realtime socket received close frame");
                                        break;
                                    }
                                    Ok(_) => {
                                        // Pings are answered by tungstenite; binary frames are unused.
                                    }
                                    Err(e) => {
                                        crate::log_error!("Realtime read error: {}", e);
                                        break;
                                    }
                                }
                            }
                            let _ = close_tx_for_read.send(());
                        });

                        // Write task, interleaving heartbeats with queued frames
                        let receiver_for_write = receiver.clone();
                        let client_for_write = client.clone();
                        let heartbeat_every =
                            std::time::Duration::from_millis(reconnect_config.heartbeat_interval_ms as u64);
                        let write_task = tokio::spawn(async move {
                            let mut rx = receiver_for_write.lock().await;
                            let mut heartbeat = tokio::time::interval(heartbeat_every);
                            heartbeat.tick().await;
                            loop {
                                let frame = tokio::select! {
                                    msg = rx.next() => match msg {
                                        Some(msg) => msg,
                                        None => {
                                            crate::log_info!("Outbox closed, stopping write task");
                                            break;
                                        }
                                    },
                                    _ = heartbeat.tick() => match client_for_write.upgrade() {
                                        Some(handle) => handle.heartbeat(),
                                        None => break,
                                    },
                                };

                                match serde_json::to_string(&frame) {
                                    Ok(json) => {
                                        crate::log_debug!("Realtime send: {}", json);
                                        if let Err(e) = write.send(Message::Text(json.into())).await {
                                            crate::log_error!("Realtime send failed: {}", e);
                                            break;
                                        }
                                    }
                                    Err(e) => crate::log_error!("Serialize failed: {}", e),
                                }
                            }
                            let _ = write.close().await;
                            let _ = close_tx.send(());
                        });

                        close_rx.recv().await;
                        read_task.abort();
                        write_task.abort();
                        crate::log_info!("Realtime socket closed");

                        let Some(handle) = client.upgrade() else {
                            break;
                        };
                        handle.set_state(ConnectionState::Disconnected);
                        handle.mark_all_joining();
                        drop(handle);

                        attempt = reconnect_config.attempt_after_close(attempt, connected_at.elapsed());
                        let delay = reconnect_config.delay_for_attempt(attempt);
                        crate::log_info!("Reconnecting in {}ms", delay);
                        tokio::time::sleep(std::time::Duration::from_millis(delay as u64)).await;
                        attempt += 1;
                    }
                    Err(e) => {
                        crate::log_error!("Realtime connect error: {}", e);

                        if reconnect_config.max_attempts > 0 && attempt >= reconnect_config.max_attempts {
                            if let Some(handle) = client.upgrade() {
                                handle.set_state(ConnectionState::Failed {
                                    reason: format!(
                                        "Max reconnect attempts ({}) exceeded",
                                        reconnect_config.max_attempts
                                    ),
                                });
                            }
                            break;
                        }

                        let delay = reconnect_config.delay_for_attempt(attempt);
                        crate::log_info!("Reconnecting in {}ms (attempt {})", delay, attempt + 1);
                        tokio::time::sleep(std::time::Duration::from_millis(delay as u64)).await;
                        attempt += 1;
                    }
                }
            }
        });
    }
}
