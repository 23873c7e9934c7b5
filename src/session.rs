//! Session Client
//!
//! One `SessionClient` owns one WebSocket connection end to end: connect,
//! authenticate, subscribe, receive, optionally replace the filter on a
//! timer, close. The task driving it shares nothing with other sessions
//! except the metrics aggregator's atomic interface and the teardown
//! signal from the ramp controller.
//!
//! The lifecycle is an explicit state machine. `Failed` is absorbing and
//! reachable from any non-terminal state; there are no retries anywhere,
//! since a silent retry would blur "server slow under load" into "client
//! recovered" and destroy the measurement.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::debug;

use crate::config::RunConfig;
use crate::filter::FilterGenerator;
use crate::metrics::{LatencyKind, MetricsAggregator};
use crate::protocol::{extract_timestamp, FrameKind, InboundFrame, WireFormat};
use crate::ramp::Control;

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type WsSource = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// How long a closing session keeps reading for in-flight messages
const CLOSE_DRAIN: Duration = Duration::from_secs(2);

/// End-to-end samples above this are treated as clock skew and dropped
const E2E_SANITY_CAP_MS: u64 = 60_000;

/// Protocol lifecycle of one session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    /// Transport up, waiting for the server's greeting
    Authenticating,
    /// Subscribe sent, waiting for the first ack
    Subscribing { sent_at: Instant },
    /// Subscribed and receiving channel data
    Active,
    /// Filter replacement sent, waiting for its ack
    Updating { sent_at: Instant },
    Closing,
    Closed,
    /// Absorbing: connect failure, subscribe rejection or ack timeout
    Failed,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connecting => write!(f, "CONNECTING"),
            Self::Authenticating => write!(f, "AUTHENTICATING"),
            Self::Subscribing { .. } => write!(f, "SUBSCRIBING"),
            Self::Active => write!(f, "ACTIVE"),
            Self::Updating { .. } => write!(f, "UPDATING"),
            Self::Closing => write!(f, "CLOSING"),
            Self::Closed => write!(f, "CLOSED"),
            Self::Failed => write!(f, "FAILED"),
        }
    }
}

/// One simulated client
pub struct SessionClient {
    /// Spawn order, compared against the ramp controller's close watermark
    index: u64,
    /// Global id (offset + index), for logs only
    id: usize,
    config: Arc<RunConfig>,
    generator: FilterGenerator,
    metrics: Arc<MetricsAggregator>,
}

impl SessionClient {
    pub fn new(
        index: u64,
        config: Arc<RunConfig>,
        generator: FilterGenerator,
        metrics: Arc<MetricsAggregator>,
    ) -> Self {
        let id = config.client_id_offset + index as usize;
        Self {
            index,
            id,
            config,
            generator,
            metrics,
        }
    }

    /// Drive the session until a terminal state. All outcomes are reported
    /// through the metrics aggregator; the task itself never fails.
    pub async fn run(self, mut ctrl: watch::Receiver<Control>) {
        self.metrics.record_connection_attempt();

        let url = self.config.url();
        let mut state = SessionState::Connecting;
        debug!(id = self.id, state = %state, url = %url, "session_connecting");

        let connect = tokio::time::timeout(self.config.connect_timeout(), connect_async(url.as_str()));
        tokio::pin!(connect);

        let ws_stream = tokio::select! {
            biased;

            _ = wait_for_close(&mut ctrl, self.index) => {
                // Torn down before the transport came up.
                self.metrics.record_connection_error();
                return;
            }

            result = &mut connect => match result {
                Ok(Ok((ws_stream, _response))) => ws_stream,
                Ok(Err(e)) => {
                    debug!(id = self.id, error = %e, "session_connect_failed");
                    self.metrics.record_connection_error();
                    return;
                }
                Err(_) => {
                    debug!(id = self.id, "session_connect_timeout");
                    self.metrics.record_connection_error();
                    return;
                }
            }
        };

        self.metrics.session_started();
        state = SessionState::Authenticating;

        let (mut write, mut read) = ws_stream.split();

        // Authentication is folded into the subscribe timeout: one deadline
        // armed at connect covers greeting, subscribe send and first ack.
        let ack_timer = tokio::time::sleep(self.config.subscribe_timeout());
        tokio::pin!(ack_timer);

        let mut update_timer: Option<tokio::time::Interval> = None;
        let mut subscribed = false;
        let mut accounted = false;
        let pong_json = self.config.wire.pong_frame();

        loop {
            let awaiting_ack = matches!(
                state,
                SessionState::Authenticating
                    | SessionState::Subscribing { .. }
                    | SessionState::Updating { .. }
            );

            tokio::select! {
                biased;

                // Teardown signal: honored even while waiting for an ack.
                _ = wait_for_close(&mut ctrl, self.index) => {
                    if !ctrl.borrow().abort {
                        state = SessionState::Closing;
                        debug!(id = self.id, state = %state, "session_closing");
                        drain_close(
                            &mut write,
                            &mut read,
                            &self.config.wire,
                            &self.config.channel,
                            subscribed,
                            &self.metrics,
                        )
                        .await;
                    }
                    state = SessionState::Closed;
                    break;
                }

                _ = &mut ack_timer, if awaiting_ack => {
                    if let SessionState::Updating { .. } = state {
                        // A failed update is a partial failure, not a dead
                        // session.
                        debug!(id = self.id, "update_ack_timeout");
                        self.metrics.record_update_failure();
                        state = SessionState::Active;
                    } else {
                        debug!(id = self.id, "subscribe_ack_timeout");
                        self.metrics.record_subscribe_failure();
                        accounted = true;
                        state = SessionState::Failed;
                        break;
                    }
                }

                Some(_) = async {
                    match update_timer.as_mut() {
                        Some(timer) => {
                            timer.tick().await;
                            Some(())
                        }
                        None => None,
                    }
                } => {
                    // Ticks landing while a previous update is unacked are
                    // skipped; only one replacement is in flight at a time.
                    if matches!(state, SessionState::Active) && subscribed {
                        let filter = self.generator.next_filter();
                        let frame = self.config.wire.subscribe_frame(&self.config.channel, &filter);
                        self.metrics.record_filter_update_sent();
                        state = SessionState::Updating { sent_at: Instant::now() };
                        ack_timer.as_mut().reset(
                            tokio::time::Instant::now() + self.config.subscribe_timeout(),
                        );
                        if let Err(e) = write.send(Message::Text(frame)).await {
                            debug!(id = self.id, error = %e, "update_send_failed");
                            break;
                        }
                    }
                }

                message = read.next() => match message {
                    Some(Ok(Message::Text(text))) => {
                        if text == "ping" {
                            let _ = write.send(Message::Text("pong".to_string())).await;
                            continue;
                        }

                        let Some(frame) = InboundFrame::parse(&text) else {
                            continue;
                        };

                        match self.config.wire.classify(&frame) {
                            FrameKind::Established => {
                                if matches!(state, SessionState::Authenticating) {
                                    let filter = self.generator.next_filter();
                                    let subscribe = self
                                        .config
                                        .wire
                                        .subscribe_frame(&self.config.channel, &filter);
                                    state = SessionState::Subscribing { sent_at: Instant::now() };
                                    if let Err(e) = write.send(Message::Text(subscribe)).await {
                                        debug!(id = self.id, error = %e, "subscribe_send_failed");
                                        break;
                                    }
                                }
                            }

                            FrameKind::SubscribeAck => match state {
                                SessionState::Subscribing { sent_at } => {
                                    let latency = sent_at.elapsed().as_millis() as u64;
                                    self.metrics.record_latency(LatencyKind::SubscribeAck, latency);
                                    self.metrics.record_subscribe_success();
                                    accounted = true;
                                    subscribed = true;
                                    state = SessionState::Active;
                                    debug!(id = self.id, latency_ms = latency, "session_subscribed");
                                    if self.generator.scenario().is_periodic()
                                        && update_timer.is_none()
                                    {
                                        let period = self.config.filter_update_interval();
                                        let mut timer = tokio::time::interval_at(
                                            tokio::time::Instant::now() + period,
                                            period,
                                        );
                                        // Ticks deferred by a slow ack must
                                        // not burst-fire on catch-up.
                                        timer.set_missed_tick_behavior(
                                            tokio::time::MissedTickBehavior::Delay,
                                        );
                                        update_timer = Some(timer);
                                    }
                                }
                                SessionState::Updating { sent_at } => {
                                    let latency = sent_at.elapsed().as_millis() as u64;
                                    self.metrics.record_latency(LatencyKind::UpdateAck, latency);
                                    state = SessionState::Active;
                                }
                                // Duplicate ack: only the first one after a
                                // request is measured.
                                _ => {}
                            },

                            FrameKind::Error => match state {
                                SessionState::Updating { .. } => {
                                    debug!(id = self.id, data = ?frame.data, "update_rejected");
                                    self.metrics.record_update_failure();
                                    state = SessionState::Active;
                                }
                                SessionState::Authenticating
                                | SessionState::Subscribing { .. } => {
                                    debug!(id = self.id, data = ?frame.data, "subscribe_rejected");
                                    self.metrics.record_subscribe_failure();
                                    accounted = true;
                                    state = SessionState::Failed;
                                    break;
                                }
                                _ => {
                                    debug!(id = self.id, data = ?frame.data, "server_error_event");
                                }
                            },

                            FrameKind::Ping => {
                                let _ = write.send(Message::Text(pong_json.clone())).await;
                            }

                            FrameKind::Data => {
                                if subscribed
                                    && frame.channel.as_deref()
                                        == Some(self.config.channel.as_str())
                                {
                                    record_data(&self.metrics, &frame);
                                }
                            }
                        }
                    }

                    Some(Ok(Message::Ping(payload))) => {
                        let _ = write.send(Message::Pong(payload)).await;
                    }

                    Some(Ok(Message::Close(_))) => {
                        debug!(id = self.id, "server_close_frame");
                        state = SessionState::Closed;
                        break;
                    }

                    Some(Err(e)) => {
                        debug!(id = self.id, error = %e, "session_stream_error");
                        state = SessionState::Failed;
                        break;
                    }

                    None => {
                        debug!(id = self.id, "session_stream_ended");
                        state = SessionState::Closed;
                        break;
                    }

                    _ => {}
                }
            }
        }

        // A session that connected but never resolved its subscribe is a
        // subscribe failure, whichever path brought it down.
        if !accounted {
            self.metrics.record_subscribe_failure();
        }
        self.metrics.session_ended();
        debug!(id = self.id, state = %state, "session_finished");
    }
}

/// Resolves once this session should stop, either because the close
/// watermark passed its index or because the run was aborted.
async fn wait_for_close(ctrl: &mut watch::Receiver<Control>, index: u64) {
    loop {
        {
            let control = ctrl.borrow_and_update();
            if control.abort || control.close_watermark > index {
                return;
            }
        }
        if ctrl.changed().await.is_err() {
            // Controller is gone; treat as close.
            return;
        }
    }
}

/// Graceful close: send the close frame, then keep counting channel data
/// already in flight until the server confirms or the drain window ends.
async fn drain_close(
    write: &mut WsSink,
    read: &mut WsSource,
    wire: &WireFormat,
    channel: &str,
    subscribed: bool,
    metrics: &MetricsAggregator,
) {
    let _ = write.send(Message::Close(None)).await;

    let deadline = tokio::time::sleep(CLOSE_DRAIN);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = &mut deadline => break,
            message = read.next() => match message {
                Some(Ok(Message::Text(text))) => {
                    if let Some(frame) = InboundFrame::parse(&text) {
                        if subscribed
                            && matches!(wire.classify(&frame), FrameKind::Data)
                            && frame.channel.as_deref() == Some(channel)
                        {
                            record_data(metrics, &frame);
                        }
                    }
                }
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                _ => {}
            }
        }
    }
}

/// Count one channel data message and, when a publish timestamp is
/// embedded, its end-to-end latency.
fn record_data(metrics: &MetricsAggregator, frame: &InboundFrame) {
    metrics.record_message_received();
    if metrics.is_recording() {
        if let Some(sent_ms) = extract_timestamp(frame) {
            let latency = now_epoch_ms().saturating_sub(sent_ms);
            if latency < E2E_SANITY_CAP_MS {
                metrics.record_latency(LatencyKind::EndToEnd, latency);
            }
        }
    }
}

fn now_epoch_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
