// THEORY:
// The telemetry sink is an actor: a tokio task that owns the UDP socket and
// receives ready-to-send OSC packets over an unbounded channel. The frame loop
// only encodes and enqueues, so a slow or unreachable receiver can never stall
// frame processing. Send failures are logged and dropped; UDP telemetry is
// fire-and-forget and the next frame carries fresh values anyway.

use crate::config::TelemetryConfig;
use crate::osc::{encode_message, OscArg};
use anyhow::Context;
use bytes::Bytes;
use gaze_vision::Telemetry;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Message type for the sink actor
enum SinkMessage {
    Packet(Bytes),
    Shutdown,
}

pub struct TelemetrySink {
    config: TelemetryConfig,
    sender: mpsc::UnboundedSender<SinkMessage>,
    task: JoinHandle<()>,
}

impl TelemetrySink {
    /// Binds an ephemeral local socket, connects it to the configured receiver
    /// and spawns the actor. Must be called from within a tokio runtime.
    pub async fn connect(config: TelemetryConfig) -> anyhow::Result<Self> {
        let target = config.target();
        let socket = UdpSocket::bind("0.0.0.0:0")
            .await
            .context("failed to bind a local UDP socket")?;
        socket
            .connect(&target)
            .await
            .with_context(|| format!("failed to resolve telemetry target {target}"))?;
        tracing::info!(%target, "telemetry sink ready");

        let (sender, mut receiver) = mpsc::unbounded_channel::<SinkMessage>();
        let task = tokio::spawn(async move {
            while let Some(msg) = receiver.recv().await {
                match msg {
                    SinkMessage::Packet(packet) => {
                        if let Err(err) = socket.send(&packet).await {
                            tracing::warn!(error = %err, "dropped telemetry packet");
                        }
                    }
                    SinkMessage::Shutdown => break,
                }
            }
        });

        Ok(Self { config, sender, task })
    }

    /// Encodes the values the configured outputs allow and queues them.
    pub fn publish(&self, values: &[Telemetry]) {
        for packet in encode_telemetry(&self.config, values) {
            if self.sender.send(SinkMessage::Packet(packet)).is_err() {
                tracing::warn!("telemetry sink has stopped");
                return;
            }
        }
    }

    /// Flushes queued packets and stops the actor.
    pub async fn shutdown(self) {
        let _ = self.sender.send(SinkMessage::Shutdown);
        if let Err(err) = self.task.await {
            tracing::warn!(error = %err, "telemetry sink task failed");
        }
    }
}

/// One OSC packet per enabled value, on the configured addresses.
pub fn encode_telemetry(config: &TelemetryConfig, values: &[Telemetry]) -> Vec<Bytes> {
    values
        .iter()
        .filter_map(|value| match *value {
            Telemetry::GazeX(x) if config.gaze_output => {
                Some(encode_message(&config.address_gaze_x, &[OscArg::Float(x)]))
            }
            Telemetry::GazeY(y) if config.gaze_output => {
                Some(encode_message(&config.address_gaze_y, &[OscArg::Float(y)]))
            }
            Telemetry::Blink(closed) if config.blink_output => {
                Some(encode_message(&config.address_blink, &[OscArg::Bool(closed)]))
            }
            _ => None,
        })
        .collect()
}
