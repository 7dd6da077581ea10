#![cfg(feature = "web")]
//! MQTT listener task
//!
//! One task per listener session. It subscribes to a single topic and hands
//! each publish to the shared [`LiveRecorder`]. The task owns no retry
//! policy: a transport error ends it with [`ListenerState::Failed`].
//! [`ListenerHandle::stop`] signals the task and waits for it to finish.

use log::{debug, info, warn};
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::error::{EnergyError, Result};
use crate::live::LiveRecorder;

/// Standard unencrypted MQTT port
pub const DEFAULT_MQTT_PORT: u16 = 1883;

/// Where to connect and what to subscribe to
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ListenerSettings {
    pub broker: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub topic: String,
}

fn default_port() -> u16 {
    DEFAULT_MQTT_PORT
}

impl ListenerSettings {
    /// Check the broker and topic are usable
    pub fn validate(&self) -> Result<()> {
        if self.broker.trim().is_empty() {
            return Err(EnergyError::InvalidInput("broker address is empty".to_string()));
        }
        if self.topic.trim().is_empty() {
            return Err(EnergyError::InvalidInput("topic is empty".to_string()));
        }
        Ok(())
    }
}

/// Lifecycle of a listener task
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "state", content = "detail", rename_all = "snake_case")]
pub enum ListenerState {
    Connecting,
    Connected,
    Subscribed,
    Stopped,
    Failed(String),
}

impl ListenerState {
    pub fn is_running(&self) -> bool {
        matches!(
            self,
            ListenerState::Connecting | ListenerState::Connected | ListenerState::Subscribed
        )
    }
}

type SharedState = Arc<Mutex<ListenerState>>;

fn set_state(state: &SharedState, next: ListenerState) {
    *state.lock().unwrap_or_else(|p| p.into_inner()) = next;
}

/// A running (or finished) listener task
pub struct ListenerHandle {
    settings: ListenerSettings,
    state: SharedState,
    stop: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl ListenerHandle {
    /// Spawn a listener task on the current tokio runtime
    ///
    /// # Errors
    /// * `EnergyError::InvalidInput` for an empty broker or topic
    pub fn start(settings: ListenerSettings, recorder: Arc<LiveRecorder>) -> Result<Self> {
        settings.validate()?;
        let state: SharedState = Arc::new(Mutex::new(ListenerState::Connecting));
        let (stop_tx, stop_rx) = oneshot::channel();

        info!(
            "starting MQTT listener {}:{} topic '{}'",
            settings.broker, settings.port, settings.topic
        );
        let task = tokio::spawn(run(settings.clone(), recorder, state.clone(), stop_rx));

        Ok(Self {
            settings,
            state,
            stop: Some(stop_tx),
            task,
        })
    }

    pub fn settings(&self) -> &ListenerSettings {
        &self.settings
    }

    pub fn state(&self) -> ListenerState {
        self.state.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished() && self.state().is_running()
    }

    /// Signal the task to stop and wait for it to exit
    pub async fn stop(mut self) -> ListenerState {
        if let Some(stop) = self.stop.take() {
            // The task may already have exited on its own
            let _ = stop.send(());
        }
        if let Err(e) = (&mut self.task).await {
            warn!("listener task ended abnormally: {}", e);
            set_state(&self.state, ListenerState::Failed(e.to_string()));
        }
        self.state()
    }
}

fn client_id() -> String {
    format!(
        "wattwatch-{}-{}",
        std::process::id(),
        chrono::Local::now().timestamp_millis()
    )
}

async fn run(
    settings: ListenerSettings,
    recorder: Arc<LiveRecorder>,
    state: SharedState,
    mut stop: oneshot::Receiver<()>,
) {
    let mut options = MqttOptions::new(client_id(), settings.broker.clone(), settings.port);
    options.set_keep_alive(Duration::from_secs(60));

    let (client, mut eventloop) = AsyncClient::new(options, 16);
    if let Err(e) = client.subscribe(settings.topic.clone(), QoS::AtMostOnce).await {
        warn!("could not queue subscription: {}", e);
        set_state(&state, ListenerState::Failed(e.to_string()));
        return;
    }

    loop {
        tokio::select! {
            _ = &mut stop => {
                let _ = client.disconnect().await;
                set_state(&state, ListenerState::Stopped);
                info!("MQTT listener stopped");
                break;
            }
            event = eventloop.poll() => match event {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    info!("connected to MQTT broker {}", settings.broker);
                    set_state(&state, ListenerState::Connected);
                }
                Ok(Event::Incoming(Packet::SubAck(_))) => {
                    info!("subscribed to '{}'", settings.topic);
                    set_state(&state, ListenerState::Subscribed);
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    if let Err(e) = recorder.record(&publish.payload) {
                        warn!("failed to record live sample: {}", e);
                    }
                }
                Ok(other) => debug!("mqtt event: {:?}", other),
                Err(e) => {
                    warn!("MQTT transport error: {}", e);
                    set_state(&state, ListenerState::Failed(e.to_string()));
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_settings_are_rejected() {
        let settings = ListenerSettings {
            broker: " ".to_string(),
            port: DEFAULT_MQTT_PORT,
            topic: "a".to_string(),
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn running_states() {
        assert!(ListenerState::Subscribed.is_running());
        assert!(!ListenerState::Stopped.is_running());
        assert!(!ListenerState::Failed("x".to_string()).is_running());
    }

    #[test]
    fn state_serializes_with_detail() {
        let json = serde_json::to_value(ListenerState::Failed("refused".to_string())).unwrap();
        assert_eq!(json["state"], "failed");
        assert_eq!(json["detail"], "refused");
    }

    #[tokio::test]
    async fn stop_joins_the_task() {
        // Port 9 on localhost refuses or times out; either way the handle
        // must come back from stop().
        let settings = ListenerSettings {
            broker: "127.0.0.1".to_string(),
            port: 9,
            topic: "meter/test".to_string(),
        };
        let recorder = Arc::new(LiveRecorder::in_memory(4));
        let handle = ListenerHandle::start(settings, recorder).unwrap();
        let state = handle.stop().await;
        assert!(!state.is_running());
    }
}
