// src/engine.rs

use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, RwLock};
use tokio::time::interval;
use tracing::{debug, info, warn};

use crate::analyzer::TrafficAnalyzer;
use crate::breaker::FailureBreaker;
use crate::callbacks::TidewatchCallbacks;
use crate::config::TidewatchConfig;
use crate::error::{TidewatchError, TidewatchResult};
use crate::scaler::PredictiveScaler;
use crate::types::{Pattern, ResourceId, ScaleDecision, Timestamp};
use crate::utils::current_timestamp;

/// Commands that can be sent to a running control loop
#[derive(Debug)]
pub enum LoopCommand {
    /// Run a detection cycle now, regardless of the analysis interval
    TriggerAnalysis {
        response: oneshot::Sender<Vec<Pattern>>,
    },
    /// Get current loop status
    GetStatus {
        response: oneshot::Sender<LoopStatus>,
    },
    /// Stop after the current tick
    Shutdown,
}

/// Status information about the control loop
#[derive(Debug, Clone, Default)]
pub struct LoopStatus {
    pub is_running: bool,
    pub ticks: u64,
    pub analysis_cycles: u64,
    pub last_tick: Option<Timestamp>,
    pub last_decision: Option<ScaleDecision>,
}

/// Periodic analyze, forecast and scale cycle for one resource
pub struct ControlLoop {
    config: TidewatchConfig,
    analyzer: Arc<TrafficAnalyzer>,
    scaler: Arc<PredictiveScaler>,
    command_tx: mpsc::UnboundedSender<LoopCommand>,
    command_rx: Option<mpsc::UnboundedReceiver<LoopCommand>>,
    status: Arc<RwLock<LoopStatus>>,
}

impl ControlLoop {
    /// Create a control loop over an existing analyzer and scaler
    pub fn new(
        config: TidewatchConfig,
        analyzer: Arc<TrafficAnalyzer>,
        scaler: Arc<PredictiveScaler>,
    ) -> Self {
        let (command_tx, command_rx) = mpsc::unbounded_channel();

        Self {
            config,
            analyzer,
            scaler,
            command_tx,
            command_rx: Some(command_rx),
            status: Arc::new(RwLock::new(LoopStatus::default())),
        }
    }

    /// Build the analyzer, breaker and scaler for `resource_id` from one config
    pub fn from_config<S: Into<ResourceId>>(
        resource_id: S,
        config: TidewatchConfig,
        callbacks: TidewatchCallbacks,
    ) -> TidewatchResult<Self> {
        config.validate()?;
        let resource_id = resource_id.into();

        let analyzer = Arc::new(TrafficAnalyzer::from_config(resource_id.clone(), &config));
        let breaker = Arc::new(FailureBreaker::new(resource_id.clone(), config.breaker.clone()));
        let scaler = Arc::new(
            PredictiveScaler::new(resource_id, config.scaler.clone(), callbacks).with_breaker(breaker),
        );
        Ok(Self::new(config, analyzer, scaler))
    }

    pub fn analyzer(&self) -> &Arc<TrafficAnalyzer> {
        &self.analyzer
    }

    pub fn scaler(&self) -> &Arc<PredictiveScaler> {
        &self.scaler
    }

    pub fn config(&self) -> &TidewatchConfig {
        &self.config
    }

    /// Get a handle to send commands to the loop
    pub fn handle(&self) -> ControlLoopHandle {
        ControlLoopHandle {
            command_tx: self.command_tx.clone(),
        }
    }

    pub async fn status(&self) -> LoopStatus {
        self.status.read().await.clone()
    }

    /// Run one cycle: analyze if due, forecast, then decide
    pub async fn tick(&self) -> ScaleDecision {
        self.tick_at(current_timestamp()).await
    }

    /// Same as [`tick`](Self::tick) with an explicit notion of "now"
    pub async fn tick_at(&self, now: Timestamp) -> ScaleDecision {
        let analyzed = if self.analyzer.is_analysis_due(now) {
            self.analyzer.analyze_at(now);
            true
        } else {
            false
        };

        let forecast = match self.analyzer.predict_at(self.config.forecast.horizon(), now) {
            Ok(predictions) => predictions,
            Err(e) if e.is_recoverable() => {
                debug!(resource = %self.analyzer.resource_id(), reason = %e, "no forecast this tick");
                Vec::new()
            }
            Err(e) => {
                warn!(resource = %self.analyzer.resource_id(), error = %e, "forecast failed");
                Vec::new()
            }
        };

        let decision = self.scaler.check_and_scale(&forecast).await;

        let mut status = self.status.write().await;
        status.ticks += 1;
        if analyzed {
            status.analysis_cycles += 1;
        }
        status.last_tick = Some(now);
        status.last_decision = Some(decision.clone());
        decision
    }

    /// Start the control loop (consumes self)
    pub async fn start(mut self) -> TidewatchResult<()> {
        self.config.validate()?;
        let mut command_rx = self
            .command_rx
            .take()
            .ok_or_else(|| TidewatchError::engine_not_running("Control loop already started"))?;

        self.status.write().await.is_running = true;
        info!(
            resource = %self.analyzer.resource_id(),
            interval_secs = self.config.evaluation_interval_seconds,
            "control loop starting"
        );

        let mut evaluation_timer = interval(self.config.evaluation_interval());

        loop {
            tokio::select! {
                command = command_rx.recv() => {
                    match command {
                        Some(cmd) => {
                            if !self.handle_command(cmd).await {
                                break;
                            }
                        }
                        None => {
                            info!("Command channel closed, shutting down control loop");
                            break;
                        }
                    }
                }

                _ = evaluation_timer.tick() => {
                    let decision = self.tick().await;
                    debug!(decision = ?decision.outcome, "tick complete");
                }
            }
        }

        self.status.write().await.is_running = false;
        info!(resource = %self.analyzer.resource_id(), "control loop stopped");
        Ok(())
    }

    /// Handle incoming commands, returning `false` once the loop should stop
    async fn handle_command(&self, command: LoopCommand) -> bool {
        match command {
            LoopCommand::TriggerAnalysis { response } => {
                let patterns = self.analyzer.analyze();
                self.status.write().await.analysis_cycles += 1;
                if response.send(patterns).is_err() {
                    debug!("analysis requester went away");
                }
            }
            LoopCommand::GetStatus { response } => {
                let status = self.status.read().await.clone();
                let _ = response.send(status); // Ignore send errors
            }
            LoopCommand::Shutdown => {
                info!("Shutdown command received");
                return false;
            }
        }
        true
    }
}

impl std::fmt::Debug for ControlLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControlLoop")
            .field("resource_id", &self.analyzer.resource_id())
            .field("evaluation_interval_seconds", &self.config.evaluation_interval_seconds)
            .field("started", &self.command_rx.is_none())
            .finish_non_exhaustive()
    }
}

/// Handle for interacting with a running control loop
#[derive(Debug, Clone)]
pub struct ControlLoopHandle {
    command_tx: mpsc::UnboundedSender<LoopCommand>,
}

impl ControlLoopHandle {
    /// Run a detection cycle now and get the resulting patterns
    pub async fn trigger_analysis(&self) -> TidewatchResult<Vec<Pattern>> {
        let (response_tx, response_rx) = oneshot::channel();
        self.command_tx.send(LoopCommand::TriggerAnalysis {
            response: response_tx,
        })?;
        Ok(response_rx.await?)
    }

    /// Get current loop status
    pub async fn status(&self) -> TidewatchResult<LoopStatus> {
        let (response_tx, response_rx) = oneshot::channel();
        self.command_tx.send(LoopCommand::GetStatus {
            response: response_tx,
        })?;
        Ok(response_rx.await?)
    }

    /// Ask the loop to stop
    pub async fn shutdown(&self) -> TidewatchResult<()> {
        self.command_tx.send(LoopCommand::Shutdown)?;
        Ok(())
    }
}
