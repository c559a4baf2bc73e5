//! PhoneAgent facade tying the model, the device and the control loop together.

use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use super::control_loop::ControlLoop;
use super::session::{ExecutionMode, Session};
use super::state::{StepOutcome, TaskOutcome};
use crate::actions::{ConfirmationCallback, TakeoverCallback};
use crate::adb::AdbDevice;
use crate::compress::CompressionPolicy;
use crate::config::{system_prompt, AppRegistry, Language, StaticAppRegistry};
use crate::device::{Device, DeviceError};
use crate::geometry::{
    DeviceProfile, JitterPolicy, NominalFrame, ProfileConfig, ProfileError,
    DEFAULT_ASPECT_TOLERANCE,
};
use crate::model::{ModelClient, ModelConfig, RetryPolicy, VisionModel};

/// Default ceiling on cycles per task.
pub const DEFAULT_MAX_TURNS: u32 = 100;

/// Default clarification turns allowed per cycle.
pub const DEFAULT_MAX_CLARIFICATIONS: u32 = 2;

/// Setup errors that prevent a task from starting.
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Cannot read display metrics: {0}")]
    Device(#[from] DeviceError),
    #[error("Invalid device profile: {0}")]
    Profile(#[from] ProfileError),
    #[error("Task must not be empty")]
    EmptyTask,
    #[error("Invalid agent configuration: {0}")]
    InvalidConfig(String),
}

/// Configuration for the PhoneAgent.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Cycles allowed before the task fails with `max-turns-exceeded`.
    pub max_turns: u32,
    /// Clarification turns allowed per cycle for unusable replies.
    pub max_clarifications: u32,
    /// Optional ADB device ID for multi-device setups.
    pub device_id: Option<String>,
    pub lang: Language,
    /// Custom system prompt (if None, uses the built-in one for `lang`).
    pub system_prompt: Option<String>,
    /// Print each step to stdout.
    pub verbose: bool,
    /// Coordinate frame the model answers in.
    pub nominal_frame: NominalFrame,
    pub aspect_tolerance: f64,
    pub jitter: JitterPolicy,
    pub compression: CompressionPolicy,
    /// Degraded re-encodes tried after a compression failure.
    pub compression_retries: u32,
    pub profile: ProfileConfig,
    /// Pause after each device action so the UI can settle.
    pub settle_delay: Duration,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_turns: DEFAULT_MAX_TURNS,
            max_clarifications: DEFAULT_MAX_CLARIFICATIONS,
            device_id: None,
            lang: Language::default(),
            system_prompt: None,
            verbose: true,
            nominal_frame: NominalFrame::default(),
            aspect_tolerance: DEFAULT_ASPECT_TOLERANCE,
            jitter: JitterPolicy::default(),
            compression: CompressionPolicy::default(),
            compression_retries: 2,
            profile: ProfileConfig::default(),
            settle_delay: Duration::from_secs(1),
        }
    }
}

impl AgentConfig {
    pub fn with_device_id(mut self, device_id: impl Into<String>) -> Self {
        self.device_id = Some(device_id.into());
        self
    }

    pub fn with_lang(mut self, lang: Language) -> Self {
        self.lang = lang;
        self
    }

    pub fn with_max_turns(mut self, max_turns: u32) -> Self {
        self.max_turns = max_turns;
        self
    }

    pub fn with_max_clarifications(mut self, max_clarifications: u32) -> Self {
        self.max_clarifications = max_clarifications;
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    /// Disable per-step console output.
    pub fn quiet(mut self) -> Self {
        self.verbose = false;
        self
    }

    /// Set the model's coordinate frame; a letterbox target follows it.
    pub fn with_nominal_frame(mut self, frame: NominalFrame) -> Self {
        self.nominal_frame = frame;
        if self.compression.letterbox.is_some() {
            self.compression.letterbox = Some(frame);
        }
        self
    }

    pub fn with_aspect_tolerance(mut self, tolerance: f64) -> Self {
        self.aspect_tolerance = tolerance;
        self.compression.aspect_tolerance = tolerance;
        self
    }

    pub fn with_jitter(mut self, jitter: JitterPolicy) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn with_compression(mut self, compression: CompressionPolicy) -> Self {
        self.compression = compression;
        self
    }

    /// Pad screenshots to the nominal frame's shape before upload.
    pub fn with_letterbox(mut self, enabled: bool) -> Self {
        self.compression.letterbox = enabled.then_some(self.nominal_frame);
        self
    }

    pub fn with_profile(mut self, profile: ProfileConfig) -> Self {
        self.profile = profile;
        self
    }

    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    /// Check the values a session cannot run without.
    pub fn validate(&self) -> Result<(), AgentError> {
        if !self.nominal_frame.is_valid() {
            return Err(AgentError::InvalidConfig(format!(
                "nominal frame {}x{} must be non-empty",
                self.nominal_frame.width, self.nominal_frame.height
            )));
        }
        self.jitter.validate().map_err(AgentError::InvalidConfig)
    }

    /// The custom prompt, or the built-in one for `lang` and the nominal frame.
    pub fn system_prompt_text(&self) -> String {
        self.system_prompt
            .clone()
            .unwrap_or_else(|| system_prompt(self.lang, self.nominal_frame))
    }
}

/// AI-powered agent for automating Android phone interactions.
///
/// # Example
///
/// ```rust,no_run
/// use phone_pilot::{AgentConfig, ModelConfig, PhoneAgent, TaskOutcome};
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let mut agent = PhoneAgent::new(ModelConfig::default(), AgentConfig::default(), None, None);
///     match agent.run("打开微信").await? {
///         TaskOutcome::Completed { result } => println!("Done: {:?}", result),
///         TaskOutcome::Failed { failure } => println!("Failed: {}", failure),
///     }
///     Ok(())
/// }
/// ```
pub struct PhoneAgent {
    control: ControlLoop,
    profile: Option<DeviceProfile>,
    cancel: CancellationToken,
    session: Option<Session>,
}

impl PhoneAgent {
    /// Create an agent talking to an OpenAI-compatible endpoint and an ADB device.
    pub fn new(
        model_config: ModelConfig,
        agent_config: AgentConfig,
        confirmation_callback: Option<ConfirmationCallback>,
        takeover_callback: Option<TakeoverCallback>,
    ) -> Self {
        let retry = model_config.retry_policy();
        let timeout = model_config.timeout;
        let device = AdbDevice::new(agent_config.device_id.clone());

        let mut agent = Self::with_collaborators(
            Arc::new(ModelClient::new(model_config)),
            Arc::new(device),
            Arc::new(StaticAppRegistry::builtin()),
            agent_config,
        )
        .with_retry_policy(retry)
        .with_model_timeout(timeout);

        if let Some(callback) = confirmation_callback {
            agent.control = agent.control.with_confirmation_callback(callback);
        }
        if let Some(callback) = takeover_callback {
            agent.control = agent.control.with_takeover_callback(callback);
        }
        agent
    }

    /// Create an agent from explicit collaborators.
    pub fn with_collaborators(
        model: Arc<dyn VisionModel>,
        device: Arc<dyn Device>,
        registry: Arc<dyn AppRegistry>,
        agent_config: AgentConfig,
    ) -> Self {
        Self {
            control: ControlLoop::new(model, device, registry, agent_config),
            profile: None,
            cancel: CancellationToken::new(),
            session: None,
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.control = self.control.with_retry_policy(retry);
        self
    }

    pub fn with_model_timeout(mut self, timeout: Duration) -> Self {
        self.control = self.control.with_model_timeout(timeout);
        self
    }

    /// Use a known profile instead of measuring the device.
    pub fn with_profile(mut self, profile: DeviceProfile) -> Self {
        self.profile = Some(profile);
        self
    }

    /// Token that stops the running task when cancelled.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn config(&self) -> &AgentConfig {
        self.control.config()
    }

    /// Run a single task to completion.
    pub async fn run(&mut self, task: &str) -> Result<TaskOutcome, AgentError> {
        self.run_with_mode(task, ExecutionMode::SingleTask).await
    }

    /// Run a task in the given mode.
    ///
    /// The device profile is measured on the first call and reused after.
    pub async fn run_with_mode(
        &mut self,
        task: &str,
        mode: ExecutionMode,
    ) -> Result<TaskOutcome, AgentError> {
        let mut session = self.new_session(task, mode)?;
        let outcome = self.control.run(&mut session, &self.cancel).await;
        self.session = Some(session);
        Ok(outcome)
    }

    /// Execute a single cycle.
    ///
    /// `task` starts a new session and is required when none is active (no
    /// session yet, or the last one finished). While a session is running the
    /// argument is ignored and the next cycle of that session runs.
    pub async fn step(&mut self, task: Option<&str>) -> Result<StepOutcome, AgentError> {
        let active = self.session.as_ref().is_some_and(|s| !s.is_finished());
        if !active {
            let task = task.ok_or(AgentError::EmptyTask)?;
            self.session = Some(self.new_session(task, ExecutionMode::SingleTask)?);
        }

        match self.session.as_mut() {
            Some(session) => Ok(self.control.step(session, &self.cancel).await),
            None => Err(AgentError::EmptyTask),
        }
    }

    /// Forget the current session so the next step starts fresh.
    pub fn reset(&mut self) {
        self.session = None;
    }

    fn new_session(&mut self, task: &str, mode: ExecutionMode) -> Result<Session, AgentError> {
        let task = task.trim();
        if task.is_empty() {
            return Err(AgentError::EmptyTask);
        }
        self.config().validate()?;
        let profile = self.profile()?.clone();
        Ok(Session::new(task, mode, profile))
    }

    /// The device profile, measuring the device if needed.
    pub fn profile(&mut self) -> Result<&DeviceProfile, AgentError> {
        let profile = match self.profile.take() {
            Some(profile) => profile,
            None => {
                let metrics = self.control.device().display_metrics()?;
                let profile = DeviceProfile::from_metrics(&metrics, &self.config().profile)?;
                tracing::info!(
                    "Device profile {}x{} ({} unsafe regions)",
                    profile.width,
                    profile.height,
                    profile.unsafe_regions.len()
                );
                profile
            }
        };
        Ok(self.profile.insert(profile))
    }

    /// The current session, or the most recent one if it has finished.
    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    /// Conversation history of the current session.
    pub fn context(&self) -> &[Value] {
        self.session.as_ref().map(Session::history).unwrap_or_default()
    }

    /// Cycles run in the current session.
    pub fn step_count(&self) -> u32 {
        self.session.as_ref().map_or(0, |s| s.cycle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::state::FailureKind;
    use crate::device::testing::{Command, RecordingDevice};
    use crate::geometry::PixelPoint;
    use crate::model::{ModelResponse, TransportError};
    use async_trait::async_trait;
    use serde_json::Value;

    struct FinishModel;

    #[async_trait]
    impl VisionModel for FinishModel {
        async fn complete(&self, _messages: &[Value]) -> Result<ModelResponse, TransportError> {
            Ok(ModelResponse::new("<answer>finish(message=\"ok\")</answer>"))
        }
    }

    fn agent(device: Arc<RecordingDevice>) -> PhoneAgent {
        PhoneAgent::with_collaborators(
            Arc::new(FinishModel),
            device,
            Arc::new(StaticAppRegistry::builtin()),
            AgentConfig::default().quiet().with_settle_delay(Duration::ZERO),
        )
    }

    #[test]
    fn test_agent_config_default() {
        let config = AgentConfig::default();
        assert_eq!(config.max_turns, 100);
        assert_eq!(config.max_clarifications, 2);
        assert_eq!(config.lang, Language::Chinese);
        assert!(config.verbose);
    }

    #[test]
    fn test_agent_config_builder() {
        let config = AgentConfig::default()
            .with_device_id("device123")
            .with_lang(Language::English)
            .with_max_turns(50)
            .with_letterbox(true)
            .with_nominal_frame(NominalFrame::new(1000, 2000))
            .quiet();

        assert_eq!(config.device_id, Some("device123".to_string()));
        assert_eq!(config.lang, Language::English);
        assert_eq!(config.max_turns, 50);
        assert_eq!(config.compression.letterbox, Some(NominalFrame::new(1000, 2000)));
        assert!(!config.verbose);
    }

    #[test]
    fn test_custom_system_prompt() {
        let config = AgentConfig::default().with_system_prompt("be brief");
        assert_eq!(config.system_prompt_text(), "be brief");
    }

    #[tokio::test]
    async fn test_run_measures_profile_once() {
        let device = Arc::new(RecordingDevice::new(1080, 2400));
        let mut agent = agent(device.clone());

        let first = agent.run("open settings").await.unwrap();
        assert_eq!(
            first,
            TaskOutcome::Completed {
                result: Some("ok".to_string())
            }
        );
        let second = agent
            .run_with_mode("open camera", ExecutionMode::Interactive)
            .await
            .unwrap();
        assert!(second.is_success());

        // One screenshot per task; metrics come from the first capture only.
        let screenshots = device
            .commands()
            .into_iter()
            .filter(|c| *c == Command::Screenshot)
            .count();
        assert_eq!(screenshots, 3);

        let session = agent.session().unwrap();
        assert_eq!(session.task, "open camera");
        assert_eq!(session.mode, ExecutionMode::Interactive);
        assert_eq!(session.profile.width, 1080);
    }

    #[tokio::test]
    async fn test_empty_task_is_rejected() {
        let mut agent = agent(Arc::new(RecordingDevice::new(1080, 2400)));
        assert!(matches!(agent.run("   ").await, Err(AgentError::EmptyTask)));
    }

    #[tokio::test]
    async fn test_measurement_failure_is_setup_error() {
        let device = Arc::new(
            RecordingDevice::new(1080, 2400)
                .fail_screenshot(DeviceError::Disconnected("no devices found".to_string())),
        );
        let mut agent = agent(device);
        assert!(matches!(
            agent.run("open settings").await,
            Err(AgentError::Device(DeviceError::Disconnected(_)))
        ));
    }

    #[tokio::test]
    async fn test_cancel_token_stops_run() {
        let mut agent = agent(Arc::new(RecordingDevice::new(1080, 2400)));
        agent.cancel_token().cancel();
        let outcome = agent.run("open settings").await.unwrap();
        assert_eq!(outcome.failure().map(|f| f.kind), Some(FailureKind::Cancelled));
    }

    struct ScriptModel {
        replies: std::sync::Mutex<Vec<&'static str>>,
    }

    #[async_trait]
    impl VisionModel for ScriptModel {
        async fn complete(&self, _messages: &[Value]) -> Result<ModelResponse, TransportError> {
            let mut replies = self.replies.lock().unwrap();
            let reply = if replies.len() > 1 {
                replies.remove(0)
            } else {
                replies[0]
            };
            Ok(ModelResponse::new(reply))
        }
    }

    fn stepping_agent(device: Arc<RecordingDevice>, replies: Vec<&'static str>) -> PhoneAgent {
        PhoneAgent::with_collaborators(
            Arc::new(ScriptModel {
                replies: std::sync::Mutex::new(replies),
            }),
            device,
            Arc::new(StaticAppRegistry::builtin()),
            AgentConfig::default()
                .quiet()
                .with_jitter(JitterPolicy::disabled())
                .with_settle_delay(Duration::ZERO),
        )
    }

    #[tokio::test]
    async fn test_step_by_step_execution() {
        let device = Arc::new(RecordingDevice::new(1080, 2400));
        let mut agent = stepping_agent(
            device.clone(),
            vec!["<answer>tap(500, 500)</answer>", "<answer>finish(message=\"ok\")</answer>"],
        );

        assert!(matches!(agent.step(None).await, Err(AgentError::EmptyTask)));
        assert_eq!(agent.step_count(), 0);
        assert!(agent.context().is_empty());

        let first = agent.step(Some("open settings")).await.unwrap();
        assert!(!first.is_finished());
        assert_eq!(agent.step_count(), 1);
        assert_eq!(agent.context()[0]["role"], "system");
        assert_eq!(device.actions(), vec![Command::Tap(PixelPoint::new(540, 1200))]);

        let second = agent.step(None).await.unwrap();
        assert_eq!(
            second.finished,
            Some(TaskOutcome::Completed {
                result: Some("ok".to_string())
            })
        );
        assert_eq!(agent.step_count(), 2);

        // Once finished, another step needs a new task.
        assert!(matches!(agent.step(None).await, Err(AgentError::EmptyTask)));
        agent.reset();
        assert_eq!(agent.step_count(), 0);
        assert!(agent.session().is_none());

        let fresh = agent.step(Some("open camera")).await.unwrap();
        assert_eq!(fresh.cycle, 1);
        assert_eq!(agent.session().unwrap().task, "open camera");
    }

    #[tokio::test]
    async fn test_zero_nominal_frame_is_rejected() {
        let mut agent = PhoneAgent::with_collaborators(
            Arc::new(FinishModel),
            Arc::new(RecordingDevice::new(1080, 2400)),
            Arc::new(StaticAppRegistry::builtin()),
            AgentConfig::default()
                .quiet()
                .with_nominal_frame(NominalFrame::new(0, 1000)),
        );
        assert!(matches!(
            agent.run("open settings").await,
            Err(AgentError::InvalidConfig(_))
        ));
        assert!(matches!(
            agent.step(Some("open settings")).await,
            Err(AgentError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_config_validation() {
        assert!(AgentConfig::default().validate().is_ok());
        let bad_jitter = AgentConfig::default().with_jitter(JitterPolicy {
            max_fraction: f64::INFINITY,
            ..JitterPolicy::default()
        });
        assert!(matches!(bad_jitter.validate(), Err(AgentError::InvalidConfig(_))));
    }
}
