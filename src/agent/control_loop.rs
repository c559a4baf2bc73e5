//! The capture → model → parse → act cycle.
//!
//! One [`ControlLoop`] drives one device. Each cycle captures and compresses
//! the screen, asks the model for the next directive (with clarification turns
//! when the reply is unusable), then dispatches it. The model request is the
//! only await point that can take long; cancellation is raced against it and
//! checked again at every state transition.

use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::phone_agent::AgentConfig;
use super::session::Session;
use super::state::{Failure, FailureKind, LoopState, StepOutcome, TaskOutcome};
use crate::actions::{
    ActionDirective, ActionError, ActionHandler, ActionOutcome, ActionParser, ConfirmationCallback,
    ParseError, ParsedResponse, TakeoverCallback,
};
use crate::compress::{compress_with_retry_using, CompressedImage, ImageEncoder, JpegImageEncoder};
use crate::config::{malformed_action_reminder, no_action_reminder, AppRegistry};
use crate::device::{retry_rejected, Device, DeviceError};
use crate::geometry::{Letterbox, Remapper};
use crate::model::{
    MessageBuilder, ModelResponse, RetryPolicy, TransportError, VisionModel, DEFAULT_TIMEOUT_SECS,
};

/// Runs tasks against one device and one model.
pub struct ControlLoop {
    model: Arc<dyn VisionModel>,
    device: Arc<dyn Device>,
    registry: Arc<dyn AppRegistry>,
    parser: ActionParser,
    handler: ActionHandler,
    config: AgentConfig,
    retry: RetryPolicy,
    model_timeout: Duration,
    encoder: Arc<dyn ImageEncoder>,
}

impl ControlLoop {
    pub fn new(
        model: Arc<dyn VisionModel>,
        device: Arc<dyn Device>,
        registry: Arc<dyn AppRegistry>,
        config: AgentConfig,
    ) -> Self {
        let parser = ActionParser::new(config.nominal_frame).with_registry(registry.clone());
        let remapper =
            Remapper::new(config.nominal_frame).with_aspect_tolerance(config.aspect_tolerance);
        let handler = ActionHandler::new(remapper, config.jitter, registry.clone());

        Self {
            model,
            device,
            registry,
            parser,
            handler,
            config,
            retry: RetryPolicy::default(),
            model_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            encoder: Arc::new(JpegImageEncoder),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_model_timeout(mut self, timeout: Duration) -> Self {
        self.model_timeout = timeout;
        self
    }

    pub fn with_encoder(mut self, encoder: Arc<dyn ImageEncoder>) -> Self {
        self.encoder = encoder;
        self
    }

    pub fn with_confirmation_callback(mut self, callback: ConfirmationCallback) -> Self {
        self.handler = self.handler.with_confirmation_callback(callback);
        self
    }

    pub fn with_takeover_callback(mut self, callback: TakeoverCallback) -> Self {
        self.handler = self.handler.with_takeover_callback(callback);
        self
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn device(&self) -> &Arc<dyn Device> {
        &self.device
    }

    /// Drive `session` until it completes, fails or `cancel` fires.
    pub async fn run(&self, session: &mut Session, cancel: &CancellationToken) -> TaskOutcome {
        loop {
            if let Some(outcome) = self.step(session, cancel).await.finished {
                return outcome;
            }
        }
    }

    /// Run one cycle of `session`.
    ///
    /// A session that already finished is reported again without touching
    /// the device or the model.
    pub async fn step(&self, session: &mut Session, cancel: &CancellationToken) -> StepOutcome {
        let mut step = StepOutcome::new(session.cycle);
        if let Some(outcome) = session.outcome() {
            step.finished = Some(outcome.clone());
            return step;
        }

        if session.history().is_empty() {
            tracing::info!(session = %session.id, "Starting task: {}", session.task);
            session.push(MessageBuilder::create_system_message(
                &self.config.system_prompt_text(),
            ));
        }

        let result = self.cycle(session, cancel, &mut step).await;
        step.cycle = session.cycle;
        let outcome = match result {
            Ok(None) => return step,
            Ok(Some(outcome)) => outcome,
            Err(failure) => TaskOutcome::from(failure),
        };

        self.finish(session, &outcome);
        step.finished = Some(outcome);
        step
    }

    fn finish(&self, session: &mut Session, outcome: &TaskOutcome) {
        session.finish(outcome.clone());
        let state = session.state();
        transition(session, state);
        let elapsed = session.elapsed().num_milliseconds() as f64 / 1000.0;
        match outcome {
            TaskOutcome::Completed { result } => tracing::info!(
                session = %session.id,
                "Task completed after {} cycles in {:.1}s: {}",
                session.cycle,
                elapsed,
                result.as_deref().unwrap_or("-")
            ),
            TaskOutcome::Failed { failure } => tracing::warn!(
                session = %session.id,
                "Task failed after {} cycles in {:.1}s: {}",
                session.cycle,
                elapsed,
                failure
            ),
        }
    }

    /// One pass through the state machine. `Ok(None)` means "next cycle".
    async fn cycle(
        &self,
        session: &mut Session,
        cancel: &CancellationToken,
        step: &mut StepOutcome,
    ) -> Result<Option<TaskOutcome>, Failure> {
        checkpoint(session, LoopState::Idle, cancel)?;
        session.cycle += 1;
        if session.cycle > self.config.max_turns {
            return Err(Failure::new(
                FailureKind::MaxTurnsExceeded,
                format!("no result after {} turns", self.config.max_turns),
            ));
        }

        checkpoint(session, LoopState::Capturing, cancel)?;
        let image = self.capture()?;
        let image_url = MessageBuilder::data_url(image.mime_type(), &image.to_base64());

        let text = self.user_turn_text(session);
        session.push(MessageBuilder::create_user_message(&text, Some(&image_url)));

        let parsed = self.await_directive(session, &image_url, cancel).await?;
        step.thinking = parsed.thinking.clone();
        step.directive = Some(parsed.directive.clone());

        checkpoint(session, LoopState::Acting, cancel)?;
        self.act(parsed.directive, session, image.letterbox.as_ref(), cancel)
            .await
    }

    fn capture(&self) -> Result<CompressedImage, Failure> {
        let frame = retry_rejected(|| self.device.screenshot()).map_err(|e| {
            tracing::error!("Screen capture failed: {}", e);
            device_failure(&e)
        })?;
        if frame.is_sensitive {
            tracing::warn!("Screen content is protected, sending a blank frame");
        }

        let image = compress_with_retry_using(
            &frame,
            &self.config.compression,
            self.config.compression_retries,
            self.encoder.as_ref(),
        )
        .map_err(|e| {
            tracing::error!("Screenshot compression failed: {}", e);
            Failure::new(FailureKind::CompressionExhausted, e.to_string())
        })?;

        if let Some(warning) = image.warning {
            tracing::warn!("Compressed screenshot is distorted: {}", warning);
        }
        tracing::debug!(
            "Screenshot {}x{} compressed to {}x{} ({} bytes)",
            frame.width,
            frame.height,
            image.width,
            image.height,
            image.bytes.len()
        );
        Ok(image)
    }

    fn user_turn_text(&self, session: &Session) -> String {
        let screen_info = MessageBuilder::build_screen_info(&self.current_app());
        if session.is_first_cycle() {
            format!("{}\n\n{}", session.task, screen_info)
        } else {
            format!("** Screen Info **\n\n{}", screen_info)
        }
    }

    fn current_app(&self) -> String {
        match self.device.current_package() {
            Some(package) => self
                .registry
                .name_for_package(&package)
                .map(str::to_string)
                .unwrap_or(package),
            None => "System Home".to_string(),
        }
    }

    /// Ask the model until it answers with a usable directive or the
    /// clarification budget runs out.
    async fn await_directive(
        &self,
        session: &mut Session,
        image_url: &str,
        cancel: &CancellationToken,
    ) -> Result<ParsedResponse, Failure> {
        let mut clarifications = 0;
        loop {
            checkpoint(session, LoopState::AwaitingModel, cancel)?;
            let response = self.request_model(session.history(), cancel).await?;
            if let Some(reasoning) = &response.reasoning {
                tracing::debug!("Model reasoning: {}", reasoning);
            }

            session.push(MessageBuilder::create_assistant_message(&response.raw));
            session.strip_images();

            checkpoint(session, LoopState::Parsing, cancel)?;
            let error = match self.parser.parse_response(&response.raw) {
                Ok(parsed) => {
                    self.report_step(session, &response, &parsed);
                    return Ok(parsed);
                }
                Err(error) => error,
            };

            clarifications += 1;
            if clarifications > self.config.max_clarifications {
                let kind = match error {
                    ParseError::NoAction => FailureKind::NoActionExhausted,
                    _ => FailureKind::MalformedActionExhausted,
                };
                return Err(Failure::new(kind, error.to_string()));
            }
            tracing::warn!(
                "Unusable model reply ({}), asking again ({}/{})",
                error,
                clarifications,
                self.config.max_clarifications
            );

            let reminder = match &error {
                ParseError::NoAction => no_action_reminder(self.config.lang).to_string(),
                other => malformed_action_reminder(self.config.lang, &other.to_string()),
            };
            session.push(MessageBuilder::create_user_message(&reminder, Some(image_url)));
        }
    }

    /// One model call with timeout, backoff and cancellation.
    async fn request_model(
        &self,
        messages: &[Value],
        cancel: &CancellationToken,
    ) -> Result<ModelResponse, Failure> {
        let mut retry = 0;
        loop {
            let attempt = tokio::time::timeout(self.model_timeout, self.model.complete(messages));
            let result = tokio::select! {
                _ = cancel.cancelled() => return Err(Failure::cancelled()),
                result = attempt => result.unwrap_or(Err(TransportError::Timeout(self.model_timeout))),
            };

            let error = match result {
                Ok(response) => return Ok(response),
                Err(error) => error,
            };
            let delay = match self.retry.delay_for(retry) {
                Some(delay) if error.is_retryable() => delay,
                _ => {
                    let attempts = retry + 1;
                    return Err(Failure::new(
                        FailureKind::TransportExhausted,
                        format!("{} (after {} attempt(s))", error, attempts),
                    ));
                }
            };

            retry += 1;
            tracing::warn!(
                "Model request failed (attempt {}/{}): {}, retrying in {:?}",
                retry,
                self.retry.max_attempts(),
                error,
                delay
            );
            sleep_or_cancel(delay, cancel).await?;
        }
    }

    async fn act(
        &self,
        directive: ActionDirective,
        session: &mut Session,
        letterbox: Option<&Letterbox>,
        cancel: &CancellationToken,
    ) -> Result<Option<TaskOutcome>, Failure> {
        match directive {
            ActionDirective::TaskComplete { result } => Ok(Some(TaskOutcome::Completed { result })),
            ActionDirective::TaskFailed { reason } => {
                Err(Failure::new(FailureKind::ModelReported, reason))
            }
            ActionDirective::Wait { duration } => {
                tracing::info!(cycle = session.cycle, "Waiting {:?}", duration);
                sleep_or_cancel(duration, cancel).await?;
                Ok(None)
            }
            directive => {
                if directive.is_gesture() {
                    self.warn_on_aspect_mismatch(session);
                }
                let outcome = self
                    .handler
                    .execute(
                        &directive,
                        self.device.as_ref(),
                        &session.profile,
                        letterbox,
                        u64::from(session.cycle),
                    )
                    .map_err(action_failure)?;

                match outcome {
                    ActionOutcome::Declined { message } => {
                        return Err(Failure::new(FailureKind::UserDeclined, message))
                    }
                    ActionOutcome::Dispatched { summary } | ActionOutcome::Handled { summary } => {
                        tracing::info!(cycle = session.cycle, "{}", summary);
                    }
                }
                sleep_or_cancel(self.config.settle_delay, cancel).await?;
                Ok(None)
            }
        }
    }

    fn warn_on_aspect_mismatch(&self, session: &mut Session) {
        if self.config.compression.letterbox.is_some() {
            return;
        }
        if let Some(warning) = self.handler.remapper().check_aspect(&session.profile) {
            if session.mark_aspect_warned() {
                tracing::warn!(
                    "Model frame and screen differ in shape, taps are best effort: {}",
                    warning
                );
            }
        }
    }

    fn report_step(&self, session: &Session, response: &ModelResponse, parsed: &ParsedResponse) {
        if !self.config.verbose {
            return;
        }
        let msgs = self.config.lang.messages();
        let thinking = parsed
            .thinking
            .as_deref()
            .or(response.reasoning.as_deref())
            .unwrap_or_default();

        println!("\n{}", "=".repeat(50));
        println!("📍 {} {}", msgs.step, session.cycle);
        println!("💭 {}:", msgs.thinking);
        println!("{}", "-".repeat(50));
        println!("{}", thinking.trim());
        println!("{}", "-".repeat(50));
        println!("🎯 {}: {}", msgs.action, parsed.directive);
        println!("{}\n", "=".repeat(50));
    }
}

fn transition(session: &mut Session, state: LoopState) {
    session.enter(state);
    tracing::debug!(session = %session.id, cycle = session.cycle, "-> {}", state);
}

/// Enter `state` unless the session was cancelled.
fn checkpoint(
    session: &mut Session,
    state: LoopState,
    cancel: &CancellationToken,
) -> Result<(), Failure> {
    if cancel.is_cancelled() {
        return Err(Failure::cancelled());
    }
    transition(session, state);
    Ok(())
}

async fn sleep_or_cancel(duration: Duration, cancel: &CancellationToken) -> Result<(), Failure> {
    if duration.is_zero() {
        return Ok(());
    }
    tokio::select! {
        _ = cancel.cancelled() => Err(Failure::cancelled()),
        _ = tokio::time::sleep(duration) => Ok(()),
    }
}

fn device_failure(error: &DeviceError) -> Failure {
    let kind = match error {
        DeviceError::Disconnected(_) => FailureKind::DeviceDisconnected,
        DeviceError::Rejected(_) => FailureKind::DeviceRejected,
    };
    Failure::new(kind, error.to_string())
}

fn action_failure(error: ActionError) -> Failure {
    match error {
        ActionError::Device(e) => device_failure(&e),
        other => Failure::new(FailureKind::DeviceRejected, other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::session::ExecutionMode;
    use crate::compress::testing::FlakyEncoder;
    use crate::config::StaticAppRegistry;
    use crate::device::testing::{Command, RecordingDevice};
    use crate::geometry::{DeviceProfile, JitterPolicy, NominalFrame, PixelPoint};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Replays canned replies and records every request.
    struct ScriptedModel {
        replies: Mutex<VecDeque<Result<ModelResponse, TransportError>>>,
        fallback: Option<String>,
        requests: Mutex<Vec<Vec<Value>>>,
    }

    impl ScriptedModel {
        fn new(replies: Vec<Result<ModelResponse, TransportError>>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                fallback: None,
                requests: Mutex::new(Vec::new()),
            }
        }

        fn texts(replies: &[&str]) -> Self {
            Self::new(replies.iter().map(|r| Ok(ModelResponse::new(*r))).collect())
        }

        fn repeating(reply: &str) -> Self {
            Self {
                fallback: Some(reply.to_string()),
                ..Self::new(Vec::new())
            }
        }

        fn calls(&self) -> usize {
            self.requests.lock().unwrap().len()
        }

        fn last_request(&self) -> Vec<Value> {
            self.requests.lock().unwrap().last().cloned().unwrap_or_default()
        }
    }

    #[async_trait]
    impl VisionModel for ScriptedModel {
        async fn complete(&self, messages: &[Value]) -> Result<ModelResponse, TransportError> {
            self.requests.lock().unwrap().push(messages.to_vec());
            match self.replies.lock().unwrap().pop_front() {
                Some(reply) => reply,
                None => match &self.fallback {
                    Some(text) => Ok(ModelResponse::new(text.clone())),
                    None => Err(TransportError::EmptyResponse),
                },
            }
        }
    }

    /// Never answers within any reasonable timeout.
    struct StalledModel {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl VisionModel for StalledModel {
        async fn complete(&self, _messages: &[Value]) -> Result<ModelResponse, TransportError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(ModelResponse::new("<answer>finish()</answer>"))
        }
    }

    fn config() -> AgentConfig {
        AgentConfig::default()
            .quiet()
            .with_nominal_frame(NominalFrame::new(1000, 1780))
            .with_jitter(JitterPolicy::disabled())
            .with_settle_delay(Duration::ZERO)
    }

    fn session() -> Session {
        let profile = DeviceProfile::with_system_bars(720, 1604, 40, 96).unwrap();
        Session::new("open settings", ExecutionMode::SingleTask, profile)
    }

    fn control_loop(
        model: Arc<dyn VisionModel>,
        device: Arc<RecordingDevice>,
        config: AgentConfig,
    ) -> ControlLoop {
        ControlLoop::new(
            model,
            device,
            Arc::new(StaticAppRegistry::builtin()),
            config,
        )
        .with_retry_policy(RetryPolicy::default().with_base_delay(Duration::from_millis(1)))
    }

    fn failure_kind(outcome: &TaskOutcome) -> Option<FailureKind> {
        outcome.failure().map(|f| f.kind)
    }

    #[tokio::test]
    async fn test_tap_then_finish() {
        let model = Arc::new(ScriptedModel::texts(&[
            "<thinking>The settings icon is near the top.</thinking><action>tap(120,340)</action>",
            r#"<answer>finish(message="opened")</answer>"#,
        ]));
        let device = Arc::new(RecordingDevice::new(720, 1604));
        let runner = control_loop(model.clone(), device.clone(), config());

        let mut session = session();
        let outcome = runner.run(&mut session, &CancellationToken::new()).await;

        assert_eq!(
            outcome,
            TaskOutcome::Completed {
                result: Some("opened".to_string())
            }
        );
        assert_eq!(device.actions(), vec![Command::Tap(PixelPoint::new(86, 306))]);
        assert_eq!(session.cycle, 2);
        assert_eq!(model.calls(), 2);
    }

    #[tokio::test]
    async fn test_first_turn_carries_task_then_screen_info() {
        let model = Arc::new(ScriptedModel::texts(&[
            "<answer>back()</answer>",
            "<answer>finish()</answer>",
        ]));
        let device = Arc::new(RecordingDevice::new(720, 1604));
        let runner = control_loop(model.clone(), device, config());
        let mut session = session();
        runner.run(&mut session, &CancellationToken::new()).await;

        let history = session.history();
        assert_eq!(history[0]["role"], "system");
        let first = history[1]["content"][0]["text"].as_str().unwrap();
        assert!(first.starts_with("open settings"));
        assert!(first.contains("\"current_app\":\"Android System Settings\""));
        let second = history[3]["content"][0]["text"].as_str().unwrap();
        assert!(second.starts_with("** Screen Info **"));

        // Images are stripped once the model has seen them.
        assert!(history
            .iter()
            .all(|m| !m.to_string().contains("image_url")));
        // The request that was sent still carried the screenshot.
        let sent = model.last_request();
        assert!(sent.last().unwrap().to_string().contains("data:image/jpeg;base64,"));
    }

    #[tokio::test]
    async fn test_no_action_exhausts_clarifications() {
        let model = Arc::new(ScriptedModel::texts(&[
            "I think the screen shows the home page.",
            "Still looking at it.",
        ]));
        let device = Arc::new(RecordingDevice::new(720, 1604));
        let runner = control_loop(model.clone(), device.clone(), config().with_max_clarifications(1));

        let outcome = runner.run(&mut session(), &CancellationToken::new()).await;

        assert_eq!(failure_kind(&outcome), Some(FailureKind::NoActionExhausted));
        assert_eq!(model.calls(), 2);
        assert!(device.actions().is_empty());

        // The clarification turn re-sent the screenshot with a reminder.
        let retry = model.last_request();
        let reminder = retry.last().unwrap();
        assert_eq!(reminder["role"], "user");
        assert_eq!(reminder["content"][0]["type"], "image_url");
    }

    #[tokio::test]
    async fn test_clarification_recovers() {
        let model = Arc::new(ScriptedModel::texts(&[
            "<answer>fly(1, 2)</answer>",
            "<answer>finish()</answer>",
        ]));
        let device = Arc::new(RecordingDevice::new(720, 1604));
        let runner = control_loop(model.clone(), device, config());
        let outcome = runner.run(&mut session(), &CancellationToken::new()).await;
        assert!(outcome.is_success());
        assert_eq!(model.calls(), 2);
    }

    #[tokio::test]
    async fn test_malformed_exhaustion_kind() {
        let model = Arc::new(ScriptedModel::repeating("<answer>tap(5000, 1)</answer>"));
        let device = Arc::new(RecordingDevice::new(720, 1604));
        let runner = control_loop(model.clone(), device, config().with_max_clarifications(2));
        let outcome = runner.run(&mut session(), &CancellationToken::new()).await;
        assert_eq!(
            failure_kind(&outcome),
            Some(FailureKind::MalformedActionExhausted)
        );
        assert_eq!(model.calls(), 3);
    }

    #[tokio::test]
    async fn test_disconnect_during_capture_fails_immediately() {
        let model = Arc::new(ScriptedModel::texts(&["<answer>finish()</answer>"]));
        let device = Arc::new(
            RecordingDevice::new(720, 1604)
                .fail_screenshot(DeviceError::Disconnected("device offline".to_string())),
        );
        let runner = control_loop(model.clone(), device.clone(), config());

        let outcome = runner.run(&mut session(), &CancellationToken::new()).await;

        assert_eq!(failure_kind(&outcome), Some(FailureKind::DeviceDisconnected));
        assert!(device.commands().is_empty(), "capture must not be retried");
        assert_eq!(model.calls(), 0);
    }

    #[tokio::test]
    async fn test_rejected_capture_is_retried_once() {
        let model = Arc::new(ScriptedModel::texts(&["<answer>finish()</answer>"]));
        let device = Arc::new(
            RecordingDevice::new(720, 1604)
                .fail_screenshot(DeviceError::Rejected("busy".to_string())),
        );
        let runner = control_loop(model, device.clone(), config());
        let outcome = runner.run(&mut session(), &CancellationToken::new()).await;
        assert!(outcome.is_success());
        assert_eq!(device.commands(), vec![Command::Screenshot]);
    }

    #[tokio::test]
    async fn test_transport_errors_are_retried_with_backoff() {
        let model = Arc::new(ScriptedModel::new(vec![
            Err(TransportError::Api {
                status: 503,
                body: "overloaded".to_string(),
            }),
            Err(TransportError::Http("connection reset".to_string())),
            Ok(ModelResponse::new("<answer>finish()</answer>")),
        ]));
        let device = Arc::new(RecordingDevice::new(720, 1604));
        let runner = control_loop(model.clone(), device, config());
        let outcome = runner.run(&mut session(), &CancellationToken::new()).await;
        assert!(outcome.is_success());
        assert_eq!(model.calls(), 3);
    }

    #[tokio::test]
    async fn test_non_retryable_transport_error_fails() {
        let model = Arc::new(ScriptedModel::new(vec![Err(TransportError::Api {
            status: 401,
            body: "bad key".to_string(),
        })]));
        let device = Arc::new(RecordingDevice::new(720, 1604));
        let runner = control_loop(model.clone(), device, config());
        let outcome = runner.run(&mut session(), &CancellationToken::new()).await;
        assert_eq!(failure_kind(&outcome), Some(FailureKind::TransportExhausted));
        assert_eq!(model.calls(), 1);
    }

    #[tokio::test]
    async fn test_model_timeout_exhausts_retries() {
        let model = Arc::new(StalledModel {
            calls: AtomicUsize::new(0),
        });
        let device = Arc::new(RecordingDevice::new(720, 1604));
        let runner = control_loop(model.clone(), device, config())
            .with_model_timeout(Duration::from_millis(20))
            .with_retry_policy(
                RetryPolicy::default()
                    .with_max_retries(1)
                    .with_base_delay(Duration::from_millis(1)),
            );
        let outcome = runner.run(&mut session(), &CancellationToken::new()).await;
        let failure = outcome.failure().unwrap();
        assert_eq!(failure.kind, FailureKind::TransportExhausted);
        assert!(failure.detail.contains("timed out"));
        assert_eq!(model.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_cancel_while_awaiting_model() {
        let model = Arc::new(StalledModel {
            calls: AtomicUsize::new(0),
        });
        let device = Arc::new(RecordingDevice::new(720, 1604));
        let runner = control_loop(model, device.clone(), config());
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let outcome = runner.run(&mut session(), &cancel).await;
        assert_eq!(failure_kind(&outcome), Some(FailureKind::Cancelled));
        assert!(device.actions().is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let model = Arc::new(ScriptedModel::texts(&["<answer>finish()</answer>"]));
        let device = Arc::new(RecordingDevice::new(720, 1604));
        let runner = control_loop(model.clone(), device.clone(), config());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcome = runner.run(&mut session(), &cancel).await;
        assert_eq!(failure_kind(&outcome), Some(FailureKind::Cancelled));
        assert!(device.commands().is_empty());
        assert_eq!(model.calls(), 0);
    }

    #[tokio::test]
    async fn test_max_turns() {
        let model = Arc::new(ScriptedModel::repeating("<answer>tap(500, 500)</answer>"));
        let device = Arc::new(RecordingDevice::new(720, 1604));
        let runner = control_loop(model, device.clone(), config().with_max_turns(3));
        let outcome = runner.run(&mut session(), &CancellationToken::new()).await;
        assert_eq!(failure_kind(&outcome), Some(FailureKind::MaxTurnsExceeded));
        assert_eq!(device.actions().len(), 3);
    }

    #[tokio::test]
    async fn test_model_reported_failure() {
        let model = Arc::new(ScriptedModel::texts(&[r#"<answer>fail("captcha")</answer>"#]));
        let device = Arc::new(RecordingDevice::new(720, 1604));
        let runner = control_loop(model, device, config());
        let outcome = runner.run(&mut session(), &CancellationToken::new()).await;
        assert_eq!(
            outcome,
            TaskOutcome::failed(FailureKind::ModelReported, "captcha")
        );
    }

    #[tokio::test]
    async fn test_declined_sensitive_tap() {
        let model = Arc::new(ScriptedModel::texts(&[
            r#"<answer>do(action="Tap", element=[500, 500], message="Pay 30 CNY")</answer>"#,
        ]));
        let device = Arc::new(RecordingDevice::new(720, 1604));
        let runner = control_loop(model, device.clone(), config())
            .with_confirmation_callback(Box::new(|_| false));
        let outcome = runner.run(&mut session(), &CancellationToken::new()).await;
        assert_eq!(
            outcome,
            TaskOutcome::failed(FailureKind::UserDeclined, "Pay 30 CNY")
        );
        assert!(device.actions().is_empty());
    }

    #[tokio::test]
    async fn test_device_disconnect_during_action() {
        let model = Arc::new(ScriptedModel::texts(&["<answer>tap(500, 500)</answer>"]));
        let device = Arc::new(
            RecordingDevice::new(720, 1604)
                .fail_action(DeviceError::Disconnected("device not found".to_string())),
        );
        let runner = control_loop(model, device, config());
        let outcome = runner.run(&mut session(), &CancellationToken::new()).await;
        assert_eq!(failure_kind(&outcome), Some(FailureKind::DeviceDisconnected));
    }

    #[tokio::test]
    async fn test_launch_resolves_through_registry() {
        let model = Arc::new(ScriptedModel::texts(&[
            r#"<answer>do(action="Launch", app="Settings")</answer>"#,
            "<answer>finish()</answer>",
        ]));
        let device = Arc::new(RecordingDevice::new(720, 1604));
        let runner = control_loop(model, device.clone(), config());
        runner.run(&mut session(), &CancellationToken::new()).await;
        assert_eq!(
            device.actions(),
            vec![Command::Launch("com.android.settings".to_string())]
        );
    }

    #[tokio::test]
    async fn test_compression_failures_exhaust_retries() {
        let model = Arc::new(ScriptedModel::texts(&["<answer>finish()</answer>"]));
        let device = Arc::new(RecordingDevice::new(720, 1604));
        let encoder = Arc::new(FlakyEncoder::new(u32::MAX));
        let runner = control_loop(model.clone(), device, config()).with_encoder(encoder.clone());

        let outcome = runner.run(&mut session(), &CancellationToken::new()).await;

        let failure = outcome.failure().unwrap();
        assert_eq!(failure.kind, FailureKind::CompressionExhausted);
        assert!(failure.detail.contains("quality 55"), "{}", failure.detail);
        assert_eq!(encoder.qualities(), vec![85, 70, 55]);
        assert_eq!(model.calls(), 0);
    }

    #[tokio::test]
    async fn test_compression_recovers_with_degraded_quality() {
        let model = Arc::new(ScriptedModel::texts(&["<answer>finish()</answer>"]));
        let device = Arc::new(RecordingDevice::new(720, 1604));
        let encoder = Arc::new(FlakyEncoder::new(1));
        let runner = control_loop(model, device, config()).with_encoder(encoder.clone());

        let outcome = runner.run(&mut session(), &CancellationToken::new()).await;
        assert!(outcome.is_success());
        assert_eq!(encoder.qualities(), vec![85, 70]);
    }

    #[tokio::test]
    async fn test_step_reports_each_cycle() {
        let model = Arc::new(ScriptedModel::texts(&[
            "<thinking>Back out first.</thinking><action>back()</action>",
            r#"<answer>finish(message="done")</answer>"#,
        ]));
        let device = Arc::new(RecordingDevice::new(720, 1604));
        let runner = control_loop(model.clone(), device, config());
        let cancel = CancellationToken::new();
        let mut session = session();

        let first = runner.step(&mut session, &cancel).await;
        assert_eq!(first.cycle, 1);
        assert_eq!(first.thinking.as_deref(), Some("Back out first."));
        assert_eq!(first.directive.as_ref().map(|d| d.name()), Some("key"));
        assert!(!first.is_finished());
        assert_eq!(session.state(), LoopState::Acting);

        let second = runner.step(&mut session, &cancel).await;
        assert_eq!(second.cycle, 2);
        assert_eq!(
            second.finished,
            Some(TaskOutcome::Completed {
                result: Some("done".to_string())
            })
        );
        assert!(session.is_finished());
        assert_eq!(session.state(), LoopState::Completed);

        // A finished session is reported again without another request.
        let again = runner.step(&mut session, &cancel).await;
        assert_eq!(again.finished, second.finished);
        assert_eq!(again.directive, None);
        assert_eq!(model.calls(), 2);
    }
}
