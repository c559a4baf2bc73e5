// Copyright 2025 Zhipu AI (Original Python implementation)
// Copyright 2025 ModerRAS (Rust implementation)
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! # Phone Pilot
//!
//! Drives Android phones from the output of a vision-language model.
//!
//! Each cycle captures the screen over ADB, compresses it, asks the model
//! what to do next, parses the reply into an [`ActionDirective`], maps the
//! model's normalized coordinates onto the physical screen, perturbs the
//! gesture slightly so it stays human-like and out of the system bars, and
//! dispatches it to the device.
//!
//! Built on the ideas of [Open-AutoGLM](https://github.com/zai-org/Open-AutoGLM)
//! by Zhipu AI.
//!
//! ## Example
//!
//! ```rust,no_run
//! use phone_pilot::{AgentConfig, ModelConfig, PhoneAgent, TaskOutcome};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let model_config = ModelConfig::default();
//!     let agent_config = AgentConfig::default();
//!
//!     let mut agent = PhoneAgent::new(model_config, agent_config, None, None);
//!     match agent.run("打开微信").await? {
//!         TaskOutcome::Completed { result } => println!("Task result: {:?}", result),
//!         TaskOutcome::Failed { failure } => println!("Task failed: {}", failure),
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Parsing and remapping on their own
//!
//! ```rust
//! use phone_pilot::actions::{ActionDirective, ActionParser};
//! use phone_pilot::geometry::{DeviceProfile, NominalFrame, Remapper};
//!
//! let frame = NominalFrame::new(1000, 1780);
//! let parser = ActionParser::new(frame);
//! let directive = parser
//!     .parse("<thinking>top left</thinking><action>tap(120,340)</action>")
//!     .unwrap();
//!
//! let profile = DeviceProfile::with_system_bars(720, 1604, 40, 96).unwrap();
//! if let ActionDirective::Tap { point, .. } = directive {
//!     let pixel = Remapper::new(frame).remap(point, &profile).point;
//!     assert_eq!((pixel.x, pixel.y), (86, 306));
//! }
//! ```

pub mod actions;
pub mod adb;
pub mod agent;
pub mod compress;
pub mod config;
pub mod device;
pub mod geometry;
pub mod model;
pub mod settings;

pub use actions::{ActionDirective, ActionHandler, ActionParser, ParseError};
pub use agent::{
    AgentConfig, AgentError, ControlLoop, ExecutionMode, Failure, FailureKind, PhoneAgent,
    Session, StepOutcome, TaskOutcome,
};
pub use compress::{compress, CompressedImage, CompressionPolicy};
pub use device::{Device, DeviceError, KeyCode, ScreenFrame};
pub use geometry::{DeviceProfile, JitterPolicy, NominalFrame, Remapper};
pub use model::{ModelClient, ModelConfig, ModelResponse, RetryPolicy, TransportError, VisionModel};
pub use settings::{AppSettings, SettingsError};
