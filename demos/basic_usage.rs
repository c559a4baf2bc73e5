//! Basic usage example for Phone Pilot.

use phone_pilot::config::Language;
use phone_pilot::{AgentConfig, JitterPolicy, ModelConfig, PhoneAgent, TaskOutcome};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let model_config = ModelConfig::default()
        .with_base_url("http://localhost:8000/v1")
        .with_model_name("autoglm-phone-9b");

    let agent_config = AgentConfig::default()
        .with_lang(Language::Chinese)
        .with_max_turns(50)
        .with_jitter(JitterPolicy::default().with_max_fraction(0.008));

    let mut agent = PhoneAgent::new(model_config, agent_config, None, None);

    println!("🤖 Starting Phone Pilot...\n");

    let task = "打开微信";
    println!("📝 Task: {}\n", task);

    match agent.run(task).await? {
        TaskOutcome::Completed { result } => {
            println!("\n✅ Task completed: {}", result.unwrap_or_default());
        }
        TaskOutcome::Failed { failure } => {
            eprintln!("\n❌ Task failed ({}): {}", failure.kind, failure.detail);
        }
    }

    Ok(())
}
