//! Phone Pilot - drive an Android phone from a vision-language model
//!
//! Run with: cargo run --bin phone-pilot -- "open WeChat"
//!
//! Exit codes: 0 task completed, 1 task failed, 2 setup error.

use phone_pilot::adb::ADBConnection;
use phone_pilot::config::{AppRegistry, DEFAULT_APPS};
use phone_pilot::{AppSettings, ExecutionMode, PhoneAgent, TaskOutcome};
use std::env;
use std::io::{self, BufRead, Write};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

const USAGE: &str = "\
Usage: phone-pilot [OPTIONS] [TASK...]

Without a task, starts an interactive prompt.

Options:
  --list-apps          Print the apps that can be launched by name
  --list-devices       Print attached ADB devices
  --connect <ADDR>     Connect to a device over TCP/IP first
  --device <ID>        ADB device ID (overrides ADB_DEVICE_ID)
  --lang <cn|en>       Console and prompt language (overrides AGENT_LANG)
  --save-settings      Write the effective settings to the config file
  -h, --help           Show this help";

#[derive(Debug, Default)]
struct CliArgs {
    list_apps: bool,
    list_devices: bool,
    save_settings: bool,
    connect: Option<String>,
    device: Option<String>,
    lang: Option<String>,
    task: Vec<String>,
}

fn parse_args(args: impl IntoIterator<Item = String>) -> anyhow::Result<Option<CliArgs>> {
    let mut parsed = CliArgs::default();
    let mut args = args.into_iter();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-h" | "--help" => return Ok(None),
            "--list-apps" => parsed.list_apps = true,
            "--list-devices" => parsed.list_devices = true,
            "--save-settings" => parsed.save_settings = true,
            "--connect" | "--device" | "--lang" => {
                let value = args
                    .next()
                    .ok_or_else(|| anyhow::anyhow!("{} needs a value", arg))?;
                match arg.as_str() {
                    "--connect" => parsed.connect = Some(value),
                    "--device" => parsed.device = Some(value),
                    _ => parsed.lang = Some(value),
                }
            }
            flag if flag.starts_with("--") => anyhow::bail!("unknown option {}", flag),
            _ => parsed.task.push(arg),
        }
    }
    Ok(Some(parsed))
}

#[tokio::main]
async fn main() -> ExitCode {
    // Load .env file if present (ignore errors if file doesn't exist)
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    match run().await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("❌ {:#}", e);
            ExitCode::from(2)
        }
    }
}

async fn run() -> anyhow::Result<ExitCode> {
    let Some(args) = parse_args(env::args().skip(1))? else {
        println!("{}", USAGE);
        return Ok(ExitCode::SUCCESS);
    };

    let mut settings = AppSettings::load()?.with_env_overrides()?;
    if let Some(device) = &args.device {
        settings.device_id = device.clone();
    }
    if let Some(lang) = &args.lang {
        settings.lang = lang.clone();
    }

    if args.save_settings {
        let path = settings.save()?;
        println!("💾 Settings saved to {}", path.display());
    }

    if args.list_apps {
        for name in DEFAULT_APPS.names() {
            println!("{:<24} {}", name, DEFAULT_APPS.resolve(name).unwrap_or_default());
        }
        return Ok(ExitCode::SUCCESS);
    }

    let connection = ADBConnection::new();
    if let Some(address) = &args.connect {
        let message = connection.connect(address)?;
        println!("🔌 {}", message);
        if settings.device_id.is_empty() {
            settings.device_id = address.clone();
        }
    }

    if args.list_devices {
        let devices = connection.list_devices()?;
        if devices.is_empty() {
            println!("No devices attached");
        }
        for device in devices {
            println!(
                "{:<24} {:<12} {:?} {}",
                device.device_id,
                device.status,
                device.connection_type,
                device.model.as_deref().unwrap_or("")
            );
        }
        return Ok(ExitCode::SUCCESS);
    }

    let lang = settings.language();
    let msgs = lang.messages();
    let model_config = settings.model_config();
    let agent_config = settings.agent_config();

    println!("🤖 Phone Pilot - AI-powered Android Automation");
    println!("================================================");
    println!("Model: {} @ {}", model_config.model_name, model_config.base_url);
    println!("Language: {}", lang);
    println!(
        "Frame: {}x{}, jitter {:.1}%",
        agent_config.nominal_frame.width,
        agent_config.nominal_frame.height,
        agent_config.jitter.max_fraction * 100.0
    );
    println!(
        "Retry: max {} retries, timeout {:?}",
        model_config.max_retries, model_config.timeout
    );
    if let Some(id) = &agent_config.device_id {
        println!("Device: {}", id);
    }
    println!("================================================\n");

    let mut agent = PhoneAgent::new(model_config, agent_config, None, None);

    let cancel = agent.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel();
        }
    });

    if !args.task.is_empty() {
        let task = args.task.join(" ");
        println!("📝 {}: {}\n", msgs.task, task);
        let outcome = agent.run(&task).await?;
        report(&outcome, lang);
        return Ok(if outcome.is_success() {
            ExitCode::SUCCESS
        } else {
            ExitCode::from(1)
        });
    }

    let stdin = io::stdin();
    loop {
        print!("📝 {}: ", msgs.enter_task);
        io::stdout().flush()?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        let task = line.trim();
        if task.is_empty() {
            continue;
        }
        if task == "quit" || task == "exit" {
            break;
        }

        match agent.run_with_mode(task, ExecutionMode::Interactive).await {
            Ok(outcome) => report(&outcome, lang),
            Err(e) => eprintln!("\n❌ {}\n", e),
        }
        if agent.cancel_token().is_cancelled() {
            println!("⏹️ {}", msgs.cancelled);
            break;
        }
    }
    println!("{} 👋", msgs.goodbye);
    Ok(ExitCode::SUCCESS)
}

fn report(outcome: &TaskOutcome, lang: phone_pilot::config::Language) {
    let msgs = lang.messages();
    match outcome {
        TaskOutcome::Completed { result } => {
            println!("\n🎉 {}", "=".repeat(48));
            println!(
                "✅ {}: {}",
                msgs.task_completed,
                result.as_deref().unwrap_or("-")
            );
            println!("{}\n", "=".repeat(50));
        }
        TaskOutcome::Failed { failure } => {
            eprintln!("\n❌ {} ({})", msgs.task_failed, failure.kind);
            eprintln!("   {}: {}\n", msgs.reason, failure.detail);
        }
    }
}
