//! Dry run of a single cycle, showing what the model thought and where the
//! tap would land, without touching the device.

use phone_pilot::adb::AdbDevice;
use phone_pilot::config::{system_prompt, Language};
use phone_pilot::geometry::{jitter_point, ProfileConfig};
use phone_pilot::model::MessageBuilder;
use phone_pilot::{
    compress, ActionDirective, ActionParser, CompressionPolicy, Device, DeviceProfile,
    JitterPolicy, ModelClient, ModelConfig, NominalFrame, Remapper, VisionModel,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let frame = NominalFrame::default();
    let model = ModelClient::new(
        ModelConfig::default()
            .with_base_url("http://localhost:8000/v1")
            .with_thinking(true),
    );
    let device = AdbDevice::new(None);

    let metrics = device.display_metrics()?;
    let profile = DeviceProfile::from_metrics(&metrics, &ProfileConfig::default())?;
    println!("📱 Screen {}x{}, unsafe bands:", profile.width, profile.height);
    for region in &profile.unsafe_regions {
        println!("   {} [{}, {})", region.name, region.top, region.bottom);
    }

    let screenshot = device.screenshot()?;
    let image = compress(&screenshot, &CompressionPolicy::default())?;
    println!(
        "🖼️  Screenshot {}x{} -> {}x{} JPEG, {} KiB",
        screenshot.width,
        screenshot.height,
        image.width,
        image.height,
        image.bytes.len() / 1024
    );

    let task = "打开设置应用，查看Wi-Fi状态";
    let messages = vec![
        MessageBuilder::create_system_message(&system_prompt(Language::Chinese, frame)),
        MessageBuilder::create_user_message(
            task,
            Some(&MessageBuilder::data_url(image.mime_type(), &image.to_base64())),
        ),
    ];

    let response = model.complete(&messages).await?;
    if let Some(reasoning) = &response.reasoning {
        println!("\n🧠 Native reasoning:\n{}", reasoning);
    }

    let parsed = ActionParser::new(frame).parse_response(&response.raw)?;
    println!("\n💭 Thinking:\n{}", parsed.thinking.as_deref().unwrap_or("-"));
    println!("\n🎯 Directive: {}", parsed.directive);

    if let ActionDirective::Tap { point, .. } = &parsed.directive {
        let remapped = Remapper::new(frame).remap(*point, &profile);
        if let Some(warning) = remapped.warning {
            println!("⚠️  {}", warning);
        }
        let policy = JitterPolicy::default();
        let landed = jitter_point(remapped.point, &policy, &profile, &mut policy.rng(0));
        println!("📍 Would tap {} (unjittered {})", landed, remapped.point);
    }

    Ok(())
}
