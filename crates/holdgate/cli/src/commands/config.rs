use holdgate_service::HoldgateConfig;

pub fn execute(config: &HoldgateConfig) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(config)?);
    Ok(())
}
