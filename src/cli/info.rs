use anyhow::Result;
use cdp_adapter::CdpConfig;

use super::context::CliContext;

pub fn cmd_info(ctx: &CliContext) -> Result<()> {
    let config = ctx.config();
    println!("roundcast {}", env!("CARGO_PKG_VERSION"));
    println!("  build date : {}", env!("BUILD_DATE"));
    println!("  git hash   : {}", env!("GIT_HASH"));
    println!("  config     : {}", ctx.config_path().display());
    println!(
        "  target     : {}",
        config.target_url.as_deref().unwrap_or("(not set)")
    );
    println!("  listen     : {}", config.listen_addr());
    let metrics = match ctx.metrics_port() {
        0 => "disabled".to_string(),
        port => format!(":{port}/metrics"),
    };
    println!("  metrics    : {metrics}");
    let detected = CdpConfig::default().executable;
    if detected.as_os_str().is_empty() {
        println!("  chromium   : not found (set ROUNDCAST_CHROME)");
    } else {
        println!("  chromium   : {}", detected.display());
    }
    Ok(())
}
