use clap::Parser;
use colored::*;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

use site_backup::{BackupCommand, BackupOrchestrator, ChromiumBrowser, ChromiumOptions};

fn setup_logging(verbose: u8, quiet: bool) {
    let default_filter = if quiet {
        "error"
    } else {
        match verbose {
            0 => "site_backup=info,warn",
            1 => "site_backup=debug,info",
            _ => "site_backup=trace,debug",
        }
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = BackupCommand::parse();
    setup_logging(args.verbose, args.quiet);

    let site_url = match args.site_url() {
        Ok(url) => url,
        Err(e) => {
            println!("{}", e);
            return ExitCode::from(2);
        }
    };

    let config = args.to_config();
    println!("🚀 Backing up {}", site_url.as_str().blue());
    println!("📁 Output directory: {:?}", config.mirror_root);

    let options = ChromiumOptions {
        executable: args.chrome.clone(),
        headless: !args.headful,
    };
    let browser = match ChromiumBrowser::launch(&options).await {
        Ok(browser) => browser,
        Err(e) => {
            eprintln!("❌ {}", e);
            return ExitCode::FAILURE;
        }
    };

    let orchestrator = BackupOrchestrator::new(config, site_url);
    let report = match orchestrator.run(browser).await {
        Ok(report) => report,
        Err(e) => {
            eprintln!("❌ Backup failed: {:#}", e);
            return ExitCode::FAILURE;
        }
    };

    let summary = &report.registry;
    println!(
        "📊 {} captured, {} downloaded, {} already present, {} failed",
        summary.captured, summary.downloaded, summary.skipped, summary.failed
    );

    if report.is_complete() {
        println!("✅ {}", report.summary_line().green());
        ExitCode::SUCCESS
    } else {
        println!("⚠️  {}", report.summary_line().yellow());
        ExitCode::FAILURE
    }
}
