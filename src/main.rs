// Anchor Survey - Main Entry Point
// Ranges every anchor pair over the network link (or a simulation) and places the anchors

use anchor_survey::config::Config;
use anchor_survey::link::{load_simulation, RangingLink, SimulatedLink};
use anchor_survey::net::TcpRangingLink;
use anchor_survey::output::{CsvOutput, JsonOutput, LogOutput};
use anchor_survey::{SurveyHandle, SurveyOrchestrator, SurveyPhase};
use clap::Parser;
use tokio::signal;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Parse command-line arguments
    let config = Config::parse();

    // Initialize logging
    init_logging(config.verbose);

    info!("Starting anchor survey");

    let survey_config = config.survey_config();
    let (handle, queue) = SurveyHandle::channel();

    // 1. Ranging link
    let mut simulated_ids: Vec<String> = Vec::new();
    let link: Box<dyn RangingLink> = match (&config.simulate, &config.link) {
        (Some(path), _) => {
            let anchors = load_simulation(path)?;
            info!("Simulating {} anchors from {}", anchors.len(), path);
            simulated_ids = anchors.iter().map(|a| a.anchorid.clone()).collect();
            Box::new(SimulatedLink::new(&anchors, handle.clone()).with_noise(config.noise, config.seed))
        }
        (None, Some(addr)) => {
            info!("Anchor network link to {}", addr);
            Box::new(TcpRangingLink::spawn(addr.clone(), handle.clone()))
        }
        (None, None) => {
            error!("No ranging link specified! Use --link HOST:PORT or --simulate FILE");
            return Err("no ranging link".into());
        }
    };

    let mut survey = SurveyOrchestrator::new(survey_config, link, queue);

    // 2. Outputs
    survey.add_output(Box::new(LogOutput::new()));

    for filename in &config.write_csv {
        info!("Writing CSV results to {}", filename);
        match CsvOutput::new(filename) {
            Ok(out) => survey.add_output(Box::new(out)),
            Err(e) => error!("Failed to open CSV output file {}: {}", filename, e),
        }
    }

    for filename in &config.write_json {
        info!("Writing JSON results to {}", filename);
        match JsonOutput::new(filename) {
            Ok(out) => survey.add_output(Box::new(out)),
            Err(e) => error!("Failed to open JSON output file {}: {}", filename, e),
        }
    }

    // 3. Anchors: the fixed list wins over discovery
    if !config.anchors.is_empty() {
        survey.submit_all_anchors();
    } else if simulated_ids.is_empty() {
        info!("Waiting for anchors to announce themselves");
    } else {
        for id in &simulated_ids {
            handle.submit_anchor(id);
        }
    }

    // Stop on Ctrl+C
    let stopper = handle.clone();
    tokio::spawn(async move {
        match signal::ctrl_c().await {
            Ok(()) => {
                info!("Received shutdown signal (Ctrl+C)");
                stopper.stop();
            }
            Err(err) => error!("Unable to listen for shutdown signal: {}", err),
        }
    });

    // A simulation ends when the survey settles; a live link keeps serving tag positions
    let exit_when_settled = config.simulate.is_some();
    let phase = survey.run(config.tick_interval(), exit_when_settled).await;

    survey.print_survey_ranges();
    info!("Survey stopped: {}", phase);

    if let SurveyPhase::Halted(reason) = phase {
        warn!("Survey did not complete");
        return Err(reason.into());
    }
    Ok(())
}

/// Initialize logging subsystem
fn init_logging(verbose: bool) {
    let subscriber = tracing_subscriber::fmt()
        .with_target(false)
        .with_thread_ids(false)
        .with_level(true);

    if verbose {
        subscriber
            .with_max_level(tracing::Level::DEBUG)
            .init();
        info!("Verbose logging enabled (DEBUG level)");
    } else {
        subscriber
            .with_max_level(tracing::Level::INFO)
            .init();
    }
}
