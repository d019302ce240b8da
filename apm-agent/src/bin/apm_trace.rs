//! Runs a simulated request through the agent and prints the exported span
//! events as JSON lines on stdout.
//!
//! Configuration comes from `APM_*` variables (or `.env`); set
//! `APM_CONFIG_FILE` to load a TOML file instead.

use apm_agent::collectors::{ScheduledTaskCollector, TaskEvent, TaskLifecycle};
use apm_agent::{
    ApmAgent, ApmCollectorService, ApmConfig, ApmContext, ApmResult, Clock, Context,
    InMemoryAgent, JsonLinesSink, MeasureOptions, SystemClock,
};
use dotenv::dotenv;
use serde_json::json;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn load_config() -> ApmResult<ApmConfig> {
    match std::env::var("APM_CONFIG_FILE") {
        Ok(path) => {
            log::info!("Loading APM config from {}", path);
            ApmConfig::from_file(path)
        }
        Err(_) => ApmConfig::from_env(),
    }
}

fn pause(ms: u64) {
    thread::sleep(Duration::from_millis(ms));
}

fn main() -> ApmResult<()> {
    dotenv().ok();
    env_logger::init();

    let config = load_config()?;
    for (key, value) in config.summary() {
        log::debug!("[CONFIG] {} = {}", key, value);
    }

    let clock = Arc::new(SystemClock);
    let request_start = clock.now();

    let provider = Arc::new(InMemoryAgent::with_clock(clock.clone()));
    let sink = Arc::new(JsonLinesSink::new(std::io::stdout()));
    let ctx = Arc::new(ApmContext::with_clock(provider, clock, request_start));

    let agent = Arc::new(ApmAgent::new(&config, ctx, sink));
    let defaults = agent.register_default_collectors(&config);
    log::info!("Registered {} collectors", agent.registry().len());

    let service =
        ApmCollectorService::new(agent.clone(), defaults.timeline.clone(), &config, false);
    if service.is_agent_disabled() {
        log::warn!("APM agent is disabled, nothing to trace");
        return Ok(());
    }

    // Recorded before any transaction opens; exported with the outermost one
    service.start_measure("bootstrap", MeasureOptions::new().with_type("app.boot"));
    pause(5);
    service.stop_measure("bootstrap", Context::new())?;

    let mut request = Context::new();
    request.insert("method".to_string(), json!("GET"));
    request.insert("url".to_string(), json!("/reports"));
    let transaction = agent.start_transaction("GET /reports", request, Some(request_start))?;

    service.start_measure(
        "load-reports",
        MeasureOptions::new()
            .with_type("db.query")
            .with_action("SELECT")
            .with_label("Report SELECT"),
    );
    pause(12);
    if let Some(query_log) = &defaults.query_log {
        query_log.record_query("select * from reports where owner_id = ?", 8.0, "pgsql");
    }
    let mut params = Context::new();
    params.insert("rows".to_string(), json!(42));
    service.stop_measure("load-reports", params)?;

    // A task kicked off from the request becomes a nested transaction
    let mut lifecycle = TaskLifecycle::new();
    lifecycle.register(Arc::new(ScheduledTaskCollector::new(agent.clone(), &config)?));
    lifecycle.dispatch(TaskEvent::Starting, "reports:render");
    {
        let _render = defaults
            .timeline
            .start_guarded("render-pdf", MeasureOptions::new().with_type("template"));
        pause(7);
    }
    lifecycle.dispatch(TaskEvent::Finished, "reports:render");

    let err = std::io::Error::new(std::io::ErrorKind::TimedOut, "thumbnail service timed out");
    service.capture_error(&err, Context::new(), Some(&transaction));

    let mut meta = Context::new();
    meta.insert("result".to_string(), json!("HTTP 2xx"));
    agent.stop_transaction("GET /reports", meta)?;
    agent.send()?;

    log::info!("Trace complete");
    Ok(())
}
