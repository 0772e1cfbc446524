use clap::{App, Arg};
use colored::*;
use ebusgw::config::{Config, JsonConfigStore};
use ebusgw::gateway::run_gateway;
use ebusgw::mqtt::run_mqtt;
use ebusgw::system::SystemContext;
use ebusgw::transport::{open_transport, SystemClock};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let matches = App::new("ebusgw")
        .version(env!("CARGO_PKG_VERSION"))
        .about("eBUS bridge with an ebusd compatible TCP gateway and MQTT feed")
        .arg(
            Arg::with_name("config")
                .short("c")
                .long("config")
                .value_name("FILE")
                .help("JSON configuration file")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("transport")
                .short("t")
                .long("transport")
                .value_name("SPEC")
                .help("Bus line: tcp:host:port or a device path")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("port")
                .short("p")
                .long("port")
                .value_name("PORT")
                .help("Gateway TCP port")
                .takes_value(true)
                .validator(|v| match v.parse::<u16>() {
                    Ok(_) => Ok(()),
                    Err(_) => Err("Port must be a number".into()),
                }),
        )
        .arg(
            Arg::with_name("credentials")
                .long("credentials")
                .value_name("FILE")
                .help("JSON file whose mqtt section (url, username, password) overrides the config")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("no-gateway")
                .long("no-gateway")
                .help("Do not start the ebusd gateway"),
        )
        .arg(
            Arg::with_name("verbose")
                .short("v")
                .long("verbose")
                .help("Enable debug logging"),
        )
        .get_matches();

    let default_level = if matches.is_present("verbose") { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    println!("{}", "🔥 eBUS Gateway".bright_blue().bold());
    println!("================");

    let mut config = match matches.value_of("config") {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    if let Some(spec) = matches.value_of("transport") {
        config.bus.transport = Some(spec.to_string());
    }
    if let Some(port) = matches.value_of("port") {
        config.gateway.port = port.parse()?;
    }
    if matches.is_present("no-gateway") {
        config.gateway.enabled = false;
    }
    if let Some(path) = matches.value_of("credentials") {
        let store = JsonConfigStore::load(Path::new(path))?;
        config.mqtt.apply_store(&store);
    }
    config.validate()?;

    let Some(spec) = config.bus.transport.clone() else {
        println!("{}", "No bus transport configured. Use --transport or bus.transport.".yellow());
        return Ok(());
    };

    let context = SystemContext::new(config);
    let transport = open_transport(&spec)?;
    let mut engine = context.build_engine(transport, SystemClock::new())?;
    info!("bus line {}", spec);

    // engine thread reports its exit through this channel
    let (done_tx, mut done_rx) = oneshot::channel();
    let stop = Arc::clone(&context.stop);
    let engine_thread = std::thread::Builder::new()
        .name("ebus".to_string())
        .spawn(move || {
            let result = engine.run(&stop);
            let stats = engine.stats();
            let _ = done_tx.send((result, stats));
        })?;

    let gateway = if context.config.gateway.enabled {
        let gateway_config = context.config.gateway.clone();
        let sender = context.sender();
        let events = context.events.subscribe();
        Some(tokio::spawn(async move {
            if let Err(e) = run_gateway(gateway_config, sender, events).await {
                error!("gateway error: {}", e);
            }
        }))
    } else {
        info!("gateway disabled");
        None
    };

    let mqtt_config = context.config.mqtt.clone();
    let master = context.config.bus.master_address;
    let sender = context.sender();
    let events = context.events.subscribe();
    let mqtt = tokio::spawn(async move {
        if let Err(e) = run_mqtt(mqtt_config, master, sender, events).await {
            error!("mqtt error: {}", e);
        }
    });

    let finished = tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("shutting down");
            context.request_stop();
            (&mut done_rx).await.ok()
        }
        done = &mut done_rx => done.ok(),
    };
    let (result, stats) = match finished {
        Some((result, stats)) => (result, Some(stats)),
        None => (Ok(()), None),
    };

    if let Some(gateway) = gateway {
        gateway.abort();
    }
    mqtt.abort();
    if engine_thread.join().is_err() {
        warn!("engine thread panicked");
    }
    if let Some(stats) = stats {
        info!("bus stats: {}", serde_json::to_string(&stats)?);
    }

    match result {
        Ok(()) => {
            println!("{}", "eBUS Gateway stopped".green());
            Ok(())
        }
        Err(e) => {
            println!("{} {}", "❌".red(), format!("Bus stopped: {e}").bright_red());
            Err(e.into())
        }
    }
}
