//! topics console binary

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use topics_console::cli::Args;
use topics_console::config::ConfigLoader;
use topics_console::console::{render_hit, HIT_CONTEXT_RADIUS};
use topics_console::spawn::{spawn_script, SpawnMode};
use topics_console::{
    AgentBreakpointSink, AgentServer, BreakpointEvent, Console, MethodReturn, ServerOptions,
    Session, SessionDispatcher,
};
use topics_protocol::{Registry, WIRE_TABLE};
use topics_utils::{LogConfig, LogOutput, Result, TopicsError};

fn print_signals(registry: &Registry) {
    println!("{:<4} {:<32} direction", "id", "message");
    for (kind, direction) in WIRE_TABLE {
        println!("{:<4} {:<32} {:?}", registry.id_of(kind), kind.name(), direction);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse_args();

    if args.init_config {
        let path = args.config.clone().unwrap_or_else(topics_utils::config_file);
        if ConfigLoader::write_default(&path)? {
            println!("Wrote default configuration to {}", path.display());
        } else {
            println!("{} already exists", path.display());
        }
        return Ok(());
    }

    let mut config = ConfigLoader::load_and_validate(args.config.as_deref())?;
    args.apply(&mut config);
    ConfigLoader::validate(&config)?;

    let log_config = LogConfig {
        output: config.logging.output.parse::<LogOutput>()?,
        ..LogConfig::console()
    }
    .with_filter(config.logging.filter.clone());
    topics_utils::init_logging_with_config(log_config)?;

    let registry = Registry::standard()
        .map(Arc::new)
        .map_err(|e| TopicsError::ProtocolRegistration(e.to_string()))?;

    if args.print_signals {
        print_signals(&registry);
        return Ok(());
    }

    info!("topics console starting");

    let session = Arc::new(Session::new(config.session.history_limit));
    for root in &config.session.source_paths {
        match session.add_source_root(root) {
            Ok(n) => println!("Added {} to sources ({} files)", root.display(), n),
            Err(e) => warn!("Skipping source root: {}", e),
        }
    }

    {
        let session_ref = Arc::clone(&session);
        session.on_breakpoint_hit(Arc::new(move |event: &BreakpointEvent| {
            println!();
            println!("{}", render_hit(&session_ref, event, HIT_CONTEXT_RADIUS));
        }));
    }

    session.on_method_return(Arc::new(|ret: &MethodReturn| {
        println!();
        println!("{} = {}", ret.location, ret.value);
    }));

    if let Some(script) = &args.spawnjoin {
        print!("Started process to {}... ", script.display());
        match spawn_script(script, SpawnMode::Join).await {
            Ok(Some(status)) if !status.success() => println!("Completed ({}).", status),
            Ok(_) => println!("Completed."),
            Err(e) => {
                println!();
                println!("{}", e);
            }
        }
    }

    let options = ServerOptions {
        close_on_detach: config.server.close_on_detach,
        max_frame_size: config.server.max_frame_size,
    };
    let handler = Arc::new(SessionDispatcher::new(Arc::clone(&session)));
    let server = AgentServer::attach_session(
        &config.server.address(),
        options,
        registry,
        Arc::clone(&session),
        handler,
    )
    .await?;
    println!("Waiting for agent on {}", server.local_addr());

    if let Some(script) = &args.spawn {
        if let Err(e) = spawn_script(script, SpawnMode::Background).await {
            error!("{}", e);
            println!("{}", e);
        }
    }

    let link = Arc::new(server.clone());
    let sink = Arc::new(AgentBreakpointSink::new(link.clone()));
    let console = Console::new(
        Arc::clone(&session),
        link,
        sink,
        config.session.context_radius,
    );

    let (done_tx, done_rx) = tokio::sync::oneshot::channel();
    std::thread::Builder::new()
        .name("console".into())
        .spawn(move || {
            let stdin = std::io::stdin();
            let result = console.run(stdin.lock(), std::io::stdout());
            let _ = done_tx.send(result);
        })?;

    tokio::select! {
        result = done_rx => {
            match result {
                Ok(Err(e)) => error!("Console input failed: {}", e),
                Err(_) => error!("Console thread ended unexpectedly"),
                Ok(Ok(())) => {}
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted");
        }
    }

    let timeout = Duration::from_millis(config.server.shutdown_timeout_ms);
    server.shutdown(timeout).await;
    session.shutdown();

    info!("topics console stopped");
    Ok(())
}
