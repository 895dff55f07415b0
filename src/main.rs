use std::path::Path;
use std::process;

use clap::{App, Arg};
use log::info;

use bobbin::config::Config;
use bobbin::server::Server;

fn main() {
    process::exit(run());
}

fn run() -> i32 {
    let matches = App::new("bobbin")
        .version(env!("CARGO_PKG_VERSION"))
        .about("A durable message-queue server speaking the memcache protocol")
        .arg(
            Arg::new("port")
                .short('p')
                .long("port")
                .takes_value(true)
                .default_value("22133")
                .help("port upon which to listen"),
        )
        .arg(
            Arg::new("data")
                .short('d')
                .long("data")
                .takes_value(true)
                .default_value("./data")
                .help("data directory"),
        )
        .arg(
            Arg::new("workers")
                .short('j')
                .long("workers")
                .takes_value(true)
                .default_value("1")
                .help("number of worker threads"),
        )
        .arg(Arg::new("debug").long("debug").help("debug (verbose) output"))
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .takes_value(true)
                .help("config file path (JSON, same keys as the flags)"),
        )
        .get_matches();

    let mut config = Config::default();
    if let Some(path) = matches.value_of("config") {
        match Config::load(Path::new(path)) {
            Ok(loaded) => config = loaded,
            Err(e) => {
                eprintln!("can't read config file: {e}");
                return 1;
            }
        }
    }

    // explicit flags override the config file
    if matches.occurrences_of("port") > 0 {
        match matches.value_of("port").unwrap_or_default().parse() {
            Ok(port) => config.port = port,
            Err(e) => {
                eprintln!("bad port: {e}");
                return 1;
            }
        }
    }
    if matches.occurrences_of("data") > 0 {
        config.data = matches.value_of("data").unwrap_or_default().into();
    }
    if matches.occurrences_of("workers") > 0 {
        match matches.value_of("workers").unwrap_or_default().parse() {
            Ok(workers) => config.workers = workers,
            Err(e) => {
                eprintln!("bad worker count: {e}");
                return 1;
            }
        }
    }
    if matches.is_present("debug") {
        config.debug = true;
    }

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(if config.debug {
        "debug"
    } else {
        "info"
    }))
    .init();

    info!("bobbin {}: queue server", env!("CARGO_PKG_VERSION"));
    info!("worker threads: {}", config.workers);
    info!("listening on port: {}", config.port);
    info!("data dir: {}", config.data.display());
    if config.debug {
        info!("debug logging is turned ON");
    }

    if !config.data.is_dir() {
        eprintln!("cannot find the data directory: {}", config.data.display());
        return 1;
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.workers.max(1))
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("can't start runtime: {e}");
            return 1;
        }
    };

    let result = runtime.block_on(async {
        let server = Server::bind(&config).await?;
        server.run(shutdown_signal()).await
    });

    match result {
        Ok(()) => {
            info!("shutting down");
            0
        }
        Err(e) => {
            eprintln!("{e}");
            1
        }
    }
}

async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut interrupt = signal(SignalKind::interrupt()).expect("failed to listen for SIGINT");
    let mut quit = signal(SignalKind::quit()).expect("failed to listen for SIGQUIT");
    let mut terminate = signal(SignalKind::terminate()).expect("failed to listen for SIGTERM");

    tokio::select! {
        _ = interrupt.recv() => {}
        _ = quit.recv() => {}
        _ = terminate.recv() => {}
    }
    info!("received signal, stopping server and finishing work");
}
