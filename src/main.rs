#![forbid(unsafe_code)]
#![warn(rust_2018_idioms)]

#[macro_use]
extern crate rocket;
#[macro_use]
extern crate log;

use std::{process::exit, thread, time::Duration};

#[macro_use]
mod error;
mod util;
mod config;
#[macro_use]
mod db;
mod api;
mod auth;
mod login;
mod message;
mod profile;
mod profiles;
mod social;

pub use config::CONFIG;
pub use error::Error;

use crate::db::DbPool;

#[rocket::main]
async fn main() -> Result<(), Error> {
    parse_args();
    launch_info();

    init_logging();

    // Loading the config panics with a helpful message when something
    // required is missing, so touch it before anything else runs.
    let _ = CONFIG.database_url();

    let pool = create_db_pool();
    schedule_jobs(pool.clone());

    launch_rocket(pool).await
}

const HELP: &str = "\
Usage: clanhall

The social service of the game platform: friend connections, player groups,
pending requests, external credentials and unique names.

Options:
    -h, --help      Prints help information
    -v, --version   Prints the app version
";

fn parse_args() {
    let mut pargs = pico_args::Arguments::from_env();

    if pargs.contains(["-h", "--help"]) {
        println!("{HELP}");
        exit(0);
    } else if pargs.contains(["-v", "--version"]) {
        println!("clanhall {}", env!("CARGO_PKG_VERSION"));
        exit(0);
    }
}

fn launch_info() {
    println!("Starting clanhall {}", env!("CARGO_PKG_VERSION"));
}

fn init_logging() {
    let level = match CONFIG.log_level().to_lowercase().as_str() {
        "trace" => log::LevelFilter::Trace,
        "debug" => log::LevelFilter::Debug,
        "warn" => log::LevelFilter::Warn,
        "error" => log::LevelFilter::Error,
        _ => log::LevelFilter::Info,
    };

    let mut logger = fern::Dispatch::new()
        .level(level)
        // hyper and reqwest connection chatter drowns everything at debug
        .level_for("hyper", log::LevelFilter::Warn)
        .level_for("reqwest", log::LevelFilter::Warn)
        .level_for("rocket::server", log::LevelFilter::Warn)
        .format(|out, message, record| {
            out.finish(format_args!(
                "[{}][{}][{}] {}",
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
                record.target(),
                record.level(),
                message
            ))
        })
        .chain(std::io::stdout());

    if let Some(log_file) = CONFIG.log_file() {
        match fern::log_file(&log_file) {
            Ok(file) => logger = logger.chain(file),
            Err(e) => {
                println!("Unable to open log file '{log_file}': {e}");
                exit(1);
            }
        }
    }

    if let Err(e) = logger.apply() {
        println!("Unable to initialize the logger: {e}");
        exit(1);
    }
}

fn create_db_pool() -> DbPool {
    match DbPool::from_config() {
        Ok(pool) => pool,
        Err(e) => {
            error!("Error creating database pool: {e}");
            exit(1);
        }
    }
}

fn schedule_jobs(pool: DbPool) {
    if CONFIG.job_poll_interval_ms() == 0 {
        info!("Job scheduler disabled.");
        return;
    }

    let runtime = tokio::runtime::Runtime::new().unwrap();

    thread::Builder::new()
        .name("job-scheduler".to_string())
        .spawn(move || {
            use job_scheduler_ng::{Job, JobScheduler};
            let _runtime_guard = runtime.enter();

            let mut sched = JobScheduler::new();

            // Purge expired pending requests (invitations, join requests,
            // friendship requests) on a regular schedule.
            if !CONFIG.request_purge_schedule().is_empty() {
                sched.add(Job::new(CONFIG.request_purge_schedule().parse().unwrap(), || {
                    runtime.spawn(api::purge_pending_requests(pool.clone()));
                }));
            }

            loop {
                sched.tick();
                runtime.block_on(tokio::time::sleep(Duration::from_millis(CONFIG.job_poll_interval_ms())));
            }
        })
        .expect("Error spawning job scheduler thread");
}

async fn launch_rocket(pool: DbPool) -> Result<(), Error> {
    let instance = rocket::build()
        .mount("/", api::routes())
        .manage(pool)
        .manage(social::SocialRegistry::build())
        .ignite()
        .await
        .map_err(|e| Error::internal(format!("Error igniting rocket: {e}")))?;

    info!("Launching clanhall on port {}", instance.config().port);

    instance.launch().await.map_err(|e| Error::internal(format!("Error launching rocket: {e}")))?;

    info!("Clanhall process exited!");
    Ok(())
}
