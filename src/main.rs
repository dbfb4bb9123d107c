use log::{error, info};

use scinsynth::config::ServerOptions;
use scinsynth::server::{self, ServerError};
use scinsynth::VERSION;

fn main() {
    let options = match ServerOptions::parse(std::env::args().skip(1)) {
        Ok(options) => options,
        Err(err) => {
            eprintln!("{}", err);
            std::process::exit(1);
        }
    };

    env_logger::Builder::from_default_env()
        .filter_level(options.level_filter())
        .init();
    info!("{} starting", VERSION);

    match server::run(options) {
        Ok(()) => {
            info!("clean exit");
        }
        Err(err @ ServerError::Init(_)) => {
            error!("{}", err);
            std::process::exit(1);
        }
        Err(err @ ServerError::Runtime(_)) => {
            error!("{}", err);
            std::process::exit(2);
        }
    }
}
