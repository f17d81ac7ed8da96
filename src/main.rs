use std::env;
use std::path::PathBuf;
use std::process::ExitCode;

use reactor_web::config::ServerConfig;
use reactor_web::Server;

fn main() -> ExitCode {
    let config_path = env::args().nth(1).map(PathBuf::from);
    let config = match ServerConfig::load(config_path.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("configuration error: {e}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = Server::new(config).run() {
        tracing::error!(error = %e, "server exited with a fatal error");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}
