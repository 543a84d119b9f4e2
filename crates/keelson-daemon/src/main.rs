mod features;

use features::{LoggerFeature, PidFileFeature, WorkerFeature};
use keelson_core::{install_signal_handler, ApplicationServer};
use std::process::ExitCode;

/// Credentials to drop to, from `KEELSOND_RUN_AS=uid:gid`. Only useful when
/// the daemon is started with elevated credentials.
fn run_as_ids(raw: &str) -> Option<(u32, u32)> {
    let (uid, gid) = raw.split_once(':')?;
    Some((uid.trim().parse().ok()?, gid.trim().parse().ok()?))
}

fn build_server() -> Result<ApplicationServer, keelson_core::ServerError> {
    let mut server = ApplicationServer::new();

    #[cfg(unix)]
    if let Some((uid, gid)) = std::env::var("KEELSOND_RUN_AS")
        .ok()
        .as_deref()
        .and_then(run_as_ids)
    {
        server = server.with_privileges(Box::new(keelson_core::UnixPrivileges::drop_to(uid, gid)));
    }

    server.add_feature(Box::new(LoggerFeature::new()))?;
    server.add_feature(Box::new(PidFileFeature::new()))?;
    server.add_feature(Box::new(WorkerFeature::new()))?;
    Ok(server)
}

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().skip(1).collect();

    let mut server = match build_server() {
        Ok(server) => server,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::FAILURE;
        }
    };

    install_signal_handler(&server.shutdown_signal());

    match server.run(&args) {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}
