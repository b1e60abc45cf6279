//! polgate diagnostic tool
//!
//! ```text
//! polgate check <action-id> <pid> <uid> [target-uid]
//!     Ask polkit whether process <pid> running as <uid> may perform <action-id>.
//!
//! polgate serve <socket-path> <action-id>
//!     Listen on a Unix socket; answer each client with the decision for
//!     <action-id>, using the client's kernel-reported credentials.
//! ```

use std::env;
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use futures_util::{pin_mut, StreamExt};
use tokio::io::AsyncWriteExt;
use tokio::net::UnixListener;

use polgate::tracing::{init_tracing, shutdown_tracing, OTLP_ENDPOINT_ENV};
use polgate::{with_unix_peer_creds, Action, Authorizer, AuthorizerConfig};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

const USAGE: &str = "usage:
  polgate check <action-id> <pid> <uid> [target-uid]
  polgate serve <socket-path> <action-id>";

#[tokio::main]
async fn main() -> ExitCode {
    let args: Vec<String> = env::args().skip(1).collect();

    if let Err(e) = init_tracing("polgate", env::var(OTLP_ENDPOINT_ENV).ok().as_deref()) {
        eprintln!("failed to initialize tracing: {}", e);
        return ExitCode::FAILURE;
    }

    let result = match args.first().map(String::as_str) {
        Some("check") => check(&args[1..]).await,
        Some("serve") => serve(&args[1..]).await,
        _ => {
            eprintln!("{}", USAGE);
            Ok(ExitCode::from(2))
        }
    };

    shutdown_tracing();

    match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn check(args: &[String]) -> Result<ExitCode, BoxError> {
    let (action_id, pid, uid, target_uid) = match args {
        [action, pid, uid] => (action, pid.parse::<i32>()?, uid.parse::<u32>()?, None),
        [action, pid, uid, target] => (
            action,
            pid.parse::<i32>()?,
            uid.parse::<u32>()?,
            Some(target.parse::<u32>()?),
        ),
        _ => {
            eprintln!("{}", USAGE);
            return Ok(ExitCode::from(2));
        }
    };

    let authorizer = Authorizer::with_polkit(AuthorizerConfig::default()).await?;
    let action = Action::owned(action_id.as_str());

    match authorizer.is_allowed(&action, pid, uid, target_uid).await {
        Ok(()) => {
            println!("allowed");
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            println!("{}", e);
            Ok(ExitCode::from(1))
        }
    }
}

async fn serve(args: &[String]) -> Result<ExitCode, BoxError> {
    let [socket_path, action_id] = args else {
        eprintln!("{}", USAGE);
        return Ok(ExitCode::from(2));
    };

    // Stale socket from a previous run
    if Path::new(socket_path).exists() {
        std::fs::remove_file(socket_path)?;
    }

    let authorizer = Arc::new(Authorizer::with_polkit(AuthorizerConfig::default()).await?);
    let action = Arc::new(Action::owned(action_id.as_str()));
    let listener = UnixListener::bind(socket_path)?;

    tracing::info!(socket = %socket_path, action = %action, "Listening");

    let incoming = with_unix_peer_creds(listener);
    pin_mut!(incoming);

    while let Some(conn) = incoming.next().await {
        let mut conn = match conn {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!(error = %e, "Accept failed");
                continue;
            }
        };

        let authorizer = Arc::clone(&authorizer);
        let action = Arc::clone(&action);

        tokio::spawn(async move {
            let peer = conn.peer_creds();
            let answer = match authorizer
                .is_allowed(&action, peer.pid(), peer.uid(), Some(peer.uid()))
                .await
            {
                Ok(()) => format!("allowed ({})\n", peer),
                Err(e) => format!("{} ({})\n", e, peer),
            };

            if let Err(e) = conn.write_all(answer.as_bytes()).await {
                tracing::warn!(peer = %peer, error = %e, "Failed to answer peer");
            }
            let _ = conn.shutdown().await;
        });
    }

    Ok(ExitCode::SUCCESS)
}
