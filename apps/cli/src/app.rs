//! Command dispatch.

use std::io::{IsTerminal, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, anyhow, bail};
use maap_s3_gateway::{
    AuthClient, Authenticator, CredentialStore, GatewayClient, GatewayConfig, GatewayError,
    HttpPartUploader, TokenSource,
};
use maap_s3_transfer::{FileSessionStore, SessionStore, UploadSession};
use maap_s3_upload::{UploadCoordinator, UploadError, UploadEvent, UploadOutcome};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::cli::Command;
use crate::config::Config;

/// Everything needed to talk to the gateway.
struct Gateway {
    settings: GatewayConfig,
    credentials: CredentialStore,
    auth: Arc<Authenticator>,
    client: GatewayClient,
    parts: HttpPartUploader,
}

impl Gateway {
    fn connect(config: &Config) -> anyhow::Result<Self> {
        let settings = config.gateway()?;
        let credentials_path = config.credentials_path()?;

        let auth = Arc::new(Authenticator::new(
            AuthClient::new(&settings)?,
            CredentialStore::new(&credentials_path),
            settings.token_lifetime,
        ));
        let tokens: Arc<dyn TokenSource> = auth.clone();
        let client = GatewayClient::new(&settings, tokens)?;
        let parts = HttpPartUploader::new(settings.part_timeout)?;

        debug!(gateway = %settings.gateway_url, bucket = %settings.bucket, "gateway configured");
        Ok(Self {
            settings,
            credentials: CredentialStore::new(credentials_path),
            auth,
            client,
            parts,
        })
    }

    /// Prompts for credentials on a terminal if none are stored.
    async fn ensure_logged_in(&self) -> anyhow::Result<()> {
        if self.credentials.load()?.is_some() {
            return Ok(());
        }
        if !std::io::stdin().is_terminal() {
            return Err(GatewayError::NotLoggedIn.into());
        }
        eprintln!("No stored credentials for {}.", self.settings.token_url);
        let (email, password) = prompt_credentials()?;
        self.auth.login(&email, &password).await?;
        Ok(())
    }
}

pub async fn run(
    command: Command,
    config: Config,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    match command {
        Command::Upload {
            source,
            destination,
        } => {
            let source = std::fs::canonicalize(&source)
                .with_context(|| format!("cannot read {}", source.display()))?;
            upload(&config, cancel, UploadTarget::Fresh(source, destination)).await
        }
        Command::Resume {
            source: Some(source),
            destination: Some(destination),
        } => {
            let source = session_source(&source);
            upload(&config, cancel, UploadTarget::Resume(source, destination)).await
        }
        Command::Resume { .. } => upload(&config, cancel, UploadTarget::Latest).await,
        Command::Abort {
            source,
            destination,
        } => {
            let gateway = Gateway::connect(&config)?;
            gateway.ensure_logged_in().await?;
            let store = FileSessionStore::new(config.sessions_dir()?);
            let coordinator =
                UploadCoordinator::new(&gateway.client, &gateway.parts, &gateway.client, &store);
            let upload_id = coordinator
                .abort(&session_source(&source), &destination)
                .await?;
            println!("Aborted upload {upload_id} to {destination}");
            Ok(())
        }
        Command::Forget {
            source,
            destination,
        } => {
            let gateway = Gateway::connect(&config)?;
            let store = FileSessionStore::new(config.sessions_dir()?);
            let coordinator =
                UploadCoordinator::new(&gateway.client, &gateway.parts, &gateway.client, &store);
            if coordinator.discard(&session_source(&source), &destination)? {
                println!("Forgot upload of {} to {destination}", source.display());
            } else {
                println!("No interrupted upload of {} to {destination}", source.display());
            }
            Ok(())
        }
        Command::Sessions => {
            let store = FileSessionStore::new(config.sessions_dir()?);
            let sessions = store.list()?;
            if sessions.is_empty() {
                println!("No interrupted uploads");
            }
            for session in &sessions {
                println!("{}", describe_session(session));
            }
            Ok(())
        }
        Command::Delete { destination } => {
            let gateway = Gateway::connect(&config)?;
            gateway.ensure_logged_in().await?;
            gateway.client.delete_object(&destination).await?;
            println!("Deleted {destination}");
            Ok(())
        }
        Command::Download {
            destination,
            local_name,
        } => {
            let gateway = Gateway::connect(&config)?;
            gateway.ensure_logged_in().await?;
            let bytes = gateway
                .client
                .download_object(&destination, &local_name)
                .await?;
            println!(
                "Downloaded {destination} to {} ({bytes} bytes)",
                local_name.display()
            );
            Ok(())
        }
        Command::List { path } => {
            let gateway = Gateway::connect(&config)?;
            gateway.ensure_logged_in().await?;
            let body = gateway.client.list_objects(&path).await?;
            if body.trim().is_empty() {
                println!("No data found");
            } else {
                println!("{body}");
            }
            Ok(())
        }
        Command::Login { email, password } => {
            let gateway = Gateway::connect(&config)?;
            gateway.auth.login(&email, &password).await?;
            println!("Logged in as {email}");
            Ok(())
        }
        Command::Refresh => {
            let gateway = Gateway::connect(&config)?;
            let (email, password) = prompt_credentials()?;
            gateway.auth.login(&email, &password).await?;
            println!("Credentials updated for {email}");
            Ok(())
        }
        Command::Token { email, password } => {
            let settings = config.gateway()?;
            let token = AuthClient::new(&settings)?
                .exchange(&email, &password)
                .await?;
            println!("{token}");
            Ok(())
        }
    }
}

enum UploadTarget {
    Fresh(PathBuf, String),
    Resume(PathBuf, String),
    Latest,
}

async fn upload(
    config: &Config,
    cancel: CancellationToken,
    target: UploadTarget,
) -> anyhow::Result<()> {
    let gateway = Gateway::connect(config)?;
    gateway.ensure_logged_in().await?;
    let store = FileSessionStore::new(config.sessions_dir()?);

    let (events_tx, events_rx) = mpsc::channel(64);
    let progress = tokio::spawn(report_progress(events_rx));

    let result = {
        let coordinator =
            UploadCoordinator::new(&gateway.client, &gateway.parts, &gateway.client, &store)
                .with_planner(config.planner())
                .with_url_batch_size(config.url_batch_size)
                .with_cancel(cancel)
                .with_events(events_tx);

        match &target {
            UploadTarget::Fresh(source, destination) => {
                coordinator.upload(source, destination).await
            }
            UploadTarget::Resume(source, destination) => {
                coordinator.resume(source, destination).await
            }
            UploadTarget::Latest => coordinator.resume_latest().await,
        }
    };
    let _ = progress.await;

    let outcome = match result {
        Ok(outcome) => outcome,
        Err(err) => return Err(upload_failure(err, checkpoint_state(&store, &target))),
    };
    println!("{}", describe_outcome(&outcome));
    Ok(())
}

async fn report_progress(mut events_rx: mpsc::Receiver<UploadEvent>) {
    while let Some(event) = events_rx.recv().await {
        match event {
            UploadEvent::State(state) => debug!(%state, "upload state"),
            UploadEvent::PartUploaded {
                part_number,
                part_count,
                bytes_done,
                total_bytes,
            } => {
                info!(
                    part = part_number,
                    parts = part_count,
                    percent = percent(bytes_done, total_bytes),
                    "uploading"
                );
            }
            UploadEvent::Completed { destination } => debug!(%destination, "upload finished"),
            UploadEvent::Failed { .. } => {}
        }
    }
}

fn percent(done: u64, total: u64) -> u64 {
    if total == 0 {
        return 100;
    }
    done.saturating_mul(100) / total
}

/// What the store holds for an upload after a failed run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Checkpoint {
    Saved,
    Absent,
    Unreadable,
}

fn checkpoint_state(store: &dyn SessionStore, target: &UploadTarget) -> Checkpoint {
    let loaded = match target {
        UploadTarget::Fresh(source, destination) | UploadTarget::Resume(source, destination) => {
            store.load(source, destination).map(|s| s.is_some())
        }
        // A failed resume leaves the session it picked in place.
        UploadTarget::Latest => store.list().map(|s| !s.is_empty()),
    };
    match loaded {
        Ok(true) => Checkpoint::Saved,
        Ok(false) => Checkpoint::Absent,
        Err(e) => {
            debug!(error = %e, "checkpoint unreadable after failed upload");
            Checkpoint::Unreadable
        }
    }
}

/// Adds the operator's next step to an upload error.
fn upload_failure(err: UploadError, checkpoint: Checkpoint) -> anyhow::Error {
    if matches!(err, UploadError::StaleSession { .. }) {
        return anyhow!(
            "{err}\nRun `maap-s3 abort <source> <destination>` to discard the old upload, \
             then upload again."
        );
    }
    if checkpoint == Checkpoint::Unreadable {
        return anyhow!(
            "{err}\nThe saved progress cannot be read. Run `maap-s3 forget <source> \
             <destination>`, then upload again."
        );
    }
    let saved = checkpoint == Checkpoint::Saved;
    if matches!(err, UploadError::Cancelled) {
        if saved {
            return anyhow!(
                "upload interrupted; progress was saved. Run `maap-s3 resume` to continue."
            );
        }
        return anyhow!("upload interrupted before any progress was saved");
    }
    if err.is_resumable() {
        if saved {
            return anyhow!("{err}\nProgress was saved. Run `maap-s3 resume` to continue.");
        }
        return anyhow!("{err}\nNo progress was saved. Run `maap-s3 upload` again.");
    }
    err.into()
}

fn describe_outcome(outcome: &UploadOutcome) -> String {
    match outcome {
        UploadOutcome::SingleShot { bytes } => format!("Uploaded {bytes} bytes"),
        UploadOutcome::Multipart {
            upload_id,
            part_count,
            resumed_parts: 0,
            bytes,
        } => format!("Uploaded {bytes} bytes in {part_count} parts (upload {upload_id})"),
        UploadOutcome::Multipart {
            upload_id,
            part_count,
            resumed_parts,
            bytes,
        } => format!(
            "Uploaded {bytes} bytes in {part_count} parts, {resumed_parts} from an earlier run \
             (upload {upload_id})"
        ),
    }
}

fn describe_session(session: &UploadSession) -> String {
    format!(
        "{}  {}/{} parts  {}  updated {}",
        session.destination_key(),
        session.completed_parts().len(),
        session.part_count(),
        session.source_path().display(),
        session.updated_at().format("%Y-%m-%d %H:%M:%S UTC"),
    )
}

/// Path under which a source's checkpoint was recorded.
///
/// Uploads record the canonical path; fall back to the given path if
/// the file no longer exists.
fn session_source(path: &Path) -> PathBuf {
    std::fs::canonicalize(path)
        .or_else(|_| std::path::absolute(path))
        .unwrap_or_else(|_| path.to_path_buf())
}

fn prompt_credentials() -> anyhow::Result<(String, String)> {
    let email = prompt("Email: ")?;
    let password = prompt("Password: ")?;
    if email.is_empty() || password.is_empty() {
        bail!("email and password are required");
    }
    Ok((email, password))
}

fn prompt(label: &str) -> anyhow::Result<String> {
    eprint!("{label}");
    std::io::stderr().flush()?;
    let mut line = String::new();
    std::io::stdin().read_line(&mut line)?;
    Ok(line.trim().to_string())
}
