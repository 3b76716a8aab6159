use std::path::PathBuf;
use std::sync::Arc;

use animctl::auth::LocalAuthenticator;
use animctl::auth::permissions::Action;
use animctl::config::{Args, Command, SettingsCommand, UsersCommand};
use animctl::generation::{GenerationRequest, GenerationWorkflow, Progress, SourceImage, VeoClient};
use animctl::models::settings::{ApiKeysPatch, ProviderKeyPatch};
use animctl::models::{AccountStatus, Configuration, ConfigurationPatch, IdentityUpdate};
use animctl::store::FileStore;
use animctl::{Config, Error, SessionService, telemetry};
use clap::Parser;
use serde::Serialize;
use serde_json::json;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider before anything else that might build a TLS client
    rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    let args = Args::parse();
    let config = Config::load(&args)?;

    if args.validate {
        println!("Configuration is valid.");
        return Ok(());
    }

    telemetry::init_telemetry()?;
    tracing::debug!("{:?}", args);

    let store = FileStore::open(&config.store.data_dir).await?;
    let authenticator = LocalAuthenticator::new(&config.auth.local);
    let provider = VeoClient::new(config.generation.base_url.clone(), config.generation.model.clone())?;
    let workflow = GenerationWorkflow::from_config(&config.generation, Arc::new(provider), None);
    let session = SessionService::from_config(&config, Arc::new(store), Arc::new(authenticator), Some(workflow));

    session.initialize().await;
    let result = run(&session, args.command.unwrap_or(Command::Whoami)).await;
    session.shutdown().await;
    result
}

async fn run(session: &SessionService, command: Command) -> anyhow::Result<()> {
    if session.current_identity().await.is_none() && session.sign_in_interactively().await.map_err(user_facing)?.is_none() {
        anyhow::bail!("Sign-in was cancelled");
    }

    match command {
        Command::Whoami => {
            let identity = session.current_identity().await;
            print_json(&json!({
                "identity": identity,
                "navigation": session.navigation().await,
            }))
        }
        Command::Users(UsersCommand::List) => print_json(&session.roster().await),
        Command::Users(UsersCommand::SetCredits { id, credits }) => {
            let update = IdentityUpdate {
                credits: Some(credits),
                ..Default::default()
            };
            print_json(&session.update_identity(&id, update).await.map_err(user_facing)?)
        }
        Command::Users(UsersCommand::Suspend { id }) => set_status(session, &id, AccountStatus::Suspended).await,
        Command::Users(UsersCommand::Activate { id }) => set_status(session, &id, AccountStatus::Active).await,
        Command::Stats => print_json(&session.stats().await),
        Command::Analytics => print_json(&session.analytics().await),
        Command::Transactions => print_json(&session.transactions().await),
        Command::Settings(SettingsCommand::Show) => {
            if !session.can(Action::ViewAdminSettings).await {
                anyhow::bail!("You do not have permission to view admin settings");
            }
            print_json(&redacted(session.configuration().await))
        }
        Command::Settings(SettingsCommand::SetVeoKey { key, disable }) => {
            let patch = ConfigurationPatch {
                api_keys: Some(ApiKeysPatch {
                    veo: Some(ProviderKeyPatch {
                        key: Some(key),
                        enabled: Some(!disable),
                    }),
                    ..Default::default()
                }),
                ..Default::default()
            };
            let configuration = session.update_configuration(patch).await.map_err(user_facing)?;
            print_json(&redacted(configuration))
        }
        Command::Settings(SettingsCommand::SetAppName { name }) => {
            let patch = ConfigurationPatch {
                app_name: Some(name),
                ..Default::default()
            };
            let configuration = session.update_configuration(patch).await.map_err(user_facing)?;
            print_json(&redacted(configuration))
        }
        Command::Generate {
            image,
            prompt,
            aspect_ratio,
            resolution,
            output,
        } => {
            let request = GenerationRequest {
                image: SourceImage::from_path(&image)
                    .await
                    .map_err(|e| user_facing(e.into()))?,
                prompt,
                aspect_ratio,
                resolution,
            };
            generate(session, request, output).await
        }
    }
}

async fn set_status(session: &SessionService, id: &str, status: AccountStatus) -> anyhow::Result<()> {
    let update = IdentityUpdate {
        status: Some(status),
        ..Default::default()
    };
    print_json(&session.update_identity(id, update).await.map_err(user_facing)?)
}

async fn generate(session: &SessionService, request: GenerationRequest, output: Option<PathBuf>) -> anyhow::Result<()> {
    let (progress, mut events) = mpsc::unbounded_channel::<Progress>();
    let printer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            eprintln!("{}", event.message);
        }
    });

    let cancel = CancellationToken::new();
    let interrupt = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Received Ctrl+C, cancelling generation");
                cancel.cancel();
            }
        })
    };

    let result = session.generate_video(&request, &progress, &cancel).await;
    interrupt.abort();
    drop(progress);
    let _ = printer.await;

    let video = result.map_err(user_facing)?;
    let path = output.unwrap_or_else(|| PathBuf::from(video.file_name()));
    video.save_to(&path).await?;
    println!("{}", path.display());
    Ok(())
}

/// Replace the error chain with the message meant for the person at the terminal.
fn user_facing(error: Error) -> anyhow::Error {
    tracing::debug!(error = ?error, "Command failed");
    anyhow::anyhow!(error.user_message())
}

fn redacted(mut configuration: Configuration) -> Configuration {
    for provider in [&mut configuration.api_keys.google_gen_ai, &mut configuration.api_keys.veo] {
        if !provider.key.is_empty() {
            provider.key = "********".to_string();
        }
    }
    configuration
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
