use std::process::ExitCode;

use persona_chat::{ChatSessionHandle, SessionDriver, notification_channel};
use persona_llm::create_provider;
use persona_term::app::run_terminal;
use persona_term::settings::{API_KEY_ENV, SettingsStore};

#[tokio::main]
async fn main() -> ExitCode {
    // stdout carries the transcript; logs go to stderr.
    tracing_subscriber::fmt().with_writer(std::io::stderr).init();

    let settings_store = SettingsStore::load();
    let settings = settings_store.settings();

    let Some(config) = settings.to_provider_config(std::env::var(API_KEY_ENV).ok()) else {
        eprintln!(
            "no API key configured; set {API_KEY_ENV} or add `api_key` to {:?}",
            settings_store.config_path()
        );
        return ExitCode::FAILURE;
    };

    let provider = match create_provider(config) {
        Ok(provider) => provider,
        Err(error) => {
            tracing::error!("failed to initialize provider adapter: {error}");
            return ExitCode::FAILURE;
        }
    };
    tracing::info!(
        provider = %provider.name(),
        model_id = %settings.model_name,
        "initialized provider from settings"
    );

    let (notifier, notifications) = notification_channel();
    let driver = SessionDriver::new(
        provider,
        settings.session_options(),
        settings.personality(),
        notifier,
    );
    let handle = ChatSessionHandle::spawn(driver);

    match run_terminal(handle, notifications, &settings_store).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            tracing::error!("terminal session failed: {error}");
            ExitCode::FAILURE
        }
    }
}
