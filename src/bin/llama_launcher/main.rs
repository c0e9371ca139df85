//! Desktop window: transcript, message box, model picker and format dropdown.

mod components;
mod dialogs;
mod state;

use std::sync::{Arc, Mutex};

use llama_launcher::{ChatSession, LauncherConfig};

/// Hands the session started in `main` to the window, which takes it once.
pub type SessionSlot = Arc<Mutex<Option<ChatSession>>>;

fn main() -> anyhow::Result<()> {
    let config = LauncherConfig::load()?;
    config.logging()?.init()?;
    tracing::info!(?config, "launching desktop window");
    // started here so start-up errors are reported before the window opens
    let session: SessionSlot = Arc::new(Mutex::new(Some(ChatSession::spawn(&config)?)));

    dioxus::LaunchBuilder::desktop()
        .with_cfg(
            dioxus::desktop::Config::new().with_window(
                dioxus::desktop::WindowBuilder::new()
                    .with_title("Llama Launcher")
                    .with_inner_size(dioxus::desktop::LogicalSize::new(760.0, 680.0)),
            ),
        )
        .with_context(config)
        .with_context(session)
        .launch(components::app);
    Ok(())
}
