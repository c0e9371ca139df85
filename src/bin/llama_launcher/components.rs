use dioxus::{
    desktop::{
        tao::event::{Event, WindowEvent},
        use_wry_event_handler,
    },
    prelude::*,
};
use llama_launcher::{LauncherConfig, QuantFormat, Role};

use crate::{state::LauncherState, SessionSlot};

pub fn app() -> Element {
    let config = use_context::<LauncherConfig>();
    let slot = use_context::<SessionSlot>();
    let state = use_hook(move || {
        let session = slot.lock().unwrap_or_else(|e| e.into_inner()).take()?;
        Some(provide_context(LauncherState::new(
            session,
            config.default_quant_format,
        )))
    });

    use_future(move || async move {
        let Some(mut state) = state else {
            return;
        };
        let events = state.session.write().take_events();
        let Some(mut events) = events else {
            return;
        };
        while let Some(event) = events.recv().await {
            state.on_event(event);
        }
    });

    // the window closing ends the process; stop llama-server first
    use_wry_event_handler(move |event, _| {
        if let (
            Some(mut state),
            Event::WindowEvent {
                event: WindowEvent::CloseRequested,
                ..
            },
        ) = (state, event)
        {
            state.session.write().shutdown();
        }
    });

    if state.is_none() {
        return rsx! {
            p { "The chat session is already attached to another window." }
        };
    }
    rsx! {
        div { id: "launcher", style: "display: flex; flex-direction: column; height: 100vh; font-family: sans-serif; margin: 0 12px;",
            Header {}
            Transcript {}
            Query {}
        }
    }
}

#[component]
fn Header() -> Element {
    let mut state = use_context::<LauncherState>();
    let idle = state.is_idle();
    let selected = state
        .session
        .read()
        .flow()
        .selected()
        .map(|model| model.to_string())
        .unwrap_or_else(|| "No model selected".to_string());

    rsx! {
        div { style: "display: flex; gap: 8px; align-items: center; padding: 8px 0;",
            button {
                disabled: !idle,
                onclick: move |_| async move {
                    state.pick_model().await;
                },
                "Load model"
            }
            span { style: "flex: 1; overflow: hidden; text-overflow: ellipsis; white-space: nowrap;", "{selected}" }
            label { "Quantize to " }
            select {
                disabled: !idle,
                onchange: move |e| {
                    if let Ok(format) = e.value().parse::<QuantFormat>() {
                        state.format.set(format);
                    }
                },
                for format in QuantFormat::RECOMMENDED.iter().chain(
                    QuantFormat::ALL.iter().filter(|f| !QuantFormat::RECOMMENDED.contains(*f)),
                ) {
                    option {
                        key: "{format.code()}",
                        value: "{format.code()}",
                        selected: *format == (state.format)(),
                        "{format.label()}"
                    }
                }
            }
        }
    }
}

#[component]
fn Transcript() -> Element {
    let state = use_context::<LauncherState>();
    let session = state.session.read();
    let messages: Vec<(&'static str, String)> = session
        .transcript()
        .messages()
        .iter()
        .map(|m| (speaker(m.role), m.text.clone()))
        .collect();
    let pending = session
        .state()
        .is_working()
        .then(|| session.flow().pending().map(str::to_string))
        .flatten();
    drop(session);

    rsx! {
        div { style: "flex: 1; overflow-y: auto; border: 1px solid #ccc; border-radius: 6px; padding: 8px;",
            for (i, (who, text)) in messages.into_iter().enumerate() {
                p { key: "{i}", style: "white-space: pre-wrap;",
                    b { "{who}" }
                    "{text}"
                }
            }
            if let Some(text) = pending {
                p { style: "white-space: pre-wrap; opacity: 0.6;",
                    b { "{speaker(Role::User)}" }
                    "{text}"
                }
                p { style: "opacity: 0.6;", "…" }
            }
        }
        p { style: "font-size: 0.85em; color: #555; margin: 4px 0;", "{state.status}" }
    }
}

fn speaker(role: Role) -> &'static str {
    match role {
        Role::User => "You: ",
        Role::Assistant => "Model: ",
    }
}

#[component]
fn Query() -> Element {
    let mut state = use_context::<LauncherState>();
    let idle = state.is_idle();

    rsx! {
        div { style: "display: flex; gap: 8px; padding: 8px 0 12px 0;",
            textarea {
                style: "flex: 1; min-height: 3em;",
                placeholder: "Type a message and press Enter",
                value: "{state.draft}",
                autofocus: true,
                oninput: move |e| state.draft.set(e.value()),
                onkeydown: move |e| {
                    if e.modifiers().shift() {
                        return;
                    }
                    if e.key() == Key::Enter {
                        e.prevent_default();
                        spawn(async move {
                            state.submit().await;
                        });
                    }
                },
            }
            button {
                disabled: !idle,
                onclick: move |_| async move {
                    state.submit().await;
                },
                "Send"
            }
        }
    }
}
