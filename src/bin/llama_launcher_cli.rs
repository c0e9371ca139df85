//! llama_launcher CLI – the chat window, in a terminal
//! ===================================================
//!
//! ```text
//! $ llama_launcher_cli -m ./models/mistral-7b-instruct.fp16.gguf
//! $ llama_launcher_cli -m ./models/model.fp16.gguf --quantize Q3_K_S
//! $ llama_launcher_cli --config ./launcher.toml --no-quantize
//! ```
//!
//! Inside the session: type a message and press Enter, `/load <path>` picks
//! another model, `/quit` leaves.

// cargo run --bin llama_launcher_cli -- -m ./model.Q4_K_M.gguf

use std::{
    io::{self, BufRead, Write},
    path::PathBuf,
};

use anyhow::Context;
use clap::Parser;
use colorful::Colorful;
use llama_launcher::*;

#[derive(Debug, Parser)]
#[command(name = "llama_launcher_cli", version)]
struct Cli {
    /// Model to select on start-up (.gguf or .ggml)
    #[arg(long, short = 'm', value_name = "PATH")]
    model: Option<PathBuf>,

    /// Config file instead of the platform default
    #[arg(long, short = 'c', value_name = "PATH")]
    config: Option<PathBuf>,

    /// Quantize FP16 models to this format without asking
    #[arg(long, value_name = "FORMAT", conflicts_with = "no_quantize")]
    quantize: Option<QuantFormat>,

    /// Load FP16 models as they are without asking
    #[arg(long)]
    no_quantize: bool,

    /// Tokens per reply (at most 256)
    #[arg(long)]
    max_tokens: Option<u32>,

    #[arg(long)]
    temperature: Option<f32>,

    #[arg(long, value_name = "LEVEL")]
    log_level: Option<String>,
}

enum QuantizeChoice {
    Quantize(QuantFormat),
    AsIs,
    Cancel,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => LauncherConfig::load_path(path)?,
        None => LauncherConfig::load()?,
    };
    if let Some(max_tokens) = cli.max_tokens {
        config.max_tokens = max_tokens;
    }
    if let Some(temperature) = cli.temperature {
        config.temperature = temperature;
    }
    if let Some(level) = &cli.log_level {
        config.log_level = level.clone();
    }
    config.validate()?;
    config.logging()?.init()?;

    let mut session = ChatSession::spawn(&config)?;
    let mut events = session
        .take_events()
        .context("chat session has no event stream")?;
    let stdin = io::stdin();
    let mut input = stdin.lock();

    if let Some(path) = &cli.model {
        load(&mut session, path.clone());
    }
    println!("Type a message, /load <path> to pick a model, /quit to leave.");

    loop {
        let Some(line) = prompt(&mut input, "> ")? else {
            break;
        };
        match line.trim() {
            "/quit" | "/exit" => break,
            "/load" => eprintln!("usage: /load <path to .gguf or .ggml>"),
            command if command.starts_with("/load ") => {
                load(&mut session, PathBuf::from(command["/load ".len()..].trim()));
            }
            text => chat(&mut session, &mut events, &mut input, &cli, &config, text)?,
        }
    }
    Ok(())
}

fn load(session: &mut ChatSession, path: PathBuf) {
    match session.select_path(path) {
        Ok(reference) => println!("{} {reference}", label("model", (0, 139, 248))),
        Err(e) => show_error(&e),
    }
}

fn chat(
    session: &mut ChatSession,
    events: &mut WorkerEvents,
    input: &mut impl BufRead,
    cli: &Cli,
    config: &LauncherConfig,
    text: &str,
) -> anyhow::Result<()> {
    let submission = match session.submit(text) {
        Ok(submission) => submission,
        Err(e) => {
            show_error(&e);
            return Ok(());
        }
    };
    match submission {
        Submission::Ignored => return Ok(()),
        Submission::Dispatch(_) => {}
        Submission::ConfirmQuantize(model) => {
            match choose_quantization(input, cli, config, &model)? {
                QuantizeChoice::Quantize(format) => session.confirm_quantize(format)?,
                QuantizeChoice::AsIs => session.decline_quantize()?,
                QuantizeChoice::Cancel => {
                    session.cancel_quantize()?;
                    return Ok(());
                }
            }
        }
    }

    while let Some(event) = events.blocking_recv() {
        session.apply(&event);
        match event {
            WorkerEvent::Quantizing { source, format } => println!(
                "{} {} → {format} (this can take a while)",
                label("quantize", (248, 170, 0)),
                source.file_name()
            ),
            WorkerEvent::Quantized(model) => {
                println!("{} {model}", label("quantize", (248, 170, 0)))
            }
            WorkerEvent::Loading(model) => println!("{} {model}", label("loading", (0, 139, 248))),
            WorkerEvent::Loaded(model) => println!("{} {model}", label("loaded", (0, 139, 248))),
            WorkerEvent::Released => {}
            WorkerEvent::Replied { reply, .. } => {
                println!("{} {reply}", label("assistant", (0, 200, 120)));
                break;
            }
            WorkerEvent::Failed(error) => {
                show_error(&error);
                session.dismiss_error();
                break;
            }
        }
    }
    Ok(())
}

fn choose_quantization(
    input: &mut impl BufRead,
    cli: &Cli,
    config: &LauncherConfig,
    model: &ModelReference,
) -> anyhow::Result<QuantizeChoice> {
    if let Some(format) = cli.quantize {
        return Ok(QuantizeChoice::Quantize(format));
    }
    if cli.no_quantize {
        return Ok(QuantizeChoice::AsIs);
    }

    let question = format!(
        "{} is an FP16 model. Quantize it before loading? [y/N] ",
        model.file_name()
    );
    let Some(answer) = prompt(input, &question)? else {
        return Ok(QuantizeChoice::Cancel);
    };
    if !matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes") {
        return Ok(QuantizeChoice::AsIs);
    }

    let default = config.default_quant_format;
    for (i, format) in QuantFormat::RECOMMENDED.iter().enumerate() {
        println!("  {}) {}", i + 1, format.label());
    }
    let question = format!("Format (number or code, Enter for {default}, q to cancel): ");
    loop {
        let Some(answer) = prompt(input, &question)? else {
            return Ok(QuantizeChoice::Cancel);
        };
        let answer = answer.trim();
        if answer.is_empty() {
            return Ok(QuantizeChoice::Quantize(default));
        }
        if answer.eq_ignore_ascii_case("q") {
            return Ok(QuantizeChoice::Cancel);
        }
        if let Some(format) = answer
            .parse::<usize>()
            .ok()
            .and_then(|n| n.checked_sub(1))
            .and_then(|i| QuantFormat::RECOMMENDED.get(i))
        {
            return Ok(QuantizeChoice::Quantize(*format));
        }
        match answer.parse::<QuantFormat>() {
            Ok(format) => return Ok(QuantizeChoice::Quantize(format)),
            Err(e) => eprintln!("{e}"),
        }
    }
}

/// `None` on end of input.
fn prompt(input: &mut impl BufRead, text: &str) -> io::Result<Option<String>> {
    print!("{text}");
    io::stdout().flush()?;
    let mut line = String::new();
    if input.read_line(&mut line)? == 0 {
        return Ok(None);
    }
    Ok(Some(line))
}

fn label(text: &str, (r, g, b): (u8, u8, u8)) -> String {
    format!("{}", format!("{text}:").color(colorful::RGB::new(r, g, b)).bold())
}

fn show_error(error: &LauncherError) {
    eprintln!(
        "{} {}: {error}",
        label("error", (230, 60, 60)),
        error.dialog_title()
    );
}
