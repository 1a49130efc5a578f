use anyhow::Result;
use clap::Parser;
use client_core::{
    LearningSession, RenderCommand, SessionConfig, UnavailableFrameSource,
};
use shared::domain::InteractionKind;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};

mod config;

#[derive(Parser, Debug)]
struct Args {
    /// Backend base URL; overrides client.toml and the environment.
    #[arg(long)]
    server_url: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();
    let args = Args::parse();

    let mut settings = config::load_settings();
    if let Some(url) = args.server_url {
        settings.server_url = url;
    }

    let session_config = SessionConfig {
        server_url: settings.server_url.clone(),
        ..SessionConfig::default()
    };
    // The console has no camera; the session degrades to simulated emotion
    // generation on startup.
    let session = LearningSession::new(session_config, Arc::new(UnavailableFrameSource));
    println!(
        "Session {} against {}",
        session.student_id(),
        settings.server_url
    );

    let mut render = session.effects().subscribe_render();
    tokio::spawn(async move {
        while let Ok(command) = render.recv().await {
            print_render_command(&command);
        }
    });

    session.start().await;
    println!("Commands: click <target> | focus | blur | collapse | state | quit");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let mut parts = line.split_whitespace();
        match parts.next() {
            Some("click") => {
                let target = parts.next().unwrap_or("content_panel");
                session
                    .record_interaction(InteractionKind::PointerActivate, target, 0.85)
                    .await;
            }
            Some("focus") => {
                session
                    .record_interaction(InteractionKind::WindowFocus, "window", 0.9)
                    .await;
            }
            Some("blur") => {
                session
                    .record_interaction(InteractionKind::WindowBlur, "window", 0.5)
                    .await;
            }
            Some("collapse") => {
                if let Err(err) = session.request_collapse().await {
                    eprintln!("collapse request failed: {err}");
                }
            }
            Some("state") => {
                let emotions = session.reconciler().current_emotions().await;
                let learning_state = session.reconciler().current_learning_state().await;
                let quantum = session.reconciler().current_quantum_state().await;
                println!("emotions: {emotions:?}");
                println!("learning state: {learning_state}");
                println!(
                    "styles: visual {:.2} auditory {:.2} kinesthetic {:.2} collapsed={}",
                    quantum.learning_styles.visual,
                    quantum.learning_styles.auditory,
                    quantum.learning_styles.kinesthetic,
                    quantum.collapsed
                );
            }
            Some("quit") | Some("exit") => break,
            Some(other) => println!("unknown command: {other}"),
            None => {}
        }
    }

    session.shutdown().await;
    Ok(())
}

fn print_render_command(command: &RenderCommand) {
    match command {
        RenderCommand::ShowNotification(entry) => {
            println!("[{:?}] {}", entry.severity, entry.message);
        }
        RenderCommand::DismissNotification { .. } => {}
        RenderCommand::AdaptationFeed(entries) => {
            if let Some(latest) = entries.last() {
                println!("adaptation: {}", latest.text);
            }
        }
        RenderCommand::EmotionBars {
            learning_state,
            source,
            ..
        } => {
            println!("state -> {learning_state} ({source:?})");
        }
        RenderCommand::StyleMeters(quantum) => {
            println!(
                "styles -> visual {:.2} auditory {:.2} kinesthetic {:.2}",
                quantum.learning_styles.visual,
                quantum.learning_styles.auditory,
                quantum.learning_styles.kinesthetic
            );
        }
        RenderCommand::ShowCollapseAlert { style, confidence } => {
            println!("quantum collapse: {style} (confidence {confidence:.2})");
        }
        RenderCommand::HideCollapseAlert => {}
        RenderCommand::PulseStarted | RenderCommand::PulseEnded => {}
        RenderCommand::Analytics(snapshot) => {
            println!(
                "analytics: {} interactions, success {:.2}, engagement {:.2}",
                snapshot.total_interactions, snapshot.avg_success_rate, snapshot.avg_engagement
            );
        }
    }
}
