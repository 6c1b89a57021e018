//! `procura ask` — One question, streamed to stdout or printed as JSON.

use std::io::Write;
use std::path::Path;

use procura_engine::{CancelToken, ConversationState, EventSink, TurnEvent, TurnResult};
use tokio::sync::mpsc;

/// Print streamed answer chunks as they arrive. Returns once the sender
/// side is dropped.
pub async fn print_stream(mut rx: mpsc::Receiver<TurnEvent>) {
    let mut stdout = std::io::stdout();
    while let Some(event) = rx.recv().await {
        match event {
            TurnEvent::Chunk { content } => {
                print!("{content}");
                let _ = stdout.flush();
            }
            TurnEvent::State { state } => tracing::debug!(?state, "State"),
            TurnEvent::Evidence { count, tokens, truncated } => {
                tracing::debug!(count, tokens, truncated, "Evidence selected");
            }
            TurnEvent::Clarification { .. } | TurnEvent::Error { .. } | TurnEvent::Done { .. } => {}
        }
    }
}

/// Sources and suggestions after the answer.
pub fn print_footer(result: &TurnResult) {
    println!();
    if !result.evidence.is_empty() {
        eprintln!();
        eprintln!("  Fuentes:");
        for item in &result.evidence {
            eprintln!("    - {}", item.label());
        }
    }
    if let Some(query) = &result.query {
        eprintln!();
        eprintln!("  Consulta: {query}");
    }
    if !result.suggestions.is_empty() {
        eprintln!();
        eprintln!("  Sugerencias:");
        for s in &result.suggestions {
            eprintln!("    → {s}");
        }
    }
    eprintln!(
        "\n  [{} · {:?} · ~{} tokens]",
        result.intent, result.outcome, result.tokens.sent
    );
}

pub async fn run(config_path: Option<&Path>, question: &str, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    let config = super::load_config(config_path)?;
    let engine = super::build_engine(&config)?;
    let mut state = ConversationState::new(procura_engine::SessionRegistry::new_id());
    let cancel = CancelToken::new();

    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c.cancel();
        }
    });

    if json {
        let result = engine
            .run_turn(&mut state, question, EventSink::none(), &cancel)
            .await?;
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }

    let (tx, rx) = mpsc::channel(64);
    let printer = tokio::spawn(print_stream(rx));
    let result = engine.run_turn(&mut state, question, EventSink::new(tx), &cancel).await;
    let _ = printer.await;

    let result = result?;
    print_footer(&result);
    Ok(())
}
