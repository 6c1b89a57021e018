//! `procura chat` — Interactive conversation.
//!
//! Ctrl+C cancels the running turn and leaves the conversation as it was;
//! a second Ctrl+C at the prompt exits.

use std::io::Write;
use std::path::Path;

use procura_engine::{CancelToken, EventSink, SessionRegistry, TurnError};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

use super::ask::{print_footer, print_stream};

fn prompt() -> std::io::Result<()> {
    print!("  Tú > ");
    std::io::stdout().flush()
}

pub async fn run(config_path: Option<&Path>, session: Option<String>) -> Result<(), Box<dyn std::error::Error>> {
    let config = super::load_config(config_path)?;
    let engine = super::build_engine(&config)?;
    let registry = SessionRegistry::new();
    let session_id = session.unwrap_or_else(SessionRegistry::new_id);

    println!();
    println!("  ╔══════════════════════════════════════════════╗");
    println!("  ║        procura — Modo conversación            ║");
    println!("  ╚══════════════════════════════════════════════╝");
    println!();
    println!("  Modelo:   {}", config.llm.model);
    println!("  Grafo:    {}", config.graph.url);
    println!("  Sesión:   {session_id}");
    println!();
    println!("  Escribe tu pregunta y pulsa Enter.");
    println!("  '/reset' borra la conversación, 'salir' o Ctrl+C para terminar.");
    println!();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    prompt()?;

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else { break };
        let question = line.trim();

        match question {
            "" => {
                prompt()?;
                continue;
            }
            "salir" | "exit" => break,
            "/reset" => {
                registry.remove(&session_id).await;
                println!("  Conversación borrada.");
                println!();
                prompt()?;
                continue;
            }
            _ => {}
        }

        let cancel = CancelToken::new();
        let (tx, rx) = mpsc::channel(64);
        let printer = tokio::spawn(print_stream(rx));
        println!();

        let turn = registry.run_turn(&engine, &session_id, question, EventSink::new(tx), &cancel);
        tokio::pin!(turn);
        let result = loop {
            tokio::select! {
                result = &mut turn => break result,
                _ = tokio::signal::ctrl_c() => cancel.cancel(),
            }
        };
        let _ = printer.await;

        match result {
            Ok(result) => print_footer(&result),
            Err(TurnError::Cancelled) => {
                println!();
                eprintln!("  [Cancelado]");
            }
            Err(e) => eprintln!("  [Error] {e}"),
        }
        println!();
        prompt()?;
    }

    println!();
    println!("  ¡Hasta pronto!");
    println!();
    Ok(())
}
