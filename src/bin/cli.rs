// Exam Server CLI Validation Tool
// Probes the HTTP endpoints and exercises the signaling protocol from the
// command line: join rooms, watch events, send raw messages.

use clap::{Parser, Subcommand};
use colored::*;
use futures::{SinkExt, StreamExt};
use serde_json::json;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::time::{sleep, timeout, Duration};
use tokio_tungstenite::{connect_async, tungstenite::Message};

#[derive(Parser)]
#[command(name = "exam-cli")]
#[command(about = "Exam Server CLI Validation Tool", long_about = None)]
struct Cli {
    /// Server address (host:port)
    #[arg(short, long, default_value = "127.0.0.1:8080")]
    server: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check server health endpoint
    Health,

    /// Get server configuration
    Config,

    /// Test WebSocket connection
    Connect,

    /// Join a room and watch events
    Join {
        /// Room code to join
        #[arg(short, long)]
        room: String,

        /// Display name
        #[arg(short, long)]
        username: String,

        /// Role: teacher or student
        #[arg(long, default_value = "student")]
        role: String,

        /// Keep watching events (press Ctrl+C to exit)
        #[arg(short, long)]
        keep_alive: bool,
    },

    /// Interactive mode - send custom messages
    Interactive,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    match &cli.command {
        Commands::Health => {
            check_health(&cli.server).await;
        }
        Commands::Config => {
            check_config(&cli.server).await;
        }
        Commands::Connect => {
            test_connection(&cli.server).await;
        }
        Commands::Join {
            room,
            username,
            role,
            keep_alive,
        } => {
            join_room(&cli.server, room, username, role, *keep_alive).await;
        }
        Commands::Interactive => {
            interactive_mode(&cli.server).await;
        }
    }
}

async fn check_health(server: &str) {
    println!("{}", "Checking server health...".cyan());

    let url = format!("http://{}/exam/health", server);
    let client = reqwest::Client::new();

    match client.get(&url).send().await {
        Ok(resp) => {
            let status = resp.status();
            if status.is_success() {
                println!("{} Health check passed", "✓".green());

                if let Ok(body) = resp.json::<serde_json::Value>().await {
                    println!("  Status: {}", body["status"].as_str().unwrap_or("unknown"));
                    println!("  Service: {}", body["service"].as_str().unwrap_or("unknown"));
                    println!("  Version: {}", body["version"].as_str().unwrap_or("unknown"));
                }
            } else {
                println!("{} Health check failed: {}", "✗".red(), status);
            }
        }
        Err(e) => {
            println!("{} Cannot connect to server: {}", "✗".red(), e);
            println!("  Make sure the server is running on {}", server);
        }
    }
}

async fn check_config(server: &str) {
    println!("{}", "Fetching server configuration...".cyan());

    let url = format!("http://{}/exam/config", server);
    let client = reqwest::Client::new();

    match client.get(&url).send().await {
        Ok(resp) => match resp.json::<serde_json::Value>().await {
            Ok(body) => {
                println!("{} Configuration:", "✓".green());
                if let Some(object) = body.as_object() {
                    for (key, value) in object {
                        println!("  {}: {}", key, value);
                    }
                }
            }
            Err(e) => println!("{} Invalid config response: {}", "✗".red(), e),
        },
        Err(e) => {
            println!("{} Cannot connect to server: {}", "✗".red(), e);
        }
    }
}

async fn test_connection(server: &str) {
    println!("{}", "Testing WebSocket connection...".cyan());

    let url = format!("ws://{}/exam", server);
    match connect_async(&url).await {
        Ok((ws_stream, _)) => {
            println!("{} WebSocket connection established", "✓".green());
            drop(ws_stream);
        }
        Err(e) => {
            println!("{} WebSocket connection failed: {}", "✗".red(), e);
        }
    }
}

async fn join_room(server: &str, room: &str, username: &str, role: &str, keep_alive: bool) {
    let url = format!("ws://{}/exam", server);
    let (ws_stream, _) = match connect_async(&url).await {
        Ok(conn) => conn,
        Err(e) => {
            println!("{} Cannot connect: {}", "✗".red(), e);
            return;
        }
    };
    let (mut write, mut read) = ws_stream.split();

    let join_message = json!({
        "type": "joinRoom",
        "data": {"room": room, "username": username, "role": role}
    });

    if let Err(e) = write.send(Message::Text(join_message.to_string())).await {
        println!("{} Failed to send joinRoom: {}", "✗".red(), e);
        return;
    }
    println!("{} Sent joinRoom as {} ({})", "→".cyan(), username, role);

    // Wait for the join to be acknowledged
    match timeout(Duration::from_secs(3), read.next()).await {
        Ok(Some(Ok(Message::Text(text)))) => {
            print_event(&text);
            if !text.contains("roomJoined") && !keep_alive {
                return;
            }
        }
        Ok(_) | Err(_) => {
            println!("{} No response from server", "✗".red());
            return;
        }
    }

    if !keep_alive {
        println!("{}", "Joined. Use --keep-alive to watch room events.".yellow());
        return;
    }

    println!("{}", "Watching room events (Ctrl+C to exit)...".cyan());
    loop {
        tokio::select! {
            message = read.next() => {
                match message {
                    Some(Ok(Message::Text(text))) => print_event(&text),
                    Some(Ok(Message::Close(_))) | None => {
                        println!("{}", "Connection closed by server".yellow());
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        println!("{} WebSocket error: {}", "✗".red(), e);
                        break;
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                println!("{}", "Leaving room".yellow());
                let _ = write.send(Message::Close(None)).await;
                break;
            }
        }
    }
}

async fn interactive_mode(server: &str) {
    let url = format!("ws://{}/exam", server);
    let (ws_stream, _) = match connect_async(&url).await {
        Ok(conn) => conn,
        Err(e) => {
            println!("{} Cannot connect: {}", "✗".red(), e);
            return;
        }
    };
    let (mut write, mut read) = ws_stream.split();

    println!("{}", "Interactive mode. Type a JSON message per line, e.g.:".cyan());
    println!(
        "  {}",
        r#"{"type":"joinRoom","data":{"room":"EXAM001","username":"cli","role":"student"}}"#.dimmed()
    );
    println!("{}", "Type 'quit' to exit.".cyan());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                match line {
                    Ok(Some(line)) => {
                        let line = line.trim().to_string();
                        if line.is_empty() {
                            continue;
                        }
                        if line == "quit" {
                            let _ = write.send(Message::Close(None)).await;
                            break;
                        }
                        if serde_json::from_str::<serde_json::Value>(&line).is_err() {
                            println!("{} Not valid JSON", "✗".red());
                            continue;
                        }
                        if let Err(e) = write.send(Message::Text(line)).await {
                            println!("{} Send failed: {}", "✗".red(), e);
                            break;
                        }
                    }
                    Ok(None) | Err(_) => break,
                }
            }
            message = read.next() => {
                match message {
                    Some(Ok(Message::Text(text))) => print_event(&text),
                    Some(Ok(Message::Close(_))) | None => {
                        println!("{}", "Connection closed by server".yellow());
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        println!("{} WebSocket error: {}", "✗".red(), e);
                        break;
                    }
                }
            }
        }
    }

    // Give the close frame a moment to flush
    sleep(Duration::from_millis(100)).await;
}

fn print_event(text: &str) {
    let Ok(value) = serde_json::from_str::<serde_json::Value>(text) else {
        println!("{} {}", "←".cyan(), text);
        return;
    };

    let event_type = value["type"].as_str().unwrap_or("?");
    let line = match event_type {
        "error" => format!(
            "{} [{}] {}",
            "error".red(),
            value["data"]["code"].as_str().unwrap_or("?"),
            value["data"]["message"].as_str().unwrap_or("")
        ),
        "examExpired" => format!("{}", "examExpired".red().bold()),
        "examStarted" | "examSubmitted" => format!(
            "{} {}",
            event_type.green().bold(),
            value["data"].to_string().dimmed()
        ),
        _ => format!(
            "{} {}",
            event_type.green(),
            value["data"].to_string().dimmed()
        ),
    };
    println!("{} {}", "←".cyan(), line);
}
