//! Line-oriented chat over a relay client
//!
//! Every stdin line becomes a `chat` packet carrying `{"msg": line}`.
//! `/quit` or end of input leaves the relay.

use relay_net::{Client, ClientConfig, Packet};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::warn;

/// Identifier used for chat lines
pub const CHAT_IDENTIFIER: &str = "chat";

const QUIT_COMMAND: &str = "/quit";

/// What to do with one line of input
#[derive(Debug, PartialEq)]
pub enum Input {
    Send(Packet),
    Quit,
    Skip,
}

/// Turn an input line into an action
pub fn parse_line(line: &str, emitter: &str) -> Input {
    let line = line.trim();
    if line.is_empty() {
        return Input::Skip;
    }
    if line == QUIT_COMMAND {
        return Input::Quit;
    }
    Input::Send(
        Packet::new(CHAT_IDENTIFIER)
            .emitted_by(emitter)
            .with("msg", line),
    )
}

/// Render a received packet for the terminal
pub fn format_packet(packet: &Packet) -> String {
    match (packet.identifier(), packet.get_data("msg")) {
        (CHAT_IDENTIFIER, Some(serde_json::Value::String(msg))) => {
            format!("<{}> {}", packet.emitter(), msg)
        }
        (identifier, _) => format!(
            "[{}] {} {}",
            identifier,
            packet.emitter(),
            serde_json::Value::Object(packet.data().clone())
        ),
    }
}

/// Run the chat loop until `/quit` or end of input
pub async fn run(config: ClientConfig) -> relay_net::Result<()> {
    let emitter = config.emitter.clone();
    let client = Client::new(config, |packet: Packet| {
        println!("{}", format_packet(&packet));
    });
    client.start().await?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        match parse_line(&line, &emitter) {
            Input::Send(packet) => {
                if let Err(e) = client.send(&packet).await {
                    warn!(error = %e, "Send failed");
                    break;
                }
            }
            Input::Quit => break,
            Input::Skip => {}
        }
    }

    client.stop().await;
    println!("*** left the relay");
    Ok(())
}
