//! Minimal test client: connects with a bearer token, joins the session
//! and prints every message the server sends. Handy for poking a running
//! server without a real game client.

use clap::Parser;
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message;

use shared::protocol::{ClientMessage, ServerMessage};

#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Server websocket URL
    #[clap(short, long, default_value = "ws://127.0.0.1:8080/ws")]
    url: String,

    /// Bearer token issued by the login service
    #[clap(short, long)]
    token: String,

    /// Chat message to send after joining
    #[clap(short, long)]
    chat: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let mut request = args.url.clone().into_client_request()?;
    request
        .headers_mut()
        .insert("Authorization", format!("Bearer {}", args.token).parse()?);

    let (ws, _) = connect_async(request).await?;
    println!("Connected to {}", args.url);
    let (mut sink, mut stream) = ws.split();

    sink.send(Message::Text(serde_json::to_string(&ClientMessage::Join {})?))
        .await?;
    if let Some(message) = args.chat {
        sink.send(Message::Text(serde_json::to_string(&ClientMessage::Chat {
            message,
        })?))
        .await?;
    }

    while let Some(frame) = stream.next().await {
        match frame? {
            Message::Text(text) => match serde_json::from_str::<ServerMessage>(&text) {
                Ok(message) => println!("{:?}", message),
                Err(_) => println!("unparsed: {}", text),
            },
            Message::Close(_) => {
                println!("Server closed the connection");
                break;
            }
            _ => {}
        }
    }
    Ok(())
}
