use anyhow::{Context, Result};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use rand::Rng;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use url::Url;

use crate::config::UpstreamConfig;
use crate::platforms::PlatformConnection;
use crate::types::ChatMessage;

type WebSocketWriter = Arc<Mutex<futures_util::stream::SplitSink<tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>, Message>>>;

/// Password Twitch accepts for read-only anonymous logins
const ANONYMOUS_PASS: &str = "SCHMOOPIIE";

/// Upstream message buffer; a slow consumer sees `Lagged` past this
const MESSAGE_BUFFER: usize = 1000;

/// Configuration for Twitch connection
#[derive(Debug, Clone)]
pub struct TwitchConfig {
    pub url: String,
    pub channels: Vec<String>,
    /// `None` means an anonymous, read-only login
    pub credentials: Option<TwitchCredentials>,
}

#[derive(Debug, Clone)]
pub struct TwitchCredentials {
    pub username: String,
    pub oauth_token: String, // oauth:your_token_here
}

impl TwitchConfig {
    pub fn from_upstream(config: &UpstreamConfig) -> Self {
        let credentials = match (&config.username, &config.oauth_token) {
            (Some(username), Some(oauth_token)) => Some(TwitchCredentials {
                username: username.clone(),
                oauth_token: oauth_token.clone(),
            }),
            _ => None,
        };

        Self {
            url: config.url.clone(),
            channels: vec![config.channel.trim_start_matches('#').to_lowercase()],
            credentials,
        }
    }

    /// PASS/NICK pair; anonymous logins use a random justinfan nick
    fn login(&self) -> (String, String) {
        match &self.credentials {
            Some(creds) => (creds.oauth_token.clone(), creds.username.to_lowercase()),
            None => {
                let suffix: u32 = rand::rng().random_range(10_000..100_000);
                (ANONYMOUS_PASS.to_string(), format!("justinfan{}", suffix))
            }
        }
    }
}

/// One parsed frame worth of IRC traffic that matters to us
#[derive(Debug, PartialEq)]
enum IrcEvent {
    Chat(ChatMessage),
    Ping(String),
    /// Server asks clients to reconnect
    Reconnect,
    Notice(String),
}

/// Twitch IRC connection over WebSocket
pub struct TwitchConnection {
    config: TwitchConfig,
    message_receiver: Option<broadcast::Receiver<ChatMessage>>,
    websocket_writer: Option<WebSocketWriter>,
    reader_task: Option<JoinHandle<()>>,
    /// Set when the server sent RECONNECT before the stream ended
    reconnect_requested: Arc<AtomicBool>,
}

impl TwitchConnection {
    pub fn new(config: TwitchConfig) -> Self {
        Self {
            config,
            message_receiver: None,
            websocket_writer: None,
            reader_task: None,
            reconnect_requested: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Split a websocket frame into IRC lines and pick out the events we care about
    fn parse_frame(raw: &str) -> Vec<IrcEvent> {
        raw.split('\n')
            .map(str::trim_end)
            .filter(|line| !line.is_empty())
            .filter_map(Self::parse_line)
            .collect()
    }

    fn parse_line(line: &str) -> Option<IrcEvent> {
        if let Some(server) = line.strip_prefix("PING") {
            return Some(IrcEvent::Ping(server.trim_start().to_string()));
        }

        // Optional tags: @key=value;key=value
        let mut display_name = None;
        let mut rest = line;
        if let Some(tagged) = rest.strip_prefix('@') {
            let (tags, remainder) = tagged.split_once(' ')?;
            for tag in tags.split(';') {
                if let Some(("display-name", value)) = tag.split_once('=') {
                    if !value.is_empty() {
                        display_name = Some(value.to_string());
                    }
                }
            }
            rest = remainder;
        }

        // :prefix COMMAND params
        let (prefix, rest) = match rest.strip_prefix(':') {
            Some(prefixed) => prefixed.split_once(' ')?,
            None => ("", rest),
        };
        let (command, params) = rest.split_once(' ').unwrap_or((rest, ""));

        match command {
            "PRIVMSG" => {
                let (channel, content) = params.split_once(" :")?;
                let username = prefix.split('!').next().unwrap_or_default();
                Some(IrcEvent::Chat(ChatMessage {
                    platform: "twitch".to_string(),
                    channel: channel.trim_start_matches('#').to_string(),
                    username: username.to_string(),
                    display_name,
                    content: content.to_string(),
                    timestamp: chrono::Utc::now(),
                }))
            }
            "RECONNECT" => Some(IrcEvent::Reconnect),
            "NOTICE" => {
                let text = params.split_once(" :").map(|(_, text)| text).unwrap_or(params);
                Some(IrcEvent::Notice(text.to_string()))
            }
            _ => None,
        }
    }

    async fn send_raw(writer: &WebSocketWriter, line: String) -> Result<()> {
        writer
            .lock()
            .await
            .send(Message::Text(line))
            .await
            .context("Failed to send to Twitch")
    }
}

#[async_trait]
impl PlatformConnection for TwitchConnection {
    async fn connect(&mut self) -> Result<()> {
        info!("Connecting to Twitch IRC...");

        let url = Url::parse(&self.config.url).context("Failed to parse Twitch WebSocket URL")?;

        let (ws_stream, _) = connect_async(url)
            .await
            .context("Failed to connect to Twitch WebSocket")?;

        let (write, read) = ws_stream.split();
        let writer: WebSocketWriter = Arc::new(Mutex::new(write));

        let (pass, nick) = self.config.login();
        Self::send_raw(&writer, format!("PASS {}\r\n", pass))
            .await
            .context("Failed to send PASS command")?;
        Self::send_raw(&writer, format!("NICK {}\r\n", nick))
            .await
            .context("Failed to send NICK command")?;
        Self::send_raw(&writer, "CAP REQ :twitch.tv/tags twitch.tv/commands\r\n".to_string())
            .await
            .context("Failed to request capabilities")?;

        for channel in &self.config.channels {
            Self::send_raw(&writer, format!("JOIN #{}\r\n", channel))
                .await
                .with_context(|| format!("Failed to join channel: {}", channel))?;
            info!("Joined channel: #{}", channel);
        }

        // The reader task owns the only sender, so the receiver closes when the connection ends
        let (tx, rx) = broadcast::channel(MESSAGE_BUFFER);
        self.message_receiver = Some(rx);
        self.reconnect_requested.store(false, Ordering::Release);

        let reconnect_requested = Arc::clone(&self.reconnect_requested);
        let writer_for_pong = Arc::clone(&writer);
        self.websocket_writer = Some(writer);

        self.reader_task = Some(tokio::spawn(async move {
            let mut read = read;
            info!("Twitch message reader started as {}", nick);

            loop {
                match read.next().await {
                    Some(Ok(Message::Text(text))) => {
                        for event in Self::parse_frame(&text) {
                            match event {
                                IrcEvent::Chat(chat_msg) => {
                                    debug!("Message from {}: {}", chat_msg.username, chat_msg.content);
                                    // Only fails when nobody is listening, which is fine
                                    let _ = tx.send(chat_msg);
                                }
                                IrcEvent::Ping(server) => {
                                    debug!("Responding to PING");
                                    if let Err(e) = Self::send_raw(&writer_for_pong, format!("PONG {}\r\n", server)).await {
                                        error!("Failed to send PONG: {}", e);
                                    }
                                }
                                IrcEvent::Notice(text) => warn!("Twitch notice: {}", text),
                                IrcEvent::Reconnect => {
                                    info!("Twitch requested a reconnect");
                                    reconnect_requested.store(true, Ordering::Release);
                                }
                            }
                        }
                        // Messages before RECONNECT in the same frame were already forwarded
                        if reconnect_requested.load(Ordering::Acquire) {
                            break;
                        }
                    }
                    Some(Ok(Message::Ping(payload))) => {
                        debug!("Received ping, sending pong");
                        if let Err(e) = writer_for_pong.lock().await.send(Message::Pong(payload)).await {
                            error!("Failed to send pong: {}", e);
                        }
                    }
                    Some(Ok(Message::Close(close_frame))) => {
                        info!("WebSocket connection closed: {:?}", close_frame);
                        break;
                    }
                    Some(Ok(_)) => {
                        debug!("Ignoring non-text frame");
                    }
                    Some(Err(e)) => {
                        error!("WebSocket error: {}", e);
                        break;
                    }
                    None => {
                        warn!("WebSocket stream ended");
                        break;
                    }
                }
            }

            warn!("Twitch connection handler exited");
        }));

        info!("Successfully connected to Twitch IRC");
        Ok(())
    }

    fn platform_name(&self) -> &str {
        "twitch"
    }

    fn reconnect_requested(&self) -> bool {
        self.reconnect_requested.load(Ordering::Acquire)
    }

    fn take_message_receiver(&mut self) -> Option<broadcast::Receiver<ChatMessage>> {
        self.message_receiver.take()
    }

    fn get_channels(&self) -> Vec<String> {
        self.config.channels.clone()
    }

    async fn disconnect(&mut self) -> Result<()> {
        if let Some(writer) = self.websocket_writer.take() {
            if let Err(e) = writer.lock().await.close().await {
                debug!("Error closing Twitch socket: {}", e);
            }
        }
        if let Some(task) = self.reader_task.take() {
            task.abort();
        }
        self.message_receiver = None;

        info!("Disconnected from Twitch");
        Ok(())
    }
}
