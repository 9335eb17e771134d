//! Fixtures and test doubles shared by unit tests.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crate::error::{AppError, DeliveryError, Result};
use crate::models::Subscriber;
use crate::services::{Messenger, OutboundMessage, PageSource, Update, UpdateSource};

/// One listing card in the fixture page.
pub struct FixtureCard {
    pub title: String,
    pub location: String,
    pub href: String,
    pub area: String,
    pub rent: String,
    pub available: String,
}

impl FixtureCard {
    /// A fully populated card whose fields are derived from `n`.
    pub fn numbered(n: u32) -> Self {
        Self {
            title: format!("Apartment {n}"),
            location: format!("Campus {n}"),
            href: format!("/en/offer/{n}"),
            area: format!("{} m²", 20 + n),
            rent: format!("{} €", 300 + n),
            available: "01.11.2026".to_string(),
        }
    }

    fn to_html(&self) -> String {
        format!(
            r#"
  <div class="grid-item">
    <div class="teaser js-link-area" data-href="{href}">
      <div class="teaser-header">
        <h5 class="headline-5">{title}</h5>
        <span class="subheader-5">{location}</span>
      </div>
      <div class="residential-offer-card-facts">
        <div><span class="subheader-4">Living space</span><span class="headline-4">{area}</span></div>
        <div><span class="subheader-4">All-inclusive rent</span><span class="headline-4">{rent}</span></div>
        <div><span class="subheader-4">Available from</span><span class="headline-4">{available}</span></div>
      </div>
    </div>
  </div>"#,
            href = self.href,
            title = self.title,
            location = self.location,
            area = self.area,
            rent = self.rent,
            available = self.available,
        )
    }
}

/// A full offers page containing the given cards.
pub fn page_html(cards: &[FixtureCard]) -> String {
    let body: String = cards.iter().map(FixtureCard::to_html).collect();
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head><title>Current housing offers</title></head>
<body>
<main>
<div id="residential-offer-list">{body}
</div>
</main>
</body>
</html>"#
    )
}

pub fn active_subscribers(ids: &[&str]) -> Vec<Subscriber> {
    ids.iter().map(|id| Subscriber::new(*id)).collect()
}

/// Holds a fetch open until released, signalling when it started.
#[derive(Default)]
pub struct FetchGate {
    pub started: Notify,
    pub release: Notify,
}

/// Page source replaying scripted responses, one per fetch.
#[derive(Default)]
pub struct ScriptedSource {
    responses: Mutex<VecDeque<std::result::Result<String, u16>>>,
    gate: Option<Arc<FetchGate>>,
}

impl ScriptedSource {
    /// Block every fetch on `gate` before answering.
    pub fn gated(mut self, gate: Arc<FetchGate>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn then_page(self, html: impl Into<String>) -> Self {
        self.responses.lock().unwrap().push_back(Ok(html.into()));
        self
    }

    pub fn then_status(self, status: u16) -> Self {
        self.responses.lock().unwrap().push_back(Err(status));
        self
    }
}

#[async_trait]
impl PageSource for ScriptedSource {
    fn url(&self) -> &str {
        "https://www.stwdo.de/test"
    }

    async fn fetch(&self) -> Result<String> {
        if let Some(gate) = &self.gate {
            gate.started.notify_one();
            gate.release.notified().await;
        }
        match self.responses.lock().unwrap().pop_front() {
            Some(Ok(html)) => Ok(html),
            Some(Err(status)) => Err(AppError::fetch(
                self.url(),
                format!("unexpected status {status}"),
            )),
            None => Err(AppError::fetch(self.url(), "no scripted response")),
        }
    }
}

/// Messenger that records successful sends and fails on request.
#[derive(Default)]
pub struct RecordingMessenger {
    sent: Mutex<Vec<(String, OutboundMessage)>>,
    failures: HashMap<String, DeliveryError>,
    hangs: HashSet<String>,
}

impl RecordingMessenger {
    pub fn fail_for(mut self, chat_id: &str, error: DeliveryError) -> Self {
        self.failures.insert(chat_id.to_string(), error);
        self
    }

    pub fn hang_for(mut self, chat_id: &str) -> Self {
        self.hangs.insert(chat_id.to_string());
        self
    }

    pub fn sent(&self) -> Vec<(String, OutboundMessage)> {
        self.sent.lock().unwrap().clone()
    }

    /// Distinct chats that received at least one message, in send order.
    pub fn recipients(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.sent()
            .into_iter()
            .map(|(chat, _)| chat)
            .filter(|chat| seen.insert(chat.clone()))
            .collect()
    }
}

#[async_trait]
impl Messenger for RecordingMessenger {
    async fn send_message(
        &self,
        chat_id: &str,
        message: &OutboundMessage,
    ) -> std::result::Result<(), DeliveryError> {
        if self.hangs.contains(chat_id) {
            std::future::pending::<()>().await;
        }
        if let Some(error) = self.failures.get(chat_id) {
            return Err(error.clone());
        }
        self.sent
            .lock()
            .unwrap()
            .push((chat_id.to_string(), message.clone()));
        Ok(())
    }
}

/// Update source serving scripted batches and recording requested offsets.
#[derive(Default)]
pub struct ScriptedUpdates {
    batches: Mutex<VecDeque<Result<Vec<Update>>>>,
    offsets: Mutex<Vec<i64>>,
}

impl ScriptedUpdates {
    pub fn then_batch(self, updates: Vec<Update>) -> Self {
        self.batches.lock().unwrap().push_back(Ok(updates));
        self
    }

    pub fn then_error(self) -> Self {
        self.batches
            .lock()
            .unwrap()
            .push_back(Err(AppError::telegram("getUpdates", "connection reset")));
        self
    }

    pub fn offsets(&self) -> Vec<i64> {
        self.offsets.lock().unwrap().clone()
    }
}

#[async_trait]
impl UpdateSource for ScriptedUpdates {
    async fn get_updates(&self, offset: i64, _timeout_secs: u64) -> Result<Vec<Update>> {
        self.offsets.lock().unwrap().push(offset);
        self.batches
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(Vec::new()))
    }
}

/// Build a text update from a private chat.
pub fn text_update(update_id: i64, chat_id: i64, text: &str) -> Update {
    serde_json::from_value(serde_json::json!({
        "update_id": update_id,
        "message": {
            "message_id": update_id,
            "chat": {"id": chat_id, "username": "user", "first_name": "Ada"},
            "text": text
        }
    }))
    .unwrap()
}

/// Client for talking to [`serve_once`] without any environment proxy.
pub fn local_client() -> reqwest::Client {
    reqwest::Client::builder().no_proxy().build().unwrap()
}

/// Answer a single HTTP request on localhost with a canned response.
///
/// Returns the base URL and a handle resolving to the raw request.
pub async fn serve_once(status: &str, body: &str) -> (String, JoinHandle<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    let response = format!(
        "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    );

    let handle = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let request = read_request(&mut stream).await;
        stream.write_all(response.as_bytes()).await.unwrap();
        stream.shutdown().await.ok();
        request
    });
    (base, handle)
}

async fn read_request(stream: &mut TcpStream) -> String {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    loop {
        let n = stream.read(&mut chunk).await.unwrap();
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);

        let text = String::from_utf8_lossy(&buf);
        if let Some(end) = text.find("\r\n\r\n") {
            let length = text[..end]
                .lines()
                .filter_map(|line| line.split_once(':'))
                .find(|(name, _)| name.eq_ignore_ascii_case("content-length"))
                .and_then(|(_, value)| value.trim().parse::<usize>().ok())
                .unwrap_or(0);
            if buf.len() >= end + 4 + length {
                break;
            }
        }
    }
    String::from_utf8_lossy(&buf).into_owned()
}
