//! HTTP handlers for the relay hub.

use axum::{
    Form, Json,
    extract::{State, ws::Message},
    http::header,
    response::{IntoResponse, Response},
};
use log::{info, warn};
use serde::Deserialize;

use crate::commands;
use crate::events::HubEvent;
use crate::registry::StatusSnapshot;

use super::error::ApiError;
use super::state::AppState;

/// GET / — static banner naming the WebSocket ingress points.
pub async fn banner() -> &'static str {
    "Telehub Relay Server - WebSocket endpoints: /robot?robotId=X, /unity?robotId=X"
}

/// GET /health — constant liveness probe, independent of registry state.
pub async fn health() -> &'static str {
    "OK"
}

/// GET /status — registry snapshot. This is the canonical status contract;
/// liveness checks belong on /health.
pub async fn status(State(state): State<AppState>) -> Json<StatusSnapshot> {
    Json(state.registry.status())
}

/// GET /image — latest cached camera frame, 404 before the first frame.
pub async fn image(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    match state.registry.latest_image() {
        Some(bytes) => Ok(([(header::CONTENT_TYPE, "image/jpeg")], bytes)),
        None => Err(ApiError::not_found("No image received yet")),
    }
}

/// Inbound chat command. Twilio posts form-encoded `Body` (free text) and
/// `From` (sender tag).
#[derive(Debug, Deserialize)]
pub struct CommandForm {
    #[serde(rename = "Body")]
    pub body: String,
    #[serde(default, rename = "From")]
    pub from: Option<String>,
}

/// POST /api/whatsapp — translate a chat command, forward the resulting
/// payload when the target robot is connected, and answer with TwiML.
pub async fn whatsapp(State(state): State<AppState>, Form(form): Form<CommandForm>) -> Response {
    let command = commands::normalize(&form.body);
    let robot_id = state
        .registry
        .first_connected_robot_id()
        .unwrap_or_else(|| state.default_robot_id.clone());
    let connected = state.registry.is_connected(&robot_id);
    let sender = form.from.as_deref().unwrap_or("unknown");

    info!("📩 Chat command: {command} (from: {sender}, target: {robot_id}, connected: {connected})");
    state.events.emit(HubEvent::ChatLog {
        line: format!("📩 {command}"),
    });

    let mut outcome = commands::translate(
        &command,
        state.registry.current_joints(),
        connected,
        state.registry.latest_image().is_some(),
    );

    // Forward only when connected; otherwise the success wording must never
    // reach the caller, and any attached media goes with it.
    if let Some(payload) = outcome.payload.take() {
        let delivered = connected
            && state
                .registry
                .send_to_robot(&robot_id, Message::Text(payload.into()))
                .await;
        if delivered {
            info!("🚀 Forwarded '{command}' command to {robot_id}");
        } else {
            warn!("Command '{command}' not delivered: {robot_id} is not connected");
            outcome.reply = commands::delivery_failure_reply();
            outcome.wants_media = false;
        }
    }

    state.events.emit(HubEvent::ChatLog {
        line: format!("🤖 {}", outcome.reply),
    });

    let media_url = outcome
        .wants_media
        .then(|| format!("{}/image", state.public_base_url.trim_end_matches('/')));
    twiml(&outcome.reply, media_url.as_deref())
}

/// Standard Twilio messaging response envelope.
fn twiml(body: &str, media_url: Option<&str>) -> Response {
    let mut xml =
        String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?><Response><Message><Body>");
    xml.push_str(&xml_escape(body));
    xml.push_str("</Body>");
    if let Some(url) = media_url {
        xml.push_str("<Media>");
        xml.push_str(&xml_escape(url));
        xml.push_str("</Media>");
    }
    xml.push_str("</Message></Response>");

    ([(header::CONTENT_TYPE, "application/xml")], xml).into_response()
}

fn xml_escape(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn xml_escape_covers_the_reserved_set() {
        assert_eq!(
            xml_escape(r#"<a href="x">&'go'</a>"#),
            "&lt;a href=&quot;x&quot;&gt;&amp;&apos;go&apos;&lt;/a&gt;"
        );
        assert_eq!(xml_escape("plain text"), "plain text");
    }
}
