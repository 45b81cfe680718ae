//! Inbound message dispatch.
//!
//! Each envelope decoded by a read pump is routed by `type`: hub control
//! messages, the assistant-backed chat and analysis flows, dataset selection,
//! and a relay for everything else.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use airlink_sdk::ws::message_types as types;
use airlink_sdk::Envelope;
use serde_json::json;
use tracing::{debug, info, warn};

use super::connection::Connection;
use super::hub::Hub;
use crate::assistant::{
    Assistant, AssistantError, ChatRequest, FileAnalysisRequest, RawPromptRequest, DEFAULT_MODEL,
};

/// Reply content when the assistant fails or times out.
pub const APOLOGY: &str =
    "I'm sorry, I'm having trouble processing your request right now. Please try again.";

/// Model used for raw prompts that name none.
pub const DEFAULT_RAW_MODEL: &str = "gpt-4o-mini";

/// Routes inbound envelopes for every connection.
#[derive(Clone)]
pub struct Dispatcher {
    hub: Hub,
    assistant: Arc<dyn Assistant>,
    chat_timeout: Duration,
    analysis_timeout: Duration,
}

impl Dispatcher {
    /// Creates a dispatcher.
    #[must_use]
    pub fn new(
        hub: Hub,
        assistant: Arc<dyn Assistant>,
        chat_timeout: Duration,
        analysis_timeout: Duration,
    ) -> Self {
        Self {
            hub,
            assistant,
            chat_timeout,
            analysis_timeout,
        }
    }

    /// Handles one envelope from `conn`.
    ///
    /// Assistant work runs on its own task so the read pump keeps going.
    pub async fn dispatch(&self, conn: &Connection, envelope: Envelope) {
        match envelope.msg_type.as_str() {
            types::SUBSCRIBE => self.handle_subscribe(conn, &envelope).await,
            types::UNSUBSCRIBE => self.handle_unsubscribe(conn, &envelope).await,
            types::PING => {
                self.reply(conn, Envelope::new(types::PONG));
            }
            types::CHAT_MESSAGE => self.handle_chat(conn, &envelope),
            types::RAW_AI_MESSAGE => self.handle_raw(conn, &envelope),
            types::FILE_ANALYSIS => self.handle_file_analysis(conn, &envelope),
            types::LOAD_DATASET => self.handle_load_dataset(conn, &envelope),
            _ => self.relay(conn, envelope).await,
        }
    }

    async fn handle_subscribe(&self, conn: &Connection, envelope: &Envelope) {
        let Some(channel) = envelope.payload_str("channel") else {
            self.reply(conn, error_envelope("channel is required"));
            return;
        };
        match self.hub.subscribe(conn.id(), channel).await {
            Ok(_) => {
                self.reply(
                    conn,
                    Envelope::new(types::SUBSCRIBED).with_field("channel", channel),
                );
            }
            Err(e) => {
                warn!("Subscribe from client {} failed: {}", conn.id(), e);
                self.reply(conn, error_envelope(e.to_string()));
            }
        }
    }

    async fn handle_unsubscribe(&self, conn: &Connection, envelope: &Envelope) {
        let Some(channel) = envelope.payload_str("channel") else {
            self.reply(conn, error_envelope("channel is required"));
            return;
        };
        self.hub.unsubscribe(conn.id(), channel).await;
        self.reply(
            conn,
            Envelope::new(types::UNSUBSCRIBED).with_field("channel", channel),
        );
    }

    fn handle_chat(&self, conn: &Connection, envelope: &Envelope) {
        let Some(content) = envelope.payload_str("content") else {
            self.reply(conn, analysis_error("content is required"));
            return;
        };
        let request = ChatRequest {
            user_id: conn.user_id().to_string(),
            content: content.to_string(),
            model: model_of(envelope),
            dataset: conn.selected_dataset(),
        };
        info!(
            "Processing chat message from user {} (model {})",
            request.user_id, request.model
        );
        self.reply(
            conn,
            Envelope::new(types::CHAT_TYPING).with_field("is_typing", true),
        );

        let model = request.model.clone();
        let assistant = Arc::clone(&self.assistant);
        self.spawn_completion(conn, types::CHAT_RESPONSE, model, async move {
            assistant.complete_chat(request).await
        });
    }

    fn handle_raw(&self, conn: &Connection, envelope: &Envelope) {
        let Some(content) = envelope.payload_str("content") else {
            self.reply(conn, error_envelope("content is required"));
            return;
        };
        let request = RawPromptRequest {
            user_id: conn.user_id().to_string(),
            content: content.to_string(),
            model: resolve_raw_model(envelope.payload_str("model").unwrap_or_default()),
        };
        info!(
            "Processing raw prompt from user {} (model {})",
            request.user_id, request.model
        );
        self.reply(
            conn,
            Envelope::new(types::CHAT_TYPING).with_field("is_typing", true),
        );

        let model = request.model.clone();
        let assistant = Arc::clone(&self.assistant);
        self.spawn_completion(conn, types::RAW_AI_RESPONSE, model, async move {
            assistant.complete_raw(request).await
        });
    }

    /// Awaits `completion` off the read pump, then stops the typing indicator
    /// and replies with `response_type {content, model}`.
    fn spawn_completion<F>(
        &self,
        conn: &Connection,
        response_type: &'static str,
        model: String,
        completion: F,
    ) where
        F: Future<Output = Result<String, AssistantError>> + Send + 'static,
    {
        let this = self.clone();
        let conn = conn.clone();
        tokio::spawn(async move {
            let content = match tokio::time::timeout(this.chat_timeout, completion).await {
                Ok(Ok(content)) => content,
                Ok(Err(e)) => {
                    warn!("Assistant {} failed for client {}: {}", response_type, conn.id(), e);
                    APOLOGY.to_string()
                }
                Err(_) => {
                    warn!(
                        "Assistant {} timed out after {:?} for client {}",
                        response_type,
                        this.chat_timeout,
                        conn.id()
                    );
                    APOLOGY.to_string()
                }
            };

            this.reply(
                &conn,
                Envelope::new(types::CHAT_TYPING).with_field("is_typing", false),
            );
            this.reply(
                &conn,
                Envelope::new(response_type)
                    .with_field("content", content)
                    .with_field("model", model),
            );
        });
    }

    fn handle_file_analysis(&self, conn: &Connection, envelope: &Envelope) {
        let Some(file_id) = envelope.payload_str("file_id") else {
            self.reply(conn, analysis_error("file_id is required"));
            return;
        };
        let Some(query) = envelope.payload_str("query") else {
            self.reply(conn, analysis_error("query is required"));
            return;
        };
        let request = FileAnalysisRequest {
            user_id: conn.user_id().to_string(),
            file_id: file_id.to_string(),
            query: query.to_string(),
            model: model_of(envelope),
        };
        self.reply(
            conn,
            Envelope::new(types::FILE_ANALYSIS_STARTED)
                .with_field("file_id", request.file_id.as_str())
                .with_field("query", request.query.as_str())
                .with_field("model", request.model.as_str()),
        );

        let this = self.clone();
        let conn = conn.clone();
        tokio::spawn(async move {
            let (file_id, query, model) = (
                request.file_id.clone(),
                request.query.clone(),
                request.model.clone(),
            );
            let outcome =
                tokio::time::timeout(this.analysis_timeout, this.assistant.analyze_file(request))
                    .await;

            let reply = match outcome {
                Ok(Ok(result)) => {
                    info!(
                        "File analysis of {} complete ({} insights, {} suggestions)",
                        file_id,
                        result.insights.len(),
                        result.suggestions.len()
                    );
                    Envelope::new(types::FILE_ANALYSIS_COMPLETE)
                        .with_field("file_id", file_id)
                        .with_field("query", query)
                        .with_field("model", model)
                        .with_field("analysis", result.analysis)
                        .with_field("insights", result.insights)
                        .with_field("suggestions", result.suggestions)
                }
                Ok(Err(e)) => {
                    warn!("File analysis of {} failed: {}", file_id, e);
                    Envelope::new(types::FILE_ANALYSIS_ERROR)
                        .with_field("file_id", file_id)
                        .with_field("error", format!("Analysis failed: {}", e))
                }
                Err(_) => {
                    let secs = this.analysis_timeout.as_secs();
                    warn!("File analysis of {} timed out after {}s", file_id, secs);
                    Envelope::new(types::FILE_ANALYSIS_ERROR)
                        .with_field("file_id", file_id)
                        .with_field("error", format!("Analysis timed out after {} seconds", secs))
                }
            };
            this.reply(&conn, reply);
        });
    }

    fn handle_load_dataset(&self, conn: &Connection, envelope: &Envelope) {
        let Some(filename) = envelope.payload_str("filename") else {
            self.reply(
                conn,
                Envelope::new(types::LOAD_DATASET_ERROR).with_field("error", "Filename is required"),
            );
            return;
        };
        conn.set_selected_dataset(filename);
        info!("Client {} loaded dataset {}", conn.id(), filename);
        self.reply(
            conn,
            Envelope::new(types::LOAD_DATASET_SUCCESS)
                .with_field("filename", filename)
                .with_field(
                    "message",
                    format!(
                        "Loaded dataset: {}\n\nYou can now ask questions about this dataset or use /analyze to get insights.",
                        filename
                    ),
                ),
        );
    }

    async fn relay(&self, conn: &Connection, envelope: Envelope) {
        let Some(channel) = envelope.channel().map(str::to_string) else {
            debug!(
                "Client {} sent {} without a channel",
                conn.id(),
                envelope.msg_type
            );
            self.reply(
                conn,
                error_envelope(format!(
                    "channel is required to relay {}",
                    envelope.msg_type
                )),
            );
            return;
        };
        let envelope = envelope.with_user_id(conn.user_id());
        if let Err(e) = self.hub.publish(&channel, &envelope).await {
            warn!("Relay from client {} to {} failed: {}", conn.id(), channel, e);
            self.reply(conn, error_envelope(e.to_string()));
        }
    }

    fn reply(&self, conn: &Connection, envelope: Envelope) {
        if conn.is_closed() {
            debug!(
                "Dropping {} for closed client {}",
                envelope.msg_type,
                conn.id()
            );
            return;
        }
        self.hub.send_to_connection(conn, &envelope);
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("chat_timeout", &self.chat_timeout)
            .field("analysis_timeout", &self.analysis_timeout)
            .finish()
    }
}

fn model_of(envelope: &Envelope) -> String {
    match envelope.payload_str("model") {
        Some(model) if !model.is_empty() => model.to_string(),
        _ => DEFAULT_MODEL.to_string(),
    }
}

/// Maps a provider alias to the model it stands for.
fn resolve_raw_model(alias: &str) -> String {
    match alias {
        "" | "openai" => DEFAULT_RAW_MODEL.to_string(),
        "llama" => "llama3:latest".to_string(),
        "sqlcoder" => "sqlcoder:7b".to_string(),
        other => other.to_string(),
    }
}

fn error_envelope(message: impl Into<String>) -> Envelope {
    Envelope::new(types::ERROR).with_field("error", json!(message.into()))
}

fn analysis_error(message: &str) -> Envelope {
    Envelope::new(types::FILE_ANALYSIS_ERROR).with_field("error", message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assistant::{FileAnalysis, UnavailableAssistant};
    use crate::config::HubConfig;
    use crate::ws::connection::Frame;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tokio::sync::mpsc;

    #[derive(Default)]
    struct ScriptedAssistant {
        delay: Duration,
        chats: Mutex<Vec<ChatRequest>>,
        raws: Mutex<Vec<RawPromptRequest>>,
    }

    #[async_trait]
    impl Assistant for ScriptedAssistant {
        async fn complete_chat(&self, request: ChatRequest) -> Result<String, AssistantError> {
            tokio::time::sleep(self.delay).await;
            let reply = format!("echo: {}", request.content);
            self.chats.lock().expect("lock").push(request);
            Ok(reply)
        }

        async fn complete_raw(&self, request: RawPromptRequest) -> Result<String, AssistantError> {
            tokio::time::sleep(self.delay).await;
            let reply = format!("raw: {}", request.content);
            self.raws.lock().expect("lock").push(request);
            Ok(reply)
        }

        async fn analyze_file(
            &self,
            request: FileAnalysisRequest,
        ) -> Result<FileAnalysis, AssistantError> {
            tokio::time::sleep(self.delay).await;
            if request.file_id == "missing" {
                return Err(AssistantError::Failed("file not found".to_string()));
            }
            Ok(FileAnalysis {
                analysis: format!("{} looks fine", request.file_id),
                insights: vec!["steady growth".to_string()],
                suggestions: vec!["add a chart".to_string()],
            })
        }
    }

    fn setup(assistant: Arc<dyn Assistant>) -> (Dispatcher, Hub, Connection, mpsc::Receiver<Frame>) {
        let (hub, runner) = Hub::new(HubConfig::default(), None);
        tokio::spawn(runner.run(std::future::pending::<()>()));
        let dispatcher = Dispatcher::new(
            hub.clone(),
            assistant,
            Duration::from_secs(30),
            Duration::from_secs(60),
        );
        let (conn, rx) = Connection::new("alice", 16);
        (dispatcher, hub, conn, rx)
    }

    async fn next(rx: &mut mpsc::Receiver<Frame>) -> Envelope {
        let frame = tokio::time::timeout(Duration::from_secs(120), rx.recv())
            .await
            .expect("recv timeout")
            .expect("frame");
        Envelope::from_json(&frame).expect("envelope")
    }

    #[tokio::test]
    async fn test_ping_replies_pong() {
        let (dispatcher, _hub, conn, mut rx) = setup(Arc::new(UnavailableAssistant));
        dispatcher.dispatch(&conn, Envelope::new("ping")).await;
        assert_eq!(next(&mut rx).await.msg_type, "pong");
    }

    #[tokio::test]
    async fn test_subscribe_and_unsubscribe() {
        let (dispatcher, hub, conn, mut rx) = setup(Arc::new(UnavailableAssistant));
        hub.register(&conn).await.expect("register");

        dispatcher
            .dispatch(&conn, Envelope::new("subscribe").with_field("channel", "reports"))
            .await;
        let reply = next(&mut rx).await;
        assert_eq!(reply.msg_type, "subscribed");
        assert_eq!(reply.payload_str("channel"), Some("reports"));
        assert_eq!(hub.subscriptions_of(conn.id()), vec!["reports".to_string()]);

        dispatcher
            .dispatch(&conn, Envelope::new("unsubscribe").with_field("channel", "reports"))
            .await;
        assert_eq!(next(&mut rx).await.msg_type, "unsubscribed");
        assert!(hub.subscriptions_of(conn.id()).is_empty());
    }

    #[tokio::test]
    async fn test_subscribe_without_channel() {
        let (dispatcher, hub, conn, mut rx) = setup(Arc::new(UnavailableAssistant));
        hub.register(&conn).await.expect("register");
        dispatcher.dispatch(&conn, Envelope::new("subscribe")).await;
        let reply = next(&mut rx).await;
        assert_eq!(reply.msg_type, "error");
        assert_eq!(reply.payload_str("error"), Some("channel is required"));
    }

    #[tokio::test]
    async fn test_chat_message_flow() {
        let assistant = Arc::new(ScriptedAssistant::default());
        let (dispatcher, _hub, conn, mut rx) = setup(assistant.clone());
        conn.set_selected_dataset("sales.csv");

        dispatcher
            .dispatch(&conn, Envelope::new("chat_message").with_field("content", "hi"))
            .await;

        let typing = next(&mut rx).await;
        assert_eq!(typing.msg_type, "chat_typing");
        assert_eq!(typing.payload.get("is_typing"), Some(&json!(true)));

        let stopped = next(&mut rx).await;
        assert_eq!(stopped.payload.get("is_typing"), Some(&json!(false)));

        let response = next(&mut rx).await;
        assert_eq!(response.msg_type, "chat_response");
        assert_eq!(response.payload_str("content"), Some("echo: hi"));
        assert_eq!(response.payload_str("model"), Some("llama"));

        let chats = assistant.chats.lock().expect("lock");
        assert_eq!(chats[0].dataset.as_deref(), Some("sales.csv"));
        assert_eq!(chats[0].user_id, "alice");
    }

    #[tokio::test]
    async fn test_chat_message_assistant_failure_apologizes() {
        let (dispatcher, _hub, conn, mut rx) = setup(Arc::new(UnavailableAssistant));
        dispatcher
            .dispatch(
                &conn,
                Envelope::new("chat_message")
                    .with_field("content", "hi")
                    .with_field("model", "mistral"),
            )
            .await;

        assert_eq!(next(&mut rx).await.msg_type, "chat_typing");
        assert_eq!(next(&mut rx).await.msg_type, "chat_typing");
        let response = next(&mut rx).await;
        assert_eq!(response.payload_str("content"), Some(APOLOGY));
        assert_eq!(response.payload_str("model"), Some("mistral"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_chat_message_timeout_apologizes() {
        let assistant = Arc::new(ScriptedAssistant {
            delay: Duration::from_secs(45),
            ..ScriptedAssistant::default()
        });
        let (dispatcher, _hub, conn, mut rx) = setup(assistant);
        dispatcher
            .dispatch(&conn, Envelope::new("chat_message").with_field("content", "hi"))
            .await;

        next(&mut rx).await;
        next(&mut rx).await;
        assert_eq!(next(&mut rx).await.payload_str("content"), Some(APOLOGY));
    }

    #[tokio::test]
    async fn test_chat_message_requires_content() {
        let (dispatcher, _hub, conn, mut rx) = setup(Arc::new(UnavailableAssistant));
        dispatcher.dispatch(&conn, Envelope::new("chat_message")).await;
        let reply = next(&mut rx).await;
        assert_eq!(reply.msg_type, "file_analysis_error");
        assert_eq!(reply.payload_str("error"), Some("content is required"));
    }

    #[tokio::test]
    async fn test_raw_ai_message_flow() {
        let assistant = Arc::new(ScriptedAssistant::default());
        let (dispatcher, _hub, conn, mut rx) = setup(assistant.clone());
        conn.set_selected_dataset("sales.csv");

        dispatcher
            .dispatch(
                &conn,
                Envelope::new("raw_ai_message")
                    .with_field("content", "hi")
                    .with_field("model", "sqlcoder"),
            )
            .await;

        let typing = next(&mut rx).await;
        assert_eq!(typing.msg_type, "chat_typing");
        assert_eq!(typing.payload.get("is_typing"), Some(&json!(true)));
        let stopped = next(&mut rx).await;
        assert_eq!(stopped.payload.get("is_typing"), Some(&json!(false)));

        let response = next(&mut rx).await;
        assert_eq!(response.msg_type, "raw_ai_response");
        assert_eq!(response.payload_str("content"), Some("raw: hi"));
        assert_eq!(response.payload_str("model"), Some("sqlcoder:7b"));

        let raws = assistant.raws.lock().expect("lock");
        assert_eq!(raws[0].model, "sqlcoder:7b");
        assert_eq!(raws[0].user_id, "alice");
        assert!(assistant.chats.lock().expect("lock").is_empty());
    }

    #[tokio::test]
    async fn test_raw_ai_message_default_model_and_failure() {
        let (dispatcher, _hub, conn, mut rx) = setup(Arc::new(UnavailableAssistant));
        dispatcher
            .dispatch(&conn, Envelope::new("raw_ai_message").with_field("content", "hi"))
            .await;

        assert_eq!(next(&mut rx).await.msg_type, "chat_typing");
        assert_eq!(next(&mut rx).await.msg_type, "chat_typing");
        let response = next(&mut rx).await;
        assert_eq!(response.msg_type, "raw_ai_response");
        assert_eq!(response.payload_str("content"), Some(APOLOGY));
        assert_eq!(response.payload_str("model"), Some("gpt-4o-mini"));
    }

    #[tokio::test]
    async fn test_raw_ai_message_requires_content() {
        let (dispatcher, _hub, conn, mut rx) = setup(Arc::new(UnavailableAssistant));
        dispatcher.dispatch(&conn, Envelope::new("raw_ai_message")).await;
        let reply = next(&mut rx).await;
        assert_eq!(reply.msg_type, "error");
        assert_eq!(reply.payload_str("error"), Some("content is required"));
    }

    #[test]
    fn test_resolve_raw_model() {
        assert_eq!(resolve_raw_model(""), "gpt-4o-mini");
        assert_eq!(resolve_raw_model("openai"), "gpt-4o-mini");
        assert_eq!(resolve_raw_model("llama"), "llama3:latest");
        assert_eq!(resolve_raw_model("sqlcoder"), "sqlcoder:7b");
        assert_eq!(resolve_raw_model("mistral:7b"), "mistral:7b");
    }

    #[tokio::test]
    async fn test_file_analysis_flow() {
        let (dispatcher, _hub, conn, mut rx) = setup(Arc::new(ScriptedAssistant::default()));
        dispatcher
            .dispatch(
                &conn,
                Envelope::new("file_analysis")
                    .with_field("file_id", "q3.csv")
                    .with_field("query", "trends?"),
            )
            .await;

        let started = next(&mut rx).await;
        assert_eq!(started.msg_type, "file_analysis_started");
        assert_eq!(started.payload_str("model"), Some("llama"));

        let complete = next(&mut rx).await;
        assert_eq!(complete.msg_type, "file_analysis_complete");
        assert_eq!(complete.payload_str("analysis"), Some("q3.csv looks fine"));
        assert_eq!(complete.payload.get("insights"), Some(&json!(["steady growth"])));
    }

    #[tokio::test]
    async fn test_file_analysis_failure() {
        let (dispatcher, _hub, conn, mut rx) = setup(Arc::new(ScriptedAssistant::default()));
        dispatcher
            .dispatch(
                &conn,
                Envelope::new("file_analysis")
                    .with_field("file_id", "missing")
                    .with_field("query", "?"),
            )
            .await;

        next(&mut rx).await;
        let error = next(&mut rx).await;
        assert_eq!(error.msg_type, "file_analysis_error");
        assert_eq!(error.payload_str("file_id"), Some("missing"));
        assert!(error
            .payload_str("error")
            .expect("error")
            .starts_with("Analysis failed"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_file_analysis_timeout() {
        let assistant = Arc::new(ScriptedAssistant {
            delay: Duration::from_secs(90),
            ..ScriptedAssistant::default()
        });
        let (dispatcher, _hub, conn, mut rx) = setup(assistant);
        dispatcher
            .dispatch(
                &conn,
                Envelope::new("file_analysis")
                    .with_field("file_id", "big.csv")
                    .with_field("query", "?"),
            )
            .await;

        next(&mut rx).await;
        let error = next(&mut rx).await;
        assert_eq!(
            error.payload_str("error"),
            Some("Analysis timed out after 60 seconds")
        );
    }

    #[tokio::test]
    async fn test_file_analysis_requires_fields() {
        let (dispatcher, _hub, conn, mut rx) = setup(Arc::new(UnavailableAssistant));
        dispatcher
            .dispatch(&conn, Envelope::new("file_analysis").with_field("file_id", "x"))
            .await;
        assert_eq!(
            next(&mut rx).await.payload_str("error"),
            Some("query is required")
        );
    }

    #[tokio::test]
    async fn test_load_dataset() {
        let (dispatcher, _hub, conn, mut rx) = setup(Arc::new(UnavailableAssistant));
        dispatcher
            .dispatch(&conn, Envelope::new("load_dataset").with_field("filename", "q3.csv"))
            .await;
        let reply = next(&mut rx).await;
        assert_eq!(reply.msg_type, "load_dataset_success");
        assert_eq!(reply.payload_str("filename"), Some("q3.csv"));
        assert_eq!(conn.selected_dataset().as_deref(), Some("q3.csv"));

        dispatcher.dispatch(&conn, Envelope::new("load_dataset")).await;
        let reply = next(&mut rx).await;
        assert_eq!(reply.msg_type, "load_dataset_error");
        assert_eq!(reply.payload_str("error"), Some("Filename is required"));
    }

    #[tokio::test]
    async fn test_relay_publishes_with_sender_identity() {
        let (dispatcher, hub, sender, mut sender_rx) = setup(Arc::new(UnavailableAssistant));
        let (listener, mut listener_rx) = Connection::new("bob", 8);
        hub.register(&sender).await.expect("register");
        hub.register(&listener).await.expect("register");
        hub.subscribe(listener.id(), "room").await.expect("subscribe");

        dispatcher
            .dispatch(
                &sender,
                Envelope::new("note")
                    .with_channel("room")
                    .with_user_id("mallory"),
            )
            .await;

        let relayed = next(&mut listener_rx).await;
        assert_eq!(relayed.msg_type, "note");
        assert_eq!(relayed.user_id.as_deref(), Some("alice"));
        assert!(sender_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_relay_without_channel_replies_error() {
        let (dispatcher, _hub, conn, mut rx) = setup(Arc::new(UnavailableAssistant));
        dispatcher.dispatch(&conn, Envelope::new("note")).await;
        let reply = next(&mut rx).await;
        assert_eq!(reply.msg_type, "error");
        assert_eq!(
            reply.payload_str("error"),
            Some("channel is required to relay note")
        );
    }
}
