//! Bot dispatcher: routes inbound events to the form or operator commands.
//!
//! Events are queued per submitter and handled in receipt order by one
//! worker task per submitter; different submitters run in parallel.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::access::{AccessPolicy, Role};
use crate::channels::{Channel, IncomingMessage, Keyboard, OutgoingResponse};
use crate::form::{Button, Intent, SessionManager};
use crate::report::{ExportFormat, ReportAssembler};

/// Pending events per submitter before new ones are rejected.
const QUEUE_CAPACITY: usize = 32;

/// A submitter's worker is retired after this long without events.
const QUEUE_IDLE: Duration = Duration::from_secs(10 * 60);

/// How often idle queues and sessions are swept.
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

const OPERATOR_PANEL: &str = "👑 *Admin panel*\nChoose an action:";
const MAIN_MENU: &str = "Main menu:";
const NO_DATA: &str = "❌ No data to export.";
const EXPORT_FAILED: &str = "❌ Export failed.";
const STATS_FAILED: &str = "❌ Could not load statistics.";
const SLOW_DOWN: &str = "⏳ Too many messages at once. Please wait for a reply and send that again.";

struct SubmitterQueue {
    tx: mpsc::Sender<IncomingMessage>,
    worker: JoinHandle<()>,
    last_seen: Instant,
}

/// Owns the session manager and talks to one channel.
pub struct Bot {
    channel: Arc<dyn Channel>,
    sessions: Arc<SessionManager>,
    access: AccessPolicy,
    reports: Arc<ReportAssembler>,
    session_idle_timeout: Duration,
}

impl Bot {
    pub fn new(
        channel: Arc<dyn Channel>,
        sessions: Arc<SessionManager>,
        access: AccessPolicy,
        reports: Arc<ReportAssembler>,
        session_idle_timeout: Duration,
    ) -> Self {
        Self {
            channel,
            sessions,
            access,
            reports,
            session_idle_timeout,
        }
    }

    /// Consume the channel's stream until it ends.
    pub async fn run(self: Arc<Self>) -> crate::error::Result<()> {
        let mut stream = self.channel.start().await?;
        let mut queues: HashMap<i64, SubmitterQueue> = HashMap::new();
        let mut sweep = tokio::time::interval(SWEEP_INTERVAL);
        sweep.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        info!(channel = self.channel.name(), "Bot dispatcher started");

        loop {
            tokio::select! {
                next = stream.next() => {
                    let Some(msg) = next else {
                        info!("Inbound stream ended");
                        break;
                    };
                    self.dispatch(&mut queues, msg);
                }
                _ = sweep.tick() => {
                    self.sweep(&mut queues).await;
                }
            }
        }

        for (_, queue) in queues.drain() {
            drop(queue.tx);
            if let Err(e) = queue.worker.await {
                error!("Submitter worker panicked: {e}");
            }
        }
        Ok(())
    }

    /// Route one event and return the replies, without sending them.
    ///
    /// An operator's `/start` and panel buttons always reach the panel; an
    /// unfinished form of theirs is dropped first.
    pub async fn handle(&self, msg: &IncomingMessage) -> Vec<OutgoingResponse> {
        let submitter_id = msg.submitter_id();

        if self.access.role(submitter_id) == Role::Operator {
            let command = match &msg.intent {
                Intent::Start => Some(Button::OperatorPanel),
                intent => self.access.operator_command(submitter_id, intent),
            };
            if let Some(command) = command {
                if self.sessions.cancel(submitter_id).await {
                    info!(submitter_id, "Operator form cancelled");
                }
                info!(submitter_id, ?command, "Operator command");
                return self.operator_command(command).await;
            }
        }

        self.sessions.handle(&msg.submitter, &msg.intent).await
    }

    fn dispatch(self: &Arc<Self>, queues: &mut HashMap<i64, SubmitterQueue>, msg: IncomingMessage) {
        let submitter_id = msg.submitter_id();
        let queue = queues
            .entry(submitter_id)
            .or_insert_with(|| self.spawn_worker(submitter_id));
        queue.last_seen = Instant::now();

        match queue.tx.try_send(msg) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(msg)) => {
                warn!(
                    submitter_id,
                    intent = %msg.intent.describe(),
                    "Submitter queue full, dropping event"
                );
                let bot = Arc::clone(self);
                tokio::spawn(async move {
                    let notice = OutgoingResponse::text(SLOW_DOWN);
                    if let Err(e) = bot.channel.respond(&msg, notice).await {
                        warn!(submitter_id, "Failed to send overflow notice: {e}");
                    }
                });
            }
            Err(mpsc::error::TrySendError::Closed(msg)) => {
                warn!(submitter_id, "Submitter worker gone, restarting");
                let fresh = self.spawn_worker(submitter_id);
                if fresh.tx.try_send(msg).is_err() {
                    error!(submitter_id, "Could not queue event on a fresh worker");
                }
                queues.insert(submitter_id, fresh);
            }
        }
    }

    fn spawn_worker(self: &Arc<Self>, submitter_id: i64) -> SubmitterQueue {
        let (tx, mut rx) = mpsc::channel::<IncomingMessage>(QUEUE_CAPACITY);
        let bot = Arc::clone(self);
        let worker = tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                bot.process(&msg).await;
            }
            debug!(submitter_id, "Submitter worker finished");
        });
        SubmitterQueue {
            tx,
            worker,
            last_seen: Instant::now(),
        }
    }

    async fn process(&self, msg: &IncomingMessage) {
        for reply in self.handle(msg).await {
            if let Err(e) = self.channel.respond(msg, reply).await {
                warn!(submitter_id = msg.submitter_id(), "Failed to send reply: {e}");
            }
        }
    }

    /// Retire idle, drained queues and expire idle sessions.
    async fn sweep(&self, queues: &mut HashMap<i64, SubmitterQueue>) {
        let before = queues.len();
        queues.retain(|_, q| {
            let drained = q.tx.capacity() == q.tx.max_capacity();
            !(q.worker.is_finished() || (drained && q.last_seen.elapsed() >= QUEUE_IDLE))
        });
        let retired = before - queues.len();
        if retired > 0 {
            debug!(retired, active = queues.len(), "Retired idle submitter queues");
        }
        let expired = self.sessions.expire_idle(self.session_idle_timeout).await;
        if expired > 0 || retired > 0 {
            debug!(
                active_sessions = self.sessions.active_count().await,
                "Sweep finished"
            );
        }
    }

    async fn operator_command(&self, command: Button) -> Vec<OutgoingResponse> {
        match command {
            Button::ExportSpreadsheet => self.export(ExportFormat::Spreadsheet).await,
            Button::ExportDocument => self.export(ExportFormat::Document).await,
            Button::Statistics => self.statistics().await,
            Button::MainMenu => {
                vec![OutgoingResponse::text(MAIN_MENU).with_keyboard(Keyboard::MainMenu)]
            }
            _ => vec![operator_panel()],
        }
    }

    async fn export(&self, format: ExportFormat) -> Vec<OutgoingResponse> {
        let report = match self.reports.assemble().await {
            Ok(report) => report,
            Err(e) => {
                error!(format = format.label(), "Assembling report failed: {e}");
                return vec![back_to_panel(EXPORT_FAILED)];
            }
        };
        if report.is_empty() {
            return vec![back_to_panel(NO_DATA)];
        }

        let caption = report.caption(format);
        let file_name = format.file_name(report.generated_at);
        let rows = report.rows.len();
        let rendered =
            tokio::task::spawn_blocking(move || format.renderer().render(&report)).await;

        match rendered {
            Ok(Ok(bytes)) => {
                info!(format = format.label(), rows, size = bytes.len(), "Export rendered");
                vec![
                    OutgoingResponse::document(file_name, bytes, caption)
                        .with_keyboard(Keyboard::BackToPanel),
                ]
            }
            Ok(Err(e)) => {
                error!(format = format.label(), "Rendering export failed: {e}");
                vec![back_to_panel(EXPORT_FAILED)]
            }
            Err(e) => {
                error!(format = format.label(), "Export task failed: {e}");
                vec![back_to_panel(EXPORT_FAILED)]
            }
        }
    }

    async fn statistics(&self) -> Vec<OutgoingResponse> {
        match self.reports.stats().await {
            Ok(stats) => vec![back_to_panel(stats.render_text())],
            Err(e) => {
                error!("Loading statistics failed: {e}");
                vec![back_to_panel(STATS_FAILED)]
            }
        }
    }
}

fn operator_panel() -> OutgoingResponse {
    OutgoingResponse::text(OPERATOR_PANEL).with_keyboard(Keyboard::OperatorPanel)
}

fn back_to_panel(text: impl Into<String>) -> OutgoingResponse {
    OutgoingResponse::text(text).with_keyboard(Keyboard::BackToPanel)
}
