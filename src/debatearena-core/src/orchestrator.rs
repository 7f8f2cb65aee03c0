//! Debate orchestration logic.
//!
//! Runs the live session: picks speakers, asks the fallback chain for their
//! lines, rotates topics when the countdown expires and answers viewer chat.
//! Every mutation happens under the session lock and is published before the
//! lock is released, so viewers see events in transcript order.

use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use rand::Rng;
use rand::rngs::ThreadRng;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ArenaConfig;
use crate::error::DebateError;
use crate::fallback::{FallbackChain, UtteranceRequest};
use crate::persona::{ContextLine, Persona, SYSTEM_SPEAKER};
use crate::publisher::{DebateEvent, Publisher, Subscription};
use crate::scoring::{self, ScoringPolicy};
use crate::selector::SpeakerSelector;
use crate::session::{Phase, Session, SessionSnapshot, Utterance};
use crate::topic::TopicSource;

/// Posted when no line could be produced under the placeholder policy.
pub const PROCESSING_LINE: &str = "⏳ processing updates…";

/// Prefix marking a persona reply to viewer chat.
pub const CHAT_PREFIX: &str = "@Chat: ";

/// Speaker name viewer messages are shown under in prompts.
const CHAT_SPEAKER: &str = "Chat";

/// Answer to a viewer chat message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatAck {
    pub reply_scheduled: bool,
    /// Persona id that will answer, when a reply was scheduled.
    pub responder: Option<String>,
}

#[derive(Default)]
struct Lifecycle {
    cancel: Option<CancellationToken>,
    tasks: Vec<JoinHandle<()>>,
}

struct Inner {
    config: ArenaConfig,
    selector: SpeakerSelector,
    scoring: Box<dyn ScoringPolicy>,
    chain: FallbackChain,
    topics: TopicSource,
    session: Mutex<Session>,
    publisher: Publisher,
    lifecycle: Mutex<Lifecycle>,
    /// Token of the running debate, for chat replies spawned outside the loops.
    current: StdMutex<Option<CancellationToken>>,
    chat_permits: Arc<Semaphore>,
}

/// Orchestrates the debate between the personas.
///
/// Cheap to clone; clones share the same session.
#[derive(Clone)]
pub struct DebateOrchestrator {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for DebateOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DebateOrchestrator")
            .field("personas", &self.inner.selector.personas())
            .field("providers", &self.inner.chain.provider_names())
            .finish()
    }
}

fn roll<T>(f: impl FnOnce(&mut ThreadRng) -> T) -> T {
    f(&mut rand::thread_rng())
}

impl DebateOrchestrator {
    /// Create a new orchestrator. `config` is expected to be validated.
    pub fn new(config: ArenaConfig, chain: FallbackChain, topics: TopicSource) -> Self {
        let ids: Vec<String> = config.personas.iter().map(|p| p.id.clone()).collect();
        let selector = SpeakerSelector::new(ids.clone(), &config.turns);
        let scoring = scoring::from_settings(&config.scoring);
        let session = Session::new(&ids, topics.default_topic(), &config.debate, &config.viewers);
        let publisher = Publisher::new(config.gateway.subscriber_buffer);
        let chat_permits = Arc::new(Semaphore::new(config.chat.max_pending.max(1)));

        Self {
            inner: Arc::new(Inner {
                config,
                selector,
                scoring,
                chain,
                topics,
                session: Mutex::new(session),
                publisher,
                lifecycle: Mutex::new(Lifecycle::default()),
                current: StdMutex::new(None),
                chat_permits,
            }),
        }
    }

    /// Build the chain and topic source from `config` as well.
    pub fn from_config(config: ArenaConfig) -> Result<Self, DebateError> {
        let chain = FallbackChain::from_config(&config);
        let topics = TopicSource::from_config(&config.topics)?;
        Ok(Self::new(config, chain, topics))
    }

    pub fn config(&self) -> &ArenaConfig {
        &self.inner.config
    }

    pub fn personas(&self) -> &[Persona] {
        &self.inner.config.personas
    }

    /// Start a debate. Returns `false` if one is already running.
    ///
    /// The work runs on its own task, so dropping this future midway still
    /// leaves the session either live or stopped.
    pub async fn start(&self) -> bool {
        let orchestrator = self.clone();
        match tokio::spawn(async move { orchestrator.start_inner().await }).await {
            Ok(started) => started,
            Err(e) => {
                warn!(error = %e, "Debate start task failed");
                false
            }
        }
    }

    /// Stop the debate. Returns `false` if none was running.
    ///
    /// Like [`start`](Self::start), this completes even if the caller goes away.
    pub async fn stop(&self) -> bool {
        let orchestrator = self.clone();
        match tokio::spawn(async move { orchestrator.stop_inner().await }).await {
            Ok(stopped) => stopped,
            Err(e) => {
                warn!(error = %e, "Debate stop task failed");
                false
            }
        }
    }

    async fn start_inner(&self) -> bool {
        let inner = &*self.inner;
        let mut lifecycle = inner.lifecycle.lock().await;

        let previous_topic = {
            let mut session = inner.session.lock().await;
            if session.phase() != Phase::Stopped {
                return false;
            }
            session.set_phase(Phase::Starting);
            session.topic().to_string()
        };

        let topic = inner.topics.next_topic(Some(&previous_topic)).await;

        let token = CancellationToken::new();
        let generation = {
            let mut session = inner.session.lock().await;
            let generation = session.reset_for_start(topic.topic.clone(), topic.context.clone());
            session.append(
                SYSTEM_SPEAKER,
                format!("🔴 LIVE: AI Debate on \"{}\"", topic.topic),
                0,
                false,
            );
            session.set_phase(Phase::Live);
            *self.current_token() = Some(token.clone());
            inner.publisher.publish(DebateEvent::DebateUpdate {
                debate: session.snapshot(),
            });
            generation
        };

        lifecycle.tasks.push(tokio::spawn(self.clone().run_utterances(token.clone())));
        lifecycle.tasks.push(tokio::spawn(self.clone().run_countdown(token.clone())));
        lifecycle.cancel = Some(token);

        info!(topic = %topic.topic, origin = ?topic.origin, generation, "Debate started");
        true
    }

    async fn stop_inner(&self) -> bool {
        let inner = &*self.inner;
        let mut lifecycle = inner.lifecycle.lock().await;

        if let Some(token) = lifecycle.cancel.take() {
            token.cancel();
        }
        self.current_token().take();
        for task in lifecycle.tasks.drain(..) {
            if let Err(e) = task.await {
                warn!(error = %e, "Debate loop ended abnormally");
            }
        }

        let mut session = inner.session.lock().await;
        if session.phase() == Phase::Stopped {
            return false;
        }
        session.stop();
        inner.publisher.publish(DebateEvent::DebateStopped {
            debate: session.snapshot(),
        });
        info!(messages = session.transcript().len(), "Debate stopped");
        true
    }

    /// Accept a viewer chat message and maybe schedule a persona reply.
    pub async fn handle_chat(&self, text: &str) -> Result<ChatAck, DebateError> {
        let inner = &*self.inner;
        let text = text.trim();
        if text.is_empty() {
            return Err(DebateError::EmptyChatMessage);
        }

        let (generation, topic, topic_context, token) = {
            let session = inner.session.lock().await;
            if !session.is_live() {
                return Err(DebateError::NotLive);
            }
            // Cleared by stop before the session goes down.
            let Some(token) = self.current_token().as_ref().map(CancellationToken::child_token)
            else {
                return Err(DebateError::NotLive);
            };
            (
                session.generation(),
                session.topic().to_string(),
                session.topic_context().map(str::to_string),
                token,
            )
        };

        let chat = &inner.config.chat;
        let personas = &inner.config.personas;
        let picked = roll(|rng| {
            rng.gen_bool(chat.reply_probability)
                .then(|| personas[rng.gen_range(0..personas.len())].clone())
        });
        let Some(persona) = picked else {
            debug!("Chat message left unanswered");
            return Ok(ChatAck {
                reply_scheduled: false,
                responder: None,
            });
        };

        let Ok(permit) = inner.chat_permits.clone().try_acquire_owned() else {
            warn!(persona = %persona.id, "Too many pending chat replies, dropping one");
            return Ok(ChatAck {
                reply_scheduled: false,
                responder: None,
            });
        };

        let delay = roll(|rng| {
            Duration::from_millis(rng.gen_range(chat.delay_min_ms..=chat.delay_max_ms))
        });
        let responder = persona.id.clone();
        let request = UtteranceRequest {
            persona,
            topic,
            topic_context,
            context: vec![ContextLine::new(CHAT_SPEAKER, text)],
            last_speaker: None,
        };

        let orchestrator = self.clone();
        tokio::spawn(async move {
            let _permit = permit;
            tokio::select! {
                biased;
                _ = token.cancelled() => debug!("Chat reply cancelled"),
                _ = orchestrator.deliver_chat_reply(request, generation, delay) => {}
            }
        });

        debug!(persona = %responder, ?delay, "Chat reply scheduled");
        Ok(ChatAck {
            reply_scheduled: true,
            responder: Some(responder),
        })
    }

    async fn deliver_chat_reply(
        &self,
        request: UtteranceRequest,
        generation: u64,
        delay: Duration,
    ) {
        tokio::time::sleep(delay).await;
        let outcome = self.inner.chain.resolve(&request).await;

        let mut session = self.inner.session.lock().await;
        if !session.is_current(generation) {
            debug!(persona = %request.persona.id, "Discarding chat reply from an earlier debate");
            return;
        }
        let message = match outcome {
            Ok(resolution) => {
                let reactions = roll(|rng| rng.gen_range(20..50));
                session.append(
                    &request.persona.id,
                    format!("{CHAT_PREFIX}{}", resolution.text),
                    reactions,
                    true,
                )
            }
            Err(e) => {
                warn!(
                    persona = %request.persona.id,
                    error = %e,
                    "No chat reply produced, posting placeholder"
                );
                session.append(SYSTEM_SPEAKER, PROCESSING_LINE, 0, true)
            }
        };
        self.inner
            .publisher
            .publish(DebateEvent::AiChatResponse { message });
    }

    /// Current state of the debate.
    pub async fn snapshot(&self) -> SessionSnapshot {
        self.inner.session.lock().await.snapshot()
    }

    /// Subscribe to events. The snapshot is taken together with the
    /// subscription, so nothing is missed or seen twice.
    pub async fn subscribe(&self) -> (SessionSnapshot, Subscription) {
        let session = self.inner.session.lock().await;
        let subscription = self.inner.publisher.subscribe();
        (session.snapshot(), subscription)
    }

    pub fn unsubscribe(&self, subscription_id: u64) {
        self.inner.publisher.unsubscribe(subscription_id);
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.publisher.subscriber_count()
    }

    /// One turn of the debate: pick a speaker and publish their line.
    ///
    /// Returns the appended utterance, or `None` when the debate is not live
    /// or was restarted while the line was being produced.
    pub async fn utterance_tick(&self) -> Option<Utterance> {
        let inner = &*self.inner;
        let context_lines = inner.config.debate.context_lines;

        let (generation, epoch, topic, topic_context, last, history, recent) = {
            let session = inner.session.lock().await;
            if !session.is_live() {
                return None;
            }
            (
                session.generation(),
                session.topic_epoch(),
                session.topic().to_string(),
                session.topic_context().map(str::to_string),
                session.last_speaker().map(str::to_string),
                session.recent_speakers(),
                session.recent_utterances(context_lines),
            )
        };

        let speaker = roll(|rng| {
            inner
                .selector
                .next(last.as_deref(), &history, rng)
                .to_string()
        });
        let Some(persona) = inner.config.persona(&speaker).cloned() else {
            warn!(
                error = %DebateError::UnknownPersona(speaker),
                "Selector picked an unknown persona"
            );
            return None;
        };

        let request = UtteranceRequest {
            persona,
            topic,
            topic_context,
            context: recent
                .iter()
                .map(|u| ContextLine::new(self.display_name(&u.speaker), &u.text))
                .collect(),
            last_speaker: last,
        };
        let outcome = inner.chain.resolve(&request).await;

        let mut session = inner.session.lock().await;
        if !session.is_current(generation) {
            debug!(persona = %request.persona.id, "Discarding utterance from an earlier debate");
            return None;
        }
        if !session.is_current_topic(generation, epoch) {
            debug!(persona = %request.persona.id, "Discarding utterance about a retired topic");
            return None;
        }

        let message = match outcome {
            Ok(resolution) => {
                let persona = &request.persona.id;
                let max_step = i64::from(inner.config.viewers.max_step);
                let (reactions, points, step) = roll(|rng| {
                    (
                        rng.gen_range(10..60),
                        inner.scoring.points(&resolution.text, rng),
                        rng.gen_range(-max_step..=max_step),
                    )
                });
                let message = session.append(persona, resolution.text, reactions, false);
                session.award(persona, points);
                session.walk_viewers(step);
                session.record_speaker(persona);
                debug!(
                    persona = %persona,
                    source = ?resolution.source,
                    points,
                    "Utterance appended"
                );
                message
            }
            Err(e) => {
                warn!(
                    persona = %request.persona.id,
                    error = %e,
                    "No line produced, posting placeholder"
                );
                session.append(SYSTEM_SPEAKER, PROCESSING_LINE, 0, false)
            }
        };

        inner.publisher.publish(DebateEvent::NewMessage {
            message: message.clone(),
            scores: session.scores().clone(),
            viewers: session.viewers(),
        });
        Some(message)
    }

    /// One second of the topic countdown. Rotates the topic at zero.
    ///
    /// Returns the seconds left on the current topic, or `None` when the
    /// debate is not live.
    pub async fn countdown_tick(&self) -> Option<u32> {
        let inner = &*self.inner;

        let (generation, current_topic) = {
            let mut session = inner.session.lock().await;
            if !session.is_live() {
                return None;
            }
            let remaining = session.tick_countdown();
            if remaining > 0 {
                inner
                    .publisher
                    .publish(DebateEvent::TimerUpdate { timer: remaining });
                return Some(remaining);
            }
            (session.generation(), session.topic().to_string())
        };

        let topic = inner.topics.next_topic(Some(&current_topic)).await;

        let mut session = inner.session.lock().await;
        if !session.is_current(generation) {
            return None;
        }
        session.rotate_topic(topic.topic.clone(), topic.context.clone());
        let message = session.append(
            SYSTEM_SPEAKER,
            format!("🔄 New AI debate topic: {}", topic.topic),
            0,
            false,
        );
        let timer = session.countdown();
        inner.publisher.publish(DebateEvent::TopicChange {
            topic: topic.topic.clone(),
            topic_context: topic.context,
            timer,
            message,
        });
        info!(topic = %topic.topic, origin = ?topic.origin, "Topic rotated");
        Some(timer)
    }

    async fn run_utterances(self, token: CancellationToken) {
        let debate = &self.inner.config.debate;
        let (min, max) = (
            debate.utterance_interval_min_secs,
            debate.utterance_interval_max_secs.max(debate.utterance_interval_min_secs),
        );

        loop {
            let delay = roll(|rng| Duration::from_secs(rng.gen_range(min..=max)));
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                _ = self.utterance_tick() => {}
            }
        }
        debug!("Utterance loop stopped");
    }

    async fn run_countdown(self, token: CancellationToken) {
        let period = Duration::from_secs(1);
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                _ = interval.tick() => {}
            }
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                _ = self.countdown_tick() => {}
            }
        }
        debug!("Countdown loop stopped");
    }

    fn display_name(&self, speaker: &str) -> String {
        self.inner
            .config
            .persona(speaker)
            .map(|p| p.name.clone())
            .unwrap_or_else(|| speaker.to_string())
    }

    fn current_token(&self) -> std::sync::MutexGuard<'_, Option<CancellationToken>> {
        self.inner
            .current
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}
