use std::sync::Arc;
use std::time::Duration;

use debatearena_core::config::ArenaConfig;
use debatearena_core::fallback::canned_candidates;
use debatearena_core::mock::{ScriptedFeed, ScriptedProvider};
use debatearena_core::orchestrator::{CHAT_PREFIX, PROCESSING_LINE};
use debatearena_core::persona::SYSTEM_SPEAKER;
use debatearena_core::{
    DebateEvent, DebateOrchestrator, ExhaustionPolicy, FallbackChain, Phase, ProviderError,
    Subscription, TextProvider, TopicFeed, TopicSource, default_config,
};

const LINE: &str = "Evidence beats intuition every single time.";

fn build(config: ArenaConfig, providers: Vec<Arc<dyn TextProvider>>) -> DebateOrchestrator {
    let chain = FallbackChain::new(providers, config.generation.timeout())
        .with_policy(config.generation.on_exhaustion);
    let topics = TopicSource::from_config(&config.topics).unwrap();
    DebateOrchestrator::new(config, chain, topics)
}

fn healthy() -> Vec<Arc<dyn TextProvider>> {
    vec![Arc::new(ScriptedProvider::always_ok("mock", LINE))]
}

fn all_down() -> Vec<Arc<dyn TextProvider>> {
    let timeout = ProviderError::Timeout(Duration::from_secs(15));
    vec![
        Arc::new(ScriptedProvider::always_err("primary", timeout.clone())),
        Arc::new(ScriptedProvider::always_err("secondary", timeout)),
    ]
}

/// Receive events until one of `kind` arrives.
async fn wait_for(sub: &mut Subscription, kind: &str) -> Arc<DebateEvent> {
    tokio::time::timeout(Duration::from_secs(600), async {
        loop {
            let event = sub.recv().await.expect("subscription closed");
            if event.kind() == kind {
                return event;
            }
        }
    })
    .await
    .unwrap_or_else(|_| panic!("no {kind} event"))
}

#[tokio::test(start_paused = true)]
async fn test_happy_path_publishes_scored_utterances() {
    let orch = build(default_config().unwrap(), healthy());
    let (snapshot, mut sub) = orch.subscribe().await;
    assert!(!snapshot.is_live);

    assert!(orch.start().await);
    let event = wait_for(&mut sub, "debate_update").await;
    let DebateEvent::DebateUpdate { debate } = &*event else {
        unreachable!()
    };
    assert!(debate.is_live);
    assert_eq!(debate.messages.len(), 1);
    assert_eq!(debate.messages[0].speaker, SYSTEM_SPEAKER);
    assert!(debate.messages[0].text.starts_with("🔴 LIVE: AI Debate on \""));
    assert!(debate.scores.values().all(|s| *s == 0));

    for _ in 0..3 {
        let event = wait_for(&mut sub, "new_message").await;
        let DebateEvent::NewMessage {
            message,
            scores,
            viewers,
        } = &*event
        else {
            unreachable!()
        };
        assert_eq!(message.text, LINE);
        assert!(orch.config().persona(&message.speaker).is_some());
        assert!(scores[&message.speaker] >= 2);
        assert!((800..=4000).contains(viewers));
        assert_eq!(scores.len(), 4);
    }

    let snapshot = orch.snapshot().await;
    assert_eq!(snapshot.messages.len(), 4);
    let ids: Vec<u64> = snapshot.messages.iter().map(|m| m.id).collect();
    assert!(ids.windows(2).all(|w| w[0] < w[1]));
    assert_eq!(snapshot.scores.values().sum::<u32>(), 6);

    assert!(orch.stop().await);
}

#[tokio::test(start_paused = true)]
async fn test_countdown_rollover_changes_topic() {
    let mut config = default_config().unwrap();
    config.debate.topic_duration_secs = 2;
    config.debate.utterance_interval_min_secs = 1000;
    config.debate.utterance_interval_max_secs = 1000;
    let orch = build(config, healthy());
    let (_, mut sub) = orch.subscribe().await;

    orch.start().await;
    let first_topic = orch.snapshot().await.topic;

    let event = wait_for(&mut sub, "timer_update").await;
    assert_eq!(*event, DebateEvent::TimerUpdate { timer: 1 });

    let event = wait_for(&mut sub, "topic_change").await;
    let DebateEvent::TopicChange {
        topic,
        topic_context,
        timer,
        message,
    } = &*event
    else {
        unreachable!()
    };
    assert_ne!(*topic, first_topic);
    assert!(topic_context.is_none());
    assert_eq!(*timer, 2);
    assert_eq!(message.speaker, SYSTEM_SPEAKER);
    assert_eq!(message.text, format!("🔄 New AI debate topic: {topic}"));

    let snapshot = orch.snapshot().await;
    assert_eq!(snapshot.topic, *topic);
    assert_eq!(snapshot.topic_timer, 2);
    assert!(orch.config().topics.curated.contains(topic));

    orch.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_start_and_stop_are_idempotent() {
    let orch = build(default_config().unwrap(), healthy());

    assert!(!orch.stop().await);
    let (a, b) = tokio::join!(orch.start(), orch.start());
    assert!(a ^ b, "exactly one start wins");
    assert!(!orch.start().await);

    orch.utterance_tick().await.unwrap();
    assert!(orch.snapshot().await.scores.values().any(|s| *s > 0));

    assert!(orch.stop().await);
    assert!(!orch.stop().await);
    let snapshot = orch.snapshot().await;
    assert!(!snapshot.is_live);
    assert!(snapshot.scores.values().all(|s| *s == 0));
    assert_eq!(snapshot.scores.len(), 4);

    // Restarting begins a fresh transcript, but ids keep climbing.
    let last_id = snapshot.messages.last().map(|m| m.id).unwrap();
    assert!(orch.start().await);
    let snapshot = orch.snapshot().await;
    assert_eq!(snapshot.messages.len(), 1);
    assert!(snapshot.messages[0].id > last_id);
    assert!(orch.stop().await);
}

#[tokio::test(start_paused = true)]
async fn test_abandoned_start_still_goes_live() {
    let config = default_config().unwrap();
    let feed: Arc<dyn TopicFeed> = Arc::new(
        ScriptedFeed::headline("slow", "Should cities ban cars?", None)
            .with_latency(Duration::from_secs(5)),
    );
    let topics = TopicSource::new(
        vec![feed],
        config.topics.curated.clone(),
        config.topics.question_template.clone(),
        Duration::from_secs(10),
    )
    .unwrap();
    let chain = FallbackChain::new(healthy(), config.generation.timeout());
    let orch = DebateOrchestrator::new(config, chain, topics);

    // The caller gives up while the feed is still being fetched.
    assert!(tokio::time::timeout(Duration::from_secs(1), orch.start()).await.is_err());
    tokio::time::sleep(Duration::from_secs(10)).await;

    let snapshot = orch.snapshot().await;
    assert_eq!(snapshot.status, Phase::Live);
    assert!(snapshot.is_live);
    assert_eq!(snapshot.topic, "Should cities ban cars?");

    assert!(orch.stop().await);
    assert!(orch.start().await);
    orch.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_abandoned_stop_still_stops() {
    let orch = build(default_config().unwrap(), healthy());
    assert!(orch.start().await);

    let _ = tokio::time::timeout(Duration::ZERO, orch.stop()).await;
    tokio::time::sleep(Duration::from_millis(10)).await;

    let snapshot = orch.snapshot().await;
    assert_eq!(snapshot.status, Phase::Stopped);
    assert!(!snapshot.is_live);
    assert!(orch.start().await);
    orch.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_stop_publishes_and_halts_loops() {
    let orch = build(default_config().unwrap(), healthy());
    let (_, mut sub) = orch.subscribe().await;
    orch.start().await;
    wait_for(&mut sub, "new_message").await;

    orch.stop().await;
    let event = wait_for(&mut sub, "debate_stopped").await;
    let DebateEvent::DebateStopped { debate } = &*event else {
        unreachable!()
    };
    assert!(!debate.is_live);

    let after = tokio::time::timeout(Duration::from_secs(60), sub.recv()).await;
    assert!(after.is_err(), "no events after stop");
}

#[tokio::test(start_paused = true)]
async fn test_late_subscriber_sees_consistent_state() {
    let orch = build(default_config().unwrap(), healthy());
    let (_, mut early) = orch.subscribe().await;
    orch.start().await;
    wait_for(&mut early, "new_message").await;
    wait_for(&mut early, "new_message").await;

    let (snapshot, mut late) = orch.subscribe().await;
    assert!(snapshot.is_live);
    assert_eq!(snapshot.messages.len(), 3);
    let newest = snapshot.messages.last().map(|m| m.id).unwrap();

    let event = wait_for(&mut late, "new_message").await;
    let DebateEvent::NewMessage { message, .. } = &*event else {
        unreachable!()
    };
    assert_eq!(message.id, newest + 1);

    orch.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_all_providers_down_still_produces_canned_lines() {
    let orch = build(default_config().unwrap(), all_down());
    orch.start().await;
    let topic = orch.snapshot().await.topic;

    for _ in 0..5 {
        let message = orch.utterance_tick().await.unwrap();
        let persona = orch.config().persona(&message.speaker).unwrap();
        assert!(!message.text.is_empty());
        let pool = canned_candidates(persona, &topic, None)
            .into_iter()
            .chain(persona.canned.rebuttals.values().flatten().map(String::as_str))
            .collect::<Vec<_>>();
        assert!(pool.contains(&message.text.as_str()), "{}", message.text);
    }
    orch.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_placeholder_policy_posts_system_line() {
    let mut config = default_config().unwrap();
    config.generation.on_exhaustion = ExhaustionPolicy::Placeholder;
    let orch = build(config, all_down());
    orch.start().await;

    let message = orch.utterance_tick().await.unwrap();
    assert_eq!(message.speaker, SYSTEM_SPEAKER);
    assert_eq!(message.text, PROCESSING_LINE);
    assert!(orch.snapshot().await.scores.values().all(|s| *s == 0));
    orch.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_placeholder_policy_covers_chat_replies() {
    let mut config = default_config().unwrap();
    config.generation.on_exhaustion = ExhaustionPolicy::Placeholder;
    config.chat.reply_probability = 1.0;
    config.debate.utterance_interval_min_secs = 1000;
    config.debate.utterance_interval_max_secs = 1000;
    let orch = build(config, all_down());
    let (_, mut sub) = orch.subscribe().await;
    orch.start().await;

    assert!(orch.handle_chat("Is anyone home?").await.unwrap().reply_scheduled);
    let event = wait_for(&mut sub, "ai_chat_response").await;
    let DebateEvent::AiChatResponse { message } = &*event else {
        unreachable!()
    };
    assert_eq!(message.speaker, SYSTEM_SPEAKER);
    assert_eq!(message.text, PROCESSING_LINE);
    assert!(message.is_response);
    orch.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_transcript_stays_bounded() {
    let mut config = default_config().unwrap();
    config.debate.transcript_limit = 3;
    let orch = build(config, healthy());
    orch.start().await;

    let mut last = None;
    for _ in 0..10 {
        last = orch.utterance_tick().await;
    }
    let snapshot = orch.snapshot().await;
    assert_eq!(snapshot.messages.len(), 3);
    assert_eq!(snapshot.messages.last(), last.as_ref());
    orch.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_chat_reply_is_published() {
    let mut config = default_config().unwrap();
    config.chat.reply_probability = 1.0;
    config.debate.utterance_interval_min_secs = 1000;
    config.debate.utterance_interval_max_secs = 1000;
    let orch = build(config, healthy());
    let (_, mut sub) = orch.subscribe().await;
    orch.start().await;

    let ack = orch.handle_chat("  What about jobs?  ").await.unwrap();
    assert!(ack.reply_scheduled);
    let responder = ack.responder.unwrap();

    let event = wait_for(&mut sub, "ai_chat_response").await;
    let DebateEvent::AiChatResponse { message } = &*event else {
        unreachable!()
    };
    assert_eq!(message.speaker, responder);
    assert_eq!(message.text, format!("{CHAT_PREFIX}{LINE}"));
    assert!(message.is_response);
    assert!((20..50).contains(&message.reactions));

    orch.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_stop_cancels_pending_chat_reply() {
    let mut config = default_config().unwrap();
    config.chat.reply_probability = 1.0;
    let orch = build(config, healthy());
    orch.start().await;

    let ack = orch.handle_chat("hello").await.unwrap();
    assert!(ack.reply_scheduled);
    orch.stop().await;

    let (_, mut sub) = orch.subscribe().await;
    let event = tokio::time::timeout(Duration::from_secs(30), sub.recv()).await;
    assert!(event.is_err(), "reply must not arrive after stop");
    assert!(orch.snapshot().await.messages.iter().all(|m| !m.is_response));
}

#[tokio::test(start_paused = true)]
async fn test_chat_replies_are_bounded() {
    let mut config = default_config().unwrap();
    config.chat.reply_probability = 1.0;
    config.chat.max_pending = 2;
    let orch = build(config, healthy());
    orch.start().await;

    let mut scheduled = 0;
    for _ in 0..5 {
        if orch.handle_chat("spam").await.unwrap().reply_scheduled {
            scheduled += 1;
        }
    }
    assert_eq!(scheduled, 2);
    orch.stop().await;
}
