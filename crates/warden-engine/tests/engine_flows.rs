//! End-to-end flows through the engine facade against the in-memory
//! directory and store.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use tokio::sync::broadcast;
use warden_engine::{
    Engine, EngineConfig, EngineError, InMemoryDirectory, InboundMessage, ManualClock,
    MemberSnapshot, MessageVerdict, RoleLayout, RoleSelection, VoteOutcome,
};
use warden_guard::Violation;
use warden_store::{DocumentKey, InMemoryStore};
use warden_types::{
    ChannelId, IncarcerationBook, MemberId, RoleAction, RoleId, Setting, ThreadId, VoteKind,
    WardenEvent, WardenEventEnvelope,
};

const ELECTORAL: RoleId = RoleId::new(1);
const APPROVED: RoleId = RoleId::new(2);
const TEMPORARY: RoleId = RoleId::new(3);
const INCARCERATED: RoleId = RoleId::new(4);
const MISSING: RoleId = RoleId::new(5);
const UNRELATED: RoleId = RoleId::new(77);

const APPLICANT: MemberId = MemberId::new(100);
const THREAD: ThreadId = ThreadId::new(900);
const FORUM: ChannelId = ChannelId::new(800);

struct Harness {
    engine: Engine,
    directory: Arc<InMemoryDirectory>,
    store: Arc<InMemoryStore>,
    clock: Arc<ManualClock>,
}

fn config() -> EngineConfig {
    let mut config = EngineConfig::new(RoleLayout {
        electoral: ELECTORAL,
        approved: APPROVED,
        temporary: TEMPORARY,
        incarcerated: INCARCERATED,
        missing: MISSING,
    });
    config.vetting_forum = Some(FORUM);
    config.monitor.promotion_threshold = 3;
    config
}

async fn harness() -> Harness {
    harness_with(InMemoryStore::new()).await
}

async fn harness_with(store: InMemoryStore) -> Harness {
    harness_from(store, config()).await
}

async fn harness_from(store: InMemoryStore, config: EngineConfig) -> Harness {
    let directory = Arc::new(InMemoryDirectory::new());
    let store = Arc::new(store);
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap(),
    ));
    let engine = Engine::new(config, directory.clone(), store.clone(), clock.clone());
    engine.load().await.unwrap();
    Harness {
        engine,
        directory,
        store,
        clock,
    }
}

async fn add_member(directory: &InMemoryDirectory, member: MemberId, roles: &[RoleId]) {
    directory
        .insert_member(MemberSnapshot::new(member, roles.iter().copied()))
        .await;
}

async fn roles_of(directory: &InMemoryDirectory, member: MemberId) -> BTreeSet<RoleId> {
    directory.member_roles(member).await.unwrap()
}

fn drain(rx: &mut broadcast::Receiver<WardenEventEnvelope>) -> Vec<WardenEvent> {
    let mut events = Vec::new();
    while let Ok(envelope) = rx.try_recv() {
        events.push(envelope.event);
    }
    events
}

async fn persisted_book(store: &InMemoryStore) -> IncarcerationBook {
    let raw = store
        .get_raw(DocumentKey::IncarcerationRecords)
        .await
        .unwrap();
    serde_json::from_slice(&raw).unwrap()
}

async fn approve(h: &Harness) {
    for reviewer in 201..=203 {
        h.engine
            .vote(THREAD, MemberId::new(reviewer), VoteKind::Approve)
            .await
            .unwrap();
    }
}

// Vetting

#[tokio::test(start_paused = true)]
async fn test_quorum_of_approvals_moves_roles_and_clears_ledger() {
    let h = harness().await;
    add_member(&h.directory, APPLICANT, &[TEMPORARY]).await;
    assert!(h.engine.open_review(THREAD, FORUM, APPLICANT));
    let mut rx = h.engine.subscribe();

    let first = h
        .engine
        .vote(THREAD, MemberId::new(201), VoteKind::Approve)
        .await
        .unwrap();
    assert_eq!(
        first,
        VoteOutcome::Recorded {
            kind: VoteKind::Approve,
            remaining: 2
        }
    );
    h.engine
        .vote(THREAD, MemberId::new(202), VoteKind::Approve)
        .await
        .unwrap();
    let last = h
        .engine
        .vote(THREAD, MemberId::new(203), VoteKind::Approve)
        .await
        .unwrap();
    assert_eq!(last, VoteOutcome::Approved);

    assert_eq!(
        roles_of(&h.directory, APPLICANT).await,
        BTreeSet::from([ELECTORAL, APPROVED])
    );
    let record = h.engine.review(THREAD);
    assert_eq!(record.approval_count, 0);
    assert!(record.reviewers.is_empty());
    assert!(record.last_approval.is_some());

    let err = h
        .engine
        .vote(THREAD, MemberId::new(204), VoteKind::Approve)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::AlreadyApproved(m) if m == APPLICANT));

    let events = drain(&mut rx);
    assert!(events.iter().any(|e| matches!(
        e,
        WardenEvent::MemberApproved { member_id, reviewers, .. }
            if *member_id == APPLICANT && reviewers.len() == 3
    )));
    let refreshes = events
        .iter()
        .filter(|e| matches!(e, WardenEvent::ReviewRefreshed { .. }))
        .count();
    assert_eq!(refreshes, 4);
}

#[tokio::test(start_paused = true)]
async fn test_duplicate_vote_is_refused() {
    let h = harness().await;
    add_member(&h.directory, APPLICANT, &[TEMPORARY]).await;
    h.directory.insert_thread(THREAD, APPLICANT).await;

    let reviewer = MemberId::new(201);
    h.engine
        .vote(THREAD, reviewer, VoteKind::Approve)
        .await
        .unwrap();
    let err = h
        .engine
        .vote(THREAD, reviewer, VoteKind::Approve)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::DuplicateVote { .. }));
    assert_eq!(h.engine.review(THREAD).approval_count, 1);
}

#[tokio::test(start_paused = true)]
async fn test_rejection_after_window_is_refused() {
    let h = harness().await;
    add_member(&h.directory, APPLICANT, &[TEMPORARY]).await;
    h.engine.open_review(THREAD, FORUM, APPLICANT);
    approve(&h).await;

    h.clock
        .advance(chrono::Duration::days(7) + chrono::Duration::seconds(1));
    let err = h
        .engine
        .vote(THREAD, MemberId::new(301), VoteKind::Reject)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::RejectionWindowClosed { days: 7 }));
    assert_eq!(h.engine.review(THREAD).rejection_count, 0);
}

#[tokio::test(start_paused = true)]
async fn test_rejections_within_window_demote() {
    let h = harness().await;
    add_member(&h.directory, APPLICANT, &[TEMPORARY]).await;
    h.engine.open_review(THREAD, FORUM, APPLICANT);
    approve(&h).await;

    h.clock.advance(chrono::Duration::days(6));
    let mut outcome = None;
    for reviewer in 301..=303 {
        outcome = Some(
            h.engine
                .vote(THREAD, MemberId::new(reviewer), VoteKind::Reject)
                .await
                .unwrap(),
        );
    }
    assert_eq!(outcome, Some(VoteOutcome::Rejected));
    assert_eq!(
        roles_of(&h.directory, APPLICANT).await,
        BTreeSet::from([APPROVED])
    );
}

#[tokio::test(start_paused = true)]
async fn test_rejected_thread_forgets_applicant() {
    let h = harness().await;
    add_member(&h.directory, APPLICANT, &[TEMPORARY]).await;
    h.engine.open_review(THREAD, FORUM, APPLICANT);
    approve(&h).await;
    for reviewer in 301..=303 {
        h.engine
            .vote(THREAD, MemberId::new(reviewer), VoteKind::Reject)
            .await
            .unwrap();
    }

    let err = h
        .engine
        .vote(THREAD, MemberId::new(304), VoteKind::Reject)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::UnknownThread(t) if t == THREAD));
}

#[tokio::test(start_paused = true)]
async fn test_closed_review_threads_are_pruned() {
    let h = harness().await;
    add_member(&h.directory, APPLICANT, &[TEMPORARY]).await;
    h.engine.open_review(THREAD, FORUM, APPLICANT);
    approve(&h).await;

    h.clock.advance(chrono::Duration::days(7));
    assert_eq!(h.engine.prune_reviews(), 0);
    assert!(h.engine.review(THREAD).last_approval.is_some());

    h.clock.advance(chrono::Duration::seconds(1));
    assert_eq!(h.engine.prune_reviews(), 1);
    assert_eq!(h.engine.review(THREAD).last_approval, None);
    assert_eq!(h.engine.prune_reviews(), 0);

    let err = h
        .engine
        .vote(THREAD, MemberId::new(301), VoteKind::Reject)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::UnknownThread(_)));
}

#[tokio::test(start_paused = true)]
async fn test_rejecting_unapproved_member_fails() {
    let h = harness().await;
    add_member(&h.directory, APPLICANT, &[TEMPORARY]).await;
    h.engine.open_review(THREAD, FORUM, APPLICANT);

    let err = h
        .engine
        .vote(THREAD, MemberId::new(301), VoteKind::Reject)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::NotApproved(_)));
}

#[tokio::test(start_paused = true)]
async fn test_failed_sync_does_not_advance_ledger() {
    let h = harness().await;
    add_member(&h.directory, APPLICANT, &[TEMPORARY]).await;
    h.engine.open_review(THREAD, FORUM, APPLICANT);
    for reviewer in 201..=202 {
        h.engine
            .vote(THREAD, MemberId::new(reviewer), VoteKind::Approve)
            .await
            .unwrap();
    }

    // Initial remove+add, then two re-issues of both halves.
    h.directory.fail_next_writes(6);
    let err = h
        .engine
        .vote(THREAD, MemberId::new(203), VoteKind::Approve)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::RoleSyncFailed { attempts: 3, .. }));
    assert_eq!(h.engine.review(THREAD).approval_count, 2);
    assert_eq!(
        roles_of(&h.directory, APPLICANT).await,
        BTreeSet::from([TEMPORARY])
    );

    // The same reviewer can try again once the directory recovers.
    let outcome = h
        .engine
        .vote(THREAD, MemberId::new(203), VoteKind::Approve)
        .await
        .unwrap();
    assert_eq!(outcome, VoteOutcome::Approved);
}

#[tokio::test]
async fn test_review_intake_is_deduplicated_and_scoped_to_forum() {
    let h = harness().await;
    assert!(!h.engine.open_review(THREAD, ChannelId::new(1), APPLICANT));
    assert!(h.engine.open_review(THREAD, FORUM, APPLICANT));
    assert!(!h.engine.open_review(THREAD, FORUM, APPLICANT));
}

#[tokio::test]
async fn test_vote_on_unknown_thread() {
    let h = harness().await;
    let err = h
        .engine
        .vote(THREAD, MemberId::new(201), VoteKind::Approve)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::UnknownThread(t) if t == THREAD));
}

// Incarceration

#[tokio::test(start_paused = true)]
async fn test_incarceration_round_trip_through_reconcile() {
    let h = harness().await;
    add_member(&h.directory, APPLICANT, &[APPROVED, UNRELATED]).await;

    let text = h.engine.incarcerate(APPLICANT, "1h").await.unwrap();
    assert!(text.contains("<@100>"));
    assert_eq!(
        roles_of(&h.directory, APPLICANT).await,
        BTreeSet::from([INCARCERATED, UNRELATED])
    );
    let book = persisted_book(&h.store).await;
    assert_eq!(book[&APPLICANT].original_roles, vec![APPROVED]);

    let report = h.engine.reconcile().await.unwrap();
    assert!(report.released.is_empty());
    assert!(report.scheduled.is_empty());

    h.clock
        .advance(chrono::Duration::hours(1) + chrono::Duration::seconds(1));
    let report = h.engine.reconcile().await.unwrap();
    assert_eq!(report.released, vec![APPLICANT]);
    assert_eq!(
        roles_of(&h.directory, APPLICANT).await,
        BTreeSet::from([APPROVED, UNRELATED])
    );
    assert!(persisted_book(&h.store).await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_near_deadline_gets_deferred_release() {
    let h = harness().await;
    add_member(&h.directory, APPLICANT, &[TEMPORARY]).await;
    h.engine.incarcerate(APPLICANT, "1m").await.unwrap();

    h.clock.advance(chrono::Duration::seconds(45));
    let report = h.engine.reconcile().await.unwrap();
    assert_eq!(report.scheduled, vec![APPLICANT]);
    assert_eq!(h.engine.pending_releases(), vec![APPLICANT]);

    // A second pass does not arm another timer.
    let report = h.engine.reconcile().await.unwrap();
    assert!(report.scheduled.is_empty());

    tokio::time::sleep(Duration::from_secs(16)).await;
    assert_eq!(
        roles_of(&h.directory, APPLICANT).await,
        BTreeSet::from([TEMPORARY])
    );
    assert!(h.engine.pending_releases().is_empty());
    assert!(persisted_book(&h.store).await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_fired_timer_skips_after_reincarceration() {
    let h = harness().await;
    add_member(&h.directory, APPLICANT, &[TEMPORARY]).await;
    h.engine.incarcerate(APPLICANT, "1m").await.unwrap();
    h.clock.advance(chrono::Duration::seconds(45));
    h.engine.reconcile().await.unwrap();

    // The timer fires while the new incarceration is backing off.
    tokio::time::sleep(Duration::from_millis(14_900)).await;
    add_member(&h.directory, APPLICANT, &[INCARCERATED, APPROVED]).await;
    h.directory.drop_next_writes(1);
    h.engine.incarcerate(APPLICANT, "1h").await.unwrap();
    tokio::time::sleep(Duration::from_secs(2)).await;

    assert_eq!(
        roles_of(&h.directory, APPLICANT).await,
        BTreeSet::from([INCARCERATED])
    );
    let book = persisted_book(&h.store).await;
    assert_eq!(
        book[&APPLICANT].release_time(),
        h.clock_now() + chrono::Duration::hours(1)
    );
    assert!(h.engine.pending_releases().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_failed_release_still_drops_record() {
    let h = harness().await;
    add_member(&h.directory, APPLICANT, &[TEMPORARY]).await;
    h.engine.incarcerate(APPLICANT, "10m").await.unwrap();
    h.directory.remove_member(APPLICANT).await;
    let mut rx = h.engine.subscribe();

    h.clock.advance(chrono::Duration::minutes(11));
    let report = h.engine.reconcile().await.unwrap();
    assert_eq!(report.failed, vec![APPLICANT]);
    assert!(persisted_book(&h.store).await.is_empty());
    assert!(drain(&mut rx)
        .iter()
        .any(|e| matches!(e, WardenEvent::ReleaseFailed { member_id, .. } if *member_id == APPLICANT)));
}

#[tokio::test(start_paused = true)]
async fn test_manual_release() {
    let h = harness().await;
    add_member(&h.directory, APPLICANT, &[ELECTORAL, APPROVED]).await;

    let err = h.engine.release(APPLICANT).await.unwrap_err();
    assert!(matches!(err, EngineError::NotIncarcerated(_)));

    h.engine.incarcerate(APPLICANT, "2d").await.unwrap();
    let restored = h.engine.release(APPLICANT).await.unwrap();
    assert_eq!(restored, vec![ELECTORAL, APPROVED]);
    assert_eq!(
        roles_of(&h.directory, APPLICANT).await,
        BTreeSet::from([ELECTORAL, APPROVED])
    );
}

#[tokio::test(start_paused = true)]
async fn test_reincarceration_keeps_original_roles() {
    let h = harness().await;
    add_member(&h.directory, APPLICANT, &[APPROVED]).await;
    h.engine.incarcerate(APPLICANT, "1h").await.unwrap();
    h.engine.incarcerate(APPLICANT, "3h").await.unwrap();

    let book = persisted_book(&h.store).await;
    let record = &book[&APPLICANT];
    assert_eq!(record.original_roles, vec![APPROVED]);
    assert_eq!(
        record.release_time(),
        h.clock_now() + chrono::Duration::hours(3)
    );
}

#[tokio::test]
async fn test_malformed_duration_changes_nothing() {
    let h = harness().await;
    add_member(&h.directory, APPLICANT, &[APPROVED]).await;
    let err = h.engine.incarcerate(APPLICANT, "forever").await.unwrap_err();
    assert!(matches!(err, EngineError::MalformedDuration(_)));
    assert_eq!(h.directory.write_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_abandons_slow_releases() {
    let h = harness().await;
    add_member(&h.directory, APPLICANT, &[TEMPORARY]).await;
    h.engine.incarcerate(APPLICANT, "1m").await.unwrap();
    h.clock.advance(chrono::Duration::seconds(35));
    h.engine.reconcile().await.unwrap();

    // 25s left on the timer, 10s drain budget.
    let report = h.engine.shutdown().await;
    assert_eq!(report.releases_abandoned, 1);
    assert!(report.stats_flushed);
    assert!(persisted_book(&h.store).await.contains_key(&APPLICANT));
}

fn quick_drain_config() -> EngineConfig {
    let mut config = config();
    config.incarceration.drain_timeout_secs = 1;
    config
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_counts_running_release_past_drain() {
    let h = harness_from(InMemoryStore::new(), quick_drain_config()).await;
    add_member(&h.directory, APPLICANT, &[TEMPORARY]).await;
    h.engine.incarcerate(APPLICANT, "1m").await.unwrap();
    h.clock.advance(chrono::Duration::seconds(45));
    h.engine.reconcile().await.unwrap();
    h.directory.fail_next_writes(100);

    // Fired and retrying; no longer an armed timer.
    tokio::time::sleep(Duration::from_millis(15_100)).await;
    assert!(h.engine.pending_releases().is_empty());

    let report = h.engine.shutdown().await;
    assert_eq!(report.releases_abandoned, 1);
    assert!(persisted_book(&h.store).await.contains_key(&APPLICANT));
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_waits_for_running_release() {
    let h = harness_from(InMemoryStore::new(), quick_drain_config()).await;
    add_member(&h.directory, APPLICANT, &[TEMPORARY]).await;
    h.engine.incarcerate(APPLICANT, "1m").await.unwrap();
    h.clock.advance(chrono::Duration::seconds(45));
    h.engine.reconcile().await.unwrap();
    // The first removal and addition fail; the re-issue lands.
    h.directory.fail_next_writes(2);

    tokio::time::sleep(Duration::from_millis(15_100)).await;
    let report = h.engine.shutdown().await;
    assert_eq!(report.releases_abandoned, 0);
    assert_eq!(
        roles_of(&h.directory, APPLICANT).await,
        BTreeSet::from([TEMPORARY])
    );
    assert!(persisted_book(&h.store).await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_records_survive_restart() {
    let store = InMemoryStore::new();
    let book = serde_json::json!({
        "100": { "release_time": "1709294400.0", "original_roles": [2] }
    });
    store
        .put_raw(
            DocumentKey::IncarcerationRecords,
            serde_json::to_vec(&book).unwrap(),
        )
        .await;
    let h = harness_with(store).await;
    add_member(&h.directory, APPLICANT, &[INCARCERATED]).await;

    // 2024-03-01T12:00:00Z is exactly the stored deadline.
    let report = h.engine.reconcile().await.unwrap();
    assert_eq!(report.released, vec![APPLICANT]);
    assert_eq!(
        roles_of(&h.directory, APPLICANT).await,
        BTreeSet::from([APPROVED])
    );
}

// Monitor

#[tokio::test(start_paused = true)]
async fn test_monitoring_is_off_until_toggled() {
    let h = harness().await;
    add_member(&h.directory, APPLICANT, &[TEMPORARY]).await;
    let message = InboundMessage::new(APPLICANT, "aaaaaaaaaa");

    assert_eq!(
        h.engine.observe_message(&message).await.unwrap(),
        MessageVerdict::Ignored
    );

    h.engine.toggle_setting(Setting::Monitoring, true);
    let verdict = h.engine.observe_message(&message).await.unwrap();
    let MessageVerdict::Invalid(violations) = verdict else {
        panic!("expected a flagged message, got {verdict:?}");
    };
    assert!(violations.contains(&Violation::LowEntropy));

    let stats = h.engine.monitor().stats_for(APPLICANT).unwrap();
    assert_eq!(stats.invalid_message_count, 1);
    assert_eq!(stats.recovery_streak, 0);
    assert!(stats.feedback_score < 0.0);
}

#[tokio::test(start_paused = true)]
async fn test_only_temporary_members_are_scored() {
    let h = harness().await;
    add_member(&h.directory, APPLICANT, &[APPROVED]).await;
    h.engine.toggle_setting(Setting::Monitoring, true);

    let verdict = h
        .engine
        .observe_message(&InboundMessage::new(APPLICANT, "aaaaaaaaaa"))
        .await
        .unwrap();
    assert_eq!(verdict, MessageVerdict::Ignored);

    let mut bot = InboundMessage::new(APPLICANT, "hello");
    bot.is_bot = true;
    assert_eq!(
        h.engine.observe_message(&bot).await.unwrap(),
        MessageVerdict::Ignored
    );
}

#[tokio::test(start_paused = true)]
async fn test_surrounding_whitespace_is_ignored() {
    let h = harness().await;
    add_member(&h.directory, APPLICANT, &[TEMPORARY]).await;
    h.engine.toggle_setting(Setting::Monitoring, true);

    let blank = InboundMessage::new(APPLICANT, "          ");
    assert_eq!(
        h.engine.observe_message(&blank).await.unwrap(),
        MessageVerdict::Valid
    );

    for text in ["see you later", "see you later ", "see you later  "] {
        let verdict = h
            .engine
            .observe_message(&InboundMessage::new(APPLICANT, text))
            .await
            .unwrap();
        assert_eq!(verdict, MessageVerdict::Valid, "{text:?}");
    }
    let verdict = h
        .engine
        .observe_message(&InboundMessage::new(APPLICANT, "  see you later"))
        .await
        .unwrap();
    let MessageVerdict::Invalid(violations) = verdict else {
        panic!("expected a repeated message, got {verdict:?}");
    };
    assert!(violations.contains(&Violation::MessageRepetition));
}

#[tokio::test(start_paused = true)]
async fn test_disabled_check_does_not_fire() {
    let h = harness().await;
    add_member(&h.directory, APPLICANT, &[TEMPORARY]).await;
    h.engine.toggle_setting(Setting::Monitoring, true);
    h.engine
        .toggle_setting(Setting::Check(warden_types::CheckKind::Entropy), false);

    let verdict = h
        .engine
        .observe_message(&InboundMessage::new(APPLICANT, "aaaaaaaaaa"))
        .await
        .unwrap();
    assert_eq!(verdict, MessageVerdict::Valid);
}

#[tokio::test(start_paused = true)]
async fn test_missing_member_is_converted() {
    let h = harness().await;
    add_member(&h.directory, APPLICANT, &[MISSING]).await;

    let verdict = h
        .engine
        .observe_message(&InboundMessage::new(APPLICANT, "I'm back"))
        .await
        .unwrap();
    assert_eq!(verdict, MessageVerdict::Converted);
    assert_eq!(
        roles_of(&h.directory, APPLICANT).await,
        BTreeSet::from([TEMPORARY])
    );
}

#[tokio::test(start_paused = true)]
async fn test_stats_save_is_debounced() {
    let h = harness().await;
    add_member(&h.directory, APPLICANT, &[TEMPORARY]).await;
    h.engine.toggle_setting(Setting::Monitoring, true);
    let baseline = h.store.save_count();

    h.engine
        .observe_message(&InboundMessage::new(APPLICANT, "good morning everyone here"))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_secs(4)).await;
    h.engine
        .observe_message(&InboundMessage::new(APPLICANT, "how is everybody doing today"))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_secs(4)).await;
    assert_eq!(h.store.save_count(), baseline);

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(h.store.save_count(), baseline + 1);

    let raw = h.store.get_raw(DocumentKey::UserStats).await.unwrap();
    let book: warden_types::StatsBook = serde_json::from_slice(&raw).unwrap();
    assert_eq!(book[&APPLICANT].message_timestamps.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_active_members_are_promoted() {
    let h = harness().await;
    add_member(&h.directory, APPLICANT, &[TEMPORARY]).await;
    h.engine.toggle_setting(Setting::Monitoring, true);

    for text in [
        "hello everyone, glad to be here",
        "what are we discussing this week",
        "thanks for the warm welcome all",
    ] {
        let verdict = h
            .engine
            .observe_message(&InboundMessage::new(APPLICANT, text))
            .await
            .unwrap();
        assert_eq!(verdict, MessageVerdict::Valid);
    }

    let promoted = h.engine.promote_active_members().await.unwrap();
    assert_eq!(promoted, vec![APPLICANT]);
    assert_eq!(
        roles_of(&h.directory, APPLICANT).await,
        BTreeSet::from([APPROVED])
    );
    assert!(h.engine.monitor().stats_for(APPLICANT).is_none());
}

#[tokio::test(start_paused = true)]
async fn test_cleanup_reports_removed_members() {
    let h = harness().await;
    let stays = MemberId::new(101);
    let leaves = MemberId::new(102);
    let approved = MemberId::new(103);
    for member in [stays, leaves, approved] {
        add_member(&h.directory, member, &[TEMPORARY]).await;
    }
    h.engine.toggle_setting(Setting::Monitoring, true);
    for member in [stays, leaves, approved] {
        h.engine
            .observe_message(&InboundMessage::new(member, "hello there everyone"))
            .await
            .unwrap();
    }

    h.directory.remove_member(leaves).await;
    add_member(&h.directory, approved, &[TEMPORARY, APPROVED]).await;

    let report = h.engine.cleanup_stats().await.unwrap();
    assert_eq!(report.processed, 3);
    assert_eq!(report.removed, 2);
    assert_eq!(h.engine.monitor().tracked_members(), 1);
}

// Role configuration

#[tokio::test(start_paused = true)]
async fn test_vetting_roles_respect_categories() {
    let store = InMemoryStore::new();
    let catalog = serde_json::json!({
        "assigned_roles": { "domicile": { "north": 11, "south": 12 } },
        "authorized_roles": { "vetter": 50 },
        "assignable_roles": { "vetter": ["north", "south"] }
    });
    store
        .put_raw(DocumentKey::VettingRoles, serde_json::to_vec(&catalog).unwrap())
        .await;
    let h = harness_with(store).await;
    add_member(&h.directory, APPLICANT, &[TEMPORARY]).await;

    let north = [RoleSelection::new("domicile", "north")];
    let applied = h.engine.assign_vetting_roles(APPLICANT, &north).await.unwrap();
    assert_eq!(applied, vec![RoleId::new(11)]);

    let err = h
        .engine
        .assign_vetting_roles(APPLICANT, &[RoleSelection::new("domicile", "south")])
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::CategoryConflict { ref category, .. } if category == "domicile"));

    h.engine
        .remove_vetting_roles(APPLICANT, &north)
        .await
        .unwrap();
    assert_eq!(
        roles_of(&h.directory, APPLICANT).await,
        BTreeSet::from([TEMPORARY])
    );
}

#[tokio::test]
async fn test_custom_roles_round_trip() {
    let h = harness().await;
    h.engine
        .configure_custom_role("chess, go", RoleAction::Add)
        .await
        .unwrap();
    h.engine
        .update_custom_role_membership(APPLICANT, "chess", RoleAction::Add)
        .await
        .unwrap();
    assert_eq!(
        h.engine.custom_role_members("chess").await.unwrap(),
        vec![APPLICANT]
    );

    let err = h
        .engine
        .update_custom_role_membership(APPLICANT, "poker", RoleAction::Add)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::UnknownRole(_)));
}

impl Harness {
    fn clock_now(&self) -> chrono::DateTime<Utc> {
        use warden_engine::Clock;
        self.clock.now()
    }
}
