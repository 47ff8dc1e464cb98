use std::time::{Duration, Instant};

use tokio::{task::JoinHandle, time::timeout};
use uploadgrid_core::{
    BatchSummary, CoreError, LocalId, ObjectUrlPreviews, RawFile, SessionConfig, SessionPhase,
    UploadStatus,
};
use uploadgrid_session::{
    SessionError, SessionHandle, SessionView,
    sim::{SimulatedTransport, SimulationConfig},
    spawn_session,
};

#[tokio::test]
async fn uploads_finalize_in_dragged_order() {
    let (session, _task) = start(fast_config(), fast_sim());

    let report = session
        .add_files(vec![png("A.png", 40), png("B.png", 40), png("C.png", 40)])
        .await
        .expect("add files");
    assert_eq!(report.accepted.len(), 3);
    assert!(session.reorder(2, Some(0)).await.expect("reorder"));

    let view = wait(&session, |view| view.can_create).await;
    assert_eq!(names(&view), ["C.png", "A.png", "B.png"]);
    assert_eq!(view.phase, SessionPhase::Idle);

    let finalized = session.finalize().await.expect("finalize");
    let ordered: Vec<(usize, &str)> = finalized
        .iter()
        .map(|item| (item.order_index, item.display_name.as_str()))
        .collect();
    assert_eq!(ordered, [(0, "C.png"), (1, "A.png"), (2, "B.png")]);
    assert!(finalized
        .iter()
        .all(|item| item.storage_url.as_str().starts_with("https://uploads.example/files/")));
}

#[tokio::test]
async fn failed_upload_blocks_creation_until_retried() {
    let (session, _task) = start(fast_config(), fast_sim().failing("A.png", 1));

    let ids = session
        .add_files(vec![png("A.png", 100), png("B.png", 100)])
        .await
        .expect("add files")
        .accepted;

    let view = wait(&session, SessionView::is_settled).await;
    assert_eq!(view.items[0].status, UploadStatus::Failed);
    assert_eq!(view.items[1].status, UploadStatus::Success);
    assert!(!view.can_create);
    let banner = view.last_error.expect("failure banner");
    assert!(banner.contains("A.png"), "unexpected banner: {banner}");
    assert!(matches!(
        session.finalize().await,
        Err(SessionError::Core(CoreError::NotReady))
    ));

    assert_eq!(session.retry_all().await.expect("retry all"), 1);
    assert!(session.snapshot().last_error.is_none());

    let view = wait(&session, |view| view.can_create).await;
    assert_eq!(names(&view), ["A.png", "B.png"]);
    assert_eq!(view.items[0].local_id, ids[0]);
}

#[tokio::test]
async fn single_retry_reuses_slot_and_display_name() {
    let (session, _task) = start(fast_config(), fast_sim().failing("solo.png", 1));
    let id = session
        .add_files(vec![png("solo.png", 60)])
        .await
        .expect("add files")
        .accepted[0];

    wait(&session, |view| {
        view.items
            .first()
            .is_some_and(|item| item.status == UploadStatus::Failed)
    })
    .await;

    session.retry(id).await.expect("retry");
    let view = session.snapshot();
    assert_eq!(view.items[0].status, UploadStatus::Uploading);
    assert!(view.items[0].error.is_none());

    let view = wait(&session, |view| view.can_create).await;
    assert_eq!(view.items[0].display_name, "solo.png");
    assert_eq!(view.items[0].order_index, 0);
}

#[tokio::test]
async fn fast_upload_is_held_for_min_display() {
    let config = SessionConfig {
        min_display_ms: 300,
        ..fast_config()
    };
    let (session, _task) = start(config, fast_sim());

    let started = Instant::now();
    session
        .add_files(vec![png("quick.png", 20)])
        .await
        .expect("add files");

    let mut updates = session.subscribe();
    let mut saw_full_but_uploading = false;
    loop {
        let view = updates.borrow_and_update().clone();
        if let Some(item) = view.items.first() {
            if item.status == UploadStatus::Success {
                break;
            }
            if item.progress_percent == 100 && item.status == UploadStatus::Uploading {
                saw_full_but_uploading = true;
            }
        }
        timeout(Duration::from_secs(5), updates.changed())
            .await
            .expect("view update in time")
            .expect("session alive");
    }

    assert!(started.elapsed() >= Duration::from_millis(300));
    assert!(saw_full_but_uploading);
}

#[tokio::test]
async fn removing_in_flight_item_discards_it() {
    let slow = SimulationConfig {
        chunk_bytes: 10,
        chunk_delay: Duration::from_millis(20),
        ..SimulationConfig::default()
    };
    let (session, _task) = start(fast_config(), slow);

    let ids = session
        .add_files(vec![png("slow.png", 1000), png("keep.png", 10)])
        .await
        .expect("add files")
        .accepted;
    session.remove_item(ids[0]).await.expect("remove");

    let view = wait(&session, |view| view.can_create).await;
    assert_eq!(names(&view), ["keep.png"]);
    assert_eq!(view.items[0].order_index, 0);

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(names(&session.snapshot()), ["keep.png"]);
    assert!(matches!(
        session.remove_item(ids[0]).await,
        Err(SessionError::Core(CoreError::UnknownItem(_)))
    ));
}

#[tokio::test]
async fn batch_completion_is_reported() {
    let (session, _task) = start(fast_config(), fast_sim());
    session
        .add_files(vec![png("a.png", 30), png("b.png", 30)])
        .await
        .expect("add files");

    let view = wait(&session, |view| view.last_batch.is_some()).await;
    assert_eq!(
        view.last_batch,
        Some(BatchSummary {
            succeeded: 2,
            failed: 0
        })
    );
}

#[tokio::test]
async fn intake_rejects_never_reach_the_grid() {
    let (session, _task) = start(fast_config(), fast_sim());
    let report = session
        .add_files(vec![
            RawFile::new("notes.txt", "text/plain", b"hello".to_vec()),
            RawFile::new("empty.png", "image/png", Vec::new()),
            png("ok.png", 10),
        ])
        .await
        .expect("add files");

    assert_eq!(report.accepted.len(), 1);
    assert_eq!(report.rejected.len(), 2);
    assert_eq!(names(&session.snapshot()), ["ok.png"]);
}

#[tokio::test]
async fn bad_commands_surface_core_errors() {
    let (session, _task) = start(fast_config(), fast_sim());
    session
        .add_files(vec![png("a.png", 10)])
        .await
        .expect("add files");

    assert!(matches!(
        session.reorder(4, Some(0)).await,
        Err(SessionError::Core(CoreError::IndexOutOfRange { .. }))
    ));
    assert!(!session.reorder(0, None).await.expect("dropped drag"));
    assert!(matches!(
        session.set_item_metadata(LocalId::new(999), "caption", "x").await,
        Err(SessionError::Core(CoreError::UnknownItem(_)))
    ));
}

#[tokio::test]
async fn commands_after_shutdown_report_closed() {
    let (session, task) = start(fast_config(), fast_sim());
    session
        .add_files(vec![png("a.png", 10)])
        .await
        .expect("add files");

    session.shutdown();
    timeout(Duration::from_secs(5), task)
        .await
        .expect("task exits in time")
        .expect("task did not panic");

    assert!(session.snapshot().items.is_empty());
    assert!(matches!(
        session.add_files(vec![png("b.png", 10)]).await,
        Err(SessionError::Closed)
    ));
}

#[tokio::test]
async fn intake_while_uploading_appends_to_dense_order() {
    let slow = SimulationConfig {
        chunk_bytes: 10,
        chunk_delay: Duration::from_millis(20),
        ..SimulationConfig::default()
    };
    let (session, _task) = start(fast_config(), slow);

    session
        .add_files(vec![png("A.png", 200), png("B.png", 200)])
        .await
        .expect("first add");
    assert!(!session.snapshot().is_settled());

    session
        .add_files(vec![png("C.png", 20)])
        .await
        .expect("second add");
    let view = session.snapshot();
    assert!(view.items[0].status.is_in_flight());
    assert_eq!(names(&view), ["A.png", "B.png", "C.png"]);
    let indices: Vec<usize> = view.items.iter().map(|item| item.order_index).collect();
    assert_eq!(indices, [0, 1, 2]);

    wait(&session, |view| view.can_create).await;
    let finalized = session.finalize().await.expect("finalize");
    let ordered: Vec<&str> = finalized
        .iter()
        .map(|item| item.display_name.as_str())
        .collect();
    assert_eq!(ordered, ["A.png", "B.png", "C.png"]);
}

fn start(config: SessionConfig, sim: SimulationConfig) -> (SessionHandle, JoinHandle<()>) {
    spawn_session(
        config,
        |events| SimulatedTransport::new(sim, events),
        ObjectUrlPreviews::new(),
    )
}

fn fast_config() -> SessionConfig {
    SessionConfig {
        min_display_ms: 50,
        retry_stagger_ms: 20,
        ..SessionConfig::default()
    }
}

fn fast_sim() -> SimulationConfig {
    SimulationConfig {
        chunk_bytes: 10,
        chunk_delay: Duration::from_millis(1),
        ..SimulationConfig::default()
    }
}

fn png(name: &str, len: usize) -> RawFile {
    RawFile::new(name, "image/png", vec![0x89_u8; len])
}

fn names(view: &SessionView) -> Vec<String> {
    view.items
        .iter()
        .map(|item| item.display_name.clone())
        .collect()
}

async fn wait(
    session: &SessionHandle,
    predicate: impl FnMut(&SessionView) -> bool,
) -> SessionView {
    timeout(Duration::from_secs(5), session.wait_until(predicate))
        .await
        .expect("condition reached in time")
        .expect("session alive")
}
