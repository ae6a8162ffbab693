//! Dispatcher tests: chat in, bus out, worker events back to chat

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use deploybot::bus::channels::Channel;
use deploybot::bus::envelope::Envelope;
use deploybot::bus::memory::MemoryBus;
use deploybot::bus::Bus;
use deploybot::chat::ChatPayload;
use deploybot::dispatch::Dispatcher;
use deploybot::models::message::ChatMessage;
use deploybot::models::notice::Notice;
use deploybot::models::request::Verbosity;
use deploybot::parse::Statements;
use deploybot::pool::availability::Availability;
use deploybot::pool::supervisor::WorkerExit;
use deploybot::pool::{PoolEntry, WorkerPool};
use deploybot::worker::config::WorkerConfig;
use deploybot::worker::{Worker, WorkerIdentity};
use tokio::sync::oneshot;

use crate::support::{deploy_request, next_envelope, FakeEngine, FakeRepo, FakeToolchain, RecordingChat};

struct Setup {
    bus: Arc<MemoryBus>,
    pool: Arc<WorkerPool>,
    chat: Arc<RecordingChat>,
    dispatcher: Dispatcher,
}

fn setup() -> Setup {
    let bus = Arc::new(MemoryBus::new());
    let pool = Arc::new(WorkerPool::new(
        bus.clone(),
        vec![PoolEntry {
            name: "w1".to_string(),
            directory: PathBuf::from("/srv/deploy/w1"),
        }],
    ));
    let chat = Arc::new(RecordingChat::default());
    let dispatcher = Dispatcher::new(
        Statements::builtin().unwrap(),
        pool.clone(),
        chat.clone(),
        WorkerConfig::default(),
        Some("B1".to_string()),
    );
    Setup {
        bus,
        pool,
        chat,
        dispatcher,
    }
}

fn message(text: &str) -> ChatMessage {
    ChatMessage::new("C1", "U1", text)
}

#[tokio::test]
async fn test_unknown_sentence_gets_one_reply() {
    let s = setup();
    s.dispatcher
        .handle_chat_message(message("<@B1>: make me a sandwich"))
        .await
        .unwrap();

    assert_eq!(s.chat.lines("C1"), vec!["<@U1>: Sorry, I don't understand."]);
}

#[tokio::test]
async fn test_messages_not_for_the_bot_are_ignored() {
    let s = setup();
    s.dispatcher
        .handle_chat_message(message("deploy shaka from master branch to dev"))
        .await
        .unwrap();
    s.dispatcher
        .handle_chat_message(message("<@U9>: deploy shaka from master branch to dev"))
        .await
        .unwrap();

    assert!(s.chat.sent().is_empty());
}

#[tokio::test]
async fn test_busy_pool_is_answered_not_queued() {
    let s = setup();
    let mut w1 = s.bus.subscribe(&[Channel::worker("w1")]).await.unwrap();

    s.dispatcher
        .handle_chat_message(message("<@B1>: deploy shaka from master branch to dev"))
        .await
        .unwrap();

    assert_eq!(
        s.chat.lines("C1"),
        vec!["<@U1>: Sorry, all the workers are busy..."]
    );
    assert!(w1.try_recv().is_none());
}

#[tokio::test]
async fn test_connect_registers_and_sends_config() {
    let s = setup();
    let mut w1 = s.bus.subscribe(&[Channel::worker("w1")]).await.unwrap();

    s.dispatcher
        .handle_master_message(Envelope::Connect {
            name: "w1".to_string(),
        })
        .await
        .unwrap();

    assert_eq!(s.pool.availability("w1"), Some(Availability::Ready));
    assert_eq!(
        next_envelope(&mut w1).await,
        Envelope::Config {
            config: WorkerConfig::default()
        }
    );
}

#[tokio::test]
async fn test_parsed_request_goes_to_the_worker_with_its_origin() {
    let s = setup();
    let mut w1 = s.bus.subscribe(&[Channel::worker("w1")]).await.unwrap();
    s.pool.observe(&Envelope::Connect {
        name: "w1".to_string(),
    });

    s.dispatcher
        .handle_chat_message(message(
            "<@B1>: deploy shaka from carlos/tasks branch to staging,dev verbosely",
        ))
        .await
        .unwrap();

    let request = next_envelope(&mut w1).await.into_request().unwrap();
    assert_eq!(request.branch(), Some("carlos/tasks"));
    assert_eq!(request.sites(), ["staging", "dev"]);
    assert_eq!(request.verbosity(), Verbosity::Verbose);
    assert_eq!(request.reply_channel(), Some("C1"));
    assert_eq!(request.requester(), Some("U1"));
    assert_eq!(s.pool.availability("w1"), Some(Availability::Busy));
    assert!(s.chat.sent().is_empty());
}

#[tokio::test]
async fn test_worker_events_are_relayed_to_the_requester() {
    let s = setup();
    let request = deploy_request("master", &["dev"], Verbosity::Normal);

    s.dispatcher
        .handle_master_message(Envelope::Progress {
            name: "w1".to_string(),
            message: Notice::text("Fetching tags..."),
            current_request: Some(request.clone()),
        })
        .await
        .unwrap();
    s.dispatcher
        .handle_master_message(Envelope::Error {
            name: "w1".to_string(),
            message: "git pull failed".to_string(),
            current_request: Some(request.clone()),
        })
        .await
        .unwrap();
    s.dispatcher
        .handle_master_message(Envelope::Ready {
            name: "w1".to_string(),
            current_request: Some(request),
        })
        .await
        .unwrap();

    assert_eq!(
        s.chat.lines("C1"),
        vec![
            "<@U1>: Fetching tags...",
            "<@U1>: ```\ngit pull failed\n```",
            "<@U1>: The deploy worker w1 is ready.",
        ]
    );
}

#[tokio::test]
async fn test_events_without_origin_are_not_relayed() {
    let s = setup();
    s.dispatcher
        .handle_master_message(Envelope::Ready {
            name: "w1".to_string(),
            current_request: None,
        })
        .await
        .unwrap();
    s.dispatcher
        .handle_master_message(Envelope::Error {
            name: "w1".to_string(),
            message: "unknown command `logs`".to_string(),
            current_request: None,
        })
        .await
        .unwrap();

    assert!(s.chat.sent().is_empty());
}

#[tokio::test]
async fn test_dead_worker_is_reported() {
    let s = setup();
    let request = deploy_request("master", &["dev"], Verbosity::Normal);
    s.dispatcher
        .handle_worker_exit(WorkerExit {
            name: "w1".to_string(),
            status: "exit status: 137".to_string(),
            request: Some(request),
        })
        .await
        .unwrap();

    let lines = s.chat.lines("C1");
    assert_eq!(lines.len(), 1);
    assert!(lines[0].starts_with("<@U1>: The deploy worker w1 stopped (exit status: 137)"));
}

#[tokio::test]
async fn test_reload_broadcasts_config() {
    let s = setup();
    let mut all = s.bus.subscribe(&[Channel::Broadcast]).await.unwrap();

    let mut config = WorkerConfig::default();
    config.deploy.base_branch = "main".to_string();
    s.dispatcher.reload_config(config.clone()).await.unwrap();

    assert_eq!(next_envelope(&mut all).await, Envelope::Config { config });
}

#[tokio::test]
async fn test_chat_to_worker_and_back() {
    let s = setup();
    let mut master = s.bus.subscribe(&[Channel::Master]).await.unwrap();

    let worker = Worker::new(
        WorkerIdentity::new("w1", "/srv/deploy/w1"),
        s.bus.clone(),
        Arc::new(FakeToolchain::new(
            FakeRepo::default(),
            Arc::new(FakeEngine::default()),
        )),
    );
    let (stop, stopped) = oneshot::channel::<()>();
    let handle = tokio::spawn(worker.run(async move {
        let _ = stopped.await;
    }));

    let mut sent_command = false;
    let finished = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let envelope = next_envelope(&mut master).await;
            let job_ready = matches!(
                &envelope,
                Envelope::Ready {
                    current_request: Some(_),
                    ..
                }
            );
            let worker_ready = matches!(&envelope, Envelope::Ready { .. });
            s.dispatcher.handle_master_message(envelope).await.unwrap();

            if job_ready {
                break;
            }
            if worker_ready && !sent_command {
                sent_command = true;
                s.dispatcher
                    .handle_chat_message(message("<@B1> deploy shaka from feature/x branch to dev"))
                    .await
                    .unwrap();
            }
        }
    })
    .await;
    assert!(finished.is_ok());

    let sent = s.chat.sent();
    let summary = sent.iter().find_map(|(_, payload)| match payload {
        ChatPayload::Structured {
            notice: Notice::Summary { summary },
            ..
        } => Some(summary.clone()),
        _ => None,
    });
    let summary = summary.expect("no summary relayed");
    assert!(summary.succeeded());
    assert_eq!(summary.branch.as_deref(), Some("feature/x"));

    let lines = s.chat.lines("C1");
    assert_eq!(lines.first().map(String::as_str), Some("<@U1>: OK, checking out branch feature/x ..."));
    assert_eq!(lines.last().map(String::as_str), Some("<@U1>: The deploy worker w1 is ready."));
    assert_eq!(s.pool.availability("w1"), Some(Availability::Ready));

    let _ = stop.send(());
    handle.await.unwrap().unwrap();

    // Requests carry their origin all the way back
    assert!(sent.iter().all(|(channel, _)| channel == "C1"));
}

#[tokio::test]
async fn test_config_ack_does_not_release_a_routed_job() {
    let s = setup();
    let mut master = s.bus.subscribe(&[Channel::Master]).await.unwrap();

    let worker = Worker::new(
        WorkerIdentity::new("w1", "/srv/deploy/w1"),
        s.bus.clone(),
        Arc::new(FakeToolchain::new(
            FakeRepo::default(),
            Arc::new(FakeEngine::default()),
        )),
    );
    let (stop, stopped) = oneshot::channel::<()>();
    let handle = tokio::spawn(worker.run(async move {
        let _ = stopped.await;
    }));

    // Connect sends the config, the command is routed before the worker acks it
    let connect = next_envelope(&mut master).await;
    s.dispatcher.handle_master_message(connect).await.unwrap();
    s.dispatcher
        .handle_chat_message(message("<@B1>: deploy shaka from feature/x branch to dev"))
        .await
        .unwrap();
    assert_eq!(s.pool.availability("w1"), Some(Availability::Busy));

    let ack = next_envelope(&mut master).await;
    assert_eq!(
        ack,
        Envelope::Ready {
            name: "w1".to_string(),
            current_request: None,
        }
    );
    s.dispatcher.handle_master_message(ack).await.unwrap();
    assert_eq!(s.pool.availability("w1"), Some(Availability::Busy));
    assert!(s.chat.sent().is_empty());

    s.dispatcher
        .handle_chat_message(message("<@B1>: deploy shaka from master branch to dev"))
        .await
        .unwrap();
    assert_eq!(
        s.chat.lines("C1"),
        vec!["<@U1>: Sorry, all the workers are busy..."]
    );

    loop {
        let envelope = next_envelope(&mut master).await;
        let job_ready = matches!(
            &envelope,
            Envelope::Ready {
                current_request: Some(_),
                ..
            }
        );
        s.dispatcher.handle_master_message(envelope).await.unwrap();
        if job_ready {
            break;
        }
    }
    assert_eq!(s.pool.availability("w1"), Some(Availability::Ready));

    let lines = s.chat.lines("C1");
    let ready_notices: Vec<_> = lines.iter().filter(|l| l.ends_with("is ready.")).collect();
    assert_eq!(ready_notices.len(), 1);
    assert_eq!(lines.last().map(String::as_str), Some("<@U1>: The deploy worker w1 is ready."));

    let _ = stop.send(());
    handle.await.unwrap().unwrap();
}
