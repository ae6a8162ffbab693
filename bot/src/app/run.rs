//! Master and worker run loops

use std::future::Future;
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::app::options::{AppOptions, LifecycleOptions, WorkerOptions};
use crate::bus::channels::Channel;
use crate::bus::memory::MemoryBus;
use crate::bus::mqtt::MqttBus;
use crate::bus::Bus;
use crate::chat::console::ConsoleChat;
use crate::chat::slack::{SlackClient, SlackOptions};
use crate::chat::ChatClient;
use crate::deploy::SystemToolchain;
use crate::dispatch::Dispatcher;
use crate::errors::BotError;
use crate::filesys::file::File;
use crate::models::message::ChatMessage;
use crate::parse::Statements;
use crate::pool::supervisor::{supervise, Supervised};
use crate::pool::{ForkOptions, WorkerPool};
use crate::storage::settings::{read_secret, BusKind, ChatKind, Settings};
use crate::worker::{Worker, WorkerIdentity};

/// Run the master: chat in, jobs out to the worker pool
pub async fn run_master(
    options: AppOptions,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<(), BotError> {
    info!("Initializing deploy bot master...");

    let (shutdown_tx, _shutdown_rx): (broadcast::Sender<()>, _) = broadcast::channel(1);
    let mut shutdown_manager = ShutdownManager::new(shutdown_tx.clone(), options.lifecycle.clone());

    let result = serve_master(&options, &shutdown_tx, &mut shutdown_manager, shutdown_signal).await;
    if let Err(e) = &result {
        error!("Master stopped: {}", e);
    }

    drop(shutdown_tx);
    shutdown_manager.shutdown().await?;
    result
}

async fn serve_master(
    options: &AppOptions,
    shutdown_tx: &broadcast::Sender<()>,
    shutdown_manager: &mut ShutdownManager,
    shutdown_signal: impl Future<Output = ()>,
) -> Result<(), BotError> {
    let settings = &options.settings;
    let bus = init_bus(settings, "master", shutdown_tx, shutdown_manager)?;
    let pool = Arc::new(WorkerPool::new(bus.clone(), settings.pool_entries()));

    // Subscribe before any worker can announce itself
    let mut master = bus.subscribe(&[Channel::Master]).await?;

    let workers = init_workers(settings, options, &pool, shutdown_tx)?;
    let (exit_tx, mut exits) = mpsc::unbounded_channel();
    let supervisor_handle = tokio::spawn(supervise(
        workers,
        pool.table(),
        exit_tx,
        shutdown_future(shutdown_tx),
    ));
    shutdown_manager.with_supervisor_handle(supervisor_handle)?;

    let (messages_tx, mut messages) = mpsc::unbounded_channel();
    let (chat, bot_user_id) = init_chat(settings, messages_tx, shutdown_tx, shutdown_manager).await?;

    let dispatcher = Dispatcher::new(
        Statements::builtin()?,
        pool,
        chat,
        settings.worker.clone(),
        bot_user_id,
    );

    let mut reloads = reload_signals()?;

    info!("Deploy bot is running with {} worker(s)", settings.pool.len());
    tokio::pin!(shutdown_signal);
    loop {
        tokio::select! {
            _ = &mut shutdown_signal => {
                info!("Shutdown signal received, shutting down...");
                return Ok(());
            }
            Some(message) = messages.recv() => {
                if let Err(e) = dispatcher.handle_chat_message(message).await {
                    error!("Failed to handle chat message: {}", e);
                }
            }
            Some(message) = master.recv() => {
                match message.envelope() {
                    Ok(envelope) => {
                        if let Err(e) = dispatcher.handle_master_message(envelope).await {
                            error!("Failed to handle worker event: {}", e);
                        }
                    }
                    Err(e) => warn!("Dropping master channel message: {}", e),
                }
            }
            Some(exit) = exits.recv() => {
                if let Err(e) = dispatcher.handle_worker_exit(exit).await {
                    error!("Failed to report worker exit: {}", e);
                }
            }
            Some(()) = reloads.recv() => {
                info!("Reloading {}", options.settings_path.display());
                match Settings::load(&File::new(&options.settings_path)).await {
                    Ok(settings) => {
                        if let Err(e) = dispatcher.reload_config(settings.worker).await {
                            error!("Failed to broadcast configuration: {}", e);
                        }
                    }
                    Err(e) => error!("Keeping the current configuration: {}", e),
                }
            }
        }
    }
}

/// Run one worker process bound to its working copy
pub async fn run_worker(
    options: WorkerOptions,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<(), BotError> {
    info!("Initializing worker {}...", options.identity.name);

    let (shutdown_tx, _shutdown_rx): (broadcast::Sender<()>, _) = broadcast::channel(1);
    let mut shutdown_manager = ShutdownManager::new(shutdown_tx.clone(), options.lifecycle.clone());

    if options.settings.bus.kind == BusKind::Memory {
        return Err(BotError::ConfigError(
            "worker processes need the mqtt bus; memory bus workers run inside the master".to_string(),
        ));
    }

    let client_id = format!("worker-{}", options.identity.name);
    let result = match init_bus(&options.settings, &client_id, &shutdown_tx, &mut shutdown_manager) {
        Ok(bus) => {
            Worker::new(options.identity, bus, Arc::new(SystemToolchain))
                .run(shutdown_signal)
                .await
        }
        Err(e) => Err(e),
    };

    drop(shutdown_tx);
    shutdown_manager.shutdown().await?;
    result
}

// =============================== INITIALIZATION ================================== //

fn shutdown_future(shutdown_tx: &broadcast::Sender<()>) -> impl Future<Output = ()> + Send + 'static {
    let mut shutdown_rx = shutdown_tx.subscribe();
    async move {
        let _ = shutdown_rx.recv().await;
    }
}

fn init_bus(
    settings: &Settings,
    role: &str,
    shutdown_tx: &broadcast::Sender<()>,
    shutdown_manager: &mut ShutdownManager,
) -> Result<Arc<dyn Bus>, BotError> {
    match settings.bus.kind {
        BusKind::Memory => {
            info!("Using the in-process bus");
            Ok(Arc::new(MemoryBus::new()))
        }
        BusKind::Mqtt => {
            let address = settings.bus.mqtt_address()?;
            info!("Connecting to MQTT broker {}:{}", address.host, address.port);
            let client_id = format!("{}-{}", settings.bus.topic_prefix, role);
            let (bus, event_loop) = MqttBus::new(&address, &client_id, settings.bus.topics())?;
            let handle = tokio::spawn(event_loop.run(shutdown_future(shutdown_tx)));
            shutdown_manager.with_bus_handle(handle)?;
            Ok(Arc::new(bus))
        }
    }
}

fn init_workers(
    settings: &Settings,
    options: &AppOptions,
    pool: &WorkerPool,
    shutdown_tx: &broadcast::Sender<()>,
) -> Result<Vec<Supervised>, BotError> {
    match settings.bus.kind {
        BusKind::Memory => {
            info!("Starting {} in-process worker(s)...", pool.entries().len());
            let toolchain = Arc::new(SystemToolchain);
            Ok(pool
                .entries()
                .iter()
                .map(|entry| {
                    let identity = WorkerIdentity::new(&entry.name, &entry.directory);
                    let worker = Worker::new(identity, pool.bus(), toolchain.clone());
                    let handle = tokio::spawn(worker.run(shutdown_future(shutdown_tx)));
                    Supervised::task(&entry.name, handle)
                })
                .collect())
        }
        BusKind::Mqtt => {
            info!("Forking {} worker process(es)...", pool.entries().len());
            let fork_options = ForkOptions::current_exe(Some(options.settings_path.clone()))?;
            Ok(pool
                .fork(&fork_options)?
                .into_iter()
                .map(Supervised::process)
                .collect())
        }
    }
}

async fn init_chat(
    settings: &Settings,
    messages: mpsc::UnboundedSender<ChatMessage>,
    shutdown_tx: &broadcast::Sender<()>,
    shutdown_manager: &mut ShutdownManager,
) -> Result<(Arc<dyn ChatClient>, Option<String>), BotError> {
    match settings.chat.kind {
        ChatKind::Slack => {
            info!("Initializing Slack adapter...");
            let mut slack_options = SlackOptions::new(
                read_secret(&settings.chat.bot_token_env)?,
                read_secret(&settings.chat.app_token_env)?,
            );
            slack_options.api_base_url = settings.chat.api_base_url.clone();

            let slack = Arc::new(SlackClient::new(slack_options)?);
            let bot_user_id = slack.identify().await?;

            let listener = slack.clone();
            let shutdown = shutdown_future(shutdown_tx);
            let handle = tokio::spawn(async move {
                listener.listen(messages, shutdown).await;
            });
            shutdown_manager.with_chat_handle(handle)?;
            let chat: Arc<dyn ChatClient> = slack;
            Ok((chat, Some(bot_user_id)))
        }
        ChatKind::Console => {
            info!("Initializing console adapter, type commands on stdin");
            let console = Arc::new(ConsoleChat::new());

            let listener = console.clone();
            let shutdown = shutdown_future(shutdown_tx);
            let handle = tokio::spawn(async move {
                listener.listen(messages, shutdown).await;
            });
            shutdown_manager.with_chat_handle(handle)?;
            let chat: Arc<dyn ChatClient> = console;
            Ok((chat, None))
        }
    }
}

/// One unit per SIGHUP
fn reload_signals() -> Result<mpsc::UnboundedReceiver<()>, BotError> {
    let (tx, rx) = mpsc::unbounded_channel();

    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sighup = signal(SignalKind::hangup())?;
        tokio::spawn(async move {
            while sighup.recv().await.is_some() {
                if tx.send(()).is_err() {
                    break;
                }
            }
        });
    }

    #[cfg(not(unix))]
    drop(tx);

    Ok(rx)
}

// =============================== SHUTDOWN ================================== //

pub struct ShutdownManager {
    shutdown_tx: broadcast::Sender<()>,
    lifecycle_options: LifecycleOptions,
    chat_handle: Option<JoinHandle<()>>,
    supervisor_handle: Option<JoinHandle<()>>,
    bus_handle: Option<JoinHandle<()>>,
}

impl ShutdownManager {
    pub fn new(shutdown_tx: broadcast::Sender<()>, lifecycle_options: LifecycleOptions) -> Self {
        Self {
            shutdown_tx,
            lifecycle_options,
            chat_handle: None,
            supervisor_handle: None,
            bus_handle: None,
        }
    }

    pub fn with_chat_handle(&mut self, handle: JoinHandle<()>) -> Result<(), BotError> {
        if self.chat_handle.is_some() {
            return Err(BotError::ShutdownError("chat_handle already set".to_string()));
        }
        self.chat_handle = Some(handle);
        Ok(())
    }

    pub fn with_supervisor_handle(&mut self, handle: JoinHandle<()>) -> Result<(), BotError> {
        if self.supervisor_handle.is_some() {
            return Err(BotError::ShutdownError("supervisor_handle already set".to_string()));
        }
        self.supervisor_handle = Some(handle);
        Ok(())
    }

    pub fn with_bus_handle(&mut self, handle: JoinHandle<()>) -> Result<(), BotError> {
        if self.bus_handle.is_some() {
            return Err(BotError::ShutdownError("bus_handle already set".to_string()));
        }
        self.bus_handle = Some(handle);
        Ok(())
    }

    pub async fn shutdown(&mut self) -> Result<(), BotError> {
        let _ = self.shutdown_tx.send(());

        match tokio::time::timeout(
            self.lifecycle_options.max_shutdown_delay,
            self.shutdown_impl(),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => {
                error!(
                    "Shutdown timed out after {:?}, forcing shutdown...",
                    self.lifecycle_options.max_shutdown_delay
                );
                std::process::exit(1);
            }
        }
    }

    async fn shutdown_impl(&mut self) -> Result<(), BotError> {
        info!("Shutting down...");

        // 1. Chat listener, no new commands
        if let Some(handle) = self.chat_handle.take() {
            handle.await.map_err(|e| BotError::ShutdownError(e.to_string()))?;
        }

        // 2. Supervisor, drops forked worker processes
        if let Some(handle) = self.supervisor_handle.take() {
            handle.await.map_err(|e| BotError::ShutdownError(e.to_string()))?;
        }

        // 3. Bus connection
        if let Some(handle) = self.bus_handle.take() {
            handle.await.map_err(|e| BotError::ShutdownError(e.to_string()))?;
        }

        info!("Shutdown complete");
        Ok(())
    }
}
