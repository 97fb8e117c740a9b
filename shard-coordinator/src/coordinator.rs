//! The coordinator: registration barrier, then one statement at a time.
//!
//! Two endpoints feed it. The client endpoint carries statements and
//! `!`-commands from interactive shells; the controller endpoint carries
//! worker registrations at startup and worker responses afterwards. All
//! routing state (catalog, node list, session toggles) is owned by the single
//! task running [`Coordinator::run_until`], so statements are processed
//! strictly in arrival order and no locking is needed around the catalog.

use std::{future::Future, sync::Arc, time::Instant};

use anyhow::Result;
use tokio::select;
use tracing::{debug, error, info, warn};

use crate::{
    catalog::Catalog,
    cluster::{JobId, ResourceManager},
    config::DbKind,
    error::ProtocolError,
    fanout::{Completion, PendingFanOut},
    materialize::{GatherRequest, Materializer},
    meta::{CMD_USAGE, HELP, MetaCommand, SYNTAX, TOGGLE_USAGE, parse_meta},
    parser::{select_fragment, table_fragment, where_fragment},
    partition::NodeId,
    protocol::{NodeResponse, Registration},
    router::{self, Substatement},
    session::{Endpoint, SessionEvent},
};

pub const NO_OUTPUT_BLOCKS: &str =
    "ERROR Select query identified but no nodes returned output blocks";

/// Sent in place of an empty result so the client always gets a line back.
pub const NO_ROWS: &str = "(no rows)";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Exit,
}

pub struct Coordinator<M, R> {
    clients: Endpoint,
    controller: Endpoint,
    catalog: Catalog,
    nodes: Vec<NodeId>,
    controller_info: Option<(String, u16)>,
    db: DbKind,
    parallel: bool,
    timing: bool,
    materializer: M,
    manager: Arc<R>,
    job: Option<JobId>,
}

impl<M, R> Coordinator<M, R>
where
    M: Materializer,
    R: ResourceManager,
{
    pub fn new(
        clients: Endpoint,
        controller: Endpoint,
        catalog: Catalog,
        db: DbKind,
        materializer: M,
        manager: Arc<R>,
    ) -> Self {
        Self {
            clients,
            controller,
            catalog,
            nodes: Vec::new(),
            controller_info: None,
            db,
            parallel: true,
            timing: false,
            materializer,
            manager,
            job: None,
        }
    }

    /// The job `!exit` should kill.
    pub fn with_job(mut self, job: JobId) -> Self {
        self.job = Some(job);
        self
    }

    pub fn nodes(&self) -> &[NodeId] {
        &self.nodes
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn controller_info(&self) -> Option<(&str, u16)> {
        self.controller_info.as_ref().map(|(host, port)| (host.as_str(), *port))
    }

    /// Waits for the controller plus `expected_workers` worker registrations.
    ///
    /// Any malformed or unexpected message is fatal; the caller is expected to
    /// [`shutdown`](Self::shutdown) and exit.
    pub async fn register(&mut self, expected_workers: usize) -> Result<(), ProtocolError> {
        let expected = expected_workers + 1;
        let mut registered = 0;
        info!(expected, "waiting for registrations");

        while registered < expected {
            let event = self.controller.recv().await.ok_or(ProtocolError::ChannelClosed)?;
            let (peer, text) = match event {
                SessionEvent::Message { peer, text } => (peer, text),
                SessionEvent::Closed { peer } => {
                    warn!(peer, "peer disconnected during registration");
                    continue;
                }
            };

            match Registration::parse(&text)? {
                Registration::Controller { host, port } => {
                    self.controller.register_controller(peer).await;
                    info!(%host, port, "controller registered");
                    self.controller_info = Some((host, port));
                }
                Registration::Worker { host, port } => {
                    self.controller.register_node(&host, peer).await;
                    info!(node = %host, port, "node registered");
                    if !self.nodes.contains(&host) {
                        self.nodes.push(host);
                    }
                }
            }
            registered += 1;
        }

        info!(nodes = ?self.nodes, "registration complete");
        Ok(())
    }

    /// Serves client statements until `shutdown` resolves, `!exit` is received
    /// or the client endpoint is closed.
    pub async fn run_until<F>(&mut self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        tokio::pin!(shutdown);

        loop {
            select! {
                _ = &mut shutdown => {
                    info!("coordinator shutting down");
                    self.shutdown().await;
                    break;
                }
                event = self.clients.recv() => {
                    match event {
                        Some(SessionEvent::Message { peer, text }) => {
                            info!(peer, query = %text, "client request");
                            if self.handle_client_line(&text).await == Flow::Exit {
                                break;
                            }
                        }
                        Some(SessionEvent::Closed { peer }) => debug!(peer, "client disconnected"),
                        None => break,
                    }
                }
            }
        }

        Ok(())
    }

    /// Closes both endpoints and kills the worker job.
    pub async fn shutdown(&mut self) {
        self.clients.close().await;
        self.controller.close().await;
        if let Some(job) = self.job.take() {
            if let Err(err) = self.manager.kill_job(job).await {
                warn!(%job, error = %err, "failed to kill job");
            }
        }
    }

    async fn handle_client_line(&mut self, text: &str) -> Flow {
        if let Some(command) = parse_meta(text) {
            return self.handle_meta(command).await;
        }

        let started = Instant::now();
        if self.execute(text).await && self.timing {
            let elapsed = started.elapsed().as_secs_f64();
            self.respond(&format!("Elapsed time: {elapsed:.3} sec")).await;
        }
        Flow::Continue
    }

    async fn handle_meta(&mut self, command: MetaCommand) -> Flow {
        let reply = match command {
            MetaCommand::Help => HELP.to_string(),
            MetaCommand::Syntax => SYNTAX.to_string(),
            MetaCommand::Nodes if self.nodes.is_empty() => "No nodes registered".to_string(),
            MetaCommand::Nodes => self.nodes.join(", "),
            MetaCommand::Partitions => self.catalog.explain(),
            MetaCommand::Cmd { node: None, .. } => CMD_USAGE.to_string(),
            MetaCommand::Cmd { node: Some(node), .. } if !self.nodes.contains(&node) => {
                format!("ERROR: UnknownNode: '{node}' is not a registered node")
            }
            MetaCommand::Cmd { message, .. } if message.is_empty() => CMD_USAGE.to_string(),
            MetaCommand::Cmd {
                node: Some(node),
                message,
            } => {
                format!("Direct node commands are not supported (node: {node}, msg: {message})")
            }
            MetaCommand::Parallel(Some(on)) => {
                self.parallel = on;
                format!("Parallel processing {}", if on { "enabled" } else { "disabled" })
            }
            MetaCommand::Timing(Some(on)) => {
                self.timing = on;
                format!("Timing {}", if on { "enabled" } else { "disabled" })
            }
            MetaCommand::Parallel(None) | MetaCommand::Timing(None) => TOGGLE_USAGE.to_string(),
            MetaCommand::Exit => {
                info!("exit requested by client");
                self.respond("Exiting").await;
                self.shutdown().await;
                return Flow::Exit;
            }
            MetaCommand::Unknown(command) => {
                format!("Unknown command '{command}', use !help to list the commands")
            }
        };
        self.respond(&reply).await;
        Flow::Continue
    }

    /// Runs one statement end to end. Returns false if it never reached a node.
    async fn execute(&mut self, text: &str) -> bool {
        let plan = match router::route(&mut self.catalog, &self.nodes, text) {
            Ok(plan) => plan,
            Err(err) => {
                warn!(error = %err, "statement rejected");
                self.respond(&err.client_line()).await;
                return false;
            }
        };
        info!(
            table = %plan.table,
            nodes = ?plan.nodes().collect::<Vec<_>>(),
            parallel = self.parallel,
            "dispatching"
        );

        let is_select = !select_fragment(text).is_empty();
        let mut fanout = PendingFanOut::new(plan, is_select);
        self.dispatch(&mut fanout).await;

        match fanout.finish() {
            Completion::Materialize(blocks) => self.materialize(text, blocks).await,
            Completion::NoOutput => self.respond(NO_OUTPUT_BLOCKS).await,
            Completion::Done => {}
        }
        true
    }

    /// Sends every substatement and waits until each node has settled.
    ///
    /// Parallel mode keeps all substatements in flight at once; serial mode
    /// waits for each node before sending to the next.
    async fn dispatch(&mut self, fanout: &mut PendingFanOut) {
        let window = if self.parallel { usize::MAX } else { 1 };

        loop {
            while fanout.in_flight_count() < window {
                let Some(substatement) = fanout.next_dispatch() else {
                    break;
                };
                self.forward(fanout, substatement).await;
            }

            if !fanout.has_in_flight() {
                break;
            }
            self.await_response(fanout).await;
        }
        debug_assert!(fanout.is_complete());
    }

    async fn forward(&mut self, fanout: &mut PendingFanOut, substatement: Substatement) {
        let Substatement { node, text } = substatement;
        debug!(%node, %text, "forwarding");
        match self.controller.send_named(&node, &text).await {
            Ok(()) => fanout.mark_sent(&node),
            Err(err) => {
                warn!(%node, error = %err, "forward failed");
                let line = fanout.fail(&node, err);
                self.respond(&line).await;
            }
        }
    }

    async fn await_response(&mut self, fanout: &mut PendingFanOut) {
        let Some(event) = self.controller.recv().await else {
            let stranded: Vec<String> = fanout.in_flight().map(str::to_string).collect();
            for node in stranded {
                let line = fanout.fail(&node, "controller endpoint closed");
                self.respond(&line).await;
            }
            return;
        };

        match event {
            SessionEvent::Closed { peer } => {
                let Some(node) = self.controller.peer_name(peer).await else {
                    debug!(peer, "unregistered peer disconnected");
                    return;
                };
                if fanout.is_in_flight(&node) {
                    warn!(%node, "node disconnected with a substatement in flight");
                    let line = fanout.fail(&node, "session closed");
                    self.respond(&line).await;
                } else {
                    warn!(%node, "node disconnected");
                }
            }
            SessionEvent::Message { peer, text } => {
                let Some(node) = self.controller.peer_name(peer).await else {
                    warn!(peer, %text, "response from unregistered peer discarded");
                    return;
                };
                if !fanout.is_in_flight(&node) {
                    warn!(%node, %text, "response with nothing in flight discarded");
                    return;
                }

                debug!(%node, response = %text, "node responded");
                let line = match NodeResponse::parse(&text) {
                    Ok(response) => fanout.settle(&node, response),
                    Err(err) => {
                        error!(%node, error = %err, "bad node response");
                        Some(fanout.reject(&node, format!("ERROR: {err}")))
                    }
                };
                if let Some(line) = line {
                    self.respond(&line).await;
                }
            }
        }
    }

    async fn materialize(&mut self, text: &str, blocks: Vec<String>) {
        let where_clause = match where_fragment(text) {
            w if w.is_empty() => w,
            w => format!("where {w}"),
        };
        let request = GatherRequest {
            db: self.db,
            blocks,
            select: format!("select {}", select_fragment(text)),
            table: table_fragment(text),
            where_clause,
        };

        match self.materializer.gather(request).await {
            Ok(output) if output.trim().is_empty() => self.respond(NO_ROWS).await,
            Ok(output) => self.respond(&output).await,
            Err(err) => {
                error!(error = ?err, "materialization failed");
                self.respond(&format!("ERROR: {err:#}")).await;
            }
        }
    }

    async fn respond(&self, text: &str) {
        if let Err(err) = self.clients.reply(text).await {
            warn!(error = %err, "failed to reply to client");
        }
    }
}
