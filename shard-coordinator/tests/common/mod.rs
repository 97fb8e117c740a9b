#![allow(dead_code)]

use std::{collections::HashMap, net::SocketAddr, path::Path, sync::Arc, time::Duration};

use anyhow::{Context, Result, anyhow, bail};
use shard_coordinator::{
    catalog::Catalog,
    cluster::{JobId, JobSpec, ResourceManager, StaticCluster},
    config::DbKind,
    coordinator::Coordinator,
    materialize::{GatherRequest, Materializer},
    session::Endpoint,
    wire::{read_line_message, write_line_message},
};
use tokio::{
    io::BufReader,
    net::{
        TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    sync::{mpsc, oneshot},
    task::JoinHandle,
    time::timeout,
};

pub const WAIT: Duration = Duration::from_secs(2);

/// Decides what a fake worker answers to a statement; `None` stays silent.
pub type Responder = fn(node: &str, statement: &str) -> Option<String>;

/// SELECTs produce one block named after the node; everything else succeeds.
pub fn standard_responder(node: &str, statement: &str) -> Option<String> {
    if statement.starts_with("select") {
        Some(format!("OUTPUT blk_{node}"))
    } else {
        Some("SUCCESS".to_string())
    }
}

/// Echoes the gather request so tests can see exactly what was asked for.
#[derive(Debug, Clone, Default)]
pub struct EchoMaterializer;

impl Materializer for EchoMaterializer {
    async fn gather(&self, mut request: GatherRequest) -> Result<String> {
        // matches no rows
        if request.where_clause == "where 1 = 0" {
            return Ok(String::new());
        }
        request.blocks.sort();
        Ok(format!(
            "[{}] [{}] [{}] {}",
            request.select,
            request.table,
            request.where_clause,
            request.blocks.join(",")
        ))
    }
}

/// Either side of a newline-framed TCP session.
pub struct LinePeer {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl LinePeer {
    pub async fn connect(addr: SocketAddr) -> Result<Self> {
        let stream = TcpStream::connect(addr)
            .await
            .with_context(|| format!("failed to connect to {addr}"))?;
        let (reader, writer) = stream.into_split();
        Ok(Self {
            reader: BufReader::new(reader),
            writer,
        })
    }

    pub async fn send(&mut self, line: &str) -> Result<()> {
        write_line_message(&mut self.writer, line).await?;
        Ok(())
    }

    pub async fn recv(&mut self) -> Result<String> {
        match timeout(WAIT, read_line_message(&mut self.reader)).await?? {
            Some(line) => Ok(line),
            None => bail!("connection closed while waiting for a line"),
        }
    }

    /// Sends `line` and returns the first line of the reply.
    pub async fn ask(&mut self, line: &str) -> Result<String> {
        self.send(line).await?;
        self.recv().await
    }

    /// Waits for the other side to close the connection.
    pub async fn expect_eof(&mut self) -> Result<()> {
        match timeout(WAIT, read_line_message(&mut self.reader)).await?? {
            None => Ok(()),
            Some(line) => bail!("expected end of stream, got '{line}'"),
        }
    }
}

/// A worker node that registers itself and answers statements with a [`Responder`].
pub struct FakeWorker {
    received: mpsc::UnboundedReceiver<String>,
    outgoing: mpsc::UnboundedSender<String>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl FakeWorker {
    pub async fn spawn(controller: SocketAddr, name: &str, responder: Responder) -> Result<Self> {
        let stream = TcpStream::connect(controller).await?;
        let (reader, mut writer) = stream.into_split();
        write_line_message(&mut writer, &format!("connect {name} 9000")).await?;

        let (outgoing, mut to_send) = mpsc::unbounded_channel::<String>();
        let writer = tokio::spawn(async move {
            while let Some(line) = to_send.recv().await {
                if write_line_message(&mut writer, &line).await.is_err() {
                    break;
                }
            }
        });

        let (tx, received) = mpsc::unbounded_channel();
        let responses = outgoing.clone();
        let name = name.to_string();
        let reader = tokio::spawn(async move {
            let mut reader = BufReader::new(reader);
            while let Ok(Some(statement)) = read_line_message(&mut reader).await {
                let _ = tx.send(statement.clone());
                if let Some(response) = responder(&name, &statement) {
                    if responses.send(response).is_err() {
                        break;
                    }
                }
            }
        });

        Ok(Self {
            received,
            outgoing,
            reader,
            writer,
        })
    }

    pub async fn next_statement(&mut self) -> Result<String> {
        timeout(WAIT, self.received.recv())
            .await?
            .context("worker stopped before receiving a statement")
    }

    /// True if nothing has been sent to this worker since the last check.
    pub fn is_idle(&mut self) -> bool {
        self.received.try_recv().is_err()
    }

    /// Sends `line` to the coordinator as if the worker had produced it.
    pub fn answer(&self, line: &str) -> Result<()> {
        self.outgoing
            .send(line.to_string())
            .map_err(|_| anyhow!("worker connection is gone"))
    }

    pub async fn disconnect(self) {
        self.reader.abort();
        self.writer.abort();
        let _ = self.reader.await;
        let _ = self.writer.await;
    }
}

/// A coordinator on ephemeral ports with fake workers already registered.
pub struct Harness {
    pub client: LinePeer,
    pub workers: HashMap<String, FakeWorker>,
    pub cluster: Arc<StaticCluster>,
    pub job: JobId,
    controller_peer: LinePeer,
    shutdown: Option<oneshot::Sender<()>>,
    server: Option<JoinHandle<Result<()>>>,
}

impl Harness {
    pub async fn start(nodes: &[&str], responder: Responder) -> Result<Self> {
        Self::start_with_catalog(nodes, responder, Catalog::in_memory()).await
    }

    pub async fn start_persistent(
        nodes: &[&str],
        responder: Responder,
        catalog: &Path,
    ) -> Result<Self> {
        Self::start_with_catalog(nodes, responder, Catalog::open(catalog)?).await
    }

    async fn start_with_catalog(
        nodes: &[&str],
        responder: Responder,
        catalog: Catalog,
    ) -> Result<Self> {
        let clients = Endpoint::bind("client", "127.0.0.1:0").await?;
        let controller = Endpoint::bind("controller", "127.0.0.1:0").await?;
        let client_addr = clients.local_addr();
        let controller_addr = controller.local_addr();

        let names: Vec<String> = nodes.iter().map(|n| n.to_string()).collect();
        let cluster = Arc::new(StaticCluster::new(names.clone()));
        let job = cluster
            .submit_job(JobSpec {
                name: "test".into(),
                db: DbKind::Sqlite3,
                container_memory_mb: 10,
                num_containers: 1,
                nodes: names,
            })
            .await?;

        let mut coordinator = Coordinator::new(
            clients,
            controller,
            catalog,
            DbKind::Sqlite3,
            EchoMaterializer,
            Arc::clone(&cluster),
        )
        .with_job(job);

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let expected = nodes.len();
        let server = tokio::spawn(async move {
            coordinator.register(expected).await?;
            coordinator
                .run_until(async move {
                    let _ = shutdown_rx.await;
                })
                .await
        });

        let mut controller_peer = LinePeer::connect(controller_addr).await?;
        controller_peer.send("APP_MASTER_INFO localhost 8042").await?;

        let mut workers = HashMap::new();
        for node in nodes {
            let worker = FakeWorker::spawn(controller_addr, node, responder).await?;
            workers.insert(node.to_string(), worker);
        }

        let client = LinePeer::connect(client_addr).await?;
        Ok(Self {
            client,
            workers,
            cluster,
            job,
            controller_peer,
            shutdown: Some(shutdown_tx),
            server: Some(server),
        })
    }

    pub fn worker(&mut self, node: &str) -> &mut FakeWorker {
        self.workers
            .get_mut(node)
            .unwrap_or_else(|| panic!("no worker named {node}"))
    }

    /// Waits for the coordinator task to end on its own (after `!exit`).
    pub async fn join(&mut self) -> Result<()> {
        let server = self.server.take().context("coordinator already joined")?;
        timeout(WAIT, server).await???;
        Ok(())
    }

    pub async fn stop(mut self) -> Result<()> {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        self.join().await
    }
}
