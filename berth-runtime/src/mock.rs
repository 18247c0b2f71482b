//! In-memory container engine for tests.
//!
//! [`MockRuntime`] reproduces the engine behaviours the orchestrator relies on:
//! label-filtered listing, 304-style "already in state" answers, name
//! collisions, refusal to remove running containers, and streamed exec output
//! that goes through the same bounded capture as the Docker adapter.

use crate::capture::{capture_stream, tail_lines, CaptureLimits};
use crate::error::{Result, RuntimeError};
use crate::{
    ContainerRuntime, ContainerSpec, ContainerState, ContainerSummary, ExecOutput, LabelSelector,
    PortMapping,
};
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::{self, BoxStream, StreamExt};
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tokio::sync::Mutex;

/// Engine operations, for call accounting and failure injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MockOp {
    Ping,
    List,
    Create,
    Start,
    Stop,
    Remove,
    Logs,
    Exec,
}

/// Scripted behaviour of an exec'd program.
#[derive(Debug, Clone)]
pub enum MockExec {
    /// Emit stdout then stderr, exit with `exit_code`.
    Output {
        stdout: String,
        stderr: String,
        exit_code: i64,
    },
    /// Produce nothing for `duration`, then exit 0.
    Sleep(Duration),
    /// Emit `chunk` forever.
    Flood(String),
}

#[derive(Debug, Clone)]
struct MockContainer {
    id: String,
    name: String,
    image: String,
    state: ContainerState,
    ports: BTreeMap<u16, u16>,
    labels: BTreeMap<String, String>,
    created: i64,
    logs: Vec<String>,
}

impl MockContainer {
    fn summary(&self) -> ContainerSummary {
        ContainerSummary {
            id: self.id.clone(),
            name: self.name.clone(),
            image: self.image.clone(),
            state: self.state,
            ports: self
                .ports
                .iter()
                .map(|(container_port, host_port)| PortMapping {
                    container_port: *container_port,
                    host_ip: Some("0.0.0.0".to_string()),
                    host_port: Some(*host_port),
                    protocol: "tcp".to_string(),
                })
                .collect(),
            labels: self.labels.clone(),
            created: Some(self.created),
        }
    }
}

#[derive(Debug, Default)]
struct MockEngine {
    containers: Vec<MockContainer>,
    calls: Vec<MockOp>,
    failures: HashMap<MockOp, RuntimeError>,
    programs: HashMap<String, MockExec>,
    clock: i64,
}

impl MockEngine {
    fn record(&mut self, op: MockOp) -> Result<()> {
        self.calls.push(op);
        match self.failures.remove(&op) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn find_mut(&mut self, id: &str) -> Result<&mut MockContainer> {
        self.containers
            .iter_mut()
            .find(|container| container.id == id)
            .ok_or_else(|| RuntimeError::NotFound(id.to_string()))
    }
}

/// Engine double implementing [`ContainerRuntime`].
#[derive(Debug, Default)]
pub struct MockRuntime {
    engine: Mutex<MockEngine>,
}

impl MockRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every engine call made so far, in order.
    pub async fn calls(&self) -> Vec<MockOp> {
        self.engine.lock().await.calls.clone()
    }

    pub async fn call_count(&self, op: MockOp) -> usize {
        self.engine
            .lock()
            .await
            .calls
            .iter()
            .filter(|call| **call == op)
            .count()
    }

    /// Make the next `op` call fail with `err`.
    pub async fn fail_next(&self, op: MockOp, err: RuntimeError) {
        self.engine.lock().await.failures.insert(op, err);
    }

    /// Script the behaviour of `program` (argv[0]).
    pub async fn on_exec(&self, program: &str, behaviour: MockExec) {
        self.engine
            .lock()
            .await
            .programs
            .insert(program.to_string(), behaviour);
    }

    /// Add a container that berth did not create.
    pub async fn insert_foreign(
        &self,
        name: &str,
        image: &str,
        labels: BTreeMap<String, String>,
        running: bool,
    ) -> String {
        let mut engine = self.engine.lock().await;
        engine.clock += 1;
        let container = MockContainer {
            id: uuid::Uuid::new_v4().simple().to_string(),
            name: name.to_string(),
            image: image.to_string(),
            state: if running {
                ContainerState::Running
            } else {
                ContainerState::Exited
            },
            ports: BTreeMap::new(),
            labels,
            created: engine.clock,
            logs: Vec::new(),
        };
        let id = container.id.clone();
        engine.containers.push(container);
        id
    }

    /// Append a line to a container's log.
    pub async fn push_log(&self, id: &str, line: &str) -> Result<()> {
        let mut engine = self.engine.lock().await;
        engine.find_mut(id)?.logs.push(line.to_string());
        Ok(())
    }

    pub async fn state_of(&self, id: &str) -> Option<ContainerState> {
        let engine = self.engine.lock().await;
        engine
            .containers
            .iter()
            .find(|container| container.id == id)
            .map(|container| container.state)
    }

    pub async fn container_count(&self) -> usize {
        self.engine.lock().await.containers.len()
    }

    fn exec_stream(behaviour: MockExec) -> BoxStream<'static, Result<Bytes>> {
        match behaviour {
            MockExec::Output { stdout, stderr, .. } => stream::iter(
                [stdout, stderr]
                    .into_iter()
                    .filter(|part| !part.is_empty())
                    .map(|part| Ok(Bytes::from(part)))
                    .collect::<Vec<_>>(),
            )
            .boxed(),
            MockExec::Sleep(duration) => stream::once(async move {
                tokio::time::sleep(duration).await;
                Ok(Bytes::new())
            })
            .boxed(),
            MockExec::Flood(chunk) => stream::repeat(Ok(Bytes::from(chunk))).boxed(),
        }
    }

    fn default_behaviour(argv: &[String]) -> MockExec {
        let program = argv[0].as_str();
        let args = &argv[1..];
        match program {
            "echo" => MockExec::Output {
                stdout: format!("{}\n", args.join(" ")),
                stderr: String::new(),
                exit_code: 0,
            },
            "true" => MockExec::Output {
                stdout: String::new(),
                stderr: String::new(),
                exit_code: 0,
            },
            "sleep" => {
                let secs = args
                    .first()
                    .and_then(|arg| arg.parse::<f64>().ok())
                    .unwrap_or(0.0);
                MockExec::Sleep(Duration::from_secs_f64(secs.max(0.0)))
            }
            other => MockExec::Output {
                stdout: String::new(),
                stderr: format!("exec: \"{other}\": executable file not found in $PATH\n"),
                exit_code: 127,
            },
        }
    }
}

#[async_trait]
impl ContainerRuntime for MockRuntime {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn ping(&self) -> Result<()> {
        self.engine.lock().await.record(MockOp::Ping)
    }

    async fn list_by_label(&self, selector: &LabelSelector) -> Result<Vec<ContainerSummary>> {
        let mut engine = self.engine.lock().await;
        engine.record(MockOp::List)?;
        Ok(engine
            .containers
            .iter()
            .filter(|container| selector.matches(&container.labels))
            .map(MockContainer::summary)
            .collect())
    }

    async fn create(&self, spec: &ContainerSpec) -> Result<String> {
        spec.validate()?;
        let mut engine = self.engine.lock().await;
        engine.record(MockOp::Create)?;

        let name = spec.container_name();
        if engine.containers.iter().any(|container| container.name == name) {
            return Err(RuntimeError::Conflict(format!(
                "container name \"/{name}\" is already in use"
            )));
        }

        engine.clock += 1;
        let container = MockContainer {
            id: uuid::Uuid::new_v4().simple().to_string(),
            name,
            image: spec.image.clone(),
            state: ContainerState::Created,
            ports: spec.ports.clone(),
            labels: spec.all_labels(),
            created: engine.clock,
            logs: Vec::new(),
        };
        let id = container.id.clone();
        engine.containers.push(container);
        Ok(id)
    }

    async fn start(&self, id: &str) -> Result<()> {
        let mut engine = self.engine.lock().await;
        engine.record(MockOp::Start)?;
        let container = engine.find_mut(id)?;
        if container.state.is_running() {
            return Err(RuntimeError::AlreadyInState {
                id: id.to_string(),
                state: "running",
            });
        }
        container.state = ContainerState::Running;
        container.logs.push(format!("{} started", container.name));
        Ok(())
    }

    async fn stop(&self, id: &str) -> Result<()> {
        let mut engine = self.engine.lock().await;
        engine.record(MockOp::Stop)?;
        let container = engine.find_mut(id)?;
        if !container.state.is_running() {
            return Err(RuntimeError::AlreadyInState {
                id: id.to_string(),
                state: "stopped",
            });
        }
        container.state = ContainerState::Exited;
        container.logs.push(format!("{} stopped", container.name));
        Ok(())
    }

    async fn remove(&self, id: &str) -> Result<()> {
        let mut engine = self.engine.lock().await;
        engine.record(MockOp::Remove)?;
        let position = engine
            .containers
            .iter()
            .position(|container| container.id == id)
            .ok_or_else(|| RuntimeError::NotFound(id.to_string()))?;
        if engine.containers[position].state.is_running() {
            return Err(RuntimeError::Conflict(format!(
                "cannot remove container {id}: container is running"
            )));
        }
        engine.containers.remove(position);
        Ok(())
    }

    async fn logs(&self, id: &str, tail: usize, limits: &CaptureLimits) -> Result<String> {
        let text = {
            let mut engine = self.engine.lock().await;
            engine.record(MockOp::Logs)?;
            let container = engine.find_mut(id)?;
            let mut text = container.logs.join("\n");
            if !text.is_empty() {
                text.push('\n');
            }
            tail_lines(&text, tail)
        };

        let captured = capture_stream(stream::iter(vec![Ok(Bytes::from(text))]), limits).await?;
        Ok(captured.output)
    }

    async fn exec(
        &self,
        id: &str,
        argv: &[String],
        limits: &CaptureLimits,
    ) -> Result<ExecOutput> {
        if argv.is_empty() {
            return Err(RuntimeError::Invalid("exec command is empty".to_string()));
        }

        // The lock is released before capture so a slow command does not
        // block unrelated calls.
        let behaviour = {
            let mut engine = self.engine.lock().await;
            engine.record(MockOp::Exec)?;
            let container = engine.find_mut(id)?;
            if !container.state.is_running() {
                return Err(RuntimeError::Conflict(format!(
                    "container {id} is not running"
                )));
            }
            engine
                .programs
                .get(&argv[0])
                .cloned()
                .unwrap_or_else(|| Self::default_behaviour(argv))
        };

        let exit_code = match &behaviour {
            MockExec::Output { exit_code, .. } => Some(*exit_code),
            MockExec::Sleep(_) => Some(0),
            MockExec::Flood(_) => None,
        };
        let captured = capture_stream(Self::exec_stream(behaviour), limits).await?;
        let exit_code = if captured.end.is_complete() {
            exit_code
        } else {
            None
        };
        Ok(ExecOutput::from_capture(captured, exit_code))
    }
}
