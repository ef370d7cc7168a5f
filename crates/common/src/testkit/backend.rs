use std::collections::{BTreeMap, BTreeSet};

use parking_lot::Mutex;

use crate::backend::{Backend, BackendError, CreateOpts, NetOpts, PortBinding};

#[derive(Debug, Default)]
struct State {
    /// every create call, including failed ones
    created: BTreeMap<String, CreateOpts>,
    create_calls: BTreeMap<String, usize>,
    /// containers that currently exist
    containers: BTreeSet<String>,
    removed: Vec<String>,
    rebooted: Vec<String>,
    executed: BTreeMap<String, Vec<Vec<String>>>,
    networks: BTreeMap<String, NetOpts>,
    networks_created: usize,
    removed_networks: Vec<String>,

    fail_create: BTreeSet<String>,
    panic_create: BTreeSet<String>,
    fail_execute: BTreeSet<String>,
    hidden_ports: BTreeSet<String>,
}

/// Container backend that keeps everything in memory.
///
/// Published ports are reported on a host named after the container,
///  which is how [`super::MemoryConnector`] tells nodes apart.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    state: Mutex<State>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every create of `id` fail
    pub fn fail_create(&self, id: &str) {
        self.state.lock().fail_create.insert(id.to_string());
    }

    /// Start `id`, then panic inside the create call
    pub fn panic_create(&self, id: &str) {
        self.state.lock().panic_create.insert(id.to_string());
    }

    /// Make every command executed in `id` fail
    pub fn fail_execute(&self, id: &str) {
        self.state.lock().fail_execute.insert(id.to_string());
    }

    /// Report no port bindings for `id`
    pub fn hide_ports(&self, id: &str) {
        self.state.lock().hidden_ports.insert(id.to_string());
    }

    /// Options `id` was last created with
    pub fn created(&self, id: &str) -> Option<CreateOpts> {
        self.state.lock().created.get(id).cloned()
    }

    /// How many times a create of `id` was attempted
    pub fn create_calls(&self, id: &str) -> usize {
        self.state.lock().create_calls.get(id).copied().unwrap_or(0)
    }

    /// Names of every container a create was attempted for
    pub fn created_names(&self) -> Vec<String> {
        self.state.lock().created.keys().cloned().collect()
    }

    pub fn exists(&self, id: &str) -> bool {
        self.state.lock().containers.contains(id)
    }

    /// Remove calls, in call order
    pub fn removed(&self) -> Vec<String> {
        self.state.lock().removed.clone()
    }

    pub fn rebooted(&self) -> Vec<String> {
        self.state.lock().rebooted.clone()
    }

    /// Commands that ran successfully in `id`
    pub fn executed(&self, id: &str) -> Vec<Vec<String>> {
        self.state
            .lock()
            .executed
            .get(id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn networks(&self) -> Vec<String> {
        self.state.lock().networks.keys().cloned().collect()
    }

    /// How many times a network actually had to be created
    pub fn networks_created(&self) -> usize {
        self.state.lock().networks_created
    }

    pub fn removed_networks(&self) -> Vec<String> {
        self.state.lock().removed_networks.clone()
    }
}

#[async_trait::async_trait]
impl Backend for MemoryBackend {
    async fn create(&self, id: &str, opts: CreateOpts) -> Result<(), BackendError> {
        let mut state = self.state.lock();
        state.created.insert(id.to_string(), opts);
        *state.create_calls.entry(id.to_string()).or_default() += 1;
        if state.panic_create.contains(id) {
            state.containers.insert(id.to_string());
            drop(state);
            panic!("scripted panic creating {}", id);
        }
        if state.fail_create.contains(id) {
            return Err(BackendError::CommandFailed {
                cmd: format!("create {}", id),
                code: Some(125),
                stderr: "scripted failure".to_string(),
            });
        }
        state.containers.insert(id.to_string());
        Ok(())
    }

    async fn remove(&self, id: &str) -> Result<(), BackendError> {
        let mut state = self.state.lock();
        state.removed.push(id.to_string());
        if !state.containers.remove(id) {
            return Err(BackendError::NotFound(id.to_string()));
        }
        Ok(())
    }

    async fn reboot(&self, id: &str) -> Result<(), BackendError> {
        let mut state = self.state.lock();
        if !state.containers.contains(id) {
            return Err(BackendError::NotFound(id.to_string()));
        }
        state.rebooted.push(id.to_string());
        Ok(())
    }

    async fn execute(&self, id: &str, cmd: &[String]) -> Result<(), BackendError> {
        let mut state = self.state.lock();
        if state.fail_execute.contains(id) {
            return Err(BackendError::CommandFailed {
                cmd: cmd.join(" "),
                code: Some(1),
                stderr: "scripted failure".to_string(),
            });
        }
        state
            .executed
            .entry(id.to_string())
            .or_default()
            .push(cmd.to_vec());
        Ok(())
    }

    async fn ensure_network(&self, opts: NetOpts) -> Result<String, BackendError> {
        let mut state = self.state.lock();
        if let Some(id) = &opts.net_id {
            if state.networks.contains_key(id) {
                return Ok(id.clone());
            }
        }
        state.networks_created += 1;
        let id = format!("{}-{}", opts.name, state.networks_created);
        state.networks.insert(id.clone(), opts);
        Ok(id)
    }

    async fn remove_network(&self, net_id: &str) -> Result<(), BackendError> {
        let mut state = self.state.lock();
        state.removed_networks.push(net_id.to_string());
        match state.networks.remove(net_id) {
            Some(_) => Ok(()),
            None => Err(BackendError::NotFound(net_id.to_string())),
        }
    }

    async fn connection_info(&self, id: &str, port: u16) -> Result<Vec<PortBinding>, BackendError> {
        let state = self.state.lock();
        if !state.containers.contains(id) {
            return Err(BackendError::NotFound(id.to_string()));
        }
        if state.hidden_ports.contains(id) {
            return Ok(Vec::new());
        }
        Ok(vec![PortBinding {
            host_ip: id.to_string(),
            host_port: port,
        }])
    }
}
